//! Two bound replicas connected by an update relay
//!
//! Every update a document emits is applied to the other document tagged
//! with a relay origin; relayed updates are not sent back.

use proptest::prelude::*;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tandem_bind::{bind, BindHandle, BindOptions};
use tandem_observable::{flush, observable, ObservableArray, ObservableMap, Value};
use tandem_shared::{Doc, Origin, UpdateSubscription};

const RELAY: &str = "relay";

fn relay(from: &Doc, to: &Doc) -> UpdateSubscription {
    let target = to.clone();
    from.on_update(move |update, origin| {
        if origin.map(Origin::as_str) != Some(RELAY) {
            target.apply_update(update, Some(RELAY.into())).unwrap();
        }
    })
}

struct Replica {
    doc: Doc,
    state: Value,
    _handle: BindHandle,
}

impl Replica {
    fn map(client: u64, initial: serde_json::Value) -> Self {
        let doc = Doc::with_client_id(client);
        let state = observable(initial);
        let handle = bind(state.clone(), doc.get_map("map"), BindOptions::default()).unwrap();
        Self {
            doc,
            state,
            _handle: handle,
        }
    }

    fn array(client: u64) -> Self {
        let doc = Doc::with_client_id(client);
        let state = Value::Array(ObservableArray::new());
        let handle = bind(state.clone(), doc.get_array("arr"), BindOptions::default()).unwrap();
        Self {
            doc,
            state,
            _handle: handle,
        }
    }

    fn root(&self) -> ObservableMap {
        self.state.as_map().cloned().unwrap()
    }

    fn items(&self) -> ObservableArray {
        self.state.as_array().cloned().unwrap()
    }

    fn shared_json(&self) -> serde_json::Value {
        match &self.state {
            Value::Array(_) => self.doc.get_array("arr").to_json(),
            _ => self.doc.get_map("map").to_json(),
        }
    }
}

fn connected(a: &Replica, b: &Replica) -> (UpdateSubscription, UpdateSubscription) {
    (relay(&a.doc, &b.doc), relay(&b.doc, &a.doc))
}

fn assert_converged(replicas: &[&Replica]) {
    let expected = replicas[0].state.to_json();
    for replica in replicas {
        assert_eq!(replica.state.to_json(), expected);
        assert_eq!(replica.shared_json(), expected);
    }
}

// ============================================================================
// Relay scenarios
// ============================================================================

#[test]
fn test_key_travels_both_ways() {
    let p1 = Replica::map(1, json!({}));
    let p2 = Replica::map(2, json!({}));
    let _relay = connected(&p1, &p2);

    p1.root().set("foo", "a");
    flush();
    assert_eq!(p2.root().get("foo"), Value::from("a"));

    p2.root().set("foo", "b");
    flush();
    assert_eq!(p1.root().get("foo"), Value::from("b"));
    assert_converged(&[&p1, &p2]);
}

#[test]
fn test_nested_value_travels() {
    let p1 = Replica::map(1, json!({}));
    let p2 = Replica::map(2, json!({}));
    let _relay = connected(&p1, &p2);

    p1.root().set("foo", observable(json!({"bar": "a"})));
    flush();
    assert_eq!(p2.state.to_json(), json!({"foo": {"bar": "a"}}));

    p1.root().get("foo").as_map().unwrap().set("bar", "b");
    flush();
    assert_eq!(p2.state.to_json(), json!({"foo": {"bar": "b"}}));
    assert_converged(&[&p1, &p2]);
}

#[test]
fn test_array_in_map() {
    let p1 = Replica::map(1, json!({"texts": []}));
    let p2 = Replica::map(2, json!({"texts": []}));
    let _relay = connected(&p1, &p2);

    let texts = p1.root().get("texts").as_array().cloned().unwrap();
    texts.push("a");
    flush();
    texts.push("b");
    flush();
    assert_eq!(p2.state.to_json(), json!({"texts": ["a", "b"]}));
    assert_converged(&[&p1, &p2]);
}

#[test]
fn test_containers_in_array() {
    let p1 = Replica::array(1);
    let p2 = Replica::array(2);
    let _relay = connected(&p1, &p2);

    p1.items().push(observable(json!({"foo": "a"})));
    flush();
    p1.items().push(observable(json!(["b"])));
    flush();
    assert_eq!(p2.state.to_json(), json!([{"foo": "a"}, ["b"]]));

    p2.items().get(0).as_map().unwrap().set("foo", "c");
    p2.items().get(1).as_array().unwrap().push("d");
    flush();
    assert_eq!(p1.state.to_json(), json!([{"foo": "c"}, ["b", "d"]]));
    assert_converged(&[&p1, &p2]);
}

#[test]
fn test_undefined_in_relayed_values() {
    let p1 = Replica::map(1, json!({"list": []}));
    let p2 = Replica::map(2, json!({"list": []}));
    let _relay = connected(&p1, &p2);

    p1.root().set("a", "hello");
    flush();
    assert_eq!(p2.root().get("a"), Value::from("hello"));
    p1.root().set("a", Value::Undefined);
    flush();
    assert!(!p2.root().contains_key("a"));

    let list = p1.root().get("list").as_array().cloned().unwrap();
    list.push("a");
    list.push(Value::Undefined);
    list.set_len(4);
    list.set(3, "c");
    flush();
    assert_eq!(p2.state.to_json(), json!({"list": ["a", null, null, "c"]}));
}

#[test]
fn test_one_update_per_side() {
    let p1 = Replica::map(1, json!({}));
    let p2 = Replica::map(2, json!({}));

    let sent = Arc::new(AtomicUsize::new(0));
    let received = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&sent);
    let target = p2.doc.clone();
    let _forward = p1.doc.on_update(move |update, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        target.apply_update(update, Some("hello".into())).unwrap();
    });
    let counter = Arc::clone(&received);
    let _observe = p2.doc.on_update(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    p1.root().set("b", observable(json!({"b": "b"})));
    flush();

    assert_eq!(sent.load(Ordering::SeqCst), 1);
    assert_eq!(received.load(Ordering::SeqCst), 1);
    assert_eq!(p2.state.to_json(), json!({"b": {"b": "b"}}));
}

#[test]
fn test_late_binding_keeps_remote_value() {
    let p1 = Replica::map(1, json!({"items": {"item1": {"color": "blue"}}}));
    let doc2 = Doc::with_client_id(2);
    let _relay = (relay(&p1.doc, &doc2), relay(&doc2, &p1.doc));
    doc2.apply_update(&p1.doc.encode_state_as_update(), Some(RELAY.into()))
        .unwrap();

    p1.root().set("items", observable(json!({"item1": {"color": "red"}})));
    flush();

    let state2 = observable(json!({"items": {"item1": {"color": "blue"}}}));
    let _handle = bind(state2.clone(), doc2.get_map("map"), BindOptions::default()).unwrap();
    flush();

    let expected = json!({"items": {"item1": {"color": "red"}}});
    assert_eq!(state2.to_json(), expected);
    assert_eq!(p1.doc.get_map("map").to_json(), expected);
}

// ============================================================================
// Random sessions
// ============================================================================

#[derive(Clone, Debug)]
enum Edit {
    SetKey(u8, i64),
    DeleteKey(u8),
    SetNested(u8, i64),
    Push(i64),
    PushMap(i64),
    Pop,
    Shift,
    Unshift(i64),
    Remove(usize),
    Replace(usize, i64),
    EditItem(usize, i64),
}

fn edit() -> impl Strategy<Value = Edit> {
    prop_oneof![
        (0..3u8, -20..20i64).prop_map(|(k, v)| Edit::SetKey(k, v)),
        (0..3u8).prop_map(Edit::DeleteKey),
        (0..3u8, -20..20i64).prop_map(|(k, v)| Edit::SetNested(k, v)),
        (-20..20i64).prop_map(Edit::Push),
        (-20..20i64).prop_map(Edit::PushMap),
        Just(Edit::Pop),
        Just(Edit::Shift),
        (-20..20i64).prop_map(Edit::Unshift),
        any::<usize>().prop_map(Edit::Remove),
        (any::<usize>(), -20..20i64).prop_map(|(i, v)| Edit::Replace(i, v)),
        (any::<usize>(), -20..20i64).prop_map(|(i, v)| Edit::EditItem(i, v)),
    ]
}

fn apply_edit(root: &ObservableMap, edit: &Edit) {
    let list = root.get("list").as_array().cloned().unwrap();
    let nested = root.get("nested").as_map().cloned().unwrap();
    match edit {
        Edit::SetKey(k, v) => root.set(format!("k{}", k), *v),
        Edit::DeleteKey(k) => {
            root.delete(&format!("k{}", k));
        }
        Edit::SetNested(k, v) => nested.set(format!("n{}", k), *v),
        Edit::Push(v) => {
            list.push(*v);
        }
        Edit::PushMap(v) => {
            list.push(observable(json!({ "v": v })));
        }
        Edit::Pop => {
            list.pop();
        }
        Edit::Shift => {
            list.shift();
        }
        Edit::Unshift(v) => {
            list.unshift(vec![Value::from(*v)]);
        }
        Edit::Remove(i) if !list.is_empty() => {
            list.splice((i % list.len()) as isize, 1, Vec::new());
        }
        Edit::Replace(i, v) if !list.is_empty() => list.set(i % list.len(), *v),
        Edit::EditItem(i, v) if !list.is_empty() => {
            if let Value::Map(item) = list.get(i % list.len()) {
                item.set("v", *v);
            }
        }
        Edit::Remove(_) | Edit::Replace(..) | Edit::EditItem(..) => {}
    }
}

proptest! {
    #[test]
    fn prop_relayed_replicas_converge(
        steps in prop::collection::vec((any::<bool>(), prop::collection::vec(edit(), 1..3)), 1..30)
    ) {
        let initial = json!({"list": [], "nested": {}});
        let p1 = Replica::map(1, initial.clone());
        let p2 = Replica::map(2, initial);
        let _relay = connected(&p1, &p2);

        for (on_second, batch) in &steps {
            let target = if *on_second { &p2 } else { &p1 };
            for edit in batch {
                apply_edit(&target.root(), edit);
            }
            flush();

            let expected = p1.state.to_json();
            prop_assert_eq!(p2.state.to_json(), expected.clone());
            prop_assert_eq!(p1.shared_json(), expected.clone());
            prop_assert_eq!(p2.shared_json(), expected);
        }
    }

    #[test]
    fn prop_offline_replicas_merge(
        first in prop::collection::vec(prop::collection::vec(edit(), 1..3), 0..12),
        second in prop::collection::vec(prop::collection::vec(edit(), 1..3), 0..12),
        after in prop::collection::vec((any::<bool>(), edit()), 0..6),
    ) {
        let initial = json!({"list": [], "nested": {}});
        let p1 = Replica::map(1, initial.clone());
        let p2 = Replica::map(2, initial);

        for (replica, batches) in [(&p1, &first), (&p2, &second)] {
            for batch in batches {
                for edit in batch {
                    apply_edit(&replica.root(), edit);
                }
                flush();
            }
        }

        let from_first = p1.doc.encode_state_as_update();
        let from_second = p2.doc.encode_state_as_update();
        p1.doc.apply_update(&from_second, Some(RELAY.into())).unwrap();
        p2.doc.apply_update(&from_first, Some(RELAY.into())).unwrap();
        flush();

        let expected = p1.state.to_json();
        prop_assert_eq!(p2.state.to_json(), expected.clone());
        prop_assert_eq!(p1.shared_json(), expected.clone());
        prop_assert_eq!(p2.shared_json(), expected);

        let _relay = connected(&p1, &p2);
        for (on_second, edit) in &after {
            let target = if *on_second { &p2 } else { &p1 };
            apply_edit(&target.root(), edit);
            flush();
        }
        let expected = p1.state.to_json();
        prop_assert_eq!(p2.state.to_json(), expected.clone());
        prop_assert_eq!(p1.shared_json(), expected.clone());
        prop_assert_eq!(p2.shared_json(), expected);
    }
}
