//! Convergence tests for shared documents
//!
//! Replicas edit independently, exchange updates in arbitrary order (with
//! duplicates) and must end up with identical content.

use parking_lot::Mutex;
use proptest::prelude::*;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde_json::json;
use std::sync::Arc;
use tandem_shared::{Doc, SharedMap, SharedValue, UpdateSubscription};

struct Replica {
    doc: Doc,
    outbox: Arc<Mutex<Vec<Vec<u8>>>>,
    _sub: UpdateSubscription,
}

impl Replica {
    fn new(client: u64) -> Self {
        let doc = Doc::with_client_id(client);
        let outbox = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&outbox);
        let sub = doc.on_update(move |update, _| sink.lock().push(update.to_vec()));
        Self {
            doc,
            outbox,
            _sub: sub,
        }
    }

    fn snapshot(&self) -> serde_json::Value {
        json!({
            "root": self.doc.get_map("root").to_json(),
            "list": self.doc.get_array("list").to_json(),
        })
    }
}

fn deliver(from: &Replica, to: &Replica) {
    let updates = from.outbox.lock().clone();
    for update in updates {
        to.doc.apply_update(&update, None).unwrap();
    }
}

#[derive(Clone, Debug)]
enum Step {
    Set(usize, u8, i64),
    Delete(usize, u8),
    Nested(usize, u8, i64),
    Insert(usize, usize, i64),
    Remove(usize, usize),
    Sync(usize, usize),
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (0..3usize, 0..4u8, any::<i64>()).prop_map(|(r, k, v)| Step::Set(r, k, v)),
        (0..3usize, 0..4u8).prop_map(|(r, k)| Step::Delete(r, k)),
        (0..3usize, 0..3u8, any::<i64>()).prop_map(|(r, k, v)| Step::Nested(r, k, v)),
        (0..3usize, any::<usize>(), -50..50i64).prop_map(|(r, i, v)| Step::Insert(r, i, v)),
        (0..3usize, any::<usize>()).prop_map(|(r, i)| Step::Remove(r, i)),
        (0..3usize, 0..3usize).prop_map(|(a, b)| Step::Sync(a, b)),
    ]
}

fn apply(replicas: &[Replica], step: &Step) {
    match step {
        Step::Set(r, k, v) => {
            let root = replicas[*r].doc.get_map("root");
            root.set(format!("k{}", k), *v).unwrap();
        }
        Step::Delete(r, k) => {
            let root = replicas[*r].doc.get_map("root");
            root.delete(&format!("k{}", k)).unwrap();
        }
        Step::Nested(r, k, v) => {
            let root = replicas[*r].doc.get_map("root");
            match root.get("nested").and_then(|n| n.as_map().cloned()) {
                Some(nested) => nested.set(format!("n{}", k), *v).unwrap(),
                None => {
                    let nested = SharedMap::new();
                    nested.set(format!("n{}", k), *v).unwrap();
                    root.set("nested", nested).unwrap();
                }
            }
        }
        Step::Insert(r, i, v) => {
            let list = replicas[*r].doc.get_array("list");
            let index = i % (list.len() + 1);
            list.insert(index, vec![SharedValue::from(*v)]).unwrap();
        }
        Step::Remove(r, i) => {
            let list = replicas[*r].doc.get_array("list");
            if !list.is_empty() {
                list.delete(i % list.len(), 1).unwrap();
            }
        }
        Step::Sync(a, b) if a != b => deliver(&replicas[*a], &replicas[*b]),
        Step::Sync(..) => {}
    }
}

proptest! {
    #[test]
    fn prop_replicas_converge(steps in prop::collection::vec(step(), 1..40), seed in any::<u64>()) {
        let replicas: Vec<Replica> = (1..=3).map(Replica::new).collect();
        for s in &steps {
            apply(&replicas, s);
        }

        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        for target in &replicas {
            let mut updates: Vec<Vec<u8>> = replicas
                .iter()
                .flat_map(|r| r.outbox.lock().clone())
                .collect();
            updates.shuffle(&mut rng);
            for update in &updates {
                target.doc.apply_update(update, None).unwrap();
            }
        }

        let expected = replicas[0].snapshot();
        for replica in &replicas {
            prop_assert_eq!(replica.doc.pending_ops(), 0);
            prop_assert_eq!(replica.snapshot(), expected.clone());
        }
    }
}

#[test]
fn test_concurrent_map_writes_pick_one_winner() {
    let a = Replica::new(1);
    let b = Replica::new(2);
    a.doc.get_map("root").set("title", "from a").unwrap();
    b.doc.get_map("root").set("title", "from b").unwrap();

    deliver(&a, &b);
    deliver(&b, &a);

    assert_eq!(a.snapshot(), b.snapshot());
    // Equal clocks: the higher client id wins.
    assert_eq!(a.doc.get_map("root").to_json(), json!({"title": "from b"}));
}

#[test]
fn test_out_of_order_delivery_is_parked_then_applied() {
    let a = Replica::new(1);
    let list = a.doc.get_array("list");
    list.push(1).unwrap();
    list.push(2).unwrap();
    list.push(3).unwrap();

    let b = Replica::new(2);
    let updates = a.outbox.lock().clone();
    for update in updates.iter().rev() {
        b.doc.apply_update(update, None).unwrap();
    }

    assert_eq!(b.doc.pending_ops(), 0);
    assert_eq!(b.doc.get_array("list").to_json(), json!([1, 2, 3]));
}

#[test]
fn test_relay_between_three_replicas_terminates() {
    let docs: Vec<Doc> = (1..=3).map(Doc::with_client_id).collect();
    let mut subs = Vec::new();
    for (i, doc) in docs.iter().enumerate() {
        let peers: Vec<Doc> = docs
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .map(|(_, d)| d.clone())
            .collect();
        subs.push(doc.on_update(move |update, _| {
            for peer in &peers {
                peer.apply_update(update, Some("relay".into())).unwrap();
            }
        }));
    }

    docs[0].get_map("root").set("x", 1).unwrap();
    docs[2].get_array("list").push("tail").unwrap();

    for doc in &docs {
        assert_eq!(doc.get_map("root").to_json(), json!({"x": 1}));
        assert_eq!(doc.get_array("list").to_json(), json!(["tail"]));
    }
}
