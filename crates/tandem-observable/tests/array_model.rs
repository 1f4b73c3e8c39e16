//! Structural array methods must agree with a plain `Vec` model, and the
//! records they emit must replay to the same final state.

use proptest::prelude::*;
use std::sync::Arc;
use parking_lot::Mutex;
use tandem_observable::{flush, ObservableArray, PathSegment, Record, RecordKind, Value};

#[derive(Clone, Debug)]
enum Mutation {
    Push(i64),
    Pop,
    Shift,
    Unshift(i64),
    Splice { start: usize, delete: usize, items: Vec<i64> },
    Set { index: usize, value: i64 },
    SetLen(usize),
}

fn mutation_strategy() -> impl Strategy<Value = Mutation> {
    prop_oneof![
        (0i64..100).prop_map(Mutation::Push),
        Just(Mutation::Pop),
        Just(Mutation::Shift),
        (0i64..100).prop_map(Mutation::Unshift),
        (0usize..8, 0usize..4, prop::collection::vec(0i64..100, 0..4))
            .prop_map(|(start, delete, items)| Mutation::Splice { start, delete, items }),
        (0usize..8, 0i64..100).prop_map(|(index, value)| Mutation::Set { index, value }),
        (0usize..8).prop_map(Mutation::SetLen),
    ]
}

fn apply_model(model: &mut Vec<Option<i64>>, m: &Mutation) {
    match m {
        Mutation::Push(v) => model.push(Some(*v)),
        Mutation::Pop => {
            model.pop();
        }
        Mutation::Shift => {
            if !model.is_empty() {
                model.remove(0);
            }
        }
        Mutation::Unshift(v) => model.insert(0, Some(*v)),
        Mutation::Splice { start, delete, items } => {
            let start = (*start).min(model.len());
            let end = (start + delete).min(model.len());
            model.splice(start..end, items.iter().map(|v| Some(*v)));
        }
        Mutation::Set { index, value } => {
            if *index >= model.len() {
                model.resize(index + 1, None);
            }
            model[*index] = Some(*value);
        }
        Mutation::SetLen(n) => model.resize(*n, None),
    }
}

fn apply_array(array: &ObservableArray, m: &Mutation) {
    match m {
        Mutation::Push(v) => {
            array.push(*v);
        }
        Mutation::Pop => {
            array.pop();
        }
        Mutation::Shift => {
            array.shift();
        }
        Mutation::Unshift(v) => {
            array.unshift(vec![Value::from(*v)]);
        }
        Mutation::Splice { start, delete, items } => {
            array.splice(*start as isize, *delete, items.iter().map(|v| Value::from(*v)).collect());
        }
        Mutation::Set { index, value } => array.set(*index, *value),
        Mutation::SetLen(n) => array.set_len(*n),
    }
}

fn replay(slots: &mut Vec<Option<Value>>, record: &Record) {
    match (record.kind, &record.path[..]) {
        (RecordKind::Set, [PathSegment::Index(i)]) => {
            if *i >= slots.len() {
                slots.resize(i + 1, None);
            }
            slots[*i] = Some(record.value.clone());
        }
        (RecordKind::Delete, [PathSegment::Index(i)]) => {
            if let Some(slot) = slots.get_mut(*i) {
                *slot = None;
            }
        }
        (RecordKind::Set, [PathSegment::Length]) => {
            let len = record.value.as_f64().unwrap_or(0.0) as usize;
            slots.resize(len, None);
        }
        _ => {}
    }
}

proptest! {
    #[test]
    fn prop_matches_vec_model(mutations in prop::collection::vec(mutation_strategy(), 0..20)) {
        let array = ObservableArray::from_values(vec![Value::from(1), Value::from(2), Value::from(3)]);
        let mut model = vec![Some(1), Some(2), Some(3)];
        for m in &mutations {
            apply_array(&array, m);
            apply_model(&mut model, m);
        }
        let expected: Vec<serde_json::Value> = model
            .iter()
            .map(|v| v.map(serde_json::Value::from).unwrap_or(serde_json::Value::Null))
            .collect();
        prop_assert_eq!(array.to_json(), serde_json::Value::Array(expected));
    }

    #[test]
    fn prop_records_replay_to_final_state(mutations in prop::collection::vec(mutation_strategy(), 0..20)) {
        let initial = vec![Value::from(1), Value::from(2), Value::from(3)];
        let array = ObservableArray::from_values(initial.clone());
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let sub = array.subscribe(move |records| sink.lock().extend_from_slice(records));

        for m in &mutations {
            apply_array(&array, m);
        }
        flush();
        sub.unsubscribe();

        let mut slots: Vec<Option<Value>> = initial.into_iter().map(Some).collect();
        for record in log.lock().iter() {
            replay(&mut slots, record);
        }
        let replayed: Vec<serde_json::Value> = slots
            .iter()
            .map(|s| s.as_ref().map(Value::to_json).unwrap_or(serde_json::Value::Null))
            .collect();
        prop_assert_eq!(array.to_json(), serde_json::Value::Array(replayed));
    }
}
