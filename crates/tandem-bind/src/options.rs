//! Binding options and the transaction wrapper.

use std::fmt;
use std::sync::Arc;
use tandem_shared::{Doc, Origin};

/// Tag attached to every transaction a binding opens.
#[derive(Clone)]
pub enum TransactionOrigin {
    Static(Origin),
    /// Called once per transaction, e.g. to mint correlation ids.
    Factory(Arc<dyn Fn() -> Origin + Send + Sync>),
}

impl TransactionOrigin {
    pub fn factory<F>(f: F) -> Self
    where
        F: Fn() -> Origin + Send + Sync + 'static,
    {
        TransactionOrigin::Factory(Arc::new(f))
    }

    pub fn resolve(&self) -> Origin {
        match self {
            TransactionOrigin::Static(origin) => origin.clone(),
            TransactionOrigin::Factory(f) => f(),
        }
    }
}

impl fmt::Debug for TransactionOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionOrigin::Static(origin) => f.debug_tuple("Static").field(origin).finish(),
            TransactionOrigin::Factory(_) => f.write_str("Factory(..)"),
        }
    }
}

impl From<Origin> for TransactionOrigin {
    fn from(origin: Origin) -> Self {
        TransactionOrigin::Static(origin)
    }
}

impl From<&str> for TransactionOrigin {
    fn from(tag: &str) -> Self {
        TransactionOrigin::Static(Origin::from(tag))
    }
}

/// Options for [`crate::bind`].
#[derive(Clone, Debug, Default)]
pub struct BindOptions {
    pub transaction_origin: Option<TransactionOrigin>,
}

impl BindOptions {
    pub fn builder() -> BindOptionsBuilder {
        BindOptionsBuilder::new()
    }

    /// Origin for a new transaction. Runs the factory, if any.
    pub fn origin(&self) -> Option<Origin> {
        self.transaction_origin.as_ref().map(TransactionOrigin::resolve)
    }
}

/// Builder for binding options.
pub struct BindOptionsBuilder {
    options: BindOptions,
}

impl BindOptionsBuilder {
    pub fn new() -> Self {
        Self {
            options: BindOptions::default(),
        }
    }

    pub fn transaction_origin(mut self, origin: impl Into<TransactionOrigin>) -> Self {
        self.options.transaction_origin = Some(origin.into());
        self
    }

    pub fn origin_factory<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Origin + Send + Sync + 'static,
    {
        self.options.transaction_origin = Some(TransactionOrigin::factory(f));
        self
    }

    pub fn build(self) -> BindOptions {
        self.options
    }
}

impl Default for BindOptionsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Run `f` in one transaction of `doc` tagged with the configured origin.
///
/// Without a document (the shared container is still detached) `f` runs
/// directly. Inside an open transaction `f` joins it and the origin is left
/// alone.
pub fn with_transaction<R>(doc: Option<&Doc>, options: &BindOptions, f: impl FnOnce() -> R) -> R {
    match doc {
        Some(doc) if !doc.in_transaction() => doc.transact(options.origin(), f),
        _ => f(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tandem_shared::SharedMap;

    #[test]
    fn test_builder() {
        let options = BindOptions::builder().transaction_origin("local").build();
        assert_eq!(options.origin(), Some(Origin::from("local")));
        assert_eq!(BindOptions::default().origin(), None);
    }

    #[test]
    fn test_factory_runs_once_per_transaction() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let options = BindOptions::builder()
            .origin_factory(move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                Origin::new(format!("txn-{}", n))
            })
            .build();

        let doc = Doc::with_client_id(1);
        let map = doc.get_map("root");
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = doc.on_update(move |_, origin| sink.lock().push(origin.cloned()));

        with_transaction(Some(&doc), &options, || {
            map.set("a", 1).unwrap();
            with_transaction(Some(&doc), &options, || map.set("b", 2).unwrap());
        });
        with_transaction(Some(&doc), &options, || map.set("c", 3).unwrap());

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            *seen.lock(),
            vec![Some(Origin::from("txn-0")), Some(Origin::from("txn-1"))]
        );
    }

    #[test]
    fn test_detached_runs_directly() {
        let options = BindOptions::builder().transaction_origin("x").build();
        let map = SharedMap::new();
        with_transaction(map.doc().as_ref(), &options, || map.set("k", true).unwrap());
        assert_eq!(map.to_json(), serde_json::json!({"k": true}));
    }
}
