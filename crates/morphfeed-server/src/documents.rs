//! In-memory seed documents served as feeds.
//!
//! [`DocumentStore`] is the host's [`QueryExecutor`]: a feed's spec is the
//! name of a document, and executing it returns a fresh copy of that
//! document. List-insert rules re-execute the same spec to obtain donor
//! trees, so a document is both a feed's seed and its supply of new list
//! elements.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use futures::FutureExt as _;
use futures::future::BoxFuture;
use morphfeed_feed::{ExecuteError, QueryExecutor};
use serde_json::Value;
use tracing::info;

/// Named seed documents, replaceable at runtime.
#[derive(Debug, Default)]
pub struct DocumentStore {
    documents: RwLock<BTreeMap<String, Value>>,
}

impl DocumentStore {
    /// Create a store holding `documents`.
    pub const fn new(documents: BTreeMap<String, Value>) -> Self {
        Self {
            documents: RwLock::new(documents),
        }
    }

    /// Whether a document named `name` exists.
    pub fn contains(&self, name: &str) -> bool {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Document names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Swap in a new document set. Returns how many documents it holds.
    pub fn replace(&self, documents: BTreeMap<String, Value>) -> usize {
        let count = documents.len();
        *self.documents.write().unwrap_or_else(PoisonError::into_inner) = documents;
        info!(documents = count, "seed documents replaced");
        count
    }

    fn lookup(&self, name: &str) -> Result<Value, ExecuteError> {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| ExecuteError::UnknownQuery {
                spec: name.to_owned(),
            })
    }
}

impl QueryExecutor for DocumentStore {
    fn execute<'a>(&'a self, spec: &'a str) -> BoxFuture<'a, Result<Value, ExecuteError>> {
        futures::future::ready(self.lookup(spec)).boxed()
    }
}
