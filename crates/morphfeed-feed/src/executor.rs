//! The query-execution collaborator.
//!
//! The multiplexer never builds data itself. It hands a feed's seed spec
//! to a [`QueryExecutor`] the first time the feed is joined, and list
//! insertion rules use the same executor (through a
//! [`DonorSource`](morphfeed_morph::DonorSource)) to produce donor trees.
//! Implementations must tolerate repeated and concurrent calls.

use std::sync::Arc;

use futures::FutureExt as _;
use futures::future::BoxFuture;
use morphfeed_morph::{DonorSource, MorphError, donor_source};
use serde_json::Value;

use crate::error::ExecuteError;

/// Produces a complete data tree for a spec.
pub trait QueryExecutor: Send + Sync {
    /// Execute `spec` and return the resulting tree.
    fn execute<'a>(&'a self, spec: &'a str) -> BoxFuture<'a, Result<Value, ExecuteError>>;
}

impl<F> QueryExecutor for F
where
    F: Fn(&str) -> Result<Value, ExecuteError> + Send + Sync,
{
    fn execute<'a>(&'a self, spec: &'a str) -> BoxFuture<'a, Result<Value, ExecuteError>> {
        futures::future::ready(self(spec)).boxed()
    }
}

/// A [`DonorSource`] that re-executes `spec` on every call.
///
/// This is how list-insert rules get fresh elements: the donor tree has the
/// same shape as the feed's own data, so the homologous list sits at the
/// rule's own path.
pub fn donor_from_executor(executor: Arc<dyn QueryExecutor>, spec: impl Into<String>) -> DonorSource {
    let spec: Arc<str> = Arc::from(spec.into());
    donor_source(move || {
        let executor = Arc::clone(&executor);
        let spec = Arc::clone(&spec);
        async move {
            executor
                .execute(&spec)
                .await
                .map_err(|e| MorphError::generator(e.to_string()))
        }
    })
}
