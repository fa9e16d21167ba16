//! Error types for the subscription multiplexer.

/// Errors reported by a [`QueryExecutor`](crate::executor::QueryExecutor).
#[derive(Debug, thiserror::Error)]
pub enum ExecuteError {
    /// The executor has nothing registered under the requested spec.
    #[error("unknown query: {spec}")]
    UnknownQuery {
        /// The spec that could not be resolved.
        spec: String,
    },

    /// Executing the query failed.
    #[error("query execution failed: {message}")]
    Failed {
        /// Description of the failure.
        message: String,
    },
}

/// Errors that can occur in [`FeedHub`](crate::hub::FeedHub) operations.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// Seed generation for a new feed failed. No feed state was created.
    #[error("seed generation for feed {feed} failed: {source}")]
    Seed {
        /// The feed that could not be started.
        feed: String,
        /// The underlying executor error.
        source: ExecuteError,
    },

    /// The feed has no active subscribers; join it first.
    #[error("feed {feed} is not active")]
    FeedNotActive {
        /// The requested feed.
        feed: String,
    },

    /// The cycle period is not a positive, finite number of seconds.
    #[error("invalid cycle period: {secs} seconds")]
    InvalidPeriod {
        /// The rejected period.
        secs: f64,
    },
}
