//! Error types for the HTTP surface.
//!
//! [`ApiError`] converts into an Axum response carrying a JSON body of the
//! form `{"error": "...", "status": 404}`. [`JoinError`] ends a `WebSocket`
//! connection before its first frame.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use morphfeed_feed::FeedError;
use morphfeed_morph::MorphError;

use crate::config::ConfigError;

/// Errors that keep a connection from joining its feed.
#[derive(Debug, thiserror::Error)]
pub enum JoinError {
    /// A configured rule could not be bound.
    #[error("failed to bind rules: {0}")]
    Bind(#[from] MorphError),

    /// The feed could not be started or was stopped while joining.
    #[error(transparent)]
    Feed(#[from] FeedError),
}

/// Errors returned by HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The requested feed or document does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Reloading the configuration failed.
    #[error("reload failed: {0}")]
    Reload(#[from] ConfigError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Reload(_) => StatusCode::UNPROCESSABLE_ENTITY,
        };

        let body = serde_json::json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}
