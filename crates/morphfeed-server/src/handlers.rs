//! REST endpoint handlers.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/health` | Liveness plus the names of running feeds |
//! | `GET` | `/admin/feeds` | Every known feed with its subscriber count |
//! | `GET` | `/admin/feeds/{feed}` | Latest published tree of a running feed |
//! | `GET` | `/admin/rules` | Ids of the registered morph rules |
//! | `POST` | `/admin/reload` | Re-read the config file and restart from it |

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use serde::Serialize;
use serde_json::{Value, json};

use crate::error::ApiError;
use crate::state::{AppState, ReloadSummary};

/// One row of `GET /admin/feeds`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedSummary {
    /// Feed name (and seed document name).
    pub feed: String,
    /// Whether the feed is currently running.
    pub active: bool,
    /// Current reference count, zero when stopped.
    pub subscribers: usize,
}

/// `GET /health`
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "feeds": state.hub.active_feeds().await,
    }))
}

/// `GET /admin/feeds`
pub async fn list_feeds(State(state): State<Arc<AppState>>) -> Json<Vec<FeedSummary>> {
    let mut feeds = Vec::new();
    for feed in state.documents.names() {
        let subscribers = state.hub.ref_count(&feed).await;
        feeds.push(FeedSummary {
            active: subscribers > 0,
            subscribers,
            feed,
        });
    }
    Json(feeds)
}

/// `GET /admin/feeds/{feed}`
pub async fn get_feed(
    Path(feed): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, ApiError> {
    state
        .hub
        .snapshot(&feed)
        .await
        .map(|snapshot| Json(Value::clone(&snapshot)))
        .ok_or_else(|| ApiError::NotFound(format!("feed `{feed}` is not running")))
}

/// `GET /admin/rules`
pub async fn list_rules(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(state.hub.registry().rule_ids())
}

/// `POST /admin/reload`
pub async fn reload(State(state): State<Arc<AppState>>) -> Result<Json<ReloadSummary>, ApiError> {
    Ok(Json(state.reload().await?))
}
