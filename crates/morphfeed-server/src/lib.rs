//! `WebSocket` host for morphing data feeds.
//!
//! Serves every configured seed document as a feed at
//! `GET {pathname}/{feed}`. Joining a feed binds the configured rules,
//! starts (or shares) the feed's timer, and streams one JSON snapshot per
//! period for as long as the socket stays open.
//!
//! # Modules
//!
//! - [`config`] -- `morphfeed.yaml` loading, env overrides, validation.
//! - [`documents`] -- [`DocumentStore`], the seed-document query executor.
//! - [`binding`] -- [`RuleBinder`], config rules to registered morph rules.
//! - [`fake`] -- value generators for scalar rules.
//! - [`state`] -- [`AppState`] and configuration reload.
//! - [`router`], [`ws`], [`handlers`], [`error`] -- the HTTP surface.
//! - [`server`] -- listener lifecycle.

pub mod binding;
pub mod config;
pub mod documents;
pub mod error;
pub mod fake;
pub mod handlers;
pub mod router;
pub mod server;
pub mod state;
pub mod ws;

pub use binding::RuleBinder;
pub use config::{ConfigError, MorphfeedConfig};
pub use documents::DocumentStore;
pub use error::JoinError;
pub use router::build_router;
pub use server::{ServerError, start_server};
pub use state::{AppState, Joined, ReloadSummary};
