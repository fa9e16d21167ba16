//! Subscription multiplexer for morphing data feeds.
//!
//! A feed is a named stream of one data tree that a [`MorphRegistry`]
//! perturbs on a fixed period. Every subscriber of the feed shares the same
//! tree and the same timer; the tree is created on the first join and
//! discarded on the last leave.
//!
//! # Modules
//!
//! - [`hub`] -- [`FeedHub`], the reference-counted feed scheduler.
//! - [`channel`] -- [`FeedStream`], the per-subscriber delivery handle.
//! - [`executor`] -- [`QueryExecutor`], the seed/donor data collaborator.
//! - [`config`] -- [`FeedConfig`].
//! - [`error`] -- [`FeedError`] and [`ExecuteError`].
//!
//! [`MorphRegistry`]: morphfeed_morph::MorphRegistry

pub mod channel;
pub mod config;
pub mod error;
pub mod executor;
pub mod hub;

pub use channel::FeedStream;
pub use config::FeedConfig;
pub use error::{ExecuteError, FeedError};
pub use executor::{QueryExecutor, donor_from_executor};
pub use hub::{FeedHub, SubscriptionId};
