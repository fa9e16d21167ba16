//! Path-addressed, probability-gated mutation of JSON data trees.
//!
//! This crate owns the morph engine that makes static data look "live":
//! a registry of named rules, each selecting nodes of a tree by path and
//! perturbing them with some probability on every cycle.
//!
//! # Modules
//!
//! - [`path`] -- Path expressions (`$.a[*].b`) and their resolution to
//!   located nodes.
//! - [`rule`] -- [`MorphRule`] and its three effects: scalar regeneration,
//!   bounded list insertion from donor trees, bounded list deletion.
//! - [`registry`] -- [`MorphRegistry`] and the cycle driver.
//! - [`error`] -- [`MorphError`].

pub mod error;
pub mod path;
pub mod registry;
pub mod rule;

pub use error::MorphError;
pub use path::{Location, Match, PathError, PathExpr, Segment, Step};
pub use registry::{CycleReport, MorphRegistry};
pub use rule::{
    DEFAULT_MAX_DONOR_ATTEMPTS, DonorSource, GenerateFuture, ListInsert, MorphKind, MorphRule,
    Regenerator, donor_source, regenerator,
};
