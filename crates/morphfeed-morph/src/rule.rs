//! Morph rules: named, probability-gated, path-addressed mutations.
//!
//! A [`MorphRule`] pairs a [`PathExpr`] with a trigger probability and one
//! of three effects ([`MorphKind`]):
//!
//! - **Scalar** -- regenerate one field of every matched mapping.
//! - **List insert** -- grow every matched sequence by one element
//!   harvested from a freshly generated donor tree, up to a maximum size.
//! - **List delete** -- shrink every matched sequence by one random
//!   element, down to a minimum size.
//!
//! Rules do not touch the tree while they wait on generators. The cycle
//! driver asks a rule to `plan` against a matched node, awaits `prepare`
//! concurrently with every other triggered effect, and only then writes the
//! result with `apply`.

use std::fmt;
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;

use futures::FutureExt as _;
use futures::future::BoxFuture;
use rand::Rng;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::MorphError;
use crate::path::PathExpr;

/// Donor trees generated per harvest before a list insert gives up.
pub const DEFAULT_MAX_DONOR_ATTEMPTS: u32 = 32;

/// Future returned by value generators and donor sources.
pub type GenerateFuture = BoxFuture<'static, Result<Value, MorphError>>;

/// Produces the replacement for a scalar field. Receives the current value
/// of the field, if there is one.
pub type Regenerator = Arc<dyn Fn(Option<Value>) -> GenerateFuture + Send + Sync>;

/// Produces a complete fresh tree from which list elements are harvested.
pub type DonorSource = Arc<dyn Fn() -> GenerateFuture + Send + Sync>;

/// Wrap an async closure as a [`Regenerator`].
pub fn regenerator<F, Fut>(f: F) -> Regenerator
where
    F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, MorphError>> + Send + 'static,
{
    Arc::new(move |previous| f(previous).boxed())
}

/// Wrap an async closure as a [`DonorSource`].
pub fn donor_source<F, Fut>(f: F) -> DonorSource
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, MorphError>> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

/// The effect a rule has on a matched node.
pub enum MorphKind {
    /// Replace `field` of the matched mapping with a regenerated value.
    Scalar {
        /// Key of the leaf inside the matched mapping.
        field: String,
        /// Generator for the replacement value.
        regenerate: Regenerator,
    },
    /// Insert one harvested element into the matched sequence.
    ListInsert(ListInsert),
    /// Remove one random element from the matched sequence.
    ListDelete {
        /// The sequence is never shrunk below this length.
        min: usize,
    },
}

impl fmt::Debug for MorphKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar { field, .. } => f
                .debug_struct("Scalar")
                .field("field", field)
                .finish_non_exhaustive(),
            Self::ListInsert(insert) => f
                .debug_struct("ListInsert")
                .field("max", &insert.max)
                .field("max_attempts", &insert.max_attempts)
                .finish_non_exhaustive(),
            Self::ListDelete { min } => f.debug_struct("ListDelete").field("min", min).finish(),
        }
    }
}

/// Parameters and donor cache of a list-insert rule.
pub struct ListInsert {
    max: usize,
    source: DonorSource,
    max_attempts: Option<NonZeroU32>,
    /// Last generated donor tree, drained across triggers until empty.
    donor: Mutex<Option<Value>>,
}

impl ListInsert {
    /// Maximum length the target sequence may grow to.
    pub const fn max(&self) -> usize {
        self.max
    }

    /// Donor generation bound per harvest, `None` when unbounded.
    pub const fn max_attempts(&self) -> Option<NonZeroU32> {
        self.max_attempts
    }
}

/// A named, probability-gated, path-addressed mutation.
#[derive(Debug)]
pub struct MorphRule {
    id: String,
    threshold: f64,
    path: PathExpr,
    kind: MorphKind,
}

impl MorphRule {
    /// Build a rule that regenerates `field` of every mapping matched by
    /// `path`.
    ///
    /// # Errors
    ///
    /// Returns [`MorphError`] if the path is malformed or the threshold is
    /// outside `[0, 1]`.
    pub fn scalar(
        id: impl Into<String>,
        threshold: f64,
        path: &str,
        field: impl Into<String>,
        regenerate: Regenerator,
    ) -> Result<Self, MorphError> {
        Self::new(
            id.into(),
            threshold,
            path,
            MorphKind::Scalar {
                field: field.into(),
                regenerate,
            },
        )
    }

    /// Build a rule that inserts harvested elements into every sequence
    /// matched by `path` while it is shorter than `max`.
    ///
    /// Donor trees come from `source`; elements are taken from the list at
    /// the same `path` inside each donor.
    ///
    /// # Errors
    ///
    /// Returns [`MorphError`] if the path is malformed or the threshold is
    /// outside `[0, 1]`.
    pub fn list_insert(
        id: impl Into<String>,
        threshold: f64,
        path: &str,
        max: usize,
        source: DonorSource,
    ) -> Result<Self, MorphError> {
        Self::new(
            id.into(),
            threshold,
            path,
            MorphKind::ListInsert(ListInsert {
                max,
                source,
                max_attempts: NonZeroU32::new(DEFAULT_MAX_DONOR_ATTEMPTS),
                donor: Mutex::new(None),
            }),
        )
    }

    /// Build a rule that removes a random element from every sequence
    /// matched by `path` while it is longer than `min`.
    ///
    /// # Errors
    ///
    /// Returns [`MorphError`] if the path is malformed or the threshold is
    /// outside `[0, 1]`.
    pub fn list_delete(
        id: impl Into<String>,
        threshold: f64,
        path: &str,
        min: usize,
    ) -> Result<Self, MorphError> {
        Self::new(id.into(), threshold, path, MorphKind::ListDelete { min })
    }

    fn new(id: String, threshold: f64, path: &str, kind: MorphKind) -> Result<Self, MorphError> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(MorphError::InvalidThreshold { rule: id, threshold });
        }
        let path = PathExpr::parse(path)?;
        Ok(Self {
            id,
            threshold,
            path,
            kind,
        })
    }

    /// Bound the number of donor trees a list insert generates per harvest.
    /// `None` or `Some(0)` removes the bound. No effect on other kinds.
    #[must_use]
    pub fn with_max_donor_attempts(mut self, attempts: Option<u32>) -> Self {
        if let MorphKind::ListInsert(insert) = &mut self.kind {
            insert.max_attempts = attempts.and_then(NonZeroU32::new);
        }
        self
    }

    /// Stable identifier; registering another rule under it replaces this one.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Probability that the rule fires for a given matched node.
    pub const fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Path selecting the nodes this rule applies to.
    pub const fn path(&self) -> &PathExpr {
        &self.path
    }

    /// The rule's effect.
    pub const fn kind(&self) -> &MorphKind {
        &self.kind
    }

    /// Draw one sample and decide whether the rule fires.
    pub fn triggered<R: Rng + ?Sized>(&self, rng: &mut R) -> bool {
        rng.random::<f64>() < self.threshold
    }

    /// Decide what firing on `node` would take, or `None` if the effect is
    /// inert for a node of this shape or size.
    pub(crate) fn plan(&self, node: &Value) -> Option<Pending> {
        match (&self.kind, node) {
            (MorphKind::Scalar { field, .. }, Value::Object(map)) => Some(Pending::Regenerate {
                previous: map.get(field).cloned(),
            }),
            (MorphKind::ListInsert(insert), Value::Array(list)) if list.len() < insert.max => {
                Some(Pending::Harvest)
            }
            (MorphKind::ListDelete { min }, Value::Array(list)) if list.len() > *min => {
                Some(Pending::Remove)
            }
            _ => None,
        }
    }

    /// Do the asynchronous part of a planned effect. Never touches the tree.
    pub(crate) async fn prepare(&self, pending: Pending) -> Result<Edit, MorphError> {
        match (pending, &self.kind) {
            (Pending::Regenerate { previous }, MorphKind::Scalar { regenerate, .. }) => {
                regenerate(previous).await.map(Edit::Set)
            }
            (Pending::Harvest, MorphKind::ListInsert(insert)) => {
                self.harvest(insert).await.map(Edit::Insert)
            }
            _ => Ok(Edit::Remove),
        }
    }

    /// Write a prepared edit into `node`. Size bounds are checked again
    /// here, so the list limits hold even when several edits land on the
    /// same sequence in one cycle. Returns whether the node changed.
    pub(crate) fn apply<R: Rng + ?Sized>(&self, edit: Edit, node: &mut Value, rng: &mut R) -> bool {
        match (edit, &self.kind, node) {
            (Edit::Set(value), MorphKind::Scalar { field, .. }, Value::Object(map)) => {
                map.insert(field.clone(), value);
                true
            }
            (Edit::Insert(element), MorphKind::ListInsert(insert), Value::Array(list))
                if list.len() < insert.max =>
            {
                let index = rng.random_range(0..=list.len());
                list.insert(index, element);
                true
            }
            (Edit::Remove, MorphKind::ListDelete { min }, Value::Array(list))
                if list.len() > *min =>
            {
                let index = rng.random_range(0..list.len());
                list.remove(index);
                true
            }
            _ => false,
        }
    }

    /// Take the next element from the cached donor tree, generating fresh
    /// donors while the homologous list is missing or empty.
    async fn harvest(&self, insert: &ListInsert) -> Result<Value, MorphError> {
        let mut donor = insert.donor.lock().await;
        let mut attempts: u32 = 0;

        loop {
            if let Some(tree) = donor.as_mut() {
                if let Some(element) = take_first(&self.path, tree) {
                    return Ok(element);
                }
                debug!(rule = %self.id, "donor tree drained, regenerating");
                *donor = None;
            }

            if let Some(limit) = insert.max_attempts {
                if attempts >= limit.get() {
                    return Err(MorphError::DonorExhausted {
                        rule: self.id.clone(),
                        attempts,
                    });
                }
            }
            attempts = attempts.saturating_add(1);
            *donor = Some((insert.source)().await?);
        }
    }
}

/// Pop the front of the first sequence `path` selects in `tree`.
fn take_first(path: &PathExpr, tree: &mut Value) -> Option<Value> {
    let list = path.select_mut(tree).into_iter().next()?.as_array_mut()?;
    if list.is_empty() {
        None
    } else {
        Some(list.remove(0))
    }
}

/// What a triggered effect needs before it can be applied.
#[derive(Debug)]
pub(crate) enum Pending {
    Regenerate { previous: Option<Value> },
    Harvest,
    Remove,
}

/// A prepared change, ready to be written into the tree.
#[derive(Debug)]
pub(crate) enum Edit {
    Set(Value),
    Insert(Value),
    Remove,
}
