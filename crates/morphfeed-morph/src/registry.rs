//! Rule registry and the mutation cycle driver.
//!
//! [`MorphRegistry`] holds every active [`MorphRule`] keyed by id. It is an
//! explicit object owned by whoever configures the system (typically shared
//! as `Arc<MorphRegistry>` between the rule binder and the feed timers) and
//! is cleared with [`MorphRegistry::reset_all`] on reconfiguration.
//!
//! # Cycle
//!
//! [`MorphRegistry::cycle`] runs one pass over a tree in three phases:
//!
//! 1. **Plan** -- resolve every rule's path and draw one independent sample
//!    per matched node. Triggered nodes are recorded by location.
//! 2. **Prepare** -- await every triggered effect's generator work
//!    concurrently. Nothing touches the tree in this phase.
//! 3. **Apply** -- write the prepared edits in place, deepest location
//!    first, so an insert or delete never shifts the index of an edit that
//!    is still waiting to be applied.
//!
//! The call returns only after every effect has settled. A failing effect is
//! logged and counted in the [`CycleReport`]; it never stops the others. A
//! panicking generator counts as a failed effect and does not unwind into
//! the caller.

use std::any::Any;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures::FutureExt as _;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::MorphError;
use crate::rule::MorphRule;

/// Counters describing one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Rules evaluated.
    pub rules: usize,
    /// Nodes matched across all rules.
    pub matched: usize,
    /// Matched nodes whose sample fell below the rule's threshold.
    pub triggered: usize,
    /// Edits that changed the tree.
    pub applied: usize,
    /// Effects whose generator failed.
    pub failed: usize,
}

/// Registry of active morph rules, keyed by id.
#[derive(Debug, Default)]
pub struct MorphRegistry {
    rules: RwLock<HashMap<String, Arc<MorphRule>>>,
}

impl MorphRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `rule`, replacing any rule already registered under its id.
    ///
    /// Returns the replaced rule, if there was one.
    pub fn register(&self, rule: MorphRule) -> Option<Arc<MorphRule>> {
        let id = rule.id().to_owned();
        let replaced = self.write().insert(id.clone(), Arc::new(rule));
        debug!(rule = %id, replaced = replaced.is_some(), "morph rule registered");
        replaced
    }

    /// Whether a rule is registered under `id`.
    pub fn has_rule(&self, id: &str) -> bool {
        self.read().contains_key(id)
    }

    /// The rule registered under `id`.
    pub fn get(&self, id: &str) -> Option<Arc<MorphRule>> {
        self.read().get(id).cloned()
    }

    /// Number of registered rules.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether no rules are registered.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Registered rule ids, sorted.
    pub fn rule_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.read().keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    /// Remove every rule.
    pub fn reset_all(&self) {
        let mut rules = self.write();
        let cleared = rules.len();
        rules.clear();
        info!(cleared, "morph registry reset");
    }

    /// Run one mutation cycle over `tree` with a freshly seeded RNG.
    pub async fn cycle(&self, tree: &mut Value) -> CycleReport {
        let mut rng = StdRng::from_rng(&mut rand::rng());
        self.cycle_with(tree, &mut rng).await
    }

    /// Run one mutation cycle over `tree`, drawing every sample from `rng`.
    pub async fn cycle_with<R: Rng + Send>(&self, tree: &mut Value, rng: &mut R) -> CycleReport {
        let rules = self.snapshot();
        let mut report = CycleReport {
            rules: rules.len(),
            ..CycleReport::default()
        };

        // Plan.
        let mut planned = Vec::new();
        for rule in &rules {
            for found in rule.path().select(tree) {
                report.matched = report.matched.saturating_add(1);
                if !rule.triggered(rng) {
                    continue;
                }
                report.triggered = report.triggered.saturating_add(1);
                if let Some(pending) = rule.plan(found.node) {
                    planned.push((Arc::clone(rule), found.location, pending));
                }
            }
        }

        // Prepare.
        let prepared = futures::future::join_all(planned.into_iter().map(
            |(rule, location, pending)| async move {
                let outcome = AssertUnwindSafe(rule.prepare(pending))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|payload| {
                        Err(MorphError::Panicked {
                            message: panic_message(payload.as_ref()),
                        })
                    });
                (rule, location, outcome)
            },
        ))
        .await;

        let mut edits = Vec::with_capacity(prepared.len());
        for (rule, location, outcome) in prepared {
            match outcome {
                Ok(edit) => edits.push((rule, location, edit)),
                Err(error) => {
                    report.failed = report.failed.saturating_add(1);
                    warn!(rule = rule.id(), %location, %error, "morph effect failed");
                }
            }
        }

        // Apply. The stable sort keeps rule order within one depth.
        edits.sort_by_key(|(_, location, _)| Reverse(location.depth()));
        for (rule, location, edit) in edits {
            let Some(node) = location.get_mut(tree) else {
                continue;
            };
            if rule.apply(edit, node, rng) {
                report.applied = report.applied.saturating_add(1);
            }
        }

        debug!(
            rules = report.rules,
            matched = report.matched,
            triggered = report.triggered,
            applied = report.applied,
            failed = report.failed,
            "morph cycle complete"
        );
        report
    }

    /// Active rules ordered by id, so a seeded RNG replays identically.
    fn snapshot(&self) -> Vec<Arc<MorphRule>> {
        let mut rules: Vec<Arc<MorphRule>> = self.read().values().cloned().collect();
        rules.sort_by(|a, b| a.id().cmp(b.id()));
        rules
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<MorphRule>>> {
        self.rules.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<MorphRule>>> {
        self.rules.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|msg| (*msg).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| String::from("non-string panic payload"))
}
