//! Turns configured rule bindings into registered morph rules.
//!
//! Binding happens when a feed is joined, before its seed is generated, so
//! every rule is in place before the feed's first cycle. Scalar bindings
//! are registered on every join under `"{path}.{field}"`, replacing the
//! previous instance. List bindings register `add:{path}` and `del:{path}`
//! only when no rule with that id exists yet: the first feed to reach a
//! list path becomes that path's donor source.

use std::sync::{Arc, PoisonError, RwLock};

use morphfeed_feed::{QueryExecutor, donor_from_executor};
use morphfeed_morph::{MorphError, MorphRegistry, MorphRule};
use tracing::debug;

use crate::config::{ListBinding, RuleBinding, ScalarBinding};
use crate::fake::regenerator_for;

/// Registers the configured rules into a [`MorphRegistry`].
pub struct RuleBinder {
    registry: Arc<MorphRegistry>,
    executor: Arc<dyn QueryExecutor>,
    bindings: RwLock<Vec<RuleBinding>>,
    max_donor_attempts: u32,
}

impl RuleBinder {
    /// Create a binder for `bindings`. Donor trees for list inserts come
    /// from `executor`; each insertion may generate at most
    /// `max_donor_attempts` of them (zero for no limit).
    pub const fn new(
        registry: Arc<MorphRegistry>,
        executor: Arc<dyn QueryExecutor>,
        bindings: Vec<RuleBinding>,
        max_donor_attempts: u32,
    ) -> Self {
        Self {
            registry,
            executor,
            bindings: RwLock::new(bindings),
            max_donor_attempts,
        }
    }

    /// The registry rules are bound into.
    pub const fn registry(&self) -> &Arc<MorphRegistry> {
        &self.registry
    }

    /// Swap in a new binding set. Already registered rules are untouched;
    /// reset the registry to drop them.
    pub fn replace(&self, bindings: Vec<RuleBinding>) -> usize {
        let count = bindings.len();
        *self.bindings.write().unwrap_or_else(PoisonError::into_inner) = bindings;
        count
    }

    /// Number of configured bindings.
    pub fn len(&self) -> usize {
        self.bindings.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether no bindings are configured.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register every binding on behalf of `feed`, whose spec doubles as
    /// the donor source of newly created list rules.
    ///
    /// Returns the number of rules registered.
    ///
    /// # Errors
    ///
    /// Returns the [`MorphError`] of the first binding that cannot be
    /// turned into a rule. Bindings before it stay registered.
    pub fn bind_feed(&self, feed: &str) -> Result<usize, MorphError> {
        let bindings = self
            .bindings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut registered = 0_usize;
        for binding in &bindings {
            registered = registered.saturating_add(match binding {
                RuleBinding::Scalar(scalar) => self.bind_scalar(scalar)?,
                RuleBinding::List(list) => self.bind_list(list, feed)?,
            });
        }
        debug!(feed, registered, "rules bound");
        Ok(registered)
    }

    fn bind_scalar(&self, scalar: &ScalarBinding) -> Result<usize, MorphError> {
        if scalar.probability <= 0.0 {
            return Ok(0);
        }
        let rule = MorphRule::scalar(
            format!("{}.{}", scalar.path, scalar.field),
            scalar.probability,
            &scalar.path,
            scalar.field.clone(),
            regenerator_for(&scalar.fake),
        )?;
        self.registry.register(rule);
        Ok(1)
    }

    fn bind_list(&self, list: &ListBinding, feed: &str) -> Result<usize, MorphError> {
        let mut registered = 0_usize;

        let add_id = format!("add:{}", list.path);
        if !self.registry.has_rule(&add_id) {
            let donor = donor_from_executor(Arc::clone(&self.executor), feed);
            let rule = MorphRule::list_insert(add_id, list.list.p_add, &list.path, list.list.max, donor)?
                .with_max_donor_attempts(Some(self.max_donor_attempts));
            self.registry.register(rule);
            registered = registered.saturating_add(1);
        }

        let del_id = format!("del:{}", list.path);
        if !self.registry.has_rule(&del_id) {
            let rule = MorphRule::list_delete(del_id, list.list.p_delete, &list.path, list.list.min)?;
            self.registry.register(rule);
            registered = registered.saturating_add(1);
        }

        Ok(registered)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use morphfeed_morph::MorphKind;
    use serde_json::json;

    use super::*;
    use crate::config::MorphfeedConfig;
    use crate::documents::DocumentStore;

    fn binder(yaml: &str) -> RuleBinder {
        let config = MorphfeedConfig::parse_with(yaml, |_| None).unwrap();
        let store = Arc::new(DocumentStore::new(config.documents));
        RuleBinder::new(Arc::new(MorphRegistry::new()), store, config.rules, 8)
    }

    const RULES: &str = r#"
documents:
  ticker: { prices: [ { symbol: "ABC", price: 10 } ] }
  other: { prices: [] }
rules:
  - path: "$.prices[*]"
    field: price
    probability: 0.5
    fake: { float: { min: 1.0, max: 100.0 } }
  - path: "$.prices[*]"
    field: symbol
    fake: uuid
  - path: "$.prices"
    list: { min: 1, max: 5, p_add: 0.2, p_delete: 0.1 }
"#;

    #[test]
    fn binds_scalar_and_list_rules() {
        let binder = binder(RULES);
        assert_eq!(binder.bind_feed("ticker").unwrap(), 3);

        let registry = binder.registry();
        assert_eq!(
            registry.rule_ids(),
            vec!["$.prices[*].price", "add:$.prices", "del:$.prices"]
        );

        let add = registry.get("add:$.prices").unwrap();
        assert_eq!(add.path().as_str(), "$.prices");
        let MorphKind::ListInsert(insert) = add.kind() else {
            panic!("expected a list insert");
        };
        assert_eq!(insert.max(), 5);

        let del = registry.get("del:$.prices").unwrap();
        assert!(matches!(del.kind(), MorphKind::ListDelete { min: 1 }));
        assert!((del.threshold() - 0.1).abs() < f64::EPSILON);

        let price = registry.get("$.prices[*].price").unwrap();
        assert_eq!(price.path().as_str(), "$.prices[*]");
    }

    #[test]
    fn zero_probability_scalars_bind_nothing() {
        let binder = binder(RULES);
        binder.bind_feed("ticker").unwrap();
        assert!(!binder.registry().has_rule("$.prices[*].symbol"));
    }

    #[test]
    fn list_rules_keep_their_first_donor() {
        let binder = binder(RULES);
        binder.bind_feed("ticker").unwrap();
        let first = binder.registry().get("add:$.prices").unwrap();

        // A second feed only refreshes the scalar rule.
        assert_eq!(binder.bind_feed("other").unwrap(), 1);
        let second = binder.registry().get("add:$.prices").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn donor_executes_the_joining_feed() {
        let yaml = r"
documents:
  ticker: { prices: [7] }
rules:
  - path: $.prices
    list: { max: 3, p_add: 1.0 }
";
        let binder = binder(yaml);
        binder.bind_feed("ticker").unwrap();

        let mut tree = json!({"prices": []});
        binder.registry().cycle(&mut tree).await;
        assert_eq!(tree, json!({"prices": [7]}));
    }

    #[test]
    fn replace_swaps_bindings() {
        let binder = binder(RULES);
        assert_eq!(binder.len(), 3);
        assert_eq!(binder.replace(Vec::new()), 0);
        assert!(binder.is_empty());
        assert_eq!(binder.bind_feed("ticker").unwrap(), 0);
    }
}
