//! Configuration loading and typed config structures for the morphfeed host.
//!
//! The configuration lives in `morphfeed.yaml` (or the path given on the
//! command line / in `MORPHFEED_CONFIG`). It carries the listener settings,
//! feed timing, logging, the seed documents served as feeds, and the rule
//! bindings that decide which parts of those documents keep changing.
//!
//! Values are applied in this order: built-in defaults, the YAML file,
//! then `MORPHFEED_HOST` / `MORPHFEED_PORT` / `MORPHFEED_PERIOD_SECS`.

use std::collections::BTreeMap;
use std::path::Path;

use morphfeed_feed::{FeedConfig, FeedError};
use morphfeed_morph::{DEFAULT_MAX_DONOR_ATTEMPTS, PathExpr};
use serde::Deserialize;
use serde_json::Value;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// The configuration parsed but holds an unusable value.
    #[error("invalid configuration: {message}")]
    Invalid {
        /// Description of the offending value.
        message: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

impl ConfigError {
    fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}

/// Top-level configuration.
///
/// Mirrors the structure of `morphfeed.yaml`. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MorphfeedConfig {
    /// Listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Feed timing and delivery settings.
    #[serde(default)]
    pub feeds: FeedsConfig,

    /// Log level and format.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Seed documents, keyed by feed name. Joining a feed executes the
    /// document of the same name.
    #[serde(default)]
    pub documents: BTreeMap<String, Value>,

    /// Rule bindings applied to every feed.
    #[serde(default)]
    pub rules: Vec<RuleBinding>,
}

impl MorphfeedConfig {
    /// Load configuration from a YAML file, apply environment overrides,
    /// and validate the result.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string, then apply environment
    /// overrides and validate.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] or [`ConfigError::Invalid`].
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        Self::parse_with(yaml, |key| std::env::var(key).ok())
    }

    /// Like [`parse`](Self::parse), reading overrides through `lookup`
    /// instead of the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] or [`ConfigError::Invalid`].
    pub fn parse_with<F>(yaml: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.apply_overrides(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `MORPHFEED_*` overrides obtained through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if an override does not parse.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("MORPHFEED_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("MORPHFEED_PORT") {
            self.server.port = port
                .trim()
                .parse()
                .map_err(|e| ConfigError::invalid(format!("MORPHFEED_PORT `{port}`: {e}")))?;
        }
        if let Some(period) = lookup("MORPHFEED_PERIOD_SECS") {
            self.feeds.period_secs = period.trim().parse().map_err(|e| {
                ConfigError::invalid(format!("MORPHFEED_PERIOD_SECS `{period}`: {e}"))
            })?;
        }
        Ok(())
    }

    /// Check every value that serde alone cannot constrain.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.feed_config()
            .map_err(|e| ConfigError::invalid(e.to_string()))?;
        if self.feeds.broadcast_capacity == 0 {
            return Err(ConfigError::invalid("feeds.broadcast_capacity must be at least 1"));
        }
        if !self.server.pathname.starts_with('/') {
            return Err(ConfigError::invalid(format!(
                "server.pathname `{}` must start with `/`",
                self.server.pathname
            )));
        }
        for (index, rule) in self.rules.iter().enumerate() {
            rule.validate()
                .map_err(|message| ConfigError::invalid(format!("rules[{index}]: {message}")))?;
        }
        Ok(())
    }

    /// The multiplexer settings described by the `feeds` section.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::InvalidPeriod`] if `period_secs` is not a
    /// positive, finite number.
    pub fn feed_config(&self) -> Result<FeedConfig, FeedError> {
        Ok(FeedConfig::from_period_secs(self.feeds.period_secs)?
            .with_broadcast_capacity(self.feeds.broadcast_capacity))
    }
}

/// Listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// TCP port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Prefix under which feeds are served: `GET {pathname}/{feed}`.
    #[serde(default = "default_pathname")]
    pub pathname: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            pathname: default_pathname(),
        }
    }
}

fn default_host() -> String {
    String::from("127.0.0.1")
}

const fn default_port() -> u16 {
    4000
}

fn default_pathname() -> String {
    String::from("/feeds")
}

/// Feed timing and delivery settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FeedsConfig {
    /// Seconds between mutation cycles.
    #[serde(default = "default_period_secs")]
    pub period_secs: f64,

    /// Snapshots buffered per feed before slow subscribers skip ahead.
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,

    /// Donor trees a list-insert rule may generate per insertion before
    /// giving up. Zero means no limit.
    #[serde(default = "default_max_donor_attempts")]
    pub max_donor_attempts: u32,
}

impl Default for FeedsConfig {
    fn default() -> Self {
        Self {
            period_secs: default_period_secs(),
            broadcast_capacity: default_broadcast_capacity(),
            max_donor_attempts: default_max_donor_attempts(),
        }
    }
}

const fn default_period_secs() -> f64 {
    morphfeed_feed::config::DEFAULT_PERIOD_SECS
}

const fn default_broadcast_capacity() -> usize {
    morphfeed_feed::config::DEFAULT_BROADCAST_CAPACITY
}

const fn default_max_donor_attempts() -> u32 {
    DEFAULT_MAX_DONOR_ATTEMPTS
}

/// Log output settings. `RUST_LOG` takes precedence over `level`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, e.g. `info` or `morphfeed_feed=debug`.
    #[serde(default = "default_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Log every snapshot a feed publishes.
    #[serde(default)]
    pub echo: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
            echo: false,
        }
    }
}

fn default_level() -> String {
    String::from("info")
}

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// One rule declaration. Which variant applies is decided by the keys
/// present: `field` + `fake` for a scalar, `list` for a list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RuleBinding {
    /// Regenerate one property of every object at `path`.
    Scalar(ScalarBinding),
    /// Grow and shrink every array at `path`.
    List(ListBinding),
}

impl RuleBinding {
    /// The binding's path expression.
    pub fn path(&self) -> &str {
        match self {
            Self::Scalar(scalar) => &scalar.path,
            Self::List(list) => &list.path,
        }
    }

    fn validate(&self) -> Result<(), String> {
        PathExpr::parse(self.path()).map_err(|e| e.to_string())?;
        match self {
            Self::Scalar(scalar) => {
                check_probability("probability", scalar.probability)?;
                scalar.fake.validate()
            }
            Self::List(list) => {
                let bounds = &list.list;
                check_probability("p_add", bounds.p_add)?;
                check_probability("p_delete", bounds.p_delete)?;
                if bounds.min > bounds.max {
                    return Err(format!(
                        "list.min {} is greater than list.max {}",
                        bounds.min, bounds.max
                    ));
                }
                Ok(())
            }
        }
    }
}

fn check_probability(name: &str, value: f64) -> Result<(), String> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(format!("{name} {value} is outside [0, 1]"))
    }
}

/// A scalar rule: `field` of every object at `path` is regenerated by
/// `fake` with the given probability.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScalarBinding {
    /// Path to the enclosing objects.
    pub path: String,
    /// Property to regenerate.
    pub field: String,
    /// Per-node trigger probability. Zero (the default) binds nothing.
    #[serde(default)]
    pub probability: f64,
    /// Value generator.
    pub fake: FakeSpec,
}

/// A list rule pair: `add:{path}` and `del:{path}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListBinding {
    /// Path to the arrays.
    pub path: String,
    /// Size bounds and probabilities.
    pub list: ListBounds,
}

/// Size bounds and per-cycle probabilities of a list binding.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListBounds {
    /// Deletion never shrinks a list below this length.
    #[serde(default)]
    pub min: usize,
    /// Insertion never grows a list beyond this length.
    pub max: usize,
    /// Insertion probability.
    #[serde(default)]
    pub p_add: f64,
    /// Deletion probability.
    #[serde(default)]
    pub p_delete: f64,
}

/// Value generators for scalar rules.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FakeSpec {
    /// Uniform integer in `min..=max`.
    Integer {
        /// Lower bound, inclusive.
        min: i64,
        /// Upper bound, inclusive.
        max: i64,
    },
    /// Uniform float in `min..max`.
    Float {
        /// Lower bound, inclusive.
        min: f64,
        /// Upper bound, exclusive.
        max: f64,
    },
    /// One of the listed values.
    Choice {
        /// Candidates.
        values: Vec<Value>,
    },
    /// A random v4 UUID string.
    Uuid,
    /// The current time as an RFC 3339 string.
    Timestamp,
    /// The previous value plus `step`.
    Increment {
        /// Amount added per trigger.
        #[serde(default = "default_step")]
        step: i64,
    },
}

const fn default_step() -> i64 {
    1
}

impl FakeSpec {
    fn validate(&self) -> Result<(), String> {
        match self {
            Self::Integer { min, max } if min > max => {
                Err(format!("fake.integer min {min} is greater than max {max}"))
            }
            Self::Float { min, max } if !(min.is_finite() && max.is_finite() && min <= max) => {
                Err(format!("fake.float range {min}..{max} is not a finite ascending range"))
            }
            Self::Choice { values } if values.is_empty() => {
                Err(String::from("fake.choice needs at least one value"))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic, clippy::indexing_slicing)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r#"
server:
  host: "0.0.0.0"
  port: 5000
  pathname: "/subscriptions"
feeds:
  period_secs: 0.25
  broadcast_capacity: 8
  max_donor_attempts: 4
logging:
  level: debug
  format: json
  echo: true
documents:
  ticker:
    prices:
      - { symbol: "ABC", price: 10 }
rules:
  - path: "$.prices[*]"
    field: price
    probability: 0.5
    fake: { float: { min: 1.0, max: 100.0 } }
  - path: "$.prices[*]"
    field: id
    probability: 0.1
    fake: uuid
  - path: "$.prices"
    list: { min: 1, max: 5, p_add: 0.2, p_delete: 0.1 }
"#;
        let config = MorphfeedConfig::parse_with(yaml, no_env).unwrap();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.server.pathname, "/subscriptions");
        assert!((config.feeds.period_secs - 0.25).abs() < f64::EPSILON);
        assert_eq!(config.feeds.broadcast_capacity, 8);
        assert_eq!(config.feeds.max_donor_attempts, 4);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(config.logging.echo);
        assert_eq!(
            config.documents["ticker"],
            json!({"prices": [{"symbol": "ABC", "price": 10}]})
        );

        assert_eq!(config.rules.len(), 3);
        assert!(matches!(
            &config.rules[0],
            RuleBinding::Scalar(ScalarBinding { fake: FakeSpec::Float { .. }, .. })
        ));
        assert!(matches!(
            &config.rules[1],
            RuleBinding::Scalar(ScalarBinding { fake: FakeSpec::Uuid, .. })
        ));
        let RuleBinding::List(list) = &config.rules[2] else {
            panic!("expected a list binding");
        };
        assert_eq!(list.list.min, 1);
        assert_eq!(list.list.max, 5);
    }

    #[test]
    fn parse_empty_yaml_uses_defaults() {
        let config = MorphfeedConfig::parse_with("", no_env).unwrap();
        assert_eq!(config, MorphfeedConfig::default());
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.feeds.max_donor_attempts, DEFAULT_MAX_DONOR_ATTEMPTS);
    }

    #[test]
    fn env_overrides_win_over_yaml() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("MORPHFEED_HOST", "10.0.0.1"),
            ("MORPHFEED_PORT", "9000"),
            ("MORPHFEED_PERIOD_SECS", "2.5"),
        ]);
        let yaml = "server:\n  port: 5000\n";
        let config =
            MorphfeedConfig::parse_with(yaml, |key| env.get(key).map(|v| (*v).to_owned())).unwrap();

        assert_eq!(config.server.host, "10.0.0.1");
        assert_eq!(config.server.port, 9000);
        assert!((config.feeds.period_secs - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn bad_port_override_is_rejected() {
        let result = MorphfeedConfig::parse_with("", |key| {
            (key == "MORPHFEED_PORT").then(|| String::from("eighty"))
        });
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn non_positive_period_is_rejected() {
        for period in ["0", "-1.0", ".nan"] {
            let yaml = format!("feeds:\n  period_secs: {period}\n");
            let result = MorphfeedConfig::parse_with(&yaml, no_env);
            assert!(matches!(result, Err(ConfigError::Invalid { .. })), "{period}");
        }
    }

    #[test]
    fn rule_errors_name_the_rule() {
        let yaml = r"
rules:
  - path: $.a
    list: { min: 4, max: 2 }
";
        let err = MorphfeedConfig::parse_with(yaml, no_env).unwrap_err();
        assert!(err.to_string().contains("rules[0]"), "{err}");
    }

    #[test]
    fn malformed_paths_are_rejected() {
        let yaml = r"
rules:
  - path: prices
    field: price
    probability: 0.5
    fake: uuid
";
        assert!(matches!(
            MorphfeedConfig::parse_with(yaml, no_env),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn out_of_range_probability_is_rejected() {
        let yaml = r"
rules:
  - path: $.a
    list: { max: 3, p_add: 1.5 }
";
        assert!(matches!(
            MorphfeedConfig::parse_with(yaml, no_env),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn empty_choice_is_rejected() {
        let yaml = r"
rules:
  - path: $
    field: state
    probability: 0.5
    fake: { choice: { values: [] } }
";
        assert!(matches!(
            MorphfeedConfig::parse_with(yaml, no_env),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn increment_step_defaults_to_one() {
        let yaml = r"
rules:
  - path: $
    field: n
    probability: 1.0
    fake: { increment: {} }
";
        let config = MorphfeedConfig::parse_with(yaml, no_env).unwrap();
        let RuleBinding::Scalar(scalar) = &config.rules[0] else {
            panic!("expected a scalar binding");
        };
        assert_eq!(scalar.fake, FakeSpec::Increment { step: 1 });
    }

    #[test]
    fn pathname_must_be_absolute() {
        let yaml = "server:\n  pathname: feeds\n";
        assert!(matches!(
            MorphfeedConfig::parse_with(yaml, no_env),
            Err(ConfigError::Invalid { .. })
        ));
    }
}
