//! Shared application state for the morphfeed host.
//!
//! [`AppState`] wires the pieces together: one [`MorphRegistry`], the
//! [`DocumentStore`] that seeds feeds, the [`RuleBinder`] that fills the
//! registry, and the [`FeedHub`] that runs the feeds. It also owns the
//! join and reload paths, which a shared gate keeps apart: a reload waits
//! for in-flight joins and holds back new ones until the new documents and
//! rules are installed.

use std::path::PathBuf;
use std::sync::Arc;

use morphfeed_feed::{FeedError, FeedHub, FeedStream, QueryExecutor, SubscriptionId};
use morphfeed_morph::MorphRegistry;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::binding::RuleBinder;
use crate::config::{ConfigError, MorphfeedConfig};
use crate::documents::DocumentStore;
use crate::error::JoinError;

/// A joined feed: the subscription to release and the first frame to send.
pub struct Joined {
    /// Handle passed to `unsubscribe` on leave.
    pub id: SubscriptionId,
    /// Snapshots published after the join.
    pub stream: FeedStream,
    /// The seed when this join started the feed, the latest snapshot
    /// otherwise.
    pub first: Arc<Value>,
}

/// Counts reported by a completed reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReloadSummary {
    /// Feeds that were running and have been stopped.
    pub feeds_stopped: usize,
    /// Seed documents now available.
    pub documents: usize,
    /// Rule bindings now configured.
    pub bindings: usize,
}

/// Shared state for the Axum application.
///
/// Wrapped in [`Arc`] and injected via Axum's `State` extractor.
pub struct AppState {
    /// The feed multiplexer.
    pub hub: Arc<FeedHub>,
    /// Binds configured rules when a feed is joined.
    pub binder: RuleBinder,
    /// Seed documents, keyed by feed name.
    pub documents: Arc<DocumentStore>,
    /// Log every published snapshot.
    pub echo: bool,
    config_path: Option<PathBuf>,
    gate: RwLock<()>,
}

impl AppState {
    /// Build the state described by `config`. `config_path` is where
    /// [`reload`](Self::reload) re-reads the configuration from.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::InvalidPeriod`] if the feed period is unusable.
    pub fn new(config: &MorphfeedConfig, config_path: Option<PathBuf>) -> Result<Self, FeedError> {
        let registry = Arc::new(MorphRegistry::new());
        let documents = Arc::new(DocumentStore::new(config.documents.clone()));
        let executor = Arc::clone(&documents) as Arc<dyn QueryExecutor>;

        let binder = RuleBinder::new(
            Arc::clone(&registry),
            Arc::clone(&executor),
            config.rules.clone(),
            config.feeds.max_donor_attempts,
        );
        let hub = Arc::new(FeedHub::new(registry, executor, config.feed_config()?));

        Ok(Self {
            hub,
            binder,
            documents,
            echo: config.logging.echo,
            config_path,
            gate: RwLock::new(()),
        })
    }

    /// Join `feed`: bind the configured rules, start or share the feed,
    /// and open a stream on it.
    ///
    /// # Errors
    ///
    /// Returns [`JoinError::Bind`] if a rule cannot be built and
    /// [`JoinError::Feed`] if the seed fails or the feed stops before the
    /// stream is open. Nothing is left to release in either case.
    pub async fn join(&self, feed: &str) -> Result<Joined, JoinError> {
        let _joining = self.gate.read().await;
        self.binder.bind_feed(feed)?;
        let seed = self.hub.ensure_feed(feed, feed).await?;
        self.attach(feed, seed).await
    }

    /// Open the stream of a feed this caller has just joined.
    pub(crate) async fn attach(&self, feed: &str, seed: Option<Value>) -> Result<Joined, JoinError> {
        let (id, stream) = self.hub.stream(feed).await?;

        let first = match seed {
            Some(seed) => {
                if self.echo {
                    self.attach_echo(feed).await;
                }
                Arc::new(seed)
            }
            None => stream.latest(),
        };
        Ok(Joined { id, stream, first })
    }

    /// Log every snapshot `feed` publishes until it stops.
    async fn attach_echo(&self, feed: &str) {
        let name = feed.to_owned();
        let echo = self.hub.subscribe(feed, move |snapshot: Arc<Value>| {
            info!(feed = %name, %snapshot, "feed published");
        });
        if let Err(e) = echo.await {
            debug!(feed, error = %e, "echo not attached");
        }
    }

    /// Re-read the config file and apply its documents and rules.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if there is no config file to read or it
    /// fails to load. Running feeds are left alone in that case.
    pub async fn reload(&self) -> Result<ReloadSummary, ConfigError> {
        let Some(path) = self.config_path.as_deref() else {
            return Err(ConfigError::Invalid {
                message: String::from("no config file to reload from"),
            });
        };
        let config = MorphfeedConfig::from_file(path)?;
        info!(path = %path.display(), "configuration reloaded from disk");
        Ok(self.apply(config).await)
    }

    /// Replace documents and rules with those of `config`.
    ///
    /// Every feed is stopped and every subscription released first, then the
    /// registry is cleared, so the next join starts from the new seed
    /// documents with freshly bound rules. Listener and feed timing settings
    /// in `config` are ignored; they only take effect on restart.
    ///
    /// Waits for joins already in progress; joins that arrive meanwhile
    /// run against the new configuration.
    pub async fn apply(&self, config: MorphfeedConfig) -> ReloadSummary {
        let _reloading = self.gate.write().await;

        let feeds_stopped = self.hub.active_feeds().await.len();
        self.hub.unsubscribe_all().await;
        self.hub.registry().reset_all();

        let documents = self.documents.replace(config.documents);
        let bindings = self.binder.replace(config.rules);

        let summary = ReloadSummary {
            feeds_stopped,
            documents,
            bindings,
        };
        info!(
            feeds_stopped = summary.feeds_stopped,
            documents = summary.documents,
            bindings = summary.bindings,
            "configuration applied"
        );
        summary
    }
}
