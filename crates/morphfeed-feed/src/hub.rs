//! The subscription multiplexer.
//!
//! [`FeedHub`] shares one mutating data tree and one timer between every
//! subscriber of the same feed. Per feed it keeps:
//!
//! - a reference count, bumped by every [`ensure_feed`] join and dropped by
//!   every [`unsubscribe`];
//! - a timer task that owns the feed's tree, runs a morph cycle on every
//!   tick and publishes the settled result;
//! - a broadcast channel plus the delivery tasks of its subscribers.
//!
//! # Lifecycle
//!
//! ```text
//! Absent --ensure_feed--> Active(1) --ensure_feed--> Active(n + 1)
//! Active(n) --unsubscribe--> Active(n - 1)
//! Active(1) --unsubscribe--> Absent      (timer stopped, tree dropped)
//! any       --unsubscribe_all--> Absent
//! ```
//!
//! There is no `Active(0)`: the last leave tears the feed down before the
//! call returns, and no cycle runs for that feed afterwards.
//!
//! Seed generation runs outside the hub lock. Concurrent first joins of one
//! feed queue on that feed's start gate, so only one of them executes the
//! seed; joins and leaves of other feeds are not held up by it.
//!
//! [`ensure_feed`]: FeedHub::ensure_feed
//! [`unsubscribe`]: FeedHub::unsubscribe

use std::collections::HashMap;
use std::sync::Arc;

use morphfeed_morph::MorphRegistry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::channel::FeedStream;
use crate::config::FeedConfig;
use crate::error::FeedError;
use crate::executor::QueryExecutor;

/// Handle binding one delivery target to its feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    /// Create a new identifier using UUID v7 (time-ordered).
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bookkeeping for one active feed.
struct FeedState {
    ref_count: usize,
    timer: JoinHandle<()>,
    tx: broadcast::Sender<Arc<Value>>,
    latest: watch::Receiver<Arc<Value>>,
    handlers: HashMap<SubscriptionId, Option<JoinHandle<()>>>,
}

impl FeedState {
    /// Stop the timer and every delivery task, waiting until they are gone.
    async fn stop(self, feed: &str) {
        self.timer.abort();
        for task in self.handlers.values().flatten() {
            task.abort();
        }

        if let Err(e) = self.timer.await {
            if e.is_panic() {
                warn!(feed, error = %e, "feed timer panicked");
            }
        }
        for (id, task) in self.handlers {
            if let Some(task) = task {
                if let Err(e) = task.await {
                    if e.is_panic() {
                        warn!(feed, subscription = %id, error = %e, "feed subscriber panicked");
                    }
                }
            }
        }
        // Dropping `tx` here closes every outstanding `FeedStream`.
    }
}

#[derive(Default)]
struct HubState {
    feeds: HashMap<String, FeedState>,
    subscriptions: HashMap<SubscriptionId, String>,
    starting: HashMap<String, Arc<Mutex<()>>>,
}

impl HubState {
    /// Count one more join of `feed` if it is active.
    fn join_active(&mut self, feed: &str) -> bool {
        let Some(active) = self.feeds.get_mut(feed) else {
            return false;
        };
        active.ref_count = active.ref_count.saturating_add(1);
        debug!(feed, ref_count = active.ref_count, "feed joined");
        true
    }

    /// Drop the start gate of `feed` if it is still `gate`.
    fn release_gate(&mut self, feed: &str, gate: &Arc<Mutex<()>>) {
        if self
            .starting
            .get(feed)
            .is_some_and(|current| Arc::ptr_eq(current, gate))
        {
            self.starting.remove(feed);
        }
    }
}

/// Reference-counted scheduler of morphing feeds.
///
/// Wrap in [`Arc`] and share it with whatever accepts subscribers. All
/// methods take `&self`.
pub struct FeedHub {
    registry: Arc<MorphRegistry>,
    executor: Arc<dyn QueryExecutor>,
    config: FeedConfig,
    state: Mutex<HubState>,
}

impl FeedHub {
    /// Create a hub whose feeds are seeded by `executor` and mutated by the
    /// rules in `registry`.
    pub fn new(
        registry: Arc<MorphRegistry>,
        executor: Arc<dyn QueryExecutor>,
        config: FeedConfig,
    ) -> Self {
        Self {
            registry,
            executor,
            config,
            state: Mutex::new(HubState::default()),
        }
    }

    /// The rule registry driving every feed.
    pub const fn registry(&self) -> &Arc<MorphRegistry> {
        &self.registry
    }

    /// The hub's settings.
    pub const fn config(&self) -> &FeedConfig {
        &self.config
    }

    /// Join `feed`.
    ///
    /// If the feed is already active its reference count goes up and
    /// `None` is returned: the caller should pick up the current snapshot
    /// instead of rendering a new seed. Otherwise `spec` is executed to
    /// build the seed tree, the feed's timer is started, and the seed is
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Seed`] if seed generation fails; the feed is
    /// left absent.
    pub async fn ensure_feed(&self, feed: &str, spec: &str) -> Result<Option<Value>, FeedError> {
        let gate = {
            let mut state = self.state.lock().await;
            if state.join_active(feed) {
                return Ok(None);
            }
            Arc::clone(state.starting.entry(feed.to_owned()).or_default())
        };

        let _starting = gate.lock().await;
        if self.state.lock().await.join_active(feed) {
            return Ok(None);
        }

        let seeded = self.executor.execute(spec).await;

        let mut state = self.state.lock().await;
        state.release_gate(feed, &gate);
        let seed = seeded.map_err(|source| FeedError::Seed {
            feed: feed.to_owned(),
            source,
        })?;
        // A join that queued on an older gate may have won the race.
        if state.join_active(feed) {
            return Ok(None);
        }

        state.feeds.insert(feed.to_owned(), self.start(feed, seed.clone()));
        info!(
            feed,
            period_ms = self.config.period().as_millis(),
            "feed started"
        );
        Ok(Some(seed))
    }

    /// Attach `handler` to an active feed. It is called with every
    /// snapshot published from now on, until the returned handle is
    /// passed to [`unsubscribe`](Self::unsubscribe).
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::FeedNotActive`] if the feed has not been joined.
    pub async fn subscribe<F>(&self, feed: &str, mut handler: F) -> Result<SubscriptionId, FeedError>
    where
        F: FnMut(Arc<Value>) + Send + 'static,
    {
        let mut state = self.state.lock().await;
        let HubState {
            feeds,
            subscriptions,
            ..
        } = &mut *state;

        let active = feeds.get_mut(feed).ok_or_else(|| FeedError::FeedNotActive {
            feed: feed.to_owned(),
        })?;

        let mut stream =
            FeedStream::new(feed.to_owned(), active.tx.subscribe(), active.latest.clone());
        let task = tokio::spawn(async move {
            while let Some(snapshot) = stream.next().await {
                handler(snapshot);
            }
        });

        let id = SubscriptionId::new();
        active.handlers.insert(id, Some(task));
        subscriptions.insert(id, feed.to_owned());
        debug!(feed, subscription = %id, "handler subscribed");
        Ok(id)
    }

    /// Open a [`FeedStream`] on an active feed for transport code to drain.
    /// The returned handle is released with [`unsubscribe`](Self::unsubscribe)
    /// like any other subscription.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::FeedNotActive`] if the feed has not been joined.
    pub async fn stream(&self, feed: &str) -> Result<(SubscriptionId, FeedStream), FeedError> {
        let mut state = self.state.lock().await;
        let HubState {
            feeds,
            subscriptions,
            ..
        } = &mut *state;

        let active = feeds.get_mut(feed).ok_or_else(|| FeedError::FeedNotActive {
            feed: feed.to_owned(),
        })?;

        let stream =
            FeedStream::new(feed.to_owned(), active.tx.subscribe(), active.latest.clone());
        let id = SubscriptionId::new();
        active.handlers.insert(id, None);
        subscriptions.insert(id, feed.to_owned());
        debug!(feed, subscription = %id, "stream opened");
        Ok((id, stream))
    }

    /// Leave the feed bound to `id`.
    ///
    /// Stops that subscription's delivery and drops the feed's reference
    /// count. When the count reaches zero the timer is cancelled and the
    /// feed's tree and bookkeeping are discarded before this returns.
    /// Unknown or already released handles are ignored.
    ///
    /// Returns whether `id` was a live subscription.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.state.lock().await;
        let HubState {
            feeds,
            subscriptions,
            ..
        } = &mut *state;

        let Some(feed) = subscriptions.remove(&id) else {
            debug!(subscription = %id, "unsubscribe for unknown subscription ignored");
            return false;
        };
        let Some(active) = feeds.get_mut(&feed) else {
            return false;
        };

        if let Some(Some(task)) = active.handlers.remove(&id) {
            task.abort();
        }
        active.ref_count = active.ref_count.saturating_sub(1);
        debug!(feed = %feed, subscription = %id, ref_count = active.ref_count, "feed left");

        if active.ref_count == 0 {
            subscriptions.retain(|_, bound| *bound != feed);
            if let Some(stopped) = feeds.remove(&feed) {
                stopped.stop(&feed).await;
            }
            info!(feed = %feed, "feed stopped");
        }
        true
    }

    /// Stop every feed, release every subscription, and clear all
    /// bookkeeping. Safe to call with no active feeds; new feeds can be
    /// joined as soon as it returns.
    pub async fn unsubscribe_all(&self) {
        let mut state = self.state.lock().await;
        let feeds = std::mem::take(&mut state.feeds);
        let released = state.subscriptions.len();
        state.subscriptions.clear();

        let stopped = feeds.len();
        for (feed, active) in feeds {
            active.stop(&feed).await;
        }
        info!(stopped, released, "all feeds stopped");
    }

    /// Current reference count of `feed`, zero when absent.
    pub async fn ref_count(&self, feed: &str) -> usize {
        self.state
            .lock()
            .await
            .feeds
            .get(feed)
            .map_or(0, |active| active.ref_count)
    }

    /// Whether `feed` is active.
    pub async fn is_active(&self, feed: &str) -> bool {
        self.state.lock().await.feeds.contains_key(feed)
    }

    /// Names of all active feeds, sorted.
    pub async fn active_feeds(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().await.feeds.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// The most recently published tree of `feed` (the seed before the
    /// first cycle).
    pub async fn snapshot(&self, feed: &str) -> Option<Arc<Value>> {
        self.state
            .lock()
            .await
            .feeds
            .get(feed)
            .map(|active| Arc::clone(&*active.latest.borrow()))
    }

    fn start(&self, feed: &str, seed: Value) -> FeedState {
        let (tx, _) = broadcast::channel(self.config.broadcast_capacity());
        let (latest_tx, latest) = watch::channel(Arc::new(seed.clone()));
        let timer = tokio::spawn(run_feed(
            feed.to_owned(),
            seed,
            Arc::clone(&self.registry),
            self.config,
            tx.clone(),
            latest_tx,
        ));

        FeedState {
            ref_count: 1,
            timer,
            tx,
            latest,
            handlers: HashMap::new(),
        }
    }
}

/// Timer loop of one feed: cycle, then publish, once per period.
///
/// The loop owns the tree, so a cycle can never overlap the previous one
/// and subscribers only ever see settled snapshots.
async fn run_feed(
    feed: String,
    mut tree: Value,
    registry: Arc<MorphRegistry>,
    config: FeedConfig,
    tx: broadcast::Sender<Arc<Value>>,
    latest: watch::Sender<Arc<Value>>,
) {
    let period = config.period();
    let first_tick = Instant::now().checked_add(period).unwrap_or_else(Instant::now);
    let mut interval = tokio::time::interval_at(first_tick, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        let report = registry.cycle(&mut tree).await;
        if report.failed > 0 {
            warn!(feed = %feed, failed = report.failed, "morph cycle had failing effects");
        }

        let snapshot = Arc::new(tree.clone());
        latest.send_replace(Arc::clone(&snapshot));
        // send only fails when nobody is listening, which is fine.
        let delivered = tx.send(snapshot).unwrap_or(0);
        debug!(feed = %feed, applied = report.applied, delivered, "feed published");
    }
}
