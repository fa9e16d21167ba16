//! Per-feed delivery channel.
//!
//! Every active feed owns a [`broadcast`] channel of post-cycle snapshots.
//! Snapshots are immutable [`Arc<Value>`]s, so a subscriber can never see
//! a tree that a cycle is still changing. Transport code drains a
//! [`FeedStream`]; the stream ends when the feed is torn down.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tracing::debug;

/// The iterator-like delivery handle of one feed subscriber.
#[derive(Debug)]
pub struct FeedStream {
    feed: String,
    rx: broadcast::Receiver<Arc<Value>>,
    latest: watch::Receiver<Arc<Value>>,
}

impl FeedStream {
    pub(crate) const fn new(
        feed: String,
        rx: broadcast::Receiver<Arc<Value>>,
        latest: watch::Receiver<Arc<Value>>,
    ) -> Self {
        Self { feed, rx, latest }
    }

    /// The feed this stream delivers.
    pub fn feed(&self) -> &str {
        &self.feed
    }

    /// The feed's most recently published tree, or its seed before the
    /// first cycle. Still readable after the feed is torn down.
    pub fn latest(&self) -> Arc<Value> {
        Arc::clone(&self.latest.borrow())
    }

    /// Wait for the next published snapshot.
    ///
    /// A subscriber that lagged behind skips to the oldest snapshot still
    /// buffered. Returns `None` once the feed has been torn down.
    pub async fn next(&mut self) -> Option<Arc<Value>> {
        loop {
            match self.rx.recv().await {
                Ok(snapshot) => return Some(snapshot),
                Err(RecvError::Lagged(skipped)) => {
                    debug!(feed = %self.feed, skipped, "feed stream lagged, skipping ahead");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn open(rx: broadcast::Receiver<Arc<Value>>) -> (watch::Sender<Arc<Value>>, FeedStream) {
        let (latest_tx, latest) = watch::channel(Arc::new(Value::Null));
        (latest_tx, FeedStream::new("f".to_owned(), rx, latest))
    }

    #[tokio::test]
    async fn skips_lagged_snapshots() {
        let (tx, rx) = broadcast::channel(2);
        let (_latest, mut stream) = open(rx);
        for n in 0..5 {
            tx.send(Arc::new(json!(n))).unwrap();
        }

        assert_eq!(*stream.next().await.unwrap(), json!(3));
        assert_eq!(*stream.next().await.unwrap(), json!(4));
    }

    #[tokio::test]
    async fn ends_when_the_sender_is_dropped() {
        let (tx, rx) = broadcast::channel::<Arc<Value>>(4);
        let (_latest, mut stream) = open(rx);
        drop(tx);
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn latest_outlives_the_feed() {
        let (_tx, rx) = broadcast::channel::<Arc<Value>>(4);
        let (latest_tx, stream) = open(rx);
        latest_tx.send_replace(Arc::new(json!({"tick": 3})));
        drop(latest_tx);
        assert_eq!(*stream.latest(), json!({"tick": 3}));
    }
}
