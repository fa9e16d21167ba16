//! Runtime settings for the multiplexer.

use std::time::Duration;

use crate::error::FeedError;

/// Default seconds between mutation cycles.
pub const DEFAULT_PERIOD_SECS: f64 = 1.0;

/// Default capacity of each feed's broadcast channel.
///
/// A subscriber that falls further behind than this skips to the newest
/// snapshot.
pub const DEFAULT_BROADCAST_CAPACITY: usize = 64;

/// Settings shared by every feed of a [`FeedHub`](crate::hub::FeedHub).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedConfig {
    period: Duration,
    broadcast_capacity: usize,
}

impl FeedConfig {
    /// Build a config with the given period in seconds.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::InvalidPeriod`] unless `secs` is finite and
    /// strictly positive.
    pub fn from_period_secs(secs: f64) -> Result<Self, FeedError> {
        let period = Duration::try_from_secs_f64(secs)
            .ok()
            .filter(|period| !period.is_zero())
            .ok_or(FeedError::InvalidPeriod { secs })?;
        Ok(Self {
            period,
            broadcast_capacity: DEFAULT_BROADCAST_CAPACITY,
        })
    }

    /// Override the per-feed broadcast capacity (minimum 1).
    #[must_use]
    pub fn with_broadcast_capacity(mut self, capacity: usize) -> Self {
        self.broadcast_capacity = capacity.max(1);
        self
    }

    /// Time between mutation cycles.
    pub const fn period(&self) -> Duration {
        self.period
    }

    /// Per-feed broadcast channel capacity.
    pub const fn broadcast_capacity(&self) -> usize {
        self.broadcast_capacity
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(1),
            broadcast_capacity: DEFAULT_BROADCAST_CAPACITY,
        }
    }
}
