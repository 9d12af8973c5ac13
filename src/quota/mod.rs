//! Daily provider-call budget.
//!
//! Usage is kept in a keyed counter (`rank_daily_used_YYYYMMDD`, UTC). Every
//! increment pushes the key's expiry to 24 hours after the write, so the key
//! behaves as a plain per-day counter that quietly disappears once stale.
//!
//! Reads fail open: if the counter cannot be read the tracker assumes nothing
//! has been used yet and logs a warning. An unavailable counter store never
//! blocks a scheduler run; the worst case is exceeding the budget for a day.

pub mod counter;

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::TrackerConfig;

pub use counter::{CounterStore, MemoryCounterStore, SqliteCounterStore};

const KEY_PREFIX: &str = "rank_daily_used_";

pub fn counter_ttl() -> Duration {
    Duration::hours(24)
}

pub fn daily_key(now: DateTime<Utc>) -> String {
    format!("{KEY_PREFIX}{}", now.format("%Y%m%d"))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuotaStatus {
    pub day: String,
    pub used: u64,
    pub daily_limit: u64,
    pub remaining: u64,
}

#[derive(Clone)]
pub struct QuotaTracker {
    counters: Arc<dyn CounterStore>,
}

impl QuotaTracker {
    pub fn new(counters: Arc<dyn CounterStore>) -> Self {
        Self { counters }
    }

    /// Calls consumed so far on `now`'s UTC day.
    pub fn used_on(&self, now: DateTime<Utc>) -> u64 {
        let key = daily_key(now);
        match self.counters.get(&key, now) {
            Ok(value) => value.unwrap_or(0),
            Err(err) => {
                warn!("quota counter {key} unreadable, treating as unused: {err:#}");
                0
            }
        }
    }

    pub fn remaining(&self, settings: &TrackerConfig, now: DateTime<Utc>) -> u64 {
        u64::from(settings.daily_limit).saturating_sub(self.used_on(now))
    }

    /// Adds `n` calls to today's counter and returns the new total.
    pub fn consume(&self, n: u64, now: DateTime<Utc>) -> Result<u64> {
        self.counters
            .increment(&daily_key(now), n, counter_ttl(), now)
    }

    pub fn status(&self, settings: &TrackerConfig, now: DateTime<Utc>) -> QuotaStatus {
        let used = self.used_on(now);
        let daily_limit = u64::from(settings.daily_limit);
        QuotaStatus {
            day: now.format("%Y-%m-%d").to_string(),
            used,
            daily_limit,
            remaining: daily_limit.saturating_sub(used),
        }
    }

    /// Drops expired counters. Returns how many were removed.
    pub fn expire_stale(&self, now: DateTime<Utc>) -> Result<usize> {
        self.counters.expire(now)
    }
}
