use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::storage::{format_timestamp, open_connection};

/// Keyed counters with a per-key expiry.
pub trait CounterStore: Send + Sync {
    /// Current value, or `None` when the key is missing or expired.
    fn get(&self, key: &str, now: DateTime<Utc>) -> Result<Option<u64>>;
    /// Adds `by` to the key (starting from zero if missing or expired), sets
    /// its expiry to `now + ttl`, and returns the new value.
    fn increment(&self, key: &str, by: u64, ttl: Duration, now: DateTime<Utc>) -> Result<u64>;
    /// Removes expired keys and returns how many were dropped.
    fn expire(&self, now: DateTime<Utc>) -> Result<usize>;
}

/// Counters persisted in the tracker database so they survive restarts.
pub struct SqliteCounterStore {
    conn: Mutex<Connection>,
}

impl SqliteCounterStore {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(open_connection(path)?),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("quota counter connection mutex poisoned"))
    }
}

impl CounterStore for SqliteCounterStore {
    fn get(&self, key: &str, now: DateTime<Utc>) -> Result<Option<u64>> {
        let conn = self.conn()?;
        let value: Option<i64> = conn
            .query_row(
                "SELECT value FROM quota_counters WHERE key = ?1 AND expires_at > ?2",
                params![key, format_timestamp(&now)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.map(|v| v.max(0) as u64))
    }

    fn increment(&self, key: &str, by: u64, ttl: Duration, now: DateTime<Utc>) -> Result<u64> {
        let conn = self.conn()?;
        let by = i64::try_from(by).map_err(|_| anyhow!("counter increment too large: {by}"))?;
        let value: i64 = conn.query_row(
            r#"
INSERT INTO quota_counters(key, value, expires_at)
VALUES (?1, ?2, ?3)
ON CONFLICT(key) DO UPDATE SET
    value = CASE
        WHEN quota_counters.expires_at <= ?4 THEN excluded.value
        ELSE quota_counters.value + excluded.value
    END,
    expires_at = excluded.expires_at
RETURNING value
"#,
            params![
                key,
                by,
                format_timestamp(&(now + ttl)),
                format_timestamp(&now)
            ],
            |row| row.get(0),
        )?;
        Ok(value.max(0) as u64)
    }

    fn expire(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM quota_counters WHERE expires_at <= ?1",
            params![format_timestamp(&now)],
        )?;
        Ok(deleted)
    }
}

#[derive(Debug, Clone)]
struct CounterEntry {
    value: u64,
    expires_at: DateTime<Utc>,
}

/// Process-local counters, used in tests and for dry runs.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    entries: Mutex<HashMap<String, CounterEntry>>,
}

impl MemoryCounterStore {
    fn entries(&self) -> Result<MutexGuard<'_, HashMap<String, CounterEntry>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow!("memory counter mutex poisoned"))
    }
}

impl CounterStore for MemoryCounterStore {
    fn get(&self, key: &str, now: DateTime<Utc>) -> Result<Option<u64>> {
        let guard = self.entries()?;
        Ok(guard
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.value))
    }

    fn increment(&self, key: &str, by: u64, ttl: Duration, now: DateTime<Utc>) -> Result<u64> {
        let mut guard = self.entries()?;
        let previous = guard
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.value)
            .unwrap_or(0);
        let value = previous.saturating_add(by);
        guard.insert(
            key.to_string(),
            CounterEntry {
                value,
                expires_at: now + ttl,
            },
        );
        Ok(value)
    }

    fn expire(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut guard = self.entries()?;
        let before = guard.len();
        guard.retain(|_, entry| entry.expires_at > now);
        Ok(before - guard.len())
    }
}
