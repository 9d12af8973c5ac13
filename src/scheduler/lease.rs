use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::{info, warn};

use crate::storage::{format_timestamp, open_connection, parse_timestamp};

const LEASE_NAME: &str = "rank_tracker_run";

/// Cross-process run lock stored in the tracker database.
///
/// A holder that dies without releasing blocks other runs only until the
/// lease expires.
pub struct RunLease {
    conn: Mutex<Connection>,
    holder: String,
    ttl: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseDecision {
    Acquired { takeover: bool },
    Held { holder: String, expires_at: DateTime<Utc> },
}

impl RunLease {
    pub fn open(path: &Path, ttl: Duration) -> Result<Self> {
        let holder = format!(
            "pid{}-{}",
            std::process::id(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        );
        Self::open_as(path, holder, ttl)
    }

    pub fn open_as(path: &Path, holder: impl Into<String>, ttl: Duration) -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(open_connection(path)?),
            holder: holder.into(),
            ttl,
        })
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("run lease connection mutex poisoned"))
    }

    pub fn try_acquire(&self, now: DateTime<Utc>) -> Result<LeaseDecision> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let existing: Option<(String, String)> = tx
            .query_row(
                "SELECT holder, expires_at FROM scheduler_lease WHERE name = ?1",
                params![LEASE_NAME],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let takeover = match existing {
            Some((holder, expires_raw)) if holder != self.holder => {
                let expires_at = parse_timestamp(&expires_raw).unwrap_or(now);
                if expires_at > now {
                    return Ok(LeaseDecision::Held { holder, expires_at });
                }
                true
            }
            _ => false,
        };

        tx.execute(
            r#"
INSERT INTO scheduler_lease(name, holder, acquired_at, expires_at)
VALUES (?1, ?2, ?3, ?4)
ON CONFLICT(name) DO UPDATE SET
    holder = excluded.holder,
    acquired_at = excluded.acquired_at,
    expires_at = excluded.expires_at
"#,
            params![
                LEASE_NAME,
                self.holder,
                format_timestamp(&now),
                format_timestamp(&(now + self.ttl))
            ],
        )?;
        tx.commit()?;
        if takeover {
            info!(holder = %self.holder, "took over expired scheduler lease");
        }
        Ok(LeaseDecision::Acquired { takeover })
    }

    /// Heartbeat: pushes the expiry to `now + ttl` while this instance is still
    /// the holder. Returns `false` once the lease was released or taken over.
    pub fn renew(&self, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE scheduler_lease SET expires_at = ?1 WHERE name = ?2 AND holder = ?3",
            params![format_timestamp(&(now + self.ttl)), LEASE_NAME, self.holder],
        )?;
        Ok(updated > 0)
    }

    /// Releases the lease if this instance still holds it.
    pub fn release(&self) -> Result<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM scheduler_lease WHERE name = ?1 AND holder = ?2",
            params![LEASE_NAME, self.holder],
        )?;
        Ok(deleted > 0)
    }
}

/// Releases the lease when dropped, on every exit path of a run.
pub struct LeaseGuard<'a> {
    lease: &'a RunLease,
}

impl<'a> LeaseGuard<'a> {
    pub fn new(lease: &'a RunLease) -> Self {
        Self { lease }
    }
}

impl Drop for LeaseGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.lease.release() {
            warn!("failed releasing scheduler lease: {err:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use crate::scheduler::lease::{LeaseDecision, LeaseGuard, RunLease};

    #[test]
    fn second_holder_is_blocked_until_release() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tracker.db");
        let first = RunLease::open_as(&path, "first", Duration::hours(2)).expect("open");
        let second = RunLease::open_as(&path, "second", Duration::hours(2)).expect("open");
        let now = Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap();

        assert_eq!(
            first.try_acquire(now).unwrap(),
            LeaseDecision::Acquired { takeover: false }
        );
        {
            let _guard = LeaseGuard::new(&first);
            assert!(matches!(
                second.try_acquire(now).unwrap(),
                LeaseDecision::Held { ref holder, .. } if holder == "first"
            ));
        }
        assert_eq!(
            second.try_acquire(now).unwrap(),
            LeaseDecision::Acquired { takeover: false }
        );
    }

    #[test]
    fn expired_lease_is_taken_over() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tracker.db");
        let crashed = RunLease::open_as(&path, "crashed", Duration::hours(2)).expect("open");
        let next = RunLease::open_as(&path, "next", Duration::hours(2)).expect("open");
        let now = Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap();

        crashed.try_acquire(now).unwrap();
        assert_eq!(
            next.try_acquire(now + Duration::hours(3)).unwrap(),
            LeaseDecision::Acquired { takeover: true }
        );
        assert!(!crashed.release().unwrap());
    }

    #[test]
    fn renewal_keeps_lease_until_taken_over() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tracker.db");
        let slow = RunLease::open_as(&path, "slow", Duration::hours(2)).expect("open");
        let other = RunLease::open_as(&path, "other", Duration::hours(2)).expect("open");
        let now = Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap();

        slow.try_acquire(now).unwrap();
        assert!(slow.renew(now + Duration::minutes(90)).unwrap());
        assert!(matches!(
            other.try_acquire(now + Duration::hours(3)).unwrap(),
            LeaseDecision::Held { .. }
        ));

        assert_eq!(
            other.try_acquire(now + Duration::hours(4)).unwrap(),
            LeaseDecision::Acquired { takeover: true }
        );
        assert!(!slow.renew(now + Duration::hours(4)).unwrap());
        assert!(other.release().unwrap());
        assert!(!slow.renew(now + Duration::hours(5)).unwrap());
    }
}
