use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use rusqlite::{params, Connection};

use crate::history::{NewObservation, RankObservation};
use crate::storage::{format_date, open_connection, parse_date};

/// Append-only per-day rank records. Same-day re-checks append another row.
pub struct HistoryStore {
    conn: Mutex<Connection>,
}

impl HistoryStore {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(open_connection(path)?),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("history store connection mutex poisoned"))
    }

    pub fn append(&self, observation: &NewObservation) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            r#"
INSERT INTO rank_observations(keyword_id, checked_date, position, url_found)
VALUES (?1, ?2, ?3, ?4)
"#,
            params![
                observation.keyword_id,
                format_date(observation.checked_date),
                observation.position,
                observation.url_found,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent observations first.
    pub fn for_keyword(&self, keyword_id: i64, limit: usize) -> Result<Vec<RankObservation>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
SELECT id, keyword_id, checked_date, position, url_found
FROM rank_observations
WHERE keyword_id = ?1
ORDER BY checked_date DESC, id DESC
LIMIT ?2
"#,
        )?;
        let rows = stmt
            .query_map(params![keyword_id, limit as i64], row_to_observation)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Deletes every observation dated strictly before `cutoff`, across all
    /// keywords. Returns the number of rows removed.
    pub fn prune_before(&self, cutoff: NaiveDate) -> Result<usize> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM rank_observations WHERE checked_date < ?1",
            params![format_date(cutoff)],
        )?;
        Ok(deleted)
    }

    pub fn count(&self) -> Result<u64> {
        let conn = self.conn()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM rank_observations", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }
}

fn row_to_observation(row: &rusqlite::Row<'_>) -> rusqlite::Result<RankObservation> {
    let date_raw: String = row.get(2)?;
    let checked_date = parse_date(&date_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("invalid checked_date: {date_raw}").into(),
        )
    })?;
    Ok(RankObservation {
        id: row.get(0)?,
        keyword_id: row.get(1)?,
        checked_date,
        position: row.get(3)?,
        url_found: row.get(4)?,
    })
}
