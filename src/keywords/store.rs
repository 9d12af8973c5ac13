use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::keywords::{Device, Keyword, KeywordBatch, KeywordPage, SearchEngine};
use crate::storage::{format_timestamp, open_connection, parse_timestamp};

const KEYWORD_COLUMNS: &str = "id, keyword, target_url, search_engine, location, device, active, \
     last_position, best_position, last_checked_at, created_at";

/// Durable table of tracked keywords and their ranking summary fields.
pub struct KeywordStore {
    conn: Mutex<Connection>,
}

impl KeywordStore {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(open_connection(path)?),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("keyword store connection mutex poisoned"))
    }

    /// Inserts one row per keyword, all sharing the batch attributes.
    /// Returns the number of rows actually inserted.
    pub fn add_keywords(
        &self,
        keywords: &[String],
        batch: &KeywordBatch,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let target_url = batch.normalized_target_url();
        let created_at = format_timestamp(&now);
        let mut inserted = 0usize;
        {
            let mut stmt = tx.prepare(
                r#"
INSERT INTO keywords(keyword, target_url, search_engine, location, device, active, created_at)
VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)
"#,
            )?;
            for keyword in keywords {
                inserted += stmt.execute(params![
                    keyword,
                    target_url,
                    batch.search_engine.as_slug(),
                    batch.location,
                    batch.device.as_slug(),
                    created_at,
                ])?;
            }
        }
        tx.commit().context("failed committing keyword batch")?;
        Ok(inserted)
    }

    pub fn get(&self, id: i64) -> Result<Option<Keyword>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {KEYWORD_COLUMNS} FROM keywords WHERE id = ?1");
        let keyword = conn
            .query_row(&sql, params![id], row_to_keyword)
            .optional()?;
        Ok(keyword)
    }

    /// Active keywords, least recently checked first. Never-checked keywords
    /// sort ahead of every checked one.
    pub fn select_due(&self, limit: u32) -> Result<Vec<Keyword>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let conn = self.conn()?;
        let sql = format!(
            r#"
SELECT {KEYWORD_COLUMNS}
FROM keywords
WHERE active = 1
ORDER BY last_checked_at IS NOT NULL, last_checked_at ASC, id ASC
LIMIT ?1
"#
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![i64::from(limit)], row_to_keyword)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Writes the outcome of one successful check onto the keyword row.
    pub fn record_check(
        &self,
        id: i64,
        last_position: Option<i64>,
        best_position: Option<i64>,
        checked_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            r#"
UPDATE keywords
SET last_position = ?1, best_position = ?2, last_checked_at = ?3
WHERE id = ?4
"#,
            params![last_position, best_position, format_timestamp(&checked_at), id],
        )?;
        if updated == 0 {
            return Err(anyhow!("keyword {id} no longer exists"));
        }
        Ok(())
    }

    /// Newest keywords first. `page` is 1-based.
    pub fn list_page(&self, page: u32, per_page: u32) -> Result<KeywordPage> {
        let page = page.max(1);
        let per_page = per_page.max(1);
        let conn = self.conn()?;
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM keywords", [], |row| row.get(0))?;
        let offset = i64::from(page - 1) * i64::from(per_page);
        let sql = format!(
            r#"
SELECT {KEYWORD_COLUMNS}
FROM keywords
ORDER BY created_at DESC, id DESC
LIMIT ?1 OFFSET ?2
"#
        );
        let mut stmt = conn.prepare(&sql)?;
        let keywords = stmt
            .query_map(params![i64::from(per_page), offset], row_to_keyword)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let total = total.max(0) as u64;
        let total_pages = if total == 0 {
            1
        } else {
            total.div_ceil(u64::from(per_page)) as u32
        };
        Ok(KeywordPage {
            keywords,
            total,
            page,
            per_page,
            total_pages,
        })
    }

    /// Pauses or resumes a keyword. Returns false when the id is unknown.
    pub fn set_active(&self, id: i64, active: bool) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE keywords SET active = ?1 WHERE id = ?2",
            params![i64::from(active), id],
        )?;
        Ok(updated > 0)
    }

    /// Deletes a keyword together with its observations.
    pub fn delete(&self, id: i64) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM rank_observations WHERE keyword_id = ?1",
            params![id],
        )?;
        let deleted = tx.execute("DELETE FROM keywords WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(deleted > 0)
    }

    pub fn count_active(&self) -> Result<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM keywords WHERE active = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }
}

fn row_to_keyword(row: &rusqlite::Row<'_>) -> rusqlite::Result<Keyword> {
    let engine_raw: String = row.get(3)?;
    let device_raw: String = row.get(5)?;
    let last_checked_raw: Option<String> = row.get(9)?;
    let created_raw: String = row.get(10)?;
    Ok(Keyword {
        id: row.get(0)?,
        keyword: row.get(1)?,
        target_url: row.get(2)?,
        search_engine: SearchEngine::from_str(&engine_raw).unwrap_or_default(),
        location: row.get(4)?,
        device: Device::from_str(&device_raw).unwrap_or_default(),
        active: row.get::<_, i64>(6)? != 0,
        last_position: row.get(7)?,
        best_position: row.get(8)?,
        last_checked_at: last_checked_raw.as_deref().and_then(parse_timestamp),
        created_at: parse_timestamp(&created_raw).unwrap_or_else(Utc::now),
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use crate::keywords::{KeywordBatch, KeywordStore};

    fn open_store() -> (tempfile::TempDir, KeywordStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = KeywordStore::open(&dir.path().join("tracker.db")).expect("open store");
        (dir, store)
    }

    #[test]
    fn add_keywords_reports_inserted_rows() {
        let (_dir, store) = open_store();
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 0).unwrap();
        let batch = KeywordBatch {
            target_url: Some("https://target.com/page".to_string()),
            ..KeywordBatch::default()
        };
        let inserted = store
            .add_keywords(&["widget".to_string(), "gadget".to_string()], &batch, now)
            .expect("insert");
        assert_eq!(inserted, 2);

        let page = store.list_page(1, 100).expect("list");
        assert_eq!(page.total, 2);
        assert_eq!(page.total_pages, 1);
        let first = &page.keywords[0];
        assert!(first.active);
        assert_eq!(first.target_url.as_deref(), Some("https://target.com/page"));
        assert_eq!(first.last_position, None);
        assert_eq!(first.created_at, now);
    }

    #[test]
    fn never_checked_keywords_are_selected_first() {
        let (_dir, store) = open_store();
        let now = Utc.with_ymd_and_hms(2026, 5, 2, 8, 0, 0).unwrap();
        store
            .add_keywords(
                &["checked".to_string(), "fresh".to_string()],
                &KeywordBatch::default(),
                now,
            )
            .expect("insert");
        let checked = store.select_due(10).expect("select")[0].clone();
        store
            .record_check(checked.id, Some(4), Some(4), now - Duration::days(1))
            .expect("record");

        let due = store.select_due(1).expect("select");
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].keyword, "fresh");
    }

    #[test]
    fn paused_keywords_are_not_selected() {
        let (_dir, store) = open_store();
        let now = Utc::now();
        store
            .add_keywords(&["paused".to_string()], &KeywordBatch::default(), now)
            .expect("insert");
        let id = store.select_due(1).expect("select")[0].id;
        assert!(store.set_active(id, false).expect("pause"));
        assert!(store.select_due(10).expect("select").is_empty());
        assert_eq!(store.count_active().expect("count"), 0);
        assert!(!store.set_active(9_999, true).expect("unknown id"));
    }

    #[test]
    fn pagination_is_newest_first() {
        let (_dir, store) = open_store();
        let base = Utc.with_ymd_and_hms(2026, 5, 3, 8, 0, 0).unwrap();
        for i in 0..5 {
            store
                .add_keywords(
                    &[format!("kw{i}")],
                    &KeywordBatch::default(),
                    base + Duration::minutes(i),
                )
                .expect("insert");
        }
        let page = store.list_page(2, 2).expect("list");
        assert_eq!(page.total, 5);
        assert_eq!(page.total_pages, 3);
        let names: Vec<_> = page.keywords.iter().map(|k| k.keyword.as_str()).collect();
        assert_eq!(names, vec!["kw2", "kw1"]);
    }

    #[test]
    fn delete_removes_keyword() {
        let (_dir, store) = open_store();
        store
            .add_keywords(&["gone".to_string()], &KeywordBatch::default(), Utc::now())
            .expect("insert");
        let id = store.select_due(1).expect("select")[0].id;
        assert!(store.delete(id).expect("delete"));
        assert!(store.get(id).expect("get").is_none());
        assert!(!store.delete(id).expect("second delete"));
    }
}
