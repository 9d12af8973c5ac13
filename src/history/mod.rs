pub mod store;

use chrono::{DateTime, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub use store::HistoryStore;

/// Observations older than this many calendar months are pruned.
pub const RETENTION_MONTHS: u32 = 12;

/// One dated position measurement for a keyword. `position == None` means the
/// target was not found in the provider's results.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankObservation {
    pub id: i64,
    pub keyword_id: i64,
    pub checked_date: NaiveDate,
    pub position: Option<i64>,
    pub url_found: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewObservation {
    pub keyword_id: i64,
    pub checked_date: NaiveDate,
    pub position: Option<i64>,
    pub url_found: String,
}

/// First calendar date that survives retention relative to `now`.
pub fn retention_cutoff(now: DateTime<Utc>) -> NaiveDate {
    let today = now.date_naive();
    today
        .checked_sub_months(Months::new(RETENTION_MONTHS))
        .unwrap_or(NaiveDate::MIN)
}

pub fn summarize_history(records: &[RankObservation]) -> String {
    if records.is_empty() {
        return "No rank history recorded.".to_string();
    }

    let found: Vec<i64> = records
        .iter()
        .filter_map(|rec| rec.position.filter(|pos| *pos > 0))
        .collect();
    let best = found.iter().min();
    let latest = records
        .iter()
        .max_by_key(|rec| (rec.checked_date, rec.id))
        .and_then(|rec| rec.position);

    format!(
        "Found in {}/{} checks; best {}, latest {}",
        found.len(),
        records.len(),
        best.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
        latest.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
    )
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};

    use crate::history::{retention_cutoff, summarize_history, RankObservation};

    fn obs(id: i64, day: u32, position: Option<i64>) -> RankObservation {
        RankObservation {
            id,
            keyword_id: 1,
            checked_date: NaiveDate::from_ymd_opt(2026, 4, day).unwrap(),
            position,
            url_found: String::new(),
        }
    }

    #[test]
    fn cutoff_is_twelve_calendar_months_back() {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 3, 0, 0).unwrap();
        assert_eq!(
            retention_cutoff(now),
            NaiveDate::from_ymd_opt(2025, 10, 19).unwrap()
        );
    }

    #[test]
    fn cutoff_clamps_month_end() {
        let now = Utc.with_ymd_and_hms(2024, 2, 29, 0, 0, 0).unwrap();
        assert_eq!(
            retention_cutoff(now),
            NaiveDate::from_ymd_opt(2023, 2, 28).unwrap()
        );
    }

    #[test]
    fn summary_reports_best_and_latest() {
        let records = vec![obs(1, 1, Some(9)), obs(2, 2, None), obs(3, 3, Some(4))];
        assert_eq!(
            summarize_history(&records),
            "Found in 2/3 checks; best 4, latest 4"
        );
        assert_eq!(summarize_history(&[]), "No rank history recorded.");
    }
}
