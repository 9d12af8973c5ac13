use anyhow::Result;

use crate::history::RankObservation;
use crate::keywords::Keyword;
use crate::storage::format_timestamp;

fn optional_position(position: Option<i64>) -> String {
    position.map(|p| p.to_string()).unwrap_or_default()
}

pub fn keywords_to_csv(keywords: &[Keyword]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record([
        "id",
        "keyword",
        "target_url",
        "search_engine",
        "location",
        "device",
        "active",
        "last_position",
        "best_position",
        "last_checked_at",
        "created_at",
    ])?;
    for keyword in keywords {
        writer.write_record([
            keyword.id.to_string(),
            keyword.keyword.clone(),
            keyword.target_url.clone().unwrap_or_default(),
            keyword.search_engine.to_string(),
            keyword.location.clone(),
            keyword.device.to_string(),
            keyword.active.to_string(),
            optional_position(keyword.last_position),
            optional_position(keyword.best_position),
            keyword
                .last_checked_at
                .as_ref()
                .map(format_timestamp)
                .unwrap_or_default(),
            format_timestamp(&keyword.created_at),
        ])?;
    }
    let data = writer.into_inner()?;
    Ok(String::from_utf8_lossy(&data).to_string())
}

pub fn history_to_csv(records: &[RankObservation]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record(["id", "keyword_id", "checked_date", "position", "url_found"])?;
    for record in records {
        writer.write_record([
            record.id.to_string(),
            record.keyword_id.to_string(),
            record.checked_date.to_string(),
            optional_position(record.position),
            record.url_found.clone(),
        ])?;
    }
    let data = writer.into_inner()?;
    Ok(String::from_utf8_lossy(&data).to_string())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use crate::history::RankObservation;
    use crate::output::csv::history_to_csv;

    #[test]
    fn not_found_positions_are_empty_cells() {
        let records = vec![RankObservation {
            id: 1,
            keyword_id: 9,
            checked_date: NaiveDate::from_ymd_opt(2026, 3, 4).unwrap(),
            position: None,
            url_found: "https://a.com/x,y".to_string(),
        }];
        let rendered = history_to_csv(&records).expect("csv");
        let mut lines = rendered.lines();
        assert_eq!(
            lines.next(),
            Some("id,keyword_id,checked_date,position,url_found")
        );
        assert_eq!(lines.next(), Some("1,9,2026-03-04,,\"https://a.com/x,y\""));
    }
}
