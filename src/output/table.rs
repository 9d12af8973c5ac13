use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color, ContentArrangement, Row, Table};

use crate::history::RankObservation;
use crate::keywords::{Keyword, KeywordPage};
use crate::quota::QuotaStatus;
use crate::scheduler::{RunOutcome, RunReport};

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn position_label(position: Option<i64>) -> String {
    position
        .filter(|p| *p > 0)
        .map(|p| p.to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn position_cell(position: Option<i64>) -> Cell {
    match position {
        Some(p) if p > 0 && p <= 10 => Cell::new(p).fg(Color::Green),
        Some(p) if p > 0 => Cell::new(p),
        _ => Cell::new("-").fg(Color::DarkGrey),
    }
}

pub fn render_keywords_table(keywords: &[Keyword]) -> String {
    let mut table = new_table();
    table.set_header(vec![
        "ID",
        "Keyword",
        "Target",
        "Device",
        "Active",
        "Last",
        "Best",
        "Last checked",
    ]);
    for k in keywords {
        let active = if k.active {
            Cell::new("YES").fg(Color::Green)
        } else {
            Cell::new("PAUSED").fg(Color::Yellow)
        };
        table.add_row(Row::from(vec![
            Cell::new(k.id),
            Cell::new(&k.keyword),
            Cell::new(k.target_url.as_deref().unwrap_or("-")),
            Cell::new(k.device.to_string()),
            active,
            position_cell(k.last_position),
            Cell::new(position_label(k.best_position)),
            Cell::new(
                k.last_checked_at
                    .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "never".to_string()),
            ),
        ]));
    }
    table.to_string()
}

pub fn render_keyword_page(page: &KeywordPage) -> String {
    format!(
        "{}\nPage {}/{} ({} keywords)",
        render_keywords_table(&page.keywords),
        page.page,
        page.total_pages.max(1),
        page.total
    )
}

pub fn render_history_table(records: &[RankObservation]) -> String {
    let mut table = new_table();
    table.set_header(vec!["Date", "Position", "URL"]);
    for rec in records {
        table.add_row(Row::from(vec![
            Cell::new(rec.checked_date),
            position_cell(rec.position),
            Cell::new(if rec.url_found.is_empty() {
                "-"
            } else {
                rec.url_found.as_str()
            }),
        ]));
    }
    table.to_string()
}

pub fn render_run_report_table(report: &RunReport) -> String {
    let outcome = Cell::new(report.outcome.as_str()).fg(match report.outcome {
        RunOutcome::Completed | RunOutcome::NothingToDo => Color::Green,
        RunOutcome::QuotaReached | RunOutcome::QuotaExhausted | RunOutcome::AlreadyRunning => {
            Color::Yellow
        }
        RunOutcome::Misconfigured | RunOutcome::LeaseLost => Color::Red,
    });

    let mut table = new_table();
    table.set_header(vec!["Field", "Value"]);
    table.add_row(Row::from(vec![Cell::new("Outcome"), outcome]));
    if let Some(message) = &report.message {
        table.add_row(vec!["Message".to_string(), message.clone()]);
    }
    table.add_row(vec!["Provider".to_string(), report.provider.to_string()]);
    table.add_row(vec!["Selected".to_string(), report.selected.to_string()]);
    table.add_row(vec![
        "Checked".to_string(),
        format!(
            "{} ({} ok, {} failed)",
            report.attempted, report.succeeded, report.failed
        ),
    ]);
    if report.persistence_failures > 0 {
        table.add_row(vec![
            "Write failures".to_string(),
            report.persistence_failures.to_string(),
        ]);
    }
    table.add_row(vec![
        "Quota".to_string(),
        format!(
            "{} -> {} of {}",
            report.quota_used_before, report.quota_used_after, report.daily_limit
        ),
    ]);
    table.add_row(vec!["Pruned".to_string(), report.pruned.to_string()]);
    table.to_string()
}

pub fn render_quota_table(status: &QuotaStatus) -> String {
    let mut table = new_table();
    table.set_header(vec!["Day (UTC)", "Used", "Limit", "Remaining"]);
    let remaining = if status.remaining == 0 {
        Cell::new(status.remaining).fg(Color::Red)
    } else {
        Cell::new(status.remaining)
    };
    table.add_row(Row::from(vec![
        Cell::new(&status.day),
        Cell::new(status.used),
        Cell::new(status.daily_limit),
        remaining,
    ]));
    table.to_string()
}
