pub const BASE_MIGRATION: &str = r#"
CREATE TABLE IF NOT EXISTS keywords (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    keyword TEXT NOT NULL,
    target_url TEXT,
    search_engine TEXT NOT NULL DEFAULT 'google.com',
    location TEXT NOT NULL DEFAULT '',
    device TEXT NOT NULL DEFAULT 'desktop',
    active INTEGER NOT NULL DEFAULT 1,
    last_position INTEGER,
    best_position INTEGER,
    last_checked_at TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_keywords_keyword ON keywords(keyword);
CREATE INDEX IF NOT EXISTS idx_keywords_active_checked
    ON keywords(active, last_checked_at);

CREATE TABLE IF NOT EXISTS rank_observations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    keyword_id INTEGER NOT NULL,
    checked_date TEXT NOT NULL,
    position INTEGER,
    url_found TEXT NOT NULL DEFAULT ''
);
CREATE INDEX IF NOT EXISTS idx_observations_keyword_date
    ON rank_observations(keyword_id, checked_date);
CREATE INDEX IF NOT EXISTS idx_observations_date
    ON rank_observations(checked_date);

CREATE TABLE IF NOT EXISTS quota_counters (
    key TEXT PRIMARY KEY,
    value INTEGER NOT NULL,
    expires_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS scheduler_lease (
    name TEXT PRIMARY KEY,
    holder TEXT NOT NULL,
    acquired_at TEXT NOT NULL,
    expires_at TEXT NOT NULL
);
"#;
