use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::providers::http::host_of;
use crate::providers::ProviderKind;

pub const MAX_BATCH_SIZE: u32 = 500;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default)]
    pub provider: ProviderKind,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub custom_url: String,
    #[serde(default)]
    pub location: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_daily_limit")]
    pub daily_limit: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SiteConfig {
    // Host is the match fallback for keywords without a target URL.
    #[serde(default)]
    pub home_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub provider: Option<ProviderKind>,
    pub api_key: Option<String>,
    pub db_path: Option<String>,
    pub daily_limit: Option<u32>,
    pub batch_size: Option<u32>,
}

impl TrackerConfig {
    pub fn effective_batch_size(&self) -> u32 {
        self.batch_size.clamp(1, MAX_BATCH_SIZE)
    }

    pub fn has_credential(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

impl SiteConfig {
    pub fn fallback_host(&self) -> Option<String> {
        host_of(&self.home_url)
    }
}

impl Config {
    pub fn default_path() -> PathBuf {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home.join(".config/rank-tracker/config.toml")
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(|p| p.to_path_buf())
            .unwrap_or_else(Self::default_path);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(&path)
            .with_context(|| format!("failed reading config: {}", path.display()))?;
        let parsed: Self = toml::from_str(&data)
            .with_context(|| format!("failed parsing TOML config: {}", path.display()))?;
        Ok(parsed)
    }

    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(provider) = overrides.provider {
            self.tracker.provider = provider;
        }
        if let Some(api_key) = overrides.api_key {
            self.tracker.api_key = api_key;
        }
        if let Some(db_path) = overrides.db_path {
            self.storage.db_path = db_path;
        }
        if let Some(daily_limit) = overrides.daily_limit {
            self.tracker.daily_limit = daily_limit;
        }
        if let Some(batch_size) = overrides.batch_size {
            self.tracker.batch_size = batch_size;
        }
    }

    pub fn write_template(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed creating config directory: {}", parent.display())
            })?;
        }
        fs::write(path, Self::default_template())
            .with_context(|| format!("failed writing config template: {}", path.display()))
    }

    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }

    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.tracker.has_credential() {
            copy.tracker.api_key = "********".to_string();
        }
        copy
    }

    pub fn default_template() -> String {
        let template = r#"[tracker]
# none | serpapi | custom
provider = "none"
api_key = ""
custom_url = ""
location = ""
language = "en"
daily_limit = 1000
batch_size = 100

[site]
home_url = "https://example.com/"

[storage]
db_path = "~/.local/share/rank-tracker/tracker.db"

[scheduler]
interval_secs = 3600
lease_ttl_secs = 7200
"#;
        template.to_string()
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            api_key: String::new(),
            custom_url: String::new(),
            location: String::new(),
            language: default_language(),
            daily_limit: default_daily_limit(),
            batch_size: default_batch_size(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            lease_ttl_secs: default_lease_ttl_secs(),
        }
    }
}

fn default_language() -> String {
    "en".to_string()
}

fn default_daily_limit() -> u32 {
    1000
}

fn default_batch_size() -> u32 {
    100
}

fn default_db_path() -> String {
    "~/.local/share/rank-tracker/tracker.db".to_string()
}

fn default_interval_secs() -> u64 {
    3600
}

fn default_lease_ttl_secs() -> u64 {
    7200
}
