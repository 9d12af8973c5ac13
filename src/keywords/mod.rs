pub mod ingest;
pub mod store;

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use ingest::{parse_keyword_lines, strip_markup};
pub use store::KeywordStore;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum SearchEngine {
    #[default]
    #[serde(rename = "google.com")]
    GoogleCom,
}

impl SearchEngine {
    pub fn as_slug(&self) -> &'static str {
        match self {
            Self::GoogleCom => "google.com",
        }
    }
}

impl Display for SearchEngine {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_slug())
    }
}

#[derive(Debug, Error)]
#[error("unknown search engine: {0}")]
pub struct SearchEngineParseError(pub String);

impl FromStr for SearchEngine {
    type Err = SearchEngineParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "google.com" | "google" | "" => Ok(Self::GoogleCom),
            _ => Err(SearchEngineParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    #[default]
    Desktop,
    Mobile,
}

impl Device {
    pub fn as_slug(&self) -> &'static str {
        match self {
            Self::Desktop => "desktop",
            Self::Mobile => "mobile",
        }
    }
}

impl Display for Device {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_slug())
    }
}

#[derive(Debug, Error)]
#[error("unknown device: {0}")]
pub struct DeviceParseError(pub String);

impl FromStr for Device {
    type Err = DeviceParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "desktop" | "" => Ok(Self::Desktop),
            "mobile" => Ok(Self::Mobile),
            _ => Err(DeviceParseError(s.to_string())),
        }
    }
}

/// A tracked search phrase plus its derived ranking summary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Keyword {
    pub id: i64,
    pub keyword: String,
    pub target_url: Option<String>,
    pub search_engine: SearchEngine,
    pub location: String,
    pub device: Device,
    pub active: bool,
    pub last_position: Option<i64>,
    pub best_position: Option<i64>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Attributes shared by every keyword in one bulk ingestion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeywordBatch {
    #[serde(default)]
    pub target_url: Option<String>,
    #[serde(default)]
    pub search_engine: SearchEngine,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub device: Device,
}

impl KeywordBatch {
    /// Blank target URLs are stored as absent.
    pub fn normalized_target_url(&self) -> Option<String> {
        self.target_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordPage {
    pub keywords: Vec<Keyword>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
    pub total_pages: u32,
}

/// Folds a freshly observed position into the best-ever position.
///
/// Only positive ranks can improve the best; null and non-positive
/// observations leave it untouched.
pub fn fold_best_position(previous_best: Option<i64>, observed: Option<i64>) -> Option<i64> {
    match (previous_best, observed) {
        (None, Some(pos)) if pos > 0 => Some(pos),
        (Some(best), Some(pos)) if pos > 0 && pos < best => Some(pos),
        (best, _) => best,
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use crate::keywords::{fold_best_position, Device, KeywordBatch, SearchEngine};

    #[test]
    fn best_position_only_improves_on_positive_ranks() {
        assert_eq!(fold_best_position(None, Some(7)), Some(7));
        assert_eq!(fold_best_position(Some(7), Some(3)), Some(3));
        assert_eq!(fold_best_position(Some(3), Some(9)), Some(3));
        assert_eq!(fold_best_position(Some(3), None), Some(3));
        assert_eq!(fold_best_position(Some(3), Some(0)), Some(3));
        assert_eq!(fold_best_position(None, None), None);
        assert_eq!(fold_best_position(None, Some(-2)), None);
    }

    #[test]
    fn best_position_is_non_increasing_over_a_sequence() {
        let observed = [Some(12), None, Some(8), Some(15), Some(0), Some(4), None, Some(9)];
        let mut best = None;
        let mut history = Vec::new();
        for pos in observed {
            best = fold_best_position(best, pos);
            history.push(best);
        }
        for pair in history.windows(2) {
            if let (Some(before), Some(after)) = (pair[0], pair[1]) {
                assert!(after <= before);
            }
        }
        assert_eq!(best, Some(4));
    }

    #[test]
    fn parses_engine_and_device_slugs() {
        assert_eq!(SearchEngine::from_str("Google.com").unwrap(), SearchEngine::GoogleCom);
        assert!(SearchEngine::from_str("bing.com").is_err());
        assert_eq!(Device::from_str("mobile").unwrap(), Device::Mobile);
        assert!(Device::from_str("tablet").is_err());
    }

    #[test]
    fn blank_target_url_is_dropped() {
        let batch = KeywordBatch {
            target_url: Some("   ".to_string()),
            ..KeywordBatch::default()
        };
        assert_eq!(batch.normalized_target_url(), None);
    }
}
