pub mod custom;
pub mod disabled;
pub mod http;
pub mod serpapi;

use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::TrackerConfig;
use crate::keywords::{Device, Keyword, SearchEngine};
use crate::providers::custom::CustomEndpointProvider;
use crate::providers::disabled::DisabledProvider;
use crate::providers::serpapi::SerpApiProvider;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum ProviderKind {
    #[default]
    #[serde(rename = "none")]
    Disabled,
    #[serde(rename = "serpapi")]
    SerpApi,
    #[serde(rename = "custom")]
    Custom,
}

impl ProviderKind {
    pub fn as_slug(&self) -> &'static str {
        match self {
            Self::Disabled => "none",
            Self::SerpApi => "serpapi",
            Self::Custom => "custom",
        }
    }
}

impl Display for ProviderKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let display = match self {
            Self::Disabled => "Disabled",
            Self::SerpApi => "SerpAPI (Google)",
            Self::Custom => "Custom JSON endpoint",
        };
        write!(f, "{display}")
    }
}

#[derive(Debug, Error)]
#[error("unknown rank provider: {0}")]
pub struct ProviderParseError(pub String);

impl FromStr for ProviderKind {
    type Err = ProviderParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "disabled" | "" => Ok(Self::Disabled),
            "serpapi" => Ok(Self::SerpApi),
            "custom" => Ok(Self::Custom),
            _ => Err(ProviderParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("rank provider not configured: {0}")]
    NotConfigured(String),
    #[error("provider request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("provider returned an unexpected response: {0}")]
    BadResponse(String),
    #[error("provider reported an error: {0}")]
    ProviderReported(String),
}

/// Everything a provider needs to locate one keyword in the results.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PositionQuery {
    pub keyword: String,
    pub target_url: Option<String>,
    pub search_engine: SearchEngine,
    /// Empty means the provider's configured default location.
    pub location: String,
    pub device: Device,
    /// Site host used for matching when no target URL is set.
    pub fallback_host: Option<String>,
}

impl PositionQuery {
    pub fn for_keyword(keyword: &Keyword, fallback_host: Option<&str>) -> Self {
        Self {
            keyword: keyword.keyword.clone(),
            target_url: keyword.target_url.clone(),
            search_engine: keyword.search_engine,
            location: keyword.location.trim().to_string(),
            device: keyword.device,
            fallback_host: fallback_host.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PositionResult {
    /// `None` when the target was not found in the results.
    pub position: Option<i64>,
    pub matched_url: String,
}

impl PositionResult {
    pub fn found(position: i64, matched_url: impl Into<String>) -> Self {
        Self {
            position: Some(position),
            matched_url: matched_url.into(),
        }
    }

    pub fn not_found() -> Self {
        Self::default()
    }
}

#[async_trait]
pub trait RankProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;
    async fn fetch_position(&self, query: &PositionQuery) -> Result<PositionResult, ProviderError>;
}

/// Extension point consulted before the configured provider. Returning
/// `Some` skips the provider entirely.
pub trait PositionOverride: Send + Sync {
    fn override_position(
        &self,
        settings: &TrackerConfig,
        query: &PositionQuery,
    ) -> Option<PositionResult>;
}

impl<F> PositionOverride for F
where
    F: Fn(&TrackerConfig, &PositionQuery) -> Option<PositionResult> + Send + Sync,
{
    fn override_position(
        &self,
        settings: &TrackerConfig,
        query: &PositionQuery,
    ) -> Option<PositionResult> {
        self(settings, query)
    }
}

/// Builds the built-in provider for the configured kind.
pub fn select_provider(settings: &TrackerConfig) -> Result<Arc<dyn RankProvider>, ProviderError> {
    let provider: Arc<dyn RankProvider> = match settings.provider {
        ProviderKind::Disabled => Arc::new(DisabledProvider),
        ProviderKind::SerpApi => Arc::new(SerpApiProvider::new(settings)?),
        ProviderKind::Custom => Arc::new(CustomEndpointProvider::new(settings)?),
    };
    Ok(provider)
}

/// The provider chosen for one run, fronted by the optional override hook.
#[derive(Clone)]
pub struct ProviderAdapter {
    settings: TrackerConfig,
    provider: Arc<dyn RankProvider>,
    override_hook: Option<Arc<dyn PositionOverride>>,
}

impl ProviderAdapter {
    pub fn from_settings(settings: &TrackerConfig) -> Result<Self, ProviderError> {
        Ok(Self::with_provider(settings, select_provider(settings)?))
    }

    pub fn with_provider(settings: &TrackerConfig, provider: Arc<dyn RankProvider>) -> Self {
        Self {
            settings: settings.clone(),
            provider,
            override_hook: None,
        }
    }

    pub fn with_override(mut self, hook: Option<Arc<dyn PositionOverride>>) -> Self {
        self.override_hook = hook;
        self
    }

    pub fn kind(&self) -> ProviderKind {
        self.provider.kind()
    }

    pub async fn fetch_position(
        &self,
        query: &PositionQuery,
    ) -> Result<PositionResult, ProviderError> {
        if let Some(hook) = &self.override_hook {
            if let Some(result) = hook.override_position(&self.settings, query) {
                return Ok(result);
            }
        }
        self.provider.fetch_position(query).await
    }
}
