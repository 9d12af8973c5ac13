use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;

use crate::config::TrackerConfig;
use crate::providers::http::{as_position, build_client, read_json_object};
use crate::providers::{PositionQuery, PositionResult, ProviderError, ProviderKind, RankProvider};

/// Header carrying the shared secret (the configured API key).
pub const TOKEN_HEADER: &str = "X-Tracker-Token";

#[derive(Debug, Serialize)]
struct CustomRequest<'a> {
    keyword: &'a str,
    target_url: &'a str,
    search_engine: &'a str,
    location: &'a str,
    device: &'a str,
    host: Option<&'a str>,
}

/// Operator-hosted JSON endpoint answering `{"position": n, "url_found": "..."}`.
pub struct CustomEndpointProvider {
    client: Client,
    url: String,
    token: String,
}

impl CustomEndpointProvider {
    pub fn new(settings: &TrackerConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            client: build_client()?,
            url: settings.custom_url.trim().to_string(),
            token: settings.api_key.clone(),
        })
    }
}

#[async_trait]
impl RankProvider for CustomEndpointProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Custom
    }

    async fn fetch_position(&self, query: &PositionQuery) -> Result<PositionResult, ProviderError> {
        if self.url.is_empty() {
            return Err(ProviderError::NotConfigured(
                "custom rank endpoint URL is not configured".to_string(),
            ));
        }
        let request = CustomRequest {
            keyword: &query.keyword,
            target_url: query.target_url.as_deref().unwrap_or_default(),
            search_engine: query.search_engine.as_slug(),
            location: &query.location,
            device: query.device.as_slug(),
            host: query.fallback_host.as_deref(),
        };
        let response = self
            .client
            .post(&self.url)
            .header(TOKEN_HEADER, &self.token)
            .json(&request)
            .send()
            .await?;
        let body = read_json_object(response).await?;
        Ok(parse_custom_response(&body))
    }
}

/// `position` may be absent or null (not found); `url_found` defaults to "".
pub fn parse_custom_response(body: &Value) -> PositionResult {
    PositionResult {
        position: body.get("position").and_then(as_position),
        matched_url: body
            .get("url_found")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    }
}
