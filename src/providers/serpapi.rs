use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::TrackerConfig;
use crate::providers::http::{as_position, build_client, host_matches, host_of, read_json_object};
use crate::providers::{PositionQuery, PositionResult, ProviderError, ProviderKind, RankProvider};

pub const SERPAPI_ENDPOINT: &str = "https://serpapi.com/search.json";
/// Results requested per query; positions beyond this count as "not found".
pub const RESULT_DEPTH: u32 = 100;

/// One organic search result, in provider rank order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrganicResult {
    pub position: i64,
    pub link: String,
}

/// Hosted SERP provider backed by SerpAPI's Google engine.
pub struct SerpApiProvider {
    client: Client,
    endpoint: String,
    api_key: String,
    location: String,
    language: String,
}

impl SerpApiProvider {
    pub fn new(settings: &TrackerConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            client: build_client()?,
            endpoint: SERPAPI_ENDPOINT.to_string(),
            api_key: settings.api_key.trim().to_string(),
            location: settings.location.trim().to_string(),
            language: settings.language.trim().to_string(),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn query_params(&self, query: &PositionQuery) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("engine", "google".to_string()),
            ("q", query.keyword.clone()),
            ("num", RESULT_DEPTH.to_string()),
            ("api_key", self.api_key.clone()),
            ("google_domain", query.search_engine.as_slug().to_string()),
            ("device", query.device.as_slug().to_string()),
        ];
        let location = if query.location.is_empty() {
            self.location.as_str()
        } else {
            query.location.as_str()
        };
        if !location.is_empty() {
            params.push(("location", location.to_string()));
        }
        if !self.language.is_empty() {
            params.push(("hl", self.language.clone()));
        }
        params
    }
}

#[async_trait]
impl RankProvider for SerpApiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::SerpApi
    }

    async fn fetch_position(&self, query: &PositionQuery) -> Result<PositionResult, ProviderError> {
        if self.api_key.is_empty() {
            return Err(ProviderError::NotConfigured(
                "SerpAPI API key is missing".to_string(),
            ));
        }
        let response = self
            .client
            .get(&self.endpoint)
            .query(&self.query_params(query))
            .send()
            .await?;
        let body = read_json_object(response).await?;
        let results = parse_organic_results(&body)?;
        debug!(
            keyword = %query.keyword,
            results = results.len(),
            "serpapi returned organic results"
        );
        Ok(select_organic_result(
            &results,
            query.target_url.as_deref(),
            query.fallback_host.as_deref(),
        ))
    }
}

/// Pulls the organic results out of a SerpAPI body. A string `error` field is
/// a provider-reported failure; a missing result list is simply empty.
/// Entries without a positive position or a link are skipped.
pub fn parse_organic_results(body: &Value) -> Result<Vec<OrganicResult>, ProviderError> {
    if let Some(message) = body.get("error").and_then(Value::as_str) {
        return Err(ProviderError::ProviderReported(message.to_string()));
    }
    let Some(entries) = body.get("organic_results").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };
    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        let Some(position) = entry.get("position").and_then(as_position) else {
            continue;
        };
        let Some(link) = entry.get("link").and_then(Value::as_str) else {
            continue;
        };
        if position <= 0 || link.trim().is_empty() {
            continue;
        }
        out.push(OrganicResult {
            position,
            link: link.to_string(),
        });
    }
    Ok(out)
}

/// Picks the ranking for the keyword out of ordered organic results.
///
/// With a target URL, the first result whose host contains the target host
/// wins and no match means "not found". Without one, the site's fallback host
/// is tried the same way, and failing that the top organic result is reported.
pub fn select_organic_result(
    results: &[OrganicResult],
    target_url: Option<&str>,
    fallback_host: Option<&str>,
) -> PositionResult {
    let Some(first) = results.first() else {
        return PositionResult::not_found();
    };

    let first_match = |host: &str| {
        results
            .iter()
            .find(|result| host_matches(&result.link, host))
            .map(|result| PositionResult::found(result.position, result.link.clone()))
    };

    if let Some(target_host) = target_url.and_then(host_of) {
        return first_match(target_host.as_str()).unwrap_or_else(PositionResult::not_found);
    }

    let fallback = fallback_host
        .map(str::trim)
        .filter(|host| !host.is_empty())
        .and_then(first_match);
    fallback.unwrap_or_else(|| PositionResult::found(first.position, first.link.clone()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::config::TrackerConfig;
    use crate::keywords::{Device, SearchEngine};
    use crate::providers::serpapi::{
        parse_organic_results, select_organic_result, OrganicResult, SerpApiProvider,
    };
    use crate::providers::{PositionQuery, PositionResult, ProviderError, ProviderKind, RankProvider};

    fn organic(position: i64, link: &str) -> OrganicResult {
        OrganicResult {
            position,
            link: link.to_string(),
        }
    }

    fn settings() -> TrackerConfig {
        TrackerConfig {
            provider: ProviderKind::SerpApi,
            api_key: "serp-key".to_string(),
            location: "United States".to_string(),
            ..TrackerConfig::default()
        }
    }

    fn query(target_url: Option<&str>) -> PositionQuery {
        PositionQuery {
            keyword: "widget".to_string(),
            target_url: target_url.map(str::to_string),
            search_engine: SearchEngine::GoogleCom,
            location: String::new(),
            device: Device::Desktop,
            fallback_host: None,
        }
    }

    #[test]
    fn target_host_matches_subdomains_in_rank_order() {
        let results = vec![
            organic(1, "https://other.com"),
            organic(2, "https://sub.target.com/x"),
            organic(3, "https://target.com/y"),
        ];
        let picked = select_organic_result(&results, Some("https://target.com"), None);
        assert_eq!(picked, PositionResult::found(2, "https://sub.target.com/x"));
    }

    #[test]
    fn missing_target_is_not_found() {
        let results = vec![organic(1, "https://other.com")];
        let picked = select_organic_result(&results, Some("https://target.com"), Some("other.com"));
        assert_eq!(picked, PositionResult::not_found());
    }

    #[test]
    fn fallback_host_is_used_without_target() {
        let results = vec![organic(1, "https://other.com"), organic(4, "https://mysite.com/a")];
        let picked = select_organic_result(&results, None, Some("mysite.com"));
        assert_eq!(picked, PositionResult::found(4, "https://mysite.com/a"));
    }

    #[test]
    fn no_target_and_no_fallback_match_reports_top_result() {
        let results = vec![organic(1, "https://other.com"), organic(2, "https://else.com")];
        assert_eq!(
            select_organic_result(&results, None, Some("mysite.com")),
            PositionResult::found(1, "https://other.com")
        );
        assert_eq!(
            select_organic_result(&results, None, None),
            PositionResult::found(1, "https://other.com")
        );
    }

    #[test]
    fn empty_results_are_not_found() {
        assert_eq!(
            select_organic_result(&[], None, None),
            PositionResult::not_found()
        );
    }

    #[test]
    fn error_field_is_provider_reported() {
        let body = json!({ "error": "Invalid API key." });
        match parse_organic_results(&body) {
            Err(ProviderError::ProviderReported(message)) => assert_eq!(message, "Invalid API key."),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn skips_entries_without_position_or_link() {
        let body = json!({
            "organic_results": [
                { "position": 1 },
                { "link": "https://nolink.com" },
                { "position": "3", "link": "https://three.com" },
                { "position": 0, "link": "https://zero.com" }
            ]
        });
        let parsed = parse_organic_results(&body).unwrap();
        assert_eq!(parsed, vec![organic(3, "https://three.com")]);
    }

    #[tokio::test]
    async fn fetches_and_matches_against_live_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("q", "widget"))
            .and(query_param("num", "100"))
            .and(query_param("api_key", "serp-key"))
            .and(query_param("location", "United States"))
            .and(query_param("hl", "en"))
            .and(query_param("device", "desktop"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "organic_results": [
                    { "position": 1, "link": "https://other.com" },
                    { "position": 2, "link": "https://sub.target.com/x" }
                ]
            })))
            .mount(&server)
            .await;

        let provider = SerpApiProvider::new(&settings())
            .unwrap()
            .with_endpoint(format!("{}/search.json", server.uri()));
        let result = provider
            .fetch_position(&query(Some("https://target.com")))
            .await
            .unwrap();
        assert_eq!(result, PositionResult::found(2, "https://sub.target.com/x"));
    }

    #[tokio::test]
    async fn keyword_location_and_device_override_defaults() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("location", "Austin, Texas"))
            .and(query_param("device", "mobile"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "organic_results": [{ "position": 7, "link": "https://target.com/" }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = SerpApiProvider::new(&settings())
            .unwrap()
            .with_endpoint(server.uri());
        let mut query = query(Some("https://target.com"));
        query.location = "Austin, Texas".to_string();
        query.device = Device::Mobile;
        let result = provider.fetch_position(&query).await.unwrap();
        assert_eq!(result, PositionResult::found(7, "https://target.com/"));
    }

    #[tokio::test]
    async fn non_success_status_is_bad_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&server)
            .await;

        let provider = SerpApiProvider::new(&settings())
            .unwrap()
            .with_endpoint(server.uri());
        let err = provider.fetch_position(&query(None)).await.unwrap_err();
        assert!(matches!(err, ProviderError::BadResponse(_)));
    }

    #[tokio::test]
    async fn missing_key_is_not_configured() {
        let mut settings = settings();
        settings.api_key.clear();
        let provider = SerpApiProvider::new(&settings).unwrap();
        let err = provider.fetch_position(&query(None)).await.unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }
}
