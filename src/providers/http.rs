use std::time::Duration;

use reqwest::{Client, Response};
use serde_json::Value;
use url::Url;

use crate::providers::ProviderError;

/// Upper bound on a single provider call; keeps one run's duration bounded.
pub const PROVIDER_TIMEOUT_SECS: u64 = 30;
const CONNECT_TIMEOUT_SECS: u64 = 10;

pub fn build_client() -> Result<Client, ProviderError> {
    let client = Client::builder()
        .user_agent(concat!("rank-tracker/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(PROVIDER_TIMEOUT_SECS))
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .build()?;
    Ok(client)
}

/// Reads a provider response: non-2xx statuses and bodies that are not a
/// JSON object are `BadResponse`.
pub async fn read_json_object(response: Response) -> Result<Value, ProviderError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        let preview: String = body.chars().take(180).collect();
        return Err(ProviderError::BadResponse(format!(
            "status {status}: {preview}"
        )));
    }
    let value: Value = serde_json::from_str(&body)
        .map_err(|e| ProviderError::BadResponse(format!("invalid JSON body: {e}")))?;
    if !value.is_object() {
        return Err(ProviderError::BadResponse(
            "response body is not a JSON object".to_string(),
        ));
    }
    Ok(value)
}

/// Host of a URL, lowercased. Scheme-less input such as `example.com/page`
/// is read as https.
pub fn host_of(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let parsed = Url::parse(trimmed).or_else(|_| Url::parse(&format!("https://{trimmed}")));
    parsed
        .ok()?
        .host_str()
        .filter(|host| !host.is_empty())
        .map(|host| host.to_ascii_lowercase())
}

/// Substring match: `sub.target.com` matches the wanted host `target.com`.
pub fn host_matches(link: &str, wanted_host: &str) -> bool {
    match host_of(link) {
        Some(link_host) => link_host.contains(&wanted_host.to_ascii_lowercase()),
        None => false,
    }
}

/// Integer from a JSON number or numeric string.
pub fn as_position(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::providers::http::{as_position, host_matches, host_of};

    #[test]
    fn extracts_hosts_with_and_without_scheme() {
        assert_eq!(host_of("https://Target.com/page?q=1").as_deref(), Some("target.com"));
        assert_eq!(host_of("target.com/page").as_deref(), Some("target.com"));
        assert_eq!(host_of("   "), None);
    }

    #[test]
    fn host_match_is_substring_based() {
        assert!(host_matches("https://sub.target.com/x", "target.com"));
        assert!(host_matches("https://target.com", "target.com"));
        assert!(!host_matches("https://other.com/target.com", "target.com"));
    }

    #[test]
    fn positions_accept_numbers_and_numeric_strings() {
        assert_eq!(as_position(&json!(4)), Some(4));
        assert_eq!(as_position(&json!("7")), Some(7));
        assert_eq!(as_position(&json!(null)), None);
        assert_eq!(as_position(&json!("n/a")), None);
    }
}
