use async_trait::async_trait;

use crate::providers::{PositionQuery, PositionResult, ProviderError, ProviderKind, RankProvider};

/// Placeholder for `provider = "none"`. The scheduler stops before reaching
/// it; direct callers get `NotConfigured`.
#[derive(Debug, Clone, Copy)]
pub struct DisabledProvider;

#[async_trait]
impl RankProvider for DisabledProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Disabled
    }

    async fn fetch_position(&self, _query: &PositionQuery) -> Result<PositionResult, ProviderError> {
        Err(ProviderError::NotConfigured(
            "rank provider is disabled".to_string(),
        ))
    }
}
