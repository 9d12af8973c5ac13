use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::config::Config;
use crate::history::{summarize_history, RankObservation};
use crate::keywords::{parse_keyword_lines, Keyword, KeywordBatch, KeywordPage};
use crate::quota::QuotaStatus;
use crate::scheduler::{RunReport, Scheduler};

const DEFAULT_PER_PAGE: u32 = 100;
const MAX_PER_PAGE: u32 = 500;
const DEFAULT_HISTORY_LIMIT: usize = 365;

#[derive(Clone)]
struct ApiState {
    config: Arc<Config>,
    scheduler: Arc<Scheduler>,
}

#[derive(Debug, Serialize)]
struct ApiResponse<T: Serialize> {
    ok: bool,
    data: T,
}

#[derive(Debug, Serialize)]
struct ApiErrorBody {
    ok: bool,
    error: String,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(error: impl std::fmt::Display) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: error.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ApiErrorBody {
            ok: false,
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<ApiResponse<T>>, ApiError>;

#[derive(Debug, Deserialize, Default)]
struct PageQuery {
    page: Option<u32>,
    per_page: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct HistoryQuery {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct AddKeywordsRequest {
    text: String,
    #[serde(flatten)]
    batch: KeywordBatch,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize)]
struct AddKeywordsResponse {
    inserted: usize,
}

#[derive(Debug, Serialize)]
struct HistoryResponse {
    keyword: Keyword,
    summary: String,
    records: Vec<RankObservation>,
}

#[derive(Debug, Serialize)]
struct KeywordChangeResponse {
    id: i64,
    changed: bool,
}

pub async fn run_server(config: Config, bind: SocketAddr) -> Result<()> {
    let scheduler = Arc::new(Scheduler::open(&config)?);
    let interval_secs = config.scheduler.interval_secs;
    let ticker = (interval_secs > 0).then(|| spawn_ticker(scheduler.clone(), interval_secs));

    let app = router(config, scheduler);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("REST API listening on http://{bind}");
    let served = axum::serve(listener, app).await;
    if let Some(handle) = ticker {
        handle.abort();
    }
    served?;
    Ok(())
}

fn router(config: Config, scheduler: Arc<Scheduler>) -> Router {
    let state = ApiState {
        config: Arc::new(config),
        scheduler,
    };
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/v1/keywords", get(list_keywords).post(add_keywords))
        .route("/v1/keywords/:id", delete(delete_keyword))
        .route("/v1/keywords/:id/history", get(keyword_history))
        .route("/v1/keywords/:id/pause", post(pause_keyword))
        .route("/v1/keywords/:id/resume", post(resume_keyword))
        .route("/v1/run", post(trigger_run))
        .route("/v1/quota", get(quota))
        .route("/v1/config", get(show_config))
        .layer(cors)
        .with_state(state)
}

pub fn spawn_ticker(scheduler: Arc<Scheduler>, interval_secs: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            match scheduler.run().await {
                Ok(report) => info!(outcome = report.outcome.as_str(), "scheduled run finished"),
                Err(err) => warn!("scheduled run failed: {err:#}"),
            }
        }
    })
}

async fn health() -> Json<ApiResponse<HealthResponse>> {
    ok(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn show_config(State(state): State<ApiState>) -> Json<ApiResponse<Config>> {
    ok(state.config.redacted())
}

async fn list_keywords(
    State(state): State<ApiState>,
    Query(query): Query<PageQuery>,
) -> ApiResult<KeywordPage> {
    let page = query.page.unwrap_or(1).max(1);
    let per_page = query.per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE);
    let listing = state
        .scheduler
        .keywords()
        .list_page(page, per_page)
        .map_err(ApiError::internal)?;
    Ok(ok(listing))
}

async fn add_keywords(
    State(state): State<ApiState>,
    Json(request): Json<AddKeywordsRequest>,
) -> ApiResult<AddKeywordsResponse> {
    let lines = parse_keyword_lines(&request.text);
    if lines.is_empty() {
        return Err(ApiError::bad_request("no keywords in request text"));
    }
    let inserted = state
        .scheduler
        .keywords()
        .add_keywords(&lines, &request.batch, Utc::now())
        .map_err(ApiError::internal)?;
    info!(inserted, "keywords added via api");
    Ok(ok(AddKeywordsResponse { inserted }))
}

async fn keyword_history(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<HistoryResponse> {
    let keyword = state
        .scheduler
        .keywords()
        .get(id)
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found(format!("keyword {id} not found")))?;
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).max(1);
    let records = state
        .scheduler
        .history()
        .for_keyword(id, limit)
        .map_err(ApiError::internal)?;
    let summary = summarize_history(&records);
    Ok(ok(HistoryResponse {
        keyword,
        summary,
        records,
    }))
}

async fn pause_keyword(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> ApiResult<KeywordChangeResponse> {
    set_active(&state, id, false)
}

async fn resume_keyword(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> ApiResult<KeywordChangeResponse> {
    set_active(&state, id, true)
}

async fn delete_keyword(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> ApiResult<KeywordChangeResponse> {
    let changed = state
        .scheduler
        .keywords()
        .delete(id)
        .map_err(ApiError::internal)?;
    if !changed {
        return Err(ApiError::not_found(format!("keyword {id} not found")));
    }
    Ok(ok(KeywordChangeResponse { id, changed }))
}

async fn trigger_run(State(state): State<ApiState>) -> ApiResult<RunReport> {
    let report = state.scheduler.run().await.map_err(ApiError::internal)?;
    Ok(ok(report))
}

async fn quota(State(state): State<ApiState>) -> Json<ApiResponse<QuotaStatus>> {
    let scheduler = &state.scheduler;
    ok(scheduler.quota().status(scheduler.settings(), Utc::now()))
}

fn set_active(state: &ApiState, id: i64, active: bool) -> ApiResult<KeywordChangeResponse> {
    let changed = state
        .scheduler
        .keywords()
        .set_active(id, active)
        .map_err(ApiError::internal)?;
    if !changed {
        return Err(ApiError::not_found(format!("keyword {id} not found")));
    }
    Ok(ok(KeywordChangeResponse { id, changed }))
}

fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse { ok: true, data })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use crate::config::Config;
    use crate::providers::{
        PositionQuery, PositionResult, ProviderError, ProviderKind, RankProvider,
    };
    use crate::scheduler::Scheduler;
    use crate::server::router;

    struct FixedProvider;

    #[async_trait]
    impl RankProvider for FixedProvider {
        fn kind(&self) -> ProviderKind {
            ProviderKind::Custom
        }

        async fn fetch_position(
            &self,
            _query: &PositionQuery,
        ) -> Result<PositionResult, ProviderError> {
            Ok(PositionResult::found(4, "https://mysite.com/widget"))
        }
    }

    async fn spawn_api(dir: &tempfile::TempDir) -> String {
        let mut config = Config::default();
        config.storage.db_path = dir.path().join("tracker.db").display().to_string();
        config.tracker.provider = ProviderKind::Custom;
        config.tracker.api_key = "secret-token".to_string();
        config.tracker.custom_url = "http://127.0.0.1:9/rank".to_string();
        let scheduler = Scheduler::open(&config)
            .expect("open scheduler")
            .with_provider(Arc::new(FixedProvider));
        let app = router(config, Arc::new(scheduler));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn add_run_and_read_back_history() {
        let dir = tempfile::tempdir().expect("tempdir");
        let base = spawn_api(&dir).await;
        let client = reqwest::Client::new();

        let added: Value = client
            .post(format!("{base}/v1/keywords"))
            .json(&json!({ "text": "<b>widget</b>\r\n\r\n  gadget  ", "device": "mobile" }))
            .send()
            .await
            .expect("post keywords")
            .json()
            .await
            .expect("json");
        assert_eq!(added["data"]["inserted"], 2);

        let run: Value = client
            .post(format!("{base}/v1/run"))
            .send()
            .await
            .expect("post run")
            .json()
            .await
            .expect("json");
        assert_eq!(run["ok"], true);
        assert_eq!(run["data"]["outcome"], "completed");
        assert_eq!(run["data"]["succeeded"], 2);

        let listing: Value = client
            .get(format!("{base}/v1/keywords?per_page=1"))
            .send()
            .await
            .expect("list")
            .json()
            .await
            .expect("json");
        assert_eq!(listing["data"]["total"], 2);
        assert_eq!(listing["data"]["total_pages"], 2);
        let id = listing["data"]["keywords"][0]["id"].as_i64().expect("id");

        let history: Value = client
            .get(format!("{base}/v1/keywords/{id}/history"))
            .send()
            .await
            .expect("history")
            .json()
            .await
            .expect("json");
        assert_eq!(history["data"]["records"][0]["position"], 4);

        let quota: Value = client
            .get(format!("{base}/v1/quota"))
            .send()
            .await
            .expect("quota")
            .json()
            .await
            .expect("json");
        assert_eq!(quota["data"]["used"], 2);
    }

    #[tokio::test]
    async fn config_endpoint_redacts_credential() {
        let dir = tempfile::tempdir().expect("tempdir");
        let base = spawn_api(&dir).await;
        let body = reqwest::get(format!("{base}/v1/config"))
            .await
            .expect("config")
            .text()
            .await
            .expect("text");
        assert!(!body.contains("secret-token"));
    }

    #[tokio::test]
    async fn unknown_keyword_history_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let base = spawn_api(&dir).await;
        let response = reqwest::get(format!("{base}/v1/keywords/999/history"))
            .await
            .expect("history");
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
        let body: Value = response.json().await.expect("json");
        assert_eq!(body["ok"], false);
    }
}
