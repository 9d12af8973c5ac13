use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{Config, TrackerConfig};
use crate::history::{retention_cutoff, HistoryStore, NewObservation};
use crate::keywords::{fold_best_position, Keyword, KeywordStore};
use crate::providers::{
    PositionOverride, PositionQuery, PositionResult, ProviderAdapter, ProviderKind, RankProvider,
};
use crate::quota::{QuotaTracker, SqliteCounterStore};
use crate::scheduler::lease::{LeaseDecision, LeaseGuard, RunLease};
use crate::scheduler::{RunOutcome, RunReport};

const MIN_LEASE_TTL_SECS: i64 = 60;
const MAX_LEASE_TTL_SECS: i64 = 7 * 24 * 3600;

/// Selects due keywords, checks them against the provider under the daily
/// quota, records the results and prunes expired history.
///
/// Holds no state between runs besides the stores it writes to.
pub struct Scheduler {
    settings: TrackerConfig,
    fallback_host: Option<String>,
    keywords: Arc<KeywordStore>,
    history: Arc<HistoryStore>,
    quota: QuotaTracker,
    lease: Option<Arc<RunLease>>,
    provider: Option<Arc<dyn RankProvider>>,
    override_hook: Option<Arc<dyn PositionOverride>>,
    running: Mutex<()>,
}

impl Scheduler {
    pub fn new(
        settings: TrackerConfig,
        keywords: Arc<KeywordStore>,
        history: Arc<HistoryStore>,
        quota: QuotaTracker,
    ) -> Self {
        Self {
            settings,
            fallback_host: None,
            keywords,
            history,
            quota,
            lease: None,
            provider: None,
            override_hook: None,
            running: Mutex::new(()),
        }
    }

    /// Opens every store on the configured database and wires the
    /// cross-process run lease.
    pub fn open(config: &Config) -> Result<Self> {
        let db_path = config.resolved_db_path();
        let keywords = Arc::new(KeywordStore::open(&db_path)?);
        let history = Arc::new(HistoryStore::open(&db_path)?);
        let counters = Arc::new(SqliteCounterStore::open(&db_path)?);
        let ttl_secs = i64::try_from(config.scheduler.lease_ttl_secs)
            .unwrap_or(MAX_LEASE_TTL_SECS)
            .clamp(MIN_LEASE_TTL_SECS, MAX_LEASE_TTL_SECS);
        let lease = Arc::new(
            RunLease::open(&db_path, Duration::seconds(ttl_secs))
                .context("failed opening scheduler lease")?,
        );
        Ok(Self::new(
            config.tracker.clone(),
            keywords,
            history,
            QuotaTracker::new(counters),
        )
        .with_fallback_host(config.site.fallback_host())
        .with_lease(lease))
    }

    pub fn with_fallback_host(mut self, host: Option<String>) -> Self {
        self.fallback_host = host;
        self
    }

    pub fn with_lease(mut self, lease: Arc<RunLease>) -> Self {
        self.lease = Some(lease);
        self
    }

    /// Replaces the provider that would otherwise be built from settings.
    pub fn with_provider(mut self, provider: Arc<dyn RankProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_override(mut self, hook: Arc<dyn PositionOverride>) -> Self {
        self.override_hook = Some(hook);
        self
    }

    pub fn settings(&self) -> &TrackerConfig {
        &self.settings
    }

    pub fn keywords(&self) -> &Arc<KeywordStore> {
        &self.keywords
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    pub fn quota(&self) -> &QuotaTracker {
        &self.quota
    }

    pub async fn run(&self) -> Result<RunReport> {
        self.run_at(Utc::now()).await
    }

    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<RunReport> {
        let daily_limit = u64::from(self.settings.daily_limit);
        let mut report = RunReport::start(self.settings.provider, daily_limit, now);

        if let Some(reason) = self.misconfiguration() {
            debug!("scheduler run skipped: {reason}");
            return Ok(report.finish(RunOutcome::Misconfigured, Some(reason)));
        }

        let Ok(_running) = self.running.try_lock() else {
            info!("scheduler run already in progress in this process");
            return Ok(report.finish(
                RunOutcome::AlreadyRunning,
                Some("a run is already in progress".to_string()),
            ));
        };
        let _lease_guard = match &self.lease {
            Some(lease) => match lease.try_acquire(now).context("failed acquiring run lease")? {
                LeaseDecision::Acquired { .. } => Some(LeaseGuard::new(lease)),
                LeaseDecision::Held { holder, expires_at } => {
                    info!(%holder, %expires_at, "scheduler lease held elsewhere, skipping run");
                    return Ok(report.finish(
                        RunOutcome::AlreadyRunning,
                        Some(format!("lease held by {holder} until {expires_at}")),
                    ));
                }
            },
            None => None,
        };

        let adapter = match self.build_adapter() {
            Ok(adapter) => adapter,
            Err(reason) => {
                warn!("rank provider unavailable: {reason}");
                return Ok(report.finish(RunOutcome::Misconfigured, Some(reason)));
            }
        };

        let used_before = self.quota.used_on(now);
        report.quota_used_before = used_before;
        report.quota_used_after = used_before;
        let remaining = self.quota.remaining(&self.settings, now);
        let limit = remaining.min(u64::from(self.settings.effective_batch_size()));
        if limit == 0 {
            info!(used_before, daily_limit, "daily rank check quota exhausted");
            return Ok(report.finish(RunOutcome::QuotaExhausted, None));
        }

        let limit = u32::try_from(limit).unwrap_or(u32::MAX);
        let selected = self
            .keywords
            .select_due(limit)
            .context("failed selecting keywords due for a check")?;
        report.selected = selected.len();
        if selected.is_empty() {
            debug!("no active keywords to check");
            return Ok(report.finish(RunOutcome::NothingToDo, None));
        }

        let today = now.date_naive();
        let started = Instant::now();
        let mut lease_lost = false;
        for keyword in &selected {
            if !self.renew_lease(run_clock(now, started)) {
                lease_lost = true;
                break;
            }
            if self.quota.remaining(&self.settings, now) == 0 {
                break;
            }
            // Recorded before the call so an interrupted run still leaves its usage behind.
            report.quota_used_after = match self.quota.consume(1, now) {
                Ok(total) => total,
                Err(err) => {
                    warn!(keyword_id = keyword.id, "failed recording quota usage: {err:#}");
                    report.quota_used_after + 1
                }
            };
            report.attempted += 1;

            let query = PositionQuery::for_keyword(keyword, self.fallback_host.as_deref());
            let fetched = adapter.fetch_position(&query).await;
            if !self.renew_lease(run_clock(now, started)) {
                warn!(
                    keyword_id = keyword.id,
                    "scheduler lease lost during lookup, discarding result"
                );
                report.failed += 1;
                lease_lost = true;
                break;
            }
            match fetched {
                Ok(result) => {
                    report.succeeded += 1;
                    report.persistence_failures += self.record_result(keyword, &result, today, now);
                }
                Err(err) => {
                    report.failed += 1;
                    warn!(
                        keyword_id = keyword.id,
                        keyword = %keyword.keyword,
                        "rank lookup failed: {err}"
                    );
                }
            }
        }

        if lease_lost {
            return Ok(report.finish(
                RunOutcome::LeaseLost,
                Some("scheduler lease taken over by another run".to_string()),
            ));
        }

        match self.history.prune_before(retention_cutoff(now)) {
            Ok(pruned) => {
                report.pruned = pruned;
                if pruned > 0 {
                    info!(pruned, "pruned expired rank history");
                }
            }
            Err(err) => warn!("failed pruning rank history: {err:#}"),
        }
        if let Err(err) = self.quota.expire_stale(now) {
            debug!("failed expiring stale quota counters: {err:#}");
        }

        let outcome = if report.quota_used_after >= daily_limit {
            RunOutcome::QuotaReached
        } else {
            RunOutcome::Completed
        };
        let report = report.finish(outcome, None);
        info!(
            outcome = report.outcome.as_str(),
            selected = report.selected,
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed,
            quota_used = report.quota_used_after,
            daily_limit,
            "rank tracker run finished"
        );
        Ok(report)
    }

    /// Extends the lease for this run. `false` once another run owns it.
    fn renew_lease(&self, at: DateTime<Utc>) -> bool {
        let Some(lease) = &self.lease else {
            return true;
        };
        match lease.renew(at) {
            Ok(true) => true,
            Ok(false) => {
                warn!(holder = lease.holder(), "scheduler lease taken over by another run");
                false
            }
            Err(err) => {
                warn!("failed renewing scheduler lease: {err:#}");
                false
            }
        }
    }

    fn misconfiguration(&self) -> Option<String> {
        if self.settings.provider == ProviderKind::Disabled {
            return Some("rank provider is disabled".to_string());
        }
        if !self.settings.has_credential() {
            return Some("no provider credential configured".to_string());
        }
        None
    }

    fn build_adapter(&self) -> std::result::Result<ProviderAdapter, String> {
        let adapter = match &self.provider {
            Some(provider) => ProviderAdapter::with_provider(&self.settings, provider.clone()),
            None => ProviderAdapter::from_settings(&self.settings).map_err(|e| e.to_string())?,
        };
        Ok(adapter.with_override(self.override_hook.clone()))
    }

    /// Appends the observation and folds it into the keyword summary.
    /// Returns the number of writes that failed.
    fn record_result(
        &self,
        keyword: &Keyword,
        result: &PositionResult,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> u64 {
        let mut failures = 0;
        let observation = NewObservation {
            keyword_id: keyword.id,
            checked_date: today,
            position: result.position,
            url_found: result.matched_url.clone(),
        };
        if let Err(err) = self.history.append(&observation) {
            failures += 1;
            warn!(keyword_id = keyword.id, "failed writing rank observation: {err:#}");
        }

        let best = fold_best_position(keyword.best_position, result.position);
        if let Err(err) = self
            .keywords
            .record_check(keyword.id, result.position, best, now)
        {
            failures += 1;
            warn!(keyword_id = keyword.id, "failed updating keyword summary: {err:#}");
        }
        failures
    }
}

fn run_clock(now: DateTime<Utc>, started: Instant) -> DateTime<Utc> {
    now + Duration::from_std(started.elapsed()).unwrap_or_else(|_| Duration::zero())
}
