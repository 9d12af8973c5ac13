pub mod lease;
pub mod run;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::providers::ProviderKind;

pub use lease::{LeaseDecision, LeaseGuard, RunLease};
pub use run::Scheduler;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every selected keyword was processed.
    Completed,
    /// Processing stopped because the daily limit was reached mid-batch.
    QuotaReached,
    /// No budget left at the start of the run.
    QuotaExhausted,
    /// Nothing active to check.
    NothingToDo,
    /// Provider disabled or credential missing; nothing was touched.
    Misconfigured,
    /// Another run holds the lock.
    AlreadyRunning,
    /// Another run took the lease over mid-batch; the rest was left to it.
    LeaseLost,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::QuotaReached => "quota_reached",
            Self::QuotaExhausted => "quota_exhausted",
            Self::NothingToDo => "nothing_to_do",
            Self::Misconfigured => "misconfigured",
            Self::AlreadyRunning => "already_running",
            Self::LeaseLost => "lease_lost",
        }
    }
}

/// Summary of one scheduler pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub provider: ProviderKind,
    pub message: Option<String>,
    pub selected: usize,
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub persistence_failures: u64,
    pub daily_limit: u64,
    pub quota_used_before: u64,
    pub quota_used_after: u64,
    pub pruned: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn start(provider: ProviderKind, daily_limit: u64, started_at: DateTime<Utc>) -> Self {
        Self {
            outcome: RunOutcome::Completed,
            provider,
            message: None,
            selected: 0,
            attempted: 0,
            succeeded: 0,
            failed: 0,
            persistence_failures: 0,
            daily_limit,
            quota_used_before: 0,
            quota_used_after: 0,
            pruned: 0,
            started_at,
            finished_at: started_at,
        }
    }

    pub fn finish(mut self, outcome: RunOutcome, message: Option<String>) -> Self {
        self.outcome = outcome;
        self.message = message;
        self.finished_at = Utc::now().max(self.started_at);
        self
    }
}
