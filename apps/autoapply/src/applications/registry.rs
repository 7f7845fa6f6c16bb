use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::models::SessionStatus;
use crate::orchestrator::ApplicationOutcome;

struct RunEntry {
    job_url: String,
    job_id: String,
    started_at: DateTime<Utc>,
    status: watch::Receiver<SessionStatus>,
    cancel: CancellationToken,
    outcome: Option<ApplicationOutcome>,
    error: Option<String>,
    finished_at: Option<DateTime<Utc>>,
}

/// Point-in-time view of one run, as returned by the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct RunView {
    pub session_id: Uuid,
    pub job_url: String,
    pub job_id: String,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ApplicationOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Runs started through the HTTP API, held in memory. Finished runs are
/// dropped once they are older than the retention window.
#[derive(Clone)]
pub struct RunRegistry {
    runs: Arc<Mutex<HashMap<Uuid, RunEntry>>>,
    retention: Duration,
}

impl Default for RunRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

impl RunRegistry {
    pub fn new(retention: Duration) -> Self {
        Self {
            runs: Arc::default(),
            retention,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, RunEntry>> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(
        &self,
        session_id: Uuid,
        job_url: &str,
        job_id: &str,
        status: watch::Receiver<SessionStatus>,
        cancel: CancellationToken,
    ) {
        let mut runs = self.lock();
        self.evict_expired(&mut runs, Utc::now());
        runs.insert(
            session_id,
            RunEntry {
                job_url: job_url.to_string(),
                job_id: job_id.to_string(),
                started_at: Utc::now(),
                status,
                cancel,
                outcome: None,
                error: None,
                finished_at: None,
            },
        );
    }

    fn evict_expired(&self, runs: &mut HashMap<Uuid, RunEntry>, now: DateTime<Utc>) {
        let Ok(retention) = chrono::Duration::from_std(self.retention) else {
            return;
        };
        let before = runs.len();
        runs.retain(|_, entry| entry.finished_at.map_or(true, |at| now - at < retention));
        if runs.len() < before {
            debug!("Evicted {} finished runs", before - runs.len());
        }
    }

    /// Stores how the run ended. `Err` means no artifact could be written.
    pub fn finish(&self, session_id: Uuid, result: Result<ApplicationOutcome, String>) {
        if let Some(entry) = self.lock().get_mut(&session_id) {
            entry.finished_at = Some(Utc::now());
            match result {
                Ok(outcome) => entry.outcome = Some(outcome),
                Err(message) => entry.error = Some(message),
            }
        }
    }

    pub fn view(&self, session_id: Uuid) -> Option<RunView> {
        let runs = self.lock();
        let entry = runs.get(&session_id)?;
        let status = match (&entry.outcome, &entry.error) {
            (Some(outcome), _) if outcome.applied => SessionStatus::Applied,
            (Some(_), _) | (None, Some(_)) => SessionStatus::Failed,
            (None, None) => *entry.status.borrow(),
        };
        Some(RunView {
            session_id,
            job_url: entry.job_url.clone(),
            job_id: entry.job_id.clone(),
            status,
            started_at: entry.started_at,
            outcome: entry.outcome.clone(),
            error: entry.error.clone(),
        })
    }

    pub fn job_id(&self, session_id: Uuid) -> Option<String> {
        self.lock().get(&session_id).map(|e| e.job_id.clone())
    }

    /// `None` for unknown ids, `Some(false)` when the run already ended.
    pub fn cancel(&self, session_id: Uuid) -> Option<bool> {
        let runs = self.lock();
        let entry = runs.get(&session_id)?;
        if entry.outcome.is_some() || entry.error.is_some() || entry.status.borrow().is_terminal() {
            return Some(false);
        }
        entry.cancel.cancel();
        Some(true)
    }
}
