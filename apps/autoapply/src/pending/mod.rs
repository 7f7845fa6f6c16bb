//! Pending questions: persisted for the candidate, waited on, and turned back
//! into answers when they arrive.
//!
//! Artifacts live in `<root>/<job_id>/<session_id>/`:
//!   pending_questions.md    human-readable questions plus the template
//!   pending_questions.json  the same questions, machine-readable
//!   answers.json            flat `field_id -> answer`, filled in place

pub mod feed;
pub mod interpret;
pub mod render;

use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{AnswerSource, PendingQuestion, ResolvedAnswer};
use feed::{read_answers, write_answers, AnswerFeed, FileAnswerFeed};
use interpret::{interpret, Interpretation};
use render::{markdown, PendingDocument, PendingStatus};

pub const MARKDOWN_FILE: &str = "pending_questions.md";
pub const JSON_FILE: &str = "pending_questions.json";
pub const ANSWERS_FILE: &str = "answers.json";

#[derive(Debug, Clone)]
pub struct PendingConfig {
    pub root: PathBuf,
    pub poll_interval: Duration,
    /// Total time a session may spend waiting. `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

#[derive(Debug, Error)]
pub enum PendingError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum WaitError {
    #[error("wait cancelled")]
    Cancelled,

    #[error("no complete answers after {0:?}")]
    TimedOut(Duration),

    #[error(transparent)]
    Feed(#[from] PendingError),
}

/// Answers taken from the feed, and the questions still open afterwards.
#[derive(Debug, Clone, Default)]
pub struct ResumeOutcome {
    pub answers: Vec<ResolvedAnswer>,
    pub still_pending: Vec<PendingQuestion>,
}

pub fn session_dir(root: &Path, job_id: &str, session_id: Uuid) -> PathBuf {
    root.join(job_id).join(session_id.to_string())
}

/// Writes to a temp file in the same directory, then renames over `path`.
pub(crate) fn write_atomic(path: &Path, body: &[u8]) -> Result<(), PendingError> {
    let io_err = |source| PendingError::Io {
        path: path.to_path_buf(),
        source,
    };
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(io_err)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(body).map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

/// One session's pending questions. Not shared between sessions.
pub struct PendingQuestionStore {
    config: PendingConfig,
    job_id: String,
    job_url: String,
    session_id: Uuid,
    dir: PathBuf,
    questions: BTreeMap<String, PendingQuestion>,
    feed: Arc<dyn AnswerFeed>,
    waiting_since: Option<Instant>,
}

impl PendingQuestionStore {
    pub fn open(config: PendingConfig, job_id: &str, session_id: Uuid, job_url: &str) -> Self {
        let dir = session_dir(&config.root, job_id, session_id);
        let feed = Arc::new(FileAnswerFeed::new(dir.join(ANSWERS_FILE)));
        Self {
            config,
            job_id: job_id.to_string(),
            job_url: job_url.to_string(),
            session_id,
            dir,
            questions: BTreeMap::new(),
            feed,
            waiting_since: None,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn answers_path(&self) -> PathBuf {
        self.dir.join(ANSWERS_FILE)
    }

    /// Replaces the outstanding questions and rewrites all three artifacts.
    pub fn publish(
        &mut self,
        questions: impl IntoIterator<Item = PendingQuestion>,
    ) -> Result<(), PendingError> {
        self.questions = questions
            .into_iter()
            .map(|q| (q.field_id.clone(), q))
            .collect();
        self.write_artifacts()?;
        info!(
            "Published {} pending questions for {} to {}",
            self.questions.len(),
            self.job_id,
            self.dir.display()
        );
        Ok(())
    }

    /// Polls the feed until every outstanding question has a non-blank entry.
    /// The timeout counts from the first wait of this store.
    pub async fn wait_for_answers(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<String, Value>, WaitError> {
        let started = *self.waiting_since.get_or_insert_with(Instant::now);
        loop {
            if cancel.is_cancelled() {
                return Err(WaitError::Cancelled);
            }
            let supplied = self.feed.fetch().await?;
            let missing: Vec<&String> = self
                .questions
                .keys()
                .filter(|id| !is_supplied(supplied.get(*id)))
                .collect();
            if missing.is_empty() {
                info!("All pending questions for {} have answers", self.job_id);
                return Ok(supplied);
            }
            debug!("Waiting on {} answers for {}: {:?}", missing.len(), self.job_id, missing);

            let nap = match self.config.timeout {
                Some(limit) => {
                    let elapsed = started.elapsed();
                    if elapsed >= limit {
                        warn!("Gave up waiting for answers for {} after {:?}", self.job_id, limit);
                        return Err(WaitError::TimedOut(limit));
                    }
                    (limit - elapsed).min(self.config.poll_interval)
                }
                None => self.config.poll_interval,
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(WaitError::Cancelled),
                _ = tokio::time::sleep(nap) => {}
            }
        }
    }

    /// Consumes every question with a usable answer. Unusable answers keep
    /// their question open with the rejection as its reason, and are cleared
    /// in the feed.
    pub async fn resume(
        &mut self,
        supplied: &BTreeMap<String, Value>,
    ) -> Result<ResumeOutcome, PendingError> {
        let mut answers = Vec::new();
        let mut consumed = Vec::new();
        let mut rejected = Vec::new();

        for (id, question) in self.questions.iter_mut() {
            let Some(raw) = supplied.get(id) else {
                continue;
            };
            match interpret(question, raw) {
                Interpretation::Answer(value) => {
                    let reason = format!("Answered by the candidate: {}", value.display());
                    answers.extend(question.fan_out(&value, AnswerSource::UserOverride, &reason));
                    consumed.push(id.clone());
                }
                Interpretation::Skipped(value) => {
                    answers.extend(question.fan_out(
                        &value,
                        AnswerSource::UserOverride,
                        "The candidate chose to skip this question.",
                    ));
                    consumed.push(id.clone());
                }
                Interpretation::Invalid(reason) => {
                    warn!("Rejected answer for {id}: {reason}");
                    question.reason = format!("Previous answer rejected: {reason}");
                    rejected.push(id.clone());
                }
                Interpretation::Unanswered => {}
            }
        }
        for id in &consumed {
            self.questions.remove(id);
        }
        if !rejected.is_empty() {
            self.feed.reject(&rejected).await?;
        }
        self.write_artifacts()?;
        info!(
            "Resumed {}: {} answered, {} rejected, {} still pending",
            self.job_id,
            consumed.len(),
            rejected.len(),
            self.questions.len()
        );

        Ok(ResumeOutcome {
            answers,
            still_pending: self.questions.values().cloned().collect(),
        })
    }

    fn write_artifacts(&self) -> Result<(), PendingError> {
        let answers_path = self.answers_path();
        let doc = PendingDocument {
            status: if self.questions.is_empty() {
                PendingStatus::Resolved
            } else {
                PendingStatus::Pending
            },
            job_id: &self.job_id,
            job_url: &self.job_url,
            session_id: self.session_id.to_string(),
            updated_at: Utc::now(),
            answers_file: ANSWERS_FILE.to_string(),
            questions: self.questions.values().collect(),
        };

        let template = match read_answers_strict(&answers_path)? {
            Existing::Malformed => {
                warn!(
                    "Leaving unreadable {} untouched; fix it by hand",
                    answers_path.display()
                );
                None
            }
            Existing::Missing => Some(self.template(&BTreeMap::new())),
            Existing::Map(existing) => Some(self.template(&existing)),
        };

        let json_path = self.dir.join(JSON_FILE);
        let body = serde_json::to_vec_pretty(&doc).map_err(|source| PendingError::Json {
            path: json_path.clone(),
            source,
        })?;
        write_atomic(&json_path, &body)?;

        let shown = template.clone().unwrap_or_else(|| self.template(&BTreeMap::new()));
        write_atomic(&self.dir.join(MARKDOWN_FILE), markdown(&doc, &shown).as_bytes())?;

        if let Some(template) = template {
            write_answers(&answers_path, &template)?;
        }
        Ok(())
    }

    /// One entry per outstanding question, keeping anything already filled.
    fn template(&self, existing: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
        self.questions
            .keys()
            .map(|id| (id.clone(), existing.get(id).cloned().unwrap_or(Value::Null)))
            .collect()
    }
}

enum Existing {
    Missing,
    Malformed,
    Map(BTreeMap<String, Value>),
}

fn read_answers_strict(path: &Path) -> Result<Existing, PendingError> {
    if !path.exists() {
        return Ok(Existing::Missing);
    }
    Ok(match read_answers(path)? {
        Some(map) => Existing::Map(map),
        None => Existing::Malformed,
    })
}

fn is_supplied(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(_) => true,
    }
}
