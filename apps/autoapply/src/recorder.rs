//! Terminal artifacts. One JSON document per run under
//! `results/applied/` or `results/not_applied/`; nothing is overwritten.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::errors::ApplyError;
use crate::models::{
    AnswerSource, AnswerValue, ApplicationSession, ApplyEntry, FieldType, PendingQuestion,
    SessionStatus,
};
use crate::submitter::SubmissionReport;

const APPLIED_DIR: &str = "applied";
const NOT_APPLIED_DIR: &str = "not_applied";
const MAX_NAME_ATTEMPTS: usize = 1000;

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("result artifact IO failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("result artifact could not be serialized: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Serialize)]
struct FieldRecord<'a> {
    step: usize,
    label: &'a str,
    field_type: FieldType,
    required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    group_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<&'a AnswerValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<AnswerSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    confidence_reason: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct StepRecord {
    index: usize,
    field_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    snapshot: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct FailureRecord {
    code: &'static str,
    message: String,
    retryable: bool,
    status_at_failure: SessionStatus,
}

#[derive(Debug, Serialize)]
struct Artifact<'a> {
    applied: bool,
    session_id: Uuid,
    job_id: &'a str,
    job_url: &'a str,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    submitted_at: Option<DateTime<Utc>>,
    step_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    entry: Option<&'a ApplyEntry>,
    steps: Vec<StepRecord>,
    fields: BTreeMap<&'a str, FieldRecord<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure: Option<FailureRecord>,
    pending_questions: Vec<&'a PendingQuestion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    confirmation: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    final_url: Option<&'a str>,
    submission_log: &'a [String],
}

impl<'a> Artifact<'a> {
    fn from_session(session: &'a ApplicationSession, applied: bool, log: &'a [String]) -> Self {
        let mut fields = BTreeMap::new();
        for step in &session.steps {
            for field in &step.fields {
                let answer = session.answers.get(&field.field_id);
                fields.insert(
                    field.field_id.as_str(),
                    FieldRecord {
                        step: step.index,
                        label: &field.label,
                        field_type: field.field_type,
                        required: field.required,
                        group_id: field.group_id.as_deref(),
                        value: answer.map(|a| &a.value),
                        source: answer.map(|a| a.source),
                        confidence_reason: answer.map(|a| a.confidence_reason.as_str()),
                    },
                );
            }
        }
        let steps = session
            .steps
            .iter()
            .map(|s| StepRecord {
                index: s.index,
                field_ids: s.fields.iter().map(|f| f.field_id.clone()).collect(),
                snapshot: s.snapshot.clone(),
            })
            .collect();

        Self {
            applied,
            session_id: session.session_id,
            job_id: &session.job_id,
            job_url: &session.job_url,
            started_at: session.started_at,
            finished_at: Utc::now(),
            submitted_at: None,
            step_count: session.steps.len(),
            entry: session.entry.as_ref(),
            steps,
            fields,
            failure: None,
            pending_questions: session.pending.values().collect(),
            confirmation: None,
            final_url: None,
            submission_log: log,
        }
    }
}

pub struct ResultRecorder {
    root: PathBuf,
}

impl ResultRecorder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn record_success(
        &self,
        session: &ApplicationSession,
        report: &SubmissionReport,
    ) -> Result<PathBuf, RecorderError> {
        let mut artifact = Artifact::from_session(session, true, &report.log);
        artifact.submitted_at = Some(report.submitted_at);
        artifact.step_count = report.step_count;
        artifact.confirmation = Some(&report.confirmation);
        artifact.final_url = report.final_url.as_deref();
        let path = self.write(APPLIED_DIR, &session.job_id, &artifact)?;
        info!(
            "Recorded application {} for {} at {}",
            session.session_id,
            session.job_id,
            path.display()
        );
        Ok(path)
    }

    /// `last_status` is the state the run was in when it failed; the
    /// session itself is already `failed`.
    pub fn record_failure(
        &self,
        session: &ApplicationSession,
        last_status: SessionStatus,
        error: &ApplyError,
        log: &[String],
    ) -> Result<PathBuf, RecorderError> {
        let mut artifact = Artifact::from_session(session, false, log);
        artifact.failure = Some(FailureRecord {
            code: error.code(),
            message: error.to_string(),
            retryable: error.is_retryable(),
            status_at_failure: last_status,
        });
        let path = self.write(NOT_APPLIED_DIR, &session.job_id, &artifact)?;
        info!(
            "Recorded failure '{}' for {} at {}",
            error.code(),
            session.job_id,
            path.display()
        );
        Ok(path)
    }

    fn write(&self, bucket: &str, job_id: &str, artifact: &Artifact<'_>) -> Result<PathBuf, RecorderError> {
        let dir = self.root.join(bucket);
        std::fs::create_dir_all(&dir).map_err(|source| RecorderError::Io {
            path: dir.clone(),
            source,
        })?;
        let body = serde_json::to_vec_pretty(artifact)?;
        let stamp = artifact.finished_at.format("%Y%m%dT%H%M%S%.3fZ");
        create_new(&dir, &format!("{job_id}_{stamp}"), &body)
    }
}

/// Writes `<stem>.json`, or `<stem>-<n>.json` for the first free `n`.
fn create_new(dir: &Path, stem: &str, body: &[u8]) -> Result<PathBuf, RecorderError> {
    for attempt in 0..MAX_NAME_ATTEMPTS {
        let name = if attempt == 0 {
            format!("{stem}.json")
        } else {
            format!("{stem}-{attempt}.json")
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(body)
                    .and_then(|_| file.sync_all())
                    .map_err(|source| RecorderError::Io {
                        path: path.clone(),
                        source,
                    })?;
                return Ok(path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(source) => return Err(RecorderError::Io { path, source }),
        }
    }
    Err(RecorderError::Io {
        path: dir.join(format!("{stem}.json")),
        source: std::io::Error::new(std::io::ErrorKind::AlreadyExists, "no free artifact name"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResolvedAnswer;
    use crate::testing::{field, session_with};
    use serde_json::Value;

    fn session() -> ApplicationSession {
        let mut session = session_with(vec![
            field("email", "Email", FieldType::ShortText, &[], true),
            field("why", "Why us?", FieldType::LongText, &[], false),
        ]);
        session.record_answer(ResolvedAnswer::knowledge_base(
            "email",
            AnswerValue::text("ada@example.com"),
            "profile.personal.email",
        ));
        session
    }

    fn read(path: &Path) -> Value {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn test_success_artifact_has_provenance_for_every_field() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session();
        session.record_answer(ResolvedAnswer::user_override("why", AnswerValue::text("Rust"), "answers.json"));
        let report = SubmissionReport {
            step_count: 1,
            submitted_at: Utc::now(),
            final_url: Some("https://jobs.example.com/thanks".to_string()),
            confirmation: "thank you for applying".to_string(),
            log: vec!["filled email".to_string()],
        };

        let path = ResultRecorder::new(dir.path()).record_success(&session, &report).unwrap();
        assert!(path.starts_with(dir.path().join("applied")));
        let doc = read(&path);
        assert_eq!(doc["applied"], true);
        assert_eq!(doc["step_count"], 1);
        assert_eq!(doc["fields"]["email"]["source"], "knowledge_base");
        assert_eq!(doc["fields"]["email"]["confidence_reason"], "profile.personal.email");
        assert_eq!(doc["fields"]["why"]["source"], "user_override");
        assert!(doc.get("failure").is_none());
    }

    #[test]
    fn test_failure_artifact_keeps_pending_and_reason() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session();
        let why = session.field("why").cloned().unwrap();
        session.record_pending(PendingQuestion::for_field(&why, "No evidence"));
        session.transition(SessionStatus::Failed);

        let error = ApplyError::UserCancelled;
        let path = ResultRecorder::new(dir.path())
            .record_failure(&session, SessionStatus::AwaitingInput, &error, &[])
            .unwrap();
        assert!(path.starts_with(dir.path().join("not_applied")));
        let doc = read(&path);
        assert_eq!(doc["applied"], false);
        assert_eq!(doc["failure"]["code"], "user_cancelled");
        assert_eq!(doc["failure"]["status_at_failure"], "awaiting_input");
        assert_eq!(doc["pending_questions"][0]["field_id"], "why");
        assert!(doc["fields"]["why"].get("source").is_none());
    }

    #[test]
    fn test_artifacts_never_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let first = create_new(dir.path(), "job_1", b"{}").unwrap();
        let second = create_new(dir.path(), "job_1", b"{\"x\":1}").unwrap();
        assert_ne!(first, second);
        assert!(second.ends_with("job_1-1.json"));
        assert_eq!(std::fs::read_to_string(first).unwrap(), "{}");
    }
}
