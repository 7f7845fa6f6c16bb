use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::info;
use uuid::Uuid;

use crate::models::answer::{AnswerSource, PendingQuestion, ResolvedAnswer};
use crate::models::form::{ApplyEntry, DiscoveredForm, FormField, FormStep};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Discovering,
    Resolving,
    AwaitingInput,
    Submitting,
    Applied,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Discovering => "discovering",
            SessionStatus::Resolving => "resolving",
            SessionStatus::AwaitingInput => "awaiting_input",
            SessionStatus::Submitting => "submitting",
            SessionStatus::Applied => "applied",
            SessionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Applied | SessionStatus::Failed)
    }
}

/// One attempt at one job application. Owned by the orchestrator; every
/// other component borrows it.
#[derive(Debug, Clone, Serialize)]
pub struct ApplicationSession {
    pub session_id: Uuid,
    pub job_url: String,
    pub job_id: String,
    pub started_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub entry: Option<ApplyEntry>,
    pub steps: Vec<FormStep>,
    pub answers: BTreeMap<String, ResolvedAnswer>,
    /// Keyed by question id (field id, or group id for checkbox groups).
    pub pending: BTreeMap<String, PendingQuestion>,
}

impl ApplicationSession {
    pub fn new(session_id: Uuid, job_url: &str) -> Self {
        Self {
            session_id,
            job_url: job_url.to_string(),
            job_id: derive_job_id(job_url),
            started_at: Utc::now(),
            status: SessionStatus::Discovering,
            entry: None,
            steps: Vec::new(),
            answers: BTreeMap::new(),
            pending: BTreeMap::new(),
        }
    }

    pub fn transition(&mut self, to: SessionStatus) {
        if self.status != to {
            info!(
                "Session {} ({}): {} -> {}",
                self.session_id,
                self.job_id,
                self.status.as_str(),
                to.as_str()
            );
            self.status = to;
        }
    }

    pub fn load_form(&mut self, form: DiscoveredForm) {
        self.entry = form.entry;
        self.steps = form.steps;
    }

    /// Fields in discovery order.
    pub fn fields(&self) -> impl Iterator<Item = &FormField> {
        self.steps.iter().flat_map(|s| s.fields.iter())
    }

    pub fn field(&self, field_id: &str) -> Option<&FormField> {
        self.fields().find(|f| f.field_id == field_id)
    }

    pub fn group_members(&self, group_id: &str) -> Vec<&FormField> {
        self.fields()
            .filter(|f| f.group_id.as_deref() == Some(group_id))
            .collect()
    }

    /// Fields with neither an answer nor a pending question, in discovery order.
    pub fn unresolved_fields(&self) -> Vec<&FormField> {
        let covered = self.pending_field_ids();
        self.fields()
            .filter(|f| !self.answers.contains_key(&f.field_id) && !covered.contains(&f.field_id))
            .collect()
    }

    fn pending_field_ids(&self) -> HashSet<String> {
        self.pending
            .values()
            .flat_map(|q| q.covered_field_ids())
            .collect()
    }

    /// Records an answer. A user override is never replaced by an answer
    /// from any other source.
    pub fn record_answer(&mut self, answer: ResolvedAnswer) {
        if let Some(existing) = self.answers.get(&answer.field_id) {
            if existing.source == AnswerSource::UserOverride
                && answer.source != AnswerSource::UserOverride
            {
                return;
            }
        }
        self.answers.insert(answer.field_id.clone(), answer);
    }

    /// Queues a question unless every field it covers already has an answer.
    pub fn record_pending(&mut self, question: PendingQuestion) {
        if question
            .covered_field_ids()
            .iter()
            .all(|id| self.answers.contains_key(id))
        {
            return;
        }
        self.pending.insert(question.field_id.clone(), question);
    }

    /// Fields that have no answer yet. Empty means every field is accounted
    /// for by an answer and the form may be submitted.
    pub fn missing_answers(&self) -> Vec<String> {
        self.fields()
            .filter(|f| !self.answers.contains_key(&f.field_id))
            .map(|f| f.field_id.clone())
            .collect()
    }

    /// Fields with no answer and no pending question. Non-empty here is a bug
    /// in resolution, reported as `answer_resolution_exhausted`.
    pub fn unaccounted_fields(&self) -> Vec<String> {
        self.unresolved_fields()
            .into_iter()
            .map(|f| f.field_id.clone())
            .collect()
    }

    pub fn field_count(&self) -> usize {
        self.steps.iter().map(|s| s.fields.len()).sum()
    }
}

/// Slug for a job posting: the last meaningful path segment without its
/// file extension, falling back to the host. Restricted to `[a-z0-9-]`.
pub fn derive_job_id(job_url: &str) -> String {
    let slug = match Url::parse(job_url.trim()) {
        Ok(url) => {
            let segment = url
                .path_segments()
                .into_iter()
                .flatten()
                .filter(|p| !p.is_empty())
                .filter(|p| !matches!(p.to_ascii_lowercase().as_str(), "apply" | "application" | "jobs" | "job"))
                .last()
                .map(strip_extension);
            match segment {
                Some(segment) if !slugify(segment).is_empty() => slugify(segment),
                _ => slugify(url.host_str().unwrap_or_default()),
            }
        }
        Err(_) => slugify(job_url),
    };
    if slug.is_empty() {
        "job-application".to_string()
    } else {
        slug
    }
}

/// `1234.html` -> `1234`. Only short alphabetic suffixes count as extensions.
fn strip_extension(segment: &str) -> &str {
    match segment.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && (1..=5).contains(&ext.len())
                && ext.chars().all(|c| c.is_ascii_alphabetic()) =>
        {
            stem
        }
        _ => segment,
    }
}

fn slugify(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_dash = false;
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash && !out.is_empty() {
            out.push('-');
            last_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out.chars().take(80).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::answer::AnswerValue;
    use crate::models::form::{ControlKind, FieldLocator, FieldType};

    fn text_field(id: &str) -> FormField {
        FormField {
            field_id: id.to_string(),
            label: id.to_string(),
            field_type: FieldType::ShortText,
            options: vec![],
            required: true,
            group_id: None,
            group_label: None,
            selector: FieldLocator::new(format!("#{id}"), ControlKind::TextInput),
        }
    }

    fn session_with(ids: &[&str]) -> ApplicationSession {
        let mut session = ApplicationSession::new(Uuid::new_v4(), "https://jobs.example.com/roles/1234");
        session.steps = vec![FormStep {
            index: 0,
            fields: ids.iter().map(|id| text_field(id)).collect(),
            advance_selector: None,
            snapshot: None,
        }];
        session
    }

    #[test]
    fn test_user_override_is_never_replaced() {
        let mut session = session_with(&["email"]);
        session.record_answer(ResolvedAnswer::user_override(
            "email",
            AnswerValue::text("me@example.com"),
            "typed",
        ));
        session.record_answer(ResolvedAnswer::knowledge_base(
            "email",
            AnswerValue::text("other@example.com"),
            "profile",
        ));
        assert_eq!(
            session.answers["email"].value,
            AnswerValue::text("me@example.com")
        );
    }

    #[test]
    fn test_unresolved_fields_excludes_pending_and_answered() {
        let mut session = session_with(&["a", "b", "c"]);
        session.record_answer(ResolvedAnswer::knowledge_base("a", AnswerValue::text("x"), "r"));
        let b = session.field("b").cloned().unwrap();
        session.record_pending(PendingQuestion::for_field(&b, "unknown"));
        let ids: Vec<_> = session.unresolved_fields().iter().map(|f| f.field_id.clone()).collect();
        assert_eq!(ids, vec!["c"]);
        assert_eq!(session.missing_answers(), vec!["b", "c"]);
    }

    #[test]
    fn test_derive_job_id() {
        assert_eq!(derive_job_id("https://jobs.example.com/roles/1234"), "1234");
        assert_eq!(
            derive_job_id("https://boards.example.io/acme/jobs/Senior_Engineer?src=x"),
            "senior-engineer"
        );
        assert_eq!(derive_job_id("https://careers.acme.com/"), "careers-acme-com");
        assert_eq!(derive_job_id("https://acme.com/apply"), "acme-com");
        assert_eq!(derive_job_id("https://jobs.example.com/jobs/1234.html?ref=x"), "1234");
        assert_eq!(derive_job_id("https://jobs.example.com/roles/v2.5"), "v2-5");
    }
}
