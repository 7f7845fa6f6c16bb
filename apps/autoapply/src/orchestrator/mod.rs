//! Runs one application from job URL to terminal artifact.
//!
//! `discovering → resolving → (awaiting_input ⇄ resolving) → submitting →
//! {applied | failed}`. The recorder runs exactly once, on the terminal
//! transition.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::errors::ApplyError;
use crate::knowledge::SessionDocuments;
use crate::models::{ApplicationSession, SessionStatus};
use crate::navigator::{DiscoveryRequest, FormDiscoverer};
use crate::pending::{self, PendingConfig, PendingQuestionStore, WaitError};
use crate::recorder::{RecorderError, ResultRecorder};
use crate::resolver::AnswerResolver;
use crate::submitter::{ApplicationSubmitter, SubmissionReport};

const COVER_LETTER_FILE: &str = "cover_letter.txt";

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub navigation_timeout: Duration,
    /// Per-session working files such as a supplied cover letter.
    pub sessions_dir: PathBuf,
    pub pending: PendingConfig,
}

/// One job-application trigger.
#[derive(Debug, Clone, Default)]
pub struct ApplicationRequest {
    pub job_url: String,
    /// Pre-supplied `field_id → answer` mapping. When present, lookup and
    /// judgment are skipped entirely.
    pub answers: Option<BTreeMap<String, Value>>,
    pub documents: SessionDocuments,
    /// Block on pending questions instead of failing with
    /// `pending_input_required`.
    pub wait_for_input: bool,
}

/// Caller-side handle on a running session.
pub struct RunControl {
    pub session_id: Uuid,
    pub cancel: CancellationToken,
    status: watch::Sender<SessionStatus>,
}

impl RunControl {
    pub fn new() -> (Self, watch::Receiver<SessionStatus>) {
        let (status, rx) = watch::channel(SessionStatus::Discovering);
        let control = Self {
            session_id: Uuid::new_v4(),
            cancel: CancellationToken::new(),
            status,
        };
        (control, rx)
    }

    fn enter(&self, session: &mut ApplicationSession, status: SessionStatus) {
        session.transition(status);
        self.status.send_replace(status);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FailureSummary {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApplicationOutcome {
    pub session_id: Uuid,
    pub job_id: String,
    pub artifact_path: PathBuf,
    pub applied: bool,
    pub step_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureSummary>,
}

pub struct Orchestrator {
    discoverer: Arc<dyn FormDiscoverer>,
    resolver: AnswerResolver,
    submitter: ApplicationSubmitter,
    recorder: ResultRecorder,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        discoverer: Arc<dyn FormDiscoverer>,
        resolver: AnswerResolver,
        submitter: ApplicationSubmitter,
        recorder: ResultRecorder,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            discoverer,
            resolver,
            submitter,
            recorder,
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Drives the session to a terminal state and records it. Only a failure
    /// to write the artifact itself is returned as an error.
    pub async fn run(
        &self,
        request: ApplicationRequest,
        control: RunControl,
    ) -> Result<ApplicationOutcome, RecorderError> {
        let mut session = ApplicationSession::new(control.session_id, &request.job_url);
        info!(
            "Starting application {} for {} ({})",
            session.session_id, session.job_id, session.job_url
        );
        let mut log = Vec::new();
        let result = self.drive(&mut session, &request, &control, &mut log).await;

        match result {
            Ok(report) => {
                control.enter(&mut session, SessionStatus::Applied);
                let artifact_path = self.recorder.record_success(&session, &report)?;
                Ok(ApplicationOutcome {
                    session_id: session.session_id,
                    job_id: session.job_id,
                    artifact_path,
                    applied: true,
                    step_count: report.step_count,
                    failure: None,
                })
            }
            Err(err) => {
                let last_status = session.status;
                warn!(
                    "Application {} failed while {}: {err}",
                    session.session_id,
                    last_status.as_str()
                );
                control.enter(&mut session, SessionStatus::Failed);
                let artifact_path = self
                    .recorder
                    .record_failure(&session, last_status, &err, &log)
                    .map_err(|e| {
                        error!("Could not record failure for {}: {e}", session.session_id);
                        e
                    })?;
                Ok(ApplicationOutcome {
                    session_id: session.session_id,
                    job_id: session.job_id,
                    artifact_path,
                    applied: false,
                    step_count: session.steps.len(),
                    failure: Some(FailureSummary {
                        code: err.code(),
                        message: err.to_string(),
                    }),
                })
            }
        }
    }

    async fn drive(
        &self,
        session: &mut ApplicationSession,
        request: &ApplicationRequest,
        control: &RunControl,
        log: &mut Vec<String>,
    ) -> Result<SubmissionReport, ApplyError> {
        // ── discovering ──
        control.enter(session, SessionStatus::Discovering);
        let form = self.discover(session).await?;
        session.load_form(form);
        info!(
            "Discovered {} fields over {} steps for {}",
            session.field_count(),
            session.steps.len(),
            session.job_id
        );

        // ── resolving ──
        control.enter(session, SessionStatus::Resolving);
        let session_resolver;
        let resolver = if request.documents.is_empty() {
            &self.resolver
        } else {
            session_resolver = self.session_resolver(session, &request.documents)?;
            &session_resolver
        };
        self.resolve_pass(resolver, session, request).await;

        let mut store = PendingQuestionStore::open(
            self.config.pending.clone(),
            &session.job_id,
            session.session_id,
            &session.job_url,
        );

        // ── awaiting_input ⇄ resolving ──
        while !session.pending.is_empty() {
            store
                .publish(session.pending.values().cloned())
                .map_err(|e| ApplyError::Infrastructure(format!("pending artifacts: {e}")))?;
            if !request.wait_for_input {
                return Err(ApplyError::PendingInputRequired {
                    field_ids: session.pending.keys().cloned().collect(),
                });
            }

            control.enter(session, SessionStatus::AwaitingInput);
            let supplied = store.wait_for_answers(&control.cancel).await.map_err(|e| match e {
                WaitError::Cancelled => ApplyError::UserCancelled,
                WaitError::TimedOut(waited) => ApplyError::InputTimeout {
                    waited_secs: waited.as_secs(),
                },
                WaitError::Feed(e) => ApplyError::Infrastructure(format!("answer feed: {e}")),
            })?;

            control.enter(session, SessionStatus::Resolving);
            let resumed = store
                .resume(&supplied)
                .await
                .map_err(|e| ApplyError::Infrastructure(format!("pending artifacts: {e}")))?;
            for answer in resumed.answers {
                session.record_answer(answer);
            }
            session.pending.clear();
            for question in resumed.still_pending {
                session.record_pending(question);
            }
            self.resolve_pass(resolver, session, request).await;
        }

        let unaccounted = session.unaccounted_fields();
        if !unaccounted.is_empty() {
            return Err(ApplyError::AnswerResolutionExhausted {
                field_ids: unaccounted,
            });
        }
        if control.cancel.is_cancelled() {
            return Err(ApplyError::UserCancelled);
        }

        // ── submitting ──
        control.enter(session, SessionStatus::Submitting);
        let run_id = session.session_id.to_string();
        self.submitter.submit(session, &run_id).await.map_err(|failure| {
            *log = failure.log;
            failure.error
        })
    }

    /// One retry on a retryable failure, with twice the timeout.
    async fn discover(
        &self,
        session: &ApplicationSession,
    ) -> Result<crate::models::DiscoveredForm, ApplyError> {
        let mut request = DiscoveryRequest {
            job_url: session.job_url.clone(),
            job_id: session.job_id.clone(),
            run_id: session.session_id.to_string(),
            timeout: self.config.navigation_timeout,
        };
        match self.discoverer.discover(&request).await {
            Err(err) if err.is_retryable() => {
                warn!("Discovery for {} failed ({err}); retrying once", session.job_id);
                request.run_id = format!("{}-retry", session.session_id);
                request.timeout = self.config.navigation_timeout * 2;
                self.discoverer.discover(&request).await
            }
            other => other,
        }
    }

    fn session_resolver(
        &self,
        session: &ApplicationSession,
        documents: &SessionDocuments,
    ) -> Result<AnswerResolver, ApplyError> {
        let mut documents = documents.clone();
        if let (Some(text), None) = (&documents.cover_letter_text, &documents.cover_letter_path) {
            let path = self
                .config
                .sessions_dir
                .join(&session.job_id)
                .join(session.session_id.to_string())
                .join(COVER_LETTER_FILE);
            pending::write_atomic(&path, text.as_bytes())
                .map_err(|e| ApplyError::Infrastructure(format!("cover letter: {e}")))?;
            documents.cover_letter_path = Some(path);
        }
        let knowledge = self
            .resolver
            .knowledge()
            .with_session_documents(&documents)
            .map_err(|e| ApplyError::Infrastructure(format!("session documents: {e}")))?;
        Ok(self.resolver.with_knowledge(Arc::new(knowledge)))
    }

    async fn resolve_pass(
        &self,
        resolver: &AnswerResolver,
        session: &mut ApplicationSession,
        request: &ApplicationRequest,
    ) {
        let outcome = match &request.answers {
            Some(answers) => resolver.resolve_from_manual(session, answers),
            None => resolver.resolve(session).await,
        };
        outcome.apply_to(session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::{FakeBrowserFactory, FakeSite};
    use crate::models::AnswerSource;
    use crate::pending::feed::merge_into_file;
    use crate::pending::{session_dir, ANSWERS_FILE, JSON_FILE};
    use crate::testing::{self, ScriptedOracle};
    use serde_json::json;
    use std::path::Path;

    const URL: &str = "https://jobs.example.com/platform-engineer";

    const SCENARIO_A: &str = r#"<html><body><form>
        <label for="full_name">Full name</label><input id="full_name" name="full_name" required>
        <label for="email">Email</label><input id="email" name="email" type="email" required>
        <label for="country">Country</label>
        <select id="country" name="country" required>
            <option value="">Select</option><option>France</option><option>United Kingdom</option>
        </select>
        <label><input type="checkbox" id="consent" name="consent" required> I consent to the processing of my personal data</label>
        <label for="why">Why are you interested in this role?</label><textarea id="why" name="why"></textarea>
        <button type="submit" id="submit">Submit application</button>
    </form></body></html>"#;

    const SCENARIO_B: &str = r#"<html><body><form>
        <label for="email">Email</label><input id="email" name="email" required>
        <label for="disability">Are you a person with a disability?</label>
        <select id="disability" name="disability" required>
            <option value="">Select</option><option>Yes</option><option>No</option><option>Prefer not to disclose</option>
        </select>
        <button type="submit" id="submit">Submit application</button>
    </form></body></html>"#;

    const THANKS: &str = "<html><body><h1>Thank you for applying!</h1></body></html>";

    struct Harness {
        orchestrator: Arc<Orchestrator>,
        factory: Arc<FakeBrowserFactory>,
        oracle: ScriptedOracle,
        dir: tempfile::TempDir,
    }

    fn harness(site: FakeSite) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let oracle = ScriptedOracle::new();
        let (orchestrator, factory) = testing::orchestrator(site, dir.path(), oracle.clone());
        Harness {
            orchestrator: Arc::new(orchestrator),
            factory,
            oracle,
            dir,
        }
    }

    fn inline_site(form: &str) -> FakeSite {
        FakeSite::new()
            .page("form", form)
            .page("thanks", THANKS)
            .route(URL, "form")
            .on_click("form", "#submit", "thanks")
    }

    fn request(wait_for_input: bool) -> ApplicationRequest {
        ApplicationRequest {
            job_url: URL.to_string(),
            wait_for_input,
            ..ApplicationRequest::default()
        }
    }

    fn artifacts(dir: &Path, bucket: &str) -> Vec<PathBuf> {
        match std::fs::read_dir(dir.join("results").join(bucket)) {
            Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
            Err(_) => Vec::new(),
        }
    }

    fn read(path: &Path) -> Value {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    async fn wait_for_file(path: &Path) {
        for _ in 0..500 {
            if path.exists() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("{} never appeared", path.display());
    }

    #[tokio::test]
    async fn test_scenario_a_auto_resolves_three_and_blocks_on_two() {
        let h = harness(inline_site(SCENARIO_A));
        let (control, mut status) = RunControl::new();
        let session_id = control.session_id;
        let orchestrator = h.orchestrator.clone();
        let run = tokio::spawn(async move { orchestrator.run(request(true), control).await });

        let pending_dir = session_dir(&h.dir.path().join("pending"), "platform-engineer", session_id);
        wait_for_file(&pending_dir.join(JSON_FILE)).await;
        status
            .wait_for(|s| *s == SessionStatus::AwaitingInput)
            .await
            .unwrap();

        let doc = read(&pending_dir.join(JSON_FILE));
        let ids: Vec<&str> = doc["questions"]
            .as_array()
            .unwrap()
            .iter()
            .map(|q| q["field_id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["consent", "why"]);
        assert!(!h.factory.journal().iter().any(|l| l == "click #submit"));

        let answers: BTreeMap<String, Value> = [
            ("consent".to_string(), json!("yes")),
            ("why".to_string(), json!("I enjoy building Rust platforms.")),
        ]
        .into();
        merge_into_file(&pending_dir.join(ANSWERS_FILE), &answers).unwrap();

        let outcome = run.await.unwrap().unwrap();
        assert!(outcome.applied, "{:?}", outcome.failure);
        assert_eq!(outcome.step_count, 1);
        assert!(h.factory.journal().iter().any(|l| l == "click #submit"));

        let record = read(&outcome.artifact_path);
        let fields = &record["fields"];
        for id in ["full_name", "email", "country"] {
            assert_eq!(fields[id]["source"], "knowledge_base", "{id}");
        }
        assert_eq!(fields["full_name"]["value"], "Ada Lovelace");
        assert_eq!(fields["country"]["value"], "United Kingdom");
        assert_eq!(fields["consent"]["source"], "user_override");
        assert_eq!(fields["why"]["source"], "user_override");
        assert_eq!(artifacts(h.dir.path(), "applied").len(), 1);
    }

    #[tokio::test]
    async fn test_scenario_a_without_waiting_publishes_and_fails() {
        let h = harness(inline_site(SCENARIO_A));
        let (control, _status) = RunControl::new();
        let session_id = control.session_id;
        let outcome = h.orchestrator.run(request(false), control).await.unwrap();

        assert!(!outcome.applied);
        assert_eq!(outcome.failure.as_ref().unwrap().code, "pending_input_required");
        let pending_dir = session_dir(&h.dir.path().join("pending"), "platform-engineer", session_id);
        assert!(pending_dir.join(ANSWERS_FILE).exists());

        let record = read(&outcome.artifact_path);
        assert_eq!(record["pending_questions"].as_array().unwrap().len(), 2);
        assert_eq!(record["failure"]["status_at_failure"], "resolving");
        assert_eq!(h.factory.sessions_opened(), 1);
    }

    #[tokio::test]
    async fn test_scenario_b_disability_is_never_defaulted() {
        let h = harness(inline_site(SCENARIO_B));
        let (control, _status) = RunControl::new();
        let outcome = h.orchestrator.run(request(false), control).await.unwrap();

        let record = read(&outcome.artifact_path);
        let pending: Vec<&str> = record["pending_questions"]
            .as_array()
            .unwrap()
            .iter()
            .map(|q| q["field_id"].as_str().unwrap())
            .collect();
        assert_eq!(pending, vec!["disability"]);
        assert!(record["fields"]["disability"].get("value").is_none());
        assert!(!h.oracle.asked().contains(&"disability".to_string()));
    }

    #[tokio::test]
    async fn test_scenario_c_no_apply_flow_writes_one_failure() {
        let site = FakeSite::new()
            .page("posting", "<html><body><h1>Platform Engineer</h1><p>Great team.</p></body></html>")
            .route(URL, "posting");
        let h = harness(site);
        let (control, status) = RunControl::new();
        let outcome = h.orchestrator.run(request(true), control).await.unwrap();

        assert_eq!(outcome.failure.unwrap().code, "no_apply_flow_found");
        assert_eq!(*status.borrow(), SessionStatus::Failed);
        assert_eq!(artifacts(h.dir.path(), "not_applied").len(), 1);
        assert!(artifacts(h.dir.path(), "applied").is_empty());
    }

    #[tokio::test]
    async fn test_scenario_d_write_failure_is_not_applied() {
        let h = harness(inline_site(SCENARIO_A).broken("select[name=\"country\"]"));
        let answers: BTreeMap<String, Value> = [
            ("full_name".to_string(), json!("Ada Lovelace")),
            ("email".to_string(), json!("ada@example.com")),
            ("country".to_string(), json!("United Kingdom")),
            ("consent".to_string(), json!(true)),
            ("why".to_string(), json!("Rust")),
        ]
        .into();
        let (control, _status) = RunControl::new();
        let outcome = h
            .orchestrator
            .run(
                ApplicationRequest {
                    answers: Some(answers),
                    ..request(true)
                },
                control,
            )
            .await
            .unwrap();

        assert!(!outcome.applied);
        assert_eq!(outcome.failure.unwrap().code, "field_write_failed");
        assert!(artifacts(h.dir.path(), "applied").is_empty());
        let record = read(&outcome.artifact_path);
        assert_eq!(record["failure"]["status_at_failure"], "submitting");
        assert_eq!(record["fields"]["country"]["source"], "user_override");
        assert!(record["submission_log"].as_array().unwrap().len() >= 2);

        let journal = h.factory.journal();
        assert!(journal.iter().any(|l| l.starts_with("fill input[name=\"email\"]")));
        assert!(!journal.iter().any(|l| l == "click #submit"));
        assert_eq!(h.oracle.calls(), 0);
    }

    #[tokio::test]
    async fn test_cancel_while_awaiting_input() {
        let h = harness(inline_site(SCENARIO_A));
        let (control, mut status) = RunControl::new();
        let cancel = control.cancel.clone();
        let orchestrator = h.orchestrator.clone();
        let run = tokio::spawn(async move { orchestrator.run(request(true), control).await });

        status
            .wait_for(|s| *s == SessionStatus::AwaitingInput)
            .await
            .unwrap();
        cancel.cancel();

        let outcome = run.await.unwrap().unwrap();
        assert_eq!(outcome.failure.unwrap().code, "user_cancelled");
        let record = read(&outcome.artifact_path);
        assert_eq!(record["failure"]["status_at_failure"], "awaiting_input");
        assert_eq!(h.factory.sessions_opened(), 1);
    }

    #[tokio::test]
    async fn test_discovery_timeout_is_retried_once() {
        let h = harness(inline_site(SCENARIO_A).timeout_first(URL, 1));
        let answers: BTreeMap<String, Value> = [
            ("consent".to_string(), json!("yes")),
            ("why".to_string(), json!("skip")),
        ]
        .into();
        let (control, _status) = RunControl::new();
        let outcome = h
            .orchestrator
            .run(
                ApplicationRequest {
                    answers: Some(answers),
                    ..request(false)
                },
                control,
            )
            .await
            .unwrap();

        // The manual mapping only covers two fields; the rest go pending.
        assert_eq!(outcome.failure.unwrap().code, "pending_input_required");
        assert_eq!(h.factory.sessions_opened(), 2);
        let record = read(&outcome.artifact_path);
        assert_eq!(record["fields"]["why"]["source"], "user_override");
        assert_eq!(record["fields"]["why"]["value"], "");
    }

    #[tokio::test]
    async fn test_session_cover_letter_is_written_for_the_session() {
        let form = r#"<html><body><form>
            <label for="letter">Cover letter</label><textarea id="letter" name="letter" required></textarea>
            <button type="submit" id="submit">Submit application</button>
        </form></body></html>"#;
        let h = harness(inline_site(form));
        let (control, _status) = RunControl::new();
        let session_id = control.session_id;
        let outcome = h
            .orchestrator
            .run(
                ApplicationRequest {
                    documents: SessionDocuments {
                        cover_letter_text: Some("Hello from this session.".to_string()),
                        ..SessionDocuments::default()
                    },
                    ..request(false)
                },
                control,
            )
            .await
            .unwrap();

        assert!(outcome.applied, "{:?}", outcome.failure);
        let record = read(&outcome.artifact_path);
        assert_eq!(record["fields"]["letter"]["value"], "Hello from this session.");
        assert_eq!(record["fields"]["letter"]["source"], AnswerSource::KnowledgeBase.as_str());
        let written = h
            .dir
            .path()
            .join("sessions")
            .join("platform-engineer")
            .join(session_id.to_string())
            .join(COVER_LETTER_FILE);
        assert_eq!(std::fs::read_to_string(written).unwrap(), "Hello from this session.");
    }
}
