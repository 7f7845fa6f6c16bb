//! Shared fixtures for unit tests: form fields, a small knowledge base, a
//! scripted oracle, and an orchestrator wired to a fake site.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use crate::browser::fake::{FakeBrowserFactory, FakeSite};
use crate::knowledge::{KnowledgeBase, Passage};
use crate::llm_client::LlmError;
use crate::models::{
    ApplicationSession, ControlKind, DiscoveredForm, FieldLocator, FieldType, FormField, FormStep,
};
use crate::navigator::snapshots::SnapshotStore;
use crate::navigator::{ApplicationNavigator, NavigatorConfig};
use crate::orchestrator::{Orchestrator, OrchestratorConfig};
use crate::pending::PendingConfig;
use crate::recorder::ResultRecorder;
use crate::resolver::oracle::{Decision, JudgmentOracle, OracleQuestion};
use crate::resolver::AnswerResolver;
use crate::submitter::{ApplicationSubmitter, SubmitterConfig};

pub const CV_TEXT: &str = "Senior engineer with four years of Rust experience building services.\n\n\
Operated Kubernetes clusters in production.\n\n\
Languages: Rust, Go, Python.";

pub const COVER_LETTER: &str = "Dear hiring team,\n\nI have followed your engineering blog for years.";

pub fn profile() -> Value {
    json!({
        "personal": {
            "first_name": "Ada",
            "last_name": "Lovelace",
            "email": "ada@example.com",
            "location": "London, UK"
        }
    })
}

pub fn knowledge() -> KnowledgeBase {
    KnowledgeBase::from_parts(
        &profile(),
        Some((PathBuf::from("/docs/ada-cv.pdf"), CV_TEXT.to_string())),
        Some((PathBuf::from("/docs/cover.txt"), COVER_LETTER.to_string())),
    )
    .expect("fixture profile is an object")
}

fn control_for(field_type: FieldType) -> ControlKind {
    match field_type {
        FieldType::ShortText => ControlKind::TextInput,
        FieldType::LongText => ControlKind::TextArea,
        FieldType::SingleSelect | FieldType::MultiSelect => ControlKind::Select,
        FieldType::Checkbox => ControlKind::Checkbox,
        FieldType::FileUpload => ControlKind::FileInput,
        FieldType::CaptchaToken | FieldType::Hidden => ControlKind::Passive,
    }
}

pub fn field(
    id: &str,
    label: &str,
    field_type: FieldType,
    options: &[&str],
    required: bool,
) -> FormField {
    FormField {
        field_id: id.to_string(),
        label: label.to_string(),
        field_type,
        options: options.iter().map(|s| s.to_string()).collect(),
        required,
        group_id: None,
        group_label: None,
        selector: FieldLocator::new(format!("#{id}"), control_for(field_type)),
    }
}

pub fn group_member(id: &str, label: &str, group_id: &str, group_label: &str, required: bool) -> FormField {
    FormField {
        group_id: Some(group_id.to_string()),
        group_label: Some(group_label.to_string()),
        ..field(id, label, FieldType::Checkbox, &[], required)
    }
}

/// A session with the given fields already discovered as one step.
pub fn session_with(fields: Vec<FormField>) -> ApplicationSession {
    let url = "https://jobs.example.com/rust-engineer";
    let mut session = ApplicationSession::new(Uuid::new_v4(), url);
    session.load_form(DiscoveredForm {
        job_url: url.to_string(),
        job_id: session.job_id.clone(),
        entry: None,
        steps: vec![FormStep {
            index: 0,
            fields,
            advance_selector: None,
            snapshot: None,
        }],
    });
    session
}

/// Oracle answering from a script keyed by question substrings. Unscripted
/// questions get `cannot_answer`. Clones share the call counter.
#[derive(Clone, Default)]
pub struct ScriptedOracle {
    rules: Vec<(String, Decision)>,
    fallback: Option<Decision>,
    failing: bool,
    calls: Arc<AtomicUsize>,
    asked: Arc<Mutex<Vec<String>>>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call fails as if the LLM were unreachable.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn answer(mut self, question_contains: &str, value: Value, evidence_ids: &[&str]) -> Self {
        let decision = answer_decision(value, evidence_ids);
        self.rules.push((question_contains.to_lowercase(), decision));
        self
    }

    pub fn answer_everything(mut self, value: Value, evidence_ids: &[&str]) -> Self {
        self.fallback = Some(answer_decision(value, evidence_ids));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().map(|a| a.clone()).unwrap_or_default()
    }
}

fn answer_decision(value: Value, evidence_ids: &[&str]) -> Decision {
    Decision::Answer {
        value: serde_json::from_value(value).expect("scripted value is a string or list"),
        evidence_ids: evidence_ids.iter().map(|s| s.to_string()).collect(),
        rationale: "scripted".to_string(),
    }
}

#[async_trait]
impl JudgmentOracle for ScriptedOracle {
    async fn judge(&self, question: &OracleQuestion, _evidence: &[Passage]) -> Result<Decision, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut asked) = self.asked.lock() {
            asked.push(question.field_id.clone());
        }
        if self.failing {
            return Err(LlmError::EmptyContent);
        }
        let text = question.question.to_lowercase();
        let scripted = self
            .rules
            .iter()
            .find(|(key, _)| text.contains(key.as_str()))
            .map(|(_, decision)| decision.clone())
            .or_else(|| self.fallback.clone());
        Ok(scripted.unwrap_or(Decision::CannotAnswer {
            reason: "not in the evidence".to_string(),
        }))
    }
}

/// A full orchestrator over a scripted site, with every artifact directory
/// under `root`.
pub fn orchestrator(site: FakeSite, root: &Path, oracle: ScriptedOracle) -> (Orchestrator, Arc<FakeBrowserFactory>) {
    let factory = Arc::new(FakeBrowserFactory::new(site));
    let snapshots = SnapshotStore::new(root.join("snapshots"));
    let navigator = ApplicationNavigator::new(
        factory.clone(),
        snapshots.clone(),
        NavigatorConfig {
            max_steps: 10,
            settle: Duration::ZERO,
        },
    );
    let submitter = ApplicationSubmitter::new(
        factory.clone(),
        snapshots,
        SubmitterConfig {
            navigation_timeout: Duration::from_secs(5),
            settle: Duration::ZERO,
        },
    );
    let config = OrchestratorConfig {
        navigation_timeout: Duration::from_secs(5),
        sessions_dir: root.join("sessions"),
        pending: PendingConfig {
            root: root.join("pending"),
            poll_interval: Duration::from_millis(10),
            timeout: None,
        },
    };
    let orchestrator = Orchestrator::new(
        Arc::new(navigator),
        AnswerResolver::new(Arc::new(knowledge()), Arc::new(oracle), 6),
        submitter,
        ResultRecorder::new(root.join("results")),
        config,
    );
    (orchestrator, factory)
}
