//! Answer resolution: turns discovered fields into grounded answers or
//! pending questions, never into guesses.
//!
//! Each field takes the first path that applies:
//!   1. passive fields (hidden, captcha) are skipped with a reason
//!   2. candidate documents fill upload and cover-letter fields
//!   3. self-identification and consent go to the candidate
//!   4. structured profile lookup
//!   5. evidence retrieval plus oracle judgment, accepted only when it cites
//!      the supplied evidence and fits the field
//!
//! Checkbox groups are resolved once per `group_id` and fanned out.

pub mod classify;
pub mod oracle;
pub mod prompts;

use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::knowledge::{KnowledgeBase, ProfileKey};
use crate::models::answer::{fan_out_group, is_falsy, is_truthy};
use crate::models::{
    AnswerSource, AnswerValue, ApplicationSession, FieldType, FormField, PendingQuestion,
    ResolvedAnswer,
};
use crate::pending::interpret::{interpret, Interpretation};
use classify::{classify, match_option, non_disclosure_option, FieldCategory};
use oracle::{Decision, JudgmentOracle, OracleQuestion};

pub const NO_EVIDENCE_REASON: &str =
    "No supporting evidence found in profile, CV, or cover letter.";
pub const MANUAL_MISSING_REASON: &str = "No answer provided in the supplied answer mapping.";
const MANUAL_REASON: &str = "Supplied in the answer mapping.";
const SKIPPED_REASON: &str = "The candidate chose to skip this question.";

/// Answers and questions produced by one resolution pass, in discovery order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolutionOutcome {
    pub answers: Vec<ResolvedAnswer>,
    pub pending: Vec<PendingQuestion>,
}

impl ResolutionOutcome {
    fn push(&mut self, resolution: Resolution) {
        match resolution {
            Resolution::Answered(answers) => self.answers.extend(answers),
            Resolution::Pending(question) => self.pending.push(question),
        }
    }

    pub fn apply_to(self, session: &mut ApplicationSession) {
        for answer in self.answers {
            session.record_answer(answer);
        }
        for question in self.pending {
            session.record_pending(question);
        }
    }
}

enum Resolution {
    Answered(Vec<ResolvedAnswer>),
    Pending(PendingQuestion),
}

fn answered(answer: ResolvedAnswer) -> Resolution {
    Resolution::Answered(vec![answer])
}

/// A lone field, or a checkbox group asked as one question.
enum Target<'a> {
    Field(&'a FormField),
    Group {
        id: String,
        label: String,
        members: Vec<&'a FormField>,
    },
}

impl Target<'_> {
    fn question(&self, reason: &str) -> PendingQuestion {
        match self {
            Target::Field(field) => PendingQuestion::for_field(field, reason),
            Target::Group { id, label, members } => {
                PendingQuestion::for_group(id, label, members, reason)
            }
        }
    }
}

/// Unresolved fields of the session grouped into resolution targets.
fn targets(session: &ApplicationSession) -> Vec<Target<'_>> {
    let mut seen_groups = HashSet::new();
    let mut targets = Vec::new();
    for field in session.unresolved_fields() {
        match &field.group_id {
            Some(group_id) => {
                if !seen_groups.insert(group_id.clone()) {
                    continue;
                }
                targets.push(Target::Group {
                    id: group_id.clone(),
                    label: field.question_text().to_string(),
                    members: session.group_members(group_id),
                });
            }
            None => targets.push(Target::Field(field)),
        }
    }
    targets
}

pub struct AnswerResolver {
    knowledge: Arc<KnowledgeBase>,
    oracle: Arc<dyn JudgmentOracle>,
    top_k: usize,
}

impl AnswerResolver {
    pub fn new(knowledge: Arc<KnowledgeBase>, oracle: Arc<dyn JudgmentOracle>, top_k: usize) -> Self {
        Self {
            knowledge,
            oracle,
            top_k: top_k.max(1),
        }
    }

    /// Same oracle and settings over a different knowledge base.
    pub fn with_knowledge(&self, knowledge: Arc<KnowledgeBase>) -> Self {
        Self {
            knowledge,
            oracle: self.oracle.clone(),
            top_k: self.top_k,
        }
    }

    pub fn knowledge(&self) -> &KnowledgeBase {
        &self.knowledge
    }

    /// Resolves every field that has neither an answer nor a pending question.
    /// Fields answered by the candidate are never revisited.
    pub async fn resolve(&self, session: &ApplicationSession) -> ResolutionOutcome {
        let mut outcome = ResolutionOutcome::default();
        for target in targets(session) {
            let resolution = match &target {
                Target::Field(field) => self.resolve_field(field).await,
                Target::Group { id, label, members } => {
                    self.resolve_group(&target, id, label, members).await
                }
            };
            outcome.push(resolution);
        }
        info!(
            "Resolved session {}: {} answers, {} pending",
            session.session_id,
            outcome.answers.len(),
            outcome.pending.len()
        );
        outcome
    }

    /// Takes answers from a caller-supplied mapping instead of lookup and
    /// judgment. Keys are field ids (or group ids), or the question text.
    /// Missing required fields become pending; missing optional ones are left
    /// blank with a reason.
    pub fn resolve_from_manual(
        &self,
        session: &ApplicationSession,
        supplied: &BTreeMap<String, Value>,
    ) -> ResolutionOutcome {
        let answers = ManualAnswers::new(supplied);
        let mut outcome = ResolutionOutcome::default();
        for target in targets(session) {
            let resolution = match &target {
                Target::Field(field) => self.manual_field(field, &answers),
                Target::Group { id, label, members } => {
                    manual_group(&target, id, label, members, &answers)
                }
            };
            outcome.push(resolution);
        }
        info!(
            "Applied answer mapping to session {}: {} answers, {} pending",
            session.session_id,
            outcome.answers.len(),
            outcome.pending.len()
        );
        outcome
    }

    // ────────────────────────────────────────────────────────────────────
    // Per-field paths
    // ────────────────────────────────────────────────────────────────────

    async fn resolve_field(&self, field: &FormField) -> Resolution {
        let category = classify(field);
        debug!("Field {} classified as {:?}", field.field_id, category);

        if let Some(answer) = passive(field, category) {
            return answered(answer);
        }
        if let Some(answer) = self.document(field, category) {
            return answered(answer);
        }
        match category {
            FieldCategory::Resume => pending(field, "No CV document is available to attach."),
            FieldCategory::CoverLetterFile => {
                pending(field, "No cover letter file is available to attach.")
            }
            FieldCategory::CoverLetterText => {
                pending(field, "No cover letter text was supplied for this application.")
            }
            FieldCategory::OtherUpload => {
                pending(field, "Upload field with no matching candidate document.")
            }
            FieldCategory::Demographic | FieldCategory::Consent => sensitive(field, category),
            FieldCategory::Identity(key) => match self.lookup(field, key) {
                Some(answer) => answered(answer),
                None => self.judge_field(field).await,
            },
            _ => self.judge_field(field).await,
        }
    }

    /// Upload and cover-letter fields the supplied documents can fill.
    fn document(&self, field: &FormField, category: FieldCategory) -> Option<ResolvedAnswer> {
        let id = &field.field_id;
        match category {
            FieldCategory::Resume => self.knowledge.cv_path().map(|path| {
                ResolvedAnswer::knowledge_base(
                    id,
                    AnswerValue::text(path.display().to_string()),
                    format!("Attached CV document {}", path.display()),
                )
            }),
            FieldCategory::CoverLetterFile => self.knowledge.cover_letter_path().map(|path| {
                ResolvedAnswer::knowledge_base(
                    id,
                    AnswerValue::text(path.display().to_string()),
                    format!("Attached cover letter {}", path.display()),
                )
            }),
            FieldCategory::CoverLetterText => self.knowledge.cover_letter().map(|text| {
                ResolvedAnswer::knowledge_base(
                    id,
                    AnswerValue::text(text),
                    "Cover letter text supplied for this application.",
                )
            }),
            _ => None,
        }
    }

    fn lookup(&self, field: &FormField, key: ProfileKey) -> Option<ResolvedAnswer> {
        let fact = self.knowledge.lookup(key)?;
        let value = match field.field_type {
            FieldType::SingleSelect => {
                AnswerValue::text(match_option(&field.options, &fact.value)?.clone())
            }
            FieldType::MultiSelect => {
                AnswerValue::Selected(vec![match_option(&field.options, &fact.value)?.clone()])
            }
            FieldType::Checkbox if is_truthy(&fact.value) => AnswerValue::checked(true),
            FieldType::Checkbox if is_falsy(&fact.value) => AnswerValue::checked(false),
            FieldType::ShortText | FieldType::LongText => AnswerValue::text(fact.value.as_str()),
            _ => return None,
        };
        debug!("Field {} answered from {}", field.field_id, fact.path);
        Some(ResolvedAnswer::knowledge_base(
            &field.field_id,
            value,
            format!("Profile field {} = '{}'", fact.path, fact.value),
        ))
    }

    async fn judge_field(&self, field: &FormField) -> Resolution {
        let question = OracleQuestion {
            field_id: field.field_id.clone(),
            question: field.question_text().to_string(),
            field_type: field.field_type,
            options: field.options.clone(),
            required: field.required,
        };
        match self.judge(&question).await {
            Ok((value, reason)) => {
                answered(ResolvedAnswer::knowledge_base(&field.field_id, value, reason))
            }
            Err(reason) => pending(field, &reason),
        }
    }

    async fn resolve_group(
        &self,
        target: &Target<'_>,
        group_id: &str,
        label: &str,
        members: &[&FormField],
    ) -> Resolution {
        let category = members.first().map(|m| classify(m)).unwrap_or(FieldCategory::General);
        let ids: Vec<String> = members.iter().map(|m| m.field_id.clone()).collect();
        let labels: Vec<String> = members.iter().map(|m| m.label.clone()).collect();
        let required = members.iter().any(|m| m.required);

        if category.is_sensitive() {
            let kind = sensitive_kind(category);
            if !required {
                if let Some(option) = non_disclosure_option(&labels) {
                    let reason =
                        format!("Optional {kind} question; chose the non-disclosure option '{option}'.");
                    return Resolution::Answered(fan_out_group(
                        &ids,
                        &labels,
                        std::slice::from_ref(option),
                        AnswerSource::DefaultSkip,
                        &reason,
                    ));
                }
            }
            return Resolution::Pending(
                target.question(&format!("{kind} questions are answered only by the candidate.")),
            );
        }

        let question = OracleQuestion {
            field_id: group_id.to_string(),
            question: label.to_string(),
            field_type: FieldType::MultiSelect,
            options: labels.clone(),
            required,
        };
        match self.judge(&question).await {
            Ok((value, reason)) => Resolution::Answered(fan_out_group(
                &ids,
                &labels,
                &value.labels(),
                AnswerSource::KnowledgeBase,
                &reason,
            )),
            Err(reason) => Resolution::Pending(target.question(&reason)),
        }
    }

    /// Evidence retrieval and oracle judgment. `Err` carries the reason the
    /// question has to go to the candidate.
    async fn judge(&self, question: &OracleQuestion) -> Result<(AnswerValue, String), String> {
        let evidence = self.knowledge.search(&question.question, self.top_k);
        if evidence.is_empty() {
            debug!("No evidence for {}", question.field_id);
            return Err(NO_EVIDENCE_REASON.to_string());
        }

        let decision = self.oracle.judge(question, &evidence).await.map_err(|e| {
            warn!("Oracle failed for {}: {e}", question.field_id);
            format!("Judgment service unavailable: {e}")
        })?;

        match decision {
            Decision::CannotAnswer { reason } if reason.trim().is_empty() => {
                Err("The evidence does not answer this question.".to_string())
            }
            Decision::CannotAnswer { reason } => {
                Err(format!("Cannot answer from evidence: {}", reason.trim()))
            }
            Decision::Answer {
                value,
                evidence_ids,
                rationale,
            } => {
                let cited: Vec<&str> = evidence_ids
                    .iter()
                    .map(|id| id.trim())
                    .filter(|id| evidence.iter().any(|p| p.id == *id))
                    .collect();
                if cited.is_empty() {
                    warn!("Oracle answer for {} cited no supplied evidence", question.field_id);
                    return Err("Proposed answer did not cite any supplied evidence.".to_string());
                }
                let conformed = conform(question.field_type, &question.options, &value)
                    .ok_or_else(|| {
                        format!(
                            "Proposed answer '{}' does not fit this {} field.",
                            value.display(),
                            question.field_type.as_str()
                        )
                    })?;
                let rationale = match rationale.trim() {
                    "" => "Grounded in evidence",
                    r => r,
                };
                Ok((conformed, format!("{rationale} (evidence: {})", cited.join(", "))))
            }
        }
    }

    fn manual_field(&self, field: &FormField, answers: &ManualAnswers<'_>) -> Resolution {
        let category = classify(field);
        if let Some(answer) = passive(field, category) {
            return answered(answer);
        }
        let question = PendingQuestion::for_field(field, MANUAL_MISSING_REASON);
        if let Some(raw) = answers.get(&field.field_id, field.question_text()) {
            if let Some(resolution) = from_interpretation(&question, interpret(&question, raw)) {
                return resolution;
            }
        }
        if let Some(answer) = self.document(field, category) {
            return answered(answer);
        }
        missing(question)
    }
}

fn pending(field: &FormField, reason: &str) -> Resolution {
    Resolution::Pending(PendingQuestion::for_field(field, reason))
}

fn passive(field: &FormField, category: FieldCategory) -> Option<ResolvedAnswer> {
    let reason = match category {
        FieldCategory::Hidden => "Hidden field; the page's own value is kept.",
        FieldCategory::Captcha => "Captcha token; challenges are not solved automatically.",
        _ => return None,
    };
    Some(ResolvedAnswer::default_skip(
        &field.field_id,
        AnswerValue::text(""),
        reason,
    ))
}

fn sensitive_kind(category: FieldCategory) -> &'static str {
    match category {
        FieldCategory::Consent => "Consent",
        _ => "Self-identification",
    }
}

/// Sensitive fields take the non-disclosure option only when optional and
/// offering one. Otherwise they always go to the candidate.
fn sensitive(field: &FormField, category: FieldCategory) -> Resolution {
    let kind = sensitive_kind(category);
    if !field.required {
        if let Some(option) = non_disclosure_option(&field.options) {
            let value = if field.field_type == FieldType::MultiSelect {
                AnswerValue::Selected(vec![option.clone()])
            } else {
                AnswerValue::text(option.as_str())
            };
            info!("Field {} defaults to non-disclosure option", field.field_id);
            return answered(ResolvedAnswer::default_skip(
                &field.field_id,
                value,
                format!("Optional {kind} question; chose the non-disclosure option '{option}'."),
            ));
        }
    }
    pending(field, &format!("{kind} questions are answered only by the candidate."))
}

/// Normalises an oracle value to the field's shape; `None` if it cannot fit.
pub fn conform(field_type: FieldType, options: &[String], value: &AnswerValue) -> Option<AnswerValue> {
    match field_type {
        FieldType::SingleSelect => match value.labels().as_slice() {
            [only] => match_option(options, only).map(|o| AnswerValue::text(o.as_str())),
            _ => None,
        },
        FieldType::MultiSelect => {
            let labels = value.labels();
            if labels.is_empty() {
                return None;
            }
            let mut chosen: Vec<String> = Vec::new();
            for label in &labels {
                let option = match_option(options, label)?;
                if !chosen.contains(option) {
                    chosen.push(option.clone());
                }
            }
            Some(AnswerValue::Selected(chosen))
        }
        FieldType::Checkbox => {
            let text = value.as_text()?;
            if is_truthy(text) {
                Some(AnswerValue::checked(true))
            } else if is_falsy(text) {
                Some(AnswerValue::checked(false))
            } else {
                None
            }
        }
        FieldType::ShortText | FieldType::LongText => value
            .as_text()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(AnswerValue::text),
        _ => None,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Manual answers
// ────────────────────────────────────────────────────────────────────────────

struct ManualAnswers<'a> {
    by_id: &'a BTreeMap<String, Value>,
    by_label: BTreeMap<String, &'a Value>,
}

impl<'a> ManualAnswers<'a> {
    fn new(supplied: &'a BTreeMap<String, Value>) -> Self {
        let by_label = supplied
            .iter()
            .map(|(k, v)| (k.trim().to_lowercase(), v))
            .collect();
        Self {
            by_id: supplied,
            by_label,
        }
    }

    fn get(&self, id: &str, label: &str) -> Option<&'a Value> {
        self.by_id
            .get(id)
            .or_else(|| self.by_label.get(&label.trim().to_lowercase()).copied())
    }
}

/// `None` when the supplied value is still blank.
fn from_interpretation(question: &PendingQuestion, interpretation: Interpretation) -> Option<Resolution> {
    match interpretation {
        Interpretation::Answer(value) => Some(Resolution::Answered(question.fan_out(
            &value,
            AnswerSource::UserOverride,
            MANUAL_REASON,
        ))),
        Interpretation::Skipped(value) => Some(Resolution::Answered(question.fan_out(
            &value,
            AnswerSource::UserOverride,
            SKIPPED_REASON,
        ))),
        Interpretation::Invalid(reason) => {
            let mut question = question.clone();
            question.reason = reason;
            Some(Resolution::Pending(question))
        }
        Interpretation::Unanswered => None,
    }
}

/// No usable answer: required questions wait for the candidate, optional
/// ones are left blank with a reason.
fn missing(question: PendingQuestion) -> Resolution {
    if question.required {
        return Resolution::Pending(question);
    }
    let blank = AnswerValue::blank_for(question.field_type);
    Resolution::Answered(question.fan_out(
        &blank,
        AnswerSource::DefaultSkip,
        "Optional field left blank: not in the supplied answer mapping.",
    ))
}

fn manual_group(
    target: &Target<'_>,
    group_id: &str,
    label: &str,
    members: &[&FormField],
    answers: &ManualAnswers<'_>,
) -> Resolution {
    let question = target.question(MANUAL_MISSING_REASON);
    if let Some(raw) = answers.get(group_id, label) {
        if let Some(resolution) = from_interpretation(&question, interpret(&question, raw)) {
            return resolution;
        }
    }

    // Per-member keys: each checkbox answered on its own.
    let mut resolved = Vec::new();
    for member in members {
        let single = PendingQuestion::for_field(member, MANUAL_MISSING_REASON);
        let Some(raw) = answers.by_id.get(&member.field_id) else {
            continue;
        };
        match from_interpretation(&single, interpret(&single, raw)) {
            Some(Resolution::Answered(found)) => resolved.extend(found),
            Some(Resolution::Pending(q)) => return Resolution::Pending(PendingQuestion {
                reason: q.reason,
                ..question
            }),
            None => {}
        }
    }
    if resolved.len() == members.len() {
        return Resolution::Answered(resolved);
    }
    if question.required {
        return Resolution::Pending(question);
    }
    let answered_ids: HashSet<String> = resolved.iter().map(|a| a.field_id.clone()).collect();
    resolved.extend(
        members
            .iter()
            .filter(|m| !answered_ids.contains(&m.field_id))
            .map(|m| {
                ResolvedAnswer::default_skip(
                    &m.field_id,
                    AnswerValue::checked(false),
                    "Optional field left blank: not in the supplied answer mapping.",
                )
            }),
    );
    Resolution::Answered(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{field, group_member, knowledge, session_with, ScriptedOracle};
    use serde_json::json;

    fn resolver(oracle: ScriptedOracle) -> AnswerResolver {
        AnswerResolver::new(Arc::new(knowledge()), Arc::new(oracle), 6)
    }

    fn by_id(outcome: &ResolutionOutcome, id: &str) -> ResolvedAnswer {
        outcome
            .answers
            .iter()
            .find(|a| a.field_id == id)
            .cloned()
            .unwrap_or_else(|| panic!("no answer for {id}"))
    }

    #[tokio::test]
    async fn test_profile_lookup_answers_identity_fields() {
        let session = session_with(vec![
            field("first_name", "First name", FieldType::ShortText, &[], true),
            field("email", "Email address", FieldType::ShortText, &[], true),
            field(
                "country",
                "Country",
                FieldType::SingleSelect,
                &["France", "United Kingdom", "United States"],
                true,
            ),
        ]);
        let oracle = ScriptedOracle::new();
        let resolver = resolver(oracle.clone());
        let outcome = resolver.resolve(&session).await;

        assert!(outcome.pending.is_empty());
        assert_eq!(by_id(&outcome, "first_name").value, AnswerValue::text("Ada"));
        assert_eq!(by_id(&outcome, "email").value, AnswerValue::text("ada@example.com"));
        let country = by_id(&outcome, "country");
        assert_eq!(country.value, AnswerValue::text("United Kingdom"));
        assert_eq!(country.source, AnswerSource::KnowledgeBase);
        assert!(country.confidence_reason.contains("profile."));
        assert_eq!(oracle.calls(), 0);
    }

    #[tokio::test]
    async fn test_required_demographic_always_pending() {
        let session = session_with(vec![field(
            "disability",
            "Are you a person with a disability?",
            FieldType::SingleSelect,
            &["Yes", "No", "I prefer not to disclose"],
            true,
        )]);
        // Even an oracle willing to answer is never consulted.
        let oracle = ScriptedOracle::new().answer("disability", json!("No"), &["profile-1"]);
        let resolver = resolver(oracle.clone());
        let outcome = resolver.resolve(&session).await;

        assert!(outcome.answers.is_empty());
        assert_eq!(outcome.pending.len(), 1);
        assert_eq!(outcome.pending[0].field_id, "disability");
        assert_eq!(oracle.calls(), 0);
    }

    #[tokio::test]
    async fn test_optional_demographic_takes_non_disclosure_option() {
        let session = session_with(vec![
            field(
                "gender",
                "Gender",
                FieldType::SingleSelect,
                &["Female", "Male", "Prefer not to say"],
                false,
            ),
            field("veteran", "Veteran status", FieldType::SingleSelect, &["Yes", "No"], false),
        ]);
        let outcome = resolver(ScriptedOracle::new()).resolve(&session).await;

        let gender = by_id(&outcome, "gender");
        assert_eq!(gender.value, AnswerValue::text("Prefer not to say"));
        assert_eq!(gender.source, AnswerSource::DefaultSkip);
        // No non-disclosure option: the candidate decides.
        assert_eq!(outcome.pending.len(), 1);
        assert_eq!(outcome.pending[0].field_id, "veteran");
    }

    #[tokio::test]
    async fn test_demographic_never_answered_from_knowledge_across_fixtures() {
        let fixtures = vec![
            field("eth", "What is your ethnicity?", FieldType::SingleSelect, &["A", "B"], true),
            field("sex", "Sex", FieldType::SingleSelect, &["F", "M", "Decline to state"], true),
            field("pronouns", "Pronouns", FieldType::ShortText, &[], false),
            field("orientation", "Sexual orientation", FieldType::SingleSelect, &["X", "Y"], false),
            field("dis", "Disability status", FieldType::Checkbox, &[], false),
            group_member("eth-a", "Asian", "ethnic", "Ethnic background", false),
            group_member("eth-b", "White", "ethnic", "Ethnic background", false),
            group_member("eth-c", "Prefer not to say", "ethnic", "Ethnic background", false),
        ];
        let session = session_with(fixtures);
        let oracle = ScriptedOracle::new().answer_everything(json!("A"), &["profile-1"]);
        let outcome = resolver(oracle).resolve(&session).await;

        for answer in &outcome.answers {
            let field = session.field(&answer.field_id).unwrap();
            assert_ne!(answer.source, AnswerSource::KnowledgeBase, "{}", answer.field_id);
            // The only automatic answer allowed is an optional non-disclosure default.
            assert_eq!(answer.source, AnswerSource::DefaultSkip);
            assert!(!field.required);
        }
        let pending: Vec<_> = outcome.pending.iter().map(|q| q.field_id.as_str()).collect();
        assert_eq!(pending, vec!["eth", "sex", "pronouns", "orientation", "dis"]);
        assert!(by_id(&outcome, "eth-c").value.is_truthy());
        assert!(!by_id(&outcome, "eth-a").value.is_truthy());
    }

    #[tokio::test]
    async fn test_oracle_answer_requires_citation_and_fit() {
        let session = session_with(vec![
            field("years", "Years of Rust experience", FieldType::SingleSelect, &["0-2", "3-5", "6+"], true),
            field("kubernetes", "Describe your Kubernetes experience", FieldType::LongText, &[], true),
            field("salary", "Expected Rust salary", FieldType::ShortText, &[], true),
        ]);
        let oracle = ScriptedOracle::new()
            .answer("years of rust", json!("3-5"), &["cv-1"])
            .answer("kubernetes", json!("Ran clusters"), &["made-up-id"])
            .answer("salary", json!(["a", "b"]), &["cv-1"]);
        let outcome = resolver(oracle).resolve(&session).await;

        let years = by_id(&outcome, "years");
        assert_eq!(years.value, AnswerValue::text("3-5"));
        assert!(years.confidence_reason.contains("evidence: cv-1"));

        let reasons: BTreeMap<_, _> = outcome
            .pending
            .iter()
            .map(|q| (q.field_id.as_str(), q.reason.as_str()))
            .collect();
        assert!(reasons["kubernetes"].contains("did not cite"));
        assert!(reasons["salary"].contains("does not fit"));
    }

    #[tokio::test]
    async fn test_no_evidence_and_oracle_failure_go_pending() {
        let session = session_with(vec![
            field("zzz", "Favourite xylophone brand", FieldType::ShortText, &[], false),
            field("rust", "Why Rust?", FieldType::LongText, &[], true),
        ]);
        let outcome = resolver(ScriptedOracle::failing()).resolve(&session).await;
        assert_eq!(outcome.pending.len(), 2);
        assert_eq!(outcome.pending[0].reason, NO_EVIDENCE_REASON);
        assert!(outcome.pending[1].reason.starts_with("Judgment service unavailable"));
    }

    #[tokio::test]
    async fn test_documents_fill_uploads_and_cover_letter() {
        let session = session_with(vec![
            field("resume", "Resume/CV", FieldType::FileUpload, &[], true),
            field("cover", "Cover letter", FieldType::LongText, &[], false),
            field("sample", "Writing sample", FieldType::FileUpload, &[], false),
            field("token", "", FieldType::CaptchaToken, &[], false),
        ]);
        let outcome = resolver(ScriptedOracle::new()).resolve(&session).await;

        assert_eq!(by_id(&outcome, "resume").value, AnswerValue::text("/docs/ada-cv.pdf"));
        assert!(by_id(&outcome, "cover").value.display().starts_with("Dear hiring team"));
        assert_eq!(by_id(&outcome, "token").source, AnswerSource::DefaultSkip);
        assert_eq!(outcome.pending.len(), 1);
        assert_eq!(outcome.pending[0].field_id, "sample");
    }

    #[tokio::test]
    async fn test_checkbox_group_asked_once_and_fanned_out() {
        let session = session_with(vec![
            group_member("lang-rust", "Rust", "langs", "Languages you use", false),
            group_member("lang-go", "Go", "langs", "Languages you use", false),
            group_member("lang-ts", "TypeScript", "langs", "Languages you use", false),
        ]);
        let oracle = ScriptedOracle::new().answer("languages", json!(["Rust", "Go"]), &["cv-3"]);
        let outcome = resolver(oracle.clone()).resolve(&session).await;

        assert_eq!(oracle.calls(), 1);
        assert!(by_id(&outcome, "lang-rust").value.is_truthy());
        assert!(by_id(&outcome, "lang-go").value.is_truthy());
        assert!(!by_id(&outcome, "lang-ts").value.is_truthy());
        assert!(outcome.answers.iter().all(|a| a.confidence_reason == outcome.answers[0].confidence_reason));
    }

    #[tokio::test]
    async fn test_unanswerable_group_yields_one_pending_question() {
        let session = session_with(vec![
            group_member("perk-a", "Gym", "perks", "Perks you want", true),
            group_member("perk-b", "Lunch", "perks", "Perks you want", true),
        ]);
        let outcome = resolver(ScriptedOracle::new()).resolve(&session).await;
        assert!(outcome.answers.is_empty());
        assert_eq!(outcome.pending.len(), 1);
        assert_eq!(outcome.pending[0].field_id, "perks");
        assert_eq!(outcome.pending[0].member_field_ids, vec!["perk-a", "perk-b"]);
    }

    #[tokio::test]
    async fn test_resolution_is_idempotent_and_keeps_overrides() {
        let mut session = session_with(vec![
            field("first_name", "First name", FieldType::ShortText, &[], true),
            field("why", "Why do you want this Rust job?", FieldType::LongText, &[], false),
        ]);
        let oracle = ScriptedOracle::new();
        let resolver = resolver(oracle);

        let first = resolver.resolve(&session).await;
        let second = resolver.resolve(&session).await;
        assert_eq!(first, second);

        first.apply_to(&mut session);
        session.record_answer(ResolvedAnswer::user_override(
            "why",
            AnswerValue::text("Because."),
            "typed",
        ));
        session.pending.clear();
        let third = resolver.resolve(&session).await;
        assert!(third.answers.is_empty());
        assert!(third.pending.is_empty());
        assert_eq!(session.answers["why"].source, AnswerSource::UserOverride);
    }

    #[tokio::test]
    async fn test_grounded_country_outside_options_goes_pending() {
        let session = session_with(vec![field(
            "country",
            "Country",
            FieldType::SingleSelect,
            &["United States", "Canada"],
            true,
        )]);
        let outcome = resolver(ScriptedOracle::new()).resolve(&session).await;
        assert!(outcome.answers.is_empty());
        assert_eq!(outcome.pending.len(), 1);
        assert_eq!(outcome.pending[0].field_id, "country");
    }

    #[tokio::test]
    async fn test_extracted_ethnicity_fieldset_is_one_candidate_question() {
        let html = r#"<form><fieldset>
            <legend>Which ethnic groups do you identify with?</legend>
            <label><input type="checkbox" id="q7_a" name="q7_a"> Asian</label>
            <label><input type="checkbox" id="q7_b" name="q7_b"> Rust</label>
            <label><input type="checkbox" id="q7_c" name="q7_c"> White</label>
        </fieldset></form>"#;
        let session = session_with(crate::navigator::dom::extract_fields(html, 0));
        let oracle = ScriptedOracle::new().answer_everything(json!("true"), &["cv-1"]);
        let outcome = resolver(oracle.clone()).resolve(&session).await;

        assert_eq!(oracle.calls(), 0);
        assert!(outcome.answers.is_empty());
        assert_eq!(outcome.pending.len(), 1);
        let question = &outcome.pending[0];
        assert_eq!(question.field_id, "which-ethnic-groups-do-you-identify-with");
        assert_eq!(question.member_field_ids, vec!["q7_a", "q7_b", "q7_c"]);
    }

    #[tokio::test]
    async fn test_extracted_optional_ethnicity_fieldset_declines() {
        let html = r#"<form><fieldset>
            <legend>Ethnic background</legend>
            <label><input type="checkbox" id="eth_a" name="eth_a"> Asian</label>
            <label><input type="checkbox" id="eth_b" name="eth_b"> White</label>
            <label><input type="checkbox" id="eth_x" name="eth_x"> I prefer not to say</label>
        </fieldset></form>"#;
        let session = session_with(crate::navigator::dom::extract_fields(html, 0));
        let outcome = resolver(ScriptedOracle::new()).resolve(&session).await;

        assert!(outcome.pending.is_empty());
        assert!(outcome.answers.iter().all(|a| a.source == AnswerSource::DefaultSkip));
        assert!(by_id(&outcome, "eth_x").value.is_truthy());
        assert!(!by_id(&outcome, "eth_b").value.is_truthy());
    }

    #[test]
    fn test_manual_mapping_by_id_or_label() {
        let session = session_with(vec![
            field("first_name", "First name", FieldType::ShortText, &[], true),
            field("country", "Country", FieldType::SingleSelect, &["France", "Spain"], true),
            field("phone", "Phone", FieldType::ShortText, &[], true),
            field("referral", "How did you hear about us?", FieldType::ShortText, &[], false),
            group_member("lang-rust", "Rust", "langs", "Languages", false),
            group_member("lang-go", "Go", "langs", "Languages", false),
        ]);
        let supplied: BTreeMap<String, Value> = [
            ("first_name".to_string(), json!("Grace")),
            ("country".to_string(), json!(2)),
            ("langs".to_string(), json!(["go"])),
        ]
        .into_iter()
        .collect();
        let resolver = AnswerResolver::new(
            Arc::new(knowledge()),
            Arc::new(ScriptedOracle::new()),
            6,
        );
        let outcome = resolver.resolve_from_manual(&session, &supplied);

        assert_eq!(by_id(&outcome, "first_name").value, AnswerValue::text("Grace"));
        assert_eq!(by_id(&outcome, "first_name").source, AnswerSource::UserOverride);
        assert_eq!(by_id(&outcome, "country").value, AnswerValue::text("Spain"));
        assert!(by_id(&outcome, "lang-go").value.is_truthy());
        assert!(!by_id(&outcome, "lang-rust").value.is_truthy());
        assert_eq!(by_id(&outcome, "referral").source, AnswerSource::DefaultSkip);
        assert_eq!(outcome.pending.len(), 1);
        assert_eq!(outcome.pending[0].field_id, "phone");
        assert_eq!(outcome.pending[0].reason, MANUAL_MISSING_REASON);
    }

    #[test]
    fn test_conform_rejects_values_outside_options() {
        let options = vec!["Yes".to_string(), "No".to_string()];
        assert_eq!(
            conform(FieldType::SingleSelect, &options, &AnswerValue::text("yes")),
            Some(AnswerValue::text("Yes"))
        );
        assert_eq!(conform(FieldType::SingleSelect, &options, &AnswerValue::text("Perhaps")), None);
        assert_eq!(
            conform(FieldType::SingleSelect, &options, &AnswerValue::text("Not applicable")),
            None
        );
        assert_eq!(
            conform(FieldType::Checkbox, &[], &AnswerValue::text("TRUE")),
            Some(AnswerValue::checked(true))
        );
        assert_eq!(conform(FieldType::ShortText, &[], &AnswerValue::text("  ")), None);
        assert_eq!(
            conform(FieldType::MultiSelect, &options, &AnswerValue::Selected(vec!["No".into(), "no".into()])),
            Some(AnswerValue::Selected(vec!["No".into()]))
        );
    }
}
