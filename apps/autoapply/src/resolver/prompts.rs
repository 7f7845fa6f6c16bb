// Prompt constants for the answer oracle.
// Reuses cross-cutting fragments from llm_client::prompts.

use crate::llm_client::prompts::{GROUNDING_INSTRUCTION, JSON_ONLY_SYSTEM, SENSITIVE_INSTRUCTION};

/// System prompt for answering one application question from evidence.
pub fn oracle_system() -> String {
    format!(
        "You fill in job application forms on behalf of a candidate, using only \
         what the candidate's own documents say. {JSON_ONLY_SYSTEM}"
    )
}

/// Answer prompt template. Replace `{question}`, `{field_type}`, `{required}`,
/// `{options}`, `{evidence}` and `{rules}` before sending.
pub const ANSWER_PROMPT_TEMPLATE: &str = r#"Answer one question from a job application form.

QUESTION: {question}
FIELD TYPE: {field_type}
REQUIRED: {required}
OPTIONS:
{options}

EVIDENCE PASSAGES (id: text):
{evidence}

Return a JSON object with EXACTLY one of these two shapes:
{"decision": "answer", "value": "<text or one option label>", "evidence_ids": ["cv-1"], "rationale": "<one sentence>"}
{"decision": "answer", "value": ["<option label>", "<option label>"], "evidence_ids": ["profile-2"], "rationale": "<one sentence>"}
{"decision": "cannot_answer", "reason": "<why the evidence does not settle it>"}

Rules:
- single_select: value is exactly one label copied from OPTIONS.
- multi_select: value is a list of labels copied from OPTIONS.
- checkbox: value is "true" or "false".
- short_text: one line, no more than 200 characters.
- long_text: a few sentences in the first person, as the candidate.
- evidence_ids lists only ids shown above.

{rules}"#;

/// Shown in place of an option list for free-text fields.
pub const NO_OPTIONS: &str = "(free text)";

pub fn answer_rules() -> String {
    format!("{GROUNDING_INSTRUCTION}\n\n{SENSITIVE_INSTRUCTION}")
}
