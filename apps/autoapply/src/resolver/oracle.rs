use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::knowledge::Passage;
use crate::llm_client::{CallOptions, LlmClient, LlmError};
use crate::models::{AnswerValue, FieldType};
use crate::resolver::prompts::{answer_rules, oracle_system, ANSWER_PROMPT_TEMPLATE, NO_OPTIONS};

/// What the oracle is asked about one field.
#[derive(Debug, Clone, PartialEq)]
pub struct OracleQuestion {
    pub field_id: String,
    pub question: String,
    pub field_type: FieldType,
    pub options: Vec<String>,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Answer {
        value: AnswerValue,
        #[serde(default)]
        evidence_ids: Vec<String>,
        #[serde(default)]
        rationale: String,
    },
    CannotAnswer {
        #[serde(default)]
        reason: String,
    },
}

/// Decides one answer from retrieved evidence. The resolver checks every
/// decision against the passages it supplied, so implementations may be wrong
/// but cannot smuggle in uncited answers.
#[async_trait]
pub trait JudgmentOracle: Send + Sync {
    async fn judge(&self, question: &OracleQuestion, evidence: &[Passage]) -> Result<Decision, LlmError>;
}

pub struct LlmOracle {
    llm: LlmClient,
}

impl LlmOracle {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl JudgmentOracle for LlmOracle {
    async fn judge(&self, question: &OracleQuestion, evidence: &[Passage]) -> Result<Decision, LlmError> {
        let prompt = build_prompt(question, evidence);
        let options = CallOptions {
            max_tokens: if question.field_type == FieldType::LongText { 1024 } else { 300 },
            temperature: 0.0,
        };
        let decision: Decision = self.llm.call_json(&prompt, &oracle_system(), options).await?;
        debug!("Oracle decision for {}: {:?}", question.field_id, decision);
        Ok(decision)
    }
}

pub fn build_prompt(question: &OracleQuestion, evidence: &[Passage]) -> String {
    let options = if question.options.is_empty() {
        NO_OPTIONS.to_string()
    } else {
        question
            .options
            .iter()
            .map(|o| format!("- {o}"))
            .collect::<Vec<_>>()
            .join("\n")
    };
    let evidence = evidence
        .iter()
        .map(|p| format!("[{}] {}", p.id, p.text))
        .collect::<Vec<_>>()
        .join("\n\n");

    ANSWER_PROMPT_TEMPLATE
        .replace("{question}", &question.question)
        .replace("{field_type}", question.field_type.as_str())
        .replace("{required}", if question.required { "yes" } else { "no" })
        .replace("{options}", &options)
        .replace("{evidence}", &evidence)
        .replace("{rules}", &answer_rules())
}
