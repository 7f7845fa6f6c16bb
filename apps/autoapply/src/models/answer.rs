use serde::{Deserialize, Serialize};

use crate::models::form::{FieldType, FormField};

/// A value destined for one field. Single-valued controls (text, single
/// select, checkbox, file path) carry `Text`; multi-selects carry `Selected`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Text(String),
    Selected(Vec<String>),
}

impl AnswerValue {
    pub fn text(value: impl Into<String>) -> Self {
        AnswerValue::Text(value.into())
    }

    pub fn checked(on: bool) -> Self {
        AnswerValue::Text(if on { "true" } else { "false" }.to_string())
    }

    /// The explicit "nothing" for a field type: unchecked, no selection, or
    /// empty text.
    pub fn blank_for(field_type: FieldType) -> Self {
        match field_type {
            FieldType::Checkbox => AnswerValue::checked(false),
            FieldType::MultiSelect => AnswerValue::Selected(Vec::new()),
            _ => AnswerValue::Text(String::new()),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            AnswerValue::Text(s) => s.trim().is_empty(),
            AnswerValue::Selected(values) => values.iter().all(|v| v.trim().is_empty()),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AnswerValue::Text(s) => Some(s),
            AnswerValue::Selected(_) => None,
        }
    }

    /// All labels this value selects, regardless of shape.
    pub fn labels(&self) -> Vec<String> {
        match self {
            AnswerValue::Text(s) if s.trim().is_empty() => Vec::new(),
            AnswerValue::Text(s) => vec![s.clone()],
            AnswerValue::Selected(values) => values.clone(),
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            AnswerValue::Text(s) => is_truthy(s),
            AnswerValue::Selected(values) => !values.is_empty(),
        }
    }

    pub fn display(&self) -> String {
        match self {
            AnswerValue::Text(s) => s.clone(),
            AnswerValue::Selected(values) => values.join(", "),
        }
    }
}

pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on" | "checked" | "agree" | "accept"
    )
}

pub fn is_falsy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "0" | "false" | "no" | "n" | "off" | "unchecked" | "decline"
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerSource {
    KnowledgeBase,
    UserOverride,
    DefaultSkip,
}

impl AnswerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerSource::KnowledgeBase => "knowledge_base",
            AnswerSource::UserOverride => "user_override",
            AnswerSource::DefaultSkip => "default_skip",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedAnswer {
    pub field_id: String,
    pub value: AnswerValue,
    pub source: AnswerSource,
    /// Citation or justification. Never empty.
    pub confidence_reason: String,
}

impl ResolvedAnswer {
    pub fn knowledge_base(field_id: &str, value: AnswerValue, reason: impl Into<String>) -> Self {
        Self::new(field_id, value, AnswerSource::KnowledgeBase, reason.into())
    }

    pub fn user_override(field_id: &str, value: AnswerValue, reason: impl Into<String>) -> Self {
        Self::new(field_id, value, AnswerSource::UserOverride, reason.into())
    }

    pub fn default_skip(field_id: &str, value: AnswerValue, reason: impl Into<String>) -> Self {
        Self::new(field_id, value, AnswerSource::DefaultSkip, reason.into())
    }

    fn new(field_id: &str, value: AnswerValue, source: AnswerSource, reason: String) -> Self {
        let confidence_reason = if reason.trim().is_empty() {
            format!("{} answer", source.as_str())
        } else {
            reason
        };
        Self {
            field_id: field_id.to_string(),
            value,
            source,
            confidence_reason,
        }
    }
}

/// A question waiting on the candidate. For checkbox groups `field_id` is the
/// group id and `member_field_ids[i]` is the checkbox behind `options[i]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingQuestion {
    pub field_id: String,
    pub label: String,
    pub field_type: FieldType,
    #[serde(default)]
    pub options: Vec<String>,
    pub required: bool,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub member_field_ids: Vec<String>,
}

impl PendingQuestion {
    pub fn for_field(field: &FormField, reason: impl Into<String>) -> Self {
        Self {
            field_id: field.field_id.clone(),
            label: field.label.clone(),
            field_type: field.field_type,
            options: field.options.clone(),
            required: field.required,
            reason: reason.into(),
            member_field_ids: Vec::new(),
        }
    }

    /// One multi-select question standing in for a group of checkboxes.
    pub fn for_group(
        group_id: &str,
        label: &str,
        members: &[&FormField],
        reason: impl Into<String>,
    ) -> Self {
        Self {
            field_id: group_id.to_string(),
            label: label.to_string(),
            field_type: FieldType::MultiSelect,
            options: members.iter().map(|m| m.label.clone()).collect(),
            required: members.iter().any(|m| m.required),
            reason: reason.into(),
            member_field_ids: members.iter().map(|m| m.field_id.clone()).collect(),
        }
    }

    pub fn is_group(&self) -> bool {
        !self.member_field_ids.is_empty()
    }

    /// Field ids this question accounts for.
    pub fn covered_field_ids(&self) -> Vec<String> {
        if self.is_group() {
            self.member_field_ids.clone()
        } else {
            vec![self.field_id.clone()]
        }
    }

    /// Turns one answer to this question into per-field answers, splitting
    /// group selections into a checked/unchecked value per member.
    pub fn fan_out(
        &self,
        value: &AnswerValue,
        source: AnswerSource,
        reason: &str,
    ) -> Vec<ResolvedAnswer> {
        if !self.is_group() {
            return vec![ResolvedAnswer::new(
                &self.field_id,
                value.clone(),
                source,
                reason.to_string(),
            )];
        }
        fan_out_group(
            &self.member_field_ids,
            &self.options,
            &value.labels(),
            source,
            reason,
        )
    }
}

pub fn fan_out_group(
    member_ids: &[String],
    member_labels: &[String],
    selected: &[String],
    source: AnswerSource,
    reason: &str,
) -> Vec<ResolvedAnswer> {
    member_ids
        .iter()
        .zip(member_labels)
        .map(|(id, label)| {
            let on = selected.iter().any(|s| s.trim().eq_ignore_ascii_case(label.trim()));
            ResolvedAnswer::new(id, AnswerValue::checked(on), source, reason.to_string())
        })
        .collect()
}
