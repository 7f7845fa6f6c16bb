use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::models::PendingQuestion;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingStatus {
    Pending,
    Resolved,
}

/// Machine-readable `pending_questions.json`.
#[derive(Debug, Clone, Serialize)]
pub struct PendingDocument<'a> {
    pub status: PendingStatus,
    pub job_id: &'a str,
    pub job_url: &'a str,
    pub session_id: String,
    pub updated_at: DateTime<Utc>,
    pub answers_file: String,
    pub questions: Vec<&'a PendingQuestion>,
}

/// Human-readable `pending_questions.md`: the same questions, with the
/// template to fill in.
pub fn markdown(doc: &PendingDocument<'_>, template: &BTreeMap<String, Value>) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Pending questions for {}\n\n", doc.job_id));
    out.push_str(&format!("- Job: {}\n", doc.job_url));
    out.push_str(&format!("- Session: {}\n", doc.session_id));
    out.push_str(&format!("- Updated: {}\n", doc.updated_at.to_rfc3339()));

    if doc.status == PendingStatus::Resolved {
        out.push_str("- Status: resolved\n\nEvery question has an answer. Nothing to do.\n");
        return out;
    }

    out.push_str(&format!(
        "- Status: pending ({} outstanding)\n\n",
        doc.questions.len()
    ));
    out.push_str(&format!(
        "Fill in `{}` next to this file, one value per field id. Option \
         questions take the option label or its number. Checkboxes take yes or \
         no. Multi-select questions take a list. Type \"skip\" to leave an \
         optional question blank.\n",
        doc.answers_file
    ));

    for (i, q) in doc.questions.iter().enumerate() {
        out.push_str(&format!("\n## {}. {}\n\n", i + 1, display_label(q)));
        out.push_str(&format!("- Field id: `{}`\n", q.field_id));
        out.push_str(&format!("- Type: {}\n", q.field_type.as_str()));
        out.push_str(&format!(
            "- Required: {}\n",
            if q.required { "yes" } else { "no" }
        ));
        out.push_str(&format!("- Why it is pending: {}\n", q.reason));
        if !q.options.is_empty() {
            out.push_str("- Options:\n");
            for (n, option) in q.options.iter().enumerate() {
                out.push_str(&format!("  {}. {}\n", n + 1, option));
            }
        }
    }

    out.push_str("\n## Answer template\n\n```json\n");
    out.push_str(&serde_json::to_string_pretty(template).unwrap_or_else(|_| "{}".to_string()));
    out.push_str("\n```\n");
    out
}

fn display_label(q: &PendingQuestion) -> &str {
    if q.label.trim().is_empty() {
        &q.field_id
    } else {
        &q.label
    }
}
