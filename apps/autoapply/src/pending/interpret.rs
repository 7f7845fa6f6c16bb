//! Turning a raw answer typed by the candidate into a value for a question.

use serde_json::Value;

use crate::models::answer::{is_falsy, is_truthy};
use crate::models::{AnswerValue, FieldType, PendingQuestion};

pub const SKIP_KEYWORD: &str = "skip";

#[derive(Debug, Clone, PartialEq)]
pub enum Interpretation {
    Answer(AnswerValue),
    /// The candidate typed "skip": an explicit, explained blank.
    Skipped(AnswerValue),
    /// Still null or empty in the template.
    Unanswered,
    Invalid(String),
}

pub fn interpret(question: &PendingQuestion, raw: &Value) -> Interpretation {
    if let Value::String(s) = raw {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Interpretation::Unanswered;
        }
        if trimmed.eq_ignore_ascii_case(SKIP_KEYWORD) {
            return skip(question);
        }
    }
    if raw.is_null() {
        return Interpretation::Unanswered;
    }
    match question.field_type {
        FieldType::Checkbox => checkbox(raw),
        FieldType::SingleSelect => single(question, raw),
        FieldType::MultiSelect => multi(question, raw),
        _ => text(raw),
    }
}

fn skip(question: &PendingQuestion) -> Interpretation {
    if question.required && question.field_type != FieldType::Checkbox {
        return Interpretation::Invalid(format!(
            "'{SKIP_KEYWORD}' is only accepted for optional questions and checkboxes; this one is required."
        ));
    }
    Interpretation::Skipped(AnswerValue::blank_for(question.field_type))
}

fn checkbox(raw: &Value) -> Interpretation {
    let on = match raw {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(1) => Some(true),
            Some(0) => Some(false),
            _ => None,
        },
        Value::String(s) if is_truthy(s) => Some(true),
        Value::String(s) if is_falsy(s) => Some(false),
        _ => None,
    };
    match on {
        Some(on) => Interpretation::Answer(AnswerValue::checked(on)),
        None => Interpretation::Invalid(format!("Expected yes or no, got {raw}.")),
    }
}

/// Exact label, case-insensitive label, or 1-based index.
fn resolve_option(options: &[String], raw: &Value) -> Option<String> {
    let by_index = |i: u64| {
        usize::try_from(i)
            .ok()
            .and_then(|i| i.checked_sub(1))
            .and_then(|i| options.get(i))
            .cloned()
    };
    match raw {
        Value::Number(n) => n.as_u64().and_then(by_index),
        Value::String(s) => {
            let s = s.trim();
            options
                .iter()
                .find(|o| o.as_str() == s)
                .or_else(|| options.iter().find(|o| o.trim().eq_ignore_ascii_case(s)))
                .cloned()
                .or_else(|| s.parse::<u64>().ok().and_then(by_index))
        }
        _ => None,
    }
}

fn not_an_option(question: &PendingQuestion, raw: &Value) -> Interpretation {
    Interpretation::Invalid(format!(
        "{raw} is not one of the options: {}.",
        question.options.join(", ")
    ))
}

fn single(question: &PendingQuestion, raw: &Value) -> Interpretation {
    let raw = match raw {
        Value::Array(items) if items.len() == 1 => &items[0],
        other => other,
    };
    match resolve_option(&question.options, raw) {
        Some(label) => Interpretation::Answer(AnswerValue::Text(label)),
        None => not_an_option(question, raw),
    }
}

fn multi(question: &PendingQuestion, raw: &Value) -> Interpretation {
    let items: Vec<Value> = match raw {
        Value::Array(items) => items.clone(),
        Value::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| Value::String(s.to_string()))
            .collect(),
        other => vec![other.clone()],
    };
    let mut chosen: Vec<String> = Vec::new();
    for item in &items {
        match resolve_option(&question.options, item) {
            Some(label) if !chosen.contains(&label) => chosen.push(label),
            Some(_) => {}
            None => return not_an_option(question, item),
        }
    }
    Interpretation::Answer(AnswerValue::Selected(chosen))
}

fn text(raw: &Value) -> Interpretation {
    match raw {
        Value::String(s) => Interpretation::Answer(AnswerValue::text(s.trim())),
        Value::Number(n) => Interpretation::Answer(AnswerValue::text(n.to_string())),
        Value::Bool(b) => Interpretation::Answer(AnswerValue::text(if *b { "Yes" } else { "No" })),
        other => Interpretation::Invalid(format!("Expected text, got {other}.")),
    }
}
