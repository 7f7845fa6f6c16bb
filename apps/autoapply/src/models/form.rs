use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Input categories the rest of the pipeline dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    ShortText,
    LongText,
    SingleSelect,
    MultiSelect,
    Checkbox,
    FileUpload,
    CaptchaToken,
    Hidden,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::ShortText => "short_text",
            FieldType::LongText => "long_text",
            FieldType::SingleSelect => "single_select",
            FieldType::MultiSelect => "multi_select",
            FieldType::Checkbox => "checkbox",
            FieldType::FileUpload => "file_upload",
            FieldType::CaptchaToken => "captcha_token",
            FieldType::Hidden => "hidden",
        }
    }

    /// Select types carry an option list; nothing else does.
    pub fn has_options(&self) -> bool {
        matches!(self, FieldType::SingleSelect | FieldType::MultiSelect)
    }
}

/// The kind of DOM control behind a field, which decides how it is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlKind {
    TextInput,
    TextArea,
    Select,
    RadioGroup,
    Checkbox,
    FileInput,
    Combobox,
    /// Rendered by the page itself (hidden inputs, captcha tokens). Never written.
    Passive,
}

/// Stable handle the submitter uses to find the control again in a fresh session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldLocator {
    pub css: String,
    pub control: ControlKind,
    /// Radio groups: one selector per option label.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub option_selectors: BTreeMap<String, String>,
}

impl FieldLocator {
    pub fn new(css: impl Into<String>, control: ControlKind) -> Self {
        Self {
            css: css.into(),
            control,
            option_selectors: BTreeMap::new(),
        }
    }

    /// Case-insensitive lookup of the selector for one radio option.
    pub fn option_selector(&self, label: &str) -> Option<&str> {
        self.option_selectors
            .iter()
            .find(|(option, _)| option.eq_ignore_ascii_case(label.trim()))
            .map(|(_, css)| css.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormField {
    pub field_id: String,
    pub label: String,
    pub field_type: FieldType,
    #[serde(default)]
    pub options: Vec<String>,
    pub required: bool,
    /// Set on checkboxes that render one logical multi-select question.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_label: Option<String>,
    pub selector: FieldLocator,
}

impl FormField {
    /// The text a person would read as the question.
    pub fn question_text(&self) -> &str {
        self.group_label.as_deref().unwrap_or(&self.label)
    }

    pub fn has_valid_options(&self) -> bool {
        self.field_type.has_options() == !self.options.is_empty()
    }
}

/// The control that opens the application flow from a job posting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyEntry {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    /// Links opening a new window are followed by navigation, not by clicking.
    #[serde(default)]
    pub follow_href: bool,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormStep {
    pub index: usize,
    pub fields: Vec<FormField>,
    /// Control that moves to the next step. `None` on the last step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advance_selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<PathBuf>,
}

/// Everything the navigator learned about one application flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredForm {
    pub job_url: String,
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<ApplyEntry>,
    pub steps: Vec<FormStep>,
}

impl DiscoveredForm {
    pub fn fields(&self) -> impl Iterator<Item = &FormField> {
        self.steps.iter().flat_map(|s| s.fields.iter())
    }

    pub fn field_count(&self) -> usize {
        self.steps.iter().map(|s| s.fields.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(field_type: FieldType, options: &[&str]) -> FormField {
        FormField {
            field_id: "f".to_string(),
            label: "Label".to_string(),
            field_type,
            options: options.iter().map(|s| s.to_string()).collect(),
            required: false,
            group_id: None,
            group_label: None,
            selector: FieldLocator::new("#f", ControlKind::TextInput),
        }
    }

    #[test]
    fn test_option_invariant() {
        assert!(field(FieldType::SingleSelect, &["Yes", "No"]).has_valid_options());
        assert!(!field(FieldType::SingleSelect, &[]).has_valid_options());
        assert!(field(FieldType::ShortText, &[]).has_valid_options());
        assert!(!field(FieldType::Checkbox, &["x"]).has_valid_options());
    }

    #[test]
    fn test_field_type_serializes_snake_case() {
        let json = serde_json::to_string(&FieldType::CaptchaToken).unwrap();
        assert_eq!(json, "\"captcha_token\"");
        assert_eq!(FieldType::LongText.as_str(), "long_text");
    }

    #[test]
    fn test_option_selector_lookup_ignores_case() {
        let mut locator = FieldLocator::new("[name='relocate']", ControlKind::RadioGroup);
        locator
            .option_selectors
            .insert("Yes".to_string(), "#relocate-yes".to_string());
        assert_eq!(locator.option_selector("yes"), Some("#relocate-yes"));
        assert_eq!(locator.option_selector("No"), None);
    }
}
