//! Pure HTML analysis: form fields, apply entries, step and submit controls.
//!
//! Everything here works on a page source string so it can be tested
//! without a browser.

use scraper::{ElementRef, Html, Node, Selector};
use std::collections::HashMap;
use tracing::debug;

use crate::models::{ApplyEntry, ControlKind, FieldLocator, FieldType, FormField};

const SKIP_INPUT_TYPES: &[&str] = &["submit", "button", "reset", "image"];
const TEXT_SKIP_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "svg", "select", "option", "textarea",
];
const SVG_NOISE: &str = "SVGs not supported by this browser.";

pub const COOKIE_ACCEPT_SELECTORS: &[&str] = &[
    "[data-ui='cookie-consent-accept']",
    "#onetrust-accept-btn-handler",
    "button[aria-label='Accept Cookies']",
    "button[aria-label='Accept all cookies']",
    "#accept-cookies",
];

const APPLY_KEYWORDS: &[&str] = &[
    "apply",
    "get started",
    "start application",
    "i'm interested",
    "proceed",
];
const ADVANCE_KEYWORDS: &[&str] = &["next", "continue", "proceed", "save and continue"];
const STRONG_SUBMIT_KEYWORDS: &[&str] = &["submit"];
const SUBMIT_KEYWORDS: &[&str] = &[
    "send application",
    "apply",
    "finish",
    "complete application",
    "send",
];

/// Per-selector query that tolerates invalid CSS by matching nothing.
pub fn select_all<'a>(root: ElementRef<'a>, css: &str) -> Vec<ElementRef<'a>> {
    match Selector::parse(css) {
        Ok(selector) => root.select(&selector).collect(),
        Err(_) => {
            debug!("Skipping invalid selector {css}");
            Vec::new()
        }
    }
}

pub fn exists(html: &str, css: &str) -> bool {
    let doc = Html::parse_document(html);
    !select_all(doc.root_element(), css).is_empty()
}

/// Collapses whitespace and strips screen-reader noise and required markers.
pub fn clean_text(raw: &str) -> String {
    let collapsed = raw
        .replace(SVG_NOISE, " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    collapsed.trim_end_matches(|c: char| c == '*' || c.is_whitespace()).trim().to_string()
}

fn raw_text(el: ElementRef<'_>) -> String {
    let mut parts = Vec::new();
    collect_text(el, &mut parts);
    parts.join(" ")
}

fn collect_text(el: ElementRef<'_>, parts: &mut Vec<String>) {
    if TEXT_SKIP_TAGS.contains(&el.value().name()) {
        return;
    }
    for child in el.children() {
        match child.value() {
            Node::Text(text) => {
                let t = text.trim();
                if !t.is_empty() {
                    parts.push(t.to_string());
                }
            }
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    collect_text(child_el, parts);
                }
            }
            _ => {}
        }
    }
}

fn attr<'a>(el: ElementRef<'a>, name: &str) -> Option<&'a str> {
    el.value().attr(name).map(str::trim).filter(|v| !v.is_empty())
}

fn input_type(el: ElementRef<'_>) -> String {
    el.value()
        .attr("type")
        .unwrap_or("text")
        .trim()
        .to_ascii_lowercase()
}

/// CSS string literal for attribute selectors.
fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn is_css_ident(value: &str) -> bool {
    let mut chars = value.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn id_selector(id: &str) -> String {
    if is_css_ident(id) {
        format!("#{id}")
    } else {
        format!("[id={}]", quote(id))
    }
}

fn ancestors<'a>(el: ElementRef<'a>) -> impl Iterator<Item = ElementRef<'a>> {
    el.ancestors().filter_map(ElementRef::wrap)
}

fn by_id<'a>(doc: &'a Html, id: &str) -> Option<ElementRef<'a>> {
    select_all(doc.root_element(), &id_selector(id)).into_iter().next()
}

// ────────────────────────────────────────────────────────────────────────────
// Selectors
// ────────────────────────────────────────────────────────────────────────────

/// Stable selector for an element. `unique` asks for one that singles out a
/// specific radio or checkbox among siblings sharing a name.
pub fn build_selector(el: ElementRef<'_>, unique: bool) -> String {
    let tag = el.value().name();
    if unique {
        if let (Some(name), Some(value)) = (attr(el, "name"), attr(el, "value")) {
            return format!("{tag}[name={}][value={}]", quote(name), quote(value));
        }
        if let Some(id) = attr(el, "id") {
            return id_selector(id);
        }
    } else if let Some(name) = attr(el, "name") {
        return format!("{tag}[name={}]", quote(name));
    }
    if let Some(data_ui) = attr(el, "data-ui") {
        return format!("[data-ui={}]", quote(data_ui));
    }
    if let Some(test_id) = attr(el, "data-testid") {
        return format!("[data-testid={}]", quote(test_id));
    }
    if let Some(id) = attr(el, "id") {
        return id_selector(id);
    }
    if let Some(labelledby) = attr(el, "aria-labelledby") {
        if let Some(first) = labelledby.split_whitespace().next() {
            return format!("{tag}[aria-labelledby~={}]", quote(first));
        }
    }
    if let Some(placeholder) = attr(el, "placeholder") {
        return format!("{tag}[placeholder={}]", quote(placeholder));
    }
    structural_path(el)
}

/// `html > body:nth-child(2) > ... > input:nth-child(3)`. Always resolves to
/// this element in an unchanged document.
fn structural_path(el: ElementRef<'_>) -> String {
    let mut segments = Vec::new();
    let mut current = Some(el);
    while let Some(node) = current {
        let position = node
            .prev_siblings()
            .filter(|s| s.value().is_element())
            .count()
            + 1;
        let name = node.value().name();
        if name == "html" {
            segments.push("html".to_string());
            break;
        }
        segments.push(format!("{name}:nth-child({position})"));
        current = node.parent().and_then(ElementRef::wrap);
    }
    segments.reverse();
    segments.join(" > ")
}

// ────────────────────────────────────────────────────────────────────────────
// Labels
// ────────────────────────────────────────────────────────────────────────────

fn labelledby_text(doc: &Html, el: ElementRef<'_>) -> Option<String> {
    let refs = attr(el, "aria-labelledby")?;
    let text = refs
        .split_whitespace()
        .filter_map(|id| by_id(doc, id))
        .map(raw_text)
        .collect::<Vec<_>>()
        .join(" ");
    (!clean_text(&text).is_empty()).then_some(text)
}

/// Raw label text in precedence order: aria-labelledby, `<label for>`,
/// wrapping `<label>`, aria-label, a `data-question` container, placeholder.
fn find_label(doc: &Html, el: ElementRef<'_>) -> Option<String> {
    if let Some(text) = labelledby_text(doc, el) {
        return Some(text);
    }
    if let Some(id) = attr(el, "id") {
        let css = format!("label[for={}]", quote(id));
        if let Some(label) = select_all(doc.root_element(), &css).into_iter().next() {
            let text = raw_text(label);
            if !clean_text(&text).is_empty() {
                return Some(text);
            }
        }
    }
    if let Some(label) = ancestors(el).find(|a| a.value().name() == "label") {
        let text = raw_text(label);
        if !clean_text(&text).is_empty() {
            return Some(text);
        }
    }
    if let Some(aria) = attr(el, "aria-label") {
        return Some(aria.to_string());
    }
    if let Some(question) = ancestors(el).find_map(|a| attr(a, "data-question")) {
        return Some(question.to_string());
    }
    attr(el, "placeholder").map(str::to_string)
}

/// Question text a grouping element gives the controls inside it.
fn container_label(doc: &Html, el: ElementRef<'_>) -> Option<String> {
    let role = attr(el, "role").unwrap_or_default();
    if el.value().name() == "fieldset" || role == "radiogroup" || role == "group" {
        if let Some(text) = labelledby_text(doc, el) {
            return Some(text);
        }
        if let Some(aria) = attr(el, "aria-label") {
            return Some(aria.to_string());
        }
        if let Some(legend) = select_all(el, "legend").into_iter().next() {
            return Some(raw_text(legend));
        }
    }
    attr(el, "data-question").map(str::to_string)
}

/// Question text shared by a radio or checkbox group.
fn find_group_label(doc: &Html, el: ElementRef<'_>) -> Option<String> {
    ancestors(el).find_map(|a| container_label(doc, a))
}

fn marks_required(el: ElementRef<'_>, raw_label: Option<&str>) -> bool {
    el.value().attr("required").is_some()
        || attr(el, "aria-required") == Some("true")
        || raw_label
            .map(|l| l.replace(SVG_NOISE, "").trim_end().ends_with('*'))
            .unwrap_or(false)
}

fn humanize(id: &str) -> String {
    let spaced: String = id
        .chars()
        .map(|c| if c == '_' || c == '-' || c == '[' || c == ']' { ' ' } else { c })
        .collect();
    clean_text(&spaced)
}

fn slug(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

// ────────────────────────────────────────────────────────────────────────────
// Field extraction
// ────────────────────────────────────────────────────────────────────────────

fn form_controls(doc: &Html) -> Vec<ElementRef<'_>> {
    let root = doc.root_element();
    let forms = select_all(root, "form");
    let scopes = if forms.is_empty() { vec![root] } else { forms };
    scopes
        .into_iter()
        .flat_map(|scope| select_all(scope, "input, textarea, select"))
        .collect()
}

fn checkbox_group_key(el: ElementRef<'_>) -> Option<String> {
    attr(el, "name").map(|n| n.trim_end_matches("[]").to_string())
}

/// Nearest fieldset, `role=group` or `data-question` element around a control.
fn question_container(el: ElementRef<'_>) -> Option<ElementRef<'_>> {
    ancestors(el).find(|a| {
        a.value().name() == "fieldset"
            || matches!(attr(*a, "role"), Some("group" | "radiogroup"))
            || attr(*a, "data-question").is_some()
    })
}

/// A container frames one multi-option question only when checkboxes are
/// the sole controls inside it.
fn holds_only_checkboxes(container: ElementRef<'_>) -> bool {
    select_all(container, "input, textarea, select").into_iter().all(|c| {
        let kind = input_type(c);
        c.value().name() == "input"
            && (matches!(kind.as_str(), "checkbox" | "hidden") || SKIP_INPUT_TYPES.contains(&kind.as_str()))
    })
}

/// Group id from the question container, when it frames two or more checkboxes.
fn container_group(doc: &Html, el: ElementRef<'_>, counts: &HashMap<String, usize>) -> Option<String> {
    let container = question_container(el)?;
    let members = counts.get(&structural_path(container)).copied().unwrap_or(0);
    (members >= 2 && holds_only_checkboxes(container)).then(|| container_group_id(doc, container))
}

fn container_group_id(doc: &Html, container: ElementRef<'_>) -> String {
    attr(container, "id")
        .map(str::to_string)
        .or_else(|| {
            container_label(doc, container)
                .map(|l| slug(&clean_text(&l)))
                .filter(|s| !s.is_empty())
        })
        .unwrap_or_else(|| slug(&structural_path(container)))
}

fn is_captcha(el: ElementRef<'_>) -> bool {
    ["name", "id", "class"].iter().any(|a| {
        el.value()
            .attr(a)
            .map(|v| v.to_ascii_lowercase().contains("captcha"))
            .unwrap_or(false)
    })
}

fn is_combobox(el: ElementRef<'_>) -> bool {
    attr(el, "role") == Some("combobox") || attr(el, "aria-autocomplete") == Some("list")
}

/// Every fillable control on the page, in document order. Radio buttons
/// collapse into one single-select per group. Checkboxes sharing a name
/// become group members, and so do differently named checkboxes framed by
/// one fieldset or question container.
pub fn extract_fields(html: &str, step_index: usize) -> Vec<FormField> {
    let doc = Html::parse_document(html);
    let controls = form_controls(&doc);

    let mut checkbox_counts: HashMap<String, usize> = HashMap::new();
    let mut container_counts: HashMap<String, usize> = HashMap::new();
    for el in &controls {
        if el.value().name() == "input" && input_type(*el) == "checkbox" {
            if let Some(key) = checkbox_group_key(*el) {
                *checkbox_counts.entry(key).or_default() += 1;
            }
            if let Some(container) = question_container(*el) {
                *container_counts.entry(structural_path(container)).or_default() += 1;
            }
        }
    }

    let mut fields: Vec<FormField> = Vec::new();
    let mut radio_slots: HashMap<String, usize> = HashMap::new();

    for (position, el) in controls.iter().copied().enumerate() {
        let tag = el.value().name();
        let kind = input_type(el);
        if tag == "input" && SKIP_INPUT_TYPES.contains(&kind.as_str()) {
            continue;
        }
        if tag == "input" && kind == "radio" {
            add_radio(&doc, el, step_index, position, &mut fields, &mut radio_slots);
            continue;
        }
        if tag == "input" && kind == "checkbox" {
            let group = checkbox_group_key(el)
                .filter(|k| checkbox_counts.get(k).copied().unwrap_or(0) >= 2)
                .or_else(|| container_group(&doc, el, &container_counts));
            fields.push(checkbox_field(&doc, el, step_index, position, group));
            continue;
        }
        fields.push(plain_field(&doc, el, step_index, position));
    }
    fields
}

fn base_field_id(el: ElementRef<'_>, step_index: usize, position: usize) -> String {
    attr(el, "name")
        .or_else(|| attr(el, "id"))
        .or_else(|| attr(el, "data-ui"))
        .map(str::to_string)
        .unwrap_or_else(|| format!("field-{step_index}-{position}"))
}

fn plain_field(doc: &Html, el: ElementRef<'_>, step_index: usize, position: usize) -> FormField {
    let tag = el.value().name();
    let itype = input_type(el);
    let (field_type, control) = if is_captcha(el) {
        (FieldType::CaptchaToken, ControlKind::Passive)
    } else {
        match (tag, itype.as_str()) {
            ("textarea", _) => (FieldType::LongText, ControlKind::TextArea),
            ("select", _) if el.value().attr("multiple").is_some() => {
                (FieldType::MultiSelect, ControlKind::Select)
            }
            ("select", _) => (FieldType::SingleSelect, ControlKind::Select),
            (_, "hidden") => (FieldType::Hidden, ControlKind::Passive),
            (_, "file") => (FieldType::FileUpload, ControlKind::FileInput),
            _ if is_combobox(el) => (FieldType::ShortText, ControlKind::Combobox),
            _ => (FieldType::ShortText, ControlKind::TextInput),
        }
    };

    // A select without real options stays in the list; discovery decides
    // whether the step can still be accounted for.
    let options = if tag == "select" { select_options(el) } else { Vec::new() };

    let field_id = base_field_id(el, step_index, position);
    let raw_label = find_label(doc, el);
    let label = raw_label
        .as_deref()
        .map(clean_text)
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| humanize(&field_id));

    FormField {
        required: marks_required(el, raw_label.as_deref()),
        field_id,
        label,
        field_type,
        options,
        group_id: None,
        group_label: None,
        selector: FieldLocator::new(build_selector(el, false), control),
    }
}

fn select_options(el: ElementRef<'_>) -> Vec<String> {
    select_all(el, "option")
        .into_iter()
        .filter(|o| o.value().attr("value").map(|v| !v.trim().is_empty()).unwrap_or(true))
        .map(|o| clean_text(&o.text().collect::<Vec<_>>().join(" ")))
        .filter(|label| !label.is_empty())
        .collect()
}

fn option_label(doc: &Html, el: ElementRef<'_>) -> String {
    find_label(doc, el)
        .map(|l| clean_text(&l))
        .filter(|l| !l.is_empty())
        .or_else(|| attr(el, "value").map(str::to_string))
        .unwrap_or_else(|| "Option".to_string())
}

fn add_radio(
    doc: &Html,
    el: ElementRef<'_>,
    step_index: usize,
    position: usize,
    fields: &mut Vec<FormField>,
    slots: &mut HashMap<String, usize>,
) {
    let key = attr(el, "name")
        .or_else(|| attr(el, "id"))
        .map(str::to_string)
        .unwrap_or_else(|| format!("radio-{step_index}-{position}"));
    let label = option_label(doc, el);
    let option_css = build_selector(el, true);
    let required = el.value().attr("required").is_some();

    if let Some(&slot) = slots.get(&key) {
        let field = &mut fields[slot];
        field.options.push(label.clone());
        field.selector.option_selectors.insert(label, option_css);
        field.required |= required;
        return;
    }

    let group_label = find_group_label(doc, el).map(|l| clean_text(&l)).filter(|l| !l.is_empty());
    let css = match attr(el, "name") {
        Some(name) => format!("input[name={}]", quote(name)),
        None => option_css.clone(),
    };
    let mut locator = FieldLocator::new(css, ControlKind::RadioGroup);
    locator.option_selectors.insert(label.clone(), option_css);

    slots.insert(key.clone(), fields.len());
    fields.push(FormField {
        label: group_label.unwrap_or_else(|| label.clone()),
        field_id: key,
        field_type: FieldType::SingleSelect,
        options: vec![label],
        required,
        group_id: None,
        group_label: None,
        selector: locator,
    });
}

fn checkbox_field(
    doc: &Html,
    el: ElementRef<'_>,
    step_index: usize,
    position: usize,
    group: Option<String>,
) -> FormField {
    let raw_label = find_label(doc, el);
    let label = option_label(doc, el);
    let required = marks_required(el, raw_label.as_deref());
    let selector = FieldLocator::new(build_selector(el, true), ControlKind::Checkbox);

    match group {
        Some(group_id) => {
            let member_id = attr(el, "id")
                .map(str::to_string)
                .or_else(|| checkbox_group_key(el).filter(|name| *name != group_id))
                .unwrap_or_else(|| {
                    let suffix = attr(el, "value").map(slug).unwrap_or_else(|| slug(&label));
                    format!("{group_id}-{suffix}")
                });
            let group_label = find_group_label(doc, el)
                .map(|l| clean_text(&l))
                .filter(|l| !l.is_empty())
                .unwrap_or_else(|| humanize(&group_id));
            FormField {
                field_id: member_id,
                label,
                field_type: FieldType::Checkbox,
                options: Vec::new(),
                required,
                group_id: Some(group_id),
                group_label: Some(group_label),
                selector,
            }
        }
        None => FormField {
            field_id: base_field_id(el, step_index, position),
            label,
            field_type: FieldType::Checkbox,
            options: Vec::new(),
            required,
            group_id: None,
            group_label: None,
            selector,
        },
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Flow controls
// ────────────────────────────────────────────────────────────────────────────

fn control_text(el: ElementRef<'_>) -> String {
    let text = clean_text(&raw_text(el));
    if !text.is_empty() {
        return text;
    }
    attr(el, "value")
        .or_else(|| attr(el, "aria-label"))
        .or_else(|| attr(el, "title"))
        .map(clean_text)
        .unwrap_or_default()
}

fn inside_form(el: ElementRef<'_>) -> bool {
    ancestors(el).any(|a| a.value().name() == "form")
}

/// True for controls that would submit the enclosing form when clicked.
fn submits_form(el: ElementRef<'_>) -> bool {
    let tag = el.value().name();
    let kind = el.value().attr("type").map(|t| t.to_ascii_lowercase());
    match tag {
        "button" => inside_form(el) && kind.as_deref().unwrap_or("submit") == "submit",
        "input" => kind.as_deref() == Some("submit"),
        _ => false,
    }
}

/// Controls that open an application flow, most confident first.
pub fn detect_apply_entries(html: &str) -> Vec<ApplyEntry> {
    let doc = Html::parse_document(html);
    let mut entries: Vec<ApplyEntry> = Vec::new();
    let candidates = select_all(
        doc.root_element(),
        "a, button, [role='button'], input[type='button'], input[type='submit']",
    );
    for el in candidates {
        if submits_form(el) {
            continue;
        }
        let label = control_text(el);
        let lower = label.to_lowercase();
        if label.is_empty() || label.len() > 60 || !APPLY_KEYWORDS.iter().any(|k| lower.contains(k)) {
            continue;
        }
        let href = attr(el, "href")
            .filter(|h| !h.starts_with('#') && !h.to_ascii_lowercase().starts_with("javascript:"))
            .map(str::to_string);
        let is_anchor = el.value().name() == "a";
        let selector = if is_anchor && attr(el, "id").is_none() && attr(el, "data-ui").is_none() {
            href.as_deref()
                .map(|h| format!("a[href={}]", quote(h)))
                .unwrap_or_else(|| build_selector(el, false))
        } else {
            build_selector(el, false)
        };
        if entries.iter().any(|e| e.selector.as_deref() == Some(selector.as_str())) {
            continue;
        }
        let follow_href = is_anchor && href.is_some() && attr(el, "target") == Some("_blank");
        entries.push(ApplyEntry {
            confidence: if lower.contains("apply") { 0.9 } else { 0.6 },
            label,
            selector: Some(selector),
            href,
            follow_href,
        });
    }
    entries.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    entries
}

fn buttons(doc: &Html) -> Vec<ElementRef<'_>> {
    select_all(
        doc.root_element(),
        "button, input[type='submit'], input[type='button'], [role='button']",
    )
}

/// The control that moves a multi-step form forward, if any.
pub fn find_advance_control(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    buttons(&doc)
        .into_iter()
        .find(|el| {
            let lower = control_text(*el).to_lowercase();
            ADVANCE_KEYWORDS.iter().any(|k| lower.contains(k))
                && !lower.contains("submit")
                && !lower.contains("apply")
        })
        .map(|el| build_selector(el, false))
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubmitControl {
    pub selector: String,
    pub label: String,
}

/// The final submit control. Explicit "submit" wording beats other submit
/// phrases, which beat an unlabeled `type=submit`.
pub fn find_submit_control(html: &str) -> Option<SubmitControl> {
    let doc = Html::parse_document(html);
    let mut best: Option<(u8, SubmitControl)> = None;
    for el in buttons(&doc) {
        let label = control_text(el);
        let lower = label.to_lowercase();
        let is_advance = ADVANCE_KEYWORDS.iter().any(|k| lower.contains(k));
        let score = if STRONG_SUBMIT_KEYWORDS.iter().any(|k| lower.contains(k)) {
            3
        } else if !is_advance && SUBMIT_KEYWORDS.iter().any(|k| lower.contains(k)) {
            2
        } else if !is_advance && submits_form(el) {
            1
        } else {
            continue;
        };
        if best.as_ref().map(|(s, _)| score > *s).unwrap_or(true) {
            best = Some((
                score,
                SubmitControl {
                    selector: build_selector(el, false),
                    label,
                },
            ));
        }
    }
    best.map(|(_, control)| control)
}

/// Canvas-rendered or iframe-embedded application surfaces.
pub fn embedded_surface(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let root = doc.root_element();
    if !select_all(root, "canvas").is_empty() {
        return Some("application form is rendered on a canvas".to_string());
    }
    select_all(root, "iframe")
        .into_iter()
        .filter_map(|f| attr(f, "src"))
        .find(|src| !src.eq_ignore_ascii_case("about:blank"))
        .map(|src| format!("application form is embedded in an iframe from {src}"))
}

/// Lowercased visible text of the page, for outcome markers.
pub fn page_text(html: &str) -> String {
    let doc = Html::parse_document(html);
    let mut parts = Vec::new();
    collect_text(doc.root_element(), &mut parts);
    parts.join(" ").to_lowercase()
}
