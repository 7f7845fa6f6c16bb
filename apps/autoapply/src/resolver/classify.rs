//! Field categorisation by question wording.
//!
//! Matching is done on a normalised, space-padded token string so that
//! "sex" does not match "Sussex" and "age" does not match "page".

use crate::knowledge::profile::normalize_country;
use crate::knowledge::ProfileKey;
use crate::models::{FieldType, FormField};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldCategory {
    Hidden,
    Captcha,
    Resume,
    CoverLetterFile,
    OtherUpload,
    /// Self-identification (EEO) questions. Only the candidate answers these.
    Demographic,
    /// Consent, privacy, and marketing agreements. Only the candidate answers these.
    Consent,
    CoverLetterText,
    Identity(ProfileKey),
    General,
}

impl FieldCategory {
    pub fn is_sensitive(&self) -> bool {
        matches!(self, FieldCategory::Demographic | FieldCategory::Consent)
    }
}

const DEMOGRAPHIC_TERMS: &[&str] = &[
    "gender",
    "sex",
    "pronoun",
    "pronouns",
    "ethnicity",
    "ethnic",
    "race",
    "racial",
    "hispanic",
    "latino",
    "veteran",
    "military status",
    "disability",
    "disabled",
    "sexual orientation",
    "transgender",
    "lgbt",
    "lgbtq",
    "religion",
    "religious",
    "belief",
    "age",
    "age range",
    "date of birth",
    "marital",
    "caste",
    "neurodivergent",
    "self identify",
    "self identification",
    "demographic",
    "equal opportunity",
    "eeo",
];

const CONSENT_TERMS: &[&str] = &[
    "consent",
    "privacy",
    "gdpr",
    "cookie",
    "cookies",
    "data processing",
    "terms and conditions",
    "terms of service",
    "marketing",
    "newsletter",
    "subscribe",
];

/// Only checked on checkboxes and selects, where agreement wording means a
/// consent control rather than a question.
const AGREEMENT_TERMS: &[&str] = &[
    "i agree",
    "agree to",
    "i accept",
    "acknowledge",
    "i certify",
    "i confirm",
];

const NON_DISCLOSURE_PHRASES: &[&str] = &[
    "prefer not to",
    "decline to",
    "do not wish",
    "don't wish",
    "rather not",
    "not to disclose",
    "choose not to",
    "wish not to",
    "i do not want to answer",
    "not specified",
];

const RESUME_TERMS: &[&str] = &["resume", "résumé", "cv", "curriculum vitae", "curriculum"];

/// Ordered identity rules: the first matching phrase wins.
const IDENTITY_RULES: &[(&[&str], ProfileKey)] = &[
    (&["first name", "given name", "forename", "firstname"], ProfileKey::FirstName),
    (&["last name", "surname", "family name", "lastname"], ProfileKey::LastName),
    (&["full name", "legal name", "your name"], ProfileKey::FullName),
    (&["email", "e mail"], ProfileKey::Email),
    (&["phone", "mobile", "telephone", "phone number"], ProfileKey::Phone),
    (&["linkedin"], ProfileKey::LinkedIn),
    (&["github"], ProfileKey::GitHub),
    (&["website", "portfolio", "personal site"], ProfileKey::Website),
    (&["postcode", "postal code", "zip", "zip code"], ProfileKey::PostalCode),
    (&["city", "town", "locality"], ProfileKey::City),
    (&["country", "country of residence"], ProfileKey::Country),
    (&["address", "street"], ProfileKey::Address),
    (&["current title", "job title", "current role", "current position"], ProfileKey::CurrentTitle),
    (&["current company", "current employer", "employer"], ProfileKey::CurrentCompany),
    (
        &["right to work", "work authorization", "work authorisation", "authorized to work", "authorised to work", "eligible to work"],
        ProfileKey::WorkAuthorization,
    ),
];

/// Lowercase alphanumeric tokens joined by single spaces, padded at both ends.
pub fn normalize(text: &str) -> String {
    let tokens: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect();
    format!(" {} ", tokens.join(" "))
}

fn has_term(normalized: &str, terms: &[&str]) -> bool {
    terms
        .iter()
        .any(|term| normalized.contains(&normalize(term)))
}

/// Text used to classify a field: its question, label, and id.
fn descriptor(field: &FormField) -> String {
    let mut parts = vec![field.question_text().to_string()];
    if field.group_label.is_some() {
        parts.push(field.label.clone());
    }
    parts.push(field.field_id.clone());
    normalize(&parts.join(" "))
}

pub fn classify(field: &FormField) -> FieldCategory {
    match field.field_type {
        FieldType::Hidden => return FieldCategory::Hidden,
        FieldType::CaptchaToken => return FieldCategory::Captcha,
        _ => {}
    }
    let text = descriptor(field);
    let question = normalize(field.question_text());

    if field.field_type == FieldType::FileUpload {
        return if has_term(&text, &["cover letter", "coverletter", "motivation letter"]) {
            FieldCategory::CoverLetterFile
        } else if has_term(&text, RESUME_TERMS) {
            FieldCategory::Resume
        } else {
            FieldCategory::OtherUpload
        };
    }

    if has_term(&text, DEMOGRAPHIC_TERMS) {
        return FieldCategory::Demographic;
    }
    if has_term(&text, CONSENT_TERMS)
        || (matches!(field.field_type, FieldType::Checkbox | FieldType::SingleSelect)
            && has_term(&question, AGREEMENT_TERMS))
    {
        return FieldCategory::Consent;
    }
    if has_term(&text, &["cover letter", "coverletter", "motivation letter"]) {
        return FieldCategory::CoverLetterText;
    }
    if let Some(key) = identity_key(&question) {
        return FieldCategory::Identity(key);
    }
    if field.field_type != FieldType::Checkbox {
        if question.trim() == "name" || normalize(&field.field_id).trim() == "name" {
            return FieldCategory::Identity(ProfileKey::FullName);
        }
        if let Some(key) = identity_key(&normalize(&field.field_id)) {
            return FieldCategory::Identity(key);
        }
    }
    FieldCategory::General
}

fn identity_key(normalized: &str) -> Option<ProfileKey> {
    // "Email address" must not read as a postal address.
    IDENTITY_RULES
        .iter()
        .find(|(terms, _)| has_term(normalized, terms))
        .map(|(_, key)| *key)
}

/// The option that declines to disclose, if the field offers one.
pub fn non_disclosure_option(options: &[String]) -> Option<&String> {
    options.iter().find(|option| {
        let lower = option.to_lowercase().replace('’', "'");
        NON_DISCLOSURE_PHRASES.iter().any(|p| lower.contains(p))
    })
}

/// The option a grounded value names: a case-insensitive exact match, the
/// same country under a known alias, or an answer that opens with the
/// option as its own clause ("Yes, I have the right to work" picks "Yes").
/// Partial overlaps never match; those values go to the candidate.
pub fn match_option<'a>(options: &'a [String], preferred: &str) -> Option<&'a String> {
    let wanted = preferred.trim().to_lowercase();
    if wanted.is_empty() {
        return None;
    }
    let country = normalize_country(&wanted).to_lowercase();
    options
        .iter()
        .find(|o| o.trim().to_lowercase() == wanted)
        .or_else(|| {
            options
                .iter()
                .find(|o| normalize_country(o).to_lowercase() == country)
        })
        .or_else(|| {
            options
                .iter()
                .find(|o| opens_with_clause(&wanted, &o.trim().to_lowercase()))
        })
}

fn opens_with_clause(wanted: &str, option: &str) -> bool {
    if option.is_empty() {
        return false;
    }
    match wanted.strip_prefix(option) {
        Some(rest) => rest
            .trim_start()
            .starts_with(|c: char| matches!(c, ',' | ';' | ':' | '.' | '-' | '(')),
        None => false,
    }
}
