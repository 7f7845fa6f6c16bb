use serde::Serialize;
use serde_json::Value;

use crate::knowledge::documents::normalize_text;
use crate::knowledge::KnowledgeError;

/// Canonical facts a form can ask for directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileKey {
    FirstName,
    LastName,
    FullName,
    Email,
    Phone,
    City,
    Country,
    PostalCode,
    Address,
    LinkedIn,
    GitHub,
    Website,
    CurrentTitle,
    CurrentCompany,
    WorkAuthorization,
}

/// Parent segments under which generic leaf names ("name", "title") are
/// taken to describe the candidate rather than an employer or project.
const IDENTITY_PARENTS: &[&str] = &[
    "profile", "meta", "contact", "personal", "basics", "candidate", "identity", "details",
];

impl ProfileKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileKey::FirstName => "first_name",
            ProfileKey::LastName => "last_name",
            ProfileKey::FullName => "full_name",
            ProfileKey::Email => "email",
            ProfileKey::Phone => "phone",
            ProfileKey::City => "city",
            ProfileKey::Country => "country",
            ProfileKey::PostalCode => "postal_code",
            ProfileKey::Address => "address",
            ProfileKey::LinkedIn => "linkedin",
            ProfileKey::GitHub => "github",
            ProfileKey::Website => "website",
            ProfileKey::CurrentTitle => "current_title",
            ProfileKey::CurrentCompany => "current_company",
            ProfileKey::WorkAuthorization => "work_authorization",
        }
    }

    /// Normalised leaf names that identify this key anywhere in the profile.
    fn leaf_aliases(&self) -> &'static [&'static str] {
        match self {
            ProfileKey::FirstName => &["firstname", "givenname", "forename"],
            ProfileKey::LastName => &["lastname", "surname", "familyname"],
            ProfileKey::FullName => &["fullname", "legalname", "candidatename"],
            ProfileKey::Email => &["email", "emailaddress", "mail"],
            ProfileKey::Phone => &["phone", "phonenumber", "mobile", "telephone", "tel"],
            ProfileKey::City => &["city", "town", "locality"],
            ProfileKey::Country => &["country", "countryname"],
            ProfileKey::PostalCode => &["postalcode", "postcode", "zip", "zipcode"],
            ProfileKey::Address => &["address", "streetaddress", "fulladdress"],
            ProfileKey::LinkedIn => &["linkedin", "linkedinurl", "linkedinprofile"],
            ProfileKey::GitHub => &["github", "githuburl", "githubprofile"],
            ProfileKey::Website => &["website", "portfolio", "personalwebsite", "homepage"],
            ProfileKey::CurrentTitle => &["currenttitle", "currentrole", "jobtitle", "headline"],
            ProfileKey::CurrentCompany => &["currentcompany", "currentemployer", "employer"],
            ProfileKey::WorkAuthorization => {
                &["workauthorization", "workauthorisation", "righttowork", "workpermit"]
            }
        }
    }

    /// Generic leaf names accepted only directly under an identity parent.
    fn identity_aliases(&self) -> &'static [&'static str] {
        match self {
            ProfileKey::FullName => &["name"],
            ProfileKey::CurrentTitle => &["title", "role"],
            ProfileKey::CurrentCompany => &["company"],
            ProfileKey::Website => &["url", "site"],
            _ => &[],
        }
    }
}

/// A profile value and the flattened path it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileFact {
    pub key: ProfileKey,
    pub value: String,
    pub path: String,
}

/// Structured candidate profile, flattened to `(path, value)` leaves such as
/// `profile.meta.contact.email`.
#[derive(Debug, Clone, Default)]
pub struct Profile {
    entries: Vec<(String, String)>,
}

impl Profile {
    pub fn from_value(value: &Value) -> Result<Self, KnowledgeError> {
        if !value.is_object() {
            return Err(KnowledgeError::ProfileShape(
                "profile document must be a JSON object".to_string(),
            ));
        }
        let mut entries = Vec::new();
        flatten(value, "profile", &mut entries);
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    pub fn lookup(&self, key: ProfileKey) -> Option<ProfileFact> {
        if let Some((path, value)) = self.find_leaf(key) {
            let value = match key {
                ProfileKey::Country => normalize_country(value),
                _ => value.to_string(),
            };
            return Some(ProfileFact {
                key,
                value,
                path: path.to_string(),
            });
        }
        self.derive(key)
    }

    fn find_leaf(&self, key: ProfileKey) -> Option<(&str, &str)> {
        self.entries
            .iter()
            .find(|(path, _)| {
                let (parent, leaf) = parent_and_leaf(path);
                key.leaf_aliases().contains(&leaf.as_str())
                    || (IDENTITY_PARENTS.contains(&parent.as_str())
                        && key.identity_aliases().contains(&leaf.as_str()))
                    || (key == ProfileKey::WorkAuthorization
                        && key.leaf_aliases().contains(&parent.as_str()))
            })
            .map(|(p, v)| (p.as_str(), v.as_str()))
    }

    /// Facts computed from other leaves: names split from a full name,
    /// names joined into one, city and country split from a location string.
    fn derive(&self, key: ProfileKey) -> Option<ProfileFact> {
        let fact = |value: String, path: String| {
            Some(ProfileFact { key, value, path })
        };
        match key {
            ProfileKey::FirstName | ProfileKey::LastName => {
                let (path, full) = self.find_leaf(ProfileKey::FullName)?;
                let mut words = full.split_whitespace();
                let value = if key == ProfileKey::FirstName {
                    words.next()?
                } else {
                    let last = words.last()?;
                    if full.split_whitespace().count() < 2 {
                        return None;
                    }
                    last
                };
                fact(value.to_string(), format!("{path} (split)"))
            }
            ProfileKey::FullName => {
                let (first_path, first) = self.find_leaf(ProfileKey::FirstName)?;
                let (_, last) = self.find_leaf(ProfileKey::LastName)?;
                fact(format!("{first} {last}"), format!("{first_path} + last name"))
            }
            ProfileKey::City | ProfileKey::Country | ProfileKey::Address => {
                let (path, location) = self.find_location()?;
                let parts: Vec<&str> = location
                    .split(|c: char| c == ',' || c == '/')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .collect();
                let value = match key {
                    ProfileKey::City => parts.first()?.to_string(),
                    ProfileKey::Country => normalize_country(parts.last()?),
                    _ => location.to_string(),
                };
                fact(value, format!("{path} (location)"))
            }
            _ => None,
        }
    }

    fn find_location(&self) -> Option<(&str, &str)> {
        self.entries
            .iter()
            .find(|(path, _)| {
                let (parent, leaf) = parent_and_leaf(path);
                matches!(leaf.as_str(), "location" | "basedin" | "currentlocation")
                    && IDENTITY_PARENTS.contains(&parent.as_str())
            })
            .map(|(p, v)| (p.as_str(), v.as_str()))
    }
}

fn flatten(value: &Value, prefix: &str, out: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                flatten(child, &format!("{prefix}.{key}"), out);
            }
        }
        Value::Array(items) => {
            for (idx, child) in items.iter().enumerate() {
                flatten(child, &format!("{prefix}[{idx}]"), out);
            }
        }
        Value::Null => {}
        Value::String(s) => push_leaf(prefix, s, out),
        other => push_leaf(prefix, &other.to_string(), out),
    }
}

fn push_leaf(path: &str, raw: &str, out: &mut Vec<(String, String)>) {
    let value = normalize_text(raw);
    if !value.is_empty() {
        out.push((path.to_string(), value));
    }
}

/// `profile.meta.contact.email` → (`contact`, `email`), normalised to
/// lowercase alphanumerics with list indices dropped.
fn parent_and_leaf(path: &str) -> (String, String) {
    let mut segments = path.rsplit('.').map(normalize_key);
    let leaf = segments.next().unwrap_or_default();
    let parent = segments.next().unwrap_or_default();
    (parent, leaf)
}

fn normalize_key(segment: &str) -> String {
    let without_index = segment.split('[').next().unwrap_or(segment);
    without_index
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

const COUNTRY_ALIASES: &[(&str, &str)] = &[
    ("uk", "United Kingdom"),
    ("u.k.", "United Kingdom"),
    ("gb", "United Kingdom"),
    ("great britain", "United Kingdom"),
    ("england", "United Kingdom"),
    ("united kingdom", "United Kingdom"),
    ("us", "United States"),
    ("u.s.", "United States"),
    ("usa", "United States"),
    ("united states of america", "United States"),
    ("uae", "United Arab Emirates"),
];

pub fn normalize_country(name: &str) -> String {
    let key = name.trim().to_ascii_lowercase();
    COUNTRY_ALIASES
        .iter()
        .find(|(alias, _)| *alias == key)
        .map(|(_, full)| full.to_string())
        .unwrap_or_else(|| name.trim().to_string())
}
