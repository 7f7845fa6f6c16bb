pub mod documents;
pub mod profile;
pub mod search;

use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

pub use profile::{Profile, ProfileFact, ProfileKey};

#[derive(Debug, Error)]
pub enum KnowledgeError {
    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("profile at {path} is not valid JSON: {source}")]
    ProfileJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("profile has an unsupported shape: {0}")]
    ProfileShape(String),

    #[error("could not extract text from {path}: {detail}")]
    Document { path: PathBuf, detail: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassageSource {
    Profile,
    Cv,
    CoverLetter,
}

/// A searchable unit of candidate evidence.
#[derive(Debug, Clone, Serialize)]
pub struct Passage {
    pub id: String,
    pub source: PassageSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    pub text: String,
    #[serde(skip)]
    tokens: HashSet<String>,
}

impl Passage {
    pub fn new(id: String, source: PassageSource, page: Option<u32>, text: &str) -> Self {
        Self {
            id,
            source,
            page,
            text: text.to_string(),
            tokens: search::tokenize(text).into_iter().collect(),
        }
    }

    pub fn has_token(&self, token: &str) -> bool {
        self.tokens.contains(token)
    }
}

/// Per-session document overrides supplied with a trigger.
#[derive(Debug, Clone, Default)]
pub struct SessionDocuments {
    pub cv_path: Option<PathBuf>,
    pub cover_letter_text: Option<String>,
    /// Where the cover letter text lives on disk, for upload fields.
    pub cover_letter_path: Option<PathBuf>,
}

impl SessionDocuments {
    pub fn is_empty(&self) -> bool {
        self.cv_path.is_none() && self.cover_letter_text.is_none()
    }
}

/// Read-only candidate facts: profile, CV, and cover letter. Built once at
/// startup (or per session with overrides) and shared behind an `Arc`.
#[derive(Debug, Clone)]
pub struct KnowledgeBase {
    profile: Profile,
    /// Profile leaves, CV passages, then cover letter paragraphs.
    passages: Vec<Passage>,
    cv_path: Option<PathBuf>,
    cover_letter: Option<String>,
    cover_letter_path: Option<PathBuf>,
}

impl KnowledgeBase {
    pub fn load(
        profile_path: &Path,
        cv_path: Option<&Path>,
        cover_letter_path: Option<&Path>,
    ) -> Result<Self, KnowledgeError> {
        let raw = std::fs::read_to_string(profile_path).map_err(|source| KnowledgeError::Io {
            path: profile_path.to_path_buf(),
            source,
        })?;
        let value: serde_json::Value =
            serde_json::from_str(&raw).map_err(|source| KnowledgeError::ProfileJson {
                path: profile_path.to_path_buf(),
                source,
            })?;

        let cv_text = cv_path.map(documents::load_cv_text).transpose()?;
        let cover_letter = cover_letter_path
            .map(|p| {
                std::fs::read_to_string(p).map_err(|source| KnowledgeError::Io {
                    path: p.to_path_buf(),
                    source,
                })
            })
            .transpose()?;

        let kb = Self::from_parts(
            &value,
            cv_path.map(Path::to_path_buf).zip(cv_text),
            cover_letter_path.map(Path::to_path_buf).zip(cover_letter),
        )?;
        info!(
            "Knowledge base loaded: {} profile facts, {} passages, cv={}, cover_letter={}",
            kb.profile.entries().len(),
            kb.passages.len(),
            kb.cv_path.is_some(),
            kb.cover_letter.is_some()
        );
        Ok(kb)
    }

    /// Builds a knowledge base from already-loaded documents.
    pub fn from_parts(
        profile: &serde_json::Value,
        cv: Option<(PathBuf, String)>,
        cover_letter: Option<(PathBuf, String)>,
    ) -> Result<Self, KnowledgeError> {
        let profile = Profile::from_value(profile)?;
        let mut kb = Self {
            passages: Vec::new(),
            profile,
            cv_path: None,
            cover_letter: None,
            cover_letter_path: None,
        };
        let (cv_path, cv_text) = cv.unzip();
        kb.cv_path = cv_path;
        kb.rebuild_passages(cv_text.as_deref());
        if let Some((path, text)) = cover_letter {
            kb.set_cover_letter(text, Some(path));
        }
        Ok(kb)
    }

    /// Copy of this knowledge base with per-session documents swapped in.
    pub fn with_session_documents(
        &self,
        overrides: &SessionDocuments,
    ) -> Result<Self, KnowledgeError> {
        let mut kb = self.clone();
        if let Some(cv_path) = &overrides.cv_path {
            let text = documents::load_cv_text(cv_path)?;
            kb.cv_path = Some(cv_path.clone());
            kb.passages.retain(|p| p.source != PassageSource::Cv);
            let cv = documents::cv_passages(&text);
            let insert_at = kb
                .passages
                .iter()
                .position(|p| p.source == PassageSource::CoverLetter)
                .unwrap_or(kb.passages.len());
            let cover_letter = kb.passages.split_off(insert_at);
            kb.passages.extend(cv);
            kb.passages.extend(cover_letter);
        }
        if let Some(text) = &overrides.cover_letter_text {
            kb.set_cover_letter(text.clone(), overrides.cover_letter_path.clone());
        }
        Ok(kb)
    }

    fn rebuild_passages(&mut self, cv_text: Option<&str>) {
        self.passages = self
            .profile
            .entries()
            .iter()
            .enumerate()
            .map(|(i, (path, value))| {
                Passage::new(
                    format!("profile-{}", i + 1),
                    PassageSource::Profile,
                    None,
                    &format!("{path}: {value}"),
                )
            })
            .collect();
        if let Some(text) = cv_text {
            self.passages.extend(documents::cv_passages(text));
        }
    }

    fn set_cover_letter(&mut self, text: String, path: Option<PathBuf>) {
        let cleaned = text.trim().to_string();
        self.passages.retain(|p| p.source != PassageSource::CoverLetter);
        if cleaned.is_empty() {
            self.cover_letter = None;
            self.cover_letter_path = None;
            return;
        }
        self.passages
            .extend(documents::cover_letter_passages(&cleaned));
        self.cover_letter = Some(cleaned);
        self.cover_letter_path = path;
    }

    pub fn lookup(&self, key: ProfileKey) -> Option<ProfileFact> {
        self.profile.lookup(key)
    }

    /// Top `top_k` passages by token overlap. Deterministic.
    pub fn search(&self, query: &str, top_k: usize) -> Vec<Passage> {
        search::rank(query, &self.passages, top_k)
            .into_iter()
            .map(|hit| hit.passage.clone())
            .collect()
    }

    pub fn passage_count(&self) -> usize {
        self.passages.len()
    }

    pub fn cv_path(&self) -> Option<&Path> {
        self.cv_path.as_deref()
    }

    pub fn cover_letter(&self) -> Option<&str> {
        self.cover_letter.as_deref()
    }

    pub fn cover_letter_path(&self) -> Option<&Path> {
        self.cover_letter_path.as_deref()
    }
}
