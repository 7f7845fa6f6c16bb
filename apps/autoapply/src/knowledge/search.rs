//! Token-overlap relevance search over knowledge passages.
//!
//! Scores are `|query ∩ passage| / |query|` over lowercased alphanumeric
//! tokens with stopwords removed. Ties keep passage insertion order so the
//! same query over the same knowledge base always returns the same list.

use std::collections::HashSet;

use crate::knowledge::Passage;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "can", "do", "does", "for", "from", "have",
    "how", "i", "if", "in", "is", "it", "of", "on", "or", "please", "the", "this", "to", "what",
    "when", "where", "which", "who", "will", "with", "you", "your",
];

pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_ascii_lowercase())
        .collect()
}

/// Query-side tokens: deduplicated, stopwords removed.
pub fn query_terms(query: &str) -> HashSet<String> {
    tokenize(query)
        .into_iter()
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}

#[derive(Debug, Clone)]
pub struct ScoredPassage<'a> {
    pub passage: &'a Passage,
    pub score: f64,
}

pub fn rank<'a>(query: &str, passages: &'a [Passage], top_k: usize) -> Vec<ScoredPassage<'a>> {
    let terms = query_terms(query);
    if terms.is_empty() || top_k == 0 {
        return Vec::new();
    }

    let mut scored: Vec<ScoredPassage<'a>> = passages
        .iter()
        .filter_map(|passage| {
            let overlap = terms.iter().filter(|t| passage.has_token(t)).count();
            if overlap == 0 {
                return None;
            }
            Some(ScoredPassage {
                passage,
                score: overlap as f64 / terms.len() as f64,
            })
        })
        .collect();

    // Stable sort: equal scores stay in insertion order.
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.truncate(top_k);
    scored
}
