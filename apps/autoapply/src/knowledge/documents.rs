use std::path::Path;

use crate::knowledge::{KnowledgeError, Passage, PassageSource};

/// Paragraphs longer than this are split at word boundaries.
const MAX_PASSAGE_CHARS: usize = 700;

/// Reads a CV from disk. PDFs go through text extraction; anything else is
/// read as UTF-8 text.
pub fn load_cv_text(path: &Path) -> Result<String, KnowledgeError> {
    let is_pdf = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false);

    if is_pdf {
        pdf_extract::extract_text(path).map_err(|e| KnowledgeError::Document {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })
    } else {
        std::fs::read_to_string(path).map_err(|source| KnowledgeError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Collapses all whitespace runs (including non-breaking spaces) to one space.
pub fn normalize_text(text: &str) -> String {
    text.replace('\u{a0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// One passage per paragraph per page. Pages are separated by form feeds,
/// paragraphs by blank lines.
pub fn cv_passages(text: &str) -> Vec<Passage> {
    let mut passages = Vec::new();
    for (page_idx, page) in text.split('\u{c}').enumerate() {
        for paragraph in split_paragraphs(page) {
            let id = format!("cv-{}", passages.len() + 1);
            passages.push(Passage::new(
                id,
                PassageSource::Cv,
                Some(page_idx as u32 + 1),
                &paragraph,
            ));
        }
    }
    passages
}

pub fn cover_letter_passages(text: &str) -> Vec<Passage> {
    split_paragraphs(text)
        .into_iter()
        .enumerate()
        .map(|(i, p)| Passage::new(format!("cover-letter-{}", i + 1), PassageSource::CoverLetter, None, &p))
        .collect()
}

fn split_paragraphs(page: &str) -> Vec<String> {
    let normalized_newlines = page.replace("\r\n", "\n");
    let mut out = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in normalized_newlines.lines() {
        if line.trim().is_empty() {
            flush(&mut current, &mut out);
        } else {
            current.push(line);
        }
    }
    flush(&mut current, &mut out);
    out
}

fn flush(lines: &mut Vec<&str>, out: &mut Vec<String>) {
    if lines.is_empty() {
        return;
    }
    let paragraph = normalize_text(&lines.join(" "));
    lines.clear();
    if paragraph.is_empty() {
        return;
    }
    out.extend(window(&paragraph));
}

fn window(paragraph: &str) -> Vec<String> {
    if paragraph.len() <= MAX_PASSAGE_CHARS {
        return vec![paragraph.to_string()];
    }
    let mut chunks = Vec::new();
    let mut current = String::new();
    for word in paragraph.split(' ') {
        if !current.is_empty() && current.len() + word.len() + 1 > MAX_PASSAGE_CHARS {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
