//! Query processing
//!
//! Turns a raw query string into the derived forms the retrieval channels
//! consume: a token set for lexical matching and zero or more candidate
//! relation patterns for the triple channel. The third derived form, the
//! query embedding, is produced by the configured [`quarry_common::Embedder`]
//! on the semantic branch only, so the other channels never wait for it.

use quarry_common::errors::{AppError, Result};
use quarry_common::store::keys;
use regex_lite::Regex;
use std::sync::OnceLock;

/// A candidate (subject, predicate, object) pattern detected in the query.
/// `None` slots are wildcards.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationPattern {
    pub subject: Option<String>,
    pub predicate: Option<String>,
    pub object: Option<String>,
}

impl RelationPattern {
    /// Number of non-wildcard slots
    pub fn filled_slots(&self) -> usize {
        [&self.subject, &self.predicate, &self.object]
            .iter()
            .filter(|s| s.is_some())
            .count()
    }
}

/// Derived query forms shared by the lexical and relation channels
#[derive(Debug, Clone)]
pub struct ParsedQuery {
    pub raw: String,
    /// Lowercased, stopword-filtered terms; duplicates preserved for
    /// term-frequency weighting
    pub tokens: Vec<String>,
    pub patterns: Vec<RelationPattern>,
}

/// Relation verbs recognized as predicate candidates
const PREDICATE_LEXICON: &[&str] = &[
    "increased", "decreased", "grew", "rose", "fell", "declined", "gained", "lost", "acquired",
    "announced", "reported", "launched", "released", "contains", "causes", "caused", "reduces",
    "reduced", "improves", "improved", "supports", "requires", "provides", "uses", "shows",
    "showed", "includes", "produces", "generates", "exceeded", "reached", "doubled",
];

fn sentence_split_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[.!?]+\s+").expect("static regex"))
}

fn word_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[a-zA-Z0-9%]+").expect("static regex"))
}

pub struct QueryProcessor;

impl QueryProcessor {
    pub fn new() -> Self {
        Self
    }

    /// Parse a raw query. Fails with `InvalidQuery` when the trimmed query
    /// is empty; otherwise this is a pure transform.
    pub fn parse(&self, raw: &str) -> Result<ParsedQuery> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AppError::InvalidQuery {
                message: "query must not be empty".to_string(),
            });
        }

        let tokens = keys::tokenize(trimmed);

        let mut patterns = Vec::new();
        for sentence in sentence_split_regex().split(trimmed) {
            if let Some(pattern) = detect_pattern(sentence) {
                patterns.push(pattern);
            }
        }

        Ok(ParsedQuery {
            raw: trimmed.to_string(),
            tokens,
            patterns,
        })
    }
}

impl Default for QueryProcessor {
    fn default() -> Self {
        Self::new()
    }
}

/// Heuristic subject-verb-object detection over one sentence.
///
/// Finds the first predicate candidate with at least one content word
/// before it; everything before becomes the subject slot, everything after
/// the object slot (wildcard when absent). Queries with no recognizable
/// verb produce no pattern, which leaves the relation channel keyed on
/// plain token overlap.
fn detect_pattern(sentence: &str) -> Option<RelationPattern> {
    let words: Vec<String> = word_regex()
        .find_iter(&sentence.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect();

    let predicate_pos = words.iter().enumerate().skip(1).find_map(|(i, w)| {
        if is_predicate_candidate(w) {
            Some(i)
        } else {
            None
        }
    })?;

    let subject = slot_text(&words[..predicate_pos])?;
    let object = slot_text(&words[predicate_pos + 1..]);

    Some(RelationPattern {
        subject: Some(subject),
        predicate: Some(words[predicate_pos].clone()),
        object,
    })
}

fn is_predicate_candidate(word: &str) -> bool {
    PREDICATE_LEXICON.contains(&word)
        || (word.len() > 4 && word.ends_with("ed"))
        || (word.len() > 5 && word.ends_with("ing"))
}

/// Join the content words of a slot, dropping stop words; None when the
/// slot has no content words (wildcard)
fn slot_text(words: &[String]) -> Option<String> {
    let content: Vec<&str> = words
        .iter()
        .map(|w| w.as_str())
        .filter(|w| !keys::STOPWORDS.contains(w))
        .collect();
    if content.is_empty() {
        None
    } else {
        Some(content.join(" "))
    }
}
