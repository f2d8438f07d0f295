//! Derived search keys
//!
//! The lexical and relation indexes are driven by keys computed from chunk
//! and triple text at write time. Derivation is an explicit pure function
//! so the same logic is testable independent of any storage engine.

use regex_lite::Regex;
use std::sync::OnceLock;

/// Stop words excluded from lexical keys and query token sets
pub const STOPWORDS: &[&str] = &[
    "the", "is", "are", "was", "were", "and", "or", "of", "to", "in", "for", "with", "using",
    "through", "based", "by", "a", "an",
];

fn word_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[a-zA-Z0-9%]+").expect("static regex"))
}

/// Tokenize text into lowercased terms, dropping stop words and short
/// all-alphabetic terms. Digit-bearing terms ("2024", "20%", "q3") are
/// kept at any length so numeric facts stay searchable. Duplicates are
/// preserved so term frequency survives into scoring.
pub fn tokenize(text: &str) -> Vec<String> {
    word_regex()
        .find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .filter(|w| {
            let significant = w.len() > 2 || w.chars().any(|c| c.is_ascii_digit());
            significant && !STOPWORDS.contains(&w.as_str())
        })
        .collect()
}

/// Lexical search key for a chunk, derived from its text
pub fn lexical_key(chunk_text: &str) -> Vec<String> {
    tokenize(chunk_text)
}

/// Relation search key for a triple, derived from its three text fields
pub fn relation_key(subject: &str, predicate: &str, object: &str) -> Vec<String> {
    let mut key = tokenize(subject);
    key.extend(tokenize(predicate));
    key.extend(tokenize(object));
    key
}

/// Normalize a slot or field for exact comparison
pub fn normalize(text: &str) -> String {
    text.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Character-bigram Dice similarity in [0,1]. Used for fuzzy slot matching
/// in the relation channel, where "increase" should still match
/// "increased".
pub fn bigram_similarity(a: &str, b: &str) -> f32 {
    let a = normalize(a);
    let b = normalize(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }

    let bigrams = |s: &str| -> Vec<(char, char)> {
        let chars: Vec<char> = s.chars().collect();
        chars.windows(2).map(|w| (w[0], w[1])).collect()
    };

    let mut a_grams = bigrams(&a);
    let b_grams = bigrams(&b);
    if a_grams.is_empty() || b_grams.is_empty() {
        return 0.0;
    }

    let total = a_grams.len() + b_grams.len();
    let mut overlap = 0usize;
    for g in &b_grams {
        if let Some(pos) = a_grams.iter().position(|x| x == g) {
            a_grams.swap_remove(pos);
            overlap += 1;
        }
    }

    (2.0 * overlap as f32) / total as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_lowercases_and_filters() {
        let tokens = tokenize("The Revenue increased BY 20% in Q3");
        assert_eq!(tokens, vec!["revenue", "increased", "20%", "q3"]);
    }

    #[test]
    fn test_tokenize_keeps_numeric_terms() {
        let tokens = tokenize("fiscal 2024 results grew 20%");
        assert!(tokens.contains(&"2024".to_string()));
        assert!(tokens.contains(&"20%".to_string()));
    }

    #[test]
    fn test_tokenize_drops_short_alphabetic_terms() {
        let tokens = tokenize("it is an ox");
        assert!(tokens.is_empty());
    }

    #[test]
    fn test_tokenize_preserves_duplicates() {
        let tokens = tokenize("growth growth growth");
        assert_eq!(tokens.len(), 3);
    }

    #[test]
    fn test_lexical_key_is_pure() {
        let text = "Revenue increased twenty percent";
        assert_eq!(lexical_key(text), lexical_key(text));
    }

    #[test]
    fn test_relation_key_covers_all_slots() {
        let key = relation_key("revenue", "increased", "20 percent");
        assert!(key.contains(&"revenue".to_string()));
        assert!(key.contains(&"increased".to_string()));
        assert!(key.contains(&"percent".to_string()));
    }

    #[test]
    fn test_bigram_similarity_exact() {
        assert_eq!(bigram_similarity("revenue", "Revenue"), 1.0);
    }

    #[test]
    fn test_bigram_similarity_inflection() {
        // "increase" vs "increased" should clear the default 0.6 threshold
        assert!(bigram_similarity("increase", "increased") > 0.6);
    }

    #[test]
    fn test_bigram_similarity_unrelated() {
        assert!(bigram_similarity("revenue", "penguin") < 0.4);
    }

    #[test]
    fn test_bigram_similarity_empty() {
        assert_eq!(bigram_similarity("", "anything"), 0.0);
    }
}
