//! Variable name resolution.
//!
//! Turns caller-supplied identifiers (codes, Japanese or English names) into
//! canonical codes: exact code match, then exact display-name match, then a
//! fuzzy match accepted only above the configured similarity threshold.

use crate::constants::DEFAULT_FUZZY_THRESHOLD;
use crate::error::{Result, RuError};
use crate::variables::VariableTable;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct VariableResolver {
    table: Arc<VariableTable>,
    threshold: u8,
}

impl VariableResolver {
    pub fn new(table: Arc<VariableTable>) -> Self {
        Self {
            table,
            threshold: DEFAULT_FUZZY_THRESHOLD,
        }
    }

    /// Minimum similarity (0-100) for a fuzzy match to be accepted
    pub fn with_threshold(mut self, threshold: u8) -> Self {
        self.threshold = threshold.min(100);
        self
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    pub fn table(&self) -> &VariableTable {
        &self.table
    }

    pub fn resolve(&self, query: &str) -> Result<String> {
        let trimmed = query.trim();

        if let Some(code) = self.table.code_ignore_case(trimmed) {
            return Ok(code.to_string());
        }
        if let Some(code) = self.table.code_for_name(trimmed) {
            return Ok(code.to_string());
        }

        match self.best_fuzzy_match(trimmed) {
            Some((code, candidate, score)) if score >= self.threshold => {
                debug!(
                    "Fuzzy-resolved '{}' to {} via '{}' (score {})",
                    query, code, candidate, score
                );
                Ok(code.to_string())
            }
            _ => Err(RuError::unknown_variable(query)),
        }
    }

    /// Highest-scoring candidate over every code, jp name and en name.
    /// Ties keep the first candidate in code order.
    fn best_fuzzy_match(&self, query: &str) -> Option<(&str, &str, u8)> {
        let mut best: Option<(&str, &str, u8)> = None;

        for (code, meta) in self.table.iter() {
            for candidate in [code, meta.jp_name.as_str(), meta.en_name.as_str()] {
                let score = similarity(query, candidate);
                if best.is_none_or(|(_, _, top)| score > top) {
                    best = Some((code, candidate, score));
                }
            }
        }

        best
    }
}

/// Weight applied to the word-order-insensitive scores
const TOKEN_SCORE_WEIGHT: f64 = 0.95;

/// Similarity on a 0-100 scale.
///
/// The best of the plain edit-distance ratio and two word-order-insensitive
/// ratios (sorted words, shared-word sets), the latter weighted by 0.95 so an
/// exact character match still ranks first.
pub fn similarity(a: &str, b: &str) -> u8 {
    let a = fold(a);
    let b = fold(b);
    let score = ratio(&a, &b)
        .max(token_sort_ratio(&a, &b) * TOKEN_SCORE_WEIGHT)
        .max(token_set_ratio(&a, &b) * TOKEN_SCORE_WEIGHT);
    score.round().clamp(0.0, 100.0) as u8
}

/// Lowercase, with punctuation turned into word breaks
fn fold(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .to_lowercase()
}

fn ratio(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(a.trim(), b.trim()) * 100.0
}

fn sorted_words(text: &str) -> Vec<&str> {
    let mut words: Vec<&str> = text.split_whitespace().collect();
    words.sort_unstable();
    words
}

fn token_sort_ratio(a: &str, b: &str) -> f64 {
    ratio(&sorted_words(a).join(" "), &sorted_words(b).join(" "))
}

/// Compares the shared words against each side's shared-plus-remaining words
fn token_set_ratio(a: &str, b: &str) -> f64 {
    let a_words: BTreeSet<&str> = a.split_whitespace().collect();
    let b_words: BTreeSet<&str> = b.split_whitespace().collect();
    if a_words.is_empty() || b_words.is_empty() {
        return 0.0;
    }

    let join = |words: Vec<&str>| words.join(" ");
    let shared = join(a_words.intersection(&b_words).copied().collect());
    let with_rest = |rest: Vec<&str>| format!("{} {}", shared, join(rest)).trim().to_string();
    let a_full = with_rest(a_words.difference(&b_words).copied().collect());
    let b_full = with_rest(b_words.difference(&a_words).copied().collect());

    ratio(&shared, &a_full)
        .max(ratio(&shared, &b_full))
        .max(ratio(&a_full, &b_full))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResolutionError;

    fn resolver() -> VariableResolver {
        VariableResolver::new(Arc::new(VariableTable::builtin().unwrap()))
    }

    #[test]
    fn test_exact_lookups() {
        let resolver = resolver();
        assert_eq!(resolver.resolve("AIRTMP").unwrap(), "AIRTMP");
        assert_eq!(resolver.resolve("airtmp").unwrap(), "AIRTMP");
        assert_eq!(resolver.resolve("気温").unwrap(), "AIRTMP");
        assert_eq!(resolver.resolve("air temperature").unwrap(), "AIRTMP");
        assert_eq!(resolver.resolve("  Wind Speed ").unwrap(), "WNDSPD");
    }

    #[test]
    fn test_fuzzy_lookup_above_threshold() {
        let resolver = resolver();
        // one edit away from "air temperature" (15 chars) scores 93
        assert_eq!(resolver.resolve("air temperatur").unwrap(), "AIRTMP");
        assert_eq!(resolver.resolve("relative humidty").unwrap(), "RHUM");
    }

    #[test]
    fn test_unknown_variable() {
        match resolver().resolve("zzz-unknown").unwrap_err() {
            RuError::Resolution(ResolutionError::UnknownVariable { query }) => {
                assert_eq!(query, "zzz-unknown")
            }
            other => panic!("Expected UnknownVariable, got {:?}", other),
        }
    }

    #[test]
    fn test_threshold_is_configurable() {
        let strict = resolver().with_threshold(100);
        assert!(strict.resolve("air temperatur").is_err());
        assert_eq!(strict.resolve("air temperature").unwrap(), "AIRTMP");

        let loose = resolver().with_threshold(50);
        assert_eq!(loose.resolve("air temp").unwrap(), "AIRTMP");
    }

    #[test]
    fn test_similarity_scale() {
        assert_eq!(similarity("abc", "abc"), 100);
        assert_eq!(similarity("abc", "xyz"), 0);
        assert_eq!(similarity("air temperatur", "air temperature"), 93);
        assert_eq!(similarity("Air-Temperature", "air temperature"), 100);
        assert_eq!(similarity("temperature air", "air temperature"), 95);
    }

    #[test]
    fn test_reordered_words_resolve() {
        let resolver = resolver();
        assert_eq!(resolver.resolve("temperature air").unwrap(), "AIRTMP");
        assert_eq!(resolver.resolve("humidity relative").unwrap(), "RHUM");
        assert_eq!(resolver.resolve("speed wind").unwrap(), "WNDSPD");
        assert_eq!(resolver.resolve("pressure, sea level").unwrap(), "SLPRSS");

        // word-order matches sit below an exact spelling
        assert!(resolver.with_threshold(96).resolve("speed wind").is_err());
    }
}
