//! Free-text search name derived from a crowd-submitted product name.

use std::collections::BTreeSet;

use crate::config::MatchRules;

const MAX_SEARCH_CHARS: usize = 60;
const MIN_MODEL_TOKEN_CHARS: usize = 5;
/// A cleaned name shorter than this is too vague to spend a credit on.
pub const MIN_SEARCHABLE_CHARS: usize = 10;

#[derive(Debug, Clone)]
pub struct NameCleaner {
    filler_words: BTreeSet<String>,
    unit_suffixes: BTreeSet<String>,
}

impl Default for NameCleaner {
    fn default() -> Self {
        Self::new(&MatchRules::default())
    }
}

fn core_of(token: &str) -> &str {
    token.trim_matches(|c: char| !c.is_alphanumeric())
}

fn is_model_like(token: &str) -> bool {
    let core = core_of(token);
    core.chars().count() >= MIN_MODEL_TOKEN_CHARS
        && core.chars().all(|c| c.is_ascii_alphanumeric())
        && core.chars().any(|c| c.is_ascii_digit())
}

/// Quantities such as `12`, `1.5`, `3-1/2` or `1/4`.
fn is_quantity(token: &str) -> bool {
    let starts_and_ends_with_digit = token.chars().next().is_some_and(|c| c.is_ascii_digit())
        && token.chars().last().is_some_and(|c| c.is_ascii_digit());
    starts_and_ends_with_digit && token.chars().all(|c| c.is_ascii_digit() || matches!(c, '.' | '/' | '-'))
}

impl NameCleaner {
    pub fn new(rules: &MatchRules) -> Self {
        let lower = |words: &[String]| words.iter().map(|w| w.to_lowercase()).collect();
        Self {
            filler_words: lower(&rules.filler_words),
            unit_suffixes: lower(&rules.unit_suffixes),
        }
    }

    fn is_unit(&self, token: &str) -> bool {
        self.unit_suffixes
            .contains(&token.trim_end_matches('.').to_lowercase())
    }

    /// `12in.`, `3pk`, `1.5gal`
    fn is_fused_quantity(&self, token: &str) -> bool {
        let token = token.trim_end_matches('.');
        let split = token
            .find(|c: char| c.is_ascii_alphabetic())
            .unwrap_or(token.len());
        let (number, unit) = token.split_at(split);
        !unit.is_empty() && is_quantity(number) && self.is_unit(unit)
    }

    pub fn clean(&self, name: &str) -> String {
        let tokens: Vec<&str> = name.split_whitespace().collect();
        let mut kept: Vec<&str> = Vec::with_capacity(tokens.len());
        let mut i = 0;
        while i < tokens.len() {
            let token = tokens[i];
            if is_model_like(token) || self.filler_words.contains(&core_of(token).to_lowercase()) {
                i += 1;
                continue;
            }
            if self.is_fused_quantity(token) {
                i += 1;
                continue;
            }
            if is_quantity(token) && tokens.get(i + 1).is_some_and(|next| self.is_unit(next)) {
                i += 2;
                continue;
            }
            kept.push(token);
            i += 1;
        }

        let joined = kept.join(" ");
        let truncated: String = joined.chars().take(MAX_SEARCH_CHARS).collect();
        truncated.trim().to_string()
    }

    /// Cleaned name when it is long enough to search with.
    pub fn searchable(&self, name: &str) -> Option<String> {
        let cleaned = self.clean(name);
        (cleaned.chars().count() >= MIN_SEARCHABLE_CHARS).then_some(cleaned)
    }
}
