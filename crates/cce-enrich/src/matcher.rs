//! Keyword-overlap validation of search results against a reference product name.

use std::collections::BTreeSet;

use crate::config::MatchRules;

const STRONG_PREFIX_CHARS: usize = 20;
const MIN_KEYWORD_CHARS: usize = 4;
const MAX_KEYWORDS: usize = 6;
const MIN_KEYWORDS: usize = 2;
const ACCEPT_RATIO: f64 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub enum MatchVerdict {
    /// Candidate title contains the reference's leading characters.
    StrongPrefix,
    Keywords { matched: usize, total: usize },
    InsufficientKeywords { total: usize },
    MissingTitle,
}

impl MatchVerdict {
    pub fn accepted(&self) -> bool {
        match self {
            MatchVerdict::StrongPrefix => true,
            MatchVerdict::Keywords { matched, total } => {
                *total > 0 && (*matched as f64 / *total as f64) >= ACCEPT_RATIO
            }
            MatchVerdict::InsufficientKeywords { .. } | MatchVerdict::MissingTitle => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CandidateMatcher {
    stop_words: BTreeSet<String>,
}

impl Default for CandidateMatcher {
    fn default() -> Self {
        Self::new(&MatchRules::default())
    }
}

impl CandidateMatcher {
    pub fn new(rules: &MatchRules) -> Self {
        Self {
            stop_words: rules.stop_words.iter().map(|w| w.to_lowercase()).collect(),
        }
    }

    /// Up to six distinct letter-only keywords of four or more characters, in order of appearance.
    pub fn keywords(&self, reference: &str) -> Vec<String> {
        let mut seen = BTreeSet::new();
        reference
            .to_lowercase()
            .split(|c: char| c.is_whitespace() || matches!(c, ',' | '.' | '-' | '/'))
            .map(|token| token.chars().filter(|c| c.is_alphabetic()).collect::<String>())
            .filter(|word| word.chars().count() >= MIN_KEYWORD_CHARS && !self.stop_words.contains(word))
            .filter(|word| seen.insert(word.clone()))
            .take(MAX_KEYWORDS)
            .collect()
    }

    pub fn evaluate(&self, reference: &str, candidate_title: Option<&str>) -> MatchVerdict {
        let Some(title) = candidate_title.map(str::trim).filter(|t| !t.is_empty()) else {
            return MatchVerdict::MissingTitle;
        };
        let title = title.to_lowercase();
        let reference = reference.trim().to_lowercase();

        if !reference.is_empty() {
            let prefix: String = reference.chars().take(STRONG_PREFIX_CHARS).collect();
            if title.contains(&prefix) {
                return MatchVerdict::StrongPrefix;
            }
        }

        let keywords = self.keywords(&reference);
        if keywords.len() < MIN_KEYWORDS {
            return MatchVerdict::InsufficientKeywords { total: keywords.len() };
        }
        let matched = keywords.iter().filter(|k| title.contains(k.as_str())).count();
        MatchVerdict::Keywords {
            matched,
            total: keywords.len(),
        }
    }

    pub fn matches(&self, reference: &str, candidate_title: Option<&str>) -> bool {
        self.evaluate(reference, candidate_title).accepted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drill_kit_matches_by_keyword_overlap() {
        let m = CandidateMatcher::default();
        let verdict = m.evaluate(
            "DeWalt 20V Cordless Drill Kit",
            Some("DEWALT 20V MAX Cordless Drill/Driver Kit"),
        );
        assert_eq!(verdict, MatchVerdict::Keywords { matched: 3, total: 3 });
        assert!(verdict.accepted());
    }

    #[test]
    fn unrelated_product_is_rejected() {
        let m = CandidateMatcher::default();
        assert!(!m.matches("Red Oak Flooring Plank", Some("Stainless Steel Kitchen Sink")));
    }

    #[test]
    fn two_of_three_keywords_is_enough() {
        let m = CandidateMatcher::default();
        let verdict = m.evaluate("Everbilt Brass Hinge", Some("Everbilt Satin Nickel Door Hinge"));
        assert_eq!(verdict, MatchVerdict::Keywords { matched: 2, total: 3 });
        assert!(verdict.accepted());
    }

    #[test]
    fn strong_prefix_short_circuits() {
        let m = CandidateMatcher::default();
        assert_eq!(
            m.evaluate("Glacier Bay Single-Handle Faucet", Some("GLACIER BAY SINGLE-HANDLE pull-down faucet in chrome")),
            MatchVerdict::StrongPrefix
        );
    }

    #[test]
    fn thin_references_and_blank_titles_are_rejected() {
        let m = CandidateMatcher::default();
        assert_eq!(
            m.evaluate("2x4 Stud", Some("Prime Lumber 2 in. x 6 in. Board")),
            MatchVerdict::InsufficientKeywords { total: 1 }
        );
        assert_eq!(m.evaluate("Cordless Drill", Some("   ")), MatchVerdict::MissingTitle);
        assert!(!m.matches("Cordless Drill", None));
    }

    #[test]
    fn keywords_are_deduplicated_capped_and_skip_stop_words() {
        let m = CandidateMatcher::default();
        assert_eq!(
            m.keywords("Paint Brush Paint Roller Tray Cover Liner Handle Pack with Extension"),
            vec!["paint", "brush", "roller", "tray", "cover", "liner"]
        );
    }
}
