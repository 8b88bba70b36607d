// src/classify/keywords.rs
//! Deterministic lexical pre-filter.
//!
//! Matching is token-boundary-aware: a keyword never matches as a substring
//! of an unrelated longer word, and hyphenated codes ("h-1b", "i-485") match
//! only as complete tokens including the hyphen. Pure function, no I/O.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use super::{Category, Urgency};
use crate::item::Language;

pub const DEFAULT_KEYWORDS_CONFIG_PATH: &str = "config/keywords.toml";
pub const ENV_KEYWORDS_CONFIG_PATH: &str = "MONITOR_KEYWORDS_PATH";

/// Built-in seed, used as fallback when no config file is present.
static DEFAULT_KEYWORDS_TOML: &str = include_str!("../../config/keywords.toml");

/// Word-ish tokens with internal hyphens kept intact, so "h-1b" is one token.
static RE_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?u)\w+(?:-\w+)*").expect("token regex"));

/// Candidate verdict from the gate.
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordHit {
    pub category: Category,
    pub urgency_hint: Urgency,
    /// Configured terms (of the winning category) that matched.
    pub matched_terms: Vec<String>,
    /// Crude signal: 0.2 per match across all categories, capped at 1.0.
    pub confidence: f32,
}

/* ----------------------------
Config schema (from TOML)
---------------------------- */

#[derive(Debug, Clone, Deserialize)]
struct KeywordRoot {
    /// category key -> "high" | "medium" | "low"
    #[serde(default)]
    urgency: HashMap<String, String>,
    #[serde(default)]
    en: HashMap<String, Vec<String>>,
    #[serde(default)]
    ru: HashMap<String, Vec<String>>,
    #[serde(default)]
    uk: HashMap<String, Vec<String>>,
}

/// One keyword compiled to its token sequence plus the raw configured term.
#[derive(Debug, Clone)]
struct Phrase {
    raw: String,
    tokens: Vec<String>,
}

#[derive(Debug, Clone, Default)]
struct LanguageSet {
    /// In `Category::PRIORITY` order, so multi-match tie-break is fixed and
    /// reproducible regardless of config insertion order.
    by_category: Vec<(Category, Vec<Phrase>)>,
}

#[derive(Debug, Clone)]
pub struct KeywordGate {
    sets: HashMap<Language, LanguageSet>,
    urgency: HashMap<Category, Urgency>,
}

impl KeywordGate {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let root: KeywordRoot = toml::from_str(s).context("parsing keyword config")?;
        Ok(Self::from_root(root))
    }

    pub fn from_toml_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("reading keyword config {}", path.as_ref().display()))?;
        Self::from_toml_str(&content)
    }

    /// Load using env var + fallbacks:
    /// 1) $MONITOR_KEYWORDS_PATH
    /// 2) config/keywords.toml
    /// 3) built-in seed
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_KEYWORDS_CONFIG_PATH) {
            return Self::from_toml_path(&p);
        }
        let default = Path::new(DEFAULT_KEYWORDS_CONFIG_PATH);
        if default.exists() {
            return Self::from_toml_path(default);
        }
        Ok(Self::default_seed())
    }

    /// Built-in keyword sets compiled into the binary.
    pub fn default_seed() -> Self {
        Self::from_toml_str(DEFAULT_KEYWORDS_TOML).expect("valid built-in keyword config")
    }

    fn from_root(root: KeywordRoot) -> Self {
        let mut urgency = HashMap::new();
        for (key, value) in &root.urgency {
            if let (Some(cat), Some(u)) = (Category::from_key(key), Urgency::from_key(value)) {
                urgency.insert(cat, u);
            }
        }

        let mut sets = HashMap::new();
        sets.insert(Language::En, compile_set(&root.en));
        sets.insert(Language::Ru, compile_set(&root.ru));
        sets.insert(Language::Uk, compile_set(&root.uk));
        Self { sets, urgency }
    }

    fn urgency_hint(&self, category: Category) -> Urgency {
        self.urgency.get(&category).copied().unwrap_or(Urgency::Medium)
    }

    /// Evaluate one text against the configured sets for `language`.
    /// Returns `None` when nothing matches.
    pub fn evaluate(&self, text: &str, language: Language) -> Option<KeywordHit> {
        let set = self.sets.get(&language)?;
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return None;
        }

        let mut winner: Option<(Category, Vec<String>)> = None;
        let mut total_matches = 0usize;

        for (category, phrases) in &set.by_category {
            let mut matched = Vec::new();
            for phrase in phrases {
                if contains_phrase(&tokens, &phrase.tokens) {
                    matched.push(phrase.raw.clone());
                }
            }
            total_matches += matched.len();
            if winner.is_none() && !matched.is_empty() {
                winner = Some((*category, matched));
            }
        }

        let (category, matched_terms) = winner?;
        Some(KeywordHit {
            category,
            urgency_hint: self.urgency_hint(category),
            matched_terms,
            confidence: ((total_matches as f32) * 0.2).min(1.0),
        })
    }
}

fn compile_set(raw: &HashMap<String, Vec<String>>) -> LanguageSet {
    let mut by_category = Vec::new();
    for category in Category::PRIORITY {
        let Some(terms) = raw.get(category.as_key()) else {
            continue;
        };
        let phrases: Vec<Phrase> = terms
            .iter()
            .filter_map(|t| {
                let tokens = tokenize(t);
                if tokens.is_empty() {
                    None
                } else {
                    Some(Phrase {
                        raw: t.clone(),
                        tokens,
                    })
                }
            })
            .collect();
        if !phrases.is_empty() {
            by_category.push((category, phrases));
        }
    }
    LanguageSet { by_category }
}

/// Lowercased word tokens, hyphenated runs kept whole.
fn tokenize(input: &str) -> Vec<String> {
    let lowered = input.to_lowercase();
    RE_TOKEN
        .find_iter(&lowered)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Whole-token run match: the phrase tokens must appear consecutively.
fn contains_phrase(tokens: &[String], phrase: &[String]) -> bool {
    if phrase.is_empty() || phrase.len() > tokens.len() {
        return false;
    }
    tokens
        .windows(phrase.len())
        .any(|w| w.iter().zip(phrase).all(|(a, b)| a == b))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> KeywordGate {
        KeywordGate::default_seed()
    }

    #[test]
    fn whole_word_match_hits() {
        let hit = gate()
            .evaluate("My visa was denied at the consulate", Language::En)
            .expect("should match");
        assert_eq!(hit.category, Category::Visa);
        assert!(hit.matched_terms.iter().any(|t| t == "visa"));
        assert!(hit.confidence > 0.0);
    }

    #[test]
    fn substring_of_longer_token_does_not_match() {
        // "visa" must not fire inside an unrelated longer word.
        assert!(gate().evaluate("we toured the visayas islands", Language::En).is_none());
        // Cyrillic: "виз" forms occur inside unrelated words too.
        assert!(gate().evaluate("заказал самовывоз из магазина", Language::Ru).is_none());
    }

    #[test]
    fn hyphenated_code_matches_as_whole_token() {
        let hit = gate()
            .evaluate("is the h-1b cap reached this year", Language::En)
            .expect("should match");
        assert_eq!(hit.category, Category::Visa);
        // A longer code that merely contains the configured one is distinct.
        assert!(gate().evaluate("form h-1b9 does not exist", Language::En).is_none());
    }

    #[test]
    fn multiword_phrase_requires_consecutive_tokens() {
        let hit = gate()
            .evaluate("filed for adjustment of status last week", Language::En)
            .expect("should match");
        assert_eq!(hit.category, Category::GreenCard);
        assert!(gate()
            .evaluate("an adjustment to my work status", Language::En)
            .map(|h| h.category != Category::GreenCard)
            .unwrap_or(true));
    }

    #[test]
    fn multi_category_tie_break_is_priority_order() {
        // Both asylum and visa terms present: asylum has higher priority.
        let hit = gate()
            .evaluate("asylum interview while my visa is pending", Language::En)
            .expect("should match");
        assert_eq!(hit.category, Category::Asylum);
        // Both matches still count toward confidence.
        assert!(hit.confidence >= 0.4 - f32::EPSILON);
    }

    #[test]
    fn urgency_hints_follow_config() {
        let g = gate();
        let dep = g
            .evaluate("ICE raid near the warehouse, people detained", Language::En)
            .expect("should match");
        assert_eq!(dep.category, Category::Deportation);
        assert_eq!(dep.urgency_hint, Urgency::High);

        let cit = g
            .evaluate("starting my citizenship paperwork soon", Language::En)
            .expect("should match");
        assert_eq!(cit.urgency_hint, Urgency::Medium);
    }

    #[test]
    fn unknown_language_set_is_empty_not_error() {
        let root: KeywordRoot = toml::from_str("").unwrap();
        let g = KeywordGate::from_root(root);
        assert!(g.evaluate("visa question", Language::En).is_none());
    }
}
