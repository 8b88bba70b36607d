// src/item.rs
//! Canonical representation of one ingested post.
//!
//! Items are produced by source adapters and read-only for everything
//! downstream: the classifier, the ledger and the sinks never mutate them.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of the originating platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Forum,
    Chat,
    Aggregator,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Forum => "forum",
            SourceKind::Chat => "chat",
            SourceKind::Aggregator => "aggregator",
        }
    }
}

/// Supported languages. Anything else is dropped before classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    Ru,
    Uk,
}

impl Language {
    /// Parse an ISO-like tag. Mixed Telegram-style tags ("ru/uk") resolve to
    /// the first supported part. `None` means unsupported, not an error.
    pub fn from_tag(tag: &str) -> Option<Language> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "en" => Some(Language::En),
            "ru" | "ru/uk" => Some(Language::Ru),
            "uk" | "uk/ru" => Some(Language::Uk),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Ru => "ru",
            Language::Uk => "uk",
        }
    }
}

/// One observed post. Immutable after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    /// Opaque id of the originating feed/group/subreddit.
    pub source_id: String,
    pub source_kind: SourceKind,
    /// Unique within the source; NOT the dedup key (dedup is content-based).
    pub external_id: String,
    pub text: String,
    /// Raw language tag as reported by the adapter; resolved via `language()`.
    pub language: String,
    pub timestamp: DateTime<Utc>,
    pub url: Option<String>,
    /// Source-specific extras (author, location hints). Opaque to the
    /// classifier, passed through to output.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Item {
    pub fn language(&self) -> Option<Language> {
        Language::from_tag(&self.language)
    }

    /// Presentation-time preview, never applied at ingestion.
    pub fn preview(&self, max_chars: usize) -> String {
        if self.text.chars().count() <= max_chars {
            return self.text.clone();
        }
        let mut out: String = self.text.chars().take(max_chars).collect();
        out.push_str("...");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_tags_resolve_or_drop() {
        assert_eq!(Language::from_tag("en"), Some(Language::En));
        assert_eq!(Language::from_tag("RU"), Some(Language::Ru));
        assert_eq!(Language::from_tag("uk/ru"), Some(Language::Uk));
        assert_eq!(Language::from_tag("es"), None);
        assert_eq!(Language::from_tag(""), None);
    }

    #[test]
    fn preview_truncates_on_chars_not_bytes() {
        let it = Item {
            source_id: "r/immigration".into(),
            source_kind: SourceKind::Forum,
            external_id: "abc".into(),
            text: "віза віза віза".into(),
            language: "uk".into(),
            timestamp: Utc::now(),
            url: None,
            metadata: HashMap::new(),
        };
        let p = it.preview(4);
        assert!(p.starts_with("віза"));
        assert!(p.ends_with("..."));
    }
}
