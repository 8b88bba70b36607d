// src/classify/mod.rs
//! Hybrid classification: deterministic keyword gate + AI verifier, composed
//! per language. The router is the single place strategy is selected; adding
//! a language means adding one strategy binding.

pub mod keywords;
pub mod verifier;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::item::{Item, Language};
use keywords::{KeywordGate, KeywordHit};
use verifier::DynVerifier;

/// Fixed taxonomy. Declaration order is the tie-break priority for the
/// keyword gate: when several categories match, the earliest one wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Asylum,
    Deportation,
    GreenCard,
    Visa,
    Work,
    Family,
    Citizenship,
    Tps,
    Other,
    /// Sentinel: the post does not concern the taxonomy at all.
    NotRelevant,
}

impl Category {
    /// All real categories in priority order (sentinel excluded).
    pub const PRIORITY: [Category; 9] = [
        Category::Asylum,
        Category::Deportation,
        Category::GreenCard,
        Category::Visa,
        Category::Work,
        Category::Family,
        Category::Citizenship,
        Category::Tps,
        Category::Other,
    ];

    pub fn from_key(key: &str) -> Option<Category> {
        match key {
            "asylum" => Some(Category::Asylum),
            "deportation" => Some(Category::Deportation),
            "green_card" => Some(Category::GreenCard),
            "visa" => Some(Category::Visa),
            "work" => Some(Category::Work),
            "family" => Some(Category::Family),
            "citizenship" => Some(Category::Citizenship),
            "tps" => Some(Category::Tps),
            "other" => Some(Category::Other),
            "not_relevant" => Some(Category::NotRelevant),
            _ => None,
        }
    }

    pub fn as_key(&self) -> &'static str {
        match self {
            Category::Asylum => "asylum",
            Category::Deportation => "deportation",
            Category::GreenCard => "green_card",
            Category::Visa => "visa",
            Category::Work => "work",
            Category::Family => "family",
            Category::Citizenship => "citizenship",
            Category::Tps => "tps",
            Category::Other => "other",
            Category::NotRelevant => "not_relevant",
        }
    }
}

/// Notification urgency. Meaningful only when category != NotRelevant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    High,
    Medium,
    Low,
}

impl Urgency {
    pub fn from_key(key: &str) -> Option<Urgency> {
        match key {
            "high" => Some(Urgency::High),
            "medium" => Some(Urgency::Medium),
            "low" => Some(Urgency::Low),
            _ => None,
        }
    }
}

/// Which strategy produced the result. Required for observability and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Keyword,
    Ai,
    Hybrid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub category: Category,
    pub urgency: Urgency,
    /// Bounded to [0, 1].
    pub confidence: f32,
    /// Short AI-generated summary; absent when keyword-only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Only present when explicitly requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub draft_response: Option<String>,
    pub method: Method,
}

impl ClassificationResult {
    pub fn not_relevant(method: Method, confidence: f32) -> Self {
        Self {
            category: Category::NotRelevant,
            urgency: Urgency::Low,
            confidence: clamp01(confidence),
            summary: None,
            draft_response: None,
            method,
        }
    }

    pub fn from_keyword_hit(hit: &KeywordHit) -> Self {
        Self {
            category: hit.category,
            urgency: hit.urgency_hint,
            confidence: clamp01(hit.confidence),
            summary: None,
            draft_response: None,
            method: Method::Keyword,
        }
    }

    pub fn is_relevant(&self) -> bool {
        self.category != Category::NotRelevant
    }
}

pub(crate) fn clamp01(x: f32) -> f32 {
    x.clamp(0.0, 1.0)
}

/// Per-language strategy ordering of the two classification sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    KeywordFirst,
    AiFirst,
}

/// Global classification method from the configuration surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MethodMode {
    Keywords,
    Ai,
    Hybrid,
}

impl Default for MethodMode {
    fn default() -> Self {
        MethodMode::Hybrid
    }
}

/// Default bindings: English is gate-friendly; Russian/Ukrainian morphology
/// defeats reliable lexical matching ("виза" != "визу/визой/визы"), so the
/// AI service is primary there and keywords are only a safety net.
pub fn default_strategy_table() -> HashMap<Language, Strategy> {
    HashMap::from([
        (Language::En, Strategy::KeywordFirst),
        (Language::Ru, Strategy::AiFirst),
        (Language::Uk, Strategy::AiFirst),
    ])
}

/// Composes the keyword gate and the AI verifier into one decision.
pub struct Router {
    gate: KeywordGate,
    verifier: DynVerifier,
    strategies: HashMap<Language, Strategy>,
    mode: MethodMode,
}

impl Router {
    pub fn new(
        gate: KeywordGate,
        verifier: DynVerifier,
        strategies: HashMap<Language, Strategy>,
        mode: MethodMode,
    ) -> Self {
        Self {
            gate,
            verifier,
            strategies,
            mode,
        }
    }

    pub fn strategy_for(&self, language: Language) -> Strategy {
        self.strategies
            .get(&language)
            .copied()
            .unwrap_or(Strategy::KeywordFirst)
    }

    /// Classify one item. Never fails: service errors degrade to the
    /// keyword-only verdict per the strategy's fallback order.
    pub async fn classify(&self, item: &Item, language: Language) -> ClassificationResult {
        match self.strategy_for(language) {
            Strategy::KeywordFirst => self.classify_keyword_first(item, language).await,
            Strategy::AiFirst => self.classify_ai_first(item, language).await,
        }
    }

    async fn classify_keyword_first(&self, item: &Item, language: Language) -> ClassificationResult {
        let hit = match self.gate.evaluate(&item.text, language) {
            // No lexical signal at all: low-signal traffic never reaches the
            // paid step.
            None => return ClassificationResult::not_relevant(Method::Keyword, 0.0),
            Some(hit) => hit,
        };

        if self.mode == MethodMode::Keywords {
            return ClassificationResult::from_keyword_hit(&hit);
        }

        match self
            .verifier
            .classify(&item.text, language, Some(hit.category))
            .await
        {
            Ok(mut ai) => {
                ai.method = Method::Hybrid;
                ai
            }
            Err(e) => {
                warn!(
                    provider = self.verifier.name(),
                    language = language.as_str(),
                    error = %e,
                    "verifier failed, degrading to keyword verdict"
                );
                ClassificationResult::from_keyword_hit(&hit)
            }
        }
    }

    async fn classify_ai_first(&self, item: &Item, language: Language) -> ClassificationResult {
        if self.mode != MethodMode::Keywords {
            match self.verifier.classify(&item.text, language, None).await {
                Ok(ai) => return ai,
                Err(e) => {
                    // Reduced-confidence mode: for these languages the AI
                    // service is primary and the keyword set is a safety net.
                    warn!(
                        provider = self.verifier.name(),
                        language = language.as_str(),
                        error = %e,
                        "verifier failed on ai-first language, keyword-only coverage"
                    );
                }
            }
        }

        match self.gate.evaluate(&item.text, language) {
            Some(hit) => ClassificationResult::from_keyword_hit(&hit),
            None => {
                debug!(language = language.as_str(), "no keyword fallback signal");
                ClassificationResult::not_relevant(Method::Keyword, 0.1)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::verifier::{FailingVerifier, MockVerifier, ServiceError};
    use crate::item::SourceKind;
    use chrono::Utc;
    use std::collections::HashMap as Map;
    use std::sync::Arc;

    fn mk_item(text: &str, lang: &str) -> Item {
        Item {
            source_id: "r/immigration".into(),
            source_kind: SourceKind::Forum,
            external_id: "x1".into(),
            text: text.into(),
            language: lang.into(),
            timestamp: Utc::now(),
            url: None,
            metadata: Map::new(),
        }
    }

    fn mk_router(verifier: DynVerifier, mode: MethodMode) -> Router {
        Router::new(
            KeywordGate::default_seed(),
            verifier,
            default_strategy_table(),
            mode,
        )
    }

    #[tokio::test]
    async fn keyword_first_skips_verifier_without_match() {
        let mock = Arc::new(MockVerifier::relevant(Category::Visa, Urgency::Medium));
        let router = mk_router(mock.clone(), MethodMode::Hybrid);
        let out = router
            .classify(&mk_item("what a lovely sunny day", "en"), Language::En)
            .await;
        assert_eq!(out.category, Category::NotRelevant);
        assert_eq!(out.method, Method::Keyword);
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test]
    async fn keyword_first_match_is_verified_as_hybrid() {
        let mock = Arc::new(MockVerifier::relevant(Category::Asylum, Urgency::High));
        let router = mk_router(mock.clone(), MethodMode::Hybrid);
        let out = router
            .classify(
                &mk_item("I need help applying for asylum after persecution", "en"),
                Language::En,
            )
            .await;
        assert_eq!(out.category, Category::Asylum);
        assert_eq!(out.urgency, Urgency::High);
        assert_eq!(out.method, Method::Hybrid);
        assert_eq!(mock.calls(), 1);
        assert_eq!(mock.last_candidate(), Some(Category::Asylum));
    }

    #[tokio::test]
    async fn keyword_first_degrades_on_service_error() {
        let failing = Arc::new(FailingVerifier::new(ServiceError::Transport(
            "connection reset".into(),
        )));
        let router = mk_router(failing, MethodMode::Hybrid);
        let out = router
            .classify(&mk_item("my visa application was denied", "en"), Language::En)
            .await;
        assert!(out.is_relevant());
        assert_eq!(out.method, Method::Keyword);
    }

    #[tokio::test]
    async fn ai_first_falls_back_to_gate_then_not_relevant() {
        let failing = Arc::new(FailingVerifier::new(ServiceError::RateLimited));
        let router = mk_router(failing, MethodMode::Hybrid);

        // Exact-form keyword present: gate catches it as the secondary signal.
        let out = router
            .classify(&mk_item("отказали в визе, подали на убежище", "ru"), Language::Ru)
            .await;
        assert_eq!(out.method, Method::Keyword);
        assert!(out.is_relevant());

        // Neither service nor gate produce a signal: suppress, low confidence.
        let out = router
            .classify(&mk_item("просто хороший день сегодня", "ru"), Language::Ru)
            .await;
        assert_eq!(out.category, Category::NotRelevant);
        assert_eq!(out.method, Method::Keyword);
        assert!(out.confidence <= 0.2);
    }

    #[tokio::test]
    async fn keywords_only_mode_never_calls_verifier() {
        let mock = Arc::new(MockVerifier::relevant(Category::Visa, Urgency::Medium));
        let router = mk_router(mock.clone(), MethodMode::Keywords);
        let out = router
            .classify(&mk_item("h-1b visa lottery question", "en"), Language::En)
            .await;
        assert_eq!(out.method, Method::Keyword);
        assert!(out.is_relevant());
        assert_eq!(mock.calls(), 0);
    }
}
