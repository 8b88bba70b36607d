// src/classify/verifier.rs
//! Boundary to the external AI classification service.
//!
//! The service is treated as an unreliable dependency: bounded timeouts,
//! typed recoverable errors, and a persisted daily call budget. A negative
//! verdict ("not relevant") is a normal result, not an error.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{clamp01, Category, ClassificationResult, Method, Urgency};
use crate::item::Language;

/// All variants are recoverable: the router degrades to the keyword verdict.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("rate limited by provider")]
    RateLimited,
    #[error("malformed response: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait Verifier: Send + Sync {
    /// Classify `text`; `candidate` is the keyword gate's hint, when any.
    async fn classify(
        &self,
        text: &str,
        language: Language,
        candidate: Option<Category>,
    ) -> Result<ClassificationResult, ServiceError>;

    /// Provider name for diagnostics.
    fn name(&self) -> &'static str;
}

pub type DynVerifier = Arc<dyn Verifier>;

/// Factory: build a verifier according to plain config values.
///
/// * `MONITOR_AI_TEST_MODE=mock` returns a deterministic mock.
/// * Disabled or unknown providers return a client that always fails with a
///   recoverable error, which keeps the keyword fallback path exercised.
pub fn build_verifier(
    enabled: bool,
    provider: &str,
    model: &str,
    api_key: &str,
    timeout_secs: u64,
    include_draft: bool,
    daily_limit: u32,
    budget_dir: &Path,
) -> DynVerifier {
    if std::env::var("MONITOR_AI_TEST_MODE")
        .map(|v| v == "mock")
        .unwrap_or(false)
    {
        return Arc::new(MockVerifier::relevant(Category::Other, Urgency::Medium));
    }

    if !enabled || api_key.is_empty() {
        return Arc::new(DisabledVerifier);
    }

    match provider {
        "anthropic" => {
            let http = HttpVerifier::new(model, api_key, timeout_secs, include_draft);
            Arc::new(BudgetedVerifier::new(http, budget_dir, daily_limit))
        }
        other => {
            tracing::warn!(provider = other, "unsupported AI provider, verifier disabled");
            Arc::new(DisabledVerifier)
        }
    }
}

// ------------------------------------------------------------
// HTTP provider (Anthropic messages API)
// ------------------------------------------------------------

const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct HttpVerifier {
    http: reqwest::Client,
    api_key: String,
    model: String,
    include_draft: bool,
}

impl HttpVerifier {
    pub fn new(model: &str, api_key: &str, timeout_secs: u64, include_draft: bool) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("immigration-monitor/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .expect("reqwest client");
        Self {
            http,
            api_key: api_key.to_string(),
            model: model.to_string(),
            include_draft,
        }
    }

    fn prompt(&self, text: &str, language: Language, candidate: Option<Category>) -> String {
        let lang_label = match language {
            Language::En => "English (en)",
            Language::Ru => "Russian (ru)",
            Language::Uk => "Ukrainian (uk)",
        };
        let candidate_hint = match candidate {
            Some(c) => format!(
                "A keyword pre-filter suggests the category \"{}\"; confirm or correct it.\n",
                c.as_key()
            ),
            None => String::new(),
        };
        let implicit_hint = match language {
            // Telegram RU/UK posts often need help without any "?" or
            // explicit question words; the model has to read intent.
            Language::Ru | Language::Uk => {
                "IMPORTANT: questions are often implicit in these languages; \
                 treat situation descriptions that clearly seek help as relevant.\n"
            }
            Language::En => "",
        };
        let draft_field = if self.include_draft {
            ",\n  \"draft_response\": \"brief helpful reply in the source language\""
        } else {
            ""
        };

        // Take a bounded prefix; provider-side token limits are not ours to guess.
        let excerpt: String = text.chars().take(2000).collect();

        format!(
            "Analyze this social media post about a potential US immigration topic.\n\
             Language hint: {lang_label}\n\
             {candidate_hint}{implicit_hint}\
             Post text: \"{excerpt}\"\n\n\
             Respond ONLY with valid JSON (no markdown, no backticks):\n\
             {{\n  \"is_relevant\": true/false,\n\
             \x20 \"category\": \"visa|asylum|deportation|green_card|work|family|citizenship|tps|other\",\n\
             \x20 \"urgency\": \"high|medium|low\",\n\
             \x20 \"summary\": \"one sentence summary in English\",\n\
             \x20 \"confidence\": 0.0-1.0{draft_field}\n}}"
        )
    }
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<ApiMessage<'a>>,
}

#[derive(Deserialize)]
struct ApiResponse {
    content: Vec<ApiContent>,
}

#[derive(Deserialize)]
struct ApiContent {
    text: String,
}

/// Wire verdict as the model is asked to produce it.
#[derive(Debug, Deserialize)]
struct Verdict {
    #[serde(default)]
    is_relevant: bool,
    category: Option<String>,
    urgency: Option<String>,
    summary: Option<String>,
    #[serde(default = "default_confidence")]
    confidence: f32,
    draft_response: Option<String>,
}

fn default_confidence() -> f32 {
    0.5
}

static RE_FENCE_OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^```(?:json)?\s*").expect("fence regex"));
static RE_FENCE_CLOSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*```$").expect("fence regex"));

/// Parse the model's reply into a classification. Models occasionally wrap
/// JSON in markdown fences despite instructions; strip them first.
pub(crate) fn parse_verdict(raw: &str) -> Result<ClassificationResult, ServiceError> {
    let trimmed = raw.trim();
    let opened = RE_FENCE_OPEN.replace(trimmed, "");
    let stripped = RE_FENCE_CLOSE.replace(&opened, "");
    let v: Verdict = serde_json::from_str(&stripped)
        .map_err(|e| ServiceError::Malformed(format!("verdict json: {e}")))?;

    if !v.is_relevant {
        let mut out = ClassificationResult::not_relevant(Method::Ai, v.confidence);
        out.summary = v.summary;
        return Ok(out);
    }

    let category = v
        .category
        .as_deref()
        .and_then(Category::from_key)
        .unwrap_or(Category::Other);
    let urgency = v
        .urgency
        .as_deref()
        .and_then(Urgency::from_key)
        .unwrap_or(Urgency::Medium);

    Ok(ClassificationResult {
        category,
        urgency,
        confidence: clamp01(v.confidence),
        summary: v.summary,
        draft_response: v.draft_response,
        method: Method::Ai,
    })
}

#[async_trait]
impl Verifier for HttpVerifier {
    async fn classify(
        &self,
        text: &str,
        language: Language,
        candidate: Option<Category>,
    ) -> Result<ClassificationResult, ServiceError> {
        let req = ApiRequest {
            model: &self.model,
            max_tokens: 500,
            messages: vec![ApiMessage {
                role: "user",
                content: self.prompt(text, language, candidate),
            }],
        };

        let resp = self
            .http
            .post(ANTHROPIC_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&req)
            .send()
            .await
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ServiceError::RateLimited);
        }
        if !resp.status().is_success() {
            return Err(ServiceError::Transport(format!(
                "http status {}",
                resp.status()
            )));
        }

        let body: ApiResponse = resp
            .json()
            .await
            .map_err(|e| ServiceError::Malformed(format!("response body: {e}")))?;
        let raw = body
            .content
            .first()
            .map(|c| c.text.as_str())
            .ok_or_else(|| ServiceError::Malformed("empty content".into()))?;
        parse_verdict(raw)
    }

    fn name(&self) -> &'static str {
        "anthropic"
    }
}

// ------------------------------------------------------------
// Daily budget wrapper
// ------------------------------------------------------------

/// Caps real provider calls per day. The counter survives restarts; an
/// exhausted budget reports `RateLimited`, which the router treats like any
/// other recoverable outage.
pub struct BudgetedVerifier<V: Verifier> {
    inner: V,
    dir: PathBuf,
    limit: u32,
    counter: Mutex<DailyCounter>,
}

impl<V: Verifier> BudgetedVerifier<V> {
    pub fn new(inner: V, dir: &Path, limit: u32) -> Self {
        let _ = fs::create_dir_all(dir); // best-effort
        let counter = Mutex::new(load_daily_counter(dir).unwrap_or_default());
        Self {
            inner,
            dir: dir.to_path_buf(),
            limit,
            counter,
        }
    }
}

#[async_trait]
impl<V: Verifier> Verifier for BudgetedVerifier<V> {
    async fn classify(
        &self,
        text: &str,
        language: Language,
        candidate: Option<Category>,
    ) -> Result<ClassificationResult, ServiceError> {
        {
            let mut g = self.counter.lock().expect("poisoned budget counter");
            if g.is_expired() {
                g.reset_to_today();
                let _ = save_daily_counter(&self.dir, &g);
            }
            if g.count >= self.limit {
                return Err(ServiceError::RateLimited);
            }
        }

        let out = self.inner.classify(text, language, candidate).await?;

        // Count only successful real calls.
        let mut g = self.counter.lock().expect("poisoned budget counter");
        g.count = g.count.saturating_add(1);
        let _ = save_daily_counter(&self.dir, &g);
        Ok(out)
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DailyCounter {
    date: String,
    count: u32,
}

impl Default for DailyCounter {
    fn default() -> Self {
        Self {
            date: today(),
            count: 0,
        }
    }
}

impl DailyCounter {
    fn is_expired(&self) -> bool {
        self.date != today()
    }
    fn reset_to_today(&mut self) {
        self.date = today();
        self.count = 0;
    }
}

/// Days since UNIX epoch as a string; enough for equality and rollover.
fn today() -> String {
    (chrono::Utc::now().timestamp().max(0) / 86_400).to_string()
}

fn counter_path(dir: &Path) -> PathBuf {
    dir.join("ai_budget.json")
}

fn load_daily_counter(dir: &Path) -> io::Result<DailyCounter> {
    let s = fs::read_to_string(counter_path(dir))?;
    serde_json::from_str(&s).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn save_daily_counter(dir: &Path, dc: &DailyCounter) -> io::Result<()> {
    let p = counter_path(dir);
    let tmp = p.with_extension("json.tmp");
    let s = serde_json::to_string(dc).unwrap_or_else(|_| "{}".to_string());
    let mut f = fs::File::create(&tmp)?;
    f.write_all(s.as_bytes())?;
    fs::rename(tmp, p)?;
    Ok(())
}

// ------------------------------------------------------------
// Offline verifiers (disabled / mock / failing)
// ------------------------------------------------------------

/// Always fails with a recoverable error; used when AI is turned off but the
/// hybrid method is configured.
pub struct DisabledVerifier;

#[async_trait]
impl Verifier for DisabledVerifier {
    async fn classify(
        &self,
        _text: &str,
        _language: Language,
        _candidate: Option<Category>,
    ) -> Result<ClassificationResult, ServiceError> {
        Err(ServiceError::Transport("ai verifier disabled".into()))
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}

/// Deterministic verifier for tests and local runs. Counts calls so tests
/// can assert the gate's cost-saving and cache-reuse properties.
pub struct MockVerifier {
    fixed: ClassificationResult,
    calls: AtomicUsize,
    last_candidate: Mutex<Option<Category>>,
}

impl MockVerifier {
    pub fn relevant(category: Category, urgency: Urgency) -> Self {
        Self::with_result(ClassificationResult {
            category,
            urgency,
            confidence: 0.9,
            summary: Some("mock summary".into()),
            draft_response: None,
            method: Method::Ai,
        })
    }

    pub fn not_relevant() -> Self {
        Self::with_result(ClassificationResult::not_relevant(Method::Ai, 0.9))
    }

    pub fn with_result(fixed: ClassificationResult) -> Self {
        Self {
            fixed,
            calls: AtomicUsize::new(0),
            last_candidate: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_candidate(&self) -> Option<Category> {
        *self.last_candidate.lock().expect("poisoned mock state")
    }
}

#[async_trait]
impl Verifier for MockVerifier {
    async fn classify(
        &self,
        _text: &str,
        _language: Language,
        candidate: Option<Category>,
    ) -> Result<ClassificationResult, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_candidate.lock().expect("poisoned mock state") = candidate;
        Ok(self.fixed.clone())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Fails every call with a fixed error; for fallback-path tests.
pub struct FailingVerifier {
    error: ServiceError,
    calls: AtomicUsize,
}

impl FailingVerifier {
    pub fn new(error: ServiceError) -> Self {
        Self {
            error,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Verifier for FailingVerifier {
    async fn classify(
        &self,
        _text: &str,
        _language: Language,
        _candidate: Option<Category>,
    ) -> Result<ClassificationResult, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_verdict_handles_fenced_json() {
        let raw = "```json\n{\"is_relevant\": true, \"category\": \"asylum\", \
                   \"urgency\": \"high\", \"summary\": \"s\", \"confidence\": 0.92}\n```";
        let out = parse_verdict(raw).unwrap();
        assert_eq!(out.category, Category::Asylum);
        assert_eq!(out.urgency, Urgency::High);
        assert_eq!(out.method, Method::Ai);
        assert!((out.confidence - 0.92).abs() < 1e-6);
    }

    #[test]
    fn negative_verdict_is_a_normal_result() {
        let raw = r#"{"is_relevant": false, "confidence": 0.8}"#;
        let out = parse_verdict(raw).unwrap();
        assert_eq!(out.category, Category::NotRelevant);
    }

    #[test]
    fn garbage_is_malformed_not_panic() {
        let err = parse_verdict("I think this post is about visas.").unwrap_err();
        assert!(matches!(err, ServiceError::Malformed(_)));
    }

    #[test]
    fn unknown_category_maps_to_other() {
        let raw = r#"{"is_relevant": true, "category": "quota", "urgency": "low"}"#;
        let out = parse_verdict(raw).unwrap();
        assert_eq!(out.category, Category::Other);
        assert_eq!(out.urgency, Urgency::Low);
    }

    #[tokio::test]
    async fn budget_exhaustion_reports_rate_limited() {
        let dir = tempfile::tempdir().unwrap();
        let inner = MockVerifier::relevant(Category::Visa, Urgency::Medium);
        let budgeted = BudgetedVerifier::new(inner, dir.path(), 2);

        for _ in 0..2 {
            budgeted
                .classify("text", Language::En, None)
                .await
                .expect("within budget");
        }
        let err = budgeted
            .classify("text", Language::En, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::RateLimited));
    }

    #[tokio::test]
    async fn budget_counter_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        {
            let b = BudgetedVerifier::new(
                MockVerifier::relevant(Category::Visa, Urgency::Medium),
                dir.path(),
                5,
            );
            b.classify("text", Language::En, None).await.unwrap();
        }
        let reloaded = load_daily_counter(dir.path()).unwrap();
        assert_eq!(reloaded.count, 1);
    }
}
