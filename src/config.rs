// src/config.rs
//! Application configuration (TOML). The core consumes these as plain
//! values; syntax validation ends here.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::classify::{MethodMode, Strategy};
use crate::item::Language;

pub const DEFAULT_CONFIG_PATH: &str = "config/monitor.toml";
pub const ENV_CONFIG_PATH: &str = "MONITOR_CONFIG_PATH";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// "keywords" | "ai" | "hybrid"
    pub method: MethodMode,
    pub notifications: NotificationsCfg,
    pub ai: AiCfg,
    /// Per-language strategy overrides, e.g. `en = "ai_first"`. Unlisted
    /// supported languages keep the built-in binding.
    pub languages: HashMap<String, Strategy>,
    pub ledger_path: String,
    pub retention_days: i64,
    pub poll_interval_secs: u64,
    pub lookback_hours: i64,
    pub min_text_len: usize,
    pub sources: SourcesCfg,
    pub telegram: TelegramCfg,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            method: MethodMode::Hybrid,
            notifications: NotificationsCfg::default(),
            ai: AiCfg::default(),
            languages: HashMap::new(),
            ledger_path: "data/ledger.json".into(),
            retention_days: 30,
            poll_interval_secs: 900,
            lookback_hours: 2,
            min_text_len: 30,
            sources: SourcesCfg::default(),
            telegram: TelegramCfg::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationsCfg {
    pub max_per_hour: usize,
    /// Window slots held back for high urgency once the rest is used.
    pub high_urgency_reserve: usize,
    pub include_draft_response: bool,
}

impl Default for NotificationsCfg {
    fn default() -> Self {
        Self {
            max_per_hour: 30,
            high_urgency_reserve: 5,
            include_draft_response: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AiCfg {
    pub enabled: bool,
    /// "anthropic" (case-insensitive)
    pub provider: String,
    pub model: String,
    /// "ENV" means: read from ANTHROPIC_API_KEY.
    pub api_key: String,
    pub timeout_secs: u64,
    pub daily_limit: u32,
    pub budget_dir: String,
}

impl Default for AiCfg {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: "anthropic".into(),
            model: "claude-haiku-4-5".into(),
            api_key: "ENV".into(),
            timeout_secs: 20,
            daily_limit: 200,
            budget_dir: "data".into(),
        }
    }
}

impl AiCfg {
    /// Resolve the key, honoring the "ENV" indirection. Missing env var with
    /// AI enabled is a startup error; disabled AI never needs a key.
    pub fn resolved_api_key(&self) -> Result<String> {
        if !self.api_key.trim().eq_ignore_ascii_case("env") {
            return Ok(self.api_key.clone());
        }
        if !self.enabled {
            return Ok(String::new());
        }
        env::var("ANTHROPIC_API_KEY").context("missing ANTHROPIC_API_KEY env var")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SourcesCfg {
    pub forum_feeds: Vec<FeedCfg>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedCfg {
    /// e.g. "r/immigration"
    pub id: String,
    pub url: String,
    /// Language tag the feed is expected to carry.
    #[serde(default = "default_feed_language")]
    pub language: String,
}

fn default_feed_language() -> String {
    "en".into()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelegramCfg {
    pub enabled: bool,
    /// "ENV" means: read from TELEGRAM_BOT_TOKEN.
    pub bot_token: String,
    pub channel_id: i64,
}

impl Default for TelegramCfg {
    fn default() -> Self {
        Self {
            enabled: false,
            bot_token: "ENV".into(),
            channel_id: 0,
        }
    }
}

impl TelegramCfg {
    pub fn resolved_bot_token(&self) -> Result<String> {
        if !self.bot_token.trim().eq_ignore_ascii_case("env") {
            return Ok(self.bot_token.clone());
        }
        if !self.enabled {
            return Ok(String::new());
        }
        env::var("TELEGRAM_BOT_TOKEN").context("missing TELEGRAM_BOT_TOKEN env var")
    }
}

impl AppConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("reading config {}", path.as_ref().display()))?;
        let mut cfg: AppConfig = toml::from_str(&content).context("parsing config toml")?;
        cfg.ai.provider = cfg.ai.provider.to_lowercase();
        Ok(cfg)
    }

    /// Load using env var + fallbacks:
    /// 1) $MONITOR_CONFIG_PATH
    /// 2) config/monitor.toml
    /// 3) built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = env::var(ENV_CONFIG_PATH) {
            return Self::load_from_file(&p);
        }
        let default = Path::new(DEFAULT_CONFIG_PATH);
        if default.exists() {
            return Self::load_from_file(default);
        }
        Ok(Self::default())
    }

    /// Strategy table resolved once at startup: built-in bindings, then
    /// config overrides for recognized language tags.
    pub fn strategy_table(&self) -> HashMap<Language, Strategy> {
        let mut table = crate::classify::default_strategy_table();
        for (tag, strategy) in &self.languages {
            match Language::from_tag(tag) {
                Some(lang) => {
                    table.insert(lang, *strategy);
                }
                None => {
                    tracing::warn!(tag = %tag, "strategy binding for unsupported language ignored")
                }
            }
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Strategy;

    #[test]
    fn empty_toml_yields_defaults() {
        let cfg: AppConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.notifications.max_per_hour, 30);
        assert_eq!(cfg.method, MethodMode::Hybrid);
        assert_eq!(cfg.min_text_len, 30);
    }

    #[test]
    fn strategy_overrides_apply_to_supported_tags_only() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [languages]
            en = "ai_first"
            es = "ai_first"
            "#,
        )
        .unwrap();
        let table = cfg.strategy_table();
        assert_eq!(table.get(&Language::En), Some(&Strategy::AiFirst));
        assert_eq!(table.get(&Language::Ru), Some(&Strategy::AiFirst));
        assert_eq!(table.len(), 3); // "es" ignored
    }

    #[test]
    fn full_config_parses() {
        let cfg: AppConfig = toml::from_str(
            r#"
            method = "hybrid"
            ledger_path = "data/test.json"
            min_text_len = 10

            [notifications]
            max_per_hour = 12
            high_urgency_reserve = 3

            [ai]
            enabled = true
            provider = "Anthropic"
            timeout_secs = 15

            [[sources.forum_feeds]]
            id = "r/immigration"
            url = "https://example.org/r/immigration/new/.rss"

            [telegram]
            enabled = true
            channel_id = -100123
            "#,
        )
        .unwrap();
        assert_eq!(cfg.notifications.max_per_hour, 12);
        assert!(cfg.ai.enabled);
        assert_eq!(cfg.sources.forum_feeds.len(), 1);
        assert_eq!(cfg.sources.forum_feeds[0].language, "en");
        assert_eq!(cfg.telegram.channel_id, -100123);
    }
}
