// src/notify/telegram.rs
//! Telegram bot-API sink: formats a classified post and posts it to the
//! notification channel. Retries live in the orchestrator, not here.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::classify::{Category, ClassificationResult, Urgency};
use crate::item::{Item, SourceKind};
use crate::pipeline::{Sink, SinkError};

#[derive(Clone)]
pub struct TelegramSink {
    bot_token: String,
    channel_id: i64,
    client: Client,
    timeout: Duration,
}

impl TelegramSink {
    pub fn new(bot_token: String, channel_id: i64) -> Self {
        Self {
            bot_token,
            channel_id,
            client: Client::new(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    fn api_url(&self) -> String {
        format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token)
    }
}

fn source_marker(kind: SourceKind) -> &'static str {
    match kind {
        SourceKind::Forum => "\u{1F534}",      // red circle
        SourceKind::Chat => "\u{2708}\u{FE0F}", // airplane
        SourceKind::Aggregator => "\u{1F4F0}", // newspaper
    }
}

fn urgency_marker(urgency: Urgency) -> &'static str {
    match urgency {
        Urgency::High => "\u{1F525}",   // fire
        Urgency::Medium => "\u{26A1}",  // zap
        Urgency::Low => "\u{1F4A1}",    // bulb
    }
}

fn category_label(category: Category) -> &'static str {
    match category {
        Category::Visa => "\u{1F6C2} Visa",
        Category::Asylum => "\u{1F6E1} Asylum",
        Category::Deportation => "\u{26A0}\u{FE0F} Deportation",
        Category::GreenCard => "\u{1F49A} Green Card",
        Category::Work => "\u{1F4BC} Work Permit",
        Category::Family => "\u{1F46A} Family",
        Category::Citizenship => "\u{1F1FA}\u{1F1F8} Citizenship",
        Category::Tps => "\u{1F504} TPS/DACA",
        Category::Other | Category::NotRelevant => "\u{1F4CB} Other",
    }
}

/// Markdown message in the channel's established shape: header with source
/// and urgency, category line, preview, optional summary and draft.
pub fn format_message(item: &Item, result: &ClassificationResult) -> String {
    let mut lines = vec![
        format!(
            "{} **{}** {}",
            source_marker(item.source_kind),
            item.source_id,
            urgency_marker(result.urgency)
        ),
        format!("\u{1F4C2} {}", category_label(result.category)),
    ];
    if let Some(location) = item.metadata.get("location") {
        if !location.is_empty() {
            lines.push(format!("\u{1F4CD} {location}"));
        }
    }
    lines.push(String::new());
    lines.push(format!("\u{1F4DD} {}", item.preview(500)));

    if let Some(summary) = &result.summary {
        lines.push(String::new());
        lines.push(format!("\u{1F4CC} _{summary}_"));
    }
    if let Some(draft) = &result.draft_response {
        lines.push(String::new());
        lines.push("\u{270F}\u{FE0F} **Draft response:**".to_string());
        lines.push(draft.clone());
    }
    if let Some(url) = &item.url {
        lines.push(String::new());
        lines.push(format!("\u{1F517} [Open source]({url})"));
    }
    lines.join("\n")
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
    parse_mode: &'a str,
    disable_web_page_preview: bool,
}

#[derive(Deserialize)]
struct ApiReply {
    ok: bool,
    description: Option<String>,
}

#[async_trait]
impl Sink for TelegramSink {
    async fn deliver(&self, item: &Item, result: &ClassificationResult) -> Result<(), SinkError> {
        let text = format_message(item, result);
        let payload = SendMessage {
            chat_id: self.channel_id,
            text: &text,
            parse_mode: "Markdown",
            disable_web_page_preview: true,
        };

        let resp = self
            .client
            .post(self.api_url())
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?;

        let status = resp.status();
        let reply: ApiReply = resp
            .json()
            .await
            .map_err(|e| SinkError::Transport(format!("bad api reply: {e}")))?;

        if !reply.ok {
            return Err(SinkError::Rejected(format!(
                "telegram api {}: {}",
                status,
                reply.description.unwrap_or_else(|| "unknown error".into())
            )));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "telegram"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Method;
    use chrono::Utc;
    use std::collections::HashMap;

    fn mk_item() -> Item {
        let mut metadata = HashMap::new();
        metadata.insert("location".to_string(), "Chicago, IL".to_string());
        Item {
            source_id: "r/immigration".into(),
            source_kind: SourceKind::Forum,
            external_id: "p1".into(),
            text: "My asylum interview is next week and my lawyer dropped the case".into(),
            language: "en".into(),
            timestamp: Utc::now(),
            url: Some("https://example.org/p/1".into()),
            metadata,
        }
    }

    #[test]
    fn message_carries_category_urgency_and_permalink() {
        let result = ClassificationResult {
            category: Category::Asylum,
            urgency: Urgency::High,
            confidence: 0.95,
            summary: Some("Asylum seeker lost representation before interview".into()),
            draft_response: None,
            method: Method::Hybrid,
        };
        let msg = format_message(&mk_item(), &result);
        assert!(msg.contains("r/immigration"));
        assert!(msg.contains("Asylum"));
        assert!(msg.contains("Chicago, IL"));
        assert!(msg.contains("https://example.org/p/1"));
        assert!(msg.contains("\u{1F525}")); // high urgency marker
    }

    #[test]
    fn long_text_is_truncated_at_presentation_only() {
        let mut item = mk_item();
        item.text = "word ".repeat(200);
        let result = ClassificationResult::not_relevant(Method::Keyword, 0.0);
        let msg = format_message(&item, &result);
        let preview_line = msg
            .lines()
            .find(|l| l.starts_with('\u{1F4DD}'))
            .expect("preview line");
        assert!(preview_line.chars().count() < 520);
    }
}
