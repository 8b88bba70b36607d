// src/sources/forum_rss.rs
//! Forum feed adapter (reddit-style feeds). Fixture mode for tests, HTTP
//! mode for runtime; both go through the same parser.
//!
//! Reddit serves Atom (`<feed>/<entry>`) at its `.rss` URLs; other forums
//! serve RSS 2.0 (`<rss>/<channel>/<item>`). Both shapes are accepted and
//! mapped into one neutral entry before item construction.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use quick_xml::de::from_str;
use serde::Deserialize;
use time::{format_description::well_known::Rfc2822, OffsetDateTime, UtcOffset};

use crate::item::{Item, SourceKind};
use crate::pipeline::Source;
use crate::sources::normalize_feed_text;

// ---- RSS 2.0 wire shape ----

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    title: Option<String>,
    link: Option<String>,
    guid: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    author: Option<String>,
}

// ---- Atom wire shape (what reddit actually serves) ----

#[derive(Debug, Deserialize)]
struct Atom {
    #[serde(rename = "entry", default)]
    entry: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<String>,
    id: Option<String>,
    link: Option<AtomLink>,
    published: Option<String>,
    updated: Option<String>,
    content: Option<AtomText>,
    author: Option<AtomAuthor>,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
}

/// Element with a `type` attribute and text body, e.g. `<content type="html">`.
#[derive(Debug, Deserialize)]
struct AtomText {
    #[serde(rename = "$text")]
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomAuthor {
    name: Option<String>,
}

/// Format-neutral entry both wire shapes map into.
struct RawEntry {
    title: Option<String>,
    link: Option<String>,
    id: Option<String>,
    timestamp: Option<DateTime<Utc>>,
    body: Option<String>,
    author: Option<String>,
}

impl From<RssItem> for RawEntry {
    fn from(it: RssItem) -> Self {
        Self {
            timestamp: it.pub_date.as_deref().and_then(parse_rfc2822),
            title: it.title,
            link: it.link,
            id: it.guid,
            body: it.description,
            author: it.author,
        }
    }
}

impl From<AtomEntry> for RawEntry {
    fn from(e: AtomEntry) -> Self {
        Self {
            timestamp: e
                .published
                .as_deref()
                .or(e.updated.as_deref())
                .and_then(parse_rfc3339),
            title: e.title,
            link: e.link.and_then(|l| l.href),
            id: e.id,
            body: e.content.and_then(|c| c.value),
            author: e.author.and_then(|a| a.name),
        }
    }
}

fn parse_rfc2822(ts: &str) -> Option<DateTime<Utc>> {
    let unix = OffsetDateTime::parse(ts, &Rfc2822)
        .ok()
        .map(|dt| dt.to_offset(UtcOffset::UTC).unix_timestamp())?;
    Utc.timestamp_opt(unix, 0).single()
}

fn parse_rfc3339(ts: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

enum Mode {
    Fixture(String),
    Http { url: String, client: reqwest::Client },
}

pub struct ForumRssSource {
    feed_id: String,
    language: String,
    mode: Mode,
}

impl ForumRssSource {
    pub fn from_fixture(feed_id: &str, language: &str, xml: &str) -> Self {
        Self {
            feed_id: feed_id.to_string(),
            language: language.to_string(),
            mode: Mode::Fixture(xml.to_string()),
        }
    }

    pub fn from_url(feed_id: &str, language: &str, url: &str) -> Self {
        let client = reqwest::Client::builder()
            .user_agent("immigration-monitor/0.1")
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .expect("reqwest client");
        Self {
            feed_id: feed_id.to_string(),
            language: language.to_string(),
            mode: Mode::Http {
                url: url.to_string(),
                client,
            },
        }
    }

    fn parse_items(&self, xml: &str, lookback: chrono::Duration) -> Result<Vec<Item>> {
        // RSS first; an RSS document would parse as an empty Atom feed, the
        // reverse cannot happen.
        let entries: Vec<RawEntry> = match from_str::<Rss>(xml) {
            Ok(rss) => rss.channel.item.into_iter().map(RawEntry::from).collect(),
            Err(_) => {
                let atom: Atom = from_str(xml).context("parsing feed xml (rss or atom)")?;
                atom.entry.into_iter().map(RawEntry::from).collect()
            }
        };

        let cutoff = Utc::now() - lookback;
        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            let text_raw = match (&entry.title, &entry.body) {
                (Some(t), Some(b)) => format!("{t}. {b}"),
                (Some(t), None) => t.clone(),
                (None, Some(b)) => b.clone(),
                (None, None) => continue,
            };
            let text = normalize_feed_text(&text_raw);
            if text.is_empty() {
                continue;
            }

            let timestamp = entry.timestamp.unwrap_or_else(Utc::now);
            if timestamp < cutoff {
                continue;
            }

            let external_id = entry
                .id
                .clone()
                .or_else(|| entry.link.clone())
                .unwrap_or_else(|| text.chars().take(64).collect());

            let mut metadata = std::collections::HashMap::new();
            if let Some(author) = &entry.author {
                metadata.insert("author".to_string(), author.clone());
            }

            out.push(Item {
                source_id: self.feed_id.clone(),
                source_kind: SourceKind::Forum,
                external_id,
                text,
                language: self.language.clone(),
                timestamp,
                url: entry.link,
                metadata,
            });
        }
        Ok(out)
    }
}

#[async_trait]
impl Source for ForumRssSource {
    async fn fetch(&self, lookback: chrono::Duration) -> Result<Vec<Item>> {
        match &self.mode {
            Mode::Fixture(xml) => self.parse_items(xml, lookback),
            Mode::Http { url, client } => {
                let body = client
                    .get(url)
                    .send()
                    .await
                    .with_context(|| format!("fetching {url}"))?
                    .text()
                    .await
                    .context("reading rss body")?;
                self.parse_items(&body, lookback)
            }
        }
    }

    fn name(&self) -> &str {
        &self.feed_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS_FIXTURE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>r/immigration</title>
    <item>
      <title>Visa denied at consulate</title>
      <link>https://example.org/p/1</link>
      <guid>p1</guid>
      <pubDate>Mon, 24 Aug 2026 10:00:00 +0000</pubDate>
      <description>&lt;p&gt;My B2 visa was denied, what now?&lt;/p&gt;</description>
      <author>u/worried</author>
    </item>
    <item>
      <title>Old post</title>
      <guid>p2</guid>
      <pubDate>Mon, 01 Jan 2001 00:00:00 +0000</pubDate>
      <description>ancient</description>
    </item>
  </channel>
</rss>"#;

    const ATOM_FIXTURE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>newest submissions : immigration</title>
  <entry>
    <author><name>/u/anxious_applicant</name></author>
    <id>t3_abc123</id>
    <link href="https://www.reddit.com/r/immigration/comments/abc123/"/>
    <published>2026-08-24T10:00:00+00:00</published>
    <updated>2026-08-24T10:05:00+00:00</updated>
    <title>Asylum interview rescheduled twice</title>
    <content type="html">&lt;div&gt;Has anyone dealt with repeated rescheduling?&lt;/div&gt;</content>
  </entry>
  <entry>
    <id>t3_old000</id>
    <updated>2001-01-01T00:00:00+00:00</updated>
    <title>Ancient thread</title>
  </entry>
</feed>"#;

    #[tokio::test]
    async fn parses_rss_fixture_and_applies_lookback() {
        let src = ForumRssSource::from_fixture("r/immigration", "en", RSS_FIXTURE);
        // Generous lookback so the first item passes regardless of today.
        let items = src.fetch(chrono::Duration::days(365 * 50)).await.unwrap();
        assert_eq!(items.len(), 2);

        let src = ForumRssSource::from_fixture("r/immigration", "en", RSS_FIXTURE);
        let items = src.fetch(chrono::Duration::days(365 * 10)).await.unwrap();
        assert_eq!(items.len(), 1);
        let it = &items[0];
        assert_eq!(it.external_id, "p1");
        assert_eq!(it.source_kind, SourceKind::Forum);
        assert!(it.text.starts_with("Visa denied at consulate."));
        assert!(!it.text.contains('<'));
        assert_eq!(it.metadata.get("author").map(String::as_str), Some("u/worried"));
    }

    #[tokio::test]
    async fn parses_reddit_style_atom_feed() {
        let src = ForumRssSource::from_fixture("r/immigration", "en", ATOM_FIXTURE);
        let items = src.fetch(chrono::Duration::days(365 * 10)).await.unwrap();
        assert_eq!(items.len(), 1);

        let it = &items[0];
        assert_eq!(it.external_id, "t3_abc123");
        assert_eq!(
            it.url.as_deref(),
            Some("https://www.reddit.com/r/immigration/comments/abc123/")
        );
        assert!(it.text.starts_with("Asylum interview rescheduled twice."));
        assert!(!it.text.contains('<'));
        assert_eq!(it.timestamp.to_rfc3339(), "2026-08-24T10:00:00+00:00");
        assert_eq!(
            it.metadata.get("author").map(String::as_str),
            Some("/u/anxious_applicant")
        );
    }

    #[test]
    fn rfc2822_dates_parse_to_utc() {
        let dt = parse_rfc2822("Mon, 24 Aug 2026 10:00:00 +0200").unwrap();
        assert_eq!(dt.to_rfc3339(), "2026-08-24T08:00:00+00:00");
    }

    #[test]
    fn rfc3339_dates_parse_to_utc() {
        let dt = parse_rfc3339("2026-08-24T12:00:00+02:00").unwrap();
        assert_eq!(dt.to_rfc3339(), "2026-08-24T10:00:00+00:00");
    }
}
