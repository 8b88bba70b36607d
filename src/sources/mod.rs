// src/sources/mod.rs
//! Concrete source adapters. The pipeline only sees the `Source` trait; each
//! adapter normalizes its platform's payload into `Item`s.

pub mod forum_rss;

use once_cell::sync::OnceCell;

/// Normalize feed text: entity decode, strip tags, collapse whitespace.
pub fn normalize_feed_text(s: &str) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
    out = re_tags.replace_all(&out, " ").to_string();

    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").expect("ws regex"));
    out = re_ws.replace_all(&out, " ").to_string();

    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_tags_and_entities() {
        let s = "<p>Visa &amp; asylum&nbsp;&nbsp;question</p>";
        assert_eq!(normalize_feed_text(s), "Visa & asylum question");
    }
}
