// src/ledger.rs
//! Durable dedup ledger: fingerprint -> delivery state.
//!
//! The fingerprint hashes a normalized form of (source_kind, text), so the
//! same post re-fetched or cross-posted under different source ids collapses
//! to one entry. The ledger is the single source of truth for "has this been
//! sent": at most one `notified_at` is ever set per fingerprint.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::classify::ClassificationResult;
use crate::item::Item;

/// Same token shape as the keyword gate: hyphenated codes stay one token.
static RE_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?u)\w+(?:-\w+)*").expect("token regex"));

/// Content fingerprint, hex encoded. Deterministic across restarts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(item: &Item) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(item.source_kind.as_str().as_bytes());
        hasher.update(b"\n");
        hasher.update(normalize_for_fingerprint(&item.text).as_bytes());
        let digest = hasher.finalize();
        let mut out = String::with_capacity(32);
        for b in digest.iter().take(16) {
            use std::fmt::Write as _;
            let _ = write!(&mut out, "{:02x}", b);
        }
        Fingerprint(out)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Lowercase, collapse whitespace, strip punctuation. Intra-token hyphens
/// stay significant ("i-485" vs "i 485" are distinct posts).
fn normalize_for_fingerprint(text: &str) -> String {
    let lowered = text.to_lowercase();
    let mut out = String::with_capacity(lowered.len());
    for m in RE_TOKEN.find_iter(&lowered) {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(m.as_str());
    }
    out
}

/// Outcome of the pre-classification check.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    New,
    /// Seen but not delivered (e.g. suppressed by the rate limiter). Carries
    /// the cached classification so the AI budget is not re-spent.
    SeenUnnotified(Option<ClassificationResult>),
    SeenNotified,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub fingerprint: Fingerprint,
    pub source_kind: String,
    pub first_seen_at: DateTime<Utc>,
    /// `None` means seen but not yet delivered.
    pub notified_at: Option<DateTime<Utc>>,
    /// Last computed classification, cached to avoid recomputation on retry.
    pub classification: Option<ClassificationResult>,
}

#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub struct LedgerStats {
    pub total_seen: usize,
    pub total_notified: usize,
    pub pending: usize,
    pub by_source_kind: HashMap<String, usize>,
}

/// Single-writer file-backed ledger. Every write is a complete persist, so a
/// cycle may be aborted between items without corrupting state.
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    entries: HashMap<Fingerprint, LedgerEntry>,
}

impl Ledger {
    /// Open (or create) the ledger file at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating ledger dir {}", parent.display()))?;
        }
        let entries = if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("reading ledger {}", path.display()))?;
            let list: Vec<LedgerEntry> =
                serde_json::from_str(&raw).context("parsing ledger json")?;
            list.into_iter()
                .map(|e| (e.fingerprint.clone(), e))
                .collect()
        } else {
            HashMap::new()
        };
        Ok(Self { path, entries })
    }

    /// Pre-classification gate. `SeenNotified` short-circuits the pipeline.
    pub fn check(&self, item: &Item) -> CheckOutcome {
        let fp = Fingerprint::of(item);
        match self.entries.get(&fp) {
            None => CheckOutcome::New,
            Some(e) if e.notified_at.is_some() => CheckOutcome::SeenNotified,
            Some(e) => CheckOutcome::SeenUnnotified(e.classification.clone()),
        }
    }

    /// Record the sighting and its classification. Committed durably before
    /// any notification side effect is attempted.
    pub fn record_seen(
        &mut self,
        item: &Item,
        classification: Option<&ClassificationResult>,
    ) -> Result<Fingerprint> {
        let fp = Fingerprint::of(item);
        let entry = self
            .entries
            .entry(fp.clone())
            .or_insert_with(|| LedgerEntry {
                fingerprint: fp.clone(),
                source_kind: item.source_kind.as_str().to_string(),
                first_seen_at: item.timestamp,
                notified_at: None,
                classification: None,
            });
        if let Some(c) = classification {
            entry.classification = Some(c.clone());
        }
        self.persist()?;
        Ok(fp)
    }

    /// Mark delivery. Called only after the sink confirms, so a crash before
    /// this point re-delivers rather than silently dropping. Idempotent: an
    /// already-set `notified_at` is never overwritten.
    pub fn record_notified(&mut self, fp: &Fingerprint, at: DateTime<Utc>) -> Result<()> {
        if let Some(entry) = self.entries.get_mut(fp) {
            if entry.notified_at.is_none() {
                entry.notified_at = Some(at);
                self.persist()?;
            }
        }
        Ok(())
    }

    /// Retention pruning keyed on `first_seen_at`. A pruned post that
    /// resurfaces is treated as new again.
    pub fn prune_older_than(&mut self, days: i64) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(days);
        let before = self.entries.len();
        self.entries.retain(|_, e| e.first_seen_at >= cutoff);
        let removed = before - self.entries.len();
        if removed > 0 {
            self.persist()?;
        }
        Ok(removed)
    }

    pub fn stats(&self) -> LedgerStats {
        let mut stats = LedgerStats {
            total_seen: self.entries.len(),
            ..Default::default()
        };
        for e in self.entries.values() {
            if e.notified_at.is_some() {
                stats.total_notified += 1;
            } else {
                stats.pending += 1;
            }
            *stats.by_source_kind.entry(e.source_kind.clone()).or_insert(0) += 1;
        }
        stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Atomic write: temp file + rename, same as the AI cache files.
    fn persist(&self) -> Result<()> {
        let mut list: Vec<&LedgerEntry> = self.entries.values().collect();
        list.sort_by_key(|e| e.first_seen_at);
        let json = serde_json::to_string(&list).context("serializing ledger")?;
        let tmp = self.path.with_extension("json.tmp");
        let mut f = fs::File::create(&tmp)
            .with_context(|| format!("creating {}", tmp.display()))?;
        f.write_all(json.as_bytes()).context("writing ledger tmp")?;
        fs::rename(&tmp, &self.path).context("committing ledger")?;
        Ok(())
    }
}
