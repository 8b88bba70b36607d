// src/pipeline.rs
//! Dispatch orchestrator: ties ledger, classifier, rate limiter and output
//! sinks together into the per-item pipeline and the polling cycle.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::classify::{ClassificationResult, Router};
use crate::item::Item;
use crate::ledger::{CheckOutcome, Ledger, LedgerStats};
use crate::ratelimit::RateLimiter;

/// A polling source adapter. May fail per-source without aborting the cycle
/// for other sources.
#[async_trait]
pub trait Source: Send + Sync {
    async fn fetch(&self, lookback: Duration) -> Result<Vec<Item>>;
    fn name(&self) -> &str;
}

/// Typed sink failure. Idempotency is NOT assumed here; the ledger is what
/// prevents duplicate sends.
#[derive(Debug, Clone, Error)]
pub enum SinkError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("rejected by channel: {0}")]
    Rejected(String),
}

/// Downstream notification channel.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn deliver(&self, item: &Item, result: &ClassificationResult)
        -> Result<(), SinkError>;
    fn name(&self) -> &str;
}

/// Counters for one polling cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleStats {
    pub fetched: usize,
    pub source_errors: usize,
    pub skipped_notified: usize,
    pub dropped_language: usize,
    pub dropped_short: usize,
    pub classified: usize,
    pub cache_reused: usize,
    pub not_relevant: usize,
    pub suppressed: usize,
    pub notified: usize,
    pub sink_failures: usize,
    pub ledger_errors: usize,
}

/// One-time metrics registration (so series show up on whatever recorder the
/// host process installs).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("monitor_items_total", "Items fetched from all sources.");
        describe_counter!("monitor_source_errors_total", "Per-source fetch failures.");
        describe_counter!(
            "monitor_dropped_language_total",
            "Items dropped for unsupported language."
        );
        describe_counter!("monitor_dropped_short_total", "Items below the text length floor.");
        describe_counter!("monitor_classified_total", "Fresh classification runs.");
        describe_counter!(
            "monitor_cache_reused_total",
            "Classifications reused from the ledger."
        );
        describe_counter!("monitor_suppressed_total", "Notifications denied by the rate cap.");
        describe_counter!("monitor_notified_total", "Confirmed deliveries.");
        describe_counter!("monitor_sink_errors_total", "Sink delivery failures.");
        describe_counter!("monitor_ledger_errors_total", "Ledger I/O failures.");
        describe_gauge!("monitor_last_cycle_ts", "Unix ts when the last cycle ran.");
    });
}

pub struct Monitor {
    sources: Vec<Box<dyn Source>>,
    sinks: Vec<Box<dyn Sink>>,
    router: Router,
    ledger: Ledger,
    limiter: RateLimiter,
    lookback: Duration,
    min_text_len: usize,
    retention_days: i64,
}

impl Monitor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sources: Vec<Box<dyn Source>>,
        sinks: Vec<Box<dyn Sink>>,
        router: Router,
        ledger: Ledger,
        limiter: RateLimiter,
        lookback_hours: i64,
        min_text_len: usize,
        retention_days: i64,
    ) -> Self {
        Self {
            sources,
            sinks,
            router,
            ledger,
            limiter,
            lookback: Duration::hours(lookback_hours.max(1)),
            min_text_len,
            retention_days,
        }
    }

    /// Run one polling cycle: fetch from every source (failures isolated),
    /// merge into one timestamp-ordered queue, process item by item.
    pub async fn run_cycle(&mut self) -> CycleStats {
        ensure_metrics_described();
        let mut stats = CycleStats::default();

        let mut queue: Vec<Item> = Vec::new();
        for source in &self.sources {
            match source.fetch(self.lookback).await {
                Ok(mut items) => {
                    debug!(source = source.name(), count = items.len(), "source fetched");
                    queue.append(&mut items);
                }
                Err(e) => {
                    warn!(source = source.name(), error = ?e, "source fetch error");
                    counter!("monitor_source_errors_total").increment(1);
                    stats.source_errors += 1;
                }
            }
        }
        queue.sort_by_key(|it| it.timestamp);
        stats.fetched = queue.len();
        counter!("monitor_items_total").increment(queue.len() as u64);

        for item in &queue {
            self.process_item(item, &mut stats).await;
        }

        if self.retention_days > 0 {
            match self.ledger.prune_older_than(self.retention_days) {
                Ok(0) => {}
                Ok(n) => debug!(pruned = n, "ledger retention pruning"),
                Err(e) => warn!(error = ?e, "ledger pruning failed"),
            }
        }

        gauge!("monitor_last_cycle_ts").set(Utc::now().timestamp() as f64);
        info!(
            fetched = stats.fetched,
            classified = stats.classified,
            reused = stats.cache_reused,
            suppressed = stats.suppressed,
            notified = stats.notified,
            "cycle completed"
        );
        stats
    }

    async fn process_item(&mut self, item: &Item, stats: &mut CycleStats) {
        // Unsupported language: dropped before classification, not an error.
        let Some(language) = item.language() else {
            counter!("monitor_dropped_language_total").increment(1);
            stats.dropped_language += 1;
            debug!(tag = %item.language, "unsupported language tag, dropping");
            return;
        };

        // 1) Dedup gate. Already-delivered fingerprints are a no-op: no
        // re-classification, no re-spend.
        let outcome = self.ledger.check(item);
        if outcome == CheckOutcome::SeenNotified {
            stats.skipped_notified += 1;
            return;
        }

        // Too-short posts carry no classifiable signal; remember them so the
        // next cycle skips them outright.
        if item.text.chars().count() < self.min_text_len {
            counter!("monitor_dropped_short_total").increment(1);
            stats.dropped_short += 1;
            if let Err(e) = self.ledger.record_seen(item, None) {
                warn!(error = ?e, "ledger write failed for short item");
                stats.ledger_errors += 1;
            }
            return;
        }

        // 2) Classify, or reuse the cached verdict from an earlier cycle.
        let classification = match outcome {
            CheckOutcome::SeenUnnotified(Some(cached)) => {
                counter!("monitor_cache_reused_total").increment(1);
                stats.cache_reused += 1;
                cached
            }
            _ => {
                counter!("monitor_classified_total").increment(1);
                stats.classified += 1;
                self.router.classify(item, language).await
            }
        };

        // 3) Commit the sighting before any side effect is attempted.
        let fp = match self.ledger.record_seen(item, Some(&classification)) {
            Ok(fp) => fp,
            Err(e) => {
                // Fatal for this item only: treated as not-yet-seen next cycle.
                warn!(error = ?e, "ledger write failed");
                counter!("monitor_ledger_errors_total").increment(1);
                stats.ledger_errors += 1;
                return;
            }
        };

        // 4) Irrelevant posts never touch the rate budget.
        if !classification.is_relevant() {
            stats.not_relevant += 1;
            return;
        }

        // 5) Admission. A suppressed item stays SEEN_UNNOTIFIED and remains
        // eligible on a later cycle.
        if !self.limiter.admit(classification.urgency) {
            counter!("monitor_suppressed_total").increment(1);
            stats.suppressed += 1;
            debug!(fingerprint = fp.as_str(), "suppressed by rate cap");
            return;
        }

        // 6) Deliver; one retry within the cycle, then defer to the next one.
        for sink in &self.sinks {
            match self.deliver_with_retry(sink.as_ref(), item, &classification).await {
                Ok(()) => {
                    if let Err(e) = self.ledger.record_notified(&fp, Utc::now()) {
                        // Sent but not committed: at-least-once on this edge.
                        warn!(error = ?e, "ledger commit after delivery failed");
                        stats.ledger_errors += 1;
                    }
                    counter!("monitor_notified_total").increment(1);
                    stats.notified += 1;
                    return; // at most one notification per item
                }
                Err(e) => {
                    warn!(sink = sink.name(), error = %e, "delivery failed, deferring");
                    counter!("monitor_sink_errors_total").increment(1);
                    stats.sink_failures += 1;
                }
            }
        }
    }

    async fn deliver_with_retry(
        &self,
        sink: &dyn Sink,
        item: &Item,
        result: &ClassificationResult,
    ) -> Result<(), SinkError> {
        match sink.deliver(item, result).await {
            Ok(()) => Ok(()),
            Err(first) => {
                debug!(sink = sink.name(), error = %first, "delivery retry");
                sink.deliver(item, result).await
            }
        }
    }

    /// Continuous mode: tick until the shutdown flag flips. A cycle always
    /// finishes its current item list; state is consistent between items.
    pub async fn run_forever(&mut self, interval_secs: u64, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs.max(1)));
        info!(interval_secs, "monitor loop started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("shutdown requested, stopping loop");
                        return;
                    }
                }
            }
        }
    }

    /// Statistics query for the operational surface.
    pub fn get_stats(&self) -> LedgerStats {
        self.ledger.stats()
    }
}
