// src/notify/mod.rs
//! Output sinks. Delivery confirmation drives the ledger's notified state;
//! none of these assume idempotency on the channel side.

pub mod telegram;

use async_trait::async_trait;
use tracing::info;

use crate::classify::ClassificationResult;
use crate::item::Item;
use crate::pipeline::{Sink, SinkError};

pub use telegram::TelegramSink;

/// Logs instead of sending; dry-run and local development.
pub struct ConsoleSink;

#[async_trait]
impl Sink for ConsoleSink {
    async fn deliver(&self, item: &Item, result: &ClassificationResult) -> Result<(), SinkError> {
        info!(
            source = %item.source_id,
            category = result.category.as_key(),
            urgency = ?result.urgency,
            method = ?result.method,
            text = %item.preview(120),
            "dry-run notification"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "console"
    }
}
