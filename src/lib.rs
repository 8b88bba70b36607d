// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod classify;
pub mod config;
pub mod item;
pub mod ledger;
pub mod notify;
pub mod pipeline;
pub mod ratelimit;
pub mod sources;

// ---- Re-exports for stable public API ----
pub use classify::{
    Category, ClassificationResult, Method, MethodMode, Router, Strategy, Urgency,
};
pub use item::{Item, Language, SourceKind};
pub use ledger::{CheckOutcome, Fingerprint, Ledger, LedgerStats};
pub use pipeline::{CycleStats, Monitor, Sink, SinkError, Source};
pub use ratelimit::RateLimiter;
