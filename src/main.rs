//! Immigration monitor binary entrypoint.
//!
//! Modes: continuous loop (default), `--once`, `--stats`, `--test-notify`.
//! Process supervision is left to the caller; only an explicit shutdown
//! signal stops the loop.

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use immigration_monitor::classify::keywords::KeywordGate;
use immigration_monitor::classify::verifier::build_verifier;
use immigration_monitor::classify::{ClassificationResult, Method, Router, Urgency};
use immigration_monitor::config::AppConfig;
use immigration_monitor::item::{Item, SourceKind};
use immigration_monitor::ledger::Ledger;
use immigration_monitor::notify::{ConsoleSink, TelegramSink};
use immigration_monitor::pipeline::{Monitor, Sink, Source};
use immigration_monitor::ratelimit::RateLimiter;
use immigration_monitor::sources::forum_rss::ForumRssSource;
use immigration_monitor::Category;

#[derive(Debug, Parser)]
#[command(name = "immigration-monitor", about = "Feed monitor and classifier")]
struct Args {
    /// Config file path (overrides MONITOR_CONFIG_PATH).
    #[arg(long)]
    config: Option<String>,
    /// Run a single cycle and exit.
    #[arg(long)]
    once: bool,
    /// Print ledger statistics and exit.
    #[arg(long)]
    stats: bool,
    /// Send a test notification and exit.
    #[arg(long)]
    test_notify: bool,
    /// Log notifications instead of sending them.
    #[arg(long)]
    dry_run: bool,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("immigration_monitor=info,warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

fn build_sinks(cfg: &AppConfig, dry_run: bool) -> Result<Vec<Box<dyn Sink>>> {
    if dry_run || !cfg.telegram.enabled {
        if !dry_run {
            warn!("telegram sink disabled, notifications go to the log only");
        }
        return Ok(vec![Box::new(ConsoleSink)]);
    }
    let token = cfg.telegram.resolved_bot_token()?;
    Ok(vec![Box::new(
        TelegramSink::new(token, cfg.telegram.channel_id).with_timeout(10),
    )])
}

fn build_sources(cfg: &AppConfig) -> Vec<Box<dyn Source>> {
    let mut sources: Vec<Box<dyn Source>> = Vec::new();
    for feed in &cfg.sources.forum_feeds {
        sources.push(Box::new(ForumRssSource::from_url(
            &feed.id,
            &feed.language,
            &feed.url,
        )));
        info!(feed = %feed.id, "forum rss source initialized");
    }
    if sources.is_empty() {
        warn!("no sources configured, cycles will be empty");
    }
    sources
}

fn build_monitor(cfg: &AppConfig, dry_run: bool) -> Result<Monitor> {
    let gate = KeywordGate::load_default().context("loading keyword config")?;
    let api_key = cfg.ai.resolved_api_key()?;
    let verifier = build_verifier(
        cfg.ai.enabled,
        &cfg.ai.provider,
        &cfg.ai.model,
        &api_key,
        cfg.ai.timeout_secs,
        cfg.notifications.include_draft_response,
        cfg.ai.daily_limit,
        std::path::Path::new(&cfg.ai.budget_dir),
    );
    let router = Router::new(gate, verifier, cfg.strategy_table(), cfg.method);

    let ledger = Ledger::open(&cfg.ledger_path).context("opening ledger")?;
    let limiter = RateLimiter::per_hour(
        cfg.notifications.max_per_hour,
        cfg.notifications.high_urgency_reserve,
    );

    Ok(Monitor::new(
        build_sources(cfg),
        build_sinks(cfg, dry_run)?,
        router,
        ledger,
        limiter,
        cfg.lookback_hours,
        cfg.min_text_len,
        cfg.retention_days,
    ))
}

async fn send_test_notification(cfg: &AppConfig, dry_run: bool) -> Result<()> {
    let sinks = build_sinks(cfg, dry_run)?;
    let item = Item {
        source_id: "monitor".into(),
        source_kind: SourceKind::Chat,
        external_id: "test".into(),
        text: "Test notification from immigration-monitor. If you can read this, \
               the delivery path works."
            .into(),
        language: "en".into(),
        timestamp: chrono::Utc::now(),
        url: None,
        metadata: Default::default(),
    };
    let result = ClassificationResult {
        category: Category::Other,
        urgency: Urgency::Low,
        confidence: 1.0,
        summary: Some("Connectivity check".into()),
        draft_response: None,
        method: Method::Keyword,
    };
    for sink in &sinks {
        sink.deliver(&item, &result)
            .await
            .with_context(|| format!("test delivery via {}", sink.name()))?;
        info!(sink = sink.name(), "test notification delivered");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let args = Args::parse();
    let cfg = match &args.config {
        Some(path) => AppConfig::load_from_file(path)?,
        None => AppConfig::load_default()?,
    };

    if args.stats {
        let ledger = Ledger::open(&cfg.ledger_path).context("opening ledger")?;
        let stats = ledger.stats();
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    if args.test_notify {
        return send_test_notification(&cfg, args.dry_run).await;
    }

    let mut monitor = build_monitor(&cfg, args.dry_run)?;

    if args.once {
        let stats = monitor.run_cycle().await;
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    // Continuous mode with ctrl-c shutdown. The loop drains its current
    // cycle; every ledger write is an independent transaction.
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = tx.send(true);
        }
    });
    monitor.run_forever(cfg.poll_interval_secs, rx).await;
    Ok(())
}
