//! Escrow Sniper - Headless Server
//!
//! Monitors escrow contracts for order lifecycle events and
//! below-market deposit rates, relaying both to Telegram.

mod config;

use clap::Parser;
use config::{AppConfig, ConfigError};
use escrow_alerts::dispatch::TelegramSink;
use escrow_alerts::{OutcomeDispatcher, SubscriptionStore, TelegramBot};
use escrow_core::{EventFields, TrackedContract};
use escrow_engine::{
    ForexTableFetcher, RateService, ReconciliationEngine, RegionalQuoteFetcher, SniperEngine,
};
use escrow_feeds::{ContractMonitor, EscrowDecoder, WsLogTransport};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Escrow Sniper CLI
#[derive(Parser, Debug)]
#[command(name = "escrow-sniper")]
#[command(about = "Escrow contract event monitor and rate sniper", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config.json")]
    config: String,

    /// Log level: trace, debug, info, warn, error
    #[arg(short, long)]
    log_level: Option<String>,

    /// Reconciliation quiet period in seconds
    #[arg(long)]
    quiet_period_secs: Option<u64>,

    /// Default sniper discount threshold in percent
    #[arg(long)]
    threshold: Option<f64>,
}

fn init_logging(level: &str) {
    let level = match level {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let config = AppConfig::load(&args.config)?;
    init_logging(args.log_level.as_deref().unwrap_or(&config.log_level));

    info!("Starting escrow sniper");

    let token = std::env::var("TELEGRAM_BOT_TOKEN")
        .map_err(|_| ConfigError::Missing("TELEGRAM_BOT_TOKEN"))?;

    let store = SubscriptionStore::connect(&config.database_url).await?;
    let bot = Arc::new(TelegramBot::new(&token, store.clone()));
    tokio::spawn(Arc::clone(&bot).run());

    let table_fetcher = Arc::new(ForexTableFetcher::new(&config.rates.forex_base_url)?);
    let regional_fetcher = Arc::new(RegionalQuoteFetcher::new(&config.rates.regional_quote_url)?);
    let rates = Arc::new(RateService::new(table_fetcher, regional_fetcher));

    // Settled outcomes flow from reconciliation to the dispatcher.
    let (outcomes_tx, outcomes_rx) = mpsc::channel(256);
    let reconciler = match args.quiet_period_secs {
        Some(secs) => ReconciliationEngine::with_quiet_period(
            outcomes_tx,
            std::time::Duration::from_secs(secs),
        ),
        None => ReconciliationEngine::new(outcomes_tx),
    };
    let dispatcher = OutcomeDispatcher::new(Arc::clone(&bot), store.clone())
        .with_broadcast_chat(config.sniper.broadcast_chat_id.clone());
    let announcer = dispatcher.clone();
    tokio::spawn(dispatcher.run(outcomes_rx));

    let sniper = Arc::new(
        SniperEngine::new(
            rates,
            Arc::new(store.clone()),
            Arc::new(TelegramSink::new(Arc::clone(&bot))),
            config.sniper.broadcast_chat_id.clone(),
        )
        .with_default_threshold(
            args.threshold
                .unwrap_or(config.sniper.default_threshold_percent),
        ),
    );

    // One monitor per contract, all feeding a single decoded-event channel.
    let (events_tx, mut events_rx) = mpsc::channel(1024);
    let transport = Arc::new(WsLogTransport::new(&config.node_ws_url));
    let decoder = Arc::new(EscrowDecoder::new());

    if config.contracts.is_empty() {
        warn!("no contracts configured, nothing to monitor");
    }

    let mut monitors = Vec::with_capacity(config.contracts.len());
    for (idx, settings) in config.contracts.iter().enumerate() {
        let contract = TrackedContract::new(idx as u32 + 1, &settings.address, &settings.label);
        info!(address = %settings.address, label = %settings.label, "monitoring contract");
        let monitor = ContractMonitor::new(
            contract,
            Arc::clone(&transport) as _,
            Arc::clone(&decoder) as _,
            events_tx.clone(),
        );
        monitor.connect();
        monitors.push(monitor);
    }
    drop(events_tx);

    let mut shutdown = Box::pin(tokio::signal::ctrl_c());
    loop {
        tokio::select! {
            maybe_event = events_rx.recv() => {
                let Some(event) = maybe_event else {
                    info!("event channel closed");
                    break;
                };
                if event.fields.is_state_changing() {
                    if matches!(event.fields, EventFields::IntentSignaled { .. }) {
                        let announcer = announcer.clone();
                        let created = event.clone();
                        tokio::spawn(async move { announcer.announce_created(&created).await });
                    } else {
                        reconciler.record(&event);
                    }
                }
                // Rate evaluation fetches over HTTP; it must never hold
                // up intake between same-transaction events.
                let sniper = Arc::clone(&sniper);
                tokio::spawn(async move { sniper.evaluate(&event).await });
            }
            _ = &mut shutdown => {
                info!("shutdown requested");
                for monitor in &monitors {
                    monitor.destroy();
                }
                break;
            }
        }
    }

    Ok(())
}
