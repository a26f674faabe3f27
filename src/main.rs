use optionsbot::config::StrategyConfig;
use optionsbot::data::{HistoricalOptionChain, ReplayFeed, WeeklyExpiry};
use optionsbot::db::PostgresPersistence;
use optionsbot::events::{EventBus, LogSink};
use optionsbot::execution::PaperExecution;
use optionsbot::live::LiveOrchestrator;
use optionsbot::models::{Candle, OptionDirection};
use optionsbot::Result;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::watch;

/// One contract's premium series in the option-chain file.
#[derive(Deserialize)]
struct ChainSeries {
    direction: OptionDirection,
    strike: f64,
    candles: Vec<Candle>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    tracing::info!("🚀 OptionsBot starting - paper trading replay loop");

    let cfg = StrategyConfig::from_env();
    cfg.validate()?;
    tracing::info!(
        capital = cfg.initial_capital,
        lots = cfg.quantity_lots,
        "strategy configured"
    );

    let candle_file =
        std::env::var("CANDLE_FILE").unwrap_or_else(|_| "data/candles.json".to_string());
    let chain_file =
        std::env::var("OPTION_CHAIN_FILE").unwrap_or_else(|_| "data/option_chain.json".to_string());

    let candles = load_candles(&candle_file)?;
    let chain = Arc::new(load_chain(&chain_file)?);
    tracing::info!(
        candles = candles.len(),
        "loaded replay dataset from {}",
        candle_file
    );

    // The replay feed serves both roles: one candle per poll plus option
    // quotes pinned to replay time.
    let feed = Arc::new(ReplayFeed::new(candles, chain));
    let adapter = Arc::new(PaperExecution::new(feed.clone()));

    let db = connect_to_postgres().await;
    let events = EventBus::new().with_sink(Arc::new(LogSink));

    let orchestrator = LiveOrchestrator::new(
        cfg,
        feed.clone(),
        feed,
        adapter,
        WeeklyExpiry::default(),
        events,
        db,
    )?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    orchestrator.run(shutdown_rx).await?;
    tracing::info!("shutdown complete");
    Ok(())
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter("optionsbot=info,optionsbot::strategy=debug")
        .init();
}

fn load_candles(path: &str) -> Result<Vec<Candle>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn load_chain(path: &str) -> Result<HistoricalOptionChain> {
    let raw = std::fs::read_to_string(path)?;
    let series: Vec<ChainSeries> = serde_json::from_str(&raw)?;
    let mut chain = HistoricalOptionChain::new();
    for entry in series {
        chain.insert_series(entry.direction, entry.strike, entry.candles);
    }
    Ok(chain)
}

async fn connect_to_postgres() -> Option<Arc<PostgresPersistence>> {
    let database_url = std::env::var("DATABASE_URL").ok()?;
    match PostgresPersistence::new(&database_url).await {
        Ok(p) => {
            tracing::info!("Postgres persistence enabled (positions & trades)");
            Some(Arc::new(p))
        }
        Err(e) => {
            tracing::warn!("Postgres unavailable, running without persistence: {}", e);
            None
        }
    }
}
