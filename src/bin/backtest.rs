use clap::Parser;
use optionsbot::backtest::synthetic::option_chain_for;
use optionsbot::backtest::{
    BacktestMetrics, BacktestOrchestrator, MarketScenario, SyntheticDataGenerator,
};
use optionsbot::config::StrategyConfig;
use optionsbot::data::WeeklyExpiry;
use optionsbot::Result;
use std::sync::Arc;

/// Replay the inside-bar breakout strategy over synthetic market scenarios.
#[derive(Parser)]
#[command(name = "backtest")]
struct Args {
    /// Candles per scenario
    #[arg(long, default_value_t = 500)]
    candles: usize,

    /// Starting capital
    #[arg(long, default_value_t = 100_000.0)]
    capital: f64,

    /// Seed for the synthetic data generator
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Flat time value added to every synthetic option premium
    #[arg(long, default_value_t = 100.0)]
    time_value: f64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("optionsbot=info")
        .init();

    let args = Args::parse();

    println!("\n╔═══════════════════════════════════════════════════════╗");
    println!("║         OPTIONSBOT BACKTESTING SUITE                 ║");
    println!("╚═══════════════════════════════════════════════════════╝");

    let cfg = StrategyConfig {
        initial_capital: args.capital,
        ..StrategyConfig::from_env()
    };

    let scenarios = [
        (MarketScenario::Uptrend, "📈 Uptrend"),
        (MarketScenario::Downtrend, "📉 Downtrend"),
        (MarketScenario::RangeBound, "↔️  Range-Bound"),
        (MarketScenario::Whipsaw, "⚡ Whipsaw"),
    ];

    let mut all_metrics = Vec::new();

    for (scenario, name) in scenarios {
        // Same seed per scenario keeps runs comparable.
        let mut generator = SyntheticDataGenerator::new(args.seed);
        let candles = generator.generate(scenario, args.candles);
        let chain = Arc::new(option_chain_for(&candles, cfg.strike_step, args.time_value));

        let orchestrator = BacktestOrchestrator::new(cfg.clone())?;
        let report = orchestrator
            .run(&candles, chain, &WeeklyExpiry::default())
            .await?;

        println!("\n>>> {}", name);
        report.metrics.print_report();
        all_metrics.push((name.to_string(), report.metrics));
    }

    print_summary_comparison(&all_metrics);

    Ok(())
}

fn print_summary_comparison(results: &[(String, BacktestMetrics)]) {
    println!("\n╔═══════════════════════════════════════════════════════╗");
    println!("║              SCENARIO COMPARISON                      ║");
    println!("╚═══════════════════════════════════════════════════════╝\n");

    println!(
        "{:<20} {:>12} {:>10} {:>8} {:>8} {:>8}",
        "Scenario", "P&L", "Return%", "Trades", "Win%", "Missed"
    );
    println!("{}", "─".repeat(72));

    for (name, metrics) in results {
        println!(
            "{:<20} {:>12.2} {:>10.2} {:>8} {:>8.1} {:>8}",
            name,
            metrics.total_pnl,
            metrics.total_return_pct,
            metrics.total_trades,
            metrics.win_rate,
            metrics.missed_trades
        );
    }

    println!();

    if let Some((best_name, best)) = results.iter().max_by(|a, b| {
        a.1.total_return_pct
            .partial_cmp(&b.1.total_return_pct)
            .unwrap()
    }) {
        println!("🏆 Best Scenario: {} ({:+.2}%)", best_name, best.total_return_pct);
    }

    if let Some((worst_name, worst)) = results.iter().min_by(|a, b| {
        a.1.total_return_pct
            .partial_cmp(&b.1.total_return_pct)
            .unwrap()
    }) {
        println!("⚠️  Worst Scenario: {} ({:+.2}%)", worst_name, worst.total_return_pct);
    }

    println!();
}
