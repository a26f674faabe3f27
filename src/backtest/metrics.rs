use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::{ExitReason, Trade};

/// Complete backtest performance summary.
///
/// TRAIL exits (winners cut short by the trailing stop after a partial
/// booking) are reported separately from plain stop-outs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestMetrics {
    // P&L
    pub total_pnl: f64,
    pub total_return_pct: f64,
    pub initial_capital: f64,
    pub final_balance: f64,
    pub capital_exhausted: bool,

    // Trade statistics (per archived exit record)
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub profit_factor: f64,

    // Exit breakdown
    pub stop_exits: usize,
    pub trail_exits: usize,
    pub target1_exits: usize,
    pub target2_exits: usize,
    pub expiry_exits: usize,
    pub manual_exits: usize,

    // Signal flow
    pub missed_trades: usize,
    pub rejected_orders: usize,
    pub skips: HashMap<String, usize>,

    // Risk
    pub max_drawdown: f64,
    pub max_drawdown_pct: f64,
}

impl BacktestMetrics {
    #[allow(clippy::too_many_arguments)]
    pub fn from_run(
        trades: &[Trade],
        initial_capital: f64,
        final_balance: f64,
        capital_exhausted: bool,
        missed_trades: usize,
        rejected_orders: usize,
        skips: HashMap<String, usize>,
    ) -> Self {
        let total_pnl: f64 = trades.iter().map(|t| t.realized_pnl).sum();

        let wins: Vec<f64> = trades
            .iter()
            .filter(|t| t.realized_pnl > 0.0)
            .map(|t| t.realized_pnl)
            .collect();
        let losses: Vec<f64> = trades
            .iter()
            .filter(|t| t.realized_pnl < 0.0)
            .map(|t| t.realized_pnl)
            .collect();

        let gross_profit: f64 = wins.iter().sum();
        let gross_loss: f64 = losses.iter().map(|l| l.abs()).sum();

        let mut exit_counts: HashMap<ExitReason, usize> = HashMap::new();
        for trade in trades {
            *exit_counts.entry(trade.exit_reason).or_insert(0) += 1;
        }

        // Equity curve over exits in chronological order.
        let mut equity = initial_capital;
        let mut peak = initial_capital;
        let mut max_drawdown = 0.0_f64;
        let mut by_exit: Vec<&Trade> = trades.iter().collect();
        by_exit.sort_by_key(|t| t.exit_time);
        for trade in by_exit {
            equity += trade.realized_pnl;
            peak = peak.max(equity);
            max_drawdown = max_drawdown.max(peak - equity);
        }
        let max_drawdown_pct = if peak > 0.0 {
            max_drawdown / peak * 100.0
        } else {
            0.0
        };

        let total = trades.len();
        Self {
            total_pnl,
            total_return_pct: total_pnl / initial_capital * 100.0,
            initial_capital,
            final_balance,
            capital_exhausted,
            total_trades: total,
            winning_trades: wins.len(),
            losing_trades: losses.len(),
            win_rate: if total > 0 {
                wins.len() as f64 / total as f64 * 100.0
            } else {
                0.0
            },
            avg_win: if wins.is_empty() {
                0.0
            } else {
                gross_profit / wins.len() as f64
            },
            avg_loss: if losses.is_empty() {
                0.0
            } else {
                -gross_loss / losses.len() as f64
            },
            largest_win: wins.iter().cloned().fold(0.0, f64::max),
            largest_loss: losses.iter().cloned().fold(0.0, f64::min),
            profit_factor: if gross_loss > 0.0 {
                gross_profit / gross_loss
            } else if gross_profit > 0.0 {
                f64::INFINITY
            } else {
                0.0
            },
            stop_exits: exit_counts.get(&ExitReason::Stop).copied().unwrap_or(0),
            trail_exits: exit_counts.get(&ExitReason::Trail).copied().unwrap_or(0),
            target1_exits: exit_counts.get(&ExitReason::Target1).copied().unwrap_or(0),
            target2_exits: exit_counts.get(&ExitReason::Target2).copied().unwrap_or(0),
            expiry_exits: exit_counts.get(&ExitReason::Expiry).copied().unwrap_or(0),
            manual_exits: exit_counts.get(&ExitReason::Manual).copied().unwrap_or(0),
            missed_trades,
            rejected_orders,
            skips,
            max_drawdown,
            max_drawdown_pct,
        }
    }

    pub fn print_report(&self) {
        println!("\n========== BACKTEST REPORT ==========");
        println!(
            "P&L: {:+.2} ({:+.2}%)  [{:.2} -> {:.2}]",
            self.total_pnl, self.total_return_pct, self.initial_capital, self.final_balance
        );
        if self.capital_exhausted {
            println!("⚠️  CAPITAL EXHAUSTED during run");
        }
        println!(
            "Trades: {} (win rate {:.1}%, {} wins / {} losses)",
            self.total_trades, self.win_rate, self.winning_trades, self.losing_trades
        );
        println!(
            "Avg win: {:+.2}  Avg loss: {:+.2}  Profit factor: {:.2}",
            self.avg_win, self.avg_loss, self.profit_factor
        );
        println!(
            "Largest win: {:+.2}  Largest loss: {:+.2}  Max drawdown: {:.2} ({:.2}%)",
            self.largest_win, self.largest_loss, self.max_drawdown, self.max_drawdown_pct
        );
        println!(
            "Exits: {} stop, {} trail, {} t1-book, {} t2, {} expiry, {} manual",
            self.stop_exits,
            self.trail_exits,
            self.target1_exits,
            self.target2_exits,
            self.expiry_exits,
            self.manual_exits
        );
        println!(
            "Missed breakouts: {}  Rejected orders: {}",
            self.missed_trades, self.rejected_orders
        );
        if !self.skips.is_empty() {
            let mut reasons: Vec<_> = self.skips.iter().collect();
            reasons.sort();
            let formatted: Vec<String> =
                reasons.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            println!("Skipped entries: {}", formatted.join(", "));
        }
        println!("=====================================\n");
    }
}
