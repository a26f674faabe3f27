use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::backtest::metrics::BacktestMetrics;
use crate::config::StrategyConfig;
use crate::data::{ExpiryCalendar, HistoricalOptionChain};
use crate::events::{CollectorSink, EventBus, TradeEvent};
use crate::execution::{ExecutionAdapter, MonitorParams, MonitorStep, PositionMonitor, SimulatedExecution};
use crate::models::{Candle, ExitReason, InsideBarSignal, OptionDirection, Position, PositionStatus, Trade};
use crate::risk::{CapitalLedger, RiskGate};
use crate::strategy::{BreakoutEvaluator, BreakoutOutcome, PatternDetector};
use uuid::Uuid;

/// Everything a finished replay produced.
#[derive(Debug)]
pub struct BacktestReport {
    pub metrics: BacktestMetrics,
    pub trades: Vec<Trade>,
    pub events: Vec<TradeEvent>,
}

/// Single-threaded deterministic replay of the full trade lifecycle.
///
/// Each candle boundary advances open monitors first (using that bar's OHLC
/// with fixed intrabar ordering), then runs breakout evaluation and pattern
/// detection. Two runs over the same dataset produce identical trades.
pub struct BacktestOrchestrator {
    cfg: StrategyConfig,
    detector: PatternDetector,
    evaluator: BreakoutEvaluator,
}

impl BacktestOrchestrator {
    pub fn new(cfg: StrategyConfig) -> anyhow::Result<Self> {
        cfg.validate()?;
        let evaluator = BreakoutEvaluator::new(cfg.missed_trade_grace_secs);
        Ok(Self {
            cfg,
            detector: PatternDetector::new(),
            evaluator,
        })
    }

    pub async fn run(
        &self,
        candles: &[Candle],
        chain: Arc<HistoricalOptionChain>,
        calendar: &impl ExpiryCalendar,
    ) -> anyhow::Result<BacktestReport> {
        crate::data::validate_candle_series(candles)?;

        let ledger = Arc::new(CapitalLedger::new(self.cfg.initial_capital));
        let collector = Arc::new(CollectorSink::new());
        let events = EventBus::new().with_sink(collector.clone());
        let gate = RiskGate::new(self.cfg.clone(), ledger.clone());
        let adapter = SimulatedExecution::new(chain.clone());

        let mut monitors: Vec<PositionMonitor> = Vec::new();
        let mut trades: Vec<Trade> = Vec::new();
        let mut active: Option<InsideBarSignal> = None;
        // Inside bars at or before this instant are spent and never rescanned.
        let mut scan_floor: Option<DateTime<Utc>> = None;
        let mut skips: HashMap<String, usize> = HashMap::new();
        let mut missed_trades = 0usize;
        let mut rejected_orders = 0usize;

        tracing::info!(candles = candles.len(), "starting backtest replay");

        for i in 0..candles.len() {
            let candle = &candles[i];
            let now = candle.timestamp;
            let visible = &candles[..=i];

            // 1. Advance open positions on this bar. Monitors track premium
            // levels, so each one gets its own contract's bar, not the
            // underlying's.
            for monitor in monitors.iter_mut() {
                let (direction, strike) = {
                    let p = monitor.position();
                    (p.direction, p.strike)
                };
                let Some(premium_bar) = chain.candle_at(direction, strike, now) else {
                    continue;
                };
                for step in monitor.observe_bar(&premium_bar) {
                    match step {
                        MonitorStep::PartialBooked(trade) | MonitorStep::Closed(trade) => {
                            trades.push(trade)
                        }
                        MonitorStep::Holding => {}
                    }
                }
            }
            monitors.retain(|m| !m.is_closed());

            // 2. Evaluate the active signal for a breakout.
            if let Some(signal) = active.as_mut() {
                match self.evaluator.evaluate(signal, visible, now) {
                    BreakoutOutcome::Confirmed { direction, candle: breakout } => {
                        let signal = active.take().unwrap();
                        scan_floor = Some(breakout.timestamp);
                        events.emit(TradeEvent::BreakoutConfirmed {
                            signal: signal.clone(),
                            direction,
                            candle: breakout.clone(),
                        });
                        self.try_enter(
                            &signal,
                            direction,
                            &breakout,
                            now,
                            &gate,
                            &adapter,
                            chain.as_ref(),
                            calendar,
                            &ledger,
                            &events,
                            &mut monitors,
                            &mut skips,
                            &mut rejected_orders,
                        )
                        .await?;
                    }
                    BreakoutOutcome::Missed { direction, candle: breakout } => {
                        let signal = active.take().unwrap();
                        missed_trades += 1;
                        scan_floor = Some(breakout.timestamp);
                        events.emit(TradeEvent::MissedTrade {
                            signal,
                            direction,
                            candle: breakout.clone(),
                        });
                        // Fresh scan in the same cycle, stale bars excluded.
                        if let Some(signal) = self.detector.detect_after(visible, scan_floor) {
                            events.emit(TradeEvent::SignalDetected {
                                signal: signal.clone(),
                            });
                            active = Some(signal);
                        }
                    }
                    BreakoutOutcome::NoBreakout => {}
                }
            }

            // 3. Re-scan for formations; a newer qualifying inside bar
            // replaces an armed signal that has not attempted a breakout.
            if let Some(signal) = self.detector.detect_after(visible, scan_floor) {
                let is_new = active
                    .as_ref()
                    .map_or(true, |a| a.inside_bar_time != signal.inside_bar_time);
                if is_new {
                    events.emit(TradeEvent::SignalDetected {
                        signal: signal.clone(),
                    });
                    active = Some(signal);
                }
            }
        }

        // End of data: close whatever is still open at the last seen price.
        if let Some(last) = candles.last() {
            for monitor in monitors.iter_mut() {
                if let Some(trade) = monitor.force_close(ExitReason::Manual, last.timestamp) {
                    trades.push(trade);
                }
            }
        }

        let metrics = BacktestMetrics::from_run(
            &trades,
            self.cfg.initial_capital,
            ledger.balance(),
            ledger.capital_exhausted(),
            missed_trades,
            rejected_orders,
            skips,
        );

        tracing::info!(
            trades = metrics.total_trades,
            pnl = metrics.total_pnl,
            "backtest complete"
        );

        Ok(BacktestReport {
            metrics,
            trades,
            events: collector.snapshot(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn try_enter(
        &self,
        signal: &InsideBarSignal,
        direction: OptionDirection,
        breakout: &Candle,
        now: DateTime<Utc>,
        gate: &RiskGate,
        adapter: &SimulatedExecution,
        chain: &HistoricalOptionChain,
        calendar: &impl ExpiryCalendar,
        ledger: &Arc<CapitalLedger>,
        events: &EventBus,
        monitors: &mut Vec<PositionMonitor>,
        skips: &mut HashMap<String, usize>,
        rejected_orders: &mut usize,
    ) -> anyhow::Result<()> {
        let expiry = calendar.current_expiry(now.date_naive());
        let strike = gate.select_strike(breakout.close, direction);

        let Some((_, entry_premium)) = chain.premium_near(direction, strike, now) else {
            tracing::debug!(%direction, strike, "no option quote, skipping cycle");
            *skips.entry("data_unavailable".to_string()).or_insert(0) += 1;
            return Ok(());
        };

        let plan = match gate.admit(signal, direction, strike, entry_premium, expiry, now) {
            Ok(plan) => plan,
            Err(reason) => {
                tracing::info!(reason = %reason, %direction, strike, "entry skipped");
                *skips.entry(reason.label().to_string()).or_insert(0) += 1;
                return Ok(());
            }
        };

        let fill = adapter.fill(direction, plan.strike, plan.quantity, now).await?;
        if !fill.success {
            *rejected_orders += 1;
            events.emit(TradeEvent::OrderRejected {
                direction,
                strike: plan.strike,
                reason: "no fill available".to_string(),
            });
            return Ok(());
        }

        // Derived levels come from the actual fill premium.
        let entry_price = fill.price;
        let capital_required = plan.quantity * entry_price;
        let position = Position {
            id: Uuid::new_v4(),
            direction,
            strike: fill.strike,
            expiry,
            quantity: plan.quantity,
            entry_price,
            entry_time: now,
            stop_loss: entry_price - self.cfg.stop_loss_points,
            trail_anchor: entry_price,
            target1: entry_price + self.cfg.target1_points,
            target2: entry_price + self.cfg.target2_offset(),
            booked_quantity: 0.0,
            remaining_quantity: plan.quantity,
            capital_required,
            status: PositionStatus::Open,
        };

        if ledger.debit_entry(capital_required) {
            events.emit(TradeEvent::CapitalExhausted {
                balance: ledger.balance(),
            });
        }
        gate.record_entry(signal, direction, fill.strike, now);
        events.emit(TradeEvent::TradeOpened {
            position: position.clone(),
        });

        let params = MonitorParams::from_config(&self.cfg, expiry);
        monitors.push(PositionMonitor::new(
            position,
            params,
            ledger.clone(),
            events.clone(),
        ));

        Ok(())
    }
}
