use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use uuid::Uuid;

use crate::config::StrategyConfig;
use crate::data::{CandleBuffer, CandleProvider, ExpiryCalendar, QuoteProvider};
use crate::db::PostgresPersistence;
use crate::events::{EventBus, TradeEvent};
use crate::execution::{ExecutionAdapter, MonitorParams, MonitorStep, PositionMonitor};
use crate::models::{Candle, InsideBarSignal, OptionDirection, Position, PositionStatus};
use crate::risk::{CapitalLedger, RiskGate};
use crate::strategy::{BreakoutEvaluator, BreakoutOutcome, PatternDetector};

/// Polling trade loop for live (or paper) operation.
///
/// The main loop owns the active signal and all admission decisions; every
/// filled entry spawns an independent monitor task that polls quotes for its
/// own position until it closes or the orchestrator is cancelled. Monitors
/// share only the capital ledger, which serializes internally.
pub struct LiveOrchestrator<C, Q, X, E> {
    cfg: StrategyConfig,
    candles: Arc<C>,
    quotes: Arc<Q>,
    adapter: Arc<X>,
    calendar: E,
    ledger: Arc<CapitalLedger>,
    gate: Arc<RiskGate>,
    events: EventBus,
    db: Option<Arc<PostgresPersistence>>,
}

impl<C, Q, X, E> LiveOrchestrator<C, Q, X, E>
where
    C: CandleProvider,
    Q: QuoteProvider,
    X: ExecutionAdapter,
    E: ExpiryCalendar,
{
    pub fn new(
        cfg: StrategyConfig,
        candles: Arc<C>,
        quotes: Arc<Q>,
        adapter: Arc<X>,
        calendar: E,
        events: EventBus,
        db: Option<Arc<PostgresPersistence>>,
    ) -> anyhow::Result<Self> {
        cfg.validate()?;
        let ledger = Arc::new(CapitalLedger::new(cfg.initial_capital));
        let gate = Arc::new(RiskGate::new(cfg.clone(), ledger.clone()));
        Ok(Self {
            cfg,
            candles,
            quotes,
            adapter,
            calendar,
            ledger,
            gate,
            events,
            db,
        })
    }

    pub fn ledger(&self) -> Arc<CapitalLedger> {
        self.ledger.clone()
    }

    /// Run until `shutdown` flips true. On cancellation every monitor
    /// finishes its current check and persists its position still-open; no
    /// position is silently abandoned.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let buffer = CandleBuffer::new(512);
        let detector = PatternDetector::new();
        let evaluator = BreakoutEvaluator::new(self.cfg.missed_trade_grace_secs);
        let mut active: Option<InsideBarSignal> = None;
        let mut scan_floor: Option<DateTime<Utc>> = None;
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        self.restore_positions(&mut tasks, &shutdown).await?;

        let mut poll = tokio::time::interval(Duration::from_secs(self.cfg.candle_poll_secs));
        loop {
            tokio::select! {
                _ = poll.tick() => {
                    if let Err(e) = self
                        .cycle(&buffer, &detector, &evaluator, &mut active, &mut scan_floor, &mut tasks, &shutdown)
                        .await
                    {
                        tracing::warn!("detection cycle failed: {}", e);
                    }
                    tasks.retain(|t| !t.is_finished());
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!(monitors = tasks.len(), "shutdown requested, draining monitors");
        for task in tasks {
            let _ = task.await;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn cycle(
        &self,
        buffer: &CandleBuffer,
        detector: &PatternDetector,
        evaluator: &BreakoutEvaluator,
        active: &mut Option<InsideBarSignal>,
        scan_floor: &mut Option<DateTime<Utc>>,
        tasks: &mut Vec<JoinHandle<()>>,
        shutdown: &watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        // A flaky feed skips the cycle; the next tick retries.
        let fetched = match self.candles.candles().await {
            Ok(candles) => candles,
            Err(e) => {
                tracing::warn!("candle fetch failed, skipping cycle: {}", e);
                return Ok(());
            }
        };
        crate::data::validate_candle_series(&fetched)?;
        buffer.extend(fetched);

        let series = buffer.snapshot();
        let Some(last) = series.last() else {
            return Ok(());
        };
        // Evaluation clock rides the newest bar, so stale breakouts are
        // classified against data time, not fetch latency.
        let now = last.timestamp;

        if let Some(signal) = active.as_mut() {
            match evaluator.evaluate(signal, &series, now) {
                BreakoutOutcome::Confirmed { direction, candle } => {
                    let signal = active.take().unwrap();
                    *scan_floor = Some(candle.timestamp);
                    self.events.emit(TradeEvent::BreakoutConfirmed {
                        signal: signal.clone(),
                        direction,
                        candle: candle.clone(),
                    });
                    self.try_enter(&signal, direction, &candle, now, tasks, shutdown)
                        .await?;
                }
                BreakoutOutcome::Missed { direction, candle } => {
                    let signal = active.take().unwrap();
                    *scan_floor = Some(candle.timestamp);
                    self.events.emit(TradeEvent::MissedTrade {
                        signal,
                        direction,
                        candle,
                    });
                }
                BreakoutOutcome::NoBreakout => {}
            }
        }

        // Scan for formations; a newer inside bar replaces an un-attempted
        // armed signal. After a miss this re-scan runs in the same cycle.
        if let Some(signal) = detector.detect_after(&series, *scan_floor) {
            let is_new = active
                .as_ref()
                .map_or(true, |a| a.inside_bar_time != signal.inside_bar_time);
            if is_new {
                self.events.emit(TradeEvent::SignalDetected {
                    signal: signal.clone(),
                });
                *active = Some(signal);
            }
        }

        Ok(())
    }

    async fn try_enter(
        &self,
        signal: &InsideBarSignal,
        direction: OptionDirection,
        breakout: &Candle,
        now: DateTime<Utc>,
        tasks: &mut Vec<JoinHandle<()>>,
        shutdown: &watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let expiry = self.calendar.current_expiry(now.date_naive());
        let strike = self.gate.select_strike(breakout.close, direction);

        let quote = match self.quotes.option_quote(direction, strike, now).await {
            Ok(quote) => quote,
            Err(e) => {
                tracing::warn!(%direction, strike, "quote fetch failed: {}", e);
                return Ok(());
            }
        };
        let Some(entry_premium) = quote else {
            tracing::debug!(%direction, strike, "no quote available, skipping entry");
            return Ok(());
        };

        let plan = match self
            .gate
            .admit(signal, direction, strike, entry_premium, expiry, now)
        {
            Ok(plan) => plan,
            Err(reason) => {
                tracing::info!(reason = %reason, %direction, strike, "entry skipped");
                return Ok(());
            }
        };

        let fill = self
            .adapter
            .fill(direction, plan.strike, plan.quantity, now)
            .await?;
        if !fill.success {
            self.events.emit(TradeEvent::OrderRejected {
                direction,
                strike: plan.strike,
                reason: "order not filled".to_string(),
            });
            return Ok(());
        }

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

        if self.ledger.debit_entry(capital_required) {
            self.events.emit(TradeEvent::CapitalExhausted {
                balance: self.ledger.balance(),
            });
        }
        self.gate.record_entry(signal, direction, fill.strike, now);
        self.events.emit(TradeEvent::TradeOpened {
            position: position.clone(),
        });
        if let Some(db) = &self.db {
            if let Err(e) = db.save_position(&position).await {
                tracing::warn!(position = %position.id, "failed to persist position: {}", e);
            }
        }

        self.spawn_monitor(position, expiry, tasks, shutdown);
        Ok(())
    }

    /// Resume positions persisted by a previous run.
    async fn restore_positions(
        &self,
        tasks: &mut Vec<JoinHandle<()>>,
        shutdown: &watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let Some(db) = &self.db else {
            return Ok(());
        };
        let positions = db
            .load_open_positions()
            .await
            .map_err(|e| anyhow::anyhow!("failed to load persisted positions: {}", e))?;

        for position in positions {
            // Re-reserve the entry capital the position is still holding.
            if self.ledger.debit_entry(position.capital_required) {
                self.events.emit(TradeEvent::CapitalExhausted {
                    balance: self.ledger.balance(),
                });
            }
            tracing::info!(position = %position.id, "resuming persisted position");
            let expiry = position.expiry;
            self.spawn_monitor(position, expiry, tasks, shutdown);
        }
        Ok(())
    }

    fn spawn_monitor(
        &self,
        position: Position,
        expiry: chrono::NaiveDate,
        tasks: &mut Vec<JoinHandle<()>>,
        shutdown: &watch::Receiver<bool>,
    ) {
        let params = MonitorParams::from_config(&self.cfg, expiry);
        let monitor = PositionMonitor::new(
            position,
            params,
            self.ledger.clone(),
            self.events.clone(),
        );
        let quotes = self.quotes.clone();
        let db = self.db.clone();
        let poll = Duration::from_secs(self.cfg.price_poll_secs);
        let shutdown = shutdown.clone();

        tasks.push(tokio::spawn(monitor_loop(
            monitor, quotes, db, poll, shutdown,
        )));
    }
}

/// One task per open position: poll the premium, drive the state machine,
/// persist transitions, stop cooperatively.
async fn monitor_loop<Q: QuoteProvider>(
    mut monitor: PositionMonitor,
    quotes: Arc<Q>,
    db: Option<Arc<PostgresPersistence>>,
    poll: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let position_id = monitor.position().id;
    let mut ticker = tokio::time::interval(poll);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let (direction, strike) = {
                    let p = monitor.position();
                    (p.direction, p.strike)
                };
                match quotes.option_quote(direction, strike, Utc::now()).await {
                    Ok(Some(price)) => {
                        let step = monitor.observe(price, Utc::now());
                        persist_step(&db, &monitor, &step).await;
                        if monitor.is_closed() {
                            tracing::info!(position = %position_id, "position closed, monitor finished");
                            break;
                        }
                    }
                    Ok(None) => tracing::debug!(position = %position_id, "no quote this cycle"),
                    Err(e) => tracing::warn!(position = %position_id, "quote fetch failed: {}", e),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    if let Some(db) = &db {
                        if let Err(e) = db.save_position(monitor.position()).await {
                            tracing::warn!(position = %position_id, "failed to persist on shutdown: {}", e);
                        }
                    }
                    tracing::info!(position = %position_id, "cancelled, position persisted as still-open");
                    break;
                }
            }
        }
    }
}

async fn persist_step(
    db: &Option<Arc<PostgresPersistence>>,
    monitor: &PositionMonitor,
    step: &MonitorStep,
) {
    let Some(db) = db else {
        return;
    };
    if let Err(e) = db.save_position(monitor.position()).await {
        tracing::warn!("failed to persist position: {}", e);
    }
    match step {
        MonitorStep::PartialBooked(trade) | MonitorStep::Closed(trade) => {
            if let Err(e) = db.save_trade(trade).await {
                tracing::warn!("failed to persist trade: {}", e);
            }
        }
        MonitorStep::Holding => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::synthetic::option_chain_for;
    use crate::data::{HistoricalOptionChain, ReplayFeed, WeeklyExpiry};
    use crate::events::CollectorSink;
    use crate::execution::PaperExecution;
    use chrono::TimeZone;

    // Dated well in the future: the monitor compares its expiry cutoff
    // against the wall clock, and these positions must stay open.
    fn bar(day: u32, hour: u32, open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            timestamp: Utc.with_ymd_and_hms(2030, 7, day, hour, 15, 0).unwrap(),
            open,
            high,
            low,
            close,
        }
    }

    fn breakout_series() -> Vec<Candle> {
        // Tuesday 2030-07-02: mother bar, inside bar, close above the range.
        vec![
            bar(2, 10, 24000.0, 24100.0, 23900.0, 24000.0),
            bar(2, 11, 24000.0, 24080.0, 23950.0, 24020.0),
            bar(2, 12, 24020.0, 24160.0, 24010.0, 24150.0),
        ]
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_loop_opens_position_and_drains_on_shutdown() {
        let candles = breakout_series();
        let chain = Arc::new(option_chain_for(&candles, 50.0, 100.0));
        let feed = Arc::new(ReplayFeed::new(candles, chain));

        let collector = Arc::new(CollectorSink::new());
        let events = EventBus::new().with_sink(collector.clone());

        let cfg = StrategyConfig {
            candle_poll_secs: 1,
            price_poll_secs: 1,
            ..StrategyConfig::default()
        };

        let orchestrator = LiveOrchestrator::new(
            cfg,
            feed.clone(),
            feed.clone(),
            Arc::new(PaperExecution::new(feed.clone())),
            WeeklyExpiry::default(),
            events,
            None,
        )
        .unwrap();

        let ledger = orchestrator.ledger();
        let (tx, rx) = watch::channel(false);
        let runner = tokio::spawn(async move { orchestrator.run(rx).await });

        // Paused clock auto-advances; wait until the breakout trade lands.
        let mut opened = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_secs(1)).await;
            if collector
                .snapshot()
                .iter()
                .any(|e| matches!(e, TradeEvent::TradeOpened { .. }))
            {
                opened = true;
                break;
            }
        }
        assert!(opened, "live loop never opened the breakout trade");
        assert_eq!(ledger.open_positions(), 1);

        tx.send(true).unwrap();
        runner.await.unwrap().unwrap();

        // Cooperative shutdown: the monitor exited without closing the trade.
        assert_eq!(ledger.open_positions(), 1);
        let closed = collector
            .snapshot()
            .iter()
            .any(|e| matches!(e, TradeEvent::TradeClosed { .. }));
        assert!(!closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_task_closes_position_at_target() {
        // Premium rises past target2 after entry.
        let mut chain = HistoricalOptionChain::new();
        chain.insert_series(
            OptionDirection::CE,
            24000.0,
            vec![
                Candle {
                    timestamp: Utc.with_ymd_and_hms(2025, 7, 1, 10, 15, 0).unwrap(),
                    open: 150.0,
                    high: 155.0,
                    low: 145.0,
                    close: 150.0,
                },
                Candle {
                    timestamp: Utc.with_ymd_and_hms(2025, 7, 1, 11, 15, 0).unwrap(),
                    open: 150.0,
                    high: 210.0,
                    low: 150.0,
                    close: 210.0,
                },
            ],
        );
        let chain = Arc::new(chain);
        let ledger = Arc::new(CapitalLedger::new(100_000.0));
        ledger.debit_entry(11_250.0);

        let collector = Arc::new(CollectorSink::new());
        let events = EventBus::new().with_sink(collector.clone());

        let position = Position {
            id: Uuid::new_v4(),
            direction: OptionDirection::CE,
            strike: 24000.0,
            expiry: chrono::NaiveDate::from_ymd_opt(2025, 7, 3).unwrap(),
            quantity: 75.0,
            entry_price: 150.0,
            entry_time: Utc.with_ymd_and_hms(2025, 7, 1, 10, 15, 0).unwrap(),
            stop_loss: 120.0,
            trail_anchor: 150.0,
            target1: 175.0,
            target2: 204.0,
            booked_quantity: 0.0,
            remaining_quantity: 75.0,
            capital_required: 11_250.0,
            status: PositionStatus::Open,
        };
        let params = MonitorParams::from_config(
            &StrategyConfig::default(),
            chrono::NaiveDate::from_ymd_opt(2025, 7, 3).unwrap(),
        );
        let monitor = PositionMonitor::new(position, params, ledger.clone(), events);

        // Feed that has already released both candles: quotes resolve at the
        // later timestamp, so the first poll sees 210.
        let feed = Arc::new(ReplayFeed::new(
            vec![
                Candle {
                    timestamp: Utc.with_ymd_and_hms(2025, 7, 1, 10, 15, 0).unwrap(),
                    open: 24000.0,
                    high: 24010.0,
                    low: 23990.0,
                    close: 24000.0,
                },
                Candle {
                    timestamp: Utc.with_ymd_and_hms(2025, 7, 1, 11, 15, 0).unwrap(),
                    open: 24000.0,
                    high: 24010.0,
                    low: 23990.0,
                    close: 24000.0,
                },
            ],
            chain,
        ));
        feed.candles().await.unwrap();
        feed.candles().await.unwrap();

        let (_tx, rx) = watch::channel(false);
        let task = tokio::spawn(monitor_loop(
            monitor,
            feed,
            None,
            Duration::from_secs(1),
            rx,
        ));
        task.await.unwrap();

        let snapshot = collector.snapshot();
        // Books target1 on the way up, then closes the rest at target2.
        assert!(snapshot
            .iter()
            .any(|e| matches!(e, TradeEvent::TradePartialExit { .. })));
        assert!(snapshot
            .iter()
            .any(|e| matches!(e, TradeEvent::TradeClosed { .. })));
        assert_eq!(ledger.open_positions(), 0);
    }
}
