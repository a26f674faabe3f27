use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::config::StrategyConfig;
use crate::events::{EventBus, TradeEvent};
use crate::models::{Candle, ExitReason, Position, PositionStatus, Trade};
use crate::risk::CapitalLedger;

/// Monitor knobs frozen at entry time.
#[derive(Debug, Clone, Copy)]
pub struct MonitorParams {
    pub trail_step: f64,
    pub stop_loss_points: f64,
    pub book1_ratio: f64,
    /// Absolute instant of the expiry-day force close.
    pub expiry_cutoff: DateTime<Utc>,
}

impl MonitorParams {
    pub fn from_config(cfg: &StrategyConfig, expiry: NaiveDate) -> Self {
        Self {
            trail_step: cfg.trail_step,
            stop_loss_points: cfg.stop_loss_points,
            book1_ratio: cfg.book1_ratio,
            expiry_cutoff: expiry.and_time(cfg.expiry_cutoff).and_utc(),
        }
    }
}

/// Result of one observation.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorStep {
    Holding,
    PartialBooked(Trade),
    Closed(Trade),
}

/// Per-position exit state machine: Open -> (PartialBooked)? -> Closed.
///
/// Owns its Position exclusively for the open lifetime; the ledger is the
/// only shared state it touches. Both orchestrators drive the same machine —
/// the backtester feeds it full bars, the live loop feeds it polled quotes.
pub struct PositionMonitor {
    position: Position,
    params: MonitorParams,
    ledger: Arc<CapitalLedger>,
    events: EventBus,
    last_price: f64,
}

impl PositionMonitor {
    pub fn new(
        position: Position,
        params: MonitorParams,
        ledger: Arc<CapitalLedger>,
        events: EventBus,
    ) -> Self {
        let last_price = position.entry_price;
        Self {
            position,
            params,
            ledger,
            events,
            last_price,
        }
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn is_closed(&self) -> bool {
        self.position.status == PositionStatus::Closed
    }

    /// Process a single quoted premium (live tick). Checks run in lifecycle
    /// order: trail update, target1 booking, target2 close, stop, expiry.
    pub fn observe(&mut self, price: f64, now: DateTime<Utc>) -> MonitorStep {
        if self.is_closed() {
            return MonitorStep::Holding;
        }
        self.last_price = price;

        self.update_trail(price);

        if price >= self.position.target1 && self.position.booked_quantity == 0.0 {
            return MonitorStep::PartialBooked(self.book_partial(now));
        }
        if price >= self.position.target2 {
            let exit_price = self.position.target2;
            return MonitorStep::Closed(self.close_remaining(
                exit_price,
                ExitReason::Target2,
                now,
            ));
        }
        if price <= self.position.stop_loss {
            let exit_price = self.position.stop_loss;
            let reason = self.stop_reason();
            return MonitorStep::Closed(self.close_remaining(exit_price, reason, now));
        }
        if now >= self.params.expiry_cutoff {
            return MonitorStep::Closed(self.close_remaining(price, ExitReason::Expiry, now));
        }

        MonitorStep::Holding
    }

    /// Process one full bar (backtest). Intrabar ordering is fixed so replays
    /// are identical: stop-loss resolves before targets on ambiguous bars,
    /// the trail advances on the close only.
    pub fn observe_bar(&mut self, candle: &Candle) -> Vec<MonitorStep> {
        if self.is_closed() {
            return Vec::new();
        }
        self.last_price = candle.close;
        let now = candle.timestamp;
        let mut steps = Vec::new();

        if candle.low <= self.position.stop_loss {
            let exit_price = self.position.stop_loss;
            let reason = self.stop_reason();
            steps.push(MonitorStep::Closed(self.close_remaining(
                exit_price, reason, now,
            )));
            return steps;
        }

        if candle.high >= self.position.target1 && self.position.booked_quantity == 0.0 {
            steps.push(MonitorStep::PartialBooked(self.book_partial(now)));
        }
        if candle.high >= self.position.target2 {
            let exit_price = self.position.target2;
            steps.push(MonitorStep::Closed(self.close_remaining(
                exit_price,
                ExitReason::Target2,
                now,
            )));
            return steps;
        }

        if now >= self.params.expiry_cutoff {
            steps.push(MonitorStep::Closed(self.close_remaining(
                candle.close,
                ExitReason::Expiry,
                now,
            )));
            return steps;
        }

        self.update_trail(candle.close);
        steps
    }

    /// Force close at the last known price (backtest end of data, manual
    /// intervention).
    pub fn force_close(&mut self, reason: ExitReason, now: DateTime<Utc>) -> Option<Trade> {
        if self.is_closed() {
            return None;
        }
        Some(self.close_remaining(self.last_price, reason, now))
    }

    fn stop_reason(&self) -> ExitReason {
        // A stop hit after booking means the trailing mechanism cut a winner
        // short; tracked separately from plain stop-outs.
        if self.position.booked_quantity > 0.0 {
            ExitReason::Trail
        } else {
            ExitReason::Stop
        }
    }

    fn update_trail(&mut self, price: f64) {
        let advance_at = self.position.trail_anchor + self.params.trail_step;
        if price > advance_at {
            // Advance by the excess: the anchor lands trail_step below price.
            self.position.trail_anchor = price - self.params.trail_step;
            self.position.stop_loss = self.position.trail_anchor - self.params.stop_loss_points;
        }
    }

    fn book_partial(&mut self, now: DateTime<Utc>) -> Trade {
        let booked = self.params.book1_ratio * self.position.quantity;
        self.position.booked_quantity = booked;
        self.position.remaining_quantity = self.position.quantity - booked;
        self.position.status = PositionStatus::PartialBooked;

        let trade = self.archive(booked, self.position.target1, ExitReason::Target1, now);
        let newly_exhausted = self.ledger.credit_exit(
            self.position.entry_price * booked,
            trade.realized_pnl,
            false,
            now,
        );
        self.events.emit(TradeEvent::TradePartialExit {
            trade: trade.clone(),
        });
        if newly_exhausted {
            self.events.emit(TradeEvent::CapitalExhausted {
                balance: self.ledger.balance(),
            });
        }
        trade
    }

    fn close_remaining(
        &mut self,
        exit_price: f64,
        reason: ExitReason,
        now: DateTime<Utc>,
    ) -> Trade {
        let quantity = self.position.remaining_quantity;
        self.position.remaining_quantity = 0.0;
        self.position.status = PositionStatus::Closed;

        let trade = self.archive(quantity, exit_price, reason, now);
        let newly_exhausted = self.ledger.credit_exit(
            self.position.entry_price * quantity,
            trade.realized_pnl,
            true,
            now,
        );
        self.events.emit(TradeEvent::TradeClosed {
            trade: trade.clone(),
        });
        if newly_exhausted {
            self.events.emit(TradeEvent::CapitalExhausted {
                balance: self.ledger.balance(),
            });
        }
        trade
    }

    fn archive(
        &self,
        quantity: f64,
        exit_price: f64,
        reason: ExitReason,
        now: DateTime<Utc>,
    ) -> Trade {
        Trade {
            id: Uuid::new_v4(),
            position_id: self.position.id,
            direction: self.position.direction,
            strike: self.position.strike,
            quantity,
            entry_price: self.position.entry_price,
            exit_price,
            entry_time: self.position.entry_time,
            exit_time: now,
            exit_reason: reason,
            realized_pnl: (exit_price - self.position.entry_price) * quantity,
            capital_required: self.position.entry_price * quantity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OptionDirection;
    use chrono::TimeZone;

    fn at(hour: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 1, hour, min, 0).unwrap()
    }

    fn position() -> Position {
        Position {
            id: Uuid::new_v4(),
            direction: OptionDirection::CE,
            strike: 24000.0,
            expiry: NaiveDate::from_ymd_opt(2025, 7, 3).unwrap(),
            quantity: 75.0,
            entry_price: 150.0,
            entry_time: at(10, 15),
            stop_loss: 120.0,
            trail_anchor: 150.0,
            target1: 175.0,
            target2: 204.0,
            booked_quantity: 0.0,
            remaining_quantity: 75.0,
            capital_required: 11_250.0,
            status: PositionStatus::Open,
        }
    }

    fn params() -> MonitorParams {
        MonitorParams::from_config(
            &StrategyConfig::default(),
            NaiveDate::from_ymd_opt(2025, 7, 3).unwrap(),
        )
    }

    fn monitor() -> (PositionMonitor, Arc<CapitalLedger>) {
        let ledger = Arc::new(CapitalLedger::new(100_000.0));
        ledger.debit_entry(11_250.0);
        let monitor = PositionMonitor::new(position(), params(), ledger.clone(), EventBus::new());
        (monitor, ledger)
    }

    #[test]
    fn test_stop_loss_closes_full_position() {
        let (mut monitor, ledger) = monitor();

        match monitor.observe(119.0, at(11, 0)) {
            MonitorStep::Closed(trade) => {
                assert_eq!(trade.exit_reason, ExitReason::Stop);
                assert_eq!(trade.exit_price, 120.0);
                assert_eq!(trade.realized_pnl, -30.0 * 75.0);
            }
            other => panic!("expected close, got {:?}", other),
        }
        assert!(monitor.is_closed());
        assert_eq!(ledger.open_positions(), 0);
        // 100k - 2,250 loss
        assert!((ledger.balance() - 97_750.0).abs() < 1e-9);
    }

    #[test]
    fn test_tiered_exit_books_then_closes() {
        let (mut monitor, ledger) = monitor();

        // Cross target1: half the quantity books at 175.
        match monitor.observe(176.0, at(11, 0)) {
            MonitorStep::PartialBooked(trade) => {
                assert_eq!(trade.exit_reason, ExitReason::Target1);
                assert_eq!(trade.quantity, 37.5);
                assert_eq!(trade.exit_price, 175.0);
            }
            other => panic!("expected partial booking, got {:?}", other),
        }
        assert_eq!(monitor.position().status, PositionStatus::PartialBooked);
        assert_eq!(monitor.position().remaining_quantity, 37.5);
        assert_eq!(ledger.open_positions(), 1);

        // Cross target2: the remainder closes at 204.
        match monitor.observe(205.0, at(12, 0)) {
            MonitorStep::Closed(trade) => {
                assert_eq!(trade.exit_reason, ExitReason::Target2);
                assert_eq!(trade.exit_price, 204.0);
                assert_eq!(trade.quantity, 37.5);
            }
            other => panic!("expected close, got {:?}", other),
        }
        assert!(monitor.is_closed());
        assert_eq!(ledger.open_positions(), 0);
        // P&L: 25 * 37.5 + 54 * 37.5 = 2962.50
        assert!((ledger.balance() - 102_962.5).abs() < 1e-9);
    }

    #[test]
    fn test_trail_after_booking_exits_as_trail() {
        let (mut monitor, _ledger) = monitor();

        assert!(matches!(
            monitor.observe(176.0, at(11, 0)),
            MonitorStep::PartialBooked(_)
        ));
        // Trail advanced at 176: anchor 166, stop 136.
        assert_eq!(monitor.position().trail_anchor, 166.0);
        assert_eq!(monitor.position().stop_loss, 136.0);

        match monitor.observe(135.0, at(12, 0)) {
            MonitorStep::Closed(trade) => {
                assert_eq!(trade.exit_reason, ExitReason::Trail);
                assert_eq!(trade.exit_price, 136.0);
            }
            other => panic!("expected trail close, got {:?}", other),
        }
    }

    #[test]
    fn test_trail_anchor_is_monotonic() {
        let (mut monitor, _ledger) = monitor();

        monitor.observe(165.0, at(11, 0));
        assert_eq!(monitor.position().trail_anchor, 155.0);

        // Price pulls back: the anchor holds.
        monitor.observe(158.0, at(11, 5));
        assert_eq!(monitor.position().trail_anchor, 155.0);

        monitor.observe(170.0, at(11, 10));
        assert_eq!(monitor.position().trail_anchor, 160.0);
        assert_eq!(monitor.position().stop_loss, 130.0);
    }

    #[test]
    fn test_expiry_cutoff_forces_close_at_last_price() {
        let (mut monitor, _ledger) = monitor();

        let cutoff = Utc.with_ymd_and_hms(2025, 7, 3, 15, 0, 0).unwrap();
        match monitor.observe(148.0, cutoff) {
            MonitorStep::Closed(trade) => {
                assert_eq!(trade.exit_reason, ExitReason::Expiry);
                assert_eq!(trade.exit_price, 148.0);
            }
            other => panic!("expected expiry close, got {:?}", other),
        }
    }

    #[test]
    fn test_bar_ambiguity_resolves_stop_before_target() {
        let (mut monitor, _ledger) = monitor();

        // One wide bar spanning both the stop and target1.
        let bar = Candle {
            timestamp: at(11, 15),
            open: 150.0,
            high: 180.0,
            low: 115.0,
            close: 150.0,
        };

        let steps = monitor.observe_bar(&bar);
        assert_eq!(steps.len(), 1);
        match &steps[0] {
            MonitorStep::Closed(trade) => assert_eq!(trade.exit_reason, ExitReason::Stop),
            other => panic!("expected stop close, got {:?}", other),
        }
    }

    #[test]
    fn test_bar_can_book_and_close_in_one_candle() {
        let (mut monitor, ledger) = monitor();

        let bar = Candle {
            timestamp: at(11, 15),
            open: 150.0,
            high: 210.0,
            low: 149.0,
            close: 205.0,
        };

        let steps = monitor.observe_bar(&bar);
        assert_eq!(steps.len(), 2);
        assert!(matches!(steps[0], MonitorStep::PartialBooked(_)));
        assert!(matches!(steps[1], MonitorStep::Closed(_)));
        assert!(monitor.is_closed());
        assert_eq!(ledger.open_positions(), 0);
    }

    #[test]
    fn test_closed_monitor_ignores_observations() {
        let (mut monitor, _ledger) = monitor();
        monitor.observe(119.0, at(11, 0));
        assert!(monitor.is_closed());

        assert_eq!(monitor.observe(300.0, at(12, 0)), MonitorStep::Holding);
        assert!(monitor.observe_bar(&Candle {
            timestamp: at(12, 15),
            open: 300.0,
            high: 300.0,
            low: 300.0,
            close: 300.0,
        })
        .is_empty());
    }

    #[test]
    fn test_force_close_uses_last_known_price() {
        let (mut monitor, _ledger) = monitor();
        monitor.observe(160.0, at(11, 0));

        let trade = monitor.force_close(ExitReason::Manual, at(12, 0)).unwrap();
        assert_eq!(trade.exit_price, 160.0);
        assert_eq!(trade.exit_reason, ExitReason::Manual);
        assert!(monitor.force_close(ExitReason::Manual, at(12, 5)).is_none());
    }
}
