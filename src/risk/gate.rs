use std::sync::{Arc, Mutex};

use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::StrategyConfig;
use crate::models::{InsideBarSignal, OptionDirection};
use crate::risk::CapitalLedger;

/// Why a candidate trade was skipped. These are expected branches of normal
/// operation, never errors.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum SkipReason {
    #[error("market closed")]
    MarketClosed,
    #[error("duplicate signal within cooldown")]
    DuplicateSignal,
    #[error("insufficient capital: need {required:.2}, have {available:.2}")]
    InsufficientCapital { required: f64, available: f64 },
    #[error("concurrent position limit reached ({open} open)")]
    PositionLimitReached { open: usize },
    #[error("too close to expiry")]
    ExpiryUnsafe,
    #[error("daily loss limit breached")]
    DailyLossBreached,
}

impl SkipReason {
    pub fn label(&self) -> &'static str {
        match self {
            SkipReason::MarketClosed => "market_closed",
            SkipReason::DuplicateSignal => "duplicate_signal",
            SkipReason::InsufficientCapital { .. } => "insufficient_capital",
            SkipReason::PositionLimitReached { .. } => "position_limit",
            SkipReason::ExpiryUnsafe => "expiry_unsafe",
            SkipReason::DailyLossBreached => "daily_loss",
        }
    }
}

/// Fully-sized entry plan produced by an admitted signal.
#[derive(Debug, Clone, PartialEq)]
pub struct TradePlan {
    pub direction: OptionDirection,
    pub strike: f64,
    pub expiry: NaiveDate,
    pub quantity: f64,
    pub entry_premium: f64,
    pub capital_required: f64,
    pub stop_loss: f64,
    pub target1: f64,
    pub target2: f64,
}

struct RecentEntry {
    direction: OptionDirection,
    range_high: f64,
    range_low: f64,
    strike: f64,
    time: DateTime<Utc>,
}

/// All pre-trade admission checks plus strike selection and premium-based
/// sizing. Shares the ledger with the monitors; the duplicate-entry memory is
/// its own.
pub struct RiskGate {
    cfg: StrategyConfig,
    ledger: Arc<CapitalLedger>,
    recent: Mutex<Vec<RecentEntry>>,
}

impl RiskGate {
    pub fn new(cfg: StrategyConfig, ledger: Arc<CapitalLedger>) -> Self {
        Self {
            cfg,
            ledger,
            recent: Mutex::new(Vec::new()),
        }
    }

    /// Round the reference price to the nearest tradable strike, offset in
    /// the OTM direction for positive `strike_offset` (ITM for negative).
    pub fn select_strike(&self, reference_price: f64, direction: OptionDirection) -> f64 {
        let offset = match direction {
            OptionDirection::CE => self.cfg.strike_offset,
            OptionDirection::PE => -self.cfg.strike_offset,
        };
        ((reference_price + offset) / self.cfg.strike_step).round() * self.cfg.strike_step
    }

    /// Run every admission check in order; the first failure wins. Capital is
    /// sized from the option premium, never from the strike level.
    pub fn admit(
        &self,
        signal: &InsideBarSignal,
        direction: OptionDirection,
        strike: f64,
        entry_premium: f64,
        expiry: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<TradePlan, SkipReason> {
        self.check_market_hours(now)?;
        self.check_duplicate(signal, direction, strike, now)?;

        let quantity = self.cfg.quantity();
        let capital_required = quantity * entry_premium;
        let available = self.ledger.balance();
        if available < capital_required {
            return Err(SkipReason::InsufficientCapital {
                required: capital_required,
                available,
            });
        }

        let open = self.ledger.open_positions();
        if open >= self.cfg.max_concurrent_positions {
            return Err(SkipReason::PositionLimitReached { open });
        }

        self.check_expiry_safety(expiry, now)?;
        self.check_daily_loss(now)?;

        Ok(TradePlan {
            direction,
            strike,
            expiry,
            quantity,
            entry_premium,
            capital_required,
            stop_loss: entry_premium - self.cfg.stop_loss_points,
            target1: entry_premium + self.cfg.target1_points,
            target2: entry_premium + self.cfg.target2_offset(),
        })
    }

    /// Remember a filled entry for duplicate suppression.
    pub fn record_entry(
        &self,
        signal: &InsideBarSignal,
        direction: OptionDirection,
        strike: f64,
        now: DateTime<Utc>,
    ) {
        self.recent.lock().unwrap().push(RecentEntry {
            direction,
            range_high: signal.range_high,
            range_low: signal.range_low,
            strike,
            time: now,
        });
    }

    fn check_market_hours(&self, now: DateTime<Utc>) -> Result<(), SkipReason> {
        if matches!(now.weekday(), Weekday::Sat | Weekday::Sun) {
            return Err(SkipReason::MarketClosed);
        }
        let t = now.time();
        if t < self.cfg.market_open || t >= self.cfg.market_close {
            return Err(SkipReason::MarketClosed);
        }
        Ok(())
    }

    fn check_duplicate(
        &self,
        signal: &InsideBarSignal,
        direction: OptionDirection,
        strike: f64,
        now: DateTime<Utc>,
    ) -> Result<(), SkipReason> {
        let cooldown = chrono::Duration::seconds(self.cfg.duplicate_signal_cooldown_secs);
        let mut recent = self.recent.lock().unwrap();
        recent.retain(|e| now - e.time < cooldown);

        let duplicate = recent.iter().any(|e| {
            e.direction == direction
                && e.strike == strike
                && (e.range_high - signal.range_high).abs() < 1e-6
                && (e.range_low - signal.range_low).abs() < 1e-6
        });
        if duplicate {
            return Err(SkipReason::DuplicateSignal);
        }
        Ok(())
    }

    fn check_expiry_safety(&self, expiry: NaiveDate, now: DateTime<Utc>) -> Result<(), SkipReason> {
        let days_to_expiry = (expiry - now.date_naive()).num_days();
        if days_to_expiry < self.cfg.expiry_safety_days {
            return Err(SkipReason::ExpiryUnsafe);
        }
        // With safety days at zero, expiry-day entries stop at the cutoff.
        if days_to_expiry == 0 && now.time() >= self.cfg.expiry_cutoff {
            return Err(SkipReason::ExpiryUnsafe);
        }
        Ok(())
    }

    fn check_daily_loss(&self, now: DateTime<Utc>) -> Result<(), SkipReason> {
        let limit = self.cfg.daily_loss_limit_pct * self.ledger.initial_capital();
        if self.ledger.daily_realized_pnl(now) <= -limit {
            return Err(SkipReason::DailyLossBreached);
        }
        Ok(())
    }
}
