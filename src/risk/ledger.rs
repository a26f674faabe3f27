use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};

/// Thread-safe running capital balance shared by the orchestrator and every
/// concurrent PositionMonitor.
///
/// Entry capital is debited when a fill lands; each partial or full exit
/// credits the principal share back together with its realized P&L, so the
/// final balance is always `initial + sum(realized_pnl)`. Every read-modify-
/// write happens under one mutex acquisition.
pub struct CapitalLedger {
    initial_capital: f64,
    inner: Mutex<LedgerState>,
}

#[derive(Debug, Clone)]
struct LedgerState {
    balance: f64,
    daily_realized_pnl: f64,
    day: Option<NaiveDate>,
    capital_exhausted: bool,
    open_positions: usize,
}

impl CapitalLedger {
    pub fn new(initial_capital: f64) -> Self {
        Self {
            initial_capital,
            inner: Mutex::new(LedgerState {
                balance: initial_capital,
                daily_realized_pnl: 0.0,
                day: None,
                capital_exhausted: false,
                open_positions: 0,
            }),
        }
    }

    pub fn initial_capital(&self) -> f64 {
        self.initial_capital
    }

    pub fn balance(&self) -> f64 {
        self.inner.lock().unwrap().balance
    }

    /// Latched once the balance touches zero or below. Trading may continue
    /// afterwards but every report carries the flag.
    pub fn capital_exhausted(&self) -> bool {
        self.inner.lock().unwrap().capital_exhausted
    }

    pub fn open_positions(&self) -> usize {
        self.inner.lock().unwrap().open_positions
    }

    /// Realized P&L for the trading day containing `now`. Rolls the daily
    /// accumulator when the date changes.
    pub fn daily_realized_pnl(&self, now: DateTime<Utc>) -> f64 {
        let mut state = self.inner.lock().unwrap();
        roll_day(&mut state, now.date_naive());
        state.daily_realized_pnl
    }

    /// Reserve entry capital and count the position as open. Returns true if
    /// this debit newly exhausted the balance.
    pub fn debit_entry(&self, capital_required: f64) -> bool {
        let mut state = self.inner.lock().unwrap();
        state.balance -= capital_required;
        state.open_positions += 1;
        latch_exhaustion(&mut state)
    }

    /// Book an exit: principal share returns to the balance along with the
    /// realized P&L. `closes_position` releases the position slot. Returns
    /// true if the ledger newly crossed into exhaustion.
    pub fn credit_exit(
        &self,
        principal: f64,
        realized_pnl: f64,
        closes_position: bool,
        now: DateTime<Utc>,
    ) -> bool {
        let mut state = self.inner.lock().unwrap();
        roll_day(&mut state, now.date_naive());
        state.balance += principal + realized_pnl;
        state.daily_realized_pnl += realized_pnl;
        if closes_position {
            state.open_positions = state.open_positions.saturating_sub(1);
        }
        latch_exhaustion(&mut state)
    }
}

fn roll_day(state: &mut LedgerState, today: NaiveDate) {
    if state.day != Some(today) {
        state.day = Some(today);
        state.daily_realized_pnl = 0.0;
    }
}

fn latch_exhaustion(state: &mut LedgerState) -> bool {
    if !state.capital_exhausted && state.balance <= 0.0 {
        state.capital_exhausted = true;
        return true;
    }
    false
}
