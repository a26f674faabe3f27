use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Single OHLC bar. Timestamp marks the bar's close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Candle {
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    /// True when this bar is fully contained in the reference bar's range.
    pub fn is_inside(&self, reference: &Candle) -> bool {
        self.high < reference.high && self.low > reference.low
    }
}

/// Option side: CE = call, PE = put.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionDirection {
    CE,
    PE,
}

impl OptionDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptionDirection::CE => "CE",
            OptionDirection::PE => "PE",
        }
    }
}

impl std::fmt::Display for OptionDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Active inside-bar signal awaiting a breakout.
///
/// `range_high`/`range_low` are the reference (mother) bar's extremes; a close
/// outside them confirms the breakout. `breakout_attempted` flips false -> true
/// exactly once, after which the signal is discarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsideBarSignal {
    pub inside_bar_time: DateTime<Utc>,
    pub signal_time: DateTime<Utc>,
    pub range_high: f64,
    pub range_low: f64,
    pub breakout_attempted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    PartialBooked,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExitReason {
    /// Stop-loss hit with no prior profit booking.
    Stop,
    /// Trailing stop hit after at least one profit booking.
    Trail,
    /// Partial booking at the first target.
    Target1,
    /// Full close at the second target.
    Target2,
    /// Forced close at the expiry-day cutoff.
    Expiry,
    /// Forced close outside the state machine (end of backtest data).
    Manual,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::Stop => "Stop",
            ExitReason::Trail => "Trail",
            ExitReason::Target1 => "Target1",
            ExitReason::Target2 => "Target2",
            ExitReason::Expiry => "Expiry",
            ExitReason::Manual => "Manual",
        }
    }
}

/// Open option position. Owned exclusively by its PositionMonitor.
///
/// All price fields are option premiums, not underlying levels. Both CE and PE
/// entries are long premium, so favorable movement is always upward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub direction: OptionDirection,
    pub strike: f64,
    pub expiry: NaiveDate,
    pub quantity: f64,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub stop_loss: f64,
    pub trail_anchor: f64,
    pub target1: f64,
    pub target2: f64,
    pub booked_quantity: f64,
    pub remaining_quantity: f64,
    pub capital_required: f64,
    pub status: PositionStatus,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.status != PositionStatus::Closed
    }
}

/// Result of an entry fill attempt.
///
/// `strike` is the strike actually filled; the simulated adapter may
/// substitute the nearest available strike when the requested one is missing
/// from the dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillResult {
    pub price: f64,
    pub strike: f64,
    pub success: bool,
}

/// Immutable record of a realized exit (partial or full). Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    pub position_id: Uuid,
    pub direction: OptionDirection,
    pub strike: f64,
    pub quantity: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub exit_reason: ExitReason,
    pub realized_pnl: f64,
    pub capital_required: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn candle(high: f64, low: f64) -> Candle {
        Candle {
            timestamp: Utc.with_ymd_and_hms(2025, 7, 1, 10, 15, 0).unwrap(),
            open: (high + low) / 2.0,
            high,
            low,
            close: (high + low) / 2.0,
        }
    }

    #[test]
    fn test_inside_bar_detection() {
        let mother = candle(25564.60, 25491.55);
        let inside = candle(25550.0, 25500.0);
        let outside = candle(25570.0, 25500.0);

        assert!(inside.is_inside(&mother));
        assert!(!outside.is_inside(&mother));
        // Equal extremes do not qualify as inside.
        assert!(!mother.clone().is_inside(&mother));
    }

    #[test]
    fn test_candle_range() {
        let c = candle(25564.60, 25491.55);
        assert!((c.range() - 73.05).abs() < 1e-9);
    }

    #[test]
    fn test_position_open_states() {
        let mut position = Position {
            id: Uuid::new_v4(),
            direction: OptionDirection::CE,
            strike: 24000.0,
            expiry: NaiveDate::from_ymd_opt(2025, 7, 3).unwrap(),
            quantity: 75.0,
            entry_price: 150.0,
            entry_time: Utc.with_ymd_and_hms(2025, 7, 1, 10, 15, 0).unwrap(),
            stop_loss: 120.0,
            trail_anchor: 150.0,
            target1: 175.0,
            target2: 204.0,
            booked_quantity: 0.0,
            remaining_quantity: 75.0,
            capital_required: 11250.0,
            status: PositionStatus::Open,
        };

        assert!(position.is_open());
        position.status = PositionStatus::PartialBooked;
        assert!(position.is_open());
        position.status = PositionStatus::Closed;
        assert!(!position.is_open());
    }
}
