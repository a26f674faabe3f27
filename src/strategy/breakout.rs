use chrono::{DateTime, Duration, Utc};

use crate::models::{Candle, InsideBarSignal, OptionDirection};

/// Outcome of one breakout evaluation pass.
#[derive(Debug, Clone, PartialEq)]
pub enum BreakoutOutcome {
    /// No candle has closed outside the range yet; keep waiting.
    NoBreakout,
    /// A fresh close outside the range: place the trade.
    Confirmed {
        direction: OptionDirection,
        candle: Candle,
    },
    /// The breakout candle closed too long ago to act on. Signal is spent;
    /// no order is placed.
    Missed {
        direction: OptionDirection,
        candle: Candle,
    },
}

/// Confirms directional breaks of an active signal.
///
/// Candidate candles are selected by timestamp, never by array offset, so a
/// signal formed on one day is evaluated correctly against the next day's
/// bars and across cache refreshes. Evaluation is close-only and single-shot:
/// the first qualifying candle flips `breakout_attempted` and no later candle
/// can re-trigger the same signal.
#[derive(Debug, Clone, Copy)]
pub struct BreakoutEvaluator {
    grace: Duration,
}

impl Default for BreakoutEvaluator {
    fn default() -> Self {
        Self::new(300)
    }
}

impl BreakoutEvaluator {
    pub fn new(grace_secs: i64) -> Self {
        Self {
            grace: Duration::seconds(grace_secs),
        }
    }

    /// Scan candles after the inside bar for the first close outside the
    /// range. `now` is the evaluation instant; a qualifying candle whose
    /// close is older than the grace window is classified as missed.
    ///
    /// Whatever the outcome other than `NoBreakout`, the caller must discard
    /// the signal before the next detection pass.
    pub fn evaluate(
        &self,
        signal: &mut InsideBarSignal,
        candles: &[Candle],
        now: DateTime<Utc>,
    ) -> BreakoutOutcome {
        if signal.breakout_attempted {
            return BreakoutOutcome::NoBreakout;
        }

        for candle in candles
            .iter()
            .filter(|c| c.timestamp > signal.inside_bar_time)
        {
            let direction = if candle.close > signal.range_high {
                Some(OptionDirection::CE)
            } else if candle.close < signal.range_low {
                Some(OptionDirection::PE)
            } else {
                None
            };

            let Some(direction) = direction else {
                continue;
            };

            signal.breakout_attempted = true;

            if now - candle.timestamp > self.grace {
                tracing::warn!(
                    direction = %direction,
                    close = candle.close,
                    candle_time = %candle.timestamp,
                    "breakout candle outside grace window, trade missed"
                );
                return BreakoutOutcome::Missed {
                    direction,
                    candle: candle.clone(),
                };
            }

            return BreakoutOutcome::Confirmed {
                direction,
                candle: candle.clone(),
            };
        }

        BreakoutOutcome::NoBreakout
    }
}
