use chrono::{DateTime, Utc};

use crate::models::{Candle, InsideBarSignal};

/// Scans an ordered candle series for inside-bar formations.
///
/// The reference range stored on the signal belongs to the candle immediately
/// preceding the inside bar (the mother bar), matched by timestamp order.
#[derive(Debug, Default, Clone, Copy)]
pub struct PatternDetector;

impl PatternDetector {
    pub fn new() -> Self {
        Self
    }

    /// Pick the active inside-bar signal from the series, if any.
    pub fn detect(&self, candles: &[Candle]) -> Option<InsideBarSignal> {
        self.detect_after(candles, None)
    }

    /// Same scan, but ignores inside bars at or before `cutoff`. Used after a
    /// missed breakout so the stale formation cannot be re-selected.
    pub fn detect_after(
        &self,
        candles: &[Candle],
        cutoff: Option<DateTime<Utc>>,
    ) -> Option<InsideBarSignal> {
        let signal_time = candles.last()?.timestamp;

        // (inside, mother) of the best candidate so far
        let mut best: Option<(&Candle, &Candle)> = None;

        for window in candles.windows(2) {
            let (mother, inside) = (&window[0], &window[1]);
            if !inside.is_inside(mother) {
                continue;
            }
            if let Some(cutoff) = cutoff {
                if inside.timestamp <= cutoff {
                    continue;
                }
            }

            best = match best {
                None => Some((inside, mother)),
                Some((held, held_mother)) => {
                    if inside.timestamp.date_naive() != held.timestamp.date_naive() {
                        // Different days: the more recent bar wins outright.
                        Some((inside, mother))
                    } else if inside.range() < held.range() {
                        // Same day: the narrower bar wins.
                        Some((inside, mother))
                    } else {
                        Some((held, held_mother))
                    }
                }
            };
        }

        best.map(|(inside, mother)| InsideBarSignal {
            inside_bar_time: inside.timestamp,
            signal_time,
            range_high: mother.high,
            range_low: mother.low,
            breakout_attempted: false,
        })
    }
}
