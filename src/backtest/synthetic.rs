use chrono::{DateTime, Datelike, Duration, TimeZone, Utc, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::data::HistoricalOptionChain;
use crate::models::{Candle, OptionDirection};

/// Market shapes for scenario testing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketScenario {
    /// Steady climb with occasional pauses.
    Uptrend,
    /// Steady decline.
    Downtrend,
    /// Mean-reverting chop inside a band; produces many inside bars.
    RangeBound,
    /// Violent alternating swings.
    Whipsaw,
}

/// Seeded generator of hourly session candles (weekdays, five bars per day
/// closing 10:15 through 14:15). Same seed, same series.
pub struct SyntheticDataGenerator {
    rng: StdRng,
}

impl SyntheticDataGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn generate(&mut self, scenario: MarketScenario, count: usize) -> Vec<Candle> {
        let mut candles = Vec::with_capacity(count);
        let mut level = 24_000.0_f64;
        let mut timestamp = Utc.with_ymd_and_hms(2025, 7, 1, 10, 15, 0).unwrap();

        for i in 0..count {
            let drift = match scenario {
                MarketScenario::Uptrend => 12.0,
                MarketScenario::Downtrend => -12.0,
                MarketScenario::RangeBound => (24_000.0 - level) * 0.3,
                MarketScenario::Whipsaw => {
                    if (i / 3) % 2 == 0 {
                        60.0
                    } else {
                        -60.0
                    }
                }
            };
            let noise_scale = match scenario {
                MarketScenario::RangeBound => 15.0,
                MarketScenario::Whipsaw => 40.0,
                _ => 25.0,
            };
            let noise = self.rng.gen_range(-noise_scale..noise_scale);

            let open = level;
            let close = (level + drift + noise).max(1_000.0);
            let wick = self.rng.gen_range(2.0..noise_scale.max(4.0));
            // Every few bars the range contracts, seeding inside-bar setups.
            let (high, low) = if i % 4 == 3 {
                (open.max(close) + wick * 0.2, open.min(close) - wick * 0.2)
            } else {
                (open.max(close) + wick, open.min(close) - wick)
            };

            candles.push(Candle {
                timestamp,
                open,
                high,
                low,
                close,
            });

            level = close;
            timestamp = next_session_hour(timestamp);
        }

        candles
    }
}

fn next_session_hour(current: DateTime<Utc>) -> DateTime<Utc> {
    // Bars close hourly 10:15..=14:15; after the last one, jump to the next
    // weekday's first bar.
    let mut next = current + Duration::hours(1);
    if next.time() > chrono::NaiveTime::from_hms_opt(14, 15, 0).unwrap() {
        next = (next + Duration::days(1))
            .date_naive()
            .and_hms_opt(10, 15, 0)
            .unwrap()
            .and_utc();
    }
    while matches!(next.weekday(), Weekday::Sat | Weekday::Sun) {
        next += Duration::days(1);
    }
    next
}

/// Derive a deterministic option chain from an underlying series: premium is
/// intrinsic value plus a flat time value, one strike per step across the
/// traded range.
pub fn option_chain_for(underlying: &[Candle], strike_step: f64, time_value: f64) -> HistoricalOptionChain {
    let mut chain = HistoricalOptionChain::new();
    if underlying.is_empty() {
        return chain;
    }

    let min = underlying.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
    let max = underlying
        .iter()
        .map(|c| c.high)
        .fold(f64::NEG_INFINITY, f64::max);

    let first_strike = ((min / strike_step).floor() - 2.0) * strike_step;
    let last_strike = ((max / strike_step).ceil() + 2.0) * strike_step;

    let mut strike = first_strike;
    while strike <= last_strike {
        for direction in [OptionDirection::CE, OptionDirection::PE] {
            let series: Vec<Candle> = underlying
                .iter()
                .map(|c| {
                    let premium_of = |spot: f64| {
                        let intrinsic = match direction {
                            OptionDirection::CE => (spot - strike).max(0.0),
                            OptionDirection::PE => (strike - spot).max(0.0),
                        };
                        intrinsic + time_value
                    };
                    let open = premium_of(c.open);
                    let close = premium_of(c.close);
                    let a = premium_of(c.high);
                    let b = premium_of(c.low);
                    Candle {
                        timestamp: c.timestamp,
                        open,
                        high: a.max(b).max(open).max(close),
                        low: a.min(b).min(open).min(close),
                        close,
                    }
                })
                .collect();
            chain.insert_series(direction, strike, series);
        }
        strike += strike_step;
    }

    chain
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_series() {
        let a = SyntheticDataGenerator::new(42).generate(MarketScenario::RangeBound, 100);
        let b = SyntheticDataGenerator::new(42).generate(MarketScenario::RangeBound, 100);
        assert_eq!(a, b);

        let c = SyntheticDataGenerator::new(43).generate(MarketScenario::RangeBound, 100);
        assert_ne!(a, c);
    }

    #[test]
    fn test_candles_stay_in_session_hours() {
        let candles = SyntheticDataGenerator::new(7).generate(MarketScenario::Uptrend, 50);
        for candle in &candles {
            assert!(!matches!(
                candle.timestamp.weekday(),
                Weekday::Sat | Weekday::Sun
            ));
            let t = candle.timestamp.time();
            assert!(t >= chrono::NaiveTime::from_hms_opt(10, 15, 0).unwrap());
            assert!(t <= chrono::NaiveTime::from_hms_opt(14, 15, 0).unwrap());
        }
        for w in candles.windows(2) {
            assert!(w[1].timestamp > w[0].timestamp);
        }
    }

    #[test]
    fn test_generated_series_passes_validation() {
        let candles = SyntheticDataGenerator::new(11).generate(MarketScenario::Whipsaw, 200);
        assert!(crate::data::validate_candle_series(&candles).is_ok());
    }

    #[test]
    fn test_option_chain_covers_traded_range() {
        let candles = SyntheticDataGenerator::new(3).generate(MarketScenario::Uptrend, 60);
        let chain = option_chain_for(&candles, 50.0, 80.0);

        let mid = (candles[0].close / 50.0).round() * 50.0;
        let at = candles.last().unwrap().timestamp;
        assert!(chain.premium_at(OptionDirection::CE, mid, at).is_some());
        assert!(chain.premium_at(OptionDirection::PE, mid, at).is_some());
        // ATM premium carries at least the time value.
        let premium = chain.premium_at(OptionDirection::CE, mid, at).unwrap();
        assert!(premium >= 80.0);
    }
}
