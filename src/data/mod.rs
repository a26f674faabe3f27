// Market data access: provider traits, historical option chains, validation
pub mod buffer;
pub mod replay;

use std::collections::HashMap;
use std::future::Future;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};

use crate::models::{Candle, OptionDirection};

pub use buffer::CandleBuffer;
pub use replay::ReplayFeed;

/// Supplies the hourly underlying series. Live implementations wrap a broker
/// or market-data client; the backtest replays history.
pub trait CandleProvider: Send + Sync + 'static {
    /// All candles known so far, ordered by close timestamp, oldest first.
    fn candles(&self) -> impl Future<Output = anyhow::Result<Vec<Candle>>> + Send;
}

/// Supplies option premiums by contract and timestamp.
pub trait QuoteProvider: Send + Sync + 'static {
    /// Premium for the contract at `at`; `Ok(None)` means no quote this cycle.
    fn option_quote(
        &self,
        direction: OptionDirection,
        strike: f64,
        at: DateTime<Utc>,
    ) -> impl Future<Output = anyhow::Result<Option<f64>>> + Send;
}

pub trait ExpiryCalendar: Send + Sync + 'static {
    /// Expiry date of the contract tradable on `on`.
    fn current_expiry(&self, on: NaiveDate) -> NaiveDate;
}

/// Weekly expiry on a fixed weekday (NIFTY-style, Thursday by default).
#[derive(Debug, Clone, Copy)]
pub struct WeeklyExpiry {
    pub weekday: Weekday,
}

impl Default for WeeklyExpiry {
    fn default() -> Self {
        Self {
            weekday: Weekday::Thu,
        }
    }
}

impl ExpiryCalendar for WeeklyExpiry {
    fn current_expiry(&self, on: NaiveDate) -> NaiveDate {
        let days_ahead = (self.weekday.num_days_from_monday() as i64
            - on.weekday().num_days_from_monday() as i64)
            .rem_euclid(7);
        on + Duration::days(days_ahead)
    }
}

fn strike_key(strike: f64) -> i64 {
    strike.round() as i64
}

/// In-memory option OHLC store keyed by (side, strike), used by the backtest
/// and by the replay feed for paper trading.
#[derive(Default)]
pub struct HistoricalOptionChain {
    series: HashMap<(OptionDirection, i64), Vec<Candle>>,
}

impl HistoricalOptionChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the premium series for one contract. Candles must already be
    /// sorted by timestamp.
    pub fn insert_series(&mut self, direction: OptionDirection, strike: f64, candles: Vec<Candle>) {
        self.series
            .insert((direction, strike_key(strike)), candles);
    }

    pub fn strikes(&self, direction: OptionDirection) -> Vec<f64> {
        let mut strikes: Vec<f64> = self
            .series
            .keys()
            .filter(|(d, _)| *d == direction)
            .map(|(_, k)| *k as f64)
            .collect();
        strikes.sort_by(|a, b| a.partial_cmp(b).unwrap());
        strikes
    }

    /// Premium at or immediately before `at` for the exact strike.
    pub fn premium_at(
        &self,
        direction: OptionDirection,
        strike: f64,
        at: DateTime<Utc>,
    ) -> Option<f64> {
        let candles = self.series.get(&(direction, strike_key(strike)))?;
        candles
            .iter()
            .rev()
            .find(|c| c.timestamp <= at)
            .map(|c| c.close)
    }

    /// Full premium bar for the contract closing exactly at `at`.
    pub fn candle_at(
        &self,
        direction: OptionDirection,
        strike: f64,
        at: DateTime<Utc>,
    ) -> Option<Candle> {
        self.series
            .get(&(direction, strike_key(strike)))?
            .iter()
            .find(|c| c.timestamp == at)
            .cloned()
    }

    /// Nearest strike (absolute distance) with data for this side.
    pub fn nearest_strike(&self, direction: OptionDirection, strike: f64) -> Option<f64> {
        self.strikes(direction)
            .into_iter()
            .min_by(|a, b| {
                (a - strike)
                    .abs()
                    .partial_cmp(&(b - strike).abs())
                    .unwrap()
            })
    }

    /// Premium lookup with nearest-strike fallback. Returns the strike that
    /// actually supplied the quote alongside the premium.
    pub fn premium_near(
        &self,
        direction: OptionDirection,
        strike: f64,
        at: DateTime<Utc>,
    ) -> Option<(f64, f64)> {
        if let Some(premium) = self.premium_at(direction, strike, at) {
            return Some((strike, premium));
        }
        let substitute = self.nearest_strike(direction, strike)?;
        self.premium_at(direction, substitute, at)
            .map(|premium| (substitute, premium))
    }
}

/// Rejects malformed series before they reach the engine. This is the one
/// fatal path: admission-check failures are expected branches, bad data is not.
pub fn validate_candle_series(candles: &[Candle]) -> anyhow::Result<()> {
    for candle in candles {
        for value in [candle.open, candle.high, candle.low, candle.close] {
            if !value.is_finite() || value <= 0.0 {
                anyhow::bail!("malformed candle at {}: non-positive price", candle.timestamp);
            }
        }
        if candle.high < candle.low {
            anyhow::bail!("malformed candle at {}: high < low", candle.timestamp);
        }
        if candle.open > candle.high
            || candle.open < candle.low
            || candle.close > candle.high
            || candle.close < candle.low
        {
            anyhow::bail!(
                "malformed candle at {}: open/close outside high-low range",
                candle.timestamp
            );
        }
    }
    for window in candles.windows(2) {
        if window[1].timestamp <= window[0].timestamp {
            anyhow::bail!(
                "candles not strictly ordered: {} then {}",
                window[0].timestamp,
                window[1].timestamp
            );
        }
    }
    Ok(())
}
