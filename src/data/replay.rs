use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::{CandleProvider, HistoricalOptionChain, QuoteProvider};
use crate::models::{Candle, OptionDirection};

/// Paper-trading feed: releases one historical candle per poll cycle and
/// answers option quotes from the matching point in the recorded chain.
///
/// Lets the live orchestrator run end-to-end (concurrent monitors included)
/// without a broker connection.
pub struct ReplayFeed {
    candles: Vec<Candle>,
    chain: Arc<HistoricalOptionChain>,
    cursor: AtomicUsize,
}

impl ReplayFeed {
    pub fn new(candles: Vec<Candle>, chain: Arc<HistoricalOptionChain>) -> Self {
        Self {
            candles,
            chain,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Timestamp of the most recently released candle.
    pub fn current_time(&self) -> Option<DateTime<Utc>> {
        let released = self.cursor.load(Ordering::SeqCst);
        if released == 0 {
            return None;
        }
        Some(self.candles[released.min(self.candles.len()) - 1].timestamp)
    }

    pub fn exhausted(&self) -> bool {
        self.cursor.load(Ordering::SeqCst) >= self.candles.len()
    }
}

impl CandleProvider for ReplayFeed {
    async fn candles(&self) -> anyhow::Result<Vec<Candle>> {
        let released = self
            .cursor
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| {
                Some((c + 1).min(self.candles.len()))
            })
            .unwrap_or(0);
        let upto = (released + 1).min(self.candles.len());
        Ok(self.candles[..upto].to_vec())
    }
}

impl QuoteProvider for ReplayFeed {
    async fn option_quote(
        &self,
        direction: OptionDirection,
        strike: f64,
        _at: DateTime<Utc>,
    ) -> anyhow::Result<Option<f64>> {
        // Quotes are pinned to replay time, not wall-clock time.
        let Some(now) = self.current_time() else {
            return Ok(None);
        };
        Ok(self.chain.premium_at(direction, strike, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn candle(hour: u32, close: f64) -> Candle {
        Candle {
            timestamp: Utc.with_ymd_and_hms(2025, 7, 1, hour, 15, 0).unwrap(),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
        }
    }

    #[tokio::test]
    async fn test_replay_releases_one_candle_per_poll() {
        let chain = Arc::new(HistoricalOptionChain::new());
        let feed = ReplayFeed::new(vec![candle(9, 100.0), candle(10, 101.0)], chain);

        assert_eq!(feed.candles().await.unwrap().len(), 1);
        assert_eq!(feed.candles().await.unwrap().len(), 2);
        // Exhausted feed keeps serving the full history.
        assert_eq!(feed.candles().await.unwrap().len(), 2);
        assert!(feed.exhausted());
    }

    #[tokio::test]
    async fn test_quotes_follow_replay_clock() {
        let mut chain = HistoricalOptionChain::new();
        chain.insert_series(
            OptionDirection::CE,
            24000.0,
            vec![candle(9, 150.0), candle(10, 175.0)],
        );
        let feed = ReplayFeed::new(vec![candle(9, 100.0), candle(10, 101.0)], Arc::new(chain));

        // Nothing released yet: no quote.
        let quote = feed
            .option_quote(OptionDirection::CE, 24000.0, Utc::now())
            .await
            .unwrap();
        assert_eq!(quote, None);

        feed.candles().await.unwrap();
        let quote = feed
            .option_quote(OptionDirection::CE, 24000.0, Utc::now())
            .await
            .unwrap();
        assert_eq!(quote, Some(150.0));

        feed.candles().await.unwrap();
        let quote = feed
            .option_quote(OptionDirection::CE, 24000.0, Utc::now())
            .await
            .unwrap();
        assert_eq!(quote, Some(175.0));
    }
}
