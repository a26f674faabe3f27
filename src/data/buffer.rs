use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

use crate::models::Candle;

/// Thread-safe rolling window of hourly candles.
///
/// Shared between the live fetch loop (writer) and the detection loop
/// (reader). A candle with a timestamp already present replaces the stored
/// bar, so a still-forming hour can be refreshed in place.
#[derive(Clone)]
pub struct CandleBuffer {
    data: Arc<RwLock<VecDeque<Candle>>>,
    max_candles: usize,
}

impl CandleBuffer {
    pub fn new(max_candles: usize) -> Self {
        Self {
            data: Arc::new(RwLock::new(VecDeque::new())),
            max_candles,
        }
    }

    pub fn push(&self, candle: Candle) {
        let mut data = self.data.write().unwrap();

        if let Some(position) = data.iter().position(|c| c.timestamp == candle.timestamp) {
            data[position] = candle;
            return;
        }

        data.push_back(candle);
        while data.len() > self.max_candles {
            data.pop_front();
        }
    }

    pub fn extend(&self, candles: impl IntoIterator<Item = Candle>) {
        for candle in candles {
            self.push(candle);
        }
    }

    pub fn snapshot(&self) -> Vec<Candle> {
        self.data.read().unwrap().iter().cloned().collect()
    }

    pub fn last(&self) -> Option<Candle> {
        self.data.read().unwrap().back().cloned()
    }

    pub fn len(&self) -> usize {
        self.data.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn candle(hour: u32, close: f64) -> Candle {
        Candle {
            timestamp: Utc.with_ymd_and_hms(2025, 7, 1, hour, 15, 0).unwrap(),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
        }
    }

    #[test]
    fn test_rolling_window_evicts_oldest() {
        let buffer = CandleBuffer::new(2);
        buffer.push(candle(9, 100.0));
        buffer.push(candle(10, 101.0));
        buffer.push(candle(11, 102.0));

        let candles = buffer.snapshot();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].close, 101.0);
        assert_eq!(candles[1].close, 102.0);
    }

    #[test]
    fn test_same_timestamp_replaces_in_place() {
        let buffer = CandleBuffer::new(10);
        buffer.push(candle(10, 100.0));
        buffer.push(candle(10, 105.0));

        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.last().unwrap().close, 105.0);
    }
}
