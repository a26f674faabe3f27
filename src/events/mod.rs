use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::models::{Candle, InsideBarSignal, OptionDirection, Position, Trade};

/// Lifecycle notifications emitted by the engine.
///
/// The core never writes reports or CSVs itself; dashboards and exporters
/// subscribe to these instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TradeEvent {
    SignalDetected {
        signal: InsideBarSignal,
    },
    BreakoutConfirmed {
        signal: InsideBarSignal,
        direction: OptionDirection,
        candle: Candle,
    },
    MissedTrade {
        signal: InsideBarSignal,
        direction: OptionDirection,
        candle: Candle,
    },
    TradeOpened {
        position: Position,
    },
    TradePartialExit {
        trade: Trade,
    },
    TradeClosed {
        trade: Trade,
    },
    OrderRejected {
        direction: OptionDirection,
        strike: f64,
        reason: String,
    },
    CapitalExhausted {
        balance: f64,
    },
}

impl TradeEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TradeEvent::SignalDetected { .. } => "signal-detected",
            TradeEvent::BreakoutConfirmed { .. } => "breakout-confirmed",
            TradeEvent::MissedTrade { .. } => "missed-trade",
            TradeEvent::TradeOpened { .. } => "trade-opened",
            TradeEvent::TradePartialExit { .. } => "trade-partial-exit",
            TradeEvent::TradeClosed { .. } => "trade-closed",
            TradeEvent::OrderRejected { .. } => "order-rejected",
            TradeEvent::CapitalExhausted { .. } => "capital-exhausted",
        }
    }
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: &TradeEvent);
}

/// Logs every event through `tracing`.
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: &TradeEvent) {
        match event {
            TradeEvent::TradeClosed { trade } => tracing::info!(
                event = event.name(),
                reason = trade.exit_reason.as_str(),
                pnl = trade.realized_pnl,
                "position closed"
            ),
            TradeEvent::CapitalExhausted { balance } => {
                tracing::warn!(event = event.name(), balance, "capital exhausted")
            }
            other => tracing::info!(event = other.name(), "engine event"),
        }
    }
}

/// Buffers events in memory; the backtester reads them back after a run.
#[derive(Default)]
pub struct CollectorSink {
    events: Mutex<Vec<TradeEvent>>,
}

impl CollectorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<TradeEvent> {
        std::mem::take(&mut self.events.lock().unwrap())
    }

    pub fn snapshot(&self) -> Vec<TradeEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for CollectorSink {
    fn emit(&self, event: &TradeEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Forwards events over an unbounded channel to an external consumer (UI).
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<TradeEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<TradeEvent>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: &TradeEvent) {
        // A dropped receiver must not take the engine down with it.
        let _ = self.tx.send(event.clone());
    }
}

/// Cheap-to-clone fan-out over any number of sinks.
#[derive(Clone, Default)]
pub struct EventBus {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn emit(&self, event: TradeEvent) {
        for sink in &self.sinks {
            sink.emit(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_records_events() {
        let collector = Arc::new(CollectorSink::new());
        let bus = EventBus::new().with_sink(collector.clone());

        bus.emit(TradeEvent::CapitalExhausted { balance: -120.0 });

        let events = collector.snapshot();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name(), "capital-exhausted");
    }

    #[test]
    fn test_channel_sink_survives_dropped_receiver() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let bus = EventBus::new().with_sink(Arc::new(ChannelSink::new(tx)));
        // Must not panic.
        bus.emit(TradeEvent::CapitalExhausted { balance: 0.0 });
    }

    #[test]
    fn test_fan_out_reaches_all_sinks() {
        let a = Arc::new(CollectorSink::new());
        let b = Arc::new(CollectorSink::new());
        let bus = EventBus::new()
            .with_sink(a.clone())
            .with_sink(b.clone());

        bus.emit(TradeEvent::CapitalExhausted { balance: 1.0 });
        assert_eq!(a.snapshot().len(), 1);
        assert_eq!(b.snapshot().len(), 1);
    }
}
