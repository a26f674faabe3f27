use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::data::{HistoricalOptionChain, QuoteProvider};
use crate::models::{FillResult, OptionDirection};

/// Pluggable entry-fill strategy. The backtest simulates fills from recorded
/// option data; a live deployment injects a broker-backed implementation.
pub trait ExecutionAdapter: Send + Sync + 'static {
    /// Attempt to buy `quantity` units of the contract. A failed fill is a
    /// normal outcome (`success == false`), not an error; errors are reserved
    /// for transport-level trouble in live implementations.
    fn fill(
        &self,
        direction: OptionDirection,
        strike: f64,
        quantity: f64,
        at: DateTime<Utc>,
    ) -> impl Future<Output = anyhow::Result<FillResult>> + Send;
}

/// Backtest fills from the historical option chain, substituting the nearest
/// available strike when the requested one is absent from the dataset.
pub struct SimulatedExecution {
    chain: Arc<HistoricalOptionChain>,
}

impl SimulatedExecution {
    pub fn new(chain: Arc<HistoricalOptionChain>) -> Self {
        Self { chain }
    }
}

impl ExecutionAdapter for SimulatedExecution {
    async fn fill(
        &self,
        direction: OptionDirection,
        strike: f64,
        _quantity: f64,
        at: DateTime<Utc>,
    ) -> anyhow::Result<FillResult> {
        match self.chain.premium_near(direction, strike, at) {
            Some((filled_strike, premium)) => {
                if filled_strike != strike {
                    tracing::warn!(
                        requested = strike,
                        substituted = filled_strike,
                        %direction,
                        "exact strike missing from dataset, filled nearest available"
                    );
                }
                Ok(FillResult {
                    price: premium,
                    strike: filled_strike,
                    success: true,
                })
            }
            None => {
                tracing::warn!(strike, %direction, "no option data at fill time");
                Ok(FillResult {
                    price: 0.0,
                    strike,
                    success: false,
                })
            }
        }
    }
}

/// Live dry-run: fills at the currently quoted premium without touching a
/// broker.
pub struct PaperExecution<Q> {
    quotes: Arc<Q>,
}

impl<Q> PaperExecution<Q> {
    pub fn new(quotes: Arc<Q>) -> Self {
        Self { quotes }
    }
}

impl<Q: QuoteProvider> ExecutionAdapter for PaperExecution<Q> {
    async fn fill(
        &self,
        direction: OptionDirection,
        strike: f64,
        _quantity: f64,
        at: DateTime<Utc>,
    ) -> anyhow::Result<FillResult> {
        match self.quotes.option_quote(direction, strike, at).await? {
            Some(premium) => Ok(FillResult {
                price: premium,
                strike,
                success: true,
            }),
            None => Ok(FillResult {
                price: 0.0,
                strike,
                success: false,
            }),
        }
    }
}
