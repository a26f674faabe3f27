// Pre-trade admission and capital accounting
pub mod gate;
pub mod ledger;

pub use gate::{RiskGate, SkipReason, TradePlan};
pub use ledger::CapitalLedger;
