// Entry fills and per-position lifecycle management
pub mod adapter;
pub mod monitor;

pub use adapter::{ExecutionAdapter, PaperExecution, SimulatedExecution};
pub use monitor::{MonitorParams, MonitorStep, PositionMonitor};
