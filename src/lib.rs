// Core modules
pub mod backtest;
pub mod config;
pub mod data;
pub mod db;
pub mod events;
pub mod execution;
pub mod live;
pub mod models;
pub mod risk;
pub mod strategy;

// Re-export commonly used types
pub use models::*;

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
