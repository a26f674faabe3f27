// Signal generation: inside-bar detection and breakout confirmation
pub mod breakout;
pub mod pattern;

pub use breakout::{BreakoutEvaluator, BreakoutOutcome};
pub use pattern::PatternDetector;
