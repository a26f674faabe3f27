use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

/// Typed strategy configuration.
///
/// Every knob the engine consumes lives here; there are no process-wide flags.
/// Defaults reflect NIFTY weekly options (lot size 75, 50-point strikes).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub initial_capital: f64,

    // Entry / exit geometry (option premium points)
    pub stop_loss_points: f64,
    pub risk_reward_ratio: f64,
    pub trail_step: f64,
    pub target1_points: f64,
    /// Second target in points; 0 derives it from stop_loss_points * risk_reward_ratio.
    pub target2_points: f64,
    pub book1_ratio: f64,

    // Strike selection
    pub strike_offset: f64,
    pub strike_step: f64,
    pub lot_size: u32,
    pub quantity_lots: u32,

    // Admission limits
    pub max_concurrent_positions: usize,
    pub daily_loss_limit_pct: f64,
    pub duplicate_signal_cooldown_secs: i64,
    pub expiry_safety_days: i64,

    // Session clock (exchange-local time carried as Utc)
    pub market_open: NaiveTime,
    pub market_close: NaiveTime,
    pub expiry_cutoff: NaiveTime,

    // Live polling
    pub missed_trade_grace_secs: i64,
    pub price_poll_secs: u64,
    pub candle_poll_secs: u64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            initial_capital: 100_000.0,
            stop_loss_points: 30.0,
            risk_reward_ratio: 1.8,
            trail_step: 10.0,
            target1_points: 25.0,
            target2_points: 0.0,
            book1_ratio: 0.5,
            strike_offset: 0.0,
            strike_step: 50.0,
            lot_size: 75,
            quantity_lots: 1,
            max_concurrent_positions: 2,
            daily_loss_limit_pct: 0.05,
            duplicate_signal_cooldown_secs: 3600,
            expiry_safety_days: 1,
            market_open: NaiveTime::from_hms_opt(9, 15, 0).unwrap(),
            market_close: NaiveTime::from_hms_opt(15, 15, 0).unwrap(),
            expiry_cutoff: NaiveTime::from_hms_opt(15, 0, 0).unwrap(),
            missed_trade_grace_secs: 300,
            price_poll_secs: 10,
            candle_poll_secs: 60,
        }
    }
}

impl StrategyConfig {
    /// Load defaults, then apply environment overrides.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.initial_capital = env_f64("INITIAL_CAPITAL", cfg.initial_capital);
        cfg.stop_loss_points = env_f64("STOP_LOSS_POINTS", cfg.stop_loss_points);
        cfg.risk_reward_ratio = env_f64("RISK_REWARD_RATIO", cfg.risk_reward_ratio);
        cfg.trail_step = env_f64("TRAIL_STEP", cfg.trail_step);
        cfg.target1_points = env_f64("TARGET1_POINTS", cfg.target1_points);
        cfg.target2_points = env_f64("TARGET2_POINTS", cfg.target2_points);
        cfg.book1_ratio = env_f64("BOOK1_RATIO", cfg.book1_ratio);
        cfg.strike_offset = env_f64("STRIKE_OFFSET", cfg.strike_offset);
        cfg.strike_step = env_f64("STRIKE_STEP", cfg.strike_step);
        cfg.lot_size = env_parse("LOT_SIZE", cfg.lot_size);
        cfg.quantity_lots = env_parse("QUANTITY_LOTS", cfg.quantity_lots);
        cfg.max_concurrent_positions =
            env_parse("MAX_CONCURRENT_POSITIONS", cfg.max_concurrent_positions);
        cfg.daily_loss_limit_pct = env_f64("DAILY_LOSS_LIMIT_PCT", cfg.daily_loss_limit_pct);
        cfg
    }

    /// Total units per entry.
    pub fn quantity(&self) -> f64 {
        (self.quantity_lots * self.lot_size) as f64
    }

    /// Second profit target relative to entry premium.
    pub fn target2_offset(&self) -> f64 {
        if self.target2_points > 0.0 {
            self.target2_points
        } else {
            self.stop_loss_points * self.risk_reward_ratio
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.initial_capital <= 0.0 {
            anyhow::bail!("initial_capital must be positive");
        }
        if self.stop_loss_points <= 0.0 {
            anyhow::bail!("stop_loss_points must be positive");
        }
        if self.risk_reward_ratio <= 0.0 {
            anyhow::bail!("risk_reward_ratio must be positive");
        }
        if !(0.0..=1.0).contains(&self.book1_ratio) {
            anyhow::bail!("book1_ratio must be within [0, 1]");
        }
        if self.strike_step <= 0.0 {
            anyhow::bail!("strike_step must be positive");
        }
        if self.lot_size == 0 || self.quantity_lots == 0 {
            anyhow::bail!("lot_size and quantity_lots must be non-zero");
        }
        if self.max_concurrent_positions == 0 {
            anyhow::bail!("max_concurrent_positions must be at least 1");
        }
        if !(0.0..1.0).contains(&self.daily_loss_limit_pct) {
            anyhow::bail!("daily_loss_limit_pct must be within [0, 1)");
        }
        if self.market_open >= self.market_close {
            anyhow::bail!("market_open must precede market_close");
        }
        Ok(())
    }
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = StrategyConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.quantity(), 75.0);
    }

    #[test]
    fn test_target2_derived_from_risk_reward() {
        let cfg = StrategyConfig::default();
        // entry=150, sl=30, rr=1.8 => target2 at 150 + 54 = 204
        assert!((cfg.target2_offset() - 54.0).abs() < 1e-9);

        let explicit = StrategyConfig {
            target2_points: 60.0,
            ..StrategyConfig::default()
        };
        assert_eq!(explicit.target2_offset(), 60.0);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut cfg = StrategyConfig::default();
        cfg.book1_ratio = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = StrategyConfig::default();
        cfg.initial_capital = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = StrategyConfig::default();
        cfg.market_open = cfg.market_close;
        assert!(cfg.validate().is_err());
    }
}
