//! Strategy parameters.

use std::time::Duration;

use clotho_core::{CurrencyPair, Size};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::{StrategyError, StrategyResult};

/// Ladder parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Traded pair, written as `BASE/COUNTER`.
    #[serde(default = "default_pair")]
    pub pair: CurrencyPair,

    /// Distance from the tick price to the ladder anchor.
    #[serde(default = "default_price_offset")]
    pub price_offset: Decimal,

    /// Spacing between ladder levels.
    #[serde(default = "default_price_step")]
    pub price_step: Decimal,

    /// Extra move beyond `price_offset` needed to enter a new channel.
    #[serde(default = "default_sensitivity_min")]
    pub sensitivity_min: Decimal,

    /// Move beyond `price_offset` treated as a boost (large move).
    #[serde(default = "default_sensitivity_max")]
    pub sensitivity_max: Decimal,

    /// Distance from the anchor to the first stop-limit price.
    #[serde(default = "default_stop_offset")]
    pub stop_offset: Decimal,

    /// Spacing between stop-limit prices.
    #[serde(default = "default_stop_step")]
    pub stop_step: Decimal,

    /// Trigger distance from each stop level's anchor.
    #[serde(default = "default_stop_bias")]
    pub stop_bias: Decimal,

    /// Orders per ladder side.
    #[serde(default = "default_ladder_depth")]
    pub ladder_depth: u32,

    /// Contracts per ladder order.
    #[serde(default = "default_order_volume")]
    pub order_volume: Decimal,

    /// Delay between successive placements or cancellations.
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,

    #[serde(default)]
    pub risk: RiskConfig,
}

fn default_pair() -> CurrencyPair {
    CurrencyPair::new("XBT", "USD")
}

fn default_price_offset() -> Decimal {
    dec!(15)
}

fn default_price_step() -> Decimal {
    dec!(10)
}

fn default_sensitivity_min() -> Decimal {
    dec!(5)
}

fn default_sensitivity_max() -> Decimal {
    dec!(50)
}

fn default_stop_offset() -> Decimal {
    dec!(14)
}

fn default_stop_step() -> Decimal {
    dec!(10)
}

fn default_stop_bias() -> Decimal {
    dec!(0.5)
}

fn default_ladder_depth() -> u32 {
    1
}

fn default_order_volume() -> Decimal {
    dec!(100)
}

fn default_pacing_ms() -> u64 {
    200
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            pair: default_pair(),
            price_offset: default_price_offset(),
            price_step: default_price_step(),
            sensitivity_min: default_sensitivity_min(),
            sensitivity_max: default_sensitivity_max(),
            stop_offset: default_stop_offset(),
            stop_step: default_stop_step(),
            stop_bias: default_stop_bias(),
            ladder_depth: default_ladder_depth(),
            order_volume: default_order_volume(),
            pacing_ms: default_pacing_ms(),
            risk: RiskConfig::default(),
        }
    }
}

impl StrategyConfig {
    pub fn validate(&self) -> StrategyResult<()> {
        let positive = [
            ("price_step", self.price_step),
            ("order_volume", self.order_volume),
        ];
        for (name, value) in positive {
            if value <= Decimal::ZERO {
                return Err(StrategyError::InvalidConfig(format!(
                    "{name} must be positive, got {value}"
                )));
            }
        }
        let non_negative = [
            ("price_offset", self.price_offset),
            ("sensitivity_min", self.sensitivity_min),
            ("stop_offset", self.stop_offset),
            ("stop_step", self.stop_step),
            ("stop_bias", self.stop_bias),
        ];
        for (name, value) in non_negative {
            if value < Decimal::ZERO {
                return Err(StrategyError::InvalidConfig(format!(
                    "{name} must not be negative, got {value}"
                )));
            }
        }
        // Quantities go on the wire as whole contracts.
        if !self.order_volume.fract().is_zero() {
            return Err(StrategyError::InvalidConfig(format!(
                "order_volume must be a whole number of contracts, got {}",
                self.order_volume
            )));
        }
        if self.ladder_depth == 0 {
            return Err(StrategyError::InvalidConfig(
                "ladder_depth must be at least 1".to_string(),
            ));
        }
        if self.sensitivity_max < self.sensitivity_min {
            return Err(StrategyError::InvalidConfig(format!(
                "sensitivity_max ({}) below sensitivity_min ({})",
                self.sensitivity_max, self.sensitivity_min
            )));
        }
        self.risk.validate()
    }

    pub fn volume(&self) -> Size {
        Size::new(self.order_volume)
    }

    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }

    /// Minimum `|tick - anchor|` that enters a new channel.
    pub fn channel_threshold(&self) -> Decimal {
        self.price_offset + self.sensitivity_min
    }

    /// Minimum `|tick - anchor|` that counts as a boost.
    pub fn boost_threshold(&self) -> Decimal {
        self.price_offset + self.sensitivity_max
    }

    /// Half-width of the retention corridor around a new anchor.
    pub fn corridor(&self) -> Decimal {
        self.price_step * Decimal::from(self.ladder_depth)
    }
}

/// Position profit/loss thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Close for profit once the normalized gain reaches this percentage.
    #[serde(default = "default_profit_scale")]
    pub profit_scale: Decimal,

    /// Stop out once the normalized loss reaches this percentage.
    #[serde(default = "default_loss_scale")]
    pub loss_scale: Decimal,

    /// Loss tolerance reached at the end of the decay window.
    #[serde(default = "default_loss_floor")]
    pub loss_floor: Decimal,

    /// Time over which loss tolerance shrinks from `loss_scale` to
    /// `loss_floor`. 0 disables decay.
    #[serde(default)]
    pub decay_window_secs: u64,

    /// Minimum time between evaluations.
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
}

fn default_profit_scale() -> Decimal {
    dec!(5)
}

fn default_loss_scale() -> Decimal {
    dec!(3)
}

fn default_loss_floor() -> Decimal {
    dec!(1)
}

fn default_min_interval_ms() -> u64 {
    1000
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            profit_scale: default_profit_scale(),
            loss_scale: default_loss_scale(),
            loss_floor: default_loss_floor(),
            decay_window_secs: 0,
            min_interval_ms: default_min_interval_ms(),
        }
    }
}

impl RiskConfig {
    pub fn validate(&self) -> StrategyResult<()> {
        if self.profit_scale <= Decimal::ZERO || self.loss_scale <= Decimal::ZERO {
            return Err(StrategyError::InvalidConfig(
                "profit_scale and loss_scale must be positive".to_string(),
            ));
        }
        if self.loss_floor < Decimal::ZERO || self.loss_floor > self.loss_scale {
            return Err(StrategyError::InvalidConfig(format!(
                "loss_floor ({}) must be within 0..=loss_scale ({})",
                self.loss_floor, self.loss_scale
            )));
        }
        Ok(())
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    /// Loss tolerance after holding a position for `held`.
    pub fn loss_threshold(&self, held: Duration) -> Decimal {
        if self.decay_window_secs == 0 {
            return self.loss_scale;
        }
        let window = Decimal::from(self.decay_window_secs);
        let elapsed = Decimal::from(held.as_secs()).min(window);
        self.loss_scale - (self.loss_scale - self.loss_floor) * elapsed / window
    }
}

/// Reconciliation schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    #[serde(default = "default_reconcile_interval_secs")]
    pub interval_secs: u64,
}

fn default_reconcile_interval_secs() -> u64 {
    30
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_reconcile_interval_secs(),
        }
    }
}

impl ReconcileConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = StrategyConfig::default();
        config.validate().unwrap();
        assert_eq!(config.channel_threshold(), dec!(20));
        assert_eq!(config.boost_threshold(), dec!(65));
        assert_eq!(config.corridor(), dec!(10));
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: StrategyConfig = toml::from_str(
            r#"
            pair = "ETH/USD"
            price_step = "0.5"
            ladder_depth = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.pair.symbol(), "ETHUSD");
        assert_eq!(config.price_step, dec!(0.5));
        assert_eq!(config.ladder_depth, 3);
        assert_eq!(config.price_offset, dec!(15));
        assert_eq!(config.risk.profit_scale, dec!(5));
    }

    #[test]
    fn test_validate_rejects_fractional_volume() {
        let fractional = StrategyConfig {
            order_volume: dec!(0.5),
            ..StrategyConfig::default()
        };
        assert!(matches!(
            fractional.validate(),
            Err(StrategyError::InvalidConfig(msg)) if msg.contains("order_volume")
        ));

        let whole = StrategyConfig {
            order_volume: dec!(250.000),
            ..StrategyConfig::default()
        };
        tokio_test::assert_ok!(whole.validate());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let zero_depth = StrategyConfig {
            ladder_depth: 0,
            ..StrategyConfig::default()
        };
        assert!(zero_depth.validate().is_err());

        let zero_step = StrategyConfig {
            price_step: Decimal::ZERO,
            ..StrategyConfig::default()
        };
        assert!(zero_step.validate().is_err());

        let inverted_band = StrategyConfig {
            sensitivity_min: dec!(10),
            sensitivity_max: dec!(5),
            ..StrategyConfig::default()
        };
        assert!(inverted_band.validate().is_err());
    }

    #[test]
    fn test_loss_threshold_decays_to_floor() {
        let risk = RiskConfig {
            decay_window_secs: 100,
            ..RiskConfig::default()
        };
        assert_eq!(risk.loss_threshold(Duration::ZERO), dec!(3));
        assert_eq!(risk.loss_threshold(Duration::from_secs(50)), dec!(2));
        assert_eq!(risk.loss_threshold(Duration::from_secs(100)), dec!(1));
        assert_eq!(risk.loss_threshold(Duration::from_secs(500)), dec!(1));

        let flat = RiskConfig::default();
        assert_eq!(flat.loss_threshold(Duration::from_secs(10_000)), dec!(3));
    }
}
