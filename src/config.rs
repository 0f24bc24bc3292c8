use crate::error::ConfigError;
use serde_derive::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Ticks between transmit done and arming the receiver
pub const FORWARD_BACKWARD_DELAY_TICKS: u32 = 4;
pub const TICK_MICROS: u32 = 1000;
pub const TRANSMIT_QUEUE_DEPTH: usize = 2;
pub const RECEIVE_QUEUE_DEPTH: usize = 4;
pub const MONITOR_PERIOD_MS: u32 = 250;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub transmit_queue_depth: usize,
    pub receive_queue_depth: usize,
    /// Length of one scheduler tick
    pub tick_micros: u32,
    pub forward_backward_delay_ticks: u32,
    /// Receive window, counted from the end of the settling delay
    pub response_timeout_ms: u32,
    pub transmit_timeout_ms: u32,
    pub monitor_period_ms: u32,
    /// Consecutive low samples before the bus is considered faulty
    pub monitor_fault_polls: u32,
    pub randomise_delay_ms: u32,
    pub max_device_failures: u32,
    pub control_log_base: u16,
    pub transmit_log_base: u16,
    pub monitor_log_base: u16,
}

impl Default for BusConfig {
    fn default() -> Self {
        BusConfig {
            transmit_queue_depth: TRANSMIT_QUEUE_DEPTH,
            receive_queue_depth: RECEIVE_QUEUE_DEPTH,
            tick_micros: TICK_MICROS,
            forward_backward_delay_ticks: FORWARD_BACKWARD_DELAY_TICKS,
            response_timeout_ms: 22,
            transmit_timeout_ms: 50,
            monitor_period_ms: MONITOR_PERIOD_MS,
            monitor_fault_polls: 2,
            randomise_delay_ms: 100,
            max_device_failures: 8,
            control_log_base: 0x100,
            transmit_log_base: 0x200,
            monitor_log_base: 0x300,
        }
    }
}

impl BusConfig {
    pub fn from_json(json: &str) -> Result<BusConfig, ConfigError> {
        let config: BusConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<BusConfig, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transmit_queue_depth == 0 {
            return Err(ConfigError::Invalid("transmit_queue_depth must be at least 1"));
        }
        if self.receive_queue_depth == 0 {
            return Err(ConfigError::Invalid("receive_queue_depth must be at least 1"));
        }
        if self.tick_micros == 0 {
            return Err(ConfigError::Invalid("tick_micros must not be zero"));
        }
        if self.forward_backward_delay_ticks == 0 {
            return Err(ConfigError::Invalid(
                "forward_backward_delay_ticks must not be zero",
            ));
        }
        if self.settling_delay() > self.response_timeout() {
            return Err(ConfigError::Invalid(
                "settling delay longer than response timeout",
            ));
        }
        if self.transmit_timeout_ms == 0 || self.monitor_period_ms == 0 {
            return Err(ConfigError::Invalid("timeouts must not be zero"));
        }
        if self.monitor_fault_polls == 0 {
            return Err(ConfigError::Invalid("monitor_fault_polls must be at least 1"));
        }
        Ok(())
    }

    pub fn tick(&self) -> Duration {
        Duration::from_micros(self.tick_micros as u64)
    }

    pub fn settling_delay(&self) -> Duration {
        self.tick() * self.forward_backward_delay_ticks
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms as u64)
    }

    pub fn transmit_timeout(&self) -> Duration {
        Duration::from_millis(self.transmit_timeout_ms as u64)
    }

    pub fn monitor_period(&self) -> Duration {
        Duration::from_millis(self.monitor_period_ms as u64)
    }

    pub fn randomise_delay(&self) -> Duration {
        Duration::from_millis(self.randomise_delay_ms as u64)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = BusConfig::default();
        config.validate().unwrap();
        assert_eq!(config.settling_delay(), Duration::from_millis(4));
        assert_eq!(config.transmit_queue_depth, 2);
    }

    #[test]
    fn parse_partial_config() {
        let config = BusConfig::from_json(
            r#"{
                "transmit_queue_depth": 3,
                "forward_backward_delay_ticks": 8,
                "tick_micros": 500
            }"#,
        )
        .unwrap();
        assert_eq!(config.transmit_queue_depth, 3);
        assert_eq!(config.settling_delay(), Duration::from_millis(4));
        assert_eq!(config.monitor_period_ms, 250);
    }

    #[test]
    fn reject_invalid_config() {
        assert!(matches!(
            BusConfig::from_json(r#"{"transmit_queue_depth": 0}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            BusConfig::from_json(r#"{"forward_backward_delay_ticks": 100}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            BusConfig::from_json("{"),
            Err(ConfigError::Parse(_))
        ));
    }
}
