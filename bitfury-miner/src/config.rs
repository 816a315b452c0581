//! Driver configuration.
//!
//! Parses environment variables to configure a Bitfury device.
//!
//! - `BITFURY_OPTIONS` - Oscillator overrides, e.g. `ALL:54,3:60`
//! - `BITFURY_SCAN_DELAY_MS` - Pacing delay per scan cycle (default: 200)
//! - `BITFURY_DEFAULT_OSC` - Oscillator setting before overrides (default: 54)
//! - `BITFURY_STATUS_INTERVAL` - Cycles between status lines (default: 100)

use std::time::Duration;

use crate::chip::options::ChipOptions;
use crate::chip::OscillatorSetting;

/// Shortest pacing delay accepted; chips cannot turn results around faster.
pub const MIN_SCAN_DELAY: Duration = Duration::from_millis(100);

/// Longest pacing delay accepted.
pub const MAX_SCAN_DELAY: Duration = Duration::from_millis(1000);

/// Driver configuration for one device.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Oscillator overrides, applied once at warm-up.
    pub options: Option<ChipOptions>,

    /// Minimum wall-clock length of a scan cycle.
    pub scan_delay: Duration,

    /// Oscillator setting every chip gets before overrides.
    pub default_oscillator: OscillatorSetting,

    /// Cycles between status log lines. Zero disables them.
    pub status_interval: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            options: None,
            scan_delay: Duration::from_millis(200),
            default_oscillator: OscillatorSetting::DEFAULT,
            status_interval: 100,
        }
    }
}

impl DriverConfig {
    /// Parse configuration from environment variables.
    ///
    /// Unset or unparseable variables fall back to defaults; numeric values
    /// are clamped to their valid ranges.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let options = std::env::var("BITFURY_OPTIONS")
            .ok()
            .map(|s| ChipOptions::parse(&s));

        let scan_delay = env_u64("BITFURY_SCAN_DELAY_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.scan_delay)
            .clamp(MIN_SCAN_DELAY, MAX_SCAN_DELAY);

        let default_oscillator = env_u64("BITFURY_DEFAULT_OSC")
            .map(OscillatorSetting::saturating)
            .unwrap_or(defaults.default_oscillator);

        let status_interval =
            env_u64("BITFURY_STATUS_INTERVAL").unwrap_or(defaults.status_interval);

        Self {
            options,
            scan_delay,
            default_oscillator,
            status_interval,
        }
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 4] = [
        "BITFURY_OPTIONS",
        "BITFURY_SCAN_DELAY_MS",
        "BITFURY_DEFAULT_OSC",
        "BITFURY_STATUS_INTERVAL",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults_when_not_set() {
        clear_env();

        let config = DriverConfig::from_env();
        assert!(config.options.is_none());
        assert_eq!(config.scan_delay, Duration::from_millis(200));
        assert_eq!(config.default_oscillator.bits(), 54);
        assert_eq!(config.status_interval, 100);
    }

    #[test]
    #[serial]
    fn test_values_clamped_to_valid_range() {
        clear_env();

        // Lower bound: 10 -> 100
        std::env::set_var("BITFURY_SCAN_DELAY_MS", "10");
        assert_eq!(DriverConfig::from_env().scan_delay, MIN_SCAN_DELAY);

        // Upper bound: 5000 -> 1000
        std::env::set_var("BITFURY_SCAN_DELAY_MS", "5000");
        assert_eq!(DriverConfig::from_env().scan_delay, MAX_SCAN_DELAY);

        // Six oscillator bits: 99 -> 63
        std::env::set_var("BITFURY_DEFAULT_OSC", "99");
        assert_eq!(DriverConfig::from_env().default_oscillator.bits(), 63);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_options_parsed() {
        clear_env();

        std::env::set_var("BITFURY_OPTIONS", "ALL:50,2:60");
        let options = DriverConfig::from_env().options.expect("options set");
        assert_eq!(options.overrides.len(), 2);
        assert!(options.error.is_none());

        clear_env();
    }
}
