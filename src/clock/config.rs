//! Clock configuration accepted at construction.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// How a late recurring timer skips the occurrences it missed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DroppedCyclePolicy {
    /// Counts every whole millisecond of overshoot as one dropped cycle.
    /// With accrual on, any lag pushes the next occurrence out by a full
    /// period per millisecond late.
    #[default]
    Absolute,
    /// Counts dropped cycles in units of the timer's period.
    PeriodScaled,
}

/// Virtual clock parameters. All times are in milliseconds.
///
/// | Field                | Unit | Description                                      | Default    |
/// |----------------------|------|--------------------------------------------------|------------|
/// | time                 | ms   | Initial virtual time                             | 0          |
/// | accrue_real_time     | bool | Add elapsed real time to virtual time on `now()` | true       |
/// | dropped_cycle_policy | enum | `absolute` or `period_scaled`                    | `absolute` |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockConfig {
    /// Initial virtual time in ms
    #[serde(default)]
    pub time: u64,
    /// Whether reading the clock adds the real time elapsed since the last read
    #[serde(default = "ClockConfig::default_accrue_real_time")]
    pub accrue_real_time: bool,
    #[serde(default)]
    pub dropped_cycle_policy: DroppedCyclePolicy,
}

impl ClockConfig {
    /// Load clock config from the file path in `CONFIG_FILE` env var.
    pub fn from_env() -> Result<Self, ConfigError> {
        let path = std::env::var("CONFIG_FILE")
            .map_err(|_| ConfigError::Message("CONFIG_FILE environment variable not set".into()))?;
        Self::from_file(&path)
    }

    /// Load clock config from a TOML file. Supports:
    /// - Files with a `[clock]` section
    /// - Flat files with `time`, `accrue_real_time`, `dropped_cycle_policy` at root
    ///
    /// Environment variables `VIRTUAL_TIME_CLOCK_TIME`, `VIRTUAL_TIME_CLOCK_ACCRUE_REAL_TIME`,
    /// `VIRTUAL_TIME_CLOCK_DROPPED_CYCLE_POLICY` override file values.
    pub fn from_file(config_file: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(config_file))
            .add_source(Environment::with_prefix("VIRTUAL_TIME_CLOCK").try_parsing(true))
            .build()?;
        config.get("clock").or_else(|_| config.try_deserialize())
    }

    /// Config starting at `time` with accrual switched off, so virtual time
    /// moves only when timers fire.
    pub fn frozen_at(time: u64) -> Self {
        Self {
            time,
            accrue_real_time: false,
            ..Self::default()
        }
    }

    fn default_accrue_real_time() -> bool {
        true
    }
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            time: 0,
            accrue_real_time: Self::default_accrue_real_time(),
            dropped_cycle_policy: DroppedCyclePolicy::default(),
        }
    }
}
