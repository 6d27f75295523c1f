//! Engine configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Target simulation frequency; informational for the host's
    /// scheduler.
    pub tick_rate_hz: u32,
    /// Lag-spike clamp: no single tick simulates more than this.
    pub max_delta_secs: f64,
    pub autosave_interval_secs: f64,
    pub debug_logging: bool,
    /// Prefix for every storage key this engine instance touches.
    pub save_namespace: String,
    /// Semantic version recorded in save metadata.
    pub game_version: String,
    /// Fraction of normal production granted for away time.
    pub offline_efficiency: f64,
    /// Away time beyond this earns nothing.
    pub max_offline_secs: f64,
    /// Base click power before upgrades.
    pub base_click_power: f64,
}

impl Default for GameConfig {
    fn default() -> Self {
        GameConfig {
            tick_rate_hz: 10,
            max_delta_secs: 1.0,
            autosave_interval_secs: 30.0,
            debug_logging: false,
            save_namespace: "pixelfall".to_string(),
            game_version: "0.1.0".to_string(),
            offline_efficiency: 0.5,
            max_offline_secs: 8.0 * 3600.0,
            base_click_power: 1.0,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("tick rate must be positive")]
    ZeroTickRate,
    #[error("max delta must be positive, got {0}")]
    NonPositiveMaxDelta(f64),
    #[error("autosave interval must be positive, got {0}")]
    NonPositiveAutosave(f64),
    #[error("offline efficiency {0} outside [0, 1]")]
    OfflineEfficiencyOutOfRange(f64),
    #[error("save namespace must not be empty")]
    EmptyNamespace,
}

impl GameConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate_hz == 0 {
            return Err(ConfigError::ZeroTickRate);
        }
        if self.max_delta_secs <= 0.0 {
            return Err(ConfigError::NonPositiveMaxDelta(self.max_delta_secs));
        }
        if self.autosave_interval_secs <= 0.0 {
            return Err(ConfigError::NonPositiveAutosave(self.autosave_interval_secs));
        }
        if !(0.0..=1.0).contains(&self.offline_efficiency) {
            return Err(ConfigError::OfflineEfficiencyOutOfRange(
                self.offline_efficiency,
            ));
        }
        if self.save_namespace.is_empty() {
            return Err(ConfigError::EmptyNamespace);
        }
        Ok(())
    }

    /// Storage key under this configuration's namespace.
    pub fn storage_key(&self, suffix: &str) -> String {
        format!("{}:{suffix}", self.save_namespace)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
