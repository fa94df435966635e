//! # Engine Configuration
//!
//! ```toml
//! tick_rate = 20
//! late_tick_warning = true
//!
//! [sync]
//! id_reservation = 64
//! spare_buffers = 2
//! ```

use crate::error::{EngineError, EngineResult};
use serde::Deserialize;
use std::path::Path;
use strata_persist::SyncConfig;

/// Engine settings. Every field is optional in the file.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Ticks per second.
    pub tick_rate: u32,
    /// Log a warning when a tick overruns its budget.
    pub late_tick_warning: bool,
    /// Synchronizer tuning.
    pub sync: SyncConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_rate: 20,
            late_tick_warning: true,
            sync: SyncConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parses a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] on malformed TOML or invalid values.
    pub fn from_toml_str(text: &str) -> EngineResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Rejects values the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] for a zero tick rate or an invalid
    /// `[sync]` table.
    pub fn validate(&self) -> EngineResult<()> {
        if self.tick_rate == 0 {
            return Err(EngineError::Config("tick_rate must be at least 1".into()));
        }
        self.sync
            .validate()
            .map_err(|e| EngineError::Config(e.to_string()))
    }
}
