//! # Synchronizer Configuration
//!
//! Loaded once at startup, usually as the `[sync]` table of the engine
//! configuration.

use crate::error::{SyncError, SyncResult};
use serde::Deserialize;

/// Tuning for the entity mapper and the buffer pool.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Persisted IDs reserved per next-ID query.
    pub id_reservation: u32,
    /// Idle back buffers kept for reuse.
    pub spare_buffers: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            id_reservation: 64,
            spare_buffers: 2,
        }
    }
}

impl SyncConfig {
    /// Parses a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] on malformed TOML or invalid values.
    pub fn from_toml_str(text: &str) -> SyncResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| SyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the synchronizer cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if `id_reservation` is zero.
    pub fn validate(&self) -> SyncResult<()> {
        if self.id_reservation == 0 {
            return Err(SyncError::Config("id_reservation must be at least 1".into()));
        }
        Ok(())
    }
}
