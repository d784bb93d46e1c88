use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{effects::SessionId, Result, SoundEngineError};

/// Top-level configuration structure for the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
}

impl AppConfig {
    /// Parses a JSON document. Missing fields fall back to their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.engine.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }
}

/// Timing and session settings for the enhancement loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Audio session the effect chain is attached to. `0` is the global
    /// output mix.
    pub session_id: SessionId,
    pub tick_interval_ms: u64,
    pub settle_delay_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            session_id: SessionId::OUTPUT_MIX,
            tick_interval_ms: 500,
            settle_delay_ms: 1000,
        }
    }
}

impl EngineConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_ms == 0 {
            return Err(SoundEngineError::InvalidConfig(
                "tick_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.settle_delay_ms == 0 {
            return Err(SoundEngineError::InvalidConfig(
                "settle_delay_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
