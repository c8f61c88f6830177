//! Engine configuration loaded from JSON.
//!
//! Every field has a default, so a config file only needs the settings it
//! changes:
//!
//! ```json
//! { "fixed_dt": 0.02, "world": { "worker_threads": 4 } }
//! ```

use std::path::Path;

use anyhow::Context;
use kestrel_ecs::config::WorldConfig;
use serde::{Deserialize, Serialize};

/// Errors from parsing or validating an [`EngineConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("fixed_dt must be positive and finite, got {0}")]
    InvalidFixedDt(f64),

    #[error("max_steps_per_frame must be at least 1")]
    ZeroStepBudget,

    #[error("malformed engine config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Settings for a [`StepLoop`](crate::step::StepLoop) and the world it owns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Seconds per `FixedUpdate` step.
    pub fixed_dt: f64,
    /// Upper bound on fixed steps run by one frame. Time beyond it is
    /// dropped so a long stall does not snowball into longer frames.
    pub max_steps_per_frame: u32,
    /// `tracing` filter used when `RUST_LOG` is unset.
    pub log_filter: String,
    pub world: WorldConfig,
}

impl Default for EngineConfig {
    /// 60 Hz, at most 5 fixed steps per frame, `info` logging.
    fn default() -> Self {
        Self {
            fixed_dt: 1.0 / 60.0,
            max_steps_per_frame: 5,
            log_filter: "info".to_owned(),
            world: WorldConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.fixed_dt > 0.0 && self.fixed_dt.is_finite()) {
            return Err(ConfigError::InvalidFixedDt(self.fixed_dt));
        }
        if self.max_steps_per_frame == 0 {
            return Err(ConfigError::ZeroStepBudget);
        }
        Ok(())
    }

    /// Parse and validate a JSON config.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config {}", path.display()))?;
        let config = Self::from_json_str(&text)
            .with_context(|| format!("invalid engine config {}", path.display()))?;
        tracing::debug!(path = %path.display(), fixed_dt = config.fixed_dt, "engine config loaded");
        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
