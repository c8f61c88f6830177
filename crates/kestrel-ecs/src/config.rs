//! Per-world configuration.

use serde::{Deserialize, Serialize};

/// Settings a [`World`](crate::world::World) is built with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Seed for instance UUID generation. `None` draws from OS entropy.
    pub uuid_seed: Option<u64>,
    /// Threads in the worker pool used by `par_map`. `0` shares rayon's
    /// global pool.
    pub worker_threads: usize,
}

impl WorldConfig {
    /// Deterministic configuration for tests and replays.
    pub fn seeded(seed: u64) -> Self {
        Self {
            uuid_seed: Some(seed),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config: WorldConfig = serde_json::from_str(r#"{"uuid_seed": 9}"#).unwrap();
        assert_eq!(config.uuid_seed, Some(9));
        assert_eq!(config.worker_threads, 0);
        assert_eq!(serde_json::from_str::<WorldConfig>("{}").unwrap(), WorldConfig::default());
    }
}
