use std::path::{Path, PathBuf};

use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::physics_core::PhysicsSettings;

#[derive(Resource, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovementConfig {
    /// World units per tile.
    pub tile_size: f32,
    /// Sub-tile remainder (in tiles) still treated as aligned to an edge.
    pub edge_epsilon: f32,
    /// Remaining step distance (in tiles) treated as complete.
    pub step_epsilon: f32,
    /// Seconds per fixed simulation step.
    pub fixed_dt: f32,
    pub default_physics: PhysicsSettings,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            tile_size: 16.0,
            edge_epsilon: 0.01,
            step_epsilon: 1e-4,
            fixed_dt: 1.0 / 60.0,
            default_physics: PhysicsSettings::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid movement config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("tile_size must be positive, got {0}")]
    InvalidTileSize(f32),
}

impl MovementConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: MovementConfig = serde_json::from_str(json)?;
        if config.tile_size.is_nan() || config.tile_size <= 0.0 {
            return Err(ConfigError::InvalidTileSize(config.tile_size));
        }
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let body = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&body)
    }
}

pub fn config_path() -> PathBuf {
    std::env::var("AXIOM_MOVEMENT_CONFIG")
        .ok()
        .map(PathBuf::from)
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from("movement.json"))
}

/// Load the config from [`config_path`]. A missing file yields defaults; a
/// broken one yields defaults and a warning.
pub fn load_movement_config() -> MovementConfig {
    let path = config_path();
    if !path.exists() {
        debug!("[Axiom movement] No config at {}, using defaults", path.display());
        return MovementConfig::default();
    }
    match MovementConfig::from_path(&path) {
        Ok(config) => {
            info!("[Axiom movement] Loaded config from {}", path.display());
            config
        }
        Err(e) => {
            warn!("[Axiom movement] {e}; using defaults");
            MovementConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = MovementConfig::from_json(r#"{ "tile_size": 8.0 }"#).unwrap();
        assert_eq!(config.tile_size, 8.0);
        assert_eq!(config.edge_epsilon, MovementConfig::default().edge_epsilon);
        assert_eq!(config.default_physics, PhysicsSettings::default());
    }

    #[test]
    fn bad_config_is_rejected() {
        assert!(matches!(
            MovementConfig::from_json(r#"{ "tile_size": 0.0 }"#),
            Err(ConfigError::InvalidTileSize(_))
        ));
        assert!(matches!(
            MovementConfig::from_json("{ not json"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            MovementConfig::from_path(Path::new("/nonexistent/movement.json")),
            Err(ConfigError::Io { .. })
        ));
    }
}
