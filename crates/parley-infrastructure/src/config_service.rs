//! Configuration service implementation.
//!
//! Loads the engine configuration from `config.toml` in the Parley config
//! directory and caches it.

use crate::paths::ParleyPaths;
use crate::storage::atomic_file::AtomicFile;
use parley_core::config::EngineConfig;
use parley_core::error::{ParleyError, Result};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Configuration service that loads and caches the engine configuration.
#[derive(Debug, Clone)]
pub struct ConfigService {
    paths: ParleyPaths,
    config: Arc<RwLock<Option<EngineConfig>>>,
}

impl ConfigService {
    /// Creates a new ConfigService.
    ///
    /// The configuration is loaded lazily on first access.
    pub fn new(paths: ParleyPaths) -> Self {
        Self {
            paths,
            config: Arc::new(RwLock::new(None)),
        }
    }

    /// Gets the configuration, loading from file if not cached.
    ///
    /// A missing file is created with defaults. An unreadable file falls
    /// back to defaults with a warning so the engine can still start.
    pub fn get_config(&self) -> EngineConfig {
        {
            let read_lock = self.config.read().unwrap_or_else(|e| e.into_inner());
            if let Some(ref cached) = *read_lock {
                return cached.clone();
            }
        }

        let loaded = match self.paths.config_file() {
            Ok(path) => Self::load_or_create(&path).unwrap_or_else(|e| {
                tracing::warn!("[Config] Falling back to defaults: {}", e);
                EngineConfig::default()
            }),
            Err(e) => {
                tracing::warn!("[Config] No config directory ({}), using defaults", e);
                EngineConfig::default()
            }
        };

        {
            let mut write_lock = self.config.write().unwrap_or_else(|e| e.into_inner());
            *write_lock = Some(loaded.clone());
        }

        loaded
    }

    /// Invalidates the cache, forcing a reload on next access.
    pub fn invalidate_cache(&self) {
        let mut write_lock = self.config.write().unwrap_or_else(|e| e.into_inner());
        *write_lock = None;
    }

    pub fn config_path(&self) -> Option<PathBuf> {
        self.paths.config_file().ok()
    }

    /// Reads `path`, writing a default file first when it does not exist.
    pub fn load_or_create(path: &Path) -> Result<EngineConfig> {
        let file = AtomicFile::new(path.to_path_buf());
        let content = file
            .load()
            .map_err(|e| ParleyError::config(format!("{}: {}", path.display(), e)))?;

        match content {
            Some(content) => EngineConfig::from_toml_str(&content),
            None => {
                let config = EngineConfig::default();
                let rendered = toml::to_string_pretty(&config).map_err(|e| {
                    ParleyError::Serialization {
                        format: "TOML".to_string(),
                        message: e.to_string(),
                    }
                })?;
                file.save(&rendered)
                    .map_err(|e| ParleyError::config(format!("{}: {}", path.display(), e)))?;
                tracing::info!("[Config] Wrote default config to {}", path.display());
                Ok(config)
            }
        }
    }
}

impl Default for ConfigService {
    fn default() -> Self {
        Self::new(ParleyPaths::default())
    }
}
