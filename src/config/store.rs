use arc_swap::ArcSwap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use super::AppConfig;
use crate::error::{AppError, Result};

/// Configuration store backed by an optional TOML file
///
/// Reads go through `ArcSwap` and never block. New sessions pick up the
/// configuration current at the time they start.
#[derive(Clone)]
pub struct ConfigStore {
    path: Option<PathBuf>,
    cache: Arc<ArcSwap<AppConfig>>,
}

impl ConfigStore {
    /// Wrap an in-memory configuration
    pub fn new(config: AppConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            path: None,
            cache: Arc::new(ArcSwap::from_pointee(config)),
        })
    }

    /// Load from a TOML file; a missing file yields the defaults
    pub async fn load(path: &Path) -> Result<Self> {
        let config = match tokio::fs::read_to_string(path).await {
            Ok(text) => Self::parse(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("Config file {} not found, using defaults", path.display());
                AppConfig::default()
            }
            Err(e) => return Err(e.into()),
        };

        let mut store = Self::new(config)?;
        store.path = Some(path.to_path_buf());
        info!("Configuration loaded from {}", path.display());
        Ok(store)
    }

    fn parse(text: &str) -> Result<AppConfig> {
        toml::from_str(text).map_err(|e| AppError::Config(format!("Invalid config file: {}", e)))
    }

    /// Get current configuration
    pub fn get(&self) -> Arc<AppConfig> {
        self.cache.load_full()
    }

    /// File the configuration came from
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Replace the configuration
    pub fn set(&self, config: AppConfig) -> Result<()> {
        config.validate()?;
        self.cache.store(Arc::new(config));
        Ok(())
    }

    /// Update the configuration with a closure
    ///
    /// The result is validated before it becomes visible.
    pub fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut AppConfig),
    {
        let mut config = (*self.get()).clone();
        f(&mut config);
        self.set(config)
    }
}
