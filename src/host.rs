//! The host a command runs against: backend, providers and backup store

use crate::config::AppConfig;
use crate::privilege::ElevationCheck;
use crate::provider::build_registry;
use anyhow::{Context, Result};
use declarative::{BackupStore, ProviderRegistry, RunOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use winkit::{Backend, MemoryBackend};

/// Open the backup store named by the settings
pub fn open_backups(config: &AppConfig) -> Result<BackupStore> {
    let root = config.backup_dir()?;
    BackupStore::open(&root)
        .with_context(|| format!("Could not open backup store at {}", root.display()))
}

pub struct Host {
    backend: Arc<dyn Backend>,
    /// Simulated host and the state file it is written back to
    simulated: Option<(Arc<MemoryBackend>, PathBuf)>,
    providers: ProviderRegistry,
    backups: BackupStore,
    options: RunOptions,
}

impl Host {
    /// Connect to the local machine, or to a simulated host kept in a
    /// JSON state file when `simulate` is given.
    pub fn connect(config: &AppConfig, simulate: Option<&Path>) -> Result<Self> {
        let mut simulated = None;
        let backend: Arc<dyn Backend> = match simulate {
            Some(path) => {
                let memory = Arc::new(MemoryBackend::load(path).with_context(|| {
                    format!("Could not load simulated host from {}", path.display())
                })?);
                log::info!("Simulating host from {}", path.display());
                simulated = Some((Arc::clone(&memory), path.to_path_buf()));
                memory
            }
            None => Arc::new(winkit::backend::default_backend().context(
                "PowerShell is not available; use --simulate <state.json> to run against a simulated host",
            )?),
        };

        Ok(Self {
            providers: build_registry(Arc::clone(&backend)),
            backend,
            simulated,
            backups: open_backups(config)?,
            options: config.run_options()?,
        })
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub fn backups(&self) -> &BackupStore {
        &self.backups
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub fn privileges(&self) -> ElevationCheck<'_> {
        ElevationCheck::new(self.backend.as_ref())
    }

    pub fn is_simulated(&self) -> bool {
        self.simulated.is_some()
    }

    /// Write a simulated host back to its state file; no-op otherwise
    pub fn save(&self) -> Result<()> {
        if let Some((memory, path)) = &self.simulated {
            memory
                .save(path)
                .with_context(|| format!("Could not save simulated host to {}", path.display()))?;
            log::debug!("Saved simulated host to {}", path.display());
        }
        Ok(())
    }
}
