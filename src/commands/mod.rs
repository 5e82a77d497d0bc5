// ABOUTME: Command implementations behind the CLI subcommands
// ABOUTME: Exports reconcile, check_connections and status plus their shared settings

pub mod check_connections;
pub mod reconcile;
pub mod status;

pub use check_connections::check_connections;
pub use reconcile::reconcile;
pub use status::status;

use anyhow::{Context, Result};

use crate::config::{CentralConfig, FileConfig, PlantDirectory, ReconcileConfig};
use crate::remote::MysqlRemoteSource;
use crate::store::MysqlCentralStore;

/// Everything a command needs, assembled once from CLI flags, environment and config file.
#[derive(Debug, Clone)]
pub struct Settings {
    pub central: CentralConfig,
    pub engine: ReconcileConfig,
    pub file: FileConfig,
}

impl Settings {
    pub fn new(central: CentralConfig, mut engine: ReconcileConfig, file: FileConfig) -> Self {
        if let Some(patterns) = file.patterns() {
            engine.patterns = patterns;
        }
        Self {
            central,
            engine,
            file,
        }
    }

    pub async fn connect_central(&self) -> Result<MysqlCentralStore> {
        MysqlCentralStore::connect(&self.central, self.file.columns(), self.file.sinks())
            .await
            .context("Failed to connect to the central store")
    }

    /// Plant profiles from `HOST_<id>` variables, overridden by the config file.
    pub fn remote_source(&self) -> Result<MysqlRemoteSource> {
        let mut plants = PlantDirectory::from_env();
        plants.merge(self.file.plant_profiles()?);
        if plants.is_empty() {
            tracing::warn!("No plant connection profiles configured; every stale table will be flagged");
        } else {
            tracing::debug!("Loaded {} plant connection profiles", plants.len());
        }
        Ok(MysqlRemoteSource::new(
            plants,
            self.file.routing_table(),
            self.file.timeouts(),
            self.file.columns().remote_measurement,
        ))
    }
}
