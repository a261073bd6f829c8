use std::{fs, path::Path};

use log::{debug, info};

use blockstack_api::{
    config::{ReconcileOptions, StorageConfiguration},
    error::{BlockstackError, InvalidInputError, ReportError},
    status::Report,
};
use devgraph::{snapshot::DeviceSnapshot, DeviceGraph, MemoryDeviceGraph};

pub mod cli;
pub mod engine;

pub const BLOCKSTACK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// A storage configuration, ready to be reconciled against a device graph.
pub struct Blockstack {
    configuration: StorageConfiguration,
}

impl Blockstack {
    pub fn new(configuration: StorageConfiguration) -> Self {
        Self { configuration }
    }

    /// Load the storage configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self, BlockstackError> {
        debug!("Loading storage configuration from '{}'", path.display());
        let contents =
            fs::read_to_string(path).structured(InvalidInputError::LoadConfiguration {
                path: path.to_string_lossy().to_string(),
            })?;

        Ok(Self::new(StorageConfiguration::from_yaml(&contents)?))
    }

    pub fn configuration(&self) -> &StorageConfiguration {
        &self.configuration
    }

    /// Check that every pool and volume declares a supported type.
    pub fn validate(&self) -> Result<(), BlockstackError> {
        self.configuration.validate()?;
        info!(
            "Configuration is valid: {} pool(s), {} standalone volume(s)",
            self.configuration.pools.len(),
            self.configuration.volumes.len()
        );
        Ok(())
    }

    /// Reconcile the configuration against `graph` and report the outcome.
    pub fn reconcile(
        &self,
        graph: &mut dyn DeviceGraph,
        options: &ReconcileOptions,
    ) -> Result<Report, BlockstackError> {
        self.configuration.validate()?;
        engine::reconcile(
            graph,
            self.configuration.pools.clone(),
            self.configuration.volumes.clone(),
            options,
        )
    }
}

/// Build an in-memory device graph from a snapshot file, optionally taking
/// the mount table from a separate fstab file.
pub fn load_device_graph(
    devices: &Path,
    fstab: Option<&Path>,
) -> Result<MemoryDeviceGraph, BlockstackError> {
    let snapshot = DeviceSnapshot::load(devices).structured(InvalidInputError::LoadDeviceSnapshot {
        path: devices.to_string_lossy().to_string(),
    })?;
    let mut graph = MemoryDeviceGraph::from_snapshot(&snapshot)
        .structured(InvalidInputError::ParseDeviceSnapshot)?;

    if let Some(fstab) = fstab {
        let contents = fs::read_to_string(fstab).structured(InvalidInputError::LoadMountTable {
            path: fstab.to_string_lossy().to_string(),
        })?;
        graph.set_mount_table(&contents);
    }

    debug!(
        "Loaded {} device(s) from '{}'",
        snapshot.devices.len(),
        devices.display()
    );
    Ok(graph)
}
