use std::{path::PathBuf, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize};
use strum_macros::{Display, EnumString, IntoStaticStr};

use crate::{
    constants::{DEFAULT_FS_TYPE, DEFAULT_MOUNT_OPTIONS},
    error::{BlockstackError, InvalidInputError, ReportError},
    is_default,
    primitives::bytes::{self, ByteCount},
};

/// The desired storage topology of a host: pools with the volumes carved out
/// of them, plus standalone volumes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StorageConfiguration {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pools: Vec<DesiredPool>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<DesiredVolume>,

    /// Disk label type for new partition tables. Any existing label is
    /// accepted when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disklabel_type: Option<String>,

    /// Whether LVM pools place their physical volumes on partitions rather
    /// than on whole disks.
    #[serde(default = "default_true")]
    pub use_partitions: bool,
}

impl Default for StorageConfiguration {
    fn default() -> Self {
        Self {
            pools: Vec::new(),
            volumes: Vec::new(),
            disklabel_type: None,
            use_partitions: true,
        }
    }
}

impl StorageConfiguration {
    pub fn from_yaml(contents: &str) -> Result<Self, BlockstackError> {
        serde_yaml::from_str(contents).structured(InvalidInputError::ParseConfiguration)
    }

    /// Build the engine options carried by this configuration.
    pub fn options(&self, dry_run: bool) -> ReconcileOptions {
        ReconcileOptions {
            disklabel_type: self.disklabel_type.clone(),
            use_partitions: self.use_partitions,
            dry_run,
        }
    }

    /// Check that every pool and volume carries a supported type.
    pub fn validate(&self) -> Result<(), BlockstackError> {
        for pool in &self.pools {
            let pool_kind = pool.kind()?;
            for volume in &pool.volumes {
                volume.kind(Some(pool_kind))?;
            }
        }

        for volume in &self.volumes {
            volume.kind(None)?;
        }

        Ok(())
    }
}

/// Options threaded through a single reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOptions {
    pub disklabel_type: Option<String>,
    pub use_partitions: bool,
    pub dry_run: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            disklabel_type: None,
            use_partitions: true,
            dry_run: false,
        }
    }
}

/// Whether an entity should exist after reconciliation.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EntityState {
    #[default]
    Present,
    Absent,
}

/// Supported pool types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, IntoStaticStr, Display)]
#[strum(serialize_all = "lowercase")]
pub enum PoolKind {
    /// A partition table spanning the pool's first disk.
    Disk,
    /// An LVM volume group built from the pool's disks.
    Lvm,
}

/// Supported volume types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, IntoStaticStr, Display)]
#[strum(serialize_all = "lowercase")]
pub enum VolumeKind {
    /// A whole disk.
    Disk,
    /// A partition of a disk pool.
    Partition,
    /// A logical volume of an LVM pool.
    Lvm,
}

impl From<PoolKind> for VolumeKind {
    fn from(kind: PoolKind) -> Self {
        match kind {
            PoolKind::Disk => VolumeKind::Partition,
            PoolKind::Lvm => VolumeKind::Lvm,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DesiredPool {
    pub name: String,

    /// Pool type, see [`PoolKind`].
    #[serde(rename = "type", default = "default_pool_kind")]
    pub kind: String,

    /// Member disks, as names, paths or fstab-style specs.
    #[serde(default)]
    pub disks: Vec<String>,

    #[serde(default)]
    pub volumes: Vec<DesiredVolume>,

    #[serde(default)]
    pub state: EntityState,
}

impl DesiredPool {
    pub fn kind(&self) -> Result<PoolKind, BlockstackError> {
        PoolKind::from_str(&self.kind).structured(InvalidInputError::UnknownKind {
            entity: "Pool",
            name: self.name.clone(),
            kind: self.kind.clone(),
        })
    }

    pub fn ultimately_present(&self) -> bool {
        self.state == EntityState::Present
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DesiredVolume {
    pub name: String,

    /// Name of the pool a standalone volume is carved out of.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool: Option<String>,

    /// Backing disks of a disk volume.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disks: Vec<String>,

    /// Volume type, see [`VolumeKind`]. Defaults to the pool's type, or to
    /// `disk` for standalone volumes.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, with = "bytes::optional", skip_serializing_if = "Option::is_none")]
    pub size: Option<ByteCount>,

    #[serde(default = "default_fs_type")]
    pub fs_type: String,

    #[serde(default)]
    pub fs_label: String,

    #[serde(default)]
    pub fs_create_options: String,

    #[serde(default, deserialize_with = "empty_as_none")]
    pub mount_point: Option<PathBuf>,

    #[serde(default = "default_mount_options")]
    pub mount_options: String,

    #[serde(default)]
    pub mount_check: u32,

    #[serde(default)]
    pub mount_passno: u32,

    #[serde(default)]
    pub state: EntityState,

    /// Path of the device backing this volume, set by reconciliation.
    #[serde(rename = "_device", default, skip_serializing_if = "is_default")]
    pub device: Option<String>,

    /// fstab-style spec of the device backing this volume, set by
    /// reconciliation.
    #[serde(rename = "_mount_id", default, skip_serializing_if = "is_default")]
    pub mount_id: Option<String>,
}

impl DesiredVolume {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pool: None,
            disks: Vec::new(),
            kind: None,
            size: None,
            fs_type: default_fs_type(),
            fs_label: String::new(),
            fs_create_options: String::new(),
            mount_point: None,
            mount_options: default_mount_options(),
            mount_check: 0,
            mount_passno: 0,
            state: EntityState::Present,
            device: None,
            mount_id: None,
        }
    }

    /// Resolve the volume type, falling back to the owning pool's type.
    pub fn kind(&self, pool_kind: Option<PoolKind>) -> Result<VolumeKind, BlockstackError> {
        match (&self.kind, pool_kind) {
            (Some(kind), _) => {
                VolumeKind::from_str(kind).structured(InvalidInputError::UnknownKind {
                    entity: "Volume",
                    name: self.name.clone(),
                    kind: kind.clone(),
                })
            }
            (None, Some(pool_kind)) => Ok(pool_kind.into()),
            (None, None) => Ok(VolumeKind::Disk),
        }
    }

    /// A volume never outlives its pool.
    pub fn ultimately_present(&self, pool: Option<&DesiredPool>) -> bool {
        self.state == EntityState::Present && pool.map_or(true, DesiredPool::ultimately_present)
    }
}

fn default_true() -> bool {
    true
}

fn default_pool_kind() -> String {
    <&str>::from(PoolKind::Lvm).to_owned()
}

fn default_fs_type() -> String {
    DEFAULT_FS_TYPE.to_owned()
}

fn default_mount_options() -> String {
    DEFAULT_MOUNT_OPTIONS.to_owned()
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<PathBuf>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value
        .filter(|path| !path.trim().is_empty())
        .map(PathBuf::from))
}
