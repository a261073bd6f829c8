use std::path::{Path, PathBuf};

use anyhow::{Context, Error};
use serde::{Deserialize, Serialize};

use blockstack_api::primitives::bytes::ByteCount;

use crate::device::DeviceKind;

/// A serializable picture of a device graph, used to seed a
/// [`crate::MemoryDeviceGraph`] and to save its state.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DeviceSnapshot {
    /// Devices, each listed after its parents.
    #[serde(default)]
    pub devices: Vec<SnapshotDevice>,

    /// Contents of the persisted mount table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fstab: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SnapshotDevice {
    pub name: String,

    pub kind: DeviceKind,

    /// Size of the device. Volume groups default to the sum of their
    /// members.
    #[serde(default)]
    pub size: ByteCount,

    /// Names of the devices this one is built on.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<String>,

    /// Defaults to `/dev/<name>`, or `/dev/mapper/<name>` for logical
    /// volumes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<SnapshotFormat>,

    /// Defaults to true for partitions and logical volumes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resizable: Option<bool>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SnapshotFormat {
    #[serde(rename = "type")]
    pub fs_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_type: Option<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub mounted: bool,
}

impl DeviceSnapshot {
    pub fn from_yaml(contents: &str) -> Result<Self, Error> {
        serde_yaml::from_str(contents).context("Failed to parse device snapshot")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read {}", path.as_ref().display()))?;
        Self::from_yaml(&contents)
    }
}

impl SnapshotDevice {
    pub fn default_path(&self) -> PathBuf {
        match self.kind {
            DeviceKind::LvmLv => PathBuf::from("/dev/mapper").join(&self.name),
            _ => PathBuf::from("/dev").join(&self.name),
        }
    }

    pub fn default_resizable(&self) -> bool {
        matches!(self.kind, DeviceKind::Partition | DeviceKind::LvmLv)
    }
}
