use std::path::PathBuf;

use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, IntoStaticStr};

use blockstack_api::{
    constants::{FORMAT_DISKLABEL, FORMAT_LVM_PV, FSTAB_UUID_PREFIX},
    primitives::bytes::ByteCount,
};

/// Handle to a device owned by a [`crate::DeviceGraph`].
///
/// Handles stay valid for the lifetime of the graph that issued them, even
/// after the device is scheduled for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub(crate) NodeIndex);

/// Structural type of a device.
#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DeviceKind {
    Disk,
    Partition,
    LvmVg,
    LvmLv,
}

/// A live device, as seen through the graph after all scheduled changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub name: String,
    pub path: PathBuf,
    pub kind: DeviceKind,
    pub size: ByteCount,
    /// Whether the device exists on storage, as opposed to being scheduled
    /// for creation.
    pub exists: bool,
    pub resizable: bool,
    pub format: Format,
}

impl Device {
    pub fn is_disk(&self) -> bool {
        self.kind == DeviceKind::Disk
    }

    /// Whether a partition table can be written to this device.
    pub fn partitionable(&self) -> bool {
        self.is_disk()
    }

    /// The stable identifier to use for this device in a mount table.
    pub fn fstab_spec(&self) -> String {
        match self.format.uuid {
            Some(ref uuid) => format!("{FSTAB_UUID_PREFIX}{uuid}"),
            None => self.path.to_string_lossy().to_string(),
        }
    }
}

/// The format currently carried by a device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Format {
    /// Format type; `None` for an unformatted device.
    pub fs_type: Option<String>,
    pub exists: bool,
    /// Whether the format is in use, e.g. a mounted file system.
    pub active: bool,
    pub uuid: Option<String>,
    pub label: Option<String>,
    /// Partition table type, for disk labels only.
    pub label_type: Option<String>,
    pub create_options: Option<String>,
    pub mount_point: Option<PathBuf>,
}

impl Format {
    pub fn is_disklabel(&self) -> bool {
        self.fs_type.as_deref() == Some(FORMAT_DISKLABEL)
    }

    /// Whether the format can be resized along with its device.
    pub fn resizable(&self) -> bool {
        self.exists
            && matches!(
                self.fs_type.as_deref(),
                Some("ext2" | "ext3" | "ext4" | "btrfs" | "ntfs" | FORMAT_LVM_PV)
            )
    }

    /// Whether the format holds data of its own (as opposed to a partition
    /// table or an LVM member).
    pub fn is_filesystem(&self) -> bool {
        self.fs_type
            .as_deref()
            .is_some_and(|t| t != FORMAT_DISKLABEL && t != FORMAT_LVM_PV)
    }
}

impl From<FormatSpec> for Format {
    fn from(spec: FormatSpec) -> Self {
        Format {
            fs_type: spec.fs_type,
            exists: false,
            active: false,
            uuid: None,
            label: spec.label,
            label_type: spec.label_type,
            create_options: spec.create_options,
            mount_point: spec.mount_point,
        }
    }
}

/// Name of partition `number` of `disk`, following the kernel's convention of
/// inserting a `p` after disk names that end in a digit.
pub fn partition_name(disk: &str, number: usize) -> String {
    if disk.ends_with(|c: char| c.is_ascii_digit()) {
        format!("{disk}p{number}")
    } else {
        format!("{disk}{number}")
    }
}

/// Description of a format to write to a device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormatSpec {
    pub fs_type: Option<String>,
    pub label: Option<String>,
    pub label_type: Option<String>,
    pub create_options: Option<String>,
    pub mount_point: Option<PathBuf>,
}

impl FormatSpec {
    pub fn filesystem(fs_type: impl Into<String>) -> Self {
        Self {
            fs_type: Some(fs_type.into()),
            ..Default::default()
        }
    }

    pub fn disklabel(label_type: impl Into<String>) -> Self {
        Self {
            fs_type: Some(FORMAT_DISKLABEL.into()),
            label_type: Some(label_type.into()),
            ..Default::default()
        }
    }

    pub fn lvm_pv() -> Self {
        Self::filesystem(FORMAT_LVM_PV)
    }

    pub fn with_label(mut self, label: Option<String>) -> Self {
        self.label = label;
        self
    }

    pub fn with_create_options(mut self, options: Option<String>) -> Self {
        self.create_options = options;
        self
    }

    pub fn with_mount_point(mut self, mount_point: Option<PathBuf>) -> Self {
        self.mount_point = mount_point;
        self
    }
}

/// A device to schedule for creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NewDevice {
    /// A partition whose final geometry is assigned by the layout pass.
    Partition {
        parent: DeviceId,
        /// Partition number to create under; the next free number when unset.
        number: Option<usize>,
        size: ByteCount,
        grow: bool,
        max_size: Option<ByteCount>,
        format: Option<FormatSpec>,
    },
    LogicalVolume {
        name: String,
        volume_group: DeviceId,
        size: ByteCount,
        format: Option<FormatSpec>,
    },
    VolumeGroup {
        name: String,
        members: Vec<DeviceId>,
    },
}

impl NewDevice {
    /// Name used to refer to the request before the device exists.
    pub fn describe(&self) -> String {
        match self {
            NewDevice::Partition { size, .. } => format!("partition of {size}"),
            NewDevice::LogicalVolume { name, .. } => format!("logical volume '{name}'"),
            NewDevice::VolumeGroup { name, .. } => format!("volume group '{name}'"),
        }
    }
}
