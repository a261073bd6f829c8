use crate::primitives::bytes::ByteCount;

/// Format type of a partition table.
pub const FORMAT_DISKLABEL: &str = "disklabel";

/// Format type of an LVM physical volume.
pub const FORMAT_LVM_PV: &str = "lvmpv";

/// Disk label type used when none is requested.
pub const DEFAULT_DISKLABEL_TYPE: &str = "gpt";

/// File system type used when a volume does not name one.
pub const DEFAULT_FS_TYPE: &str = "xfs";

/// Mount options used when a volume does not name any.
pub const DEFAULT_MOUNT_OPTIONS: &str = "defaults";

/// Size requested for new partitions before the layout pass grows them.
pub const PARTITION_PLACEHOLDER_SIZE: ByteCount = ByteCount(256 << 20);

/// Prefix of a UUID based fstab device spec.
pub const FSTAB_UUID_PREFIX: &str = "UUID=";

/// Prefix of a label based fstab device spec.
pub const FSTAB_LABEL_PREFIX: &str = "LABEL=";
