use std::{collections::BTreeMap, path::PathBuf};

use anyhow::Error;

use blockstack_api::{primitives::bytes::ByteCount, DeviceName};

pub mod action;
pub mod device;
pub mod memory;
pub mod snapshot;
pub mod tabfile;

pub use action::{Action, ActionKind};
pub use device::{partition_name, Device, DeviceId, DeviceKind, Format, FormatSpec, NewDevice};
pub use memory::MemoryDeviceGraph;

/// The host's block device graph.
///
/// All mutating operations only schedule actions: the graph's view reflects
/// the state after every scheduled action, and nothing touches storage until
/// [`DeviceGraph::execute`] is called. Implementations own the ordering of
/// the primitive actions a single request expands into.
pub trait DeviceGraph {
    /// Look up a device by name, path or fstab-style spec.
    fn resolve(&self, identifier: &str) -> Option<DeviceId>;

    /// Returns the device behind a handle issued by this graph.
    ///
    /// Panics if the handle was issued by a different graph.
    fn device(&self, id: DeviceId) -> &Device;

    /// Whether the device is still part of the graph, i.e. it has not been
    /// scheduled for removal.
    fn contains(&self, id: DeviceId) -> bool;

    /// The devices `id` is built on, nearest first, excluding `id` itself.
    fn ancestors(&self, id: DeviceId) -> Vec<DeviceId>;

    /// Whether no other device is built on `id`.
    fn is_leaf(&self, id: DeviceId) -> bool;

    /// Schedule removal of every device built on `id`, dependents first, and
    /// then of `id` itself when `remove_device` is set. Disks are never
    /// removed; only their format is.
    fn recursive_remove(&mut self, id: DeviceId, remove_device: bool) -> Result<(), Error>;

    /// Schedule removal of a leaf device along with its format.
    fn destroy(&mut self, id: DeviceId) -> Result<(), Error>;

    /// Schedule creation of a new device.
    fn create_device(&mut self, new_device: NewDevice) -> Result<DeviceId, Error>;

    /// Schedule replacing the device's format.
    fn format_device(&mut self, id: DeviceId, format: FormatSpec) -> Result<(), Error>;

    /// Deactivate the device's current format, e.g. unmount it.
    fn teardown_format(&mut self, id: DeviceId) -> Result<(), Error>;

    /// Refresh the minimum/maximum size information of the device's format.
    fn update_format_size_info(&mut self, id: DeviceId) -> Result<(), Error>;

    /// Schedule resizing the device, and its format when it has one.
    fn resize_device(&mut self, id: DeviceId, size: ByteCount) -> Result<(), Error>;

    /// Assign geometry to every partition scheduled for creation that has not
    /// been laid out yet.
    fn run_layout_pass(&mut self) -> Result<(), Error>;

    /// The actions scheduled so far, in order.
    fn scheduled_actions(&self) -> &[Action];

    /// Carry out (or, for a dry run, simulate) every scheduled action and
    /// return them in the order they were processed.
    fn execute(&mut self, dry_run: bool) -> Result<Vec<Action>, Error>;

    /// Map of device name to mount point, from the persisted mount table.
    fn current_mount_table(&self) -> Result<BTreeMap<DeviceName, PathBuf>, Error>;

    /// Paths of the devices nothing else is built on.
    fn leaf_device_paths(&self) -> Vec<PathBuf>;
}
