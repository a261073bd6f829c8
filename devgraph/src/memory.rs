//! An in-memory device graph.
//!
//! The graph plays the part of the host's device tree for offline planning
//! and for tests: it answers the same queries, schedules the same actions and
//! lays out partitions, but `execute` only flips the in-memory state.

use std::{
    collections::{BTreeMap, VecDeque},
    path::{Path, PathBuf},
};

use anyhow::{bail, ensure, Context, Error};
use log::{debug, info, trace};
use petgraph::{graph::NodeIndex, Directed, Direction, Graph};
use uuid::Uuid;

use blockstack_api::{
    constants::{FORMAT_LVM_PV, FSTAB_LABEL_PREFIX, FSTAB_UUID_PREFIX},
    primitives::bytes::ByteCount,
    DeviceName,
};

use crate::{
    action::{Action, ActionKind},
    device::{partition_name, Device, DeviceId, DeviceKind, Format, FormatSpec, NewDevice},
    snapshot::{DeviceSnapshot, SnapshotDevice, SnapshotFormat},
    tabfile::TabFile,
    DeviceGraph,
};

#[derive(Debug, Clone)]
struct DeviceNode {
    device: Device,
    /// Set once the device has been scheduled for removal. Removed nodes stay
    /// in the graph so that their handles remain valid.
    removed: bool,
    /// Pending geometry request of a new partition.
    layout: Option<LayoutRequest>,
}

#[derive(Debug, Clone, Copy)]
struct LayoutRequest {
    base: ByteCount,
    grow: bool,
    max_size: Option<ByteCount>,
}

/// Edges point from a device to a device it is built on.
type DevicePetgraph = Graph<DeviceNode, (), Directed>;

#[derive(Debug, Default)]
pub struct MemoryDeviceGraph {
    inner: DevicePetgraph,
    actions: Vec<Action>,
    fstab: Option<String>,
    mount_table: TabFile,
}

impl MemoryDeviceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from a snapshot. Parents must be listed before the
    /// devices built on them.
    pub fn from_snapshot(snapshot: &DeviceSnapshot) -> Result<Self, Error> {
        let mut graph = Self::new();
        for entry in &snapshot.devices {
            let parents = entry
                .parents
                .iter()
                .map(|parent| {
                    graph.resolve(parent).with_context(|| {
                        format!(
                            "Parent '{parent}' of '{}' is not defined before it",
                            entry.name
                        )
                    })
                })
                .collect::<Result<Vec<_>, Error>>()?;

            ensure!(
                graph.resolve(&entry.name).is_none(),
                "Device '{}' is defined more than once",
                entry.name
            );

            let size = match entry.kind {
                DeviceKind::LvmVg if entry.size.bytes() == 0 => graph.sum_sizes(&parents),
                _ => entry.size,
            };

            let format = entry
                .format
                .as_ref()
                .map(|format| Format {
                    fs_type: Some(format.fs_type.clone()),
                    exists: true,
                    active: format.mounted,
                    uuid: format.uuid.clone(),
                    label: format.label.clone(),
                    label_type: format.label_type.clone(),
                    create_options: None,
                    mount_point: None,
                })
                .unwrap_or_default();

            graph.add_device(
                Device {
                    name: entry.name.clone(),
                    path: entry.path.clone().unwrap_or_else(|| entry.default_path()),
                    kind: entry.kind,
                    size,
                    exists: true,
                    resizable: entry.resizable.unwrap_or_else(|| entry.default_resizable()),
                    format,
                },
                &parents,
            );
        }

        if let Some(ref fstab) = snapshot.fstab {
            graph.set_mount_table(fstab);
        }

        Ok(graph)
    }

    /// Capture the current view of the graph.
    pub fn to_snapshot(&self) -> DeviceSnapshot {
        let devices = self
            .live_nodes()
            .map(|idx| {
                let device = &self.inner[idx].device;
                SnapshotDevice {
                    name: device.name.clone(),
                    kind: device.kind,
                    size: device.size,
                    parents: self
                        .parents(idx)
                        .into_iter()
                        .map(|parent| self.inner[parent].device.name.clone())
                        .collect(),
                    path: Some(device.path.clone()),
                    format: device.format.fs_type.as_ref().map(|fs_type| SnapshotFormat {
                        fs_type: fs_type.clone(),
                        uuid: device.format.uuid.clone(),
                        label: device.format.label.clone(),
                        label_type: device.format.label_type.clone(),
                        mounted: device.format.active,
                    }),
                    resizable: Some(device.resizable),
                }
            })
            .collect();

        DeviceSnapshot {
            devices,
            fstab: self.fstab.clone(),
        }
    }

    /// Replace the persisted mount table the graph reports.
    pub fn set_mount_table(&mut self, contents: &str) {
        self.mount_table = TabFile::parse(contents);
        self.fstab = Some(contents.to_owned());
    }

    /// Add an existing device built on `parents`.
    pub fn add_device(&mut self, device: Device, parents: &[DeviceId]) -> DeviceId {
        let idx = self.inner.add_node(DeviceNode {
            device,
            removed: false,
            layout: None,
        });
        for parent in parents {
            self.inner.add_edge(idx, parent.0, ());
        }
        DeviceId(idx)
    }

    fn live(&self, idx: NodeIndex) -> bool {
        !self.inner[idx].removed
    }

    fn live_nodes(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.inner.node_indices().filter(|idx| self.live(*idx))
    }

    fn neighbors(&self, idx: NodeIndex, direction: Direction) -> Vec<NodeIndex> {
        let mut neighbors: Vec<NodeIndex> = self
            .inner
            .neighbors_directed(idx, direction)
            .filter(|n| self.live(*n))
            .collect();
        neighbors.sort();
        neighbors.dedup();
        neighbors
    }

    fn parents(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        self.neighbors(idx, Direction::Outgoing)
    }

    fn children(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        self.neighbors(idx, Direction::Incoming)
    }

    fn sum_sizes(&self, ids: &[DeviceId]) -> ByteCount {
        ByteCount(ids.iter().map(|id| self.inner[id.0].device.size.bytes()).sum())
    }

    fn used_space(&self, idx: NodeIndex) -> ByteCount {
        ByteCount(
            self.children(idx)
                .into_iter()
                .map(|child| self.inner[child].device.size.bytes())
                .sum(),
        )
    }

    /// How much a device may grow, given what its parent has left.
    fn growth_room(&self, idx: NodeIndex) -> ByteCount {
        let device = &self.inner[idx].device;
        match device.kind {
            DeviceKind::Partition | DeviceKind::LvmLv => self
                .parents(idx)
                .first()
                .map(|parent| {
                    self.inner[*parent]
                        .device
                        .size
                        .saturating_sub(self.used_space(*parent))
                })
                .unwrap_or_default(),
            DeviceKind::Disk | DeviceKind::LvmVg => ByteCount(0),
        }
    }

    fn record(&mut self, kind: ActionKind, idx: NodeIndex, format: Option<&Format>) {
        let device = &self.inner[idx].device;
        let action = Action {
            kind,
            device: DeviceId(idx),
            device_name: device.name.clone(),
            device_path: device.path.clone(),
            format_type: format.and_then(|f| f.fs_type.clone()),
            format_exists: format.is_some_and(|f| f.exists),
        };
        trace!("Scheduled action: {action}");
        self.actions.push(action);
    }

    /// Drop the device's format, scheduling its removal when it exists on
    /// storage and cancelling its creation otherwise.
    fn destroy_format(&mut self, idx: NodeIndex) {
        let format = std::mem::take(&mut self.inner[idx].device.format);
        if format.fs_type.is_none() {
            return;
        }

        if format.exists {
            self.record(ActionKind::DestroyFormat, idx, Some(&format));
        } else {
            self.actions
                .retain(|a| !(a.device == DeviceId(idx) && a.kind == ActionKind::CreateFormat));
        }
    }

    fn set_format(&mut self, idx: NodeIndex, spec: FormatSpec) {
        let format = Format::from(spec);
        if format.fs_type.is_some() {
            self.record(ActionKind::CreateFormat, idx, Some(&format));
        }
        self.inner[idx].device.format = format;
    }

    fn refresh_volume_group_sizes(&mut self) {
        let groups: Vec<NodeIndex> = self
            .live_nodes()
            .filter(|idx| self.inner[*idx].device.kind == DeviceKind::LvmVg)
            .collect();
        for idx in groups {
            let members: Vec<DeviceId> = self.parents(idx).into_iter().map(DeviceId).collect();
            self.inner[idx].device.size = self.sum_sizes(&members);
        }
    }

    fn ensure_live(&self, id: DeviceId) -> Result<&Device, Error> {
        let node = &self.inner[id.0];
        ensure!(
            !node.removed,
            "Device '{}' is scheduled for removal",
            node.device.name
        );
        Ok(&node.device)
    }

    fn add_new_device(&mut self, device: Device, parents: &[DeviceId]) -> NodeIndex {
        let id = self.add_device(device, parents);
        self.record(ActionKind::CreateDevice, id.0, None);
        id.0
    }

    fn create_partition(
        &mut self,
        parent: DeviceId,
        number: Option<usize>,
        size: ByteCount,
        grow: bool,
        max_size: Option<ByteCount>,
        format: Option<FormatSpec>,
    ) -> Result<NodeIndex, Error> {
        let disk = self.ensure_live(parent)?;
        ensure!(
            disk.format.is_disklabel(),
            "Device '{}' has no partition table",
            disk.name
        );

        let number = match number {
            Some(number) => number,
            None => {
                self.children(parent.0)
                    .into_iter()
                    .filter_map(|child| {
                        partition_number(&disk.name, &self.inner[child].device.name)
                    })
                    .max()
                    .unwrap_or(0)
                    + 1
            }
        };
        ensure!(number > 0, "Partition numbers start at 1");
        let name = partition_name(&disk.name, number);
        ensure!(
            self.resolve(&name).is_none(),
            "Partition '{name}' already exists"
        );
        let path = disk.path.with_file_name(&name);
        let base = max_size.map_or(size, |max| size.min(max));

        let idx = self.add_new_device(
            Device {
                name,
                path,
                kind: DeviceKind::Partition,
                size: base,
                exists: false,
                resizable: true,
                format: Format::default(),
            },
            &[parent],
        );
        self.inner[idx].layout = Some(LayoutRequest {
            base,
            grow,
            max_size,
        });
        if let Some(spec) = format {
            self.set_format(idx, spec);
        }

        Ok(idx)
    }

    fn create_logical_volume(
        &mut self,
        name: &str,
        volume_group: DeviceId,
        size: ByteCount,
        format: Option<FormatSpec>,
    ) -> Result<NodeIndex, Error> {
        let group = self.ensure_live(volume_group)?;
        ensure!(
            group.kind == DeviceKind::LvmVg,
            "Device '{}' is not a volume group",
            group.name
        );
        ensure!(size.bytes() > 0, "Logical volume '{name}' needs a size");

        let full_name = format!("{}-{name}", group.name);
        ensure!(
            self.resolve(&full_name).is_none(),
            "Device '{full_name}' already exists"
        );

        let free = group.size.saturating_sub(self.used_space(volume_group.0));
        ensure!(
            size <= free,
            "Insufficient free space in volume group '{}': {size} requested, {free} available",
            group.name
        );

        let idx = self.add_new_device(
            Device {
                path: PathBuf::from("/dev/mapper").join(&full_name),
                name: full_name,
                kind: DeviceKind::LvmLv,
                size,
                exists: false,
                resizable: true,
                format: Format::default(),
            },
            &[volume_group],
        );
        if let Some(spec) = format {
            self.set_format(idx, spec);
        }

        Ok(idx)
    }

    fn create_volume_group(
        &mut self,
        name: &str,
        members: &[DeviceId],
    ) -> Result<NodeIndex, Error> {
        ensure!(
            !members.is_empty(),
            "Volume group '{name}' needs at least one member"
        );
        ensure!(
            self.resolve(name).is_none(),
            "Device '{name}' already exists"
        );
        for member in members {
            let device = self.ensure_live(*member)?;
            ensure!(
                device.format.fs_type.as_deref() == Some(FORMAT_LVM_PV),
                "Member '{}' of volume group '{name}' is not formatted as a physical volume",
                device.name
            );
        }

        let size = self.sum_sizes(members);
        Ok(self.add_new_device(
            Device {
                name: name.to_owned(),
                path: PathBuf::from("/dev").join(name),
                kind: DeviceKind::LvmVg,
                size,
                exists: false,
                resizable: false,
                format: Format::default(),
            },
            members,
        ))
    }

    /// Lay out the pending partitions of one disk: every request gets its
    /// base size, then growing requests share what is left, each capped at
    /// its maximum.
    fn lay_out_disk(&mut self, disk: NodeIndex, requests: &[NodeIndex]) -> Result<(), Error> {
        let disk_device = &self.inner[disk].device;
        let used: u64 = self
            .children(disk)
            .into_iter()
            .filter(|child| !requests.contains(child))
            .map(|child| self.inner[child].device.size.bytes())
            .sum();
        let free = disk_device.size.bytes().saturating_sub(used);

        let mut sizes: BTreeMap<NodeIndex, (u64, LayoutRequest)> = requests
            .iter()
            .filter_map(|idx| self.inner[*idx].layout.map(|req| (*idx, (req.base.bytes(), req))))
            .collect();
        let base_total: u64 = sizes.values().map(|(size, _)| size).sum();
        ensure!(
            base_total <= free,
            "Not enough free space on '{}' for {} new partition(s): {} requested, {} available",
            disk_device.name,
            requests.len(),
            ByteCount(base_total),
            ByteCount(free)
        );

        let mut remaining = free - base_total;
        let mut growing: Vec<NodeIndex> = sizes
            .iter()
            .filter(|(_, (size, req))| req.grow && req.max_size.map_or(true, |max| max.bytes() > *size))
            .map(|(idx, _)| *idx)
            .collect();

        while !growing.is_empty() && remaining > 0 {
            let share = remaining / growing.len() as u64;
            let capped: Vec<NodeIndex> = growing
                .iter()
                .copied()
                .filter(|idx| {
                    let (size, req) = sizes[idx];
                    req.max_size.is_some_and(|max| size + share >= max.bytes())
                })
                .collect();

            if capped.is_empty() {
                for idx in &growing {
                    if let Some((size, _)) = sizes.get_mut(idx) {
                        *size += share;
                    }
                }
                break;
            }

            for idx in capped {
                if let Some((size, req)) = sizes.get_mut(&idx) {
                    let max = req.max_size.map_or(*size, ByteCount::bytes);
                    remaining -= max - *size;
                    *size = max;
                }
                growing.retain(|g| *g != idx);
            }
        }

        for (idx, (size, _)) in sizes {
            let node = &mut self.inner[idx];
            node.device.size = ByteCount(size);
            node.layout = None;
            debug!(
                "Laid out partition '{}' with size {}",
                node.device.name, node.device.size
            );
        }

        Ok(())
    }
}

impl DeviceGraph for MemoryDeviceGraph {
    fn resolve(&self, identifier: &str) -> Option<DeviceId> {
        let identifier = identifier.trim();
        let matches = |device: &Device| {
            if let Some(uuid) = identifier.strip_prefix(FSTAB_UUID_PREFIX) {
                device.format.uuid.as_deref() == Some(uuid)
            } else if let Some(label) = identifier.strip_prefix(FSTAB_LABEL_PREFIX) {
                device.format.label.as_deref() == Some(label)
            } else {
                device.name == identifier
                    || device.path == Path::new(identifier)
                    || device.path == Path::new("/dev").join(identifier)
            }
        };

        self.live_nodes()
            .find(|idx| matches(&self.inner[*idx].device))
            .map(DeviceId)
    }

    fn device(&self, id: DeviceId) -> &Device {
        &self.inner[id.0].device
    }

    fn contains(&self, id: DeviceId) -> bool {
        self.live(id.0)
    }

    fn ancestors(&self, id: DeviceId) -> Vec<DeviceId> {
        let mut ancestors = Vec::new();
        let mut queue: VecDeque<NodeIndex> = self.parents(id.0).into();
        while let Some(idx) = queue.pop_front() {
            if idx == id.0 || ancestors.contains(&DeviceId(idx)) {
                continue;
            }
            ancestors.push(DeviceId(idx));
            queue.extend(self.parents(idx));
        }
        ancestors
    }

    fn is_leaf(&self, id: DeviceId) -> bool {
        self.children(id.0).is_empty()
    }

    fn recursive_remove(&mut self, id: DeviceId, remove_device: bool) -> Result<(), Error> {
        self.ensure_live(id)?;

        for child in self.children(id.0) {
            // A child shared with an earlier sibling may already be gone.
            if self.live(child) {
                self.recursive_remove(DeviceId(child), true)?;
            }
        }

        if !remove_device {
            return Ok(());
        }

        if self.device(id).is_disk() {
            self.destroy_format(id.0);
            Ok(())
        } else {
            self.destroy(id)
        }
    }

    fn destroy(&mut self, id: DeviceId) -> Result<(), Error> {
        let device = self.ensure_live(id)?;
        ensure!(!device.is_disk(), "Disk '{}' cannot be destroyed", device.name);
        ensure!(
            self.is_leaf(id),
            "Cannot destroy '{}': other devices are built on it",
            device.name
        );
        let exists = device.exists;

        self.destroy_format(id.0);
        if exists {
            self.record(ActionKind::DestroyDevice, id.0, None);
        } else {
            self.actions.retain(|a| a.device != id);
        }

        let node = &mut self.inner[id.0];
        node.removed = true;
        node.layout = None;
        debug!("Scheduled removal of '{}'", node.device.name);

        self.refresh_volume_group_sizes();
        Ok(())
    }

    fn create_device(&mut self, new_device: NewDevice) -> Result<DeviceId, Error> {
        let description = new_device.describe();
        let idx = match new_device {
            NewDevice::Partition {
                parent,
                number,
                size,
                grow,
                max_size,
                format,
            } => self.create_partition(parent, number, size, grow, max_size, format),
            NewDevice::LogicalVolume {
                name,
                volume_group,
                size,
                format,
            } => self.create_logical_volume(&name, volume_group, size, format),
            NewDevice::VolumeGroup { name, members } => {
                self.create_volume_group(&name, &members)
            }
        }
        .with_context(|| format!("Failed to schedule creation of {description}"))?;

        debug!(
            "Scheduled creation of '{}' ({})",
            self.inner[idx].device.name, description
        );
        Ok(DeviceId(idx))
    }

    fn format_device(&mut self, id: DeviceId, format: FormatSpec) -> Result<(), Error> {
        self.ensure_live(id)?;
        self.destroy_format(id.0);
        self.set_format(id.0, format);
        Ok(())
    }

    fn teardown_format(&mut self, id: DeviceId) -> Result<(), Error> {
        self.ensure_live(id)?;
        let format = &mut self.inner[id.0].device.format;
        trace!("Tearing down {:?} format", format.fs_type);
        format.active = false;
        Ok(())
    }

    fn update_format_size_info(&mut self, id: DeviceId) -> Result<(), Error> {
        let device = self.ensure_live(id)?;
        trace!("Format size information of '{}' is current", device.name);
        Ok(())
    }

    fn resize_device(&mut self, id: DeviceId, size: ByteCount) -> Result<(), Error> {
        let device = self.ensure_live(id)?.clone();
        ensure!(
            device.resizable,
            "Device '{}' does not support resizing",
            device.name
        );
        ensure!(size.bytes() > 0, "Cannot resize '{}' to zero", device.name);
        if device.format.fs_type.is_some() && device.format.exists {
            ensure!(
                device.format.resizable(),
                "Format {:?} on '{}' does not support resizing",
                device.format.fs_type,
                device.name
            );
        }
        if size > device.size {
            let room = self.growth_room(id.0);
            ensure!(
                size.bytes() - device.size.bytes() <= room.bytes(),
                "Cannot grow '{}' to {size}: only {room} available",
                device.name
            );
        }

        // Shrinking shrinks the format first, growing grows the device first.
        let format = device.format.fs_type.is_some().then_some(&device.format);
        if size < device.size {
            if format.is_some() {
                self.record(ActionKind::ResizeFormat, id.0, format);
            }
            self.record(ActionKind::ResizeDevice, id.0, None);
        } else {
            self.record(ActionKind::ResizeDevice, id.0, None);
            if format.is_some() {
                self.record(ActionKind::ResizeFormat, id.0, format);
            }
        }

        self.inner[id.0].device.size = size;
        self.refresh_volume_group_sizes();
        Ok(())
    }

    fn run_layout_pass(&mut self) -> Result<(), Error> {
        let mut requests: BTreeMap<NodeIndex, Vec<NodeIndex>> = BTreeMap::new();
        for idx in self.live_nodes() {
            if self.inner[idx].layout.is_none() {
                continue;
            }
            let disk = self
                .parents(idx)
                .first()
                .copied()
                .context("Pending partition has no parent disk")?;
            requests.entry(disk).or_default().push(idx);
        }

        for (disk, partitions) in requests {
            self.lay_out_disk(disk, &partitions)?;
        }

        self.refresh_volume_group_sizes();
        Ok(())
    }

    fn scheduled_actions(&self) -> &[Action] {
        &self.actions
    }

    fn execute(&mut self, dry_run: bool) -> Result<Vec<Action>, Error> {
        if let Some(pending) = self.live_nodes().find(|idx| self.inner[*idx].layout.is_some()) {
            bail!(
                "Partition '{}' has not been laid out",
                self.inner[pending].device.name
            );
        }

        let actions = std::mem::take(&mut self.actions);
        for action in actions
            .iter()
            .filter(|a| a.kind == ActionKind::DestroyFormat && a.format_exists)
        {
            debug!(
                "Tearing down {} on '{}' before removal",
                action.format_type.as_deref().unwrap_or("format"),
                action.device_name
            );
        }

        if dry_run {
            info!("Dry run, simulated {} action(s)", actions.len());
            return Ok(actions);
        }

        let live: Vec<NodeIndex> = self.live_nodes().collect();
        for idx in live {
            let device = &mut self.inner[idx].device;
            device.exists = true;
            if device.format.fs_type.is_some() {
                device.format.exists = true;
            }
            if device.format.is_filesystem() && device.format.uuid.is_none() {
                device.format.uuid = Some(Uuid::new_v4().to_string());
            }
        }

        info!("Executed {} action(s)", actions.len());
        Ok(actions)
    }

    fn current_mount_table(&self) -> Result<BTreeMap<DeviceName, PathBuf>, Error> {
        Ok(self
            .mount_table
            .entries
            .iter()
            .filter_map(|entry| {
                self.resolve(&entry.device)
                    .map(|id| (self.device(id).name.clone(), entry.mount_point.clone()))
            })
            .collect())
    }

    fn leaf_device_paths(&self) -> Vec<PathBuf> {
        self.live_nodes()
            .filter(|idx| self.children(*idx).is_empty())
            .map(|idx| self.inner[idx].device.path.clone())
            .collect()
    }
}

fn partition_number(disk: &str, partition: &str) -> Option<usize> {
    let suffix = partition.strip_prefix(disk)?;
    let suffix = if disk.ends_with(|c: char| c.is_ascii_digit()) {
        suffix.strip_prefix('p')?
    } else {
        suffix
    };
    suffix.parse().ok()
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use maplit::btreemap;

    use super::*;

    const GIB: u64 = 1 << 30;

    fn load(yaml: &str) -> MemoryDeviceGraph {
        MemoryDeviceGraph::from_snapshot(&DeviceSnapshot::from_yaml(yaml).unwrap()).unwrap()
    }

    fn stacked() -> MemoryDeviceGraph {
        load(indoc! {r#"
            devices:
              - name: sda
                kind: disk
                size: 20G
                format: { type: disklabel, label_type: gpt }
              - name: sda1
                kind: partition
                size: 20G
                parents: [sda]
                format: { type: lvmpv }
              - name: vg0
                kind: lvmvg
                parents: [sda1]
              - name: vg0-data
                kind: lvmlv
                size: 10G
                parents: [vg0]
                format: { type: ext4, uuid: 1111-2222 }
            fstab: |
              UUID=1111-2222 /data ext4 defaults 0 2
              /dev/sdz1 /gone xfs defaults 0 0
        "#})
    }

    fn action_strings(graph: &MemoryDeviceGraph) -> Vec<String> {
        graph
            .scheduled_actions()
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    #[test]
    fn test_partition_number() {
        assert_eq!(partition_number("sdb", "sdb12"), Some(12));
        assert_eq!(partition_number("nvme0n1", "nvme0n1p3"), Some(3));
        assert_eq!(partition_number("nvme0n1", "nvme0n13"), None);
        assert_eq!(partition_number("sdb", "sdc1"), None);
    }

    #[test]
    fn test_resolve() {
        let graph = stacked();
        let lv = graph.resolve("vg0-data").unwrap();
        assert_eq!(graph.resolve("/dev/mapper/vg0-data"), Some(lv));
        assert_eq!(graph.resolve("UUID=1111-2222"), Some(lv));
        assert_eq!(graph.resolve("sda"), graph.resolve("/dev/sda"));
        assert!(graph.resolve("sda").is_some());
        assert!(graph.resolve("sdz").is_none());
        assert!(graph.resolve("UUID=nope").is_none());

        assert_eq!(graph.device(graph.resolve("vg0").unwrap()).size, ByteCount(20 * GIB));
    }

    #[test]
    fn test_ancestors_and_leaves() {
        let graph = stacked();
        let lv = graph.resolve("vg0-data").unwrap();
        let names: Vec<&str> = graph
            .ancestors(lv)
            .into_iter()
            .map(|id| graph.device(id).name.as_str())
            .collect();
        assert_eq!(names, vec!["vg0", "sda1", "sda"]);

        assert!(graph.is_leaf(lv));
        assert!(!graph.is_leaf(graph.resolve("vg0").unwrap()));
        assert_eq!(
            graph.leaf_device_paths(),
            vec![PathBuf::from("/dev/mapper/vg0-data")]
        );
    }

    #[test]
    fn test_mount_table() {
        let graph = stacked();
        assert_eq!(
            graph.current_mount_table().unwrap(),
            btreemap! {
                "vg0-data".to_owned() => PathBuf::from("/data"),
            }
        );
    }

    #[test]
    fn test_recursive_remove_disk_orders_dependents_first() {
        let mut graph = stacked();
        let disk = graph.resolve("sda").unwrap();
        graph.recursive_remove(disk, true).unwrap();

        assert_eq!(
            action_strings(&graph),
            vec![
                "destroy format ext4 on /dev/mapper/vg0-data",
                "destroy device /dev/mapper/vg0-data",
                "destroy device /dev/vg0",
                "destroy format lvmpv on /dev/sda1",
                "destroy device /dev/sda1",
                "destroy format disklabel on /dev/sda",
            ]
        );
        assert!(graph.contains(disk));
        assert_eq!(graph.device(disk).format, Format::default());
        assert!(graph.resolve("vg0").is_none());
        assert!(graph.is_leaf(disk));
    }

    #[test]
    fn test_destroy_rejects_non_leaf_and_disks() {
        let mut graph = stacked();
        let vg = graph.resolve("vg0").unwrap();
        assert!(graph.destroy(vg).is_err());
        let disk = graph.resolve("sda").unwrap();
        assert!(graph.destroy(disk).is_err());
        assert!(graph.scheduled_actions().is_empty());
    }

    #[test]
    fn test_partition_layout() {
        let mut graph = load(indoc! {r#"
            devices:
              - name: sdb
                kind: disk
                size: 20G
                format: { type: disklabel, label_type: gpt }
        "#});
        let disk = graph.resolve("sdb").unwrap();

        let capped = graph
            .create_device(NewDevice::Partition {
                parent: disk,
                number: None,
                size: ByteCount(256 << 20),
                grow: true,
                max_size: Some(ByteCount(8 * GIB)),
                format: Some(FormatSpec::filesystem("xfs")),
            })
            .unwrap();
        let open = graph
            .create_device(NewDevice::Partition {
                parent: disk,
                number: None,
                size: ByteCount(256 << 20),
                grow: true,
                max_size: None,
                format: None,
            })
            .unwrap();

        assert_eq!(graph.device(capped).name, "sdb1");
        assert_eq!(graph.device(open).name, "sdb2");
        assert_eq!(graph.device(open).path, PathBuf::from("/dev/sdb2"));
        assert!(graph.execute(true).is_err());

        graph.run_layout_pass().unwrap();
        assert_eq!(graph.device(capped).size, ByteCount(8 * GIB));
        assert_eq!(graph.device(open).size, ByteCount(12 * GIB));

        assert_eq!(
            action_strings(&graph),
            vec![
                "create device /dev/sdb1",
                "create format xfs on /dev/sdb1",
                "create device /dev/sdb2",
            ]
        );
    }

    #[test]
    fn test_partition_with_requested_number() {
        let mut graph = load(indoc! {r#"
            devices:
              - name: sdb
                kind: disk
                size: 20G
                format: { type: disklabel, label_type: gpt }
              - name: sdb1
                kind: partition
                size: 4G
                parents: [sdb]
        "#});
        let disk = graph.resolve("sdb").unwrap();
        let request = |number| NewDevice::Partition {
            parent: disk,
            number: Some(number),
            size: ByteCount(GIB),
            grow: false,
            max_size: None,
            format: None,
        };

        let third = graph.create_device(request(3)).unwrap();
        assert_eq!(graph.device(third).name, "sdb3");

        let error = graph.create_device(request(1)).unwrap_err();
        assert!(format!("{error:#}").contains("Partition 'sdb1' already exists"));

        // Unnumbered requests continue after the highest partition.
        let next = graph
            .create_device(NewDevice::Partition {
                parent: disk,
                number: None,
                size: ByteCount(GIB),
                grow: false,
                max_size: None,
                format: None,
            })
            .unwrap();
        assert_eq!(graph.device(next).name, "sdb4");
    }

    #[test]
    fn test_layout_without_room_fails() {
        let mut graph = load(indoc! {r#"
            devices:
              - name: sdb
                kind: disk
                size: 100M
                format: { type: disklabel }
        "#});
        let disk = graph.resolve("sdb").unwrap();
        graph
            .create_device(NewDevice::Partition {
                parent: disk,
                number: None,
                size: ByteCount(256 << 20),
                grow: true,
                max_size: None,
                format: None,
            })
            .unwrap();

        let error = graph.run_layout_pass().unwrap_err();
        assert!(error.to_string().contains("Not enough free space on 'sdb'"));
    }

    #[test]
    fn test_partition_requires_disklabel() {
        let mut graph = load(indoc! {r#"
            devices:
              - name: sdb
                kind: disk
                size: 10G
        "#});
        let disk = graph.resolve("sdb").unwrap();
        let error = graph
            .create_device(NewDevice::Partition {
                parent: disk,
                number: None,
                size: ByteCount(GIB),
                grow: false,
                max_size: None,
                format: None,
            })
            .unwrap_err();
        assert!(format!("{error:#}").contains("has no partition table"));
    }

    #[test]
    fn test_logical_volume_space() {
        let mut graph = stacked();
        let vg = graph.resolve("vg0").unwrap();

        let error = graph
            .create_device(NewDevice::LogicalVolume {
                name: "big".into(),
                volume_group: vg,
                size: ByteCount(11 * GIB),
                format: None,
            })
            .unwrap_err();
        assert!(format!("{error:#}").contains("Insufficient free space in volume group 'vg0'"));

        let lv = graph
            .create_device(NewDevice::LogicalVolume {
                name: "logs".into(),
                volume_group: vg,
                size: ByteCount(4 * GIB),
                format: Some(FormatSpec::filesystem("xfs")),
            })
            .unwrap();
        assert_eq!(graph.device(lv).name, "vg0-logs");
        assert_eq!(graph.device(lv).path, PathBuf::from("/dev/mapper/vg0-logs"));
        assert!(!graph.device(lv).exists);
    }

    #[test]
    fn test_volume_group_members() {
        let mut graph = load(indoc! {r#"
            devices:
              - name: sdb
                kind: disk
                size: 10G
              - name: sdc
                kind: disk
                size: 10G
        "#});
        let sdb = graph.resolve("sdb").unwrap();
        let sdc = graph.resolve("sdc").unwrap();

        assert!(graph
            .create_device(NewDevice::VolumeGroup {
                name: "vg1".into(),
                members: vec![],
            })
            .is_err());
        assert!(graph
            .create_device(NewDevice::VolumeGroup {
                name: "vg1".into(),
                members: vec![sdb],
            })
            .is_err());

        graph.format_device(sdb, FormatSpec::lvm_pv()).unwrap();
        graph.format_device(sdc, FormatSpec::lvm_pv()).unwrap();
        let vg = graph
            .create_device(NewDevice::VolumeGroup {
                name: "vg1".into(),
                members: vec![sdb, sdc],
            })
            .unwrap();
        assert_eq!(graph.device(vg).size, ByteCount(20 * GIB));
        assert_eq!(graph.ancestors(vg), vec![sdb, sdc]);
    }

    #[test]
    fn test_resize() {
        let mut graph = stacked();
        let lv = graph.resolve("vg0-data").unwrap();

        assert!(graph.resize_device(lv, ByteCount(30 * GIB)).is_err());

        graph.resize_device(lv, ByteCount(12 * GIB)).unwrap();
        graph.resize_device(lv, ByteCount(6 * GIB)).unwrap();
        assert_eq!(
            action_strings(&graph),
            vec![
                "resize device /dev/mapper/vg0-data",
                "resize format ext4 on /dev/mapper/vg0-data",
                "resize format ext4 on /dev/mapper/vg0-data",
                "resize device /dev/mapper/vg0-data",
            ]
        );

        let disk = graph.resolve("sda").unwrap();
        assert!(graph.resize_device(disk, ByteCount(GIB)).is_err());
    }

    #[test]
    fn test_reformat_cancels_unexecuted_format() {
        let mut graph = stacked();
        let lv = graph.resolve("vg0-data").unwrap();
        graph.format_device(lv, FormatSpec::filesystem("xfs")).unwrap();
        graph.format_device(lv, FormatSpec::filesystem("btrfs")).unwrap();

        assert_eq!(
            action_strings(&graph),
            vec![
                "destroy format ext4 on /dev/mapper/vg0-data",
                "create format btrfs on /dev/mapper/vg0-data",
            ]
        );
    }

    #[test]
    fn test_execute() {
        let mut graph = stacked();
        let vg = graph.resolve("vg0").unwrap();
        let lv = graph
            .create_device(NewDevice::LogicalVolume {
                name: "logs".into(),
                volume_group: vg,
                size: ByteCount(GIB),
                format: Some(FormatSpec::filesystem("xfs")),
            })
            .unwrap();

        let simulated = graph.execute(true).unwrap();
        assert_eq!(simulated.len(), 2);
        assert!(graph.scheduled_actions().is_empty());
        assert!(!graph.device(lv).exists);

        graph.format_device(lv, FormatSpec::filesystem("ext4")).unwrap();
        let executed = graph.execute(false).unwrap();
        assert_eq!(executed.len(), 1);
        assert!(graph.device(lv).exists);
        assert!(graph.device(lv).format.exists);
        assert!(graph.device(lv).fstab_spec().starts_with("UUID="));
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let graph = stacked();
        let reloaded = MemoryDeviceGraph::from_snapshot(&graph.to_snapshot()).unwrap();
        assert_eq!(reloaded.to_snapshot(), graph.to_snapshot());
        assert_eq!(
            reloaded.current_mount_table().unwrap(),
            graph.current_mount_table().unwrap()
        );
    }

    #[test]
    fn test_snapshot_parent_order() {
        let snapshot = DeviceSnapshot::from_yaml(indoc! {r#"
            devices:
              - name: sda1
                kind: partition
                size: 1G
                parents: [sda]
              - name: sda
                kind: disk
                size: 2G
        "#})
        .unwrap();
        assert!(MemoryDeviceGraph::from_snapshot(&snapshot).is_err());
    }
}
