use log::{debug, info, warn};

use blockstack_api::{
    config::{DesiredPool, DesiredVolume, PoolKind, VolumeKind},
    constants::PARTITION_PLACEHOLDER_SIZE,
    error::{BlockstackError, BlockstackResultExt, ReconciliationError, ReportError},
};
use devgraph::{partition_name, Device, DeviceGraph, DeviceId, DeviceKind, NewDevice};

use super::{cascade, format::format_spec, EngineContext};

/// The pool a volume is reconciled under, as seen by its volumes.
pub struct PoolBinding<'a> {
    pub desired: &'a DesiredPool,
    pub kind: PoolKind,
    /// The resolved pool device: the first disk of a partition pool or the
    /// volume group of an LVM pool.
    pub device: Option<DeviceId>,
    /// The pool's resolved member disks.
    pub disks: &'a [DeviceId],
}

impl PoolBinding<'_> {
    /// Devices a volume's removal must not climb into while the pool keeps
    /// them.
    fn kept_devices(&self) -> Vec<DeviceId> {
        self.device.iter().chain(self.disks).copied().collect()
    }
}

/// Reconcile one volume against the device graph, scheduling whatever it
/// takes for the volume to match its desired state.
///
/// `index` is the 1-based position of the volume in its pool. Returns the
/// volume's device when it is meant to exist.
#[tracing::instrument(skip_all, fields(volume = %volume.name))]
pub fn reconcile(
    ctx: &mut EngineContext,
    volume: &mut DesiredVolume,
    pool: Option<&PoolBinding>,
    index: usize,
) -> Result<Option<DeviceId>, BlockstackError> {
    let kind = volume.kind(pool.map(|p| p.kind))?;
    let parent = parent_device(ctx.graph, volume, kind, pool);
    let mut device = look_up(ctx.graph, volume, kind, parent, index);

    if !volume.ultimately_present(pool.map(|p| p.desired)) {
        if let Some(id) = device {
            record_identifiers(ctx.graph, volume, id);
        }

        let keep = match pool {
            Some(pool) => pool.kept_devices(),
            None => parent.into_iter().collect(),
        };
        info!("Removing volume '{}'", volume.name);
        return cascade::destroy(ctx.graph, device, &keep)
            .structured(ReconciliationError::Schedule {
                name: volume.name.clone(),
            })
            .map(|()| None);
    }

    if device.is_none() {
        device = create(ctx, volume, kind, parent, index)?;
    }

    let id = device.structured(ReconciliationError::UnresolvedDevice {
        name: volume.name.clone(),
    })?;

    if ctx.graph.device(id).exists {
        reformat(ctx, volume, id)?;
    }
    if ctx.graph.device(id).exists && volume.size.is_some() {
        resize(ctx, volume, id)?;
    }

    record_identifiers(ctx.graph, volume, id);
    Ok(Some(id))
}

/// Write the device identifiers of `id` onto the volume.
pub fn record_identifiers(graph: &dyn DeviceGraph, volume: &mut DesiredVolume, id: DeviceId) {
    let device = graph.device(id);
    volume.device = Some(device.path.to_string_lossy().to_string());
    volume.mount_id = Some(device.fstab_spec());
}

/// Resolve the device a new volume of `kind` would be created on: the pool
/// device, or the pool a standalone volume names.
fn parent_device(
    graph: &dyn DeviceGraph,
    volume: &DesiredVolume,
    kind: VolumeKind,
    pool: Option<&PoolBinding>,
) -> Option<DeviceId> {
    if kind == VolumeKind::Disk {
        return None;
    }
    if let Some(pool) = pool {
        return pool.device;
    }

    let name = volume.pool.as_deref()?;
    let parent = graph.resolve(name)?;
    let accepted = match kind {
        VolumeKind::Partition => graph.device(parent).partitionable(),
        VolumeKind::Lvm => graph.device(parent).kind == DeviceKind::LvmVg,
        VolumeKind::Disk => false,
    };
    if !accepted {
        warn!(
            "Pool '{name}' of volume '{}' resolves to {} '{}', which cannot hold {kind} volumes",
            volume.name,
            graph.device(parent).kind,
            graph.device(parent).name
        );
        return None;
    }

    Some(parent)
}

/// Identifier a volume's existing device is found under.
fn device_identifier(
    graph: &dyn DeviceGraph,
    volume: &DesiredVolume,
    kind: VolumeKind,
    parent: Option<DeviceId>,
    index: usize,
) -> Option<String> {
    match kind {
        VolumeKind::Disk => Some(volume.disks.first().unwrap_or(&volume.name).clone()),
        VolumeKind::Partition => parent.map(|p| partition_name(&graph.device(p).name, index)),
        VolumeKind::Lvm => {
            let pool_name = match parent {
                Some(p) => graph.device(p).name.as_str(),
                None => volume.pool.as_deref()?,
            };
            Some(format!("{pool_name}-{}", volume.name))
        }
    }
}

fn kind_matches(device: &Device, kind: VolumeKind) -> bool {
    match kind {
        VolumeKind::Disk => device.is_disk(),
        VolumeKind::Partition => device.kind == DeviceKind::Partition,
        VolumeKind::Lvm => device.kind == DeviceKind::LvmLv,
    }
}

/// Find the volume's existing device. A device of the wrong type is ignored.
fn look_up(
    graph: &dyn DeviceGraph,
    volume: &DesiredVolume,
    kind: VolumeKind,
    parent: Option<DeviceId>,
    index: usize,
) -> Option<DeviceId> {
    let identifier = device_identifier(graph, volume, kind, parent, index)?;
    let id = graph.resolve(&identifier)?;
    let device = graph.device(id);
    if !kind_matches(device, kind) {
        warn!(
            "Device '{}' found for volume '{}' is a {}, not a {kind} volume; ignoring it",
            device.name, volume.name, device.kind
        );
        return None;
    }

    debug!("Volume '{}' is backed by '{}'", volume.name, device.name);
    Some(id)
}

fn create(
    ctx: &mut EngineContext,
    volume: &DesiredVolume,
    kind: VolumeKind,
    parent: Option<DeviceId>,
    index: usize,
) -> Result<Option<DeviceId>, BlockstackError> {
    let request = match (kind, parent) {
        // Whole disks are never created.
        (VolumeKind::Disk, _) | (_, None) => return Ok(None),
        (VolumeKind::Partition, Some(parent)) => NewDevice::Partition {
            parent,
            number: Some(index),
            size: PARTITION_PLACEHOLDER_SIZE,
            grow: true,
            max_size: volume.size,
            format: Some(format_spec(volume)),
        },
        (VolumeKind::Lvm, Some(volume_group)) => NewDevice::LogicalVolume {
            name: volume.name.clone(),
            volume_group,
            size: volume.size.structured(ReconciliationError::CreationFailure {
                name: volume.name.clone(),
            })
            .message("Logical volumes need a size")?,
            format: Some(format_spec(volume)),
        },
    };

    info!("Creating volume '{}' ({})", volume.name, request.describe());
    let id = ctx
        .graph
        .create_device(request)
        .structured(ReconciliationError::CreationFailure {
            name: volume.name.clone(),
        })?;

    if kind == VolumeKind::Partition {
        ctx.request_layout();
    }

    Ok(Some(id))
}

fn reformat(
    ctx: &mut EngineContext,
    volume: &DesiredVolume,
    id: DeviceId,
) -> Result<(), BlockstackError> {
    let spec = format_spec(volume);
    let device = ctx.graph.device(id);
    if device.format.fs_type == spec.fs_type {
        return Ok(());
    }

    info!(
        "Reformatting '{}' from {:?} to {:?}",
        device.name, device.format.fs_type, spec.fs_type
    );
    let schedule_error = || ReconciliationError::Schedule {
        name: volume.name.clone(),
    };
    if device.format.active {
        ctx.graph.teardown_format(id).structured(schedule_error())?;
    }
    ctx.graph
        .format_device(id, spec)
        .structured(schedule_error())
}

fn resize(
    ctx: &mut EngineContext,
    volume: &DesiredVolume,
    id: DeviceId,
) -> Result<(), BlockstackError> {
    let Some(size) = volume.size else {
        return Ok(());
    };
    let device = ctx.graph.device(id);
    if device.size == size {
        return Ok(());
    }

    let rejected = ReconciliationError::ResizeRejected {
        device: device.name.clone(),
        from: device.size,
        to: size,
    };
    if !device.resizable {
        return Err(BlockstackError::new(rejected));
    }

    info!("Resizing '{}' from {} to {size}", device.name, device.size);
    if device.format.resizable() {
        ctx.graph
            .update_format_size_info(id)
            .structured(ReconciliationError::Schedule {
                name: volume.name.clone(),
            })?;
    }
    ctx.graph.resize_device(id, size).structured(rejected)
}
