use log::{debug, info, warn};

use blockstack_api::{
    config::{DesiredPool, PoolKind},
    constants::{DEFAULT_DISKLABEL_TYPE, PARTITION_PLACEHOLDER_SIZE},
    error::{BlockstackError, ReconciliationError, ReportError},
};
use devgraph::{DeviceGraph, DeviceId, DeviceKind, FormatSpec, NewDevice};

use super::{
    cascade,
    volume::{self, PoolBinding},
    EngineContext,
};

/// Reconcile one pool and then each of its volumes, in order.
///
/// Returns the device of each volume that is meant to exist, by position.
#[tracing::instrument(skip_all, fields(pool = %pool.name))]
pub fn reconcile(
    ctx: &mut EngineContext,
    pool: &mut DesiredPool,
) -> Result<Vec<Option<DeviceId>>, BlockstackError> {
    let kind = pool.kind()?;
    let disks = look_up_disks(ctx.graph, pool);
    let mut device = look_up_device(ctx.graph, pool, kind, &disks);

    if pool.ultimately_present() {
        device = match kind {
            PoolKind::Disk => create_partition_table(ctx, pool, device)?,
            PoolKind::Lvm => create_volume_group(ctx, pool, device, &disks)?,
        };
    }

    // The volumes are borrowed out of the pool so they can be annotated while
    // the pool itself is shared with them.
    let mut volumes = std::mem::take(&mut pool.volumes);
    let binding = PoolBinding {
        desired: pool,
        kind,
        device,
        disks: &disks,
    };
    let result = volumes
        .iter_mut()
        .enumerate()
        .map(|(index, desired)| volume::reconcile(ctx, desired, Some(&binding), index + 1))
        .collect::<Result<Vec<_>, _>>();
    pool.volumes = volumes;
    let devices = result?;

    if !pool.ultimately_present() {
        info!("Removing pool '{}'", pool.name);
        cascade::destroy(ctx.graph, device, &[]).structured(ReconciliationError::Schedule {
            name: pool.name.clone(),
        })?;
    }

    Ok(devices)
}

/// Resolve the pool's disks. Disks that cannot be found contribute nothing.
fn look_up_disks(graph: &dyn DeviceGraph, pool: &DesiredPool) -> Vec<DeviceId> {
    pool.disks
        .iter()
        .filter_map(|spec| {
            let disk = graph.resolve(spec);
            if disk.is_none() {
                debug!("Disk '{spec}' of pool '{}' not found", pool.name);
            }
            disk
        })
        .collect()
}

fn look_up_device(
    graph: &dyn DeviceGraph,
    pool: &DesiredPool,
    kind: PoolKind,
    disks: &[DeviceId],
) -> Option<DeviceId> {
    let id = match kind {
        PoolKind::Disk => disks.first().copied()?,
        PoolKind::Lvm => graph.resolve(&pool.name)?,
    };

    let device = graph.device(id);
    let accepted = match kind {
        PoolKind::Disk => device.partitionable(),
        PoolKind::Lvm => device.kind == DeviceKind::LvmVg,
    };
    if !accepted {
        warn!(
            "Device '{}' found for pool '{}' is a {}, not a {kind} pool; ignoring it",
            device.name, pool.name, device.kind
        );
        return None;
    }

    Some(id)
}

/// Make sure the pool's disk carries the requested partition table, clearing
/// the disk first when it has to be replaced.
fn create_partition_table(
    ctx: &mut EngineContext,
    pool: &DesiredPool,
    device: Option<DeviceId>,
) -> Result<Option<DeviceId>, BlockstackError> {
    let disk = device.structured(ReconciliationError::UnresolvedDevice {
        name: pool.name.clone(),
    })?;

    let options = ctx.options;
    let format = &ctx.graph.device(disk).format;
    let requested = options.disklabel_type.as_deref();
    let relabel = !format.is_disklabel()
        || requested.is_some_and(|label_type| format.label_type.as_deref() != Some(label_type));
    if !relabel {
        return Ok(Some(disk));
    }

    let label_type = requested.unwrap_or(DEFAULT_DISKLABEL_TYPE);
    info!(
        "Writing {label_type} partition table to '{}'",
        ctx.graph.device(disk).name
    );
    let schedule_error = || ReconciliationError::Schedule {
        name: pool.name.clone(),
    };
    ctx.graph
        .recursive_remove(disk, false)
        .structured(schedule_error())?;
    ctx.graph
        .format_device(disk, FormatSpec::disklabel(label_type))
        .structured(schedule_error())?;

    Ok(Some(disk))
}

/// Create the pool's volume group from its disks unless it already exists.
fn create_volume_group(
    ctx: &mut EngineContext,
    pool: &DesiredPool,
    device: Option<DeviceId>,
    disks: &[DeviceId],
) -> Result<Option<DeviceId>, BlockstackError> {
    if device.is_some() {
        return Ok(device);
    }

    let members = create_members(ctx, pool, disks)?;
    info!(
        "Creating volume group '{}' on {} member(s)",
        pool.name,
        members.len()
    );
    ctx.graph
        .create_device(NewDevice::VolumeGroup {
            name: pool.name.clone(),
            members,
        })
        .structured(ReconciliationError::CreationFailure {
            name: pool.name.clone(),
        })
        .map(Some)
}

/// Turn each disk into a physical volume, through a single partition spanning
/// the disk unless whole disks are used.
fn create_members(
    ctx: &mut EngineContext,
    pool: &DesiredPool,
    disks: &[DeviceId],
) -> Result<Vec<DeviceId>, BlockstackError> {
    let options = ctx.options;
    let label_type = options
        .disklabel_type
        .as_deref()
        .unwrap_or(DEFAULT_DISKLABEL_TYPE);
    let schedule_error = || ReconciliationError::Schedule {
        name: pool.name.clone(),
    };

    let mut members = Vec::with_capacity(disks.len());
    for &disk in disks {
        if !ctx.graph.is_leaf(disk) {
            ctx.graph
                .recursive_remove(disk, false)
                .structured(schedule_error())?;
        }

        let member = if options.use_partitions {
            ctx.graph
                .format_device(disk, FormatSpec::disklabel(label_type))
                .structured(schedule_error())?;
            let partition = ctx
                .graph
                .create_device(NewDevice::Partition {
                    parent: disk,
                    number: None,
                    size: PARTITION_PLACEHOLDER_SIZE,
                    grow: true,
                    max_size: None,
                    format: None,
                })
                .structured(ReconciliationError::CreationFailure {
                    name: pool.name.clone(),
                })?;
            ctx.request_layout();
            partition
        } else {
            disk
        };

        ctx.graph
            .format_device(member, FormatSpec::lvm_pv())
            .structured(schedule_error())?;
        members.push(member);
    }

    // The volume group is sized from its members, so they need their final
    // geometry before it is created. This is a layout pass of its own, ahead
    // of the one that closes the run: logical volumes cannot be placed in a
    // group whose size is still unknown.
    ctx.ensure_layout()?;

    Ok(members)
}
