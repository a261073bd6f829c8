use log::{debug, info};

use blockstack_api::{
    config::{DesiredPool, DesiredVolume, ReconcileOptions},
    error::{BlockstackError, BlockstackResultExt, ExecutionError, ReportError},
    status::Report,
};
use devgraph::{DeviceGraph, DeviceId};

pub mod cascade;
mod context;
pub mod format;
pub mod mounts;
pub mod pool;
pub mod volume;

pub use context::EngineContext;
pub use mounts::derive_mount_plan;

/// Reconcile the desired pools and standalone volumes against `graph`.
///
/// Pools are handled first and then standalone volumes, each in order. All
/// changes are scheduled before anything runs: a failure while scheduling
/// leaves storage untouched. The scheduled actions are then executed once, or
/// simulated when `options.dry_run` is set.
#[tracing::instrument(skip_all)]
pub fn reconcile(
    graph: &mut dyn DeviceGraph,
    mut pools: Vec<DesiredPool>,
    mut volumes: Vec<DesiredVolume>,
    options: &ReconcileOptions,
) -> Result<Report, BlockstackError> {
    if pools.is_empty() && volumes.is_empty() {
        info!("No pools or volumes requested");
        return Ok(Report::default());
    }

    // Captured before anything is scheduled, as scheduling rewrites the
    // graph's view.
    let initial_mounts = graph
        .current_mount_table()
        .structured(ExecutionError::ReadMountTable)?;
    debug!("Initial mounts: {initial_mounts:?}");

    let mut ctx = EngineContext::new(graph, options);

    let mut pool_devices = Vec::with_capacity(pools.len());
    for desired in pools.iter_mut() {
        let devices = pool::reconcile(&mut ctx, desired)
            .message(format!("Failed to reconcile pool '{}'", desired.name))?;
        pool_devices.push(devices);
    }

    let mut volume_devices = Vec::with_capacity(volumes.len());
    for desired in volumes.iter_mut() {
        let device = volume::reconcile(&mut ctx, desired, None, 1)
            .message(format!("Failed to reconcile volume '{}'", desired.name))?;
        volume_devices.push(device);
    }

    ctx.ensure_layout()?;
    let graph = ctx.graph;

    let scheduled = graph.scheduled_actions().len();
    let changed = scheduled > 0;
    let mut executed = Vec::new();
    if changed {
        info!(
            "{} {scheduled} scheduled action(s)",
            if options.dry_run { "Simulating" } else { "Executing" }
        );
        executed = graph
            .execute(options.dry_run)
            .structured(ExecutionError::ExecuteActions)?;
        executed.retain(|action| !action.is_format() || action.format_type.is_some());
    } else {
        info!("Storage already matches the requested state");
    }

    refresh_identifiers(&*graph, &mut pools, &pool_devices, &mut volumes, &volume_devices);

    let mount_plan = derive_mount_plan(&pools, &volumes, &executed, &initial_mounts);
    tracing::info!(
        changed,
        actions = executed.len(),
        mounts = mount_plan.len(),
        "Reconciliation complete"
    );

    Ok(Report {
        changed,
        actions: executed.iter().map(ToString::to_string).collect(),
        leaves: graph.leaf_device_paths(),
        mount_plan,
        pools,
        volumes,
    })
}

/// Re-record identifiers of present volumes, which layout and execution may
/// have changed.
fn refresh_identifiers(
    graph: &dyn DeviceGraph,
    pools: &mut [DesiredPool],
    pool_devices: &[Vec<Option<DeviceId>>],
    volumes: &mut [DesiredVolume],
    volume_devices: &[Option<DeviceId>],
) {
    let pool_volumes = pools
        .iter_mut()
        .zip(pool_devices)
        .flat_map(|(pool, devices)| pool.volumes.iter_mut().zip(devices));

    for (desired, device) in pool_volumes.chain(volumes.iter_mut().zip(volume_devices)) {
        if let Some(id) = device.filter(|id| graph.contains(*id)) {
            volume::record_identifiers(graph, desired, id);
        }
    }
}
