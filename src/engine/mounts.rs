use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use log::debug;

use blockstack_api::{
    config::{DesiredPool, DesiredVolume},
    status::MountChange,
    DeviceName,
};
use devgraph::Action;

/// Derive the mount changes that follow from a reconciliation run.
///
/// `initial_mounts` maps device names to the mount points they had before the
/// run. Every removal is listed before the first addition, and each mount
/// point is removed at most once.
pub fn derive_mount_plan(
    pools: &[DesiredPool],
    volumes: &[DesiredVolume],
    executed: &[Action],
    initial_mounts: &BTreeMap<DeviceName, PathBuf>,
) -> Vec<MountChange> {
    let mut removals: Vec<MountChange> = Vec::new();
    let mut remove = |path: &Path| {
        if !removals.iter().any(|r| r.path() == path) {
            debug!("Planning removal of mount '{}'", path.display());
            removals.push(MountChange::removal(path));
        }
    };

    // Formats that were destroyed take their mounts with them.
    for action in executed {
        if !(action.is_destroy() && action.is_format()) || action.format_type.is_none() {
            continue;
        }
        if let Some(mount) = initial_mounts.get(&action.device_name) {
            remove(mount.as_path());
        }
    }

    let present = pools
        .iter()
        .flat_map(|pool| {
            pool.volumes
                .iter()
                .filter(move |volume| volume.ultimately_present(Some(pool)))
        })
        .chain(volumes.iter().filter(|volume| volume.ultimately_present(None)));

    let mut additions = Vec::new();
    for volume in present {
        // Volumes that moved are unmounted from where they were.
        if let Some(mount) = volume
            .device
            .as_deref()
            .and_then(device_name)
            .and_then(|name| initial_mounts.get(name))
        {
            if volume.mount_point.as_ref() != Some(mount) {
                remove(mount.as_path());
            }
        }

        if let Some(ref mount_point) = volume.mount_point {
            additions.push(MountChange::Addition {
                src: volume.device.clone().unwrap_or_default(),
                path: mount_point.clone(),
                fstype: volume.fs_type.clone(),
                opts: volume.mount_options.clone(),
                dump: volume.mount_check,
                passno: volume.mount_passno,
            });
        }
    }

    removals.extend(additions);
    removals
}

/// Name of the device behind a device path, i.e. its last component.
fn device_name(path: &str) -> Option<&str> {
    path.rsplit('/').next().filter(|name| !name.is_empty())
}
