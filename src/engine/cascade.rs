use anyhow::Error;
use log::{debug, info};

use devgraph::{DeviceGraph, DeviceId};

/// Schedule removal of `device`, everything built on it, and then every
/// ancestor left without dependents, leaves first.
///
/// Ancestors in `keep` are left alone, as are the devices they are built on
/// while they remain. Disks are never removed; their labels are.
pub fn destroy(
    graph: &mut dyn DeviceGraph,
    device: Option<DeviceId>,
    keep: &[DeviceId],
) -> Result<(), Error> {
    let Some(device) = device else {
        return Ok(());
    };
    if !graph.contains(device) {
        debug!("Device is already scheduled for removal");
        return Ok(());
    }

    let mut ancestors: Vec<DeviceId> = graph
        .ancestors(device)
        .into_iter()
        .filter(|ancestor| !keep.contains(ancestor))
        .collect();
    debug!(
        "Removing '{}' with ancestors {:?}",
        graph.device(device).name,
        ancestors
            .iter()
            .map(|a| graph.device(*a).name.as_str())
            .collect::<Vec<_>>()
    );

    graph.recursive_remove(device, true)?;

    loop {
        let leaves: Vec<DeviceId> = ancestors
            .iter()
            .copied()
            .filter(|ancestor| graph.is_leaf(*ancestor))
            .collect();
        if leaves.is_empty() {
            break;
        }

        for leaf in leaves {
            ancestors.retain(|a| *a != leaf);
            if !graph.contains(leaf) {
                continue;
            }

            info!("Scheduling destruction of '{}'", graph.device(leaf).name);
            if graph.device(leaf).is_disk() {
                graph.recursive_remove(leaf, true)?;
            } else {
                graph.destroy(leaf)?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use devgraph::{snapshot::DeviceSnapshot, MemoryDeviceGraph};

    use super::*;

    fn graph() -> MemoryDeviceGraph {
        MemoryDeviceGraph::from_snapshot(
            &DeviceSnapshot::from_yaml(indoc! {r#"
                devices:
                  - name: sda
                    kind: disk
                    size: 10G
                    format: { type: disklabel, label_type: gpt }
                  - name: sda1
                    kind: partition
                    size: 10G
                    parents: [sda]
                    format: { type: lvmpv }
                  - name: vg0
                    kind: lvmvg
                    parents: [sda1]
                  - name: vg0-data
                    kind: lvmlv
                    size: 4G
                    parents: [vg0]
                    format: { type: ext4 }
                  - name: vg0-logs
                    kind: lvmlv
                    size: 4G
                    parents: [vg0]
                    format: { type: xfs }
            "#})
            .unwrap(),
        )
        .unwrap()
    }

    fn actions(graph: &MemoryDeviceGraph) -> Vec<String> {
        graph
            .scheduled_actions()
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    #[test]
    fn test_destroy_none_is_noop() {
        let mut graph = graph();
        destroy(&mut graph, None, &[]).unwrap();
        assert!(graph.scheduled_actions().is_empty());
    }

    #[test]
    fn test_destroy_climbs_to_disk() {
        let mut graph = graph();
        let vg = graph.resolve("vg0");
        destroy(&mut graph, vg, &[]).unwrap();

        assert_eq!(
            actions(&graph),
            vec![
                "destroy format ext4 on /dev/mapper/vg0-data",
                "destroy device /dev/mapper/vg0-data",
                "destroy format xfs on /dev/mapper/vg0-logs",
                "destroy device /dev/mapper/vg0-logs",
                "destroy device /dev/vg0",
                "destroy format lvmpv on /dev/sda1",
                "destroy device /dev/sda1",
                "destroy format disklabel on /dev/sda",
            ]
        );

        // A second pass finds nothing left to do.
        destroy(&mut graph, vg, &[]).unwrap();
        assert_eq!(graph.scheduled_actions().len(), 8);
    }

    #[test]
    fn test_destroy_disk_removes_dependents_first() {
        let mut graph = graph();
        let disk = graph.resolve("sda");
        destroy(&mut graph, disk, &[]).unwrap();

        let actions = actions(&graph);
        assert_eq!(
            actions,
            vec![
                "destroy format ext4 on /dev/mapper/vg0-data",
                "destroy device /dev/mapper/vg0-data",
                "destroy format xfs on /dev/mapper/vg0-logs",
                "destroy device /dev/mapper/vg0-logs",
                "destroy device /dev/vg0",
                "destroy format lvmpv on /dev/sda1",
                "destroy device /dev/sda1",
                "destroy format disklabel on /dev/sda",
            ]
        );

        let position = |action: &str| actions.iter().position(|a| a == action).unwrap();
        assert!(
            position("destroy device /dev/mapper/vg0-data") < position("destroy device /dev/vg0")
        );
        assert!(position("destroy device /dev/vg0") < position("destroy device /dev/sda1"));
        assert!(
            position("destroy device /dev/sda1") < position("destroy format disklabel on /dev/sda")
        );

        // The disk itself stays, without a label.
        let disk = disk.unwrap();
        assert!(graph.contains(disk));
        assert_eq!(graph.device(disk).format.fs_type, None);
        assert!(graph.is_leaf(disk));
    }

    #[test]
    fn test_destroy_stops_at_shared_ancestor() {
        let mut graph = graph();
        let data = graph.resolve("vg0-data");
        destroy(&mut graph, data, &[]).unwrap();

        assert_eq!(
            actions(&graph),
            vec![
                "destroy format ext4 on /dev/mapper/vg0-data",
                "destroy device /dev/mapper/vg0-data",
            ]
        );
        assert!(graph.resolve("vg0").is_some());
    }

    #[test]
    fn test_destroy_keeps_protected_ancestors() {
        let mut graph = graph();
        let vg = graph.resolve("vg0").unwrap();
        let data = graph.resolve("vg0-data");
        let logs = graph.resolve("vg0-logs");
        destroy(&mut graph, data, &[vg]).unwrap();
        destroy(&mut graph, logs, &[vg]).unwrap();

        assert_eq!(graph.scheduled_actions().len(), 4);
        assert!(graph.contains(vg));
        assert!(graph.is_leaf(vg));
    }
}
