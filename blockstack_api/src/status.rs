use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::{DesiredPool, DesiredVolume};

/// Outcome of a reconciliation run.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct Report {
    /// Whether any action was scheduled and executed.
    pub changed: bool,

    /// Human readable descriptions of the executed actions, in execution
    /// order.
    pub actions: Vec<String>,

    /// Paths of the leaf devices of the resulting device graph.
    pub leaves: Vec<PathBuf>,

    /// Mount changes to apply, removals first.
    #[serde(rename = "mounts")]
    pub mount_plan: Vec<MountChange>,

    /// The desired pools, annotated with device identifiers.
    pub pools: Vec<DesiredPool>,

    /// The desired standalone volumes, annotated with device identifiers.
    pub volumes: Vec<DesiredVolume>,
}

/// One entry of the mount plan.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "state")]
pub enum MountChange {
    /// Unmount and forget whatever is mounted at `path`.
    #[serde(rename = "absent")]
    Removal { path: PathBuf },

    /// Mount `src` at `path`.
    #[serde(rename = "mounted")]
    Addition {
        src: String,
        path: PathBuf,
        fstype: String,
        opts: String,
        dump: u32,
        passno: u32,
    },
}

impl MountChange {
    pub fn removal(path: impl Into<PathBuf>) -> Self {
        MountChange::Removal { path: path.into() }
    }

    pub fn is_removal(&self) -> bool {
        matches!(self, MountChange::Removal { .. })
    }

    /// The mount point this change applies to.
    pub fn path(&self) -> &Path {
        match self {
            MountChange::Removal { path } | MountChange::Addition { path, .. } => path,
        }
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    #[test]
    fn test_mount_change_serialization() {
        let plan = vec![
            MountChange::removal("/old"),
            MountChange::Addition {
                src: "/dev/mapper/vg0-data".into(),
                path: "/new".into(),
                fstype: "ext4".into(),
                opts: "defaults".into(),
                dump: 0,
                passno: 2,
            },
        ];

        assert_eq!(
            serde_yaml::to_string(&plan).unwrap(),
            indoc! {r#"
                - state: absent
                  path: /old
                - state: mounted
                  src: /dev/mapper/vg0-data
                  path: /new
                  fstype: ext4
                  opts: defaults
                  dump: 0
                  passno: 2
            "#}
        );
        assert!(plan[0].is_removal());
        assert!(!plan[1].is_removal());
        assert_eq!(plan[1].path(), Path::new("/new"));
    }
}
