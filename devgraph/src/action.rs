use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::PathBuf,
};

use strum_macros::IntoStaticStr;

use crate::device::DeviceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
pub enum ActionKind {
    #[strum(serialize = "create device")]
    CreateDevice,
    #[strum(serialize = "destroy device")]
    DestroyDevice,
    #[strum(serialize = "resize device")]
    ResizeDevice,
    #[strum(serialize = "create format")]
    CreateFormat,
    #[strum(serialize = "destroy format")]
    DestroyFormat,
    #[strum(serialize = "resize format")]
    ResizeFormat,
}

/// A scheduled change to the device graph.
///
/// Actions carry a copy of the identifiers their device had when they were
/// scheduled, so they stay meaningful once the device has left the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub kind: ActionKind,
    pub device: DeviceId,
    pub device_name: String,
    pub device_path: PathBuf,
    /// Type of the format involved, for format actions.
    pub format_type: Option<String>,
    /// Whether the format involved exists on storage.
    pub format_exists: bool,
}

impl Action {
    pub fn is_format(&self) -> bool {
        matches!(
            self.kind,
            ActionKind::CreateFormat | ActionKind::DestroyFormat | ActionKind::ResizeFormat
        )
    }

    pub fn is_destroy(&self) -> bool {
        matches!(
            self.kind,
            ActionKind::DestroyDevice | ActionKind::DestroyFormat
        )
    }
}

impl Display for Action {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(<&str>::from(self.kind))?;
        if self.is_format() {
            write!(f, " {} on", self.format_type.as_deref().unwrap_or("none"))?;
        }
        write!(f, " {}", self.device_path.display())
    }
}
