use log::debug;

use blockstack_api::{
    config::ReconcileOptions,
    error::{BlockstackError, ReconciliationError, ReportError},
};
use devgraph::DeviceGraph;

/// State shared by the reconcilers during one run.
pub struct EngineContext<'a> {
    /// The device graph every reconciler schedules against.
    pub graph: &'a mut dyn DeviceGraph,

    pub options: &'a ReconcileOptions,

    /// Whether partitions were scheduled since the last layout pass.
    layout_pending: bool,
}

impl<'a> EngineContext<'a> {
    pub fn new(graph: &'a mut dyn DeviceGraph, options: &'a ReconcileOptions) -> Self {
        Self {
            graph,
            options,
            layout_pending: false,
        }
    }

    /// Note that new partitions await geometry.
    pub fn request_layout(&mut self) {
        self.layout_pending = true;
    }

    /// Run the layout pass if any partition awaits geometry. Partitions
    /// requested before this call are all laid out together.
    pub fn ensure_layout(&mut self) -> Result<(), BlockstackError> {
        if !self.layout_pending {
            return Ok(());
        }

        debug!("Laying out pending partitions");
        self.graph
            .run_layout_pass()
            .structured(ReconciliationError::Layout)?;
        self.layout_pending = false;
        Ok(())
    }
}
