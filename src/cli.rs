use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::PathBuf,
};

use clap::{Args, Parser, Subcommand};
use log::LevelFilter;

use blockstack_api::config::{ReconcileOptions, StorageConfiguration};

use crate::BLOCKSTACK_VERSION;

#[derive(Parser, Debug)]
#[clap(version = BLOCKSTACK_VERSION)]
pub struct Cli {
    /// Logging verbosity [OFF, ERROR, WARN, INFO, DEBUG, TRACE]
    #[arg(global = true, short, long, default_value_t = LevelFilter::Info)]
    pub verbosity: LevelFilter,

    /// Emit tracing spans as JSON on stderr
    #[arg(global = true, long)]
    pub trace: bool,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate a storage configuration
    Validate {
        /// Path to a storage configuration file
        #[clap(index = 1)]
        config: PathBuf,
    },

    /// Compute the changes needed to reach a storage configuration, without
    /// applying them
    Plan(ReconcileArgs),

    /// Apply a storage configuration to a device snapshot and print the
    /// resulting snapshot after the report
    Apply(ReconcileArgs),
}

#[derive(Args, Debug)]
pub struct ReconcileArgs {
    /// Path to a storage configuration file
    #[clap(index = 1)]
    pub config: PathBuf,

    /// Path to the device snapshot to reconcile against
    #[clap(short, long)]
    pub devices: PathBuf,

    /// Path to an fstab file to read current mounts from, instead of the one
    /// in the snapshot
    #[clap(long)]
    pub fstab: Option<PathBuf>,

    /// Path to save the resulting report
    #[clap(short, long)]
    pub output: Option<PathBuf>,

    /// Path to save an eventual fatal error
    #[clap(short, long)]
    pub error: Option<PathBuf>,

    /// Partition table type for new disk labels, overriding the configuration
    #[clap(long)]
    pub disklabel_type: Option<String>,

    /// Use whole disks as LVM members instead of partitioning them
    #[clap(long)]
    pub no_partitions: bool,
}

impl ReconcileArgs {
    /// Reconcile options from the configuration, with command line overrides
    /// applied.
    pub fn options(&self, configuration: &StorageConfiguration, dry_run: bool) -> ReconcileOptions {
        let mut options = configuration.options(dry_run);
        if let Some(ref label_type) = self.disklabel_type {
            options.disklabel_type = Some(label_type.clone());
        }
        if self.no_partitions {
            options.use_partitions = false;
        }
        options
    }
}

impl Display for Commands {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Commands::Validate { .. } => write!(f, "validate"),
            Commands::Plan(_) => write!(f, "plan"),
            Commands::Apply(_) => write!(f, "apply"),
        }
    }
}
