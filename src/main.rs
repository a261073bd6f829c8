use std::{fs, panic, path::Path, process::ExitCode};

use anyhow::{Context, Error};
use clap::Parser;
use log::{error, info};

use blockstack::{
    cli::{Cli, Commands, ReconcileArgs},
    load_device_graph, Blockstack, BLOCKSTACK_VERSION,
};
use blockstack_api::error::{
    BlockstackError, BlockstackResultExt, ExecutionError, InternalError, ReportError,
};

fn run_blockstack(args: &Cli) -> Result<(), BlockstackError> {
    info!("Blockstack version: {BLOCKSTACK_VERSION}");

    match &args.command {
        Commands::Validate { config } => Blockstack::load(config)?
            .validate()
            .message(format!("Failed to validate '{}'", config.display())),

        Commands::Plan(reconcile) | Commands::Apply(reconcile) => {
            let dry_run = matches!(args.command, Commands::Plan(_));
            let res = panic::catch_unwind(move || run_reconcile(reconcile, dry_run));
            let res = match res {
                Err(e) => Err(BlockstackError::new(InternalError::Panic(format!("{e:?}")))),
                Ok(r) => r,
            };

            // return error if requested
            if let Some(error_path) = reconcile.error.as_ref() {
                if let Err(e) = &res {
                    if let Err(e2) =
                        fs::write(error_path, serde_yaml::to_string(&e).unwrap_or_default())
                    {
                        error!("Failed to write error to file: {e2}");
                    }
                }
            }

            res.message(format!("Failed to execute '{}' command", args.command))
        }
    }
}

fn run_reconcile(args: &ReconcileArgs, dry_run: bool) -> Result<(), BlockstackError> {
    let blockstack = Blockstack::load(&args.config)?;
    let mut graph = load_device_graph(&args.devices, args.fstab.as_deref())?;
    let options = args.options(blockstack.configuration(), dry_run);

    let report = blockstack
        .reconcile(&mut graph, &options)
        .message(format!("Failed to reconcile '{}'", args.config.display()))?;

    let mut rendered = serde_yaml::to_string(&report).structured(InternalError::SerializeReport)?;
    if !dry_run {
        rendered.push_str("---\n");
        rendered.push_str(
            &serde_yaml::to_string(&graph.to_snapshot())
                .structured(InternalError::SerializeReport)?,
        );
    }

    write_output(args.output.as_deref(), &rendered)
}

fn write_output(path: Option<&Path>, contents: &str) -> Result<(), BlockstackError> {
    match path {
        Some(path) => fs::write(path, contents).structured(ExecutionError::WriteReport {
            path: path.to_string_lossy().to_string(),
        }),
        None => {
            print!("{contents}");
            Ok(())
        }
    }
}

fn setup_logging(args: &Cli) -> Result<(), Error> {
    env_logger::builder()
        .format_timestamp(None)
        .filter_level(args.verbosity)
        .try_init()
        .context("Logger already registered")
}

fn setup_tracing(args: &Cli) -> Result<(), Error> {
    use tracing_subscriber::{filter, fmt, layer::SubscriberExt, Layer};

    if !args.trace {
        return Ok(());
    }

    let json_layer = fmt::layer()
        .json()
        .with_writer(std::io::stderr)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .with_filter(filter::LevelFilter::INFO);

    tracing::subscriber::set_global_default(tracing_subscriber::Registry::default().with(json_layer))
        .context("Failed to set global default subscriber")
}

fn main() -> ExitCode {
    // Parse args
    let args = Cli::parse();

    // Initialize the loggers
    if let Err(e) = setup_logging(&args) {
        eprintln!("Failed to initialize logging: {e:?}");
        return ExitCode::from(1);
    }

    if let Err(e) = setup_tracing(&args) {
        error!("Failed to initialize tracing: {e:?}");
        return ExitCode::from(1);
    }

    if let Err(e) = run_blockstack(&args) {
        error!("Blockstack failed: {e:?}");
        return ExitCode::from(2);
    }

    ExitCode::SUCCESS
}
