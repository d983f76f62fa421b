//! Tontoo CLI
//!
//! # Usage
//!
//! ```bash
//! # Build the project in the current directory into build/
//! tontoo build
//!
//! # Run a built bundle
//! tontoo run build/demo.tontoo
//!
//! # Build in memory and run immediately
//! tontoo dev --project ./demo --verbose
//!
//! # Show version
//! tontoo info
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tontoo::{RuntimeConfig, build_in_memory, build_project, run_bundle};
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

/// Tontoo - runtime and bundler for Tontoo projects
#[derive(Parser, Debug)]
#[command(name = "tontoo")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build and run Tontoo project bundles", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a built .tontoo bundle
    Run {
        /// Path to the bundle
        #[arg(value_name = "BUNDLE")]
        bundle: PathBuf,
    },
    /// Build the project into build/<name>.tontoo
    Build {
        /// Project directory
        #[arg(short, long, default_value = ".")]
        project: PathBuf,
    },
    /// Build in memory and run straight away
    Dev {
        /// Project directory
        #[arg(short, long, default_value = ".")]
        project: PathBuf,
    },
    /// Show version information
    Info,
}

fn init_logging(args: &Args) {
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if args.log_json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

async fn execute(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Run { bundle } => {
            if !bundle.is_file() {
                anyhow::bail!("Bundle not found: {:?}", bundle);
            }
            info!("Running {:?}", bundle);
            let bytes = tokio::fs::read(&bundle).await?;
            run_bundle(&bytes, RuntimeConfig::default()).await?;
        }
        Command::Build { project } => {
            let output = build_project(&project)?;
            println!();
            println!("Build successful: {}", output.bundle.display());
            println!("Distributable:    {}", output.distributable.display());
            println!("Source archive:   {}", output.archive.display());
        }
        Command::Dev { project } => {
            info!("Starting Development-Build-process...");
            let (manifest, files) = build_in_memory(&project)?;
            let bytes = tontoo::encode(&files)?;
            info!("Build successfully started in Dev Mode...");
            run_bundle(&bytes, RuntimeConfig::default().with_main_file(manifest.main)).await?;
        }
        Command::Info => tontoo::print_version(),
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(&args);

    if let Err(e) = execute(args.command).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
