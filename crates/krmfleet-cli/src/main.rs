//! krmfleet CLI - compose fleets of kpt packages from git upstreams

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod display;
mod error;
mod exit_codes;

#[derive(Parser)]
#[command(name = "krmfleet")]
#[command(author = "krmfleet Contributors")]
#[command(version)]
#[command(about = "Compose fleets of kpt packages from git upstreams", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compose every Fleet of a ResourceList (KRM function mode)
    Run {
        /// ResourceList file (stdin when omitted or '-')
        file: Option<PathBuf>,

        /// Keep working copies and output in this directory
        #[arg(long, env = "LOCAL_PACKAGES_DIR")]
        packages_dir: Option<PathBuf>,

        /// File name glob for reading materialized files back (repeatable)
        #[arg(long = "match", value_name = "GLOB")]
        match_globs: Vec<String>,

        /// Do not start new packages after this many seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },

    /// Parse, default and validate a Fleet
    Validate {
        /// Fleet file
        file: PathBuf,
    },

    /// Print the resolved package tree and the refs each upstream must provide
    Tree {
        /// Fleet file
        file: PathBuf,
    },
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    // Setup miette for nice error display
    miette::set_panic_hook();

    let cli = Cli::parse();
    init_tracing(cli.debug);

    let result = match cli.command {
        Commands::Run {
            file,
            packages_dir,
            match_globs,
            timeout,
        } => commands::run::run(commands::run::RunArgs {
            file,
            packages_dir,
            match_globs,
            timeout,
            debug: cli.debug,
        }),

        Commands::Validate { file } => commands::validate::run(&file),

        Commands::Tree { file } => commands::tree::run(&file),
    };

    if let Err(err) = result {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}
