use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;
use std::path::PathBuf;

mod resolve;
mod stage;

/// tag written for a request that picked nothing
pub const NO_PICK_TAG: u64 = u64::MAX;

/// pickbridge - stage weighted picks into packed tags, then resolve them back
#[derive(Parser)]
#[command(name = "pickbridge")]
#[command(version)]
#[command(about = "pick entries from asset collections and carry them across pipeline phases as 64-bit tags", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// suppress informational messages
    #[arg(short = 'q', long, global = true)]
    quiet: bool,

    /// verbose logging to console (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// producer phase: pick an entry per request, write tags and a side-table
    Stage(stage::StageArgs),
    /// consumer phase: resolve tags back to entries using the side-table
    Resolve(resolve::ResolveArgs),
}

/// arguments shared by both phases
#[derive(clap::Args)]
pub struct Files {
    /// collection manifest (JSON)
    #[arg(long)]
    pub manifest: PathBuf,

    /// tag stream, little-endian u64 per request
    #[arg(long)]
    pub tags: PathBuf,

    /// side-table mapping tag slots to collection paths
    #[arg(long)]
    pub table: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logger(cli.verbose, cli.quiet);

    match cli.command {
        Command::Stage(args) => {
            info!("stage: {}", args.files.manifest.display());
            stage::run(&args)
        }
        Command::Resolve(args) => {
            info!("resolve: {}", args.files.tags.display());
            resolve::run(&args)
        }
    }
}

fn init_logger(verbose: u8, quiet: bool) {
    // If quiet mode is enabled, only show warnings and errors
    let log_level = if quiet {
        log::LevelFilter::Warn
    } else {
        match verbose {
            0 => log::LevelFilter::Error,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp(None)
        .format_module_path(false)
        .format_target(false)
        .init();
}
