use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use jitdiff::config::CaptureConfig;
use jitdiff::diff;
use jitdiff::format::{Listing, OutputFormat};
use jitdiff::normalize::normalize;
use jitdiff::snapshot::SnapshotStore;

/// Inspect and diff persisted captures of JIT-compiled functions.
#[derive(Parser, Debug)]
#[command(name = "jitdiff", version, about)]
struct Cli {
    /// JSON config file; defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Diff two capture files after normalization
    Diff {
        old: PathBuf,
        new: PathBuf,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Print the normalized form of a capture
    Normalize { capture: PathBuf },
    /// Re-emit a capture in another format
    Show {
        capture: PathBuf,
        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },
    /// List the stored captures of a function
    List {
        function: String,
        /// Snapshot directory; overrides the config
        #[arg(long)]
        root: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let _logger = flexi_logger::Logger::try_with_env_or_str("info")?.start()?;
    let cli = Cli::parse();

    match cli.command {
        Command::Diff { old, new, format } => {
            let old = read_listing(&old)?;
            let new = read_listing(&new)?;
            let report = diff::postprocess(diff::diff(&normalize(&old), &normalize(&new)));
            print!("{}", format.get_formatter().format_report(&report)?);
        }
        Command::Normalize { capture } => {
            print!("{}", normalize(&read_listing(&capture)?));
        }
        Command::Show { capture, format } => {
            println!("{}", format.get_formatter().format_listing(&read_listing(&capture)?)?);
        }
        Command::List { function, root } => {
            let root = match root {
                Some(root) => root,
                None => load_config(cli.config.as_deref())?.snapshot_root,
            };
            let store = SnapshotStore::open(&root)?;
            for index in store.indices(&function)? {
                println!("{:>4}  {}", index, store.capture_path(&function, index).display());
            }
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<CaptureConfig> {
    match path {
        Some(path) => CaptureConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(CaptureConfig::default()),
    }
}

fn read_listing(path: &Path) -> Result<Listing> {
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Listing::parse(&text).with_context(|| format!("Malformed capture {}", path.display()))
}
