//! dmctl: operator tool for the data manager's warm-boot artifacts.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use sonic_datamgr::global::{GlobalRecord, GLOBAL_VERSION};
use sonic_datamgr::{build_schema, DataManagerConfig, RecordTag, Snapshot, WarmArchive};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// Data manager warm-boot tool
#[derive(Parser, Debug)]
#[command(name = "dmctl")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the schema blob of catalog record types
    Schema {
        /// Record tag; all types and the global record when omitted
        #[arg(long)]
        tag: Option<u16>,

        /// Schema buffer bound in bytes
        #[arg(long, default_value_t = sonic_datamgr::schema::DEFAULT_SCHEMA_BUFFER_SIZE)]
        buffer_size: usize,
    },

    /// List the tables of a backend snapshot file
    Inspect {
        /// Snapshot file
        snapshot: PathBuf,
    },

    /// Pack the SDK state cache and backend snapshot into the warm-boot archive
    Pack {
        /// Configuration file
        #[arg(short = 'c', long)]
        config: PathBuf,
    },

    /// Unpack the warm-boot archive into the snapshot directory
    Unpack {
        /// Configuration file
        #[arg(short = 'c', long)]
        config: PathBuf,
    },

    /// Load and validate a configuration file
    CheckConfig {
        /// Configuration file
        file: PathBuf,
    },
}

fn load_config(path: &Path) -> Result<DataManagerConfig> {
    let config = DataManagerConfig::load_or_default(path)
        .with_context(|| format!("loading {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("validating {}", path.display()))?;
    Ok(config)
}

fn print_schemas(tag: Option<u16>, buffer_size: usize) -> Result<()> {
    let tags = match tag {
        Some(raw) => vec![RecordTag::from_raw(raw)?],
        None => RecordTag::ALL.to_vec(),
    };
    for tag in tags {
        let layout = tag.row_layout()?;
        let blob = build_schema(&layout, tag.version(), layout.record_size(), buffer_size)?;
        println!("{} ({}): {}", tag.as_raw(), tag, blob.as_str());
    }
    if tag.is_none() {
        let layout = GlobalRecord::row_layout()?;
        let blob = build_schema(&layout, GLOBAL_VERSION, layout.record_size(), buffer_size)?;
        println!("- (global): {}", blob.as_str());
    }
    Ok(())
}

fn inspect(path: &Path) -> Result<()> {
    let snapshot = Snapshot::read_from_file(path)
        .with_context(|| format!("reading snapshot {}", path.display()))?;
    println!(
        "snapshot format {} saved at {} ({} tables)",
        snapshot.format_version,
        snapshot.saved_at,
        snapshot.tables.len()
    );
    println!(
        "{:<40} {:>7} {:>13} {:>6} {:>8}",
        "TABLE", "VERSION", "KIND", "ROWS", "ROW SIZE"
    );
    for table in &snapshot.tables {
        println!(
            "{:<40} {:>7} {:>13} {:>6} {:>8}",
            table.name,
            table.version,
            format!("{:?}", table.kind),
            table.rows.len(),
            table.record_size
        );
    }
    Ok(())
}

fn pack(config: &DataManagerConfig) -> Result<()> {
    let sdk_cache = config.sdk_cache_path();
    let snapshot = config.snapshot_path();

    let mut members: Vec<(&str, &PathBuf)> = Vec::new();
    if sdk_cache.exists() {
        members.push((config.snapshot.sdk_cache_file.as_str(), &sdk_cache));
    } else {
        warn!("SDK state cache {} not found, skipping", sdk_cache.display());
    }
    if !snapshot.exists() {
        bail!("backend snapshot {} not found", snapshot.display());
    }
    members.push((config.snapshot.file_name.as_str(), &snapshot));

    let archive = WarmArchive::new(config.archive_path());
    let count = archive.pack(&members)?;
    info!("Packed {} files into {}", count, archive.path().display());
    Ok(())
}

fn unpack(config: &DataManagerConfig) -> Result<()> {
    let archive = WarmArchive::new(config.archive_path());
    let names = archive.unpack(&config.snapshot.directory)?;
    for name in names {
        println!("{}", name);
    }
    Ok(())
}

fn run(args: Args) -> Result<()> {
    match args.command {
        Command::Schema { tag, buffer_size } => print_schemas(tag, buffer_size),
        Command::Inspect { snapshot } => inspect(&snapshot),
        Command::Pack { config } => pack(&load_config(&config)?),
        Command::Unpack { config } => unpack(&load_config(&config)?),
        Command::CheckConfig { file } => {
            let config = load_config(&file)?;
            println!("{}: ok", file.display());
            println!("  snapshot: {}", config.snapshot_path().display());
            println!("  archive:  {}", config.archive_path().display());
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
