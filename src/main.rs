//! Tiercache - snapshot inspection tool
//!
//! Reads a cache snapshot, verifies it and prints what it holds.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tiercache::persistence::{LocalFileSystem, SnapshotStore};

#[derive(Debug, Parser)]
#[command(name = "tiercache", version, about = "Tiered cache snapshot tools")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Verify a snapshot file and print its manifest
    Inspect {
        /// Snapshot file to read
        #[arg(env = "CACHE_PERSISTENCE_PATH")]
        path: PathBuf,
        /// Also list every entry
        #[arg(long)]
        entries: bool,
    },
}

/// Entry point of the `tiercache` binary.
///
/// Exits non-zero when the snapshot is missing or fails validation.
fn main() -> anyhow::Result<()> {
    // Defaults to "tiercache=info", can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tiercache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match Cli::parse().command {
        Command::Inspect { path, entries } => inspect(path, entries),
    }
}

fn inspect(path: PathBuf, list_entries: bool) -> anyhow::Result<()> {
    let store = SnapshotStore::new(Arc::new(LocalFileSystem), path.clone());
    let (manifest, records) = store
        .read()
        .with_context(|| format!("failed to read snapshot {}", path.display()))?;
    info!("Snapshot {} verified", path.display());

    println!("path:           {}", path.display());
    println!("format version: {}", manifest.format_version);
    println!("entries:        {}", manifest.entry_count);
    println!("written at:     {}", manifest.written_at.to_rfc3339());
    println!("checksum:       {} (ok)", manifest.checksum);

    if list_entries {
        println!();
        for record in &records {
            println!(
                "{}  {} bytes  written {}",
                String::from_utf8_lossy(&record.key),
                record.value.len(),
                format_millis(record.last_write)
            );
        }
    }
    Ok(())
}

fn format_millis(millis: u64) -> String {
    i64::try_from(millis)
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .map(|at| at.to_rfc3339())
        .unwrap_or_else(|| millis.to_string())
}
