//! Snapshot Module
//!
//! Crash-safe snapshot file of the cache contents.
//!
//! The file starts with a one-line JSON manifest followed by one JSON record
//! per entry, least recently used first:
//!
//! ```text
//! {"format_version":1,"entry_count":2,"checksum":"<sha256 of body>","written_at":"..."}
//! {"key":"<base64>","value":"<base64>","created_at":1700000000000,"last_write":1700000000000}
//! {"key":"<base64>","value":"<base64>","created_at":1700000000000,"last_write":1700000000500}
//! ```

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{error, info};

use crate::cache::EncodedEntry;
use crate::config::CorruptSnapshotPolicy;
use crate::error::{CacheError, Result};
use crate::persistence::fs::FileSystem;

/// Version written to and accepted from the manifest.
pub const FORMAT_VERSION: u32 = 1;

// == Manifest ==
/// First line of a snapshot file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    pub entry_count: u64,
    /// Hex SHA-256 of everything after the manifest line
    pub checksum: String,
    pub written_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Record {
    key: String,
    value: String,
    created_at: u64,
    last_write: u64,
}

fn checksum(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    hex::encode(hasher.finalize())
}

// == Encode ==
/// Serializes entries into the snapshot file layout.
pub fn encode_snapshot(entries: &[EncodedEntry], written_at: DateTime<Utc>) -> Result<Vec<u8>> {
    build_snapshot(entries, written_at).map(|(_, bytes)| bytes)
}

fn build_snapshot(
    entries: &[EncodedEntry],
    written_at: DateTime<Utc>,
) -> Result<(Manifest, Vec<u8>)> {
    let mut body = Vec::new();
    for entry in entries {
        let record = Record {
            key: STANDARD.encode(&entry.key),
            value: STANDARD.encode(&entry.value),
            created_at: entry.created_at,
            last_write: entry.last_write,
        };
        serde_json::to_writer(&mut body, &record)?;
        body.push(b'\n');
    }

    let manifest = Manifest {
        format_version: FORMAT_VERSION,
        entry_count: entries.len() as u64,
        checksum: checksum(&body),
        written_at,
    };
    let mut out = serde_json::to_vec(&manifest)?;
    out.push(b'\n');
    out.extend_from_slice(&body);
    Ok((manifest, out))
}

// == Decode ==
/// Parses and validates a snapshot file read from `path`.
///
/// Any structural problem is reported as `CorruptSnapshot`.
pub fn decode_snapshot(path: &Path, bytes: &[u8]) -> Result<(Manifest, Vec<EncodedEntry>)> {
    let split = bytes
        .iter()
        .position(|b| *b == b'\n')
        .ok_or_else(|| CacheError::corrupt(path, "missing manifest line"))?;
    let (head, body) = (&bytes[..split], &bytes[split + 1..]);

    let manifest: Manifest = serde_json::from_slice(head)
        .map_err(|e| CacheError::corrupt(path, format!("malformed manifest: {}", e)))?;
    if manifest.format_version != FORMAT_VERSION {
        return Err(CacheError::corrupt(
            path,
            format!("unsupported format version {}", manifest.format_version),
        ));
    }
    if checksum(body) != manifest.checksum {
        return Err(CacheError::corrupt(path, "checksum mismatch"));
    }

    let lines: Vec<&[u8]> = body
        .split(|b| *b == b'\n')
        .filter(|line| !line.is_empty())
        .collect();
    if lines.len() as u64 != manifest.entry_count {
        return Err(count_mismatch(path, manifest.entry_count, lines.len()));
    }

    let mut entries = Vec::with_capacity(lines.len());
    for (line_no, line) in lines.into_iter().enumerate() {
        let record: Record = serde_json::from_slice(line).map_err(|e| {
            CacheError::corrupt(path, format!("malformed record {}: {}", line_no + 1, e))
        })?;
        let decode = |field: &str| {
            STANDARD.decode(field).map(Bytes::from).map_err(|e| {
                CacheError::corrupt(path, format!("bad base64 in record {}: {}", line_no + 1, e))
            })
        };
        entries.push(EncodedEntry {
            key: decode(&record.key)?,
            value: decode(&record.value)?,
            created_at: record.created_at,
            last_write: record.last_write,
        });
    }

    Ok((manifest, entries))
}

fn count_mismatch(path: &Path, listed: u64, found: usize) -> CacheError {
    CacheError::corrupt(
        path,
        format!("manifest lists {} entries, found {}", listed, found),
    )
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

// == Snapshot Store ==
/// Reads and writes the snapshot file of one cache.
pub struct SnapshotStore {
    fs: Arc<dyn FileSystem>,
    path: PathBuf,
    /// Writers share the temporary file
    write_lock: Mutex<()>,
}

impl SnapshotStore {
    pub fn new(fs: Arc<dyn FileSystem>, path: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where the in-progress snapshot is written before the rename.
    pub fn temp_path(&self) -> PathBuf {
        with_suffix(&self.path, ".tmp")
    }

    /// Where a snapshot rejected at startup is moved to.
    pub fn corrupt_path(&self) -> PathBuf {
        with_suffix(&self.path, ".corrupt")
    }

    /// Reads and validates the snapshot. Fails with `Io` when it is missing.
    pub fn read(&self) -> Result<(Manifest, Vec<EncodedEntry>)> {
        let bytes = self.fs.read(&self.path)?;
        decode_snapshot(&self.path, &bytes)
    }

    // == Load ==
    /// Loads the entries to restore at startup.
    ///
    /// A missing file is an empty cache. A corrupt file is handled according
    /// to `policy`.
    ///
    /// # Arguments
    /// * `policy` - Whether a corrupt snapshot aborts startup
    pub fn load(&self, policy: CorruptSnapshotPolicy) -> Result<Vec<EncodedEntry>> {
        if !self.fs.exists(&self.path) {
            info!("No snapshot at {}, starting empty", self.path.display());
            return Ok(Vec::new());
        }

        match self.read() {
            Ok((manifest, entries)) => {
                info!(
                    "Read snapshot {} with {} entries written at {}",
                    self.path.display(),
                    manifest.entry_count,
                    manifest.written_at.to_rfc3339()
                );
                Ok(entries)
            }
            Err(err @ CacheError::CorruptSnapshot { .. }) => match policy {
                CorruptSnapshotPolicy::Fail => Err(err),
                CorruptSnapshotPolicy::StartEmpty => {
                    let aside = self.corrupt_path();
                    self.fs.rename(&self.path, &aside)?;
                    error!("{}; moved to {} and starting empty", err, aside.display());
                    Ok(Vec::new())
                }
            },
            Err(err) => Err(err),
        }
    }

    // == Write ==
    /// Replaces the snapshot with `entries`.
    ///
    /// The new content is made durable under a temporary name first, so a
    /// crash leaves either the old or the new snapshot in place.
    pub fn write(&self, entries: &[EncodedEntry]) -> Result<Manifest> {
        let _guard = self.write_lock.lock();
        self.write_locked(entries)
    }

    /// Collects the entries and writes them under the writer lock.
    ///
    /// Concurrent writers persist in the order they collected, so an older
    /// collection never replaces a newer snapshot.
    ///
    /// # Arguments
    /// * `collect` - Produces the entries to persist
    pub fn write_with<F>(&self, collect: F) -> Result<Manifest>
    where
        F: FnOnce() -> Result<Vec<EncodedEntry>>,
    {
        let _guard = self.write_lock.lock();
        let entries = collect()?;
        self.write_locked(&entries)
    }

    fn write_locked(&self, entries: &[EncodedEntry]) -> Result<Manifest> {
        let (manifest, bytes) = build_snapshot(entries, Utc::now())?;
        let tmp = self.temp_path();

        if let Err(err) = self.write_then_rename(&tmp, &bytes) {
            // Best effort; the old snapshot is still intact
            let _ = self.fs.remove(&tmp);
            return Err(err.into());
        }

        info!(
            "Wrote snapshot {} with {} entries",
            self.path.display(),
            manifest.entry_count
        );
        Ok(manifest)
    }

    fn write_then_rename(&self, tmp: &Path, bytes: &[u8]) -> io::Result<()> {
        self.fs.write(tmp, bytes)?;
        self.fs.rename(tmp, &self.path)
    }
}
