//! Persistence Module
//!
//! Snapshot file of the disk tier and the filesystem it is written through.

pub mod fs;
pub mod snapshot;

pub use fs::{FileSystem, LocalFileSystem, MemoryFileSystem};
pub use snapshot::{decode_snapshot, encode_snapshot, Manifest, SnapshotStore, FORMAT_VERSION};
