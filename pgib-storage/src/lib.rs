//! Abstract storage and RPC capabilities the core consumes (§4.6, §6.1).
//!
//! Networking, TLS, object-store drivers (S3/Azure/GCS/SFTP) and child
//! process protocol framing are explicitly out of scope for this crate
//! (spec §1) - it only defines the capability interfaces the scanner,
//! builder and serializer program against, plus one concrete
//! [`LocalStorage`] backend (directly over the filesystem) that's enough
//! to run the core end to end against a real data directory or a test
//! fixture without any transport layer at all.

mod local;
pub mod rpc;

pub use local::LocalStorage;

use std::io::{Read, Write};
use std::time::SystemTime;

use anyhow::Result;
use pgib_types::Mode;

/// What kind of filesystem object a [`Storage::info`] call found.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryType {
    File,
    Path,
    Link,
    Special,
}

/// Metadata about one object in the storage tree, independent of whatever
/// backend produced it (POSIX filesystem, SFTP, object store, ...).
#[derive(Clone, Debug)]
pub struct StorageInfo {
    pub entry_type: EntryType,
    pub size: u64,
    pub mtime: SystemTime,
    pub mode: Mode,
    pub uid: u32,
    pub gid: u32,
    /// Populated only when `entry_type == EntryType::Link`.
    pub link_destination: Option<String>,
}

/// One entry returned while listing a directory.
#[derive(Clone, Debug)]
pub struct DirEntry {
    /// Name relative to the directory that was listed (no path separators).
    pub name: String,
    pub info: StorageInfo,
}

/// The storage capability the core depends on (§1, §4.6): bounded-size
/// reads/writes, directory listing, and stat. No retry/timeout policy is
/// specified here - that's the concrete backend's job; the core only
/// reacts to success or a propagated I/O error (§7).
pub trait Storage: Send + Sync {
    /// Lists the immediate children of `path` (relative to the storage
    /// root). Returns one entry per file, directory or symlink.
    fn list(&self, path: &str) -> Result<Vec<DirEntry>>;

    /// Stats a single path. Errors with [`pgib_types::CoreError::FileMissing`]
    /// (wrapped) if nothing exists there.
    fn info(&self, path: &str) -> Result<StorageInfo>;

    /// Opens `path` for reading.
    fn read(&self, path: &str) -> Result<Box<dyn Read + Send>>;

    /// Opens `path` for writing, creating or truncating it. The write is
    /// expected to be atomic from the reader's point of view (see §5,
    /// "save writes atomically") - concrete backends satisfy this with a
    /// temp-file-plus-rename.
    fn write(&self, path: &str) -> Result<Box<dyn Write + Send>>;

    /// Removes a single file. Missing-file is not an error.
    fn remove(&self, path: &str) -> Result<()>;
}
