//! Version and on-repository format constants shared across the core.

/// Software version recorded in the `[backrest]` trailer of every saved manifest.
pub const PKG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION_MAJOR"),
    ".",
    env!("CARGO_PKG_VERSION_MINOR"),
    ".",
    env!("CARGO_PKG_VERSION_PATCH"),
);

/// On-repository manifest format number. Bumped whenever a change to the
/// section layout or encoding rules in `manifest::text` would not round-trip
/// against an older reader.
pub const MANIFEST_FORMAT: u32 = 5;

/// Default repository-relative name of a saved manifest and its fallback copy.
pub const MANIFEST_FILE: &str = "backup.manifest";
pub const MANIFEST_FILE_COPY: &str = "backup.manifest.copy";

/// Default repository-relative name of the stanza-level backup info file.
pub const BACKUP_INFO_FILE: &str = "backup.info";
pub const BACKUP_INFO_FILE_COPY: &str = "backup.info.copy";
