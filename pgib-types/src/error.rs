//! Error taxonomy shared by the manifest, scanner and block-delta components.
//!
//! Broken invariants (`AssertError` in the error-handling design) are never
//! surfaced through this enum - they're raised with `anyhow::bail!` and an
//! `"assertion failed:"`-prefixed message instead, since they indicate a bug
//! in the core and are never caught by a caller. Everything a caller might
//! reasonably distinguish and react to - a load-fallback decision, a
//! link-check violation, a checksum mismatch, a cipher framing error - gets
//! its own variant here instead.
//!
//! Option/parameter validation, WAL-archive/stanza-metadata reconciliation
//! and stanza lock acquisition belong to the orchestrator layer (CLI/option
//! parsing and stanza/lock files are out of scope for this crate); this
//! taxonomy doesn't carry variants for error kinds this core never raises.

#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    #[error("format error: {0}")]
    Format(String),

    #[error("could not open {path}: {source}")]
    FileOpen {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Requested object is absent; callers may catch this to drive the
    /// manifest-copy fallback (§4.4).
    #[error("missing: {0}")]
    FileMissing(String),

    #[error("checksum mismatch for {0}")]
    Checksum(String),

    #[error("cipher error: {0}")]
    Cipher(String),

    #[error("link destination error: {0}")]
    LinkDestination(String),
}

impl CoreError {
    pub fn format<T: Into<String>>(msg: T) -> Self {
        CoreError::Format(msg.into())
    }
}
