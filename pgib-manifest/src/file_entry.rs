use pgib_types::Mode;

use crate::owner::{OwnerId, ReferenceId};

/// Sub-file block-increment metadata (§3.1). Per invariant §3.2(7) the
/// three fields are all zero or all non-zero as a group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct BlockIncr {
    pub block_size: u32,
    pub checksum_size: u32,
    pub map_size: u64,
}

impl BlockIncr {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_present(&self) -> bool {
        self.block_size != 0 || self.checksum_size != 0 || self.map_size != 0
    }

    /// Validates invariant §3.2(7): all-zero or all-non-zero.
    pub fn is_well_formed(&self) -> bool {
        let present = [
            self.block_size != 0,
            self.checksum_size != 0,
            self.map_size != 0,
        ];
        present.iter().all(|p| *p) || present.iter().all(|p| !p)
    }
}

/// A regular file (§3.1). `copy`, `delta` and `resume` are transient,
/// recomputed per backup by the incremental-decision engine (§4.2.3) and
/// never persisted verbatim (they drive the copy pass, not the saved
/// manifest).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub mode: Mode,
    pub user: Option<OwnerId>,
    pub group: Option<OwnerId>,

    pub size: u64,
    pub size_repo: u64,
    pub timestamp: i64,

    pub checksum_sha1: [u8; 20],
    pub checksum_repo_sha1: Option<[u8; 20]>,

    pub reference: Option<ReferenceId>,

    pub bundle_id: Option<u64>,
    pub bundle_offset: u64,

    pub block_incr: BlockIncr,

    pub checksum_page: Option<bool>,
    /// Page numbers that failed a checksum-page verification, if any.
    pub checksum_page_error: Vec<u64>,

    pub copy: bool,
    pub delta: bool,
    pub resume: bool,
}

impl FileEntry {
    pub fn is_zero_size(&self) -> bool {
        self.size == 0
    }

    /// Invariant §3.2(6): `size > 0` implies `size_repo > 0`.
    pub fn size_repo_consistent(&self) -> bool {
        self.size == 0 || self.size_repo > 0
    }

    /// Invariant §3.2(8): `bundle_offset != 0` implies `bundle_id` is set.
    pub fn bundle_offset_consistent(&self) -> bool {
        self.bundle_offset == 0 || self.bundle_id.is_some()
    }
}

/// The well-known SHA-1 digest of the empty string (§3.2 invariant 5),
/// recorded verbatim as `checksum_sha1` for every zero-size file.
pub const SHA1_EMPTY: [u8; 20] = [
    0xda, 0x39, 0xa3, 0xee, 0x5e, 0x6b, 0x4b, 0x0d, 0x32, 0x55, 0xbf, 0xef, 0x95, 0x60, 0x18, 0x90,
    0xaf, 0xd8, 0x07, 0x09,
];

#[cfg(test)]
mod tests {
    use super::*;

    fn file(size: u64, size_repo: u64) -> FileEntry {
        FileEntry {
            name: "pg_data/base/1/2".to_string(),
            mode: Mode::new(0o600),
            user: None,
            group: None,
            size,
            size_repo,
            timestamp: 0,
            checksum_sha1: SHA1_EMPTY,
            checksum_repo_sha1: None,
            reference: None,
            bundle_id: None,
            bundle_offset: 0,
            block_incr: BlockIncr::none(),
            checksum_page: None,
            checksum_page_error: Vec::new(),
            copy: true,
            delta: false,
            resume: false,
        }
    }

    #[test]
    fn zero_size_file_carries_well_known_empty_sha1() {
        let f = file(0, 0);
        assert!(f.is_zero_size());
        assert_eq!(f.checksum_sha1, SHA1_EMPTY);
    }

    #[test]
    fn nonzero_size_requires_nonzero_repo_size() {
        assert!(!file(100, 0).size_repo_consistent());
        assert!(file(100, 40).size_repo_consistent());
        assert!(file(0, 0).size_repo_consistent());
    }

    #[test]
    fn block_incr_must_be_all_or_nothing() {
        assert!(BlockIncr::none().is_well_formed());
        assert!(BlockIncr {
            block_size: 1 << 16,
            checksum_size: 6,
            map_size: 128,
        }
        .is_well_formed());
        assert!(!BlockIncr {
            block_size: 1 << 16,
            checksum_size: 0,
            map_size: 128,
        }
        .is_well_formed());
    }
}
