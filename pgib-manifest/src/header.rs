use std::collections::BTreeMap;

use pgib_types::{BackupType, Lsn, WalSegment};

/// The `ManifestData` header (§4.2.1, §4.4 `[backup]`/`[backup:db]`/
/// `[backup:option]` sections).
#[derive(Clone, Debug)]
pub struct ManifestHeader {
    pub backup_label: String,
    pub backup_label_prior: Option<String>,
    pub backup_type: BackupType,

    pub backup_timestamp_start: i64,
    pub backup_timestamp_stop: Option<i64>,
    pub backup_timestamp_copy_start: Option<i64>,

    pub archive_start: Option<WalSegment>,
    pub archive_stop: Option<WalSegment>,
    pub lsn_start: Option<Lsn>,
    pub lsn_stop: Option<Lsn>,

    pub db_id: u32,
    pub db_version: String,
    pub db_catalog_version: u32,
    pub db_control_version: u32,
    pub db_system_id: u64,

    pub option_online: bool,
    pub option_checksum_page: bool,
    pub option_bundle: bool,
    pub option_bundle_raw: bool,
    pub option_block_incr: bool,
    pub option_delta: bool,
    pub option_hardlink: bool,
    pub option_archive_check: bool,
    pub option_archive_copy: bool,
    pub option_standby: bool,
    pub option_compress_type: String,
    pub option_process_max: u32,

    pub annotations: BTreeMap<String, String>,
}

impl ManifestHeader {
    /// §4.2.1 step 1: a freshly initialized header for a `full` backup
    /// that hasn't been through `validate`/`incremental`/`complete` yet.
    pub fn new_full(
        backup_timestamp_start: i64,
        db_id: u32,
        db_version: impl Into<String>,
        db_catalog_version: u32,
        db_control_version: u32,
        db_system_id: u64,
        online: bool,
    ) -> Self {
        ManifestHeader {
            backup_label: String::new(),
            backup_label_prior: None,
            backup_type: BackupType::Full,
            backup_timestamp_start,
            backup_timestamp_stop: None,
            backup_timestamp_copy_start: None,
            archive_start: None,
            archive_stop: None,
            lsn_start: None,
            lsn_stop: None,
            db_id,
            db_version: db_version.into(),
            db_catalog_version,
            db_control_version,
            db_system_id,
            option_online: online,
            option_checksum_page: false,
            option_bundle: false,
            option_bundle_raw: false,
            option_block_incr: false,
            option_delta: false,
            option_hardlink: false,
            option_archive_check: true,
            option_archive_copy: false,
            option_standby: false,
            option_compress_type: "none".to_string(),
            option_process_max: 1,
            annotations: BTreeMap::new(),
        }
    }
}
