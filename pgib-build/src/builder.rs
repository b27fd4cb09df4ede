//! Build phase (§4.2.1) and validate phase (§4.2.2).

use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};
use log::{debug, warn};

use pgib_manifest::{
    link_check, BlockIncr, FileEntry, LinkEntry, Manifest, ManifestHeader, PathEntry, Target,
    SHA1_EMPTY,
};
use pgib_scan::{EntryKind, ExcludeSet, ScanEntry, Scanner};
use pgib_storage::{Storage, StorageInfo};

use crate::owner::OwnerResolver;

/// A target beyond the mandatory `pg_data` root (§3.1): a tablespace, or a
/// symlinked single file. `target` carries the `Target` record itself;
/// scanning happens at the filesystem path `target.name` resolves to
/// through `storage` (a tablespace oid directory is a symlink under
/// `pg_data/pg_tblspc/<oid>` that a real `LocalStorage` follows
/// transparently, matching how pgBackRest walks the live cluster).
#[derive(Clone, Debug)]
pub struct TargetSpec {
    pub target: Target,
}

/// Parameters for the build phase (§4.2.1). The core takes a plain struct
/// rather than parsing any config itself (§2.3) - the orchestrator is
/// responsible for turning stanza/CLI configuration into this shape.
pub struct BuildOptions {
    pub db_id: u32,
    pub db_version: String,
    pub db_catalog_version: u32,
    pub db_control_version: u32,
    pub db_system_id: u64,
    pub online: bool,
    pub backup_timestamp_start: i64,
    /// Additional targets (tablespaces, file links) beyond `pg_data`.
    pub extra_targets: Vec<TargetSpec>,
}

fn epoch_seconds(info: &StorageInfo) -> i64 {
    info.mtime
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn owner_ids(
    manifest: &mut Manifest,
    owners: &dyn OwnerResolver,
    info: &StorageInfo,
) -> (Option<pgib_manifest::OwnerId>, Option<pgib_manifest::OwnerId>) {
    let user = owners.user_name(info.uid).map(|n| manifest.intern_owner(&n));
    let group = owners.group_name(info.gid).map(|n| manifest.intern_owner(&n));
    (user, group)
}

fn path_entry_from(manifest: &mut Manifest, owners: &dyn OwnerResolver, e: &ScanEntry) -> PathEntry {
    let (user, group) = owner_ids(manifest, owners, &e.info);
    PathEntry {
        name: e.name.clone(),
        mode: e.info.mode,
        user,
        group,
    }
}

fn file_entry_from(manifest: &mut Manifest, owners: &dyn OwnerResolver, e: &ScanEntry) -> FileEntry {
    let (user, group) = owner_ids(manifest, owners, &e.info);
    let size = e.info.size;
    FileEntry {
        name: e.name.clone(),
        mode: e.info.mode,
        user,
        group,
        size,
        // Repository size is only known once compression/encryption has
        // run during the (external) copy pass; it starts equal to the
        // plaintext size and is corrected by `Manifest::file_update`.
        size_repo: size,
        timestamp: epoch_seconds(&e.info),
        // §3.2 invariant 5: zero-size files carry the well-known empty
        // digest up front; non-empty files get theirs from the copy pass's
        // hash filter (§4.6), which calls `file_update` once it knows it.
        checksum_sha1: if size == 0 { SHA1_EMPTY } else { [0u8; 20] },
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

fn link_entry_from(manifest: &mut Manifest, owners: &dyn OwnerResolver, e: &ScanEntry) -> LinkEntry {
    let (user, group) = owner_ids(manifest, owners, &e.info);
    LinkEntry {
        name: e.name.clone(),
        destination: e.info.link_destination.clone().unwrap_or_default(),
        user,
        group,
    }
}

fn add_scanned_entries(
    manifest: &mut Manifest,
    storage: &dyn Storage,
    exclude: &ExcludeSet,
    owners: &dyn OwnerResolver,
    root: &str,
) -> Result<()> {
    let scanner = Scanner::new(storage, exclude);
    let entries = scanner.scan(root)?;
    for e in entries {
        match e.kind {
            EntryKind::Path => {
                let entry = path_entry_from(manifest, owners, &e);
                manifest.path_add(entry);
            }
            EntryKind::File => {
                let entry = file_entry_from(manifest, owners, &e);
                manifest.file_add(entry);
            }
            EntryKind::Link => {
                let entry = link_entry_from(manifest, owners, &e);
                manifest.link_add(entry);
            }
        }
    }
    Ok(())
}

/// Assembles a [`Manifest`] from `storage` (§4.2.1).
///
/// `storage` must resolve `pg_data` to the live data directory; each
/// `extra_targets` entry's `target.name` must likewise resolve through
/// `storage` to that target's root (a tablespace oid directory or a
/// symlinked file).
pub fn build(
    storage: &dyn Storage,
    pg_data_path: &str,
    exclude: &ExcludeSet,
    owners: &dyn OwnerResolver,
    options: BuildOptions,
) -> Result<Manifest> {
    debug!(
        "build: start db_id={} online={} extra_targets={}",
        options.db_id,
        options.online,
        options.extra_targets.len()
    );

    // Step 1: initialize header.
    let header = ManifestHeader::new_full(
        options.backup_timestamp_start,
        options.db_id,
        options.db_version,
        options.db_catalog_version,
        options.db_control_version,
        options.db_system_id,
        options.online,
    );
    let mut manifest = Manifest::new(header, pg_data_path);

    // Step 2: the root target's own Path entry, stat'd directly so its
    // mode/owner seed the file/path defaults computed later at save time
    // (§4.4 "Default factoring").
    let root_info = storage
        .info("pg_data")
        .context("could not stat pg_data root")?;
    let (user, group) = owner_ids(&mut manifest, owners, &root_info);
    manifest.path_add(PathEntry {
        name: "pg_data".to_string(),
        mode: root_info.mode,
        user,
        group,
    });

    // Step 3: consume scanner output for pg_data.
    add_scanned_entries(&mut manifest, storage, exclude, owners, "pg_data")?;

    // Step 3 (continued): every additional target (tablespace, file link).
    for spec in &options.extra_targets {
        manifest.target_add(spec.target.clone());

        if let Some(file_name) = &spec.target.file {
            let info = storage
                .info(&spec.target.name)
                .with_context(|| format!("could not stat target '{}'", spec.target.name))?;
            let (user, group) = owner_ids(&mut manifest, owners, &info);
            manifest.file_add(FileEntry {
                name: format!("{}/{}", spec.target.name, file_name),
                mode: info.mode,
                user,
                group,
                size: info.size,
                size_repo: info.size,
                timestamp: epoch_seconds(&info),
                checksum_sha1: if info.size == 0 { SHA1_EMPTY } else { [0u8; 20] },
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
            });
            continue;
        }

        let info = storage
            .info(&spec.target.name)
            .with_context(|| format!("could not stat target '{}'", spec.target.name))?;
        let (user, group) = owner_ids(&mut manifest, owners, &info);
        manifest.path_add(PathEntry {
            name: spec.target.name.clone(),
            mode: info.mode,
            user,
            group,
        });
        add_scanned_entries(&mut manifest, storage, exclude, owners, &spec.target.name)?;
    }

    // Step 4: sort every set ascending (unlogged-relation removal, step 5,
    // already ran inside the scanner - see pgib_scan::Scanner::scan).
    manifest.sort();

    // Step 6: §3.2 invariant 4.
    link_check(&manifest)?;

    debug!(
        "build: end files={} paths={} links={} targets={}",
        manifest.files().len(),
        manifest.paths().len(),
        manifest.links().len(),
        manifest.targets().len()
    );

    Ok(manifest)
}

/// Parameters for the validate phase (§4.2.2).
pub struct ValidateOptions {
    pub copy_start: i64,
    pub compress_type: String,
}

/// §4.2.2: stores `backupOptionDelta`, warning and forcing it on if any
/// file's timestamp is later than the copy-start time, and records
/// `backupTimestampCopyStart` (with the online +1s compensation).
pub fn validate(manifest: &mut Manifest, options: ValidateOptions) {
    debug!("validate: start copy_start={}", options.copy_start);

    let mut delta = manifest.header.option_delta;
    if !delta {
        if let Some(f) = manifest
            .files()
            .iter()
            .find(|f| f.timestamp > options.copy_start)
        {
            warn!(
                "file '{}' has a timestamp in the future, enabling delta checksum",
                f.name
            );
            delta = true;
        }
    }
    manifest.header.option_delta = delta;
    manifest.header.option_compress_type = options.compress_type;

    let online_adjust = if manifest.header.option_online { 1 } else { 0 };
    manifest.header.backup_timestamp_copy_start = Some(options.copy_start + online_adjust);

    debug!(
        "validate: end delta={} timestamp_copy_start={:?}",
        manifest.header.option_delta, manifest.header.backup_timestamp_copy_start
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::owner::NullOwnerResolver;
    use pgib_storage::LocalStorage;
    use std::fs;

    struct TempDir(std::path::PathBuf);

    impl TempDir {
        fn new() -> Self {
            use std::sync::atomic::{AtomicU64, Ordering};
            static COUNTER: AtomicU64 = AtomicU64::new(0);
            let mut path = std::env::temp_dir();
            path.push(format!(
                "pgib-build-test-{}-{}",
                std::process::id(),
                COUNTER.fetch_add(1, Ordering::Relaxed)
            ));
            fs::create_dir_all(&path).unwrap();
            TempDir(path)
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.0);
        }
    }

    fn options() -> BuildOptions {
        BuildOptions {
            db_id: 1,
            db_version: "15".to_string(),
            db_catalog_version: 1500,
            db_control_version: 1300,
            db_system_id: 6_900_000_000_123_456_789,
            online: true,
            backup_timestamp_start: 1_700_000_000,
            extra_targets: Vec::new(),
        }
    }

    #[test]
    fn build_produces_a_sorted_manifest_with_one_pg_data_target() {
        let dir = TempDir::new();
        fs::create_dir_all(dir.0.join("pg_data/base/1")).unwrap();
        fs::write(dir.0.join("pg_data/PG_VERSION"), "15\n").unwrap();
        fs::write(dir.0.join("pg_data/base/1/16385"), "data").unwrap();

        let storage = LocalStorage::new(dir.0.clone());
        let exclude = ExcludeSet::new();
        let manifest = build(&storage, "/var/lib/postgresql/15/main", &exclude, &NullOwnerResolver, options())
            .unwrap();

        assert!(manifest.check_pg_data_invariant().is_ok());
        assert!(manifest.file_find("pg_data/PG_VERSION").is_some());
        assert!(manifest.file_find("pg_data/base/1/16385").is_some());
        let names: Vec<_> = manifest.files().iter().map(|f| f.name.as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }

    #[test]
    fn zero_size_file_gets_well_known_empty_checksum_up_front() {
        let dir = TempDir::new();
        fs::create_dir_all(dir.0.join("pg_data")).unwrap();
        fs::write(dir.0.join("pg_data/empty"), b"").unwrap();

        let storage = LocalStorage::new(dir.0.clone());
        let exclude = ExcludeSet::new();
        let manifest = build(&storage, "/data", &exclude, &NullOwnerResolver, options()).unwrap();

        let f = manifest.file_find("pg_data/empty").unwrap();
        assert_eq!(f.checksum_sha1, SHA1_EMPTY);
    }

    #[test]
    fn validate_enables_delta_on_future_dated_file() {
        let dir = TempDir::new();
        fs::create_dir_all(dir.0.join("pg_data")).unwrap();
        fs::write(dir.0.join("pg_data/PG_VERSION"), "15").unwrap();

        let storage = LocalStorage::new(dir.0.clone());
        let exclude = ExcludeSet::new();
        let mut manifest = build(&storage, "/data", &exclude, &NullOwnerResolver, options()).unwrap();

        // Force a future timestamp to exercise the validate-phase warning.
        manifest
            .file_update("pg_data/PG_VERSION", |f| f.timestamp = 9_999_999_999)
            .unwrap();

        validate(
            &mut manifest,
            ValidateOptions {
                copy_start: 1_700_000_000,
                compress_type: "zstd".to_string(),
            },
        );

        assert!(manifest.header.option_delta);
        assert_eq!(manifest.header.backup_timestamp_copy_start, Some(1_700_000_001));
    }

    #[test]
    fn validate_without_online_skips_the_one_second_adjustment() {
        let dir = TempDir::new();
        fs::create_dir_all(dir.0.join("pg_data")).unwrap();

        let storage = LocalStorage::new(dir.0.clone());
        let exclude = ExcludeSet::new();
        let mut opts = options();
        opts.online = false;
        let mut manifest = build(&storage, "/data", &exclude, &NullOwnerResolver, opts).unwrap();

        validate(
            &mut manifest,
            ValidateOptions {
                copy_start: 1_700_000_000,
                compress_type: "none".to_string(),
            },
        );

        assert_eq!(manifest.header.backup_timestamp_copy_start, Some(1_700_000_000));
    }
}
