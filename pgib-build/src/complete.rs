//! Complete phase (§4.2.4): records everything only known once the copy
//! pass has finished - the stop LSN/WAL position, the database list, and
//! user annotations.

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use log::debug;

use pgib_manifest::{DatabaseEntry, Manifest};
use pgib_types::{Lsn, WalSegment};

/// Parameters for the complete phase.
pub struct CompleteOptions {
    pub lsn_start: Option<Lsn>,
    pub lsn_stop: Option<Lsn>,
    pub archive_stop: Option<WalSegment>,
    pub backup_timestamp_stop: i64,
    pub databases: Vec<DatabaseEntry>,
    pub annotations: BTreeMap<String, String>,
    pub bundle_raw: bool,
}

/// §4.2.4: `prior`, if given, pins `bundle-raw` - the spec calls changing
/// it mid backup-set an assertion failure rather than a recoverable error,
/// since it would make the existing reference chain unreadable.
pub fn complete(manifest: &mut Manifest, prior: Option<&Manifest>, options: CompleteOptions) -> Result<()> {
    debug!(
        "complete: start databases={} annotations={}",
        options.databases.len(),
        options.annotations.len()
    );

    if let Some(prior) = prior {
        if prior.header.option_bundle_raw != options.bundle_raw {
            bail!("assertion failed: bundle-raw cannot change within a backup set");
        }
    }

    manifest.header.option_bundle_raw = options.bundle_raw;
    manifest.header.lsn_start = options.lsn_start;
    manifest.header.lsn_stop = options.lsn_stop;
    manifest.header.archive_stop = options.archive_stop;
    manifest.header.backup_timestamp_stop = Some(options.backup_timestamp_stop);

    for db in options.databases {
        manifest.database_add(db);
    }

    // §4.4: an annotation with an empty value is equivalent to no
    // annotation at all and isn't written out.
    for (key, value) in options.annotations {
        if !value.is_empty() {
            manifest.header.annotations.insert(key, value);
        }
    }

    manifest.sort();

    debug!(
        "complete: end databases={} annotations={}",
        manifest.databases().len(),
        manifest.header.annotations.len()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgib_manifest::ManifestHeader;

    fn header(bundle_raw: bool) -> ManifestHeader {
        let mut h = ManifestHeader::new_full(1_700_000_000, 1, "15", 1500, 1300, 1, true);
        h.option_bundle_raw = bundle_raw;
        h
    }

    fn manifest(bundle_raw: bool) -> Manifest {
        let mut m = Manifest::new(header(bundle_raw), "/data");
        m.set_backup_label("20260727-080000F");
        m
    }

    fn options(bundle_raw: bool) -> CompleteOptions {
        CompleteOptions {
            lsn_start: Some(Lsn(0x10)),
            lsn_stop: Some(Lsn(0x20)),
            archive_stop: Some(WalSegment::parse("000000010000000100000011").unwrap()),
            backup_timestamp_stop: 1_700_001_000,
            databases: vec![DatabaseEntry {
                name: "postgres".to_string(),
                oid: 5,
                last_system_oid: 13804,
            }],
            annotations: BTreeMap::new(),
            bundle_raw,
        }
    }

    #[test]
    fn records_stop_position_and_databases() {
        let mut m = manifest(false);
        complete(&mut m, None, options(false)).unwrap();

        assert_eq!(m.header.lsn_stop, Some(Lsn(0x20)));
        assert_eq!(m.header.backup_timestamp_stop, Some(1_700_001_000));
        assert_eq!(m.databases().len(), 1);
        assert_eq!(m.databases()[0].name, "postgres");
    }

    #[test]
    fn empty_annotation_values_are_dropped() {
        let mut m = manifest(false);
        let mut opts = options(false);
        opts.annotations.insert("comment".to_string(), "a note".to_string());
        opts.annotations.insert("dropped".to_string(), String::new());

        complete(&mut m, None, opts).unwrap();

        assert_eq!(m.header.annotations.get("comment").map(String::as_str), Some("a note"));
        assert!(!m.header.annotations.contains_key("dropped"));
    }

    #[test]
    fn bundle_raw_mismatch_against_prior_is_rejected() {
        let prior = manifest(true);
        let mut m = manifest(false);

        let err = complete(&mut m, Some(&prior), options(false)).unwrap_err();
        assert!(err.to_string().contains("bundle-raw"));
    }

    #[test]
    fn bundle_raw_match_against_prior_succeeds() {
        let prior = manifest(true);
        let mut m = manifest(true);

        complete(&mut m, Some(&prior), options(true)).unwrap();
        assert!(m.header.option_bundle_raw);
    }
}
