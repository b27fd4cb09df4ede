//! Incremental phase (§4.2.3): compares this (already built and validated)
//! manifest against a prior one and makes the per-file copy/delta/reference
//! decisions that drive the actual copy pass.

use anyhow::Result;
use log::{debug, warn};

use pgib_manifest::Manifest;
use pgib_types::{BackupType, WalSegment};

/// Parameters for the incremental phase.
pub struct IncrementalOptions {
    pub backup_type: BackupType,
    pub archive_start: Option<WalSegment>,
}

/// §4.2.3: `prior` must be a `full` manifest for a `diff` backup, or a
/// `full`/`diff` manifest for an `incr` backup (enforced by the caller via
/// `BackupType::requires_prior`; this function assumes it's already been
/// checked since choosing the prior backup is an orchestrator concern).
pub fn incremental(manifest: &mut Manifest, prior: &Manifest, options: IncrementalOptions) -> Result<()> {
    debug!(
        "incremental: start type={} prior={}",
        options.backup_type, prior.header.backup_label
    );

    manifest.header.backup_type = options.backup_type;
    manifest.header.archive_start = options.archive_start.clone();

    let mut delta = manifest.header.option_delta;

    // Step 1: timeline-switch test.
    if let (Some(start), Some(stop)) = (&manifest.header.archive_start, &prior.header.archive_stop) {
        if !start.same_timeline(stop) {
            if !delta {
                warn!(
                    "a timeline switch has occurred since the {} backup, enabling delta checksum",
                    prior.header.backup_label
                );
            }
            delta = true;
        }
    }

    // Step 2: online-flag change test.
    if prior.header.option_online != manifest.header.option_online {
        debug!("incremental: online flag changed since prior backup, enabling delta checksum");
        delta = true;
    }

    // Step 3: anomaly scan over every file pair (f, p).
    for f in manifest.files() {
        let Some(p) = prior.file_find(&f.name) else {
            continue;
        };
        if f.timestamp < p.timestamp {
            warn!(
                "file '{}' has a timestamp earlier than in the {} backup, enabling delta checksum",
                f.name, prior.header.backup_label
            );
            delta = true;
        } else if f.size != p.size && f.timestamp == p.timestamp {
            warn!(
                "file '{}' has the same timestamp but a different size than in the {} backup, enabling delta checksum",
                f.name, prior.header.backup_label
            );
            delta = true;
        }
    }
    manifest.header.option_delta = delta;

    // Step 4: per-file reference decision, now that `delta` is final.
    let names: Vec<String> = manifest.files().iter().map(|f| f.name.clone()).collect();
    for name in names {
        let Some(prior_entry) = prior.file_find(&name).cloned() else {
            continue;
        };

        let prior_reference_name = prior_entry
            .reference
            .map(|r| prior.reference_name(r).to_string())
            .unwrap_or_else(|| prior.header.backup_label.clone());
        let reference_id = manifest.intern_reference(&prior_reference_name);

        manifest.file_update(&name, |f| {
            let file_size_equal = f.size == prior_entry.size;
            let block_incr_preserve = prior_entry.block_incr.map_size > 0
                && f.size >= prior_entry.block_incr.block_size as u64;

            f.delta = delta && file_size_equal && f.size != 0;

            if f.size == 0 && prior_entry.size == 0 {
                f.copy = false;
            }
            if !f.delta && file_size_equal && f.timestamp == prior_entry.timestamp {
                f.copy = false;
            }

            if file_size_equal || block_incr_preserve {
                f.size = prior_entry.size;
                f.size_repo = prior_entry.size_repo;
                f.checksum_sha1 = prior_entry.checksum_sha1;
                f.checksum_repo_sha1 = prior_entry.checksum_repo_sha1;
                f.reference = Some(reference_id);
                f.checksum_page = prior_entry.checksum_page;
                f.checksum_page_error = prior_entry.checksum_page_error.clone();
                f.bundle_id = prior_entry.bundle_id;
                f.bundle_offset = prior_entry.bundle_offset;
                f.block_incr = prior_entry.block_incr;
            }
        })?;
    }

    // Step 5: carry the prior reference list forward and record the prior
    // backup label.
    let prior_labels: Vec<String> = prior.references().map(|(_, s)| s.to_string()).collect();
    for label in prior_labels {
        manifest.intern_reference(&label);
    }
    manifest.header.backup_label_prior = Some(prior.header.backup_label.clone());

    debug!(
        "incremental: end delta={} files_referenced={}",
        manifest.header.option_delta,
        manifest.files().iter().filter(|f| !f.copy).count()
    );

    Ok(())
}
