//! `backup.info` stanza file (§6.1): one per PostgreSQL stanza, recording
//! every catalog version the stanza has backed up under and the set of
//! backups currently on repository.

use std::collections::BTreeMap;
use std::io::Read as _;

use anyhow::{Context, Result};
use serde_json::json;

use pgib_buildcfg::{BACKUP_INFO_FILE, BACKUP_INFO_FILE_COPY, MANIFEST_FORMAT, PKG_VERSION};
use pgib_storage::Storage;
use pgib_types::CoreError;

/// One PostgreSQL catalog version the stanza has seen (§6.1). `id` is the
/// stanza-local database id referenced by a manifest's `db-id` header
/// field; it is stable for the life of the stanza even across major
/// version upgrades, which instead append a new [`StanzaDb`] entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StanzaDb {
    pub id: u32,
    pub version: String,
    pub system_id: u64,
    pub catalog_version: u32,
}

/// One completed backup recorded in `backup:history` (§6.1).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StanzaHistoryEntry {
    pub backup_label: String,
    pub backup_type: String,
    pub backup_timestamp_start: i64,
    pub backup_timestamp_stop: i64,
}

/// The stanza-level catalogue: every catalog version ever seen, plus which
/// backups currently exist on repository and which have since expired.
#[derive(Clone, Debug, Default)]
pub struct Stanza {
    pub db_current: Option<StanzaDb>,
    pub db_history: Vec<StanzaDb>,
    pub backup_current: Vec<String>,
    pub backup_history: Vec<StanzaHistoryEntry>,
}

impl Stanza {
    pub fn new(db: StanzaDb) -> Self {
        Stanza {
            db_history: vec![db.clone()],
            db_current: Some(db),
            backup_current: Vec::new(),
            backup_history: Vec::new(),
        }
    }

    /// Records a newly completed backup as both current and historical
    /// (§6.1: a backup starts in both sets and only leaves `backup_current`
    /// on expiry, which this core does not itself implement).
    pub fn record_backup(&mut self, entry: StanzaHistoryEntry) {
        self.backup_current.push(entry.backup_label.clone());
        self.backup_history.push(entry);
    }
}

const CHECKSUM_PLACEHOLDER: &str = "\"<placeholder>\"";

/// Serializes `stanza` to its canonical text form with a trailing
/// `[backrest]` checksum record, mirroring [`crate::text::save`]'s
/// integrity scheme.
pub fn save(stanza: &Stanza) -> String {
    let mut out = String::new();

    out.push_str("[db]\n");
    if let Some(db) = &stanza.db_current {
        out.push_str(&format!("db-catalog-version={}\n", db.catalog_version));
        out.push_str(&format!("db-id={}\n", db.id));
        out.push_str(&format!("db-system-id={}\n", db.system_id));
        out.push_str(&format!("db-version={}\n", json!(db.version)));
    }

    out.push_str("[db:history]\n");
    for db in &stanza.db_history {
        let value = json!({
            "db-catalog-version": db.catalog_version,
            "db-system-id": db.system_id,
            "db-version": db.version,
        });
        out.push_str(&format!("{}={}\n", db.id, value));
    }

    out.push_str("[backup:current]\n");
    for label in &stanza.backup_current {
        out.push_str(&format!("{label}=true\n"));
    }

    out.push_str("[backup:history]\n");
    for entry in &stanza.backup_history {
        let value = json!({
            "backup-timestamp-start": entry.backup_timestamp_start,
            "backup-timestamp-stop": entry.backup_timestamp_stop,
            "backup-type": entry.backup_type,
        });
        out.push_str(&format!("{}={}\n", entry.backup_label, value));
    }

    out.push_str("[backrest]\n");
    out.push_str(&format!("backrest-format={MANIFEST_FORMAT}\n"));
    out.push_str(&format!("backrest-version={}\n", json!(PKG_VERSION)));
    out.push_str(&format!("backrest-checksum={CHECKSUM_PLACEHOLDER}\n"));

    let checksum = hex::encode(openssl::sha::sha1(out.as_bytes()));
    out.replace(
        &format!("backrest-checksum={CHECKSUM_PLACEHOLDER}\n"),
        &format!("backrest-checksum={}\n", json!(checksum)),
    )
}

/// Parses a stanza file previously produced by [`save`], verifying its
/// checksum first.
pub fn load(text: &str) -> Result<Stanza> {
    let sections = parse_ini(text);

    let backrest = sections
        .get("backrest")
        .context("format error: missing [backrest] section")?;
    let stored_checksum = backrest
        .get("backrest-checksum")
        .context("format error: missing backrest-checksum")?
        .trim_matches('"')
        .to_string();
    verify_checksum(text, &stored_checksum)?;

    let mut stanza = Stanza::default();

    if let Some(db) = sections.get("db") {
        if let (Some(id), Some(version), Some(system_id), Some(catalog_version)) = (
            db.get("db-id").and_then(|v| v.parse().ok()),
            db.get("db-version").map(|v| unquote(v)),
            db.get("db-system-id").and_then(|v| v.parse().ok()),
            db.get("db-catalog-version").and_then(|v| v.parse().ok()),
        ) {
            stanza.db_current = Some(StanzaDb {
                id,
                version,
                system_id,
                catalog_version,
            });
        }
    }

    if let Some(history) = sections.get("db:history") {
        for (id, raw) in history {
            let v: serde_json::Value = serde_json::from_str(raw)?;
            stanza.db_history.push(StanzaDb {
                id: id.parse().context("format error: invalid db history id")?,
                version: v["db-version"].as_str().unwrap_or_default().to_string(),
                system_id: v["db-system-id"].as_u64().unwrap_or(0),
                catalog_version: v["db-catalog-version"].as_u64().unwrap_or(0) as u32,
            });
        }
    }

    if let Some(current) = sections.get("backup:current") {
        stanza.backup_current = current.keys().cloned().collect();
    }

    if let Some(history) = sections.get("backup:history") {
        for (label, raw) in history {
            let v: serde_json::Value = serde_json::from_str(raw)?;
            stanza.backup_history.push(StanzaHistoryEntry {
                backup_label: label.clone(),
                backup_type: v["backup-type"].as_str().unwrap_or_default().to_string(),
                backup_timestamp_start: v["backup-timestamp-start"].as_i64().unwrap_or(0),
                backup_timestamp_stop: v["backup-timestamp-stop"].as_i64().unwrap_or(0),
            });
        }
    }

    Ok(stanza)
}

fn unquote(raw: &str) -> String {
    serde_json::from_str::<serde_json::Value>(raw)
        .ok()
        .and_then(|v| v.as_str().map(|s| s.to_string()))
        .unwrap_or_else(|| raw.trim_matches('"').to_string())
}

type RawSections = BTreeMap<String, BTreeMap<String, String>>;

fn parse_ini(text: &str) -> RawSections {
    let mut sections: RawSections = BTreeMap::new();
    let mut current: Option<String> = None;

    for line in text.lines() {
        if let Some(name) = line.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            sections.entry(name.to_string()).or_default();
            current = Some(name.to_string());
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            if let Some(section) = &current {
                sections.entry(section.clone()).or_default().insert(key.to_string(), value.to_string());
            }
        }
    }

    sections
}

fn verify_checksum(text: &str, stored: &str) -> Result<()> {
    let mut replaced = String::with_capacity(text.len());
    for line in text.lines() {
        if line.starts_with("backrest-checksum=") {
            replaced.push_str("backrest-checksum=");
            replaced.push_str(CHECKSUM_PLACEHOLDER);
        } else {
            replaced.push_str(line);
        }
        replaced.push('\n');
    }
    let computed = hex::encode(openssl::sha::sha1(replaced.as_bytes()));
    if computed != stored {
        return Err(CoreError::Checksum(format!(
            "stanza checksum mismatch (stored {stored}, computed {computed})"
        ))
        .into());
    }
    Ok(())
}

/// Loads the stanza file from `storage`, with the same primary/`.copy`
/// fallback [`crate::text::load_from_storage`] applies to the manifest
/// (§4.4's "Failure model"; the stanza file is `[backrest]`-checksummed the
/// same way, so the same recovery rule applies).
pub fn load_from_storage(storage: &dyn Storage, primary_path: &str, copy_path: &str) -> Result<Stanza> {
    let primary_err = match read_and_load(storage, primary_path) {
        Ok(stanza) => return Ok(stanza),
        Err(e) => e,
    };

    match read_and_load(storage, copy_path) {
        Ok(stanza) => Ok(stanza),
        Err(copy_err) => Err(CoreError::FileOpen {
            path: format!("{primary_path} ({primary_err}), {copy_path} ({copy_err})"),
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "neither the stanza file nor its .copy sibling could be loaded",
            ),
        }
        .into()),
    }
}

fn read_and_load(storage: &dyn Storage, path: &str) -> Result<Stanza> {
    let mut text = String::new();
    storage
        .read(path)?
        .read_to_string(&mut text)
        .with_context(|| format!("could not read {path}"))?;
    load(&text)
}

/// Loads the canonical on-repository stanza file (`BACKUP_INFO_FILE`,
/// falling back to `BACKUP_INFO_FILE_COPY`).
pub fn load_stanza(storage: &dyn Storage) -> Result<Stanza> {
    load_from_storage(storage, BACKUP_INFO_FILE, BACKUP_INFO_FILE_COPY)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Stanza {
        let mut s = Stanza::new(StanzaDb {
            id: 1,
            version: "15".to_string(),
            system_id: 6_900_000_000_123_456_789,
            catalog_version: 1500,
        });
        s.record_backup(StanzaHistoryEntry {
            backup_label: "20260727-090000F".to_string(),
            backup_type: "full".to_string(),
            backup_timestamp_start: 1_700_000_000,
            backup_timestamp_stop: 1_700_000_100,
        });
        s
    }

    #[test]
    fn round_trip_preserves_db_and_backup_history() {
        let s = sample();
        let text = save(&s);
        let loaded = load(&text).unwrap();

        assert_eq!(loaded.db_current.unwrap().version, "15");
        assert_eq!(loaded.backup_current, vec!["20260727-090000F".to_string()]);
        assert_eq!(loaded.backup_history.len(), 1);
        assert_eq!(loaded.backup_history[0].backup_type, "full");
    }

    #[test]
    fn tampered_stanza_fails_checksum_verification() {
        let s = sample();
        let text = save(&s).replace("15", "16");
        assert!(load(&text).is_err());
    }

    #[test]
    fn load_stanza_falls_back_to_copy_when_primary_is_corrupt() {
        use pgib_storage::LocalStorage;

        let dir = tempdir();
        let storage = LocalStorage::new(dir.path());
        let s = sample();
        let good = save(&s);
        let corrupt = good.replace("20260727-090000F", "20260727-TAMPERED");

        {
            let mut w = storage.write(BACKUP_INFO_FILE).unwrap();
            std::io::Write::write_all(&mut w, corrupt.as_bytes()).unwrap();
        }
        {
            let mut w = storage.write(BACKUP_INFO_FILE_COPY).unwrap();
            std::io::Write::write_all(&mut w, good.as_bytes()).unwrap();
        }

        let loaded = load_stanza(&storage).unwrap();
        assert_eq!(loaded.backup_current, s.backup_current);
    }

    #[test]
    fn load_stanza_fails_with_file_open_error_when_both_attempts_fail() {
        use pgib_storage::LocalStorage;

        let dir = tempdir();
        let storage = LocalStorage::new(dir.path());

        let err = load_stanza(&storage).unwrap_err();
        assert!(matches!(err.downcast_ref::<CoreError>(), Some(CoreError::FileOpen { .. })));
    }

    fn tempdir() -> TempDir {
        TempDir::new()
    }

    /// Minimal self-cleaning temp directory, matching the one `pgib-storage`
    /// keeps for its own filesystem tests.
    struct TempDir(std::path::PathBuf);

    impl TempDir {
        fn new() -> Self {
            use std::sync::atomic::{AtomicU64, Ordering};
            static COUNTER: AtomicU64 = AtomicU64::new(0);

            let mut path = std::env::temp_dir();
            path.push(format!(
                "pgib-manifest-stanza-test-{}-{}",
                std::process::id(),
                COUNTER.fetch_add(1, Ordering::Relaxed)
            ));
            std::fs::create_dir_all(&path).unwrap();
            TempDir(path)
        }

        fn path(&self) -> &std::path::Path {
            &self.0
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }
}
