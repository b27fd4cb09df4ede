//! Manifest text serialization (§4.4): a canonical, deterministic,
//! sectioned INI-like format with default-value factoring and a trailing
//! SHA-1 integrity record.

use std::collections::BTreeMap;
use std::io::Read as _;

use anyhow::{bail, Context, Result};
use serde_json::{json, Map, Value};

use pgib_buildcfg::{MANIFEST_FILE, MANIFEST_FILE_COPY, MANIFEST_FORMAT, PKG_VERSION};
use pgib_storage::Storage;
use pgib_tools::mcv::{MostCommonValue, Variant as McvVariant};
use pgib_types::{BackupType, CoreError, Lsn, Mode, TargetType, WalSegment};

use crate::database_entry::DatabaseEntry;
use crate::file_entry::{BlockIncr, FileEntry};
use crate::header::ManifestHeader;
use crate::link_entry::LinkEntry;
use crate::manifest::Manifest;
use crate::owner::OwnerId;
use crate::path_entry::PathEntry;
use crate::target::Target;
use crate::variant::Variant;

/// Key used for the primary (plaintext) SHA-1 on disk. The legacy name
/// predates the "primary" terminology and is kept for backward
/// compatibility (Design Notes).
const KEY_PRIMARY: &str = "master";

const CHECKSUM_PLACEHOLDER: &str = "\"<placeholder>\"";

/// An ordered set of INI sections, each holding key/value pairs in
/// byte-wise sorted order (`BTreeMap` gives us that for free).
#[derive(Default)]
struct Sections(Vec<(String, BTreeMap<String, String>)>);

impl Sections {
    fn section(&mut self, name: &str) -> &mut BTreeMap<String, String> {
        if !self.0.iter().any(|(n, _)| n == name) {
            self.0.push((name.to_string(), BTreeMap::new()));
        }
        &mut self.0.iter_mut().find(|(n, _)| n == name).unwrap().1
    }

    fn render(&self) -> String {
        let mut out = String::new();
        for (name, kv) in &self.0 {
            if kv.is_empty() && name != "backrest" {
                continue;
            }
            out.push_str(&format!("[{name}]\n"));
            for (k, v) in kv {
                out.push_str(k);
                out.push('=');
                out.push_str(v);
                out.push('\n');
            }
        }
        out
    }
}

fn set(sections: &mut Sections, section: &str, key: &str, value: Value) {
    sections.section(section).insert(key.to_string(), value.to_string());
}

fn owner_json(manifest: &Manifest, owner: Option<OwnerId>) -> Value {
    match owner {
        Some(id) => json!(manifest.owner_name(id)),
        None => Value::Bool(false),
    }
}

fn mcv_owner(owner: Option<OwnerId>, manifest: &Manifest) -> McvVariant {
    match owner {
        Some(id) => McvVariant::Str(manifest.owner_name(id).to_string()),
        None => McvVariant::Bool(false),
    }
}

struct FileDefaults {
    mode: Mode,
    user: Option<String>,
    group: Option<String>,
    primary: [u8; 20],
}

struct LinkDefaults {
    user: Option<String>,
    group: Option<String>,
}

struct PathDefaults {
    mode: Mode,
    user: Option<String>,
    group: Option<String>,
}

fn compute_file_defaults(manifest: &Manifest) -> FileDefaults {
    let mut mode_mcv = MostCommonValue::new();
    let mut user_mcv = MostCommonValue::new();
    let mut group_mcv = MostCommonValue::new();
    let mut primary_mcv = MostCommonValue::new();

    for f in manifest.files() {
        mode_mcv.update(McvVariant::UInt(f.mode.bits() as u64));
        user_mcv.update(mcv_owner(f.user, manifest));
        group_mcv.update(mcv_owner(f.group, manifest));
        primary_mcv.update(McvVariant::Str(hex::encode(f.checksum_sha1)));
    }

    FileDefaults {
        mode: match mode_mcv.result() {
            Some(McvVariant::UInt(v)) => Mode::new(*v as u16),
            _ => Mode::new(0o600),
        },
        user: match user_mcv.result() {
            Some(McvVariant::Str(s)) => Some(s.clone()),
            _ => None,
        },
        group: match group_mcv.result() {
            Some(McvVariant::Str(s)) => Some(s.clone()),
            _ => None,
        },
        primary: match primary_mcv.result() {
            Some(McvVariant::Str(s)) => {
                let mut buf = [0u8; 20];
                if let Ok(decoded) = hex::decode(s) {
                    if decoded.len() == 20 {
                        buf.copy_from_slice(&decoded);
                    }
                }
                buf
            }
            _ => [0u8; 20],
        },
    }
}

fn compute_link_defaults(manifest: &Manifest) -> LinkDefaults {
    let mut user_mcv = MostCommonValue::new();
    let mut group_mcv = MostCommonValue::new();
    for l in manifest.links() {
        user_mcv.update(mcv_owner(l.user, manifest));
        group_mcv.update(mcv_owner(l.group, manifest));
    }
    LinkDefaults {
        user: match user_mcv.result() {
            Some(McvVariant::Str(s)) => Some(s.clone()),
            _ => None,
        },
        group: match group_mcv.result() {
            Some(McvVariant::Str(s)) => Some(s.clone()),
            _ => None,
        },
    }
}

fn compute_path_defaults(manifest: &Manifest) -> PathDefaults {
    let mut mode_mcv = MostCommonValue::new();
    let mut user_mcv = MostCommonValue::new();
    let mut group_mcv = MostCommonValue::new();
    for p in manifest.paths() {
        mode_mcv.update(McvVariant::UInt(p.mode.bits() as u64));
        user_mcv.update(mcv_owner(p.user, manifest));
        group_mcv.update(mcv_owner(p.group, manifest));
    }
    PathDefaults {
        mode: match mode_mcv.result() {
            Some(McvVariant::UInt(v)) => Mode::new(*v as u16),
            _ => Mode::new(0o700),
        },
        user: match user_mcv.result() {
            Some(McvVariant::Str(s)) => Some(s.clone()),
            _ => None,
        },
        group: match group_mcv.result() {
            Some(McvVariant::Str(s)) => Some(s.clone()),
            _ => None,
        },
    }
}

/// Serializes `manifest` to its canonical on-repository text form,
/// including the trailing `[backrest]` checksum record (§4.4).
pub fn save(manifest: &Manifest) -> String {
    let mut sections = Sections::default();
    let h = &manifest.header;

    // [backup]
    if let Some(start) = &h.archive_start {
        set(&mut sections, "backup", "backup-archive-start", json!(start.as_str()));
    }
    if let Some(stop) = &h.archive_stop {
        set(&mut sections, "backup", "backup-archive-stop", json!(stop.as_str()));
    }
    set(&mut sections, "backup", "backup-label", json!(h.backup_label));
    if let Some(lsn) = h.lsn_start {
        set(&mut sections, "backup", "backup-lsn-start", json!(lsn.to_string()));
    }
    if let Some(lsn) = h.lsn_stop {
        set(&mut sections, "backup", "backup-lsn-stop", json!(lsn.to_string()));
    }
    if let Some(prior) = &h.backup_label_prior {
        set(&mut sections, "backup", "backup-prior", json!(prior));
    }
    if let Some(ts) = h.backup_timestamp_copy_start {
        set(&mut sections, "backup", "backup-timestamp-copy-start", json!(ts));
    }
    set(&mut sections, "backup", "backup-timestamp-start", json!(h.backup_timestamp_start));
    if let Some(ts) = h.backup_timestamp_stop {
        set(&mut sections, "backup", "backup-timestamp-stop", json!(ts));
    }
    set(&mut sections, "backup", "backup-type", json!(h.backup_type.as_str()));

    // [backup:db]
    set(&mut sections, "backup:db", "db-catalog-version", json!(h.db_catalog_version));
    set(&mut sections, "backup:db", "db-control-version", json!(h.db_control_version));
    set(&mut sections, "backup:db", "db-id", json!(h.db_id));
    set(&mut sections, "backup:db", "db-system-id", json!(h.db_system_id));
    set(&mut sections, "backup:db", "db-version", json!(h.db_version));

    // [backup:option]
    set(&mut sections, "backup:option", "option-archive-check", json!(h.option_archive_check));
    set(&mut sections, "backup:option", "option-archive-copy", json!(h.option_archive_copy));
    set(&mut sections, "backup:option", "option-bundle", json!(h.option_bundle));
    set(&mut sections, "backup:option", "option-bundle-raw", json!(h.option_bundle_raw));
    set(&mut sections, "backup:option", "option-block-incr", json!(h.option_block_incr));
    set(&mut sections, "backup:option", "option-checksum-page", json!(h.option_checksum_page));
    set(&mut sections, "backup:option", "option-compress-type", json!(h.option_compress_type));
    set(&mut sections, "backup:option", "option-delta", json!(h.option_delta));
    set(&mut sections, "backup:option", "option-hardlink", json!(h.option_hardlink));
    set(&mut sections, "backup:option", "option-online", json!(h.option_online));
    set(&mut sections, "backup:option", "option-process-max", json!(h.option_process_max));
    set(&mut sections, "backup:option", "option-standby", json!(h.option_standby));

    // [backup:annotation]: skipped entirely when empty (an annotation with
    // an empty value is dropped before it ever reaches the header - see
    // `complete.rs` - so a header with no surviving entries writes nothing).
    if !h.annotations.is_empty() {
        let annotation = Variant::KeyValue(
            h.annotations
                .iter()
                .map(|(k, v)| (k.clone(), Variant::Str(v.clone())))
                .collect(),
        );
        for (k, v) in annotation.as_kv().unwrap() {
            set(&mut sections, "backup:annotation", k, v.to_json());
        }
    }

    // [backup:target]
    for t in manifest.targets() {
        let mut obj = Map::new();
        obj.insert(
            "type".to_string(),
            json!(match t.target_type {
                TargetType::Path => "path",
                TargetType::Link => "link",
            }),
        );
        obj.insert("path".to_string(), json!(t.path));
        if let Some(file) = &t.file {
            obj.insert("file".to_string(), json!(file));
        }
        if let Some(id) = t.tablespace_id {
            obj.insert("tablespace-id".to_string(), json!(id));
        }
        if let Some(name) = &t.tablespace_name {
            obj.insert("tablespace-name".to_string(), json!(name));
        }
        set(&mut sections, "backup:target", &t.name, Value::Object(obj));
    }

    // [db]
    for d in manifest.databases() {
        let mut obj = Map::new();
        obj.insert("db-id".to_string(), json!(d.oid));
        obj.insert("db-last-system-id".to_string(), json!(d.last_system_oid));
        set(&mut sections, "db", &d.name, Value::Object(obj));
    }

    // [target:file] / [target:file:default]
    let file_defaults = compute_file_defaults(manifest);
    for f in manifest.files() {
        let mut obj = Map::new();
        obj.insert("size".to_string(), json!(f.size));
        if f.size != f.size_repo {
            obj.insert("repo-size".to_string(), json!(f.size_repo));
        }
        obj.insert("timestamp".to_string(), json!(f.timestamp));
        if let Some(repo_sha1) = f.checksum_repo_sha1 {
            obj.insert("checksum".to_string(), json!(hex::encode(repo_sha1)));
        }
        if f.checksum_sha1 != file_defaults.primary {
            obj.insert(KEY_PRIMARY.to_string(), json!(hex::encode(f.checksum_sha1)));
        }
        if let Some(reference) = f.reference {
            obj.insert(
                "reference".to_string(),
                json!(manifest.reference_name(reference)),
            );
        }
        if let Some(bundle_id) = f.bundle_id {
            let mut bundle = Map::new();
            bundle.insert("id".to_string(), json!(bundle_id));
            if f.bundle_offset != 0 {
                bundle.insert("offset".to_string(), json!(f.bundle_offset));
            }
            obj.insert("bundle".to_string(), Value::Object(bundle));
        }
        if f.block_incr.is_present() {
            let mut block = Map::new();
            block.insert("size".to_string(), json!(f.block_incr.block_size));
            let mut map = Map::new();
            map.insert("size".to_string(), json!(f.block_incr.map_size));
            block.insert("map".to_string(), Value::Object(map));
            let mut checksum = Map::new();
            checksum.insert("size".to_string(), json!(f.block_incr.checksum_size));
            block.insert("checksum".to_string(), Value::Object(checksum));
            obj.insert("block".to_string(), Value::Object(block));
        }
        if let Some(cp) = f.checksum_page {
            obj.insert("checksum-page".to_string(), json!(cp));
        }
        if !f.checksum_page_error.is_empty() {
            obj.insert(
                "checksum-page-error-list".to_string(),
                json!(f.checksum_page_error),
            );
        }
        if f.mode != file_defaults.mode {
            obj.insert("mode".to_string(), json!(f.mode.to_string()));
        }
        let owner_val = owner_json(manifest, f.user);
        if owner_val != json!(file_defaults.user.clone().map(Value::String).unwrap_or(Value::Bool(false))) {
            obj.insert("user".to_string(), owner_val);
        }
        let group_val = owner_json(manifest, f.group);
        if group_val != json!(file_defaults.group.clone().map(Value::String).unwrap_or(Value::Bool(false))) {
            obj.insert("group".to_string(), group_val);
        }
        set(&mut sections, "target:file", &f.name, Value::Object(obj));
    }
    {
        let d = &file_defaults;
        let section = sections.section("target:file:default");
        section.insert("group".to_string(), owner_default_json(&d.group));
        section.insert("mode".to_string(), json!(d.mode.to_string()).to_string());
        section.insert(KEY_PRIMARY.to_string(), json!(hex::encode(d.primary)).to_string());
        section.insert("user".to_string(), owner_default_json(&d.user));
    }

    // [target:link] / [target:link:default]
    if !manifest.links().is_empty() {
        let link_defaults = compute_link_defaults(manifest);
        for l in manifest.links() {
            let mut obj = Map::new();
            obj.insert("destination".to_string(), json!(l.destination));
            let owner_val = owner_json(manifest, l.user);
            if owner_val
                != json!(link_defaults.user.clone().map(Value::String).unwrap_or(Value::Bool(false)))
            {
                obj.insert("user".to_string(), owner_val);
            }
            let group_val = owner_json(manifest, l.group);
            if group_val
                != json!(link_defaults.group.clone().map(Value::String).unwrap_or(Value::Bool(false)))
            {
                obj.insert("group".to_string(), group_val);
            }
            set(&mut sections, "target:link", &l.name, Value::Object(obj));
        }
        let section = sections.section("target:link:default");
        section.insert("group".to_string(), owner_default_json(&link_defaults.group));
        section.insert("user".to_string(), owner_default_json(&link_defaults.user));
    }

    // [target:path] / [target:path:default]
    let path_defaults = compute_path_defaults(manifest);
    for p in manifest.paths() {
        let mut obj = Map::new();
        if p.mode != path_defaults.mode {
            obj.insert("mode".to_string(), json!(p.mode.to_string()));
        }
        let owner_val = owner_json(manifest, p.user);
        if owner_val
            != json!(path_defaults.user.clone().map(Value::String).unwrap_or(Value::Bool(false)))
        {
            obj.insert("user".to_string(), owner_val);
        }
        let group_val = owner_json(manifest, p.group);
        if group_val
            != json!(path_defaults.group.clone().map(Value::String).unwrap_or(Value::Bool(false)))
        {
            obj.insert("group".to_string(), group_val);
        }
        set(&mut sections, "target:path", &p.name, Value::Object(obj));
    }
    {
        let section = sections.section("target:path:default");
        section.insert("group".to_string(), owner_default_json(&path_defaults.group));
        section.insert("mode".to_string(), json!(path_defaults.mode.to_string()).to_string());
        section.insert("user".to_string(), owner_default_json(&path_defaults.user));
    }

    // [backrest] trailer: checksum covers everything written so far, with
    // the checksum value itself replaced by a canonical placeholder
    // (testable property 9).
    sections.section("backrest").insert("backrest-format".to_string(), json!(MANIFEST_FORMAT).to_string());
    sections.section("backrest").insert("backrest-version".to_string(), json!(PKG_VERSION).to_string());
    sections
        .section("backrest")
        .insert("backrest-checksum".to_string(), CHECKSUM_PLACEHOLDER.to_string());

    let placeholder_text = sections.render();
    let checksum = hex::encode(openssl::sha::sha1(placeholder_text.as_bytes()));
    sections
        .section("backrest")
        .insert("backrest-checksum".to_string(), json!(checksum).to_string());

    sections.render()
}

fn owner_default_json(owner: &Option<String>) -> String {
    match owner {
        Some(name) => json!(name).to_string(),
        None => "false".to_string(),
    }
}

/// Parses `text` (as produced by [`save`]) back into a [`Manifest`],
/// verifying the `[backrest]` checksum first (§4.4 "Integrity").
pub fn load(text: &str) -> Result<Manifest> {
    let raw = parse_ini(text)?;

    let backrest = raw
        .get("backrest")
        .context("format error: missing [backrest] section")?;
    let stored_checksum = backrest
        .get("backrest-checksum")
        .context("format error: missing backrest-checksum")?
        .trim_matches('"')
        .to_string();
    let format: u32 = backrest
        .get("backrest-format")
        .context("format error: missing backrest-format")?
        .parse()
        .context("format error: invalid backrest-format")?;
    if format > MANIFEST_FORMAT {
        bail!("format error: manifest format {format} is newer than supported {MANIFEST_FORMAT}");
    }

    verify_checksum(text, &stored_checksum)?;

    let backup = raw.get("backup").context("format error: missing [backup] section")?;
    let backup_db = raw
        .get("backup:db")
        .context("format error: missing [backup:db] section")?;
    let backup_option = raw
        .get("backup:option")
        .context("format error: missing [backup:option] section")?;

    let backup_type: BackupType = json_str(backup, "backup-type")?.parse()?;
    let header = ManifestHeader {
        backup_label: json_str(backup, "backup-label")?,
        backup_label_prior: backup.get("backup-prior").map(|v| unquote(v)),
        backup_type,
        backup_timestamp_start: json_i64(backup, "backup-timestamp-start")?,
        backup_timestamp_stop: backup.get("backup-timestamp-stop").map(|v| v.parse()).transpose()?,
        backup_timestamp_copy_start: backup
            .get("backup-timestamp-copy-start")
            .map(|v| v.parse())
            .transpose()?,
        archive_start: backup
            .get("backup-archive-start")
            .map(|v| WalSegment::parse(&unquote(v)))
            .transpose()?,
        archive_stop: backup
            .get("backup-archive-stop")
            .map(|v| WalSegment::parse(&unquote(v)))
            .transpose()?,
        lsn_start: backup.get("backup-lsn-start").map(|v| unquote(v).parse()).transpose()?,
        lsn_stop: backup.get("backup-lsn-stop").map(|v| unquote(v).parse()).transpose()?,
        db_id: json_u64(backup_db, "db-id")? as u32,
        db_version: json_str(backup_db, "db-version")?,
        db_catalog_version: json_u64(backup_db, "db-catalog-version")? as u32,
        db_control_version: json_u64(backup_db, "db-control-version")? as u32,
        db_system_id: json_u64(backup_db, "db-system-id")?,
        option_online: json_bool(backup_option, "option-online")?,
        option_checksum_page: json_bool(backup_option, "option-checksum-page")?,
        option_bundle: json_bool(backup_option, "option-bundle")?,
        option_bundle_raw: json_bool(backup_option, "option-bundle-raw")?,
        option_block_incr: json_bool(backup_option, "option-block-incr")?,
        option_delta: json_bool(backup_option, "option-delta")?,
        option_hardlink: json_bool(backup_option, "option-hardlink")?,
        option_archive_check: json_bool(backup_option, "option-archive-check")?,
        option_archive_copy: json_bool(backup_option, "option-archive-copy")?,
        option_standby: json_bool(backup_option, "option-standby")?,
        option_compress_type: json_str(backup_option, "option-compress-type")?,
        option_process_max: json_u64(backup_option, "option-process-max")? as u32,
        annotations: load_annotations(raw.get("backup:annotation"))?,
    };

    // Manifest::new always seeds a placeholder pg_data target; the real one
    // (and every other target) comes from [backup:target] below.
    let mut manifest = Manifest::new(header, "/");
    manifest.target_remove("pg_data").ok();

    let own_label = manifest.header.backup_label.clone();
    manifest.intern_reference(&own_label);

    if let Some(targets) = raw.get("backup:target") {
        for (name, raw_value) in targets {
            let v: Value = serde_json::from_str(raw_value)?;
            let target_type = match v["type"].as_str() {
                Some("path") => TargetType::Path,
                Some("link") => TargetType::Link,
                other => bail!("format error: unknown target type {other:?}"),
            };
            manifest.target_add(Target {
                name: name.clone(),
                target_type,
                path: v["path"].as_str().unwrap_or_default().to_string(),
                file: v.get("file").and_then(|f| f.as_str()).map(|s| s.to_string()),
                tablespace_id: v.get("tablespace-id").and_then(|t| t.as_u64()).map(|t| t as u32),
                tablespace_name: v
                    .get("tablespace-name")
                    .and_then(|t| t.as_str())
                    .map(|s| s.to_string()),
            });
        }
    }

    if let Some(dbs) = raw.get("db") {
        for (name, raw_value) in dbs {
            let v: Value = serde_json::from_str(raw_value)?;
            manifest.database_add(DatabaseEntry {
                name: name.clone(),
                oid: v["db-id"].as_u64().unwrap_or(0) as u32,
                last_system_oid: v["db-last-system-id"].as_u64().unwrap_or(0) as u32,
            });
        }
    }

    let file_defaults_raw = raw.get("target:file:default");
    let default_mode = file_defaults_raw
        .and_then(|d| d.get("mode"))
        .map(|v| unquote(v).parse::<Mode>())
        .transpose()?
        .unwrap_or(Mode::new(0o600));
    let default_user = owner_from_default(file_defaults_raw, "user");
    let default_group = owner_from_default(file_defaults_raw, "group");
    let default_primary = file_defaults_raw
        .and_then(|d| d.get(KEY_PRIMARY))
        .map(|v| unquote(v))
        .and_then(|s| hex::decode(s).ok())
        .and_then(|b| <[u8; 20]>::try_from(b).ok())
        .unwrap_or([0u8; 20]);

    if let Some(files) = raw.get("target:file") {
        for (name, raw_value) in files {
            let v: Value = serde_json::from_str(raw_value)?;
            let mode = match v.get("mode").and_then(|m| m.as_str()) {
                Some(s) => s.parse()?,
                None => default_mode,
            };
            let user = match v.get("user") {
                Some(Value::String(s)) => Some(manifest.intern_owner(s)),
                Some(Value::Bool(false)) | None => {
                    default_user.as_deref().map(|s| manifest.intern_owner(s))
                }
                _ => bail!("format error: invalid user field"),
            };
            let group = match v.get("group") {
                Some(Value::String(s)) => Some(manifest.intern_owner(s)),
                Some(Value::Bool(false)) | None => {
                    default_group.as_deref().map(|s| manifest.intern_owner(s))
                }
                _ => bail!("format error: invalid group field"),
            };
            let primary = match v.get(KEY_PRIMARY).and_then(|m| m.as_str()) {
                Some(s) => {
                    let decoded = hex::decode(s)?;
                    <[u8; 20]>::try_from(decoded.as_slice())
                        .map_err(|_| anyhow::anyhow!("format error: invalid checksum length"))?
                }
                None => default_primary,
            };
            let reference = v
                .get("reference")
                .and_then(|r| r.as_str())
                .map(|s| manifest.intern_reference(s));
            let bundle_id = v.get("bundle").and_then(|b| b.get("id")).and_then(|i| i.as_u64());
            let bundle_offset = v
                .get("bundle")
                .and_then(|b| b.get("offset"))
                .and_then(|o| o.as_u64())
                .unwrap_or(0);
            let block_incr = match v.get("block") {
                Some(b) => BlockIncr {
                    block_size: b.get("size").and_then(|s| s.as_u64()).unwrap_or(0) as u32,
                    checksum_size: b
                        .get("checksum")
                        .and_then(|c| c.get("size"))
                        .and_then(|s| s.as_u64())
                        .unwrap_or(0) as u32,
                    map_size: b.get("map").and_then(|m| m.get("size")).and_then(|s| s.as_u64()).unwrap_or(0),
                },
                None => BlockIncr::none(),
            };

            manifest.file_add(FileEntry {
                name: name.clone(),
                mode,
                user,
                group,
                size: v["size"].as_u64().unwrap_or(0),
                size_repo: v.get("repo-size").and_then(|s| s.as_u64()).unwrap_or(v["size"].as_u64().unwrap_or(0)),
                timestamp: v["timestamp"].as_i64().unwrap_or(0),
                checksum_sha1: primary,
                checksum_repo_sha1: v
                    .get("checksum")
                    .and_then(|c| c.as_str())
                    .map(|s| hex::decode(s))
                    .transpose()?
                    .and_then(|b| <[u8; 20]>::try_from(b).ok()),
                reference,
                bundle_id,
                bundle_offset,
                block_incr,
                checksum_page: v.get("checksum-page").and_then(|c| c.as_bool()),
                checksum_page_error: v
                    .get("checksum-page-error-list")
                    .and_then(|l| l.as_array())
                    .map(|a| {
                        let mut pages: Vec<u64> = a.iter().filter_map(|x| x.as_u64()).collect();
                        pages.sort_unstable();
                        pages
                    })
                    .unwrap_or_default(),
                copy: true,
                delta: false,
                resume: false,
            });
        }
    }

    let path_defaults_raw = raw.get("target:path:default");
    let path_default_mode = path_defaults_raw
        .and_then(|d| d.get("mode"))
        .map(|v| unquote(v).parse::<Mode>())
        .transpose()?
        .unwrap_or(Mode::new(0o700));
    let path_default_user = owner_from_default(path_defaults_raw, "user");
    let path_default_group = owner_from_default(path_defaults_raw, "group");

    if let Some(paths) = raw.get("target:path") {
        for (name, raw_value) in paths {
            let v: Value = serde_json::from_str(raw_value)?;
            let mode = match v.get("mode").and_then(|m| m.as_str()) {
                Some(s) => s.parse()?,
                None => path_default_mode,
            };
            let user = match v.get("user") {
                Some(Value::String(s)) => Some(manifest.intern_owner(s)),
                _ => path_default_user.as_deref().map(|s| manifest.intern_owner(s)),
            };
            let group = match v.get("group") {
                Some(Value::String(s)) => Some(manifest.intern_owner(s)),
                _ => path_default_group.as_deref().map(|s| manifest.intern_owner(s)),
            };
            manifest.path_add(PathEntry {
                name: name.clone(),
                mode,
                user,
                group,
            });
        }
    }

    let link_defaults_raw = raw.get("target:link:default");
    let link_default_user = owner_from_default(link_defaults_raw, "user");
    let link_default_group = owner_from_default(link_defaults_raw, "group");

    if let Some(links) = raw.get("target:link") {
        for (name, raw_value) in links {
            let v: Value = serde_json::from_str(raw_value)?;
            let user = match v.get("user") {
                Some(Value::String(s)) => Some(manifest.intern_owner(s)),
                _ => link_default_user.as_deref().map(|s| manifest.intern_owner(s)),
            };
            let group = match v.get("group") {
                Some(Value::String(s)) => Some(manifest.intern_owner(s)),
                _ => link_default_group.as_deref().map(|s| manifest.intern_owner(s)),
            };
            manifest.link_add(LinkEntry {
                name: name.clone(),
                destination: v["destination"].as_str().unwrap_or_default().to_string(),
                user,
                group,
            });
        }
    }

    manifest.sort();
    Ok(manifest)
}

/// Reconstructs the annotation map from `[backup:annotation]`, routing each
/// value through [`Variant`] the same way [`save`] wrote it.
fn load_annotations(section: Option<&BTreeMap<String, String>>) -> Result<BTreeMap<String, String>> {
    let mut annotations = BTreeMap::new();
    if let Some(section) = section {
        for (key, raw_value) in section {
            let value: Value = serde_json::from_str(raw_value)
                .with_context(|| format!("format error: invalid annotation value for '{key}'"))?;
            let str_value = value
                .as_str()
                .with_context(|| format!("format error: annotation '{key}' is not a string"))?;
            let variant = Variant::Str(str_value.to_string());
            annotations.insert(
                key.clone(),
                variant
                    .as_str()
                    .with_context(|| format!("format error: annotation '{key}' is not a string"))?
                    .to_string(),
            );
        }
    }
    Ok(annotations)
}

fn owner_from_default(section: Option<&BTreeMap<String, String>>, key: &str) -> Option<String> {
    section
        .and_then(|d| d.get(key))
        .and_then(|v| serde_json::from_str::<Value>(v).ok())
        .and_then(|v| v.as_str().map(|s| s.to_string()))
}

fn unquote(raw: &str) -> String {
    serde_json::from_str::<Value>(raw)
        .ok()
        .and_then(|v| v.as_str().map(|s| s.to_string()))
        .unwrap_or_else(|| raw.trim_matches('"').to_string())
}

fn json_str(section: &BTreeMap<String, String>, key: &str) -> Result<String> {
    let raw = section
        .get(key)
        .with_context(|| format!("format error: missing key '{key}'"))?;
    Ok(unquote(raw))
}

fn json_i64(section: &BTreeMap<String, String>, key: &str) -> Result<i64> {
    section
        .get(key)
        .with_context(|| format!("format error: missing key '{key}'"))?
        .parse()
        .with_context(|| format!("format error: invalid integer for '{key}'"))
}

fn json_u64(section: &BTreeMap<String, String>, key: &str) -> Result<u64> {
    section
        .get(key)
        .with_context(|| format!("format error: missing key '{key}'"))?
        .parse()
        .with_context(|| format!("format error: invalid integer for '{key}'"))
}

fn json_bool(section: &BTreeMap<String, String>, key: &str) -> Result<bool> {
    match section.get(key).map(|s| s.as_str()) {
        Some("true") => Ok(true),
        Some("false") | None => Ok(false),
        Some(other) => bail!("format error: invalid boolean '{other}' for '{key}'"),
    }
}

type RawSections = BTreeMap<String, BTreeMap<String, String>>;

fn parse_ini(text: &str) -> Result<RawSections> {
    let mut sections: RawSections = BTreeMap::new();
    let mut current: Option<String> = None;

    for line in text.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        if let Some(stripped) = line.strip_prefix('[') {
            let name = stripped
                .strip_suffix(']')
                .context("format error: malformed section header")?;
            sections.entry(name.to_string()).or_default();
            current = Some(name.to_string());
            continue;
        }
        let (key, value) = line
            .split_once('=')
            .context("format error: malformed key=value line")?;
        let section = current
            .as_ref()
            .context("format error: key=value line outside any section")?;
        sections
            .entry(section.clone())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    Ok(sections)
}

/// Verifies the `[backrest].backrest-checksum` value against a recomputed
/// SHA-1 with that one field's value replaced by the canonical placeholder
/// (testable property 9).
fn verify_checksum(text: &str, stored: &str) -> Result<()> {
    let mut replaced = String::with_capacity(text.len());
    let mut in_backrest = false;
    for line in text.lines() {
        if let Some(name) = line.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            in_backrest = name == "backrest";
            replaced.push_str(line);
            replaced.push('\n');
            continue;
        }
        if in_backrest && line.starts_with("backrest-checksum=") {
            replaced.push_str("backrest-checksum=");
            replaced.push_str(CHECKSUM_PLACEHOLDER);
            replaced.push('\n');
        } else {
            replaced.push_str(line);
            replaced.push('\n');
        }
    }
    let computed = hex::encode(openssl::sha::sha1(replaced.as_bytes()));
    if computed != stored {
        return Err(CoreError::Checksum(format!(
            "manifest checksum mismatch (stored {stored}, computed {computed})"
        ))
        .into());
    }
    Ok(())
}

/// Loads a manifest from `storage`, matching §4.4's "Failure model": a
/// missing or corrupt `primary_path` falls back to `copy_path` once before
/// giving up. If neither attempt succeeds, raises `CoreError::FileOpen`
/// naming both paths.
pub fn load_from_storage(storage: &dyn Storage, primary_path: &str, copy_path: &str) -> Result<Manifest> {
    let primary_err = match read_and_load(storage, primary_path) {
        Ok(manifest) => return Ok(manifest),
        Err(e) => e,
    };

    match read_and_load(storage, copy_path) {
        Ok(manifest) => Ok(manifest),
        Err(copy_err) => Err(CoreError::FileOpen {
            path: format!(
                "{primary_path} ({primary_err}), {copy_path} ({copy_err})"
            ),
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "neither the manifest nor its .copy sibling could be loaded",
            ),
        }
        .into()),
    }
}

fn read_and_load(storage: &dyn Storage, path: &str) -> Result<Manifest> {
    let mut text = String::new();
    storage
        .read(path)?
        .read_to_string(&mut text)
        .with_context(|| format!("could not read {path}"))?;
    load(&text)
}

/// Loads the canonical on-repository manifest (`MANIFEST_FILE`, falling
/// back to `MANIFEST_FILE_COPY`).
pub fn load_manifest(storage: &dyn Storage) -> Result<Manifest> {
    load_from_storage(storage, MANIFEST_FILE, MANIFEST_FILE_COPY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_entry::DatabaseEntry;
    use crate::file_entry::SHA1_EMPTY;

    fn sample_manifest() -> Manifest {
        let header = ManifestHeader::new_full(1_700_000_000, 1, "15", 1500, 1300, 6_900_000_000_123_456_789, true);
        let mut m = Manifest::new(header, "/var/lib/postgresql/15/main");
        m.set_backup_label("20260727-090000F");

        let postgres = m.intern_owner("postgres");
        m.path_add(PathEntry {
            name: "pg_data".to_string(),
            mode: Mode::new(0o700),
            user: Some(postgres),
            group: Some(postgres),
        });
        m.file_add(FileEntry {
            name: "pg_data/PG_VERSION".to_string(),
            mode: Mode::new(0o600),
            user: Some(postgres),
            group: Some(postgres),
            size: 3,
            size_repo: 3,
            timestamp: 1_700_000_000,
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
        });
        m.database_add(DatabaseEntry {
            name: "postgres".to_string(),
            oid: 5,
            last_system_oid: 12511,
        });
        m.sort();
        m
    }

    #[test]
    fn save_produces_sorted_sections_with_backrest_trailer() {
        let m = sample_manifest();
        let text = save(&m);
        assert!(text.contains("[backup]\n"));
        assert!(text.contains("[backrest]\n"));
        assert!(text.contains("backrest-format="));
        assert!(text.contains("backrest-checksum="));
    }

    #[test]
    fn load_rejects_corrupted_checksum() {
        let m = sample_manifest();
        let mut text = save(&m);
        text = text.replace("PG_VERSION", "PG_VERSION_TAMPERED");
        assert!(load(&text).is_err());
    }

    #[test]
    fn load_from_storage_falls_back_to_copy_when_primary_is_corrupt() {
        use pgib_storage::LocalStorage;

        let dir = tempdir();
        let storage = LocalStorage::new(dir.path());
        let m = sample_manifest();
        let good = save(&m);
        let corrupt = good.replace("PG_VERSION", "PG_VERSION_TAMPERED");

        {
            let mut w = storage.write(MANIFEST_FILE).unwrap();
            std::io::Write::write_all(&mut w, corrupt.as_bytes()).unwrap();
        }
        {
            let mut w = storage.write(MANIFEST_FILE_COPY).unwrap();
            std::io::Write::write_all(&mut w, good.as_bytes()).unwrap();
        }

        let loaded = load_manifest(&storage).unwrap();
        assert_eq!(loaded.header.backup_label, m.header.backup_label);
    }

    #[test]
    fn load_from_storage_fails_with_file_open_error_when_both_attempts_fail() {
        use pgib_storage::LocalStorage;

        let dir = tempdir();
        let storage = LocalStorage::new(dir.path());

        let err = load_manifest(&storage).unwrap_err();
        assert!(err.downcast_ref::<CoreError>().is_some());
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
                "pgib-manifest-text-test-{}-{}",
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

    #[test]
    fn round_trip_preserves_file_set_and_attributes() {
        let m = sample_manifest();
        let text = save(&m);
        let loaded = load(&text).unwrap();

        assert_eq!(loaded.header.backup_label, m.header.backup_label);
        assert_eq!(loaded.files().len(), m.files().len());
        let f = loaded.file_find("pg_data/PG_VERSION").unwrap();
        assert_eq!(f.size, 3);
        assert_eq!(f.checksum_sha1, SHA1_EMPTY);
        assert_eq!(loaded.owner_name(f.user.unwrap()), "postgres");
    }

    #[test]
    fn annotations_survive_a_save_and_load_round_trip() {
        let mut m = sample_manifest();
        m.header.annotations.insert("comment".to_string(), "nightly run".to_string());
        let text = save(&m);
        assert!(text.contains("[backup:annotation]\n"));
        assert!(text.contains("comment=\"nightly run\"\n"));

        let loaded = load(&text).unwrap();
        assert_eq!(
            loaded.header.annotations.get("comment").map(String::as_str),
            Some("nightly run")
        );
    }

    #[test]
    fn empty_annotation_map_writes_no_annotation_section() {
        let m = sample_manifest();
        let text = save(&m);
        assert!(!text.contains("[backup:annotation]"));
    }

    #[test]
    fn default_factoring_omits_plurality_value_from_entries() {
        let header = ManifestHeader::new_full(0, 1, "15", 1500, 1300, 1, true);
        let mut m = Manifest::new(header, "/data");
        let postgres = m.intern_owner("postgres");
        for i in 0..4 {
            m.file_add(FileEntry {
                name: format!("pg_data/f{i}"),
                mode: Mode::new(0o600),
                user: Some(postgres),
                group: Some(postgres),
                size: 0,
                size_repo: 0,
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
            });
        }
        m.file_add(FileEntry {
            name: "pg_data/outlier".to_string(),
            mode: Mode::new(0o640),
            user: Some(postgres),
            group: Some(postgres),
            size: 0,
            size_repo: 0,
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
        });
        m.sort();
        let text = save(&m);

        // the outlier's 0640 mode is spelled out explicitly...
        let outlier_line = text
            .lines()
            .find(|l| l.starts_with("pg_data/outlier="))
            .unwrap();
        assert!(outlier_line.contains("\"0640\""));

        // ...but the plurality 0600 entries omit "mode" entirely.
        let common_line = text.lines().find(|l| l.starts_with("pg_data/f0=")).unwrap();
        assert!(!common_line.contains("mode"));

        let default_section_start = text.find("[target:file:default]\n").unwrap();
        let default_section = &text[default_section_start..];
        assert!(default_section.contains("mode=\"0600\""));
    }
}
