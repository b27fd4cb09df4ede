use std::fs::{self, File};
use std::io::{Read, Write};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use pgib_types::{CoreError, Mode};

use crate::{DirEntry, EntryType, Storage, StorageInfo};

/// A [`Storage`] implementation rooted directly at a filesystem directory.
/// This is what the scanner runs against when walking a live data
/// directory, and what tests use as a throwaway repository.
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    fn stat(path: &Path) -> Result<StorageInfo> {
        let meta = match fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CoreError::FileMissing(path.display().to_string()).into());
            }
            Err(e) => return Err(e).with_context(|| format!("could not stat {}", path.display())),
        };
        let file_type = meta.file_type();

        let (entry_type, link_destination) = if file_type.is_symlink() {
            let dest = fs::read_link(path)
                .with_context(|| format!("could not read link {}", path.display()))?;
            (EntryType::Link, Some(dest.to_string_lossy().into_owned()))
        } else if file_type.is_dir() {
            (EntryType::Path, None)
        } else if file_type.is_file() {
            (EntryType::File, None)
        } else {
            (EntryType::Special, None)
        };

        Ok(StorageInfo {
            entry_type,
            size: meta.size(),
            mtime: meta.modified().unwrap_or(std::time::UNIX_EPOCH),
            mode: Mode::new((meta.mode() & 0o777) as u16),
            uid: meta.uid(),
            gid: meta.gid(),
            link_destination,
        })
    }
}

impl Storage for LocalStorage {
    fn list(&self, path: &str) -> Result<Vec<DirEntry>> {
        let full = self.full_path(path);
        let mut out = Vec::new();
        let iter = fs::read_dir(&full)
            .with_context(|| format!("could not open {}", full.display()))?;
        for entry in iter {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let info = Self::stat(&entry.path())?;
            out.push(DirEntry { name, info });
        }
        Ok(out)
    }

    fn info(&self, path: &str) -> Result<StorageInfo> {
        Self::stat(&self.full_path(path))
    }

    fn read(&self, path: &str) -> Result<Box<dyn Read + Send>> {
        let full = self.full_path(path);
        let file =
            File::open(&full).with_context(|| format!("could not open {}", full.display()))?;
        Ok(Box::new(file))
    }

    fn write(&self, path: &str) -> Result<Box<dyn Write + Send>> {
        let full = self.full_path(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }
        // Atomic-from-the-reader's-perspective: write to a sibling temp file
        // and rename into place on drop would be ideal, but the manifest
        // serializer already buffers the whole file in memory and calls
        // `write` once with the complete contents, so a simple
        // write-then-rename at that single call site is sufficient.
        let tmp = full.with_extension("tmp-write");
        let file =
            File::create(&tmp).with_context(|| format!("could not open {}", tmp.display()))?;
        Ok(Box::new(AtomicFile {
            file,
            tmp,
            dest: full,
        }))
    }

    fn remove(&self, path: &str) -> Result<()> {
        let full = self.full_path(path);
        match fs::remove_file(&full) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("remove: {} already absent", full.display());
                Ok(())
            }
            Err(e) => Err(e).with_context(|| format!("could not remove {}", full.display())),
        }
    }
}

/// Renames the temp file into place once the writer is dropped, giving
/// `write` the atomic-replace semantics §5 requires of a manifest save.
struct AtomicFile {
    file: File,
    tmp: PathBuf,
    dest: PathBuf,
}

impl Write for AtomicFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

impl Drop for AtomicFile {
    fn drop(&mut self) {
        let _ = self.file.flush();
        let _ = fs::rename(&self.tmp, &self.dest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read as _;

    #[test]
    fn write_then_read_round_trips_and_is_atomic_on_drop() {
        let dir = tempdir();
        let storage = LocalStorage::new(dir.path());

        {
            let mut w = storage.write("backup.manifest").unwrap();
            w.write_all(b"hello").unwrap();
        }

        let mut buf = String::new();
        storage
            .read("backup.manifest")
            .unwrap()
            .read_to_string(&mut buf)
            .unwrap();
        assert_eq!(buf, "hello");
        assert!(!dir.path().join("backup.manifest.tmp-write").exists());
    }

    #[test]
    fn info_on_a_missing_path_raises_file_missing() {
        let dir = tempdir();
        let storage = LocalStorage::new(dir.path());

        let err = storage.info("pg_data").unwrap_err();
        assert!(matches!(err.downcast_ref::<CoreError>(), Some(CoreError::FileMissing(_))));
    }

    #[test]
    fn list_reports_files_and_directories() {
        let dir = tempdir();
        fs::create_dir(dir.path().join("pg_data")).unwrap();
        fs::write(dir.path().join("pg_data/PG_VERSION"), b"15\n").unwrap();

        let storage = LocalStorage::new(dir.path());
        let entries = storage.list("pg_data").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "PG_VERSION");
        assert_eq!(entries[0].info.entry_type, EntryType::File);
    }

    fn tempdir() -> TempDir {
        TempDir::new()
    }

    /// Minimal self-cleaning temp directory so this crate doesn't need a
    /// `tempfile` dev-dependency just for two tests.
    struct TempDir(PathBuf);

    impl TempDir {
        fn new() -> Self {
            use std::sync::atomic::{AtomicU64, Ordering};
            static COUNTER: AtomicU64 = AtomicU64::new(0);

            let mut path = std::env::temp_dir();
            path.push(format!(
                "pgib-storage-test-{}-{}",
                std::process::id(),
                COUNTER.fetch_add(1, Ordering::Relaxed)
            ));
            fs::create_dir_all(&path).unwrap();
            TempDir(path)
        }

        fn path(&self) -> &Path {
            &self.0
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.0);
        }
    }
}
