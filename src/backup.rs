//! Crash-safe replacement of the config file plus its backup chain.
//!
//! A write goes to a fsynced sibling temp file first and only then is
//! renamed over the target, so the target always holds either the old or
//! the new content in full.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::fs::FileSystem;

pub const BACKUP_SUFFIX: &str = "lazyssh.backup";
pub const ORIGINAL_SUFFIX: &str = "original.backup";
pub const TEMP_SUFFIX: &str = "tmp";
pub const DEFAULT_RETENTION: usize = 10;
pub const PRIVATE_MODE: u32 = 0o600;

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn sibling(path: &Path, name: impl Into<OsString>) -> PathBuf {
    path.with_file_name(name.into())
}

/// `<name>.original.backup`
pub fn original_backup_path(path: &Path) -> PathBuf {
    sibling(path, format!("{}.{ORIGINAL_SUFFIX}", file_name(path)))
}

/// Temp-file-then-rename writes.
#[derive(Debug, Clone)]
pub struct AtomicWriter {
    fs: Arc<dyn FileSystem>,
}

impl AtomicWriter {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self { fs }
    }

    /// Writes `data` to a fresh `<name>.<timestamp>.tmp` sibling.
    pub fn stage(&self, path: &Path, data: &[u8], mode: u32) -> Result<PathBuf> {
        let stamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let temp = sibling(path, format!("{}.{stamp}.{TEMP_SUFFIX}", file_name(path)));
        if let Err(err) = self.fs.write(&temp, data, mode) {
            self.discard(&temp);
            return Err(Error::io("write", &temp, err));
        }
        Ok(temp)
    }

    /// Renames a staged file over `path`; the temp file is removed on failure.
    pub fn commit(&self, temp: &Path, path: &Path) -> Result<()> {
        if let Err(err) = self.fs.rename(temp, path) {
            self.discard(temp);
            return Err(Error::io("rename", path, err));
        }
        debug!(path = %path.display(), "atomic write completed");
        Ok(())
    }

    pub fn discard(&self, temp: &Path) {
        match self.fs.remove(temp) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(path = %temp.display(), %err, "failed to remove temp file"),
        }
    }

    pub fn write(&self, path: &Path, data: &[u8], mode: u32) -> Result<()> {
        let temp = self.stage(path, data, mode)?;
        self.commit(&temp, path)
    }

    /// Removes `<name>.*.tmp` leftovers of interrupted writes.
    pub fn sweep_stale(&self, path: &Path) {
        let Some(dir) = path.parent() else {
            return;
        };
        let prefix = format!("{}.", file_name(path));
        let suffix = format!(".{TEMP_SUFFIX}");
        let entries = match self.fs.read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(dir = %dir.display(), %err, "cannot list temp files");
                return;
            }
        };
        for entry in entries {
            let name = file_name(&entry);
            if name.starts_with(&prefix) && name.ends_with(&suffix) {
                debug!(path = %entry.display(), "removing stale temp file");
                self.discard(&entry);
            }
        }
    }
}

/// The one-time original backup and the rolling timestamped backups.
#[derive(Debug, Clone)]
pub struct BackupManager {
    fs: Arc<dyn FileSystem>,
    retention: usize,
}

impl BackupManager {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self {
            fs,
            retention: DEFAULT_RETENTION,
        }
    }

    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention;
        self
    }

    /// Copies `path` to `<name>.original.backup` unless that already exists.
    ///
    /// When `path` does not exist yet the backup is created empty, recording
    /// that there was nothing before the first write.
    pub fn preserve_original(&self, path: &Path) -> Result<()> {
        let backup = original_backup_path(path);
        if self.fs.exists(&backup) {
            return Ok(());
        }
        let data = match self.fs.read(path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(Error::io("read", path, err)),
        };
        self.fs
            .write(&backup, &data, PRIVATE_MODE)
            .map_err(|err| Error::io("write", &backup, err))?;
        debug!(backup = %backup.display(), "original config preserved");
        Ok(())
    }

    /// Copies `path` to `<name>-<epoch-ms>-lazyssh.backup`, keeping its mode.
    pub fn snapshot(&self, path: &Path) -> Result<Option<PathBuf>> {
        let info = match self.fs.stat(path) {
            Ok(info) => info,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(Error::io("stat", path, err)),
        };

        let name = file_name(path);
        let mut millis = Utc::now().timestamp_millis();
        let mut backup = sibling(path, format!("{name}-{millis}-{BACKUP_SUFFIX}"));
        while self.fs.exists(&backup) {
            millis += 1;
            backup = sibling(path, format!("{name}-{millis}-{BACKUP_SUFFIX}"));
        }

        self.fs
            .copy(path, &backup, info.mode)
            .map_err(|err| Error::io("copy", path, err))?;
        debug!(backup = %backup.display(), "rolling backup written");
        Ok(Some(backup))
    }

    /// Rolling backups of `path`, newest first.
    pub fn list(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let Some(dir) = path.parent() else {
            return Ok(Vec::new());
        };
        let prefix = format!("{}-", file_name(path));
        let suffix = format!("-{BACKUP_SUFFIX}");

        let mut backups: Vec<(std::time::SystemTime, PathBuf)> = self
            .fs
            .read_dir(dir)?
            .into_iter()
            .filter(|p| {
                let name = file_name(p);
                name.starts_with(&prefix) && name.ends_with(&suffix)
            })
            .filter_map(|p| self.fs.stat(&p).ok().map(|info| (info.modified, p)))
            .collect();
        backups.sort_by(|a, b| b.cmp(a));
        Ok(backups.into_iter().map(|(_, p)| p).collect())
    }

    /// Deletes everything past the retention bound. Never fails.
    pub fn prune(&self, path: &Path) {
        let backups = match self.list(path) {
            Ok(backups) => backups,
            Err(err) => {
                warn!(path = %path.display(), %err, "cannot list backups");
                return;
            }
        };
        for old in backups.iter().skip(self.retention) {
            match self.fs.remove(old) {
                Ok(()) => debug!(backup = %old.display(), "pruned backup"),
                Err(err) => warn!(backup = %old.display(), %err, "failed to prune backup"),
            }
        }
    }
}

/// Full config replacement: stage, back up, rename, clean up.
#[derive(Debug, Clone)]
pub struct ConfigWriter {
    writer: AtomicWriter,
    backups: BackupManager,
}

impl ConfigWriter {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self {
            writer: AtomicWriter::new(fs.clone()),
            backups: BackupManager::new(fs),
        }
    }

    pub fn with_retention(mut self, retention: usize) -> Self {
        self.backups = self.backups.with_retention(retention);
        self
    }

    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    pub fn replace(&self, path: &Path, data: &[u8]) -> Result<()> {
        let temp = self.writer.stage(path, data, PRIVATE_MODE)?;

        if let Err(err) = self.backups.preserve_original(path) {
            self.writer.discard(&temp);
            return Err(err);
        }
        match self.backups.snapshot(path) {
            Ok(_) => self.backups.prune(path),
            Err(err) => warn!(%err, "rolling backup skipped"),
        }

        self.writer.commit(&temp, path)?;
        self.writer.sweep_stale(path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{FsOp, MemoryFs, OsFs};
    use tempfile::TempDir;

    const CONFIG: &str = "/home/u/.ssh/config";

    fn setup() -> (Arc<MemoryFs>, ConfigWriter) {
        let fs = Arc::new(MemoryFs::new());
        fs.insert(CONFIG, "Host before\n", 0o644);
        let writer = ConfigWriter::new(fs.clone());
        (fs, writer)
    }

    fn temp_files(fs: &MemoryFs) -> Vec<PathBuf> {
        fs.files()
            .into_iter()
            .filter(|p| file_name(p).ends_with(".tmp"))
            .collect()
    }

    #[test]
    fn replace_writes_content_and_backups() {
        let (fs, writer) = setup();
        let path = Path::new(CONFIG);
        writer.replace(path, b"Host after\n").unwrap();

        assert_eq!(fs.contents(path).as_deref(), Some("Host after\n"));
        assert_eq!(
            fs.contents(&original_backup_path(path)).as_deref(),
            Some("Host before\n")
        );
        let rolling = writer.backups().list(path).unwrap();
        assert_eq!(rolling.len(), 1);
        assert_eq!(fs.contents(&rolling[0]).as_deref(), Some("Host before\n"));
        assert_eq!(fs.stat(&rolling[0]).unwrap().mode, 0o644);
        assert_eq!(fs.stat(path).unwrap().mode, 0o600);
        assert!(temp_files(&fs).is_empty());
    }

    #[test]
    fn failed_rename_leaves_target_untouched() {
        let (fs, writer) = setup();
        let path = Path::new(CONFIG);
        fs.fail(FsOp::Rename);

        let err = writer.replace(path, b"Host after\n").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Io);
        assert_eq!(fs.contents(path).as_deref(), Some("Host before\n"));
        assert!(temp_files(&fs).is_empty());
    }

    #[test]
    fn stale_temp_is_swept_on_next_write() {
        let (fs, writer) = setup();
        let path = Path::new(CONFIG);
        fs.insert("/home/u/.ssh/config.1700000000.tmp", "partial", 0o600);
        fs.insert("/home/u/.ssh/other.1.tmp", "unrelated", 0o600);

        writer.replace(path, b"Host after\n").unwrap();
        assert_eq!(
            temp_files(&fs),
            vec![PathBuf::from("/home/u/.ssh/other.1.tmp")]
        );
    }

    #[test]
    fn retention_keeps_newest() {
        let (fs, writer) = setup();
        let writer = writer.with_retention(3);
        let path = Path::new(CONFIG);
        for i in 0..7 {
            writer.replace(path, format!("Host h{i}\n").as_bytes()).unwrap();
        }
        let rolling = writer.backups().list(path).unwrap();
        assert_eq!(rolling.len(), 3);
        assert_eq!(fs.contents(&rolling[0]).as_deref(), Some("Host h5\n"));
        assert_eq!(
            fs.contents(&original_backup_path(path)).as_deref(),
            Some("Host before\n")
        );
    }

    #[test]
    fn original_backup_created_empty_for_new_file() {
        let fs = Arc::new(MemoryFs::new());
        let writer = ConfigWriter::new(fs.clone());
        let path = Path::new(CONFIG);
        writer.replace(path, b"Host first\n").unwrap();

        assert_eq!(fs.contents(&original_backup_path(path)).as_deref(), Some(""));
        assert!(writer.backups().list(path).unwrap().is_empty());
    }

    #[test]
    fn atomic_write_on_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metadata.json");
        let writer = AtomicWriter::new(Arc::new(OsFs));
        writer.write(&path, b"{}", 0o600).unwrap();
        writer.write(&path, b"{\"a\": {}}", 0o600).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"a\": {}}");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
