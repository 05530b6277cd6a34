//! File-system access used by the registry, behind a trait so tests can swap
//! in [`MemoryFs`] and inject failures.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt::Debug;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileInfo {
    pub len: u64,
    pub modified: SystemTime,
    pub mode: u32,
    pub is_dir: bool,
}

pub trait FileSystem: Send + Sync + Debug {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Creates or truncates `path`, writes `data`, applies `mode` and syncs.
    fn write(&self, path: &Path, data: &[u8], mode: u32) -> io::Result<()>;

    fn stat(&self, path: &Path) -> io::Result<FileInfo>;

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    fn remove(&self, path: &Path) -> io::Result<()>;

    fn set_mode(&self, path: &Path, mode: u32) -> io::Result<()>;

    /// Entries directly inside `dir`.
    fn read_dir(&self, dir: &Path) -> io::Result<Vec<PathBuf>>;

    fn create_dir_all(&self, dir: &Path, mode: u32) -> io::Result<()>;

    fn exists(&self, path: &Path) -> bool {
        self.stat(path).is_ok()
    }

    fn copy(&self, from: &Path, to: &Path, mode: u32) -> io::Result<()> {
        let data = self.read(from)?;
        self.write(to, &data, mode)
    }
}

/// The host operating system's file API.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsFs;

impl FileSystem for OsFs {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn write(&self, path: &Path, data: &[u8], mode: u32) -> io::Result<()> {
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(mode);
        }
        let mut file = options.open(path)?;
        file.write_all(data)?;
        file.flush()?;
        file.sync_all()?;
        drop(file);
        // an existing file keeps its old mode through open(); enforce it
        self.set_mode(path, mode)
    }

    fn stat(&self, path: &Path) -> io::Result<FileInfo> {
        let meta = fs::metadata(path)?;
        #[cfg(unix)]
        let mode = {
            use std::os::unix::fs::PermissionsExt;
            meta.permissions().mode() & 0o7777
        };
        #[cfg(not(unix))]
        let mode = if meta.permissions().readonly() { 0o444 } else { 0o644 };
        Ok(FileInfo {
            len: meta.len(),
            modified: meta.modified()?,
            mode,
            is_dir: meta.is_dir(),
        })
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    #[cfg(unix)]
    fn set_mode(&self, path: &Path, mode: u32) -> io::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
    }

    #[cfg(not(unix))]
    fn set_mode(&self, _path: &Path, _mode: u32) -> io::Result<()> {
        Ok(())
    }

    fn read_dir(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        fs::read_dir(dir)?
            .map(|entry| entry.map(|e| e.path()))
            .collect()
    }

    fn create_dir_all(&self, dir: &Path, mode: u32) -> io::Result<()> {
        if dir.is_dir() {
            return Ok(());
        }
        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(mode);
        }
        #[cfg(not(unix))]
        let _ = mode;
        builder.create(dir)
    }
}

/// Operations [`MemoryFs`] can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsOp {
    Read,
    Write,
    Rename,
    Remove,
    ReadDir,
    CreateDir,
}

#[derive(Debug, Clone)]
struct MemFile {
    data: Vec<u8>,
    mode: u32,
    modified: SystemTime,
}

#[derive(Debug, Default)]
struct MemState {
    files: BTreeMap<PathBuf, MemFile>,
    dirs: BTreeSet<PathBuf>,
    clock: u64,
    failing: HashSet<FsOp>,
    /// Paths that reject reads and writes with PermissionDenied.
    locked: HashSet<PathBuf>,
}

impl MemState {
    fn tick(&mut self) -> SystemTime {
        self.clock += 1;
        UNIX_EPOCH + Duration::from_secs(1_700_000_000 + self.clock)
    }

    fn check(&self, op: FsOp, path: &Path) -> io::Result<()> {
        if self.failing.contains(&op) {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("injected {op:?} failure"),
            ));
        }
        if self.locked.contains(path) {
            return Err(io::Error::from(io::ErrorKind::PermissionDenied));
        }
        Ok(())
    }
}

/// In-memory file system with a logical clock for modification times.
#[derive(Debug, Default)]
pub struct MemoryFs {
    state: RwLock<MemState>,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `op` fail until [`MemoryFs::clear_failures`].
    pub fn fail(&self, op: FsOp) {
        self.state_mut(|s| {
            s.failing.insert(op);
        });
    }

    pub fn clear_failures(&self) {
        self.state_mut(|s| s.failing.clear());
    }

    pub fn lock_path(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        self.state_mut(|s| {
            s.locked.insert(path);
        });
    }

    /// Seeds a file without going through failure injection.
    pub fn insert(&self, path: impl Into<PathBuf>, data: impl Into<Vec<u8>>, mode: u32) {
        let path = path.into();
        let data = data.into();
        self.state_mut(|s| {
            let modified = s.tick();
            if let Some(parent) = path.parent() {
                insert_dirs(&mut s.dirs, parent);
            }
            s.files.insert(
                path,
                MemFile {
                    data,
                    mode,
                    modified,
                },
            );
        });
    }

    /// Contents of `path` as text, if present.
    pub fn contents(&self, path: &Path) -> Option<String> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .files
            .get(path)
            .map(|f| String::from_utf8_lossy(&f.data).into_owned())
    }

    pub fn files(&self) -> Vec<PathBuf> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.files.keys().cloned().collect()
    }

    fn state_mut<T>(&self, f: impl FnOnce(&mut MemState) -> T) -> T {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }
}

fn insert_dirs(dirs: &mut BTreeSet<PathBuf>, dir: &Path) {
    for ancestor in dir.ancestors() {
        if ancestor.as_os_str().is_empty() {
            continue;
        }
        dirs.insert(ancestor.to_path_buf());
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("{} not found", path.display()),
    )
}

impl FileSystem for MemoryFs {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.check(FsOp::Read, path)?;
        state
            .files
            .get(path)
            .map(|f| f.data.clone())
            .ok_or_else(|| not_found(path))
    }

    fn write(&self, path: &Path, data: &[u8], mode: u32) -> io::Result<()> {
        self.state_mut(|s| {
            s.check(FsOp::Write, path)?;
            if s.dirs.contains(path) {
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    format!("{} is a directory", path.display()),
                ));
            }
            let modified = s.tick();
            s.files.insert(
                path.to_path_buf(),
                MemFile {
                    data: data.to_vec(),
                    mode,
                    modified,
                },
            );
            Ok(())
        })
    }

    fn stat(&self, path: &Path) -> io::Result<FileInfo> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(file) = state.files.get(path) {
            return Ok(FileInfo {
                len: file.data.len() as u64,
                modified: file.modified,
                mode: file.mode,
                is_dir: false,
            });
        }
        if state.dirs.contains(path) {
            return Ok(FileInfo {
                len: 0,
                modified: UNIX_EPOCH,
                mode: 0o755,
                is_dir: true,
            });
        }
        Err(not_found(path))
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        self.state_mut(|s| {
            s.check(FsOp::Rename, to)?;
            let file = s.files.remove(from).ok_or_else(|| not_found(from))?;
            s.files.insert(to.to_path_buf(), file);
            Ok(())
        })
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        self.state_mut(|s| {
            s.check(FsOp::Remove, path)?;
            s.files.remove(path).map(|_| ()).ok_or_else(|| not_found(path))
        })
    }

    fn set_mode(&self, path: &Path, mode: u32) -> io::Result<()> {
        self.state_mut(|s| {
            let file = s.files.get_mut(path).ok_or_else(|| not_found(path))?;
            file.mode = mode;
            Ok(())
        })
    }

    fn read_dir(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.check(FsOp::ReadDir, dir)?;
        let children = state
            .files
            .keys()
            .chain(state.dirs.iter())
            .filter(|p| p.parent() == Some(dir))
            .cloned()
            .collect();
        Ok(children)
    }

    fn create_dir_all(&self, dir: &Path, _mode: u32) -> io::Result<()> {
        self.state_mut(|s| {
            s.check(FsOp::CreateDir, dir)?;
            insert_dirs(&mut s.dirs, dir);
            Ok(())
        })
    }
}
