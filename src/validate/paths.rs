use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use crate::fs::FileSystem;
use crate::sshconfig::split_quoted;

/// Why a key or known-hosts path cannot be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathProblem {
    NotFound,
    IsDirectory,
    NotAccessible,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathError {
    pub path: String,
    pub problem: PathProblem,
}

impl fmt::Display for PathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self.problem {
            PathProblem::NotFound => "not found",
            PathProblem::IsDirectory => "is a directory",
            PathProblem::NotAccessible => "not accessible",
        };
        write!(f, "{}: {what}", self.path)
    }
}

/// Expands a leading `~` against `home`.
pub fn expand_tilde(path: &str, home: Option<&Path>) -> PathBuf {
    match (path.strip_prefix('~'), home) {
        (Some(""), Some(home)) => home.to_path_buf(),
        (Some(rest), Some(home)) if rest.starts_with('/') => home.join(&rest[1..]),
        _ => PathBuf::from(path),
    }
}

/// Checks that `path` names a readable regular file.
pub fn check_readable(fs: &dyn FileSystem, path: &str, home: Option<&Path>) -> Result<(), PathError> {
    let expanded = expand_tilde(path, home);
    let fail = |problem| PathError {
        path: path.to_string(),
        problem,
    };
    let info = fs.stat(&expanded).map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => fail(PathProblem::NotFound),
        _ => fail(PathProblem::NotAccessible),
    })?;
    if info.is_dir {
        return Err(fail(PathProblem::IsDirectory));
    }
    fs.read(&expanded)
        .map(|_| ())
        .map_err(|_| fail(PathProblem::NotAccessible))
}

/// Checks every identity file, reporting each bad one.
pub fn check_key_paths(fs: &dyn FileSystem, paths: &[String], home: Option<&Path>) -> Vec<PathError> {
    paths
        .iter()
        .filter(|p| !p.trim().is_empty())
        .filter_map(|p| check_readable(fs, p.trim(), home).err())
        .collect()
}

/// `UserKnownHostsFile` holds a whitespace-separated list, entries with
/// spaces double-quoted; `none` disables it.
pub fn check_known_hosts(fs: &dyn FileSystem, value: &str, home: Option<&Path>) -> Vec<PathError> {
    if value.trim().eq_ignore_ascii_case("none") {
        return Vec::new();
    }
    split_quoted(value)
        .iter()
        .filter_map(|p| check_readable(fs, p, home).err())
        .collect()
}
