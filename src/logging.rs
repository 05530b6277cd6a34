use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter, e.g. `lazyssh=debug`.
pub const LOG_ENV: &str = "LAZYSSH_LOG";
pub const DEFAULT_FILTER: &str = "info";

/// Sends logs to `path`; the terminal belongs to the picker.
///
/// Returns false and leaves logging off when the file cannot be opened.
pub fn init(path: &Path) -> bool {
    let file = match open_log_file(path) {
        Ok(file) => file,
        Err(_) => return false,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter(std::env::var(LOG_ENV).ok().as_deref()))
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(false)
        .try_init()
        .is_ok()
}

fn filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|s| EnvFilter::try_new(s).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn log_file_and_parent_are_created() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/lazyssh.log");
        open_log_file(&path).unwrap();
        assert!(path.is_file());
    }

    #[test]
    fn bad_filter_falls_back_to_default() {
        use tracing_subscriber::filter::LevelFilter;

        assert_eq!(filter(Some("lazyssh=loud")).max_level_hint(), Some(LevelFilter::INFO));
        assert_eq!(filter(None).max_level_hint(), Some(LevelFilter::INFO));
        assert_eq!(filter(Some("debug")).max_level_hint(), Some(LevelFilter::DEBUG));
    }
}
