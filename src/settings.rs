use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::fs::OsFs;
use crate::registry::SshConfigRepository;

pub const APP_DIR: &str = ".lazyssh";
pub const METADATA_FILE: &str = "metadata.json";
pub const LOG_FILE: &str = "lazyssh.log";
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Where lazyssh reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub home: Option<PathBuf>,
    pub ssh_config: PathBuf,
    pub metadata: PathBuf,
    pub log_file: PathBuf,
}

impl Settings {
    /// Defaults under `home`.
    pub fn for_home(home: &Path) -> Self {
        let app_dir = home.join(APP_DIR);
        Settings {
            home: Some(home.to_path_buf()),
            ssh_config: home.join(".ssh").join("config"),
            metadata: app_dir.join(METADATA_FILE),
            log_file: app_dir.join(LOG_FILE),
        }
    }

    /// Defaults under the user's home, with command-line overrides applied.
    pub fn resolve(ssh_config: Option<PathBuf>, metadata: Option<PathBuf>) -> Result<Self> {
        let home = dirs::home_dir().ok_or_else(|| Error::Io {
            action: "locate",
            path: PathBuf::from("~"),
            source: io::Error::new(io::ErrorKind::NotFound, "home directory is not set"),
        })?;
        Ok(Settings::for_home(&home).with_overrides(ssh_config, metadata))
    }

    pub fn with_overrides(mut self, ssh_config: Option<PathBuf>, metadata: Option<PathBuf>) -> Self {
        if let Some(path) = ssh_config {
            self.ssh_config = path;
        }
        if let Some(path) = metadata {
            self.metadata = path;
        }
        self
    }

    /// The on-disk registry for these locations.
    pub fn repository(&self) -> SshConfigRepository {
        SshConfigRepository::new(&self.ssh_config, &self.metadata, Arc::new(OsFs))
            .with_home(self.home.clone())
    }
}
