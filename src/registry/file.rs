use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tracing::{debug, info, warn};

use super::{check_admission, filter_hosts, HostRepository};
use crate::backup::ConfigWriter;
use crate::error::{Error, Result};
use crate::fs::FileSystem;
use crate::host::Host;
use crate::metadata::{HostMetadata, MetadataStore};
use crate::sshconfig::ConfigDocument;

pub const SSH_DIR_MODE: u32 = 0o700;

/// Registry backed by an OpenSSH config file and a metadata sidecar.
#[derive(Debug)]
pub struct SshConfigRepository {
    config_path: PathBuf,
    home: Option<PathBuf>,
    fs: Arc<dyn FileSystem>,
    writer: ConfigWriter,
    metadata: MetadataStore,
    lock: Mutex<()>,
}

impl SshConfigRepository {
    pub fn new(
        config_path: impl Into<PathBuf>,
        metadata_path: impl Into<PathBuf>,
        fs: Arc<dyn FileSystem>,
    ) -> Self {
        Self {
            config_path: config_path.into(),
            home: dirs::home_dir(),
            writer: ConfigWriter::new(fs.clone()),
            metadata: MetadataStore::new(metadata_path, fs.clone()),
            fs,
            lock: Mutex::new(()),
        }
    }

    /// Home directory used to rewrite paths into `~/` form.
    pub fn with_home(mut self, home: Option<PathBuf>) -> Self {
        self.home = home;
        self
    }

    pub fn with_retention(mut self, retention: usize) -> Self {
        self.writer = self.writer.with_retention(retention);
        self
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    pub fn writer(&self) -> &ConfigWriter {
        &self.writer
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The config as it is on disk; a missing file is an empty document.
    pub fn load_document(&self) -> Result<ConfigDocument> {
        let data = match self.fs.read(&self.config_path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.config_path.display(), "no ssh config yet");
                return Ok(ConfigDocument::default());
            }
            Err(err) => return Err(Error::io("read", &self.config_path, err)),
        };
        let text = String::from_utf8(data).map_err(|_| {
            Error::Syntax(format!("{}: not valid UTF-8", self.config_path.display()))
        })?;
        let (doc, warnings) = ConfigDocument::parse(&text);
        for warning in &warnings {
            warn!(
                path = %self.config_path.display(),
                line = warning.line,
                "{}",
                warning.message
            );
        }
        Ok(doc)
    }

    fn save_document(&self, doc: &ConfigDocument) -> Result<()> {
        if let Some(dir) = self.config_path.parent() {
            if !self.fs.exists(dir) {
                self.fs
                    .create_dir_all(dir, SSH_DIR_MODE)
                    .map_err(|err| Error::io("create", dir, err))?;
            }
        }
        self.writer
            .replace(&self.config_path, doc.render().as_bytes())
    }

    /// Metadata errors after a committed config write are only logged.
    fn after_write(&self, what: &str, result: Result<()>) {
        if let Err(err) = result {
            warn!(%err, "{what}: config saved but metadata update failed");
        }
    }
}

impl HostRepository for SshConfigRepository {
    fn list_hosts(&self, query: &str) -> Result<Vec<Host>> {
        let _guard = self.guard();
        let mut hosts = self.load_document()?.hosts();
        let metadata = self.metadata.load_all()?;
        for host in &mut hosts {
            match metadata.get(&host.alias) {
                Some(entry) => entry.apply_to(host),
                None => host.clear_metadata(),
            }
        }
        Ok(filter_hosts(hosts, query))
    }

    fn add_host(&self, host: Host) -> Result<()> {
        let _guard = self.guard();
        let mut doc = self.load_document()?;
        check_admission(&host, None, &doc.hosts())?;

        doc.append_host(&host, self.home.as_deref());
        self.save_document(&doc)?;
        info!(alias = %host.alias, "host added");

        let incoming = HostMetadata::from_host(&host);
        if !incoming.is_empty() {
            self.after_write(
                "add",
                self.metadata.update_host(&host.alias, &host.alias, &incoming),
            );
        }
        Ok(())
    }

    fn update_host(&self, old: &Host, new: Host) -> Result<()> {
        let _guard = self.guard();
        let mut doc = self.load_document()?;
        check_admission(&new, Some(&old.alias), &doc.hosts())?;

        if !doc.update_host(&old.alias, &new, self.home.as_deref()) {
            return Err(Error::NotFound(old.alias.clone()));
        }
        self.save_document(&doc)?;
        if old.alias == new.alias {
            info!(alias = %new.alias, "host updated");
        } else {
            info!(from = %old.alias, to = %new.alias, "host renamed");
        }

        self.after_write(
            "update",
            self.metadata
                .update_host(&old.alias, &new.alias, &HostMetadata::from_host(&new)),
        );
        Ok(())
    }

    fn delete_host(&self, host: &Host) -> Result<()> {
        let _guard = self.guard();
        let mut doc = self.load_document()?;
        if !doc.remove_host(&host.alias) {
            return Err(Error::NotFound(host.alias.clone()));
        }
        self.save_document(&doc)?;
        info!(alias = %host.alias, "host deleted");

        self.after_write("delete", self.metadata.delete_host(&host.alias));
        Ok(())
    }

    fn set_pinned(&self, alias: &str, pinned: bool) -> Result<()> {
        let _guard = self.guard();
        self.metadata.set_pinned(alias, pinned, Utc::now())?;
        debug!(alias, pinned, "pin toggled");
        Ok(())
    }

    fn record_ssh(&self, alias: &str) -> Result<()> {
        let _guard = self.guard();
        let entry = self.metadata.record_use(alias, Utc::now())?;
        debug!(alias, count = entry.ssh_count, "connection recorded");
        Ok(())
    }
}
