//! Per-host data the SSH config format has no place for, kept in a JSON
//! sidecar keyed by alias.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backup::{AtomicWriter, PRIVATE_MODE};
use crate::error::{Error, Result};
use crate::fs::FileSystem;
use crate::host::Host;

pub const METADATA_DIR_MODE: u32 = 0o750;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostMetadata {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub ssh_count: u64,
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

impl HostMetadata {
    pub fn from_host(host: &Host) -> Self {
        HostMetadata {
            tags: host.tags.clone(),
            last_seen: host.last_seen,
            pinned_at: host.pinned_at,
            ssh_count: host.ssh_count,
        }
    }

    pub fn apply_to(&self, host: &mut Host) {
        host.tags = self.tags.clone();
        host.last_seen = self.last_seen;
        host.pinned_at = self.pinned_at;
        host.ssh_count = self.ssh_count;
    }

    /// Tags are replaced outright; the other fields only when set.
    pub fn merge(&mut self, incoming: &HostMetadata) {
        self.tags = incoming.tags.clone();
        if incoming.last_seen.is_some() {
            self.last_seen = incoming.last_seen;
        }
        if incoming.pinned_at.is_some() {
            self.pinned_at = incoming.pinned_at;
        }
        if incoming.ssh_count > 0 {
            self.ssh_count = incoming.ssh_count;
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &HostMetadata::default()
    }
}

pub type MetadataMap = BTreeMap<String, HostMetadata>;

#[derive(Debug, Clone)]
pub struct MetadataStore {
    path: PathBuf,
    fs: Arc<dyn FileSystem>,
    writer: AtomicWriter,
}

impl MetadataStore {
    pub fn new(path: impl Into<PathBuf>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            path: path.into(),
            writer: AtomicWriter::new(fs.clone()),
            fs,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing or empty file is an empty map.
    pub fn load_all(&self) -> Result<MetadataMap> {
        let data = match self.fs.read(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(MetadataMap::new()),
            Err(err) => return Err(Error::io("read", &self.path, err)),
        };
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(MetadataMap::new());
        }
        serde_json::from_slice(&data).map_err(|err| {
            Error::Syntax(format!("{}: {err}", self.path.display()))
        })
    }

    pub fn save_all(&self, map: &MetadataMap) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            self.fs
                .create_dir_all(parent, METADATA_DIR_MODE)
                .map_err(|err| Error::io("create", parent, err))?;
        }
        let mut data = serde_json::to_vec_pretty(map)
            .map_err(|err| Error::Syntax(format!("cannot encode metadata: {err}")))?;
        data.push(b'\n');
        self.writer.write(&self.path, &data, PRIVATE_MODE)?;
        debug!(path = %self.path.display(), entries = map.len(), "metadata saved");
        Ok(())
    }

    /// Moves the entry from `old_alias` to `new_alias` and merges `incoming`.
    pub fn update_host(&self, old_alias: &str, new_alias: &str, incoming: &HostMetadata) -> Result<()> {
        let mut map = self.load_all()?;
        let mut entry = map.remove(old_alias).unwrap_or_default();
        if old_alias != new_alias {
            if let Some(existing) = map.remove(new_alias) {
                entry.merge(&existing);
            }
        }
        entry.merge(incoming);
        if entry.is_empty() {
            map.remove(new_alias);
        } else {
            map.insert(new_alias.to_string(), entry);
        }
        self.save_all(&map)
    }

    pub fn delete_host(&self, alias: &str) -> Result<()> {
        let mut map = self.load_all()?;
        if map.remove(alias).is_some() {
            self.save_all(&map)?;
        }
        Ok(())
    }

    pub fn set_pinned(&self, alias: &str, pinned: bool, now: DateTime<Utc>) -> Result<()> {
        let mut map = self.load_all()?;
        let entry = map.entry(alias.to_string()).or_default();
        entry.pinned_at = pinned.then_some(now);
        self.save_all(&map)
    }

    /// Bumps the use count and moves last-seen forward, never back.
    pub fn record_use(&self, alias: &str, now: DateTime<Utc>) -> Result<HostMetadata> {
        let mut map = self.load_all()?;
        let entry = map.entry(alias.to_string()).or_default();
        entry.last_seen = Some(entry.last_seen.map_or(now, |prev| prev.max(now)));
        entry.ssh_count += 1;
        let updated = entry.clone();
        self.save_all(&map)?;
        Ok(updated)
    }
}
