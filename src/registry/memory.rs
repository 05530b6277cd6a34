use std::sync::{PoisonError, RwLock};

use chrono::Utc;

use super::{check_admission, filter_hosts, HostRepository};
use crate::error::{Error, Result};
use crate::host::Host;

/// A registry that lives only in memory.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    hosts: RwLock<Vec<Host>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the registry without validation.
    pub fn with_hosts(hosts: Vec<Host>) -> Self {
        Self {
            hosts: RwLock::new(hosts),
        }
    }

    fn modify<T>(&self, alias: &str, f: impl FnOnce(&mut Host) -> T) -> Result<T> {
        let mut hosts = self.hosts.write().unwrap_or_else(PoisonError::into_inner);
        let host = hosts
            .iter_mut()
            .find(|h| h.alias == alias)
            .ok_or_else(|| Error::NotFound(alias.to_string()))?;
        Ok(f(host))
    }
}

impl HostRepository for MemoryRepository {
    fn list_hosts(&self, query: &str) -> Result<Vec<Host>> {
        let hosts = self.hosts.read().unwrap_or_else(PoisonError::into_inner);
        Ok(filter_hosts(hosts.clone(), query))
    }

    fn add_host(&self, host: Host) -> Result<()> {
        let mut hosts = self.hosts.write().unwrap_or_else(PoisonError::into_inner);
        check_admission(&host, None, &hosts)?;
        hosts.push(host);
        Ok(())
    }

    fn update_host(&self, old: &Host, new: Host) -> Result<()> {
        let mut hosts = self.hosts.write().unwrap_or_else(PoisonError::into_inner);
        check_admission(&new, Some(&old.alias), &hosts)?;
        let slot = hosts
            .iter_mut()
            .find(|h| h.alias == old.alias)
            .ok_or_else(|| Error::NotFound(old.alias.clone()))?;

        let mut new = new;
        if new.last_seen.is_none() {
            new.last_seen = slot.last_seen;
        }
        if new.pinned_at.is_none() {
            new.pinned_at = slot.pinned_at;
        }
        if new.ssh_count == 0 {
            new.ssh_count = slot.ssh_count;
        }
        *slot = new;
        Ok(())
    }

    fn delete_host(&self, host: &Host) -> Result<()> {
        let mut hosts = self.hosts.write().unwrap_or_else(PoisonError::into_inner);
        let before = hosts.len();
        hosts.retain(|h| h.alias != host.alias);
        if hosts.len() == before {
            return Err(Error::NotFound(host.alias.clone()));
        }
        Ok(())
    }

    fn set_pinned(&self, alias: &str, pinned: bool) -> Result<()> {
        self.modify(alias, |host| host.pinned_at = pinned.then(Utc::now))
    }

    fn record_ssh(&self, alias: &str) -> Result<()> {
        let now = Utc::now();
        self.modify(alias, |host| {
            host.last_seen = Some(host.last_seen.map_or(now, |prev| prev.max(now)));
            host.ssh_count += 1;
        })
    }
}
