//! The host registry: the SSH config and the metadata sidecar seen as one
//! list of [`Host`] records.

mod file;
mod memory;

use std::cmp::Ordering;

pub use file::SshConfigRepository;
pub use memory::MemoryRepository;

use crate::error::{Error, Result};
use crate::host::Host;
use crate::validate::{check_alias_unique, validate_host};

/// Operations the picker and the CLI run against the registry.
pub trait HostRepository {
    /// Hosts in config order with metadata merged, filtered by `query`.
    fn list_hosts(&self, query: &str) -> Result<Vec<Host>>;

    fn add_host(&self, host: Host) -> Result<()>;

    /// Replaces `old` with `new`, following a rename in the metadata.
    fn update_host(&self, old: &Host, new: Host) -> Result<()>;

    fn delete_host(&self, host: &Host) -> Result<()>;

    fn set_pinned(&self, alias: &str, pinned: bool) -> Result<()>;

    /// Marks a connection: bumps the use count and last-seen time.
    fn record_ssh(&self, alias: &str) -> Result<()>;
}

/// Case-insensitive substring match over host, user, tags and aliases.
pub fn matches_query(host: &Host, query: &str) -> bool {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return true;
    }
    let mut haystack = String::new();
    for part in [&host.hostname, &host.user]
        .into_iter()
        .chain(host.tags.iter())
        .chain(std::iter::once(&host.alias))
        .chain(host.aliases.iter())
    {
        haystack.push_str(&part.to_lowercase());
        haystack.push(' ');
    }
    haystack.contains(&query)
}

pub fn filter_hosts(hosts: Vec<Host>, query: &str) -> Vec<Host> {
    hosts.into_iter().filter(|h| matches_query(h, query)).collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortMode {
    #[default]
    AliasAsc,
    AliasDesc,
    LastSeenDesc,
    LastSeenAsc,
    UseCountDesc,
}

impl SortMode {
    pub fn next(self) -> SortMode {
        match self {
            SortMode::AliasAsc => SortMode::AliasDesc,
            SortMode::AliasDesc => SortMode::LastSeenDesc,
            SortMode::LastSeenDesc => SortMode::LastSeenAsc,
            SortMode::LastSeenAsc => SortMode::UseCountDesc,
            SortMode::UseCountDesc => SortMode::AliasAsc,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SortMode::AliasAsc => "alias ↑",
            SortMode::AliasDesc => "alias ↓",
            SortMode::LastSeenDesc => "last seen ↓",
            SortMode::LastSeenAsc => "last seen ↑",
            SortMode::UseCountDesc => "most used",
        }
    }
}

/// Pinned hosts first (newest pin first), then by `mode`.
///
/// Last-seen modes put never-seen hosts at the end; ties fall back to alias.
pub fn sort_hosts(hosts: &mut [Host], mode: SortMode) {
    hosts.sort_by(|a, b| compare(a, b, mode));
}

fn compare(a: &Host, b: &Host, mode: SortMode) -> Ordering {
    match (a.pinned_at, b.pinned_at) {
        (Some(x), Some(y)) => return y.cmp(&x).then_with(|| a.alias.cmp(&b.alias)),
        (Some(_), None) => return Ordering::Less,
        (None, Some(_)) => return Ordering::Greater,
        (None, None) => {}
    }

    let by_alias = a.alias.to_lowercase().cmp(&b.alias.to_lowercase());
    match mode {
        SortMode::AliasAsc => by_alias,
        SortMode::AliasDesc => by_alias.reverse(),
        SortMode::LastSeenDesc | SortMode::LastSeenAsc => match (a.last_seen, b.last_seen) {
            (Some(x), Some(y)) => {
                let order = if mode == SortMode::LastSeenDesc {
                    y.cmp(&x)
                } else {
                    x.cmp(&y)
                };
                order.then(by_alias)
            }
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => by_alias,
        },
        SortMode::UseCountDesc => b.ssh_count.cmp(&a.ssh_count).then(by_alias),
    }
}

/// Shared admission rules for add and update.
pub(crate) fn check_admission(host: &Host, original: Option<&str>, existing: &[Host]) -> Result<()> {
    validate_host(host).into_result()?;
    check_alias_unique(&host.alias, original, existing)
        .map_err(|_| Error::Conflict(host.alias.clone()))?;
    for alias in &host.aliases {
        check_alias_unique(alias, original, existing).map_err(|_| Error::Conflict(alias.clone()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn host(alias: &str) -> Host {
        let mut host = Host::new(alias);
        host.hostname = format!("{alias}.example");
        host
    }

    #[test]
    fn pinned_first_then_alias() {
        let today = Utc.with_ymd_and_hms(2024, 5, 2, 12, 0, 0).unwrap();
        let yesterday = today - Duration::days(1);

        let mut a = host("a");
        a.pinned_at = Some(yesterday);
        let mut b = host("b");
        b.pinned_at = Some(today);
        let mut c = host("c");
        c.last_seen = Some(today);
        let d = host("d");

        let mut hosts = vec![d, c, a, b];
        sort_hosts(&mut hosts, SortMode::AliasAsc);
        let order: Vec<&str> = hosts.iter().map(|h| h.alias.as_str()).collect();
        assert_eq!(order, vec!["b", "a", "c", "d"]);
    }

    #[test]
    fn last_seen_puts_never_seen_last() {
        let now = Utc.with_ymd_and_hms(2024, 5, 2, 12, 0, 0).unwrap();
        let mut old = host("old");
        old.last_seen = Some(now - Duration::hours(5));
        let mut recent = host("recent");
        recent.last_seen = Some(now);
        let never = host("aaa-never");

        let mut hosts = vec![never.clone(), old.clone(), recent.clone()];
        sort_hosts(&mut hosts, SortMode::LastSeenDesc);
        let order: Vec<&str> = hosts.iter().map(|h| h.alias.as_str()).collect();
        assert_eq!(order, vec!["recent", "old", "aaa-never"]);

        sort_hosts(&mut hosts, SortMode::LastSeenAsc);
        let order: Vec<&str> = hosts.iter().map(|h| h.alias.as_str()).collect();
        assert_eq!(order, vec!["old", "recent", "aaa-never"]);
    }

    #[test]
    fn use_count_and_cycle() {
        let mut busy = host("z");
        busy.ssh_count = 9;
        let idle = host("a");
        let mut hosts = vec![idle, busy];
        sort_hosts(&mut hosts, SortMode::UseCountDesc);
        assert_eq!(hosts[0].alias, "z");

        let mut mode = SortMode::default();
        for _ in 0..5 {
            mode = mode.next();
        }
        assert_eq!(mode, SortMode::AliasAsc);
    }

    #[test]
    fn query_matches_every_searchable_field() {
        let mut h = host("web");
        h.user = "Deploy".into();
        h.tags = vec!["Production".into()];
        h.aliases = vec!["frontend".into()];

        for query in ["", "web", "EXAMPLE", "deploy", "prod", "front"] {
            assert!(matches_query(&h, query), "{query}");
        }
        assert!(!matches_query(&h, "staging"));
    }
}
