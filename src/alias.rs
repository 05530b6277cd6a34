//! Aliases synthesized from user, host and port when none is given.

use std::net::IpAddr;

use crate::host::DEFAULT_PORT;

/// Login names common enough that they add nothing to an alias.
pub const DEFAULT_USERS: &[&str] = &[
    "root",
    "ubuntu",
    "ec2-user",
    "centos",
    "debian",
    "fedora",
    "core",
    "azureuser",
];

/// Builds `[user@]name[:port]` from a destination.
///
/// IP literals are kept whole. Names lose a leading `www.` and their TLD,
/// and are cut to the two leftmost remaining labels.
pub fn smart_alias(user: &str, host: &str, port: Option<u16>) -> String {
    smart_alias_for(user, host, port, &whoami::username())
}

pub(crate) fn smart_alias_for(user: &str, host: &str, port: Option<u16>, current_user: &str) -> String {
    let host = host.trim().trim_start_matches('[').trim_end_matches(']');
    let mut alias = if host.parse::<IpAddr>().is_ok() {
        host.to_string()
    } else {
        short_name(host)
    };

    let user = user.trim();
    if !user.is_empty() && !DEFAULT_USERS.contains(&user) && user != current_user {
        alias = format!("{user}@{alias}");
    }
    if let Some(port) = port.filter(|p| *p != DEFAULT_PORT) {
        alias = format!("{alias}:{port}");
    }
    alias
}

fn short_name(host: &str) -> String {
    let lower = host.to_lowercase();
    let name = lower.strip_prefix("www.").unwrap_or(&lower);
    let mut labels: Vec<&str> = name.split('.').filter(|l| !l.is_empty()).collect();
    if labels.len() > 1 {
        labels.pop();
    }
    labels.truncate(2);
    labels.join(".")
}

/// Replaces everything an alias may not contain with `-`.
///
/// Smart aliases carry `@` and `:`, which the config alias rules reject.
pub fn sanitize(alias: &str) -> String {
    let mut out = String::with_capacity(alias.len());
    for c in alias.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
            out.push(c);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}
