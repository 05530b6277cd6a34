use std::collections::HashSet;
use std::path::Path;

use crate::host::{is_wildcard, Host, SshOption, DEFAULT_PORT};

use super::parser::{join_quoted, split_quoted, Block, BlockKind, ConfigDocument, Line, LineKind};

const INDENT: &str = "    ";

/// Keys the writer owns inside a Host block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ManagedKey {
    HostName,
    User,
    Port,
    IdentityFile,
    Option(SshOption),
}

impl ManagedKey {
    fn from_key(key: &str) -> Option<ManagedKey> {
        match key.to_ascii_lowercase().as_str() {
            "hostname" => Some(ManagedKey::HostName),
            "user" => Some(ManagedKey::User),
            "port" => Some(ManagedKey::Port),
            "identityfile" => Some(ManagedKey::IdentityFile),
            _ => SshOption::from_key(key).map(ManagedKey::Option),
        }
    }

    fn name(self) -> &'static str {
        match self {
            ManagedKey::HostName => "HostName",
            ManagedKey::User => "User",
            ManagedKey::Port => "Port",
            ManagedKey::IdentityFile => "IdentityFile",
            ManagedKey::Option(opt) => opt.name(),
        }
    }

    fn is_multi(self) -> bool {
        match self {
            ManagedKey::IdentityFile => true,
            ManagedKey::Option(opt) => opt.is_multi(),
            _ => false,
        }
    }
}

/// Key/value pairs for `host` in write order, values already encoded.
fn encode_entries(host: &Host, home: Option<&Path>) -> Vec<(ManagedKey, String)> {
    let mut entries = Vec::new();
    if !host.hostname.is_empty() {
        entries.push((ManagedKey::HostName, host.hostname.clone()));
    }
    if !host.user.is_empty() {
        entries.push((ManagedKey::User, host.user.clone()));
    }
    if let Some(port) = host.port.filter(|p| *p != DEFAULT_PORT) {
        entries.push((ManagedKey::Port, port.to_string()));
    }
    for path in &host.identity_files {
        let path = tilde_path(path, home);
        entries.push((ManagedKey::IdentityFile, quote_if_needed(&path)));
    }
    for (opt, values) in host.options.iter() {
        for value in values {
            entries.push((ManagedKey::Option(opt), encode_value(opt, value, home)));
        }
    }
    entries
}

fn encode_value(opt: SshOption, value: &str, home: Option<&Path>) -> String {
    match opt {
        SshOption::LocalForward | SshOption::RemoteForward => forward_to_config(value),
        SshOption::UserKnownHostsFile => {
            let paths: Vec<String> = split_quoted(value)
                .iter()
                .map(|p| tilde_path(p, home))
                .collect();
            join_quoted(&paths)
        }
        _ if opt.is_path() => quote_if_needed(value),
        _ => value.to_string(),
    }
}

/// `8080:localhost:80` becomes `8080 localhost:80`.
pub(crate) fn forward_to_config(value: &str) -> String {
    if value.contains(char::is_whitespace) {
        return value.to_string();
    }
    // the target is the last `host:hostport` pair; host may be a [v6] literal
    let Some(port_sep) = value.rfind(':') else {
        return value.to_string();
    };
    let head = &value[..port_sep];
    let host_start = if head.ends_with(']') {
        head.rfind('[')
    } else {
        head.rfind(':').map(|i| i + 1)
    };
    match host_start {
        Some(start) if start > 0 && value[..start].ends_with(':') => {
            format!("{} {}", &value[..start - 1], &value[start..])
        }
        _ => value.to_string(),
    }
}

fn quote_if_needed(value: &str) -> String {
    if value.contains(char::is_whitespace) && !value.starts_with('"') {
        format!("\"{value}\"")
    } else {
        value.to_string()
    }
}

/// Rewrites an absolute path under `home` to `~/...`; anything else is kept.
pub fn tilde_path(path: &str, home: Option<&Path>) -> String {
    let Some(home) = home else {
        return path.to_string();
    };
    let candidate = Path::new(path);
    if !candidate.is_absolute() {
        return path.to_string();
    }
    match candidate.strip_prefix(home) {
        Ok(rest) if rest.as_os_str().is_empty() => "~".to_string(),
        Ok(rest) => format!("~/{}", rest.to_string_lossy()),
        Err(_) => path.to_string(),
    }
}

fn header_line(patterns: &[String]) -> Line {
    let value = patterns.join(" ");
    Line {
        raw: format!("Host {value}"),
        kind: LineKind::Entry {
            key: "Host".to_string(),
            value,
        },
    }
}

fn host_patterns(host: &Host, retained: &[String]) -> Vec<String> {
    std::iter::once(host.alias.clone())
        .chain(host.aliases.iter().cloned())
        .chain(retained.iter().cloned())
        .collect()
}

impl ConfigDocument {
    /// Appends a fresh block for `host`, separated by a blank line.
    pub fn append_host(&mut self, host: &Host, home: Option<&Path>) {
        let last_line = self
            .blocks
            .last()
            .map(|b| b.lines.last().unwrap_or(&b.header))
            .or_else(|| self.preamble.last());
        if let Some(line) = last_line {
            if line.kind != LineKind::Blank {
                match self.blocks.last_mut() {
                    Some(block) => block.lines.push(Line::blank()),
                    None => self.preamble.push(Line::blank()),
                }
            }
        }

        let lines = encode_entries(host, home)
            .into_iter()
            .map(|(key, value)| Line::entry(INDENT, key.name(), &value))
            .collect();
        self.blocks.push(Block {
            kind: BlockKind::Host,
            header: header_line(&host_patterns(host, &[])),
            patterns: host_patterns(host, &[]),
            lines,
        });
        self.trailing_newline = true;
    }

    /// Rewrites the block whose primary alias is `alias` in place.
    ///
    /// Unchanged lines keep their source text, unknown keys and comments stay
    /// where they are, multi-valued keys are replaced wholesale. Returns false
    /// when no such block exists.
    pub fn update_host(&mut self, alias: &str, host: &Host, home: Option<&Path>) -> bool {
        let Some(index) = self.find_block(alias) else {
            return false;
        };
        let block = &mut self.blocks[index];

        let retained: Vec<String> = block.patterns[1..]
            .iter()
            .filter(|p| is_wildcard(p))
            .cloned()
            .collect();
        let patterns = host_patterns(host, &retained);
        if patterns != block.patterns {
            block.header = header_line(&patterns);
            block.patterns = patterns;
        }

        let desired = encode_entries(host, home);
        let mut seen: HashSet<ManagedKey> = HashSet::new();
        let mut lines = Vec::with_capacity(block.lines.len() + desired.len());

        for line in block.lines.drain(..) {
            let Some(key) = line.key().and_then(ManagedKey::from_key) else {
                lines.push(line);
                continue;
            };
            if key.is_multi() || !seen.insert(key) {
                continue;
            }
            let Some((_, value)) = desired.iter().find(|(k, _)| *k == key) else {
                continue;
            };
            if line.value() == Some(value.as_str()) {
                lines.push(line);
            } else {
                let indent = line.indent().to_string();
                lines.push(Line::entry(&indent, key.name(), value));
            }
        }

        let insert_at = lines
            .iter()
            .rposition(|l| matches!(l.kind, LineKind::Entry { .. }))
            .map(|i| i + 1)
            .unwrap_or(0);
        let indent = lines
            .iter()
            .find(|l| matches!(l.kind, LineKind::Entry { .. }))
            .map(|l| l.indent().to_string())
            .filter(|i| !i.is_empty())
            .unwrap_or_else(|| INDENT.to_string());

        let appended: Vec<Line> = desired
            .iter()
            .filter(|(key, _)| key.is_multi() || !seen.contains(key))
            .map(|(key, value)| Line::entry(&indent, key.name(), value))
            .collect();
        lines.splice(insert_at..insert_at, appended);

        block.lines = lines;
        self.trailing_newline = true;
        true
    }

    /// Drops the block whose primary alias is `alias`.
    pub fn remove_host(&mut self, alias: &str) -> bool {
        match self.find_block(alias) {
            Some(index) => {
                self.blocks.remove(index);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn home() -> PathBuf {
        PathBuf::from("/home/alice")
    }

    fn web() -> Host {
        let mut host = Host::new("web");
        host.hostname = "10.0.0.1".into();
        host.user = "ubuntu".into();
        host.port = Some(22);
        host.identity_files = vec!["~/.ssh/id_ed25519".into()];
        host
    }

    #[test]
    fn append_to_empty_document() {
        let mut doc = ConfigDocument::default();
        doc.append_host(&web(), Some(&home()));
        assert_eq!(
            doc.render(),
            "Host web\n    HostName 10.0.0.1\n    User ubuntu\n    IdentityFile ~/.ssh/id_ed25519\n"
        );
    }

    #[test]
    fn append_separates_blocks() {
        let (mut doc, _) = ConfigDocument::parse("Host a\n    HostName a.example");
        doc.append_host(&web(), None);
        assert!(doc
            .render()
            .starts_with("Host a\n    HostName a.example\n\nHost web\n"));
    }

    #[test]
    fn write_order_follows_categories() {
        let mut host = Host::new("x");
        host.hostname = "x.example".into();
        host.options.set(SshOption::LogLevel, "DEBUG");
        host.options.set(SshOption::ServerAliveInterval, "30");
        host.options.set(SshOption::ProxyJump, "bastion");
        host.options.push(SshOption::LocalForward, "8080:localhost:80");
        host.port = Some(2200);

        let mut doc = ConfigDocument::default();
        doc.append_host(&host, None);
        assert_eq!(
            doc.render(),
            "Host x\n    HostName x.example\n    Port 2200\n    ProxyJump bastion\n    \
             LocalForward 8080 localhost:80\n    ServerAliveInterval 30\n    LogLevel DEBUG\n"
        );
    }

    #[test]
    fn update_keeps_unknown_keys_and_comments() {
        let source = "\
Host web
\thostname 10.0.0.1
\t# owner: ops
\tXAuthLocation /opt/X11/bin/xauth
\tLocalForward 8080 localhost:80
\tUser root

Host other
    HostName other.example
";
        let (mut doc, _) = ConfigDocument::parse(source);
        let mut host = doc.hosts().remove(0);
        host.user = "deploy".into();
        host.options.set_values(
            SshOption::LocalForward,
            vec!["8081:localhost:81".into(), "8082:localhost:82".into()],
        );
        assert!(doc.update_host("web", &host, None));

        assert_eq!(
            doc.render(),
            "\
Host web
\thostname 10.0.0.1
\t# owner: ops
\tXAuthLocation /opt/X11/bin/xauth
\tUser deploy
\tLocalForward 8081 localhost:81
\tLocalForward 8082 localhost:82

Host other
    HostName other.example
"
        );
    }

    #[test]
    fn update_renames_and_keeps_wildcard_patterns() {
        let (mut doc, _) = ConfigDocument::parse("Host web *.prod\n    HostName 10.0.0.1\n");
        let mut host = doc.hosts().remove(0);
        host.alias = "web-prod".into();
        assert!(doc.update_host("web", &host, None));
        assert_eq!(doc.render(), "Host web-prod *.prod\n    HostName 10.0.0.1\n");
        assert!(!doc.update_host("web", &host, None));
    }

    #[test]
    fn update_clears_removed_fields() {
        let (mut doc, _) =
            ConfigDocument::parse("Host a\n    HostName a.example\n    Port 2222\n    Port 2223\n");
        let mut host = doc.hosts().remove(0);
        host.port = None;
        doc.update_host("a", &host, None);
        assert_eq!(doc.render(), "Host a\n    HostName a.example\n");
    }

    #[test]
    fn remove_block() {
        let (mut doc, _) = ConfigDocument::parse("Host a\n    HostName a\n\nHost b\n    HostName b\n");
        assert!(doc.remove_host("a"));
        assert_eq!(doc.render(), "Host b\n    HostName b\n");
        assert!(!doc.remove_host("a"));
    }

    #[test]
    fn tilde_canonicalisation() {
        let home = home();
        assert_eq!(
            tilde_path("/home/alice/.ssh/id_rsa", Some(&home)),
            "~/.ssh/id_rsa"
        );
        assert_eq!(tilde_path("/home/alicex/key", Some(&home)), "/home/alicex/key");
        assert_eq!(tilde_path("/etc/ssh/key", Some(&home)), "/etc/ssh/key");
        assert_eq!(tilde_path("~/.ssh/k", Some(&home)), "~/.ssh/k");
        assert_eq!(tilde_path("/home/alice/.ssh/id_rsa", None), "/home/alice/.ssh/id_rsa");
    }

    #[test]
    fn identity_paths_are_written_tilde_prefixed() {
        let mut host = web();
        host.identity_files = vec![
            "/home/alice/.ssh/work key".into(),
            "/etc/keys/shared".into(),
        ];
        let mut doc = ConfigDocument::default();
        doc.append_host(&host, Some(&home()));
        let text = doc.render();
        assert!(text.contains("    IdentityFile \"~/.ssh/work key\"\n"));
        assert!(text.contains("    IdentityFile /etc/keys/shared\n"));

        let (reparsed, _) = ConfigDocument::parse(&text);
        assert_eq!(
            reparsed.hosts()[0].identity_files,
            vec!["~/.ssh/work key", "/etc/keys/shared"]
        );
    }

    #[test]
    fn known_hosts_list_keeps_quoted_entries() {
        let source = "Host web\n    HostName 10.0.0.1\n    UserKnownHostsFile \"~/my hosts\" ~/.ssh/known_hosts\n";
        let (mut doc, _) = ConfigDocument::parse(source);
        let mut host = doc.hosts().remove(0);
        assert_eq!(
            host.option(SshOption::UserKnownHostsFile),
            Some("\"~/my hosts\" ~/.ssh/known_hosts")
        );
        host.user = "deploy".into();
        assert!(doc.update_host("web", &host, Some(&home())));
        assert!(doc
            .render()
            .contains("    UserKnownHostsFile \"~/my hosts\" ~/.ssh/known_hosts\n"));

        host.options.set(
            SshOption::UserKnownHostsFile,
            "\"/home/alice/team hosts\" /etc/ssh/known",
        );
        assert!(doc.update_host("web", &host, Some(&home())));
        let text = doc.render();
        assert!(text.contains("    UserKnownHostsFile \"~/team hosts\" /etc/ssh/known\n"));
        let (reparsed, _) = ConfigDocument::parse(&text);
        assert_eq!(
            reparsed.hosts()[0].option(SshOption::UserKnownHostsFile),
            Some("\"~/team hosts\" /etc/ssh/known")
        );
    }

    #[test]
    fn forward_encoding() {
        assert_eq!(forward_to_config("8080:localhost:80"), "8080 localhost:80");
        assert_eq!(
            forward_to_config("127.0.0.1:8080:db:5432"),
            "127.0.0.1:8080 db:5432"
        );
        assert_eq!(forward_to_config("8080:[::1]:80"), "8080 [::1]:80");
        assert_eq!(forward_to_config("8080"), "8080");
    }
}
