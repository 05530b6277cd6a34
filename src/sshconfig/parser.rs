use tracing::warn;

use crate::host::{is_wildcard, Host, SshOption};

/// One physical line of the config file.
///
/// `raw` is the exact source text (without the newline) and is what gets
/// written back unless the writer replaces the line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub raw: String,
    pub kind: LineKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind {
    Blank,
    Comment,
    Entry { key: String, value: String },
}

impl Line {
    pub fn parse(raw: &str) -> Line {
        let trimmed = raw.trim();
        let kind = if trimmed.is_empty() {
            LineKind::Blank
        } else if trimmed.starts_with('#') {
            LineKind::Comment
        } else {
            let (key, value) = split_key_value(trimmed);
            LineKind::Entry {
                key: key.to_string(),
                value: value.to_string(),
            }
        };
        Line {
            raw: raw.to_string(),
            kind,
        }
    }

    pub fn blank() -> Line {
        Line {
            raw: String::new(),
            kind: LineKind::Blank,
        }
    }

    pub fn entry(indent: &str, key: &str, value: &str) -> Line {
        Line {
            raw: format!("{indent}{key} {value}"),
            kind: LineKind::Entry {
                key: key.to_string(),
                value: value.to_string(),
            },
        }
    }

    pub fn key(&self) -> Option<&str> {
        match &self.kind {
            LineKind::Entry { key, .. } => Some(key),
            _ => None,
        }
    }

    pub fn value(&self) -> Option<&str> {
        match &self.kind {
            LineKind::Entry { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn indent(&self) -> &str {
        let end = self.raw.len() - self.raw.trim_start().len();
        &self.raw[..end]
    }
}

/// Splits `Key value`, `Key=value` and `Key = value`.
fn split_key_value(line: &str) -> (&str, &str) {
    let end = line
        .find(|c: char| c.is_whitespace() || c == '=')
        .unwrap_or(line.len());
    let (key, rest) = line.split_at(end);
    let rest = rest.trim_start();
    let rest = rest.strip_prefix('=').unwrap_or(rest);
    (key, rest.trim())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Host,
    Match,
}

/// A `Host` or `Match` line and every line up to the next one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub kind: BlockKind,
    pub header: Line,
    pub patterns: Vec<String>,
    pub lines: Vec<Line>,
}

impl Block {
    /// The record alias, if the first pattern is concrete.
    pub fn alias(&self) -> Option<&str> {
        if self.kind != BlockKind::Host {
            return None;
        }
        self.patterns
            .first()
            .map(String::as_str)
            .filter(|p| !is_wildcard(p))
    }

    pub fn answers_to(&self, alias: &str) -> bool {
        self.kind == BlockKind::Host
            && self.alias().is_some()
            && self.patterns.iter().any(|p| p == alias)
    }

    /// Builds the record for this block, or `None` for Match and wildcard blocks.
    pub fn to_host(&self) -> Option<Host> {
        let alias = self.alias()?;
        let mut host = Host::new(alias);
        host.aliases = self.patterns[1..]
            .iter()
            .filter(|p| !is_wildcard(p))
            .cloned()
            .collect();

        for line in &self.lines {
            let (Some(key), Some(value)) = (line.key(), line.value()) else {
                continue;
            };
            if value.is_empty() {
                continue;
            }
            match key.to_ascii_lowercase().as_str() {
                "hostname" => {
                    if host.hostname.is_empty() {
                        host.hostname = value.to_string();
                    }
                }
                "user" => {
                    if host.user.is_empty() {
                        host.user = value.to_string();
                    }
                }
                "port" => {
                    if host.port.is_none() {
                        match value.parse::<u16>() {
                            Ok(port) if port > 0 => host.port = Some(port),
                            _ => warn!(alias, value, "ignoring invalid Port"),
                        }
                    }
                }
                "identityfile" => host.identity_files.push(unquote(value).to_string()),
                _ => {
                    let Some(opt) = SshOption::from_key(key) else {
                        continue;
                    };
                    let value = decode_value(opt, value);
                    if opt.is_multi() {
                        host.options.push(opt, value);
                    } else if !host.options.contains(opt) {
                        // first obtained value wins, as in the ssh client
                        host.options.set(opt, value);
                    }
                }
            }
        }
        Some(host)
    }
}

fn decode_value(opt: SshOption, value: &str) -> String {
    match opt {
        SshOption::LocalForward | SshOption::RemoteForward => forward_from_config(value),
        SshOption::UserKnownHostsFile => join_quoted(&split_quoted(value)),
        _ if opt.is_path() => unquote(value).to_string(),
        _ => value.to_string(),
    }
}

/// `8080 localhost:80` becomes `8080:localhost:80`; socket paths stay as is.
pub(crate) fn forward_from_config(value: &str) -> String {
    let mut parts = value.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(listen), Some(target), None) if !listen.contains('/') && !target.contains('/') => {
            format!("{listen}:{target}")
        }
        _ => value.to_string(),
    }
}

pub(crate) fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

/// Splits a whitespace-separated list, honouring double quotes.
pub(crate) fn split_quoted(value: &str) -> Vec<String> {
    let mut patterns = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in value.chars() {
        match c {
            '"' => quoted = !quoted,
            c if c.is_whitespace() && !quoted => {
                if !current.is_empty() {
                    patterns.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        patterns.push(current);
    }
    patterns
}

/// Inverse of [`split_quoted`]: entries with whitespace are double-quoted.
pub(crate) fn join_quoted(words: &[String]) -> String {
    words
        .iter()
        .map(|w| {
            if w.contains(char::is_whitespace) {
                format!("\"{w}\"")
            } else {
                w.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// A problem that made the decoder skip a block instead of failing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseWarning {
    pub line: usize,
    pub message: String,
}

/// The whole config file, kept line-for-line so untouched text round-trips.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigDocument {
    /// Lines before the first `Host` or `Match`.
    pub preamble: Vec<Line>,
    pub blocks: Vec<Block>,
    pub(crate) trailing_newline: bool,
}

impl ConfigDocument {
    pub fn parse(text: &str) -> (ConfigDocument, Vec<ParseWarning>) {
        let mut doc = ConfigDocument {
            trailing_newline: text.ends_with('\n'),
            ..Default::default()
        };
        let mut warnings = Vec::new();

        let body = text.strip_suffix('\n').unwrap_or(text);
        if text.is_empty() {
            return (doc, warnings);
        }

        for (index, raw) in body.split('\n').enumerate() {
            let line = Line::parse(raw);
            let header_kind = match line.key().map(str::to_ascii_lowercase).as_deref() {
                Some("host") => Some(BlockKind::Host),
                Some("match") => Some(BlockKind::Match),
                _ => None,
            };

            let Some(kind) = header_kind else {
                match doc.blocks.last_mut() {
                    Some(block) => block.lines.push(line),
                    None => doc.preamble.push(line),
                }
                continue;
            };

            let patterns = match kind {
                BlockKind::Host => split_quoted(line.value().unwrap_or_default()),
                BlockKind::Match => Vec::new(),
            };
            if kind == BlockKind::Host {
                if patterns.is_empty() {
                    let message = "Host line without patterns, block skipped".to_string();
                    warn!(line = index + 1, "{message}");
                    warnings.push(ParseWarning {
                        line: index + 1,
                        message,
                    });
                } else if is_wildcard(&patterns[0]) {
                    tracing::debug!(line = index + 1, pattern = %patterns[0], "wildcard block");
                }
            }
            doc.blocks.push(Block {
                kind,
                header: line,
                patterns,
                lines: Vec::new(),
            });
        }

        (doc, warnings)
    }

    /// Records in file order; Match and wildcard blocks produce none.
    pub fn hosts(&self) -> Vec<Host> {
        self.blocks.iter().filter_map(Block::to_host).collect()
    }

    pub fn find_block(&self, alias: &str) -> Option<usize> {
        self.blocks
            .iter()
            .position(|b| b.alias() == Some(alias))
    }

    pub fn render(&self) -> String {
        let lines: Vec<&str> = self
            .preamble
            .iter()
            .chain(
                self.blocks
                    .iter()
                    .flat_map(|b| std::iter::once(&b.header).chain(b.lines.iter())),
            )
            .map(|l| l.raw.as_str())
            .collect();

        let mut out = lines.join("\n");
        if self.trailing_newline && !lines.is_empty() {
            out.push('\n');
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.preamble.is_empty() && self.blocks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = "\
# global defaults
Host *
    ServerAliveInterval 60

Host web web-alt *.internal
    HostName 10.0.0.1
    user ubuntu
    Port 2222
    IdentityFile \"~/.ssh/my key\"
    IdentityFile ~/.ssh/id_ed25519
    LocalForward 8080 localhost:80
    # keep me
    XAuthLocation /opt/X11/bin/xauth

Match host db
    User postgres

Host db
    HostName=db.example.com
    ProxyJump bastion
    ProxyJump ignored
";

    #[test]
    fn parses_blocks_and_records() {
        let (doc, warnings) = ConfigDocument::parse(SAMPLE);
        assert!(warnings.is_empty());
        assert_eq!(doc.preamble.len(), 1);
        assert_eq!(doc.blocks.len(), 4);

        let hosts = doc.hosts();
        assert_eq!(hosts.len(), 2);

        let web = &hosts[0];
        assert_eq!(web.alias, "web");
        assert_eq!(web.aliases, vec!["web-alt".to_string()]);
        assert_eq!(web.hostname, "10.0.0.1");
        assert_eq!(web.user, "ubuntu");
        assert_eq!(web.port, Some(2222));
        assert_eq!(web.identity_files, vec!["~/.ssh/my key", "~/.ssh/id_ed25519"]);
        assert_eq!(
            web.options.values(SshOption::LocalForward),
            ["8080:localhost:80".to_string()]
        );

        let db = &hosts[1];
        assert_eq!(db.hostname, "db.example.com");
        assert_eq!(db.option(SshOption::ProxyJump), Some("bastion"));
    }

    #[test]
    fn render_is_byte_identical() {
        let (doc, _) = ConfigDocument::parse(SAMPLE);
        assert_eq!(doc.render(), SAMPLE);

        let no_newline = "Host a\n\tHostName a.example";
        let (doc, _) = ConfigDocument::parse(no_newline);
        assert_eq!(doc.render(), no_newline);

        let crlf = "Host a\r\n    HostName a.example\r\n";
        let (doc, _) = ConfigDocument::parse(crlf);
        assert_eq!(doc.render(), crlf);
        assert_eq!(doc.hosts()[0].hostname, "a.example");
    }

    #[test]
    fn empty_host_line_is_skipped_with_warning() {
        let (doc, warnings) = ConfigDocument::parse("Host\n    HostName x\nHost ok\n");
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].line, 1);
        assert_eq!(doc.hosts().len(), 1);
        assert_eq!(doc.render(), "Host\n    HostName x\nHost ok\n");
    }

    #[test]
    fn key_value_forms() {
        assert_eq!(split_key_value("Port 22"), ("Port", "22"));
        assert_eq!(split_key_value("Port=22"), ("Port", "22"));
        assert_eq!(split_key_value("Port = 22"), ("Port", "22"));
        assert_eq!(
            split_key_value("ProxyCommand ssh -W %h:%p jump"),
            ("ProxyCommand", "ssh -W %h:%p jump")
        );
    }

    #[test]
    fn socket_forwards_stay_verbatim() {
        assert_eq!(forward_from_config("8080 localhost:80"), "8080:localhost:80");
        assert_eq!(
            forward_from_config("/tmp/local.sock /var/run/remote.sock"),
            "/tmp/local.sock /var/run/remote.sock"
        );
    }
}
