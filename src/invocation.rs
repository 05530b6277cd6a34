//! Turns a pasted `ssh ...` command line into a [`Host`].
//!
//! Input may span several lines joined with trailing backslashes, and may
//! carry a `# lazyssh-alias:<alias>[ tags:<csv>]` comment written by
//! [`crate::command::build_command`]. Other comment lines are dropped.

use tracing::{debug, warn};

use crate::alias::smart_alias;
use crate::error::{Error, Result};
use crate::host::{Host, SshOption};

pub const METADATA_PREFIX: &str = "lazyssh-alias:";

/// Flags that take no argument.
const SINGLE_FLAGS: &str = "46AaCfgkKMNnqsTtvxXY";
/// Flags that consume the following token (or the rest of their own).
const VALUE_FLAGS: &str = "pliBbJWLRDcmeFSOo";

/// Alias and tags recovered from a metadata comment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationMeta {
    pub alias: Option<String>,
    pub tags: Vec<String>,
}

/// Parses `input` into a host record.
pub fn parse_invocation(input: &str) -> Result<Host> {
    parse_with(input, smart_alias)
}

pub(crate) fn parse_with(input: &str, alias_for: fn(&str, &str, Option<u16>) -> String) -> Result<Host> {
    let (meta, line) = preprocess(input);
    let tokens = tokenize(&line)?;

    let mut tokens = tokens.into_iter();
    match tokens.next().as_deref() {
        Some("ssh") => {}
        _ => return Err(Error::Syntax("command must start with 'ssh'".into())),
    }
    let tokens: Vec<String> = tokens.collect();

    let dest_index = find_destination(&tokens)
        .ok_or_else(|| Error::Syntax("no destination host given".into()))?;

    let mut state = FlagState::default();
    let mut i = 0;
    while i < dest_index {
        i += state.apply(&tokens, i, false)?;
    }

    let mut remote = Vec::new();
    i = dest_index + 1;
    while i < tokens.len() {
        if !is_known_flag(&tokens[i]) {
            remote.extend(tokens[i..].iter().cloned());
            break;
        }
        i += state.apply(&tokens, i, true)?;
    }

    let dest = Destination::parse(&tokens[dest_index])?;
    let mut host = state.host;
    host.hostname = dest.host;
    if let Some(user) = dest.user {
        host.user = user;
    }
    if dest.port.is_some() {
        host.port = dest.port;
    }
    if !remote.is_empty() {
        host.options.set(SshOption::RemoteCommand, remote.join(" "));
    }

    host.alias = match meta.alias {
        Some(alias) => alias,
        None => alias_for(&host.user, &host.hostname, None),
    };
    host.tags = meta.tags;
    debug!(alias = %host.alias, host = %host.hostname, "invocation parsed");
    Ok(host)
}

/// Strips comments, remembers the metadata one, joins continuation lines.
pub fn preprocess(input: &str) -> (InvocationMeta, String) {
    let mut meta = InvocationMeta::default();
    let mut joined = String::new();

    for line in input.lines() {
        let trimmed = line.trim();
        if let Some(comment) = trimmed.strip_prefix('#') {
            if let Some(rest) = comment.trim_start().strip_prefix(METADATA_PREFIX) {
                meta = parse_meta(rest);
            }
            continue;
        }
        if trimmed.is_empty() {
            continue;
        }
        let piece = trimmed.strip_suffix('\\').unwrap_or(trimmed).trim_end();
        if !joined.is_empty() {
            joined.push(' ');
        }
        joined.push_str(piece);
    }
    (meta, joined)
}

/// The alias is the first word; tags run to the end of the line, so a tag
/// may contain spaces but not commas.
fn parse_meta(rest: &str) -> InvocationMeta {
    let rest = rest.trim_end();
    let (alias, tail) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    let alias = (!alias.is_empty()).then(|| alias.to_string());
    let tags = tail
        .split_once("tags:")
        .map(|(_, csv)| {
            csv.split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    InvocationMeta { alias, tags }
}

/// Shell-style split honouring single quotes, double quotes and backslashes.
pub fn tokenize(line: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => current.push(c),
                        None => return Err(Error::Syntax("unclosed single quote".into())),
                    }
                }
            }
            '"' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(c @ ('"' | '\\' | '$' | '`')) => current.push(c),
                            Some(c) => {
                                current.push('\\');
                                current.push(c);
                            }
                            None => return Err(Error::Syntax("unclosed double quote".into())),
                        },
                        Some(c) => current.push(c),
                        None => return Err(Error::Syntax("unclosed double quote".into())),
                    }
                }
            }
            '\\' => {
                in_token = true;
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            c if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                in_token = true;
                current.push(c);
            }
        }
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}

fn is_flag(token: &str) -> bool {
    token.len() > 1 && token.starts_with('-')
}

/// A flag token made only of known letters.
fn is_known_flag(token: &str) -> bool {
    if !is_flag(token) {
        return false;
    }
    for c in token[1..].chars() {
        if VALUE_FLAGS.contains(c) {
            return true;
        }
        if !SINGLE_FLAGS.contains(c) {
            return false;
        }
    }
    true
}

/// How many tokens the flag at `tokens[i]` spans.
fn flag_width(tokens: &[String], i: usize) -> usize {
    for (pos, c) in tokens[i].char_indices().skip(1) {
        if VALUE_FLAGS.contains(c) {
            let attached = pos + c.len_utf8() < tokens[i].len();
            return if attached { 1 } else { 2 };
        }
        if !SINGLE_FLAGS.contains(c) {
            return 1;
        }
    }
    1
}

fn find_destination(tokens: &[String]) -> Option<usize> {
    let mut i = 0;
    while i < tokens.len() {
        if !is_flag(&tokens[i]) {
            return Some(i);
        }
        i += flag_width(tokens, i);
    }
    None
}

#[derive(Debug, Default)]
struct FlagState {
    host: Host,
    verbosity: u8,
    quiet: bool,
    tty: u8,
    master: u8,
}

impl FlagState {
    /// Applies the flag at `tokens[i]`, returning how many tokens it used.
    fn apply(&mut self, tokens: &[String], i: usize, after_dest: bool) -> Result<usize> {
        let token = &tokens[i];
        if !is_flag(token) {
            return Ok(1);
        }
        for (pos, c) in token.char_indices().skip(1) {
            if VALUE_FLAGS.contains(c) {
                let rest = &token[pos + c.len_utf8()..];
                let (value, used) = if !rest.is_empty() {
                    (rest.to_string(), 1)
                } else {
                    let value = tokens
                        .get(i + 1)
                        .ok_or_else(|| Error::Syntax(format!("option -{c} needs a value")))?;
                    (value.clone(), 2)
                };
                self.value_flag(c, &value)?;
                return Ok(used);
            }
            if SINGLE_FLAGS.contains(c) {
                self.single_flag(c);
            } else {
                debug!(flag = %token, after_dest, "ignoring unknown ssh flag");
                return Ok(1);
            }
        }
        Ok(1)
    }

    fn single_flag(&mut self, c: char) {
        let opts = &mut self.host.options;
        match c {
            '4' => opts.set(SshOption::AddressFamily, "inet"),
            '6' => opts.set(SshOption::AddressFamily, "inet6"),
            'A' => opts.set(SshOption::ForwardAgent, "yes"),
            'a' => opts.set(SshOption::ForwardAgent, "no"),
            'C' => opts.set(SshOption::Compression, "yes"),
            'g' => opts.set(SshOption::GatewayPorts, "yes"),
            'M' => {
                self.master += 1;
                let mode = if self.master > 1 { "ask" } else { "yes" };
                opts.set(SshOption::ControlMaster, mode);
            }
            'N' => opts.set(SshOption::SessionType, "none"),
            's' => opts.set(SshOption::SessionType, "subsystem"),
            'n' => opts.set(SshOption::BatchMode, "yes"),
            'T' => {
                self.tty = 0;
                opts.set(SshOption::RequestTty, "no");
            }
            't' => {
                self.tty += 1;
                let mode = if self.tty > 1 { "force" } else { "yes" };
                opts.set(SshOption::RequestTty, mode);
            }
            'x' => opts.set(SshOption::ForwardX11, "no"),
            'X' => opts.set(SshOption::ForwardX11, "yes"),
            'Y' => {
                opts.set(SshOption::ForwardX11, "yes");
                opts.set(SshOption::ForwardX11Trusted, "yes");
            }
            'v' => {
                self.verbosity = (self.verbosity + 1).min(3);
                self.update_log_level();
            }
            'q' => {
                self.quiet = true;
                self.update_log_level();
            }
            // -f -k -K have no config equivalent.
            _ => {}
        }
    }

    fn update_log_level(&mut self) {
        let level = match self.verbosity {
            0 if self.quiet => "QUIET",
            0 => return,
            n => ["DEBUG1", "DEBUG2", "DEBUG3"][usize::from(n - 1)],
        };
        self.host.options.set(SshOption::LogLevel, level);
    }

    fn value_flag(&mut self, c: char, value: &str) -> Result<()> {
        let host = &mut self.host;
        match c {
            'p' => host.port = Some(parse_port(value)?),
            'l' => host.user = value.to_string(),
            'i' => host.identity_files.push(value.to_string()),
            'b' => host.options.set(SshOption::BindAddress, value),
            'B' => host.options.set(SshOption::BindInterface, value),
            'J' => host.options.set(SshOption::ProxyJump, value),
            'W' => host
                .options
                .set(SshOption::ProxyCommand, format!("ssh -W {value} %h:%p")),
            'L' => host.options.push(SshOption::LocalForward, value),
            'R' => host.options.push(SshOption::RemoteForward, value),
            'D' => host.options.push(SshOption::DynamicForward, value),
            'c' => host.options.set(SshOption::Ciphers, value),
            'm' => host.options.set(SshOption::Macs, value),
            'e' => host.options.set(SshOption::EscapeChar, value),
            'S' => host.options.set(SshOption::ControlPath, value),
            'o' => apply_option(host, value)?,
            // -F and -O do not describe the host.
            _ => debug!(flag = %c, value, "ignoring ssh flag"),
        }
        Ok(())
    }
}

fn parse_port(value: &str) -> Result<u16> {
    match value.parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(Error::Syntax(format!("invalid port '{value}'"))),
    }
}

/// Applies one `-o` argument, written `Key=value` or `Key value`.
fn apply_option(host: &mut Host, arg: &str) -> Result<()> {
    let arg = arg.trim();
    let split = arg.find(|c: char| c == '=' || c.is_whitespace());
    let Some(at) = split else {
        return Err(Error::Syntax(format!("option '{arg}' has no value")));
    };
    let key = &arg[..at];
    let value = arg[at + 1..].trim_start_matches(|c: char| c == '=' || c.is_whitespace());

    match key.to_ascii_lowercase().as_str() {
        "hostname" => host.hostname = value.to_string(),
        "user" => host.user = value.to_string(),
        "port" => host.port = Some(parse_port(value)?),
        "identityfile" => host.identity_files.push(value.to_string()),
        _ => match SshOption::from_key(key) {
            Some(opt) => host.options.push(opt, value),
            None => warn!(key, "unsupported -o option ignored"),
        },
    }
    Ok(())
}

/// `[user@]host` or `ssh://[user@]host[:port]`.
#[derive(Debug, PartialEq, Eq)]
struct Destination {
    user: Option<String>,
    host: String,
    port: Option<u16>,
}

impl Destination {
    fn parse(token: &str) -> Result<Destination> {
        let (rest, uri) = match token.strip_prefix("ssh://") {
            Some(rest) => (rest.trim_end_matches('/'), true),
            None => (token, false),
        };
        let (user, mut host) = match rest.rsplit_once('@') {
            Some((user, host)) => (Some(user.to_string()), host),
            None => (None, rest),
        };

        let mut port = None;
        if uri {
            if let Some(inner) = host.strip_prefix('[') {
                if let Some((addr, tail)) = inner.split_once(']') {
                    if let Some(p) = tail.strip_prefix(':') {
                        port = Some(parse_port(p)?);
                    }
                    host = addr;
                }
            } else if let Some((name, p)) = host.rsplit_once(':') {
                port = Some(parse_port(p)?);
                host = name;
            }
        }

        if host.is_empty() {
            return Err(Error::Syntax(format!("no host in '{token}'")));
        }
        Ok(Destination {
            user: user.filter(|u| !u.is_empty()),
            host: host.to_string(),
            port,
        })
    }
}
