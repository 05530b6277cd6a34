use std::net::IpAddr;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::host::SshOption;

static ALIAS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9._-]+$").unwrap());
static USER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9._-]*\$?$").unwrap());
static INTEGER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]+$").unwrap());
static INTERVAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?i)([0-9]+[smhdw]?)+$").unwrap());
static LABEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]([A-Za-z0-9_-]*[A-Za-z0-9_])?$").unwrap());

const FORBIDDEN_HOST_CHARS: &str = "@#$%^&*()=+[]{}|\\;:'\"<>,?/";

const IPQOS_VALUES: &[&str] = &[
    "af11", "af12", "af13", "af21", "af22", "af23", "af31", "af32", "af33", "af41", "af42",
    "af43", "cs0", "cs1", "cs2", "cs3", "cs4", "cs5", "cs6", "cs7", "ef", "le", "lowdelay",
    "throughput", "reliability", "none",
];

const YES_NO: &[&str] = &["yes", "no"];

/// One field's rule: required flag, optional shape, optional semantic check.
#[derive(Clone, Copy)]
pub struct Validator {
    pub required: bool,
    pub pattern: Option<&'static Lazy<Regex>>,
    pub check: Option<fn(&str) -> Result<(), String>>,
    pub message: &'static str,
}

impl Validator {
    const fn new(message: &'static str) -> Self {
        Validator {
            required: false,
            pattern: None,
            check: None,
            message,
        }
    }

    const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    const fn pattern(mut self, pattern: &'static Lazy<Regex>) -> Self {
        self.pattern = Some(pattern);
        self
    }

    const fn check(mut self, check: fn(&str) -> Result<(), String>) -> Self {
        self.check = Some(check);
        self
    }

    pub fn validate(&self, value: &str) -> Result<(), String> {
        let value = value.trim();
        if value.is_empty() {
            return if self.required {
                Err(self.message.to_string())
            } else {
                Ok(())
            };
        }
        if let Some(pattern) = self.pattern {
            if !pattern.is_match(value) {
                return Err(self.message.to_string());
            }
        }
        match self.check {
            Some(check) => check(value),
            None => Ok(()),
        }
    }
}

pub fn alias() -> Validator {
    Validator::new("alias may only contain letters, digits, '.', '_' and '-'")
        .required()
        .pattern(&ALIAS_RE)
}

pub fn hostname() -> Validator {
    Validator::new("host must be an IP address or a valid hostname")
        .required()
        .check(check_hostname)
}

pub fn port() -> Validator {
    Validator::new("port must be between 1 and 65535").check(check_port)
}

pub fn user() -> Validator {
    Validator::new("user must start with a letter and use only letters, digits, '.', '_' or '-'")
        .pattern(&USER_RE)
}

fn count() -> Validator {
    Validator::new("must be a non-negative integer").pattern(&INTEGER_RE)
}

fn timeout() -> Validator {
    Validator::new("must be a non-negative integer or 'none'").check(check_timeout)
}

fn interval() -> Validator {
    Validator::new("must be yes, no or a time interval such as 10m").check(check_persist)
}

fn ipqos() -> Validator {
    Validator::new(
        "must be one or two of af11..af43, cs0..cs7, ef, le, lowdelay, throughput, reliability, none",
    )
    .check(check_ipqos)
}

fn forward() -> Validator {
    Validator::new("must look like [bind:]port:host:hostport").check(check_forward)
}

fn dynamic_forward() -> Validator {
    Validator::new("must look like [bind:]port").check(check_dynamic_forward)
}

fn escape_char() -> Validator {
    Validator::new("must be a single character, ^X or none").check(check_escape_char)
}

/// Free-form checks for an option; closed value sets are handled by
/// [`validate_option`].
pub fn option_validator(opt: SshOption) -> Option<Validator> {
    use SshOption::*;
    let validator = match opt {
        ConnectTimeout => timeout(),
        ConnectionAttempts | ServerAliveInterval | ServerAliveCountMax
        | NumberOfPasswordPrompts | CanonicalizeMaxDots => count(),
        ControlPersist => interval(),
        IpQos => ipqos(),
        LocalForward | RemoteForward => forward(),
        DynamicForward => dynamic_forward(),
        EscapeChar => escape_char(),
        BindAddress => Validator::new("must be an IP address or hostname").check(check_hostname),
        _ => return None,
    };
    Some(validator)
}

/// Closed value sets for the enum-like options, lowercase.
pub fn allowed_values(opt: SshOption) -> Option<&'static [&'static str]> {
    use SshOption::*;
    let values: &'static [&'static str] = match opt {
        Compression | ForwardAgent | ForwardX11 | ForwardX11Trusted | BatchMode | TcpKeepAlive
        | PasswordAuthentication | KbdInteractiveAuthentication | IdentitiesOnly
        | CheckHostIp | ExitOnForwardFailure | ClearAllForwardings | GatewayPorts
        | HashKnownHosts | PermitLocalCommand | VisualHostKey => YES_NO,
        CanonicalizeFallbackLocal => YES_NO,
        PubkeyAuthentication => &["yes", "no", "unbound", "host-bound"],
        StrictHostKeyChecking => &["yes", "no", "ask", "accept-new", "off"],
        RequestTty => &["yes", "no", "force", "auto"],
        SessionType => &["none", "subsystem", "default"],
        ControlMaster => &["yes", "no", "ask", "auto", "autoask"],
        AddressFamily => &["any", "inet", "inet6"],
        LogLevel => &[
            "quiet", "fatal", "error", "info", "verbose", "debug", "debug1", "debug2", "debug3",
        ],
        FingerprintHash => &["md5", "sha256"],
        VerifyHostKeyDns | UpdateHostKeys => &["yes", "no", "ask"],
        AddKeysToAgent => &["yes", "no", "ask", "confirm"],
        CanonicalizeHostname => &["yes", "no", "always", "none"],
        _ => return None,
    };
    Some(values)
}

/// Validates `value` for `opt`, including closed value sets.
pub fn validate_option(opt: SshOption, value: &str) -> Result<(), String> {
    if let Some(values) = allowed_values(opt) {
        return check_enum(opt, values, value);
    }
    match option_validator(opt) {
        Some(validator) => validator.validate(value),
        None => Ok(()),
    }
}

fn check_enum(opt: SshOption, values: &[&str], value: &str) -> Result<(), String> {
    let value = value.trim();
    let lower = value.to_ascii_lowercase();
    if values.contains(&lower.as_str()) {
        return Ok(());
    }
    match opt {
        // agent sockets may be given as a path or an environment variable
        SshOption::ForwardAgent if value.starts_with('/') || value.starts_with('$') => Ok(()),
        // AddKeysToAgent also takes a lifetime, optionally after confirm
        SshOption::AddKeysToAgent
            if lower
                .strip_prefix("confirm")
                .map(str::trim)
                .is_some_and(|rest| rest.is_empty() || INTERVAL_RE.is_match(rest))
                || INTERVAL_RE.is_match(&lower) =>
        {
            Ok(())
        }
        _ => Err(format!("must be one of: {}", values.join(", "))),
    }
}

pub fn check_port(value: &str) -> Result<(), String> {
    match value.parse::<u32>() {
        Ok(port) if (1..=65535).contains(&port) => Ok(()),
        _ => Err("port must be between 1 and 65535".to_string()),
    }
}

fn check_timeout(value: &str) -> Result<(), String> {
    if value.eq_ignore_ascii_case("none") || INTEGER_RE.is_match(value) {
        Ok(())
    } else {
        Err("must be a non-negative integer or 'none'".to_string())
    }
}

fn check_persist(value: &str) -> Result<(), String> {
    let lower = value.to_ascii_lowercase();
    if YES_NO.contains(&lower.as_str()) || INTERVAL_RE.is_match(&lower) {
        Ok(())
    } else {
        Err("must be yes, no or a time interval such as 10m".to_string())
    }
}

pub fn check_hostname(value: &str) -> Result<(), String> {
    let literal = value
        .strip_prefix('[')
        .and_then(|v| v.strip_suffix(']'))
        .unwrap_or(value);
    if literal.parse::<IpAddr>().is_ok() {
        return Ok(());
    }
    if let Some(c) = value.chars().find(|c| FORBIDDEN_HOST_CHARS.contains(*c)) {
        return Err(format!("host contains invalid character '{c}'"));
    }
    if value.chars().any(char::is_whitespace) {
        return Err("host must not contain whitespace".to_string());
    }
    if value.len() > 253 {
        return Err("host must be at most 253 characters".to_string());
    }
    if value.starts_with('.') || value.ends_with('.') {
        return Err("host must not start or end with '.'".to_string());
    }
    if value.starts_with('-') || value.ends_with('-') {
        return Err("host must not start or end with '-'".to_string());
    }
    if value.contains("..") {
        return Err("host must not contain consecutive dots".to_string());
    }
    for label in value.split('.') {
        if label.len() > 63 {
            return Err(format!("host label '{label}' is longer than 63 characters"));
        }
        if !LABEL_RE.is_match(label) {
            return Err(format!("host label '{label}' is invalid"));
        }
    }
    Ok(())
}

fn check_ipqos(value: &str) -> Result<(), String> {
    let parts: Vec<&str> = value.split_whitespace().collect();
    if parts.is_empty() || parts.len() > 2 {
        return Err("IPQoS takes one or two values".to_string());
    }
    for part in parts {
        if !IPQOS_VALUES.contains(&part.to_ascii_lowercase().as_str()) && !INTEGER_RE.is_match(part)
        {
            return Err(format!("unknown IPQoS value '{part}'"));
        }
    }
    Ok(())
}

/// Splits `a:b:[::1]:c` on colons outside brackets.
fn split_colons(value: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0;
    let mut start = 0;
    for (i, c) in value.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth -= 1,
            ':' if depth == 0 => {
                parts.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&value[start..]);
    parts
}

fn check_bind(bind: &str) -> Result<(), String> {
    if bind.is_empty() || bind == "*" || bind.eq_ignore_ascii_case("localhost") {
        return Ok(());
    }
    check_hostname(bind).map_err(|_| format!("invalid bind address '{bind}'"))
}

fn check_forward(value: &str) -> Result<(), String> {
    // config form `port host:hostport` and socket paths are accepted as well
    let mut words = value.split_whitespace();
    let value = match (words.next(), words.next(), words.next()) {
        (Some(a), Some(b), None) if a.contains('/') || b.contains('/') => return Ok(()),
        (Some(a), Some(b), None) => format!("{a}:{b}"),
        (Some(a), None, None) => a.to_string(),
        _ => return Err("must look like [bind:]port:host:hostport".to_string()),
    };

    let parts = split_colons(&value);
    let (bind, port, host, host_port) = match parts.as_slice() {
        [port, host, host_port] => ("", *port, *host, *host_port),
        [bind, port, host, host_port] => (*bind, *port, *host, *host_port),
        _ => return Err("must look like [bind:]port:host:hostport".to_string()),
    };
    check_bind(bind.trim_start_matches('[').trim_end_matches(']'))?;
    check_port(port).map_err(|_| format!("invalid listen port '{port}'"))?;
    if host.is_empty() {
        return Err("missing target host".to_string());
    }
    check_hostname(host).map_err(|_| format!("invalid target host '{host}'"))?;
    check_port(host_port).map_err(|_| format!("invalid target port '{host_port}'"))
}

fn check_dynamic_forward(value: &str) -> Result<(), String> {
    let parts = split_colons(value);
    let (bind, port) = match parts.as_slice() {
        [port] => ("", *port),
        [bind, port] => (*bind, *port),
        _ => return Err("must look like [bind:]port".to_string()),
    };
    check_bind(bind.trim_start_matches('[').trim_end_matches(']'))?;
    check_port(port).map_err(|_| format!("invalid port '{port}'"))
}

fn check_escape_char(value: &str) -> Result<(), String> {
    if value.eq_ignore_ascii_case("none") {
        return Ok(());
    }
    let bytes = value.as_bytes();
    match bytes {
        [b] if b.is_ascii_graphic() => Ok(()),
        [b'^', b] if b.is_ascii_alphabetic() => Ok(()),
        _ => Err("must be a single character, ^X or none".to_string()),
    }
}
