//! Field validation for host records.
//!
//! Every check reports a message keyed by [`Field`]; a [`ValidationState`]
//! collects them and hands them back in display order (the declaration order
//! of `Field`, options in write order).

mod paths;
mod rules;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

pub use paths::{check_key_paths, check_known_hosts, check_readable, expand_tilde, PathError, PathProblem};
pub use rules::{allowed_values, check_hostname, check_port, validate_option, Validator};

use crate::error::{Error, Result};
use crate::fs::FileSystem;
use crate::host::{Host, SshOption};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    Alias,
    Aliases,
    HostName,
    User,
    Port,
    IdentityFile,
    Option(SshOption),
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Alias => f.write_str("Alias"),
            Field::Aliases => f.write_str("Aliases"),
            Field::HostName => f.write_str("HostName"),
            Field::User => f.write_str("User"),
            Field::Port => f.write_str("Port"),
            Field::IdentityFile => f.write_str("IdentityFile"),
            Field::Option(opt) => f.write_str(opt.name()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: Field,
    pub message: String,
}

impl FieldError {
    pub fn new(field: Field, message: impl Into<String>) -> Self {
        FieldError {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Error collector shared between the form and background probes.
#[derive(Debug, Default)]
pub struct ValidationState {
    errors: RwLock<BTreeMap<Field, String>>,
}

impl ValidationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `result` for `field`, replacing or clearing any earlier error.
    pub fn record(&self, field: Field, result: Result<(), String>) {
        let mut errors = self.errors.write().unwrap_or_else(PoisonError::into_inner);
        match result {
            Ok(()) => {
                errors.remove(&field);
            }
            Err(message) => {
                errors.insert(field, message);
            }
        }
    }

    pub fn set_error(&self, field: Field, message: impl Into<String>) {
        self.record(field, Err(message.into()));
    }

    pub fn clear(&self, field: Field) {
        self.record(field, Ok(()));
    }

    pub fn reset(&self) {
        self.errors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn error(&self, field: Field) -> Option<String> {
        self.errors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&field)
            .cloned()
    }

    pub fn has_errors(&self) -> bool {
        !self
            .errors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// Errors in display order.
    pub fn errors(&self) -> Vec<FieldError> {
        self.errors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(field, message)| FieldError::new(*field, message.clone()))
            .collect()
    }

    pub fn into_result(self) -> Result<()> {
        let errors = self.errors();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(errors))
        }
    }
}

/// Syntactic and semantic checks for every field of `host`.
///
/// File existence is not checked here; see [`check_host_paths`].
pub fn validate_host(host: &Host) -> ValidationState {
    let state = ValidationState::new();

    state.record(Field::Alias, rules::alias().validate(&host.alias));
    for alias in &host.aliases {
        if let Err(message) = rules::alias().validate(alias) {
            state.set_error(Field::Aliases, format!("'{alias}': {message}"));
            break;
        }
    }
    state.record(Field::HostName, rules::hostname().validate(&host.hostname));
    state.record(Field::User, rules::user().validate(&host.user));
    if let Some(port) = host.port {
        state.record(Field::Port, rules::port().validate(&port.to_string()));
    }
    if host.identity_files.iter().any(|p| p.trim().is_empty()) {
        state.set_error(Field::IdentityFile, "identity file path is empty");
    }

    for (opt, values) in host.options.iter() {
        for value in values {
            if let Err(message) = validate_option(opt, value) {
                state.set_error(Field::Option(opt), format!("'{value}': {message}"));
                break;
            }
        }
    }
    state
}

/// Rejects `alias` when another host already answers to it.
///
/// `original` is the alias being edited, which may keep its own name.
pub fn check_alias_unique(alias: &str, original: Option<&str>, hosts: &[Host]) -> Result<(), String> {
    let taken = hosts
        .iter()
        .filter(|h| Some(h.alias.as_str()) != original)
        .any(|h| h.answers_to(alias));
    if taken {
        Err(format!("alias '{alias}' already exists"))
    } else {
        Ok(())
    }
}

/// Existence and readability of identity and known-hosts files.
pub fn check_host_paths(fs: &dyn FileSystem, host: &Host, home: Option<&Path>) -> ValidationState {
    let state = ValidationState::new();
    let describe = |errors: Vec<PathError>| {
        errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    };

    let key_errors = check_key_paths(fs, &host.identity_files, home);
    if !key_errors.is_empty() {
        state.set_error(Field::IdentityFile, describe(key_errors));
    }
    if let Some(known_hosts) = host.option(SshOption::UserKnownHostsFile) {
        let errors = check_known_hosts(fs, known_hosts, home);
        if !errors.is_empty() {
            state.set_error(Field::Option(SshOption::UserKnownHostsFile), describe(errors));
        }
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFs;
    use std::sync::Arc;
    use std::thread;

    fn valid_host() -> Host {
        let mut host = Host::new("web");
        host.hostname = "10.0.0.1".into();
        host.user = "ubuntu".into();
        host.port = Some(2222);
        host
    }

    #[test]
    fn valid_host_passes() {
        let mut host = valid_host();
        host.options.set(SshOption::StrictHostKeyChecking, "no");
        host.options.push(SshOption::LocalForward, "8080:localhost:80");
        assert!(validate_host(&host).into_result().is_ok());
    }

    #[test]
    fn errors_come_back_in_display_order() {
        let mut host = Host::new("bad alias");
        host.port = Some(0);
        host.user = "9lives".into();
        host.options.set(SshOption::Compression, "maybe");
        host.options.set(SshOption::IpQos, "warp");

        let fields: Vec<Field> = validate_host(&host).errors().iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec![
                Field::Alias,
                Field::HostName,
                Field::User,
                Field::Port,
                Field::Option(SshOption::IpQos),
                Field::Option(SshOption::Compression),
            ]
        );

        let err = validate_host(&host).into_result().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Validation);
    }

    #[test]
    fn record_replaces_and_clears() {
        let state = ValidationState::new();
        state.set_error(Field::Port, "bad");
        state.set_error(Field::Port, "worse");
        assert_eq!(state.error(Field::Port).as_deref(), Some("worse"));
        state.clear(Field::Port);
        assert!(!state.has_errors());
    }

    #[test]
    fn state_is_shared_across_threads() {
        let state = Arc::new(ValidationState::new());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let state = state.clone();
                thread::spawn(move || state.set_error(Field::Option(SshOption::ALL[i]), "x"))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(state.errors().len(), 4);
    }

    #[test]
    fn alias_uniqueness_respects_edit_context() {
        let mut other = Host::new("db");
        other.aliases = vec!["db-primary".into()];
        let hosts = vec![valid_host(), other];

        assert!(check_alias_unique("web", None, &hosts).is_err());
        assert!(check_alias_unique("web", Some("web"), &hosts).is_ok());
        assert!(check_alias_unique("db-primary", Some("web"), &hosts).is_err());
        assert!(check_alias_unique("cache", None, &hosts).is_ok());
    }

    #[test]
    fn host_paths() {
        let fs = Arc::new(MemoryFs::new());
        fs.insert("/home/u/.ssh/id_ed25519", "KEY", 0o600);
        let mut host = valid_host();
        host.identity_files = vec!["~/.ssh/id_ed25519".into(), "~/.ssh/nope".into()];
        host.options
            .set(SshOption::UserKnownHostsFile, "~/.ssh/known_hosts");

        let state = check_host_paths(fs.as_ref(), &host, Some(Path::new("/home/u")));
        assert_eq!(
            state.error(Field::IdentityFile).as_deref(),
            Some("~/.ssh/nope: not found")
        );
        assert!(state
            .error(Field::Option(SshOption::UserKnownHostsFile))
            .is_some());
    }
}
