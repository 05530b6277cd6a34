use std::{io, path::Path, path::PathBuf};

use crate::validate::FieldError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Coarse classification of every failure the registry can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Syntax,
    Validation,
    Conflict,
    NotFound,
    Permission,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to {action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("invalid host: {}", describe_fields(.0))]
    Validation(Vec<FieldError>),

    #[error("alias '{0}' already exists")]
    Conflict(String),

    #[error("host '{0}' not found")]
    NotFound(String),

    #[error("permission denied: {}", .0.display())]
    Permission(PathBuf),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io { .. } => ErrorKind::Io,
            Error::Syntax(_) => ErrorKind::Syntax,
            Error::Validation(_) => ErrorKind::Validation,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Permission(_) => ErrorKind::Permission,
        }
    }

    /// Wraps an I/O failure on `path`, splitting out permission problems.
    pub(crate) fn io(action: &'static str, path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::PermissionDenied {
            Error::Permission(path.to_path_buf())
        } else {
            Error::Io {
                action,
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

fn describe_fields(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::Field;

    #[test]
    fn permission_denied_is_classified() {
        let err = Error::io(
            "read",
            Path::new("/etc/shadow"),
            io::Error::from(io::ErrorKind::PermissionDenied),
        );
        assert_eq!(err.kind(), ErrorKind::Permission);

        let err = Error::io(
            "read",
            Path::new("/nope"),
            io::Error::from(io::ErrorKind::NotFound),
        );
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.to_string().contains("failed to read /nope"));
    }

    #[test]
    fn validation_message_lists_fields() {
        let err = Error::Validation(vec![
            FieldError::new(Field::Alias, "alias is required"),
            FieldError::new(Field::Port, "port must be between 1 and 65535"),
        ]);
        assert_eq!(
            err.to_string(),
            "invalid host: Alias: alias is required; Port: port must be between 1 and 65535"
        );
    }
}
