//! Error types for profile storage and management

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::profile::ProfileType;

/// Result type alias for profmgr operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for profmgr library
#[derive(Error, Debug)]
pub enum Error {
    // -------------------------------------------------------------------------
    // Lookup Errors
    // -------------------------------------------------------------------------
    #[error("Profile '{0}' already exists")]
    AlreadyExists(String),

    #[error("Profile '{0}' does not exist")]
    NotFound(String),

    // -------------------------------------------------------------------------
    // Validation Errors
    // -------------------------------------------------------------------------
    #[error("Invalid profile name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("Unsupported profile type '{0}' (supported: {supported})", supported = ProfileType::supported_list())]
    InvalidType(String),

    #[error("A server URL is required")]
    MissingServer,

    #[error("Missing credentials for {profile_type} profile: provide a token, or both user and password")]
    MissingCredentials { profile_type: ProfileType },

    #[error("Profile '{0}' authenticates with a token; unset the token to store a user and password")]
    ConflictingCredentials(String),

    #[error("Failed to read certificate from {origin}: {reason}")]
    CertificateRead { origin: String, reason: String },

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Could not determine the user data directory; pass --profiles-dir or set {env}", env = crate::paths::PROFILES_DIR_ENV)]
    NoDataDir,

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("Profile '{name}' is corrupt: {reason}")]
    CorruptProfile { name: String, reason: String },

    #[error("Storage operation failed on '{}': {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Payload-free discriminant of [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    AlreadyExists,
    NotFound,
    InvalidName,
    InvalidType,
    MissingServer,
    MissingCredentials,
    ConflictingCredentials,
    CertificateRead,
    NoDataDir,
    CorruptProfile,
    Storage,
}

impl Error {
    /// Classify the error without inspecting its payload
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::InvalidName { .. } => ErrorKind::InvalidName,
            Error::InvalidType(_) => ErrorKind::InvalidType,
            Error::MissingServer => ErrorKind::MissingServer,
            Error::MissingCredentials { .. } => ErrorKind::MissingCredentials,
            Error::ConflictingCredentials(_) => ErrorKind::ConflictingCredentials,
            Error::CertificateRead { .. } => ErrorKind::CertificateRead,
            Error::NoDataDir => ErrorKind::NoDataDir,
            Error::CorruptProfile { .. } => ErrorKind::CorruptProfile,
            Error::Storage { .. } => ErrorKind::Storage,
        }
    }

    /// Check if the error was raised before anything touched the disk
    #[must_use]
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::InvalidName
                | ErrorKind::InvalidType
                | ErrorKind::MissingServer
                | ErrorKind::MissingCredentials
                | ErrorKind::ConflictingCredentials
                | ErrorKind::CertificateRead
        )
    }

    pub(crate) fn corrupt(name: &str, reason: impl Into<String>) -> Self {
        Error::CorruptProfile {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// Build a `map_err` adapter that wraps an I/O error with the path it concerns
pub(crate) fn storage_err(path: &Path) -> impl FnOnce(io::Error) -> Error + '_ {
    move |source| Error::Storage {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_variant() {
        assert_eq!(Error::NotFound("a".into()).kind(), ErrorKind::NotFound);
        assert_eq!(Error::AlreadyExists("a".into()).kind(), ErrorKind::AlreadyExists);
        assert_eq!(Error::corrupt("a", "bad").kind(), ErrorKind::CorruptProfile);
    }

    #[test]
    fn test_validation_errors() {
        assert!(Error::MissingServer.is_validation_error());
        assert!(Error::InvalidType("bogus".into()).is_validation_error());
        assert!(!Error::NotFound("a".into()).is_validation_error());
        assert!(!Error::corrupt("a", "bad").is_validation_error());
    }

    #[test]
    fn test_invalid_type_lists_supported_types() {
        let msg = Error::InvalidType("bogus".into()).to_string();
        assert!(msg.contains("bogus"));
        assert!(msg.contains("jira"));
        assert!(msg.contains("superset"));
    }

    #[test]
    fn test_no_data_dir_points_to_override() {
        let err = Error::NoDataDir;
        assert_eq!(err.kind(), ErrorKind::NoDataDir);
        assert!(err.to_string().contains("--profiles-dir"));
        assert!(err.to_string().contains(crate::paths::PROFILES_DIR_ENV));
    }

    #[test]
    fn test_conflicting_credentials_is_validation() {
        let err = Error::ConflictingCredentials("ci".into());
        assert_eq!(err.kind(), ErrorKind::ConflictingCredentials);
        assert!(err.is_validation_error());
        assert!(err.to_string().contains("unset the token"));
    }

    #[test]
    fn test_storage_error_keeps_source() {
        let err = storage_err(Path::new("/tmp/x"))(io::Error::other("disk full"));
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(err.to_string().contains("/tmp/x"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
