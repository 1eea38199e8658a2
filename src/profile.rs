//! Profile domain model.
//!
//! This module owns the validated, in-memory representation of a profile:
//! - The closed set of supported server types and their accepted auth methods
//! - Credential resolution (token wins over user/password)
//! - Profile name rules
//!
//! Conversion from the raw on-disk descriptor happens here so that a profile
//! which was tampered with on disk is rejected as corrupt on read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::storage::{Descriptor, StoredProfile};

/// Longest accepted profile name
pub const MAX_NAME_LEN: usize = 64;

/// Server kinds a profile can describe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileType {
    Jira,
    Polarion,
    Superset,
    Conaktiv,
    Stages,
}

/// How a profile authenticates against its server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMethod {
    Token,
    Basic,
}

impl ProfileType {
    /// Every supported type, in display order
    pub const ALL: [ProfileType; 5] = [
        ProfileType::Jira,
        ProfileType::Polarion,
        ProfileType::Superset,
        ProfileType::Conaktiv,
        ProfileType::Stages,
    ];

    /// Lowercase identifier used on disk and on the command line
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileType::Jira => "jira",
            ProfileType::Polarion => "polarion",
            ProfileType::Superset => "superset",
            ProfileType::Conaktiv => "conaktiv",
            ProfileType::Stages => "stages",
        }
    }

    /// Authentication methods the server type accepts
    pub fn auth_methods(&self) -> &'static [AuthMethod] {
        match self {
            ProfileType::Jira
            | ProfileType::Polarion
            | ProfileType::Superset
            | ProfileType::Conaktiv
            | ProfileType::Stages => &[AuthMethod::Token, AuthMethod::Basic],
        }
    }

    pub fn accepts(&self, method: AuthMethod) -> bool {
        self.auth_methods().contains(&method)
    }

    /// Comma-separated list of supported identifiers, for messages
    pub fn supported_list() -> String {
        Self::ALL
            .iter()
            .map(ProfileType::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for ProfileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProfileType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| Error::InvalidType(s.to_string()))
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::Token => f.write_str("token"),
            AuthMethod::Basic => f.write_str("user/password"),
        }
    }
}

/// Resolved authentication data of a profile
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Token(String),
    Basic { user: String, password: String },
}

impl Credentials {
    /// Pick the authentication method from loosely supplied fields.
    ///
    /// A token takes precedence; user and password are only used together.
    pub fn resolve(
        token: Option<String>,
        user: Option<String>,
        password: Option<String>,
    ) -> Option<Self> {
        match (token, user, password) {
            (Some(token), _, _) => Some(Credentials::Token(token)),
            (None, Some(user), Some(password)) => Some(Credentials::Basic { user, password }),
            _ => None,
        }
    }

    pub fn method(&self) -> AuthMethod {
        match self {
            Credentials::Token(_) => AuthMethod::Token,
            Credentials::Basic { .. } => AuthMethod::Basic,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Token(_) => f.debug_tuple("Token").field(&"<redacted>").finish(),
            Credentials::Basic { user, .. } => f
                .debug_struct("Basic")
                .field("user", user)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

/// A fully validated profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub name: String,
    pub profile_type: ProfileType,
    pub server: String,
    pub credentials: Credentials,
    pub certificate: Option<Vec<u8>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Secret-free view of a profile used by listings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileSummary {
    pub name: String,
    pub profile_type: ProfileType,
    pub server: String,
    pub auth: AuthMethod,
    pub has_certificate: bool,
}

impl Profile {
    pub fn token(&self) -> Option<&str> {
        match &self.credentials {
            Credentials::Token(token) => Some(token),
            Credentials::Basic { .. } => None,
        }
    }

    pub fn user(&self) -> Option<&str> {
        match &self.credentials {
            Credentials::Basic { user, .. } => Some(user),
            Credentials::Token(_) => None,
        }
    }

    pub fn password(&self) -> Option<&str> {
        match &self.credentials {
            Credentials::Basic { password, .. } => Some(password),
            Credentials::Token(_) => None,
        }
    }

    pub fn summary(&self) -> ProfileSummary {
        ProfileSummary {
            name: self.name.clone(),
            profile_type: self.profile_type,
            server: self.server.clone(),
            auth: self.credentials.method(),
            has_certificate: self.certificate.is_some(),
        }
    }

    /// Rebuild a profile from what storage returned, re-checking every invariant
    pub fn from_stored(name: &str, stored: StoredProfile) -> Result<Self> {
        let StoredProfile {
            descriptor,
            certificate,
        } = stored;

        let profile_type: ProfileType = descriptor
            .profile_type
            .parse()
            .map_err(|_| Error::corrupt(name, format!("unknown type '{}'", descriptor.profile_type)))?;

        let server = validate_server(&descriptor.server)
            .map_err(|_| Error::corrupt(name, "server URL is empty"))?;

        let credentials = Credentials::resolve(descriptor.token, descriptor.user, descriptor.password)
            .filter(|c| profile_type.accepts(c.method()))
            .ok_or_else(|| Error::corrupt(name, "no usable credentials"))?;

        if certificate.as_ref().is_some_and(|c| c.is_empty()) {
            return Err(Error::corrupt(name, "certificate file is empty"));
        }

        Ok(Self {
            name: name.to_string(),
            profile_type,
            server,
            credentials,
            certificate,
            created_at: descriptor.created_at,
            updated_at: descriptor.updated_at,
        })
    }

    /// Scalar fields in their on-disk shape
    pub fn descriptor(&self) -> Descriptor {
        let (token, user, password) = match &self.credentials {
            Credentials::Token(token) => (Some(token.clone()), None, None),
            Credentials::Basic { user, password } => (None, Some(user.clone()), Some(password.clone())),
        };
        Descriptor {
            profile_type: self.profile_type.as_str().to_string(),
            server: self.server.clone(),
            token,
            user,
            password,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Validate profile name
///
/// Only allows alphanumeric characters, underscores, and hyphens, so a name is
/// always a single path component and never collides with hidden journal entries.
pub fn validate_profile_name(name: &str) -> Result<()> {
    let invalid = |reason: &'static str| -> Result<()> {
        Err(Error::InvalidName {
            name: name.to_string(),
            reason,
        })
    };

    if name.is_empty() {
        return invalid("name cannot be empty");
    }

    if name.chars().count() > MAX_NAME_LEN {
        return invalid("name cannot be longer than 64 characters");
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return invalid("only alphanumeric characters, hyphens (-), and underscores (_) are allowed");
    }

    Ok(())
}

/// Trim the server URL and reject it when nothing is left
pub fn validate_server(server: &str) -> Result<String> {
    let trimmed = server.trim();
    if trimmed.is_empty() {
        return Err(Error::MissingServer);
    }
    Ok(trimmed.to_string())
}
