//! Core profile management logic.
//!
//! This module handles the "data model" side of profiles:
//! - Validating add/update requests before anything is written
//! - Merging partial updates with the stored profile and re-checking the result
//! - Reading profiles back and rejecting ones that were corrupted on disk
//! - Listing profiles without letting one bad entry hide the others
//!
//! All filesystem work is delegated to [`Storage`]; nothing is cached between
//! calls, every operation starts from what is on disk.

use chrono::Utc;
use log::{debug, warn};
use std::fmt;
use std::fs;
use std::path::PathBuf;

use crate::error::{Error, ErrorKind, Result};
use crate::paths::Paths;
use crate::profile::{
    Credentials, Profile, ProfileSummary, ProfileType, validate_profile_name, validate_server,
};
use crate::storage::{CertificateAction, Descriptor, Storage};

/// Change to apply to an optional field during an update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldChange<T> {
    /// Leave the stored value as it is
    Keep,
    /// Replace the stored value
    Set(T),
    /// Clear the stored value
    Unset,
}

impl<T> Default for FieldChange<T> {
    fn default() -> Self {
        FieldChange::Keep
    }
}

impl<T> FieldChange<T> {
    /// Build from a command-line style pair of "new value" and "clear" flags
    pub fn from_flags(value: Option<T>, unset: bool) -> Self {
        match (value, unset) {
            (Some(value), _) => FieldChange::Set(value),
            (None, true) => FieldChange::Unset,
            (None, false) => FieldChange::Keep,
        }
    }

    pub fn is_keep(&self) -> bool {
        matches!(self, FieldChange::Keep)
    }

    /// Resulting value given what is currently stored
    pub fn apply(self, current: Option<T>) -> Option<T> {
        match self {
            FieldChange::Keep => current,
            FieldChange::Set(value) => Some(value),
            FieldChange::Unset => None,
        }
    }
}

/// Where certificate content comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateSource {
    File(PathBuf),
    Bytes(Vec<u8>),
}

impl CertificateSource {
    /// Read the certificate content, rejecting unreadable or empty input
    pub fn load(self) -> Result<Vec<u8>> {
        let (origin, bytes) = match self {
            CertificateSource::File(path) => {
                let origin = format!("'{}'", path.display());
                match fs::read(&path) {
                    Ok(bytes) => (origin, bytes),
                    Err(e) => {
                        return Err(Error::CertificateRead {
                            origin,
                            reason: e.to_string(),
                        });
                    }
                }
            }
            CertificateSource::Bytes(bytes) => ("supplied content".to_string(), bytes),
        };

        if bytes.is_empty() {
            return Err(Error::CertificateRead {
                origin,
                reason: "certificate is empty".to_string(),
            });
        }
        Ok(bytes)
    }
}

/// Input for [`ProfileManager::add`]
#[derive(Clone, Default)]
pub struct NewProfile {
    pub name: String,
    pub profile_type: String,
    pub server: String,
    pub token: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub certificate: Option<CertificateSource>,
}

impl NewProfile {
    pub fn new(
        name: impl Into<String>,
        profile_type: impl Into<String>,
        server: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            profile_type: profile_type.into(),
            server: server.into(),
            ..Self::default()
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_basic(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_certificate(mut self, certificate: CertificateSource) -> Self {
        self.certificate = Some(certificate);
        self
    }
}

impl fmt::Debug for NewProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewProfile")
            .field("name", &self.name)
            .field("profile_type", &self.profile_type)
            .field("server", &self.server)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("certificate", &self.certificate.is_some())
            .finish()
    }
}

/// Input for [`ProfileManager::update`]; untouched fields keep their stored value
#[derive(Clone, Default)]
pub struct ProfileUpdate {
    pub profile_type: Option<String>,
    pub server: Option<String>,
    pub token: FieldChange<String>,
    pub user: FieldChange<String>,
    pub password: FieldChange<String>,
    pub certificate: FieldChange<CertificateSource>,
}

impl ProfileUpdate {
    /// True when applying the update would change nothing
    pub fn is_empty(&self) -> bool {
        self.profile_type.is_none()
            && self.server.is_none()
            && self.token.is_keep()
            && self.user.is_keep()
            && self.password.is_keep()
            && self.certificate.is_keep()
    }
}

/// One line of a profile listing
#[derive(Debug)]
pub enum ListEntry {
    Valid(ProfileSummary),
    /// Present on disk but unreadable
    Degraded { name: String, error: Error },
}

impl ListEntry {
    pub fn name(&self) -> &str {
        match self {
            ListEntry::Valid(summary) => &summary.name,
            ListEntry::Degraded { name, .. } => name,
        }
    }
}

/// Validating front door to the profile store
pub struct ProfileManager {
    storage: Storage,
}

impl ProfileManager {
    pub fn new(paths: Paths) -> Self {
        Self {
            storage: Storage::new(paths),
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn paths(&self) -> &Paths {
        self.storage.paths()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.storage.exists(name)
    }

    /// Create a new profile.
    ///
    /// Every field is validated and the certificate is read before storage is
    /// touched. Uniqueness is left to the storage layer, which checks it under
    /// the store lock.
    pub fn add(&self, request: NewProfile) -> Result<Profile> {
        let NewProfile {
            name,
            profile_type,
            server,
            token,
            user,
            password,
            certificate,
        } = request;

        validate_profile_name(&name)?;
        let profile_type: ProfileType = profile_type.parse()?;
        let server = validate_server(&server)?;
        let credentials = require_credentials(&name, profile_type, token, user, password)?;
        let certificate = certificate.map(CertificateSource::load).transpose()?;

        let now = Utc::now();
        let profile = Profile {
            name,
            profile_type,
            server,
            credentials,
            certificate,
            created_at: Some(now),
            updated_at: Some(now),
        };

        self.storage.create(
            &profile.name,
            &profile.descriptor(),
            profile.certificate.as_deref(),
        )?;
        Ok(profile)
    }

    /// Apply a partial update and return the resulting profile.
    ///
    /// The merged profile must still satisfy every invariant; if it does not,
    /// the stored profile is left untouched.
    pub fn update(&self, name: &str, changes: ProfileUpdate) -> Result<Profile> {
        validate_profile_name(name)?;

        let ProfileUpdate {
            profile_type,
            server,
            token,
            user,
            password,
            certificate,
        } = changes;

        let profile_type = profile_type
            .as_deref()
            .map(str::parse::<ProfileType>)
            .transpose()?;
        let server = server.as_deref().map(validate_server).transpose()?;
        let certificate = match certificate {
            FieldChange::Keep => CertificateAction::Keep,
            FieldChange::Set(source) => CertificateAction::Replace(source.load()?),
            FieldChange::Unset => CertificateAction::Remove,
        };

        let sets_basic =
            matches!(user, FieldChange::Set(_)) || matches!(password, FieldChange::Set(_));

        let stored = self.storage.update(name, certificate, |descriptor| {
            // Values not supplied by the caller come from disk; bad ones mean corruption
            let profile_type = match profile_type {
                Some(profile_type) => profile_type,
                None => descriptor.profile_type.parse().map_err(|_| {
                    Error::corrupt(name, format!("unknown type '{}'", descriptor.profile_type))
                })?,
            };
            let server = match server {
                Some(server) => server,
                None => validate_server(&descriptor.server)
                    .map_err(|_| Error::corrupt(name, "server URL is empty"))?,
            };
            descriptor.profile_type = profile_type.as_str().to_string();
            descriptor.server = server;

            let token = token.apply(descriptor.token.take());
            let user = user.apply(descriptor.user.take());
            let password = password.apply(descriptor.password.take());

            if sets_basic && token.is_some() {
                return Err(Error::ConflictingCredentials(name.to_string()));
            }
            let credentials = require_credentials(name, profile_type, token, user, password)?;

            *descriptor = Descriptor {
                updated_at: Some(Utc::now()),
                ..normalized(descriptor, credentials)
            };
            Ok(())
        })?;

        Profile::from_stored(name, stored)
    }

    /// Delete a profile
    pub fn remove(&self, name: &str) -> Result<()> {
        self.storage.remove(name)
    }

    /// Read and re-validate a single profile
    pub fn get(&self, name: &str) -> Result<Profile> {
        let stored = self.storage.read(name)?;
        Profile::from_stored(name, stored)
    }

    /// Summaries of all profiles, sorted by name; unreadable ones are degraded
    pub fn list(&self) -> Result<Vec<ListEntry>> {
        let mut entries = Vec::new();

        for name in self.storage.list()? {
            match self.get(&name) {
                Ok(profile) => entries.push(ListEntry::Valid(profile.summary())),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!("Profile '{}' disappeared while listing", name);
                }
                Err(error) => {
                    warn!("Profile '{}' could not be read: {}", name, error);
                    entries.push(ListEntry::Degraded { name, error });
                }
            }
        }

        Ok(entries)
    }
}

/// Resolve credentials and check them against the type's accepted methods
fn require_credentials(
    name: &str,
    profile_type: ProfileType,
    token: Option<String>,
    user: Option<String>,
    password: Option<String>,
) -> Result<Credentials> {
    if token.is_some() && (user.is_some() || password.is_some()) {
        warn!(
            "Profile '{}' has a token; user and password are not stored (unset the token to use them)",
            name
        );
    }

    Credentials::resolve(token, user, password)
        .filter(|credentials| profile_type.accepts(credentials.method()))
        .ok_or(Error::MissingCredentials { profile_type })
}

/// Descriptor carrying exactly the fields of the resolved credentials
fn normalized(descriptor: &Descriptor, credentials: Credentials) -> Descriptor {
    let (token, user, password) = match credentials {
        Credentials::Token(token) => (Some(token), None, None),
        Credentials::Basic { user, password } => (None, Some(user), Some(password)),
    };
    Descriptor {
        token,
        user,
        password,
        ..descriptor.clone()
    }
}
