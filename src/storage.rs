//! Storage backend for profile directories.
//!
//! Each profile lives in `<root>/<name>/` as a JSON descriptor plus an optional
//! certificate file. The directory itself is the unit of atomicity: new content
//! is assembled in a hidden staging directory and moved into place with a single
//! rename, so a profile directory that is visible under its own name is always
//! complete.
//!
//! Hidden entries in the root act as a small journal:
//! - `.staging.<name>`: content being prepared, discarded on recovery
//! - `.replaced.<name>`: previous version detached by an update, restored if
//!   the new version never landed
//! - `.removed.<name>`: detached by a remove, deleted on recovery
//!
//! Mutations hold the store lock and replay the journal before doing any work.
//! Readers hold the same lock shared, so they never see a swap half done.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result, storage_err};
use crate::fs_utils::{
    create_private_dir, read_optional, remove_dir_if_exists, sync_dir, write_private,
};
use crate::lock::StoreLock;
use crate::paths::Paths;
use crate::profile::validate_profile_name;

/// Descriptor file inside a profile directory
pub const DESCRIPTOR_FILE: &str = ".data.json";
/// Certificate file inside a profile directory
pub const CERTIFICATE_FILE: &str = ".cert.crt";

const STAGING_PREFIX: &str = ".staging.";
const REPLACED_PREFIX: &str = ".replaced.";
const REMOVED_PREFIX: &str = ".removed.";

/// Scalar fields of a profile as stored in the descriptor file
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    #[serde(rename = "type")]
    pub profile_type: String,
    pub server: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Descriptor {
    /// Parse descriptor bytes; unknown keys are ignored
    pub fn parse(name: &str, bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::corrupt(name, format!("invalid {DESCRIPTOR_FILE}: {e}")))
    }

    fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("Descriptor")
            .field("profile_type", &self.profile_type)
            .field("server", &self.server)
            .field("token", &redact(&self.token))
            .field("user", &self.user)
            .field("password", &redact(&self.password))
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

/// Everything read back from a profile directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredProfile {
    pub descriptor: Descriptor,
    pub certificate: Option<Vec<u8>>,
}

/// What an update does with the certificate file
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CertificateAction {
    #[default]
    Keep,
    Replace(Vec<u8>),
    Remove,
}

/// Kind of an interrupted operation left in the root
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalKind {
    Staging,
    Replaced,
    Removed,
}

const JOURNAL_PREFIXES: [(&str, JournalKind); 3] = [
    (STAGING_PREFIX, JournalKind::Staging),
    (REPLACED_PREFIX, JournalKind::Replaced),
    (REMOVED_PREFIX, JournalKind::Removed),
];

/// Classification of a single entry of the profiles root
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootEntry {
    /// A directory with a descriptor under a valid profile name
    Profile { name: String, path: PathBuf },
    /// Leftover of an interrupted mutation
    Journal {
        kind: JournalKind,
        name: String,
        path: PathBuf,
    },
    /// Anything else; ignored by listings
    Stray(PathBuf),
}

impl RootEntry {
    pub fn path(&self) -> &Path {
        match self {
            RootEntry::Profile { path, .. } | RootEntry::Journal { path, .. } => path,
            RootEntry::Stray(path) => path,
        }
    }
}

/// Outcome of replaying the journal
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Profiles restored to their previous version
    pub rolled_back: Vec<String>,
    /// Journal entries deleted
    pub discarded: Vec<PathBuf>,
}

impl RecoveryReport {
    pub fn is_empty(&self) -> bool {
        self.rolled_back.is_empty() && self.discarded.is_empty()
    }
}

/// Step of a mutation at which tests can inject a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Checkpoint {
    /// Descriptor written to staging, certificate not yet
    DescriptorWritten,
    /// Staging complete, nothing renamed yet
    Staged,
    /// Update only: live version detached, new one not yet in place
    Detached,
}

/// Filesystem-backed profile store
pub struct Storage {
    paths: Paths,
    #[cfg(test)]
    fail_at: std::cell::Cell<Option<Checkpoint>>,
}

impl Storage {
    pub fn new(paths: Paths) -> Self {
        Self {
            paths,
            #[cfg(test)]
            fail_at: std::cell::Cell::new(None),
        }
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    /// True iff `name` resolves to a directory holding a descriptor
    pub fn exists(&self, name: &str) -> bool {
        let Ok(_lock) = self.read_lock() else {
            return false;
        };
        matches!(self.locate(name), Ok(Some(_)))
    }

    /// Create a new profile directory; fails if anything already uses the name
    pub fn create(
        &self,
        name: &str,
        descriptor: &Descriptor,
        certificate: Option<&[u8]>,
    ) -> Result<()> {
        let live = self.live_dir(name)?;
        reject_empty_certificate(certificate)?;
        self.paths.ensure_dirs()?;
        let _lock = StoreLock::acquire(&self.paths.lock_file)?;
        self.recover_locked()?;

        if fs::symlink_metadata(&live).is_ok() {
            return Err(Error::AlreadyExists(name.to_string()));
        }

        let staging = self.stage(name, descriptor, certificate)?;
        if let Err(source) = fs::rename(&staging, &live) {
            self.discard(&staging);
            return Err(match source.kind() {
                io::ErrorKind::AlreadyExists | io::ErrorKind::DirectoryNotEmpty => {
                    Error::AlreadyExists(name.to_string())
                }
                _ => Error::Storage { path: live, source },
            });
        }
        self.sync_root();

        info!("Created profile '{}'", name);
        Ok(())
    }

    /// Read a profile's descriptor and certificate
    pub fn read(&self, name: &str) -> Result<StoredProfile> {
        self.live_dir(name)?;
        let _lock = self.read_lock()?;
        let dir = self
            .locate(name)?
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        read_profile_dir(name, &dir)
    }

    /// Rewrite a profile.
    ///
    /// `apply` receives the current descriptor and edits it in place; returning an
    /// error aborts the update before anything is written. The new version is
    /// swapped in with two renames, and any failure before the second one puts the
    /// previous version back.
    pub fn update<F>(
        &self,
        name: &str,
        certificate: CertificateAction,
        apply: F,
    ) -> Result<StoredProfile>
    where
        F: FnOnce(&mut Descriptor) -> Result<()>,
    {
        let live = self.live_dir(name)?;
        if let CertificateAction::Replace(bytes) = &certificate {
            reject_empty_certificate(Some(bytes))?;
        }
        if !self.paths.profiles_dir.is_dir() {
            return Err(Error::NotFound(name.to_string()));
        }
        let _lock = StoreLock::acquire(&self.paths.lock_file)?;
        self.recover_locked()?;

        if !has_descriptor(&live) {
            return Err(Error::NotFound(name.to_string()));
        }
        let current = read_profile_dir(name, &live)?;

        let mut descriptor = current.descriptor;
        apply(&mut descriptor)?;
        let certificate = match certificate {
            CertificateAction::Keep => current.certificate,
            CertificateAction::Replace(bytes) => Some(bytes),
            CertificateAction::Remove => None,
        };

        let staging = self.stage(name, &descriptor, certificate.as_deref())?;
        let replaced = self.journal_dir(REPLACED_PREFIX, name);

        if let Err(source) = fs::rename(&live, &replaced) {
            self.discard(&staging);
            return Err(storage_err(&live)(source));
        }
        debug!("Detached '{}' to {}", name, replaced.display());

        let swapped = self
            .checkpoint(Checkpoint::Detached)
            .and_then(|()| fs::rename(&staging, &live));
        if let Err(source) = swapped {
            if let Err(e) = fs::rename(&replaced, &live) {
                warn!(
                    "Failed to restore '{}' from {}: {} (will be restored by the next operation)",
                    name,
                    replaced.display(),
                    e
                );
            }
            self.discard(&staging);
            return Err(storage_err(&live)(source));
        }
        self.sync_root();
        self.discard(&replaced);

        info!("Updated profile '{}'", name);
        Ok(StoredProfile {
            descriptor,
            certificate,
        })
    }

    /// Delete a profile directory and everything in it
    pub fn remove(&self, name: &str) -> Result<()> {
        let live = self.live_dir(name)?;
        if !self.paths.profiles_dir.is_dir() {
            return Err(Error::NotFound(name.to_string()));
        }
        let _lock = StoreLock::acquire(&self.paths.lock_file)?;
        self.recover_locked()?;

        if !has_descriptor(&live) {
            return Err(Error::NotFound(name.to_string()));
        }

        // The rename is the commit point; what follows is cleanup.
        let removed = self.journal_dir(REMOVED_PREFIX, name);
        fs::rename(&live, &removed).map_err(storage_err(&live))?;
        self.sync_root();
        self.discard(&removed);

        info!("Removed profile '{}'", name);
        Ok(())
    }

    /// Names of all readable profiles, sorted lexicographically
    pub fn list(&self) -> Result<Vec<String>> {
        let _lock = self.read_lock()?;
        let mut names = BTreeSet::new();
        for entry in self.scan()? {
            match entry {
                RootEntry::Profile { name, .. } => {
                    names.insert(name);
                }
                RootEntry::Journal {
                    kind: JournalKind::Replaced,
                    name,
                    path,
                } if has_descriptor(&path) => {
                    names.insert(name);
                }
                _ => {}
            }
        }
        Ok(names.into_iter().collect())
    }

    /// Classify every entry of the profiles root, sorted by path
    pub fn scan(&self) -> Result<Vec<RootEntry>> {
        let root = &self.paths.profiles_dir;
        let read_dir = match fs::read_dir(root) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage_err(root)(e)),
        };

        let mut entries = Vec::new();
        for entry in read_dir {
            let path = entry.map_err(storage_err(root))?.path();
            if path == self.paths.lock_file {
                continue;
            }
            entries.push(classify(path));
        }
        entries.sort_by(|a, b| a.path().cmp(b.path()));
        Ok(entries)
    }

    /// Replay the journal left behind by interrupted mutations
    pub fn recover(&self) -> Result<RecoveryReport> {
        if !self.paths.profiles_dir.is_dir() {
            return Ok(RecoveryReport::default());
        }
        let _lock = StoreLock::acquire(&self.paths.lock_file)?;
        self.recover_locked()
    }

    fn recover_locked(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();

        for entry in self.scan()? {
            let RootEntry::Journal { kind, name, path } = entry else {
                continue;
            };

            let live = self.paths.profile_dir(&name);
            if kind == JournalKind::Replaced && !has_descriptor(&live) {
                if let Err(e) = fs::rename(&path, &live) {
                    // Something that is not a profile occupies the name; leave both alone
                    warn!(
                        "Cannot restore '{}' from {}: {} (move {} out of the way)",
                        name,
                        path.display(),
                        e,
                        live.display()
                    );
                    continue;
                }
                warn!("Restored previous version of '{}' after an interrupted update", name);
                report.rolled_back.push(name);
            } else {
                remove_dir_if_exists(&path).map_err(storage_err(&path))?;
                warn!("Discarded leftover {}", path.display());
                report.discarded.push(path);
            }
        }

        if !report.is_empty() {
            self.sync_root();
        }
        Ok(report)
    }

    /// Write a complete profile into a fresh staging directory
    fn stage(
        &self,
        name: &str,
        descriptor: &Descriptor,
        certificate: Option<&[u8]>,
    ) -> Result<PathBuf> {
        let staging = self.journal_dir(STAGING_PREFIX, name);
        remove_dir_if_exists(&staging).map_err(storage_err(&staging))?;

        if let Err(e) = self.write_staging(&staging, descriptor, certificate) {
            self.discard(&staging);
            return Err(e);
        }
        Ok(staging)
    }

    fn write_staging(
        &self,
        staging: &Path,
        descriptor: &Descriptor,
        certificate: Option<&[u8]>,
    ) -> Result<()> {
        create_private_dir(staging).map_err(storage_err(staging))?;

        let descriptor_path = staging.join(DESCRIPTOR_FILE);
        let json = descriptor
            .to_json()
            .map_err(|e| storage_err(&descriptor_path)(e.into()))?;
        write_private(&descriptor_path, &json).map_err(storage_err(&descriptor_path))?;
        debug!("Wrote {}", descriptor_path.display());

        self.checkpoint(Checkpoint::DescriptorWritten)
            .map_err(storage_err(staging))?;

        if let Some(bytes) = certificate {
            let cert_path = staging.join(CERTIFICATE_FILE);
            write_private(&cert_path, bytes).map_err(storage_err(&cert_path))?;
            debug!("Wrote {}", cert_path.display());
        }

        sync_dir(staging).map_err(storage_err(staging))?;
        self.checkpoint(Checkpoint::Staged)
            .map_err(storage_err(staging))
    }

    /// Directory currently holding the readable version of `name`.
    ///
    /// Falls back to the detached copy an interrupted update left behind.
    fn locate(&self, name: &str) -> Result<Option<PathBuf>> {
        let live = self.live_dir(name)?;
        if has_descriptor(&live) {
            return Ok(Some(live));
        }
        let replaced = self.journal_dir(REPLACED_PREFIX, name);
        if has_descriptor(&replaced) {
            return Ok(Some(replaced));
        }
        // The update may have landed between the two checks.
        Ok(has_descriptor(&live).then_some(live))
    }

    /// Shared store lock for readers; none needed while the root does not exist
    fn read_lock(&self) -> Result<Option<StoreLock>> {
        if !self.paths.profiles_dir.is_dir() {
            return Ok(None);
        }
        StoreLock::acquire_shared(&self.paths.lock_file)
    }

    fn live_dir(&self, name: &str) -> Result<PathBuf> {
        validate_profile_name(name)?;
        Ok(self.paths.profile_dir(name))
    }

    fn journal_dir(&self, prefix: &str, name: &str) -> PathBuf {
        self.paths.profiles_dir.join(format!("{prefix}{name}"))
    }

    fn discard(&self, path: &Path) {
        if let Err(e) = remove_dir_if_exists(path) {
            warn!("Failed to clean up {}: {}", path.display(), e);
        }
    }

    fn sync_root(&self) {
        if let Err(e) = sync_dir(&self.paths.profiles_dir) {
            warn!("Failed to sync {}: {}", self.paths.profiles_dir.display(), e);
        }
    }

    fn checkpoint(&self, at: Checkpoint) -> io::Result<()> {
        #[cfg(test)]
        {
            if self.fail_at.get() == Some(at) {
                self.fail_at.set(None);
                return Err(io::Error::other(format!("injected failure at {at:?}")));
            }
        }
        #[cfg(not(test))]
        let _ = at;
        Ok(())
    }

    /// Make the next mutation fail when it reaches `at`
    #[cfg(test)]
    pub(crate) fn fail_at(&self, at: Checkpoint) {
        self.fail_at.set(Some(at));
    }
}

fn reject_empty_certificate(certificate: Option<&[u8]>) -> Result<()> {
    if certificate.is_some_and(<[u8]>::is_empty) {
        return Err(Error::CertificateRead {
            origin: "supplied content".to_string(),
            reason: "certificate is empty".to_string(),
        });
    }
    Ok(())
}

fn has_descriptor(dir: &Path) -> bool {
    dir.join(DESCRIPTOR_FILE).is_file()
}

fn read_profile_dir(name: &str, dir: &Path) -> Result<StoredProfile> {
    let descriptor_path = dir.join(DESCRIPTOR_FILE);
    let bytes = match fs::read(&descriptor_path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(Error::NotFound(name.to_string()));
        }
        Err(e) => return Err(storage_err(&descriptor_path)(e)),
    };
    let descriptor = Descriptor::parse(name, &bytes)?;

    let cert_path = dir.join(CERTIFICATE_FILE);
    let certificate = read_optional(&cert_path).map_err(storage_err(&cert_path))?;

    Ok(StoredProfile {
        descriptor,
        certificate,
    })
}

fn classify(path: PathBuf) -> RootEntry {
    let Some(file_name) = path.file_name().and_then(|n| n.to_str()).map(str::to_owned) else {
        return RootEntry::Stray(path);
    };

    for (prefix, kind) in JOURNAL_PREFIXES {
        if let Some(name) = file_name.strip_prefix(prefix) {
            if validate_profile_name(name).is_ok() && path.is_dir() {
                return RootEntry::Journal {
                    kind,
                    name: name.to_string(),
                    path,
                };
            }
            return RootEntry::Stray(path);
        }
    }

    if validate_profile_name(&file_name).is_ok() && has_descriptor(&path) {
        RootEntry::Profile {
            name: file_name,
            path,
        }
    } else {
        RootEntry::Stray(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_utils::{residue, sample_descriptor, setup_test_paths};
    use tempfile::TempDir;

    fn setup() -> (TempDir, Storage) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::new(setup_test_paths(&temp_dir));
        (temp_dir, storage)
    }

    #[test]
    fn test_create_and_read() {
        let (_tmp, storage) = setup();
        let descriptor = sample_descriptor();

        storage.create("ci", &descriptor, Some(b"-----CERT-----")).unwrap();

        assert!(storage.exists("ci"));
        let stored = storage.read("ci").unwrap();
        assert_eq!(stored.descriptor, descriptor);
        assert_eq!(stored.certificate.as_deref(), Some(&b"-----CERT-----"[..]));
        assert!(storage.paths().profile_descriptor("ci").is_file());
        assert!(storage.paths().profile_certificate("ci").is_file());
        assert!(residue(storage.paths()).is_empty());
    }

    #[test]
    fn test_create_without_certificate() {
        let (_tmp, storage) = setup();
        storage.create("ci", &sample_descriptor(), None).unwrap();

        assert_eq!(storage.read("ci").unwrap().certificate, None);
        assert!(!storage.paths().profile_certificate("ci").exists());
    }

    #[test]
    fn test_create_duplicate() {
        let (_tmp, storage) = setup();
        storage.create("ci", &sample_descriptor(), None).unwrap();

        let mut other = sample_descriptor();
        other.server = "https://other".into();
        let err = storage.create("ci", &other, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(storage.read("ci").unwrap().descriptor.server, "https://jira.example.com");
    }

    #[test]
    fn test_create_over_foreign_directory() {
        let (_tmp, storage) = setup();
        fs::create_dir_all(storage.paths().profile_dir("taken")).unwrap();

        let err = storage.create("taken", &sample_descriptor(), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert!(!storage.exists("taken"));
    }

    #[test]
    fn test_invalid_name_never_touches_disk() {
        let (_tmp, storage) = setup();
        let err = storage.create("../escape", &sample_descriptor(), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidName);
        assert!(!storage.paths().profiles_dir.exists());
        assert!(!storage.exists("../escape"));
    }

    #[test]
    fn test_read_missing() {
        let (_tmp, storage) = setup();
        assert_eq!(storage.read("nope").unwrap_err().kind(), ErrorKind::NotFound);

        fs::create_dir_all(storage.paths().profile_dir("empty")).unwrap();
        assert!(!storage.exists("empty"));
        assert_eq!(storage.read("empty").unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_read_corrupt_descriptor() {
        let (_tmp, storage) = setup();
        fs::create_dir_all(storage.paths().profile_dir("bad")).unwrap();
        fs::write(storage.paths().profile_descriptor("bad"), "{ not json").unwrap();

        assert!(storage.exists("bad"));
        assert_eq!(storage.read("bad").unwrap_err().kind(), ErrorKind::CorruptProfile);

        fs::write(storage.paths().profile_descriptor("bad"), r#"{"type": "jira"}"#).unwrap();
        assert_eq!(storage.read("bad").unwrap_err().kind(), ErrorKind::CorruptProfile);
    }

    #[test]
    fn test_descriptor_is_forward_compatible() {
        let (_tmp, storage) = setup();
        fs::create_dir_all(storage.paths().profile_dir("old")).unwrap();
        fs::write(
            storage.paths().profile_descriptor("old"),
            r#"{"type": "jira", "server": "https://x", "token": "t", "proxy": "http://p"}"#,
        )
        .unwrap();

        let stored = storage.read("old").unwrap();
        assert_eq!(stored.descriptor.token.as_deref(), Some("t"));
        assert_eq!(stored.descriptor.user, None);
        assert_eq!(stored.descriptor.created_at, None);
    }

    #[test]
    fn test_update_descriptor_and_certificate() {
        let (_tmp, storage) = setup();
        storage.create("ci", &sample_descriptor(), Some(b"old")).unwrap();

        let updated = storage
            .update("ci", CertificateAction::Keep, |d| {
                d.server = "https://new".into();
                Ok(())
            })
            .unwrap();
        assert_eq!(updated.certificate.as_deref(), Some(&b"old"[..]));
        assert_eq!(storage.read("ci").unwrap().descriptor.server, "https://new");
        assert_eq!(storage.read("ci").unwrap().certificate.as_deref(), Some(&b"old"[..]));

        storage
            .update("ci", CertificateAction::Replace(b"new".to_vec()), |_| Ok(()))
            .unwrap();
        assert_eq!(storage.read("ci").unwrap().certificate.as_deref(), Some(&b"new"[..]));

        storage.update("ci", CertificateAction::Remove, |_| Ok(())).unwrap();
        assert_eq!(storage.read("ci").unwrap().certificate, None);
        assert!(residue(storage.paths()).is_empty());
    }

    #[test]
    fn test_update_vetoed_by_apply() {
        let (_tmp, storage) = setup();
        storage.create("ci", &sample_descriptor(), Some(b"cert")).unwrap();

        let err = storage
            .update("ci", CertificateAction::Remove, |d| {
                d.token = None;
                Err(Error::MissingServer)
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingServer);

        let stored = storage.read("ci").unwrap();
        assert_eq!(stored.descriptor, sample_descriptor());
        assert_eq!(stored.certificate.as_deref(), Some(&b"cert"[..]));
        assert!(residue(storage.paths()).is_empty());
    }

    #[test]
    fn test_update_missing() {
        let (_tmp, storage) = setup();
        let err = storage.update("nope", CertificateAction::Keep, |_| Ok(())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        storage.create("ci", &sample_descriptor(), None).unwrap();
        let err = storage.update("nope", CertificateAction::Keep, |_| Ok(())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_remove() {
        let (_tmp, storage) = setup();
        storage.create("ci", &sample_descriptor(), Some(b"cert")).unwrap();

        storage.remove("ci").unwrap();
        assert!(!storage.exists("ci"));
        assert!(!storage.paths().profile_dir("ci").exists());
        assert_eq!(storage.remove("ci").unwrap_err().kind(), ErrorKind::NotFound);
        assert!(residue(storage.paths()).is_empty());
    }

    #[test]
    fn test_remove_missing_root() {
        let (_tmp, storage) = setup();
        assert_eq!(storage.remove("ci").unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_list_sorted_and_filtered() {
        let (_tmp, storage) = setup();
        assert!(storage.list().unwrap().is_empty());

        for name in ["zeta", "alpha", "Mid"] {
            storage.create(name, &sample_descriptor(), None).unwrap();
        }
        let root = &storage.paths().profiles_dir;
        fs::create_dir(root.join("no-descriptor")).unwrap();
        fs::create_dir(root.join("with space")).unwrap();
        fs::write(root.join("with space").join(DESCRIPTOR_FILE), "{}").unwrap();
        fs::write(root.join("loose-file"), "x").unwrap();

        assert_eq!(storage.list().unwrap(), vec!["Mid", "alpha", "zeta"]);
    }

    #[test]
    fn test_failed_create_leaves_no_residue() {
        let (_tmp, storage) = setup();
        storage.fail_at(Checkpoint::DescriptorWritten);

        let err = storage
            .create("ci", &sample_descriptor(), Some(b"cert"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(!storage.exists("ci"));
        assert!(!storage.paths().profile_dir("ci").exists());
        assert!(residue(storage.paths()).is_empty());

        // the name is still free
        storage.create("ci", &sample_descriptor(), Some(b"cert")).unwrap();
        assert!(storage.exists("ci"));
    }

    #[test]
    fn test_failed_update_keeps_previous_version() {
        for at in [Checkpoint::DescriptorWritten, Checkpoint::Staged, Checkpoint::Detached] {
            let (_tmp, storage) = setup();
            storage.create("ci", &sample_descriptor(), Some(b"old")).unwrap();
            storage.fail_at(at);

            let err = storage
                .update("ci", CertificateAction::Replace(b"new".to_vec()), |d| {
                    d.server = "https://new".into();
                    Ok(())
                })
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Storage, "{at:?}");

            let stored = storage.read("ci").unwrap();
            assert_eq!(stored.descriptor, sample_descriptor(), "{at:?}");
            assert_eq!(stored.certificate.as_deref(), Some(&b"old"[..]), "{at:?}");
            assert!(residue(storage.paths()).is_empty(), "{at:?}");
        }
    }

    #[test]
    fn test_interrupted_update_is_readable_and_rolled_back() {
        let (_tmp, storage) = setup();
        storage.create("ci", &sample_descriptor(), Some(b"old")).unwrap();

        // Simulate a crash after the live directory was detached
        let root = storage.paths().profiles_dir.clone();
        fs::rename(root.join("ci"), root.join(".replaced.ci")).unwrap();
        fs::create_dir(root.join(".staging.ci")).unwrap();

        assert!(storage.exists("ci"));
        assert_eq!(storage.read("ci").unwrap().certificate.as_deref(), Some(&b"old"[..]));
        assert_eq!(storage.list().unwrap(), vec!["ci"]);

        let report = storage.recover().unwrap();
        assert_eq!(report.rolled_back, vec!["ci".to_string()]);
        assert_eq!(report.discarded, vec![root.join(".staging.ci")]);
        assert!(root.join("ci").join(DESCRIPTOR_FILE).is_file());
        assert!(residue(storage.paths()).is_empty());
    }

    #[test]
    fn test_recover_discards_landed_update_and_removals() {
        let (_tmp, storage) = setup();
        storage.create("ci", &sample_descriptor(), None).unwrap();
        storage.create("gone", &sample_descriptor(), None).unwrap();

        let root = storage.paths().profiles_dir.clone();
        // new version of "ci" landed, old one still around
        fs::create_dir(root.join(".replaced.ci")).unwrap();
        fs::write(root.join(".replaced.ci").join(DESCRIPTOR_FILE), "{}").unwrap();
        // remove of "gone" committed but not cleaned up
        fs::rename(root.join("gone"), root.join(".removed.gone")).unwrap();

        assert!(!storage.exists("gone"));
        assert_eq!(storage.read("ci").unwrap().descriptor, sample_descriptor());

        // any mutation replays the journal first
        storage.create("other", &sample_descriptor(), None).unwrap();
        assert!(residue(storage.paths()).is_empty());
        assert_eq!(storage.list().unwrap(), vec!["ci", "other"]);
    }

    #[test]
    fn test_scan_classifies_entries() {
        let (_tmp, storage) = setup();
        storage.create("ci", &sample_descriptor(), None).unwrap();
        let root = storage.paths().profiles_dir.clone();
        fs::create_dir(root.join(".staging.next")).unwrap();
        fs::create_dir(root.join("junk dir")).unwrap();

        let entries = storage.scan().unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries.contains(&RootEntry::Profile {
            name: "ci".into(),
            path: root.join("ci"),
        }));
        assert!(entries.contains(&RootEntry::Journal {
            kind: JournalKind::Staging,
            name: "next".into(),
            path: root.join(".staging.next"),
        }));
        assert!(entries.contains(&RootEntry::Stray(root.join("junk dir"))));
    }

    #[test]
    fn test_descriptor_debug_redacts_secrets() {
        let mut descriptor = sample_descriptor();
        descriptor.password = Some("hunter2".into());
        let debug = format!("{descriptor:?}");
        assert!(!debug.contains("abc123"));
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("jira.example.com"));
    }

    #[test]
    fn test_empty_certificate_is_rejected() {
        let (_tmp, storage) = setup();

        let err = storage
            .create("ci", &sample_descriptor(), Some(b""))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CertificateRead);
        assert!(!storage.exists("ci"));

        storage.create("ci", &sample_descriptor(), Some(b"pem")).unwrap();
        let err = storage
            .update("ci", CertificateAction::Replace(Vec::new()), |_| Ok(()))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CertificateRead);
        assert_eq!(storage.read("ci").unwrap().certificate.as_deref(), Some(&b"pem"[..]));
        assert!(residue(storage.paths()).is_empty());
    }

    #[test]
    fn test_blocked_rollback_does_not_wedge_the_store() {
        let (_tmp, storage) = setup();
        storage.create("ci", &sample_descriptor(), None).unwrap();

        // Interrupted update whose name is now taken by a directory without a descriptor
        let root = storage.paths().profiles_dir.clone();
        fs::rename(root.join("ci"), root.join(".replaced.ci")).unwrap();
        fs::create_dir(root.join("ci")).unwrap();
        fs::write(root.join("ci").join("notes.txt"), "hi").unwrap();

        storage.create("other", &sample_descriptor(), None).unwrap();
        storage
            .update("other", CertificateAction::Keep, |d| {
                d.server = "https://new".into();
                Ok(())
            })
            .unwrap();
        assert_eq!(storage.read("other").unwrap().descriptor.server, "https://new");

        // The detached copy is kept until the name is freed
        assert!(root.join(".replaced.ci").join(DESCRIPTOR_FILE).is_file());
        fs::remove_dir_all(root.join("ci")).unwrap();
        let report = storage.recover().unwrap();
        assert_eq!(report.rolled_back, vec!["ci".to_string()]);
        assert_eq!(storage.read("ci").unwrap().descriptor, sample_descriptor());
    }

    #[test]
    fn test_concurrent_reader_never_sees_mixed_versions() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::thread;

        let temp_dir = TempDir::new().unwrap();
        let paths = setup_test_paths(&temp_dir);
        let storage = Storage::new(paths.clone());
        let descriptor = Descriptor {
            server: "A".to_string(),
            ..sample_descriptor()
        };
        storage.create("ci", &descriptor, Some(b"A")).unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let writer = {
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let storage = Storage::new(paths);
                for i in 0..300 {
                    let version = if i % 2 == 0 { "B" } else { "A" };
                    let result = storage.update(
                        "ci",
                        CertificateAction::Replace(version.as_bytes().to_vec()),
                        |d| {
                            d.server = version.to_string();
                            Ok(())
                        },
                    );
                    if result.is_err() {
                        done.store(true, Ordering::SeqCst);
                        return result.map(|_| ());
                    }
                }
                done.store(true, Ordering::SeqCst);
                Ok(())
            })
        };

        let mut reads = 0;
        while !done.load(Ordering::SeqCst) {
            let stored = storage.read("ci").unwrap();
            assert_eq!(
                stored.certificate.as_deref(),
                Some(stored.descriptor.server.as_bytes()),
                "read {reads} mixed two versions"
            );
            reads += 1;
            thread::yield_now();
        }

        writer.join().unwrap().unwrap();
        let last = storage.read("ci").unwrap();
        assert_eq!(last.descriptor.server, "A");
        assert_eq!(last.certificate.as_deref(), Some(&b"A"[..]));
    }
}
