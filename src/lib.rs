pub mod commands;
pub mod doctor;
pub mod error;
pub mod fs_utils;
pub mod lock;
pub mod manager;
pub mod paths;
pub mod profile;
pub mod storage;
pub mod ui;

#[cfg(test)]
pub mod test_utils;

pub use error::{Error, ErrorKind, Result};
pub use manager::{
    CertificateSource, FieldChange, ListEntry, NewProfile, ProfileManager, ProfileUpdate,
};
pub use profile::{AuthMethod, Credentials, Profile, ProfileSummary, ProfileType};
