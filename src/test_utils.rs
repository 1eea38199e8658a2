//! Test utilities shared across test modules
//!
//! This module provides common helper functions for testing, avoiding duplication
//! across multiple test suites.

use crate::paths::Paths;
use crate::storage::Descriptor;
use tempfile::TempDir;

/// Create a Paths struct for testing using a temporary directory
///
/// The profiles root is not created; the first mutation does that.
pub fn setup_test_paths(temp_dir: &TempDir) -> Paths {
    Paths::with_root(temp_dir.path().join("profiles"))
}

/// A valid token-based Jira descriptor
pub fn sample_descriptor() -> Descriptor {
    Descriptor {
        profile_type: "jira".to_string(),
        server: "https://jira.example.com".to_string(),
        token: Some("abc123".to_string()),
        user: None,
        password: None,
        created_at: None,
        updated_at: None,
    }
}

/// Hidden journal entries left in the profiles root (the lock file excluded)
pub fn residue(paths: &Paths) -> Vec<String> {
    let Ok(read_dir) = std::fs::read_dir(&paths.profiles_dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = read_dir
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with('.') && name != ".lock")
        .collect();
    names.sort();
    names
}
