//! Diagnostic tool for profmgr.
//!
//! This module implements the `profmgr doctor` command, which checks the store
//! for common issues:
//! - Existence and permissions of the profiles directory.
//! - Whether another process holds the store lock.
//! - Leftovers of interrupted add/update/remove operations.
//! - Readability of every stored profile.
//!
//! It reports issues to the user with a pass/fail/warn status. With `--fix`,
//! interrupted operations are rolled back or completed.

use anstyle::AnsiColor;

use crate::lock::StoreLock;
use crate::manager::{ListEntry, ProfileManager};
use crate::storage::{JournalKind, RootEntry};
use crate::ui::Ui;

/// Run the doctor diagnostics; returns `true` when no issues remain
pub fn run_doctor(manager: &ProfileManager, fix: bool, ui: &Ui) -> bool {
    let paths = manager.paths();
    let storage = manager.storage();
    let mut healthy = true;

    ui.section("profmgr Doctor");
    ui.newline();

    // 1. Profiles directory
    healthy &= check_step(ui, "Profiles Directory", || {
        let root = &paths.profiles_dir;
        if !root.exists() {
            ui.println(format!(
                "  {} Profiles directory not created yet (fresh install?): {}",
                ui.icon_warn(),
                root.display()
            ));
            return true;
        }
        if !root.is_dir() {
            ui.println(format!(
                "  {} Profiles path is not a directory: {}",
                ui.icon_err(),
                root.display()
            ));
            return false;
        }
        ui.println(format!(
            "  {} Profiles directory exists: {}",
            ui.icon_ok(),
            root.display()
        ));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(metadata) = root.metadata() {
                let mode = metadata.permissions().mode() & 0o777;
                if mode & 0o077 != 0 {
                    ui.println(format!(
                        "  {} Directory is accessible by other users (mode {:o})",
                        ui.icon_warn(),
                        mode
                    ));
                }
            }
        }
        true
    });

    if !paths.profiles_dir.is_dir() {
        return healthy;
    }

    // 2. Store lock
    healthy &= check_step(ui, "Store Lock", || {
        match StoreLock::try_acquire(&paths.lock_file) {
            Ok(Some(_lock)) => {
                ui.println(format!("  {} Lock is free", ui.icon_ok()));
                true
            }
            Ok(None) => {
                ui.println(format!(
                    "  {} Lock is held by another profmgr process",
                    ui.icon_warn()
                ));
                true
            }
            Err(e) => {
                ui.println(format!("  {} Cannot open lock file: {}", ui.icon_err(), e));
                false
            }
        }
    });

    let entries = match storage.scan() {
        Ok(entries) => entries,
        Err(e) => {
            ui.err(format!("Failed to read profiles directory: {}", e));
            return false;
        }
    };

    // 3. Interrupted operations
    healthy &= check_step(ui, "Interrupted Operations", || {
        let journal: Vec<_> = entries
            .iter()
            .filter_map(|entry| match entry {
                RootEntry::Journal { kind, name, .. } => Some((*kind, name.as_str())),
                _ => None,
            })
            .collect();

        if journal.is_empty() {
            ui.println(format!("  {} None found", ui.icon_ok()));
            return true;
        }

        for (kind, name) in &journal {
            let what = match kind {
                JournalKind::Staging => "unfinished write",
                JournalKind::Replaced => "unfinished update",
                JournalKind::Removed => "unfinished removal",
            };
            ui.println(format!("  {} {} of '{}'", ui.icon_warn(), what, name));
        }

        if !fix {
            ui.println(format!(
                "  {} Run 'profmgr doctor --fix' to clean up",
                ui.icon_info()
            ));
            return false;
        }

        match storage.recover() {
            Ok(report) => {
                for name in &report.rolled_back {
                    ui.println(format!("  {} Restored '{}'", ui.icon_ok(), name));
                }
                for path in &report.discarded {
                    ui.println(format!("  {} Discarded {}", ui.icon_ok(), path.display()));
                }
                true
            }
            Err(e) => {
                ui.println(format!("  {} Recovery failed: {}", ui.icon_err(), e));
                false
            }
        }
    });

    // 4. Stray entries
    check_step(ui, "Stray Entries", || {
        let strays: Vec<_> = entries
            .iter()
            .filter_map(|entry| match entry {
                RootEntry::Stray(path) => Some(path),
                _ => None,
            })
            .collect();

        if strays.is_empty() {
            ui.println(format!("  {} None found", ui.icon_ok()));
        }
        for path in strays {
            ui.println(format!(
                "  {} Ignored (not a profile): {}",
                ui.icon_info(),
                path.display()
            ));
        }
        true
    });

    // 5. Profiles
    healthy &= check_step(ui, "Profiles", || {
        let profiles = match manager.list() {
            Ok(p) => p,
            Err(e) => {
                ui.println(format!("  {} Failed to list profiles: {}", ui.icon_err(), e));
                return false;
            }
        };

        if profiles.is_empty() {
            ui.println(format!("  {} No profiles found", ui.icon_warn()));
            return true;
        }

        ui.println(format!("  Found {} profiles:", profiles.len()));
        let mut all_valid = true;

        for entry in profiles {
            match entry {
                ListEntry::Valid(summary) => ui.println(format!(
                    "    {} {} ({}, {})",
                    ui.icon_ok(),
                    summary.name,
                    summary.profile_type,
                    summary.auth
                )),
                ListEntry::Degraded { name, error } => {
                    ui.println(format!("    {} {} ({})", ui.icon_err(), name, error));
                    all_valid = false;
                }
            }
        }
        all_valid
    });

    healthy
}

fn check_step<F>(ui: &Ui, name: &str, check_fn: F) -> bool
where
    F: FnOnce() -> bool,
{
    ui.println(ui.bold(format!("Checking {}...", name)));
    let success = check_fn();
    if !success {
        ui.println(ui.colored("  Issues detected!", AnsiColor::Red));
    }
    ui.newline();
    success
}
