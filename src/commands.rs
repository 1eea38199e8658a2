//! High-level command orchestration for the CLI.
//!
//! This module contains the handler functions for each CLI command (`list`, `add`, `update`, etc.).
//! It serves as the coordination layer, interacting with:
//! - `crate::ui` for user interaction (output, prompts).
//! - `crate::manager` for validated profile operations.
//! - `crate::doctor` for store diagnostics.
//!
//! Each function here generally corresponds to a subcommand in `main.rs`.

use anstyle::AnsiColor;
use anyhow::{Context, Result, anyhow, bail};
use std::io::IsTerminal;

use crate::doctor::run_doctor;
use crate::error::{Error, ErrorKind};
use crate::manager::{ListEntry, NewProfile, ProfileManager, ProfileUpdate};
use crate::ui::Ui;

/// Attach a next-step hint to errors a user can act on
fn with_hint(err: Error) -> anyhow::Error {
    let hint = match err.kind() {
        ErrorKind::AlreadyExists => {
            "Use 'profmgr update' to change it, or choose a different name."
        }
        ErrorKind::NotFound => "Use 'profmgr list' to see available profiles.",
        ErrorKind::MissingCredentials => {
            "Provide a token with --token, or both --user and --password."
        }
        ErrorKind::ConflictingCredentials => {
            "Pass --unset-token together with --user and --password to switch to basic auth."
        }
        ErrorKind::CorruptProfile => {
            "Run 'profmgr doctor' for details, or rewrite it with 'profmgr update'."
        }
        _ if err.is_validation_error() => "See 'profmgr help' for the accepted values.",
        _ => return err.into(),
    };
    anyhow!("{}\nHint: {}", err, hint)
}

/// List all stored profiles
pub fn list(manager: &ProfileManager, ui: &Ui) -> Result<()> {
    let entries = manager.list().map_err(with_hint)?;

    if entries.is_empty() {
        ui.warn("No profiles found.");
        ui.newline();
        ui.println("Create one with:");
        ui.println(format!(
            "  {} add <name> --type jira --server <url> --token <token>",
            ui.bold("profmgr")
        ));
        return Ok(());
    }

    let mut table = ui.simple_table();
    table.set_header(vec![
        ui.header_cell(""),
        ui.header_cell("Profile"),
        ui.header_cell("Type"),
        ui.header_cell("Server"),
        ui.header_cell("Auth"),
        ui.header_cell("Cert"),
    ]);

    let mut degraded = 0;
    for entry in &entries {
        match entry {
            ListEntry::Valid(summary) => {
                table.add_row(vec![
                    ui.cell(ui.icon_ok()),
                    ui.cell(&summary.name),
                    ui.cell(summary.profile_type.as_str()),
                    ui.cell(&summary.server),
                    ui.cell(summary.auth.to_string()),
                    ui.cell(if summary.has_certificate { "yes" } else { "-" }),
                ]);
            }
            ListEntry::Degraded { name, error } => {
                degraded += 1;
                table.add_row(vec![
                    ui.cell(ui.icon_err()),
                    ui.cell(name),
                    ui.colored_cell("corrupt", AnsiColor::Red),
                    ui.cell(error.to_string()),
                    ui.cell("-"),
                    ui.cell("-"),
                ]);
            }
        }
    }

    ui.section("Profiles");
    ui.println(table.to_string());

    if degraded > 0 {
        ui.newline();
        ui.warn(format!(
            "{} profile(s) could not be read. Run 'profmgr doctor' for details.",
            degraded
        ));
    }

    Ok(())
}

/// Show detailed information about a profile
pub fn show(manager: &ProfileManager, name: &str, show_secrets: bool, ui: &Ui) -> Result<()> {
    let profile = manager.get(name).map_err(with_hint)?;

    ui.section(format!("Profile: {}", name));
    ui.newline();

    let mut table = ui.table();
    table.add_row(vec![ui.cell("Type"), ui.cell(profile.profile_type.as_str())]);
    table.add_row(vec![ui.cell("Server"), ui.cell(&profile.server)]);
    table.add_row(vec![
        ui.cell("Auth"),
        ui.cell(profile.credentials.method().to_string()),
    ]);

    if let Some(token) = profile.token() {
        table.add_row(vec![ui.cell("Token"), ui.cell(ui.secret(token, show_secrets))]);
    }
    if let Some(user) = profile.user() {
        table.add_row(vec![ui.cell("User"), ui.cell(user)]);
    }
    if let Some(password) = profile.password() {
        table.add_row(vec![ui.cell("Password"), ui.cell(ui.secret(password, show_secrets))]);
    }

    let certificate = match &profile.certificate {
        Some(bytes) => ui.cell(format!(
            "{} ({})",
            manager.paths().profile_certificate(name).display(),
            format_bytes(bytes.len() as u64)
        )),
        None => ui.colored_cell("none", AnsiColor::BrightBlack),
    };
    table.add_row(vec![ui.cell("Certificate"), certificate]);

    if let Some(created) = &profile.created_at {
        table.add_row(vec![
            ui.cell("Created"),
            ui.cell(created.format("%Y-%m-%d %H:%M:%S").to_string()),
        ]);
    }
    if let Some(updated) = &profile.updated_at {
        table.add_row(vec![
            ui.cell("Updated"),
            ui.cell(updated.format("%Y-%m-%d %H:%M:%S").to_string()),
        ]);
    }

    ui.println(table.to_string());

    if !show_secrets && profile.token().or(profile.password()).is_some() {
        ui.println(ui.dim("Secrets are masked. Pass --show-secrets to reveal them."));
    }

    Ok(())
}

/// Format bytes as human-readable string
fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Add a new profile
pub fn add(manager: &ProfileManager, mut request: NewProfile, ui: &Ui) -> Result<()> {
    // Prefer prompting over passing the password on the command line
    if request.token.is_none()
        && request.user.is_some()
        && request.password.is_none()
        && std::io::stdin().is_terminal()
    {
        let password = inquire::Password::new("Password:")
            .without_confirmation()
            .with_help_message("Stored in the profile directory, readable only by you")
            .prompt()
            .context("Password entry cancelled")?;
        request.password = Some(password);
    }

    let profile = manager.add(request).map_err(with_hint)?;

    ui.ok(format!("Created profile '{}'", profile.name));
    ui.newline();
    ui.println(format!(
        "  {} {} server at {}",
        ui.icon_info(),
        profile.profile_type,
        profile.server
    ));
    ui.println(format!(
        "  {} Authenticates with {}",
        ui.icon_info(),
        profile.credentials.method()
    ));
    if profile.certificate.is_some() {
        ui.println(format!("  {} Certificate stored", ui.icon_info()));
    }
    ui.newline();
    ui.info(format!(
        "Stored in {}",
        manager.paths().profile_dir(&profile.name).display()
    ));

    Ok(())
}

/// Apply a partial update to a profile
pub fn update(manager: &ProfileManager, name: &str, changes: ProfileUpdate, ui: &Ui) -> Result<()> {
    if changes.is_empty() {
        bail!(
            "Nothing to update for profile '{}'.\nHint: Pass at least one of --type, --server, --token, --user, --password or --cert (or an --unset-*/--remove-cert flag).",
            name
        );
    }

    let profile = manager.update(name, changes).map_err(with_hint)?;

    ui.ok(format!("Updated profile '{}'", profile.name));
    Ok(())
}

/// Remove a profile
pub fn remove(manager: &ProfileManager, name: &str, force: bool, ui: &Ui) -> Result<()> {
    if !manager.exists(name) {
        return Err(with_hint(Error::NotFound(name.to_string())));
    }

    // Confirm unless --force
    if !force {
        let confirm = inquire::Confirm::new(&format!(
            "Are you sure you want to remove profile '{}'?",
            name
        ))
        .with_default(false)
        .with_help_message("This will permanently delete the profile and its certificate")
        .prompt()
        .context("Confirmation cancelled")?;

        if !confirm {
            ui.warn("Removal cancelled.");
            return Ok(());
        }
    }

    manager.remove(name).map_err(with_hint)?;

    ui.ok(format!("Removed profile '{}'", name));
    Ok(())
}

/// Run diagnostics on the profile store
pub fn doctor(manager: &ProfileManager, fix: bool, ui: &Ui) -> Result<()> {
    if !run_doctor(manager, fix, ui) {
        ui.warn("Issues detected.");
    }
    Ok(())
}
