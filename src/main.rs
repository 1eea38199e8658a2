use anyhow::Result;
use clap::{ArgAction, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use log::LevelFilter;
use std::path::PathBuf;

use profmgr::{
    CertificateSource, FieldChange, NewProfile, ProfileManager, ProfileUpdate, commands,
    paths::{PROFILES_DIR_ENV, Paths},
    ui::{ColorMode, Ui},
};

#[derive(Parser)]
#[command(name = "profmgr")]
#[command(about = "Server Profile Manager - store connection profiles for Jira, Polarion, Superset and more")]
#[command(version)]
struct Cli {
    /// Directory holding the profiles
    #[arg(long, global = true, value_name = "DIR", env = PROFILES_DIR_ENV)]
    profiles_dir: Option<PathBuf>,

    /// Increase log output (-v for info, -vv for debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// When to use colors: always, auto, never
    #[arg(long, global = true, value_name = "WHEN", default_value = "auto")]
    color: ColorMode,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List all stored profiles
    List,

    /// Show detailed information about a profile
    Show {
        /// Name of the profile to show
        name: String,

        /// Print token and password in clear text
        #[arg(long)]
        show_secrets: bool,
    },

    /// Add a new profile
    Add {
        /// Name of the profile to create
        name: String,

        /// Server type: jira, polarion, superset, conaktiv, stages
        #[arg(long = "type", visible_alias = "profile-type", value_name = "TYPE")]
        profile_type: String,

        /// Server URL
        #[arg(short, long, value_name = "URL")]
        server: String,

        /// API token (takes precedence over user and password)
        #[arg(short, long)]
        token: Option<String>,

        /// User name for basic authentication
        #[arg(short, long)]
        user: Option<String>,

        /// Password for basic authentication (prompted when omitted)
        #[arg(short, long)]
        password: Option<String>,

        /// Server certificate file to store with the profile
        #[arg(short, long, value_name = "PATH")]
        cert: Option<PathBuf>,
    },

    /// Change fields of an existing profile
    Update {
        /// Name of the profile to update
        name: String,

        /// New server type
        #[arg(long = "type", visible_alias = "profile-type", value_name = "TYPE")]
        profile_type: Option<String>,

        /// New server URL
        #[arg(short, long, value_name = "URL")]
        server: Option<String>,

        /// New API token
        #[arg(short, long, conflicts_with = "unset_token")]
        token: Option<String>,

        /// Remove the stored token
        #[arg(long)]
        unset_token: bool,

        /// New user name
        #[arg(short, long, conflicts_with = "unset_user")]
        user: Option<String>,

        /// Remove the stored user name
        #[arg(long)]
        unset_user: bool,

        /// New password
        #[arg(short, long, conflicts_with = "unset_password")]
        password: Option<String>,

        /// Remove the stored password
        #[arg(long)]
        unset_password: bool,

        /// Replace the certificate with this file
        #[arg(short, long, value_name = "PATH", conflicts_with = "remove_cert")]
        cert: Option<PathBuf>,

        /// Remove the stored certificate
        #[arg(long)]
        remove_cert: bool,
    },

    /// Remove a profile
    Remove {
        /// Name of the profile to remove
        name: String,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        force: bool,
    },

    /// Run diagnostics on the profile store
    Doctor {
        /// Roll back or complete interrupted operations
        #[arg(long)]
        fix: bool,
    },

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    // RUST_LOG, when set, overrides the verbosity flags
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp(None)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let ui = Ui::new(cli.color, cli.no_color);

    let profiles_dir = cli.profiles_dir;
    let manager = || -> Result<ProfileManager> {
        Ok(ProfileManager::new(Paths::resolve(profiles_dir)?))
    };

    match cli.command {
        Commands::List => commands::list(&manager()?, &ui),
        Commands::Show { name, show_secrets } => {
            commands::show(&manager()?, &name, show_secrets, &ui)
        }
        Commands::Add {
            name,
            profile_type,
            server,
            token,
            user,
            password,
            cert,
        } => {
            let request = NewProfile {
                token,
                user,
                password,
                certificate: cert.map(CertificateSource::File),
                ..NewProfile::new(name, profile_type, server)
            };
            commands::add(&manager()?, request, &ui)
        }
        Commands::Update {
            name,
            profile_type,
            server,
            token,
            unset_token,
            user,
            unset_user,
            password,
            unset_password,
            cert,
            remove_cert,
        } => {
            let changes = ProfileUpdate {
                profile_type,
                server,
                token: FieldChange::from_flags(token, unset_token),
                user: FieldChange::from_flags(user, unset_user),
                password: FieldChange::from_flags(password, unset_password),
                certificate: FieldChange::from_flags(cert.map(CertificateSource::File), remove_cert),
            };
            commands::update(&manager()?, &name, changes, &ui)
        }
        Commands::Remove { name, force } => commands::remove(&manager()?, &name, force, &ui),
        Commands::Doctor { fix } => commands::doctor(&manager()?, fix, &ui),
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "profmgr", &mut std::io::stdout());
            Ok(())
        }
    }
}
