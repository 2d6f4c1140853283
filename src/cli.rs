// CLI module - command-line argument parsing and handlers
//
// Subcommands:
// - run (default): start the controller and wait for `job start`
// - config --show|--reset|--edit|--path: configuration management
// - identity add|list|activate|deactivate: manage monitored identities
// - job start|stop|status: write/read the run signal the controller polls
// - init-db: create the database schema

use crate::config::{Config, VERSION};
use crate::store::{schema, MonitoredIdentity, PersistenceGateway, RunState};
use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::fmt::Write as _;
use std::io::Write;
use std::process::Command;

/// livewatch - live-stream interaction monitor
#[derive(Parser)]
#[command(name = "livewatch")]
#[command(version = VERSION)]
#[command(about = "Monitors live streams and records audience interactions", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the monitor (default)
    Run,

    /// Manage configuration
    Config {
        /// Show effective configuration
        #[arg(long)]
        show: bool,

        /// Reset config file to defaults
        #[arg(long)]
        reset: bool,

        /// Open config file in $EDITOR
        #[arg(long)]
        edit: bool,

        /// Show config file path
        #[arg(long)]
        path: bool,
    },

    /// Manage monitored identities
    Identity {
        #[command(subcommand)]
        action: IdentityCommand,
    },

    /// Start or stop monitoring in a running instance
    Job {
        #[command(subcommand)]
        action: JobCommand,
    },

    /// Create the database schema
    InitDb,
}

#[derive(Subcommand)]
pub enum IdentityCommand {
    /// Register an identity to monitor
    Add {
        name: String,

        /// Free-form notes
        #[arg(long)]
        notes: Option<String>,
    },
    /// List registered identities
    List,
    /// Resume monitoring an identity
    Activate { name: String },
    /// Stop monitoring an identity
    Deactivate { name: String },
}

#[derive(Subcommand)]
pub enum JobCommand {
    Start,
    Stop,
    Status,
}

/// Handle CLI commands. Returns true if a command was handled (exit after).
pub async fn handle_cli(cli: &Cli) -> anyhow::Result<bool> {
    match &cli.command {
        None | Some(Commands::Run) => Ok(false),
        Some(Commands::Config {
            show,
            reset,
            edit,
            path,
        }) => {
            if *path {
                handle_config_path()?;
            } else if *show {
                handle_config_show();
            } else if *reset {
                handle_config_reset()?;
            } else if *edit {
                handle_config_edit()?;
            } else {
                // No flag provided, show help
                println!("Usage: livewatch config [--show|--reset|--edit|--path]");
                println!();
                println!("Options:");
                println!("  --show    Display effective configuration");
                println!("  --reset   Reset config file to defaults");
                println!("  --edit    Open config file in $EDITOR");
                println!("  --path    Show config file path");
            }
            Ok(true)
        }
        Some(Commands::Identity { action }) => {
            let store = open_store()?;
            print!("{}", identity_command(&store, action, Utc::now()).await?);
            Ok(true)
        }
        Some(Commands::Job { action }) => {
            let store = open_store()?;
            print!("{}", job_command(&store, action, Utc::now()).await?);
            Ok(true)
        }
        Some(Commands::InitDb) => {
            let config = Config::from_env();
            let store = PersistenceGateway::open(&config.storage)
                .with_context(|| format!("opening {}", config.storage.db_path.display()))?;
            let version = store
                .run("schema_version", |conn| Ok(schema::current_version(conn)))
                .await?;
            let state = store.run_state().await?;
            println!(
                "Database ready: {} (schema v{}, job {})",
                config.storage.db_path.display(),
                version,
                state
            );
            Ok(true)
        }
    }
}

fn open_store() -> anyhow::Result<PersistenceGateway> {
    let config = Config::from_env();
    PersistenceGateway::open(&config.storage)
        .with_context(|| format!("opening {}", config.storage.db_path.display()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Identity & job handlers (return the text to print)
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) async fn identity_command(
    store: &PersistenceGateway,
    action: &IdentityCommand,
    now: DateTime<Utc>,
) -> anyhow::Result<String> {
    let out = match action {
        IdentityCommand::Add { name, notes } => {
            let name = name.trim();
            anyhow::ensure!(!name.is_empty(), "identity name must not be empty");
            if store.add_identity(name, notes.as_deref(), now).await? {
                format!("Added {}\n", name)
            } else {
                format!("{} is already registered\n", name)
            }
        }
        IdentityCommand::List => render_identities(&store.list_identities().await?),
        IdentityCommand::Activate { name } => set_active(store, name, true).await?,
        IdentityCommand::Deactivate { name } => set_active(store, name, false).await?,
    };
    Ok(out)
}

async fn set_active(
    store: &PersistenceGateway,
    name: &str,
    active: bool,
) -> anyhow::Result<String> {
    let verb = if active { "Activated" } else { "Deactivated" };
    if store.set_identity_active(name, active).await? {
        Ok(format!("{} {}\n", verb, name.trim()))
    } else {
        anyhow::bail!("unknown identity: {}", name.trim())
    }
}

fn render_identities(identities: &[MonitoredIdentity]) -> String {
    if identities.is_empty() {
        return "No identities registered. Add one with `livewatch identity add <name>`.\n"
            .to_string();
    }

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<24} {:<8} {:>8} {:>12}  {}",
        "NAME", "ACTIVE", "STREAMS", "DURATION", "LAST SEEN"
    );
    for identity in identities {
        let last_seen = identity
            .last_seen
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "{:<24} {:<8} {:>8} {:>12}  {}",
            identity.name,
            if identity.is_active { "yes" } else { "no" },
            identity.total_streams,
            format_duration(identity.total_duration),
            last_seen
        );
    }
    out
}

/// Seconds as `1h02m03s`
fn format_duration(secs: i64) -> String {
    let secs = secs.max(0);
    format!("{}h{:02}m{:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}

pub(crate) async fn job_command(
    store: &PersistenceGateway,
    action: &JobCommand,
    now: DateTime<Utc>,
) -> anyhow::Result<String> {
    let out = match action {
        JobCommand::Start => {
            store.set_run_state(RunState::Started, now).await?;
            "Job set to started\n".to_string()
        }
        JobCommand::Stop => {
            store.set_run_state(RunState::Stopped, now).await?;
            "Job set to stopped\n".to_string()
        }
        JobCommand::Status => {
            let state = store.run_state().await?;
            let active = store.active_identities().await?.len();
            format!("Job is {} ({} active identities)\n", state, active)
        }
    };
    Ok(out)
}

// ─────────────────────────────────────────────────────────────────────────────
// Config handlers
// ─────────────────────────────────────────────────────────────────────────────

fn handle_config_path() -> anyhow::Result<()> {
    let path = Config::config_path().context("could not determine config path")?;
    println!("{}", path.display());
    Ok(())
}

fn handle_config_show() {
    let config = Config::from_env();

    println!("# Effective configuration (env > file > defaults)");
    println!();
    print!("{}", config.to_toml());

    // Show source info
    println!();
    if let Some(path) = Config::config_path() {
        if path.exists() {
            println!("# Source: {}", path.display());
        } else {
            println!("# Source: defaults (no config file)");
        }
    }
}

fn handle_config_reset() -> anyhow::Result<()> {
    let path = Config::config_path().context("could not determine config path")?;

    // Confirm if file exists
    if path.exists() {
        eprint!(
            "Config file exists at {}. Overwrite? [y/N] ",
            path.display()
        );
        std::io::stderr().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Aborted.");
            return Ok(());
        }
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    std::fs::write(&path, Config::default().to_toml())
        .with_context(|| format!("writing {}", path.display()))?;

    println!("Config reset to defaults: {}", path.display());
    Ok(())
}

fn handle_config_edit() -> anyhow::Result<()> {
    let path = Config::config_path().context("could not determine config path")?;

    if !path.exists() {
        Config::ensure_config_exists();
        println!("Created new config file: {}", path.display());
    }

    let editor = std::env::var("EDITOR")
        .or_else(|_| std::env::var("VISUAL"))
        .unwrap_or_else(|_| {
            if cfg!(windows) {
                "notepad".to_string()
            } else {
                "nano".to_string()
            }
        });

    println!("Opening {} with {}", path.display(), editor);

    let status = Command::new(&editor)
        .arg(&path)
        .status()
        .with_context(|| format!("failed to launch editor '{}' (set $EDITOR)", editor))?;
    anyhow::ensure!(status.success(), "editor exited with status: {}", status);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::test_gateway;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_no_subcommand_means_run() {
        let cli = Cli::try_parse_from(["livewatch"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_parses_identity_add_with_notes() {
        let args = ["livewatch", "identity", "add", "alice", "--notes", "vip"];
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Some(Commands::Identity {
                action: IdentityCommand::Add { name, notes },
            }) => {
                assert_eq!(name, "alice");
                assert_eq!(notes.as_deref(), Some("vip"));
            }
            _ => panic!("expected identity add"),
        }
    }

    #[test]
    fn test_parses_init_db() {
        let cli = Cli::try_parse_from(["livewatch", "init-db"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::InitDb)));
    }

    #[tokio::test]
    async fn test_identity_add_list_and_deactivate() {
        let (_dir, store) = test_gateway();

        let out = identity_command(
            &store,
            &IdentityCommand::Add {
                name: " alice ".to_string(),
                notes: None,
            },
            at(),
        )
        .await
        .unwrap();
        assert_eq!(out, "Added alice\n");

        let again = identity_command(
            &store,
            &IdentityCommand::Add {
                name: "alice".to_string(),
                notes: None,
            },
            at(),
        )
        .await
        .unwrap();
        assert!(again.contains("already registered"));

        let listed = identity_command(&store, &IdentityCommand::List, at())
            .await
            .unwrap();
        assert!(listed.contains("alice"));
        assert!(listed.contains("yes"));

        identity_command(
            &store,
            &IdentityCommand::Deactivate {
                name: "alice".to_string(),
            },
            at(),
        )
        .await
        .unwrap();
        assert!(store.active_identities().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_activating_unknown_identity_fails() {
        let (_dir, store) = test_gateway();
        let result = identity_command(
            &store,
            &IdentityCommand::Activate {
                name: "ghost".to_string(),
            },
            at(),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_empty_name_is_rejected() {
        let (_dir, store) = test_gateway();
        let result = identity_command(
            &store,
            &IdentityCommand::Add {
                name: "   ".to_string(),
                notes: None,
            },
            at(),
        )
        .await;
        assert!(result.is_err());
        assert!(store.list_identities().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_job_start_stop_round_trip() {
        let (_dir, store) = test_gateway();

        let status = job_command(&store, &JobCommand::Status, at()).await.unwrap();
        assert!(status.starts_with("Job is stopped"));

        job_command(&store, &JobCommand::Start, at()).await.unwrap();
        assert_eq!(store.run_state().await.unwrap(), RunState::Started);

        job_command(&store, &JobCommand::Stop, at()).await.unwrap();
        assert_eq!(store.run_state().await.unwrap(), RunState::Stopped);
    }

    #[test]
    fn test_duration_formatting() {
        assert_eq!(format_duration(0), "0h00m00s");
        assert_eq!(format_duration(3723), "1h02m03s");
        assert_eq!(format_duration(-5), "0h00m00s");
    }
}
