//! deskport - Helpdesk export and migration
//!
//! Main entry point for the deskport CLI.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use deskport::config::{validate_config_result, ConnectorCredentials, DeskportConfig};
use deskport::connectors::{open_source, open_writer, ConnectorKind};
use deskport::export::{verify, ExportOrchestrator};
use deskport::migrate::{MigrateOptions, MigrationEngine};
use std::path::PathBuf;
use std::process;

/// deskport - Export helpdesk data and migrate it between platforms
#[derive(Parser, Debug)]
#[command(name = "deskport")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: ~/.config/deskport/config.yaml)
    #[arg(short, long, env = "DESKPORT_CONFIG")]
    config: Option<PathBuf>,

    /// Show progress (info-level logs)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Export one platform into a directory of JSONL files
    Export {
        /// Source connector (zendesk, freshdesk, kayako, helpscout)
        #[arg(short, long)]
        source: ConnectorKind,

        /// Output directory
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Check an export directory for consistency
    Verify {
        /// Export directory
        #[arg(short, long)]
        from: PathBuf,
    },

    /// Replay an export into another platform
    Migrate {
        /// Export directory
        #[arg(short, long)]
        from: PathBuf,

        /// Target connector
        #[arg(short, long)]
        to: ConnectorKind,

        /// Show what would be created without calling the target
        #[arg(long)]
        dry_run: bool,

        /// Migrate at most N pending tickets
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// List connectors and the environment variables they need
    Connectors,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "info" } else { "warn" };
    if let Err(e) = deskport::logging::init(level) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<DeskportConfig> {
    let config = match path {
        Some(path) => DeskportConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => DeskportConfig::load_default()?,
    };
    validate_config_result(&config)?;
    Ok(config)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Export { source, out } => {
            let config = load_config(cli.config.as_ref())?;
            let creds = ConnectorCredentials::from_env(source)?;
            let mut connector = open_source(&creds, &config)?;

            let orchestrator = ExportOrchestrator::new(&out, config.export.clone());
            let report = orchestrator
                .run(connector.as_mut())
                .await
                .with_context(|| format!("{} export failed", source.display_name()))?;

            println!("{}", report.summary());
            if report.partial_failures > 0 {
                println!(
                    "{} partial failures (see warnings){}",
                    report.partial_failures,
                    if report.failed_sections.is_empty() {
                        String::new()
                    } else {
                        format!("; incomplete sections: {}", report.failed_sections.join(", "))
                    }
                );
            }
        }

        Commands::Verify { from } => {
            let report = verify(&from)?;
            print!("{}", report);
            if !report.is_ok() {
                bail!("{} failed verification", from.display());
            }
        }

        Commands::Migrate {
            from,
            to,
            dry_run,
            limit,
        } => {
            let config = load_config(cli.config.as_ref())?;
            let creds = ConnectorCredentials::from_env(to)?;
            let mut writer = open_writer(&creds, &config)?;

            let engine = MigrationEngine::new(&from);
            let report = engine
                .run(writer.as_mut(), MigrateOptions { dry_run, limit })
                .await
                .with_context(|| format!("migration to {} failed", to.display_name()))?;

            for planned in &report.preview {
                println!(
                    "would create {} \"{}\" (+{} follow-ups)",
                    planned.source_id, planned.subject, planned.follow_ups
                );
            }
            println!("{}", report);
        }

        Commands::Connectors => {
            for kind in ConnectorKind::ALL {
                println!("{} ({}, id prefix {}-)", kind.id(), kind.display_name(), kind.prefix());
                for var in kind.required_env() {
                    let state = if std::env::var(var).map(|v| !v.trim().is_empty()).unwrap_or(false) {
                        "set"
                    } else {
                        "missing"
                    };
                    println!("  {:<24} {}", var, state);
                }
                for var in kind.optional_env() {
                    println!("  {:<24} optional", var);
                }
                println!("  {:<24} optional", kind.base_url_env());
            }
        }
    }

    Ok(())
}
