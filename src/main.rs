use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

use solarwatch::clock::{Clock, SystemClock};
use solarwatch::config::{Config, LoggingConfig};
use solarwatch::detect::engine::DetectionEngine;
use solarwatch::findings::{FindingQuery, FindingStore, Scope};
use solarwatch::scheduler::{FleetRunReport, FleetSchedule, RunHistory, RunTrigger};

#[derive(Parser)]
#[command(
    name = "solarwatch",
    about = "Fleet anomaly detection for solar generation telemetry",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (falls back to SOLARWATCH_CONFIG, then /etc/solarwatch/solarwatch.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (API server + fleet scheduler)
    Serve {
        /// Bind address, overriding the config file
        #[arg(long)]
        bind: Option<String>,
    },

    /// Run detection now
    Detect {
        /// A single device
        #[arg(long, conflicts_with_all = ["user", "fleet"])]
        device: Option<String>,

        /// All active devices of one user
        #[arg(long, conflicts_with = "fleet")]
        user: Option<String>,

        /// All active devices
        #[arg(long)]
        fleet: bool,
    },

    /// List findings
    Findings {
        /// Only this user's findings (all users when omitted)
        #[arg(long)]
        user: Option<String>,

        #[arg(long)]
        status: Option<String>,

        #[arg(long)]
        severity: Option<String>,

        /// Finding type, e.g. ZERO_GENERATION
        #[arg(long)]
        kind: Option<String>,

        #[arg(long)]
        limit: Option<usize>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Preview fleet passes in the next N hours
    SchedulePreview {
        /// Hours to preview
        #[arg(long, default_value = "24")]
        hours: u64,
    },

    /// Load users, devices and readings from a JSON file
    Import {
        #[arg(long)]
        file: PathBuf,
    },

    /// Print the effective configuration as TOML
    Config,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_report(report: &FleetRunReport) {
    println!("\n=== Detection pass {} ({}) ===", report.id, report.trigger.as_str());
    println!("Devices scanned:     {}", report.devices_scanned);
    println!("Skipped (no data):   {}", report.devices_skipped);
    println!("Findings created:    {}", report.findings_created);
    println!("Duplicates dropped:  {}", report.findings_suppressed);
    if !report.failures.is_empty() {
        println!("\nFailures:");
        for f in &report.failures {
            println!(" - {}: {}", f.device_id, f.error);
        }
    }
    println!();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::resolve(cli.config.as_deref())?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            tracing::info!(bind = %config.server.bind, "Starting solarwatch daemon");
            solarwatch::serve(config).await?;
        }
        Commands::Detect {
            device,
            user,
            fleet,
        } => {
            let db = solarwatch::open_db(&config)?;
            let engine = DetectionEngine::new(db.clone(), &config, Arc::new(SystemClock));
            if let Some(device) = device {
                let outcome = engine.run_for_device(&device).await?;
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else if let Some(user) = user {
                let report = engine.run_for_user(&user).await?;
                print_report(&report);
            } else if fleet {
                let report = engine.run_for_fleet(RunTrigger::Cli).await?;
                RunHistory::new(db).record(&report).await?;
                print_report(&report);
            } else {
                anyhow::bail!("one of --device, --user or --fleet is required");
            }
        }
        Commands::Findings {
            user,
            status,
            severity,
            kind,
            limit,
            json,
        } => {
            let db = solarwatch::open_db(&config)?;
            let query = FindingQuery {
                kind,
                severity,
                status,
                limit,
                ..Default::default()
            };
            let (scope, filter) = match user {
                Some(user) => (Scope::User(user), query.for_user()?),
                None => (Scope::Fleet, query.for_fleet()?),
            };
            let findings = FindingStore::new(db).list(&scope, &filter).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&findings)?);
            } else if findings.is_empty() {
                println!("No findings.");
            } else {
                println!(
                    "{:<36} | {:<10} | {:<17} | {:<8} | {:<14} | Description",
                    "Id", "Device", "Type", "Severity", "Status"
                );
                println!("{:-<36}-|-{:-<10}-|-{:-<17}-|-{:-<8}-|-{:-<14}-|-{:-<30}", "", "", "", "", "", "");
                for f in findings {
                    println!(
                        "{:<36} | {:<10} | {:<17} | {:<8} | {:<14} | {}",
                        f.id, f.device_id, f.kind, f.severity, f.status, f.description
                    );
                }
            }
        }
        Commands::SchedulePreview { hours } => {
            let schedule = FleetSchedule::parse(&config.scheduler.cron)?;
            let runs = schedule.preview(SystemClock.now(), hours);
            if runs.is_empty() {
                println!("No fleet passes scheduled in next {} hours.", hours);
            } else {
                println!("Upcoming fleet passes (next {} hours, cron '{}'):", hours, schedule.expr());
                for t in runs {
                    println!("{}", t.to_rfc3339());
                }
            }
        }
        Commands::Import { file } => {
            let db = solarwatch::open_db(&config)?;
            let summary = solarwatch::import::import_file(&db, &file).await?;
            println!(
                "Imported {} users, {} devices, {} readings ({} duplicates skipped).",
                summary.users, summary.devices, summary.readings_inserted, summary.readings_duplicate
            );
        }
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
