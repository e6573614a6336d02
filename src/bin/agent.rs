use chrono::Utc;
use clap::{Parser, Subcommand};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pingwarden::agent_modules::config::{AgentConfig, DEFAULT_CONFIG_PATH};
use pingwarden::agent_modules::prober::IcmpProber;
use pingwarden::agent_modules::scheduler::{Scheduler, SupervisorExit};
use pingwarden::db::schema::ensure_schema;
use pingwarden::db::services::{alert_service, host_service, probe_service, settings_service};
use pingwarden::version::VERSION;

const RECENT_ALERTS_SHOWN: u64 = 10;

#[derive(Parser, Debug)]
#[command(author, version = VERSION, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Run the monitoring loop until interrupted (default)
    Run,
    /// Probe every enabled host once and exit
    Once,
    /// Print agent liveness, latest results and recent alerts
    Status,
}

fn init_logging(log_dir: &str) {
    // Log to a file: JSON format, daily rotation
    let file_appender = rolling::daily(log_dir, "agent.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    // Log to stdout: human-readable format
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sea_orm=warn,sqlx::query=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

async fn connect(config: &AgentConfig) -> Result<DatabaseConnection, sea_orm::DbErr> {
    let mut opt = ConnectOptions::new(config.database_url.to_owned());
    opt.max_connections(config.max_db_connections)
        .sqlx_logging(false);
    let db = Database::connect(opt).await?;

    if config.auto_create_schema {
        ensure_schema(&db).await?;
    }
    Ok(db)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C.");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM.");
                std::future::pending::<()>().await;
            }
        }
    };
    // No SIGTERM outside unix; Ctrl-C only.
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C."),
        _ = terminate => info!("Received SIGTERM."),
    }
}

async fn run_agent(scheduler: Scheduler) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut supervisor = tokio::spawn(async move { scheduler.supervise(shutdown_rx).await });

    tokio::select! {
        _ = shutdown_signal() => {
            info!("Shutting down. Letting the current host finish.");
            let _ = shutdown_tx.send(true);
            if let Err(e) = supervisor.await {
                error!(error = ?e, "Supervisor task ended abnormally during shutdown.");
            }
            info!("Agent stopped.");
            Ok(())
        }
        exit = &mut supervisor => match exit? {
            SupervisorExit::Shutdown => Ok(()),
            SupervisorExit::RestartsExhausted => {
                Err("scheduler restart limit reached; see log for the last failure".into())
            }
        },
    }
}

async fn print_status(db: &DatabaseConnection) -> Result<(), sea_orm::DbErr> {
    let (run_state, liveness) = settings_service::agent_liveness(db, Utc::now()).await?;
    println!("Agent: {run_state} ({liveness})");

    let names: HashMap<i32, String> = host_service::get_enabled_hosts(db)
        .await?
        .into_iter()
        .map(|h| (h.id, format!("{} ({})", h.name, h.address)))
        .collect();

    println!();
    println!("Latest results:");
    for result in probe_service::get_all_latest_results(db).await? {
        let name = names
            .get(&result.host_id)
            .cloned()
            .unwrap_or_else(|| format!("host #{} (disabled)", result.host_id));
        let state = if result.success { "up" } else { "DOWN" };
        let latency = result
            .latency_ms
            .map(|ms| format!("{ms:.2} ms"))
            .unwrap_or_else(|| "-".to_string());
        println!("  {name:<40} {state:<5} {latency:>10}  {}", result.recorded_at.to_rfc3339());
    }

    println!();
    println!("Recent alerts:");
    for alert in alert_service::get_recent_alerts(db, RECENT_ALERTS_SHOWN).await? {
        println!("  {}  [{}] {}", alert.created_at.to_rfc3339(), alert.kind, alert.message);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    // Logging needs `log_dir`, so configuration errors go to stderr.
    let config = match AgentConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load agent configuration: {e}");
            return Err(e.into());
        }
    };

    init_logging(&config.log_dir);
    info!(version = VERSION, config = ?args.config, "Starting agent...");

    let db = match connect(&config).await {
        Ok(db) => db,
        Err(e) => {
            error!(error = %e, "Failed to connect to the database.");
            return Err(e.into());
        }
    };

    // No subcommand means the long-running agent.
    let command = args.command.unwrap_or(Command::Run);
    if command == Command::Status {
        print_status(&db).await?;
        return Ok(());
    }

    let prober = match IcmpProber::new(config.retry_policy()) {
        Ok(prober) => Arc::new(prober),
        Err(e) => {
            error!(error = %e, "Failed to open an ICMP socket. Raw socket permission is required.");
            return Err(e.into());
        }
    };
    let scheduler = Scheduler::new(db, prober, config.scheduler_settings());

    match command {
        Command::Once => {
            let summary = scheduler.probe_all_once().await?;
            if summary.host_failures > 0 {
                warn!(failures = summary.host_failures, "Some hosts could not be processed.");
            }
            info!(
                hosts_probed = summary.hosts_probed,
                alerts_emitted = summary.alerts_emitted,
                "One-shot probe pass finished."
            );
            Ok(())
        }
        _ => run_agent(scheduler).await,
    }
}
