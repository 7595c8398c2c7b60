//! fleetd — Fleet Core daemon
//!
//! Runs the Sync Scheduler and serves the Patch Campaign Engine against a
//! Postgres-backed fleet, or invokes a single operational command
//! (`verify-audit`, `trigger-sync`) against a running fleet's data.

use clap::{Parser, Subcommand};
use fleet_observe::FleetMetrics;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "fleetd")]
#[command(about = "Fleet Core daemon")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sync scheduler until interrupted.
    Run,

    /// Walk an organization's audit chain and report any integrity
    /// violations.
    VerifyAudit {
        /// Organization id to verify.
        org_id: Uuid,

        /// Range start, RFC 3339. Defaults to 30 days before now.
        #[arg(long)]
        since: Option<chrono::DateTime<chrono::Utc>>,

        /// Range end, RFC 3339. Defaults to now.
        #[arg(long)]
        until: Option<chrono::DateTime<chrono::Utc>>,
    },

    /// Manually trigger a connector sync outside its schedule.
    TriggerSync { connector_id: Uuid },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("fleetd=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run => run().await,
        Commands::VerifyAudit { org_id, since, until } => verify_audit(org_id, since, until).await,
        Commands::TriggerSync { connector_id } => trigger_sync(connector_id).await,
    }
}

/// Connects to Postgres, failing startup loudly on misconfiguration (spec
/// §6) rather than retrying — an unreachable database is a fatal boot error,
/// not a transient fault the scheduler should poll through.
async fn connect_pool() -> anyhow::Result<fleet_persist::PgPool> {
    fleet_persist::connect_from_env()
        .await
        .map_err(|e| anyhow::anyhow!("failed to connect to database: {e}"))
}

async fn run() -> anyhow::Result<()> {
    let pool = connect_pool().await?;
    let env = fleet_config::env::SchedulerEnv::from_env();
    let metrics = Arc::new(FleetMetrics::new());

    info!(
        poll_interval = ?env.poll_interval,
        max_concurrent_syncs = env.max_concurrent_syncs,
        "starting fleetd"
    );

    let scheduler = fleet_scheduler::Scheduler::new(pool, metrics, env.poll_interval, env.max_concurrent_syncs);

    let shutdown = tokio::signal::ctrl_c();
    tokio::select! {
        _ = scheduler.run() => {}
        res = shutdown => {
            res?;
            info!("shutdown signal received, draining in-flight syncs");
            scheduler.stop().await;
        }
    }

    info!("fleetd exited cleanly");
    Ok(())
}

async fn verify_audit(
    org_id: Uuid,
    since: Option<chrono::DateTime<chrono::Utc>>,
    until: Option<chrono::DateTime<chrono::Utc>>,
) -> anyhow::Result<()> {
    let pool = connect_pool().await?;
    let audit = fleet_audit::AuditSink::new(pool);

    let until = until.unwrap_or_else(chrono::Utc::now);
    let since = since.unwrap_or(until - chrono::Duration::days(30));

    let report = audit.verify_range(org_id, since, until).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.valid {
        error!(org_id = %org_id, violations = report.violations.len(), "audit chain integrity violation found");
        std::process::exit(1);
    }

    Ok(())
}

async fn trigger_sync(connector_id: Uuid) -> anyhow::Result<()> {
    let pool = connect_pool().await?;
    let metrics = Arc::new(FleetMetrics::new());
    let env = fleet_config::env::SchedulerEnv::from_env();

    let scheduler = fleet_scheduler::Scheduler::new(pool, metrics, env.poll_interval, env.max_concurrent_syncs);

    match scheduler.trigger_sync(connector_id).await {
        Ok(()) => {
            info!(connector_id = %connector_id, "sync triggered");
            Ok(())
        }
        Err(e) => {
            error!(connector_id = %connector_id, error = %e, "failed to trigger sync");
            std::process::exit(1);
        }
    }
}
