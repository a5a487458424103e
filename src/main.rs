use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use leasebound::{
    api::start_api_server,
    backends::{AzureServiceBusBackend, AzureSqlBackend, AzureStorageBackend},
    leases::{spawn_reaper, LeaseManager},
    observability::{init_logging, log_config_info},
    storage::{create_pool, get_migration_version, run_migrations, SqlStorage},
    AppConfig, APP_NAME, VERSION,
};
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "leasebound", version, about = "Lease-bound dynamic secrets for Azure")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API and the lease reaper (default)
    Serve,
    /// Apply pending storage migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists; a missing file is not an error.
    // This must happen before any config is read from environment
    if let Err(e) = dotenvy::dotenv() {
        if !e.to_string().contains("not found") {
            eprintln!("Warning: Error loading .env file: {}", e);
        }
    }

    let cli = Cli::parse();
    let config = AppConfig::from_env().context("invalid configuration")?;
    init_logging(&config.observability).context("failed to initialize logging")?;

    info!(app_name = APP_NAME, version = VERSION, "Starting leasebound");
    log_config_info(&config);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Migrate => migrate(config).await,
    }
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let pool = create_pool(&config.database).await.context("failed to open storage")?;
    let storage = Arc::new(SqlStorage::new(pool));

    let limits = config.leases.limits();
    let mut leases = LeaseManager::new(storage, limits);
    leases.mount("azuresql", Arc::new(AzureSqlBackend::new(limits)?))?;
    leases.mount("azurestorage", Arc::new(AzureStorageBackend::new(limits)?))?;
    leases.mount("azureservicebus", Arc::new(AzureServiceBusBackend::new(limits)?))?;
    let leases = Arc::new(leases);

    let reaper = spawn_reaper(leases.clone(), config.leases.reaper_interval);

    start_api_server(&config.server, leases, async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "API server shutdown listener failed");
        }
        info!("Shutdown signal received");
    })
    .await?;

    reaper.abort();
    info!("leasebound stopped");
    Ok(())
}

async fn migrate(config: AppConfig) -> anyhow::Result<()> {
    let database = leasebound::config::DatabaseConfig { auto_migrate: false, ..config.database };
    let pool = create_pool(&database).await.context("failed to open storage")?;

    run_migrations(&pool).await?;
    let version = get_migration_version(&pool).await?;
    info!(version, "Migrations applied");
    Ok(())
}
