mod config;
mod http;

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use migration::{Migrator, MigratorTrait};
use platform_authz::{FixedRoleRegistry, MemoryStore, declarations::default_registrations};
use platform_db::{SqlStore, connect};
use platform_obs::{ObsConfig, init_tracing};
use sea_orm::DatabaseConnection;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    config::AppConfig,
    http::{AppState, ServeConfig},
};

#[derive(Parser, Debug)]
#[command(name = "gauge-server", version, about = "Dashboard access-control server")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP server.
    Serve(ServeCommand),
    /// Run database migrations.
    #[command(subcommand)]
    Migrate(MigrateCommand),
    /// Print the fixed roles declared at startup and the built-in roles they are granted to.
    Roles,
}

#[derive(Subcommand, Debug)]
enum MigrateCommand {
    /// Apply pending migrations.
    Up,
    /// Rollback the most recent migration.
    Down,
}

#[derive(Args, Debug)]
struct ServeCommand {
    #[arg(long, default_value = "0.0.0.0")]
    host: std::net::IpAddr,
    #[arg(long, default_value_t = 8080)]
    port: u16,
    #[arg(long, help = "Allow starting even when migrations are pending")]
    allow_dirty: bool,
}

impl From<&ServeCommand> for ServeConfig {
    fn from(value: &ServeCommand) -> Self {
        ServeConfig::new(value.host, value.port)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Arc::new(AppConfig::load()?);
    init_tracing(
        ObsConfig::new("gauge-server")
            .with_filter(config.log_filter.clone())
            .with_otlp_endpoint(config.otlp_endpoint.clone()),
    )?;
    match cli.command {
        Command::Serve(cmd) => run_server(cmd, config).await,
        Command::Migrate(action) => match action {
            MigrateCommand::Up => migrate_up(&config).await,
            MigrateCommand::Down => migrate_down(&config).await,
        },
        Command::Roles => print_roles(),
    }
}

async fn setup_db(config: &AppConfig) -> Result<DatabaseConnection> {
    let url = config
        .database_url
        .as_deref()
        .ok_or_else(|| anyhow!("DATABASE_URL is required for this command"))?;
    connect(url).await.map_err(Into::into)
}

async fn run_server(cmd: ServeCommand, config: Arc<AppConfig>) -> Result<()> {
    let shutdown = CancellationToken::new();
    let state = match config.database_url.as_deref() {
        Some(url) => {
            let db = connect(url).await?;
            ensure_migrations(&db, cmd.allow_dirty).await?;
            AppState::new(config.clone(), Arc::new(SqlStore::new(db)), shutdown)
        }
        None => {
            warn!("DATABASE_URL not set; resource grants are kept in memory");
            AppState::new(config.clone(), Arc::new(MemoryStore::new()), shutdown)
        }
    }
    .context("declaring fixed roles")?;

    if !config.access_control_enabled {
        warn!("access control disabled; org roles decide every check");
    }
    http::serve((&cmd).into(), state).await
}

async fn ensure_migrations(db: &DatabaseConnection, allow_dirty: bool) -> Result<()> {
    let pending = Migrator::get_pending_migrations(db).await?;
    if !pending.is_empty() && !allow_dirty {
        anyhow::bail!(
            "pending migrations detected; run `gauge-server migrate up` or pass --allow-dirty"
        );
    }
    Ok(())
}

async fn migrate_up(config: &AppConfig) -> Result<()> {
    let db = setup_db(config).await?;
    Migrator::up(&db, None).await?;
    info!("database migrations applied");
    Ok(())
}

async fn migrate_down(config: &AppConfig) -> Result<()> {
    let db = setup_db(config).await?;
    Migrator::down(&db, Some(1)).await?;
    info!("most recent migration rolled back");
    Ok(())
}

#[derive(Serialize)]
struct RoleSummary {
    name: String,
    version: i64,
    permissions: usize,
    grants: Vec<&'static str>,
}

fn print_roles() -> Result<()> {
    let registry = FixedRoleRegistry::new();
    registry.declare(default_registrations())?;
    let summary: Vec<RoleSummary> = registry
        .roles()
        .into_iter()
        .map(|role| RoleSummary {
            grants: registry
                .grants_of(&role.name)
                .into_iter()
                .map(|b| b.as_str())
                .collect(),
            permissions: role.permissions.len(),
            version: role.version,
            name: role.name,
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
