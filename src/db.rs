use crate::config::AppConfig;
use anyhow::Context;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use std::time::Duration;
use tracing::info;

/// Type alias for a database connection pool
pub type DbPool = DatabaseConnection;

/// Establish a connection pool from application configuration.
pub async fn establish_connection(config: &AppConfig) -> anyhow::Result<DbPool> {
    let mut opt = ConnectOptions::new(config.database_url.clone());
    opt.max_connections(10)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(30))
        .acquire_timeout(Duration::from_secs(8))
        .idle_timeout(Duration::from_secs(600))
        .sqlx_logging(false);

    info!("Connecting to database");
    Database::connect(opt)
        .await
        .context("failed to connect to database")
}

/// Run pending migrations.
pub async fn run_migrations(db: &DbPool) -> anyhow::Result<()> {
    crate::migrator::Migrator::up(db, None)
        .await
        .context("failed to run database migrations")?;
    info!("Database migrations applied");
    Ok(())
}
