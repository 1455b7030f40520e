use crate::config::AppConfig;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr};
use sea_orm_migration::MigratorTrait;
use std::time::Duration;
use tracing::{debug, error, info};

/// Type alias for a database connection pool
pub type DbPool = DatabaseConnection;

/// Configuration for database connection
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Database connection URL
    pub url: String,
    /// Maximum number of connections
    pub max_connections: u32,
    /// Minimum number of connections
    pub min_connections: u32,
    /// Connection timeout duration
    pub connect_timeout: Duration,
    /// Acquire connection timeout
    pub acquire_timeout: Duration,
    /// Log every statement at debug level
    pub sqlx_logging: bool,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            acquire_timeout: Duration::from_secs(30),
            sqlx_logging: false,
        }
    }
}

impl DbConfig {
    /// Single-connection in-memory SQLite, used by tests and local tooling.
    ///
    /// An in-memory SQLite database lives and dies with its connection, so the
    /// pool is pinned to exactly one.
    pub fn in_memory_sqlite() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        }
    }
}

impl From<&AppConfig> for DbConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            url: cfg.database_url.clone(),
            max_connections: cfg.db_max_connections,
            min_connections: cfg.db_min_connections,
            connect_timeout: Duration::from_secs(cfg.db_connect_timeout_secs),
            acquire_timeout: Duration::from_secs(cfg.db_acquire_timeout_secs),
            sqlx_logging: cfg.log_level.eq_ignore_ascii_case("trace"),
        }
    }
}

/// Establishes a connection pool to the database with custom configuration
pub async fn establish_connection_with_config(config: &DbConfig) -> Result<DbPool, DbErr> {
    debug!(
        max_connections = config.max_connections,
        "Configuring database connection"
    );

    let mut opt = ConnectOptions::new(config.url.clone());
    opt.max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(config.connect_timeout)
        .acquire_timeout(config.acquire_timeout)
        .sqlx_logging(config.sqlx_logging);

    let db_pool = Database::connect(opt).await.map_err(|e| {
        error!("Database connection establishment failed: {}", e);
        e
    })?;

    info!(
        backend = ?db_pool.get_database_backend(),
        "Database connection pool established"
    );
    Ok(db_pool)
}

/// Establish DB pool using AppConfig tuning
pub async fn establish_connection_from_app_config(cfg: &AppConfig) -> Result<DbPool, DbErr> {
    let db_cfg: DbConfig = cfg.into();
    establish_connection_with_config(&db_cfg).await
}

/// Runs all pending schema migrations
pub async fn run_migrations(pool: &DbPool) -> Result<(), DbErr> {
    info!("Running database migrations");
    let start = std::time::Instant::now();

    let result = crate::migrator::Migrator::up(pool, None).await;

    let elapsed = start.elapsed();
    match &result {
        Ok(_) => info!(
            "Database migrations completed successfully in {:?}",
            elapsed
        ),
        Err(e) => error!("Database migrations failed after {:?}: {}", elapsed, e),
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_migrations_twice() {
        let pool = establish_connection_with_config(&DbConfig::in_memory_sqlite())
            .await
            .expect("Failed to establish connection");
        assert!(run_migrations(&pool).await.is_ok());
        assert!(run_migrations(&pool).await.is_ok());
    }

    #[test]
    fn pool_settings_follow_app_config() {
        let mut cfg = AppConfig::default();
        cfg.db_max_connections = 4;
        cfg.db_acquire_timeout_secs = 3;
        let db_cfg = DbConfig::from(&cfg);
        assert_eq!(db_cfg.max_connections, 4);
        assert_eq!(db_cfg.acquire_timeout, Duration::from_secs(3));
        assert!(!db_cfg.sqlx_logging);
    }
}
