use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use tracing::info;

pub mod store;

use crate::error::BenchError;
pub use store::SqlJobStore;

/// Open (creating if needed) the job database at `db_path` and run migrations
pub async fn init_db(db_path: impl AsRef<Path>) -> Result<SqlitePool, BenchError> {
    let db_path = db_path.as_ref();
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            BenchError::DatabaseError(format!(
                "Failed to create database directory '{}': {}",
                parent.display(),
                e
            ))
        })?;
    }

    info!("Opening job database at {}", db_path.display());
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .map_err(|e| BenchError::DatabaseError(format!("Failed to open database: {}", e)))?;
    migrate(pool).await
}

/// Connect to `db_url` and bring the schema up to date
pub async fn connect(db_url: &str, max_connections: u32) -> Result<SqlitePool, BenchError> {
    info!("Connecting to database at {}", db_url);
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect(db_url)
        .await
        .map_err(|e| BenchError::DatabaseError(format!("Failed to connect to database: {}", e)))?;
    migrate(pool).await
}

async fn migrate(pool: SqlitePool) -> Result<SqlitePool, BenchError> {
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| BenchError::DatabaseError(format!("Failed to run migrations: {}", e)))?;
    Ok(pool)
}

/// Single-connection in-memory database, for tests
pub async fn in_memory() -> Result<SqlitePool, BenchError> {
    connect("sqlite::memory:", 1).await
}
