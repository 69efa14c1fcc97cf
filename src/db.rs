use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::future::Future;
use std::str::FromStr;

use crate::config::Config;

pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let db_path = &config.db.path;

    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory {}", parent.display())
            })?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;

    tracing::debug!(path = %db_path.display(), "opened connection pool");
    Ok(pool)
}

/// Run `f` against a freshly opened pool and close the pool afterwards.
///
/// The pool is closed on every exit path, including when `f` fails, before
/// the result is handed back to the caller.
pub async fn with_pool<T, F, Fut>(config: &Config, f: F) -> Result<T>
where
    F: FnOnce(SqlitePool) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let pool = connect(config).await?;
    let result = f(pool.clone()).await;
    pool.close().await;
    tracing::debug!("closed connection pool");
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config(dir: &tempfile::TempDir) -> Config {
        let mut config = Config::default();
        config.db.path = dir.path().join("nested").join("archie.sqlite");
        config
    }

    #[tokio::test]
    async fn test_connect_creates_parent_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = temp_config(&dir);
        let pool = connect(&config).await.unwrap();
        assert!(config.db.path.exists());
        pool.close().await;
    }

    #[tokio::test]
    async fn test_with_pool_closes_on_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = temp_config(&dir);

        let mut seen = None;
        let result: Result<()> = with_pool(&config, |pool| {
            seen = Some(pool.clone());
            async move { anyhow::bail!("boom") }
        })
        .await;

        assert!(result.is_err());
        assert!(seen.unwrap().is_closed());
    }

    #[tokio::test]
    async fn test_with_pool_closes_on_success() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = temp_config(&dir);

        let mut seen = None;
        let value = with_pool(&config, |pool| {
            seen = Some(pool.clone());
            async move { Ok(42) }
        })
        .await
        .unwrap();

        assert_eq!(value, 42);
        assert!(seen.unwrap().is_closed());
    }
}
