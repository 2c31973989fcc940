//! Settings table accessors (key-value)

use sqlx::{Pool, Sqlite};
use thesis_common::{Error, Result};

use crate::utils::db_retry::DEFAULT_MAX_LOCK_WAIT_MS;

const MAX_LOCK_WAIT_KEY: &str = "database_max_lock_wait_ms";

/// Upper bound for lock retries on writes
pub async fn get_max_lock_wait_ms(db: &Pool<Sqlite>) -> Result<u64> {
    get_setting(db, MAX_LOCK_WAIT_KEY)
        .await
        .map(|opt| opt.unwrap_or(DEFAULT_MAX_LOCK_WAIT_MS))
}

/// Read and parse a setting; `None` when unset
pub async fn get_setting<T>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await
        .map_err(Error::Database)?;

    match row {
        Some((value,)) => {
            let parsed = value
                .parse::<T>()
                .map_err(|e| Error::Config(format!("Parse setting '{}' failed: {}", key, e)))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

/// Insert or update a setting
pub async fn set_setting<T>(db: &Pool<Sqlite>, key: &str, value: T) -> Result<()>
where
    T: std::fmt::Display,
{
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await
    .map_err(Error::Database)?;

    Ok(())
}
