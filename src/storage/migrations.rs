//! # Storage Migration Management
//!
//! Schema evolution for the SQLite key-value store. Migrations are embedded
//! in the binary and applied in version order on startup when `auto_migrate`
//! is enabled. Each applied version is recorded in `_leasebound_migrations`.

use crate::errors::{Error, Result};
use crate::storage::DbPool;
use sqlx::Row;
use tracing::{error, info};

/// Embedded migrations as `(version, description, sql)`.
const MIGRATIONS: &[(i64, &str, &str)] = &[
    (
        20250101000001,
        "create_kv_entries",
        r#"
        CREATE TABLE IF NOT EXISTS kv_entries (
            key TEXT PRIMARY KEY NOT NULL,
            value BLOB NOT NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );
        "#,
    ),
];

/// Run all pending storage migrations
pub async fn run_migrations(pool: &DbPool) -> Result<()> {
    info!("Starting storage migration process");

    create_migration_table(pool).await?;
    let applied = get_applied_migration_versions(pool).await?;

    let mut migrations_run = 0;
    for (version, description, sql) in MIGRATIONS {
        if applied.contains(version) {
            info!(version = version, "Migration already applied: {}", description);
            continue;
        }

        info!(version = version, "Running migration: {}", description);
        let start_time = std::time::Instant::now();

        let mut tx = pool
            .begin()
            .await
            .map_err(|e| Error::storage(e, "Failed to start migration transaction"))?;

        sqlx::raw_sql(sql).execute(&mut *tx).await.map_err(|e| {
            error!(error = %e, migration = description, "Migration failed");
            Error::storage(e, format!("Migration failed: {}", description))
        })?;

        let execution_time = start_time.elapsed().as_millis() as i64;
        sqlx::query(
            "INSERT INTO _leasebound_migrations (version, description, execution_time, installed_on) VALUES (?, ?, ?, ?)",
        )
        .bind(version)
        .bind(description)
        .bind(execution_time)
        .bind(chrono::Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            error!(error = %e, migration = description, "Failed to record migration");
            Error::storage(e, format!("Failed to record migration: {}", description))
        })?;

        tx.commit().await.map_err(|e| Error::storage(e, "Failed to commit migration transaction"))?;

        migrations_run += 1;
        info!(version = version, execution_time_ms = execution_time, "Migration completed: {}", description);
    }

    if migrations_run > 0 {
        info!(count = migrations_run, "Storage migrations completed");
    } else {
        info!("No pending migrations");
    }

    Ok(())
}

async fn create_migration_table(pool: &DbPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS _leasebound_migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            execution_time INTEGER NOT NULL,
            installed_on TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
    "#,
    )
    .execute(pool)
    .await
    .map_err(|e| Error::storage(e, "Failed to create migration tracking table"))?;

    Ok(())
}

async fn get_applied_migration_versions(pool: &DbPool) -> Result<Vec<i64>> {
    let rows = sqlx::query("SELECT version FROM _leasebound_migrations ORDER BY version")
        .fetch_all(pool)
        .await;

    match rows {
        Ok(rows) => Ok(rows.into_iter().map(|row| row.get::<i64, _>("version")).collect()),
        // Table doesn't exist yet on first run
        Err(sqlx::Error::Database(db_err)) if db_err.message().contains("no such table") => {
            Ok(Vec::new())
        }
        Err(e) => Err(Error::storage(e, "Failed to get applied migrations")),
    }
}

/// Get the current migration version (highest applied)
pub async fn get_migration_version(pool: &DbPool) -> Result<i64> {
    let applied = get_applied_migration_versions(pool).await?;
    Ok(applied.into_iter().max().unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_ordered() {
        let versions: Vec<i64> = MIGRATIONS.iter().map(|(v, _, _)| *v).collect();
        let mut sorted = versions.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(versions, sorted);
    }
}
