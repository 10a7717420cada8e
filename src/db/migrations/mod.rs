//! Schema migrations for the report store.
//!
//! Each schema version `NN` has two scripts in this directory: `migration_NN_up.sql` takes the
//! schema from `NN-1` to `NN`, and `migration_NN_down.sql` takes it back. The version the store is
//! at is the single row of the `schema_version` table.

use crate::error::Res;
use anyhow::{bail, Context};
use sqlx::SqlitePool;
use tracing::{debug, info};

/// The schema version this build of the program reads and writes.
pub(crate) const CURRENT_VERSION: i64 = 1;

struct Migration {
    version: i64,
    up: &'static str,
    down: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    up: include_str!("migration_01_up.sql"),
    down: include_str!("migration_01_down.sql"),
}];

fn find(version: i64) -> Res<&'static Migration> {
    MIGRATIONS
        .iter()
        .find(|m| m.version == version)
        .with_context(|| format!("There is no migration for schema version {version}"))
}

/// Creates the `schema_version` table at version 0 if the store does not have one yet.
pub(crate) async fn bootstrap(pool: &SqlitePool) -> Res<()> {
    sqlx::query("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)")
        .execute(pool)
        .await
        .context("Unable to create the schema_version table")?;
    sqlx::query(
        "INSERT INTO schema_version (version) \
         SELECT 0 WHERE NOT EXISTS (SELECT 1 FROM schema_version)",
    )
    .execute(pool)
    .await
    .context("Unable to initialize the schema_version table")?;
    Ok(())
}

/// Returns the schema version the store is at.
pub(crate) async fn version(pool: &SqlitePool) -> Res<i64> {
    let (version,): (Option<i64>,) = sqlx::query_as("SELECT MAX(version) FROM schema_version")
        .fetch_one(pool)
        .await
        .context("Unable to read the schema version")?;
    version.context("The schema_version table is empty")
}

/// Moves the schema from `from` to `to`, one version at a time. Every step runs in its own
/// transaction together with the `schema_version` update, so a failed step leaves the store at the
/// last version that was fully applied.
pub(crate) async fn run(pool: &SqlitePool, from: i64, to: i64) -> Res<()> {
    if from == to {
        debug!("Schema is at version {to}, nothing to migrate");
        return Ok(());
    }

    // Check that the whole path exists before touching anything.
    let (low, high) = if from < to { (from, to) } else { (to, from) };
    if low < 0 {
        bail!("Schema version {low} is invalid");
    }
    for version in (low + 1)..=high {
        find(version)?;
    }

    if from < to {
        for version in (from + 1)..=to {
            debug!("Applying migration {version:02} (up)");
            apply(pool, find(version)?.up, version).await?;
        }
    } else {
        for version in ((to + 1)..=from).rev() {
            debug!("Applying migration {version:02} (down)");
            apply(pool, find(version)?.down, version - 1).await?;
        }
    }

    info!("Schema migrated from version {from} to {to}");
    Ok(())
}

async fn apply(pool: &SqlitePool, script: &str, resulting_version: i64) -> Res<()> {
    let mut tx = pool
        .begin()
        .await
        .context("Unable to begin the migration transaction")?;
    sqlx::raw_sql(script)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Migration to schema version {resulting_version} failed"))?;
    sqlx::query("UPDATE schema_version SET version = ?")
        .bind(resulting_version)
        .execute(&mut *tx)
        .await
        .context("Unable to update the schema version")?;
    tx.commit()
        .await
        .context("Unable to commit the migration transaction")?;
    Ok(())
}
