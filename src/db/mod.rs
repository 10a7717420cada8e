//! The SQLite store for transactions and account summaries.

pub(crate) mod migrations;

use crate::api::{PersistOutcome, Storage, TransactionIndex};
use crate::error::Res;
use crate::model::DATE_FORMAT;
use crate::report::AccountBatch;
use anyhow::{bail, Context};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::collections::HashSet;
use std::str::FromStr;
use tracing::{debug, trace};

/// The number of ids per `IN (...)` lookup, kept well under SQLite's bound parameter limit.
const LOOKUP_CHUNK: usize = 500;

/// A handle to the store. Cloning it shares the underlying pool.
#[derive(Debug, Clone)]
pub struct Db {
    pool: SqlitePool,
}

impl Db {
    /// - Opens the SQLite database named by `url`, creating the file if it does not exist
    /// - Creates the `schema_version` table if needed
    /// - Migrates the schema up to the current version
    ///
    /// `url` is either a `sqlite:` connection string or a plain file path.
    pub async fn connect(url: &str) -> Res<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid database URL '{url}'"))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .with_context(|| format!("Unable to open the database '{url}'"))?;

        migrations::bootstrap(&pool).await?;
        let version = migrations::version(&pool).await?;
        if version > migrations::CURRENT_VERSION {
            bail!(
                "The database schema is at version {version}, which is newer than the version this \
                program supports ({})",
                migrations::CURRENT_VERSION
            );
        }
        migrations::run(&pool, version, migrations::CURRENT_VERSION).await?;
        debug!("Connected to database '{url}'");
        Ok(Self { pool })
    }

    /// Closes the pool, waiting for connections to be released.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn schema_version(&self) -> Res<i64> {
        migrations::version(&self.pool).await
    }

    #[cfg(test)]
    pub(crate) async fn count_transactions(&self) -> Res<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM transactions")
            .fetch_one(&self.pool)
            .await
            .context("Unable to count transactions")?;
        Ok(count)
    }

    #[cfg(test)]
    pub(crate) async fn transactions(&self) -> Res<Vec<StoredTransaction>> {
        sqlx::query_as(
            "SELECT account_number, amount, transaction_id, date FROM transactions ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .context("Unable to read transactions")
    }

    #[cfg(test)]
    pub(crate) async fn reports(&self) -> Res<Vec<StoredReport>> {
        sqlx::query_as(
            "SELECT account_number, total_balance, average_debit_amount, average_credit_amount, \
             monthly_transactions, created_at FROM reports ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .context("Unable to read reports")
    }
}

#[async_trait::async_trait]
impl TransactionIndex for Db {
    async fn known_ids(&self, ids: &[&str]) -> Res<HashSet<String>> {
        let mut known = HashSet::new();
        for chunk in ids.chunks(LOOKUP_CHUNK) {
            let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(
                "SELECT transaction_id FROM transactions WHERE transaction_id IN (",
            );
            let mut list = query.separated(", ");
            for id in chunk {
                list.push_bind(*id);
            }
            list.push_unseparated(")");

            let rows: Vec<(String,)> = query
                .build_query_as()
                .fetch_all(&self.pool)
                .await
                .context("Unable to look up known transaction ids")?;
            known.extend(rows.into_iter().map(|(id,)| id));
        }
        trace!("{} of {} ids are already stored", known.len(), ids.len());
        Ok(known)
    }
}

#[async_trait::async_trait]
impl Storage for Db {
    async fn persist(&self, batch: &AccountBatch) -> Res<PersistOutcome> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Unable to begin a transaction")?;

        let mut outcome = PersistOutcome::default();
        for record in batch.transactions() {
            let result = sqlx::query(
                "INSERT INTO transactions (account_number, amount, transaction_id, date) \
                 VALUES (?, ?, ?, ?) ON CONFLICT (transaction_id) DO NOTHING",
            )
            .bind(record.account_number())
            .bind(record.amount().to_string())
            .bind(record.transaction_id())
            .bind(record.occurred_at().format(DATE_FORMAT).to_string())
            .execute(&mut *tx)
            .await
            .with_context(|| {
                format!(
                    "Unable to insert transaction '{}'",
                    record.transaction_id()
                )
            })?;
            if result.rows_affected() == 0 {
                outcome.conflicted += 1;
            } else {
                outcome.inserted += 1;
            }
        }

        let summary = batch.summary();
        sqlx::query(
            "INSERT INTO reports (account_number, total_balance, average_debit_amount, \
             average_credit_amount, monthly_transactions, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(summary.account_number())
        .bind(summary.total_balance().to_string())
        .bind(summary.average_debit_amount().to_string())
        .bind(summary.average_credit_amount().to_string())
        .bind(summary.monthly_transactions())
        .bind(summary.created_at().to_rfc3339())
        .execute(&mut *tx)
        .await
        .with_context(|| {
            format!(
                "Unable to insert the report for account '{}'",
                summary.account_number()
            )
        })?;

        tx.commit()
            .await
            .context("Unable to commit the transaction")?;
        debug!(
            "Stored {} transactions and one report for account '{}' ({} already present)",
            outcome.inserted,
            batch.account_number(),
            outcome.conflicted
        );
        Ok(outcome)
    }
}

/// A row of the `transactions` table as stored.
#[cfg(test)]
#[derive(Debug, Clone, Eq, PartialEq, sqlx::FromRow)]
pub(crate) struct StoredTransaction {
    pub(crate) account_number: String,
    pub(crate) amount: String,
    pub(crate) transaction_id: String,
    pub(crate) date: String,
}

/// A row of the `reports` table as stored.
#[cfg(test)]
#[derive(Debug, Clone, Eq, PartialEq, sqlx::FromRow)]
pub(crate) struct StoredReport {
    pub(crate) account_number: String,
    pub(crate) total_balance: String,
    pub(crate) average_debit_amount: String,
    pub(crate) average_credit_amount: String,
    pub(crate) monthly_transactions: String,
    pub(crate) created_at: String,
}
