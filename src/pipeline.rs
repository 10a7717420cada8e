//! Runs one file through the whole process: parse, deduplicate, aggregate, build the report, then
//! store and notify account by account.

use crate::aggregate::aggregate;
use crate::api::{Queue, Source, Storage};
use crate::config::{Settings, SummaryScope};
use crate::dedup::deduplicate;
use crate::error::{ErrorType, IntoResult};
use crate::model::{FileLocator, TransactionRecord};
use crate::report::{self, Notification};
use crate::{parser, Result};
use anyhow::Context;
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};

/// The outcome of publishing one notification.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct Delivery {
    account_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Delivery {
    pub fn account_number(&self) -> &str {
        &self.account_number
    }

    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_delivered(&self) -> bool {
        self.message_id.is_some()
    }
}

/// What happened while processing one file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingResult {
    locator: FileLocator,
    records_parsed: u64,
    records_rejected: u64,
    /// Duplicates: rows already stored, rows repeated within the file, and rows another invocation
    /// stored while this one was running.
    records_skipped: u64,
    transactions_inserted: u64,
    summaries_produced: u64,
    notifications: Vec<Notification>,
    deliveries: Vec<Delivery>,
}

impl ProcessingResult {
    fn new(locator: FileLocator) -> Self {
        Self {
            locator,
            records_parsed: 0,
            records_rejected: 0,
            records_skipped: 0,
            transactions_inserted: 0,
            summaries_produced: 0,
            notifications: Vec::new(),
            deliveries: Vec::new(),
        }
    }

    pub fn locator(&self) -> &FileLocator {
        &self.locator
    }

    pub fn records_parsed(&self) -> u64 {
        self.records_parsed
    }

    pub fn records_rejected(&self) -> u64 {
        self.records_rejected
    }

    pub fn records_skipped(&self) -> u64 {
        self.records_skipped
    }

    pub fn transactions_inserted(&self) -> u64 {
        self.transactions_inserted
    }

    pub fn summaries_produced(&self) -> u64 {
        self.summaries_produced
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    pub fn deliveries(&self) -> &[Delivery] {
        &self.deliveries
    }

    pub fn failed_deliveries(&self) -> usize {
        self.deliveries.iter().filter(|d| !d.is_delivered()).count()
    }
}

/// Wires the processing stages to the collaborators of one invocation.
pub struct Pipeline<'a> {
    settings: &'a Settings,
    source: &'a dyn Source,
    storage: &'a dyn Storage,
    queue: &'a dyn Queue,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        settings: &'a Settings,
        source: &'a dyn Source,
        storage: &'a dyn Storage,
        queue: &'a dyn Queue,
    ) -> Self {
        Self {
            settings,
            source,
            storage,
            queue,
        }
    }

    /// Processes the file at `locator`.
    ///
    /// Malformed rows and duplicates are counted, not raised. A notification that cannot be
    /// published is recorded in the result and does not stop the other accounts.
    ///
    /// # Errors
    /// - `ErrorType::Fetch` if the file cannot be read.
    /// - `ErrorType::Request` if an account's totals are too large to represent. Nothing is stored
    ///   in that case, and processing the same file again fails the same way.
    /// - `ErrorType::Database` if a storage operation fails. Accounts persisted before the failure
    ///   stay persisted, and processing the file again is safe.
    pub async fn run(&self, locator: &FileLocator) -> Result<ProcessingResult> {
        info!("Processing {locator}");
        let mut result = ProcessingResult::new(locator.clone());

        let content = self
            .source
            .fetch(locator)
            .await
            .with_context(|| format!("Unable to fetch {locator}"))
            .pub_result(ErrorType::Fetch)?;

        let fallback_account = locator.account_number();
        if fallback_account.is_none() {
            debug!("No account number could be derived from the key of {locator}");
        }
        let mut rows = parser::parse(&content, self.settings.layout(), fallback_account);
        let records: Vec<TransactionRecord> = rows.by_ref().collect();
        let stats = rows.stats();
        result.records_parsed = stats.parsed();
        result.records_rejected = stats.rejected();
        if stats.rejected() > 0 {
            warn!("{} rows of {locator} were rejected", stats.rejected());
        }
        if let Some(line) = rows.header_line() {
            debug!("Line {line} of {locator} was read as a header row");
        }

        let dedup = deduplicate(records, self.storage)
            .await
            .context("Unable to check for known transactions")
            .pub_result(ErrorType::Database)?;
        result.records_skipped = dedup.skipped();
        if dedup.skipped() > 0 {
            info!("Skipping {} duplicate transactions", dedup.skipped());
        }

        let created_at = Utc::now();
        let summaries = match self.settings.summary_scope() {
            SummaryScope::File => aggregate(dedup.distinct(), created_at),
            SummaryScope::New => aggregate(dedup.fresh(), created_at),
        }
        .pub_result(ErrorType::Request)?;
        let report = report::build(dedup.into_fresh(), summaries, self.settings.monthly_shape())
            .pub_result(ErrorType::Internal)?;

        for batch in report.batches() {
            let outcome = self
                .storage
                .persist(batch)
                .await
                .with_context(|| {
                    format!(
                        "Unable to store the transactions and report for account '{}'",
                        batch.account_number()
                    )
                })
                .pub_result(ErrorType::Database)?;
            result.transactions_inserted += outcome.inserted();
            result.records_skipped += outcome.conflicted();
            result.summaries_produced += 1;

            let delivery = self.publish(batch.notification()).await;
            result.notifications.push(batch.notification().clone());
            result.deliveries.push(delivery);
        }

        info!(
            "Processed {locator}: {} parsed, {} rejected, {} skipped, {} inserted, {} summaries",
            result.records_parsed,
            result.records_rejected,
            result.records_skipped,
            result.transactions_inserted,
            result.summaries_produced
        );
        Ok(result)
    }

    /// Publishes `notification`, retrying with a linearly growing delay.
    async fn publish(&self, notification: &Notification) -> Delivery {
        let account_number = notification.account_number().to_string();
        let attempts = self.settings.publish_attempts().max(1);
        let mut attempt = 1;
        loop {
            match self.queue.publish(notification).await {
                Ok(message_id) => {
                    debug!("Sent the report for account '{account_number}' as {message_id}");
                    return Delivery {
                        account_number,
                        message_id: Some(message_id),
                        error: None,
                    };
                }
                Err(e) if attempt < attempts => {
                    warn!(
                        "Sending the report for account '{account_number}' failed, attempt \
                        {attempt} of {attempts}: {e:#}"
                    );
                    tokio::time::sleep(self.settings.publish_retry_delay() * attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        "Unable to send the report for account '{account_number}' after \
                        {attempts} attempts: {e:#}"
                    );
                    return Delivery {
                        account_number,
                        message_id: None,
                        error: Some(format!("{e:#}")),
                    };
                }
            }
        }
    }
}
