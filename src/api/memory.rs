//! In-memory implementations of the collaborator traits, used to run the whole pipeline in tests
//! without touching a filesystem, a database or a network.

use crate::api::{PersistOutcome, Queue, Source, Storage, TransactionIndex};
use crate::error::Res;
use crate::model::{FileLocator, TransactionRecord};
use crate::report::{AccountBatch, Notification, SummaryRow};
use anyhow::{bail, Context};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Serves file content from a map.
#[derive(Debug, Default)]
pub(crate) struct MemorySource {
    files: HashMap<FileLocator, Vec<u8>>,
}

impl MemorySource {
    pub(crate) fn with_file(
        mut self,
        bucket: &str,
        key: &str,
        content: impl Into<Vec<u8>>,
    ) -> Self {
        self.files
            .insert(FileLocator::new(bucket, key), content.into());
        self
    }
}

#[async_trait::async_trait]
impl Source for MemorySource {
    async fn fetch(&self, locator: &FileLocator) -> Res<Vec<u8>> {
        self.files
            .get(locator)
            .cloned()
            .with_context(|| format!("File '{locator}' not found"))
    }
}

#[derive(Debug, Default)]
struct StorageState {
    ids: HashSet<String>,
    transactions: Vec<TransactionRecord>,
    summaries: Vec<SummaryRow>,
}

/// Holds persisted transactions and summaries in memory. Enforces transaction id uniqueness the
/// way the real store does and can be told to fail.
#[derive(Debug, Default)]
pub(crate) struct MemoryStorage {
    state: Mutex<StorageState>,
    fail_lookups: bool,
    fail_persist_for: Option<String>,
}

impl MemoryStorage {
    /// Creates a store that already knows `ids`.
    pub(crate) fn with_ids<'a>(ids: impl IntoIterator<Item = &'a str>) -> Self {
        let storage = Self::default();
        storage
            .state
            .lock()
            .unwrap()
            .ids
            .extend(ids.into_iter().map(String::from));
        storage
    }

    /// Makes every `known_ids` call fail.
    pub(crate) fn failing_lookups(mut self) -> Self {
        self.fail_lookups = true;
        self
    }

    /// Makes `persist` fail for `account_number`.
    pub(crate) fn failing_persist(mut self, account_number: &str) -> Self {
        self.fail_persist_for = Some(account_number.to_string());
        self
    }

    /// Makes ids known without recording a transaction, as if another invocation had just
    /// inserted them.
    pub(crate) fn insert_ids<'a>(&self, ids: impl IntoIterator<Item = &'a str>) {
        self.state
            .lock()
            .unwrap()
            .ids
            .extend(ids.into_iter().map(String::from));
    }

    pub(crate) fn transactions(&self) -> Vec<TransactionRecord> {
        self.state.lock().unwrap().transactions.clone()
    }

    pub(crate) fn summaries(&self) -> Vec<SummaryRow> {
        self.state.lock().unwrap().summaries.clone()
    }
}

#[async_trait::async_trait]
impl TransactionIndex for MemoryStorage {
    async fn known_ids(&self, ids: &[&str]) -> Res<HashSet<String>> {
        if self.fail_lookups {
            bail!("The store is unavailable");
        }
        let state = self.state.lock().unwrap();
        Ok(ids
            .iter()
            .filter(|id| state.ids.contains(**id))
            .map(|id| id.to_string())
            .collect())
    }
}

#[async_trait::async_trait]
impl Storage for MemoryStorage {
    async fn persist(&self, batch: &AccountBatch) -> Res<PersistOutcome> {
        if self.fail_persist_for.as_deref() == Some(batch.account_number()) {
            bail!(
                "The store rejected the batch for account '{}'",
                batch.account_number()
            );
        }
        let mut state = self.state.lock().unwrap();
        let mut outcome = PersistOutcome::default();
        for record in batch.transactions() {
            if state.ids.insert(record.transaction_id().to_string()) {
                state.transactions.push(record.clone());
                outcome.inserted += 1;
            } else {
                outcome.conflicted += 1;
            }
        }
        state.summaries.push(batch.summary().clone());
        Ok(outcome)
    }
}

/// Records published notifications. Publishing for a given account can be made to fail a number
/// of times before it succeeds.
#[derive(Debug, Default)]
pub(crate) struct MemoryQueue {
    published: Mutex<Vec<(String, Notification)>>,
    failures: Mutex<HashMap<String, u32>>,
    attempts: Mutex<u32>,
}

impl MemoryQueue {
    /// Fails the next `times` publish attempts for `account_number`.
    pub(crate) fn failing(self, account_number: &str, times: u32) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(account_number.to_string(), times);
        self
    }

    pub(crate) fn published(&self) -> Vec<(String, Notification)> {
        self.published.lock().unwrap().clone()
    }

    pub(crate) fn attempts(&self) -> u32 {
        *self.attempts.lock().unwrap()
    }
}

#[async_trait::async_trait]
impl Queue for MemoryQueue {
    async fn publish(&self, notification: &Notification) -> Res<String> {
        *self.attempts.lock().unwrap() += 1;
        if let Some(remaining) = self
            .failures
            .lock()
            .unwrap()
            .get_mut(notification.account_number())
        {
            if *remaining > 0 {
                *remaining -= 1;
                bail!("The queue is unavailable");
            }
        }
        let mut published = self.published.lock().unwrap();
        let message_id = format!("msg-{}", published.len() + 1);
        published.push((message_id.clone(), notification.clone()));
        Ok(message_id)
    }
}
