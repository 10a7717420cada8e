//! The narrow interfaces through which the pipeline reaches the systems around it. Input files come
//! from a `Source`, records and summaries go to `Storage`, and notifications go to a `Queue`.

mod files;
#[cfg(test)]
mod memory;
mod queue;

use crate::error::Res;
use crate::model::FileLocator;
use crate::report::{AccountBatch, Notification};
use serde::Serialize;
use std::collections::HashSet;

pub use files::LocalSource;
#[cfg(test)]
pub(crate) use memory::{MemoryQueue, MemorySource, MemoryStorage};
pub use queue::{connect_queue, HttpQueue, SpoolQueue};

/// Fetches the raw content of an input file.
#[async_trait::async_trait]
pub trait Source: Send + Sync {
    async fn fetch(&self, locator: &FileLocator) -> Res<Vec<u8>>;
}

/// A set-membership lookup over the transaction ids that have already been persisted.
#[async_trait::async_trait]
pub trait TransactionIndex: Send + Sync {
    /// Returns the subset of `ids` that is already known.
    async fn known_ids(&self, ids: &[&str]) -> Res<HashSet<String>>;
}

/// The relational store for transactions and account summaries.
#[async_trait::async_trait]
pub trait Storage: TransactionIndex {
    /// Writes one account's transactions and its summary atomically.
    ///
    /// Transactions are insert-or-skip: a row whose `transaction_id` already exists is skipped by
    /// the store's uniqueness constraint and counted in `PersistOutcome::conflicted`. This is what
    /// keeps concurrent invocations over the same file from double-booking a transaction. The
    /// summary row is always inserted.
    async fn persist(&self, batch: &AccountBatch) -> Res<PersistOutcome>;
}

/// The result of `Storage::persist`.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize)]
pub struct PersistOutcome {
    pub(crate) inserted: u64,
    pub(crate) conflicted: u64,
}

impl PersistOutcome {
    pub fn inserted(&self) -> u64 {
        self.inserted
    }

    pub fn conflicted(&self) -> u64 {
        self.conflicted
    }
}

/// Delivers notifications to the downstream report consumer.
#[async_trait::async_trait]
pub trait Queue: Send + Sync {
    /// Publishes one notification and returns the message id assigned to it.
    async fn publish(&self, notification: &Notification) -> Res<String>;
}
