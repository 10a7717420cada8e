//! Drops records whose transaction id has already been seen, either earlier in the same file or in
//! storage. Duplicates are expected when a trigger is delivered more than once, so they are counted
//! rather than treated as errors.

use crate::api::TransactionIndex;
use crate::error::Res;
use crate::model::TransactionRecord;
use std::collections::HashSet;
use tracing::debug;

/// The records of one file, split by whether storage already knows their transaction id.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Deduplicated {
    fresh: Vec<TransactionRecord>,
    known: Vec<TransactionRecord>,
    repeated: u64,
}

impl Deduplicated {
    /// Records whose transaction id is not yet in storage.
    pub fn fresh(&self) -> &[TransactionRecord] {
        &self.fresh
    }

    /// Records whose transaction id is already in storage.
    pub fn known(&self) -> &[TransactionRecord] {
        &self.known
    }

    /// Rows dropped because their transaction id appeared earlier in the same file.
    pub fn repeated(&self) -> u64 {
        self.repeated
    }

    /// All duplicates, from storage or from the file itself.
    pub fn skipped(&self) -> u64 {
        self.known.len() as u64 + self.repeated
    }

    /// Every distinct record of the file, fresh or not.
    pub fn distinct(&self) -> impl Iterator<Item = &TransactionRecord> {
        self.fresh.iter().chain(self.known.iter())
    }

    pub fn into_fresh(self) -> Vec<TransactionRecord> {
        self.fresh
    }
}

/// Splits `records` into fresh and known records by asking `index` about their transaction ids.
///
/// Only the transaction id is compared. If the same id appears more than once in `records`, the
/// first occurrence is kept.
pub async fn deduplicate<I>(
    records: impl IntoIterator<Item = TransactionRecord>,
    index: &I,
) -> Res<Deduplicated>
where
    I: TransactionIndex + ?Sized,
{
    let mut seen = HashSet::new();
    let mut unique = Vec::new();
    let mut repeated = 0;
    for record in records {
        if seen.insert(record.transaction_id().to_string()) {
            unique.push(record);
        } else {
            debug!(
                "Dropping repeated transaction id '{}' within the file",
                record.transaction_id()
            );
            repeated += 1;
        }
    }

    if unique.is_empty() {
        return Ok(Deduplicated {
            repeated,
            ..Default::default()
        });
    }

    let ids: Vec<&str> = unique.iter().map(|r| r.transaction_id()).collect();
    let known_ids = index.known_ids(&ids).await?;
    let (known, fresh): (Vec<_>, Vec<_>) = unique
        .into_iter()
        .partition(|r| known_ids.contains(r.transaction_id()));

    debug!(
        "{} fresh records, {} already stored, {} repeated in the file",
        fresh.len(),
        known.len(),
        repeated
    );
    Ok(Deduplicated {
        fresh,
        known,
        repeated,
    })
}
