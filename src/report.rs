//! Turns the fresh records and the account summaries of one run into the rows to write and the
//! notifications to send. Nothing here performs I/O.

use crate::error::Res;
use crate::model::{AccountSummary, Amount, MonthlyShape, TransactionRecord};
use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The message sent downstream for one account summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    account_number: String,
    total_balance: Amount,
    average_debit_amount: Amount,
    average_credit_amount: Amount,
    monthly_transactions: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl Notification {
    fn new(summary: &AccountSummary, monthly_transactions: serde_json::Value) -> Self {
        Self {
            account_number: summary.account_number().to_string(),
            total_balance: summary.total_balance(),
            average_debit_amount: summary.average_debit_amount(),
            average_credit_amount: summary.average_credit_amount(),
            monthly_transactions,
            created_at: summary.created_at(),
        }
    }

    pub fn account_number(&self) -> &str {
        &self.account_number
    }

    pub fn total_balance(&self) -> Amount {
        self.total_balance
    }

    pub fn average_debit_amount(&self) -> Amount {
        self.average_debit_amount
    }

    pub fn average_credit_amount(&self) -> Amount {
        self.average_credit_amount
    }

    pub fn monthly_transactions(&self) -> &serde_json::Value {
        &self.monthly_transactions
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The message body as it goes on the wire.
    pub fn to_json(&self) -> Res<String> {
        serde_json::to_string(self).context("Unable to serialize the notification")
    }
}

/// A row of the `reports` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryRow {
    pub(crate) account_number: String,
    pub(crate) total_balance: Amount,
    pub(crate) average_debit_amount: Amount,
    pub(crate) average_credit_amount: Amount,
    /// The monthly document, serialized as JSON.
    pub(crate) monthly_transactions: String,
    pub(crate) created_at: DateTime<Utc>,
}

impl SummaryRow {
    fn new(summary: &AccountSummary, monthly_transactions: &serde_json::Value) -> Self {
        Self {
            account_number: summary.account_number().to_string(),
            total_balance: summary.total_balance(),
            average_debit_amount: summary.average_debit_amount(),
            average_credit_amount: summary.average_credit_amount(),
            monthly_transactions: monthly_transactions.to_string(),
            created_at: summary.created_at(),
        }
    }

    pub fn account_number(&self) -> &str {
        &self.account_number
    }

    pub fn total_balance(&self) -> Amount {
        self.total_balance
    }

    pub fn average_debit_amount(&self) -> Amount {
        self.average_debit_amount
    }

    pub fn average_credit_amount(&self) -> Amount {
        self.average_credit_amount
    }

    pub fn monthly_transactions(&self) -> &str {
        &self.monthly_transactions
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Everything that is written and sent for one account.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountBatch {
    account_number: String,
    transactions: Vec<TransactionRecord>,
    summary: SummaryRow,
    notification: Notification,
}

impl AccountBatch {
    pub fn account_number(&self) -> &str {
        &self.account_number
    }

    /// The fresh transactions of this account, to be inserted.
    pub fn transactions(&self) -> &[TransactionRecord] {
        &self.transactions
    }

    pub fn summary(&self) -> &SummaryRow {
        &self.summary
    }

    pub fn notification(&self) -> &Notification {
        &self.notification
    }
}

/// The output of `build`: one batch per account summary, ordered like the summaries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Report {
    batches: Vec<AccountBatch>,
}

impl Report {
    pub fn batches(&self) -> &[AccountBatch] {
        &self.batches
    }

    pub fn transactions(&self) -> impl Iterator<Item = &TransactionRecord> {
        self.batches.iter().flat_map(|b| b.transactions.iter())
    }

    pub fn notifications(&self) -> impl Iterator<Item = &Notification> {
        self.batches.iter().map(|b| &b.notification)
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

/// Pairs each summary with the fresh records of its account.
///
/// A summary may have no fresh records (its rows were all stored by an earlier run), but every
/// fresh record must belong to an account that has a summary.
pub fn build(
    fresh: Vec<TransactionRecord>,
    summaries: Vec<AccountSummary>,
    shape: MonthlyShape,
) -> Res<Report> {
    let mut by_account: HashMap<String, Vec<TransactionRecord>> = HashMap::new();
    for record in fresh {
        by_account
            .entry(record.account_number().to_string())
            .or_default()
            .push(record);
    }

    let batches: Vec<AccountBatch> = summaries
        .into_iter()
        .map(|summary| {
            let monthly = summary.monthly_transactions().document(shape);
            AccountBatch {
                account_number: summary.account_number().to_string(),
                transactions: by_account
                    .remove(summary.account_number())
                    .unwrap_or_default(),
                summary: SummaryRow::new(&summary, &monthly),
                notification: Notification::new(&summary, monthly),
            }
        })
        .collect();

    if let Some(account) = by_account.keys().next() {
        bail!("There is no summary for account '{account}' which has fresh transactions");
    }
    Ok(Report { batches })
}
