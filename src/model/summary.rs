use crate::model::Amount;
use chrono::{DateTime, Datelike, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// A calendar month, serialized as `YYYY-MM`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct MonthKey {
    year: i32,
    month: u32,
}

impl MonthKey {
    pub fn new(year: i32, month: u32) -> Self {
        Self { year, month }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }
}

impl From<NaiveDateTime> for MonthKey {
    fn from(value: NaiveDateTime) -> Self {
        Self::new(value.year(), value.month())
    }
}

impl Display for MonthKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// The aggregate of one account's transactions within one calendar month.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct MonthStats {
    pub(crate) transactions_count: u64,
    pub(crate) debit_transactions_count: u64,
    pub(crate) credit_transactions_count: u64,
    pub(crate) total_amount: Amount,
    /// Sum of the absolute values of the debits.
    pub(crate) debit_total: Amount,
    pub(crate) credit_total: Amount,
}

impl MonthStats {
    /// Counts `amount` into the month. Returns `None`, leaving the stats unchanged, if a total
    /// would overflow.
    pub(crate) fn add(&mut self, amount: Amount) -> Option<()> {
        let total_amount = self.total_amount.checked_add(amount)?;
        if amount.is_debit() {
            self.debit_total = self.debit_total.checked_add(amount.abs())?;
            self.debit_transactions_count += 1;
        } else if amount.is_credit() {
            self.credit_total = self.credit_total.checked_add(amount)?;
            self.credit_transactions_count += 1;
        }
        self.total_amount = total_amount;
        self.transactions_count += 1;
        Some(())
    }

    pub fn transactions_count(&self) -> u64 {
        self.transactions_count
    }

    pub fn debit_transactions_count(&self) -> u64 {
        self.debit_transactions_count
    }

    pub fn credit_transactions_count(&self) -> u64 {
        self.credit_transactions_count
    }

    pub fn total_amount(&self) -> Amount {
        self.total_amount
    }

    pub fn debit_average(&self) -> Amount {
        Amount::mean(self.debit_total, self.debit_transactions_count)
    }

    pub fn credit_average(&self) -> Amount {
        Amount::mean(self.credit_total, self.credit_transactions_count)
    }

    fn document(&self, shape: MonthlyShape) -> MonthDocument {
        let counts = matches!(shape, MonthlyShape::Counts | MonthlyShape::Full);
        let sums = matches!(shape, MonthlyShape::Sums | MonthlyShape::Full);
        let full = shape == MonthlyShape::Full;
        MonthDocument {
            transactions_count: self.transactions_count,
            debit_transactions_count: counts.then_some(self.debit_transactions_count),
            credit_transactions_count: counts.then_some(self.credit_transactions_count),
            total_amount: sums.then_some(self.total_amount),
            debit_total: sums.then_some(self.debit_total),
            credit_total: sums.then_some(self.credit_total),
            debit_average: full.then(|| self.debit_average()),
            credit_average: full.then(|| self.credit_average()),
        }
    }
}

/// Controls which fields of `MonthStats` end up in the serialized monthly document.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum MonthlyShape {
    /// Transaction counts only.
    Counts,
    /// The transaction count and amount totals.
    Sums,
    /// Counts, totals and averages.
    #[default]
    Full,
}

serde_plain::derive_display_from_serialize!(MonthlyShape);
serde_plain::derive_fromstr_from_deserialize!(MonthlyShape);

#[derive(Debug, Clone, Serialize)]
struct MonthDocument {
    transactions_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    debit_transactions_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    credit_transactions_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    total_amount: Option<Amount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    debit_total: Option<Amount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    credit_total: Option<Amount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    debit_average: Option<Amount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    credit_average: Option<Amount>,
}

/// The per-month breakdown of one account's transactions, ordered by month.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct MonthlyTransactions(BTreeMap<MonthKey, MonthStats>);

impl MonthlyTransactions {
    pub(crate) fn add(&mut self, occurred_at: NaiveDateTime, amount: Amount) -> Option<()> {
        self.0.entry(occurred_at.into()).or_default().add(amount)
    }

    pub fn get(&self, key: &MonthKey) -> Option<&MonthStats> {
        self.0.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MonthKey, &MonthStats)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Builds the JSON document stored in `reports.monthly_transactions` and sent downstream.
    ///
    /// ```json
    /// { "2024-01": { "transactions_count": 2, "debit_transactions_count": 1, ... } }
    /// ```
    pub fn document(&self, shape: MonthlyShape) -> serde_json::Value {
        let map: BTreeMap<String, MonthDocument> = self
            .0
            .iter()
            .map(|(key, stats)| (key.to_string(), stats.document(shape)))
            .collect();
        // Serializing a map of plain structs cannot fail.
        serde_json::to_value(map).unwrap_or_default()
    }
}

/// The per-account aggregate derived from one run's records.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct AccountSummary {
    pub(crate) account_number: String,
    pub(crate) total_balance: Amount,
    pub(crate) average_debit_amount: Amount,
    pub(crate) average_credit_amount: Amount,
    pub(crate) monthly_transactions: MonthlyTransactions,
    pub(crate) created_at: DateTime<Utc>,
}

impl AccountSummary {
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

    pub fn monthly_transactions(&self) -> &MonthlyTransactions {
        &self.monthly_transactions
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
