//! Reduces a set of records to one `AccountSummary` per account.

use crate::error::Res;
use crate::model::{AccountSummary, Amount, MonthlyTransactions, TransactionRecord};
use anyhow::anyhow;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

#[derive(Default)]
struct Accumulator {
    total_balance: Amount,
    debit_total: Amount,
    debit_count: u64,
    credit_total: Amount,
    credit_count: u64,
    monthly: MonthlyTransactions,
}

impl Accumulator {
    /// Returns `None` if one of the account's totals overflows.
    fn add(&mut self, record: &TransactionRecord) -> Option<()> {
        let amount = record.amount();
        self.total_balance = self.total_balance.checked_add(amount)?;
        if amount.is_debit() {
            self.debit_total = self.debit_total.checked_add(amount.abs())?;
            self.debit_count += 1;
        } else if amount.is_credit() {
            self.credit_total = self.credit_total.checked_add(amount)?;
            self.credit_count += 1;
        }
        self.monthly.add(record.occurred_at(), amount)
    }

    fn finish(self, account_number: String, created_at: DateTime<Utc>) -> AccountSummary {
        AccountSummary {
            account_number,
            total_balance: self.total_balance,
            average_debit_amount: Amount::mean(self.debit_total, self.debit_count),
            average_credit_amount: Amount::mean(self.credit_total, self.credit_count),
            monthly_transactions: self.monthly,
            created_at,
        }
    }
}

/// Groups `records` by account number and computes each account's summary.
///
/// Negative amounts are debits and positive amounts are credits. A zero amount contributes to the
/// balance and to the monthly transaction count only. Averages are over absolute values and are
/// zero when an account has no transactions of that kind. The result is ordered by account number
/// and does not depend on the order of `records`.
///
/// Fails if an account's totals grow too large to be represented.
pub fn aggregate<'a>(
    records: impl IntoIterator<Item = &'a TransactionRecord>,
    created_at: DateTime<Utc>,
) -> Res<Vec<AccountSummary>> {
    let mut accounts: BTreeMap<&str, Accumulator> = BTreeMap::new();
    for record in records {
        let account = record.account_number();
        let acc = accounts.entry(account).or_default();
        acc.add(record).ok_or_else(|| {
            anyhow!(
                "The totals of account '{account}' overflow at transaction '{}'",
                record.transaction_id()
            )
        })?;
    }
    Ok(accounts
        .into_iter()
        .map(|(account, acc)| acc.finish(account.to_string(), created_at))
        .collect())
}
