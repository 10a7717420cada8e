use crate::error::Res;
use crate::model::Amount;
use anyhow::bail;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// The canonical timestamp format, used by upstream exports and by the `transactions` table.
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const DAY_FORMAT: &str = "%Y-%m-%d";

/// One parsed transaction line from an input file.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TransactionRecord {
    transaction_id: String,
    account_number: String,
    amount: Amount,
    occurred_at: NaiveDateTime,
}

impl TransactionRecord {
    pub fn new(
        transaction_id: impl Into<String>,
        account_number: impl Into<String>,
        amount: Amount,
        occurred_at: NaiveDateTime,
    ) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            account_number: account_number.into(),
            amount,
            occurred_at,
        }
    }

    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    pub fn account_number(&self) -> &str {
        &self.account_number
    }

    pub fn amount(&self) -> Amount {
        self.amount
    }

    pub fn occurred_at(&self) -> NaiveDateTime {
        self.occurred_at
    }
}

/// Parses a timestamp in any of the accepted formats. A plain date is taken as midnight.
///
/// Accepted: `2024-01-05 13:45:00`, `2024-01-05T13:45:00`, `2024-01-05T13:45:00+02:00` (RFC 3339,
/// the offset is dropped and the local wall time kept) and `2024-01-05`.
pub fn parse_timestamp(s: &str) -> Res<NaiveDateTime> {
    let s = s.trim();
    if let Ok(ts) = NaiveDateTime::parse_from_str(s, DATE_FORMAT) {
        return Ok(ts);
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(s, ISO_FORMAT) {
        return Ok(ts);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.naive_local());
    }
    if let Some(ts) = NaiveDate::parse_from_str(s, DAY_FORMAT)
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return Ok(ts);
    }
    bail!("Unable to parse '{s}' as a date")
}
