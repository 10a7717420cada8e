//! Types that represent the core data model, such as `TransactionRecord` and `AccountSummary`.
mod amount;
mod layout;
mod locator;
mod record;
mod summary;

pub use amount::{Amount, AmountError};
pub use layout::{Column, ColumnLayout, Positions};
pub use locator::FileLocator;
pub use record::{parse_timestamp, TransactionRecord, DATE_FORMAT};
pub use summary::{AccountSummary, MonthKey, MonthStats, MonthlyShape, MonthlyTransactions};
