//! txn-report turns delimited transaction files into per-account reports.
//!
//! A file is parsed into `model::TransactionRecord`s, records that were already stored are dropped,
//! each account is summarized, and the new transactions and summaries are stored before one
//! `report::Notification` per account is published. `pipeline::Pipeline` runs these steps against
//! the collaborator traits in `api`; `commands` wires them to the real database and queue.

mod aggregate;
pub mod api;
pub mod args;
pub mod commands;
mod config;
pub mod db;
pub mod dedup;
mod error;
pub mod model;
pub mod parser;
pub mod pipeline;
pub mod report;
mod utils;

#[cfg(test)]
mod test;

pub use aggregate::aggregate;
pub use config::{Config, Settings, SummaryScope};
pub use error::{Error, ErrorType, Result};
