//! These structs provide the CLI interface for txn-report.

use crate::model::FileLocator;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::filter::LevelFilter;

/// txn-report: turns transaction files into per-account reports.
///
/// Each invocation processes one delimited transaction file: it parses the rows, drops transactions
/// that were already recorded, computes a summary per account (balance, average debit and credit,
/// and a per-month breakdown), stores the new transactions and the summaries, and sends one
/// notification per account to the report queue.
///
/// The file to process is named either directly (process) or by an object-storage change
/// notification (handle).
#[derive(Debug, Parser, Clone)]
#[command(name = "txn-report", version)]
pub struct Args {
    #[clap(flatten)]
    common: Common,

    #[command(subcommand)]
    command: Command,
}

impl Args {
    pub fn common(&self) -> &Common {
        &self.common
    }

    pub fn command(&self) -> &Command {
        &self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create the database if needed and bring its schema up to date.
    ///
    /// If --settings names a file that does not exist yet, a settings file with the default values
    /// is written there.
    Init,
    /// Process one file, named by its bucket and key.
    Process(ProcessArgs),
    /// Process the files named by an object-storage change notification.
    ///
    /// The notification is read from --event, or from stdin when --event is not given.
    Handle(HandleArgs),
}

/// Arguments common to all subcommands.
#[derive(Debug, Parser, Clone)]
pub struct Common {
    /// The logging verbosity. One of, from least to most verbose:
    /// off, error, warn, info, debug, trace
    ///
    /// This can be overridden by RUST_LOG.
    #[arg(long, default_value_t = LevelFilter::INFO)]
    log_level: LevelFilter,

    /// The SQLite database that holds transactions and reports, e.g. sqlite:///var/lib/reports.db
    #[arg(long, env = "TRANSACTIONS_DB")]
    database_url: Option<String>,

    /// Where notifications are sent: an http(s) endpoint, or a file:// spool file.
    #[arg(long, env = "EMAIL_NOTIFICATIONS_QUEUE_URL")]
    queue_url: Option<String>,

    /// The directory under which `<bucket>/<key>` input files are found.
    #[arg(long, env = "TXN_REPORT_SOURCE_ROOT", default_value = ".")]
    source_root: PathBuf,

    /// A JSON settings file. Built-in defaults are used when this is not given.
    #[arg(long, env = "TXN_REPORT_SETTINGS")]
    settings: Option<PathBuf>,
}

impl Common {
    pub fn log_level(&self) -> LevelFilter {
        self.log_level
    }

    pub fn database_url(&self) -> Option<&str> {
        self.database_url.as_deref()
    }

    pub fn queue_url(&self) -> Option<&str> {
        self.queue_url.as_deref()
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    pub fn settings(&self) -> Option<&Path> {
        self.settings.as_deref()
    }
}

/// Args for the `txn-report process` command.
#[derive(Debug, Parser, Clone)]
pub struct ProcessArgs {
    /// The bucket, or top-level directory under --source-root, that holds the file.
    #[arg(long)]
    bucket: String,

    /// The object key of the file, e.g. 424248018_transactions_report.csv
    #[arg(long)]
    key: String,
}

impl ProcessArgs {
    pub fn locator(&self) -> FileLocator {
        FileLocator::new(&self.bucket, &self.key)
    }
}

/// Args for the `txn-report handle` command.
#[derive(Debug, Parser, Clone)]
pub struct HandleArgs {
    /// A file holding the notification JSON. Read from stdin if omitted.
    #[arg(long)]
    event: Option<PathBuf>,
}

impl HandleArgs {
    pub fn event(&self) -> Option<&Path> {
        self.event.as_deref()
    }
}
