//! Configuration for the report pipeline.
//!
//! Connection settings come from the command line or the environment (see `args::Common`). Settings
//! that shape the processing itself, such as the column layout of input files, live in an optional
//! JSON settings file.

use crate::args::Common;
use crate::error::{ErrorType, IntoResult, Res};
use crate::model::{ColumnLayout, MonthlyShape};
use crate::{utils, Result};
use anyhow::{anyhow, ensure, Context};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use url::Url;

const APP_NAME: &str = "txn-report";
const CONFIG_VERSION: u8 = 1;
const PUBLISH_ATTEMPTS: u32 = 3;
const PUBLISH_RETRY_DELAY_MS: u64 = 250;

pub(crate) const DATABASE_ENV: &str = "TRANSACTIONS_DB";
pub(crate) const QUEUE_ENV: &str = "EMAIL_NOTIFICATIONS_QUEUE_URL";

/// Everything an invocation needs to process files: where the store is, where notifications go,
/// where input files are read from, and the processing `Settings`.
#[derive(Debug, Clone)]
pub struct Config {
    database_url: String,
    queue_url: Url,
    source_root: PathBuf,
    settings: Settings,
}

impl Config {
    /// Validates the connection settings and constructs a `Config`.
    ///
    /// # Errors
    /// Returns an `ErrorType::Config` error if the database URL or the queue URL is missing or
    /// empty, or if the queue URL is not an `http`, `https` or `file` URL.
    pub fn new(
        database_url: Option<&str>,
        queue_url: Option<&str>,
        source_root: impl Into<PathBuf>,
        settings: Settings,
    ) -> Result<Self> {
        let database_url = required(database_url, "--database-url", DATABASE_ENV)?.to_string();
        let queue_url = parse_queue_url(required(queue_url, "--queue-url", QUEUE_ENV)?)
            .pub_result(ErrorType::Config)?;
        Ok(Self {
            database_url,
            queue_url,
            source_root: source_root.into(),
            settings,
        })
    }

    /// Builds the `Config` from the command line and environment, loading the settings file if one
    /// was given.
    pub async fn load(common: &Common) -> Result<Self> {
        let settings = match common.settings() {
            Some(path) => Settings::load(path).await.pub_result(ErrorType::Config)?,
            None => Settings::default(),
        };
        Self::new(
            common.database_url(),
            common.queue_url(),
            common.source_root(),
            settings,
        )
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn queue_url(&self) -> &Url {
        &self.queue_url
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}

/// Returns the value of a required setting, or a configuration error naming both ways to set it.
pub(crate) fn required<'a>(value: Option<&'a str>, flag: &str, env: &str) -> Result<&'a str> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| anyhow!("Missing required setting: pass {flag} or set {env}"))
        .pub_result(ErrorType::Config)
}

fn parse_queue_url(value: &str) -> Res<Url> {
    let url = Url::parse(value).with_context(|| format!("Invalid queue URL '{value}'"))?;
    ensure!(
        matches!(url.scheme(), "http" | "https" | "file"),
        "Unsupported queue URL scheme '{}', expected http, https or file",
        url.scheme()
    );
    Ok(url)
}

/// Which records the account summaries of a run are computed from.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum SummaryScope {
    /// Every valid record in the file, whether or not an earlier run already stored it.
    #[default]
    File,
    /// Only the records that were not stored before this run.
    New,
}

serde_plain::derive_display_from_serialize!(SummaryScope);
serde_plain::derive_fromstr_from_deserialize!(SummaryScope);

/// The settings file.
///
/// Example:
/// ```json
/// {
///   "app_name": "txn-report",
///   "config_version": 1,
///   "layout": {
///     "delimiter": ",",
///     "transaction_id": 3,
///     "account_number": null,
///     "amount": 2,
///     "occurred_at": 1
///   },
///   "monthly_shape": "full",
///   "summary_scope": "file",
///   "publish_attempts": 3,
///   "publish_retry_delay_ms": 250
/// }
/// ```
///
/// Only `app_name` and `config_version` are required.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Must be "txn-report".
    app_name: String,

    config_version: u8,

    #[serde(default)]
    layout: ColumnLayout,

    #[serde(default)]
    monthly_shape: MonthlyShape,

    #[serde(default)]
    summary_scope: SummaryScope,

    /// How many times a notification is offered to the queue before giving up.
    #[serde(default = "default_publish_attempts")]
    publish_attempts: u32,

    /// The delay before the second attempt. The delay grows linearly with each attempt.
    #[serde(default = "default_publish_retry_delay_ms")]
    publish_retry_delay_ms: u64,
}

fn default_publish_attempts() -> u32 {
    PUBLISH_ATTEMPTS
}

fn default_publish_retry_delay_ms() -> u64 {
    PUBLISH_RETRY_DELAY_MS
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_name: APP_NAME.to_string(),
            config_version: CONFIG_VERSION,
            layout: ColumnLayout::default(),
            monthly_shape: MonthlyShape::default(),
            summary_scope: SummaryScope::default(),
            publish_attempts: PUBLISH_ATTEMPTS,
            publish_retry_delay_ms: PUBLISH_RETRY_DELAY_MS,
        }
    }
}

impl Settings {
    /// Loads and validates a settings file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, if `app_name` or `config_version` do
    /// not match this program, or if `publish_attempts` is zero.
    pub async fn load(path: impl AsRef<Path>) -> Res<Self> {
        let path = path.as_ref();
        let settings: Settings = utils::deserialize(path).await?;
        ensure!(
            settings.app_name == APP_NAME,
            "Invalid app_name in settings file: expected '{}', got '{}'",
            APP_NAME,
            settings.app_name
        );
        ensure!(
            settings.config_version == CONFIG_VERSION,
            "Unsupported config_version {} in settings file, expected {}",
            settings.config_version,
            CONFIG_VERSION
        );
        ensure!(
            settings.publish_attempts > 0,
            "publish_attempts must be at least 1"
        );
        debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Writes the settings as pretty-printed JSON.
    pub async fn save(&self, path: impl AsRef<Path>) -> Res<()> {
        let data = serde_json::to_string_pretty(self).context("Unable to serialize settings")?;
        utils::write(path, data)
            .await
            .context("Unable to write the settings file")
    }

    pub fn with_layout(mut self, layout: ColumnLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_monthly_shape(mut self, monthly_shape: MonthlyShape) -> Self {
        self.monthly_shape = monthly_shape;
        self
    }

    pub fn with_summary_scope(mut self, summary_scope: SummaryScope) -> Self {
        self.summary_scope = summary_scope;
        self
    }

    pub fn with_publish_retries(mut self, attempts: u32, delay: Duration) -> Self {
        self.publish_attempts = attempts.max(1);
        self.publish_retry_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn layout(&self) -> &ColumnLayout {
        &self.layout
    }

    pub fn monthly_shape(&self) -> MonthlyShape {
        self.monthly_shape
    }

    pub fn summary_scope(&self) -> SummaryScope {
        self.summary_scope
    }

    pub fn publish_attempts(&self) -> u32 {
        self.publish_attempts
    }

    pub fn publish_retry_delay(&self) -> Duration {
        Duration::from_millis(self.publish_retry_delay_ms)
    }
}
