//! Shared test utilities for creating test environments.
//!
//! This module is only compiled when running tests (`#[cfg(test)]`).

use crate::api::LocalSource;
use crate::db::Db;
use crate::{Config, Settings};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use url::Url;

/// A temporary directory holding a migrated SQLite database, a source root for input files and a
/// spool file that stands in for the notification queue.
/// Holds TempDir to keep the directory alive for the duration of the test.
pub struct TestEnv {
    temp_dir: TempDir,
    database_url: String,
    db: Db,
}

impl TestEnv {
    /// Creates the directory layout and opens the database.
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("source")).unwrap();
        let database_url = format!(
            "sqlite://{}",
            temp_dir.path().join("reports.sqlite").display()
        );
        let db = Db::connect(&database_url).await.unwrap();
        Self {
            temp_dir,
            database_url,
            db,
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn source_root(&self) -> PathBuf {
        self.path().join("source")
    }

    pub fn source(&self) -> LocalSource {
        LocalSource::new(self.source_root())
    }

    pub fn spool_path(&self) -> PathBuf {
        self.path().join("outbox.jsonl")
    }

    /// A `Config` with default settings (and no retry delay) that publishes to the spool file.
    pub fn config(&self) -> Config {
        let settings = Settings::default().with_publish_retries(1, std::time::Duration::ZERO);
        let queue_url = Url::from_file_path(self.spool_path()).unwrap();
        Config::new(
            Some(&self.database_url),
            Some(queue_url.as_str()),
            self.source_root(),
            settings,
        )
        .unwrap()
    }

    /// Writes an input file at `<source root>/<bucket>/<key>`.
    pub async fn write_file(&self, bucket: &str, key: &str, content: &str) {
        let path = self.source_root().join(bucket).join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.unwrap();
        }
        tokio::fs::write(path, content).await.unwrap();
    }

    /// The spooled notifications, one JSON value per line. Empty if nothing was published.
    pub async fn spooled(&self) -> Vec<Value> {
        match tokio::fs::read_to_string(self.spool_path()).await {
            Ok(text) => text
                .lines()
                .map(|line| serde_json::from_str(line).unwrap())
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}
