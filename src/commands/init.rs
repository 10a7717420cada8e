use crate::commands::Out;
use crate::config::{required, Settings, DATABASE_ENV};
use crate::db::Db;
use crate::error::{ErrorType, IntoResult};
use crate::Result;
use anyhow::Context;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// What `init` did.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct InitOutput {
    schema_version: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    settings_written: Option<PathBuf>,
}

impl InitOutput {
    pub fn schema_version(&self) -> i64 {
        self.schema_version
    }

    pub fn settings_written(&self) -> Option<&Path> {
        self.settings_written.as_deref()
    }
}

/// Creates the database if it does not exist, brings its schema up to date and, if `settings`
/// names a file that does not exist yet, writes the default settings there.
///
/// # Errors
/// - `ErrorType::Config` if `database_url` is missing or the settings file cannot be written.
/// - `ErrorType::Database` if the database cannot be opened or migrated.
pub async fn init(database_url: Option<&str>, settings: Option<&Path>) -> Result<Out<InitOutput>> {
    let database_url = required(database_url, "--database-url", DATABASE_ENV)?;

    let db = Db::connect(database_url)
        .await
        .pub_result(ErrorType::Database)?;
    let schema_version = db.schema_version().await.pub_result(ErrorType::Database);
    db.close().await;
    let schema_version = schema_version?;

    let settings_written = match settings {
        Some(path) if !path.exists() => {
            Settings::default()
                .save(path)
                .await
                .context("Unable to create the settings file")
                .pub_result(ErrorType::Config)?;
            info!("Wrote default settings to {}", path.display());
            Some(path.to_path_buf())
        }
        _ => None,
    };

    Ok(Out::new(
        format!("The database is ready at schema version {schema_version}"),
        InitOutput {
            schema_version,
            settings_written,
        },
    ))
}
