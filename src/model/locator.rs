//! Identifies the file that triggered an invocation.

use crate::error::Res;
use anyhow::{ensure, Context};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// A reference to one input file: the bucket (or top-level directory) and the object key within it.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct FileLocator {
    bucket: String,
    key: String,
}

impl FileLocator {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Parses an object-storage change notification into one locator per record.
    ///
    /// The notification looks like this (irrelevant fields omitted):
    /// ```json
    /// { "Records": [ { "s3": {
    ///     "bucket": { "name": "raw-csv" },
    ///     "object": { "key": "424248018_transactions_report.csv" }
    /// } } ] }
    /// ```
    ///
    /// Object keys arrive URL-encoded and are decoded here.
    pub fn from_event(json: &str) -> Res<Vec<Self>> {
        let event: Event =
            serde_json::from_str(json).context("Unable to parse the storage event notification")?;
        ensure!(
            !event.records.is_empty(),
            "The storage event notification has no records"
        );
        event
            .records
            .into_iter()
            .map(|r| {
                let key = decode_key(&r.s3.object.key);
                ensure!(
                    !r.s3.bucket.name.is_empty(),
                    "Event record has an empty bucket name"
                );
                ensure!(!key.is_empty(), "Event record has an empty object key");
                Ok(Self::new(r.s3.bucket.name, key))
            })
            .collect()
    }

    /// Derives the account number from a file name of the form `<account>_<a>_<b>`, for example
    /// `424248018_transactions_report.csv`. Any leading path in the key is ignored.
    pub fn account_number(&self) -> Option<&str> {
        let file_name = self.key.rsplit('/').next().unwrap_or(&self.key);
        let parts: Vec<&str> = file_name.split('_').collect();
        match parts.as_slice() {
            [account, _, _] if !account.trim().is_empty() => Some(account.trim()),
            _ => None,
        }
    }
}

impl Display for FileLocator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Object keys in notifications are form-encoded: `+` is a space and other bytes are `%XX`. Raw `&`
/// and `=` are part of the key, so they are escaped before decoding to keep the key in one piece.
fn decode_key(raw: &str) -> String {
    let escaped = raw.replace('&', "%26").replace('=', "%3D");
    url::form_urlencoded::parse(escaped.as_bytes())
        .next()
        .map(|(key, _)| key.into_owned())
        .unwrap_or_default()
}

#[derive(Debug, Deserialize)]
struct Event {
    #[serde(rename = "Records", default)]
    records: Vec<EventRecord>,
}

#[derive(Debug, Deserialize)]
struct EventRecord {
    s3: S3Entity,
}

#[derive(Debug, Deserialize)]
struct S3Entity {
    bucket: S3Bucket,
    object: S3Object,
}

#[derive(Debug, Deserialize)]
struct S3Bucket {
    name: String,
}

#[derive(Debug, Deserialize)]
struct S3Object {
    key: String,
}
