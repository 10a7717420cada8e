//! Implementations of the `Queue` trait.

use crate::api::Queue;
use crate::error::Res;
use crate::report::Notification;
use anyhow::{anyhow, bail, Context};
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace};
use url::Url;
use uuid::Uuid;

const TIMEOUT: Duration = Duration::from_secs(10);

/// Creates the queue client for `url`.
///
/// - `http` and `https` URLs are an HTTP endpoint that accepts one notification per POST.
/// - `file` URLs name a spool file to which notifications are appended as JSON lines.
pub fn connect_queue(url: &Url) -> Res<Box<dyn Queue>> {
    match url.scheme() {
        "http" | "https" => Ok(Box::new(HttpQueue::new(url.clone())?)),
        "file" => {
            let path = url
                .to_file_path()
                .map_err(|_| anyhow!("The queue URL '{url}' is not a valid file path"))?;
            Ok(Box::new(SpoolQueue::new(path)))
        }
        other => bail!("Unsupported queue URL scheme '{other}' in '{url}'"),
    }
}

/// POSTs each notification as a JSON body to an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpQueue {
    url: Url,
    client: reqwest::Client,
}

impl HttpQueue {
    pub fn new(url: Url) -> Res<Self> {
        let client = reqwest::Client::builder()
            .timeout(TIMEOUT)
            .build()
            .context("Unable to create the HTTP client")?;
        Ok(Self { url, client })
    }
}

#[async_trait::async_trait]
impl Queue for HttpQueue {
    async fn publish(&self, notification: &Notification) -> Res<String> {
        let body = notification.to_json()?;
        trace!("POST {} {body}", self.url);
        let response = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .with_context(|| format!("Failed to send the notification to {}", self.url))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .context("Failed to read the queue response")?;
        if !status.is_success() {
            bail!("The queue responded with {status}: {text}");
        }
        Ok(message_id(&text))
    }
}

#[derive(Debug, Deserialize)]
struct PublishResponse {
    #[serde(alias = "MessageId", alias = "messageId")]
    message_id: Option<String>,
}

/// Reads the message id from a queue response, or makes one up if the endpoint did not assign one.
fn message_id(response: &str) -> String {
    serde_json::from_str::<PublishResponse>(response)
        .ok()
        .and_then(|r| r.message_id)
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Appends each notification as one JSON line to a local file.
#[derive(Debug, Clone)]
pub struct SpoolQueue {
    path: PathBuf,
}

impl SpoolQueue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl Queue for SpoolQueue {
    async fn publish(&self, notification: &Notification) -> Res<String> {
        let message_id = Uuid::new_v4().to_string();
        let line = serde_json::json!({
            "message_id": message_id,
            "body": notification,
        });
        let mut data = serde_json::to_vec(&line).context("Unable to serialize the notification")?;
        data.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Unable to open the spool file {}", self.path.display()))?;
        let path = self.path.display();
        file.write_all(&data)
            .await
            .with_context(|| format!("Unable to write to the spool file {path}"))?;
        file.flush()
            .await
            .with_context(|| format!("Unable to flush the spool file {path}"))?;

        debug!("Spooled message {message_id} to {path}");
        Ok(message_id)
    }
}
