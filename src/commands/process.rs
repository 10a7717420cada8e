use crate::api::{connect_queue, LocalSource};
use crate::commands::Out;
use crate::db::Db;
use crate::error::{ErrorType, IntoResult};
use crate::model::FileLocator;
use crate::pipeline::{Pipeline, ProcessingResult};
use crate::{utils, Config, Result};
use std::path::Path;
use tracing::{error, info};

/// Processes the file at `locator`.
///
/// The database and the queue client are opened for this call only, and the database is closed
/// again whether or not processing succeeds.
pub async fn process(config: &Config, locator: &FileLocator) -> Result<Out<ProcessingResult>> {
    let result = run(config, locator).await?;
    Ok(Out::new(summarize(&result), result))
}

/// Processes every file named by an object-storage change notification, read from `event` or
/// from stdin.
///
/// Each file is processed independently. If any of them fails, the others are still processed and
/// the first error is returned at the end.
pub async fn handle(config: &Config, event: Option<&Path>) -> Result<Out<Vec<ProcessingResult>>> {
    let json = match event {
        Some(path) => utils::read(path).await,
        None => utils::read_stdin().await,
    }
    .pub_result(ErrorType::Request)?;
    let locators = FileLocator::from_event(&json).pub_result(ErrorType::Request)?;
    info!("The notification names {} files", locators.len());

    let mut results = Vec::with_capacity(locators.len());
    let mut first_error = None;
    for locator in &locators {
        match run(config, locator).await {
            Ok(result) => {
                info!("{}", summarize(&result));
                results.push(result);
            }
            Err(e) => {
                error!("Processing {locator} failed: {e}");
                first_error.get_or_insert(e);
            }
        }
    }
    if let Some(e) = first_error {
        return Err(e);
    }

    let message = format!("Processed {} files", results.len());
    Ok(Out::new(message, results))
}

async fn run(config: &Config, locator: &FileLocator) -> Result<ProcessingResult> {
    let queue = connect_queue(config.queue_url()).pub_result(ErrorType::Config)?;
    let source = LocalSource::new(config.source_root());
    let db = Db::connect(config.database_url())
        .await
        .pub_result(ErrorType::Database)?;

    let result = Pipeline::new(config.settings(), &source, &db, queue.as_ref())
        .run(locator)
        .await;
    db.close().await;
    result
}

fn summarize(result: &ProcessingResult) -> String {
    let mut message = format!(
        "Processed {}: {} transactions inserted, {} skipped, {} rows rejected, {} reports",
        result.locator(),
        result.transactions_inserted(),
        result.records_skipped(),
        result.records_rejected(),
        result.summaries_produced()
    );
    if result.failed_deliveries() > 0 {
        message.push_str(&format!(
            ", {} notifications could not be sent",
            result.failed_deliveries()
        ));
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::TestEnv;

    const KEY: &str = "424248018_transactions_report.csv";
    const FILE: &str = "\
id,date,amount,transaction_id
1,2024-01-05 10:00:00,100.00,tx1
2,2024-01-20 12:30:00,-40.00,tx2
3,2024-02-01 08:15:00,60.00,tx3
";
    const OTHER_KEY: &str = "77_transactions_report.csv";

    #[tokio::test]
    async fn test_process() {
        let env = TestEnv::new().await;
        env.write_file("raw", KEY, FILE).await;
        let config = env.config();

        let out = process(&config, &FileLocator::new("raw", KEY))
            .await
            .unwrap();
        let result = out.structure().unwrap();
        assert_eq!(result.transactions_inserted(), 3);
        assert!(out.message().contains("3 transactions inserted"));

        let spooled = env.spooled().await;
        assert_eq!(spooled.len(), 1);
        assert_eq!(spooled[0]["body"]["account_number"], "424248018");
        assert_eq!(spooled[0]["body"]["total_balance"], "120.00");
        assert_eq!(
            spooled[0]["message_id"].as_str(),
            result.deliveries()[0].message_id()
        );
    }

    #[tokio::test]
    async fn test_process_missing_file() {
        let env = TestEnv::new().await;
        let err = process(&env.config(), &FileLocator::new("raw", KEY))
            .await
            .unwrap_err();
        assert_eq!(err.error_type(), ErrorType::Fetch);
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_handle_event_file() {
        let env = TestEnv::new().await;
        env.write_file("raw", KEY, FILE).await;
        env.write_file("raw", OTHER_KEY, "1,2024-05-01,-9.99,tx9\n")
            .await;
        let event = serde_json::json!({
            "Records": [
                { "s3": { "bucket": { "name": "raw" }, "object": { "key": KEY } } },
                { "s3": { "bucket": { "name": "raw" }, "object": { "key": OTHER_KEY } } }
            ]
        });
        let event_path = env.path().join("event.json");
        std::fs::write(&event_path, event.to_string()).unwrap();

        let out = handle(&env.config(), Some(&event_path)).await.unwrap();
        let results = out.structure().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].transactions_inserted(), 1);
        assert_eq!(env.db().count_transactions().await.unwrap(), 4);
        assert_eq!(env.spooled().await.len(), 2);
    }

    #[tokio::test]
    async fn test_handle_continues_after_failure() {
        let env = TestEnv::new().await;
        env.write_file("raw", "424248018_a_b.csv", FILE).await;
        let event = r#"{"Records": [
            {"s3": {"bucket": {"name": "raw"}, "object": {"key": "missing_a_b.csv"}}},
            {"s3": {"bucket": {"name": "raw"}, "object": {"key": "424248018_a_b.csv"}}}
        ]}"#;
        let event_path = env.path().join("event.json");
        std::fs::write(&event_path, event).unwrap();

        let err = handle(&env.config(), Some(&event_path)).await.unwrap_err();
        assert_eq!(err.error_type(), ErrorType::Fetch);
        // The second file was still processed.
        assert_eq!(env.db().count_transactions().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_handle_bad_event() {
        let env = TestEnv::new().await;
        let event_path = env.path().join("event.json");
        std::fs::write(&event_path, r#"{"Records": []}"#).unwrap();
        let err = handle(&env.config(), Some(&event_path)).await.unwrap_err();
        assert_eq!(err.error_type(), ErrorType::Request);
        assert!(!err.is_retryable());

        let missing = env.path().join("missing.json");
        let err = handle(&env.config(), Some(&missing)).await.unwrap_err();
        assert_eq!(err.error_type(), ErrorType::Request);
    }
}
