//! Operator commands.

use super::{AppResult, OutboxApp};
use chrono::{DateTime, Utc};
use fieldops_outbox::{OutboxError, QueueStatus, RecoveryReport};
use serde::Serialize;
use tracing::{error, info, warn};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusOutput<'a> {
    ledger: String,
    endpoint: &'a str,
    queue: QueueStatus,
    recovery: &'a RecoveryReport,
    oldest_pending_at: Option<DateTime<Utc>>,
    dead_lettered_ids: Vec<String>,
}

/// Keep flushing in the background until Ctrl-C.
pub async fn run(app: OutboxApp) -> AppResult<()> {
    let mut alerts = app.queue.subscribe_alerts();
    let worker = app.queue.start_worker(app.flush_interval());

    let alert_logger = tokio::spawn(async move {
        while let Ok(alert) = alerts.recv().await {
            error!(
                event_id = %alert.event_id,
                kind = alert.kind.as_str(),
                reason = ?alert.reason,
                retry_count = alert.retry_count,
                "Worker event needs manual attention"
            );
        }
    });

    info!(
        interval_secs = app.flush_interval().as_secs(),
        "Outbox running; press Ctrl-C to stop"
    );
    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    worker.abort();
    alert_logger.abort();

    let OutboxApp { db, queue, .. } = app;
    let status = queue.status().await;
    drop(queue);
    db.close().await?;

    info!(pending = status.pending, "Outbox stopped");
    Ok(())
}

/// One flush pass, reported on stdout.
pub async fn flush_once(app: &OutboxApp) -> AppResult<()> {
    match app.queue.attempt_flush().await {
        Ok(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Err(OutboxError::AuthRequired(message)) => {
            warn!(error = %message, "Flush halted: sync credentials rejected");
            Err(Box::new(OutboxError::AuthRequired(message)))
        }
        Err(e) => Err(Box::new(e)),
    }
}

pub async fn print_status(app: &OutboxApp) -> AppResult<()> {
    let oldest_pending_at = app
        .queue
        .pending_events()
        .await
        .first()
        .map(|event| event.created_at);
    let dead_lettered_ids = app
        .queue
        .dead_lettered_events()
        .await
        .into_iter()
        .map(|event| event.id)
        .collect();

    let output = StatusOutput {
        ledger: app.paths.database_file().display().to_string(),
        endpoint: app.submitter.endpoint(),
        queue: app.queue.status().await,
        recovery: app.queue.recovery_report(),
        oldest_pending_at,
        dead_lettered_ids,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

pub async fn retry_all(app: &OutboxApp) -> AppResult<()> {
    let count = app.queue.retry_all().await?;
    println!("{} dead-lettered event(s) returned to pending", count);
    Ok(())
}

pub async fn clear(app: &OutboxApp, confirmed: bool) -> AppResult<()> {
    if !confirmed {
        return Err("refusing to clear the outbox without --yes".into());
    }
    let deleted = app.queue.clear().await?;
    println!("Deleted {} outbox event(s)", deleted);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldops_config_and_utils::{Config, Paths};
    use tempfile::tempdir;

    async fn app(dir: &std::path::Path) -> OutboxApp {
        OutboxApp::open(Config::default(), Paths::with_base_dir(dir.to_path_buf()), None)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_clear_requires_confirmation() {
        let dir = tempdir().unwrap();
        let app = app(dir.path()).await;

        assert!(clear(&app, false).await.is_err());
        assert!(clear(&app, true).await.is_ok());
    }

    #[tokio::test]
    async fn test_flush_and_status_on_empty_outbox() {
        let dir = tempdir().unwrap();
        let app = app(dir.path()).await;

        flush_once(&app).await.unwrap();
        print_status(&app).await.unwrap();
        retry_all(&app).await.unwrap();
    }
}
