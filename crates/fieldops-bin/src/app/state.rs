//! Composition root: ledger, submitter, and queue wired from config.

use super::AppResult;
use fieldops_config_and_utils::{Config, Paths};
use fieldops_database::AsyncDatabase;
use fieldops_outbox::{HttpSubmitter, OutboxQueue, QueueConfig, RetryPolicy, SenderConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Everything a command needs, built once per process.
pub struct OutboxApp {
    pub config: Config,
    pub paths: Paths,
    pub db: AsyncDatabase,
    pub submitter: Arc<HttpSubmitter>,
    pub queue: Arc<OutboxQueue>,
}

impl OutboxApp {
    pub async fn open(config: Config, paths: Paths, auth_token: Option<&str>) -> AppResult<Self> {
        paths.ensure_dirs()?;

        let sync_url = config.sync_url()?;
        let db = AsyncDatabase::open(&paths.database_file()).await?;

        let submitter = Arc::new(HttpSubmitter::new(SenderConfig {
            base_url: sync_url.to_string(),
            timeout_secs: config.request_timeout_secs,
        })?);

        let queue_config = QueueConfig {
            max_pending: config.max_pending,
            retry: RetryPolicy {
                max_retries: config.max_retries,
                ..RetryPolicy::default()
            },
            pass_deadline: config.pass_deadline_secs.map(Duration::from_secs),
        };
        let queue = Arc::new(
            OutboxQueue::recover(Arc::new(db.clone()), submitter.clone(), queue_config).await,
        );

        info!(
            ledger = %paths.database_file().display(),
            endpoint = submitter.endpoint(),
            pending = queue.recovery_report().pending,
            dead_lettered = queue.recovery_report().dead_lettered,
            "Outbox ready"
        );

        let app = Self {
            config,
            paths,
            db,
            submitter,
            queue,
        };
        match auth_token {
            Some(token) => app.set_auth_token(token).await,
            None => warn!("No auth token configured; flushes will halt until one is provided"),
        }
        Ok(app)
    }

    /// Install a new bearer token and lift any auth halt on the queue.
    pub async fn set_auth_token(&self, token: &str) {
        self.submitter.set_auth_token(token).await;
        self.queue.credentials_refreshed().await;
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.config.flush_interval_secs.max(1))
    }
}
