use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::dto::{BatchStatus, ProcessingStatus};
use crate::api::{ApiClient, ApiError};
use crate::config::Config;

/// Polls a background job's status endpoint at a fixed interval until the job
/// reaches a terminal state.
///
/// A failed poll is logged and retried on the next tick; only a 401 ends the
/// loop early since the stored credentials are gone by then.
#[derive(Debug, Clone)]
pub struct JobPoller {
    interval: Duration,
}

impl JobPoller {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.poll_interval())
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns the terminal status, or `None` if `cancel` fired first.
    pub async fn poll<T, F, Fut>(
        &self,
        mut fetch: F,
        is_terminal: impl Fn(&T) -> bool,
        mut on_update: impl FnMut(&T),
        cancel: &CancellationToken,
    ) -> Result<Option<T>, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let polled = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(None),
                polled = fetch() => polled,
            };

            match polled {
                Ok(status) => {
                    on_update(&status);
                    if is_terminal(&status) {
                        debug!("Job reached a terminal state after {} polls", attempt);
                        return Ok(Some(status));
                    }
                }
                Err(e @ ApiError::Unauthorized { .. }) => return Err(e),
                Err(e) => warn!("Status poll {} failed: {}", attempt, e),
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(None),
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }

    pub async fn wait_for_batch(
        &self,
        client: &ApiClient,
        batch_job_id: &str,
        on_update: impl FnMut(&BatchStatus),
        cancel: &CancellationToken,
    ) -> Result<Option<BatchStatus>, ApiError> {
        self.poll(
            move || client.batch_status(batch_job_id),
            BatchStatus::is_terminal,
            on_update,
            cancel,
        )
        .await
    }

    pub async fn wait_for_processing(
        &self,
        client: &ApiClient,
        job_id: &str,
        on_update: impl FnMut(&ProcessingStatus),
        cancel: &CancellationToken,
    ) -> Result<Option<ProcessingStatus>, ApiError> {
        self.poll(
            move || client.processing_status(job_id),
            ProcessingStatus::is_terminal,
            on_update,
            cancel,
        )
        .await
    }
}
