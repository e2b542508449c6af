//! Bounded status-poll loop.

use crate::engine::chroma::ChromaClient;
use crate::error::{PipelineError, PipelineResult};
use crate::model::{JobStatus, PipelineEvent, StatusResponse};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Source of job status snapshots. Seam between the poll loop and the HTTP
/// client so the loop can be exercised without a network.
pub(crate) trait StatusSource {
    fn fetch_status(&self) -> impl Future<Output = PipelineResult<StatusResponse>> + Send;
}

/// Status source for a submitted job on the remote API.
pub(crate) struct JobStatusSource<'a> {
    pub client: &'a ChromaClient,
    pub job_id: &'a str,
}

impl StatusSource for JobStatusSource<'_> {
    fn fetch_status(&self) -> impl Future<Output = PipelineResult<StatusResponse>> + Send {
        self.client.fetch_status(self.job_id)
    }
}

/// Parameters for running the poll loop.
pub(crate) struct PollParams<'a, S> {
    pub source: &'a S,
    pub interval: Duration,
    pub max_polls: u32,
    pub event_tx: &'a mpsc::UnboundedSender<PipelineEvent>,
    pub cancel: Arc<AtomicBool>,
}

/// Poll sequentially until the job reaches a terminal status or the attempt
/// ceiling, returning the completed payload and the attempt count.
///
/// `failed`/`error` raise `JobFailed` with the server-supplied message when
/// present; any unrecognized status counts as still-in-progress. A
/// non-success status check aborts immediately; transient HTTP errors are
/// not retried. The cancel flag is checked once per iteration.
pub(crate) async fn poll_until_complete<S: StatusSource>(
    params: PollParams<'_, S>,
) -> PipelineResult<(StatusResponse, u32)> {
    let PollParams {
        source,
        interval,
        max_polls,
        event_tx,
        cancel,
    } = params;

    for attempt in 1..=max_polls {
        if cancel.load(Ordering::Relaxed) {
            return Err(PipelineError::Cancelled);
        }

        let snapshot = source.fetch_status().await?;
        tracing::debug!(attempt, status = snapshot.status.as_str(), "poll");

        match snapshot.status {
            JobStatus::Completed => return Ok((snapshot, attempt)),
            JobStatus::Failed | JobStatus::Error => {
                return Err(PipelineError::JobFailed {
                    message: snapshot
                        .error
                        .unwrap_or_else(|| "job processing failed".into()),
                });
            }
            _ => {
                let _ = event_tx.send(PipelineEvent::PollTick {
                    attempt,
                    status: snapshot.status,
                });
                tokio::time::sleep(interval).await;
            }
        }
    }

    Err(PipelineError::Timeout {
        attempts: max_polls,
    })
}
