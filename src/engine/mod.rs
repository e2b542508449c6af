//! Remote pipeline engine: upload, submit, poll, download.
//!
//! The engine owns the HTTP client and exposes the pipeline steps both
//! individually (for the session controller) and as a one-shot [`run`]
//! (for the non-interactive JSON and silent modes).
//!
//! [`run`]: PipelineEngine::run

mod chroma;
pub(crate) mod download;
pub(crate) mod poll;
pub(crate) mod upload;

use crate::error::PipelineResult;
use crate::model::{
    now_timestamp, DownloadOutcome, GenerateOutcome, InfoEvent, Phase, PipelineEvent, RunConfig,
    RunResult, UploadedAsset,
};
use chroma::ChromaClient;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub(crate) enum EngineControl {
    /// Cancel the run entirely.
    Cancel,
}

/// Listen for control messages and reflect `Cancel` into a shared flag the
/// poll loop checks between status fetches.
fn spawn_cancel_listener(
    mut control_rx: mpsc::UnboundedReceiver<EngineControl>,
) -> (Arc<AtomicBool>, tokio::task::JoinHandle<()>) {
    let cancel = Arc::new(AtomicBool::new(false));
    let cancel2 = cancel.clone();
    let handle = tokio::spawn(async move {
        while let Some(msg) = control_rx.recv().await {
            match msg {
                EngineControl::Cancel => {
                    cancel2.store(true, Ordering::Relaxed);
                    break;
                }
            }
        }
    });
    (cancel, handle)
}

pub(crate) struct PipelineEngine {
    cfg: RunConfig,
    client: ChromaClient,
}

impl PipelineEngine {
    pub fn new(cfg: RunConfig) -> PipelineResult<Self> {
        let client = ChromaClient::new(&cfg)?;
        Ok(Self { cfg, client })
    }

    /// Upload step; returns the CDN-addressable asset.
    pub async fn upload(&self, path: &Path) -> PipelineResult<UploadedAsset> {
        upload::upload_file(&self.client, path).await
    }

    /// Submit the job, poll it to completion, and extract the result media
    /// URL. `cancel` aborts the poll loop between status checks.
    pub async fn generate(
        &self,
        image_url: &str,
        event_tx: &mpsc::UnboundedSender<PipelineEvent>,
        cancel: Arc<AtomicBool>,
    ) -> PipelineResult<GenerateOutcome> {
        let _ = event_tx.send(PipelineEvent::PhaseStarted {
            phase: Phase::Submit,
        });
        let submitted = self.client.submit_job(image_url).await?;
        let _ = event_tx.send(PipelineEvent::Info(InfoEvent::JobSubmitted {
            job_id: submitted.job_id.clone(),
            status: submitted.status,
        }));

        let _ = event_tx.send(PipelineEvent::PhaseStarted { phase: Phase::Poll });
        let source = poll::JobStatusSource {
            client: &self.client,
            job_id: &submitted.job_id,
        };
        let (snapshot, polls) = poll::poll_until_complete(poll::PollParams {
            source: &source,
            interval: self.cfg.poll_interval,
            max_polls: self.cfg.max_polls,
            event_tx,
            cancel,
        })
        .await?;

        let media_url = snapshot.media_url()?.to_string();
        Ok(GenerateOutcome {
            job_id: submitted.job_id,
            media_url,
            polls,
        })
    }

    /// Three-tier download of the result media into the output directory.
    pub async fn download(
        &self,
        media_url: &str,
        event_tx: &mpsc::UnboundedSender<PipelineEvent>,
    ) -> PipelineResult<DownloadOutcome> {
        let _ = event_tx.send(PipelineEvent::PhaseStarted {
            phase: Phase::Download,
        });
        download::download_artifact(&self.client, media_url, &self.cfg.output_dir, event_tx).await
    }

    /// One-shot run: upload, generate, and (per config) download, emitting
    /// progress events along the way.
    pub async fn run(
        self,
        input: PathBuf,
        event_tx: mpsc::UnboundedSender<PipelineEvent>,
        control_rx: mpsc::UnboundedReceiver<EngineControl>,
    ) -> PipelineResult<RunResult> {
        let (cancel, control_handle) = spawn_cancel_listener(control_rx);

        let _ = event_tx.send(PipelineEvent::PhaseStarted {
            phase: Phase::Upload,
        });
        let asset = self.upload(&input).await?;
        let _ = event_tx.send(PipelineEvent::Info(InfoEvent::UploadedTo {
            url: asset.url.clone(),
        }));

        let outcome = self.generate(&asset.url, &event_tx, cancel).await?;

        let download = if self.cfg.download {
            Some(self.download(&outcome.media_url, &event_tx).await?)
        } else {
            None
        };

        // Dropping a JoinHandle does not cancel the task; abort it so it
        // does not sit on control_rx forever.
        control_handle.abort();

        let result = RunResult {
            timestamp_utc: now_timestamp(),
            input,
            uploaded_url: asset.url,
            job_id: outcome.job_id,
            polls: outcome.polls,
            media_url: outcome.media_url,
            download,
        };
        let _ = event_tx.send(PipelineEvent::RunCompleted {
            result: Box::new(result.clone()),
        });
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_message_raises_the_shared_flag() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (cancel, handle) = spawn_cancel_listener(rx);
        assert!(!cancel.load(Ordering::Relaxed));

        tx.send(EngineControl::Cancel).unwrap();
        handle.await.unwrap();

        assert!(cancel.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn closed_control_channel_leaves_the_flag_down() {
        let (tx, rx) = mpsc::unbounded_channel::<EngineControl>();
        let (cancel, handle) = spawn_cancel_listener(rx);

        drop(tx);
        handle.await.unwrap();

        assert!(!cancel.load(Ordering::Relaxed));
    }
}
