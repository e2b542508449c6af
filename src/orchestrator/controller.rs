//! Session lifecycle controller.
//!
//! Dispatches UI commands onto pipeline tasks and tracks the session state
//! machine. A new upload or a reset cancels any stale in-flight job, so a
//! superseded poll loop can neither run to completion nor overwrite the
//! progress of its successor.

use crate::engine::PipelineEngine;
use crate::error::PipelineError;
use crate::model::{DownloadOutcome, GenerateOutcome, Phase, PipelineEvent, UploadedAsset};
use anyhow::Result;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Commands emitted by UI layers to drive the session.
#[derive(Debug, Clone)]
pub(crate) enum UiCommand {
    FileSelected(PathBuf),
    Generate,
    Reset,
    Download,
    Quit,
}

/// Typed session states. Transitions are driven by commands and by progress
/// events from the running pipeline task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionState {
    Idle,
    Uploading,
    Ready,
    Submitting,
    Polling,
    Complete,
    Failed,
}

impl SessionState {
    pub fn name(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Uploading => "uploading",
            SessionState::Ready => "ready",
            SessionState::Submitting => "submitting",
            SessionState::Polling => "polling",
            SessionState::Complete => "complete",
            SessionState::Failed => "failed",
        }
    }
}

/// Events emitted to presentation layers.
#[derive(Debug, Clone)]
pub(crate) enum SessionEvent {
    StateChanged(SessionState),
    /// Upload finished; the preview can point at the CDN URL.
    Preview { url: String },
    /// Job completed; the result media is displayable.
    JobComplete(GenerateOutcome),
    PollTick { attempt: u32 },
    Info(String),
    DownloadFinished(DownloadOutcome),
    SessionError { message: String },
    /// Asset and result were cleared; the session is back at its defaults.
    ResetDone,
}

/// Seam between the controller and the network pipeline.
pub(crate) trait PipelineBackend: Send + Sync + 'static {
    fn upload(
        &self,
        path: PathBuf,
    ) -> impl Future<Output = Result<UploadedAsset, PipelineError>> + Send;

    fn generate(
        &self,
        image_url: String,
        event_tx: UnboundedSender<PipelineEvent>,
        cancel: Arc<AtomicBool>,
    ) -> impl Future<Output = Result<GenerateOutcome, PipelineError>> + Send;

    fn download(
        &self,
        media_url: String,
        event_tx: UnboundedSender<PipelineEvent>,
    ) -> impl Future<Output = Result<DownloadOutcome, PipelineError>> + Send;
}

impl PipelineBackend for PipelineEngine {
    fn upload(
        &self,
        path: PathBuf,
    ) -> impl Future<Output = Result<UploadedAsset, PipelineError>> + Send {
        async move { PipelineEngine::upload(self, &path).await }
    }

    fn generate(
        &self,
        image_url: String,
        event_tx: UnboundedSender<PipelineEvent>,
        cancel: Arc<AtomicBool>,
    ) -> impl Future<Output = Result<GenerateOutcome, PipelineError>> + Send {
        async move { PipelineEngine::generate(self, &image_url, &event_tx, cancel).await }
    }

    fn download(
        &self,
        media_url: String,
        event_tx: UnboundedSender<PipelineEvent>,
    ) -> impl Future<Output = Result<DownloadOutcome, PipelineError>> + Send {
        async move { PipelineEngine::download(self, &media_url, &event_tx).await }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskKind {
    Upload,
    Generate,
    Download,
}

enum TaskOutcome {
    Uploaded(Result<UploadedAsset, PipelineError>),
    Generated(Result<GenerateOutcome, PipelineError>),
    Downloaded(Result<DownloadOutcome, PipelineError>),
}

/// Handle for the single in-flight pipeline task.
struct ActiveTask {
    kind: TaskKind,
    cancel: Arc<AtomicBool>,
    handle: Option<tokio::task::JoinHandle<TaskOutcome>>,
}

/// Flag the task as cancelled and abort it. Poll loops also check the flag,
/// so a task caught mid-sleep stops at the next iteration even if the abort
/// races its completion.
fn cancel_active(task: &mut Option<ActiveTask>) {
    if let Some(mut t) = task.take() {
        t.cancel.store(true, Ordering::Relaxed);
        if let Some(h) = t.handle.take() {
            h.abort();
        }
    }
}

fn start_upload<B: PipelineBackend>(backend: &Arc<B>, path: PathBuf) -> ActiveTask {
    let backend = backend.clone();
    let cancel = Arc::new(AtomicBool::new(false));
    let handle = tokio::spawn(async move { TaskOutcome::Uploaded(backend.upload(path).await) });
    ActiveTask {
        kind: TaskKind::Upload,
        cancel,
        handle: Some(handle),
    }
}

fn start_generate<B: PipelineBackend>(
    backend: &Arc<B>,
    image_url: String,
    pipe_tx: UnboundedSender<PipelineEvent>,
) -> ActiveTask {
    let backend = backend.clone();
    let cancel = Arc::new(AtomicBool::new(false));
    let cancel2 = cancel.clone();
    let handle = tokio::spawn(async move {
        TaskOutcome::Generated(backend.generate(image_url, pipe_tx, cancel2).await)
    });
    ActiveTask {
        kind: TaskKind::Generate,
        cancel,
        handle: Some(handle),
    }
}

fn start_download<B: PipelineBackend>(
    backend: &Arc<B>,
    media_url: String,
    pipe_tx: UnboundedSender<PipelineEvent>,
) -> ActiveTask {
    let backend = backend.clone();
    let cancel = Arc::new(AtomicBool::new(false));
    let handle = tokio::spawn(async move {
        TaskOutcome::Downloaded(backend.download(media_url, pipe_tx).await)
    });
    ActiveTask {
        kind: TaskKind::Download,
        cancel,
        handle: Some(handle),
    }
}

/// Run the session loop until a `Quit` command or the command channel closes.
pub(crate) async fn run_controller<B: PipelineBackend>(
    backend: Arc<B>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
    session_tx: UnboundedSender<SessionEvent>,
) -> Result<()> {
    let (pipe_tx, mut pipe_rx) = mpsc::unbounded_channel::<PipelineEvent>();

    let mut state = SessionState::Idle;
    let mut asset: Option<UploadedAsset> = None;
    let mut result: Option<GenerateOutcome> = None;
    let mut task: Option<ActiveTask> = None;

    let set_state = |state: &mut SessionState, next: SessionState| {
        if *state != next {
            *state = next;
            let _ = session_tx.send(SessionEvent::StateChanged(next));
        }
    };

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(UiCommand::FileSelected(path)) => {
                        // A new upload supersedes everything in flight.
                        cancel_active(&mut task);
                        asset = None;
                        result = None;
                        task = Some(start_upload(&backend, path));
                        set_state(&mut state, SessionState::Uploading);
                    }
                    Some(UiCommand::Generate) => {
                        let ready = matches!(
                            state,
                            SessionState::Ready | SessionState::Complete | SessionState::Failed
                        );
                        match asset.as_ref() {
                            Some(a) if ready && task.is_none() => {
                                result = None;
                                task = Some(start_generate(&backend, a.url.clone(), pipe_tx.clone()));
                                set_state(&mut state, SessionState::Submitting);
                            }
                            _ => {
                                let _ = session_tx.send(SessionEvent::Info(format!(
                                    "ignoring generate while {}",
                                    state.name()
                                )));
                            }
                        }
                    }
                    Some(UiCommand::Download) => {
                        match result.as_ref() {
                            Some(r) if state == SessionState::Complete && task.is_none() => {
                                task = Some(start_download(
                                    &backend,
                                    r.media_url.clone(),
                                    pipe_tx.clone(),
                                ));
                            }
                            _ => {
                                let _ = session_tx.send(SessionEvent::Info(format!(
                                    "ignoring download while {}",
                                    state.name()
                                )));
                            }
                        }
                    }
                    Some(UiCommand::Reset) => {
                        cancel_active(&mut task);
                        asset = None;
                        result = None;
                        let _ = session_tx.send(SessionEvent::ResetDone);
                        set_state(&mut state, SessionState::Idle);
                    }
                    Some(UiCommand::Quit) | None => {
                        cancel_active(&mut task);
                        break;
                    }
                }
            }
            ev = pipe_rx.recv() => {
                // Progress from the active generate task; stale tasks are
                // aborted before a new one starts, so kind-gating is enough
                // to keep superseded loops from touching the state.
                let generating = task.as_ref().is_some_and(|t| t.kind == TaskKind::Generate);
                match ev {
                    Some(PipelineEvent::PhaseStarted { phase: Phase::Poll }) if generating => {
                        set_state(&mut state, SessionState::Polling);
                    }
                    Some(PipelineEvent::PollTick { attempt, .. }) if generating => {
                        set_state(&mut state, SessionState::Polling);
                        let _ = session_tx.send(SessionEvent::PollTick { attempt });
                    }
                    Some(PipelineEvent::Info(info)) => {
                        let _ = session_tx.send(SessionEvent::Info(info.to_message()));
                    }
                    _ => {}
                }
            }
            // Do not take the JoinHandle before this branch wins; otherwise
            // it can be dropped when another branch is chosen and the
            // completion is never observed.
            maybe_done = async {
                if let Some(t) = &mut task {
                    if let Some(h) = t.handle.as_mut() {
                        return Some(h.await);
                    }
                }
                futures::future::pending().await
            } => {
                let Some(join_res) = maybe_done else { continue };
                task = None;
                let outcome = match join_res {
                    Ok(outcome) => outcome,
                    Err(e) if e.is_cancelled() => continue,
                    Err(e) => {
                        let _ = session_tx.send(SessionEvent::SessionError {
                            message: format!("pipeline task failed: {e}"),
                        });
                        set_state(&mut state, SessionState::Failed);
                        continue;
                    }
                };
                match outcome {
                    TaskOutcome::Uploaded(Ok(a)) => {
                        let _ = session_tx.send(SessionEvent::Preview { url: a.url.clone() });
                        asset = Some(a);
                        set_state(&mut state, SessionState::Ready);
                    }
                    TaskOutcome::Generated(Ok(o)) => {
                        let _ = session_tx.send(SessionEvent::JobComplete(o.clone()));
                        result = Some(o);
                        set_state(&mut state, SessionState::Complete);
                    }
                    TaskOutcome::Downloaded(Ok(outcome)) => {
                        let _ = session_tx.send(SessionEvent::DownloadFinished(outcome));
                    }
                    TaskOutcome::Uploaded(Err(e))
                    | TaskOutcome::Generated(Err(e))
                    | TaskOutcome::Downloaded(Err(e)) => {
                        if !e.is_cancelled() {
                            let _ = session_tx.send(SessionEvent::SessionError {
                                message: e.to_string(),
                            });
                            set_state(&mut state, SessionState::Failed);
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[derive(Default)]
    struct TestBackend {
        uploads: AtomicU32,
        generates: AtomicU32,
        downloads: AtomicU32,
        /// When set, generate spins until its cancel flag is raised.
        generate_hangs: bool,
        /// When set, generate fails with a job error.
        generate_fails: bool,
    }

    impl PipelineBackend for TestBackend {
        async fn upload(&self, path: PathBuf) -> Result<UploadedAsset, PipelineError> {
            self.uploads.fetch_add(1, Ordering::Relaxed);
            Ok(UploadedAsset {
                url: format!("https://cdn.test/{}", path.display()),
                file_name: "f.jpg".into(),
            })
        }

        async fn generate(
            &self,
            _image_url: String,
            event_tx: UnboundedSender<PipelineEvent>,
            cancel: Arc<AtomicBool>,
        ) -> Result<GenerateOutcome, PipelineError> {
            self.generates.fetch_add(1, Ordering::Relaxed);
            if self.generate_fails {
                return Err(PipelineError::JobFailed {
                    message: "effect not applicable".into(),
                });
            }
            if self.generate_hangs {
                loop {
                    if cancel.load(Ordering::Relaxed) {
                        return Err(PipelineError::Cancelled);
                    }
                    let _ = event_tx.send(PipelineEvent::PollTick {
                        attempt: 1,
                        status: crate::model::JobStatus::Processing,
                    });
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
            Ok(GenerateOutcome {
                job_id: "job-1".into(),
                media_url: "https://media.test/out.png".into(),
                polls: 3,
            })
        }

        async fn download(
            &self,
            media_url: String,
            _event_tx: UnboundedSender<PipelineEvent>,
        ) -> Result<DownloadOutcome, PipelineError> {
            self.downloads.fetch_add(1, Ordering::Relaxed);
            Ok(DownloadOutcome::Manual { url: media_url })
        }
    }

    struct Session {
        cmd_tx: UnboundedSender<UiCommand>,
        events: UnboundedReceiver<SessionEvent>,
        handle: tokio::task::JoinHandle<Result<()>>,
    }

    fn spawn_session(backend: Arc<TestBackend>) -> Session {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (session_tx, events) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_controller(backend, cmd_rx, session_tx));
        Session {
            cmd_tx,
            events,
            handle,
        }
    }

    async fn wait_for_state(session: &mut Session, wanted: SessionState) -> Vec<SessionEvent> {
        let mut seen = Vec::new();
        while let Some(ev) = session.events.recv().await {
            let is_match = matches!(ev, SessionEvent::StateChanged(s) if s == wanted);
            seen.push(ev);
            if is_match {
                return seen;
            }
        }
        panic!("session ended before reaching {wanted:?}; saw {seen:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn full_session_reaches_complete_and_downloads() {
        let backend = Arc::new(TestBackend::default());
        let mut session = spawn_session(backend.clone());

        session
            .cmd_tx
            .send(UiCommand::FileSelected("in.jpg".into()))
            .unwrap();
        let seen = wait_for_state(&mut session, SessionState::Ready).await;
        assert!(seen
            .iter()
            .any(|e| matches!(e, SessionEvent::StateChanged(SessionState::Uploading))));
        assert!(seen
            .iter()
            .any(|e| matches!(e, SessionEvent::Preview { url } if url == "https://cdn.test/in.jpg")));

        session.cmd_tx.send(UiCommand::Generate).unwrap();
        let seen = wait_for_state(&mut session, SessionState::Complete).await;
        assert!(seen
            .iter()
            .any(|e| matches!(e, SessionEvent::StateChanged(SessionState::Submitting))));
        assert!(seen.iter().any(
            |e| matches!(e, SessionEvent::JobComplete(o) if o.media_url == "https://media.test/out.png")
        ));

        session.cmd_tx.send(UiCommand::Download).unwrap();
        loop {
            match session.events.recv().await.expect("session ended early") {
                SessionEvent::DownloadFinished(DownloadOutcome::Manual { url }) => {
                    assert_eq!(url, "https://media.test/out.png");
                    break;
                }
                SessionEvent::SessionError { message } => panic!("unexpected error: {message}"),
                _ => {}
            }
        }

        session.cmd_tx.send(UiCommand::Quit).unwrap();
        session.handle.await.unwrap().unwrap();
        assert_eq!(backend.uploads.load(Ordering::Relaxed), 1);
        assert_eq!(backend.generates.load(Ordering::Relaxed), 1);
        assert_eq!(backend.downloads.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_clears_the_session_and_disables_generate() {
        let backend = Arc::new(TestBackend::default());
        let mut session = spawn_session(backend.clone());

        session
            .cmd_tx
            .send(UiCommand::FileSelected("in.jpg".into()))
            .unwrap();
        wait_for_state(&mut session, SessionState::Ready).await;
        session.cmd_tx.send(UiCommand::Generate).unwrap();
        wait_for_state(&mut session, SessionState::Complete).await;

        session.cmd_tx.send(UiCommand::Reset).unwrap();
        let seen = wait_for_state(&mut session, SessionState::Idle).await;
        assert!(seen.iter().any(|e| matches!(e, SessionEvent::ResetDone)));

        // Asset is gone, so generate is ignored rather than dispatched.
        session.cmd_tx.send(UiCommand::Generate).unwrap();
        loop {
            match session.events.recv().await.expect("session ended early") {
                SessionEvent::Info(msg) => {
                    assert!(msg.contains("ignoring generate"));
                    break;
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert_eq!(backend.generates.load(Ordering::Relaxed), 1);

        session.cmd_tx.send(UiCommand::Quit).unwrap();
        session.handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn new_upload_cancels_a_stale_poll_loop() {
        let backend = Arc::new(TestBackend {
            generate_hangs: true,
            ..Default::default()
        });
        let mut session = spawn_session(backend.clone());

        session
            .cmd_tx
            .send(UiCommand::FileSelected("first.jpg".into()))
            .unwrap();
        wait_for_state(&mut session, SessionState::Ready).await;
        session.cmd_tx.send(UiCommand::Generate).unwrap();
        wait_for_state(&mut session, SessionState::Polling).await;

        // Uploading a new file mid-poll supersedes the hung job.
        session
            .cmd_tx
            .send(UiCommand::FileSelected("second.jpg".into()))
            .unwrap();
        let seen = wait_for_state(&mut session, SessionState::Ready).await;
        assert!(seen.iter().all(|e| !matches!(
            e,
            SessionEvent::SessionError { .. } | SessionEvent::StateChanged(SessionState::Complete)
        )));

        session.cmd_tx.send(UiCommand::Quit).unwrap();
        session.handle.await.unwrap().unwrap();
        assert_eq!(backend.uploads.load(Ordering::Relaxed), 2);
        assert_eq!(backend.generates.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn job_failure_surfaces_an_error_and_lands_in_failed() {
        let backend = Arc::new(TestBackend {
            generate_fails: true,
            ..Default::default()
        });
        let mut session = spawn_session(backend.clone());

        session
            .cmd_tx
            .send(UiCommand::FileSelected("in.jpg".into()))
            .unwrap();
        wait_for_state(&mut session, SessionState::Ready).await;
        session.cmd_tx.send(UiCommand::Generate).unwrap();

        let seen = wait_for_state(&mut session, SessionState::Failed).await;
        assert!(seen.iter().any(
            |e| matches!(e, SessionEvent::SessionError { message } if message.contains("effect not applicable"))
        ));

        // The asset survived, so generate can be re-triggered from Failed.
        session.cmd_tx.send(UiCommand::Generate).unwrap();
        wait_for_state(&mut session, SessionState::Submitting).await;

        session.cmd_tx.send(UiCommand::Quit).unwrap();
        session.handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn download_is_ignored_outside_complete() {
        let backend = Arc::new(TestBackend::default());
        let mut session = spawn_session(backend.clone());

        session.cmd_tx.send(UiCommand::Download).unwrap();
        loop {
            match session.events.recv().await.expect("session ended early") {
                SessionEvent::Info(msg) => {
                    assert!(msg.contains("ignoring download"));
                    break;
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert_eq!(backend.downloads.load(Ordering::Relaxed), 0);

        session.cmd_tx.send(UiCommand::Quit).unwrap();
        session.handle.await.unwrap().unwrap();
    }
}
