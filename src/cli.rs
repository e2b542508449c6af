use crate::engine::{EngineControl, PipelineEngine};
use crate::model::{now_timestamp, DownloadOutcome, GenerateOutcome, PipelineEvent, RunConfig, RunResult};
use crate::orchestrator::{run_controller, SessionEvent, SessionState, UiCommand};
use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "chroma-effect-cli",
    version,
    about = "Apply a ChromaStudio image effect: upload, generate, poll, download"
)]
pub struct Cli {
    /// Image file to process
    pub file: std::path::PathBuf,

    /// Base URL for the ChromaStudio API
    #[arg(long, default_value = "https://api.chromastudio.ai")]
    pub api_base: String,

    /// Base URL the CDN serves uploaded files from
    #[arg(long, default_value = "https://contents.maxstudio.ai")]
    pub cdn_base: String,

    /// Effect to apply
    #[arg(long, default_value = "cloudstophoto")]
    pub effect: String,

    /// Generation model identifier
    #[arg(long, default_value = "image-effects")]
    pub gen_model: String,

    /// Tool type identifier
    #[arg(long, default_value = "image-effects")]
    pub tool_type: String,

    /// API user identifier
    #[arg(long, default_value = "DObRu1vyStbUynoQmTcHBlhs55z2")]
    pub user_id: String,

    /// Delay between job status checks
    #[arg(long, default_value = "2s")]
    pub poll_interval: humantime::Duration,

    /// Maximum number of status checks before timing out
    #[arg(long, default_value_t = 60)]
    pub max_polls: u32,

    /// Directory the downloaded artifact is saved to
    #[arg(long, default_value = ".")]
    pub output_dir: std::path::PathBuf,

    /// Use --download false to skip fetching the result locally
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub download: bool,

    /// Ask the API to strip its watermark
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub remove_watermark: bool,

    /// Mark the job private on the API side
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub private: bool,

    /// Print JSON result and exit
    #[arg(long)]
    pub json: bool,

    /// Print text progress and summary (default)
    #[arg(long)]
    pub text: bool,

    /// Run silently: suppress all output except errors (for cron usage)
    #[arg(long)]
    pub silent: bool,
}

pub async fn run(args: Cli) -> Result<()> {
    // Validate that --silent can only be used with --json
    if args.silent && !args.json {
        return Err(anyhow::anyhow!(
            "--silent can only be used with --json. Use --silent --json together."
        ));
    }
    if args.json && args.text {
        return Err(anyhow::anyhow!("--json and --text are mutually exclusive."));
    }

    if args.silent {
        return run_engine(args, true).await;
    }
    if args.json {
        return run_engine(args, false).await;
    }
    run_text(args).await
}

/// Build a `RunConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> RunConfig {
    RunConfig {
        api_base: args.api_base.clone(),
        cdn_base: args.cdn_base.clone(),
        gen_model: args.gen_model.clone(),
        tool_type: args.tool_type.clone(),
        effect_id: args.effect.clone(),
        user_id: args.user_id.clone(),
        remove_watermark: args.remove_watermark,
        is_private: args.private,
        poll_interval: Duration::from(args.poll_interval),
        max_polls: args.max_polls,
        user_agent: format!("chroma-effect-cli/{}", env!("CARGO_PKG_VERSION")),
        output_dir: args.output_dir.clone(),
        download: args.download,
    }
}

/// One-shot engine run for the JSON and silent modes.
async fn run_engine(args: Cli, silent: bool) -> Result<()> {
    let cfg = build_config(&args);
    let engine = PipelineEngine::new(cfg).context("failed to build HTTP client")?;
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<PipelineEvent>();
    let (ctrl_tx, ctrl_rx) = mpsc::unbounded_channel::<EngineControl>();

    // Ctrl-C cancels the run; the poll loop stops at its next iteration.
    let signal_handle = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = ctrl_tx.send(EngineControl::Cancel);
        }
    });

    let input = args.file.clone();
    let handle = tokio::spawn(async move { engine.run(input, evt_tx, ctrl_rx).await });

    // Progress events are not rendered in these modes.
    while evt_rx.recv().await.is_some() {}

    let run_res = handle.await.context("pipeline task failed")?;
    signal_handle.abort();
    let result = run_res.context("image-effect pipeline failed")?;

    if !silent {
        println!("{}", serde_json::to_string_pretty(&result)?);
    }
    Ok(())
}

/// Text mode: drive the session controller the way an interactive surface
/// would, rendering status labels as the state machine advances.
async fn run_text(args: Cli) -> Result<()> {
    let cfg = build_config(&args);
    let want_download = cfg.download;
    let engine = Arc::new(PipelineEngine::new(cfg).context("failed to build HTTP client")?);

    let (out_tx, out_handle) = spawn_output_writer();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();
    let (session_tx, mut session_rx) = mpsc::unbounded_channel::<SessionEvent>();

    let controller = tokio::spawn(run_controller(engine, cmd_rx, session_tx));

    let _ = cmd_tx.send(UiCommand::FileSelected(args.file.clone()));

    let mut uploaded_url: Option<String> = None;
    let mut job: Option<GenerateOutcome> = None;
    let mut download: Option<DownloadOutcome> = None;
    let mut failure: Option<String> = None;

    while let Some(ev) = session_rx.recv().await {
        match ev {
            SessionEvent::StateChanged(state) => {
                let _ = out_tx.send(OutputLine::Stderr(crate::output::status_line(state, None)));
                match state {
                    SessionState::Ready => {
                        // First Ready comes from our own upload; generate once.
                        if job.is_none() {
                            let _ = cmd_tx.send(UiCommand::Generate);
                        }
                    }
                    SessionState::Complete => {
                        if want_download {
                            let _ = cmd_tx.send(UiCommand::Download);
                        } else {
                            let _ = cmd_tx.send(UiCommand::Quit);
                        }
                    }
                    SessionState::Failed => {
                        let _ = cmd_tx.send(UiCommand::Quit);
                    }
                    _ => {}
                }
            }
            SessionEvent::PollTick { attempt } => {
                let _ = out_tx.send(OutputLine::Stderr(crate::output::status_line(
                    SessionState::Polling,
                    Some(attempt),
                )));
            }
            SessionEvent::Preview { url } => {
                let _ = out_tx.send(OutputLine::Stderr(format!("Uploaded: {url}")));
                uploaded_url = Some(url);
            }
            SessionEvent::JobComplete(outcome) => {
                let _ = out_tx.send(OutputLine::Stderr(format!("Result: {}", outcome.media_url)));
                job = Some(outcome);
            }
            SessionEvent::DownloadFinished(outcome) => {
                download = Some(outcome);
                let _ = cmd_tx.send(UiCommand::Quit);
            }
            SessionEvent::Info(msg) => {
                let _ = out_tx.send(OutputLine::Stderr(msg));
            }
            SessionEvent::SessionError { message } => {
                let _ = out_tx.send(OutputLine::Stderr(format!("Error: {message}")));
                failure = Some(message);
                let _ = cmd_tx.send(UiCommand::Reset);
            }
            SessionEvent::ResetDone => {}
        }
    }

    controller.await.context("controller task failed")??;

    if failure.is_none() {
        if let (Some(uploaded_url), Some(job)) = (uploaded_url, job) {
            let result = RunResult {
                timestamp_utc: now_timestamp(),
                input: args.file.clone(),
                uploaded_url,
                job_id: job.job_id,
                polls: job.polls,
                media_url: job.media_url,
                download,
            };
            for line in crate::output::build_run_summary(&result).lines {
                let _ = out_tx.send(OutputLine::Stdout(line));
            }
        }
    }

    drop(out_tx);
    let _ = out_handle.await;

    match failure {
        Some(msg) => Err(anyhow::anyhow!(msg)),
        None => Ok(()),
    }
}
