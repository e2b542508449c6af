use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub api_base: String,
    pub cdn_base: String,
    pub gen_model: String,
    pub tool_type: String,
    pub effect_id: String,
    pub user_id: String,
    pub remove_watermark: bool,
    pub is_private: bool,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    pub max_polls: u32,
    pub user_agent: String,
    pub output_dir: PathBuf,
    pub download: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Upload,
    Submit,
    Poll,
    Download,
}

/// Job status as reported by the API. Anything the server sends that we do
/// not recognize counts as still-in-progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Error,
    Other,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Error => "error",
            JobStatus::Other => "unknown",
        }
    }
}

impl From<String> for JobStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "queued" => JobStatus::Queued,
            "processing" => JobStatus::Processing,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            "error" => JobStatus::Error,
            _ => JobStatus::Other,
        }
    }
}

impl From<JobStatus> for String {
    fn from(s: JobStatus) -> String {
        s.as_str().to_string()
    }
}

/// Progress events emitted by the pipeline engine and consumed by
/// presentation layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineEvent {
    PhaseStarted {
        phase: Phase,
    },
    /// Non-terminal status observed; sent before the inter-poll wait.
    PollTick {
        attempt: u32,
        status: JobStatus,
    },
    Info(InfoEvent),
    RunCompleted {
        // Box to keep PipelineEvent size small.
        result: Box<RunResult>,
    },
}

/// Structured info events for UI/CLI layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InfoEvent {
    UploadedTo { url: String },
    JobSubmitted { job_id: String, status: JobStatus },
    DownloadTierFailed { tier: DownloadTier, error: String },
}

impl InfoEvent {
    /// Render a human-readable message for UI/CLI layers.
    pub fn to_message(&self) -> String {
        match self {
            InfoEvent::UploadedTo { url } => format!("Uploaded to: {}", url),
            InfoEvent::JobSubmitted { job_id, status } => {
                format!("Job submitted: {} (status: {})", job_id, status.as_str())
            }
            InfoEvent::DownloadTierFailed { tier, error } => {
                format!("{} download failed: {}", tier.as_str(), error)
            }
        }
    }
}

/// A file that now lives on the remote CDN. At most one is tracked per
/// session; re-uploading replaces it and reset clears it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedAsset {
    pub url: String,
    pub file_name: String,
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub model: String,
    pub tool_type: String,
    pub effect_id: String,
    pub image_url: String,
    pub user_id: String,
    pub remove_watermark: bool,
    pub is_private: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub job_id: String,
    pub status: JobStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: JobStatus,
    #[serde(default)]
    pub result: Option<ResultField>,
    #[serde(default)]
    pub error: Option<String>,
}

/// The API returns `result` either as a bare object or as a sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultField {
    One(ResultEntry),
    Many(Vec<ResultEntry>),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultEntry {
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub video: Option<String>,
}

impl StatusResponse {
    /// Media reference of the first result entry, checked as
    /// `mediaUrl` > `image` > `video`.
    pub fn media_url(&self) -> Result<&str, PipelineError> {
        let entry = match self.result.as_ref() {
            Some(ResultField::One(e)) => Some(e),
            Some(ResultField::Many(v)) => v.first(),
            None => None,
        };
        entry
            .and_then(|e| {
                e.media_url
                    .as_deref()
                    .or(e.image.as_deref())
                    .or(e.video.as_deref())
            })
            .ok_or(PipelineError::MissingResult)
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadTier {
    Proxy,
    Direct,
}

impl DownloadTier {
    pub fn as_str(self) -> &'static str {
        match self {
            DownloadTier::Proxy => "proxy",
            DownloadTier::Direct => "direct",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DownloadOutcome {
    /// A network tier succeeded and the artifact was written to disk.
    Saved {
        path: PathBuf,
        bytes: u64,
        tier: DownloadTier,
    },
    /// Both network tiers failed; the user has to save the media by hand.
    Manual { url: String },
}

/// Submit + poll + extract result, before any download.
#[derive(Debug, Clone)]
pub struct GenerateOutcome {
    pub job_id: String,
    pub media_url: String,
    pub polls: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    #[serde(default)]
    pub timestamp_utc: String,
    pub input: PathBuf,
    pub uploaded_url: String,
    pub job_id: String,
    pub polls: u32,
    pub media_url: String,
    #[serde(default)]
    pub download: Option<DownloadOutcome>,
}

/// RFC 3339 timestamp for run results.
pub fn now_timestamp() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "now".into())
}
