use thiserror::Error;

/// Failure taxonomy for the remote pipeline. Each step maps to exactly one
/// variant; all of them are terminal for the invocation that raised them.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to get signed upload URL ({status})")]
    UploadUrl { status: reqwest::StatusCode },

    #[error("failed to upload file ({status})")]
    UploadTransfer { status: reqwest::StatusCode },

    #[error("failed to submit job ({status})")]
    Submission { status: reqwest::StatusCode },

    #[error("failed to check job status ({status})")]
    StatusCheck { status: reqwest::StatusCode },

    #[error("job failed: {message}")]
    JobFailed { message: String },

    #[error("job timed out after {attempts} status checks")]
    Timeout { attempts: u32 },

    #[error("no media URL in completed job result")]
    MissingResult,

    #[error("download failed: {0}")]
    Download(String),

    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// True for the cancellation marker raised when a stale task is torn down.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
