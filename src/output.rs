//! Text rendering for CLI output.
//!
//! Maps session states to the status labels the pipeline reports and formats
//! the final run summary for text mode.

use crate::model::{DownloadOutcome, RunResult};
use crate::orchestrator::SessionState;

/// Status label for a session state, with the attempt count while polling.
pub(crate) fn status_line(state: SessionState, attempt: Option<u32>) -> String {
    match state {
        SessionState::Idle => "IDLE".into(),
        SessionState::Uploading => "UPLOADING...".into(),
        SessionState::Ready => "READY".into(),
        SessionState::Submitting => "SUBMITTING JOB...".into(),
        SessionState::Polling => match attempt {
            Some(n) => format!("PROCESSING... ({n})"),
            None => "JOB QUEUED...".into(),
        },
        SessionState::Complete => "COMPLETE".into(),
        SessionState::Failed => "ERROR".into(),
    }
}

pub(crate) fn manual_download_instruction(url: &str) -> String {
    format!("Automatic download failed. Open {url} in a browser and save the image manually.")
}

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

/// Build the final text summary for a completed run.
pub(crate) fn build_run_summary(result: &RunResult) -> TextSummary {
    let mut lines = Vec::new();
    lines.push(format!("Input:    {}", result.input.display()));
    lines.push(format!("Uploaded: {}", result.uploaded_url));
    lines.push(format!(
        "Job:      {} ({} status checks)",
        result.job_id, result.polls
    ));
    lines.push(format!("Result:   {}", result.media_url));
    match &result.download {
        Some(DownloadOutcome::Saved { path, bytes, tier }) => {
            lines.push(format!(
                "Saved:    {} ({} bytes, via {})",
                path.display(),
                bytes,
                tier.as_str()
            ));
        }
        Some(DownloadOutcome::Manual { url }) => {
            lines.push(manual_download_instruction(url));
        }
        None => {}
    }
    TextSummary { lines }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DownloadTier;

    #[test]
    fn polling_label_carries_the_attempt_count() {
        assert_eq!(status_line(SessionState::Polling, Some(7)), "PROCESSING... (7)");
        assert_eq!(status_line(SessionState::Polling, None), "JOB QUEUED...");
        assert_eq!(status_line(SessionState::Complete, None), "COMPLETE");
    }

    #[test]
    fn summary_reports_the_download_tier() {
        let result = RunResult {
            timestamp_utc: String::new(),
            input: "cat.jpg".into(),
            uploaded_url: "https://cdn.example/abc.jpg".into(),
            job_id: "job-9".into(),
            polls: 4,
            media_url: "https://media.example/out.png".into(),
            download: Some(DownloadOutcome::Saved {
                path: "out/cloud_effect_result_a1b2c3d4.png".into(),
                bytes: 1024,
                tier: DownloadTier::Direct,
            }),
        };
        let summary = build_run_summary(&result);
        assert!(summary.lines.iter().any(|l| l.contains("via direct")));
        assert!(summary.lines.iter().any(|l| l.contains("4 status checks")));
    }
}
