//! HTTP client for the ChromaStudio image-effects API.
//!
//! Thin transport layer: every method maps to one remote endpoint and turns
//! a non-success status into the matching pipeline error. No retries here.

use crate::engine::download::FetchedMedia;
use crate::error::{PipelineError, PipelineResult};
use crate::model::{RunConfig, StatusResponse, SubmitRequest, SubmitResponse};
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;

pub(crate) struct ChromaClient {
    http: reqwest::Client,
    cfg: RunConfig,
}

impl ChromaClient {
    pub fn new(cfg: &RunConfig) -> PipelineResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .build()?;
        Ok(Self {
            http,
            cfg: cfg.clone(),
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/{}", self.cfg.api_base.trim_end_matches('/'), path)
    }

    /// Download URL the CDN serves an uploaded file from. Built by
    /// convention, never read from the upload response body.
    pub fn cdn_url(&self, file_name: &str) -> String {
        format!("{}/{}", self.cfg.cdn_base.trim_end_matches('/'), file_name)
    }

    /// Ask the API for a pre-signed PUT target for `file_name`.
    pub async fn fetch_signed_url(&self, file_name: &str) -> PipelineResult<String> {
        let resp = self
            .http
            .get(self.api_url("get-emd-upload-url"))
            .query(&[("fileName", file_name)])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(PipelineError::UploadUrl {
                status: resp.status(),
            });
        }
        let url = resp.text().await?;
        tracing::debug!(file_name, "got signed upload URL");
        Ok(url.trim().to_string())
    }

    /// PUT the raw file bytes to the signed URL.
    pub async fn upload_bytes(
        &self,
        signed_url: &str,
        content_type: &str,
        body: Bytes,
    ) -> PipelineResult<()> {
        let resp = self
            .http
            .put(signed_url)
            .header(CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(PipelineError::UploadTransfer {
                status: resp.status(),
            });
        }
        Ok(())
    }

    pub async fn submit_job(&self, image_url: &str) -> PipelineResult<SubmitResponse> {
        let body = SubmitRequest {
            model: self.cfg.gen_model.clone(),
            tool_type: self.cfg.tool_type.clone(),
            effect_id: self.cfg.effect_id.clone(),
            image_url: image_url.to_string(),
            user_id: self.cfg.user_id.clone(),
            remove_watermark: self.cfg.remove_watermark,
            is_private: self.cfg.is_private,
        };
        let resp = self
            .http
            .post(self.api_url("image-gen"))
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(PipelineError::Submission {
                status: resp.status(),
            });
        }
        let data: SubmitResponse = resp.json().await?;
        tracing::debug!(job_id = %data.job_id, status = data.status.as_str(), "job submitted");
        Ok(data)
    }

    pub async fn fetch_status(&self, job_id: &str) -> PipelineResult<StatusResponse> {
        let url = self.api_url(&format!(
            "image-gen/{}/{}/status",
            self.cfg.user_id, job_id
        ));
        let resp = self.http.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(PipelineError::StatusCheck {
                status: resp.status(),
            });
        }
        Ok(resp.json().await?)
    }

    /// Tier-1 download: proxy passthrough of the remote media.
    pub async fn proxy_fetch(&self, media_url: &str) -> PipelineResult<FetchedMedia> {
        let resp = self
            .http
            .get(self.api_url("download-proxy"))
            .query(&[("url", media_url)])
            .send()
            .await?;
        Self::read_media(resp).await
    }

    /// Tier-2 download: fetch the media URL directly, with a cache-busting
    /// timestamp query parameter.
    pub async fn direct_fetch(&self, media_url: &str) -> PipelineResult<FetchedMedia> {
        let sep = if media_url.contains('?') { '&' } else { '?' };
        let ts = time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
        let resp = self
            .http
            .get(format!("{media_url}{sep}t={ts}"))
            .send()
            .await?;
        Self::read_media(resp).await
    }

    async fn read_media(resp: reqwest::Response) -> PipelineResult<FetchedMedia> {
        if !resp.status().is_success() {
            return Err(PipelineError::Download(format!(
                "server returned {}",
                resp.status()
            )));
        }
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let bytes = resp.bytes().await?;
        Ok(FetchedMedia {
            bytes,
            content_type,
        })
    }
}
