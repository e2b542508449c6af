//! Three-tier result download: proxy passthrough, then a direct fetch, then
//! a manual-save instruction. Each tier runs only if the previous one failed.

use crate::engine::chroma::ChromaClient;
use crate::engine::upload::random_id;
use crate::error::PipelineResult;
use crate::model::{DownloadOutcome, DownloadTier, InfoEvent, PipelineEvent};
use bytes::Bytes;
use std::future::Future;
use std::path::Path;
use tokio::sync::mpsc;

/// Raw media bytes plus the Content-Type the server reported, if any.
pub(crate) struct FetchedMedia {
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

/// Seam over the two network download tiers.
pub(crate) trait MediaSource {
    fn proxy_fetch(
        &self,
        media_url: &str,
    ) -> impl Future<Output = PipelineResult<FetchedMedia>> + Send;
    fn direct_fetch(
        &self,
        media_url: &str,
    ) -> impl Future<Output = PipelineResult<FetchedMedia>> + Send;
}

impl MediaSource for ChromaClient {
    fn proxy_fetch(
        &self,
        media_url: &str,
    ) -> impl Future<Output = PipelineResult<FetchedMedia>> + Send {
        ChromaClient::proxy_fetch(self, media_url)
    }

    fn direct_fetch(
        &self,
        media_url: &str,
    ) -> impl Future<Output = PipelineResult<FetchedMedia>> + Send {
        ChromaClient::direct_fetch(self, media_url)
    }
}

/// File extension for the saved artifact: Content-Type first, URL pattern
/// second, `png` as the last resort.
pub(crate) fn infer_extension(url: &str, content_type: Option<&str>) -> &'static str {
    if let Some(ct) = content_type {
        if ct.contains("jpeg") || ct.contains("jpg") {
            return "jpg";
        }
        if ct.contains("png") {
            return "png";
        }
    }
    let lower = url.to_ascii_lowercase();
    for (pat, ext) in [
        (".jpeg", "jpg"),
        (".jpg", "jpg"),
        (".png", "png"),
        (".webp", "webp"),
    ] {
        if lower.contains(pat) {
            return ext;
        }
    }
    "png"
}

/// Synthesized name for a saved artifact.
pub(crate) fn artifact_file_name(ext: &str) -> String {
    format!("cloud_effect_result_{}.{}", random_id(8), ext)
}

enum FetchedArtifact {
    Fetched { media: FetchedMedia, tier: DownloadTier },
    Manual,
}

/// Try the network tiers in order. Tier failures surface as info events, not
/// errors; exhausting both degrades to the manual instruction.
async fn fetch_artifact<S: MediaSource>(
    source: &S,
    media_url: &str,
    event_tx: &mpsc::UnboundedSender<PipelineEvent>,
) -> FetchedArtifact {
    match source.proxy_fetch(media_url).await {
        Ok(media) => {
            return FetchedArtifact::Fetched {
                media,
                tier: DownloadTier::Proxy,
            }
        }
        Err(e) => {
            let _ = event_tx.send(PipelineEvent::Info(InfoEvent::DownloadTierFailed {
                tier: DownloadTier::Proxy,
                error: e.to_string(),
            }));
        }
    }

    match source.direct_fetch(media_url).await {
        Ok(media) => FetchedArtifact::Fetched {
            media,
            tier: DownloadTier::Direct,
        },
        Err(e) => {
            let _ = event_tx.send(PipelineEvent::Info(InfoEvent::DownloadTierFailed {
                tier: DownloadTier::Direct,
                error: e.to_string(),
            }));
            FetchedArtifact::Manual
        }
    }
}

/// Run the fallback chain and persist the artifact under `output_dir`.
pub(crate) async fn download_artifact<S: MediaSource>(
    source: &S,
    media_url: &str,
    output_dir: &Path,
    event_tx: &mpsc::UnboundedSender<PipelineEvent>,
) -> PipelineResult<DownloadOutcome> {
    match fetch_artifact(source, media_url, event_tx).await {
        FetchedArtifact::Fetched { media, tier } => {
            // Extension inference uses the original result URL, not the
            // cache-busted one.
            let ext = infer_extension(media_url, media.content_type.as_deref());
            let path = output_dir.join(artifact_file_name(ext));
            tokio::fs::write(&path, &media.bytes).await?;
            tracing::debug!(path = %path.display(), tier = tier.as_str(), "artifact saved");
            Ok(DownloadOutcome::Saved {
                path,
                bytes: media.bytes.len() as u64,
                tier,
            })
        }
        FetchedArtifact::Manual => Ok(DownloadOutcome::Manual {
            url: media_url.to_string(),
        }),
    }
}
