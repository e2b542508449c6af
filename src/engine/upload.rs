//! Upload step: synthesize a CDN file name, obtain a signed URL, PUT the
//! file bytes, and return the conventional download URL.

use crate::engine::chroma::ChromaClient;
use crate::error::PipelineResult;
use crate::model::UploadedAsset;
use rand::Rng;
use std::path::Path;

const ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Random alphanumeric identifier, nanoid-style.
pub(crate) fn random_id(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect()
}

/// `<21-char-alnum>.<ext>` where `<ext>` is the input's extension, or `jpg`
/// when there is none.
pub(crate) fn synthesize_file_name(path: &Path) -> String {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .unwrap_or("jpg");
    format!("{}.{}", random_id(21), ext)
}

/// MIME type for the PUT Content-Type header, from the file extension.
pub(crate) fn content_type_for(file_name: &str) -> &'static str {
    let ext = file_name.rsplit('.').next().map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "application/octet-stream",
    }
}

/// Upload `path` and return the CDN URL it is now addressable at.
pub(crate) async fn upload_file(
    client: &ChromaClient,
    path: &Path,
) -> PipelineResult<UploadedAsset> {
    let file_name = synthesize_file_name(path);
    let body = tokio::fs::read(path).await?;
    let signed_url = client.fetch_signed_url(&file_name).await?;
    client
        .upload_bytes(&signed_url, content_type_for(&file_name), body.into())
        .await?;
    let url = client.cdn_url(&file_name);
    tracing::debug!(%url, "uploaded");
    Ok(UploadedAsset { url, file_name })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn split(name: &str) -> (&str, &str) {
        name.split_once('.').expect("name has an extension")
    }

    #[test]
    fn synthesized_name_is_21_alnum_chars_plus_extension() {
        let name = synthesize_file_name(&PathBuf::from("photos/cat.png"));
        let (id, ext) = split(&name);
        assert_eq!(id.len(), 21);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_eq!(ext, "png");
    }

    #[test]
    fn missing_extension_defaults_to_jpg() {
        let name = synthesize_file_name(&PathBuf::from("photos/cat"));
        assert_eq!(split(&name).1, "jpg");
    }

    #[test]
    fn synthesized_names_are_unique() {
        let a = synthesize_file_name(&PathBuf::from("x.jpg"));
        let b = synthesize_file_name(&PathBuf::from("x.jpg"));
        assert_ne!(a, b);
    }

    #[test]
    fn content_type_follows_extension() {
        assert_eq!(content_type_for("a.jpg"), "image/jpeg");
        assert_eq!(content_type_for("a.JPEG"), "image/jpeg");
        assert_eq!(content_type_for("a.png"), "image/png");
        assert_eq!(content_type_for("a.webp"), "image/webp");
        assert_eq!(content_type_for("a.bin"), "application/octet-stream");
    }
}
