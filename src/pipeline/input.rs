//! Input resolution: turn a user-supplied path or URL into a [`CardImage`].
//!
//! Cards are small (a phone photo is a few MB at most), so both local files
//! and downloads are read straight into memory. The mime type comes from the
//! file extension or the `Content-Type` header when those name a supported
//! type, and from the magic bytes otherwise.

use crate::error::CardError;
use crate::pipeline::encode::{canonical_mime, CardImage};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve the input string to a validated card image.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<CardImage, CardError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else if input.trim().is_empty() {
        Err(CardError::InvalidInput {
            input: input.to_string(),
        })
    } else {
        read_local(input).await
    }
}

async fn read_local(path_str: &str) -> Result<CardImage, CardError> {
    let path = PathBuf::from(path_str);

    let bytes = match tokio::fs::read(&path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(CardError::PermissionDenied { path });
        }
        Err(_) => return Err(CardError::FileNotFound { path }),
    };

    debug!("Read local card: {} ({} bytes)", path.display(), bytes.len());
    match mime_from_extension(&path) {
        Some(mime) => CardImage::new(bytes, mime),
        None => CardImage::sniff(bytes),
    }
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<CardImage, CardError> {
    info!("Downloading card from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| CardError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| download_error(url, timeout_secs, e))?;

    if !response.status().is_success() {
        return Err(CardError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let declared = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(canonical_mime);

    let bytes = response
        .bytes()
        .await
        .map_err(|e| download_error(url, timeout_secs, e))?
        .to_vec();

    info!("Downloaded {} bytes", bytes.len());
    match declared {
        Some(mime) => CardImage::new(bytes, mime),
        None => CardImage::sniff(bytes),
    }
}

fn download_error(url: &str, timeout_secs: u64, e: reqwest::Error) -> CardError {
    if e.is_timeout() {
        CardError::DownloadTimeout {
            url: url.to_string(),
            secs: timeout_secs,
        }
    } else {
        CardError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        }
    }
}

/// Mime type implied by a file extension, when it names a supported type.
pub fn mime_from_extension(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/card.jpg"));
        assert!(is_url("http://example.com/card.jpg"));
        assert!(!is_url("/tmp/card.jpg"));
        assert!(!is_url("card.jpg"));
        assert!(!is_url(""));
    }

    #[test]
    fn extension_mapping() {
        assert_eq!(mime_from_extension(Path::new("a/B.JPG")), Some("image/jpeg"));
        assert_eq!(mime_from_extension(Path::new("card.webp")), Some("image/webp"));
        assert_eq!(mime_from_extension(Path::new("card.heic")), None);
        assert_eq!(mime_from_extension(Path::new("card")), None);
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let err = resolve_input("/definitely/not/here.png", 5)
            .await
            .expect_err("must fail");
        assert!(matches!(err, CardError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn local_file_without_extension_is_sniffed() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR").expect("write");
        let path = file.path().to_string_lossy().to_string();

        let img = resolve_input(&path, 5).await.expect("resolves");
        assert_eq!(img.mime(), "image/png");
    }

    #[tokio::test]
    async fn blank_input_is_invalid() {
        assert!(matches!(
            resolve_input("  ", 5).await,
            Err(CardError::InvalidInput { .. })
        ));
    }
}
