//! Input resolution: turn a user-supplied path or URL into PDF bytes.
//!
//! The pipeline itself works on byte buffers; reading files and downloading
//! URLs only happens here, for the callers that start from a location. The
//! `%PDF` magic is checked before any bytes are handed on so a mislabelled
//! upload fails with a clear error instead of a pdfium load failure.

use crate::error::DdrError;
use crate::output::Origin;
use std::path::PathBuf;
use tracing::{debug, info};

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// How far into the file the header may start; pdfium skips leading bytes
/// up to this offset.
const MAGIC_WINDOW: usize = 1024;

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Reject buffers with no PDF header within the first 1024 bytes.
pub fn check_pdf_magic(bytes: &[u8], origin: Origin) -> Result<(), DdrError> {
    let window = &bytes[..bytes.len().min(MAGIC_WINDOW)];
    if !window.windows(PDF_MAGIC.len()).any(|w| w == PDF_MAGIC) {
        return Err(DdrError::NotAPdf {
            origin,
            magic: bytes.iter().take(PDF_MAGIC.len()).copied().collect(),
        });
    }
    Ok(())
}

/// Load one report from a local path or an HTTP(S) URL.
pub async fn load_input(input: &str, origin: Origin, timeout_secs: u64) -> Result<Vec<u8>, DdrError> {
    let bytes = if is_url(input) {
        download_url(input, timeout_secs).await?
    } else {
        read_local(input).await?
    };
    check_pdf_magic(&bytes, origin)?;
    debug!("Loaded {} report: {} bytes", origin, bytes.len());
    Ok(bytes)
}

async fn read_local(path_str: &str) -> Result<Vec<u8>, DdrError> {
    let path = PathBuf::from(path_str);
    match tokio::fs::read(&path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            Err(DdrError::PermissionDenied { path })
        }
        Err(_) => Err(DdrError::FileNotFound { path }),
    }
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<Vec<u8>, DdrError> {
    info!("Downloading PDF from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| DdrError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            DdrError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            DdrError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(DdrError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response.bytes().await.map_err(|e| DdrError::DownloadFailed {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    info!("Downloaded {} bytes", bytes.len());
    Ok(bytes.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn magic_check() {
        assert!(check_pdf_magic(b"%PDF-1.7\n", Origin::Inspection).is_ok());
        let err = check_pdf_magic(b"PK\x03\x04zip", Origin::Thermal).unwrap_err();
        match err {
            DdrError::NotAPdf { origin, magic } => {
                assert_eq!(origin, Origin::Thermal);
                assert_eq!(magic, b"PK\x03\x04".to_vec());
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(check_pdf_magic(b"", Origin::Inspection).is_err());
    }

    #[test]
    fn magic_after_leading_bytes() {
        let mut prefixed = b"\xEF\xBB\xBF\r\n".to_vec();
        prefixed.extend_from_slice(b"%PDF-1.4\n");
        assert!(check_pdf_magic(&prefixed, Origin::Inspection).is_ok());

        let mut late = vec![b' '; MAGIC_WINDOW];
        late.extend_from_slice(b"%PDF-1.4\n");
        assert!(matches!(check_pdf_magic(&late, Origin::Thermal), Err(DdrError::NotAPdf { .. })));
    }

    #[tokio::test]
    async fn missing_file_is_reported() {
        let err = load_input("/nonexistent/inspection.pdf", Origin::Inspection, 5)
            .await
            .unwrap_err();
        assert!(matches!(err, DdrError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn local_non_pdf_is_rejected() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"hello world").unwrap();
        let err = load_input(f.path().to_str().unwrap(), Origin::Inspection, 5)
            .await
            .unwrap_err();
        assert!(matches!(err, DdrError::NotAPdf { .. }));
    }
}
