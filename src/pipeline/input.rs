//! Input resolution: normalise a user-supplied path or URL to a local PDF.
//!
//! ## Why download to a temp file?
//!
//! pdfium needs a file-system path. Downloading to a `TempDir` gives it one
//! while cleanup happens automatically when [`ResolvedInput`] is dropped. The
//! `%PDF` magic bytes are checked before returning so callers get a
//! meaningful [`ExtractionError`] rather than a pdfium failure.

use crate::error::ExtractionError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

/// A local PDF path, possibly backed by a temp download.
#[derive(Debug)]
pub enum ResolvedInput {
    Local(PathBuf),
    /// The `TempDir` is kept alive until processing completes.
    Downloaded { path: PathBuf, _temp_dir: TempDir },
}

impl ResolvedInput {
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Downloaded { path, .. } => path,
        }
    }

    /// Human-facing name of the source document.
    pub fn file_name(&self) -> String {
        self.path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "paper.pdf".to_string())
    }
}

pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve the input string to a local PDF file path.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, ExtractionError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        resolve_local(Path::new(input))
    }
}

fn check_magic(path: &Path, head: &[u8]) -> Result<(), ExtractionError> {
    if head.len() >= 4 && &head[..4] != b"%PDF" {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&head[..4]);
        return Err(ExtractionError::NotAPdf {
            path: path.to_path_buf(),
            magic,
        });
    }
    if head.len() < 4 {
        return Err(ExtractionError::Unreadable {
            path: path.to_path_buf(),
            detail: format!("file is only {} bytes long", head.len()),
        });
    }
    Ok(())
}

fn resolve_local(path: &Path) -> Result<ResolvedInput, ExtractionError> {
    let path = path.to_path_buf();
    if !path.exists() {
        return Err(ExtractionError::FileNotFound { path });
    }

    let mut file = match std::fs::File::open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(ExtractionError::PermissionDenied { path });
        }
        Err(_) => return Err(ExtractionError::FileNotFound { path }),
    };

    let mut head = Vec::with_capacity(4);
    file.by_ref()
        .take(4)
        .read_to_end(&mut head)
        .map_err(|e| ExtractionError::Unreadable {
            path: path.clone(),
            detail: e.to_string(),
        })?;
    check_magic(&path, &head)?;

    debug!("Resolved local PDF: {}", path.display());
    Ok(ResolvedInput::Local(path))
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, ExtractionError> {
    info!("Downloading PDF from: {}", url);
    let failed = |reason: String| ExtractionError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            ExtractionError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let disposition = response
        .headers()
        .get(reqwest::header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let filename = pick_filename(url, disposition.as_deref());

    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;

    let temp_dir = TempDir::new().map_err(|e| ExtractionError::Internal(e.to_string()))?;
    let file_path = temp_dir.path().join(&filename);
    check_magic(&file_path, &bytes)?;

    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| ExtractionError::Internal(format!("Failed to write temp file: {}", e)))?;

    info!("Downloaded {} bytes to: {}", bytes.len(), file_path.display());
    Ok(ResolvedInput::Downloaded {
        path: file_path,
        _temp_dir: temp_dir,
    })
}

/// Filename from `Content-Disposition`, else the last URL segment, else a default.
///
/// arXiv serves `/pdf/2401.01234` with no extension, so `.pdf` is appended
/// when missing.
fn pick_filename(url: &str, content_disposition: Option<&str>) -> String {
    let from_header = content_disposition.and_then(|h| {
        h.split(';')
            .map(str::trim)
            .find_map(|part| part.strip_prefix("filename="))
            .map(|f| f.trim_matches('"').to_string())
    });
    let from_url = || {
        reqwest::Url::parse(url).ok().and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segs| segs.next_back().map(str::to_string))
        })
    };
    let name = from_header
        .or_else(from_url)
        .filter(|n| !n.is_empty() && !n.contains('/') && !n.contains('\\') && !n.starts_with('.'))
        .unwrap_or_else(|| "downloaded.pdf".to_string());
    if name.to_ascii_lowercase().ends_with(".pdf") {
        name
    } else {
        format!("{name}.pdf")
    }
}
