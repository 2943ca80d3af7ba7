//! PDF access through pdfium: page rasters, text layer and document info.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which keeps thread-local
//! state and is CPU-heavy. Every entry point here moves the work onto
//! tokio's blocking pool so async workers never stall on rendering.
//!
//! ## Why cap pixels, not DPI?
//!
//! Page sizes vary wildly. `max_rendered_pixels` caps the longest edge
//! regardless of physical size, keeping memory bounded and the PNGs small
//! enough to embed in a slide deck.

use image::DynamicImage;
use pdfium_render::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::ExtractionOptions;
use crate::error::ExtractionError;

/// Document-level information read without any LLM call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PdfInfo {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub page_count: usize,
    pub pdf_version: String,
}

fn open<'a>(
    pdfium: &'a Pdfium,
    path: &Path,
    password: Option<&'a str>,
) -> Result<PdfDocument<'a>, ExtractionError> {
    pdfium.load_pdf_from_file(path, password).map_err(|e| {
        let detail = format!("{:?}", e);
        let detail = if detail.to_ascii_lowercase().contains("password") {
            if password.is_some() {
                "wrong password".to_string()
            } else {
                "document is encrypted; supply a password".to_string()
            }
        } else {
            detail
        };
        ExtractionError::Unreadable {
            path: path.to_path_buf(),
            detail,
        }
    })
}

async fn blocking<T, F>(what: &str, f: F) -> Result<T, ExtractionError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ExtractionError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ExtractionError::Internal(format!("{what} task panicked: {e}")))?
}

/// Rasterise the given 0-indexed pages.
///
/// Returns `(page_index_0based, image)` pairs; out-of-range indices are skipped.
pub async fn render_pages(
    pdf_path: &Path,
    options: &ExtractionOptions,
    page_indices: &[usize],
) -> Result<Vec<(usize, DynamicImage)>, ExtractionError> {
    let path: PathBuf = pdf_path.to_path_buf();
    let max_pixels = options.max_rendered_pixels;
    let password = options.password.clone();
    let indices = page_indices.to_vec();

    blocking("Render", move || {
        let pdfium = Pdfium::default();
        let document = open(&pdfium, &path, password.as_deref())?;
        let pages = document.pages();
        let total = pages.len() as usize;

        let render_config = PdfRenderConfig::new()
            .set_target_width(max_pixels as i32)
            .set_maximum_height(max_pixels as i32);

        let mut out = Vec::with_capacity(indices.len());
        for idx in indices {
            if idx >= total {
                warn!("Skipping page {} (out of range, total={})", idx + 1, total);
                continue;
            }
            let page = pages.get(idx as u16).map_err(|e| ExtractionError::Unreadable {
                path: path.clone(),
                detail: format!("page {}: {:?}", idx + 1, e),
            })?;
            let bitmap = page
                .render_with_config(&render_config)
                .map_err(|e| ExtractionError::Unreadable {
                    path: path.clone(),
                    detail: format!("rasterising page {}: {:?}", idx + 1, e),
                })?;
            let image = bitmap.as_image();
            debug!("Rendered page {} → {}x{} px", idx + 1, image.width(), image.height());
            out.push((idx, image));
        }
        Ok(out)
    })
    .await
}

/// Read the embedded text layer of up to `max_pages` pages.
///
/// Returns `(page_num_1based, text)`; pages without a text layer yield an
/// empty string.
pub async fn read_text_layer(
    pdf_path: &Path,
    password: Option<&str>,
    max_pages: Option<usize>,
) -> Result<Vec<(usize, String)>, ExtractionError> {
    let path = pdf_path.to_path_buf();
    let password = password.map(str::to_string);

    blocking("Text layer", move || {
        let pdfium = Pdfium::default();
        let document = open(&pdfium, &path, password.as_deref())?;
        let pages = document.pages();
        let limit = max_pages.unwrap_or(usize::MAX);

        let mut out = Vec::new();
        for (idx, page) in pages.iter().enumerate().take(limit) {
            let text = match page.text() {
                Ok(t) => t.all(),
                Err(e) => {
                    warn!("Page {}: no text layer ({:?})", idx + 1, e);
                    String::new()
                }
            };
            out.push((idx + 1, text));
        }
        info!("Read text layer of {} pages", out.len());
        Ok(out)
    })
    .await
}

/// Read document metadata without rendering pages.
pub async fn read_info(pdf_path: &Path, password: Option<&str>) -> Result<PdfInfo, ExtractionError> {
    let path = pdf_path.to_path_buf();
    let password = password.map(str::to_string);

    blocking("Metadata", move || {
        let pdfium = Pdfium::default();
        let document = open(&pdfium, &path, password.as_deref())?;
        let metadata = document.metadata();

        let get_meta = |tag: PdfDocumentMetadataTagType| -> Option<String> {
            metadata.get(tag).and_then(|t| {
                let v = t.value().trim().to_string();
                (!v.is_empty()).then_some(v)
            })
        };

        Ok(PdfInfo {
            title: get_meta(PdfDocumentMetadataTagType::Title),
            author: get_meta(PdfDocumentMetadataTagType::Author),
            subject: get_meta(PdfDocumentMetadataTagType::Subject),
            creator: get_meta(PdfDocumentMetadataTagType::Creator),
            producer: get_meta(PdfDocumentMetadataTagType::Producer),
            page_count: document.pages().len() as usize,
            pdf_version: format!("{:?}", document.version()),
        })
    })
    .await
}
