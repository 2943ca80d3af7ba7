//! Content extraction adapter: PDF (path or URL) → [`ContentBundle`].
//!
//! ```text
//! resolve_input ──► read_info ──┬─ Vision:    render ─► encode ─► transcribe ─► normalize ─► parse_markdown
//!                               └─ TextLayer: text layer ─► normalize ─► parse_text_layer ─► render figure pages
//! ```
//!
//! Raw output lands in the session's `raw` namespace at revision 0: the
//! cleaned transcript and one PNG per page that carries a figure caption.

use async_trait::async_trait;
use edgequake_llm::{CompletionOptions, LLMProvider};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::agents::RetryPolicy;
use crate::config::{ExtractionMode, ExtractionOptions, PipelineConfig};
use crate::error::ExtractionError;
use crate::model::{ContentBundle, SessionId};
use crate::progress::ProgressCallback;
use crate::store::{ArtifactKey, ArtifactKind, ArtifactStore};

use super::bundle::{page_asset_name, parse_markdown, parse_text_layer};
use super::encode::{encode_png, to_image_data};
use super::input::resolve_input;
use super::normalize::clean_transcript;
use super::render::{read_info, read_text_layer, render_pages, PdfInfo};
use super::transcribe::transcribe_all;

/// Artifact name of the cleaned, page-delimited transcript.
pub const TRANSCRIPT_ARTIFACT: &str = "transcript.md";

/// Produces a [`ContentBundle`] from a PDF, persisting raw output.
#[async_trait]
pub trait ContentExtractor: Send + Sync {
    async fn extract(
        &self,
        input: &str,
        session: &SessionId,
        store: &dyn ArtifactStore,
    ) -> Result<ContentBundle, ExtractionError>;
}

/// The pdfium-backed extractor, with optional VLM transcription.
#[derive(Clone)]
pub struct PdfExtractor {
    options: ExtractionOptions,
    provider: Option<Arc<dyn LLMProvider>>,
    completion: CompletionOptions,
    policy: RetryPolicy,
    progress: Option<ProgressCallback>,
}

impl std::fmt::Debug for PdfExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfExtractor")
            .field("options", &self.options)
            .field("vision", &self.provider.is_some())
            .finish()
    }
}

impl PdfExtractor {
    /// A text-layer-only extractor.
    pub fn text_layer(options: ExtractionOptions) -> Self {
        Self {
            options,
            provider: None,
            completion: CompletionOptions::default(),
            policy: RetryPolicy {
                max_retries: 0,
                backoff_ms: 0,
                timeout: std::time::Duration::from_secs(60),
            },
            progress: None,
        }
    }

    /// Build from the run configuration; `provider` enables vision mode.
    pub fn from_config(config: &PipelineConfig, provider: Option<Arc<dyn LLMProvider>>) -> Self {
        Self {
            options: config.extraction.clone(),
            provider,
            completion: CompletionOptions {
                temperature: Some(0.1),
                max_tokens: Some(config.max_tokens),
                ..Default::default()
            },
            policy: RetryPolicy::from_config(config),
            progress: config.progress_callback.clone(),
        }
    }

    pub fn options(&self) -> &ExtractionOptions {
        &self.options
    }

    fn effective_mode(&self) -> ExtractionMode {
        match (self.options.mode, &self.provider) {
            (ExtractionMode::Vision, None) => {
                warn!("No LLM provider for vision extraction; using the PDF text layer");
                ExtractionMode::TextLayer
            }
            (mode, _) => mode,
        }
    }

    async fn extract_vision(
        &self,
        pdf: &std::path::Path,
        info: &PdfInfo,
        provider: &Arc<dyn LLMProvider>,
        session: &SessionId,
        store: &dyn ArtifactStore,
    ) -> Result<ContentBundle, ExtractionError> {
        let pages = page_range(info.page_count, self.options.max_pages);
        let images = render_pages(pdf, &self.options, &pages).await?;

        let mut pngs: BTreeMap<usize, Vec<u8>> = BTreeMap::new();
        let mut inputs = Vec::with_capacity(images.len());
        for (idx, img) in images {
            let png = encode_png(&img)
                .map_err(|e| ExtractionError::Internal(format!("encoding page {}: {e}", idx + 1)))?;
            inputs.push((idx + 1, to_image_data(&png)));
            pngs.insert(idx + 1, png);
        }

        let transcripts = transcribe_all(
            provider,
            inputs,
            &self.completion,
            &self.policy,
            self.options.concurrency,
            self.progress.as_ref(),
        )
        .await;

        let failed = transcripts.iter().filter(|t| t.error.is_some()).count();
        let tokens: usize = transcripts.iter().map(|t| t.input_tokens + t.output_tokens).sum();
        info!(
            "Transcribed {} pages ({} failed, {} tokens)",
            transcripts.len(),
            failed,
            tokens
        );
        if failed == transcripts.len() {
            let detail = transcripts
                .iter()
                .find_map(|t| t.error.clone())
                .unwrap_or_else(|| "document has no pages".to_string());
            return Err(ExtractionError::EmptyContent {
                path: pdf.to_path_buf(),
                detail: format!("every page failed to transcribe: {detail}"),
            });
        }

        let cleaned: Vec<(usize, String)> = transcripts
            .iter()
            .filter(|t| t.error.is_none())
            .map(|t| (t.page_num, clean_transcript(&t.markdown)))
            .collect();
        store_transcript(store, session, &cleaned).await?;

        let bundle = parse_markdown(&cleaned, info.title.as_deref(), info.author.as_deref(), info.page_count);
        for page in figure_pages(&bundle) {
            if let Some(png) = pngs.get(&page) {
                store_page(store, session, page, png).await?;
            }
        }
        Ok(bundle)
    }

    async fn extract_text_layer(
        &self,
        pdf: &std::path::Path,
        info: &PdfInfo,
        session: &SessionId,
        store: &dyn ArtifactStore,
    ) -> Result<ContentBundle, ExtractionError> {
        let pages = read_text_layer(pdf, self.options.password.as_deref(), self.options.max_pages).await?;
        let cleaned: Vec<(usize, String)> = pages
            .into_iter()
            .map(|(n, text)| (n, clean_transcript(&text)))
            .filter(|(_, text)| !text.is_empty())
            .collect();
        if cleaned.is_empty() {
            return Err(ExtractionError::EmptyContent {
                path: pdf.to_path_buf(),
                detail: "PDF has no text layer; use vision extraction".to_string(),
            });
        }
        store_transcript(store, session, &cleaned).await?;

        let bundle = parse_text_layer(&cleaned, info.title.as_deref(), info.author.as_deref(), info.page_count);

        let wanted: Vec<usize> = figure_pages(&bundle).into_iter().map(|p| p - 1).collect();
        if !wanted.is_empty() {
            for (idx, img) in render_pages(pdf, &self.options, &wanted).await? {
                let png = encode_png(&img)
                    .map_err(|e| ExtractionError::Internal(format!("encoding page {}: {e}", idx + 1)))?;
                store_page(store, session, idx + 1, &png).await?;
            }
        }
        Ok(bundle)
    }
}

#[async_trait]
impl ContentExtractor for PdfExtractor {
    async fn extract(
        &self,
        input: &str,
        session: &SessionId,
        store: &dyn ArtifactStore,
    ) -> Result<ContentBundle, ExtractionError> {
        let start = Instant::now();
        let resolved = resolve_input(input, self.options.download_timeout_secs).await?;
        let pdf = resolved.path().to_path_buf();
        let info = read_info(&pdf, self.options.password.as_deref()).await?;
        info!("Extracting '{}' ({} pages)", resolved.file_name(), info.page_count);

        let bundle = match (self.effective_mode(), &self.provider) {
            (ExtractionMode::Vision, Some(provider)) => {
                self.extract_vision(&pdf, &info, provider, session, store).await?
            }
            _ => self.extract_text_layer(&pdf, &info, session, store).await?,
        };

        ensure_content(&pdf, &bundle)?;
        info!(
            "Extracted {} sections, {} figures, {} tables in {}ms",
            bundle.sections.len(),
            bundle.figures.len(),
            bundle.tables.len(),
            start.elapsed().as_millis()
        );
        Ok(bundle)
    }
}

/// Reject bundles a planner cannot work from.
pub fn ensure_content(pdf: &std::path::Path, bundle: &ContentBundle) -> Result<(), ExtractionError> {
    if bundle.is_empty() {
        return Err(ExtractionError::EmptyContent {
            path: pdf.to_path_buf(),
            detail: "no sections with text were found".to_string(),
        });
    }
    Ok(())
}

/// Document metadata for a path or URL, without any LLM call.
pub async fn inspect(input: &str, timeout_secs: u64, password: Option<&str>) -> Result<PdfInfo, ExtractionError> {
    let resolved = resolve_input(input, timeout_secs).await?;
    let path: PathBuf = resolved.path().to_path_buf();
    read_info(&path, password).await
}

fn page_range(page_count: usize, max_pages: Option<usize>) -> Vec<usize> {
    let n = max_pages.map_or(page_count, |m| m.min(page_count));
    (0..n).collect()
}

/// 1-indexed pages whose raster backs at least one figure.
fn figure_pages(bundle: &ContentBundle) -> BTreeSet<usize> {
    bundle.figures.iter().filter_map(|f| f.page).filter(|p| *p > 0).collect()
}

async fn store_transcript(
    store: &dyn ArtifactStore,
    session: &SessionId,
    pages: &[(usize, String)],
) -> Result<(), ExtractionError> {
    let mut doc = String::new();
    for (n, text) in pages {
        doc.push_str(&format!("<!-- page {n} -->\n{text}\n\n"));
    }
    let key = ArtifactKey::new(ArtifactKind::Raw, 0, TRANSCRIPT_ARTIFACT);
    store.put(session, &key, doc.as_bytes()).await?;
    debug!("Stored transcript ({} bytes)", doc.len());
    Ok(())
}

async fn store_page(
    store: &dyn ArtifactStore,
    session: &SessionId,
    page: usize,
    png: &[u8],
) -> Result<(), ExtractionError> {
    let key = ArtifactKey::new(ArtifactKind::Raw, 0, page_asset_name(page));
    store.put(session, &key, png).await?;
    Ok(())
}
