//! Vision transcription: one rasterised page in, Markdown out.
//!
//! Prompt text lives in [`crate::prompts`]; timeout and retry come from the
//! shared [`RetryPolicy`] so transcription follows the same policy as every
//! other agent call.
//!
//! A failed page never aborts the document. It comes back as a
//! [`PageTranscript`] with `error` set, and extraction carries on with the
//! pages that worked.

use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::agents::llm::classify_provider_error;
use crate::agents::retry::{invoke, RetryPolicy};
use crate::error::{AgentError, AgentRole};
use crate::progress::ProgressCallback;
use crate::prompts::TRANSCRIBE_SYSTEM_PROMPT;

/// Result of transcribing one page.
#[derive(Debug, Clone)]
pub struct PageTranscript {
    /// 1-indexed page number.
    pub page_num: usize,
    pub markdown: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Transcribe a single page.
///
/// The request is a system prompt followed by one user turn carrying the
/// page image with empty text; the image holds all the content.
pub async fn transcribe_page(
    provider: &Arc<dyn LLMProvider>,
    page_num: usize,
    image: ImageData,
    options: &CompletionOptions,
    policy: &RetryPolicy,
) -> PageTranscript {
    let start = Instant::now();
    let messages = vec![
        ChatMessage::system(TRANSCRIBE_SYSTEM_PROMPT),
        ChatMessage::user_with_images("", vec![image]),
    ];

    let messages = &messages;
    let result = invoke(policy, AgentRole::Transcriber, move || async move {
        provider
            .chat(messages, Some(options))
            .await
            .map_err(|e| classify_provider_error(AgentRole::Transcriber, &e.to_string()))
    })
    .await;

    let duration_ms = start.elapsed().as_millis() as u64;
    match result {
        Ok(response) => {
            debug!(
                "Page {}: {} input tokens, {} output tokens, {}ms",
                page_num, response.prompt_tokens, response.completion_tokens, duration_ms
            );
            PageTranscript {
                page_num,
                markdown: response.content,
                input_tokens: response.prompt_tokens,
                output_tokens: response.completion_tokens,
                duration_ms,
                error: None,
            }
        }
        Err(AgentError { message, .. }) => {
            warn!("Page {}: transcription failed: {}", page_num, message);
            PageTranscript {
                page_num,
                markdown: String::new(),
                input_tokens: 0,
                output_tokens: 0,
                duration_ms,
                error: Some(message),
            }
        }
    }
}

/// Transcribe pages concurrently, returning results in page order.
pub async fn transcribe_all(
    provider: &Arc<dyn LLMProvider>,
    pages: Vec<(usize, ImageData)>,
    options: &CompletionOptions,
    policy: &RetryPolicy,
    concurrency: usize,
    progress: Option<&ProgressCallback>,
) -> Vec<PageTranscript> {
    let total = pages.len();
    let mut results: Vec<PageTranscript> = stream::iter(pages.into_iter().map(|(page_num, img)| {
        let provider = Arc::clone(provider);
        async move {
            let t = transcribe_page(&provider, page_num, img, options, policy).await;
            if let Some(cb) = progress {
                cb.on_page_transcribed(page_num, total);
            }
            t
        }
    }))
    .buffer_unordered(concurrency.max(1))
    .collect()
    .await;
    results.sort_by_key(|t| t.page_num);
    results
}
