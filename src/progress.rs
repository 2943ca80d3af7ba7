//! Progress-callback trait for pipeline stage events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as the orchestrator moves through its stages.
//!
//! # Why callbacks instead of channels?
//!
//! Callers can forward events to a terminal spinner, a channel or a database
//! row without the library knowing how the host application communicates.
//! The trait is `Send + Sync` because page transcription inside extraction
//! runs concurrently.

use std::fmt;
use std::sync::Arc;

use crate::error::StageWarning;

/// Coarse pipeline stages reported to callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extraction,
    Planning,
    Document,
    Compile,
    Verification,
    Repair,
    Revision,
    Speech,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Extraction => "extraction",
            Stage::Planning => "planning",
            Stage::Document => "document",
            Stage::Compile => "compile",
            Stage::Verification => "verification",
            Stage::Repair => "repair",
            Stage::Revision => "revision",
            Stage::Speech => "speech",
        })
    }
}

/// Called by the pipeline as it runs.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called when a stage begins.
    fn on_stage_start(&self, stage: Stage) {
        let _ = stage;
    }

    /// Called when a stage ends, successfully or degraded.
    ///
    /// # Arguments
    /// * `stage`:  the stage that ended
    /// * `detail`: short human-readable summary
    fn on_stage_complete(&self, stage: Stage, detail: &str) {
        let _ = (stage, detail);
    }

    /// Called before each compiler invocation.
    fn on_compile_attempt(&self, attempt: u32, max_attempts: u32) {
        let _ = (attempt, max_attempts);
    }

    /// Called per transcribed page during vision extraction.
    fn on_page_transcribed(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called whenever a stage degrades.
    fn on_warning(&self, warning: &StageWarning) {
        let _ = warning;
    }

    /// Called at the start of each revision turn (1-indexed).
    fn on_revision_turn(&self, turn: u32, plan_revision: u32) {
        let _ = (turn, plan_revision);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;
