//! # edgequake-paper2beamer
//!
//! Turn a research paper (PDF) into a Beamer slide deck with LLM agents.
//!
//! ## Why this crate?
//!
//! Generating slides with one big prompt gives decks that skip sections,
//! invent figures and fail to compile. This crate splits the job into
//! stages with explicit contracts: an extraction adapter produces a
//! structured content bundle, a planner agent drafts a slide plan, a
//! deterministic renderer writes LaTeX, and bounded loops take care of
//! compilation failures and coverage gaps. Every intermediate artifact is
//! stored per session and never rewritten, so a run can be inspected or
//! revised later.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Extract   pdfium render + VLM transcription → ContentBundle
//!  ├─ 2. Plan      planner agent → PresentationPlan r0 (coverage enforced)
//!  ├─ 3. Render    plan → Beamer source (pure, deterministic)
//!  ├─ 4. Compile   pdflatex/xelatex with bounded fix-up retries
//!  ├─ 5. Verify    coverage + reference checks (+ advisory semantic review)
//!  ├─ 6. Repair    plan rN → rN+1 until no blocking issue remains
//!  ├─ 7. Revise    optional feedback turns (batch or interactive)
//!  └─ 8. Speech    optional timed speaker script
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_paper2beamer::{run, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = PipelineConfig::builder().theme("Berlin").build()?;
//!     let result = run("paper.pdf", &config).await?;
//!     println!("{}: {:?}", result.status, result.pdf());
//!     std::process::exit(result.status.code());
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `paper2beamer` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-paper2beamer = { version = "0.1", default-features = false }
//! ```
//!
//! ## External tools
//!
//! Compilation needs `pdflatex` (English) or `xelatex` (Chinese) on `PATH`.
//! Use [`PipelineConfigBuilder::skip_compilation`] to emit `.tex` only.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod agents;
pub mod config;
pub mod error;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod session;
pub mod state;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use agents::{Agents, LlmAgents, RetryPolicy};
pub use config::{
    ExtractionMode, ExtractionOptions, Language, NarrativeOrder, PipelineConfig, PipelineConfigBuilder,
    SpeechOptions, SpeechStyle,
};
pub use error::{AgentError, ExtractionError, Paper2BeamerError, StageWarning, StorageError, TemplateError};
pub use model::{ContentBundle, PresentationPlan, SessionId, SpeechScript, VerificationReport};
pub use output::{ExitStatus, SessionResult, StageOutcome, StageRecord};
pub use pipeline::extract::inspect;
pub use pipeline::revise::{FeedbackSource, ScriptedFeedback, TurnSummary};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback, Stage};
pub use session::{revise, run, Pipeline, RevisionSource};
pub use state::PipelineState;
pub use store::{
    ArtifactKey, ArtifactKind, ArtifactRef, ArtifactStore, FsArtifactStore, MemoryArtifactStore, RecordingStore,
};
