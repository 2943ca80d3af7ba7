//! Error types for the edgequake-paper2beamer library.
//!
//! Errors come in three tiers, matching how far a failure is allowed to
//! travel:
//!
//! * [`Paper2BeamerError`]: **fatal**, the run cannot produce a deck at all
//!   (no content extracted, planner unusable, bad configuration). The
//!   orchestrator turns these into a `Failed` session result once a session
//!   exists; before that they are returned as `Err`.
//!
//! * Stage errors: [`ExtractionError`], [`AgentError`], [`TemplateError`],
//!   [`StorageError`], raised by one collaborator and classified by the
//!   orchestrator according to the stage's retry policy.
//!
//! * [`StageWarning`]: **non-fatal**, a stage degraded (compile retries
//!   exhausted, repair did not converge, speech failed). Stored inside
//!   [`crate::output::SessionResult`] so callers see partial success instead
//!   of losing the whole run to one stage.

use std::path::PathBuf;
use thiserror::Error;

use crate::model::FailureCategory;
use crate::store::ArtifactKind;

/// All fatal errors returned by the edgequake-paper2beamer library.
#[derive(Debug, Error)]
pub enum Paper2BeamerError {
    // ── Stage failures that abort the run ───────────────────────────────
    /// Content extraction failed; there is nothing to plan from.
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    /// The planner could not produce a usable plan.
    #[error("Plan generation failed: {detail}")]
    PlanGeneration {
        detail: String,
        #[source]
        source: Option<AgentError>,
    },

    /// A slide spec violated the renderer's contract. Indicates a bug in
    /// plan validation rather than a recoverable condition.
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// The compiler timed out twice in a row on identical input.
    #[error("Compiler timed out twice on identical source (plan revision {revision}); giving up on this session")]
    CompileTimeoutFatal { revision: u32 },

    /// An illegal pipeline state transition was requested.
    #[error("Invalid pipeline transition {from} → {to}")]
    InvalidTransition { from: String, to: String },

    // ── Infrastructure ──────────────────────────────────────────────────
    /// The artifact store rejected a read or write.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Revision input could not be loaded.
    #[error("Cannot load revision input '{path}': {detail}")]
    RevisionInput { path: PathBuf, detail: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Paper2BeamerError {
    /// Short stage label used in session records.
    pub fn stage_label(&self) -> &'static str {
        match self {
            Paper2BeamerError::Extraction(_) => "extraction",
            Paper2BeamerError::PlanGeneration { .. } => "planning",
            Paper2BeamerError::Template(_) => "document",
            Paper2BeamerError::CompileTimeoutFatal { .. } => "compile",
            Paper2BeamerError::InvalidTransition { .. } => "orchestrator",
            Paper2BeamerError::Storage(_) => "storage",
            Paper2BeamerError::ProviderNotConfigured { .. }
            | Paper2BeamerError::InvalidConfig(_) => "config",
            Paper2BeamerError::RevisionInput { .. } => "revision",
            Paper2BeamerError::Internal(_) => "internal",
        }
    }
}

/// Failure of the content extraction collaborator.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// PDF header/trailer/xref is corrupt, or the password is wrong.
    #[error("PDF '{path}' could not be opened: {detail}")]
    Unreadable { path: PathBuf, detail: String },

    /// Pages were read but nothing usable came out of them.
    #[error("No usable content extracted from '{path}': {detail}")]
    EmptyContent { path: PathBuf, detail: String },

    /// Extraction could not persist its raw output.
    #[error("Failed to store extraction output: {0}")]
    Storage(#[from] StorageError),

    /// Unexpected failure inside the extractor.
    #[error("Extraction failed: {0}")]
    Internal(String),
}

/// Which agent produced an [`AgentError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Transcriber,
    Planner,
    Verifier,
    Repair,
    Reviser,
    Speech,
    TexFix,
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentRole::Transcriber => "transcriber",
            AgentRole::Planner => "planner",
            AgentRole::Verifier => "verifier",
            AgentRole::Repair => "repair",
            AgentRole::Reviser => "reviser",
            AgentRole::Speech => "speech",
            AgentRole::TexFix => "tex-fix",
        };
        f.write_str(s)
    }
}

/// Coarse class of an agent failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentErrorKind {
    RateLimited,
    Timeout,
    Transport,
    Auth,
    MalformedResponse,
    Rejected,
}

/// Failure of one LLM agent invocation.
///
/// `retryable` is decided by the agent implementation at the point of failure;
/// whether and how often to retry is decided by the orchestrator.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
#[error("{role} agent failed ({kind:?}, retryable={retryable}): {message}")]
pub struct AgentError {
    pub role: AgentRole,
    pub kind: AgentErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl AgentError {
    pub fn new(role: AgentRole, kind: AgentErrorKind, message: impl Into<String>) -> Self {
        let retryable = matches!(
            kind,
            AgentErrorKind::RateLimited | AgentErrorKind::Timeout | AgentErrorKind::Transport
        );
        Self {
            role,
            kind,
            message: message.into(),
            retryable,
        }
    }

    pub fn timeout(role: AgentRole, secs: u64) -> Self {
        Self::new(role, AgentErrorKind::Timeout, format!("no response after {secs}s"))
    }

    pub fn malformed(role: AgentRole, message: impl Into<String>) -> Self {
        Self::new(role, AgentErrorKind::MalformedResponse, message)
    }
}

/// Malformed slide spec handed to the Document Generator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Slide {slide}: {detail}")]
pub struct TemplateError {
    pub slide: usize,
    pub detail: String,
}

/// Errors from the artifact store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Append-only violation: the key was already published.
    #[error("Artifact {kind}/r{revision}/{name} already exists in session {session}")]
    AlreadyExists {
        session: String,
        kind: ArtifactKind,
        revision: u32,
        name: String,
    },

    #[error("Artifact {kind}/r{revision}/{name} not found in session {session}")]
    NotFound {
        session: String,
        kind: ArtifactKind,
        revision: u32,
        name: String,
    },

    #[error("Invalid artifact name '{0}'")]
    InvalidName(String),

    #[error("Artifact (de)serialisation failed: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Artifact I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// A non-fatal degradation recorded on the session result.
#[derive(Debug, Clone, Error, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageWarning {
    /// Compile loop ran out of attempts.
    #[error("Compilation failed after {attempts} attempts ({category:?})")]
    CompileExhausted {
        attempts: u32,
        category: FailureCategory,
    },

    /// Compilation was skipped by configuration.
    #[error("Compilation skipped")]
    CompileSkipped,

    /// Repair loop stopped with blocking issues outstanding.
    #[error("{blocking} blocking verification issue(s) remain after {attempts} repair attempt(s)")]
    VerificationUnresolved { blocking: usize, attempts: u32 },

    /// A repair revision made things worse and was not accepted.
    #[error("Repair revision {revision} regressed ({before} → {after} blocking issues); kept revision {kept}")]
    RepairRegressed {
        revision: u32,
        before: usize,
        after: usize,
        kept: u32,
    },

    /// An optional agent pass failed; the stage continued without it.
    #[error("{stage}: {detail}")]
    AgentDegraded { stage: String, detail: String },

    /// The speech script could not be produced.
    #[error("Speech generation failed: {detail}")]
    SpeechFailed { detail: String },

    /// One interactive or batch revision turn failed.
    #[error("Revision turn {turn} failed: {detail}")]
    RevisionFailed { turn: u32, detail: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_error_retryable_by_kind() {
        assert!(AgentError::new(AgentRole::Planner, AgentErrorKind::RateLimited, "429").retryable);
        assert!(AgentError::timeout(AgentRole::Speech, 30).retryable);
        assert!(!AgentError::malformed(AgentRole::Planner, "no slides").retryable);
        assert!(!AgentError::new(AgentRole::Repair, AgentErrorKind::Auth, "bad key").retryable);
    }

    #[test]
    fn agent_error_display_mentions_role() {
        let e = AgentError::new(AgentRole::Planner, AgentErrorKind::RateLimited, "slow down");
        let msg = e.to_string();
        assert!(msg.contains("planner"), "got: {msg}");
        assert!(msg.contains("retryable=true"), "got: {msg}");
    }

    #[test]
    fn compile_exhausted_display() {
        let w = StageWarning::CompileExhausted {
            attempts: 3,
            category: FailureCategory::SyntaxError,
        };
        assert!(w.to_string().contains("3 attempts"));
    }

    #[test]
    fn stage_labels() {
        let e: Paper2BeamerError = ExtractionError::Internal("x".into()).into();
        assert_eq!(e.stage_label(), "extraction");
        let e = Paper2BeamerError::PlanGeneration {
            detail: "empty".into(),
            source: None,
        };
        assert_eq!(e.stage_label(), "planning");
    }

    #[test]
    fn warning_serialises_with_tag() {
        let w = StageWarning::SpeechFailed {
            detail: "boom".into(),
        };
        let json = serde_json::to_string(&w).unwrap();
        assert!(json.contains("\"type\":\"speech_failed\""), "got: {json}");
    }
}
