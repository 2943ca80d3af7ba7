//! LaTeX sources and compile outcomes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::config::Language;

/// LaTeX text derived from exactly one plan revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSource {
    pub plan_revision: u32,
    pub theme: String,
    pub language: Language,
    pub options: RenderOptions,
    pub origin: SourceOrigin,
    pub content: String,
}

/// Deterministic rendering switches used by compile fix-ups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderOptions {
    /// Escape everything, including `$…$` math spans.
    #[serde(default)]
    pub safe_mode: bool,
    /// Figure assets replaced by a framed placeholder.
    #[serde(default)]
    pub omitted_resources: BTreeSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceOrigin {
    Rendered,
    /// Text patch produced during compile attempt `attempt`.
    Patched { attempt: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompileStatus {
    Success,
    Failure,
}

/// Recognised classes of compiler failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureCategory {
    SyntaxError,
    MissingResource { names: Vec<String> },
    Timeout,
    Unknown,
}

/// Outcome of one compiler invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileResult {
    pub status: CompileStatus,
    pub plan_revision: u32,
    /// 1-indexed attempt number within the compile loop.
    pub attempt: u32,
    /// Location of the compiled PDF when `status` is `Success`.
    #[serde(default)]
    pub artifact: Option<PathBuf>,
    #[serde(default)]
    pub log: String,
    #[serde(default)]
    pub category: Option<FailureCategory>,
}

impl CompileResult {
    pub fn succeeded(&self) -> bool {
        self.status == CompileStatus::Success
    }
}

impl DocumentSource {
    /// Artifact name used for this source inside the document namespace.
    pub fn artifact_name(&self, attempt: u32) -> String {
        format!("attempt-{attempt}.tex")
    }
}
