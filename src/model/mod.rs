//! Data model shared by every pipeline stage.
//!
//! All artifact types are plain serde structs. None of them hold handles to
//! each other: a document names the plan revision it came from, a report names
//! the plan revision it checked, and so on. That keeps every artifact
//! immutable once published and lets the store persist each one on its own.

pub mod bundle;
pub mod document;
pub mod plan;
pub mod report;
pub mod speech;

pub use bundle::{ContentBundle, FigureRef, PaperMetadata, Section, SectionId, TableRef};
pub use document::{
    CompileResult, CompileStatus, DocumentSource, FailureCategory, RenderOptions, SourceOrigin,
};
pub use plan::{NarrativeRole, PlanOrigin, PresentationPlan, SlideElement, SlideSpec};
pub use report::{Issue, IssueKind, RepairReport, RepairResult, Severity, VerificationReport};
pub use speech::{SpeechScript, SpeechSegment};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Opaque identifier of one pipeline session.
///
/// Format: `YYYYMMDD-HHMMSS-<8 hex>`; sortable by creation time and unique
/// across concurrent runs thanks to the random suffix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        let stamp = chrono::Utc::now().format("%Y%m%d-%H%M%S");
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("{stamp}-{}", &suffix[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SessionId {
    type Err = String;

    /// Accepts any non-empty token of ASCII alphanumerics, `-` and `_`, so
    /// ids can always be used as a single path component.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("session id is empty".into());
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(format!("session id '{s}' contains illegal characters"));
        }
        Ok(Self(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_unique_and_path_safe() {
        let a = SessionId::new();
        let b = SessionId::new();
        assert_ne!(a, b);
        assert!(a.as_str().parse::<SessionId>().is_ok());
        assert_eq!(a.as_str().len(), "20260101-000000-".len() + 8);
    }

    #[test]
    fn session_id_rejects_path_components() {
        assert!("../etc".parse::<SessionId>().is_err());
        assert!("a/b".parse::<SessionId>().is_err());
        assert!("".parse::<SessionId>().is_err());
        assert!("run_42-x".parse::<SessionId>().is_ok());
    }
}
