//! Result types returned by [`crate::session::Pipeline::run`] and
//! [`crate::session::Pipeline::revise`].
//!
//! A run always ends with a [`SessionResult`], including runs that failed
//! after the session was created: the result says which stage failed, which
//! stages degraded, and where the artifacts are.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::error::StageWarning;
use crate::model::{CompileResult, SessionId, VerificationReport};
use crate::progress::Stage;
use crate::state::{PipelineState, Transition};
use crate::store::ArtifactRef;

/// Overall outcome of a session, mapped onto process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    /// Every stage succeeded (or was skipped by configuration).
    Success,
    /// Output was produced but at least one stage degraded.
    PartialSuccess,
    /// Extraction or plan generation failed; no usable deck.
    Failed,
}

impl ExitStatus {
    pub fn code(&self) -> i32 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::Failed => 1,
            ExitStatus::PartialSuccess => 2,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExitStatus::Success => "success",
            ExitStatus::PartialSuccess => "partial success",
            ExitStatus::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Succeeded,
    Degraded,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub outcome: StageOutcome,
    pub detail: String,
}

/// Final state of one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResult {
    pub session: SessionId,
    pub status: ExitStatus,
    pub final_state: PipelineState,
    pub transitions: Vec<Transition>,
    pub stages: Vec<StageRecord>,
    pub warnings: Vec<StageWarning>,

    /// Plan revision the deck was built from.
    pub plan_revision: Option<u32>,
    pub slide_count: usize,

    /// Last compile result of the accepted plan.
    pub compile: Option<CompileResult>,
    /// Report for the accepted plan.
    pub verification: Option<VerificationReport>,

    /// Interactive or batch revision turns that produced a new plan.
    pub revision_turns: u32,

    /// Where the session's artifacts live, for on-disk stores.
    pub artifacts: Option<PathBuf>,
    /// Receipts for everything the session stored, also written to
    /// `session/r0/manifest.json`.
    #[serde(default)]
    pub published: Vec<ArtifactRef>,

    /// Fatal error message when `status` is `Failed`.
    pub error: Option<String>,

    pub duration_ms: u64,
}

impl SessionResult {
    /// Derive the exit status from stage records.
    pub fn compute_status(final_state: PipelineState, stages: &[StageRecord]) -> ExitStatus {
        if final_state == PipelineState::Failed {
            ExitStatus::Failed
        } else if stages
            .iter()
            .any(|s| matches!(s.outcome, StageOutcome::Degraded | StageOutcome::Failed))
        {
            ExitStatus::PartialSuccess
        } else {
            ExitStatus::Success
        }
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageRecord> {
        self.stages.iter().rev().find(|r| r.stage == stage)
    }

    /// Compiled PDF of the accepted plan, if compilation succeeded.
    pub fn pdf(&self) -> Option<&PathBuf> {
        self.compile.as_ref().and_then(|c| c.artifact.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(stage: Stage, outcome: StageOutcome) -> StageRecord {
        StageRecord {
            stage,
            outcome,
            detail: String::new(),
        }
    }

    #[test]
    fn status_from_stages() {
        let ok = vec![
            record(Stage::Extraction, StageOutcome::Succeeded),
            record(Stage::Compile, StageOutcome::Skipped),
        ];
        assert_eq!(SessionResult::compute_status(PipelineState::Finalized, &ok), ExitStatus::Success);

        let degraded = vec![record(Stage::Compile, StageOutcome::Degraded)];
        assert_eq!(
            SessionResult::compute_status(PipelineState::Finalized, &degraded),
            ExitStatus::PartialSuccess
        );
        assert_eq!(SessionResult::compute_status(PipelineState::Failed, &ok), ExitStatus::Failed);
    }

    #[test]
    fn exit_codes() {
        assert_eq!(ExitStatus::Success.code(), 0);
        assert_eq!(ExitStatus::Failed.code(), 1);
        assert_eq!(ExitStatus::PartialSuccess.code(), 2);
    }
}
