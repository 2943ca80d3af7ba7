//! Pipeline state machine.
//!
//! ```text
//! CREATED → EXTRACTED → PLANNED → DOCUMENT_GENERATED → COMPILED(ok|failed) → VERIFIED
//!                                        ▲                    │                 │
//!                                        └── retry ───────────┘          REPAIRED ⇄ VERIFIED
//!                                                                               │
//!                                                   FINALIZED ⇄ REVISING ◀──────┘
//! ```
//!
//! After the convergence loop an accepted repair revision goes back through
//! `DOCUMENT_GENERATED` so the final deck matches the final plan.
//!
//! Any non-terminal state may move to `FAILED`. Every transition is logged
//! with a timestamp and ends up in the session result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::error::Paper2BeamerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PipelineState {
    Created,
    Extracted,
    Planned,
    DocumentGenerated,
    Compiled { success: bool },
    Verified,
    Repaired,
    Finalized,
    Revising,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Created => f.write_str("CREATED"),
            PipelineState::Extracted => f.write_str("EXTRACTED"),
            PipelineState::Planned => f.write_str("PLANNED"),
            PipelineState::DocumentGenerated => f.write_str("DOCUMENT_GENERATED"),
            PipelineState::Compiled { success: true } => f.write_str("COMPILED(success)"),
            PipelineState::Compiled { success: false } => f.write_str("COMPILED(failure)"),
            PipelineState::Verified => f.write_str("VERIFIED"),
            PipelineState::Repaired => f.write_str("REPAIRED"),
            PipelineState::Finalized => f.write_str("FINALIZED"),
            PipelineState::Revising => f.write_str("REVISING"),
            PipelineState::Failed => f.write_str("FAILED"),
        }
    }
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Failed)
    }

    /// Whether `self → to` is a legal move.
    pub fn can_move_to(&self, to: PipelineState) -> bool {
        use PipelineState::*;
        if to == Failed {
            return !self.is_terminal();
        }
        match (*self, to) {
            (Created, Extracted) => true,
            (Extracted, Planned) => true,
            (Planned, DocumentGenerated) => true,
            // Compilation may be skipped by configuration.
            (DocumentGenerated, Compiled { .. } | Verified | Finalized) => true,
            (Compiled { success: false }, DocumentGenerated) => true,
            (Compiled { .. }, Verified | Finalized) => true,
            // A repaired plan is re-rendered once the loop settles.
            (Verified, Repaired | DocumentGenerated | Finalized) => true,
            (Repaired, Verified | DocumentGenerated | Finalized) => true,
            (Finalized, Revising) => true,
            (Revising, Planned | Finalized) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub from: PipelineState,
    pub to: PipelineState,
    pub at: DateTime<Utc>,
}

/// Current state plus the log of how the session got there.
#[derive(Debug, Clone)]
pub struct StateMachine {
    current: PipelineState,
    log: Vec<Transition>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            current: PipelineState::Created,
            log: Vec::new(),
        }
    }

    pub fn current(&self) -> PipelineState {
        self.current
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.log
    }

    pub fn advance(&mut self, to: PipelineState) -> Result<(), Paper2BeamerError> {
        if !self.current.can_move_to(to) {
            return Err(Paper2BeamerError::InvalidTransition {
                from: self.current.to_string(),
                to: to.to_string(),
            });
        }
        debug!("State {} → {}", self.current, to);
        self.log.push(Transition {
            from: self.current,
            to,
            at: Utc::now(),
        });
        self.current = to;
        Ok(())
    }

    /// Move to `FAILED` unless already there.
    pub fn fail(&mut self) {
        if !self.current.is_terminal() {
            self.log.push(Transition {
                from: self.current,
                to: PipelineState::Failed,
                at: Utc::now(),
            });
            self.current = PipelineState::Failed;
        }
    }
}
