//! LLM agent seams.
//!
//! Each agent role is a trait with one request/response method per
//! operation. Implementations report failures as [`AgentError`] with a
//! `retryable` flag and never retry on their own: timeouts and retry policy
//! belong to the orchestrator (see [`retry`]).
//!
//! [`LlmAgents`] implements every role over an `edgequake_llm` provider.
//! Tests substitute scripted implementations.

pub mod json;
pub mod llm;
pub mod retry;

pub use llm::{resolve_provider, LlmAgents};
pub use retry::RetryPolicy;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::{Language, SpeechOptions};
use crate::error::AgentError;
use crate::model::{ContentBundle, PresentationPlan, VerificationReport};

// ── Draft types ──────────────────────────────────────────────────────────

/// Unvalidated plan as returned by an agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanDraft {
    #[serde(default)]
    pub slides: Vec<SlideDraft>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlideDraft {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub elements: Vec<ElementDraft>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ElementDraft {
    Bullet {
        text: String,
        #[serde(default)]
        level: u8,
    },
    Figure {
        id: String,
    },
    Table {
        id: String,
    },
    Code {
        #[serde(default)]
        language: String,
        code: String,
    },
}

/// A semantic-review finding. Always advisory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticFinding {
    #[serde(default)]
    pub slide: Option<usize>,
    #[serde(default)]
    pub reference: Option<String>,
    pub description: String,
}

/// Narration for one slide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrationDraft {
    pub slide: usize,
    pub text: String,
}

/// Planning constraints handed to the planner agent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanConstraints {
    pub language: Language,
    pub max_slides: Option<usize>,
}

// ── Agent traits ─────────────────────────────────────────────────────────

#[async_trait]
pub trait PlannerAgent: Send + Sync {
    /// Draft a plan from scratch.
    async fn plan(
        &self,
        bundle: &ContentBundle,
        constraints: &PlanConstraints,
    ) -> Result<PlanDraft, AgentError>;

    /// Draft a complete replacement plan that applies `feedback` to `plan`.
    async fn revise(
        &self,
        bundle: &ContentBundle,
        plan: &PresentationPlan,
        feedback: &str,
        previous_tex: Option<&str>,
        language: Language,
    ) -> Result<PlanDraft, AgentError>;
}

#[async_trait]
pub trait VerifierAgent: Send + Sync {
    async fn review(
        &self,
        bundle: &ContentBundle,
        plan: &PresentationPlan,
    ) -> Result<Vec<SemanticFinding>, AgentError>;
}

#[async_trait]
pub trait RepairAgent: Send + Sync {
    async fn repair(
        &self,
        bundle: &ContentBundle,
        plan: &PresentationPlan,
        report: &VerificationReport,
    ) -> Result<PlanDraft, AgentError>;
}

#[async_trait]
pub trait SpeechAgent: Send + Sync {
    async fn narrate(
        &self,
        plan: &PresentationPlan,
        options: &SpeechOptions,
        language: Language,
    ) -> Result<Vec<NarrationDraft>, AgentError>;
}

#[async_trait]
pub trait TexFixAgent: Send + Sync {
    /// Return a patched LaTeX source for the failing `source`.
    async fn fix(&self, source: &str, log_excerpt: &str) -> Result<String, AgentError>;
}

/// The set of agents a pipeline run uses.
///
/// Only the planner is mandatory; the optional roles degrade gracefully
/// (no semantic review, deterministic-only repair, no LaTeX patching, no
/// speech).
#[derive(Clone)]
pub struct Agents {
    pub planner: Arc<dyn PlannerAgent>,
    pub verifier: Option<Arc<dyn VerifierAgent>>,
    pub repair: Option<Arc<dyn RepairAgent>>,
    pub speech: Option<Arc<dyn SpeechAgent>>,
    pub tex_fix: Option<Arc<dyn TexFixAgent>>,
}

impl Agents {
    /// Planner only; every optional role disabled.
    pub fn planner_only(planner: Arc<dyn PlannerAgent>) -> Self {
        Self {
            planner,
            verifier: None,
            repair: None,
            speech: None,
            tex_fix: None,
        }
    }

    /// Every role served by one LLM-backed implementation.
    pub fn from_llm(agents: Arc<LlmAgents>) -> Self {
        Self {
            planner: agents.clone(),
            verifier: Some(agents.clone()),
            repair: Some(agents.clone()),
            speech: Some(agents.clone()),
            tex_fix: Some(agents),
        }
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn VerifierAgent>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn with_repair(mut self, repair: Arc<dyn RepairAgent>) -> Self {
        self.repair = Some(repair);
        self
    }

    pub fn with_speech(mut self, speech: Arc<dyn SpeechAgent>) -> Self {
        self.speech = Some(speech);
        self
    }

    pub fn with_tex_fix(mut self, tex_fix: Arc<dyn TexFixAgent>) -> Self {
        self.tex_fix = Some(tex_fix);
        self
    }
}

impl std::fmt::Debug for Agents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agents")
            .field("planner", &"<dyn PlannerAgent>")
            .field("verifier", &self.verifier.is_some())
            .field("repair", &self.repair.is_some())
            .field("speech", &self.speech.is_some())
            .field("tex_fix", &self.tex_fix.is_some())
            .finish()
    }
}
