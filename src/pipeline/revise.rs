//! Feedback-driven plan revision.
//!
//! A revision turns plan N plus free-text feedback into plan N+1 through the
//! planner agent. Coverage is *not* re-enforced here: if the user asks for a
//! section to be dropped, the dropped section shows up as a verification
//! warning rather than being silently put back.
//!
//! Feedback arrives through a [`FeedbackSource`]. The CLI reads stdin; tests
//! use [`ScriptedFeedback`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::info;

use crate::agents::retry::invoke;
use crate::agents::{PlannerAgent, RetryPolicy};
use crate::config::Language;
use crate::error::{AgentRole, Paper2BeamerError};
use crate::model::{ContentBundle, PlanOrigin, PresentationPlan};

use super::planner::slides_from_draft;

/// What the user sees before being asked for the next piece of feedback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnSummary {
    /// 1-indexed turn about to start.
    pub turn: u32,
    pub plan_revision: u32,
    pub slides: usize,
    pub compiled: bool,
    /// Compiled PDF or `.tex` of the current revision, if persisted.
    pub artifact: Option<PathBuf>,
    pub blocking_issues: usize,
}

/// Supplies interactive feedback, one turn at a time.
///
/// Returning `None` (or a stop word, see [`is_stop_signal`]) ends the loop.
#[async_trait]
pub trait FeedbackSource: Send + Sync {
    async fn next_feedback(&self, turn: &TurnSummary) -> Option<String>;
}

/// Pre-recorded feedback, consumed front to back.
#[derive(Debug, Default)]
pub struct ScriptedFeedback {
    queue: Mutex<VecDeque<String>>,
    seen: Mutex<Vec<TurnSummary>>,
}

impl ScriptedFeedback {
    pub fn new<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            queue: Mutex::new(items.into_iter().map(Into::into).collect()),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Summaries shown so far, in order.
    pub fn summaries(&self) -> Vec<TurnSummary> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl FeedbackSource for ScriptedFeedback {
    async fn next_feedback(&self, turn: &TurnSummary) -> Option<String> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(turn.clone());
        }
        self.queue.lock().ok()?.pop_front()
    }
}

/// True for input that ends the interactive loop: empty text or a stop word.
pub fn is_stop_signal(feedback: &str) -> bool {
    let f = feedback.trim();
    f.is_empty()
        || matches!(
            f.to_lowercase().as_str(),
            "exit" | "quit" | "stop" | "q" | "退出"
        )
}

/// Apply `feedback` to `plan`, producing revision `plan.revision + 1`.
///
/// Errors are stage failures; the caller decides whether they abort (batch)
/// or end the loop with a warning (interactive).
pub async fn revise_plan(
    planner: &dyn PlannerAgent,
    bundle: &ContentBundle,
    plan: &PresentationPlan,
    feedback: &str,
    previous_tex: Option<&str>,
    language: Language,
    policy: &RetryPolicy,
) -> Result<PresentationPlan, Paper2BeamerError> {
    let feedback = feedback.trim();
    let draft = invoke(policy, AgentRole::Planner, move || async move {
        planner
            .revise(bundle, plan, feedback, previous_tex, language)
            .await
    })
    .await
    .map_err(|e| Paper2BeamerError::PlanGeneration {
        detail: format!("revision of plan r{} failed", plan.revision),
        source: Some(e),
    })?;

    let slides = slides_from_draft(bundle, &draft).map_err(|e| Paper2BeamerError::PlanGeneration {
        detail: format!("revised plan rejected: {e}"),
        source: None,
    })?;

    let next = plan.successor(
        PlanOrigin::Revised {
            feedback: feedback.to_string(),
        },
        slides,
    );
    info!(
        "Revised plan r{} → r{} ({} slides)",
        plan.revision,
        next.revision,
        next.slides.len()
    );
    Ok(next)
}
