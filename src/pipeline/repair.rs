//! Repair: plan revision R + its report → plan revision R+1.
//!
//! Three passes, in order:
//!
//! 1. **Agent** (optional, best effort): the repair agent drafts a full plan
//!    with the report as context. Failures become warnings.
//! 2. **Preservation**: slides of R that no blocking issue pointed at must
//!    survive. Any the agent dropped are put back.
//! 3. **Deterministic**: unknown references are stripped, empty slides get
//!    bullets from their sources, and coverage is enforced. After this pass
//!    no blocking kind the checker knows can remain.
//!
//! The convergence loop that decides whether R+1 is accepted lives in the
//! session orchestrator.

use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::agents::retry::invoke;
use crate::agents::{RepairAgent, RetryPolicy};
use crate::error::{AgentRole, StageWarning};
use crate::model::{
    ContentBundle, PlanOrigin, PresentationPlan, RepairReport, RepairResult, SlideElement,
    SlideSpec, VerificationReport,
};

use super::planner::{enforce_coverage, slides_from_draft, summary_slide};
use super::verify::{check_plan, CheckOptions};

/// Derive the next plan revision addressing `report`.
pub async fn repair(
    bundle: &ContentBundle,
    plan: &PresentationPlan,
    report: &VerificationReport,
    agent: Option<&dyn RepairAgent>,
    options: &CheckOptions,
    policy: &RetryPolicy,
) -> (RepairResult, Vec<StageWarning>) {
    let mut warnings = Vec::new();
    let mut notes = Vec::new();

    let mut slides = match agent {
        Some(agent) => {
            let drafted = invoke(policy, AgentRole::Repair, move || async move {
                agent.repair(bundle, plan, report).await
            })
            .await;
            match drafted.map(|d| slides_from_draft(bundle, &d)) {
                Ok(Ok(slides)) => {
                    notes.push(format!("repair agent proposed {} slides", slides.len()));
                    slides
                }
                Ok(Err(e)) => {
                    warn!("Repair draft rejected: {}", e);
                    warnings.push(StageWarning::AgentDegraded {
                        stage: "repair".into(),
                        detail: format!("invalid draft: {e}"),
                    });
                    plan.slides.clone()
                }
                Err(e) => {
                    warn!("Repair agent failed: {}", e);
                    warnings.push(StageWarning::AgentDegraded {
                        stage: "repair".into(),
                        detail: e.to_string(),
                    });
                    plan.slides.clone()
                }
            }
        }
        None => plan.slides.clone(),
    };

    let restored = preserve_passing(plan, report, &mut slides);
    if restored > 0 {
        notes.push(format!("restored {restored} previously passing slide(s)"));
    }

    let fixed = deterministic_pass(bundle, &mut slides);
    if fixed > 0 {
        notes.push(format!("deterministic pass changed {fixed} item(s)"));
    }

    let next = plan.successor(
        PlanOrigin::Repaired {
            report_revision: report.plan_revision,
        },
        slides,
    );

    let remaining: BTreeSet<String> = check_plan(bundle, &next, options).into_iter().map(|i| i.id).collect();
    let agent_ran = notes.iter().any(|n| n.starts_with("repair agent"));
    let (addressed, unaddressed): (Vec<String>, Vec<String>) =
        report.issues.iter().map(|i| i.id.clone()).partition(|id| {
            if id.starts_with("semantic:") {
                agent_ran
            } else {
                !remaining.contains(id)
            }
        });

    info!(
        "Repair r{} → r{}: {} addressed, {} outstanding",
        plan.revision,
        next.revision,
        addressed.len(),
        unaddressed.len()
    );
    let repair_report = RepairReport {
        from_revision: plan.revision,
        to_revision: next.revision,
        addressed,
        unaddressed,
        notes,
        accepted: true,
    };
    (
        RepairResult {
            plan: next,
            report: repair_report,
        },
        warnings,
    )
}

/// Put back slides that passed verification but are missing from `slides`.
///
/// A slide "passed" when no blocking issue names its index. Identity is
/// title plus sources. Returns the number restored.
fn preserve_passing(plan: &PresentationPlan, report: &VerificationReport, slides: &mut Vec<SlideSpec>) -> usize {
    let flagged: BTreeSet<usize> = report.blocking().filter_map(|i| i.slide).collect();
    let mut restored = 0;
    for original in &plan.slides {
        if flagged.contains(&original.index) {
            continue;
        }
        let present = slides
            .iter()
            .any(|s| s.title == original.title && s.sources == original.sources);
        if !present {
            debug!("Restoring dropped slide '{}'", original.title);
            let at = original.index.saturating_sub(1).min(slides.len());
            slides.insert(at, original.clone());
            restored += 1;
        }
    }
    restored
}

/// Fix every blocking issue kind mechanically. Returns the number of changes.
fn deterministic_pass(bundle: &ContentBundle, slides: &mut Vec<SlideSpec>) -> usize {
    let mut changes = 0;

    for slide in slides.iter_mut() {
        let before = slide.elements.len();
        slide.elements.retain(|e| match e {
            SlideElement::Figure { figure_id, .. } => bundle.figure(figure_id).is_some(),
            SlideElement::Table { table_id, .. } => bundle.table(table_id).is_some(),
            _ => true,
        });
        changes += before - slide.elements.len();

        let before = slide.sources.len();
        slide.sources.retain(|s| bundle.section(s).is_some());
        changes += before - slide.sources.len();

        if slide.elements.is_empty() {
            if let Some(section) = slide.sources.first().and_then(|s| bundle.section(s)) {
                slide.elements = summary_slide(section).elements;
                changes += 1;
            }
        }
    }

    changes += enforce_coverage(bundle, slides);
    for (i, s) in slides.iter_mut().enumerate() {
        s.index = i + 1;
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{ElementDraft, PlanDraft, SlideDraft};
    use crate::error::{AgentError, AgentErrorKind};
    use crate::model::bundle::fixtures::sample_bundle;
    use crate::pipeline::verify::verify;
    use async_trait::async_trait;
    use std::time::Duration;

    fn opts() -> CheckOptions {
        CheckOptions {
            max_slides: None,
            density_threshold: 7,
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 0,
            backoff_ms: 1,
            timeout: Duration::from_secs(5),
        }
    }

    fn full_plan(bundle: &ContentBundle) -> PresentationPlan {
        let mut slides = Vec::new();
        enforce_coverage(bundle, &mut slides);
        PresentationPlan {
            revision: 0,
            parent: None,
            origin: PlanOrigin::Generated,
            title: "T".into(),
            authors: vec![],
            slides,
        }
    }

    /// Returns a one-slide draft, dropping everything else.
    struct Shrinker;

    #[async_trait]
    impl RepairAgent for Shrinker {
        async fn repair(
            &self,
            _: &ContentBundle,
            _: &PresentationPlan,
            _: &VerificationReport,
        ) -> Result<PlanDraft, AgentError> {
            Ok(PlanDraft {
                slides: vec![SlideDraft {
                    title: Some("Method".into()),
                    role: None,
                    sources: vec!["sec-3".into()],
                    elements: vec![ElementDraft::Bullet {
                        text: "only this".into(),
                        level: 0,
                    }],
                }],
            })
        }
    }

    struct Broken;

    #[async_trait]
    impl RepairAgent for Broken {
        async fn repair(
            &self,
            _: &ContentBundle,
            _: &PresentationPlan,
            _: &VerificationReport,
        ) -> Result<PlanDraft, AgentError> {
            Err(AgentError::new(AgentRole::Repair, AgentErrorKind::Rejected, "refused"))
        }
    }

    #[tokio::test]
    async fn deterministic_repair_clears_blocking_issues() {
        let bundle = sample_bundle();
        let mut plan = full_plan(&bundle);
        plan.slides.remove(0);
        for s in &mut plan.slides {
            s.elements.retain(|e| !e.is_visual());
        }
        plan.slides[0].elements.push(SlideElement::Table {
            table_id: "tab-9".into(),
            caption: String::new(),
            rows: vec![],
        });
        plan.renumber();

        let (report, _) = verify(&bundle, &plan, None, &opts(), &policy()).await;
        assert_eq!(report.blocking_count(), 4);

        let (result, warnings) = repair(&bundle, &plan, &report, None, &opts(), &policy()).await;
        assert!(warnings.is_empty());
        assert_eq!(result.plan.revision, 1);
        assert_eq!(result.plan.parent, Some(0));
        assert_eq!(result.plan.origin, PlanOrigin::Repaired { report_revision: 0 });
        for issue in report.blocking() {
            assert!(result.report.addressed.contains(&issue.id), "{} not addressed", issue.id);
        }
        // Tables are never attached automatically.
        assert_eq!(result.report.unaddressed, vec!["unreferenced_table:tab-1".to_string()]);

        let after = check_plan(&bundle, &result.plan, &opts());
        assert!(after.iter().all(|i| !i.is_blocking()));
        // The input revision is untouched.
        assert_eq!(plan.revision, 0);
        assert_eq!(plan.slides.len(), 4);
    }

    #[tokio::test]
    async fn passing_slides_survive_an_aggressive_agent() {
        let bundle = sample_bundle();
        let mut plan = full_plan(&bundle);
        plan.slides.remove(4);
        plan.renumber();
        let (report, _) = verify(&bundle, &plan, None, &opts(), &policy()).await;
        assert_eq!(report.blocking_count(), 1);

        let (result, _) = repair(&bundle, &plan, &report, Some(&Shrinker), &opts(), &policy()).await;
        for original in &plan.slides {
            assert!(
                result.plan.slides.iter().any(|s| s.title == original.title),
                "slide '{}' was dropped",
                original.title
            );
        }
        assert!(result.report.notes.iter().any(|n| n.starts_with("restored")));
        assert_eq!(result.plan.covered_sections().len(), 5);
    }

    #[tokio::test]
    async fn agent_failure_is_a_warning() {
        let bundle = sample_bundle();
        let mut plan = full_plan(&bundle);
        plan.slides.remove(1);
        plan.renumber();
        let (report, _) = verify(&bundle, &plan, None, &opts(), &policy()).await;
        let (result, warnings) = repair(&bundle, &plan, &report, Some(&Broken), &opts(), &policy()).await;
        assert_eq!(warnings.len(), 1);
        assert!(!check_plan(&bundle, &result.plan, &opts()).iter().any(|i| i.is_blocking()));
    }

}
