//! Verification: compare a plan against the bundle it was built from.
//!
//! Deterministic checks decide blocking status. The optional semantic
//! review by the verifier agent only ever adds advisory issues, so an LLM
//! judgement can never block a run or trigger repair on its own.

use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::agents::retry::invoke;
use crate::agents::{RetryPolicy, VerifierAgent};
use crate::config::PipelineConfig;
use crate::error::{AgentRole, StageWarning};
use crate::model::{ContentBundle, Issue, IssueKind, PresentationPlan, Severity, SlideElement, VerificationReport};

/// Thresholds for the deterministic checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckOptions {
    pub max_slides: Option<usize>,
    /// Per-frame weight; a slide heavier than twice this is flagged dense.
    pub density_threshold: usize,
}

impl CheckOptions {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_slides: config.max_slides,
            density_threshold: config.density_threshold,
        }
    }
}

/// Deterministic checks only. Pure.
pub fn check_plan(bundle: &ContentBundle, plan: &PresentationPlan, options: &CheckOptions) -> Vec<Issue> {
    let mut issues = Vec::new();

    let covered = plan.covered_sections();
    for section in &bundle.sections {
        if !covered.contains(section.id.as_str()) {
            issues.push(Issue::new(
                IssueKind::UncoveredSection,
                Severity::Blocking,
                None,
                Some(section.id.clone()),
                format!("Section '{}' is not summarised by any slide", section.heading),
            ));
        }
    }

    let used_figures = plan.figure_ids();
    for figure in &bundle.figures {
        if !used_figures.contains(figure.id.as_str()) {
            issues.push(Issue::new(
                IssueKind::UnreferencedFigure,
                Severity::Blocking,
                None,
                Some(figure.id.clone()),
                format!("Figure '{}' ({}) is not shown on any slide", figure.id, figure.caption),
            ));
        }
    }

    let used_tables = plan.table_ids();
    for table in &bundle.tables {
        if !used_tables.contains(table.id.as_str()) {
            issues.push(Issue::new(
                IssueKind::UnreferencedTable,
                Severity::Advisory,
                None,
                Some(table.id.clone()),
                format!("Table '{}' ({}) is not shown on any slide", table.id, table.caption),
            ));
        }
    }

    let heavy = options.density_threshold.max(1) * 2;
    for slide in &plan.slides {
        for element in &slide.elements {
            match element {
                SlideElement::Figure { figure_id, .. } if bundle.figure(figure_id).is_none() => {
                    issues.push(Issue::new(
                        IssueKind::UnknownFigure,
                        Severity::Blocking,
                        Some(slide.index),
                        Some(figure_id.clone()),
                        format!("Slide '{}' shows figure '{}' which the paper does not contain", slide.title, figure_id),
                    ));
                }
                SlideElement::Table { table_id, .. } if bundle.table(table_id).is_none() => {
                    issues.push(Issue::new(
                        IssueKind::UnknownTable,
                        Severity::Blocking,
                        Some(slide.index),
                        Some(table_id.clone()),
                        format!("Slide '{}' shows table '{}' which the paper does not contain", slide.title, table_id),
                    ));
                }
                _ => {}
            }
        }
        for source in &slide.sources {
            if bundle.section(source).is_none() {
                issues.push(Issue::new(
                    IssueKind::UnknownSection,
                    Severity::Advisory,
                    Some(slide.index),
                    Some(source.clone()),
                    format!("Slide '{}' cites unknown section '{}'", slide.title, source),
                ));
            }
        }
        if slide.elements.is_empty() {
            issues.push(Issue::new(
                IssueKind::EmptySlide,
                Severity::Advisory,
                Some(slide.index),
                None,
                format!("Slide '{}' has no content", slide.title),
            ));
        } else if slide.weight() > heavy {
            issues.push(Issue::new(
                IssueKind::DenseSlide,
                Severity::Advisory,
                Some(slide.index),
                None,
                format!(
                    "Slide '{}' is dense (weight {}) and will span several frames",
                    slide.title,
                    slide.weight()
                ),
            ));
        }
    }

    if let Some(max) = options.max_slides {
        if plan.slides.len() > max {
            issues.push(Issue::new(
                IssueKind::SlideCountExceeded,
                Severity::Advisory,
                None,
                None,
                format!("{} slides exceed the requested maximum of {}", plan.slides.len(), max),
            ));
        }
    }

    issues
}

/// Run every check on `plan`.
///
/// When `verifier` is given its findings are appended as advisory
/// [`IssueKind::Semantic`] issues. A failing semantic review degrades to a
/// warning and the report carries `semantic_checked = false`.
pub async fn verify(
    bundle: &ContentBundle,
    plan: &PresentationPlan,
    verifier: Option<&dyn VerifierAgent>,
    options: &CheckOptions,
    policy: &RetryPolicy,
) -> (VerificationReport, Option<StageWarning>) {
    let mut issues = check_plan(bundle, plan, options);
    let mut semantic_checked = false;
    let mut warning = None;

    if let Some(agent) = verifier {
        match invoke(policy, AgentRole::Verifier, move || async move { agent.review(bundle, plan).await }).await {
            Ok(findings) => {
                semantic_checked = true;
                debug!("Semantic review returned {} finding(s)", findings.len());
                for f in findings {
                    let slide = f.slide.filter(|i| plan.slide(*i).is_some());
                    issues.push(Issue::new(
                        IssueKind::Semantic,
                        Severity::Advisory,
                        slide,
                        f.reference.filter(|r| !r.trim().is_empty()),
                        f.description,
                    ));
                }
            }
            Err(e) => {
                warn!("Semantic review failed: {}", e);
                warning = Some(StageWarning::AgentDegraded {
                    stage: "verification".into(),
                    detail: e.to_string(),
                });
            }
        }
    }

    dedupe_ids(&mut issues);
    let report = VerificationReport {
        plan_revision: plan.revision,
        issues,
        semantic_checked,
    };
    info!(
        "Plan r{} verified: {} blocking, {} advisory",
        plan.revision,
        report.blocking_count(),
        report.advisory_count()
    );
    (report, warning)
}

/// Issue ids must be unique within a report.
fn dedupe_ids(issues: &mut [Issue]) {
    let mut seen: HashMap<String, usize> = HashMap::new();
    for issue in issues.iter_mut() {
        let n = seen.entry(issue.id.clone()).or_insert(0);
        *n += 1;
        if *n > 1 {
            issue.id = format!("{}#{}", issue.id, n);
        }
    }
}
