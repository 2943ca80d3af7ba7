//! Verification reports and repair results.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::plan::PresentationPlan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Blocking,
    Advisory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// A bundle section no slide summarises.
    UncoveredSection,
    /// A bundle figure no slide shows.
    UnreferencedFigure,
    /// A slide figure id that does not exist in the bundle.
    UnknownFigure,
    /// A slide table id that does not exist in the bundle.
    UnknownTable,
    /// A slide source id that does not exist in the bundle.
    UnknownSection,
    UnreferencedTable,
    EmptySlide,
    DenseSlide,
    SlideCountExceeded,
    /// Finding from the semantic reviewer.
    Semantic,
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IssueKind::UncoveredSection => "uncovered_section",
            IssueKind::UnreferencedFigure => "unreferenced_figure",
            IssueKind::UnknownFigure => "unknown_figure",
            IssueKind::UnknownTable => "unknown_table",
            IssueKind::UnknownSection => "unknown_section",
            IssueKind::UnreferencedTable => "unreferenced_table",
            IssueKind::EmptySlide => "empty_slide",
            IssueKind::DenseSlide => "dense_slide",
            IssueKind::SlideCountExceeded => "slide_count_exceeded",
            IssueKind::Semantic => "semantic",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    /// Stable across revisions for the same finding, e.g. `uncovered_section:sec-2`.
    pub id: String,
    pub severity: Severity,
    pub kind: IssueKind,
    /// Slide index the issue concerns, if any.
    #[serde(default)]
    pub slide: Option<usize>,
    pub description: String,
    /// Bundle element checked against (section, figure or table id).
    #[serde(default)]
    pub reference: Option<String>,
}

impl Issue {
    pub fn new(
        kind: IssueKind,
        severity: Severity,
        slide: Option<usize>,
        reference: Option<String>,
        description: impl Into<String>,
    ) -> Self {
        let anchor = match (&reference, slide) {
            (Some(r), Some(s)) => format!("{r}@{s}"),
            (Some(r), None) => r.clone(),
            (None, Some(s)) => format!("slide-{s}"),
            (None, None) => "deck".to_string(),
        };
        Self {
            id: format!("{kind}:{anchor}"),
            severity,
            kind,
            slide,
            description: description.into(),
            reference,
        }
    }

    pub fn is_blocking(&self) -> bool {
        self.severity == Severity::Blocking
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub plan_revision: u32,
    pub issues: Vec<Issue>,
    /// Whether the semantic reviewer contributed to this report.
    #[serde(default)]
    pub semantic_checked: bool,
}

impl VerificationReport {
    pub fn has_blocking_issues(&self) -> bool {
        self.issues.iter().any(Issue::is_blocking)
    }

    pub fn blocking_count(&self) -> usize {
        self.issues.iter().filter(|i| i.is_blocking()).count()
    }

    pub fn blocking(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|i| i.is_blocking())
    }

    pub fn advisory_count(&self) -> usize {
        self.issues.len() - self.blocking_count()
    }
}

/// Summary persisted in the repair namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairReport {
    pub from_revision: u32,
    pub to_revision: u32,
    pub addressed: Vec<String>,
    pub unaddressed: Vec<String>,
    #[serde(default)]
    pub notes: Vec<String>,
    /// False when the convergence loop rejected this revision as a regression.
    pub accepted: bool,
}

/// A new plan revision together with what it fixed.
#[derive(Debug, Clone, PartialEq)]
pub struct RepairResult {
    pub plan: PresentationPlan,
    pub report: RepairReport,
}
