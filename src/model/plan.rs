//! Presentation plans and slide specs.
//!
//! A [`PresentationPlan`] is never edited after it is published. Every change
//! (repair, revision) goes through [`PresentationPlan::successor`], which
//! yields revision `N+1` with a back-pointer to `N`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::bundle::SectionId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresentationPlan {
    pub revision: u32,
    /// Revision this one was derived from; `None` for an initial plan.
    #[serde(default)]
    pub parent: Option<u32>,
    pub origin: PlanOrigin,
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    pub slides: Vec<SlideSpec>,
}

/// How a plan revision came to exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanOrigin {
    Generated,
    Repaired { report_revision: u32 },
    Revised { feedback: String },
    /// Copied from another session or file to seed a revision run.
    Seeded { from: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlideSpec {
    /// 1-indexed position in the deck.
    pub index: usize,
    pub title: String,
    pub elements: Vec<SlideElement>,
    pub role: NarrativeRole,
    /// Bundle sections this slide summarises.
    #[serde(default)]
    pub sources: Vec<SectionId>,
}

/// One content element on a slide.
///
/// Figure and table elements carry their caption and payload so a document
/// can be rendered from the plan alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SlideElement {
    Bullet {
        text: String,
        #[serde(default)]
        level: u8,
    },
    Figure {
        figure_id: String,
        #[serde(default)]
        asset: String,
        #[serde(default)]
        caption: String,
    },
    Table {
        table_id: String,
        #[serde(default)]
        caption: String,
        #[serde(default)]
        rows: Vec<Vec<String>>,
    },
    Code {
        #[serde(default)]
        language: String,
        code: String,
    },
}

impl SlideElement {
    pub fn bullet(text: impl Into<String>) -> Self {
        SlideElement::Bullet {
            text: text.into(),
            level: 0,
        }
    }

    /// True for figures and tables.
    pub fn is_visual(&self) -> bool {
        matches!(self, SlideElement::Figure { .. } | SlideElement::Table { .. })
    }

    /// Rough layout weight used when deciding whether a slide overflows.
    pub fn weight(&self) -> usize {
        match self {
            SlideElement::Bullet { text, .. } => 1 + text.chars().count() / 90,
            SlideElement::Figure { .. } => 5,
            SlideElement::Table { rows, .. } => 2 + rows.len().div_ceil(3),
            SlideElement::Code { code, .. } => 1 + code.lines().count().div_ceil(3),
        }
    }
}

/// Narrative framing of a slide in the talk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NarrativeRole {
    Motivation,
    Background,
    Problem,
    Method,
    Experiment,
    Result,
    Discussion,
    Conclusion,
    #[default]
    Other,
}

impl NarrativeRole {
    /// Lenient parse of agent output; unknown labels become `Other`.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "motivation" | "introduction" | "intro" => NarrativeRole::Motivation,
            "background" | "related_work" | "related work" => NarrativeRole::Background,
            "problem" | "problem_statement" => NarrativeRole::Problem,
            "method" | "methods" | "approach" | "methodology" => NarrativeRole::Method,
            "experiment" | "experiments" | "setup" | "evaluation" => NarrativeRole::Experiment,
            "result" | "results" => NarrativeRole::Result,
            "discussion" | "analysis" | "limitations" => NarrativeRole::Discussion,
            "conclusion" | "conclusions" | "summary" | "future_work" => NarrativeRole::Conclusion,
            _ => NarrativeRole::Other,
        }
    }

    /// Guess a role from a section heading.
    pub fn from_heading(heading: &str) -> Self {
        let h = heading.to_ascii_lowercase();
        let table: [(&[&str], NarrativeRole); 8] = [
            (&["introduction", "motivation", "引言"], NarrativeRole::Motivation),
            (&["related", "background", "preliminar", "相关"], NarrativeRole::Background),
            (&["problem", "formulation"], NarrativeRole::Problem),
            (&["method", "approach", "model", "architecture", "方法"], NarrativeRole::Method),
            (&["experiment", "setup", "evaluation", "实验"], NarrativeRole::Experiment),
            (&["result", "ablation", "结果"], NarrativeRole::Result),
            (&["discussion", "analysis", "limitation"], NarrativeRole::Discussion),
            (&["conclusion", "summary", "future", "结论"], NarrativeRole::Conclusion),
        ];
        table
            .iter()
            .find(|(keys, _)| keys.iter().any(|k| h.contains(k)))
            .map(|(_, role)| *role)
            .unwrap_or_default()
    }
}

impl fmt::Display for NarrativeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NarrativeRole::Motivation => "motivation",
            NarrativeRole::Background => "background",
            NarrativeRole::Problem => "problem",
            NarrativeRole::Method => "method",
            NarrativeRole::Experiment => "experiment",
            NarrativeRole::Result => "result",
            NarrativeRole::Discussion => "discussion",
            NarrativeRole::Conclusion => "conclusion",
            NarrativeRole::Other => "other",
        };
        f.write_str(s)
    }
}

impl PresentationPlan {
    /// Derive revision `self.revision + 1` with new slides.
    ///
    /// Slide indices are renumbered 1..=n so every revision is self-consistent.
    pub fn successor(&self, origin: PlanOrigin, slides: Vec<SlideSpec>) -> PresentationPlan {
        let mut next = PresentationPlan {
            revision: self.revision + 1,
            parent: Some(self.revision),
            origin,
            title: self.title.clone(),
            authors: self.authors.clone(),
            slides,
        };
        next.renumber();
        next
    }

    pub fn renumber(&mut self) {
        for (i, slide) in self.slides.iter_mut().enumerate() {
            slide.index = i + 1;
        }
    }

    pub fn slide(&self, index: usize) -> Option<&SlideSpec> {
        self.slides.iter().find(|s| s.index == index)
    }

    /// Every section id referenced by at least one slide.
    pub fn covered_sections(&self) -> BTreeSet<&str> {
        self.slides
            .iter()
            .flat_map(|s| s.sources.iter().map(String::as_str))
            .collect()
    }

    /// Every figure id referenced by at least one slide.
    pub fn figure_ids(&self) -> BTreeSet<&str> {
        self.slides
            .iter()
            .flat_map(|s| s.elements.iter())
            .filter_map(|e| match e {
                SlideElement::Figure { figure_id, .. } => Some(figure_id.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn table_ids(&self) -> BTreeSet<&str> {
        self.slides
            .iter()
            .flat_map(|s| s.elements.iter())
            .filter_map(|e| match e {
                SlideElement::Table { table_id, .. } => Some(table_id.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl SlideSpec {
    pub fn weight(&self) -> usize {
        self.elements.iter().map(SlideElement::weight).sum()
    }

    /// Bullet text joined, for speech fallbacks and agent context.
    pub fn bullet_text(&self) -> Vec<&str> {
        self.elements
            .iter()
            .filter_map(|e| match e {
                SlideElement::Bullet { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slide(title: &str, sources: &[&str]) -> SlideSpec {
        SlideSpec {
            index: 0,
            title: title.into(),
            elements: vec![SlideElement::bullet("point")],
            role: NarrativeRole::Other,
            sources: sources.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn successor_bumps_revision_and_renumbers() {
        let base = PresentationPlan {
            revision: 3,
            parent: Some(2),
            origin: PlanOrigin::Generated,
            title: "T".into(),
            authors: vec![],
            slides: vec![slide("a", &["sec-1"])],
        };
        let next = base.successor(
            PlanOrigin::Revised {
                feedback: "more".into(),
            },
            vec![slide("a", &["sec-1"]), slide("b", &["sec-2"])],
        );
        assert_eq!(next.revision, 4);
        assert_eq!(next.parent, Some(3));
        assert_eq!(next.slides[1].index, 2);
        assert_eq!(base.revision, 3);
        assert_eq!(base.slides.len(), 1);
    }

    #[test]
    fn role_parsing_is_lenient() {
        assert_eq!(NarrativeRole::parse_lenient("Results"), NarrativeRole::Result);
        assert_eq!(NarrativeRole::parse_lenient("whatever"), NarrativeRole::Other);
        assert_eq!(NarrativeRole::from_heading("4 Experimental Setup"), NarrativeRole::Experiment);
        assert_eq!(NarrativeRole::from_heading("Acknowledgements"), NarrativeRole::Other);
    }

    #[test]
    fn element_json_is_tagged() {
        let e = SlideElement::Figure {
            figure_id: "fig-1".into(),
            asset: "figures/fig-1.png".into(),
            caption: "c".into(),
        };
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains("\"type\":\"figure\""), "got: {json}");
    }

    #[test]
    fn visual_weight_dominates_bullets() {
        assert!(SlideElement::Figure {
            figure_id: "f".into(),
            asset: String::new(),
            caption: String::new()
        }
        .weight()
            > SlideElement::bullet("short").weight());
    }
}
