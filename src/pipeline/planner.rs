//! Plan generation: planner draft → validated [`PresentationPlan`].
//!
//! The agent's draft is treated as untrusted input. Conversion
//! ([`slides_from_draft`]) rejects structurally invalid drafts, resolves
//! figure and table ids against the bundle (copying asset, caption and rows
//! into the element), and drops references the bundle does not know.
//! [`enforce_coverage`] then guarantees that every section and every figure
//! appears on at least one slide, whatever the agent returned.
//!
//! The same conversion serves revision and repair drafts.

use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::agents::retry::invoke;
use crate::agents::{ElementDraft, PlanConstraints, PlanDraft, PlannerAgent, RetryPolicy};
use crate::config::{NarrativeOrder, PipelineConfig};
use crate::error::{AgentRole, Paper2BeamerError};
use crate::model::{
    ContentBundle, FigureRef, NarrativeRole, PlanOrigin, PresentationPlan, Section, SlideElement,
    SlideSpec, TableRef,
};

/// Bullets taken from a section when synthesising a summary slide.
const SUMMARY_BULLETS: usize = 3;
const SUMMARY_BULLET_CHARS: usize = 160;

/// Structural problem in an agent draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftError(pub String);

impl std::fmt::Display for DraftError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Generate plan revision 0 for `bundle`.
///
/// Agent failures (after retries) and invalid drafts abort with
/// [`Paper2BeamerError::PlanGeneration`]; there is no empty-plan fallback.
pub async fn generate_plan(
    planner: &dyn PlannerAgent,
    bundle: &ContentBundle,
    config: &PipelineConfig,
    policy: &RetryPolicy,
) -> Result<PresentationPlan, Paper2BeamerError> {
    let constraints = PlanConstraints {
        language: config.language,
        max_slides: config.max_slides,
    };
    let constraints = &constraints;
    let draft = invoke(policy, AgentRole::Planner, move || async move {
        planner.plan(bundle, constraints).await
    })
    .await
    .map_err(|e| Paper2BeamerError::PlanGeneration {
        detail: e.message.clone(),
        source: Some(e),
    })?;

    let mut slides = slides_from_draft(bundle, &draft).map_err(|e| Paper2BeamerError::PlanGeneration {
        detail: e.0,
        source: None,
    })?;
    let inserted = enforce_coverage(bundle, &mut slides);
    if inserted > 0 {
        info!("Planner skipped content; added {} coverage slide(s)", inserted);
    }
    if config.narrative_order == NarrativeOrder::SourceOrder {
        restore_source_order(bundle, &mut slides);
    }
    if let Some(max) = config.max_slides {
        if slides.len() > max {
            warn!(
                "Plan has {} slides, above the requested {}; coverage takes precedence",
                slides.len(),
                max
            );
        }
    }

    let mut plan = PresentationPlan {
        revision: 0,
        parent: None,
        origin: PlanOrigin::Generated,
        title: bundle.metadata.title.clone(),
        authors: bundle.metadata.authors.clone(),
        slides,
    };
    plan.renumber();
    info!("Plan r0: {} slides", plan.slides.len());
    Ok(plan)
}

/// Validate a draft and convert it into slide specs.
///
/// Fails when the draft has no slides or a slide has no title. Unknown
/// figure, table and section ids are dropped with a warning.
pub fn slides_from_draft(bundle: &ContentBundle, draft: &PlanDraft) -> Result<Vec<SlideSpec>, DraftError> {
    if draft.slides.is_empty() {
        return Err(DraftError("planner returned no slides".to_string()));
    }

    let mut slides = Vec::with_capacity(draft.slides.len());
    for (i, d) in draft.slides.iter().enumerate() {
        let title = d
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| DraftError(format!("slide {} has no title", i + 1)))?
            .to_string();

        let mut sources: Vec<String> = Vec::new();
        for s in &d.sources {
            if bundle.section(s).is_some() {
                if !sources.contains(s) {
                    sources.push(s.clone());
                }
            } else {
                warn!("Slide {}: unknown section '{}' dropped", i + 1, s);
            }
        }
        if sources.is_empty() {
            if let Some(sec) = bundle.sections.iter().find(|s| heading_matches(&s.heading, &title)) {
                sources.push(sec.id.clone());
            }
        }

        let mut elements = Vec::with_capacity(d.elements.len());
        for e in &d.elements {
            match e {
                ElementDraft::Bullet { text, level } => {
                    let text = text.trim();
                    if !text.is_empty() {
                        elements.push(SlideElement::Bullet {
                            text: text.to_string(),
                            level: (*level).min(2),
                        });
                    }
                }
                ElementDraft::Figure { id } => match bundle.figure(id) {
                    Some(f) => elements.push(figure_element(f)),
                    None => warn!("Slide {}: unknown figure '{}' dropped", i + 1, id),
                },
                ElementDraft::Table { id } => match bundle.table(id) {
                    Some(t) => elements.push(table_element(t)),
                    None => warn!("Slide {}: unknown table '{}' dropped", i + 1, id),
                },
                ElementDraft::Code { language, code } => {
                    if !code.trim().is_empty() {
                        elements.push(SlideElement::Code {
                            language: language.clone(),
                            code: code.clone(),
                        });
                    }
                }
            }
        }

        let role = match d.role.as_deref() {
            Some(r) => NarrativeRole::parse_lenient(r),
            None => sources
                .first()
                .and_then(|s| bundle.section(s))
                .map(|s| NarrativeRole::from_heading(&s.heading))
                .unwrap_or_default(),
        };

        slides.push(SlideSpec {
            index: i + 1,
            title,
            elements,
            role,
            sources,
        });
    }
    Ok(slides)
}

fn heading_matches(heading: &str, title: &str) -> bool {
    let strip = |s: &str| {
        s.trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ' ')
            .to_lowercase()
    };
    let h = strip(heading);
    !h.is_empty() && h == strip(title)
}

pub fn figure_element(f: &FigureRef) -> SlideElement {
    SlideElement::Figure {
        figure_id: f.id.clone(),
        asset: f.asset.clone(),
        caption: f.caption.clone(),
    }
}

pub fn table_element(t: &TableRef) -> SlideElement {
    SlideElement::Table {
        table_id: t.id.clone(),
        caption: t.caption.clone(),
        rows: t.rows.clone(),
    }
}

/// A deterministic slide summarising one section.
pub fn summary_slide(section: &Section) -> SlideSpec {
    let elements = section
        .spans
        .iter()
        .take(SUMMARY_BULLETS)
        .map(|span| SlideElement::bullet(first_sentence(span, SUMMARY_BULLET_CHARS)))
        .collect();
    SlideSpec {
        index: 0,
        title: section_title(section),
        elements,
        role: NarrativeRole::from_heading(&section.heading),
        sources: vec![section.id.clone()],
    }
}

/// Slide title for `section`, never blank.
fn section_title(section: &Section) -> String {
    let heading = display_heading(&section.heading);
    if !heading.trim().is_empty() {
        return heading;
    }
    match section.id.strip_prefix("sec-") {
        Some(n) => format!("Section {n}"),
        None => section.id.clone(),
    }
}

/// Heading without its leading section number.
fn display_heading(heading: &str) -> String {
    let trimmed = heading.trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ' ');
    if trimmed.is_empty() {
        heading.to_string()
    } else {
        trimmed.to_string()
    }
}

fn first_sentence(text: &str, max_chars: usize) -> String {
    let end = text
        .char_indices()
        .find(|(i, c)| matches!(c, '.' | '。' | '!' | '?') && text[i + c.len_utf8()..].starts_with([' ', '\n']))
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(text.len());
    let sentence = text[..end].trim();
    if sentence.chars().count() <= max_chars {
        return sentence.to_string();
    }
    let mut cut: String = sentence.chars().take(max_chars).collect();
    if let Some(space) = cut.rfind(' ') {
        cut.truncate(space);
    }
    format!("{cut}…")
}

/// Insert slides for uncovered sections and attach unreferenced figures.
///
/// Returns the number of slides inserted.
pub fn enforce_coverage(bundle: &ContentBundle, slides: &mut Vec<SlideSpec>) -> usize {
    let mut inserted = 0;

    let covered: BTreeSet<String> = slides.iter().flat_map(|s| s.sources.iter().cloned()).collect();
    for section in &bundle.sections {
        if covered.contains(&section.id) {
            continue;
        }
        debug!("Section {} ('{}') uncovered; adding summary slide", section.id, section.heading);
        let at = insertion_point(bundle, slides, &section.id);
        slides.insert(at, summary_slide(section));
        inserted += 1;
    }

    let referenced: BTreeSet<String> = slides
        .iter()
        .flat_map(|s| s.elements.iter())
        .filter_map(|e| match e {
            SlideElement::Figure { figure_id, .. } => Some(figure_id.clone()),
            _ => None,
        })
        .collect();
    for figure in &bundle.figures {
        if referenced.contains(&figure.id) {
            continue;
        }
        debug!("Figure {} unreferenced; attaching", figure.id);
        if attach_figure(bundle, slides, figure) {
            inserted += 1;
        }
    }

    for (i, s) in slides.iter_mut().enumerate() {
        s.index = i + 1;
    }
    inserted
}

/// Attach `figure` to the first visual-free slide of its section, or insert
/// a dedicated slide after the section's last slide. Returns true if a slide
/// was inserted.
fn attach_figure(bundle: &ContentBundle, slides: &mut Vec<SlideSpec>, figure: &FigureRef) -> bool {
    let in_section = |s: &SlideSpec| figure.section.as_ref().is_some_and(|id| s.sources.contains(id));

    if let Some(slide) = slides
        .iter_mut()
        .find(|s| in_section(s) && !s.elements.iter().any(SlideElement::is_visual))
    {
        slide.elements.push(figure_element(figure));
        return false;
    }

    let at = match &figure.section {
        Some(id) => slides
            .iter()
            .rposition(|s| s.sources.contains(id))
            .map(|p| p + 1)
            .unwrap_or_else(|| insertion_point(bundle, slides, id)),
        None => slides.len(),
    };
    let title = Some(truncate_title(&figure.caption))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| figure.id.clone());
    slides.insert(
        at,
        SlideSpec {
            index: 0,
            title,
            elements: vec![figure_element(figure)],
            role: figure
                .section
                .as_ref()
                .and_then(|id| bundle.section(id))
                .map(|s| NarrativeRole::from_heading(&s.heading))
                .unwrap_or_default(),
            sources: figure.section.iter().cloned().collect(),
        },
    );
    true
}

fn truncate_title(text: &str) -> String {
    const MAX: usize = 60;
    let t = text.trim().trim_end_matches('.');
    if t.chars().count() <= MAX {
        return t.to_string();
    }
    let cut: String = t.chars().take(MAX).collect();
    format!("{}…", cut.trim_end())
}

/// Position after the last slide covering a section that precedes `id`.
fn insertion_point(bundle: &ContentBundle, slides: &[SlideSpec], id: &str) -> usize {
    let target = bundle.section_position(id).unwrap_or(usize::MAX);
    slides
        .iter()
        .rposition(|s| {
            s.sources
                .iter()
                .filter_map(|src| bundle.section_position(src))
                .any(|p| p < target)
        })
        .map(|p| p + 1)
        .unwrap_or(0)
}

/// Stable-sort slides by the earliest section they draw from.
///
/// Slides without sources stay attached to the slide before them.
pub fn restore_source_order(bundle: &ContentBundle, slides: &mut Vec<SlideSpec>) {
    let mut last = 0usize;
    let mut keyed: Vec<(usize, SlideSpec)> = std::mem::take(slides)
        .into_iter()
        .map(|s| {
            let key = s
                .sources
                .iter()
                .filter_map(|src| bundle.section_position(src))
                .min()
                .unwrap_or(last);
            last = key;
            (key, s)
        })
        .collect();
    keyed.sort_by_key(|(k, _)| *k);
    *slides = keyed.into_iter().map(|(_, s)| s).collect();
    for (i, s) in slides.iter_mut().enumerate() {
        s.index = i + 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::SlideDraft;
    use crate::error::{AgentError, AgentErrorKind};
    use crate::model::bundle::fixtures::sample_bundle;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn draft_slide(title: &str, sources: &[&str], elements: Vec<ElementDraft>) -> SlideDraft {
        SlideDraft {
            title: Some(title.into()),
            role: None,
            sources: sources.iter().map(|s| s.to_string()).collect(),
            elements,
        }
    }

    fn bullet(t: &str) -> ElementDraft {
        ElementDraft::Bullet {
            text: t.into(),
            level: 0,
        }
    }

    struct FixedPlanner {
        draft: PlanDraft,
        failures: AtomicU32,
        error: Option<AgentError>,
    }

    #[async_trait]
    impl PlannerAgent for FixedPlanner {
        async fn plan(&self, _: &ContentBundle, _: &PlanConstraints) -> Result<PlanDraft, AgentError> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                if let Some(e) = &self.error {
                    return Err(e.clone());
                }
            }
            Ok(self.draft.clone())
        }

        async fn revise(
            &self,
            _: &ContentBundle,
            _: &PresentationPlan,
            _: &str,
            _: Option<&str>,
            _: crate::config::Language,
        ) -> Result<PlanDraft, AgentError> {
            Ok(self.draft.clone())
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            backoff_ms: 1,
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn draft_without_slides_is_invalid() {
        let err = slides_from_draft(&sample_bundle(), &PlanDraft::default()).unwrap_err();
        assert!(err.0.contains("no slides"));
    }

    #[test]
    fn draft_slide_without_title_is_invalid() {
        let draft = PlanDraft {
            slides: vec![SlideDraft {
                title: Some("  ".into()),
                ..Default::default()
            }],
        };
        let err = slides_from_draft(&sample_bundle(), &draft).unwrap_err();
        assert_eq!(err.0, "slide 1 has no title");
    }

    #[test]
    fn figure_ids_resolve_and_unknown_ids_drop() {
        let bundle = sample_bundle();
        let draft = PlanDraft {
            slides: vec![draft_slide(
                "Method",
                &["sec-3", "sec-99"],
                vec![
                    ElementDraft::Figure { id: "fig-1".into() },
                    ElementDraft::Figure { id: "fig-7".into() },
                    ElementDraft::Table { id: "tab-1".into() },
                ],
            )],
        };
        let slides = slides_from_draft(&bundle, &draft).unwrap();
        assert_eq!(slides[0].sources, vec!["sec-3"]);
        assert_eq!(slides[0].elements.len(), 2);
        match &slides[0].elements[0] {
            SlideElement::Figure { asset, caption, .. } => {
                assert_eq!(asset, "figures/fig-1.png");
                assert_eq!(caption, "Architecture overview");
            }
            other => panic!("expected figure, got {other:?}"),
        }
        assert_eq!(slides[0].role, NarrativeRole::Method);
    }

    #[test]
    fn sources_inferred_from_matching_title() {
        let draft = PlanDraft {
            slides: vec![draft_slide("Related Work", &[], vec![bullet("prior art")])],
        };
        let slides = slides_from_draft(&sample_bundle(), &draft).unwrap();
        assert_eq!(slides[0].sources, vec!["sec-2"]);
    }

    #[test]
    fn coverage_adds_missing_sections_in_order() {
        let bundle = sample_bundle();
        let draft = PlanDraft {
            slides: vec![
                draft_slide("Intro", &["sec-1"], vec![bullet("a")]),
                draft_slide("Results", &["sec-4"], vec![bullet("b")]),
            ],
        };
        let mut slides = slides_from_draft(&bundle, &draft).unwrap();
        enforce_coverage(&bundle, &mut slides);

        let order: Vec<&str> = slides.iter().map(|s| s.sources[0].as_str()).collect();
        assert_eq!(order.first(), Some(&"sec-1"));
        let covered: BTreeSet<&str> = slides.iter().flat_map(|s| s.sources.iter().map(String::as_str)).collect();
        for s in &bundle.sections {
            assert!(covered.contains(s.id.as_str()), "{} uncovered", s.id);
        }
        let pos = |id: &str| order.iter().position(|s| *s == id).unwrap();
        assert!(pos("sec-2") < pos("sec-3"));
        assert!(pos("sec-3") < pos("sec-5"));
    }

    #[test]
    fn coverage_attaches_every_figure() {
        let bundle = sample_bundle();
        let draft = PlanDraft {
            slides: vec![draft_slide("Method", &["sec-3"], vec![bullet("blocks")])],
        };
        let mut slides = slides_from_draft(&bundle, &draft).unwrap();
        enforce_coverage(&bundle, &mut slides);
        let plan = PresentationPlan {
            revision: 0,
            parent: None,
            origin: PlanOrigin::Generated,
            title: String::new(),
            authors: vec![],
            slides,
        };
        assert_eq!(plan.figure_ids(), BTreeSet::from(["fig-1", "fig-2"]));
        // fig-1 joined the existing Method slide.
        assert!(plan.slides.iter().any(|s| s.title == "Method" && s.elements.len() == 2));
    }

    #[test]
    fn source_order_is_restored() {
        let bundle = sample_bundle();
        let draft = PlanDraft {
            slides: vec![
                draft_slide("Conclusion", &["sec-5"], vec![bullet("done")]),
                draft_slide("Intro", &["sec-1"], vec![bullet("hi")]),
                draft_slide("Takeaway", &[], vec![bullet("x")]),
            ],
        };
        let mut slides = slides_from_draft(&bundle, &draft).unwrap();
        restore_source_order(&bundle, &mut slides);
        let titles: Vec<_> = slides.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["Intro", "Takeaway", "Conclusion"]);
        assert_eq!(slides[2].index, 3);
    }

    #[test]
    fn summary_bullets_are_first_sentences() {
        let bundle = sample_bundle();
        let slide = summary_slide(&bundle.sections[2]);
        assert_eq!(slide.title, "Method");
        assert_eq!(slide.elements.len(), 2);
        assert_eq!(
            slide.bullet_text()[0],
            "Method opens with a first observation about the problem."
        );
    }

    #[test]
    fn blank_heading_and_caption_get_fallback_titles() {
        let mut bundle = sample_bundle();
        bundle.sections[1].heading = "  ".into();
        bundle.figures[1].caption = ".".into();
        let mut slides = vec![SlideSpec {
            index: 1,
            title: "Intro".into(),
            elements: vec![SlideElement::bullet("a")],
            role: NarrativeRole::Motivation,
            sources: vec!["sec-1".into(), "sec-3".into(), "sec-4".into(), "sec-5".into()],
        }];
        slides[0].elements.push(figure_element(&bundle.figures[0]));
        enforce_coverage(&bundle, &mut slides);

        assert!(slides.iter().all(|s| !s.title.trim().is_empty()));
        assert!(slides.iter().any(|s| s.title == "Section 2"));
        assert!(slides.iter().any(|s| s.title == "fig-2"));
    }

    #[tokio::test]
    async fn generated_plan_covers_everything_after_retry() {
        let bundle = sample_bundle();
        let planner = FixedPlanner {
            draft: PlanDraft {
                slides: vec![draft_slide("Intro", &["sec-1"], vec![bullet("a")])],
            },
            failures: AtomicU32::new(1),
            error: Some(AgentError::new(AgentRole::Planner, AgentErrorKind::RateLimited, "429")),
        };
        let config = PipelineConfig::builder().build().unwrap();
        let plan = generate_plan(&planner, &bundle, &config, &policy()).await.unwrap();
        assert_eq!(plan.revision, 0);
        assert_eq!(plan.origin, PlanOrigin::Generated);
        assert_eq!(plan.covered_sections().len(), 5);
        assert_eq!(plan.figure_ids().len(), 2);
        assert_eq!(plan.title, bundle.metadata.title);
    }

    #[tokio::test]
    async fn non_retryable_agent_error_aborts() {
        let planner = FixedPlanner {
            draft: PlanDraft::default(),
            failures: AtomicU32::new(5),
            error: Some(AgentError::new(AgentRole::Planner, AgentErrorKind::Auth, "401")),
        };
        let config = PipelineConfig::builder().build().unwrap();
        let err = generate_plan(&planner, &sample_bundle(), &config, &policy())
            .await
            .unwrap_err();
        assert!(matches!(err, Paper2BeamerError::PlanGeneration { source: Some(_), .. }));
        assert_eq!(planner.failures.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn empty_draft_aborts() {
        let planner = FixedPlanner {
            draft: PlanDraft::default(),
            failures: AtomicU32::new(0),
            error: None,
        };
        let config = PipelineConfig::builder().build().unwrap();
        let err = generate_plan(&planner, &sample_bundle(), &config, &policy())
            .await
            .unwrap_err();
        assert!(matches!(err, Paper2BeamerError::PlanGeneration { source: None, .. }));
    }
}
