//! Pipeline integration tests with scripted collaborators.
//!
//! No PDF engine, LLM or TeX installation is needed: extraction, the planner
//! and the compiler are replaced by in-process fakes, and artifacts go to a
//! `MemoryArtifactStore` (or a temp dir for the on-disk store checks).
//!
//! Run with:
//!   cargo test --test pipeline

use async_trait::async_trait;
use edgequake_paper2beamer::agents::{
    ElementDraft, PlanConstraints, PlanDraft, PlannerAgent, RepairAgent, SlideDraft,
};
use edgequake_paper2beamer::error::{AgentError, AgentRole};
use edgequake_paper2beamer::model::{
    CompileStatus, FigureRef, PaperMetadata, PlanOrigin, Section, SlideElement, SpeechScript, TableRef,
};
use edgequake_paper2beamer::pipeline::compile::{CompilerOutput, TexCompiler};
use edgequake_paper2beamer::pipeline::extract::ContentExtractor;
use edgequake_paper2beamer::pipeline::latex;
use edgequake_paper2beamer::pipeline::planner::{generate_plan, slides_from_draft};
use edgequake_paper2beamer::pipeline::repair::repair;
use edgequake_paper2beamer::pipeline::speech::SCRIPT_JSON;
use edgequake_paper2beamer::pipeline::verify::{check_plan, verify, CheckOptions};
use edgequake_paper2beamer::session::{FINAL_TEX, MANIFEST_ARTIFACT, PLAN_ARTIFACT, RESULT_ARTIFACT};
use edgequake_paper2beamer::store::{digest_hex, get_json, ArtifactRef};
use edgequake_paper2beamer::{
    Agents, ArtifactKey, ArtifactKind, ArtifactStore, ContentBundle, ExitStatus, ExtractionError,
    FsArtifactStore, Language, MemoryArtifactStore, Paper2BeamerError, Pipeline, PipelineConfig,
    PipelineConfigBuilder, PipelineState, PresentationPlan, RetryPolicy, RevisionSource,
    ScriptedFeedback, SessionId, SessionResult, SpeechOptions, Stage, StageOutcome, StageWarning,
    StorageError, VerificationReport,
};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// ── Fixtures ─────────────────────────────────────────────────────────────────

/// Five sections, two figures, one table.
fn paper() -> ContentBundle {
    let headings = ["Introduction", "Related Work", "Method", "Experiments", "Conclusion"];
    let sections = headings
        .iter()
        .enumerate()
        .map(|(i, h)| Section {
            id: format!("sec-{}", i + 1),
            heading: h.to_string(),
            level: 1,
            spans: vec![
                format!("{h} states the first point of the section."),
                format!("{h} backs it with a number such as 17%."),
            ],
            page: Some(i + 1),
        })
        .collect();
    ContentBundle {
        metadata: PaperMetadata {
            title: "Sparse Attention for Long Documents".into(),
            authors: vec!["A. Author".into()],
            language: Language::En,
            page_count: 5,
        },
        sections,
        figures: vec![
            FigureRef {
                id: "fig-1".into(),
                asset: "figures/fig-1.png".into(),
                caption: "Architecture overview".into(),
                section: Some("sec-3".into()),
                page: Some(3),
            },
            FigureRef {
                id: "fig-2".into(),
                asset: "figures/fig-2.png".into(),
                caption: "Accuracy versus sequence length".into(),
                section: Some("sec-4".into()),
                page: Some(4),
            },
        ],
        tables: vec![TableRef {
            id: "tab-1".into(),
            caption: "Main results".into(),
            rows: vec![vec!["Model".into(), "Acc".into()], vec!["Ours".into(), "91.2".into()]],
            section: Some("sec-4".into()),
        }],
    }
}

/// `n` plain sections, no visuals.
fn plain_paper(n: usize) -> ContentBundle {
    ContentBundle {
        metadata: PaperMetadata {
            title: format!("A paper with {n} parts"),
            authors: Vec::new(),
            language: Language::En,
            page_count: n,
        },
        sections: (1..=n)
            .map(|i| Section {
                id: format!("sec-{i}"),
                heading: format!("Part {i}"),
                level: 1,
                spans: vec![format!("Part {i} explains one idea in a sentence.")],
                page: Some(i),
            })
            .collect(),
        figures: Vec::new(),
        tables: Vec::new(),
    }
}

/// One slide per section, every figure and table placed in its section.
fn full_draft(bundle: &ContentBundle) -> PlanDraft {
    let slides = bundle
        .sections
        .iter()
        .map(|s| {
            let mut elements: Vec<ElementDraft> = s
                .spans
                .iter()
                .map(|t| ElementDraft::Bullet {
                    text: t.clone(),
                    level: 0,
                })
                .collect();
            let here = |section: &Option<String>| section.as_deref() == Some(s.id.as_str());
            elements.extend(
                bundle
                    .figures
                    .iter()
                    .filter(|f| here(&f.section))
                    .map(|f| ElementDraft::Figure { id: f.id.clone() }),
            );
            elements.extend(
                bundle
                    .tables
                    .iter()
                    .filter(|t| here(&t.section))
                    .map(|t| ElementDraft::Table { id: t.id.clone() }),
            );
            SlideDraft {
                title: Some(s.heading.clone()),
                role: None,
                sources: vec![s.id.clone()],
                elements,
            }
        })
        .collect();
    PlanDraft { slides }
}

fn element_draft(e: &SlideElement) -> ElementDraft {
    match e {
        SlideElement::Bullet { text, level } => ElementDraft::Bullet {
            text: text.clone(),
            level: *level,
        },
        SlideElement::Figure { figure_id, .. } => ElementDraft::Figure {
            id: figure_id.clone(),
        },
        SlideElement::Table { table_id, .. } => ElementDraft::Table {
            id: table_id.clone(),
        },
        SlideElement::Code { language, code } => ElementDraft::Code {
            language: language.clone(),
            code: code.clone(),
        },
    }
}

// ── Fakes ────────────────────────────────────────────────────────────────────

struct StaticExtractor {
    bundle: ContentBundle,
}

#[async_trait]
impl ContentExtractor for StaticExtractor {
    async fn extract(
        &self,
        _input: &str,
        session: &SessionId,
        store: &dyn ArtifactStore,
    ) -> Result<ContentBundle, ExtractionError> {
        for figure in &self.bundle.figures {
            let key = ArtifactKey::new(ArtifactKind::Raw, 0, figure.asset.as_str());
            store.put(session, &key, b"\x89PNG fake").await?;
        }
        Ok(self.bundle.clone())
    }
}

struct FailingExtractor;

#[async_trait]
impl ContentExtractor for FailingExtractor {
    async fn extract(
        &self,
        input: &str,
        _session: &SessionId,
        _store: &dyn ArtifactStore,
    ) -> Result<ContentBundle, ExtractionError> {
        Err(ExtractionError::EmptyContent {
            path: PathBuf::from(input),
            detail: "no text layer".into(),
        })
    }
}

/// Plans with a fixed draft; revises by dropping every slide whose title
/// appears in the feedback.
struct ScriptedPlanner {
    draft: PlanDraft,
    revisions: AtomicUsize,
}

impl ScriptedPlanner {
    fn new(draft: PlanDraft) -> Arc<Self> {
        Arc::new(Self {
            draft,
            revisions: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl PlannerAgent for ScriptedPlanner {
    async fn plan(&self, _bundle: &ContentBundle, _c: &PlanConstraints) -> Result<PlanDraft, AgentError> {
        Ok(self.draft.clone())
    }

    async fn revise(
        &self,
        _bundle: &ContentBundle,
        plan: &PresentationPlan,
        feedback: &str,
        _previous_tex: Option<&str>,
        _language: Language,
    ) -> Result<PlanDraft, AgentError> {
        self.revisions.fetch_add(1, Ordering::SeqCst);
        let feedback = feedback.to_lowercase();
        let slides: Vec<SlideDraft> = plan
            .slides
            .iter()
            .filter(|s| !feedback.contains(&s.title.to_lowercase()))
            .map(|s| SlideDraft {
                title: Some(s.title.clone()),
                role: Some(s.role.to_string()),
                sources: s.sources.clone(),
                elements: s.elements.iter().map(element_draft).collect(),
            })
            .collect();
        if slides.is_empty() {
            return Err(AgentError::malformed(AgentRole::Reviser, "nothing left"));
        }
        Ok(PlanDraft { slides })
    }
}

/// Replays compile outcomes; the last one repeats.
struct ScriptedCompiler {
    outcomes: Vec<bool>,
    calls: AtomicUsize,
}

impl ScriptedCompiler {
    fn new(outcomes: Vec<bool>) -> Arc<Self> {
        Arc::new(Self {
            outcomes,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TexCompiler for ScriptedCompiler {
    async fn compile(&self, _tex: &str, workdir: &Path) -> CompilerOutput {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let success = self
            .outcomes
            .get(n)
            .or(self.outcomes.last())
            .copied()
            .unwrap_or(true);
        if success {
            let pdf = workdir.join("main.pdf");
            std::fs::write(&pdf, b"%PDF-1.5\n%%EOF\n").unwrap();
            CompilerOutput {
                success: true,
                pdf: Some(pdf),
                log: "Output written on main.pdf (7 pages).".into(),
                timed_out: false,
            }
        } else {
            CompilerOutput {
                success: false,
                pdf: None,
                log: "! Undefined control sequence.\nl.42 \\foo\n".into(),
                timed_out: false,
            }
        }
    }
}

/// Repair agent that keeps the plan but quietly loses one figure.
struct FigureDroppingRepair {
    figure: &'static str,
}

#[async_trait]
impl RepairAgent for FigureDroppingRepair {
    async fn repair(
        &self,
        _bundle: &ContentBundle,
        plan: &PresentationPlan,
        _report: &VerificationReport,
    ) -> Result<PlanDraft, AgentError> {
        let slides = plan
            .slides
            .iter()
            .map(|s| SlideDraft {
                title: Some(s.title.clone()),
                role: Some(s.role.to_string()),
                sources: s.sources.clone(),
                elements: s
                    .elements
                    .iter()
                    .filter(|e| !matches!(e, SlideElement::Figure { figure_id, .. } if figure_id == self.figure))
                    .map(element_draft)
                    .collect(),
            })
            .collect();
        Ok(PlanDraft { slides })
    }
}

struct Harness {
    store: Arc<MemoryArtifactStore>,
    planner: Arc<ScriptedPlanner>,
    compiler: Arc<ScriptedCompiler>,
    pipeline: Pipeline,
}

fn harness(compiles: Vec<bool>) -> Harness {
    let store = Arc::new(MemoryArtifactStore::new());
    let planner = ScriptedPlanner::new(full_draft(&paper()));
    let compiler = ScriptedCompiler::new(compiles);
    let pipeline = Pipeline::new(
        store.clone(),
        Arc::new(StaticExtractor { bundle: paper() }),
        Agents::planner_only(planner.clone()),
        compiler.clone(),
    );
    Harness {
        store,
        planner,
        compiler,
        pipeline,
    }
}

fn config() -> PipelineConfigBuilder {
    PipelineConfig::builder()
        .agent_max_retries(0)
        .retry_backoff_ms(1)
        .semantic_check(false)
}

fn policy() -> RetryPolicy {
    RetryPolicy::from_config(&config().build().unwrap())
}

async fn plan_at(store: &dyn ArtifactStore, session: &SessionId, revision: u32) -> PresentationPlan {
    get_json(store, session, &ArtifactKey::new(ArtifactKind::Plan, revision, PLAN_ARTIFACT))
        .await
        .unwrap()
}

async fn plan_revisions(store: &dyn ArtifactStore, session: &SessionId) -> Vec<u32> {
    store
        .list(session, ArtifactKind::Plan)
        .await
        .unwrap()
        .into_iter()
        .filter(|k| k.name == PLAN_ARTIFACT)
        .map(|k| k.revision)
        .collect()
}

fn outcome(result: &SessionResult, stage: Stage) -> Option<StageOutcome> {
    result.stage(stage).map(|r| r.outcome)
}

async fn initial_plan(bundle: &ContentBundle) -> PresentationPlan {
    let planner = ScriptedPlanner::new(full_draft(bundle));
    let config = config().build().unwrap();
    generate_plan(planner.as_ref(), bundle, &config, &policy()).await.unwrap()
}

// ── End-to-end runs ──────────────────────────────────────────────────────────

#[tokio::test]
async fn clean_run_succeeds_without_repair() {
    let h = harness(vec![true]);
    let config = config().build().unwrap();

    let result = h.pipeline.run("paper.pdf", &config).await.unwrap();

    assert_eq!(result.status, ExitStatus::Success, "warnings: {:?}", result.warnings);
    assert_eq!(result.final_state, PipelineState::Finalized);
    assert_eq!(result.plan_revision, Some(0));
    assert_eq!(result.slide_count, 5);
    let compile = result.compile.as_ref().unwrap();
    assert_eq!(compile.status, CompileStatus::Success);
    assert_eq!(compile.attempt, 1);
    assert_eq!(h.compiler.calls(), 1);
    assert!(!result.verification.as_ref().unwrap().has_blocking_issues());
    assert_eq!(outcome(&result, Stage::Repair), Some(StageOutcome::Skipped));

    let plan = plan_at(h.store.as_ref(), &result.session, 0).await;
    assert_eq!(plan.origin, PlanOrigin::Generated);
    assert_eq!(plan.covered_sections().len(), 5);
    assert_eq!(plan.figure_ids(), BTreeSet::from(["fig-1", "fig-2"]));

    let stored: SessionResult = get_json(
        h.store.as_ref(),
        &result.session,
        &ArtifactKey::new(ArtifactKind::Session, 0, RESULT_ARTIFACT),
    )
    .await
    .unwrap();
    assert_eq!(stored.status, ExitStatus::Success);
    assert_eq!(stored.plan_revision, Some(0));
}

#[tokio::test]
async fn manifest_lists_every_published_artifact_with_its_digest() {
    let h = harness(vec![true]);
    let config = config().build().unwrap();

    let result = h.pipeline.run("paper.pdf", &config).await.unwrap();

    let manifest: Vec<ArtifactRef> = get_json(
        h.store.as_ref(),
        &result.session,
        &ArtifactKey::new(ArtifactKind::Session, 0, MANIFEST_ARTIFACT),
    )
    .await
    .unwrap();
    assert_eq!(manifest, result.published);

    let keys: Vec<ArtifactKey> = manifest.iter().map(|r| r.key.clone()).collect();
    assert!(keys.contains(&ArtifactKey::new(ArtifactKind::Plan, 0, PLAN_ARTIFACT)));
    assert!(keys.contains(&ArtifactKey::new(ArtifactKind::Document, 0, FINAL_TEX)));

    for receipt in &manifest {
        assert_eq!(receipt.session, result.session);
        let bytes = h.store.get(&result.session, &receipt.key).await.unwrap();
        assert_eq!(receipt.digest, digest_hex(&bytes), "digest of {}", receipt.key);
        assert_eq!(receipt.size, bytes.len());
    }
}

#[tokio::test]
async fn compile_failures_exhaust_the_attempt_budget() {
    let h = harness(vec![false]);
    let config = config().max_compile_attempts(3).build().unwrap();

    let result = h.pipeline.run("paper.pdf", &config).await.unwrap();

    assert_eq!(h.compiler.calls(), 3);
    let compile = result.compile.as_ref().unwrap();
    assert_eq!(compile.status, CompileStatus::Failure);
    assert_eq!(compile.attempt, 3);
    assert!(result
        .warnings
        .iter()
        .any(|w| matches!(w, StageWarning::CompileExhausted { attempts: 3, .. })));
    assert_eq!(outcome(&result, Stage::Compile), Some(StageOutcome::Degraded));
    assert_eq!(result.status, ExitStatus::PartialSuccess);
    assert_eq!(result.status.code(), 2);
    assert_eq!(result.final_state, PipelineState::Finalized);

    let failed_compiles = result
        .transitions
        .iter()
        .filter(|t| t.to == PipelineState::Compiled { success: false })
        .count();
    assert_eq!(failed_compiles, 3);

    let logs: Vec<String> = h
        .store
        .list(&result.session, ArtifactKind::Document)
        .await
        .unwrap()
        .into_iter()
        .filter(|k| k.name.ends_with(".log"))
        .map(|k| k.name)
        .collect();
    assert_eq!(logs, vec!["attempt-1.log", "attempt-2.log", "attempt-3.log"]);
}

#[tokio::test]
async fn compile_recovers_on_a_later_attempt() {
    let h = harness(vec![false, true]);
    let config = config().build().unwrap();

    let result = h.pipeline.run("paper.pdf", &config).await.unwrap();

    assert_eq!(result.status, ExitStatus::Success);
    assert_eq!(result.compile.as_ref().map(|c| c.attempt), Some(2));
    assert_eq!(h.compiler.calls(), 2);
}

#[tokio::test]
async fn skipped_compilation_still_verifies() {
    let h = harness(vec![true]);
    let config = config().skip_compilation(true).build().unwrap();

    let result = h.pipeline.run("paper.pdf", &config).await.unwrap();

    assert_eq!(h.compiler.calls(), 0);
    assert!(result.compile.is_none());
    assert!(result.warnings.contains(&StageWarning::CompileSkipped));
    assert_eq!(outcome(&result, Stage::Compile), Some(StageOutcome::Skipped));
    assert_eq!(outcome(&result, Stage::Verification), Some(StageOutcome::Succeeded));
    assert_eq!(result.status, ExitStatus::Success);
}

#[tokio::test]
async fn empty_feedback_ends_interactive_loop_immediately() {
    let h = harness(vec![true]);
    let feedback = Arc::new(ScriptedFeedback::new([""]));
    let config = config()
        .interactive_revision(true)
        .feedback_source(feedback.clone())
        .build()
        .unwrap();

    let result = h.pipeline.run("paper.pdf", &config).await.unwrap();

    assert_eq!(result.revision_turns, 0);
    assert_eq!(result.plan_revision, Some(0));
    assert_eq!(plan_revisions(h.store.as_ref(), &result.session).await, vec![0]);
    assert_eq!(h.planner.revisions.load(Ordering::SeqCst), 0);
    let seen = feedback.summaries();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].turn, 1);
    assert_eq!(seen[0].plan_revision, 0);
    assert!(seen[0].compiled);
    assert_eq!(result.status, ExitStatus::Success);
}

#[tokio::test]
async fn interactive_turn_keeps_a_deliberate_removal() {
    let h = harness(vec![true]);
    let feedback = Arc::new(ScriptedFeedback::new(["Drop the Related Work slide", "exit"]));
    let config = config()
        .interactive_revision(true)
        .feedback_source(feedback.clone())
        .build()
        .unwrap();

    let result = h.pipeline.run("paper.pdf", &config).await.unwrap();

    assert_eq!(result.revision_turns, 1);
    assert_eq!(result.plan_revision, Some(1));
    assert_eq!(plan_revisions(h.store.as_ref(), &result.session).await, vec![0, 1]);

    let revised = plan_at(h.store.as_ref(), &result.session, 1).await;
    assert_eq!(revised.parent, Some(0));
    assert!(matches!(revised.origin, PlanOrigin::Revised { .. }));
    assert!(revised.slides.iter().all(|s| s.title != "Related Work"));

    // Verified and reported, but not repaired back in.
    let report = result.verification.as_ref().unwrap();
    assert_eq!(report.plan_revision, 1);
    assert!(report
        .blocking()
        .any(|i| i.id == "uncovered_section:sec-2"));
    assert_eq!(outcome(&result, Stage::Verification), Some(StageOutcome::Degraded));
    assert_eq!(result.status, ExitStatus::PartialSuccess);

    let seen = feedback.summaries();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[1].plan_revision, 1);
    assert_eq!(seen[1].blocking_issues, 1);
}

#[tokio::test]
async fn revision_turn_limit_is_respected() {
    let h = harness(vec![true]);
    let feedback = Arc::new(ScriptedFeedback::new([
        "Drop Introduction",
        "Drop Conclusion",
        "Drop Method",
    ]));
    let config = config()
        .interactive_revision(true)
        .max_revision_turns(2)
        .feedback_source(feedback.clone())
        .build()
        .unwrap();

    let result = h.pipeline.run("paper.pdf", &config).await.unwrap();

    assert_eq!(result.revision_turns, 2);
    assert_eq!(result.plan_revision, Some(2));
    assert_eq!(feedback.summaries().len(), 2);
}

#[tokio::test]
async fn batch_revision_runs_in_a_new_session() {
    let h = harness(vec![true]);
    let config = config().build().unwrap();
    let first = h.pipeline.run("paper.pdf", &config).await.unwrap();

    let second = h
        .pipeline
        .revise(
            RevisionSource::Session(first.session.clone()),
            "Drop the Conclusion slide",
            &config,
        )
        .await
        .unwrap();

    assert_ne!(second.session, first.session);
    assert_eq!(second.revision_turns, 1);
    assert_eq!(second.plan_revision, Some(1));
    assert_eq!(outcome(&second, Stage::Extraction), Some(StageOutcome::Skipped));

    let seed = plan_at(h.store.as_ref(), &second.session, 0).await;
    assert!(matches!(seed.origin, PlanOrigin::Seeded { .. }));
    let revised = plan_at(h.store.as_ref(), &second.session, 1).await;
    assert!(revised.slides.iter().all(|s| s.title != "Conclusion"));

    // The original session is untouched.
    assert_eq!(plan_revisions(h.store.as_ref(), &first.session).await, vec![0]);
}

#[tokio::test]
async fn stop_word_is_not_valid_batch_feedback() {
    let h = harness(vec![true]);
    let config = config().build().unwrap();
    let first = h.pipeline.run("paper.pdf", &config).await.unwrap();

    let err = h
        .pipeline
        .revise(RevisionSource::Session(first.session), "  exit ", &config)
        .await
        .unwrap_err();
    assert!(matches!(err, Paper2BeamerError::InvalidConfig(_)));
}

#[tokio::test]
async fn blank_section_heading_does_not_fail_the_run() {
    let mut bundle = paper();
    bundle.sections[1].heading = String::new();
    let mut draft = full_draft(&bundle);
    draft.slides.truncate(1);
    let store = Arc::new(MemoryArtifactStore::new());
    let pipeline = Pipeline::new(
        store.clone(),
        Arc::new(StaticExtractor { bundle }),
        Agents::planner_only(ScriptedPlanner::new(draft)),
        ScriptedCompiler::new(vec![true]),
    );
    let config = config().build().unwrap();

    let result = pipeline.run("paper.pdf", &config).await.unwrap();

    assert_eq!(result.status, ExitStatus::Success, "error: {:?}", result.error);
    assert_eq!(outcome(&result, Stage::Document), Some(StageOutcome::Succeeded));
    let plan = plan_at(store.as_ref(), &result.session, 0).await;
    assert_eq!(plan.covered_sections().len(), 5);
    assert!(plan.slides.iter().any(|s| s.title == "Section 2"));
}

#[tokio::test]
async fn failed_extraction_is_a_failed_session() {
    let store = Arc::new(MemoryArtifactStore::new());
    let pipeline = Pipeline::new(
        store.clone(),
        Arc::new(FailingExtractor),
        Agents::planner_only(ScriptedPlanner::new(PlanDraft::default())),
        ScriptedCompiler::new(vec![true]),
    );
    let config = config().build().unwrap();

    let result = pipeline.run("scan.pdf", &config).await.unwrap();

    assert_eq!(result.status, ExitStatus::Failed);
    assert_eq!(result.status.code(), 1);
    assert_eq!(result.final_state, PipelineState::Failed);
    assert_eq!(outcome(&result, Stage::Extraction), Some(StageOutcome::Failed));
    assert!(result.error.as_deref().unwrap().contains("no text layer"));
    assert_eq!(result.plan_revision, None);
    assert!(store
        .exists(&result.session, &ArtifactKey::new(ArtifactKind::Session, 0, RESULT_ARTIFACT))
        .await
        .unwrap());
}

#[tokio::test]
async fn empty_plan_draft_fails_the_session() {
    let store = Arc::new(MemoryArtifactStore::new());
    let pipeline = Pipeline::new(
        store,
        Arc::new(StaticExtractor { bundle: paper() }),
        Agents::planner_only(ScriptedPlanner::new(PlanDraft::default())),
        ScriptedCompiler::new(vec![true]),
    );
    let config = config().build().unwrap();

    let result = pipeline.run("paper.pdf", &config).await.unwrap();

    assert_eq!(result.status, ExitStatus::Failed);
    assert_eq!(outcome(&result, Stage::Planning), Some(StageOutcome::Failed));
}

#[tokio::test]
async fn speech_without_agent_falls_back_to_slide_text() {
    let h = harness(vec![true]);
    let config = config()
        .speech(SpeechOptions {
            duration_minutes: 2,
            ..SpeechOptions::default()
        })
        .build()
        .unwrap();

    let result = h.pipeline.run("paper.pdf", &config).await.unwrap();

    assert_eq!(outcome(&result, Stage::Speech), Some(StageOutcome::Succeeded));
    let script: SpeechScript = get_json(
        h.store.as_ref(),
        &result.session,
        &ArtifactKey::new(ArtifactKind::Speech, 0, SCRIPT_JSON),
    )
    .await
    .unwrap();
    assert_eq!(script.segments.len(), result.slide_count);
    assert_eq!(script.total_seconds(), 120);
    assert_eq!(script.segments.last().map(|s| s.cumulative_seconds), Some(120));
    assert!(script.segments.iter().all(|s| !s.text.is_empty()));
}

// ── Properties ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn initial_plan_covers_every_section_in_source_order() {
    for n in 1..=8 {
        let bundle = plain_paper(n);
        // The planner only bothers with the last section.
        let mut draft = full_draft(&bundle);
        draft.slides.drain(..n - 1);
        let planner = ScriptedPlanner::new(draft);
        let config = config().build().unwrap();

        let plan = generate_plan(planner.as_ref(), &bundle, &config, &policy())
            .await
            .unwrap();

        assert_eq!(plan.covered_sections().len(), n, "n = {n}");
        let order: Vec<usize> = plan
            .slides
            .iter()
            .filter_map(|s| s.sources.first())
            .filter_map(|id| bundle.section_position(id))
            .collect();
        assert!(order.windows(2).all(|w| w[0] <= w[1]), "n = {n}: {order:?}");
        let indices: Vec<usize> = plan.slides.iter().map(|s| s.index).collect();
        assert_eq!(indices, (1..=plan.slides.len()).collect::<Vec<_>>());
    }
}

#[tokio::test]
async fn rendering_is_deterministic() {
    let bundle = paper();
    let plan = initial_plan(&bundle).await;
    let render = || latex::render(&plan, "Madrid", Language::En, &Default::default(), 7).unwrap();

    let a = render();
    let b = render();

    assert_eq!(a.content, b.content);
    assert!(a.content.contains("\\usetheme{Madrid}"));
    assert_eq!(a.plan_revision, plan.revision);
}

#[tokio::test]
async fn memory_store_is_append_only() {
    let store = MemoryArtifactStore::new();
    let session = SessionId::new();
    let key = ArtifactKey::new(ArtifactKind::Plan, 0, PLAN_ARTIFACT);

    store.put(&session, &key, b"first").await.unwrap();
    let err = store.put(&session, &key, b"second").await.unwrap_err();

    assert!(matches!(err, StorageError::AlreadyExists { .. }));
    assert_eq!(store.get(&session, &key).await.unwrap(), b"first");
}

#[tokio::test]
async fn disk_store_is_append_only() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsArtifactStore::new(dir.path()).unwrap();
    let session = SessionId::new();
    let key = ArtifactKey::new(ArtifactKind::Document, 2, "slides.tex");

    let stored = store.put(&session, &key, b"\\documentclass{beamer}").await.unwrap();
    let err = store.put(&session, &key, b"overwrite").await.unwrap_err();

    assert!(matches!(err, StorageError::AlreadyExists { .. }));
    assert_eq!(
        stored.location,
        Some(dir.path().join(session.as_str()).join("document").join("r2").join("slides.tex"))
    );
    assert_eq!(store.get(&session, &key).await.unwrap(), b"\\documentclass{beamer}");
}

#[tokio::test]
async fn repair_never_increases_blocking_issues() {
    let bundle = paper();
    let base = initial_plan(&bundle).await;
    let config = config().build().unwrap();
    let checks = CheckOptions::from_config(&config);

    let drop_fig1 = |p: &mut PresentationPlan| {
        for s in &mut p.slides {
            s.elements
                .retain(|e| !matches!(e, SlideElement::Figure { figure_id, .. } if figure_id == "fig-1"));
        }
    };
    let drop_related = |p: &mut PresentationPlan| p.slides.retain(|s| s.title != "Related Work");
    let ghost_figure = |p: &mut PresentationPlan| {
        p.slides[0].elements.push(SlideElement::Figure {
            figure_id: "fig-9".into(),
            asset: "figures/fig-9.png".into(),
            caption: "Not in the paper".into(),
        })
    };
    let damages: [&dyn Fn(&mut PresentationPlan); 3] = [&drop_fig1, &drop_related, &ghost_figure];

    for (i, damage) in damages.iter().enumerate() {
        let mut plan = base.clone();
        damage(&mut plan);
        plan.renumber();

        let (report, _) = verify(&bundle, &plan, None, &checks, &policy()).await;
        assert!(report.has_blocking_issues(), "damage {i} went unnoticed");

        let (result, warnings) = repair(&bundle, &plan, &report, None, &checks, &policy()).await;
        let after = check_plan(&bundle, &result.plan, &checks)
            .iter()
            .filter(|i| i.is_blocking())
            .count();

        assert!(warnings.is_empty());
        assert!(after <= report.blocking_count(), "damage {i}");
        assert_eq!(after, 0, "damage {i}");
        assert_eq!(result.plan.revision, plan.revision + 1);
        assert!(result.report.unaddressed.iter().all(|id| !id.starts_with("unreferenced_figure")));
    }
}

#[tokio::test]
async fn figure_dropped_by_repair_is_flagged_and_restored() {
    let bundle = paper();
    let plan = initial_plan(&bundle).await;
    assert_eq!(plan.figure_ids(), BTreeSet::from(["fig-1", "fig-2"]));
    let config = config().build().unwrap();
    let checks = CheckOptions::from_config(&config);

    // Something blocking so repair runs at all.
    let mut damaged = plan.clone();
    damaged.slides[0].elements.push(SlideElement::Figure {
        figure_id: "fig-9".into(),
        asset: "figures/fig-9.png".into(),
        caption: "Not in the paper".into(),
    });
    let (report, _) = verify(&bundle, &damaged, None, &checks, &policy()).await;
    assert!(report.blocking().any(|i| i.id.starts_with("unknown_figure:fig-9")));

    // What the agent proposes on its own loses fig-2, and the checker says so.
    let agent = FigureDroppingRepair { figure: "fig-2" };
    let draft = agent.repair(&bundle, &damaged, &report).await.unwrap();
    let proposed = damaged.successor(
        PlanOrigin::Repaired {
            report_revision: damaged.revision,
        },
        slides_from_draft(&bundle, &draft).unwrap(),
    );
    let flagged = check_plan(&bundle, &proposed, &checks);
    assert!(flagged
        .iter()
        .any(|i| i.id == "unreferenced_figure:fig-2" && i.is_blocking()));

    // The repair stage does not let the loss through.
    let (result, warnings) = repair(&bundle, &damaged, &report, Some(&agent), &checks, &policy()).await;
    assert!(warnings.is_empty(), "{warnings:?}");
    assert_eq!(result.plan.figure_ids(), BTreeSet::from(["fig-1", "fig-2"]));
    assert_eq!(result.plan.parent, Some(damaged.revision));
    assert!(check_plan(&bundle, &result.plan, &checks).iter().all(|i| !i.is_blocking()));
    assert!(result
        .report
        .addressed
        .iter()
        .any(|id| id.starts_with("unknown_figure:fig-9")));
}
