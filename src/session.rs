//! Session orchestrator: sequences every stage for one run.
//!
//! ## Flow
//!
//! ```text
//! extract ─▶ plan r0 ─▶ render ─▶ compile loop ─▶ verify ─┬─▶ finalize ─▶ revise* ─▶ speech
//!                                                          │
//!                                  repair rN+1 ◀─ blocking ┘  (bounded, non-regressive)
//! ```
//!
//! ## Failure policy
//!
//! Extraction and initial planning failures end the session as `Failed`.
//! Compile exhaustion, unresolved verification, agent degradation and speech
//! failures become [`StageWarning`]s and the session ends as
//! `PartialSuccess`. Every outcome, failures included, is returned as a
//! [`SessionResult`] and persisted under `session/r0/result.json`; only
//! problems before a session exists (provider resolution, unreadable
//! revision input) come back as `Err`.
//!
//! ## Revisions
//!
//! Plan revision numbers are handed out by the session and never reused. A
//! repair revision that is rejected by the regression guard keeps its number,
//! so the next candidate gets a fresh one even though it derives from the
//! older accepted plan.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::agents::{resolve_provider, Agents, LlmAgents, RetryPolicy};
use crate::config::PipelineConfig;
use crate::error::{Paper2BeamerError, StageWarning};
use crate::model::{
    CompileResult, ContentBundle, DocumentSource, PlanOrigin, PresentationPlan, RenderOptions, SessionId,
    VerificationReport,
};
use crate::output::{SessionResult, StageOutcome, StageRecord};
use crate::pipeline::compile::{CompileLoop, LatexCompiler, TexCompiler};
use crate::pipeline::extract::{ContentExtractor, PdfExtractor};
use crate::pipeline::latex;
use crate::pipeline::planner::generate_plan;
use crate::pipeline::repair::repair;
use crate::pipeline::revise::{is_stop_signal, revise_plan, TurnSummary};
use crate::pipeline::speech::generate_speech;
use crate::pipeline::verify::{verify, CheckOptions};
use crate::progress::Stage;
use crate::state::{PipelineState, StateMachine};
use crate::store::{
    get_json, put_json, ArtifactKey, ArtifactKind, ArtifactStore, FsArtifactStore, RecordingStore,
};

pub const BUNDLE_ARTIFACT: &str = "bundle.json";
pub const PLAN_ARTIFACT: &str = "plan.json";
pub const REPORT_ARTIFACT: &str = "report.json";
pub const RESULT_ARTIFACT: &str = "result.json";
/// Receipts of every artifact the session published, in order.
pub const MANIFEST_ARTIFACT: &str = "manifest.json";
/// Source of the last compile of a revision (patched if the loop patched it).
pub const FINAL_TEX: &str = "slides.tex";

/// Where a batch revision starts from.
#[derive(Debug, Clone, PartialEq)]
pub enum RevisionSource {
    /// A session in this pipeline's store; its accepted plan revision is used.
    Session(SessionId),
    /// Loose files: a plan JSON, optionally the previous `.tex` and the
    /// content bundle. When `bundle` is `None` it is looked up next to the
    /// plan, assuming the on-disk store layout.
    Artifacts {
        plan: PathBuf,
        previous_tex: Option<PathBuf>,
        bundle: Option<PathBuf>,
    },
}

/// Collaborators shared by every session.
#[derive(Clone)]
pub struct Pipeline {
    store: Arc<dyn ArtifactStore>,
    extractor: Arc<dyn ContentExtractor>,
    agents: Agents,
    compiler: Arc<dyn TexCompiler>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").field("agents", &self.agents).finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        extractor: Arc<dyn ContentExtractor>,
        agents: Agents,
        compiler: Arc<dyn TexCompiler>,
    ) -> Self {
        Self {
            store,
            extractor,
            agents,
            compiler,
        }
    }

    /// Production wiring: on-disk store, pdfium extraction, LLM agents,
    /// `pdflatex`/`xelatex`.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, Paper2BeamerError> {
        let provider = resolve_provider(config)?;
        let store = Arc::new(FsArtifactStore::new(&config.output_dir)?);
        let extractor = Arc::new(PdfExtractor::from_config(config, Some(Arc::clone(&provider))));
        let agents = Agents::from_llm(Arc::new(LlmAgents::new(provider, config)));
        let compiler = Arc::new(LatexCompiler::from_config(config));
        Ok(Self::new(store, extractor, agents, compiler))
    }

    pub fn store(&self) -> &dyn ArtifactStore {
        self.store.as_ref()
    }

    /// Run a full session on a PDF path or URL.
    pub async fn run(&self, input: &str, config: &PipelineConfig) -> Result<SessionResult, Paper2BeamerError> {
        let mut session = Session::new(self, config, SessionId::new(), None);
        info!("Session {} started for '{}'", session.id, input);
        let outcome = session.run_from_input(input).await;
        Ok(session.finish(outcome).await)
    }

    /// Apply one piece of feedback to a prior plan in a new session.
    pub async fn revise(
        &self,
        source: RevisionSource,
        feedback: &str,
        config: &PipelineConfig,
    ) -> Result<SessionResult, Paper2BeamerError> {
        if is_stop_signal(feedback) {
            return Err(Paper2BeamerError::InvalidConfig(
                "revision feedback must not be empty".into(),
            ));
        }
        let seed = self.load_seed(&source).await?;
        let mut session = Session::new(self, config, SessionId::new(), seed.asset_session.clone());
        info!("Session {} revising {}", session.id, seed.from);
        let outcome = session.run_revision(seed, feedback).await;
        Ok(session.finish(outcome).await)
    }

    async fn load_seed(&self, source: &RevisionSource) -> Result<Seed, Paper2BeamerError> {
        match source {
            RevisionSource::Session(id) => {
                let store = self.store();
                let bundle: ContentBundle =
                    get_json(store, id, &ArtifactKey::new(ArtifactKind::Raw, 0, BUNDLE_ARTIFACT)).await?;
                // The accepted revision, not a rejected repair candidate.
                let accepted = get_json::<SessionResult>(
                    store,
                    id,
                    &ArtifactKey::new(ArtifactKind::Session, 0, RESULT_ARTIFACT),
                )
                .await
                .ok()
                .and_then(|r| r.plan_revision);
                let revision = match accepted {
                    Some(r) => Some(r),
                    None => store.latest_revision(id, ArtifactKind::Plan, PLAN_ARTIFACT).await?,
                };
                let revision = revision.ok_or_else(|| Paper2BeamerError::RevisionInput {
                    path: PathBuf::from(id.as_str()),
                    detail: "session has no plan".into(),
                })?;
                let plan: PresentationPlan =
                    get_json(store, id, &ArtifactKey::new(ArtifactKind::Plan, revision, PLAN_ARTIFACT)).await?;
                let previous_tex = store
                    .get(id, &ArtifactKey::new(ArtifactKind::Document, revision, FINAL_TEX))
                    .await
                    .ok()
                    .and_then(|b| String::from_utf8(b).ok());
                Ok(Seed {
                    bundle,
                    plan,
                    previous_tex,
                    from: format!("session {id}"),
                    asset_session: Some(id.clone()),
                })
            }
            RevisionSource::Artifacts {
                plan,
                previous_tex,
                bundle,
            } => {
                let session_dir = plan.ancestors().nth(3).map(Path::to_path_buf);
                let bundle_path = match bundle {
                    Some(p) => p.clone(),
                    None => session_dir
                        .as_ref()
                        .map(|d| d.join("raw").join("r0").join(BUNDLE_ARTIFACT))
                        .ok_or_else(|| Paper2BeamerError::RevisionInput {
                            path: plan.clone(),
                            detail: "cannot locate the content bundle; pass it explicitly".into(),
                        })?,
                };
                let asset_session = session_dir
                    .as_ref()
                    .and_then(|d| d.file_name())
                    .and_then(|n| n.to_str())
                    .and_then(|n| n.parse::<SessionId>().ok());
                let previous_tex = match previous_tex {
                    Some(p) => Some(read_text(p).await?),
                    None => None,
                };
                Ok(Seed {
                    bundle: read_json(&bundle_path).await?,
                    plan: read_json(plan).await?,
                    previous_tex,
                    from: plan.display().to_string(),
                    asset_session,
                })
            }
        }
    }
}

/// Build a pipeline from `config` and run it on `input`.
pub async fn run(input: &str, config: &PipelineConfig) -> Result<SessionResult, Paper2BeamerError> {
    Pipeline::from_config(config)?.run(input, config).await
}

/// Build a pipeline from `config` and apply `feedback` to `source`.
pub async fn revise(
    source: RevisionSource,
    feedback: &str,
    config: &PipelineConfig,
) -> Result<SessionResult, Paper2BeamerError> {
    Pipeline::from_config(config)?.revise(source, feedback, config).await
}

async fn read_text(path: &Path) -> Result<String, Paper2BeamerError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Paper2BeamerError::RevisionInput {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, Paper2BeamerError> {
    let text = read_text(path).await?;
    serde_json::from_str(&text).map_err(|e| Paper2BeamerError::RevisionInput {
        path: path.to_path_buf(),
        detail: format!("invalid JSON: {e}"),
    })
}

struct Seed {
    bundle: ContentBundle,
    plan: PresentationPlan,
    previous_tex: Option<String>,
    from: String,
    asset_session: Option<SessionId>,
}

/// Mutable state of one running session.
struct Session<'a> {
    pipeline: &'a Pipeline,
    config: &'a PipelineConfig,
    /// Pipeline store; every write through it is recorded for the manifest.
    store: RecordingStore,
    id: SessionId,
    /// Session whose `raw/r0` holds the figure assets.
    asset_session: SessionId,
    policy: RetryPolicy,
    checks: CheckOptions,
    state: StateMachine,
    current: Option<Stage>,
    stages: Vec<StageRecord>,
    warnings: Vec<StageWarning>,
    next_revision: u32,
    plan: Option<PresentationPlan>,
    document: Option<DocumentSource>,
    compile: Option<CompileResult>,
    report: Option<VerificationReport>,
    revision_turns: u32,
    started: Instant,
}

impl<'a> Session<'a> {
    fn new(
        pipeline: &'a Pipeline,
        config: &'a PipelineConfig,
        id: SessionId,
        asset_session: Option<SessionId>,
    ) -> Self {
        Self {
            pipeline,
            config,
            store: RecordingStore::new(Arc::clone(&pipeline.store)),
            asset_session: asset_session.unwrap_or_else(|| id.clone()),
            id,
            policy: RetryPolicy::from_config(config),
            checks: CheckOptions::from_config(config),
            state: StateMachine::new(),
            current: None,
            stages: Vec::new(),
            warnings: Vec::new(),
            next_revision: 0,
            plan: None,
            document: None,
            compile: None,
            report: None,
            revision_turns: 0,
            started: Instant::now(),
        }
    }

    fn store(&self) -> &dyn ArtifactStore {
        &self.store
    }

    // ── Bookkeeping ──────────────────────────────────────────────────────

    fn begin(&mut self, stage: Stage) {
        self.current = Some(stage);
        if let Some(cb) = &self.config.progress_callback {
            cb.on_stage_start(stage);
        }
    }

    /// Record the outcome of `stage`; a later record for the same stage
    /// replaces the earlier one.
    fn record(&mut self, stage: Stage, outcome: StageOutcome, detail: impl Into<String>) {
        let detail = detail.into();
        if let Some(cb) = &self.config.progress_callback {
            cb.on_stage_complete(stage, &detail);
        }
        let record = StageRecord {
            stage,
            outcome,
            detail,
        };
        match self.stages.iter_mut().find(|r| r.stage == stage) {
            Some(existing) => *existing = record,
            None => self.stages.push(record),
        }
        self.current = None;
    }

    fn warn(&mut self, warning: StageWarning) {
        warn!("Session {}: {}", self.id, warning);
        if let Some(cb) = &self.config.progress_callback {
            cb.on_warning(&warning);
        }
        self.warnings.push(warning);
    }

    fn advance(&mut self, to: PipelineState) -> Result<(), Paper2BeamerError> {
        self.state.advance(to)
    }

    fn take_revision(&mut self) -> u32 {
        let r = self.next_revision;
        self.next_revision += 1;
        r
    }

    async fn put_plan(&self, plan: &PresentationPlan) -> Result<(), Paper2BeamerError> {
        let key = ArtifactKey::new(ArtifactKind::Plan, plan.revision, PLAN_ARTIFACT);
        put_json(self.store(), &self.id, &key, plan).await?;
        Ok(())
    }

    // ── Entry flows ──────────────────────────────────────────────────────

    async fn run_from_input(&mut self, input: &str) -> Result<(), Paper2BeamerError> {
        let pipeline = self.pipeline;

        self.begin(Stage::Extraction);
        let bundle = pipeline.extractor.extract(input, &self.id, self.store()).await?;
        let key = ArtifactKey::new(ArtifactKind::Raw, 0, BUNDLE_ARTIFACT);
        put_json(self.store(), &self.id, &key, &bundle).await?;
        self.advance(PipelineState::Extracted)?;
        self.record(
            Stage::Extraction,
            StageOutcome::Succeeded,
            format!(
                "{} sections, {} figures, {} tables",
                bundle.sections.len(),
                bundle.figures.len(),
                bundle.tables.len()
            ),
        );

        self.begin(Stage::Planning);
        let plan = generate_plan(
            pipeline.agents.planner.as_ref(),
            &bundle,
            self.config,
            &self.policy,
        )
        .await?;
        self.put_plan(&plan).await?;
        self.next_revision = plan.revision + 1;
        self.plan = Some(plan.clone());
        self.advance(PipelineState::Planned)?;
        self.record(
            Stage::Planning,
            StageOutcome::Succeeded,
            format!("{} slides", plan.slides.len()),
        );

        self.render_and_compile(&plan).await?;
        let plan = self.converge(&bundle, plan).await?;
        self.plan = Some(plan.clone());
        self.advance(PipelineState::Finalized)?;

        let plan = self.interactive(&bundle, plan).await?;
        self.speech(&plan).await;
        Ok(())
    }

    async fn run_revision(&mut self, seed: Seed, feedback: &str) -> Result<(), Paper2BeamerError> {
        let pipeline = self.pipeline;
        let Seed {
            bundle,
            plan,
            previous_tex,
            from,
            ..
        } = seed;

        self.begin(Stage::Extraction);
        let key = ArtifactKey::new(ArtifactKind::Raw, 0, BUNDLE_ARTIFACT);
        put_json(self.store(), &self.id, &key, &bundle).await?;
        self.advance(PipelineState::Extracted)?;
        self.record(Stage::Extraction, StageOutcome::Skipped, format!("reused from {from}"));

        let seeded = PresentationPlan {
            origin: PlanOrigin::Seeded { from },
            ..plan
        };
        self.put_plan(&seeded).await?;
        self.next_revision = seeded.revision + 1;
        self.plan = Some(seeded.clone());

        self.begin(Stage::Revision);
        let mut next = revise_plan(
            pipeline.agents.planner.as_ref(),
            &bundle,
            &seeded,
            feedback,
            previous_tex.as_deref(),
            self.config.language,
            &self.policy,
        )
        .await?;
        next.revision = self.take_revision();
        self.put_plan(&next).await?;
        self.plan = Some(next.clone());
        self.revision_turns = 1;
        self.advance(PipelineState::Planned)?;
        self.record(
            Stage::Revision,
            StageOutcome::Succeeded,
            format!("plan r{} → r{}", seeded.revision, next.revision),
        );

        self.render_and_compile(&next).await?;
        self.verify_revision(&bundle, &next).await?;
        self.advance(PipelineState::Finalized)?;
        self.speech(&next).await;
        Ok(())
    }

    // ── Stages ───────────────────────────────────────────────────────────

    /// Render `plan` and run the compile loop on it.
    async fn render_and_compile(&mut self, plan: &PresentationPlan) -> Result<(), Paper2BeamerError> {
        let pipeline = self.pipeline;
        let config = self.config;

        self.begin(Stage::Document);
        let doc = latex::render(
            plan,
            &config.theme,
            config.language,
            &RenderOptions::default(),
            config.density_threshold,
        )?;
        self.advance(PipelineState::DocumentGenerated)?;
        self.record(
            Stage::Document,
            StageOutcome::Succeeded,
            format!("plan r{}, {} bytes", plan.revision, doc.content.len()),
        );

        let final_key = ArtifactKey::new(ArtifactKind::Document, plan.revision, FINAL_TEX);
        if config.skip_compilation {
            self.store().put(&self.id, &final_key, doc.content.as_bytes()).await?;
            self.warn(StageWarning::CompileSkipped);
            self.record(Stage::Compile, StageOutcome::Skipped, "disabled by configuration");
            self.compile = None;
            self.document = Some(doc);
            return Ok(());
        }

        self.begin(Stage::Compile);
        let compile_loop = CompileLoop {
            compiler: pipeline.compiler.as_ref(),
            tex_fix: pipeline.agents.tex_fix.as_deref(),
            store: self.store(),
            session: &self.id,
            asset_session: &self.asset_session,
            policy: self.policy,
            max_attempts: config.max_compile_attempts,
            density_threshold: config.density_threshold,
            progress: config.progress_callback.as_ref(),
        };
        let outcome = compile_loop.run(plan, doc).await?;
        self.store()
            .put(&self.id, &final_key, outcome.document.content.as_bytes())
            .await?;

        let success = outcome.result.succeeded();
        for _ in 1..outcome.attempts.len() {
            self.advance(PipelineState::Compiled { success: false })?;
            self.advance(PipelineState::DocumentGenerated)?;
        }
        self.advance(PipelineState::Compiled { success })?;

        for w in outcome.warnings {
            self.warn(w);
        }
        let n = outcome.attempts.len();
        if success {
            self.record(
                Stage::Compile,
                StageOutcome::Succeeded,
                format!("plan r{} compiled on attempt {n}", plan.revision),
            );
        } else {
            self.record(
                Stage::Compile,
                StageOutcome::Degraded,
                format!("plan r{} failed after {n} attempt(s)", plan.revision),
            );
        }
        self.compile = Some(outcome.result);
        self.document = Some(outcome.document);
        Ok(())
    }

    async fn verify_and_store(
        &mut self,
        bundle: &ContentBundle,
        plan: &PresentationPlan,
    ) -> Result<VerificationReport, Paper2BeamerError> {
        let verifier = if self.config.semantic_check {
            self.pipeline.agents.verifier.as_deref()
        } else {
            None
        };
        let (report, warning) = verify(bundle, plan, verifier, &self.checks, &self.policy).await;
        if let Some(w) = warning {
            self.warn(w);
        }
        let key = ArtifactKey::new(ArtifactKind::Verification, plan.revision, REPORT_ARTIFACT);
        put_json(self.store(), &self.id, &key, &report).await?;
        Ok(report)
    }

    /// Verify → repair → re-verify until no blocking issue remains or the
    /// repair budget is spent. Returns the accepted plan.
    async fn converge(
        &mut self,
        bundle: &ContentBundle,
        plan: PresentationPlan,
    ) -> Result<PresentationPlan, Paper2BeamerError> {
        let pipeline = self.pipeline;
        let config = self.config;
        if !config.enable_verification {
            self.record(Stage::Verification, StageOutcome::Skipped, "disabled by configuration");
            return Ok(plan);
        }

        self.begin(Stage::Verification);
        let mut report = self.verify_and_store(bundle, &plan).await?;
        self.advance(PipelineState::Verified)?;
        let compiled_revision = plan.revision;
        let mut accepted = plan;
        let mut attempts = 0;

        if !report.has_blocking_issues() {
            self.record(Stage::Repair, StageOutcome::Skipped, "no blocking issues");
        } else if !config.enable_repair {
            self.record(Stage::Repair, StageOutcome::Skipped, "disabled by configuration");
        } else {
            while report.has_blocking_issues() && attempts < config.max_repair_attempts {
                attempts += 1;
                self.begin(Stage::Repair);
                let (mut result, warnings) = repair(
                    bundle,
                    &accepted,
                    &report,
                    pipeline.agents.repair.as_deref(),
                    &self.checks,
                    &self.policy,
                )
                .await;
                for w in warnings {
                    self.warn(w);
                }
                let revision = self.take_revision();
                result.plan.revision = revision;
                result.report.to_revision = revision;
                self.put_plan(&result.plan).await?;
                self.advance(PipelineState::Repaired)?;

                let candidate = self.verify_and_store(bundle, &result.plan).await?;
                self.advance(PipelineState::Verified)?;
                let (before, after) = (report.blocking_count(), candidate.blocking_count());
                if after > before {
                    result.report.accepted = false;
                    self.warn(StageWarning::RepairRegressed {
                        revision,
                        before,
                        after,
                        kept: accepted.revision,
                    });
                }
                let key = ArtifactKey::new(ArtifactKind::Repair, revision, REPORT_ARTIFACT);
                put_json(self.store(), &self.id, &key, &result.report).await?;

                if result.report.accepted {
                    info!("Repair r{} accepted ({} → {} blocking)", revision, before, after);
                    accepted = result.plan;
                    report = candidate;
                }
            }
            let outcome = if report.has_blocking_issues() {
                StageOutcome::Degraded
            } else {
                StageOutcome::Succeeded
            };
            self.record(
                Stage::Repair,
                outcome,
                format!("{attempts} attempt(s); accepted plan r{}", accepted.revision),
            );
        }

        self.settle_verification(report, attempts);

        if accepted.revision != compiled_revision {
            self.render_and_compile(&accepted).await?;
        }
        Ok(accepted)
    }

    /// Attach `report` to the session and flag unresolved blocking issues.
    fn settle_verification(&mut self, report: VerificationReport, attempts: u32) {
        let blocking = report.blocking_count();
        if blocking > 0 {
            self.warn(StageWarning::VerificationUnresolved { blocking, attempts });
            self.record(
                Stage::Verification,
                StageOutcome::Degraded,
                format!("plan r{}: {blocking} blocking issue(s)", report.plan_revision),
            );
        } else {
            self.record(
                Stage::Verification,
                StageOutcome::Succeeded,
                format!(
                    "plan r{}: {} advisory issue(s)",
                    report.plan_revision,
                    report.advisory_count()
                ),
            );
        }
        self.report = Some(report);
    }

    /// Verification after a revision: the report is attached, never repaired,
    /// so deliberate removals survive.
    async fn verify_revision(
        &mut self,
        bundle: &ContentBundle,
        plan: &PresentationPlan,
    ) -> Result<(), Paper2BeamerError> {
        if !self.config.enable_verification {
            self.record(Stage::Verification, StageOutcome::Skipped, "disabled by configuration");
            return Ok(());
        }
        self.begin(Stage::Verification);
        let report = self.verify_and_store(bundle, plan).await?;
        self.advance(PipelineState::Verified)?;
        self.settle_verification(report, 0);
        Ok(())
    }

    async fn interactive(
        &mut self,
        bundle: &ContentBundle,
        plan: PresentationPlan,
    ) -> Result<PresentationPlan, Paper2BeamerError> {
        let pipeline = self.pipeline;
        let config = self.config;
        let source = match (&config.feedback_source, config.interactive_revision) {
            (Some(source), true) => source,
            _ => return Ok(plan),
        };

        self.begin(Stage::Revision);
        let mut plan = plan;
        let mut failed = false;
        let mut turns = 0;
        for turn in 1..=config.max_revision_turns {
            let summary = TurnSummary {
                turn,
                plan_revision: plan.revision,
                slides: plan.slides.len(),
                compiled: self.compile.as_ref().is_some_and(CompileResult::succeeded),
                artifact: self.compile.as_ref().and_then(|c| c.artifact.clone()),
                blocking_issues: self.report.as_ref().map_or(0, VerificationReport::blocking_count),
            };
            if let Some(cb) = &config.progress_callback {
                cb.on_revision_turn(turn, plan.revision);
            }
            let feedback = match source.next_feedback(&summary).await {
                Some(f) if !is_stop_signal(&f) => f,
                _ => {
                    info!("Revision loop stopped before turn {}", turn);
                    break;
                }
            };

            self.advance(PipelineState::Revising)?;
            let previous_tex = self.document.as_ref().map(|d| d.content.clone());
            let revised = revise_plan(
                pipeline.agents.planner.as_ref(),
                bundle,
                &plan,
                &feedback,
                previous_tex.as_deref(),
                config.language,
                &self.policy,
            )
            .await;
            let mut next = match revised {
                Ok(next) => next,
                Err(e) => {
                    self.warn(StageWarning::RevisionFailed {
                        turn,
                        detail: e.to_string(),
                    });
                    self.advance(PipelineState::Finalized)?;
                    failed = true;
                    break;
                }
            };
            next.revision = self.take_revision();
            self.put_plan(&next).await?;
            self.advance(PipelineState::Planned)?;

            self.render_and_compile(&next).await?;
            self.verify_revision(bundle, &next).await?;
            self.advance(PipelineState::Finalized)?;

            turns += 1;
            self.revision_turns += 1;
            self.plan = Some(next.clone());
            plan = next;
        }

        let outcome = if failed {
            StageOutcome::Degraded
        } else {
            StageOutcome::Succeeded
        };
        self.record(Stage::Revision, outcome, format!("{turns} turn(s)"));
        Ok(plan)
    }

    async fn speech(&mut self, plan: &PresentationPlan) {
        let Some(options) = self.config.speech.as_ref() else {
            return;
        };
        let pipeline = self.pipeline;
        self.begin(Stage::Speech);
        let generated = generate_speech(
            pipeline.agents.speech.as_deref(),
            plan,
            options,
            self.config.language,
            self.store(),
            &self.id,
            &self.policy,
        )
        .await;
        match generated {
            Ok(script) => self.record(
                Stage::Speech,
                StageOutcome::Succeeded,
                format!("{} segments, {}s", script.segments.len(), script.total_seconds()),
            ),
            Err(w) => {
                let detail = w.to_string();
                self.warn(w);
                self.record(Stage::Speech, StageOutcome::Degraded, detail);
            }
        }
    }

    // ── Result ───────────────────────────────────────────────────────────

    async fn finish(mut self, outcome: Result<(), Paper2BeamerError>) -> SessionResult {
        let error = match outcome {
            Ok(()) => None,
            Err(e) => {
                error!("Session {} failed during {}: {}", self.id, e.stage_label(), e);
                if let Some(stage) = self.current {
                    self.record(stage, StageOutcome::Failed, e.to_string());
                }
                self.state.fail();
                Some(e.to_string())
            }
        };

        let published = self.store.published().await;
        let manifest_key = ArtifactKey::new(ArtifactKind::Session, 0, MANIFEST_ARTIFACT);
        if let Err(e) = put_json(self.store.inner(), &self.id, &manifest_key, &published).await {
            warn!("Could not persist session manifest: {}", e);
        }

        let final_state = self.state.current();
        let status = SessionResult::compute_status(final_state, &self.stages);
        let result = SessionResult {
            session: self.id.clone(),
            status,
            final_state,
            transitions: self.state.transitions().to_vec(),
            stages: self.stages,
            warnings: self.warnings,
            plan_revision: self.plan.as_ref().map(|p| p.revision),
            slide_count: self.plan.as_ref().map_or(0, |p| p.slides.len()),
            compile: self.compile,
            verification: self.report,
            revision_turns: self.revision_turns,
            artifacts: self.store.session_location(&self.id),
            published,
            error,
            duration_ms: self.started.elapsed().as_millis() as u64,
        };

        let key = ArtifactKey::new(ArtifactKind::Session, 0, RESULT_ARTIFACT);
        if let Err(e) = put_json(self.store.inner(), &result.session, &key, &result).await {
            warn!("Could not persist session result: {}", e);
        }
        info!(
            "Session {} finished: {} ({} warning(s), {}ms)",
            result.session,
            result.status,
            result.warnings.len(),
            result.duration_ms
        );
        result
    }
}
