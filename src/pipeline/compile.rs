//! Compiler driver: run LaTeX, classify failures, fix up, retry.
//!
//! ```text
//! attempt 1 ── ok ──► done
//!    │ fail
//!    ├─ missing resource → re-render with the resource omitted
//!    ├─ syntax / unknown → re-render in safe mode, then LLM patch
//!    └─ timeout          → retry unchanged (twice on identical source = fatal)
//!    ▼
//! attempt 2 … attempt N ── exhausted ──► last failure + warning
//! ```
//!
//! `max_attempts` counts every compiler invocation, including the first.
//! Every attempt's source and log land in the `document` namespace under the
//! plan revision being compiled, so a failed run can be inspected afterwards.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::agents::retry::invoke;
use crate::agents::{RetryPolicy, TexFixAgent};
use crate::config::PipelineConfig;
use crate::error::{AgentRole, Paper2BeamerError, StageWarning, StorageError};
use crate::model::{
    CompileResult, CompileStatus, DocumentSource, FailureCategory, PresentationPlan, RenderOptions,
    SessionId, SourceOrigin,
};
use crate::progress::ProgressCallback;
use crate::store::{digest_hex, put_json, ArtifactKey, ArtifactKind, ArtifactStore};

use super::latex;

/// File name of the main source inside the compile work dir.
pub const MAIN_TEX: &str = "main.tex";
/// Artifact name of the compiled deck.
pub const PDF_ARTIFACT: &str = "slides.pdf";
/// Artifact name of the per-attempt audit trail.
pub const ATTEMPTS_ARTIFACT: &str = "attempts.json";

/// Lines of log kept inline on a [`CompileResult`].
const LOG_EXCERPT_LINES: usize = 40;

/// Raw outcome of one compiler run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerOutput {
    pub success: bool,
    /// Path of the produced PDF inside the work dir.
    pub pdf: Option<PathBuf>,
    pub log: String,
    pub timed_out: bool,
}

/// External LaTeX toolchain.
#[async_trait]
pub trait TexCompiler: Send + Sync {
    /// Compile `tex` inside `workdir`. Never errors: failures are reported
    /// through [`CompilerOutput`].
    async fn compile(&self, tex: &str, workdir: &Path) -> CompilerOutput;
}

/// Passes on success; page refs and the title page need two.
const LATEX_PASSES: u8 = 2;

/// Runs `pdflatex`/`xelatex` as a subprocess.
#[derive(Debug, Clone)]
pub struct LatexCompiler {
    program: String,
    timeout: Duration,
}

impl LatexCompiler {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.compiler(), Duration::from_secs(config.compile_timeout_secs))
    }

    async fn run_pass(&self, workdir: &Path) -> CompilerOutput {
        let mut cmd = Command::new(&self.program);
        cmd.args(["-interaction=nonstopmode", "-halt-on-error", "-file-line-error", MAIN_TEX])
            .current_dir(workdir)
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Err(_) => {
                return CompilerOutput {
                    success: false,
                    pdf: None,
                    log: format!("{} timed out after {}s", self.program, self.timeout.as_secs()),
                    timed_out: true,
                }
            }
            Ok(Err(e)) => {
                return CompilerOutput {
                    success: false,
                    pdf: None,
                    log: format!("failed to start '{}': {e}", self.program),
                    timed_out: false,
                }
            }
            Ok(Ok(output)) => output,
        };

        let log = match tokio::fs::read_to_string(workdir.join("main.log")).await {
            Ok(log) => log,
            Err(_) => format!(
                "{}\n{}",
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            ),
        };
        let pdf = workdir.join("main.pdf");
        let success = output.status.success() && pdf.exists();
        CompilerOutput {
            success,
            pdf: success.then_some(pdf),
            log,
            timed_out: false,
        }
    }
}

#[async_trait]
impl TexCompiler for LatexCompiler {
    async fn compile(&self, tex: &str, workdir: &Path) -> CompilerOutput {
        if let Err(e) = tokio::fs::write(workdir.join(MAIN_TEX), tex).await {
            return CompilerOutput {
                success: false,
                pdf: None,
                log: format!("cannot write {MAIN_TEX}: {e}"),
                timed_out: false,
            };
        }
        let mut out = self.run_pass(workdir).await;
        for pass in 1..LATEX_PASSES {
            if !out.success {
                break;
            }
            debug!("{}: pass {}", self.program, pass + 1);
            out = self.run_pass(workdir).await;
        }
        out
    }
}

// ── Log classification ──────────────────────────────────────────────────

static RE_FILE_NOT_FOUND: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"File `([^']+)' not found").unwrap());

static RE_ERROR_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^(?:!|\S+:\d+: )").unwrap());

/// Map a compiler log to a failure category.
pub fn classify_log(log: &str, timed_out: bool) -> FailureCategory {
    if timed_out {
        return FailureCategory::Timeout;
    }
    let names: BTreeSet<String> = RE_FILE_NOT_FOUND
        .captures_iter(log)
        .map(|c| c[1].to_string())
        .collect();
    if !names.is_empty() {
        return FailureCategory::MissingResource {
            names: names.into_iter().collect(),
        };
    }
    if RE_ERROR_LINE.is_match(log) {
        return FailureCategory::SyntaxError;
    }
    FailureCategory::Unknown
}

/// The error lines of a log plus a little trailing context.
pub fn log_excerpt(log: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = log.lines().collect();
    let first_error = lines
        .iter()
        .position(|l| l.starts_with('!') || RE_ERROR_LINE.is_match(l));
    let start = match first_error {
        Some(i) => i,
        None => lines.len().saturating_sub(max_lines),
    };
    lines[start..]
        .iter()
        .take(max_lines)
        .copied()
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Compile loop ────────────────────────────────────────────────────────

/// One attempt in the persisted audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub result: CompileResult,
    pub origin: SourceOrigin,
    pub options: RenderOptions,
    pub source_digest: String,
}

/// Final state of the compile loop.
#[derive(Debug, Clone)]
pub struct CompileOutcome {
    pub result: CompileResult,
    pub attempts: Vec<AttemptRecord>,
    /// Source of the last attempt.
    pub document: DocumentSource,
    pub warnings: Vec<StageWarning>,
}

/// Collaborators and bounds for one compile loop.
pub struct CompileLoop<'a> {
    pub compiler: &'a dyn TexCompiler,
    pub tex_fix: Option<&'a dyn TexFixAgent>,
    pub store: &'a dyn ArtifactStore,
    /// Session whose artifacts receive sources, logs and the PDF.
    pub session: &'a SessionId,
    /// Session holding the figure rasters (differs for revision runs).
    pub asset_session: &'a SessionId,
    pub policy: RetryPolicy,
    pub max_attempts: u32,
    pub density_threshold: usize,
    pub progress: Option<&'a ProgressCallback>,
}

impl CompileLoop<'_> {
    /// Compile `initial` (rendered from `plan`) with bounded fix-up retries.
    ///
    /// Exhaustion is not an error: the last failing [`CompileResult`] comes
    /// back with a [`StageWarning::CompileExhausted`]. Only a repeated timeout
    /// on identical source, storage failures and template errors on re-render
    /// are returned as `Err`.
    pub async fn run(
        &self,
        plan: &PresentationPlan,
        initial: DocumentSource,
    ) -> Result<CompileOutcome, Paper2BeamerError> {
        let revision = plan.revision;
        let workdir = TempDir::new().map_err(StorageError::from)?;
        self.materialise_assets(plan, &initial.options, workdir.path()).await?;

        let max = self.max_attempts.max(1);
        let mut doc = initial;
        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut warnings = Vec::new();
        let mut previous_timeout: Option<String> = None;

        for attempt in 1..=max {
            if let Some(cb) = self.progress {
                cb.on_compile_attempt(attempt, max);
            }
            let digest = digest_hex(doc.content.as_bytes());
            self.put(revision, &doc.artifact_name(attempt), doc.content.as_bytes())
                .await?;

            let out = self.compiler.compile(&doc.content, workdir.path()).await;
            self.put(revision, &format!("attempt-{attempt}.log"), out.log.as_bytes())
                .await?;

            if out.success {
                let artifact = match &out.pdf {
                    Some(pdf) => self.publish_pdf(revision, pdf).await?,
                    None => None,
                };
                info!("Plan r{} compiled on attempt {}/{}", revision, attempt, max);
                let result = CompileResult {
                    status: CompileStatus::Success,
                    plan_revision: revision,
                    attempt,
                    artifact,
                    log: String::new(),
                    category: None,
                };
                attempts.push(record(&result, &doc, digest));
                self.persist_attempts(revision, &attempts).await?;
                return Ok(CompileOutcome {
                    result,
                    attempts,
                    document: doc,
                    warnings,
                });
            }

            let category = classify_log(&out.log, out.timed_out);
            warn!(
                "Plan r{}: compile attempt {}/{} failed ({:?})",
                revision, attempt, max, category
            );
            let result = CompileResult {
                status: CompileStatus::Failure,
                plan_revision: revision,
                attempt,
                artifact: None,
                log: log_excerpt(&out.log, LOG_EXCERPT_LINES),
                category: Some(category.clone()),
            };
            attempts.push(record(&result, &doc, digest.clone()));

            if category == FailureCategory::Timeout {
                if previous_timeout.as_deref() == Some(digest.as_str()) {
                    self.persist_attempts(revision, &attempts).await?;
                    return Err(Paper2BeamerError::CompileTimeoutFatal { revision });
                }
                previous_timeout = Some(digest);
            } else {
                previous_timeout = None;
            }

            if attempt == max {
                break;
            }
            doc = self
                .fix_up(plan, doc, &category, &result.log, attempt, &mut warnings)
                .await?;
        }

        self.persist_attempts(revision, &attempts).await?;
        let last = attempts
            .last()
            .map(|a| a.result.clone())
            .ok_or_else(|| Paper2BeamerError::Internal("compile loop made no attempt".into()))?;
        warnings.push(StageWarning::CompileExhausted {
            attempts: attempts.len() as u32,
            category: last.category.clone().unwrap_or(FailureCategory::Unknown),
        });
        Ok(CompileOutcome {
            result: last,
            attempts,
            document: doc,
            warnings,
        })
    }

    /// Produce the source for the next attempt.
    async fn fix_up(
        &self,
        plan: &PresentationPlan,
        doc: DocumentSource,
        category: &FailureCategory,
        log_excerpt: &str,
        attempt: u32,
        warnings: &mut Vec<StageWarning>,
    ) -> Result<DocumentSource, Paper2BeamerError> {
        match category {
            FailureCategory::Timeout => Ok(doc),
            FailureCategory::MissingResource { names } => {
                let assets = latex::required_assets(plan, &doc.options);
                let missing: BTreeSet<String> = assets
                    .into_iter()
                    .filter(|a| names.iter().any(|n| resource_matches(a, n)))
                    .collect();
                if missing.is_empty() {
                    // A package or style file; nothing in the plan to omit.
                    return self.syntax_fix(plan, doc, log_excerpt, attempt, warnings).await;
                }
                debug!("Omitting {} missing resource(s)", missing.len());
                let mut options = doc.options.clone();
                options.omitted_resources.extend(missing);
                Ok(latex::render(plan, &doc.theme, doc.language, &options, self.density_threshold)?)
            }
            FailureCategory::SyntaxError | FailureCategory::Unknown => {
                self.syntax_fix(plan, doc, log_excerpt, attempt, warnings).await
            }
        }
    }

    async fn syntax_fix(
        &self,
        plan: &PresentationPlan,
        doc: DocumentSource,
        log_excerpt: &str,
        attempt: u32,
        warnings: &mut Vec<StageWarning>,
    ) -> Result<DocumentSource, Paper2BeamerError> {
        if !doc.options.safe_mode {
            debug!("Re-rendering plan r{} in safe mode", plan.revision);
            let options = RenderOptions {
                safe_mode: true,
                ..doc.options.clone()
            };
            return Ok(latex::render(plan, &doc.theme, doc.language, &options, self.density_threshold)?);
        }
        let Some(agent) = self.tex_fix else {
            return Ok(doc);
        };
        let source = doc.content.as_str();
        let patched = invoke(&self.policy, AgentRole::TexFix, move || async move {
            agent.fix(source, log_excerpt).await
        })
        .await;
        match patched {
            Ok(content) => Ok(DocumentSource {
                origin: SourceOrigin::Patched { attempt: attempt + 1 },
                content,
                ..doc
            }),
            Err(e) => {
                warn!("LaTeX patch failed: {}", e);
                warnings.push(StageWarning::AgentDegraded {
                    stage: "compile".into(),
                    detail: e.to_string(),
                });
                Ok(doc)
            }
        }
    }

    async fn put(&self, revision: u32, name: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let key = ArtifactKey::new(ArtifactKind::Document, revision, name);
        self.store.put(self.session, &key, bytes).await?;
        Ok(())
    }

    async fn publish_pdf(&self, revision: u32, pdf: &Path) -> Result<Option<PathBuf>, StorageError> {
        let bytes = tokio::fs::read(pdf).await?;
        let key = ArtifactKey::new(ArtifactKind::Document, revision, PDF_ARTIFACT);
        let r = self.store.put(self.session, &key, &bytes).await?;
        Ok(r.location)
    }

    async fn persist_attempts(&self, revision: u32, attempts: &[AttemptRecord]) -> Result<(), StorageError> {
        let key = ArtifactKey::new(ArtifactKind::Document, revision, ATTEMPTS_ARTIFACT);
        put_json(self.store, self.session, &key, attempts).await?;
        Ok(())
    }

    /// Copy figure rasters from the store next to `main.tex`.
    async fn materialise_assets(
        &self,
        plan: &PresentationPlan,
        options: &RenderOptions,
        workdir: &Path,
    ) -> Result<(), StorageError> {
        for asset in latex::required_assets(plan, options) {
            if asset.contains("..") || Path::new(&asset).is_absolute() {
                warn!("Refusing asset path '{}'", asset);
                continue;
            }
            let key = ArtifactKey::new(ArtifactKind::Raw, 0, asset.as_str());
            match self.store.get(self.asset_session, &key).await {
                Ok(bytes) => {
                    let dest = workdir.join(&asset);
                    if let Some(parent) = dest.parent() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                    tokio::fs::write(dest, bytes).await?;
                }
                Err(StorageError::NotFound { .. }) => {
                    debug!("Asset '{}' not in store; the compiler will report it", asset);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

fn record(result: &CompileResult, doc: &DocumentSource, source_digest: String) -> AttemptRecord {
    AttemptRecord {
        result: result.clone(),
        origin: doc.origin,
        options: doc.options.clone(),
        source_digest,
    }
}

/// LaTeX reports missing graphics with or without their extension.
fn resource_matches(asset: &str, reported: &str) -> bool {
    let reported = reported.trim();
    asset == reported
        || Path::new(asset).with_extension("") == Path::new(reported)
        || asset.ends_with(reported)
}
