//! End-to-end tests for edgequake-paper2beamer.
//!
//! These use real PDF files in `./test_cases/`, make live LLM API calls and,
//! unless compilation is skipped, need `pdflatex` on `PATH`. They are gated
//! behind the `E2E_ENABLED` environment variable so they do not run in CI
//! unless explicitly requested.
//!
//! Run with:
//!   E2E_ENABLED=1 cargo test --test e2e -- --nocapture
//!
//! To restrict to a specific test:
//!   E2E_ENABLED=1 cargo test --test e2e test_inspect -- --nocapture

use edgequake_paper2beamer::{
    inspect, revise, run, ExitStatus, ExtractionMode, PipelineConfig, PipelineState, RevisionSource,
    SpeechOptions, Stage, StageOutcome,
};
use std::path::PathBuf;

// ── Test helpers ─────────────────────────────────────────────────────────────

fn test_cases_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test_cases")
}

fn output_dir() -> PathBuf {
    let d = test_cases_dir().join("output");
    std::fs::create_dir_all(&d).ok();
    d
}

/// Skip this test if E2E_ENABLED is not set *or* no PDF file at `path`.
macro_rules! e2e_skip_unless_ready {
    ($path:expr) => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP: set E2E_ENABLED=1 to run e2e tests");
            return;
        }
        let p: PathBuf = $path;
        if !p.exists() {
            println!("SKIP: test file not found: {}", p.display());
            return;
        }
        p
    }};
}

fn tex_is_beamer(tex: &str, context: &str) {
    assert!(
        tex.starts_with("\\documentclass") && tex.contains("{beamer}"),
        "[{context}] Not a Beamer document"
    );
    assert!(tex.trim_end().ends_with("\\end{document}"), "[{context}] Truncated source");
    let frames = tex.matches("\\begin{frame}").count();
    assert!(frames >= 3, "[{context}] Only {frames} frames");
    println!("[{context}] ✓  {} bytes, {frames} frames", tex.len());
}

// ── Inspect (no LLM) ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_inspect_arxiv_paper() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("attention_is_all_you_need.pdf"));

    let info = inspect(path.to_str().unwrap(), 30, None)
        .await
        .expect("inspect() should succeed");

    assert_eq!(info.page_count, 15, "Attention paper should have 15 pages");
    assert!(!info.pdf_version.is_empty());
    println!("Metadata: {:?}", info);
}

#[tokio::test]
async fn test_inspect_nonexistent() {
    if std::env::var("E2E_ENABLED").is_err() {
        println!("SKIP");
        return;
    }
    let result = inspect("/definitely/not/a/real/file.pdf", 30, None).await;
    assert!(result.is_err(), "inspect() should fail for a missing file");
}

// ── Full runs (need an LLM API key) ──────────────────────────────────────────

/// Text layer + planner only; no TeX needed.
#[tokio::test]
async fn test_text_layer_run_without_compiler() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("attention_is_all_you_need.pdf"));

    let config = PipelineConfig::builder()
        .output_dir(output_dir())
        .extraction_mode(ExtractionMode::TextLayer)
        .skip_compilation(true)
        .semantic_check(false)
        .build()
        .expect("valid config");

    let result = run(path.to_str().unwrap(), &config)
        .await
        .expect("session should start");

    assert_ne!(result.status, ExitStatus::Failed, "error: {:?}", result.error);
    assert_eq!(result.final_state, PipelineState::Finalized);
    assert!(result.slide_count >= 5, "only {} slides", result.slide_count);
    assert_eq!(
        result.stage(Stage::Compile).map(|r| r.outcome),
        Some(StageOutcome::Skipped)
    );

    let dir = result.artifacts.clone().expect("on-disk store");
    let rev = result.plan_revision.unwrap();
    let tex = std::fs::read_to_string(dir.join("document").join(format!("r{rev}")).join("slides.tex"))
        .expect("slides.tex should exist");
    tex_is_beamer(&tex, "text-layer");
}

/// Vision extraction, compile loop, verification and a speaker script.
#[tokio::test]
async fn test_full_run_with_speech() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("attention_is_all_you_need.pdf"));

    let config = PipelineConfig::builder()
        .output_dir(output_dir())
        .speech(SpeechOptions {
            duration_minutes: 10,
            ..SpeechOptions::default()
        })
        .build()
        .expect("valid config");

    let result = run(path.to_str().unwrap(), &config)
        .await
        .expect("session should start");

    println!("{}", serde_json::to_string_pretty(&result).unwrap());
    assert_ne!(result.status, ExitStatus::Failed, "error: {:?}", result.error);
    if result.compile.as_ref().is_some_and(|c| c.succeeded()) {
        let pdf = result.pdf().expect("compiled PDF path");
        assert!(pdf.exists(), "PDF missing at {}", pdf.display());
    }
    assert_eq!(
        result.stage(Stage::Speech).map(|r| r.outcome),
        Some(StageOutcome::Succeeded)
    );
}

/// A second session applying feedback to the first.
#[tokio::test]
async fn test_batch_revision() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("attention_is_all_you_need.pdf"));

    let config = PipelineConfig::builder()
        .output_dir(output_dir())
        .extraction_mode(ExtractionMode::TextLayer)
        .skip_compilation(true)
        .build()
        .expect("valid config");

    let first = run(path.to_str().unwrap(), &config)
        .await
        .expect("session should start");
    assert_ne!(first.status, ExitStatus::Failed, "error: {:?}", first.error);

    let second = revise(
        RevisionSource::Session(first.session.clone()),
        "Merge the background slides into one and add a closing Q&A slide",
        &config,
    )
    .await
    .expect("revision should start");

    assert_ne!(second.status, ExitStatus::Failed, "error: {:?}", second.error);
    assert_eq!(second.revision_turns, 1);
    assert_ne!(second.session, first.session);
}
