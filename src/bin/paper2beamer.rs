//! CLI binary for edgequake-paper2beamer.
//!
//! Maps flags onto `PipelineConfig`, drives one session and exits with the
//! session's status code (0 success, 2 partial success, 1 failure).

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};
use edgequake_paper2beamer::{
    inspect, revise, run, ExitStatus, ExtractionMode, FeedbackSource, Language, PipelineConfig,
    PipelineConfigBuilder, PipelineProgressCallback, ProgressCallback, RevisionSource, SessionId,
    SessionResult, SpeechOptions, SpeechStyle, Stage, StageOutcome, StageWarning, TurnSummary,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── Stage spinner ────────────────────────────────────────────────────────────

/// One spinner line for the running stage, with a log line per finished
/// stage and warning printed above it.
struct CliProgressCallback {
    bar: ProgressBar,
    pages: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            pages: AtomicUsize::new(0),
        })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_stage_start(&self, stage: Stage) {
        self.bar.set_prefix(stage.to_string());
        self.bar.set_message(match stage {
            Stage::Extraction => "reading the paper…",
            Stage::Planning => "drafting the slide plan…",
            Stage::Document => "rendering LaTeX…",
            Stage::Compile => "compiling…",
            Stage::Verification => "checking coverage…",
            Stage::Repair => "repairing the plan…",
            Stage::Revision => "applying feedback…",
            Stage::Speech => "writing the speaker script…",
        });
    }

    fn on_stage_complete(&self, stage: Stage, detail: &str) {
        self.bar
            .println(format!("  {} {:<13} {}", green("✓"), stage.to_string(), dim(detail)));
    }

    fn on_compile_attempt(&self, attempt: u32, max_attempts: u32) {
        self.bar
            .set_message(format!("attempt {attempt}/{max_attempts}"));
    }

    fn on_page_transcribed(&self, _page_num: usize, total_pages: usize) {
        let done = self.pages.fetch_add(1, Ordering::SeqCst) + 1;
        self.bar.set_message(format!("page {done}/{total_pages}"));
    }

    fn on_warning(&self, warning: &StageWarning) {
        let msg = warning.to_string();
        let msg = if msg.chars().count() > 100 {
            format!("{}\u{2026}", msg.chars().take(99).collect::<String>())
        } else {
            msg
        };
        self.bar.println(format!("  {} {}", yellow("⚠"), msg));
    }

    fn on_revision_turn(&self, turn: u32, plan_revision: u32) {
        self.bar.set_prefix("revision");
        self.bar
            .set_message(format!("turn {turn}, plan r{plan_revision}"));
    }
}

// ── Interactive feedback from the terminal ───────────────────────────────────

/// Reads one line of feedback per turn from stdin.
struct StdinFeedback {
    bar: Option<ProgressBar>,
}

#[async_trait]
impl FeedbackSource for StdinFeedback {
    async fn next_feedback(&self, turn: &TurnSummary) -> Option<String> {
        let prompt = format!(
            "\n{} plan r{}, {} slides, {}{}\n{}\n{} ",
            bold(&format!("Revision turn {}", turn.turn)),
            turn.plan_revision,
            turn.slides,
            if turn.compiled {
                green("compiled")
            } else {
                red("not compiled")
            },
            match turn.blocking_issues {
                0 => String::new(),
                n => format!(", {}", yellow(&format!("{n} blocking issue(s)"))),
            },
            turn.artifact
                .as_ref()
                .map(|p| dim(&format!("  {}", p.display())))
                .unwrap_or_default(),
            dim("Feedback (empty line or 'exit' to finish) >"),
        );
        let bar = self.bar.clone();
        tokio::task::spawn_blocking(move || {
            let read = || {
                eprint!("{prompt}");
                io::stderr().flush().ok();
                let mut line = String::new();
                match io::stdin().lock().read_line(&mut line) {
                    Ok(0) | Err(_) => None,
                    Ok(_) => Some(line.trim().to_string()),
                }
            };
            match bar {
                Some(bar) => bar.suspend(read),
                None => read(),
            }
        })
        .await
        .ok()
        .flatten()
    }
}

// ── CLI definition ───────────────────────────────────────────────────────────

const AFTER_HELP: &str = r#"EXAMPLES:
  # Build a deck (English, default theme)
  paper2beamer run paper.pdf

  # Chinese slides with the Madrid theme and a 20-minute script
  paper2beamer run --language zh --theme Madrid --speech 20 paper.pdf

  # Read the text layer only (no vision model for extraction)
  paper2beamer run --text-layer paper.pdf

  # Iterate on the deck from the terminal
  paper2beamer run --interactive paper.pdf

  # Revise a previous session
  paper2beamer revise --session 20260101-120000-1a2b3c4d \
      --feedback "Merge the two related-work slides"

  # Revise from loose files
  paper2beamer revise --plan output/<session>/plan/r2/plan.json \
      --previous-tex output/<session>/document/r2/slides.tex --feedback "..."

  # PDF metadata only (no API key needed)
  paper2beamer inspect paper.pdf

EXIT CODES:
  0  success
  2  partial success (compile, verification, revision or speech degraded)
  1  failure (extraction or planning failed)

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to an existing libpdfium
"#;

/// Turn research papers into Beamer slide decks using LLM agents.
#[derive(Parser, Debug)]
#[command(
    name = "paper2beamer",
    version,
    about = "Turn research papers (PDF) into Beamer slide decks using LLM agents",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Print the session result as JSON on stdout.
    #[arg(long, global = true, env = "PAPER2BEAMER_JSON")]
    json: bool,

    /// Disable the progress spinner.
    #[arg(long, global = true, env = "PAPER2BEAMER_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PAPER2BEAMER_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PAPER2BEAMER_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build a deck from a PDF file or URL.
    Run(RunArgs),
    /// Apply feedback to a previous plan in a new session.
    Revise(ReviseArgs),
    /// Print PDF metadata and exit.
    Inspect {
        /// Local PDF file path or HTTP/HTTPS URL.
        input: String,

        /// PDF user password for encrypted documents.
        #[arg(long, env = "PAPER2BEAMER_PASSWORD")]
        password: Option<String>,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Ask for feedback after the deck is built, one turn at a time.
    #[arg(short, long, env = "PAPER2BEAMER_INTERACTIVE")]
    interactive: bool,

    /// Upper bound on interactive turns.
    #[arg(long, env = "PAPER2BEAMER_MAX_TURNS", default_value_t = 5)]
    max_turns: u32,

    /// Read the embedded text layer instead of transcribing page images.
    #[arg(long, env = "PAPER2BEAMER_TEXT_LAYER")]
    text_layer: bool,

    /// Rendering DPI for page images (72–400).
    #[arg(long, env = "PAPER2BEAMER_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Concurrent page transcriptions.
    #[arg(short, long, env = "PAPER2BEAMER_CONCURRENCY", default_value_t = 8)]
    concurrency: usize,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PAPER2BEAMER_PASSWORD")]
    password: Option<String>,

    /// Target slide count (advisory).
    #[arg(long, env = "PAPER2BEAMER_MAX_SLIDES")]
    max_slides: Option<usize>,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args, Debug)]
#[command(group(
    clap::ArgGroup::new("source").required(true).args(["session", "plan"])
))]
struct ReviseArgs {
    /// Session id in the output directory to revise.
    #[arg(long)]
    session: Option<String>,

    /// Plan JSON to revise (instead of --session).
    #[arg(long)]
    plan: Option<PathBuf>,

    /// LaTeX source of the plan being revised.
    #[arg(long, requires = "plan")]
    previous_tex: Option<PathBuf>,

    /// Content bundle JSON; looked up next to the plan when omitted.
    #[arg(long, requires = "plan")]
    bundle: Option<PathBuf>,

    /// Free-text feedback to apply.
    #[arg(short, long)]
    feedback: String,

    #[command(flatten)]
    common: CommonArgs,
}

/// Flags shared by `run` and `revise`.
#[derive(Args, Debug)]
struct CommonArgs {
    /// Directory holding session artifacts.
    #[arg(short, long, env = "PAPER2BEAMER_OUTPUT_DIR", default_value = "output")]
    output_dir: PathBuf,

    /// Slide language: en or zh.
    #[arg(short, long, env = "PAPER2BEAMER_LANGUAGE", default_value = "en")]
    language: Language,

    /// Beamer theme.
    #[arg(long, env = "PAPER2BEAMER_THEME", default_value = "Madrid")]
    theme: String,

    /// LLM model ID (e.g. gpt-4.1-mini, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Total compiler invocations per plan revision.
    #[arg(long, env = "PAPER2BEAMER_MAX_COMPILE_ATTEMPTS", default_value_t = 5)]
    max_compile_attempts: u32,

    /// Repair iterations before giving up on blocking issues.
    #[arg(long, env = "PAPER2BEAMER_MAX_REPAIR_ATTEMPTS", default_value_t = 2)]
    max_repair_attempts: u32,

    /// Emit LaTeX only; do not run the compiler.
    #[arg(long, env = "PAPER2BEAMER_SKIP_COMPILE")]
    skip_compile: bool,

    /// Skip coverage and reference verification.
    #[arg(long, env = "PAPER2BEAMER_NO_VERIFY")]
    no_verify: bool,

    /// Verify, but never repair.
    #[arg(long, env = "PAPER2BEAMER_NO_REPAIR")]
    no_repair: bool,

    /// Skip the verifier agent's advisory semantic review.
    #[arg(long, env = "PAPER2BEAMER_NO_SEMANTIC_CHECK")]
    no_semantic_check: bool,

    /// Write a speaker script for a talk of this many minutes.
    #[arg(long, env = "PAPER2BEAMER_SPEECH", value_name = "MINUTES")]
    speech: Option<u32>,

    /// Script style: academic_conference, classroom, industry_presentation, public_talk.
    #[arg(long, env = "PAPER2BEAMER_SPEECH_STYLE", default_value = "academic_conference")]
    speech_style: SpeechStyle,

    /// Per-call LLM timeout in seconds.
    #[arg(long, env = "PAPER2BEAMER_AGENT_TIMEOUT", default_value_t = 180)]
    agent_timeout: u64,

    /// Compiler timeout in seconds.
    #[arg(long, env = "PAPER2BEAMER_COMPILE_TIMEOUT", default_value_t = 120)]
    compile_timeout: u64,
}

impl CommonArgs {
    fn builder(&self, progress: Option<ProgressCallback>) -> PipelineConfigBuilder {
        let mut builder = PipelineConfig::builder()
            .output_dir(&self.output_dir)
            .language(self.language)
            .theme(&self.theme)
            .max_compile_attempts(self.max_compile_attempts)
            .max_repair_attempts(self.max_repair_attempts)
            .skip_compilation(self.skip_compile)
            .enable_verification(!self.no_verify)
            .enable_repair(!self.no_repair)
            .semantic_check(!self.no_semantic_check)
            .agent_timeout_secs(self.agent_timeout)
            .compile_timeout_secs(self.compile_timeout);
        if let Some(model) = &self.model {
            builder = builder.model(model);
        }
        if let Some(provider) = &self.provider {
            builder = builder.provider_name(provider);
        }
        if let Some(minutes) = self.speech {
            builder = builder.speech(SpeechOptions {
                duration_minutes: minutes,
                style: self.speech_style,
            });
        }
        if let Some(cb) = progress {
            builder = builder.progress_callback(cb);
        }
        builder
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Library INFO logs are noise while the spinner is up.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    if let Command::Inspect { input, password } = &cli.command {
        return print_inspect(input, password.as_deref(), cli.json).await;
    }

    let spinner = show_progress.then(CliProgressCallback::new);
    let progress = spinner
        .clone()
        .map(|cb| cb as Arc<dyn PipelineProgressCallback>);

    let result = match &cli.command {
        Command::Inspect { .. } => unreachable!("handled above"),
        Command::Run(args) => {
            let mut builder = args
                .common
                .builder(progress)
                .dpi(args.dpi)
                .concurrency(args.concurrency)
                .extraction_mode(if args.text_layer {
                    ExtractionMode::TextLayer
                } else {
                    ExtractionMode::Vision
                });
            if let Some(n) = args.max_slides {
                builder = builder.max_slides(n);
            }
            if let Some(pwd) = &args.password {
                builder = builder.password(pwd);
            }
            if args.interactive {
                builder = builder
                    .interactive_revision(true)
                    .max_revision_turns(args.max_turns)
                    .feedback_source(Arc::new(StdinFeedback {
                        bar: spinner.as_ref().map(|s| s.bar.clone()),
                    }));
            }
            let config = builder.build().context("Invalid configuration")?;
            run(&args.input, &config).await.context("Run failed")?
        }
        Command::Revise(args) => {
            let source = match (&args.session, &args.plan) {
                (Some(id), _) => RevisionSource::Session(
                    id.parse::<SessionId>()
                        .map_err(anyhow::Error::msg)
                        .context("Invalid session id")?,
                ),
                (None, Some(plan)) => RevisionSource::Artifacts {
                    plan: plan.clone(),
                    previous_tex: args.previous_tex.clone(),
                    bundle: args.bundle.clone(),
                },
                (None, None) => anyhow::bail!("either --session or --plan is required"),
            };
            let config = args
                .common
                .builder(progress)
                .build()
                .context("Invalid configuration")?;
            revise(source, &args.feedback, &config)
                .await
                .context("Revision failed")?
        }
    };

    if let Some(s) = &spinner {
        s.finish();
    }

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("Failed to serialise result")?
        );
    } else if !cli.quiet {
        print_summary(&result);
    }

    std::process::exit(result.status.code());
}

async fn print_inspect(input: &str, password: Option<&str>, json: bool) -> Result<()> {
    let info = inspect(input, 120, password)
        .await
        .context("Failed to inspect PDF")?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&info).context("Failed to serialise metadata")?
        );
        return Ok(());
    }
    println!("File:         {input}");
    if let Some(t) = &info.title {
        println!("Title:        {t}");
    }
    if let Some(a) = &info.author {
        println!("Author:       {a}");
    }
    if let Some(s) = &info.subject {
        println!("Subject:      {s}");
    }
    println!("Pages:        {}", info.page_count);
    println!("PDF Version:  {}", info.pdf_version);
    if let Some(p) = &info.producer {
        println!("Producer:     {p}");
    }
    if let Some(c) = &info.creator {
        println!("Creator:      {c}");
    }
    Ok(())
}

fn print_summary(result: &SessionResult) {
    let mark = match result.status {
        ExitStatus::Success => green("✔"),
        ExitStatus::PartialSuccess => yellow("⚠"),
        ExitStatus::Failed => red("✘"),
    };
    eprintln!(
        "{mark} {}  session {}  {}",
        bold(&result.status.to_string()),
        result.session,
        dim(&format!("{:.1}s", result.duration_ms as f64 / 1000.0)),
    );
    if let Some(err) = &result.error {
        eprintln!("   {}", red(err));
    }
    for record in &result.stages {
        let tag = match record.outcome {
            StageOutcome::Succeeded => green("ok"),
            StageOutcome::Degraded => yellow("degraded"),
            StageOutcome::Skipped => dim("skipped"),
            StageOutcome::Failed => red("failed"),
        };
        eprintln!("   {:<13} {:<10} {}", record.stage.to_string(), tag, dim(&record.detail));
    }
    if let Some(rev) = result.plan_revision {
        eprintln!(
            "   plan r{rev}, {} slides, {} revision turn(s)",
            result.slide_count, result.revision_turns
        );
    }
    if let Some(pdf) = result.pdf() {
        eprintln!("   {} {}", green("→"), bold(&pdf.display().to_string()));
    }
    if let Some(dir) = &result.artifacts {
        eprintln!("   artifacts: {}", dir.display());
    }
}
