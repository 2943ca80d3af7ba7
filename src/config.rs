//! Configuration types for the paper-to-slides pipeline.
//!
//! Every knob lives in one [`PipelineConfig`], built via
//! [`PipelineConfigBuilder`]. The config is created once per run and handed by
//! reference to every stage, so there is no process-wide state: the model
//! client, the theme registry and the retry policies all travel with it.
//!
//! # Design choice: builder over constructor
//! The pipeline has close to forty knobs. The builder lets callers set only
//! what they care about and rely on documented defaults for the rest, and
//! `build()` is the single place where cross-field constraints are checked.

use crate::error::Paper2BeamerError;
use crate::pipeline::revise::FeedbackSource;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Beamer themes bundled with every TeX Live / MiKTeX install.
pub const DEFAULT_THEMES: &[&str] = &[
    "default",
    "AnnArbor",
    "Antibes",
    "Bergen",
    "Berkeley",
    "Berlin",
    "Boadilla",
    "CambridgeUS",
    "Copenhagen",
    "Darmstadt",
    "Dresden",
    "Frankfurt",
    "Goettingen",
    "Hannover",
    "Ilmenau",
    "JuanLesPins",
    "Luebeck",
    "Madrid",
    "Malmoe",
    "Marburg",
    "Montpellier",
    "PaloAlto",
    "Pittsburgh",
    "Rochester",
    "Singapore",
    "Szeged",
    "Warsaw",
];

/// Configuration for one pipeline run.
///
/// Built via [`PipelineConfig::builder()`] or using
/// [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_paper2beamer::{PipelineConfig, Language};
///
/// let config = PipelineConfig::builder()
///     .language(Language::En)
///     .theme("Berlin")
///     .max_compile_attempts(3)
///     .model("gpt-4.1-mini")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Root directory of the on-disk artifact store. Default: `output`.
    pub output_dir: PathBuf,

    /// Language of the generated slides. Default: English.
    pub language: Language,

    /// Beamer theme. Must be a member of `themes`. Default: `Madrid`.
    pub theme: String,

    /// Theme registry used to validate `theme`.
    ///
    /// Starts as [`DEFAULT_THEMES`]; callers with custom `.sty` themes
    /// installed add them through [`PipelineConfigBuilder::register_theme`].
    pub themes: Vec<String>,

    // ── Model ────────────────────────────────────────────────────────────
    /// LLM model identifier, e.g. "gpt-4.1-mini". If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for agent calls. Default: 0.2.
    ///
    /// Planning benefits from a little variety in phrasing; higher values make
    /// the planner invent content the paper does not contain.
    pub temperature: f32,

    /// Maximum tokens per agent response. Default: 8192.
    ///
    /// A 20-slide plan in JSON runs to roughly 4 000 tokens; speech scripts
    /// for long talks can be larger.
    pub max_tokens: usize,

    /// Re-invocations of an agent after a retryable failure. Default: 3.
    pub agent_max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-agent-call timeout in seconds. Default: 180.
    pub agent_timeout_secs: u64,

    // ── Compilation ──────────────────────────────────────────────────────
    /// Total compiler invocations allowed per document. Range: 1–20. Default: 5.
    pub max_compile_attempts: u32,

    /// Wall-clock limit for one compiler invocation. Default: 120.
    pub compile_timeout_secs: u64,

    /// Override the LaTeX engine binary. Default: derived from `language`
    /// (`pdflatex` for English, `xelatex` for Chinese).
    pub compiler_program: Option<String>,

    /// Generate `.tex` only. Default: false.
    pub skip_compilation: bool,

    // ── Verification & repair ────────────────────────────────────────────
    /// Run the verification engine after compilation. Default: true.
    pub enable_verification: bool,

    /// Ask the verifier agent for an advisory semantic review. Default: true.
    pub semantic_check: bool,

    /// Repair plans with blocking issues. Default: true.
    pub enable_repair: bool,

    /// Repair rounds in the convergence loop. Default: 2.
    pub max_repair_attempts: u32,

    // ── Planning ─────────────────────────────────────────────────────────
    /// Requested upper bound on slide count. Coverage wins when they conflict.
    pub max_slides: Option<usize>,

    /// Whether the planner may reorder sections. Default: source order.
    pub narrative_order: NarrativeOrder,

    /// Layout weight above which a slide is split across frames. Default: 7.
    pub density_threshold: usize,

    // ── Revision ─────────────────────────────────────────────────────────
    /// Enter the interactive revision loop after finalisation. Default: false.
    pub interactive_revision: bool,

    /// Upper bound on interactive turns. Default: 5.
    pub max_revision_turns: u32,

    /// Source of interactive feedback; required when `interactive_revision` is on.
    pub feedback_source: Option<Arc<dyn FeedbackSource>>,

    // ── Speech ───────────────────────────────────────────────────────────
    /// Generate a speaker script for the final plan. Default: None (off).
    pub speech: Option<SpeechOptions>,

    // ── Extraction ───────────────────────────────────────────────────────
    pub extraction: ExtractionOptions,

    /// Optional stage progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            language: Language::En,
            theme: "Madrid".to_string(),
            themes: DEFAULT_THEMES.iter().map(|t| t.to_string()).collect(),
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.2,
            max_tokens: 8192,
            agent_max_retries: 3,
            retry_backoff_ms: 500,
            agent_timeout_secs: 180,
            max_compile_attempts: 5,
            compile_timeout_secs: 120,
            compiler_program: None,
            skip_compilation: false,
            enable_verification: true,
            semantic_check: true,
            enable_repair: true,
            max_repair_attempts: 2,
            max_slides: None,
            narrative_order: NarrativeOrder::default(),
            density_threshold: 7,
            interactive_revision: false,
            max_revision_turns: 5,
            feedback_source: None,
            speech: None,
            extraction: ExtractionOptions::default(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("output_dir", &self.output_dir)
            .field("language", &self.language)
            .field("theme", &self.theme)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("agent_max_retries", &self.agent_max_retries)
            .field("max_compile_attempts", &self.max_compile_attempts)
            .field("skip_compilation", &self.skip_compilation)
            .field("enable_verification", &self.enable_verification)
            .field("enable_repair", &self.enable_repair)
            .field("max_repair_attempts", &self.max_repair_attempts)
            .field("max_slides", &self.max_slides)
            .field("narrative_order", &self.narrative_order)
            .field("interactive_revision", &self.interactive_revision)
            .field("speech", &self.speech)
            .field("extraction", &self.extraction)
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// LaTeX engine to invoke.
    pub fn compiler(&self) -> &str {
        self.compiler_program
            .as_deref()
            .unwrap_or(self.language.latex_engine())
    }

    pub fn is_known_theme(&self, theme: &str) -> bool {
        self.themes.iter().any(|t| t == theme)
    }
}

/// Builder for [`PipelineConfig`].
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl fmt::Debug for PipelineConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl PipelineConfigBuilder {
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn language(mut self, language: Language) -> Self {
        self.config.language = language;
        self
    }

    pub fn theme(mut self, theme: impl Into<String>) -> Self {
        self.config.theme = theme.into();
        self
    }

    /// Add a theme to the registry (e.g. a locally installed custom theme).
    pub fn register_theme(mut self, theme: impl Into<String>) -> Self {
        let theme = theme.into();
        if !self.config.themes.contains(&theme) {
            self.config.themes.push(theme);
        }
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn agent_max_retries(mut self, n: u32) -> Self {
        self.config.agent_max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn agent_timeout_secs(mut self, secs: u64) -> Self {
        self.config.agent_timeout_secs = secs.max(1);
        self
    }

    pub fn max_compile_attempts(mut self, n: u32) -> Self {
        self.config.max_compile_attempts = n;
        self
    }

    pub fn compile_timeout_secs(mut self, secs: u64) -> Self {
        self.config.compile_timeout_secs = secs.max(1);
        self
    }

    pub fn compiler_program(mut self, program: impl Into<String>) -> Self {
        self.config.compiler_program = Some(program.into());
        self
    }

    pub fn skip_compilation(mut self, v: bool) -> Self {
        self.config.skip_compilation = v;
        self
    }

    pub fn enable_verification(mut self, v: bool) -> Self {
        self.config.enable_verification = v;
        self
    }

    pub fn semantic_check(mut self, v: bool) -> Self {
        self.config.semantic_check = v;
        self
    }

    pub fn enable_repair(mut self, v: bool) -> Self {
        self.config.enable_repair = v;
        self
    }

    pub fn max_repair_attempts(mut self, n: u32) -> Self {
        self.config.max_repair_attempts = n;
        self
    }

    pub fn max_slides(mut self, n: usize) -> Self {
        self.config.max_slides = Some(n);
        self
    }

    pub fn narrative_order(mut self, order: NarrativeOrder) -> Self {
        self.config.narrative_order = order;
        self
    }

    pub fn density_threshold(mut self, weight: usize) -> Self {
        self.config.density_threshold = weight.clamp(3, 30);
        self
    }

    pub fn interactive_revision(mut self, v: bool) -> Self {
        self.config.interactive_revision = v;
        self
    }

    pub fn max_revision_turns(mut self, n: u32) -> Self {
        self.config.max_revision_turns = n;
        self
    }

    pub fn feedback_source(mut self, source: Arc<dyn FeedbackSource>) -> Self {
        self.config.feedback_source = Some(source);
        self
    }

    pub fn speech(mut self, options: SpeechOptions) -> Self {
        self.config.speech = Some(options);
        self
    }

    pub fn extraction(mut self, options: ExtractionOptions) -> Self {
        self.config.extraction = options;
        self
    }

    pub fn extraction_mode(mut self, mode: ExtractionMode) -> Self {
        self.config.extraction.mode = mode;
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.extraction.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.extraction.concurrency = n.max(1);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.extraction.password = Some(pwd.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.extraction.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, Paper2BeamerError> {
        let c = &self.config;
        if !c.is_known_theme(&c.theme) {
            return Err(Paper2BeamerError::InvalidConfig(format!(
                "Unknown Beamer theme '{}'. Register custom themes first; known: {}",
                c.theme,
                c.themes.join(", ")
            )));
        }
        if c.max_compile_attempts == 0 || c.max_compile_attempts > 20 {
            return Err(Paper2BeamerError::InvalidConfig(format!(
                "max_compile_attempts must be 1–20, got {}",
                c.max_compile_attempts
            )));
        }
        if c.extraction.dpi < 72 || c.extraction.dpi > 400 {
            return Err(Paper2BeamerError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.extraction.dpi
            )));
        }
        if c.extraction.concurrency == 0 {
            return Err(Paper2BeamerError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if let Some(0) = c.max_slides {
            return Err(Paper2BeamerError::InvalidConfig(
                "max_slides must be ≥ 1".into(),
            ));
        }
        if let Some(speech) = &c.speech {
            if speech.duration_minutes == 0 || speech.duration_minutes > 180 {
                return Err(Paper2BeamerError::InvalidConfig(format!(
                    "Speech duration must be 1–180 minutes, got {}",
                    speech.duration_minutes
                )));
            }
        }
        if c.interactive_revision && c.feedback_source.is_none() {
            return Err(Paper2BeamerError::InvalidConfig(
                "interactive_revision requires a feedback_source".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Output language of the slides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Zh,
}

impl Language {
    /// Engine able to typeset this language out of the box.
    pub fn latex_engine(&self) -> &'static str {
        match self {
            Language::En => "pdflatex",
            Language::Zh => "xelatex",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Language::En => "English",
            Language::Zh => "Chinese",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Language::En => "en",
            Language::Zh => "zh",
        })
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "en" | "english" => Ok(Language::En),
            "zh" | "cn" | "chinese" => Ok(Language::Zh),
            other => Err(format!("unsupported language '{other}' (expected en or zh)")),
        }
    }
}

/// Whether planned slides must follow the paper's section order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NarrativeOrder {
    /// Slides are sorted back into source order after planning. (default)
    #[default]
    SourceOrder,
    /// Keep whatever order the planner agent chose.
    AgentOrder,
}

/// Delivery style of the speaker script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeechStyle {
    #[default]
    AcademicConference,
    Classroom,
    IndustryPresentation,
    PublicTalk,
}

impl SpeechStyle {
    /// One-line delivery guidance handed to the speech agent.
    pub fn guidance(&self) -> &'static str {
        match self {
            SpeechStyle::AcademicConference => {
                "Professional and research-focused, with precise technical explanations"
            }
            SpeechStyle::Classroom => {
                "Educational, building concepts step by step and inviting questions"
            }
            SpeechStyle::IndustryPresentation => {
                "Practical, emphasising applications, cost and implementation impact"
            }
            SpeechStyle::PublicTalk => {
                "Accessible to non-experts, using analogies and avoiding jargon"
            }
        }
    }
}

impl fmt::Display for SpeechStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SpeechStyle::AcademicConference => "academic_conference",
            SpeechStyle::Classroom => "classroom",
            SpeechStyle::IndustryPresentation => "industry_presentation",
            SpeechStyle::PublicTalk => "public_talk",
        })
    }
}

impl FromStr for SpeechStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "academic_conference" | "academic" | "conference" => Ok(SpeechStyle::AcademicConference),
            "classroom" | "lecture" => Ok(SpeechStyle::Classroom),
            "industry_presentation" | "industry" => Ok(SpeechStyle::IndustryPresentation),
            "public_talk" | "public" => Ok(SpeechStyle::PublicTalk),
            other => Err(format!("unknown speech style '{other}'")),
        }
    }
}

/// Speaker script options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeechOptions {
    /// Target talk length. Default: 15.
    pub duration_minutes: u32,
    pub style: SpeechStyle,
}

impl Default for SpeechOptions {
    fn default() -> Self {
        Self {
            duration_minutes: 15,
            style: SpeechStyle::default(),
        }
    }
}

/// How content is pulled out of the PDF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMode {
    /// Rasterise pages and transcribe them with a vision model. (default)
    #[default]
    Vision,
    /// Read the embedded text layer only; no LLM involved.
    TextLayer,
}

/// Options for the content extraction adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionOptions {
    pub mode: ExtractionMode,

    /// Rendering DPI used when rasterising pages. Range: 72–400. Default: 150.
    ///
    /// 150 DPI keeps text sharp enough for a VLM while page images stay small
    /// enough to embed in the deck as figure placeholders.
    pub dpi: u32,

    /// Cap on either rendered dimension in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// Concurrent page transcriptions. Default: 8.
    pub concurrency: usize,

    /// Pages after which extraction stops. Default: None (all pages).
    pub max_pages: Option<usize>,

    /// PDF user password for encrypted documents.
    #[serde(skip_serializing)]
    pub password: Option<String>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        Self {
            mode: ExtractionMode::default(),
            dpi: 150,
            max_rendered_pixels: 2000,
            concurrency: 8,
            max_pages: None,
            password: None,
            download_timeout_secs: 120,
        }
    }
}
