//! Agent implementations backed by an `edgequake_llm` provider.
//!
//! This module is intentionally thin: prompt text lives in
//! [`crate::prompts`], JSON recovery in [`super::json`], and retry policy in
//! [`super::retry`]. Each method is exactly one chat completion.

use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use super::json::{parse_response, strip_fence};
use super::{
    NarrationDraft, PlanConstraints, PlanDraft, PlannerAgent, RepairAgent, SemanticFinding,
    SpeechAgent, TexFixAgent, VerifierAgent,
};
use crate::config::{Language, PipelineConfig, SpeechOptions};
use crate::error::{AgentError, AgentErrorKind, AgentRole, Paper2BeamerError};
use crate::model::{ContentBundle, PresentationPlan, VerificationReport};
use crate::prompts;

/// Default model when a provider is named without one.
pub const DEFAULT_MODEL: &str = "gpt-4.1-mini";

/// All agent roles over one chat provider.
pub struct LlmAgents {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
}

impl LlmAgents {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &PipelineConfig) -> Self {
        Self {
            provider,
            options: build_options(config),
        }
    }

    pub fn provider(&self) -> &Arc<dyn LLMProvider> {
        &self.provider
    }

    async fn chat(&self, role: AgentRole, system: &str, user: String) -> Result<String, AgentError> {
        let start = Instant::now();
        let messages = vec![ChatMessage::system(system), ChatMessage::user(&user)];
        let response = self
            .provider
            .chat(&messages, Some(&self.options))
            .await
            .map_err(|e| classify_provider_error(role, &e.to_string()))?;
        debug!(
            "{} agent: {} input tokens, {} output tokens, {:?}",
            role,
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );
        if response.content.trim().is_empty() {
            return Err(AgentError::malformed(role, "empty response"));
        }
        Ok(response.content)
    }
}

impl std::fmt::Debug for LlmAgents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmAgents")
            .field("provider", &"<dyn LLMProvider>")
            .field("temperature", &self.options.temperature)
            .field("max_tokens", &self.options.max_tokens)
            .finish()
    }
}

/// Build `CompletionOptions` from the pipeline config.
fn build_options(config: &PipelineConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

/// Map a provider error message onto an [`AgentError`].
///
/// Providers surface HTTP status and transport failures as text; the
/// patterns below decide the retryable flag.
pub fn classify_provider_error(role: AgentRole, message: &str) -> AgentError {
    let m = message.to_ascii_lowercase();
    let kind = if m.contains("429") || m.contains("rate limit") || m.contains("too many requests") {
        AgentErrorKind::RateLimited
    } else if m.contains("timeout") || m.contains("timed out") {
        AgentErrorKind::Timeout
    } else if m.contains("401")
        || m.contains("403")
        || m.contains("unauthorized")
        || m.contains("api key")
    {
        AgentErrorKind::Auth
    } else if m.contains("500")
        || m.contains("502")
        || m.contains("503")
        || m.contains("504")
        || m.contains("overloaded")
        || m.contains("connection")
    {
        AgentErrorKind::Transport
    } else {
        AgentErrorKind::Rejected
    };
    AgentError::new(role, kind, message)
}

#[async_trait]
impl PlannerAgent for LlmAgents {
    async fn plan(
        &self,
        bundle: &ContentBundle,
        constraints: &PlanConstraints,
    ) -> Result<PlanDraft, AgentError> {
        let user = prompts::plan_user_prompt(bundle, constraints.language, constraints.max_slides);
        let text = self
            .chat(AgentRole::Planner, prompts::PLANNER_SYSTEM_PROMPT, user)
            .await?;
        parse_response(AgentRole::Planner, &text)
    }

    async fn revise(
        &self,
        bundle: &ContentBundle,
        plan: &PresentationPlan,
        feedback: &str,
        previous_tex: Option<&str>,
        language: Language,
    ) -> Result<PlanDraft, AgentError> {
        let user = prompts::revise_user_prompt(bundle, plan, feedback, previous_tex, language);
        let text = self
            .chat(AgentRole::Reviser, prompts::REVISE_SYSTEM_PROMPT, user)
            .await?;
        parse_response(AgentRole::Reviser, &text)
    }
}

#[derive(Deserialize)]
struct FindingsEnvelope {
    #[serde(default)]
    findings: Vec<SemanticFinding>,
}

#[async_trait]
impl VerifierAgent for LlmAgents {
    async fn review(
        &self,
        bundle: &ContentBundle,
        plan: &PresentationPlan,
    ) -> Result<Vec<SemanticFinding>, AgentError> {
        let user = prompts::verify_user_prompt(bundle, plan);
        let text = self
            .chat(AgentRole::Verifier, prompts::VERIFIER_SYSTEM_PROMPT, user)
            .await?;
        let env: FindingsEnvelope = parse_response(AgentRole::Verifier, &text)?;
        Ok(env.findings)
    }
}

#[async_trait]
impl RepairAgent for LlmAgents {
    async fn repair(
        &self,
        bundle: &ContentBundle,
        plan: &PresentationPlan,
        report: &VerificationReport,
    ) -> Result<PlanDraft, AgentError> {
        let user = prompts::repair_user_prompt(bundle, plan, report);
        let text = self
            .chat(AgentRole::Repair, prompts::REPAIR_SYSTEM_PROMPT, user)
            .await?;
        parse_response(AgentRole::Repair, &text)
    }
}

#[derive(Deserialize)]
struct SegmentsEnvelope {
    #[serde(default)]
    segments: Vec<NarrationDraft>,
}

#[async_trait]
impl SpeechAgent for LlmAgents {
    async fn narrate(
        &self,
        plan: &PresentationPlan,
        options: &SpeechOptions,
        language: Language,
    ) -> Result<Vec<NarrationDraft>, AgentError> {
        let system = prompts::speech_system_prompt(options, language);
        let text = self
            .chat(AgentRole::Speech, &system, prompts::speech_user_prompt(plan))
            .await?;
        let env: SegmentsEnvelope = parse_response(AgentRole::Speech, &text)?;
        Ok(env.segments)
    }
}

#[async_trait]
impl TexFixAgent for LlmAgents {
    async fn fix(&self, source: &str, log_excerpt: &str) -> Result<String, AgentError> {
        let text = self
            .chat(
                AgentRole::TexFix,
                prompts::TEX_FIX_SYSTEM_PROMPT,
                prompts::tex_fix_user_prompt(source, log_excerpt),
            )
            .await?;
        let patched = strip_fence(&text);
        if !patched.contains("\\begin{document}") {
            return Err(AgentError::malformed(
                AgentRole::TexFix,
                "patched source lost \\begin{document}",
            ));
        }
        Ok(patched.to_string())
    }
}

// ── Provider resolution ──────────────────────────────────────────────────

/// Instantiate a named provider with the given model.
fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, Paper2BeamerError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        Paper2BeamerError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`).
/// 3. **`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`** when both are set.
/// 4. **OpenAI** when `OPENAI_API_KEY` is present, so users with several
///    provider keys get a predictable default.
/// 5. **Full auto-detection** (`ProviderFactory::from_env`).
pub fn resolve_provider(config: &PipelineConfig) -> Result<Arc<dyn LLMProvider>, Paper2BeamerError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| Paper2BeamerError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
