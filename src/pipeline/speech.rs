//! Speaker script generation for one plan revision.
//!
//! The speech agent narrates each slide. Slides it skips (or every slide, when
//! no agent is configured) get a short narration built from their bullets.
//! Timing is split across slides in proportion to word count, using largest
//! remainders so the segments add up to exactly the target duration.

use std::collections::HashMap;
use tracing::{info, warn};

use crate::agents::retry::invoke;
use crate::agents::{NarrationDraft, RetryPolicy, SpeechAgent};
use crate::config::{Language, SpeechOptions};
use crate::error::{AgentRole, StageWarning};
use crate::model::{PresentationPlan, SessionId, SlideSpec, SpeechScript, SpeechSegment};
use crate::store::{put_json, ArtifactKey, ArtifactKind, ArtifactStore};

pub const SCRIPT_JSON: &str = "script.json";
pub const SCRIPT_MARKDOWN: &str = "script.md";

/// Narrate `plan` and persist the script under `speech/r<revision>/`.
///
/// Never fails the run: agent or storage failures come back as a
/// [`StageWarning::SpeechFailed`].
pub async fn generate_speech(
    agent: Option<&dyn SpeechAgent>,
    plan: &PresentationPlan,
    options: &SpeechOptions,
    language: Language,
    store: &dyn ArtifactStore,
    session: &SessionId,
    policy: &RetryPolicy,
) -> Result<SpeechScript, StageWarning> {
    let drafts = match agent {
        Some(agent) => invoke(policy, AgentRole::Speech, move || async move {
            agent.narrate(plan, options, language).await
        })
        .await
        .map_err(|e| {
            warn!("Speech agent failed: {}", e);
            StageWarning::SpeechFailed {
                detail: e.to_string(),
            }
        })?,
        None => Vec::new(),
    };

    let script = build_script(plan, drafts, options, language);
    let revision = plan.revision;
    let stored = async {
        put_json(
            store,
            session,
            &ArtifactKey::new(ArtifactKind::Speech, revision, SCRIPT_JSON),
            &script,
        )
        .await?;
        store
            .put(
                session,
                &ArtifactKey::new(ArtifactKind::Speech, revision, SCRIPT_MARKDOWN),
                script.to_markdown().as_bytes(),
            )
            .await
    }
    .await;
    stored.map_err(|e| StageWarning::SpeechFailed {
        detail: format!("could not store script: {e}"),
    })?;

    info!(
        "Speaker script: {} segments, {}s",
        script.segments.len(),
        script.total_seconds()
    );
    Ok(script)
}

/// Assemble a timed script from whatever the agent returned.
///
/// Drafts for unknown slides are ignored; the last draft for a slide wins.
pub fn build_script(
    plan: &PresentationPlan,
    drafts: Vec<NarrationDraft>,
    options: &SpeechOptions,
    language: Language,
) -> SpeechScript {
    let mut by_slide: HashMap<usize, String> = drafts
        .into_iter()
        .filter(|d| !d.text.trim().is_empty())
        .map(|d| (d.slide, d.text))
        .collect();

    let texts: Vec<(&SlideSpec, String)> = plan
        .slides
        .iter()
        .map(|s| {
            let text = by_slide
                .remove(&s.index)
                .unwrap_or_else(|| fallback_narration(s, language));
            (s, text)
        })
        .collect();

    let target = options.duration_minutes * 60;
    let weights: Vec<usize> = texts.iter().map(|(_, t)| word_count(t).max(1)).collect();
    let seconds = apportion(target, &weights);

    let mut elapsed = 0;
    let segments = texts
        .into_iter()
        .zip(seconds)
        .map(|((slide, text), secs)| {
            elapsed += secs;
            SpeechSegment {
                slide_index: slide.index,
                title: slide.title.clone(),
                text,
                seconds: secs,
                cumulative_seconds: elapsed,
            }
        })
        .collect();

    SpeechScript {
        plan_revision: plan.revision,
        style: options.style,
        target_seconds: target,
        segments,
    }
}

fn fallback_narration(slide: &SlideSpec, language: Language) -> String {
    let bullets = slide.bullet_text();
    match language {
        Language::En if bullets.is_empty() => format!("This slide covers {}.", slide.title),
        Language::En => format!("On {}: {}.", slide.title, bullets.join("; ")),
        Language::Zh if bullets.is_empty() => format!("这一页介绍{}。", slide.title),
        Language::Zh => format!("关于{}：{}。", slide.title, bullets.join("；")),
    }
}

/// Words for Latin text, characters for CJK.
fn word_count(text: &str) -> usize {
    let cjk = text
        .chars()
        .filter(|c| ('\u{4e00}'..='\u{9fff}').contains(c))
        .count();
    text.split_whitespace().count() + cjk
}

/// Split `total` proportionally to `weights` so the parts sum to `total`.
fn apportion(total: u32, weights: &[usize]) -> Vec<u32> {
    let sum: u64 = weights.iter().map(|&w| w as u64).sum();
    if sum == 0 {
        return vec![0; weights.len()];
    }
    let total = total as u64;
    let mut parts: Vec<u32> = weights.iter().map(|&w| (total * w as u64 / sum) as u32).collect();
    let mut order: Vec<usize> = (0..weights.len()).collect();
    // Largest remainder first; earlier slides win ties.
    order.sort_by_key(|&i| std::cmp::Reverse((total * weights[i] as u64) % sum));
    let assigned: u64 = parts.iter().map(|&p| p as u64).sum();
    for &i in order.iter().take((total - assigned) as usize) {
        parts[i] += 1;
    }
    parts
}
