//! Prompts for every LLM-backed agent.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth**: changing what an agent is asked to do
//!    requires editing exactly one place, never the retry or parsing code.
//!
//! 2. **Testability**: unit tests inspect the rendered prompts directly
//!    without spinning up a real model.
//!
//! Agents that return structured data are asked for a single JSON object; the
//! schemas below mirror the draft types in [`crate::agents`].

use crate::config::{Language, SpeechOptions};
use crate::model::{ContentBundle, PresentationPlan, VerificationReport};

/// Section text beyond this many characters is truncated in agent context.
const SECTION_CONTEXT_CHARS: usize = 2_400;

// ── Page transcription ───────────────────────────────────────────────────

/// System prompt for transcribing one rasterised paper page to Markdown.
pub const TRANSCRIBE_SYSTEM_PROMPT: &str = r###"You are an expert transcriber of research papers. Convert the page image to clean Markdown.

Follow these rules precisely:

1. TEXT PRESERVATION
   - Preserve ALL text content completely and accurately, in reading order
   - Merge multi-column layouts into a single column

2. STRUCTURE
   - Use # only for the paper title (first page only)
   - Use ## for numbered sections (e.g. "## 3 Method"), ### for subsections
   - Put the author list on the line directly after the title

3. TABLES
   - Convert tables to GFM pipe format
   - Put the caption on its own line directly above the table: "Table N: caption"

4. FIGURES
   - Do not describe images; write the caption on its own line: "Figure N: caption"

5. FORMULAS
   - Render mathematical expressions using LaTeX: $inline$ and $$display$$

6. WHAT TO IGNORE
   - Page numbers, running headers and footers, line numbers

7. OUTPUT FORMAT
   - Output ONLY the Markdown content
   - Do NOT wrap in ```markdown fences
   - Do NOT add commentary"###;

// ── Planning ─────────────────────────────────────────────────────────────

/// JSON shape shared by planning, revision and repair responses.
pub const PLAN_SCHEMA: &str = r#"{
  "slides": [
    {
      "title": "string (required)",
      "role": "motivation|background|problem|method|experiment|result|discussion|conclusion|other",
      "sources": ["sec-1"],
      "elements": [
        {"type": "bullet", "text": "string", "level": 0},
        {"type": "figure", "id": "fig-1"},
        {"type": "table", "id": "tab-1"},
        {"type": "code", "language": "python", "code": "string"}
      ]
    }
  ]
}"#;

pub const PLANNER_SYSTEM_PROMPT: &str = r#"You are an academic presentation designer. Turn a research paper into a clear, well-structured slide deck that follows the Problem → Method → Results → Conclusion arc.

Rules:
- Every section id listed in the input MUST appear in the "sources" of at least one slide.
- Reference figures and tables only by the ids given in the input. Never invent ids.
- Every listed figure should appear on exactly one slide.
- At most one figure OR one table per slide, never both.
- 3 to 6 concise bullets per slide; no full paragraphs.
- Do not create a title slide; it is generated automatically.
- Respond with a single JSON object and nothing else."#;

fn language_instruction(language: Language) -> &'static str {
    match language {
        Language::En => "Write all slide text in English.",
        Language::Zh => "Write all slide text in Simplified Chinese; keep technical terms and model names in English.",
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{cut} …")
    }
}

/// Render the bundle as compact agent context.
pub fn bundle_context(bundle: &ContentBundle) -> String {
    let mut out = format!(
        "Title: {}\nAuthors: {}\n\n## Sections\n",
        bundle.metadata.title,
        bundle.metadata.authors.join(", ")
    );
    for s in &bundle.sections {
        out.push_str(&format!(
            "\n[{}] {}\n{}\n",
            s.id,
            s.heading,
            truncate(&s.text(), SECTION_CONTEXT_CHARS)
        ));
    }
    if !bundle.figures.is_empty() {
        out.push_str("\n## Figures\n");
        for f in &bundle.figures {
            out.push_str(&format!("- [{}] {}\n", f.id, f.caption));
        }
    }
    if !bundle.tables.is_empty() {
        out.push_str("\n## Tables\n");
        for t in &bundle.tables {
            out.push_str(&format!("- [{}] {} ({} rows)\n", t.id, t.caption, t.rows.len()));
        }
    }
    out
}

/// Compact JSON-ish summary of a plan for revision and repair context.
pub fn plan_context(plan: &PresentationPlan) -> String {
    serde_json::to_string_pretty(&plan.slides).unwrap_or_default()
}

pub fn plan_user_prompt(
    bundle: &ContentBundle,
    language: Language,
    max_slides: Option<usize>,
) -> String {
    let budget = match max_slides {
        Some(n) => format!("Aim for at most {n} slides, but never at the cost of section coverage."),
        None => "Choose the slide count that fits the paper's content.".to_string(),
    };
    format!(
        "{}\n{}\n\nRespond with JSON matching:\n{}\n\n# Paper\n\n{}",
        language_instruction(language),
        budget,
        PLAN_SCHEMA,
        bundle_context(bundle)
    )
}

pub const REVISE_SYSTEM_PROMPT: &str = r#"You revise an existing slide deck plan according to user feedback.

Rules:
- Apply the feedback faithfully; leave everything the feedback does not touch unchanged.
- Keep every section id covered by at least one slide.
- Reference figures and tables only by the ids given in the paper context.
- Respond with the COMPLETE revised plan as a single JSON object and nothing else."#;

pub fn revise_user_prompt(
    bundle: &ContentBundle,
    plan: &PresentationPlan,
    feedback: &str,
    previous_tex: Option<&str>,
    language: Language,
) -> String {
    let mut out = format!(
        "{}\n\n# Feedback\n\n{}\n\n# Current plan (revision {})\n\n{}\n",
        language_instruction(language),
        feedback.trim(),
        plan.revision,
        plan_context(plan)
    );
    if let Some(tex) = previous_tex {
        out.push_str(&format!(
            "\n# Current LaTeX (excerpt)\n\n{}\n",
            truncate(tex, 6_000)
        ));
    }
    out.push_str(&format!(
        "\nRespond with JSON matching:\n{}\n\n# Paper\n\n{}",
        PLAN_SCHEMA,
        bundle_context(bundle)
    ));
    out
}

// ── Verification ─────────────────────────────────────────────────────────

pub const VERIFIER_SYSTEM_PROMPT: &str = r#"You review a slide deck plan against the paper it summarises. Report factual drift (claims or numbers not supported by the paper), misattributed figures, and important findings that are missing.

Respond with a single JSON object:
{"findings": [{"slide": 3, "reference": "sec-2", "description": "string"}]}
Use "slide": null for deck-level findings. Return {"findings": []} when the plan is faithful."#;

pub fn verify_user_prompt(bundle: &ContentBundle, plan: &PresentationPlan) -> String {
    format!(
        "# Plan (revision {})\n\n{}\n\n# Paper\n\n{}",
        plan.revision,
        plan_context(plan),
        bundle_context(bundle)
    )
}

// ── Repair ───────────────────────────────────────────────────────────────

pub const REPAIR_SYSTEM_PROMPT: &str = r#"You repair a slide deck plan so that it passes verification.

Rules:
- Fix every issue marked BLOCKING. Fix advisory issues when it is cheap.
- Do not delete slides that are not mentioned by an issue.
- Reference figures and tables only by the ids given in the paper context.
- Respond with the COMPLETE repaired plan as a single JSON object and nothing else."#;

pub fn repair_user_prompt(
    bundle: &ContentBundle,
    plan: &PresentationPlan,
    report: &VerificationReport,
) -> String {
    let issues: Vec<String> = report
        .issues
        .iter()
        .map(|i| {
            let sev = if i.is_blocking() { "BLOCKING" } else { "advisory" };
            let slide = i.slide.map(|s| format!(" slide {s}")).unwrap_or_default();
            format!("- [{sev}]{slide} {}", i.description)
        })
        .collect();
    format!(
        "# Issues\n\n{}\n\n# Plan (revision {})\n\n{}\n\nRespond with JSON matching:\n{}\n\n# Paper\n\n{}",
        issues.join("\n"),
        plan.revision,
        plan_context(plan),
        PLAN_SCHEMA,
        bundle_context(bundle)
    )
}

// ── Speech ───────────────────────────────────────────────────────────────

pub fn speech_system_prompt(options: &SpeechOptions, language: Language) -> String {
    format!(
        r#"You are a presentation coach writing the spoken script for a slide deck.

- Style: {} ({})
- Target duration: {} minutes in total
- Language: {}

Write natural, spoken narration for every slide with smooth transitions.
Respond with a single JSON object:
{{"segments": [{{"slide": 1, "text": "string"}}]}}"#,
        options.style,
        options.style.guidance(),
        options.duration_minutes,
        language.display_name()
    )
}

pub fn speech_user_prompt(plan: &PresentationPlan) -> String {
    format!("# Deck: {}\n\n{}", plan.title, plan_context(plan))
}

// ── LaTeX fix-up ─────────────────────────────────────────────────────────

pub const TEX_FIX_SYSTEM_PROMPT: &str = r#"You fix LaTeX Beamer documents that fail to compile.

Given the source and the compiler log, return the corrected COMPLETE source.
Change only what is needed to fix the reported errors. Keep every frame and
every "% logical slide" comment line. Output only LaTeX, no fences, no commentary."#;

pub fn tex_fix_user_prompt(source: &str, log_excerpt: &str) -> String {
    format!("# Compiler log (tail)\n\n{log_excerpt}\n\n# Source\n\n{source}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::bundle::fixtures::sample_bundle;

    #[test]
    fn bundle_context_lists_ids() {
        let ctx = bundle_context(&sample_bundle());
        assert!(ctx.contains("[sec-1] Introduction"));
        assert!(ctx.contains("[fig-2] Accuracy versus sequence length"));
        assert!(ctx.contains("[tab-1] Main results (2 rows)"));
    }

    #[test]
    fn plan_prompt_carries_budget_and_language() {
        let p = plan_user_prompt(&sample_bundle(), Language::Zh, Some(12));
        assert!(p.contains("at most 12 slides"));
        assert!(p.contains("Simplified Chinese"));
        assert!(p.contains("\"slides\""));
    }

    #[test]
    fn transcribe_prompt_keeps_heading_examples() {
        assert!(TRANSCRIBE_SYSTEM_PROMPT.contains("(e.g. \"## 3 Method\")"));
        assert!(TRANSCRIBE_SYSTEM_PROMPT.ends_with("Do NOT add commentary"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "数据".repeat(10);
        let t = truncate(&s, 3);
        assert!(t.starts_with("数据数"));
        assert!(t.ends_with('…'));
    }

    #[test]
    fn speech_prompt_mentions_duration() {
        let p = speech_system_prompt(&SpeechOptions::default(), Language::En);
        assert!(p.contains("15 minutes"));
        assert!(p.contains("academic_conference"));
    }
}
