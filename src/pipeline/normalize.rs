//! Deterministic cleanup of page transcripts before bundle parsing.
//!
//! Both extraction modes produce per-page text with artefacts that would
//! otherwise leak into slides: markdown fences around VLM output, page
//! numbers, arXiv side stamps, words hyphenated across line breaks, image
//! links the model invented. Each rule is a pure `&str → String` pass.
//!
//! ## Rule Order
//!
//! Fences are stripped and line endings normalised first so that the
//! line-oriented rules see clean input; blank-line collapsing runs last.

use once_cell::sync::Lazy;
use regex::Regex;

/// Clean one page transcript.
///
/// Rules (applied in order):
/// 1. Strip outer markdown fences
/// 2. Normalise line endings (CRLF → LF) and drop invisible Unicode
/// 3. Remove page furniture (bare page numbers, "Page X of Y", arXiv stamps)
/// 4. Replace image links with their alt text
/// 5. Re-join words hyphenated across line breaks
/// 6. Trim trailing whitespace and collapse runs of blank lines
pub fn clean_transcript(input: &str) -> String {
    let s = strip_markdown_fences(input);
    let s = normalise_text(&s);
    let s = remove_page_furniture(&s);
    let s = replace_image_links(&s);
    let s = dehyphenate(&s);
    tidy_whitespace(&s)
}

// ── Rule 1: Strip outer markdown fences ──────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?\n(.*)\n```\s*$").unwrap());

fn strip_markdown_fences(input: &str) -> String {
    let trimmed = input.trim();
    match RE_OUTER_FENCES.captures(trimmed) {
        Some(caps) => caps[1].to_string(),
        None => trimmed.to_string(),
    }
}

// ── Rule 2: Line endings and invisible characters ────────────────────────

fn normalise_text(input: &str) -> String {
    input
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace(['\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}'], "")
        .replace('\u{00A0}', " ")
}

// ── Rule 3: Page furniture ───────────────────────────────────────────────

static RE_PAGE_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(?:page\s+)?\d{1,4}(?:\s+(?:of|/)\s+\d{1,4})?\s*$").unwrap());

static RE_ARXIV_STAMP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*arXiv:\d{4}\.\d{4,5}(?:v\d+)?\s*\[[^\]]+\].*$").unwrap());

fn remove_page_furniture(input: &str) -> String {
    input
        .lines()
        .filter(|line| !RE_PAGE_NUMBER.is_match(line) && !RE_ARXIV_STAMP.is_match(line))
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 4: Image links ──────────────────────────────────────────────────

static RE_IMAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\([^)]*\)").unwrap());

/// The deck never embeds remote images; keep only the alt text.
fn replace_image_links(input: &str) -> String {
    RE_IMAGE
        .replace_all(input, |caps: &regex::Captures<'_>| caps[1].trim().to_string())
        .to_string()
}

// ── Rule 5: Dehyphenation ────────────────────────────────────────────────

static RE_HYPHEN_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([a-z]{2,})-\n([a-z]{2,})").unwrap());

fn dehyphenate(input: &str) -> String {
    RE_HYPHEN_BREAK.replace_all(input, "$1$2").to_string()
}

// ── Rule 6: Whitespace ───────────────────────────────────────────────────

static RE_BLANK_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn tidy_whitespace(input: &str) -> String {
    let trimmed = input
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n");
    RE_BLANK_RUNS
        .replace_all(trimmed.trim(), "\n\n")
        .to_string()
}
