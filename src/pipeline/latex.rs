//! Beamer rendering: [`PresentationPlan`] → [`DocumentSource`].
//!
//! [`render`] is a pure function of its arguments: no I/O, no clock, no
//! randomness. Rendering the same plan revision with the same theme,
//! language and options always yields byte-identical LaTeX.
//!
//! ## Frame splitting
//!
//! Each slide element has a layout weight (see [`SlideElement::weight`]).
//! Elements are packed greedily into frames up to the density threshold,
//! with at most one figure or table per frame. Every physical frame is
//! preceded by a `% logical slide N` marker so a compiler error on any
//! frame can be traced back to the slide spec that produced it.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};

use crate::config::Language;
use crate::error::TemplateError;
use crate::model::{DocumentSource, PresentationPlan, RenderOptions, SlideElement, SlideSpec, SourceOrigin};

/// Prefix of the per-frame traceability comment.
pub const LOGICAL_SLIDE_MARKER: &str = "% logical slide ";

static UNICODE_TO_LATEX: Lazy<HashMap<char, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ('α', r"$\alpha$"),
        ('β', r"$\beta$"),
        ('γ', r"$\gamma$"),
        ('δ', r"$\delta$"),
        ('ε', r"$\varepsilon$"),
        ('ζ', r"$\zeta$"),
        ('η', r"$\eta$"),
        ('θ', r"$\theta$"),
        ('κ', r"$\kappa$"),
        ('λ', r"$\lambda$"),
        ('μ', r"$\mu$"),
        ('ν', r"$\nu$"),
        ('ξ', r"$\xi$"),
        ('π', r"$\pi$"),
        ('ρ', r"$\rho$"),
        ('σ', r"$\sigma$"),
        ('τ', r"$\tau$"),
        ('φ', r"$\phi$"),
        ('χ', r"$\chi$"),
        ('ψ', r"$\psi$"),
        ('ω', r"$\omega$"),
        ('Γ', r"$\Gamma$"),
        ('Δ', r"$\Delta$"),
        ('Θ', r"$\Theta$"),
        ('Λ', r"$\Lambda$"),
        ('Π', r"$\Pi$"),
        ('Σ', r"$\Sigma$"),
        ('Φ', r"$\Phi$"),
        ('Ψ', r"$\Psi$"),
        ('Ω', r"$\Omega$"),
        ('✓', r"$\checkmark$"),
        ('✗', r"$\times$"),
        ('×', r"$\times$"),
        ('±', r"$\pm$"),
        ('≈', r"$\approx$"),
        ('≠', r"$\neq$"),
        ('≤', r"$\leq$"),
        ('≥', r"$\geq$"),
        ('≪', r"$\ll$"),
        ('≫', r"$\gg$"),
        ('→', r"$\rightarrow$"),
        ('←', r"$\leftarrow$"),
        ('↑', r"$\uparrow$"),
        ('↓', r"$\downarrow$"),
        ('⇒', r"$\Rightarrow$"),
        ('⇔', r"$\Leftrightarrow$"),
        ('∞', r"$\infty$"),
        ('∑', r"$\sum$"),
        ('∏', r"$\prod$"),
        ('∂', r"$\partial$"),
        ('∇', r"$\nabla$"),
        ('∀', r"$\forall$"),
        ('∃', r"$\exists$"),
        ('∈', r"$\in$"),
        ('∉', r"$\notin$"),
        ('∅', r"$\emptyset$"),
        ('⊂', r"$\subset$"),
        ('⊆', r"$\subseteq$"),
        ('∪', r"$\cup$"),
        ('∩', r"$\cap$"),
        ('⊕', r"$\oplus$"),
        ('⊗', r"$\otimes$"),
        ('²', r"$^2$"),
        ('³', r"$^3$"),
        ('°', r"$^\circ$"),
        ('·', r"$\cdot$"),
        ('…', r"\ldots{}"),
        ('‰', r"\textperthousand{}"),
    ])
});

/// Render `plan` to a complete Beamer document.
///
/// Fails only on slide specs that break the plan contract (blank title,
/// index out of sequence).
pub fn render(
    plan: &PresentationPlan,
    theme: &str,
    language: Language,
    options: &RenderOptions,
    density_threshold: usize,
) -> Result<DocumentSource, TemplateError> {
    let mut out = String::with_capacity(4096 + plan.slides.len() * 512);
    out.push_str(&preamble(plan, theme, language, options));
    out.push_str("\\begin{document}\n\n\\begin{frame}\n  \\titlepage\n\\end{frame}\n\n");

    for (position, slide) in plan.slides.iter().enumerate() {
        validate_slide(slide, position + 1)?;
        for (n, frame) in paginate(slide, density_threshold).iter().enumerate() {
            out.push_str(&render_frame(slide, frame, n, language, options));
        }
    }
    out.push_str("\\end{document}\n");

    Ok(DocumentSource {
        plan_revision: plan.revision,
        theme: theme.to_string(),
        language,
        options: options.clone(),
        origin: SourceOrigin::Rendered,
        content: out,
    })
}

/// Assets the document will `\includegraphics`, excluding omitted ones.
pub fn required_assets(plan: &PresentationPlan, options: &RenderOptions) -> BTreeSet<String> {
    plan.slides
        .iter()
        .flat_map(|s| s.elements.iter())
        .filter_map(|e| match e {
            SlideElement::Figure { asset, .. } if !asset.is_empty() => Some(asset.clone()),
            _ => None,
        })
        .filter(|a| !options.omitted_resources.contains(a))
        .collect()
}

fn validate_slide(slide: &SlideSpec, expected_index: usize) -> Result<(), TemplateError> {
    if slide.index != expected_index {
        return Err(TemplateError {
            slide: slide.index,
            detail: format!("index out of sequence (expected {expected_index})"),
        });
    }
    if slide.title.trim().is_empty() {
        return Err(TemplateError {
            slide: slide.index,
            detail: "blank title".to_string(),
        });
    }
    Ok(())
}

fn preamble(plan: &PresentationPlan, theme: &str, language: Language, options: &RenderOptions) -> String {
    let mut p = String::new();
    p.push_str("\\documentclass[10pt,aspectratio=169]{beamer}\n");
    p.push_str(&format!("% plan revision {}\n", plan.revision));
    p.push_str(&format!("\\usetheme{{{theme}}}\n"));
    match language {
        Language::En => {
            p.push_str("\\usepackage[utf8]{inputenc}\n\\usepackage[T1]{fontenc}\n\\usepackage{textcomp}\n")
        }
        Language::Zh => p.push_str("\\usepackage[UTF8]{ctex}\n"),
    }
    p.push_str("\\usepackage{graphicx}\n\\usepackage{booktabs}\n\\usepackage{amsmath}\n\\usepackage{amssymb}\n");
    p.push_str("\\setbeamertemplate{navigation symbols}{}\n");
    p.push_str("\\setbeamertemplate{caption}[numbered]\n\n");

    let authors = plan
        .authors
        .iter()
        .map(|a| escape_text(a, language, options.safe_mode))
        .collect::<Vec<_>>()
        .join(" \\and ");
    p.push_str(&format!("\\title{{{}}}\n", escape_text(&plan.title, language, options.safe_mode)));
    p.push_str(&format!("\\author{{{authors}}}\n"));
    p.push_str("\\date{}\n\n");
    p
}

/// Split a slide's elements into frames.
fn paginate(slide: &SlideSpec, threshold: usize) -> Vec<Vec<&SlideElement>> {
    let threshold = threshold.max(1);
    let mut frames: Vec<Vec<&SlideElement>> = Vec::new();
    let mut current: Vec<&SlideElement> = Vec::new();
    let mut weight = 0usize;

    for e in &slide.elements {
        let w = e.weight();
        let has_visual = current.iter().any(|c| c.is_visual());
        let overflow = !current.is_empty() && weight + w > threshold;
        if overflow || (e.is_visual() && has_visual) {
            frames.push(std::mem::take(&mut current));
            weight = 0;
        }
        current.push(e);
        weight += w;
    }
    if !current.is_empty() || frames.is_empty() {
        frames.push(current);
    }
    frames
}

fn render_frame(
    slide: &SlideSpec,
    elements: &[&SlideElement],
    continuation: usize,
    language: Language,
    options: &RenderOptions,
) -> String {
    let fragile = !options.safe_mode && elements.iter().any(|e| matches!(e, SlideElement::Code { .. }));
    let mut title = escape_text(&slide.title, language, options.safe_mode);
    if continuation > 0 {
        title.push_str(match language {
            Language::En => " (cont.)",
            Language::Zh => "（续）",
        });
    }

    let mut f = String::new();
    f.push_str(&format!("{LOGICAL_SLIDE_MARKER}{}\n", slide.index));
    if fragile {
        f.push_str(&format!("\\begin{{frame}}[fragile]{{{title}}}\n"));
    } else {
        f.push_str(&format!("\\begin{{frame}}{{{title}}}\n"));
    }

    let mut depth = 0u8;
    for e in elements {
        match e {
            SlideElement::Bullet { text, level } => {
                let target = level.saturating_add(1).min(3);
                while depth < target {
                    f.push_str(&format!("{}\\begin{{itemize}}\n", indent(depth)));
                    depth += 1;
                }
                while depth > target {
                    depth -= 1;
                    f.push_str(&format!("{}\\end{{itemize}}\n", indent(depth)));
                }
                f.push_str(&format!(
                    "{}\\item {}\n",
                    indent(depth),
                    escape_text(text, language, options.safe_mode)
                ));
            }
            other => {
                close_lists(&mut f, &mut depth);
                f.push_str(&render_block(other, language, options));
            }
        }
    }
    close_lists(&mut f, &mut depth);
    f.push_str("\\end{frame}\n\n");
    f
}

fn indent(depth: u8) -> String {
    "  ".repeat(depth as usize + 1)
}

fn close_lists(f: &mut String, depth: &mut u8) {
    while *depth > 0 {
        *depth -= 1;
        f.push_str(&format!("{}\\end{{itemize}}\n", indent(*depth)));
    }
}

fn render_block(element: &SlideElement, language: Language, options: &RenderOptions) -> String {
    let esc = |s: &str| escape_text(s, language, options.safe_mode);
    match element {
        SlideElement::Figure { figure_id, asset, caption } => {
            if asset.is_empty() || options.omitted_resources.contains(asset) {
                let label = if caption.is_empty() { figure_id.as_str() } else { caption.as_str() };
                return placeholder(&esc(label));
            }
            let mut b = String::from("  \\begin{figure}\n    \\centering\n");
            b.push_str(&format!(
                "    \\includegraphics[width=0.9\\linewidth,height=0.65\\textheight,keepaspectratio]{{{}}}\n",
                asset
            ));
            if !caption.is_empty() {
                b.push_str(&format!("    \\caption{{{}}}\n", esc(caption)));
            }
            b.push_str("  \\end{figure}\n");
            b
        }
        SlideElement::Table { caption, rows, .. } => {
            let cols = rows.iter().map(Vec::len).max().unwrap_or(0);
            if cols == 0 {
                return placeholder(&esc(caption));
            }
            let mut b = String::from("  \\begin{table}\n    \\centering\n");
            if !caption.is_empty() {
                b.push_str(&format!("    \\caption{{{}}}\n", esc(caption)));
            }
            b.push_str(&format!(
                "    \\resizebox{{\\linewidth}}{{!}}{{%\n    \\begin{{tabular}}{{{}}}\n      \\toprule\n",
                "l".repeat(cols)
            ));
            for (i, row) in rows.iter().enumerate() {
                let mut cells: Vec<String> = row.iter().map(|c| esc(c)).collect();
                cells.resize(cols, String::new());
                b.push_str(&format!("      {} \\\\\n", cells.join(" & ")));
                if i == 0 && rows.len() > 1 {
                    b.push_str("      \\midrule\n");
                }
            }
            b.push_str("      \\bottomrule\n    \\end{tabular}}\n  \\end{table}\n");
            b
        }
        SlideElement::Code { code, .. } => {
            if options.safe_mode {
                let mut b = String::from("  {\\footnotesize\\ttfamily\n");
                for line in code.lines() {
                    b.push_str(&format!("  {}\\\\\n", escape_text(line, language, true)));
                }
                b.push_str("  }\n");
                b
            } else {
                let body = code.replace("\\end{verbatim}", "\\end {verbatim}");
                format!("\\begin{{verbatim}}\n{}\n\\end{{verbatim}}\n", body.trim_end())
            }
        }
        SlideElement::Bullet { .. } => String::new(),
    }
}

fn placeholder(label: &str) -> String {
    format!(
        "  \\begin{{center}}\n    \\fbox{{\\parbox{{0.8\\linewidth}}{{\\centering\\small [{}]}}}}\n  \\end{{center}}\n",
        label
    )
}

/// Control words that read files, write files or change the document
/// structure. Math spans containing them are escaped as plain text.
static RE_UNSAFE_MATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\\(?:input|include|includeonly|openin|openout|read|readline|write|immediate|begin|end|def|edef|gdef|xdef|let|catcode|csname|expandafter|newcommand|renewcommand|providecommand|usepackage|special|directlua)\b|\^\^",
    )
    .unwrap()
});

/// Escape paper text for LaTeX.
///
/// Balanced `$…$` spans pass through untouched unless `safe` is set or the
/// span fails [`is_plain_math`]. In safe mode, English output also drops
/// characters pdflatex cannot typeset.
pub fn escape_text(text: &str, language: Language, safe: bool) -> String {
    if !safe {
        if let Some(parts) = split_math(text) {
            return parts
                .into_iter()
                .map(|(is_math, s)| {
                    if is_math && is_plain_math(s) {
                        s.to_string()
                    } else {
                        escape_plain(s, language, false)
                    }
                })
                .collect();
        }
    }
    escape_plain(text, language, safe)
}

/// Balanced braces and no file, output or structure commands.
fn is_plain_math(span: &str) -> bool {
    let mut depth = 0i32;
    let mut escaped = false;
    for c in span.chars() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0 && !RE_UNSAFE_MATH.is_match(span)
}

/// Split into `(is_math, text)` runs when every `$` is paired.
fn split_math(text: &str) -> Option<Vec<(bool, &str)>> {
    let dollars: Vec<usize> = text
        .char_indices()
        .filter(|(i, c)| *c == '$' && !text[..*i].ends_with('\\'))
        .map(|(i, _)| i)
        .collect();
    if dollars.is_empty() || dollars.len() % 2 != 0 {
        return None;
    }
    let mut parts = Vec::new();
    let mut last = 0;
    for pair in dollars.chunks(2) {
        let (open, close) = (pair[0], pair[1]);
        if close == open + 1 {
            return None;
        }
        if open > last {
            parts.push((false, &text[last..open]));
        }
        parts.push((true, &text[open..=close]));
        last = close + 1;
    }
    if last < text.len() {
        parts.push((false, &text[last..]));
    }
    Some(parts)
}

fn escape_plain(text: &str, language: Language, safe: bool) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\textbackslash{}"),
            '{' => out.push_str("\\{"),
            '}' => out.push_str("\\}"),
            '#' => out.push_str("\\#"),
            '$' => out.push_str("\\$"),
            '%' => out.push_str("\\%"),
            '&' => out.push_str("\\&"),
            '_' => out.push_str("\\_"),
            '^' => out.push_str("\\^{}"),
            '~' => out.push_str("\\textasciitilde{}"),
            '<' => out.push_str("\\textless{}"),
            '>' => out.push_str("\\textgreater{}"),
            '\n' | '\t' => out.push(' '),
            c if c.is_control() => {}
            c => match UNICODE_TO_LATEX.get(&c) {
                Some(latex) => out.push_str(latex),
                None if safe && language == Language::En && !is_latin1(c) => out.push('?'),
                None => out.push(c),
            },
        }
    }
    out
}

fn is_latin1(c: char) -> bool {
    (c as u32) < 0x100 || matches!(c, '‘' | '’' | '“' | '”' | '–' | '—')
}
