//! Parse cleaned page text into a [`ContentBundle`].
//!
//! Two front-ends share one [`BundleBuilder`]:
//!
//! * [`parse_markdown`] reads VLM transcripts: `#` title, `##`/`###`
//!   section headings, GFM pipe tables, `Figure N:` / `Table N:` captions.
//! * [`parse_text_layer`] reads the raw PDF text layer, where structure has
//!   to be guessed from numbered headings ("3.1 Training") and well-known
//!   unnumbered ones ("Abstract", "Conclusion").
//!
//! Figures point at the rendered image of the page carrying their caption
//! (`pages/page-<n>.png` in the raw namespace); the extractor stores those.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

use crate::config::Language;
use crate::model::{ContentBundle, FigureRef, PaperMetadata, Section, TableRef};

/// Spans longer than this are split at sentence boundaries.
const MAX_SPAN_CHARS: usize = 900;

/// Artifact name of a page raster used as figure asset.
pub fn page_asset_name(page: usize) -> String {
    format!("pages/page-{page}.png")
}

static RE_FIGURE_CAPTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*[*_]{0,2}(?:Figure|Fig\.|图)\s*(\d+)[*_]{0,2}\s*[:.：]\s*[*_]{0,2}\s*(.*?)[*_]{0,2}\s*$")
        .unwrap()
});

static RE_TABLE_CAPTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*[*_]{0,2}(?:Table|Tab\.|表)\s*(\d+)[*_]{0,2}\s*[:.：]\s*[*_]{0,2}\s*(.*?)[*_]{0,2}\s*$")
        .unwrap()
});

static RE_MD_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(#{1,6})\s+(.+?)\s*#*\s*$").unwrap());

static RE_NUMBERED_HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{1,2}(?:\.\d{1,2}){0,2})\.?\s+([A-Z][^.!?]{1,78})$").unwrap()
});

static RE_AUTHOR_MARKS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\d*†‡§¶,]+$").unwrap());

const UNNUMBERED_HEADINGS: &[&str] = &[
    "abstract",
    "introduction",
    "related work",
    "background",
    "method",
    "methods",
    "experiments",
    "results",
    "discussion",
    "conclusion",
    "conclusions",
    "references",
    "bibliography",
    "acknowledgments",
    "acknowledgements",
    "appendix",
];

fn is_reference_heading(heading: &str) -> bool {
    let h = heading.to_ascii_lowercase();
    let h = h.trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ' ');
    matches!(h, "references" | "bibliography" | "参考文献")
}

/// Incrementally assembles sections, figures and tables in reading order.
#[derive(Debug, Default)]
pub struct BundleBuilder {
    title: Option<String>,
    authors: Vec<String>,
    sections: Vec<Section>,
    /// Index into `sections` of the section currently receiving text.
    current: Option<usize>,
    /// Text seen before the first heading.
    preamble: Vec<String>,
    paragraph: Vec<String>,
    skipping_references: bool,
    figures: BTreeMap<u32, FigureRef>,
    tables: BTreeMap<u32, TableRef>,
    /// Table number waiting for its rows, plus the rows seen so far.
    open_table: Option<u32>,
    page: usize,
    unnumbered_tables: u32,
    char_total: usize,
    cjk_total: usize,
}

impl BundleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_page(&mut self, page: usize) {
        self.page = page;
    }

    pub fn set_title(&mut self, title: &str) {
        if self.title.is_none() && !title.trim().is_empty() {
            self.title = Some(title.trim().to_string());
        }
    }

    pub fn has_title(&self) -> bool {
        self.title.is_some()
    }

    pub fn set_authors_line(&mut self, line: &str) {
        if !self.authors.is_empty() {
            return;
        }
        self.authors = split_authors(line);
    }

    pub fn start_section(&mut self, heading: &str, level: u8) {
        self.flush_paragraph();
        self.open_table = None;
        let heading = heading.trim_matches(|c: char| c.is_whitespace() || matches!(c, '*' | '_' | '#'));
        // A bare `## **` continues the current section.
        if heading.is_empty() {
            return;
        }
        if is_reference_heading(heading) {
            self.skipping_references = true;
            self.current = None;
            return;
        }
        self.skipping_references = false;
        self.sections.push(Section {
            id: String::new(),
            heading: heading.to_string(),
            level: level.max(1),
            spans: Vec::new(),
            page: Some(self.page).filter(|p| *p > 0),
        });
        self.current = Some(self.sections.len() - 1);
    }

    pub fn push_line(&mut self, line: &str) {
        if self.skipping_references {
            return;
        }
        let line = line.trim();
        if line.is_empty() {
            self.flush_paragraph();
            return;
        }
        self.count_chars(line);
        self.paragraph.push(line.to_string());
    }

    pub fn flush_paragraph(&mut self) {
        if self.paragraph.is_empty() {
            return;
        }
        let text = self.paragraph.join(" ");
        self.paragraph.clear();
        let spans = split_span(&text);
        match self.current {
            Some(i) => self.sections[i].spans.extend(spans),
            None => self.preamble.extend(spans),
        }
    }

    pub fn add_figure(&mut self, number: u32, caption: &str) {
        if self.skipping_references {
            return;
        }
        self.flush_paragraph();
        let page = self.page;
        let section = self.current;
        self.figures.entry(number).or_insert_with(|| FigureRef {
            id: format!("fig-{number}"),
            asset: page_asset_name(page.max(1)),
            caption: caption.trim().to_string(),
            // Temporarily the section index; resolved in `finish`.
            section: section.map(|i| i.to_string()),
            page: Some(page).filter(|p| *p > 0),
        });
    }

    /// Register a table caption; following pipe rows attach to it.
    pub fn start_table(&mut self, number: u32, caption: &str) {
        if self.skipping_references {
            return;
        }
        self.flush_paragraph();
        let section = self.current;
        self.tables.entry(number).or_insert_with(|| TableRef {
            id: format!("tab-{number}"),
            caption: caption.trim().to_string(),
            rows: Vec::new(),
            section: section.map(|i| i.to_string()),
        });
        self.open_table = Some(number);
    }

    pub fn push_table_row(&mut self, cells: Vec<String>) {
        if self.skipping_references {
            return;
        }
        self.flush_paragraph();
        let number = match self.open_table {
            Some(n) => n,
            None => {
                // Table without a caption line.
                self.unnumbered_tables += 1;
                let n = 1000 + self.unnumbered_tables;
                let caption = format!("Table {}", self.tables.len() + 1);
                self.start_table(n, &caption);
                n
            }
        };
        if let Some(t) = self.tables.get_mut(&number) {
            t.rows.push(cells);
        }
    }

    pub fn end_table(&mut self) {
        if let Some(n) = self.open_table {
            if self.tables.get(&n).is_some_and(|t| !t.rows.is_empty()) {
                self.open_table = None;
            }
        }
    }

    fn count_chars(&mut self, text: &str) {
        for c in text.chars().filter(|c| !c.is_whitespace()) {
            self.char_total += 1;
            if is_cjk(c) {
                self.cjk_total += 1;
            }
        }
    }

    /// Finalise ids, drop empty sections and attach the preamble.
    pub fn finish(mut self, fallback_title: Option<&str>, fallback_author: Option<&str>, page_count: usize) -> ContentBundle {
        self.flush_paragraph();

        if !self.preamble.is_empty() {
            let heading = if self.preamble[0].to_ascii_lowercase().starts_with("abstract") {
                "Abstract"
            } else {
                "Overview"
            };
            let spans = std::mem::take(&mut self.preamble);
            self.sections.insert(
                0,
                Section {
                    id: String::new(),
                    heading: heading.to_string(),
                    level: 1,
                    spans,
                    page: Some(1),
                },
            );
            shift_section_refs(&mut self.figures, &mut self.tables);
        }

        // Map old positions to new ids, skipping empty sections. Visuals in an
        // empty section move to the next non-empty one (or the last one).
        let mut kept: Vec<Section> = Vec::new();
        let mut remap: Vec<Option<usize>> = Vec::with_capacity(self.sections.len());
        for s in self.sections.into_iter() {
            if s.spans.is_empty() {
                remap.push(None);
            } else {
                remap.push(Some(kept.len()));
                kept.push(s);
            }
        }
        for (i, s) in kept.iter_mut().enumerate() {
            s.id = format!("sec-{}", i + 1);
        }
        let resolve = |old: &Option<String>| -> Option<String> {
            let old: usize = old.as_ref()?.parse().ok()?;
            let target = remap
                .iter()
                .skip(old)
                .find_map(|m| *m)
                .or_else(|| remap.iter().take(old).rev().find_map(|m| *m))?;
            Some(format!("sec-{}", target + 1))
        };

        let figures: Vec<FigureRef> = self
            .figures
            .into_values()
            .map(|mut f| {
                f.section = resolve(&f.section);
                f
            })
            .collect();
        let tables: Vec<TableRef> = self
            .tables
            .into_values()
            .filter(|t| !t.rows.is_empty() || !t.caption.is_empty())
            .map(|mut t| {
                t.section = resolve(&t.section);
                t
            })
            .collect();

        let language = if self.char_total > 0 && self.cjk_total * 10 >= self.char_total * 3 {
            Language::Zh
        } else {
            Language::En
        };

        let title = self
            .title
            .or_else(|| fallback_title.map(str::to_string))
            .unwrap_or_else(|| "Untitled paper".to_string());
        let authors = if self.authors.is_empty() {
            fallback_author.map(split_authors).unwrap_or_default()
        } else {
            self.authors
        };

        ContentBundle {
            metadata: PaperMetadata {
                title,
                authors,
                language,
                page_count,
            },
            sections: kept,
            figures,
            tables,
        }
    }
}

/// After inserting a section at position 0, every stored index moves by one.
fn shift_section_refs(figures: &mut BTreeMap<u32, FigureRef>, tables: &mut BTreeMap<u32, TableRef>) {
    let bump = |s: &mut Option<String>| {
        *s = match s.as_deref().and_then(|v| v.parse::<usize>().ok()) {
            Some(i) => Some((i + 1).to_string()),
            None => Some("0".to_string()),
        };
    };
    figures.values_mut().for_each(|f| bump(&mut f.section));
    tables.values_mut().for_each(|t| bump(&mut t.section));
}

fn is_cjk(c: char) -> bool {
    matches!(c as u32, 0x4E00..=0x9FFF | 0x3400..=0x4DBF | 0x3000..=0x303F | 0xFF00..=0xFFEF)
}

fn split_authors(line: &str) -> Vec<String> {
    line.replace(" and ", ",")
        .replace('，', ",")
        .split(',')
        .map(|a| RE_AUTHOR_MARKS.replace(a.trim(), "").trim().to_string())
        .filter(|a| !a.is_empty() && a.chars().count() < 60)
        .collect()
}

/// Split long text at sentence boundaries into spans of bounded size.
fn split_span(text: &str) -> Vec<String> {
    if text.chars().count() <= MAX_SPAN_CHARS {
        return vec![text.to_string()];
    }
    let mut spans = Vec::new();
    let mut current = String::new();
    for sentence in text.split_inclusive(['.', '。', '!', '?']) {
        if current.chars().count() + sentence.chars().count() > MAX_SPAN_CHARS && !current.is_empty() {
            spans.push(current.trim().to_string());
            current.clear();
        }
        current.push_str(sentence);
    }
    if !current.trim().is_empty() {
        spans.push(current.trim().to_string());
    }
    spans
}

fn parse_pipe_row(line: &str) -> Option<Vec<String>> {
    let t = line.trim();
    if !(t.starts_with('|') && t.ends_with('|') && t.len() > 2) {
        return None;
    }
    let inner = &t[1..t.len() - 1];
    Some(inner.split('|').map(|c| c.trim().to_string()).collect())
}

fn is_separator_row(cells: &[String]) -> bool {
    cells
        .iter()
        .all(|c| !c.is_empty() && c.chars().all(|ch| ch == '-' || ch == ':' || ch == ' '))
}

fn caption_number(caps: &regex::Captures<'_>) -> u32 {
    caps[1].parse().unwrap_or(0)
}

/// Parse cleaned Markdown transcripts, one entry per page in order.
pub fn parse_markdown(
    pages: &[(usize, String)],
    fallback_title: Option<&str>,
    fallback_author: Option<&str>,
    page_count: usize,
) -> ContentBundle {
    let mut b = BundleBuilder::new();
    let mut expect_authors = false;

    for (page_num, text) in pages {
        b.set_page(*page_num);
        for line in text.lines() {
            if let Some(cells) = parse_pipe_row(line) {
                if !is_separator_row(&cells) {
                    b.push_table_row(cells);
                }
                continue;
            }
            b.end_table();

            if let Some(caps) = RE_MD_HEADING.captures(line) {
                let level = caps[1].len();
                let heading = caps[2].trim_matches(|c| c == '*' || c == '_').trim();
                if level == 1 && !b.has_title() {
                    b.set_title(heading);
                    expect_authors = true;
                } else {
                    expect_authors = false;
                    b.start_section(heading, (level.saturating_sub(1)).max(1) as u8);
                }
                continue;
            }

            if let Some(caps) = RE_FIGURE_CAPTION.captures(line) {
                b.add_figure(caption_number(&caps), &caps[2]);
                continue;
            }
            if let Some(caps) = RE_TABLE_CAPTION.captures(line) {
                b.start_table(caption_number(&caps), &caps[2]);
                continue;
            }

            if expect_authors && !line.trim().is_empty() {
                expect_authors = false;
                if line.chars().count() < 200 && !line.trim_start().to_ascii_lowercase().starts_with("abstract") {
                    b.set_authors_line(line.trim().trim_matches('*'));
                    continue;
                }
            }
            b.push_line(line);
        }
        b.flush_paragraph();
    }

    b.finish(fallback_title, fallback_author, page_count)
}

/// Parse the raw PDF text layer, one entry per page in order.
pub fn parse_text_layer(
    pages: &[(usize, String)],
    fallback_title: Option<&str>,
    fallback_author: Option<&str>,
    page_count: usize,
) -> ContentBundle {
    let mut b = BundleBuilder::new();
    if let Some(t) = fallback_title {
        b.set_title(t);
    }
    let mut first_lines_seen = 0usize;

    for (page_num, text) in pages {
        b.set_page(*page_num);
        for raw in text.lines() {
            let line = raw.trim();

            // First lines of page 1: title (when metadata lacked one) then authors.
            if *page_num == 1 && first_lines_seen < 2 && !line.is_empty() {
                first_lines_seen += 1;
                if first_lines_seen == 1 && !b.has_title() {
                    b.set_title(line);
                    continue;
                }
                if first_lines_seen == 2 && fallback_author.is_none() && line.chars().count() < 200 {
                    b.set_authors_line(line);
                    continue;
                }
            }

            if let Some(caps) = RE_FIGURE_CAPTION.captures(line) {
                b.add_figure(caption_number(&caps), &caps[2]);
                continue;
            }
            if let Some(caps) = RE_TABLE_CAPTION.captures(line) {
                b.start_table(caption_number(&caps), &caps[2]);
                b.end_table();
                continue;
            }
            if let Some(caps) = RE_NUMBERED_HEADING.captures(line) {
                let level = caps[1].split('.').filter(|p| !p.is_empty()).count();
                b.start_section(&format!("{} {}", &caps[1], caps[2].trim()), level as u8);
                continue;
            }
            let lower = line.to_ascii_lowercase();
            if UNNUMBERED_HEADINGS.contains(&lower.trim_end_matches(':')) {
                b.start_section(line.trim_end_matches(':'), 1);
                continue;
            }
            b.push_line(line);
        }
        b.flush_paragraph();
    }

    b.finish(fallback_title, fallback_author, page_count)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE1: &str = "# Sparse Attention at Scale\n\nAda Lovelace1, Alan Turing2*\n\n## Abstract\n\nWe propose a sparse attention.\n\n## 1 Introduction\n\nLong documents are hard.\nThey need memory.\n\nFigure 1: Overview of the model.";
    const PAGE2: &str = "## 2 Method\n\n### 2.1 Blocks\n\nWe split tokens into blocks.\n\nTable 1: Main results\n\n| Model | Acc |\n| --- | --- |\n| Ours | 91.2 |\n\n## References\n\n[1] Someone. A paper. 2020.\n\nFigure 9: should be ignored";

    fn pages() -> Vec<(usize, String)> {
        vec![(1, PAGE1.to_string()), (2, PAGE2.to_string())]
    }

    #[test]
    fn markdown_title_authors_sections() {
        let b = parse_markdown(&pages(), None, None, 2);
        assert_eq!(b.metadata.title, "Sparse Attention at Scale");
        assert_eq!(b.metadata.authors, vec!["Ada Lovelace", "Alan Turing"]);
        let headings: Vec<_> = b.sections.iter().map(|s| s.heading.as_str()).collect();
        // "2 Method" has no text of its own and is dropped.
        assert_eq!(headings, vec!["Abstract", "1 Introduction", "2.1 Blocks"]);
        assert_eq!(b.sections[1].id, "sec-2");
        assert_eq!(b.sections[1].spans, vec!["Long documents are hard. They need memory."]);
    }

    #[test]
    fn markdown_figures_and_tables() {
        let b = parse_markdown(&pages(), None, None, 2);
        assert_eq!(b.figures.len(), 1, "reference-section captions are skipped");
        let fig = &b.figures[0];
        assert_eq!(fig.id, "fig-1");
        assert_eq!(fig.caption, "Overview of the model.");
        assert_eq!(fig.asset, "pages/page-1.png");
        assert_eq!(fig.section.as_deref(), Some("sec-2"));

        assert_eq!(b.tables.len(), 1);
        let t = &b.tables[0];
        assert_eq!(t.id, "tab-1");
        assert_eq!(t.rows, vec![vec!["Model", "Acc"], vec!["Ours", "91.2"]]);
        // "2 Method" was dropped, so "2.1 Blocks" is the third kept section.
        assert_eq!(t.section.as_deref(), Some("sec-3"));
    }

    #[test]
    fn preamble_becomes_overview() {
        let pages = vec![(1, "# T\n\nA. Author\n\nSome opening words.\n\n## 1 Intro\n\nBody.".to_string())];
        let b = parse_markdown(&pages, None, None, 1);
        assert_eq!(b.sections[0].heading, "Overview");
        assert_eq!(b.sections[0].id, "sec-1");
        assert_eq!(b.sections[1].heading, "1 Intro");
    }

    #[test]
    fn text_layer_numbered_headings() {
        let text = "Sparse Attention at Scale\nAda Lovelace, Alan Turing\nAbstract\nWe propose things.\n1 Introduction\nLong documents are hard.\nFigure 1: Overview.\n2.1 Training Setup\nWe train.";
        let b = parse_text_layer(&[(1, text.to_string())], None, None, 1);
        assert_eq!(b.metadata.title, "Sparse Attention at Scale");
        assert_eq!(b.metadata.authors.len(), 2);
        let headings: Vec<_> = b.sections.iter().map(|s| (s.heading.as_str(), s.level)).collect();
        assert_eq!(
            headings,
            vec![("Abstract", 1), ("1 Introduction", 1), ("2.1 Training Setup", 2)]
        );
        assert_eq!(b.figures[0].section.as_deref(), Some("sec-2"));
    }

    #[test]
    fn empty_heading_continues_current_section() {
        let pages = vec![(
            1,
            "# Paper Title\n\n## Introduction\n\nSome intro text.\n\n## **\n\nBody after a stray heading.".to_string(),
        )];
        let b = parse_markdown(&pages, None, None, 1);
        let headings: Vec<_> = b.sections.iter().map(|s| s.heading.as_str()).collect();
        assert_eq!(headings, vec!["Introduction"]);
        assert_eq!(
            b.sections[0].spans,
            vec!["Some intro text.", "Body after a stray heading."]
        );
    }

    #[test]
    fn chinese_text_detected() {
        let pages = vec![(1, "# 稀疏注意力\n\n## 引言\n\n长文档的建模非常困难，需要大量内存。".to_string())];
        let b = parse_markdown(&pages, None, None, 1);
        assert_eq!(b.metadata.language, Language::Zh);
    }

    #[test]
    fn long_paragraphs_are_split() {
        let sentence = "This sentence is exactly long enough to matter here. ";
        let text = sentence.repeat(40);
        let spans = split_span(&text);
        assert!(spans.len() > 1);
        assert!(spans.iter().all(|s| s.chars().count() <= MAX_SPAN_CHARS));
    }

    #[test]
    fn fallback_metadata_used() {
        let pages = vec![(1, "## 1 Intro\n\nBody.".to_string())];
        let b = parse_markdown(&pages, Some("Meta Title"), Some("X. Y and Z. W"), 1);
        assert_eq!(b.metadata.title, "Meta Title");
        assert_eq!(b.metadata.authors, vec!["X. Y", "Z. W"]);
    }
}
