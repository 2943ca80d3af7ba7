//! The structured content bundle produced by extraction.

use serde::{Deserialize, Serialize};

use crate::config::Language;

/// Stable section identifier, `sec-<n>` in document order.
pub type SectionId = String;

/// Extracted representation of the source paper. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentBundle {
    pub metadata: PaperMetadata,
    pub sections: Vec<Section>,
    #[serde(default)]
    pub figures: Vec<FigureRef>,
    #[serde(default)]
    pub tables: Vec<TableRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperMetadata {
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    pub language: Language,
    #[serde(default)]
    pub page_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub id: SectionId,
    pub heading: String,
    /// Heading depth, 1 = top-level.
    pub level: u8,
    /// Paragraph-sized text spans in reading order.
    pub spans: Vec<String>,
    /// 1-indexed page where the heading appears, if known.
    #[serde(default)]
    pub page: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FigureRef {
    pub id: String,
    /// Artifact name of the image in the session's raw namespace.
    pub asset: String,
    pub caption: String,
    #[serde(default)]
    pub section: Option<SectionId>,
    #[serde(default)]
    pub page: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRef {
    pub id: String,
    pub caption: String,
    pub rows: Vec<Vec<String>>,
    #[serde(default)]
    pub section: Option<SectionId>,
}

impl ContentBundle {
    pub fn section(&self, id: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.id == id)
    }

    pub fn figure(&self, id: &str) -> Option<&FigureRef> {
        self.figures.iter().find(|f| f.id == id)
    }

    pub fn table(&self, id: &str) -> Option<&TableRef> {
        self.tables.iter().find(|t| t.id == id)
    }

    /// Position of a section in document order.
    pub fn section_position(&self, id: &str) -> Option<usize> {
        self.sections.iter().position(|s| s.id == id)
    }

    /// Total words across all section spans.
    pub fn word_count(&self) -> usize {
        self.sections
            .iter()
            .flat_map(|s| s.spans.iter())
            .map(|span| span.split_whitespace().count())
            .sum()
    }

    /// True when there is nothing a planner could work from.
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

impl Section {
    /// The section text joined into a single string.
    pub fn text(&self) -> String {
        self.spans.join("\n\n")
    }
}
