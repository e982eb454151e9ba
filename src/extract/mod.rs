//! Document text extraction: digital text when there is any, OCR when the
//! document looks scanned.

use std::fmt;

use schemars::JsonSchema;

use crate::prelude::*;

pub mod artifact;
pub mod engines;
pub mod pipeline;
pub mod scan_detect;

/// Separator placed between pages in aggregated text.
pub const PAGE_SEPARATOR: &str = "\n\n";

/// A stored document we've been asked to extract text from.
#[derive(Clone, Debug)]
pub struct Document {
    /// Where the document lives on disk.
    pub path: PathBuf,

    /// The password needed to open the document, if any.
    pub password: Option<String>,

    /// The number of pages we will process. Unknown until the digital parse
    /// has run.
    pub page_count: Option<usize>,
}

impl Document {
    /// Create a new document reference.
    pub fn new(path: impl Into<PathBuf>, password: Option<String>) -> Self {
        Self {
            path: path.into(),
            password,
            page_count: None,
        }
    }
}

/// The text of a single page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageText {
    /// 1-based page index.
    pub page_index: usize,

    /// The text found on the page. May be empty.
    pub text: String,
}

/// The output of digital text extraction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DigitalText {
    /// How many pages the document has.
    pub page_count: usize,

    /// One entry per page, in page order.
    pub pages: Vec<PageText>,
}

/// The result of extracting text from a whole document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractionResult {
    /// Did we have to fall back to OCR?
    pub is_scanned: bool,

    /// How many pages contributed to `full_text`.
    pub page_count: usize,

    /// Page texts in page order, separated by [`PAGE_SEPARATOR`].
    pub full_text: String,
}

impl ExtractionResult {
    /// Aggregate page texts. `pages` must already be in page order.
    pub fn from_pages(is_scanned: bool, pages: &[PageText]) -> Self {
        Self {
            is_scanned,
            page_count: pages.len(),
            full_text: join_pages(pages),
        }
    }
}

/// Join page texts with [`PAGE_SEPARATOR`].
pub fn join_pages(pages: &[PageText]) -> String {
    pages
        .iter()
        .map(|p| p.text.as_str())
        .collect::<Vec<_>>()
        .join(PAGE_SEPARATOR)
}

/// Stages of the extraction state machine.
#[derive(
    Clone, Copy, Debug, Deserialize, JsonSchema, PartialEq, Eq, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    ParsingDigital,
    Classifying,
    ExtractingDigitalText,
    RasterizingAndOcr,
    Aggregating,
    Persisting,
    Done,
    Analyzing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::ParsingDigital => "parsing digital text",
            Stage::Classifying => "classifying",
            Stage::ExtractingDigitalText => "extracting digital text",
            Stage::RasterizingAndOcr => "rasterizing and OCRing pages",
            Stage::Aggregating => "aggregating",
            Stage::Persisting => "persisting",
            Stage::Done => "done",
            Stage::Analyzing => "analyzing",
        };
        f.write_str(name)
    }
}
