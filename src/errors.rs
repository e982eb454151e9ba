//! Typed failures for each stage of ingestion.
//!
//! Stage-local failures ([`PageError`]) are recovered inside the pipeline.
//! Everything else is surfaced to the caller with a distinct [`ErrorKind`].

use schemars::JsonSchema;

use crate::{extract::Stage, prelude::*};

/// The kinds of failure we report to callers.
#[derive(Clone, Copy, Debug, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The document could not be read, or no page could be recognized.
    ExtractionFailed,
    /// A page could not be rendered to an image.
    RasterizeError,
    /// A rendered page could not be recognized.
    OcrError,
    /// The analysis process reported a diagnostic, failed, or timed out.
    AnalysisProcessError,
    /// The analysis process printed something other than a JSON object or array.
    AnalysisMalformedOutput,
}

/// A failure affecting a single page of a scanned document.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum PageError {
    #[error("could not rasterize page {page}: {message}")]
    Rasterize { page: usize, message: String },

    #[error("could not OCR page {page}: {message}")]
    Ocr { page: usize, message: String },
}

impl PageError {
    /// The 1-based page this failure belongs to.
    pub fn page(&self) -> usize {
        match self {
            PageError::Rasterize { page, .. } | PageError::Ocr { page, .. } => *page,
        }
    }

    /// How should we report this failure?
    pub fn kind(&self) -> ErrorKind {
        match self {
            PageError::Rasterize { .. } => ErrorKind::RasterizeError,
            PageError::Ocr { .. } => ErrorKind::OcrError,
        }
    }
}

/// A failure that aborts text extraction for a whole document.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("could not parse {path:?}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("{path:?} has no pages")]
    NoPages { path: PathBuf },

    #[error("OCR failed on all {page_count} pages")]
    AllPagesFailed {
        page_count: usize,
        failures: Vec<PageError>,
    },

    #[error("could not prepare a working directory for page images: {message}")]
    WorkingArea { message: String },

    #[error("could not write extracted text to {path:?}: {message}")]
    Persist { path: PathBuf, message: String },
}

impl ExtractionError {
    /// The pipeline stage in which this error stopped the run.
    pub fn stage(&self) -> Stage {
        match self {
            ExtractionError::Parse { .. } | ExtractionError::NoPages { .. } => {
                Stage::ParsingDigital
            }
            ExtractionError::AllPagesFailed { .. } | ExtractionError::WorkingArea { .. } => {
                Stage::RasterizingAndOcr
            }
            ExtractionError::Persist { .. } => Stage::Persisting,
        }
    }

    /// Every extraction error is reported as [`ErrorKind::ExtractionFailed`].
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ExtractionFailed
    }
}

/// A failure calling the external analysis process. The extracted text is
/// still valid when this happens.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum AnalysisError {
    #[error("analysis process failed: {0}")]
    Process(String),

    #[error("analysis process returned malformed output: {0}")]
    MalformedOutput(String),
}

impl AnalysisError {
    /// How should we report this failure?
    pub fn kind(&self) -> ErrorKind {
        match self {
            AnalysisError::Process(_) => ErrorKind::AnalysisProcessError,
            AnalysisError::MalformedOutput(_) => ErrorKind::AnalysisMalformedOutput,
        }
    }

    /// The diagnostic text, without our prefix.
    pub fn message(&self) -> &str {
        match self {
            AnalysisError::Process(msg) | AnalysisError::MalformedOutput(msg) => msg,
        }
    }
}
