//! Interfaces to the tools that read, render and recognize pages.
//!
//! The pipeline only talks to the traits in this file. The implementations
//! wrap poppler's command-line tools and `tesseract`.

use std::{
    sync::{Arc, LazyLock},
    time::Duration,
};

use clap::Args;
use regex::Regex;

use crate::{
    errors::{ExtractionError, PageError},
    prelude::*,
};

use super::{DigitalText, Document};

pub mod pdftocairo;
pub mod pdftotext;
pub mod tesseract;

/// A default error regex for checking poppler's output.
static ERROR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)error").expect("failed to compile regex"));

/// Poppler complains about this on many PDFs it can still render correctly.
static DOWNGRADE_TO_WARNING_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)error: xref num").expect("failed to compile regex")
});

/// Does this line of poppler output contain an error?
pub fn is_error_line(line: &str) -> bool {
    ERROR_REGEX.is_match(line) && !DOWNGRADE_TO_WARNING_REGEX.is_match(line)
}

/// A page rendered to an image on disk.
#[derive(Clone, Debug)]
pub struct RasterizedPage {
    /// 1-based page index.
    pub page_index: usize,

    /// The rendered image.
    pub path: PathBuf,
}

/// Reads the text layer of a document without rendering it.
#[async_trait]
pub trait DigitalTextExtractor: Send + Sync + 'static {
    /// Extract the text of every page, in page order.
    async fn extract(&self, document: &Document) -> Result<DigitalText, ExtractionError>;
}

/// Renders a single page to an image.
#[async_trait]
pub trait PageRasterizer: Send + Sync + 'static {
    /// Render `page_index` (1-based) of `document` into `work_dir`, giving
    /// up once rendering has run for `timeout`.
    async fn rasterize(
        &self,
        document: &Document,
        page_index: usize,
        work_dir: &Path,
        timeout: Duration,
    ) -> Result<RasterizedPage, PageError>;
}

/// Recognizes text in a page image.
#[async_trait]
pub trait OcrEngine: Send + Sync + 'static {
    /// Recognize the text in `image`, written in `language`, giving up once
    /// recognition has run for `timeout`.
    async fn recognize(
        &self,
        image: &RasterizedPage,
        language: &str,
        timeout: Duration,
    ) -> Result<String, PageError>;
}

/// Options for rendering pages before OCR.
#[derive(Args, Clone, Debug)]
pub struct RasterizeOptions {
    /// The DPI to use for rasterization.
    #[clap(long, default_value = "300")]
    pub rasterize_dpi: u32,

    /// Width, in pixels, to scale rendered pages to.
    #[clap(long, default_value = "1700")]
    pub rasterize_width: u32,

    /// Height, in pixels, to scale rendered pages to.
    #[clap(long, default_value = "2200")]
    pub rasterize_height: u32,
}

impl Default for RasterizeOptions {
    fn default() -> Self {
        Self {
            rasterize_dpi: 300,
            rasterize_width: 1700,
            rasterize_height: 2200,
        }
    }
}

/// The engines used by a pipeline.
#[derive(Clone)]
pub struct Engines {
    pub digital: Arc<dyn DigitalTextExtractor>,
    pub rasterizer: Arc<dyn PageRasterizer>,
    pub ocr: Arc<dyn OcrEngine>,
}

impl Engines {
    /// The standard engines: `pdftotext`, `pdftocairo` and `tesseract`.
    pub fn poppler_and_tesseract(rasterize_opts: &RasterizeOptions) -> Self {
        Self {
            digital: Arc::new(pdftotext::PdfToTextExtractor::new()),
            rasterizer: Arc::new(pdftocairo::PdfToCairoRasterizer::new(
                rasterize_opts.clone(),
            )),
            ocr: Arc::new(tesseract::TesseractOcrEngine::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_error_line_works() {
        assert!(is_error_line("error: something went wrong"));
        assert!(is_error_line("Syntax Error: Couldn't find trailer dictionary"));
        assert!(!is_error_line("Syntax Warning: something is odd"));
        assert!(!is_error_line(
            "Internal Error: xref num 1234 not found but needed, document has changes, reconstruct aborted"
        ));
    }
}
