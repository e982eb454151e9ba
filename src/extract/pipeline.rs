//! The extraction pipeline: digital parse, classification, OCR fallback,
//! aggregation and persistence.

use std::time::Duration;

use futures::{StreamExt as _, stream};

use crate::{
    errors::{ExtractionError, PageError},
    prelude::*,
    ui::{ProgressConfig, Ui},
};

use super::{
    Document, ExtractionResult, PageText, Stage,
    artifact::ArtifactStore,
    engines::Engines,
    scan_detect::{Classification, DEFAULT_SCAN_THRESHOLD, classify},
};

/// Tunables for a pipeline run.
#[derive(Clone, Debug)]
pub struct PipelineOptions {
    /// Documents with less digital text than this (in characters) are OCRed.
    pub scan_threshold: usize,

    /// Language passed to the OCR engine.
    pub ocr_language: String,

    /// How many pages may be rasterized and OCRed at once.
    pub page_jobs: usize,

    /// Time limit for each rasterize call and each OCR call, not counting
    /// time spent waiting for a CPU permit.
    pub page_timeout: Duration,

    /// Process at most this many pages.
    pub max_pages: Option<usize>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            scan_threshold: DEFAULT_SCAN_THRESHOLD,
            ocr_language: "eng".to_owned(),
            page_jobs: 4,
            page_timeout: Duration::from_secs(120),
            max_pages: None,
        }
    }
}

/// Everything we learned from a successful run.
#[derive(Clone, Debug)]
pub struct ExtractionReport {
    /// The aggregated text.
    pub result: ExtractionResult,

    /// Pages that could not be rasterized or OCRed. Their text is empty.
    pub page_failures: Vec<PageError>,

    /// Non-fatal problems, such as skipped pages.
    pub warnings: Vec<String>,

    /// Where we wrote `result.full_text`.
    pub artifact_path: PathBuf,
}

/// Extracts text from one document at a time. Cheap to share between
/// concurrent requests; every run owns its own pages and page images.
pub struct ExtractionPipeline {
    engines: Engines,
    opts: PipelineOptions,
    artifacts: ArtifactStore,
    ui: Option<Ui>,
}

impl ExtractionPipeline {
    /// Create a new pipeline.
    pub fn new(engines: Engines, opts: PipelineOptions, artifacts: ArtifactStore) -> Self {
        Self {
            engines,
            opts,
            artifacts,
            ui: None,
        }
    }

    /// Show OCR progress using `ui`.
    pub fn with_ui(mut self, ui: Ui) -> Self {
        self.ui = Some(ui);
        self
    }

    /// Extract, aggregate and persist the text of `document`.
    #[instrument(level = "debug", skip_all, fields(path = %document.path.display()))]
    pub async fn run(
        &self,
        mut document: Document,
    ) -> Result<ExtractionReport, ExtractionError> {
        let mut warnings = vec![];

        enter(Stage::ParsingDigital);
        let digital = self.engines.digital.extract(&document).await?;
        if digital.page_count == 0 {
            return Err(ExtractionError::NoPages {
                path: document.path.clone(),
            });
        }
        let mut pages = digital.pages;
        let mut page_count = digital.page_count;
        if let Some(max_pages) = self.opts.max_pages
            && page_count > max_pages
        {
            warnings.push(format!(
                "Only {}/{} pages processed (because of --max-pages)",
                max_pages, page_count
            ));
            pages.truncate(max_pages);
            page_count = max_pages;
        }
        document.page_count = Some(page_count);

        enter(Stage::Classifying);
        // Page separators aren't extracted text, so they must not count.
        let digital_text = pages.iter().map(|p| p.text.as_str()).collect::<String>();
        let classification = classify(&digital_text, self.opts.scan_threshold);
        debug!(?classification, page_count, "Classified document");

        let (pages, page_failures) = match classification {
            Classification::Digital => {
                enter(Stage::ExtractingDigitalText);
                (pages, vec![])
            }
            Classification::Scanned => {
                enter(Stage::RasterizingAndOcr);
                // The digital text is near-empty, so it's dropped entirely.
                drop(pages);
                self.ocr_pages(&document, page_count).await?
            }
        };

        enter(Stage::Aggregating);
        let result =
            ExtractionResult::from_pages(classification == Classification::Scanned, &pages);

        enter(Stage::Persisting);
        let artifact_path = self.artifacts.persist(&result.full_text).await?;

        enter(Stage::Done);
        info!(
            path = %document.path.display(),
            is_scanned = result.is_scanned,
            page_count = result.page_count,
            failed_pages = page_failures.len(),
            "Extracted text"
        );
        Ok(ExtractionReport {
            result,
            page_failures,
            warnings,
            artifact_path,
        })
    }

    /// Rasterize and OCR every page, up to `page_jobs` pages at a time.
    ///
    /// Failed pages get empty text and are returned as failures, unless every
    /// page fails.
    async fn ocr_pages(
        &self,
        document: &Document,
        page_count: usize,
    ) -> Result<(Vec<PageText>, Vec<PageError>), ExtractionError> {
        let work_dir = tempfile::TempDir::with_prefix("pages").map_err(|err| {
            ExtractionError::WorkingArea {
                message: err.to_string(),
            }
        })?;
        let pb = self.ui.as_ref().map(|ui| {
            ui.new_progress_bar(
                &ProgressConfig {
                    emoji: "🔍",
                    msg: "OCRing pages",
                    done_msg: "OCRed pages",
                },
                page_count as u64,
            )
        });

        // Indexed by page, so completion order never affects output order.
        let mut texts = vec![String::new(); page_count];
        let mut failures = vec![];
        let mut outcomes = stream::iter(1..=page_count)
            .map(|page_index| {
                let work_dir = work_dir.path();
                async move { (page_index, self.ocr_page(document, page_index, work_dir).await) }
            })
            .buffer_unordered(self.opts.page_jobs.max(1));
        while let Some((page_index, outcome)) = outcomes.next().await {
            match outcome {
                Ok(text) => texts[page_index - 1] = text,
                Err(err) => {
                    warn!(page = page_index, kind = ?err.kind(), "{}", err);
                    failures.push(err);
                }
            }
            if let Some(pb) = &pb {
                pb.inc(1);
            }
        }
        drop(outcomes);
        if let Some(pb) = pb {
            pb.finish_using_style();
        }

        failures.sort_by_key(PageError::page);
        if failures.len() == page_count {
            return Err(ExtractionError::AllPagesFailed {
                page_count,
                failures,
            });
        }

        let pages = texts
            .into_iter()
            .enumerate()
            .map(|(idx, text)| PageText {
                page_index: idx + 1,
                text,
            })
            .collect();
        Ok((pages, failures))
    }

    /// Rasterize and OCR a single page. Each external call is attempted once.
    ///
    /// The engines apply `page_timeout` themselves, once they hold a CPU
    /// permit, so time spent queueing for a core never counts against a page.
    #[instrument(level = "debug", skip_all, fields(page = page_index))]
    async fn ocr_page(
        &self,
        document: &Document,
        page_index: usize,
        work_dir: &Path,
    ) -> Result<String, PageError> {
        let timeout = self.opts.page_timeout;
        let image = self
            .engines
            .rasterizer
            .rasterize(document, page_index, work_dir, timeout)
            .await?;
        let text = self
            .engines
            .ocr
            .recognize(&image, &self.opts.ocr_language, timeout)
            .await;

        // Recover disk space early; the work directory is removed at the end
        // of the run anyway.
        if let Err(err) = tokio::fs::remove_file(&image.path).await {
            trace!(path = %image.path.display(), "could not remove page image: {}", err);
        }
        text
    }
}

/// Record a stage transition.
fn enter(stage: Stage) {
    debug!(%stage, "Entering stage");
}
