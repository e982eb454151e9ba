//! One document in, one [`IngestResponse`] out.
//!
//! This is the boundary handed to whatever receives uploads. It never fails:
//! every error is folded into the response with its kind and stage.

use schemars::JsonSchema;

use crate::{
    analysis::AnalysisClient,
    errors::{AnalysisError, ErrorKind, ExtractionError, PageError},
    extract::{Document, Stage, pipeline::ExtractionPipeline},
    prelude::*,
    work::{WorkData, WorkStatus},
};

/// A fatal error, as reported to callers.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct ResponseError {
    /// What went wrong.
    pub kind: ErrorKind,

    /// The stage we were in.
    pub stage: Stage,

    /// Details for humans.
    pub message: String,
}

/// A page whose text is missing from the output.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct PageFailure {
    /// 1-based page index.
    pub page: usize,

    /// Either `rasterize_error` or `ocr_error`.
    pub kind: ErrorKind,

    pub message: String,
}

impl From<&PageError> for PageFailure {
    fn from(err: &PageError) -> Self {
        let message = match err {
            PageError::Rasterize { message, .. } | PageError::Ocr { message, .. } => {
                message.clone()
            }
        };
        Self {
            page: err.page(),
            kind: err.kind(),
            message,
        }
    }
}

/// The response for one ingested document.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct IngestResponse {
    /// A short summary for humans.
    pub message: String,

    /// Overall outcome. `incomplete` means we have usable text, but some
    /// pages were skipped or failed.
    pub status: WorkStatus,

    /// Did we have to OCR the document?
    pub ocr_used: bool,

    /// How many pages we processed. Zero if extraction failed.
    pub page_count: usize,

    /// Where the extracted text was written, if extraction succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<PathBuf>,

    /// Pages we could not OCR. Their text is empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub page_failures: Vec<PageFailure>,

    /// Non-fatal problems.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,

    /// The analysis output, if analysis was requested and succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Value>,

    /// The error that stopped us, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl WorkData for IngestResponse {
    fn status(&self) -> WorkStatus {
        self.status
    }
}

impl IngestResponse {
    /// A response for a document we could not extract text from.
    fn extraction_failed(err: &ExtractionError) -> Self {
        let page_failures = match err {
            ExtractionError::AllPagesFailed { failures, .. } => {
                failures.iter().map(PageFailure::from).collect()
            }
            _ => vec![],
        };
        Self {
            message: "Text extraction failed".to_owned(),
            status: WorkStatus::Failed,
            ocr_used: matches!(err, ExtractionError::AllPagesFailed { .. }),
            page_count: 0,
            artifact_path: None,
            page_failures,
            warnings: vec![],
            results: None,
            error: Some(ResponseError {
                kind: err.kind(),
                stage: err.stage(),
                message: err.to_string(),
            }),
        }
    }
}

/// Extract the text of `document` and, if `analysis` is given, analyze it.
#[instrument(level = "debug", skip_all, fields(path = %document.path.display()))]
pub async fn ingest_document(
    pipeline: &ExtractionPipeline,
    analysis: Option<&AnalysisClient>,
    document: Document,
) -> IngestResponse {
    let report = match pipeline.run(document).await {
        Ok(report) => report,
        Err(err) => {
            error!(stage = %err.stage(), "{}", err);
            return IngestResponse::extraction_failed(&err);
        }
    };

    let degraded = !report.page_failures.is_empty() || !report.warnings.is_empty();
    let mut response = IngestResponse {
        message: "Text extracted successfully".to_owned(),
        status: if degraded {
            WorkStatus::Incomplete
        } else {
            WorkStatus::Ok
        },
        ocr_used: report.result.is_scanned,
        page_count: report.result.page_count,
        artifact_path: Some(report.artifact_path),
        page_failures: report.page_failures.iter().map(PageFailure::from).collect(),
        warnings: report.warnings,
        results: None,
        error: None,
    };

    let Some(analysis) = analysis else {
        return response;
    };
    debug!(stage = %Stage::Analyzing, "Entering stage");
    let outcome = if report.result.full_text.trim().is_empty() {
        Err(AnalysisError::Process("no text to analyze".to_owned()))
    } else {
        analysis.analyze(&report.result.full_text).await
    };
    match outcome {
        Ok(results) => {
            response.message = "Text extracted and analyzed successfully".to_owned();
            response.results = Some(results);
        }
        Err(err) => {
            error!(kind = ?err.kind(), "{}", err);
            response.message = "Text extracted but analysis failed".to_owned();
            response.status = WorkStatus::Failed;
            response.error = Some(ResponseError {
                kind: err.kind(),
                stage: Stage::Analyzing,
                message: err.message().to_owned(),
            });
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::{
        analysis::AnalysisConfig,
        extract::{
            DigitalText, PageText,
            artifact::{ArtifactNaming, ArtifactStore},
            engines::{
                DigitalTextExtractor, Engines, OcrEngine, PageRasterizer, RasterizedPage,
            },
            pipeline::PipelineOptions,
        },
    };

    /// Serves fixed digital text, or a parse error when `None`.
    struct StaticText(Option<String>);

    #[async_trait]
    impl DigitalTextExtractor for StaticText {
        async fn extract(
            &self,
            document: &Document,
        ) -> Result<DigitalText, ExtractionError> {
            match &self.0 {
                Some(text) => Ok(DigitalText {
                    page_count: 1,
                    pages: vec![PageText {
                        page_index: 1,
                        text: text.clone(),
                    }],
                }),
                None => Err(ExtractionError::Parse {
                    path: document.path.clone(),
                    message: "no such document".to_owned(),
                }),
            }
        }
    }

    /// Fails every page, so scanned documents always fail.
    struct BrokenRasterizer;

    #[async_trait]
    impl PageRasterizer for BrokenRasterizer {
        async fn rasterize(
            &self,
            _document: &Document,
            page_index: usize,
            _work_dir: &Path,
            _timeout: std::time::Duration,
        ) -> Result<RasterizedPage, PageError> {
            Err(PageError::Rasterize {
                page: page_index,
                message: "no renderer".to_owned(),
            })
        }
    }

    struct BlankOcr;

    #[async_trait]
    impl OcrEngine for BlankOcr {
        async fn recognize(
            &self,
            _image: &RasterizedPage,
            _language: &str,
            _timeout: std::time::Duration,
        ) -> Result<String, PageError> {
            Ok(String::new())
        }
    }

    fn pipeline(tmp: &tempfile::TempDir, digital: Option<&str>) -> ExtractionPipeline {
        ExtractionPipeline::new(
            Engines {
                digital: Arc::new(StaticText(digital.map(str::to_owned))),
                rasterizer: Arc::new(BrokenRasterizer),
                ocr: Arc::new(BlankOcr),
            },
            PipelineOptions::default(),
            ArtifactStore::new(tmp.path().join("extracted"), ArtifactNaming::Shared),
        )
    }

    fn analyzer(script: &str) -> AnalysisClient {
        AnalysisClient::new(AnalysisConfig {
            program: "sh".into(),
            args: vec!["-c".to_owned(), script.to_owned()],
            timeout_secs: 10,
        })
    }

    fn long_text() -> String {
        "The parties agree to the following terms. ".repeat(5)
    }

    #[tokio::test]
    async fn extraction_only() -> Result<()> {
        let tmp = tempfile::TempDir::new()?;
        let response =
            ingest_document(&pipeline(&tmp, Some(&long_text())), None, Document::new("a.pdf", None))
                .await;
        assert_eq!(response.status, WorkStatus::Ok);
        assert_eq!(response.message, "Text extracted successfully");
        assert!(!response.ocr_used);
        assert_eq!(response.page_count, 1);
        assert!(response.results.is_none());
        assert!(response.error.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn analysis_results_are_included() -> Result<()> {
        let tmp = tempfile::TempDir::new()?;
        let client = analyzer(r#"cat > /dev/null; echo '{"sentiment":"neutral"}'"#);
        let response = ingest_document(
            &pipeline(&tmp, Some(&long_text())),
            Some(&client),
            Document::new("a.pdf", None),
        )
        .await;
        assert_eq!(response.status, WorkStatus::Ok);
        assert_eq!(response.message, "Text extracted and analyzed successfully");
        assert_eq!(response.results, Some(json!({ "sentiment": "neutral" })));
        Ok(())
    }

    #[tokio::test]
    async fn analysis_diagnostics_fail_the_response() -> Result<()> {
        let tmp = tempfile::TempDir::new()?;
        let client =
            analyzer(r#"cat > /dev/null; echo '{"sentiment":"neutral"}'; echo boom >&2"#);
        let response = ingest_document(
            &pipeline(&tmp, Some(&long_text())),
            Some(&client),
            Document::new("a.pdf", None),
        )
        .await;
        assert_eq!(response.status, WorkStatus::Failed);
        assert_eq!(response.message, "Text extracted but analysis failed");
        assert!(response.results.is_none());
        // Extraction results survive an analysis failure.
        assert!(response.artifact_path.is_some());
        assert_eq!(response.page_count, 1);
        let error = response.error.expect("error should be set");
        assert_eq!(error.kind, ErrorKind::AnalysisProcessError);
        assert_eq!(error.stage, Stage::Analyzing);
        assert_eq!(error.message, "boom\n");
        Ok(())
    }

    #[tokio::test]
    async fn parse_failure_is_reported_as_extraction_failed() -> Result<()> {
        let tmp = tempfile::TempDir::new()?;
        let response =
            ingest_document(&pipeline(&tmp, None), None, Document::new("gone.pdf", None)).await;
        assert_eq!(response.status, WorkStatus::Failed);
        assert_eq!(response.message, "Text extraction failed");
        let error = response.error.expect("error should be set");
        assert_eq!(error.kind, ErrorKind::ExtractionFailed);
        assert_eq!(error.stage, Stage::ParsingDigital);
        assert!(error.message.contains("no such document"));
        Ok(())
    }

    #[tokio::test]
    async fn all_pages_failing_lists_page_failures() -> Result<()> {
        let tmp = tempfile::TempDir::new()?;
        let response =
            ingest_document(&pipeline(&tmp, Some("")), None, Document::new("scan.pdf", None))
                .await;
        assert_eq!(response.status, WorkStatus::Failed);
        assert!(response.ocr_used);
        assert_eq!(response.page_failures.len(), 1);
        assert_eq!(response.page_failures[0].kind, ErrorKind::RasterizeError);
        assert_eq!(
            response.error.map(|e| e.stage),
            Some(Stage::RasterizingAndOcr)
        );
        Ok(())
    }

    #[tokio::test]
    async fn empty_text_is_not_sent_for_analysis() -> Result<()> {
        let tmp = tempfile::TempDir::new()?;
        let marker = tmp.path().join("ran");
        let client = analyzer(&format!("touch {:?}; echo '{{}}'", marker));
        let pipeline = ExtractionPipeline::new(
            Engines {
                digital: Arc::new(StaticText(Some(String::new()))),
                rasterizer: Arc::new(BrokenRasterizer),
                ocr: Arc::new(BlankOcr),
            },
            PipelineOptions {
                scan_threshold: 0,
                ..PipelineOptions::default()
            },
            ArtifactStore::new(tmp.path().join("extracted"), ArtifactNaming::Shared),
        );
        let response =
            ingest_document(&pipeline, Some(&client), Document::new("blank.pdf", None)).await;
        let error = response.error.expect("error should be set");
        assert_eq!(error.kind, ErrorKind::AnalysisProcessError);
        assert_eq!(error.message, "no text to analyze");
        assert!(!marker.exists());
        Ok(())
    }

    #[test]
    fn response_serializes_with_snake_case_kinds() -> Result<()> {
        let response = IngestResponse {
            message: "Text extracted successfully".to_owned(),
            status: WorkStatus::Incomplete,
            ocr_used: true,
            page_count: 2,
            artifact_path: Some("extracted/full_text.txt".into()),
            page_failures: vec![PageFailure {
                page: 2,
                kind: ErrorKind::OcrError,
                message: "timed out after 120s".to_owned(),
            }],
            warnings: vec![],
            results: None,
            error: None,
        };
        let value = serde_json::to_value(&response)?;
        assert_eq!(value["status"], "incomplete");
        assert_eq!(value["page_failures"][0]["kind"], "ocr_error");
        assert!(value.get("results").is_none());
        Ok(())
    }
}
