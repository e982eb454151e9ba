//! Command-line entry points, and the options they share.

use std::time::Duration;

use clap::Args;
use futures::StreamExt as _;

use crate::{
    analysis::AnalysisConfig,
    async_utils::{BoxedStream, io::read_json_or_toml},
    extract::{
        artifact::{ArtifactNaming, ArtifactStore, DEFAULT_ARTIFACT_DIR},
        engines::{Engines, RasterizeOptions},
        pipeline::{ExtractionPipeline, PipelineOptions},
        scan_detect::DEFAULT_SCAN_THRESHOLD,
    },
    prelude::*,
    ui::Ui,
};

pub mod analyze;
pub mod batch;
pub mod extract;
pub mod schema;

/// Common options for subcommands that process data streams.
#[derive(Debug, Clone, Args)]
pub struct StreamOpts {
    /// Limit processing to the first N records.
    #[clap(long)]
    pub take_first: Option<usize>,

    /// Max number of documents to process at a time.
    #[clap(short = 'j', long = "jobs", default_value = "4")]
    pub job_count: usize,

    /// What portion of inputs should we allow to fail? Specified as a
    /// number between 0.0 and 1.0.
    #[clap(long, default_value = "0.01")]
    pub allowed_failure_rate: f32,
}

impl StreamOpts {
    /// Apply any necessary stream opts to our input stream.
    pub fn apply_stream_input_opts<T>(
        &self,
        input: BoxedStream<Result<T>>,
    ) -> BoxedStream<Result<T>>
    where
        T: 'static,
    {
        if let Some(take_first) = self.take_first {
            input.take(take_first).boxed()
        } else {
            input
        }
    }
}

/// OCR options.
#[derive(Debug, Clone, Args)]
pub struct OcrOptions {
    /// Language code(s) passed to `tesseract`, like `eng` or `eng+fra`.
    #[clap(long, default_value = "eng")]
    pub ocr_language: String,

    /// Give up on rendering or recognizing a page after this many seconds.
    #[clap(long, default_value = "120")]
    pub ocr_timeout: u64,

    /// Max number of pages of one document to OCR at a time.
    #[clap(long, default_value = "4")]
    pub page_jobs: usize,
}

/// Options controlling text extraction.
#[derive(Debug, Clone, Args)]
pub struct PipelineOpts {
    /// Treat documents with fewer than this many characters of digital text
    /// as scanned.
    #[clap(long, default_value_t = DEFAULT_SCAN_THRESHOLD)]
    pub scan_threshold: usize,

    /// Directory to write extracted text to.
    #[clap(long, default_value = DEFAULT_ARTIFACT_DIR)]
    pub artifact_dir: PathBuf,

    /// How to name extracted text files. Defaults to `shared` for single
    /// documents and `per-request` for batches.
    #[clap(long, value_enum)]
    pub artifact_naming: Option<ArtifactNaming>,

    /// Only process the first N pages of each document. Must be at least 1.
    #[clap(long, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    pub max_pages: Option<usize>,

    #[clap(flatten)]
    pub rasterize: RasterizeOptions,

    #[clap(flatten)]
    pub ocr: OcrOptions,
}

impl PipelineOpts {
    /// Build a pipeline using our standard engines.
    pub fn build_pipeline(
        &self,
        ui: Option<Ui>,
        default_naming: ArtifactNaming,
    ) -> ExtractionPipeline {
        let opts = PipelineOptions {
            scan_threshold: self.scan_threshold,
            ocr_language: self.ocr.ocr_language.clone(),
            page_jobs: self.ocr.page_jobs,
            page_timeout: Duration::from_secs(self.ocr.ocr_timeout),
            max_pages: self.max_pages,
        };
        let artifacts = ArtifactStore::new(
            &self.artifact_dir,
            self.artifact_naming.unwrap_or(default_naming),
        );
        let pipeline = ExtractionPipeline::new(
            Engines::poppler_and_tesseract(&self.rasterize),
            opts,
            artifacts,
        );
        match ui {
            Some(ui) => pipeline.with_ui(ui),
            None => pipeline,
        }
    }
}

/// Options for finding the analysis process.
#[derive(Debug, Clone, Default, Args)]
pub struct AnalysisOpts {
    /// The analysis program to run.
    #[clap(long, env = "ANALYSIS_PROGRAM")]
    pub analysis_program: Option<PathBuf>,

    /// An argument to pass to the analysis program. May be repeated.
    #[clap(long = "analysis-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub analysis_args: Vec<String>,

    /// A TOML or JSON file with `program`, `args` and `timeout_secs`.
    /// Command-line options take precedence.
    #[clap(long)]
    pub analysis_config: Option<PathBuf>,

    /// Kill the analysis process after this many seconds.
    #[clap(long)]
    pub analysis_timeout: Option<u64>,
}

impl AnalysisOpts {
    /// Combine our config file and command-line options. Returns `None` if
    /// no analysis program was configured.
    pub async fn resolve(&self) -> Result<Option<AnalysisConfig>> {
        let from_file = match &self.analysis_config {
            Some(path) => Some(read_json_or_toml::<AnalysisConfig>(path).await?),
            None => None,
        };
        let mut config = match (&self.analysis_program, from_file) {
            (Some(program), Some(mut config)) => {
                config.program = program.clone();
                config
            }
            (Some(program), None) => AnalysisConfig::new(program.clone()),
            (None, Some(config)) => config,
            (None, None) => return Ok(None),
        };
        if !self.analysis_args.is_empty() {
            config.args = self.analysis_args.clone();
        }
        if let Some(timeout_secs) = self.analysis_timeout {
            config.timeout_secs = timeout_secs;
        }
        debug!(?config, "Resolved analysis config");
        Ok(Some(config))
    }

    /// Like [`AnalysisOpts::resolve`], but fail if nothing is configured.
    pub async fn resolve_required(&self) -> Result<AnalysisConfig> {
        self.resolve().await?.ok_or_else(|| {
            anyhow!(
                "no analysis program configured (use --analysis-program, \
                 --analysis-config or ANALYSIS_PROGRAM)"
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Debug, Parser)]
    struct PipelineArgs {
        #[clap(flatten)]
        pipeline: PipelineOpts,
    }

    #[test]
    fn max_pages_must_be_positive() {
        assert!(PipelineArgs::try_parse_from(["doc-ingest", "--max-pages", "0"]).is_err());
        let args = PipelineArgs::try_parse_from(["doc-ingest", "--max-pages", "3"])
            .expect("3 pages should be accepted");
        assert_eq!(args.pipeline.max_pages, Some(3));
        let args = PipelineArgs::try_parse_from(["doc-ingest"]).expect("defaults should parse");
        assert_eq!(args.pipeline.max_pages, None);
    }

    #[tokio::test]
    async fn nothing_configured_means_no_analysis() -> Result<()> {
        assert_eq!(AnalysisOpts::default().resolve().await?, None);
        assert!(AnalysisOpts::default().resolve_required().await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn command_line_overrides_config_file() -> Result<()> {
        let tmp = tempfile::TempDir::new()?;
        let path = tmp.path().join("analysis.toml");
        std::fs::write(
            &path,
            "program = \"python3\"\nargs = [\"analyze.py\"]\ntimeout_secs = 60\n",
        )?;

        let opts = AnalysisOpts {
            analysis_config: Some(path.clone()),
            ..AnalysisOpts::default()
        };
        let config = opts.resolve_required().await?;
        assert_eq!(config.program, Path::new("python3"));
        assert_eq!(config.args, vec!["analyze.py"]);
        assert_eq!(config.timeout_secs, 60);

        let opts = AnalysisOpts {
            analysis_program: Some("/opt/venv/bin/python".into()),
            analysis_args: vec!["-u".to_owned(), "other.py".to_owned()],
            analysis_config: Some(path),
            analysis_timeout: Some(5),
        };
        let config = opts.resolve_required().await?;
        assert_eq!(config.program, Path::new("/opt/venv/bin/python"));
        assert_eq!(config.args, vec!["-u", "other.py"]);
        assert_eq!(config.timeout_secs, 5);
        Ok(())
    }

    #[tokio::test]
    async fn json_config_files_work_too() -> Result<()> {
        let tmp = tempfile::TempDir::new()?;
        let path = tmp.path().join("analysis.json");
        std::fs::write(&path, r#"{"program": "node", "args": ["sentiment.js"]}"#)?;
        let opts = AnalysisOpts {
            analysis_config: Some(path),
            ..AnalysisOpts::default()
        };
        let config = opts.resolve_required().await?;
        assert_eq!(config.program, Path::new("node"));
        assert_eq!(config.timeout_secs, 300);
        Ok(())
    }
}
