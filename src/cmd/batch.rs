//! The `batch` subcommand.

use std::sync::Arc;

use clap::Args;
use futures::{Stream as _, StreamExt as _};
use schemars::JsonSchema;

use crate::{
    analysis::AnalysisClient,
    extract::{Document, artifact::ArtifactNaming, pipeline::ExtractionPipeline},
    ingest::{IngestResponse, ingest_document},
    prelude::*,
    ui::{ProgressConfig, Ui},
    work::{WorkInput, WorkOutput},
};

use super::{AnalysisOpts, PipelineOpts, StreamOpts};

/// A document to ingest.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct BatchDocument {
    /// The path to the document.
    pub path: PathBuf,

    /// The password to decrypt the document, if any.
    #[serde(default)]
    pub password: Option<String>,
}

/// An input record for `batch`.
pub type BatchInput = WorkInput<BatchDocument>;

/// An output record from `batch`.
pub type BatchOutput = WorkOutput<IngestResponse>;

/// Batch command line arguments.
#[derive(Debug, Args)]
pub struct BatchOpts {
    /// Input JSONL or CSV file, with `id`, `path` and optional `password`
    /// fields. Defaults to standard input.
    pub input_path: Option<PathBuf>,

    /// Send the extracted text of each document to the analysis program.
    #[clap(long)]
    pub analyze: bool,

    /// Output JSONL file. Defaults to standard output.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,

    #[clap(flatten)]
    pub stream: StreamOpts,

    #[clap(flatten)]
    pub pipeline: PipelineOpts,

    #[clap(flatten)]
    pub analysis: AnalysisOpts,
}

/// The `batch` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_batch(ui: Ui, opts: &BatchOpts) -> Result<()> {
    let analysis = if opts.analyze {
        Some(AnalysisClient::new(opts.analysis.resolve_required().await?))
    } else {
        None
    };
    let analysis = Arc::new(analysis);
    // Per-document page progress would be far too noisy here.
    let pipeline = Arc::new(
        opts.pipeline
            .build_pipeline(None, ArtifactNaming::PerRequest),
    );

    // Open up our input stream and parse into records.
    let input = BatchInput::read_stream(ui.clone(), opts.input_path.as_deref()).await?;
    let input = opts.stream.apply_stream_input_opts(input);

    // Configure our progress bar.
    let pb = ui.new_from_size_hint(
        &ProgressConfig {
            emoji: "📄",
            msg: "Ingesting documents",
            done_msg: "Ingested documents",
        },
        input.size_hint(),
    );

    let output = input
        .map(move |input| {
            let pipeline = pipeline.clone();
            let analysis = analysis.clone();
            async move {
                let input = input?;
                anyhow::Ok(
                    ingest_record(&pipeline, analysis.as_ref().as_ref(), input).await,
                )
            }
        })
        .buffered(opts.stream.job_count.max(1));
    let output = pb.wrap_stream(output).boxed();

    BatchOutput::write_stream(&ui, opts.output_path.as_deref(), output, &opts.stream)
        .await
}

/// Ingest a single batch record.
#[instrument(level = "debug", skip_all, fields(id = %input.id))]
async fn ingest_record(
    pipeline: &ExtractionPipeline,
    analysis: Option<&AnalysisClient>,
    input: BatchInput,
) -> BatchOutput {
    let BatchInput { id, data } = input;
    // CSV inputs have no way to leave a column out, so treat "" as absent.
    let password = data.password.filter(|p| !p.is_empty());
    let response = ingest_document(pipeline, analysis, Document::new(data.path, password)).await;
    BatchOutput {
        id,
        errors: response_errors(&response),
        data: response,
    }
}

/// Flatten everything that went wrong into human-readable strings.
fn response_errors(response: &IngestResponse) -> Vec<String> {
    let mut errors = response
        .page_failures
        .iter()
        .map(|failure| format!("page {}: {}", failure.page, failure.message))
        .collect::<Vec<_>>();
    if let Some(error) = &response.error {
        errors.push(error.message.clone());
    }
    errors
}
