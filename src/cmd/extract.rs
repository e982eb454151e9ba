//! The `extract` subcommand.

use clap::Args;

use crate::{
    analysis::AnalysisClient,
    async_utils::io::write_json_pretty,
    extract::{Document, artifact::ArtifactNaming},
    ingest::ingest_document,
    prelude::*,
    ui::Ui,
    work::WorkStatus,
};

use super::{AnalysisOpts, PipelineOpts};

/// Extract command line arguments.
#[derive(Debug, Args)]
pub struct ExtractOpts {
    /// The document to extract text from.
    pub input_path: PathBuf,

    /// The password needed to open the document.
    #[clap(long)]
    pub password: Option<String>,

    /// Send the extracted text to the analysis program.
    #[clap(long)]
    pub analyze: bool,

    /// Where to write the JSON response. Defaults to standard output.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,

    #[clap(flatten)]
    pub pipeline: PipelineOpts,

    #[clap(flatten)]
    pub analysis: AnalysisOpts,
}

/// The `extract` subcommand.
#[instrument(level = "debug", skip_all, fields(path = %opts.input_path.display()))]
pub async fn cmd_extract(ui: Ui, opts: &ExtractOpts) -> Result<()> {
    let analysis = if opts.analyze {
        Some(AnalysisClient::new(opts.analysis.resolve_required().await?))
    } else {
        None
    };
    let pipeline = opts
        .pipeline
        .build_pipeline(Some(ui.clone()), ArtifactNaming::Shared);

    let document = Document::new(&opts.input_path, opts.password.clone());
    let response = ingest_document(&pipeline, analysis.as_ref(), document).await;
    write_json_pretty(opts.output_path.as_deref(), &response).await?;

    match response.status {
        WorkStatus::Failed => Err(anyhow!("{}", response.message)),
        WorkStatus::Incomplete => {
            ui.display_message("⚠️", &response.message);
            Ok(())
        }
        WorkStatus::Ok => Ok(()),
    }
}
