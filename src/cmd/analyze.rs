//! The `analyze` subcommand.

use clap::Args;

use crate::{
    analysis::AnalysisClient,
    async_utils::io::{read_text, write_json_pretty},
    prelude::*,
};

use super::AnalysisOpts;

/// Analyze command line arguments.
#[derive(Debug, Args)]
pub struct AnalyzeOpts {
    /// A text file to analyze. Defaults to standard input.
    pub input_path: Option<PathBuf>,

    /// Where to write the analysis result. Defaults to standard output.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,

    #[clap(flatten)]
    pub analysis: AnalysisOpts,
}

/// The `analyze` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_analyze(opts: &AnalyzeOpts) -> Result<()> {
    let client = AnalysisClient::new(opts.analysis.resolve_required().await?);
    let text = read_text(opts.input_path.as_deref()).await?;
    let result = client.analyze(&text).await?;
    write_json_pretty(opts.output_path.as_deref(), &result).await
}
