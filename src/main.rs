use std::str::FromStr;

use clap::{Parser, Subcommand};
use tracing_subscriber::{
    EnvFilter, Layer as _, filter::Directive, fmt::format::FmtSpan, layer::SubscriberExt,
    util::SubscriberInitExt as _,
};

use self::{prelude::*, ui::Ui};

mod analysis;
mod async_utils;
mod cmd;
mod cpu_limit;
mod errors;
mod extract;
mod ingest;
mod prelude;
mod ui;
mod work;

/// Extract text from documents, OCRing them if needed, and hand it to an
/// analysis program.
#[derive(Debug, Parser)]
#[clap(
    version,
    author,
    after_help = r#"
Environment Variables:
  - ANALYSIS_PROGRAM (optional): The analysis program to run.
  - RUST_LOG (optional): Logging filter, like "info" or "doc_ingest=debug".

  These variables may be set in a standard `.env` file.

External Tools:
  `pdfinfo`, `pdftotext` and `pdftocairo` (from poppler-utils) and
  `tesseract` must be available in PATH.
"#
)]
struct Opts {
    #[clap(subcommand)]
    subcmd: Cmd,
}

/// The subcommands we support.
#[derive(Debug, Subcommand)]
enum Cmd {
    /// Extract text from one document, and optionally analyze it.
    Extract(cmd::extract::ExtractOpts),
    /// Send text to the analysis program and print its result.
    Analyze(cmd::analyze::AnalyzeOpts),
    /// Extract text from many documents. The input file should have `id` and
    /// `path` fields.
    Batch(cmd::batch::BatchOpts),
    /// Print schemas for input and output formats.
    Schema(cmd::schema::SchemaOpts),
}

impl Cmd {
    /// Are we using stdout for output?
    fn using_stdout_for_output(&self) -> bool {
        match self {
            Cmd::Extract(opts) => opts.output_path.is_none(),
            Cmd::Analyze(opts) => opts.output_path.is_none(),
            Cmd::Batch(opts) => opts.output_path.is_none(),
            Cmd::Schema(opts) => opts.output_path.is_none(),
        }
    }
}

/// Our entry point. Errors are printed by [`anyhow::Result`]'s `Debug`
/// implementation, with their full context chain.
#[tokio::main]
async fn main() -> Result<()> {
    let ui = Ui::init();
    init_tracing(&ui);
    real_main(ui).await
}

/// Send logs to stderr, filtered by `RUST_LOG` (default `info`).
fn init_tracing(ui: &Ui) {
    let default_directive =
        Directive::from_str("info").expect("built-in directive should be valid");
    let filter = EnvFilter::builder()
        .with_default_directive(default_directive)
        .from_env_lossy();
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_writer(ui.get_stderr_writer())
        .with_filter(filter);
    tracing_subscriber::registry().with(fmt_layer).init();
}

/// Our real entry point.
#[instrument(level = "debug", name = "main", skip_all)]
async fn real_main(ui: Ui) -> Result<()> {
    // A `.env` file may supply `ANALYSIS_PROGRAM`, so load it before parsing.
    if let Err(err) = dotenvy::dotenv()
        && !err.not_found()
    {
        warn!("could not load .env file: {}", err);
    }

    let opts = Opts::parse();
    debug!("Parsed options: {:?}", opts);

    // Progress bars would be mixed into our output.
    if opts.subcmd.using_stdout_for_output() {
        ui.hide_progress_bars();
    }

    match &opts.subcmd {
        Cmd::Extract(extract_opts) => {
            cmd::extract::cmd_extract(ui, extract_opts).await?;
        }
        Cmd::Analyze(analyze_opts) => {
            cmd::analyze::cmd_analyze(analyze_opts).await?;
        }
        Cmd::Batch(batch_opts) => {
            cmd::batch::cmd_batch(ui, batch_opts).await?;
        }
        Cmd::Schema(schema_opts) => {
            cmd::schema::cmd_schema(schema_opts).await?;
        }
    }
    Ok(())
}
