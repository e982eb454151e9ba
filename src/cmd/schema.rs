//! The `schema` subcommand.

use clap::{Args, ValueEnum};
use schemars::schema_for;

use crate::{
    analysis::AnalysisConfig, async_utils::io::write_json_pretty, ingest::IngestResponse,
    prelude::*,
};

use super::batch::{BatchInput, BatchOutput};

/// Types we can print schemas for. Named in PascalCase, like the types.
#[derive(Debug, Clone, Copy, ValueEnum)]
#[clap(rename_all = "PascalCase")]
pub enum SchemaType {
    /// A `batch` input record.
    BatchInput,
    /// A `batch` output record.
    BatchOutput,
    /// The response printed by `extract`.
    IngestResponse,
    /// An analysis config file.
    AnalysisConfig,
}

/// Schema command line arguments.
#[derive(Debug, Args)]
pub struct SchemaOpts {
    /// The schema type to generate.
    #[clap(value_enum, value_name = "TYPE")]
    pub schema_type: SchemaType,

    /// The output path to write the schema to.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,
}

/// The `schema` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_schema(schema_opts: &SchemaOpts) -> Result<()> {
    let schema = match schema_opts.schema_type {
        SchemaType::BatchInput => schema_for!(BatchInput),
        SchemaType::BatchOutput => schema_for!(BatchOutput),
        SchemaType::IngestResponse => schema_for!(IngestResponse),
        SchemaType::AnalysisConfig => schema_for!(AnalysisConfig),
    };
    write_json_pretty(schema_opts.output_path.as_deref(), &schema).await
}
