//! Reading batch records and config files, and writing JSON results.
//!
//! Batch records arrive as JSONL or CSV. We go by file extension when we have
//! a path, and sniff the first byte of standard input otherwise.

use futures::{TryStreamExt as _, pin_mut, stream::StreamExt as _};
use peekable::tokio::AsyncPeekable;
use serde::de::DeserializeOwned;
use serde_json::Map;
use tokio::{
    fs::File,
    io::{
        AsyncBufRead, AsyncBufReadExt as _, AsyncReadExt as _, AsyncWrite,
        AsyncWriteExt as _, BufReader, BufWriter,
    },
};
use tokio_stream::wrappers::LinesStream;

use crate::{
    prelude::*,
    ui::{ProgressConfig, Ui},
};

use super::{BoxedStream, size_hint::WithSizeHintExt};

/// A buffered reader we can move between tasks.
type DynBufRead = Box<dyn AsyncBufRead + Unpin + Send + Sync + 'static>;

/// How batch records are encoded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RecordFormat {
    /// One JSON object per line.
    Jsonl,
    /// CSV with a header row.
    Csv,
}

impl RecordFormat {
    /// Guess the format from a file name. Anything not JSON is CSV.
    fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json" | "jsonl") => RecordFormat::Jsonl,
            _ => RecordFormat::Csv,
        }
    }
}

/// An open source of batch records.
struct RecordSource {
    format: RecordFormat,
    /// Where the records come from, for error messages.
    description: String,
    reader: DynBufRead,
}

impl RecordSource {
    /// Open `path`, or standard input if `path` is `None`.
    async fn open(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let file = File::open(path)
                    .await
                    .with_context(|| format!("failed to open {:?}", path))?;
                Ok(Self {
                    format: RecordFormat::from_path(path),
                    description: path.display().to_string(),
                    reader: Box::new(BufReader::new(file)),
                })
            }
            None => {
                let mut peekable = AsyncPeekable::new(tokio::io::stdin());
                let mut first = [0u8; 1];
                peekable
                    .peek_exact(&mut first)
                    .await
                    .context("failed to read batch records from standard input")?;
                let format = if first[0] == b'{' {
                    RecordFormat::Jsonl
                } else {
                    RecordFormat::Csv
                };
                Ok(Self {
                    format,
                    description: "standard input".to_owned(),
                    reader: Box::new(BufReader::new(peekable)),
                })
            }
        }
    }
}

/// Read a config file. `.json` files are parsed as JSON, everything else as
/// TOML.
pub async fn read_json_or_toml<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned,
{
    let data = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {:?}", path))?;
    if path.extension().is_some_and(|ext| ext == "json") {
        serde_json::from_str(&data).with_context(|| format!("invalid JSON in {:?}", path))
    } else {
        toml::from_str(&data).with_context(|| format!("invalid TOML in {:?}", path))
    }
}

/// Count the records in a batch file so we can show real progress.
///
/// Returns a size hint. Named pipes and other non-files can't be read twice,
/// so we don't count those.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
async fn count_records(ui: &Ui, path: &Path) -> Result<(usize, Option<usize>)> {
    if !path.is_file() {
        return Ok((0, None));
    }
    let spinner = ui.new_spinner(&ProgressConfig {
        emoji: "🧮",
        msg: "Counting input documents",
        done_msg: "Counted input documents",
    });

    let source = RecordSource::open(Some(path)).await?;
    let count = match source.format {
        RecordFormat::Jsonl => {
            LinesStream::new(source.reader.lines())
                .try_filter(|line| futures::future::ready(!line.trim().is_empty()))
                .try_fold(0, |n, _| async move { Ok(n + 1) })
                .await?
        }
        RecordFormat::Csv => {
            csv_async::AsyncReaderBuilder::new()
                .create_reader(source.reader)
                .into_byte_records()
                .try_fold(0, |n, _| async move { Ok(n + 1) })
                .await?
        }
    };
    spinner.finish_with_message(format!("Found {count} documents"));
    Ok((count, Some(count)))
}

/// A stream of JSON records.
pub type JsonStream = BoxedStream<Result<Value>>;

/// Read batch records from a JSONL or CSV file, or from standard input.
///
/// CSV rows become JSON objects keyed by column header, with string values.
pub async fn read_jsonl_or_csv(ui: Ui, path: Option<&Path>) -> Result<JsonStream> {
    let size_hint = match path {
        Some(path) => count_records(&ui, path).await?,
        None => (0, None),
    };
    let RecordSource {
        format,
        description,
        reader,
    } = RecordSource::open(path).await?;

    match format {
        RecordFormat::Jsonl => {
            let lines = LinesStream::new(reader.lines())
                .try_filter(|line| futures::future::ready(!line.trim().is_empty()))
                .with_size_hint(size_hint);
            Ok(lines
                .map(move |line| {
                    let line = line
                        .with_context(|| format!("failed to read from {}", description))?;
                    serde_json::from_str::<Value>(&line).with_context(|| {
                        format!("invalid JSON record in {}: {:?}", description, line)
                    })
                })
                .boxed())
        }
        RecordFormat::Csv => {
            let mut reader = csv_async::AsyncReaderBuilder::new().create_reader(reader);
            let headers = reader
                .headers()
                .await
                .with_context(|| format!("failed to read CSV headers from {}", description))?
                .clone();
            Ok(reader
                .into_records()
                .with_size_hint(size_hint)
                .map(move |record| {
                    let record = record.with_context(|| {
                        format!("failed to read CSV record from {}", description)
                    })?;
                    let object = headers
                        .iter()
                        .zip(record.iter())
                        .map(|(header, value)| {
                            (header.to_owned(), Value::String(value.to_owned()))
                        })
                        .collect::<Map<_, _>>();
                    Ok(Value::Object(object))
                })
                .boxed())
        }
    }
}

/// Read all of a text file, or standard input if `path` is `None`.
pub async fn read_text(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {:?}", path)),
        None => {
            let mut data = String::new();
            tokio::io::stdin()
                .read_to_string(&mut data)
                .await
                .context("failed to read standard input")?;
            Ok(data)
        }
    }
}

/// Create an [`AsyncWrite`] for a file or stdout.
pub async fn create_writer(
    path: Option<&Path>,
) -> Result<Box<dyn AsyncWrite + Unpin + Send + Sync + 'static>> {
    match path {
        Some(path) => {
            let file = File::create(path)
                .await
                .with_context(|| format!("failed to create {:?}", path))?;
            Ok(Box::new(file))
        }
        None => Ok(Box::new(tokio::io::stdout())),
    }
}

/// Write one value as pretty-printed JSON to a file or stdout.
pub async fn write_json_pretty<T>(path: Option<&Path>, value: &T) -> Result<()>
where
    T: Serialize,
{
    let mut json = serde_json::to_string_pretty(value).context("failed to serialize JSON")?;
    json.push('\n');
    let mut writer = create_writer(path).await?;
    writer
        .write_all(json.as_bytes())
        .await
        .context("failed to write output")?;
    writer.flush().await.context("failed to flush output")
}

/// Write a stream of records as JSONL to a file or stdout.
///
/// Records are written as soon as they arrive. The first error stops the
/// stream and is returned.
pub async fn write_output(path: Option<&Path>, stream: JsonStream) -> Result<()> {
    let mut writer = BufWriter::new(create_writer(path).await?);
    pin_mut!(stream);
    while let Some(record) = stream.next().await {
        let mut line = serde_json::to_string(&record?).context("failed to serialize record")?;
        line.push('\n');
        writer
            .write_all(line.as_bytes())
            .await
            .context("failed to write output")?;
    }
    writer.flush().await.context("failed to flush output")
}
