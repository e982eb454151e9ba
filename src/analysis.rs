//! Client for the external analysis process.
//!
//! The protocol is deliberately dumb: we write the extracted text to the
//! process's standard input and close it, then wait for one JSON value on
//! standard output. Anything at all on standard error fails the call.

use std::{process::Stdio, time::Duration};

use schemars::JsonSchema;
use tokio::{io::AsyncWriteExt as _, process::Command};

use crate::{errors::AnalysisError, prelude::*};

/// Default time limit for one analysis call.
pub const DEFAULT_ANALYSIS_TIMEOUT_SECS: u64 = 300;

/// How to run the analysis process.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AnalysisConfig {
    /// The program to run. Looked up in `PATH` if not a path.
    pub program: PathBuf,

    /// Extra arguments, typically a script for `program` to interpret.
    #[serde(default)]
    pub args: Vec<String>,

    /// Kill the process if it has not exited after this many seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_ANALYSIS_TIMEOUT_SECS
}

impl AnalysisConfig {
    /// Create a config for `program` with no arguments and the default timeout.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: vec![],
            timeout_secs: DEFAULT_ANALYSIS_TIMEOUT_SECS,
        }
    }

    /// The timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Sends text to a freshly spawned analysis process on every call.
#[derive(Clone, Debug)]
pub struct AnalysisClient {
    config: AnalysisConfig,
}

impl AnalysisClient {
    /// Create a new client.
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    /// How we run the analysis process.
    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Analyze `text`, returning the process's JSON object or array.
    #[instrument(level = "debug", skip_all, fields(program = %self.config.program.display(), chars = text.len()))]
    pub async fn analyze(&self, text: &str) -> Result<Value, AnalysisError> {
        let timeout = self.config.timeout();
        let output = tokio::time::timeout(timeout, self.run(text))
            .await
            .map_err(|_| {
                AnalysisError::Process(format!(
                    "analysis process timed out after {:?}",
                    timeout
                ))
            })?
            .map_err(|err| AnalysisError::Process(format!("{:#}", err)))?;

        if !output.stderr.is_empty() {
            // Any diagnostic output at all, even a bare newline, means stdout
            // can't be trusted.
            return Err(AnalysisError::Process(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }
        if !output.status.success() {
            return Err(AnalysisError::Process(match output.status.code() {
                Some(code) => format!("analysis process exited with code {}", code),
                None => "analysis process was killed by a signal".to_owned(),
            }));
        }
        parse_analysis_output(&output.stdout)
    }

    /// Spawn the process, feed it `text` and collect everything it prints.
    async fn run(&self, text: &str) -> Result<std::process::Output> {
        let program = &self.config.program;
        let mut child = Command::new(program)
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to start {:?}", program.display()))?;

        // Feed stdin from its own task so that a process which writes a lot
        // before reading everything can't deadlock against us.
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("analysis process has no stdin"))?;
        let payload = text.as_bytes().to_vec();
        let writer = tokio::spawn(async move {
            match stdin.write_all(&payload).await {
                Ok(()) => stdin.shutdown().await,
                // The process may legitimately exit without reading its input.
                Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
                Err(err) => Err(err),
            }
        });

        let output = child
            .wait_with_output()
            .await
            .context("failed to wait for analysis process")?;
        match writer.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) if err.kind() == std::io::ErrorKind::BrokenPipe => {}
            Ok(Err(err)) => {
                return Err(err).context("failed to write to analysis process");
            }
            Err(err) => return Err(anyhow!("stdin writer task failed: {}", err)),
        }
        debug!(status = %output.status, stdout_bytes = output.stdout.len(), "Analysis process exited");
        Ok(output)
    }
}

/// Parse the complete standard output of an analysis process.
fn parse_analysis_output(stdout: &[u8]) -> Result<Value, AnalysisError> {
    let text = std::str::from_utf8(stdout).map_err(|err| {
        AnalysisError::MalformedOutput(format!("output is not UTF-8: {}", err))
    })?;
    if text.trim().is_empty() {
        return Err(AnalysisError::MalformedOutput("output was empty".to_owned()));
    }
    let value: Value = serde_json::from_str(text).map_err(|err| {
        AnalysisError::MalformedOutput(format!("output is not valid JSON: {}", err))
    })?;
    match value {
        Value::Object(_) | Value::Array(_) => Ok(value),
        other => Err(AnalysisError::MalformedOutput(format!(
            "expected a JSON object or array, found {}",
            other
        ))),
    }
}
