//! Batch records: reading inputs, writing outputs, and deciding whether a
//! batch failed.

use std::sync::{Arc, Mutex};

use futures::StreamExt as _;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;

use crate::{
    async_utils::{
        BoxedStream,
        io::{read_jsonl_or_csv, write_output},
    },
    cmd::StreamOpts,
    prelude::*,
    ui::Ui,
};

/// Input record for batch processing.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct WorkInput<T>
where
    T: 'static,
{
    /// The unique ID of the work item.
    pub id: Value,

    /// The input data for the work item.
    #[serde(flatten)]
    pub data: T,
}

impl<T> WorkInput<T>
where
    T: DeserializeOwned + Send + 'static,
{
    /// Convert from a JSON value to the input type.
    pub fn from_json(value: Value) -> Result<Self> {
        serde_json::from_value::<Self>(value).context("failed to deserialize input")
    }

    /// Read a stream from a [`Path`] or from standard input.
    pub async fn read_stream(
        ui: Ui,
        path: Option<&Path>,
    ) -> Result<BoxedStream<Result<Self>>> {
        Ok(read_jsonl_or_csv(ui, path)
            .await?
            .map(|value| Self::from_json(value?))
            .boxed())
    }
}

/// Output status of a work item.
#[derive(Clone, Copy, Debug, Deserialize, JsonSchema, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    /// The work item was successful.
    Ok,

    /// Partial data.
    Incomplete,

    /// The work item failed.
    Failed,
}

/// Output data that knows whether it represents a success.
pub trait WorkData {
    /// What is the status of this work item?
    fn status(&self) -> WorkStatus;
}

/// Output record from batch processing.
#[derive(Clone, Debug, JsonSchema, Serialize)]
pub struct WorkOutput<T>
where
    T: 'static,
{
    /// The unique ID of the work item.
    pub id: Value,

    /// Any errors that occurred during processing, fatal or not.
    pub errors: Vec<String>,

    /// The output data for the work item. This includes its `status`.
    #[serde(flatten)]
    pub data: T,
}

impl<T> WorkOutput<T>
where
    T: WorkData + Serialize + Send + 'static,
{
    /// Convert from the output type to a JSON value.
    pub fn to_json(&self) -> Result<Value> {
        serde_json::to_value(self).context("failed to serialize output")
    }

    /// Write a stream of outputs as JSONL to a [`Path`] or to standard
    /// output, then fail if too many records failed.
    pub async fn write_stream(
        ui: &Ui,
        path: Option<&Path>,
        stream: BoxedStream<Result<Self>>,
        stream_opts: &StreamOpts,
    ) -> Result<()> {
        let tally = BatchTally::default();
        let counting = tally.clone();
        let output = stream
            .map(move |output| {
                let output = output?;
                counting.record(&output);
                output.to_json()
            })
            .boxed();
        write_output(path, output).await?;
        tally.summary().check(ui, stream_opts.allowed_failure_rate)
    }
}

/// What happened to the records of a batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Records written.
    pub total: usize,

    /// Records with status `failed`.
    pub failed: usize,

    /// Records with status `incomplete`.
    pub incomplete: usize,

    /// Errors reported by records which didn't fail.
    pub non_fatal_errors: usize,
}

impl BatchSummary {
    /// The share of records that failed, between 0.0 and 1.0.
    pub fn failure_rate(&self) -> f32 {
        if self.total == 0 {
            0.0
        } else {
            self.failed as f32 / self.total as f32
        }
    }

    /// Tell the user how the batch went. Fails if more than
    /// `allowed_failure_rate` of the records failed.
    pub fn check(&self, ui: &Ui, allowed_failure_rate: f32) -> Result<()> {
        let failure_rate = self.failure_rate();
        if failure_rate > allowed_failure_rate {
            return Err(anyhow!(
                "{}/{} ({:.2}%) of outputs were failures, but only {:.2}% were allowed",
                self.failed,
                self.total,
                failure_rate * 100.0,
                allowed_failure_rate * 100.0
            ));
        }
        if self.incomplete > 0 {
            ui.display_message(
                "📉",
                &format!("{} documents were only partly extracted", self.incomplete),
            );
        }
        if self.non_fatal_errors > 0 {
            ui.display_message(
                "⚠️",
                &format!("{} non-fatal errors encountered", self.non_fatal_errors),
            );
        }
        if self.failed > 0 {
            ui.display_message(
                "❌",
                &format!("{} records could not be processed", self.failed),
            );
        }
        Ok(())
    }
}

/// A [`BatchSummary`] updated from inside an output stream.
#[derive(Clone, Debug, Default)]
pub struct BatchTally(Arc<Mutex<BatchSummary>>);

impl BatchTally {
    /// Count one output record.
    pub fn record<T: WorkData>(&self, output: &WorkOutput<T>) {
        // The lock is only held for a few increments, and a poisoned lock
        // still holds usable counts.
        let mut summary = self.0.lock().unwrap_or_else(|e| e.into_inner());
        summary.total += 1;
        match output.data.status() {
            WorkStatus::Failed => summary.failed += 1,
            WorkStatus::Incomplete => {
                summary.incomplete += 1;
                summary.non_fatal_errors += output.errors.len();
            }
            WorkStatus::Ok => summary.non_fatal_errors += output.errors.len(),
        }
    }

    /// The counts so far.
    pub fn summary(&self) -> BatchSummary {
        *self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, Serialize)]
    struct Outcome {
        status: WorkStatus,
    }

    impl WorkData for Outcome {
        fn status(&self) -> WorkStatus {
            self.status
        }
    }

    fn output(status: WorkStatus, errors: &[&str]) -> WorkOutput<Outcome> {
        WorkOutput {
            id: Value::from(1),
            errors: errors.iter().map(|e| e.to_string()).collect(),
            data: Outcome { status },
        }
    }

    #[test]
    fn summary_respects_allowed_failure_rate() {
        let ui = Ui::init_for_tests();
        let tally = BatchTally::default();
        tally.record(&output(WorkStatus::Ok, &[]));
        tally.record(&output(WorkStatus::Incomplete, &["page 2: timed out"]));
        tally.record(&output(WorkStatus::Ok, &[]));
        tally.record(&output(WorkStatus::Failed, &["no such document"]));

        let summary = tally.summary();
        assert_eq!(
            summary,
            BatchSummary {
                total: 4,
                failed: 1,
                incomplete: 1,
                non_fatal_errors: 1,
            }
        );
        assert!(summary.check(&ui, 0.25).is_ok());
        assert!(summary.check(&ui, 0.1).is_err());
    }

    #[test]
    fn empty_batches_do_not_fail() {
        let ui = Ui::init_for_tests();
        assert!(BatchSummary::default().check(&ui, 0.0).is_ok());
    }

    #[test]
    fn outputs_flatten_their_data() -> Result<()> {
        let value = output(WorkStatus::Incomplete, &["oops"]).to_json()?;
        assert_eq!(
            value,
            serde_json::json!({ "id": 1, "errors": ["oops"], "status": "incomplete" })
        );
        Ok(())
    }

    #[test]
    fn inputs_keep_extra_fields_in_data() -> Result<()> {
        #[derive(Debug, Deserialize)]
        struct Doc {
            path: PathBuf,
        }
        let input = WorkInput::<Doc>::from_json(serde_json::json!({
            "id": "abc",
            "path": "contracts/lease.pdf",
        }))?;
        assert_eq!(input.id, "abc");
        assert_eq!(input.data.path, Path::new("contracts/lease.pdf"));
        Ok(())
    }
}
