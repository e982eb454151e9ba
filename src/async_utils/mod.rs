//! Asynchronous utilities for use with Tokio.
//!
//! Everything that touches external processes or blocking work goes through
//! here, so that the rest of the program can pretend those are ordinary async
//! calls with ordinary errors.

use std::{pin::Pin, process::Output, time::Duration};

use futures::Stream;
use tokio::process::Command;

use crate::prelude::*;

pub mod io;
pub mod size_hint;

/// A type alias for a boxed stream. This is used to make it easier to work
/// streams that return complex types.
pub type BoxedStream<Item> = Pin<Box<dyn Stream<Item = Item> + Send>>;

/// Run a command to completion, collecting its output.
///
/// If `timeout` elapses first, the child is killed and an error is returned.
pub async fn run_command(
    command_name: &str,
    cmd: &mut Command,
    timeout: Option<Duration>,
) -> Result<Output> {
    cmd.kill_on_drop(true);
    let output = cmd.output();
    let result = match timeout {
        Some(timeout) => tokio::time::timeout(timeout, output)
            .await
            .map_err(|_| anyhow!("{} timed out after {:?}", command_name, timeout))?,
        None => output.await,
    };
    result.with_context(|| format!("failed to run {}", command_name))
}

/// Report any command failures, and include any error output.
///
/// The output of standard error and standard output will be logged at
/// appropriate levels. And standard error may be optionally checked line by
/// line with `is_error_line` to decide whether the command failed even though
/// it exited successfully.
pub fn check_for_command_failure(
    command_name: &str,
    output: &Output,
    is_error_line: Option<&dyn Fn(&str) -> bool>,
) -> Result<()> {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    debug!(command_name, bytes = output.stdout.len(), "Command finished");
    trace!(command_name, output = %stdout, "Standard output from command");
    if !stderr.trim().is_empty() {
        error!(command_name, output = %stderr, "Standard error from command");
    }

    if output.status.success() {
        if let Some(is_error_line) = is_error_line
            && stderr.lines().any(is_error_line)
        {
            return Err(anyhow!(
                "{} printed error output:\n{}",
                command_name,
                stderr,
            ));
        }
        Ok(())
    } else if let Some(exit_code) = output.status.code() {
        Err(anyhow!(
            "{} failed with exit code {} and error output:\n{}",
            command_name,
            exit_code,
            stderr,
        ))
    } else {
        Err(anyhow!(
            "{} failed with error output:\n{}",
            command_name,
            stderr,
        ))
    }
}

/// Wrapper around [`tokio::task::spawn_blocking`] that propagates panics from
/// the background task.
pub async fn spawn_blocking_propagating_panics<F, T>(f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(value) => value,
        Err(err) => std::panic::resume_unwind(err.into_panic()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_command_collects_output() -> Result<()> {
        let output = run_command(
            "sh",
            Command::new("sh").arg("-c").arg("echo hello"),
            Some(Duration::from_secs(10)),
        )
        .await?;
        check_for_command_failure("sh", &output, None)?;
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "hello");
        Ok(())
    }

    #[tokio::test]
    async fn run_command_times_out() {
        let result = run_command(
            "sh",
            Command::new("sh").arg("-c").arg("sleep 5"),
            Some(Duration::from_millis(100)),
        )
        .await;
        let err = result.expect_err("command should time out");
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn failing_exit_code_is_reported() -> Result<()> {
        let output = run_command(
            "sh",
            Command::new("sh").arg("-c").arg("echo oops >&2; exit 3"),
            None,
        )
        .await?;
        let err = check_for_command_failure("sh", &output, None)
            .expect_err("non-zero exit should fail");
        let msg = err.to_string();
        assert!(msg.contains("exit code 3"));
        assert!(msg.contains("oops"));
        Ok(())
    }

    #[tokio::test]
    async fn error_lines_fail_successful_commands() -> Result<()> {
        let output = run_command(
            "sh",
            Command::new("sh").arg("-c").arg("echo 'Error: broken' >&2"),
            None,
        )
        .await?;
        let is_error = |line: &str| line.starts_with("Error");
        assert!(check_for_command_failure("sh", &output, Some(&is_error)).is_err());
        assert!(check_for_command_failure("sh", &output, None).is_ok());
        Ok(())
    }
}
