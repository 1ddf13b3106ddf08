//! Bounded subprocess execution for job phases.
//!
//! Every phase command runs with piped output, a per-command deadline,
//! and the job's cancellation token. The child is spawned with
//! `kill_on_drop`, so abandoning the wait future on timeout or
//! cancellation also terminates the process.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io;
use tokio_util::sync::CancellationToken;

/// Appended once when a job log hits its byte cap.
pub(crate) const LOG_TRUNCATED: &str = "\n[output truncated]";

/// Longest error-message tail kept from a failing command's output.
const ERROR_TAIL: usize = 400;

#[derive(Debug)]
pub(crate) enum CommandOutcome {
    /// The command ran to completion; the status says how it went.
    Completed(ExitStatus),
    TimedOut,
    Cancelled,
}

#[derive(Debug)]
pub(crate) struct CommandResult {
    pub outcome: CommandOutcome,
    /// Stdout followed by stderr, lossily decoded.
    pub output: String,
}

/// Runs `command` (program plus arguments) in `dir`, bounded by
/// `limit` and `token`.
pub(crate) async fn run_command(
    command: &[String],
    dir: &Path,
    limit: Duration,
    token: &CancellationToken,
) -> io::Result<CommandResult> {
    let (program, args) = command.split_first().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "empty phase command")
    })?;
    let child = tokio::process::Command::new(program)
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    tokio::select! {
        _ = token.cancelled() => Ok(CommandResult {
            outcome: CommandOutcome::Cancelled,
            output: String::new(),
        }),
        waited = tokio::time::timeout(limit, child.wait_with_output()) => match waited {
            Err(_) => Ok(CommandResult {
                outcome: CommandOutcome::TimedOut,
                output: String::new(),
            }),
            Ok(Err(err)) => Err(err),
            Ok(Ok(output)) => {
                let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !stderr.trim().is_empty() {
                    if !text.is_empty() && !text.ends_with('\n') {
                        text.push('\n');
                    }
                    text.push_str(&stderr);
                }
                Ok(CommandResult {
                    outcome: CommandOutcome::Completed(output.status),
                    output: text,
                })
            }
        },
    }
}

/// Appends `chunk` to `logs` without growing past `cap` bytes. The first
/// time anything is dropped, one truncation notice is appended; after
/// that, overflow is dropped silently.
pub(crate) fn append_capped(logs: &mut String, chunk: &str, cap: usize) {
    if chunk.is_empty() {
        return;
    }
    if logs.len() >= cap {
        if !logs.ends_with(LOG_TRUNCATED) {
            logs.push_str(LOG_TRUNCATED);
        }
        return;
    }
    let remaining = cap - logs.len();
    if chunk.len() <= remaining {
        logs.push_str(chunk);
    } else {
        let mut end = remaining;
        while !chunk.is_char_boundary(end) {
            end -= 1;
        }
        logs.push_str(&chunk[..end]);
        logs.push_str(LOG_TRUNCATED);
    }
}

/// The last few hundred bytes of a command's output, for error records.
pub(crate) fn output_tail(output: &str) -> &str {
    let trimmed = output.trim_end();
    if trimmed.len() <= ERROR_TAIL {
        return trimmed;
    }
    let mut start = trimmed.len() - ERROR_TAIL;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    &trimmed[start..]
}

// ================================================================
// Tests
// ================================================================
