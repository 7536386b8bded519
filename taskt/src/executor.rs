//! Execution engine.
//!
//! `TaskExecutor::execute` turns one `TaskRequest` into one `TaskResult`:
//! gate admission, validation, spawn, a race between process exit and the
//! deadline, output capture. Every failure becomes an `exit_code = -1`
//! result; nothing is retried and nothing propagates past the request.

use std::io;
use std::process::{ExitStatus, Stdio};

use chrono::Utc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::TaskError;
use crate::permit::ExecutionGate;
use crate::wire::protocol::{TaskId, TaskRequest, TaskResult};

/// Runs tasks one at a time, rejecting anything that arrives while busy.
#[derive(Clone, Default)]
pub struct TaskExecutor {
    gate: ExecutionGate,
}

impl TaskExecutor {
    pub fn new(gate: ExecutionGate) -> Self {
        Self { gate }
    }

    pub fn gate(&self) -> &ExecutionGate {
        &self.gate
    }

    /// Execute a request and report its outcome.
    ///
    /// The gate slot is held for the whole run and returned on every path,
    /// including when this future is dropped mid-flight.
    pub async fn execute(&self, request: TaskRequest) -> TaskResult {
        let task_id = TaskId::new();

        let Some(permit) = self.gate.try_acquire() else {
            tracing::debug!(%task_id, command = ?request.command, "Rejected: another task is running");
            return TaskResult::failed(&TaskError::ConcurrentExecution);
        };

        let result = match run_task(task_id, request).await {
            Ok(result) => {
                tracing::info!(
                    %task_id,
                    elapsed = ?result.duration_ms.as_duration(),
                    "Task succeeded"
                );
                result
            }
            Err(e) => {
                if e.is_rejection() {
                    tracing::debug!(%task_id, error = %e, "Task rejected");
                } else {
                    tracing::info!(%task_id, error = %e, "Task failed");
                }
                TaskResult::failed(&e)
            }
        };

        tracing::trace!(%task_id, held_for = ?permit.held_for(), "Releasing gate");
        permit.release();
        result
    }
}

async fn run_task(task_id: TaskId, request: TaskRequest) -> Result<TaskResult, TaskError> {
    let (program, args) = request.command.split_first().ok_or(TaskError::NoCommand)?;

    let executed_at = Utc::now().timestamp();
    let started = Instant::now();

    let cancel = CancellationToken::new();
    // A deadline too far out to represent is treated as no deadline.
    let _deadline = request
        .timeout()
        .and_then(|timeout| started.checked_add(timeout))
        .map(|deadline| DeadlineTimer::start(deadline, cancel.clone()));

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| TaskError::spawn(program.as_str(), e))?;

    tracing::info!(
        %task_id,
        pid = child.id(),
        command = ?request.command,
        timeout_secs = request.timeout,
        "Task started"
    );

    let stdout = PipeCapture::start(child.stdout.take());
    let stderr = PipeCapture::start(child.stderr.take());

    let finished = tokio::select! {
        finished = wait_and_collect(&mut child, stdout, stderr) => Some(finished),
        _ = cancel.cancelled() => None,
    };

    let Some(finished) = finished else {
        terminate(task_id, &mut child).await;
        return Err(TaskError::Timeout);
    };

    let (status, stdout, stderr) = finished.map_err(TaskError::Wait)?;
    if !status.success() {
        return Err(TaskError::Exit(status.into()));
    }

    Ok(TaskResult::succeeded(
        request.command,
        executed_at,
        started.elapsed(),
        stdout,
        stderr,
    ))
}

/// Wait for exit, then drain both pipes.
async fn wait_and_collect(
    child: &mut Child,
    stdout: PipeCapture,
    stderr: PipeCapture,
) -> io::Result<(ExitStatus, String, String)> {
    let status = child.wait().await?;
    let (stdout, stderr) = tokio::try_join!(stdout.collect(), stderr.collect())?;
    Ok((status, stdout, stderr))
}

/// Kill the process and reap it, so it is gone before the result is sent.
async fn terminate(task_id: TaskId, child: &mut Child) {
    tracing::warn!(%task_id, pid = child.id(), "Deadline exceeded, killing process");
    if let Err(e) = child.kill().await {
        tracing::warn!(%task_id, error = %e, "Failed to kill timed-out process");
    }
}

/// Buffers one child pipe in the background so the child never blocks on a
/// full pipe. Aborted on drop.
struct PipeCapture {
    handle: Option<JoinHandle<io::Result<Vec<u8>>>>,
}

impl PipeCapture {
    fn start<R>(pipe: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let handle = pipe.map(|mut pipe| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                pipe.read_to_end(&mut buf).await?;
                Ok(buf)
            })
        });
        Self { handle }
    }

    async fn collect(mut self) -> io::Result<String> {
        let Some(handle) = self.handle.as_mut() else {
            return Ok(String::new());
        };
        let bytes = handle.await.map_err(io::Error::other)??;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl Drop for PipeCapture {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Cancels a token once the deadline passes. Aborted on drop.
struct DeadlineTimer {
    handle: JoinHandle<()>,
}

impl DeadlineTimer {
    fn start(deadline: Instant, token: CancellationToken) -> Self {
        Self {
            handle: tokio::spawn(async move {
                tokio::time::sleep_until(deadline).await;
                token.cancel();
            }),
        }
    }
}

impl Drop for DeadlineTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
