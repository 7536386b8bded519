//! Request/response message types.
//!
//! One `TaskRequest` per inbound line, one `TaskResult` per outbound line.
//! There is no correlation identifier on the wire.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::MsDuration;
use crate::error::TaskError;

/// Exit code for a task that ran and reported.
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code for every rejection and failure path.
pub const EXIT_FAILURE: i32 = -1;

/// Internal identifier for a task, used in logs only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(uuid::Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A request to run one process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequest {
    /// argv; element 0 is the executable.
    #[serde(default)]
    pub command: Vec<String>,
    /// Seconds; 0 means no timeout.
    #[serde(default)]
    pub timeout: u64,
}

impl TaskRequest {
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            timeout: 0,
        }
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout = seconds;
        self
    }

    /// The wall-clock limit, if any.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout > 0).then(|| Duration::from_secs(self.timeout))
    }
}

/// Outcome of a single request.
///
/// On success `error` carries the process's stderr, which may be non-empty.
/// Use `exit_code`, never `error`, to tell success from failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    /// Unix seconds at which execution began.
    #[serde(default)]
    pub executed_at: i64,
    #[serde(default)]
    pub duration_ms: MsDuration,
    pub exit_code: i32,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub error: String,
}

impl TaskResult {
    pub fn failed(error: &TaskError) -> Self {
        Self {
            executed_at: 0,
            duration_ms: MsDuration::ZERO,
            exit_code: EXIT_FAILURE,
            error: error.to_string(),
            ..Default::default()
        }
    }

    pub fn succeeded(
        command: Vec<String>,
        executed_at: i64,
        duration: Duration,
        stdout: String,
        stderr: String,
    ) -> Self {
        Self {
            command,
            executed_at,
            duration_ms: duration.into(),
            exit_code: EXIT_SUCCESS,
            output: stdout,
            error: stderr,
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == EXIT_SUCCESS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_defaults_missing_fields() {
        let req: TaskRequest = serde_json::from_str("{}").unwrap();
        assert!(req.command.is_empty());
        assert_eq!(req.timeout, 0);
        assert_eq!(req.timeout(), None);
    }

    #[test]
    fn request_decodes_command_and_timeout() {
        let req: TaskRequest =
            serde_json::from_str(r#"{"command": ["echo", "hello, world!"], "timeout": 1000}"#)
                .unwrap();
        assert_eq!(req.command, vec!["echo", "hello, world!"]);
        assert_eq!(req.timeout(), Some(Duration::from_secs(1000)));
    }

    #[test]
    fn request_rejects_negative_timeout() {
        let err = serde_json::from_str::<TaskRequest>(r#"{"command": ["ls"], "timeout": -1}"#);
        assert!(err.is_err());
    }

    #[test]
    fn request_rejects_wrong_shape() {
        assert!(serde_json::from_str::<TaskRequest>(r#"{"command": "ls"}"#).is_err());
        assert!(serde_json::from_str::<TaskRequest>("[1, 2]").is_err());
    }

    #[test]
    fn failed_result_shape() {
        let result = TaskResult::failed(&TaskError::NoCommand);
        let json = serde_json::to_string(&result).unwrap();
        insta::assert_snapshot!(json, @r#"{"executed_at":0,"duration_ms":0,"exit_code":-1,"output":"","error":"no command specified"}"#);
    }

    #[test]
    fn succeeded_result_shape() {
        let result = TaskResult::succeeded(
            vec!["echo".into(), "hi".into()],
            1_700_000_000,
            Duration::from_micros(3500),
            "hi\n".into(),
            String::new(),
        );
        let json = serde_json::to_string(&result).unwrap();
        insta::assert_snapshot!(json, @r#"{"command":["echo","hi"],"executed_at":1700000000,"duration_ms":3.5,"exit_code":0,"output":"hi\n","error":""}"#);
    }

    #[test]
    fn stderr_on_success_is_not_a_failure() {
        let result = TaskResult::succeeded(
            vec!["sh".into()],
            0,
            Duration::ZERO,
            String::new(),
            "warning\n".into(),
        );
        assert!(result.is_success());
        assert_eq!(result.error, "warning\n");
    }

    #[test]
    fn result_decodes_without_command() {
        let result: TaskResult = serde_json::from_str(
            r#"{"executed_at":0,"duration_ms":0,"exit_code":-1,"output":"","error":"timeout exceeded"}"#,
        )
        .unwrap();
        assert!(!result.is_success());
        assert!(result.command.is_empty());
        assert_eq!(result.error, "timeout exceeded");
    }
}
