//! Task failure taxonomy.
//!
//! Every variant's `Display` text is exactly what the client sees in the
//! result's `error` field.

use std::fmt;
use std::io;
use std::process::ExitStatus;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaskError {
    /// The gate slot is held by another task.
    #[error("cannot allow concurrent executions")]
    ConcurrentExecution,

    #[error("no command specified")]
    NoCommand,

    /// The request line was not a valid `TaskRequest`.
    #[error("{0}")]
    Decode(#[from] serde_json::Error),

    #[error("exec: {program:?}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("timeout exceeded")]
    Timeout,

    /// The process ran but did not exit successfully.
    #[error("{0}")]
    Exit(ExitFailure),

    /// Waiting on the process or collecting its output failed.
    #[error("{0}")]
    Wait(#[source] io::Error),
}

impl TaskError {
    pub fn spawn(program: impl Into<String>, source: io::Error) -> Self {
        Self::Spawn {
            program: program.into(),
            source,
        }
    }

    /// Rejections happen before any process is started.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::ConcurrentExecution | Self::NoCommand | Self::Decode(_)
        )
    }
}

/// How an unsuccessful process terminated.
///
/// Signal deaths render with the signal's constant name (`signal: SIGKILL`),
/// not the descriptive `strsignal` text (`signal: killed`) some other exec
/// servers report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitFailure {
    Code(i32),
    Signal(i32),
    Unknown,
}

impl From<ExitStatus> for ExitFailure {
    fn from(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self::Code(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Self::Signal(signal);
            }
        }
        Self::Unknown
    }
}

impl fmt::Display for ExitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "exit status {code}"),
            Self::Signal(signal) => write!(f, "signal: {}", signal_name(*signal)),
            Self::Unknown => f.write_str("exit status unknown"),
        }
    }
}

#[cfg(unix)]
fn signal_name(signal: i32) -> String {
    nix::sys::signal::Signal::try_from(signal)
        .map(|s| s.as_str().to_string())
        .unwrap_or_else(|_| signal.to_string())
}

#[cfg(not(unix))]
fn signal_name(signal: i32) -> String {
    signal.to_string()
}
