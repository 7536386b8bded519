//! taskt: remote command execution, one task at a time.

mod config;
mod connection;
mod duration;
mod error;
mod executor;
mod server;

pub mod permit;
pub mod wire;

pub use config::{DEFAULT_BIND, ServerConfig};
pub use connection::handle_connection;
pub use duration::MsDuration;
pub use error::{ExitFailure, TaskError};
pub use executor::TaskExecutor;
pub use server::{ShutdownHandle, TaskServer};
pub use wire::protocol::{EXIT_FAILURE, EXIT_SUCCESS, TaskId, TaskRequest, TaskResult};
