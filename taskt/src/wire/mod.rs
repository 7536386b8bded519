//! Line-oriented wire format between clients and the server.
//!
//! - **protocol**: `TaskRequest` / `TaskResult` message types
//! - **codec**: newline-delimited JSON framing for AsyncRead/AsyncWrite

pub mod codec;
pub mod protocol;
