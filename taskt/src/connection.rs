//! Per-connection handling.
//!
//! Each request line is dispatched to its own task, so admission and
//! validation of pipelined requests stay concurrent. All results funnel
//! through one writer task per connection, so each response line hits the
//! socket whole. Responses may come back in a different order than the
//! requests were sent.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::error::TaskError;
use crate::executor::TaskExecutor;
use crate::wire::codec::JsonLinesCodec;
use crate::wire::protocol::{TaskRequest, TaskResult};

type ResultWriter = FramedWrite<OwnedWriteHalf, JsonLinesCodec<TaskResult>>;

/// Serve one client until its stream ends or fails.
///
/// Results for lines already read are still written before the connection
/// closes.
pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    executor: Arc<TaskExecutor>,
    max_line_length: usize,
) {
    tracing::debug!(%peer, "Connection opened");

    let (read_half, write_half) = stream.into_split();
    let mut requests = FramedRead::new(
        read_half,
        JsonLinesCodec::<TaskRequest>::with_max_length(max_line_length),
    );

    let (result_tx, result_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_results(
        FramedWrite::new(write_half, JsonLinesCodec::new()),
        result_rx,
        peer,
    ));

    while let Some(frame) = requests.next().await {
        let decoded = match frame {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::warn!(%peer, error = %e, "Read failed, closing connection");
                break;
            }
        };

        let executor = Arc::clone(&executor);
        let result_tx = result_tx.clone();
        tokio::spawn(async move {
            let result = match decoded {
                Ok(request) => executor.execute(request).await,
                Err(e) => {
                    tracing::debug!(%peer, error = %e, "Malformed request");
                    TaskResult::failed(&TaskError::Decode(e))
                }
            };
            // The writer is gone only if the client stopped reading.
            let _ = result_tx.send(result);
        });
    }

    // The writer drains until every in-flight request has reported.
    drop(result_tx);
    if let Err(e) = writer.await {
        tracing::error!(%peer, error = %e, "Connection writer task failed");
    }

    tracing::debug!(%peer, "Connection closed");
}

async fn write_results(
    mut writer: ResultWriter,
    mut results: mpsc::UnboundedReceiver<TaskResult>,
    peer: SocketAddr,
) {
    while let Some(result) = results.recv().await {
        if let Err(e) = writer.send(result).await {
            tracing::warn!(%peer, error = %e, "Write failed, dropping remaining results");
            return;
        }
    }
    if let Err(e) = writer.get_mut().shutdown().await {
        tracing::debug!(%peer, error = %e, "Shutdown of write half failed");
    }
}
