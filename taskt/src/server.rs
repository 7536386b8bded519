//! TCP listener and accept loop.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::config::ServerConfig;
use crate::connection::handle_connection;
use crate::executor::TaskExecutor;
use crate::permit::ExecutionGate;

/// Pause after a failed accept so persistent errors (e.g. EMFILE) don't spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Stops a running [`TaskServer`] from accepting new connections.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Open connections and in-flight tasks are left to finish.
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Accepts connections and hands each to its own handler. Owns the gate,
/// so every connection of one server shares a single execution slot.
pub struct TaskServer {
    listener: TcpListener,
    executor: Arc<TaskExecutor>,
    config: ServerConfig,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl TaskServer {
    /// Bind per `config`. Failure here is fatal to startup.
    pub async fn bind(config: ServerConfig) -> anyhow::Result<Self> {
        let addr = config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        Ok(Self::from_listener(listener, config))
    }

    pub fn from_listener(listener: TcpListener, config: ServerConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            listener,
            executor: Arc::new(TaskExecutor::new(ExecutionGate::new())),
            config,
            shutdown_tx: Arc::new(shutdown_tx),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: Arc::clone(&self.shutdown_tx),
        }
    }

    /// Run the accept loop until shutdown.
    ///
    /// Shutdown interrupts a pending accept rather than taking effect on the
    /// next accepted connection, so no wake-up connection is needed. The
    /// listener is closed when this returns.
    pub async fn run(self) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        match self.listener.local_addr() {
            Ok(addr) => info!("Listening on {}", addr),
            Err(e) => tracing::warn!(error = %e, "Listening on unknown address"),
        }

        loop {
            tokio::select! {
                biased;

                // The watch guard must not outlive this arm; it is !Send.
                _ = async { let _ = shutdown_rx.wait_for(|stop| *stop).await; } => break,

                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tokio::spawn(handle_connection(
                            stream,
                            peer,
                            Arc::clone(&self.executor),
                            self.config.max_line_length,
                        ));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
            }
        }

        info!("Shutting down");
    }
}
