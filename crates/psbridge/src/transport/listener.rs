//! Execution listener: accepts TCP connections and runs one command per connection.
//!
//! Flow per connection:
//! 1. Read one request line (bounded by `request_timeout`)
//! 2. Run it through the [`CommandExecutor`]
//! 3. Write one response line, flush, close
//!
//! Malformed requests are answered with `ok=false`; they never take the
//! listener down.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, info, warn};

use crate::bridge::codec::{CodecError, JsonLineCodec};
use crate::bridge::protocol::{ConnectionId, ExecutionRequest, ExecutionResult};
use crate::executor::CommandExecutor;
use crate::resolver::DEFAULT_PORT;

#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub host: String,
    pub port: u16,
    /// Time a client has to deliver its complete request line.
    pub request_timeout: Duration,
    /// How long shutdown waits for running commands before killing them.
    pub drain_timeout: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            request_timeout: Duration::from_secs(300),
            drain_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read bound address: {0}")]
    LocalAddr(#[source] std::io::Error),
}

/// A bound listener, ready to accept connections.
pub struct ExecutionListener {
    listener: TcpListener,
    config: ListenerConfig,
}

impl ExecutionListener {
    pub async fn bind(config: ListenerConfig) -> Result<Self, ListenerError> {
        let addr = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind((config.host.as_str(), config.port))
            .await
            .map_err(|source| ListenerError::Bind { addr, source })?;
        Ok(Self { listener, config })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ListenerError> {
        self.listener.local_addr().map_err(ListenerError::LocalAddr)
    }

    /// Accept connections until `shutdown` fires, then drain in-flight work.
    pub async fn run(self, executor: Arc<CommandExecutor>, shutdown: CancellationToken) {
        let tracker = TaskTracker::new();
        // Fired only when draining takes longer than drain_timeout.
        let abort = CancellationToken::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, no longer accepting connections");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let id = ConnectionId::new();
                        let span = tracing::info_span!("connection", %id, %peer);
                        let executor = Arc::clone(&executor);
                        let abort = abort.clone();
                        let request_timeout = self.config.request_timeout;
                        tracker.spawn(
                            handle_connection(stream, executor, request_timeout, abort)
                                .instrument(span),
                        );
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        }

        tracker.close();
        if tokio::time::timeout(self.config.drain_timeout, tracker.wait())
            .await
            .is_err()
        {
            warn!(
                in_flight = tracker.len(),
                "Drain timeout elapsed, terminating running commands"
            );
            abort.cancel();
            tracker.wait().await;
        }
        info!("Listener stopped");
    }
}

/// Bind and serve until `shutdown` fires.
pub async fn serve(
    config: ListenerConfig,
    executor: Arc<CommandExecutor>,
    shutdown: CancellationToken,
) -> Result<(), ListenerError> {
    let listener = ExecutionListener::bind(config).await?;
    info!("PowerShell listener on {}", listener.local_addr()?);
    listener.run(executor, shutdown).await;
    Ok(())
}

async fn handle_connection(
    stream: TcpStream,
    executor: Arc<CommandExecutor>,
    request_timeout: Duration,
    cancel: CancellationToken,
) {
    info!("Client connected");
    let (read_half, write_half) = stream.into_split();
    let mut reader = FramedRead::new(read_half, JsonLineCodec::<ExecutionRequest>::new());
    let mut writer = FramedWrite::new(write_half, JsonLineCodec::<ExecutionResult>::new());

    let result = match tokio::time::timeout(request_timeout, reader.next()).await {
        Err(_) => {
            warn!(timeout_secs = request_timeout.as_secs(), "Timed out waiting for request");
            ExecutionResult::failure(format!(
                "timed out after {}s waiting for request",
                request_timeout.as_secs()
            ))
        }
        Ok(None) => {
            info!("Client disconnected without sending a request");
            return;
        }
        Ok(Some(Ok(request))) => {
            info!(commands = request.commands().len(), "Request received");
            executor.run(&request, &cancel).await
        }
        Ok(Some(Err(CodecError::Io(e)))) => {
            warn!(error = %e, "Failed to read request");
            return;
        }
        Ok(Some(Err(e))) => {
            warn!(error = %e, "Rejecting malformed request");
            ExecutionResult::failure(format!("invalid request: {e}"))
        }
    };

    let (ok, code) = (result.ok, result.code);
    if let Err(e) = writer.send(result).await {
        warn!(error = %e, "Failed to send response");
        return;
    }
    if let Err(e) = writer.close().await {
        warn!(error = %e, "Failed to close connection");
        return;
    }
    info!(ok, code, "Response sent");
}

/// Wait for SIGINT or SIGTERM.
///
/// If a handler cannot be installed, that signal is ignored and the error logged.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listener_config_default() {
        let config = ListenerConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8765);
        assert_eq!(config.request_timeout, Duration::from_secs(300));
    }

    #[tokio::test]
    async fn bind_failure_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let config = ListenerConfig {
            host: "127.0.0.1".into(),
            port,
            ..Default::default()
        };
        let err = ExecutionListener::bind(config).await.err().unwrap();
        assert!(matches!(err, ListenerError::Bind { .. }));
        assert!(err.to_string().contains(&format!("127.0.0.1:{port}")));
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};

        use crate::bridge::protocol::NO_EXIT_CODE;
        use crate::executor::Interpreter;

        struct Running {
            addr: SocketAddr,
            shutdown: CancellationToken,
            handle: tokio::task::JoinHandle<()>,
        }

        async fn start(config: ListenerConfig) -> Running {
            let executor = Arc::new(CommandExecutor::new(vec![Interpreter::new("sh", ["-c"])]));
            let listener = ExecutionListener::bind(ListenerConfig {
                host: "127.0.0.1".into(),
                port: 0,
                ..config
            })
            .await
            .unwrap();
            let addr = listener.local_addr().unwrap();
            let shutdown = CancellationToken::new();
            let handle = tokio::spawn(listener.run(executor, shutdown.clone()));
            Running {
                addr,
                shutdown,
                handle,
            }
        }

        /// Send raw bytes, optionally half-close, and read the response line.
        async fn exchange(addr: SocketAddr, payload: &[u8], half_close: bool) -> ExecutionResult {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(payload).await.unwrap();
            if half_close {
                stream.shutdown().await.unwrap();
            }
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            assert!(line.ends_with('\n'));

            let mut rest = Vec::new();
            reader.read_to_end(&mut rest).await.unwrap();
            assert!(rest.is_empty(), "listener must close after one response");

            serde_json::from_str(&line).unwrap()
        }

        #[tokio::test]
        async fn runs_command_and_reports_exit_code() {
            let running = start(ListenerConfig::default()).await;

            let result =
                exchange(running.addr, b"{\"command\":\"echo hello; exit 4\"}\n", false).await;

            assert!(result.ok);
            assert_eq!(result.stdout, "hello\n");
            assert_eq!(result.code, 4);
            running.shutdown.cancel();
            running.handle.await.unwrap();
        }

        #[tokio::test]
        async fn request_without_newline_is_accepted_on_half_close() {
            let running = start(ListenerConfig::default()).await;

            let result = exchange(running.addr, b"{\"command\":\"echo hi\"}", true).await;

            assert_eq!(result, ExecutionResult::exited("hi\n", "", 0));
        }

        #[tokio::test]
        async fn malformed_json_is_rejected_and_listener_survives() {
            let running = start(ListenerConfig::default()).await;

            let bad = exchange(running.addr, b"{\"command\":\n", false).await;
            assert!(!bad.ok);
            assert_eq!(bad.code, NO_EXIT_CODE);
            assert!(bad.stderr.starts_with("invalid request"));

            let truncated = exchange(running.addr, b"{\"command\":", true).await;
            assert!(!truncated.ok);
            assert!(truncated.stderr.contains("without a complete line"));

            let wrong_shape = exchange(running.addr, b"{\"cmd\":\"echo\"}\n", false).await;
            assert!(!wrong_shape.ok);

            let good = exchange(running.addr, b"{\"command\":\"echo still here\"}\n", false).await;
            assert_eq!(good.stdout, "still here\n");
        }

        #[tokio::test]
        async fn idle_client_times_out() {
            let running = start(ListenerConfig {
                request_timeout: Duration::from_millis(100),
                ..Default::default()
            })
            .await;

            let result = exchange(running.addr, b"", false).await;

            assert!(!result.ok);
            assert!(result.stderr.contains("waiting for request"));
        }

        #[tokio::test]
        async fn serves_connections_concurrently() {
            let running = start(ListenerConfig::default()).await;

            let slow = tokio::spawn(exchange(
                running.addr,
                b"{\"command\":\"sleep 1; echo slow\"}\n",
                false,
            ));
            let fast = exchange(running.addr, b"{\"command\":\"echo fast\"}\n", false).await;

            assert_eq!(fast.stdout, "fast\n");
            assert!(!slow.is_finished());
            assert_eq!(slow.await.unwrap().stdout, "slow\n");
        }

        #[tokio::test]
        async fn shutdown_waits_for_running_command() {
            let running = start(ListenerConfig::default()).await;

            let in_flight = tokio::spawn(exchange(
                running.addr,
                b"{\"command\":\"sleep 0.3; echo done\"}\n",
                false,
            ));
            tokio::time::sleep(Duration::from_millis(100)).await;
            running.shutdown.cancel();
            running.handle.await.unwrap();

            assert_eq!(in_flight.await.unwrap().stdout, "done\n");
            assert!(TcpStream::connect(running.addr).await.is_err());
        }

        #[tokio::test]
        async fn drain_timeout_kills_running_command() {
            let running = start(ListenerConfig {
                drain_timeout: Duration::from_millis(100),
                ..Default::default()
            })
            .await;

            let in_flight = tokio::spawn(exchange(
                running.addr,
                b"{\"command\":\"sleep 5\"}\n",
                false,
            ));
            tokio::time::sleep(Duration::from_millis(100)).await;
            running.shutdown.cancel();
            running.handle.await.unwrap();

            let result = in_flight.await.unwrap();
            assert!(!result.ok);
            assert!(result.stderr.contains("cancelled"));
        }
    }
}
