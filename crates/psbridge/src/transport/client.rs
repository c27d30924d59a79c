//! Transport client: one TCP connection per call to the execution listener.
//!
//! Candidates come from the [`resolver`](crate::resolver); the first one that
//! accepts a connection is used and no further candidate is tried. Every
//! failure is returned as a [`TransportError`] from [`TransportClient::try_call`]
//! or folded into an `ok=false` result by [`TransportClient::call`].

use std::io;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::bridge::codec::{CodecError, JsonLineCodec};
use crate::bridge::protocol::{ExecutionRequest, ExecutionResult};
use crate::resolver::{self, ListenerEndpoint, ResolverConfig};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub resolver: ResolverConfig,
    /// Bound on each connection attempt.
    pub connect_timeout: Duration,
    /// Bound on waiting for the response once the request is sent.
    pub response_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            resolver: ResolverConfig::default(),
            connect_timeout: Duration::from_secs(2),
            response_timeout: Duration::from_secs(300),
        }
    }
}

/// One failed connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectAttempt {
    pub endpoint: ListenerEndpoint,
    pub reason: String,
}

impl std::fmt::Display for ConnectAttempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.endpoint, self.reason)
    }
}

fn join_attempts(attempts: &[ConnectAttempt]) -> String {
    if attempts.is_empty() {
        return "no candidates".to_string();
    }
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("could not connect to listener ({})", join_attempts(.0))]
    Unreachable(Vec<ConnectAttempt>),

    #[error("failed to send request to {endpoint}: {source}")]
    Send {
        endpoint: ListenerEndpoint,
        #[source]
        source: CodecError,
    },

    #[error("timed out after {}s sending request to {endpoint}", .timeout.as_secs_f64())]
    SendTimeout {
        endpoint: ListenerEndpoint,
        timeout: Duration,
    },

    #[error("timed out after {}s waiting for response from {endpoint}", .timeout.as_secs_f64())]
    ResponseTimeout {
        endpoint: ListenerEndpoint,
        timeout: Duration,
    },

    #[error("connection to {endpoint} was reset before a full response was received")]
    Reset { endpoint: ListenerEndpoint },

    #[error("{endpoint} closed the connection without sending a response")]
    Closed { endpoint: ListenerEndpoint },

    #[error("{endpoint} closed the connection mid-response ({received} bytes received)")]
    Truncated {
        endpoint: ListenerEndpoint,
        received: usize,
    },

    #[error("malformed response from {endpoint}: {source}")]
    MalformedResponse {
        endpoint: ListenerEndpoint,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to read response from {endpoint}: {source}")]
    Read {
        endpoint: ListenerEndpoint,
        #[source]
        source: io::Error,
    },
}

/// Stateless client; every call opens and closes its own connection.
#[derive(Debug, Clone)]
pub struct TransportClient {
    config: ClientConfig,
}

impl TransportClient {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Run a request on the listener. Failures become `ok=false` results.
    pub async fn call(&self, request: ExecutionRequest) -> ExecutionResult {
        match self.try_call(request).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(error = %e, "Listener call failed");
                ExecutionResult::failure(e.to_string())
            }
        }
    }

    pub async fn try_call(
        &self,
        request: ExecutionRequest,
    ) -> Result<ExecutionResult, TransportError> {
        let candidates = resolver::discover(&self.config.resolver).await;
        let (stream, endpoint) = connect_first(candidates, self.config.connect_timeout).await?;
        exchange(stream, &endpoint, request, self.config.response_timeout).await
    }
}

/// Connect to the first candidate that accepts, trying each once.
pub async fn connect_first(
    candidates: impl IntoIterator<Item = ListenerEndpoint>,
    connect_timeout: Duration,
) -> Result<(TcpStream, ListenerEndpoint), TransportError> {
    let mut attempts = Vec::new();

    for endpoint in candidates {
        let connect = TcpStream::connect((endpoint.host.as_str(), endpoint.port));
        let reason = match tokio::time::timeout(connect_timeout, connect).await {
            Ok(Ok(stream)) => {
                tracing::debug!(
                    %endpoint,
                    failed_attempts = attempts.len(),
                    "Connected to listener"
                );
                return Ok((stream, endpoint));
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("connect timed out after {}s", connect_timeout.as_secs_f64()),
        };
        tracing::debug!(%endpoint, %reason, "Connection attempt failed");
        attempts.push(ConnectAttempt { endpoint, reason });
    }

    Err(TransportError::Unreachable(attempts))
}

/// Send one request on a connected stream and read the single response.
pub async fn exchange(
    stream: TcpStream,
    endpoint: &ListenerEndpoint,
    request: ExecutionRequest,
    response_timeout: Duration,
) -> Result<ExecutionResult, TransportError> {
    let (read_half, write_half) = stream.into_split();
    let mut writer = FramedWrite::new(write_half, JsonLineCodec::<ExecutionRequest>::new());
    let mut reader = FramedRead::new(read_half, JsonLineCodec::<ExecutionResult>::new());

    let send = async {
        writer.send(request).await?;
        // Half-close marks the end of the request.
        writer.close().await
    };
    let endpoint = endpoint.clone();
    match tokio::time::timeout(response_timeout, send).await {
        Err(_) => {
            return Err(TransportError::SendTimeout {
                endpoint,
                timeout: response_timeout,
            });
        }
        Ok(Err(source)) => return Err(TransportError::Send { endpoint, source }),
        Ok(Ok(())) => {}
    }

    match tokio::time::timeout(response_timeout, reader.next()).await {
        Err(_) => Err(TransportError::ResponseTimeout {
            endpoint,
            timeout: response_timeout,
        }),
        Ok(None) => Err(TransportError::Closed { endpoint }),
        Ok(Some(Ok(result))) => {
            tracing::debug!(%endpoint, ok = result.ok, code = result.code, "Response received");
            Ok(result)
        }
        Ok(Some(Err(CodecError::Json(source)))) => {
            Err(TransportError::MalformedResponse { endpoint, source })
        }
        Ok(Some(Err(CodecError::Truncated { received }))) => {
            Err(TransportError::Truncated { endpoint, received })
        }
        Ok(Some(Err(CodecError::Io(e)))) if e.kind() == io::ErrorKind::ConnectionReset => {
            Err(TransportError::Reset { endpoint })
        }
        Ok(Some(Err(CodecError::Io(source)))) => Err(TransportError::Read { endpoint, source }),
    }
}
