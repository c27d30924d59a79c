//! Client-facing session loop.
//!
//! Reads one framed message at a time, answers MCP handshake methods
//! locally and forwards `powershell` tool calls through a [`CommandDispatch`].
//! Each reply uses the framing of the message it answers. The session ends
//! at end of input, or with an error when input ends mid-message.

use std::io;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::bridge::protocol::{ExecutionRequest, ExecutionResult};
use crate::frontend::framing::{Frame, FrameCodec, FrameError, Framing, Inbound};
use crate::frontend::rpc::{
    self, ClientRequest, RpcError, RpcMessage, RpcResponse, TOOL_NAME, decode_message,
};
use crate::transport::TransportClient;

/// Executes a tool call's request somewhere and reports the outcome.
#[async_trait]
pub trait CommandDispatch: Send + Sync {
    async fn dispatch(&self, request: ExecutionRequest) -> ExecutionResult;
}

#[async_trait]
impl CommandDispatch for TransportClient {
    async fn dispatch(&self, request: ExecutionRequest) -> ExecutionResult {
        self.call(request).await
    }
}

/// Serve one client session until its input ends.
pub async fn run_adapter<R, W, D>(reader: R, writer: W, dispatcher: &D) -> Result<(), FrameError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    D: CommandDispatch + ?Sized,
{
    let mut frames = FramedRead::new(reader, FrameCodec::new());
    let mut replies = FramedWrite::new(writer, FrameCodec::new());

    while let Some(inbound) = frames.next().await {
        let inbound = inbound.inspect_err(|e| {
            tracing::warn!(error = %e, "Client stream ended inside a message");
        })?;

        let (framing, reply) = match inbound {
            Inbound::Frame(frame) => (frame.framing, handle_message(&frame.body, dispatcher).await),
            Inbound::InvalidHeader { reason } => {
                tracing::warn!(%reason, "Rejecting message header");
                let reply = RpcResponse::error(Value::Null, RpcError::parse_error(reason));
                (Framing::ContentLength, Some(reply))
            }
        };

        if let Some(reply) = reply {
            let body = serde_json::to_vec(&reply).map_err(io::Error::other)?;
            replies.send(Frame::new(framing, body)).await?;
        }
    }

    tracing::debug!("Client input closed");
    Ok(())
}

/// Reply for one message body, or `None` when nothing should be sent.
async fn handle_message<D>(body: &[u8], dispatcher: &D) -> Option<RpcResponse>
where
    D: CommandDispatch + ?Sized,
{
    let RpcMessage { id, request } = match decode_message(body) {
        Ok(message) => message,
        Err(reply) => {
            tracing::warn!(error = ?reply.error, "Undecodable client message");
            return Some(reply);
        }
    };

    let Some(id) = id else {
        tracing::debug!(?request, "Notification");
        return None;
    };

    let outcome = match request {
        ClientRequest::Initialize => Ok(rpc::initialize_result()),
        ClientRequest::Initialized => {
            tracing::debug!("Initialized sent with an id; ignoring");
            return None;
        }
        ClientRequest::Ping => Ok(json!({})),
        ClientRequest::ListTools => Ok(rpc::tools_list_result()),
        ClientRequest::CallTool { name, arguments } => {
            call_tool(&name, &arguments, dispatcher).await
        }
        ClientRequest::Unknown(method) => {
            tracing::debug!(%method, "Unknown method");
            Err(RpcError::method_not_found(&method))
        }
        ClientRequest::MissingMethod => Err(RpcError::invalid_request()),
    };

    Some(match outcome {
        Ok(result) => RpcResponse::success(id, result),
        Err(error) => RpcResponse::error(id, error),
    })
}

async fn call_tool<D>(name: &str, arguments: &Value, dispatcher: &D) -> Result<Value, RpcError>
where
    D: CommandDispatch + ?Sized,
{
    if name.is_empty() {
        return Err(RpcError::invalid_params("Missing tool name"));
    }
    if name != TOOL_NAME {
        return Err(RpcError::tool_not_found(name));
    }

    let request = rpc::parse_tool_arguments(arguments)?;
    let result = dispatcher.dispatch(request).await;
    tracing::info!(ok = result.ok, code = result.code, "Tool call finished");
    Ok(rpc::tool_call_result(&result))
}
