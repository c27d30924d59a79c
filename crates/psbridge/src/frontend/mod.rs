//! MCP-facing side of the bridge.
//!
//! # Architecture
//!
//! - **framing**: JSON-per-line / `Content-Length` detection and codec
//! - **rpc**: JSON-RPC envelope, MCP method set and tool result shaping
//! - **adapter**: the stdin/stdout session loop

pub mod adapter;
pub mod framing;
pub mod rpc;

pub use adapter::{CommandDispatch, run_adapter};
pub use framing::{Frame, FrameCodec, FrameError, Framing, detect_framing};
