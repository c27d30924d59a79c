//! Wire protocol between the bridge and the execution listener.
//!
//! This module provides the message types and codec for the TCP link that
//! carries one command execution per connection.
//!
//! # Architecture
//!
//! - **protocol**: Message types (ExecutionRequest, ExecutionResult)
//! - **codec**: Newline-delimited JSON codec for AsyncRead/AsyncWrite

pub mod codec;
pub mod protocol;
