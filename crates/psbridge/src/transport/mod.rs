//! TCP transport between the bridge and the execution listener.
//!
//! Both sides speak the newline-delimited JSON protocol from
//! [`crate::bridge`], one request and one response per connection.

pub mod client;
pub mod listener;

pub use client::{ClientConfig, TransportClient, TransportError};
pub use listener::{ExecutionListener, ListenerConfig, ListenerError, serve, shutdown_signal};
