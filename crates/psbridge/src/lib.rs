//! psbridge: forwards MCP `powershell` tool calls over TCP to a listener
//! that runs them in a local PowerShell.

mod version;

pub mod bridge;
pub mod cli;
pub mod executor;
pub mod frontend;
pub mod logging;
pub mod resolver;
pub mod transport;

pub use bridge::protocol::{ConnectionId, ExecutionRequest, ExecutionResult};
pub use executor::{CommandExecutor, Interpreter};
pub use frontend::{CommandDispatch, run_adapter};
pub use resolver::{ListenerEndpoint, ResolverConfig, resolve_candidates};
pub use transport::{
    ClientConfig, ExecutionListener, ListenerConfig, TransportClient, TransportError, serve,
};
pub use version::{PSBRIDGE_VERSION, SERVER_NAME, ServerInfo};
