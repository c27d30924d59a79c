//! psbridge: MCP server on stdin/stdout exposing one `powershell` tool.
//!
//! Each tool call is forwarded to a psbridge-listener over TCP. Without
//! `--host`, the listener is looked for on the WSL host, common VM gateways
//! and localhost, in that order.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use psbridge::cli::{LogArgs, parse_seconds};
use psbridge::frontend::run_adapter;
use psbridge::resolver::{DEFAULT_FALLBACK_HOSTS, DEFAULT_PORT, DEFAULT_RESOLV_CONF, ResolverConfig};
use psbridge::transport::{ClientConfig, TransportClient};

#[derive(Parser, Debug)]
#[command(name = "psbridge", version)]
#[command(about = "MCP bridge forwarding PowerShell commands to a psbridge listener")]
struct Args {
    /// Listener host; discovered when omitted
    #[arg(long, env = "PS_BRIDGE_HOST")]
    host: Option<String>,

    /// Listener port
    #[arg(long, env = "PS_BRIDGE_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Seconds to wait for each connection attempt
    #[arg(long, default_value = "2", value_parser = parse_seconds)]
    connect_timeout: Duration,

    /// Seconds to wait for a command's response
    #[arg(long, default_value = "300", value_parser = parse_seconds)]
    timeout: Duration,

    /// Host tried during discovery (repeatable; replaces the built-in list)
    #[arg(long = "fallback-host", value_name = "HOST")]
    fallback_hosts: Vec<String>,

    /// Resolver configuration read for the nameserver candidate
    #[arg(long, default_value = DEFAULT_RESOLV_CONF)]
    resolv_conf: PathBuf,

    #[command(flatten)]
    log: LogArgs,
}

impl Args {
    fn client_config(&self) -> ClientConfig {
        let fallback_hosts = if self.fallback_hosts.is_empty() {
            DEFAULT_FALLBACK_HOSTS.iter().map(|h| h.to_string()).collect()
        } else {
            self.fallback_hosts.clone()
        };
        ClientConfig {
            resolver: ResolverConfig {
                host: self.host.clone(),
                port: self.port,
                fallback_hosts,
                resolv_conf: self.resolv_conf.clone(),
            },
            connect_timeout: self.connect_timeout,
            response_timeout: self.timeout,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    args.log.init();

    let config = args.client_config();
    info!(
        version = psbridge::PSBRIDGE_VERSION,
        host = config.resolver.host.as_deref().unwrap_or("(discover)"),
        port = config.resolver.port,
        "Starting psbridge"
    );
    let client = TransportClient::new(config);

    run_adapter(tokio::io::stdin(), tokio::io::stdout(), &client).await?;
    info!("Session ended");
    Ok(())
}
