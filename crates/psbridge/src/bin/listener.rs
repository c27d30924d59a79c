//! psbridge-listener: runs PowerShell commands received over TCP.
//!
//! Runs on the machine that owns the interpreter (typically the Windows
//! host); one newline-terminated JSON request per connection.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use psbridge::cli::{LogArgs, parse_seconds};
use psbridge::executor::CommandExecutor;
use psbridge::transport::{ListenerConfig, serve, shutdown_signal};

#[derive(Parser, Debug)]
#[command(name = "psbridge-listener", version)]
#[command(about = "TCP listener that runs PowerShell commands for psbridge")]
struct Args {
    /// Address to bind
    #[arg(long, env = "PS_LISTEN_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to bind
    #[arg(long, env = "PS_LISTEN_PORT", default_value_t = psbridge::resolver::DEFAULT_PORT)]
    port: u16,

    /// PowerShell executable tried before pwsh and powershell.exe
    #[arg(long, env = "POWERSHELL_EXE")]
    powershell: Option<String>,

    /// Seconds a client has to send its request
    #[arg(
        long,
        env = "PS_CLIENT_IDLE_TIMEOUT",
        default_value = "300",
        value_parser = parse_seconds
    )]
    request_timeout: Duration,

    /// Kill a command after this many seconds (no limit when unset)
    #[arg(long, env = "PS_EXEC_TIMEOUT", value_parser = parse_seconds)]
    exec_timeout: Option<Duration>,

    /// Seconds to wait for running commands on shutdown before killing them
    #[arg(long, default_value = "30", value_parser = parse_seconds)]
    drain_timeout: Duration,

    #[command(flatten)]
    log: LogArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    args.log.init();

    let executor =
        CommandExecutor::powershell(args.powershell.as_deref()).with_timeout(args.exec_timeout);
    let programs: Vec<&str> = executor.interpreters().iter().map(|i| i.program.as_str()).collect();
    info!(
        version = psbridge::PSBRIDGE_VERSION,
        interpreters = ?programs,
        exec_timeout_secs = args.exec_timeout.map(|t| t.as_secs_f64()),
        "Starting psbridge listener"
    );

    let config = ListenerConfig {
        host: args.host,
        port: args.port,
        request_timeout: args.request_timeout,
        drain_timeout: args.drain_timeout,
    };

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            info!("Shutdown signal received");
            shutdown.cancel();
        }
    });

    serve(config, Arc::new(executor), shutdown).await?;
    Ok(())
}
