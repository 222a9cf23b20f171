//! wsrpc command line client.
//!
//! Connects to a JSON-RPC WebSocket endpoint, issues one or more calls and
//! prints each response as a JSON line on stdout. Session events are logged
//! to stderr.

use anyhow::Context;
use clap::Parser;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use wsrpc_session::{Session, SessionEvent};
use wsrpc_wire::Request;

mod config;
mod logging;

use config::ClientConfig;
use logging::WsRpcLogFormatter;

/// JSON-RPC over WebSocket client
#[derive(Parser, Debug)]
#[command(name = "wsrpc", version, about = "JSON-RPC over WebSocket client with auto-reconnect")]
struct Args {
    /// Endpoint to dial, e.g. ws://127.0.0.1:8546 (overrides the config file)
    #[arg(long)]
    endpoint: Option<String>,

    /// Path to the YAML config file
    #[arg(long, default_value = "wsrpc.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Method to call
    #[arg(long)]
    method: String,

    /// Call parameters as JSON, e.g. '["latest", false]'
    #[arg(long)]
    params: Option<String>,

    /// Number of times to issue the call
    #[arg(long, default_value_t = 1)]
    repeat: u32,

    /// Per-request timeout, e.g. 30s (overrides the config file)
    #[arg(long)]
    timeout: Option<humantime::Duration>,

    /// Disable automatic reconnection
    #[arg(long)]
    no_reconnect: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("warn")
        .add_directive(format!("wsrpc={}", args.log_level).parse()?)
        .add_directive(format!("wsrpc_session={}", args.log_level).parse()?)
        .add_directive(format!("wsrpc_wire={}", args.log_level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .event_format(WsRpcLogFormatter::new("wsrpc"))
        .init();

    info!("Starting wsrpc v{}", env!("CARGO_PKG_VERSION"));

    let mut client_config = ClientConfig::load_from_file(&args.config)?;
    if let Some(endpoint) = &args.endpoint {
        client_config.endpoint = endpoint.clone();
    }
    if let Some(timeout) = args.timeout {
        client_config.session.request_timeout_ms = Some(Duration::from(timeout).as_millis() as u64);
    }
    if args.no_reconnect {
        client_config.session.auto_reconnect = false;
    }

    let params: Option<Value> = args
        .params
        .as_deref()
        .map(serde_json::from_str::<Value>)
        .transpose()
        .context("--params is not valid JSON")?;

    let session = Session::websocket(client_config.endpoint.clone(), client_config.session_config());
    let event_log = tokio::spawn(log_events(session.subscribe()));

    session
        .connect()
        .with_context(|| format!("Failed to connect to {}", client_config.endpoint))?;

    let mut failures = 0u32;
    for round in 1..=args.repeat {
        let id = uuid::Uuid::new_v4().to_string();
        debug!("Calling {} (round {}, id {})", args.method, round, id);

        let handle = session
            .request(Request::new(id, args.method.clone(), params.clone()))
            .context("Failed to issue request")?;

        match handle.await {
            Ok(response) => println!("{}", serde_json::to_string(&response)?),
            Err(e) => {
                error!("Call {} failed: {}", args.method, e);
                failures += 1;
            }
        }
    }

    let stats = session.stats();
    info!(
        "Done: {} sent, {} answered, {} reconnect attempts",
        stats.requests_sent, stats.responses_matched, stats.reconnect_attempts
    );

    session.disconnect(None, Some("client done"));
    session.dispose();
    event_log.abort();

    if failures > 0 {
        anyhow::bail!("{} of {} calls failed", failures, args.repeat);
    }
    Ok(())
}

async fn log_events(mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::Connect) => info!("Session connected"),
            Ok(SessionEvent::Disconnect { code, reason }) => {
                info!("Session disconnected (code {}): {}", code, reason)
            }
            Ok(SessionEvent::Message(value)) => debug!("Received {}", value),
            Ok(SessionEvent::Error(e)) => warn!("Session error: {}", e),
            Err(RecvError::Lagged(skipped)) => {
                warn!("Event log lagged, skipped {} events", skipped)
            }
            Err(RecvError::Closed) => break,
        }
    }
}
