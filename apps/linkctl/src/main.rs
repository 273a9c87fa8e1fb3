use linkctl::error::LinkctlError;
use linkctl::logger::{initialize as logger_initialize, level_for_verbosity};

use daemon_link::config::{CONFIG_FILE_NAME, LinkConfig};
use daemon_link::connection::DaemonConnection;
use daemon_link::message::{EventKind, RequestKind};
use daemon_link::transport::WebSocketConnector;

use common::ErrorLocation;

use std::panic::Location;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::info;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Directory name under the platform config/data directories.
const APP_DIR: &str = "linkctl";

/// How long `status` waits for each state event before reporting unknown.
const STATUS_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Parser)]
#[command(name = "linkctl", version, about = "Inspect and drive the VPN daemon link")]
struct Cli {
    /// Daemon WebSocket endpoint, overriding the config file.
    #[arg(long)]
    endpoint: Option<String>,

    /// Link config file (defaults to the platform config directory).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Connect, print the daemon's current state, and exit.
    Status,
    /// Stream daemon events to stdout until interrupted.
    Watch,
    /// Fetch a one-time web auth token.
    Token,
    /// Redeem a voucher code.
    Redeem { code: String },
}

#[tokio::main]
async fn main() -> Result<(), LinkctlError> {
    let cli = Cli::parse();

    // Initialize logger FIRST
    logger_initialize(level_for_verbosity(cli.verbose))?;

    let config = load_config(&cli)?;
    info!("Using daemon endpoint {}", config.daemon_endpoint);

    let connector = WebSocketConnector::new(&config.daemon_endpoint)?;
    let link = DaemonConnection::new(
        Arc::new(connector),
        config.reconnect.clone(),
        config.initial_requests.clone(),
    );

    match cli.command {
        Command::Status => status(&link).await,
        Command::Watch => watch(&link).await,
        Command::Token => request(&link, RequestKind::FetchAuthToken, Value::Null).await,
        Command::Redeem { code } => {
            request(&link, RequestKind::SubmitVoucher, json!({ "voucher": code })).await
        }
    }
}

fn load_config(cli: &Cli) -> Result<LinkConfig, LinkctlError> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => dirs::config_dir()
            .ok_or_else(|| LinkctlError::Linkctl {
                message: "No config directory on this platform".to_string(),
                location: ErrorLocation::from(Location::caller()),
            })?
            .join(APP_DIR)
            .join(CONFIG_FILE_NAME),
    };

    let mut config = LinkConfig::load_or_default(&path);
    if let Some(endpoint) = &cli.endpoint {
        config.daemon_endpoint = endpoint.clone();
    }
    config.validate()?;

    Ok(config)
}

/// Print the latest value of every state kind, waiting for the connect-time
/// priming to answer. Kinds the daemon stays silent on report `unknown`.
async fn status(link: &DaemonConnection) -> Result<(), LinkctlError> {
    // Subscribe before connecting so the primed events are not missed.
    let mut subscriptions: Vec<_> = [
        EventKind::TunnelState,
        EventKind::DeviceState,
        EventKind::AccountExpiry,
        EventKind::RelayList,
        EventKind::Settings,
    ]
    .into_iter()
    .map(|kind| (kind, link.subscribe(kind)))
    .collect();

    link.connect().await?;

    for (kind, subscription) in &mut subscriptions {
        match timeout(STATUS_TIMEOUT, subscription.next()).await {
            Ok(Some(value)) => println!("{kind:?}: {value}"),
            _ => println!("{kind:?}: unknown"),
        }
    }

    link.disconnect().await;
    Ok(())
}

/// Stream every event kind to stdout until the process is interrupted.
async fn watch(link: &DaemonConnection) -> Result<(), LinkctlError> {
    let (event_tx, mut event_rx) = mpsc::channel(64);

    for kind in EventKind::ALL {
        let mut subscription = link.subscribe(kind);
        let event_tx = event_tx.clone();
        tokio::spawn(async move {
            while let Some(value) = subscription.next().await {
                if event_tx.send((kind, value)).await.is_err() {
                    break;
                }
            }
        });
    }
    drop(event_tx);

    link.connect().await?;

    while let Some((kind, value)) = event_rx.recv().await {
        println!("{kind:?}: {value}");
    }

    Ok(())
}

/// Send one correlated request and print the response payload.
async fn request(
    link: &DaemonConnection,
    kind: RequestKind,
    payload: Value,
) -> Result<(), LinkctlError> {
    link.connect().await?;

    let pending = link.send_request(kind, payload).await?;
    let response = pending.wait().await?;
    println!("{response}");

    link.disconnect().await;
    Ok(())
}
