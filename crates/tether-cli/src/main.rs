//! # Tether CLI
//!
//! Opens a chat session, logs presence, messages and room events, and sends
//! commands typed on stdin.
//!
//! ## Usage
//!
//! ```bash
//! # Run with tether.toml from the search path
//! tether
//!
//! # Run with a custom config
//! tether --config /path/to/tether.toml
//!
//! # Override settings with environment variables
//! TETHER_CLIENT__PEER_ID=alice TETHER_CLIENT__APP_ID=my-app tether
//! ```

mod commands;
mod config;
mod metrics;

use anyhow::{Context, Result};
use tether_client::{Client, Event, EventKind, SessionState};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// `--config <path>` from the command line, else `TETHER_CONFIG`.
fn config_path() -> Option<String> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" || arg == "-c" {
            return args.next();
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(path.to_string());
        }
    }
    std::env::var("TETHER_CONFIG").ok()
}

fn log_events(client: &Client) {
    for kind in EventKind::ALL {
        client.on(kind, |event| match event {
            Event::Online(peers) => info!(peers = ?peers, "Online"),
            Event::Offline(peers) => info!(peers = ?peers, "Offline"),
            Event::Message(message) => info!(
                from = ?message.from_peer_id,
                room = ?message.room_id,
                msg = ?message.msg,
                "Message"
            ),
            Event::MembersJoined(room) => {
                info!(room = ?room.room_id, peers = ?room.room_peer_ids, "Members joined")
            }
            Event::MembersLeft(room) => {
                info!(room = ?room.room_id, peers = ?room.room_peer_ids, "Members left")
            }
            Event::Joined(room) => info!(room = ?room.room_id, by = ?room.by_peer_id, "Joined"),
            Event::Left(room) => info!(room = ?room.room_id, by = ?room.by_peer_id, "Left"),
            Event::Close(reason) => warn!(reason = %reason, "Connection closed"),
        });
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "tether=info,tether_client=debug,tether_transport=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load(config_path().as_deref())?;

    if config.metrics.enabled {
        metrics::start_metrics_server(config.metrics.port)?;
    }

    let client = Client::builder(config.client.clone())
        .build()
        .context("Failed to build client")?;
    log_events(&client);

    info!(peer = %client.peer_id(), app = %config.client.app_id, "Opening session");
    client.open().await.context("Failed to open session")?;
    info!("Session open; type /quit to exit");

    let mut state = client.state_changes();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            _ = state.wait_for(|state| *state == SessionState::Closed) => {
                warn!("Session ended");
                return Ok(());
            }
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                match commands::parse(&line) {
                    Ok(Some(commands::Input::Quit)) => break,
                    Ok(Some(input)) => {
                        let client = client.clone();
                        tokio::spawn(async move {
                            if let Err(e) = commands::execute(&client, input).await {
                                warn!(error = %e, "Command failed");
                            }
                        });
                    }
                    Ok(None) => {}
                    Err(usage) => warn!("{}", usage),
                }
            }
        }
    }

    client.close().await.context("Failed to close session")?;
    info!("Session closed");
    Ok(())
}
