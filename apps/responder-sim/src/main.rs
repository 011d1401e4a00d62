//! Responder device simulator.
//!
//! Connects one simulated responder to an edge node, streams a drifting
//! location fix, and logs room traffic. Configured via environment:
//! `EDGE_URL`, `INCIDENT_ID`, `RESPONDER_ID`, `LOCATION_PERIOD_SECS`.

use std::time::Duration;

use fireline_client::{ClientConfig, ClientEvent, EdgeClient, WsConnector};
use tracing_subscriber::EnvFilter;

struct SimConfig {
    edge_url: String,
    incident_id: String,
    responder_id: String,
    location_period: Duration,
    base_lat: f64,
    base_lng: f64,
}

impl SimConfig {
    fn from_env() -> Self {
        Self {
            edge_url: env_or("EDGE_URL", "ws://127.0.0.1:3000/"),
            incident_id: env_or("INCIDENT_ID", "training-1"),
            responder_id: std::env::var("RESPONDER_ID").unwrap_or_else(|_| default_responder_id()),
            location_period: Duration::from_secs(
                env_or("LOCATION_PERIOD_SECS", "5").parse().unwrap_or(5),
            ),
            base_lat: 37.7749,
            base_lng: -122.4194,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn default_responder_id() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "responder-sim".into())
}

/// Small pseudo-random drift derived from the clock, enough to make the
/// map move without pulling in a randomness dependency.
fn drift(value: f64, scale: f64) -> f64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    let offset = (nanos as f64 / u32::MAX as f64) * 2.0 - 1.0; // [-1.0, 1.0)
    value + offset * scale
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = SimConfig::from_env();
    tracing::info!(
        edge = %config.edge_url,
        incident = %config.incident_id,
        responder = %config.responder_id,
        "starting responder simulator"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(config))?;

    tracing::info!("simulator shut down");
    Ok(())
}

async fn run(config: SimConfig) -> anyhow::Result<()> {
    let client_config = ClientConfig::new(config.incident_id.as_str(), config.responder_id.as_str());
    let connector = WsConnector::new(config.edge_url.as_str());
    let (client, mut events) = EdgeClient::start(client_config, connector);

    // Room traffic log.
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ClientEvent::StateChanged(status) => {
                    tracing::info!(?status, "connection status");
                }
                ClientEvent::Joined { incident_id } => {
                    tracing::info!(incident = %incident_id, "joined incident");
                }
                ClientEvent::SnapshotApplied => {
                    tracing::info!("snapshot applied");
                }
                ClientEvent::Delivered { msg_id } => {
                    tracing::debug!(msg_id = %msg_id, "delivered");
                }
                ClientEvent::Broadcast(env) => {
                    tracing::info!(kind = %env.type_name, "room broadcast");
                }
                ClientEvent::ServerError { error } => {
                    tracing::warn!(error = %error, "edge rejected a message");
                }
                ClientEvent::Reconnecting {
                    attempt,
                    next_retry_secs,
                } => {
                    tracing::info!(attempt, next_retry_secs, "reconnecting");
                }
            }
        }
    });

    let mut lat = config.base_lat;
    let mut lng = config.base_lng;
    let mut ticker = tokio::time::interval(config.location_period);
    ticker.tick().await; // Skip the immediate first tick.

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                lat = drift(lat, 0.0005).clamp(-90.0, 90.0);
                lng = drift(lng, 0.0005).clamp(-180.0, 180.0);
                client.send_location(lat, lng, Some(10.0));
                tracing::debug!(lat, lng, "location queued");
            }
        }
    }

    client.shutdown();
    Ok(())
}
