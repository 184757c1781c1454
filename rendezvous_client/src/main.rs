//! Rendezvous client binary
//!
//! Signs in to a rendezvous server, logs roster changes and incoming
//! negotiation payloads, and signs out on Ctrl-C.
//!
//! # Usage
//!
//! ```bash
//! RUST_LOG=rendezvous_client=debug cargo run --bin rendezvous-client -- \
//!   --server-url http://127.0.0.1:8888 \
//!   --name TEST
//! ```

use clap::Parser;
use rendezvous_client::{
    ClientConfig, IceCandidate, MediaEngine, PeerId, SessionDescription, SessionState,
    SignalingSession, TracingObserver,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Rendezvous signaling client
///
/// Settings not given on the command line are read from `RENDEZVOUS_*`
/// environment variables.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Base URL of the rendezvous server
    #[arg(long)]
    server_url: Option<String>,

    /// Name to sign in with
    #[arg(short, long, default_value = "rendezvous-client", env = "RENDEZVOUS_PEER_NAME")]
    name: String,

    /// Seconds between heartbeats
    #[arg(long)]
    heartbeat_secs: Option<u64>,

    /// Consecutive background failures before giving up
    #[arg(long)]
    max_failures: Option<u32>,
}

/// Media engine for a client without media: logs what peers send
struct LoggingMedia;

impl MediaEngine for LoggingMedia {
    fn apply_remote_description(&self, peer: PeerId, description: &SessionDescription) {
        info!(%peer, sdp_type = %description.sdp_type, bytes = description.sdp.len(), "Remote description");
    }

    fn add_remote_ice_candidate(&self, peer: PeerId, candidate: &IceCandidate) {
        info!(%peer, candidate = %candidate.candidate, "Remote ICE candidate");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("rendezvous_client=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = ClientConfig::from_env()?;
    if let Some(url) = args.server_url {
        config.server_url = url;
    }
    if let Some(secs) = args.heartbeat_secs {
        config.heartbeat_interval = Duration::from_secs(secs);
    }
    if let Some(max) = args.max_failures {
        config.max_consecutive_failures = max;
    }

    info!(server = %config.server_url, name = %args.name, "Starting rendezvous client");
    let mut session =
        SignalingSession::with_http(config, Arc::new(LoggingMedia), Arc::new(TracingObserver))?;

    let peers = session.sign_in(&args.name).await?;
    info!(session = %session.id(), peers = peers.len(), "Online");

    let mut status = session.subscribe();
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Shutting down");
            let outcome = session.disconnect().await;
            info!(?outcome, "Signed out");
        }
        _ = status.wait_for(|s| s.state == SessionState::Disconnected) => {
            info!("Session ended by the server or peer");
        }
    }

    Ok(())
}
