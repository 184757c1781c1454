//! Caller-facing session events

use crate::PeerId;
use crate::error::SignalingError;
use tracing::{info, warn};

/// Receives session events
///
/// Registered once per session. Every method is called from a single task at a
/// time, never concurrently. All methods default to doing nothing.
pub trait SignalingObserver: Send + Sync {
    /// Sign-in succeeded and the server assigned `self_id`
    fn on_signed_in(&self, _self_id: PeerId) {}

    /// A peer signed in, or was listed in the sign-in roster
    fn on_peer_connected(&self, _id: PeerId, _name: &str) {}

    /// A peer signed out
    fn on_peer_disconnected(&self, _id: PeerId) {}

    /// A peer sent a hangup
    fn on_peer_hangup(&self, _id: PeerId) {}

    /// A peer sent something that is neither negotiation nor roster data
    fn on_message_from_peer(&self, _id: PeerId, _payload: &str) {}

    /// Sign-in failed, or a background request failed and the loop backs off
    fn on_server_connection_failure(&self, _error: &SignalingError) {}

    /// The session is back in `Disconnected`
    fn on_disconnected(&self) {}
}

/// Observer that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SignalingObserver for NoopObserver {}

/// Observer that logs every event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl SignalingObserver for TracingObserver {
    fn on_signed_in(&self, self_id: PeerId) {
        info!(%self_id, "Signed in");
    }

    fn on_peer_connected(&self, id: PeerId, name: &str) {
        info!(peer = %id, name, "Peer connected");
    }

    fn on_peer_disconnected(&self, id: PeerId) {
        info!(peer = %id, "Peer disconnected");
    }

    fn on_peer_hangup(&self, id: PeerId) {
        info!(peer = %id, "Peer hung up");
    }

    fn on_message_from_peer(&self, id: PeerId, payload: &str) {
        info!(peer = %id, payload, "Message from peer");
    }

    fn on_server_connection_failure(&self, error: &SignalingError) {
        warn!(%error, "Server connection failure");
    }

    fn on_disconnected(&self) {
        info!("Disconnected");
    }
}
