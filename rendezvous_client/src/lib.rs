//! WebRTC signaling client for HTTP long-polling rendezvous servers
//!
//! This crate signs a peer in to a rendezvous server, keeps a directory of the
//! other signed-in peers and relays offers, answers and ICE candidates between
//! the server and a local media engine.
//!
//! # Protocol
//!
//! Every exchange is a plain HTTP request:
//!
//! - **GET /sign_in?peer_name={name}** - Register; the body lists peers
//! - **GET /wait?peer_id={id}** - Long-poll for the next event
//! - **GET /heartbeat?peer_id={id}** - Keep the registration alive
//! - **POST /message?peer_id={id}&to={peer}** - Send a text body to a peer
//! - **GET /sign_out?peer_id={id}** - Unregister
//!
//! ## Roster Format (server → client)
//!
//! One record per line, the caller first in the sign-in response:
//! ```text
//! TEST,1,1
//! renderingserver,905,1
//! ```
//!
//! Fields are `name,id,connected`. A `/wait` response carries the originating
//! peer id in its `Pragma` header; when that is the caller's own id the body is
//! a roster delta from the server, and `connected` of `0` means the peer left.
//!
//! ## Peer Messages
//!
//! - `{"type":"offer","sdp":"..."}` / `{"type":"answer","sdp":"..."}` - Session description
//! - `{"candidate":"...","sdpMid":"video","sdpMLineIndex":0}` - ICE candidate
//! - `BYE` - Hangup
//!
//! Anything else is passed to the observer untouched.
//!
//! # Example
//!
//! ```no_run
//! use rendezvous_client::{ClientConfig, NullMediaEngine, SignalingSession, TracingObserver};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::new("http://127.0.0.1:8888");
//! let mut session =
//!     SignalingSession::with_http(config, Arc::new(NullMediaEngine), Arc::new(TracingObserver))?;
//!
//! for peer in session.sign_in("TEST").await? {
//!     println!("{} is online as {}", peer.name, peer.id);
//! }
//! session.disconnect().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod directory;
pub mod error;
pub mod media;
pub mod observer;
pub mod relay;
pub mod roster;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testing;

pub use config::ClientConfig;
pub use directory::{DirectoryChange, PeerDirectory, PeerEntry, PeerId};
pub use error::{ConfigError, SignalingError, TransportError};
pub use media::{IceCandidate, MediaEngine, MediaEvent, NullMediaEngine, SdpType, SessionDescription};
pub use observer::{NoopObserver, SignalingObserver, TracingObserver};
pub use relay::{Envelope, NegotiationRelay, Routed};
pub use roster::RosterRecord;
pub use session::{
    PollOutcome, SelfIdentity, SessionId, SessionState, SessionStatus, SignOut, SignalingSession,
};
pub use transport::{HttpResponse, HttpTransport, Transport};
