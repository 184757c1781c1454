//! Media-engine collaborator
//!
//! The signaling client does not own a peer connection. It hands remote
//! descriptions and candidates to a [`MediaEngine`] and is told about local
//! ones through [`MediaEvent`]s.

use crate::PeerId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of session description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

impl SdpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SdpType::Offer => "offer",
            SdpType::Answer => "answer",
        }
    }
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session description as exchanged over signaling
///
/// Wire form: `{"type":"answer","sdp":"v=0\r\n..."}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

/// ICE candidate as exchanged over signaling
///
/// Wire form: `{"candidate":"candidate:...","sdpMid":"video","sdpMLineIndex":0}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid")]
    pub sdp_mid: String,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: u32,
}

/// Sink for remote negotiation payloads
///
/// Called from the session's control task, one call at a time.
pub trait MediaEngine: Send + Sync {
    /// A peer sent an offer or answer
    fn apply_remote_description(&self, peer: PeerId, description: &SessionDescription);

    /// A peer sent an ICE candidate
    fn add_remote_ice_candidate(&self, peer: PeerId, candidate: &IceCandidate);
}

/// Events produced by the media engine and fed back into the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    /// A local offer or answer is ready to be sent to `peer`
    LocalDescriptionReady {
        peer: PeerId,
        description: SessionDescription,
    },
    /// A local candidate was gathered for the connection with `peer`
    LocalIceCandidateGathered { peer: PeerId, candidate: IceCandidate },
    /// Descriptions are applied on both sides and ICE connectivity is up
    ConnectionEstablished { peer: PeerId },
    /// The peer connection with `peer` went away
    ConnectionClosed { peer: PeerId },
}

impl MediaEvent {
    /// Peer the event concerns
    pub fn peer(&self) -> PeerId {
        match self {
            MediaEvent::LocalDescriptionReady { peer, .. }
            | MediaEvent::LocalIceCandidateGathered { peer, .. }
            | MediaEvent::ConnectionEstablished { peer }
            | MediaEvent::ConnectionClosed { peer } => *peer,
        }
    }
}

/// [`MediaEngine`] that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMediaEngine;

impl MediaEngine for NullMediaEngine {
    fn apply_remote_description(&self, _peer: PeerId, _description: &SessionDescription) {}

    fn add_remote_ice_candidate(&self, _peer: PeerId, _candidate: &IceCandidate) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn description_wire_form() {
        let description = SessionDescription {
            sdp_type: SdpType::Offer,
            sdp: "v=0\r\n".into(),
        };
        let json = serde_json::to_value(&description).unwrap();
        assert_eq!(json, serde_json::json!({"type": "offer", "sdp": "v=0\r\n"}));
    }

    #[test]
    fn candidate_wire_form() {
        let candidate: IceCandidate = serde_json::from_str(
            r#"{"candidate" : "candidate:337435484 1 udp 41754367 13.89.232.16 50838 typ relay","sdpMLineIndex" : 0,"sdpMid" : "video"}"#,
        )
        .unwrap();
        assert_eq!(candidate.sdp_mid, "video");
        assert_eq!(candidate.sdp_mline_index, 0);
    }

    #[test]
    fn unknown_sdp_type_is_rejected() {
        let result = serde_json::from_str::<SessionDescription>(r#"{"type":"rollback","sdp":""}"#);
        assert!(result.is_err());
    }
}
