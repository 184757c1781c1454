//! Negotiation relay
//!
//! Classifies `/wait` bodies and routes them: negotiation payloads to the media
//! engine, roster deltas to the peer directory, anything else to the observer.

use crate::PeerId;
use crate::directory::{DirectoryChange, PeerDirectory};
use crate::error::SignalingError;
use crate::media::{IceCandidate, MediaEngine, SessionDescription};
use crate::observer::SignalingObserver;
use crate::roster::{RosterRecord, parse_roster};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Body a peer sends to end the call
pub const HANGUP_MESSAGE: &str = "BYE";

/// A classified signaling body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    RosterUpdate(Vec<RosterRecord>),
    SessionDescription(SessionDescription),
    IceCandidate(IceCandidate),
    Hangup,
    PlainText(String),
}

impl Envelope {
    /// Classify `body`
    ///
    /// In order: a JSON object with `sdp` is a session description and one
    /// with `candidate` is an ICE candidate; a body made of roster records is
    /// a roster update; `BYE` is a hangup; everything else is plain text.
    /// A JSON object that claims to be a description or candidate but lacks
    /// the required fields is malformed rather than plain text.
    pub fn classify(body: &str) -> Result<Self, SignalingError> {
        if body.trim().is_empty() {
            return Err(SignalingError::MalformedPayload("empty body".into()));
        }

        if let Ok(Value::Object(object)) = serde_json::from_str::<Value>(body) {
            if object.contains_key("sdp") {
                return serde_json::from_value(Value::Object(object))
                    .map(Envelope::SessionDescription)
                    .map_err(|e| {
                        SignalingError::MalformedPayload(format!("session description: {e}"))
                    });
            }
            if object.contains_key("candidate") {
                return serde_json::from_value(Value::Object(object))
                    .map(Envelope::IceCandidate)
                    .map_err(|e| SignalingError::MalformedPayload(format!("ICE candidate: {e}")));
            }
        }

        if let Ok(records) = parse_roster(body) {
            return Ok(Envelope::RosterUpdate(records));
        }

        if body.trim() == HANGUP_MESSAGE {
            return Ok(Envelope::Hangup);
        }

        Ok(Envelope::PlainText(body.to_string()))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::RosterUpdate(_) => "roster update",
            Envelope::SessionDescription(_) => "session description",
            Envelope::IceCandidate(_) => "ICE candidate",
            Envelope::Hangup => "hangup",
            Envelope::PlainText(_) => "plain text",
        }
    }
}

/// Where a body ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    /// Applied to the directory; `changes` entries were added, renamed or removed
    Directory { changes: usize },
    /// Handed to the media engine
    Negotiation { peer: PeerId },
    /// `peer` hung up
    Hangup { peer: PeerId },
    /// Delivered to the observer as an opaque message
    Message { peer: PeerId },
    /// Logged and discarded
    Dropped,
}

/// Routes classified bodies to their consumers
#[derive(Clone)]
pub struct NegotiationRelay {
    media: Arc<dyn MediaEngine>,
    directory: PeerDirectory,
    observer: Arc<dyn SignalingObserver>,
}

impl NegotiationRelay {
    pub fn new(
        media: Arc<dyn MediaEngine>,
        directory: PeerDirectory,
        observer: Arc<dyn SignalingObserver>,
    ) -> Self {
        Self {
            media,
            directory,
            observer,
        }
    }

    /// Classify and route one `/wait` body
    ///
    /// `from` is the peer named by the response's `Pragma` header. A missing
    /// header, or one naming `self_id`, marks a server notification; only
    /// those may touch the directory.
    pub fn relay(&self, self_id: PeerId, from: Option<PeerId>, body: &str) -> Routed {
        let envelope = match Envelope::classify(body) {
            Ok(envelope) => envelope,
            Err(error) => {
                warn!(%error, ?from, "Dropping signaling body");
                return Routed::Dropped;
            }
        };
        let sender = from.filter(|peer| *peer != self_id);
        debug!(kind = envelope.kind(), ?sender, "Classified signaling body");

        match (sender, envelope) {
            (None, Envelope::RosterUpdate(records)) => Routed::Directory {
                changes: self.apply_roster(self_id, &records),
            },
            (None, envelope) => {
                warn!(kind = envelope.kind(), "Dropping server notification that is not a roster update");
                Routed::Dropped
            }
            (Some(peer), Envelope::SessionDescription(description)) => {
                debug!(%peer, sdp_type = %description.sdp_type, "Applying remote description");
                self.media.apply_remote_description(peer, &description);
                Routed::Negotiation { peer }
            }
            (Some(peer), Envelope::IceCandidate(candidate)) => {
                debug!(%peer, sdp_mid = %candidate.sdp_mid, "Adding remote ICE candidate");
                self.media.add_remote_ice_candidate(peer, &candidate);
                Routed::Negotiation { peer }
            }
            (Some(peer), Envelope::Hangup) => {
                self.directory.remove(peer);
                self.observer.on_peer_hangup(peer);
                Routed::Hangup { peer }
            }
            // A peer cannot edit our roster; what looks like one is just text
            (Some(peer), Envelope::RosterUpdate(_)) => self.deliver(peer, body),
            (Some(peer), Envelope::PlainText(text)) => self.deliver(peer, &text),
        }
    }

    /// Apply roster records to the directory, skipping `self_id`
    ///
    /// Returns how many entries changed; unchanged re-announcements are not
    /// counted and not reported to the observer.
    pub fn apply_roster(&self, self_id: PeerId, records: &[RosterRecord]) -> usize {
        let mut changes = 0;
        for record in records.iter().filter(|record| record.id != self_id) {
            if record.connected {
                if let Some(change) = self.directory.add(record.id, record.name.clone()) {
                    if let DirectoryChange::Updated { previous, .. } = &change {
                        debug!(peer = %record.id, %previous, name = %record.name, "Peer renamed");
                    }
                    self.observer.on_peer_connected(record.id, &record.name);
                    changes += 1;
                }
            } else if self.directory.remove(record.id).is_some() {
                self.observer.on_peer_disconnected(record.id);
                changes += 1;
            }
        }
        changes
    }

    fn deliver(&self, peer: PeerId, payload: &str) -> Routed {
        self.observer.on_message_from_peer(peer, payload);
        Routed::Message { peer }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::SdpType;
    use crate::testing::{Event, MediaCall, RecordingMedia, RecordingObserver};

    const SELF: PeerId = PeerId(1);
    const SERVER: PeerId = PeerId(905);

    struct Fixture {
        relay: NegotiationRelay,
        media: Arc<RecordingMedia>,
        observer: Arc<RecordingObserver>,
        directory: PeerDirectory,
    }

    fn fixture() -> Fixture {
        let media = Arc::new(RecordingMedia::default());
        let observer = Arc::new(RecordingObserver::default());
        let directory = PeerDirectory::new();
        let relay = NegotiationRelay::new(media.clone(), directory.clone(), observer.clone());
        Fixture {
            relay,
            media,
            observer,
            directory,
        }
    }

    #[test]
    fn classifies_answer() {
        let envelope = Envelope::classify(r#"{"sdp":"v=0\r\n","type":"answer"}"#).unwrap();
        assert_eq!(
            envelope,
            Envelope::SessionDescription(SessionDescription {
                sdp_type: SdpType::Answer,
                sdp: "v=0\r\n".into()
            })
        );
    }

    #[test]
    fn classifies_candidate() {
        let envelope =
            Envelope::classify(r#"{"candidate":"candidate:1 1 udp 1 1.2.3.4 5 typ host","sdpMLineIndex":0,"sdpMid":"video"}"#)
                .unwrap();
        assert!(matches!(envelope, Envelope::IceCandidate(c) if c.sdp_mid == "video"));
    }

    #[test]
    fn classifies_roster_line() {
        let envelope = Envelope::classify("bob,905,1").unwrap();
        assert!(matches!(envelope, Envelope::RosterUpdate(records) if records[0].id == SERVER));
    }

    #[test]
    fn classifies_hangup_and_text() {
        assert_eq!(Envelope::classify("BYE").unwrap(), Envelope::Hangup);
        assert_eq!(
            Envelope::classify(r#"{"camera-transform":"1,2,3"}"#).unwrap(),
            Envelope::PlainText(r#"{"camera-transform":"1,2,3"}"#.into())
        );
    }

    #[test]
    fn incomplete_negotiation_json_is_malformed() {
        for body in [
            r#"{"sdp":"v=0"}"#,
            r#"{"sdp":"v=0","type":"pranswer"}"#,
            r#"{"candidate":"c","sdpMid":null,"sdpMLineIndex":0}"#,
            "   ",
        ] {
            assert!(
                matches!(Envelope::classify(body), Err(SignalingError::MalformedPayload(_))),
                "{body:?}"
            );
        }
    }

    #[test]
    fn answer_from_peer_goes_to_media_engine_not_directory() {
        let f = fixture();
        let routed = f
            .relay
            .relay(SELF, Some(SERVER), r#"{"sdp" : "v=0\r\n","type" : "answer"}"#);

        assert_eq!(routed, Routed::Negotiation { peer: SERVER });
        assert_eq!(
            f.media.calls(),
            vec![MediaCall::Description(
                SERVER,
                SessionDescription {
                    sdp_type: SdpType::Answer,
                    sdp: "v=0\r\n".into()
                }
            )]
        );
        assert!(f.directory.is_empty());
    }

    #[test]
    fn roster_delta_from_server_updates_directory() {
        let f = fixture();
        assert_eq!(
            f.relay.relay(SELF, Some(SELF), "bob,7,1"),
            Routed::Directory { changes: 1 }
        );
        assert_eq!(f.directory.get(PeerId(7)).unwrap().name, "bob");

        assert_eq!(
            f.relay.relay(SELF, None, "bob,7,0"),
            Routed::Directory { changes: 1 }
        );
        assert!(f.directory.is_empty());
        assert_eq!(
            f.observer.events(),
            vec![
                Event::PeerConnected(PeerId(7), "bob".into()),
                Event::PeerDisconnected(PeerId(7))
            ]
        );
    }

    #[test]
    fn roster_never_lists_self() {
        let f = fixture();
        assert_eq!(
            f.relay.relay(SELF, None, "TEST,1,1"),
            Routed::Directory { changes: 0 }
        );
        assert!(!f.directory.contains(SELF));
    }

    #[test]
    fn roster_looking_text_from_peer_is_a_message() {
        let f = fixture();
        assert_eq!(
            f.relay.relay(SELF, Some(SERVER), "mallory,66,1"),
            Routed::Message { peer: SERVER }
        );
        assert!(f.directory.is_empty());
        assert_eq!(
            f.observer.events(),
            vec![Event::Message(SERVER, "mallory,66,1".into())]
        );
    }

    #[test]
    fn hangup_removes_peer() {
        let f = fixture();
        f.directory.add(SERVER, "renderingserver");
        assert_eq!(
            f.relay.relay(SELF, Some(SERVER), "BYE"),
            Routed::Hangup { peer: SERVER }
        );
        assert!(f.directory.is_empty());
        assert_eq!(f.observer.events(), vec![Event::PeerHangup(SERVER)]);
    }

    #[test]
    fn negotiation_without_sender_is_dropped() {
        let f = fixture();
        assert_eq!(
            f.relay.relay(SELF, None, r#"{"sdp":"v=0","type":"offer"}"#),
            Routed::Dropped
        );
        assert!(f.media.calls().is_empty());
    }

    #[test]
    fn malformed_body_is_dropped() {
        let f = fixture();
        assert_eq!(
            f.relay.relay(SELF, Some(SERVER), r#"{"candidate":"c"}"#),
            Routed::Dropped
        );
        assert!(f.media.calls().is_empty());
        assert!(f.observer.events().is_empty());
    }
}
