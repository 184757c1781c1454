//! Test doubles for the transport, media engine and observer

use crate::PeerId;
use crate::error::{SignalingError, TransportError};
use crate::media::{IceCandidate, MediaEngine, SessionDescription};
use crate::observer::SignalingObserver;
use crate::transport::{HttpResponse, Query, Transport};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::StatusCode;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

/// What the scripted server does with the next request to a path
#[derive(Debug, Clone)]
pub(crate) enum Scripted {
    Respond(HttpResponse),
    /// Answer after a delay, like a slow server
    Delayed(Duration, HttpResponse),
    Fail(TransportError),
    /// Never answer, like a long-poll with nothing to deliver
    Hang,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Recorded {
    pub method: &'static str,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<String>,
    /// When the request reached the server
    pub at: Instant,
}

/// Answers from per-path queues; an exhausted `/wait` queue hangs, any
/// other exhausted path answers `200 OK`
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    requests: Mutex<Vec<Recorded>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, path: &str, scripted: Scripted) -> &Self {
        self.scripts
            .lock()
            .entry(path.to_string())
            .or_default()
            .push_back(scripted);
        self
    }

    pub(crate) fn respond(&self, path: &str, response: HttpResponse) -> &Self {
        self.push(path, Scripted::Respond(response))
    }

    pub(crate) fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().clone()
    }

    pub(crate) fn requests_to(&self, path: &str) -> Vec<Recorded> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.path == path)
            .cloned()
            .collect()
    }

    async fn answer(
        &self,
        method: &'static str,
        path: &str,
        query: &Query<'_>,
        body: Option<String>,
    ) -> Result<HttpResponse, TransportError> {
        self.requests.lock().push(Recorded {
            method,
            path: path.to_string(),
            query: query
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            body,
            at: Instant::now(),
        });
        let next = self
            .scripts
            .lock()
            .get_mut(path)
            .and_then(VecDeque::pop_front);
        match next {
            Some(Scripted::Respond(response)) => Ok(response),
            Some(Scripted::Delayed(delay, response)) => {
                tokio::time::sleep(delay).await;
                Ok(response)
            }
            Some(Scripted::Fail(error)) => Err(error),
            Some(Scripted::Hang) => std::future::pending().await,
            None if path == "/wait" => std::future::pending().await,
            None => Ok(HttpResponse::new(StatusCode::OK, "OK")),
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get(
        &self,
        path: &str,
        query: &Query<'_>,
        _timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        self.answer("GET", path, query, None).await
    }

    async fn post(
        &self,
        path: &str,
        query: &Query<'_>,
        body: String,
        _timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        self.answer("POST", path, query, Some(body)).await
    }
}

/// Everything a [`RecordingObserver`] was told
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Event {
    SignedIn(PeerId),
    PeerConnected(PeerId, String),
    PeerDisconnected(PeerId),
    PeerHangup(PeerId),
    Message(PeerId, String),
    Failure(String),
    Disconnected,
}

#[derive(Default)]
pub(crate) struct RecordingObserver {
    events: Mutex<Vec<Event>>,
}

impl RecordingObserver {
    pub(crate) fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub(crate) fn failures(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, Event::Failure(_)))
            .count()
    }

    fn push(&self, event: Event) {
        self.events.lock().push(event);
    }
}

impl SignalingObserver for RecordingObserver {
    fn on_signed_in(&self, self_id: PeerId) {
        self.push(Event::SignedIn(self_id));
    }

    fn on_peer_connected(&self, id: PeerId, name: &str) {
        self.push(Event::PeerConnected(id, name.to_string()));
    }

    fn on_peer_disconnected(&self, id: PeerId) {
        self.push(Event::PeerDisconnected(id));
    }

    fn on_peer_hangup(&self, id: PeerId) {
        self.push(Event::PeerHangup(id));
    }

    fn on_message_from_peer(&self, id: PeerId, payload: &str) {
        self.push(Event::Message(id, payload.to_string()));
    }

    fn on_server_connection_failure(&self, error: &SignalingError) {
        self.push(Event::Failure(error.to_string()));
    }

    fn on_disconnected(&self) {
        self.push(Event::Disconnected);
    }
}

/// Calls received by a [`RecordingMedia`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum MediaCall {
    Description(PeerId, SessionDescription),
    Candidate(PeerId, IceCandidate),
}

#[derive(Default)]
pub(crate) struct RecordingMedia {
    calls: Mutex<Vec<MediaCall>>,
}

impl RecordingMedia {
    pub(crate) fn calls(&self) -> Vec<MediaCall> {
        self.calls.lock().clone()
    }
}

impl MediaEngine for RecordingMedia {
    fn apply_remote_description(&self, peer: PeerId, description: &SessionDescription) {
        self.calls
            .lock()
            .push(MediaCall::Description(peer, description.clone()));
    }

    fn add_remote_ice_candidate(&self, peer: PeerId, candidate: &IceCandidate) {
        self.calls
            .lock()
            .push(MediaCall::Candidate(peer, candidate.clone()));
    }
}

/// `200 OK` response with `body`
pub(crate) fn ok(body: &str) -> HttpResponse {
    HttpResponse::new(StatusCode::OK, body)
}

