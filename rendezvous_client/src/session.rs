//! Signaling session
//!
//! A session signs in to the rendezvous server, keeps the registration alive
//! with heartbeats, long-polls `/wait` for events and signs out again.
//!
//! After sign-in a control task owns the session status. The wait loop, the
//! heartbeat loop and the caller-facing [`SignalingSession`] handle never write
//! it themselves; they send [`Command`]s over a single queue and the control
//! task applies them in order. Entering `Disconnecting` cancels both loops and
//! waits for them to finish before signing out, so an in-flight long-poll is
//! aborted rather than left to time out.

use crate::PeerId;
use crate::config::ClientConfig;
use crate::directory::{PeerDirectory, PeerEntry};
use crate::error::{ConfigError, SignalingError, TransportError};
use crate::media::{MediaEngine, MediaEvent};
use crate::observer::SignalingObserver;
use crate::relay::{HANGUP_MESSAGE, NegotiationRelay, Routed};
use crate::roster::{RosterRecord, parse_roster};
use crate::transport::{HttpTransport, Transport};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, trace, warn};
use uuid::Uuid;

const COMMAND_QUEUE: usize = 64;

/// Identifies one session in logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub Uuid);

impl From<Uuid> for SessionId {
    fn from(uuid: Uuid) -> Self {
        SessionId(uuid)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle of a session
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    #[default]
    Disconnected,
    SigningIn,
    SignedIn,
    Negotiating,
    Connected,
    Disconnecting,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "Disconnected",
            SessionState::SigningIn => "SigningIn",
            SessionState::SignedIn => "SignedIn",
            SessionState::Negotiating => "Negotiating",
            SessionState::Connected => "Connected",
            SessionState::Disconnecting => "Disconnecting",
        }
    }

    /// Whether the server knows this client; the self id is set exactly then
    pub fn is_signed_in(&self) -> bool {
        matches!(
            self,
            SessionState::SignedIn | SessionState::Negotiating | SessionState::Connected
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The identity the server assigned at sign-in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfIdentity {
    pub id: PeerId,
    pub name: String,
}

/// Published session status
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: SessionState,
    /// Set iff `state.is_signed_in()`
    pub identity: Option<SelfIdentity>,
    /// Peer being negotiated with or connected to
    pub active_peer: Option<PeerId>,
}

/// Result of one `/wait` request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// An event arrived and was routed
    Routed(Routed),
    /// The request timed out without an event
    Idle,
}

/// Result of signing out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignOut {
    /// The server answered the sign-out with 2xx
    Acknowledged,
    /// The server could not be reached or refused; the session is disconnected anyway
    Unacknowledged,
    /// There was no session to sign out of
    NotSignedIn,
}

#[derive(Debug, Clone, Copy)]
enum Activity {
    Wait,
    Heartbeat,
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Activity::Wait => f.write_str("wait"),
            Activity::Heartbeat => f.write_str("heartbeat"),
        }
    }
}

/// Requests to the control task
enum Command {
    Deliver {
        from: Option<PeerId>,
        body: String,
        done: oneshot::Sender<Routed>,
    },
    Failure {
        activity: Activity,
        error: SignalingError,
        consecutive: u32,
    },
    Media {
        event: MediaEvent,
        done: oneshot::Sender<()>,
    },
    LocalHangup {
        peer: PeerId,
        done: oneshot::Sender<()>,
    },
    Disconnect {
        done: oneshot::Sender<SignOut>,
    },
}

struct ControlHandle {
    commands: mpsc::Sender<Command>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Puts the status back to `Disconnected` unless sign-in completes
///
/// Covers a `sign_in` future dropped mid-request as well as a failed one.
struct SignInAttempt<'a> {
    status: &'a watch::Sender<SessionStatus>,
    completed: bool,
}

impl<'a> SignInAttempt<'a> {
    fn new(status: &'a watch::Sender<SessionStatus>) -> Self {
        Self {
            status,
            completed: false,
        }
    }

    fn complete(mut self) {
        self.completed = true;
    }
}

impl Drop for SignInAttempt<'_> {
    fn drop(&mut self) {
        if !self.completed {
            self.status.send_replace(SessionStatus::default());
        }
    }
}

/// Client side of the rendezvous protocol
///
/// One identity per session. Sessions are independent values, so several can
/// run side by side in one process.
pub struct SignalingSession {
    id: SessionId,
    config: Arc<ClientConfig>,
    transport: Arc<dyn Transport>,
    directory: PeerDirectory,
    relay: NegotiationRelay,
    observer: Arc<dyn SignalingObserver>,
    status: Arc<watch::Sender<SessionStatus>>,
    /// Held for the duration of a `/message` POST so peers see them in call order
    outbound: Mutex<()>,
    control: Option<ControlHandle>,
}

impl SignalingSession {
    /// Create a disconnected session
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        media: Arc<dyn MediaEngine>,
        observer: Arc<dyn SignalingObserver>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let directory = PeerDirectory::new();
        let relay = NegotiationRelay::new(media, directory.clone(), observer.clone());
        let (status, _) = watch::channel(SessionStatus::default());

        Ok(Self {
            id: Uuid::new_v4().into(),
            config: Arc::new(config),
            transport,
            directory,
            relay,
            observer,
            status: Arc::new(status),
            outbound: Mutex::new(()),
            control: None,
        })
    }

    /// Create a disconnected session talking HTTP to `config.server_url`
    pub fn with_http(
        config: ClientConfig,
        media: Arc<dyn MediaEngine>,
        observer: Arc<dyn SignalingObserver>,
    ) -> Result<Self, ConfigError> {
        let transport = Arc::new(HttpTransport::new(&config)?);
        Self::new(config, transport, media, observer)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> SessionState {
        self.status.borrow().state
    }

    pub fn self_identity(&self) -> Option<SelfIdentity> {
        self.status.borrow().identity.clone()
    }

    pub fn self_id(&self) -> Option<PeerId> {
        self.status.borrow().identity.as_ref().map(|identity| identity.id)
    }

    /// Peers currently signed in, excluding this client
    pub fn directory(&self) -> &PeerDirectory {
        &self.directory
    }

    /// Watch status changes
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Sign in as `name`
    ///
    /// On success the directory holds every other signed-in peer and the wait
    /// and heartbeat loops are running. On failure the session is back in
    /// `Disconnected`.
    pub async fn sign_in(&mut self, name: &str) -> Result<Vec<PeerEntry>, SignalingError> {
        self.reap().await;
        let state = self.state();
        if state != SessionState::Disconnected {
            return Err(SignalingError::InvalidState {
                expected: SessionState::Disconnected.as_str(),
                actual: state.as_str(),
            });
        }

        self.status.send_modify(|status| status.state = SessionState::SigningIn);
        info!(session = %self.id, name, "Signing in");
        let attempt = SignInAttempt::new(&self.status);

        let (identity, records) = match self.request_sign_in(name).await {
            Ok(signed_in) => signed_in,
            Err(error) => {
                warn!(session = %self.id, %error, "Sign-in failed");
                drop(attempt);
                self.observer.on_server_connection_failure(&error);
                return Err(error);
            }
        };

        attempt.complete();
        let self_id = identity.id;
        self.directory.clear();
        self.status.send_replace(SessionStatus {
            state: SessionState::SignedIn,
            identity: Some(identity),
            active_peer: None,
        });
        self.observer.on_signed_in(self_id);
        self.relay.apply_roster(self_id, &records[1..]);
        info!(session = %self.id, %self_id, peers = self.directory.len(), "Signed in");

        self.spawn_control(self_id);
        Ok(self.directory.snapshot())
    }

    async fn request_sign_in(
        &self,
        name: &str,
    ) -> Result<(SelfIdentity, Vec<RosterRecord>), SignalingError> {
        let failed = SignalingError::SignInFailed;

        let response = self
            .transport
            .get(
                "/sign_in",
                &[("peer_name", name.to_string())],
                self.config.request_timeout,
            )
            .await
            .map_err(|e| failed(e.to_string()))?;

        if !response.is_success() {
            return Err(failed(format!("server answered {}", response.status)));
        }

        // The server always lists the caller first
        let records = parse_roster(&response.body).map_err(|e| failed(e.to_string()))?;
        let me = &records[0];
        if me.id.0 <= 0 {
            return Err(failed(format!("server assigned invalid id {}", me.id)));
        }
        match response.pragma_peer_id() {
            Ok(Some(assigned)) if assigned != me.id => {
                return Err(failed(format!(
                    "Pragma names {assigned} but roster names {}",
                    me.id
                )));
            }
            Err(e) => return Err(failed(e.to_string())),
            _ => {}
        }

        let identity = SelfIdentity {
            id: me.id,
            name: me.name.clone(),
        };
        Ok((identity, records))
    }

    fn spawn_control(&mut self, self_id: PeerId) {
        let (commands, receiver) = mpsc::channel(COMMAND_QUEUE);
        let cancel = CancellationToken::new();
        let span = info_span!("signaling", session = %self.id, %self_id);

        let context = LoopContext {
            transport: self.transport.clone(),
            config: self.config.clone(),
            self_id,
            commands: commands.clone(),
            cancel: cancel.clone(),
        };
        let mut loops = Vec::with_capacity(2);
        if self.config.background_polling {
            loops.push(tokio::spawn(wait_loop(context.clone()).instrument(span.clone())));
        }
        loops.push(tokio::spawn(heartbeat_loop(context).instrument(span.clone())));

        let control = Control {
            config: self.config.clone(),
            transport: self.transport.clone(),
            directory: self.directory.clone(),
            relay: self.relay.clone(),
            observer: self.observer.clone(),
            status: self.status.clone(),
            self_id,
            cancel: cancel.clone(),
            loops,
        };
        let task = tokio::spawn(control.run(receiver).instrument(span));

        self.control = Some(ControlHandle {
            commands,
            cancel,
            task,
        });
    }

    /// Join a control task that already tore the session down
    async fn reap(&mut self) {
        let finished = self.control.as_ref().is_some_and(|control| {
            control.task.is_finished() || self.status.borrow().state == SessionState::Disconnected
        });
        if finished {
            if let Some(control) = self.control.take() {
                if let Err(error) = control.task.await {
                    warn!(session = %self.id, %error, "Control task ended abnormally");
                }
            }
        }
    }

    fn control(&self) -> Result<(PeerId, &ControlHandle), SignalingError> {
        match (self.self_id(), &self.control) {
            (Some(self_id), Some(control)) => Ok((self_id, control)),
            _ => Err(SignalingError::NotSignedIn),
        }
    }

    /// Issue one `/wait` request and route whatever it returns
    ///
    /// `long_poll` selects the long-poll deadline instead of the ordinary
    /// request deadline. A timeout is not an error: it yields
    /// [`PollOutcome::Idle`] and the caller should simply poll again.
    ///
    /// With `background_polling` enabled the wait loop already does this;
    /// extra calls compete with it for events.
    pub async fn poll_once(&self, long_poll: bool) -> Result<PollOutcome, SignalingError> {
        let (self_id, control) = self.control()?;
        let timeout = if long_poll {
            self.config.wait_timeout
        } else {
            self.config.request_timeout
        };

        match fetch_event(self.transport.as_ref(), self_id, timeout).await? {
            WaitOutcome::Idle => Ok(PollOutcome::Idle),
            WaitOutcome::Dropped => Ok(PollOutcome::Routed(Routed::Dropped)),
            WaitOutcome::Event { from, body } => {
                let (done, routed) = oneshot::channel();
                control
                    .commands
                    .send(Command::Deliver { from, body, done })
                    .await
                    .map_err(|_| SignalingError::NotSignedIn)?;
                routed
                    .await
                    .map(PollOutcome::Routed)
                    .map_err(|_| SignalingError::NotSignedIn)
            }
        }
    }

    /// Post `payload` to `peer` through the server
    ///
    /// `Ok` iff the server acknowledged with 2xx. Never retried.
    pub async fn send_to_peer(
        &self,
        peer: PeerId,
        payload: impl Into<String>,
    ) -> Result<(), SignalingError> {
        let self_id = self.self_id().ok_or(SignalingError::NotSignedIn)?;
        if peer == self_id {
            return Err(SignalingError::SelfAddressed);
        }

        let payload = payload.into();
        let _ordered = self.outbound.lock().await;
        debug!(session = %self.id, %peer, bytes = payload.len(), "Sending to peer");
        let response = self
            .transport
            .post(
                "/message",
                &[("peer_id", self_id.to_string()), ("to", peer.to_string())],
                payload,
                self.config.request_timeout,
            )
            .await
            .map_err(|e| SignalingError::SendFailed {
                peer,
                reason: e.to_string(),
            })?;

        if !response.is_success() {
            return Err(SignalingError::SendFailed {
                peer,
                reason: format!("server answered {}", response.status),
            });
        }
        Ok(())
    }

    /// Tell `peer` we are hanging up and drop the negotiation with it
    pub async fn send_hangup(&self, peer: PeerId) -> Result<(), SignalingError> {
        self.send_to_peer(peer, HANGUP_MESSAGE).await?;
        let (_, control) = self.control()?;
        let (done, applied) = oneshot::channel();
        control
            .commands
            .send(Command::LocalHangup { peer, done })
            .await
            .map_err(|_| SignalingError::NotSignedIn)?;
        applied.await.map_err(|_| SignalingError::NotSignedIn)
    }

    /// Feed an event from the media engine into the session
    ///
    /// Local descriptions and candidates are posted to their peer first; the
    /// state transition is applied once the server acknowledged them.
    pub async fn handle_media_event(&self, event: MediaEvent) -> Result<(), SignalingError> {
        match &event {
            MediaEvent::LocalDescriptionReady { peer, description } => {
                self.send_to_peer(*peer, serde_json::to_string(description)?)
                    .await?;
            }
            MediaEvent::LocalIceCandidateGathered { peer, candidate } => {
                self.send_to_peer(*peer, serde_json::to_string(candidate)?)
                    .await?;
            }
            MediaEvent::ConnectionEstablished { .. } | MediaEvent::ConnectionClosed { .. } => {}
        }

        let (_, control) = self.control()?;
        let (done, applied) = oneshot::channel();
        control
            .commands
            .send(Command::Media { event, done })
            .await
            .map_err(|_| SignalingError::NotSignedIn)?;
        applied.await.map_err(|_| SignalingError::NotSignedIn)
    }

    /// Sign out and return to `Disconnected`
    ///
    /// Sign-out is best-effort: whatever the server says, the session ends up
    /// disconnected with an empty directory and no background requests.
    pub async fn disconnect(&mut self) -> SignOut {
        let Some(control) = self.control.take() else {
            if self.state() != SessionState::Disconnected {
                self.directory.clear();
                self.status.send_replace(SessionStatus::default());
            }
            return SignOut::NotSignedIn;
        };

        let (done, outcome) = oneshot::channel();
        let outcome = match control.commands.send(Command::Disconnect { done }).await {
            Ok(()) => outcome.await.unwrap_or(SignOut::NotSignedIn),
            // Already torn down by the control task
            Err(_) => SignOut::NotSignedIn,
        };

        if let Err(error) = control.task.await {
            error!(session = %self.id, %error, "Control task ended abnormally");
            self.directory.clear();
            self.status.send_replace(SessionStatus::default());
        }
        outcome
    }
}

impl Drop for SignalingSession {
    fn drop(&mut self) {
        // The control task signs out on its own once every command sender is gone
        if let Some(control) = &self.control {
            control.cancel.cancel();
        }
    }
}

/// Owner of the session status while signed in
struct Control {
    config: Arc<ClientConfig>,
    transport: Arc<dyn Transport>,
    directory: PeerDirectory,
    relay: NegotiationRelay,
    observer: Arc<dyn SignalingObserver>,
    status: Arc<watch::Sender<SessionStatus>>,
    self_id: PeerId,
    cancel: CancellationToken,
    loops: Vec<JoinHandle<()>>,
}

impl Control {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        while let Some(command) = commands.recv().await {
            match command {
                Command::Deliver { from, body, done } => {
                    let routed = self.deliver(from, &body);
                    if let Routed::Hangup { peer } = routed {
                        if self.active_peer() == Some(peer) {
                            info!(%peer, "Active peer hung up");
                            // Stop the loops before the poller learns the outcome
                            self.teardown().await;
                            let _ = done.send(routed);
                            return;
                        }
                    }
                    let _ = done.send(routed);
                }
                Command::Failure {
                    activity,
                    error,
                    consecutive,
                } => {
                    warn!(%activity, %error, consecutive, "Background request failed");
                    self.observer.on_server_connection_failure(&error);
                    if consecutive >= self.config.max_consecutive_failures {
                        error!(%activity, consecutive, "Giving up on the rendezvous server");
                        self.teardown().await;
                        return;
                    }
                }
                Command::Media { event, done } => {
                    self.apply_media_event(event);
                    let _ = done.send(());
                }
                Command::LocalHangup { peer, done } => {
                    if self.active_peer() == Some(peer) {
                        self.end_negotiation();
                    }
                    let _ = done.send(());
                }
                Command::Disconnect { done } => {
                    let outcome = self.teardown().await;
                    let _ = done.send(outcome);
                    return;
                }
            }
        }

        // The session handle was dropped
        self.teardown().await;
    }

    fn active_peer(&self) -> Option<PeerId> {
        self.status.borrow().active_peer
    }

    fn state(&self) -> SessionState {
        self.status.borrow().state
    }

    fn deliver(&self, from: Option<PeerId>, body: &str) -> Routed {
        let active_listed = self
            .active_peer()
            .filter(|peer| self.directory.contains(*peer));

        let routed = self.relay.relay(self.self_id, from, body);
        match routed {
            Routed::Negotiation { peer } => self.begin_negotiation(peer),
            Routed::Directory { .. } => {
                if let Some(peer) = active_listed {
                    if !self.directory.contains(peer) {
                        info!(%peer, "Active peer signed out");
                        self.end_negotiation();
                    }
                }
            }
            Routed::Hangup { .. } | Routed::Message { .. } | Routed::Dropped => {}
        }
        routed
    }

    fn begin_negotiation(&self, peer: PeerId) {
        self.status.send_if_modified(|status| {
            if status.active_peer == Some(peer) && status.state != SessionState::SignedIn {
                return false;
            }
            if let Some(previous) = status.active_peer.filter(|active| *active != peer) {
                info!(%previous, %peer, "Switching negotiation to another peer");
            }
            debug!(%peer, "Negotiating");
            status.active_peer = Some(peer);
            status.state = SessionState::Negotiating;
            true
        });
    }

    fn end_negotiation(&self) {
        self.status.send_modify(|status| {
            status.active_peer = None;
            status.state = SessionState::SignedIn;
        });
    }

    fn apply_media_event(&self, event: MediaEvent) {
        let peer = event.peer();
        match event {
            MediaEvent::LocalDescriptionReady { .. } | MediaEvent::LocalIceCandidateGathered { .. } => {
                self.begin_negotiation(peer);
            }
            MediaEvent::ConnectionEstablished { .. } => {
                if self.active_peer() == Some(peer) && self.state() == SessionState::Negotiating {
                    info!(%peer, "Peer connection established");
                    self.status
                        .send_modify(|status| status.state = SessionState::Connected);
                } else {
                    debug!(%peer, state = %self.state(), "Ignoring connection established");
                }
            }
            MediaEvent::ConnectionClosed { .. } => {
                if self.active_peer() == Some(peer) {
                    info!(%peer, "Peer connection closed");
                    self.end_negotiation();
                }
            }
        }
    }

    async fn teardown(&mut self) -> SignOut {
        self.status.send_replace(SessionStatus {
            state: SessionState::Disconnecting,
            identity: None,
            active_peer: None,
        });

        self.cancel.cancel();
        for handle in self.loops.drain(..) {
            if let Err(error) = handle.await {
                warn!(%error, "Background loop ended abnormally");
            }
        }

        let outcome = sign_out(
            self.transport.as_ref(),
            self.self_id,
            self.config.sign_out_timeout,
        )
        .await;

        self.directory.clear();
        self.status.send_replace(SessionStatus::default());
        self.observer.on_disconnected();
        info!(?outcome, "Disconnected");
        outcome
    }
}

async fn sign_out(transport: &dyn Transport, self_id: PeerId, timeout: Duration) -> SignOut {
    match transport
        .get("/sign_out", &[("peer_id", self_id.to_string())], timeout)
        .await
    {
        Ok(response) if response.is_success() => SignOut::Acknowledged,
        Ok(response) => {
            warn!(status = %response.status, "Sign-out refused");
            SignOut::Unacknowledged
        }
        Err(error) => {
            warn!(%error, "Sign-out did not reach the server");
            SignOut::Unacknowledged
        }
    }
}

enum WaitOutcome {
    Idle,
    Dropped,
    Event { from: Option<PeerId>, body: String },
}

async fn fetch_event(
    transport: &dyn Transport,
    self_id: PeerId,
    timeout: Duration,
) -> Result<WaitOutcome, SignalingError> {
    let response = match transport
        .get("/wait", &[("peer_id", self_id.to_string())], timeout)
        .await
    {
        Ok(response) => response,
        Err(TransportError::Timeout) => return Ok(WaitOutcome::Idle),
        Err(TransportError::MalformedResponse(reason)) => {
            warn!(%reason, "Dropping unreadable long-poll response");
            return Ok(WaitOutcome::Dropped);
        }
        Err(error) => return Err(error.into()),
    };

    if !response.is_success() {
        return Err(SignalingError::ServerRejected {
            status: response.status.as_u16(),
        });
    }

    match response.pragma_peer_id() {
        Ok(from) => Ok(WaitOutcome::Event {
            from,
            body: response.body,
        }),
        Err(error) => {
            warn!(%error, "Dropping long-poll response");
            Ok(WaitOutcome::Dropped)
        }
    }
}

async fn heartbeat(
    transport: &dyn Transport,
    self_id: PeerId,
    timeout: Duration,
) -> Result<(), SignalingError> {
    let response = transport
        .get("/heartbeat", &[("peer_id", self_id.to_string())], timeout)
        .await?;
    if response.is_success() {
        Ok(())
    } else {
        Err(SignalingError::ServerRejected {
            status: response.status.as_u16(),
        })
    }
}

/// What a background loop needs; every await is raced against `cancel`
#[derive(Clone)]
struct LoopContext {
    transport: Arc<dyn Transport>,
    config: Arc<ClientConfig>,
    self_id: PeerId,
    commands: mpsc::Sender<Command>,
    cancel: CancellationToken,
}

impl LoopContext {
    /// Queue `command`; `false` once the session is going away
    async fn send(&self, command: Command) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.commands.send(command) => sent.is_ok(),
        }
    }

    /// Report a failure and sit out the backoff; `false` once cancelled
    async fn fail(&self, activity: Activity, error: SignalingError, consecutive: u32) -> bool {
        let command = Command::Failure {
            activity,
            error,
            consecutive,
        };
        if !self.send(command).await {
            return false;
        }
        let delay = self.config.backoff_delay(consecutive);
        debug!(%activity, ?delay, "Backing off");
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

async fn wait_loop(context: LoopContext) {
    debug!("Wait loop started");
    let mut consecutive = 0;
    loop {
        let outcome = tokio::select! {
            biased;
            _ = context.cancel.cancelled() => break,
            outcome = fetch_event(context.transport.as_ref(), context.self_id, context.config.wait_timeout) => outcome,
        };

        match outcome {
            Ok(WaitOutcome::Event { from, body }) => {
                consecutive = 0;
                let (done, routed) = oneshot::channel();
                if !context.send(Command::Deliver { from, body, done }).await {
                    break;
                }
                // Deliveries stay ordered: the next poll waits for this one
                tokio::select! {
                    biased;
                    _ = context.cancel.cancelled() => break,
                    _ = routed => {}
                }
            }
            Ok(WaitOutcome::Dropped) => consecutive = 0,
            Ok(WaitOutcome::Idle) => trace!("Long-poll elapsed; polling again"),
            Err(error) => {
                consecutive += 1;
                if !context.fail(Activity::Wait, error, consecutive).await {
                    break;
                }
            }
        }
    }
    debug!("Wait loop stopped");
}

async fn heartbeat_loop(context: LoopContext) {
    debug!("Heartbeat loop started");
    let period = context.config.heartbeat_interval;
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut consecutive = 0;

    loop {
        // After a failure the backoff already paced us; retry straight away
        if consecutive == 0 {
            tokio::select! {
                biased;
                _ = context.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
        }

        let result = tokio::select! {
            biased;
            _ = context.cancel.cancelled() => break,
            result = heartbeat(context.transport.as_ref(), context.self_id, context.config.request_timeout) => result,
        };

        match result {
            Ok(()) => {
                trace!("Heartbeat acknowledged");
                if consecutive > 0 {
                    consecutive = 0;
                    ticker.reset();
                }
            }
            Err(error) => {
                consecutive += 1;
                if !context.fail(Activity::Heartbeat, error, consecutive).await {
                    break;
                }
            }
        }
    }
    debug!("Heartbeat loop stopped");
}
