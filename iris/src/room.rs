//! Client room handle: peer connections and state-message handling.

use std::{
    cell::RefCell,
    collections::HashMap,
    rc::{Rc, Weak},
};

use derive_more::{Display, From};
use hermes_client_api_proto::{
    Envelope, IceCandidate, IceMode, IceServer, PeerId, RoomSnapshot,
    SdpKind, ServerMsg, SessionDescription, SignalData,
};
use serde_json::Value;

use crate::{
    events::{EventRegistry, RoomEvent, Subscription},
    negotiation::{
        is_polite, Negotiation, SdpDisposition, MAX_OFFER_RETRIES,
        OFFER_RETRY_DELAY,
    },
    platform::{
        ConnectionState, PeerConnection, PeerConnectionFactory, PlatformError,
        SignalSink, SignalingState,
    },
    utils::{resettable_delay_for, spawn, ResettableDelayHandle},
};

/// Error of an engine operation.
#[derive(Clone, Debug, Display, From)]
pub enum EngineError {
    /// Underlying platform object failed.
    #[display(fmt = "{}", _0)]
    Platform(PlatformError),

    /// A `signal` payload could not be decoded.
    #[display(fmt = "malformed signal payload: {}", _0)]
    #[from(ignore)]
    BadPayload(String),
}

impl std::error::Error for EngineError {}

/// Everything the engine tracks towards one remote peer.
struct PeerSlot {
    /// Connection towards the peer.
    connection: Rc<dyn PeerConnection>,

    /// Perfect-negotiation state.
    negotiation: Negotiation,

    /// Pending deferred-offer timer, if armed.
    retry: Option<ResettableDelayHandle>,

    /// Whether a remote stream of this peer is currently tracked.
    has_remote_stream: bool,
}

/// Mutable state of a [`Room`].
struct State {
    /// Own peer id, known once `welcome` arrives.
    self_id: Option<PeerId>,

    /// Whether local tracks are being shared.
    broadcasting: bool,

    /// ICE servers for new connections.
    ice_servers: Vec<IceServer>,

    /// ICE transport mode for new connections.
    ice_mode: IceMode,

    /// Latest authoritative presence snapshot.
    snapshot: RoomSnapshot,

    /// Live slots keyed by remote peer id.
    peers: HashMap<PeerId, PeerSlot>,
}

/// Shared internals of a [`Room`].
struct InnerRoom {
    /// Factory of platform peer connections.
    factory: Rc<dyn PeerConnectionFactory>,

    /// Sink of outbound frames towards the server.
    sink: Rc<dyn SignalSink>,

    /// Subscribers to room events.
    events: EventRegistry,

    /// Mutable engine state.
    ///
    /// Never borrowed across an await point.
    state: RefCell<State>,
}

/// Handle to the client side of one signaling room.
///
/// Owns an `RTCPeerConnection` per remote peer and keeps every pair
/// correct under simultaneous renegotiation via the perfect-negotiation
/// pattern. Cheap to clone; all clones share the same state.
pub struct Room {
    inner: Rc<InnerRoom>,
}

impl Clone for Room {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl Room {
    /// Creates a new [`Room`] on top of the given platform objects.
    #[must_use]
    pub fn new(
        factory: Rc<dyn PeerConnectionFactory>,
        sink: Rc<dyn SignalSink>,
    ) -> Self {
        Self {
            inner: Rc::new(InnerRoom {
                factory,
                sink,
                events: EventRegistry::new(),
                state: RefCell::new(State {
                    self_id: None,
                    broadcasting: false,
                    ice_servers: Vec::new(),
                    ice_mode: IceMode::StunTurn,
                    snapshot: RoomSnapshot::default(),
                    peers: HashMap::new(),
                }),
            }),
        }
    }

    /// Subscribes `f` to the room events dispatching under `name`.
    pub fn on(
        &self,
        name: &'static str,
        f: impl Fn(&RoomEvent) + 'static,
    ) -> Subscription {
        self.inner.events.subscribe(name, f)
    }

    /// Returns the latest authoritative presence snapshot.
    #[must_use]
    pub fn snapshot(&self) -> RoomSnapshot {
        self.inner.state.borrow().snapshot.clone()
    }

    /// Returns the own peer id, if `welcome` arrived already.
    #[must_use]
    pub fn self_id(&self) -> Option<PeerId> {
        self.inner.state.borrow().self_id.clone()
    }

    /// Indicates whether a connection towards `id` exists.
    #[must_use]
    pub fn has_peer(&self, id: &PeerId) -> bool {
        self.inner.state.borrow().peers.contains_key(id)
    }

    /// Feeds one server message into the engine.
    pub async fn handle_message(&self, msg: ServerMsg) {
        match msg {
            ServerMsg::Welcome {
                id,
                state,
                ice_servers,
                ice_mode,
            } => self.on_welcome(id, state, ice_servers, ice_mode),
            ServerMsg::PeerJoined { id, state } => {
                self.apply_snapshot(state);
                let broadcasting = self.inner.state.borrow().broadcasting;
                if broadcasting && !self.is_self(&id) {
                    self.offer_to(id).await;
                }
            }
            ServerMsg::PeerLeft { id, state } => {
                self.apply_snapshot(state);
                self.drop_peer(&id);
            }
            ServerMsg::BroadcastState { id, enabled, state } => {
                self.on_broadcast_state(&id, enabled, state);
            }
            ServerMsg::Usernames { state, .. } => self.apply_snapshot(state),
            ServerMsg::Signal { from, data, .. } => {
                self.on_signal(from, data).await;
            }
        }
    }

    /// Starts or stops sharing the local tracks.
    ///
    /// Enabling initiates an offer towards every present peer; disabling
    /// detaches the tracks from every live connection.
    pub async fn set_broadcasting(&self, enabled: bool) {
        let offer_targets: Vec<PeerId> = {
            let mut state = self.inner.state.borrow_mut();
            state.broadcasting = enabled;
            if enabled {
                let own = state.self_id.clone();
                state
                    .snapshot
                    .peers
                    .iter()
                    .filter(|peer| Some(*peer) != own.as_ref())
                    .cloned()
                    .collect()
            } else {
                Vec::new()
            }
        };
        self.inner.sink.send(Envelope::Broadcast { enabled });
        if enabled {
            for peer in offer_targets {
                self.offer_to(peer).await;
            }
        } else {
            let connections: Vec<_> = {
                let state = self.inner.state.borrow();
                state
                    .peers
                    .values()
                    .map(|slot| Rc::clone(&slot.connection))
                    .collect()
            };
            for connection in connections {
                connection.detach_local_tracks();
            }
        }
    }

    /// Publishes a new display name (empty clears it).
    pub fn set_username(&self, username: &str) {
        self.inner.sink.send(Envelope::SetUsername {
            username: username.to_owned(),
        });
    }

    /// Notifies the engine that the signaling transport went away.
    pub fn transport_closed(&self) {
        self.inner.events.emit(&RoomEvent::Disconnected);
    }

    /// Initiates (or defers) an offer towards `peer`.
    ///
    /// Skipped when not broadcasting or when an offer is in flight
    /// already. A non-stable signaling state defers the offer by
    /// [`OFFER_RETRY_DELAY`], up to [`MAX_OFFER_RETRIES`] times.
    pub async fn offer_to(&self, peer: PeerId) {
        if !self.inner.state.borrow().broadcasting {
            return;
        }
        let connection = match self.ensure_peer(&peer) {
            Ok(connection) => connection,
            Err(e) => {
                self.inner.events.emit(&RoomEvent::Error(e));
                return;
            }
        };
        if connection.signaling_state() != SignalingState::Stable {
            self.schedule_offer_retry(peer);
            return;
        }
        {
            let mut state = self.inner.state.borrow_mut();
            let Some(slot) = state.peers.get_mut(&peer) else {
                return;
            };
            if slot.negotiation.making_offer {
                return;
            }
            slot.negotiation.making_offer = true;
            if let Some(retry) = slot.retry.take() {
                retry.stop();
            }
        }
        connection.attach_local_tracks();
        let offer = async {
            let sdp = connection.create_offer().await?;
            connection.set_local_offer(&sdp).await?;
            Ok::<_, PlatformError>(sdp)
        }
        .await;
        {
            let mut state = self.inner.state.borrow_mut();
            if let Some(slot) = state.peers.get_mut(&peer) {
                slot.negotiation.making_offer = false;
                if offer.is_ok() {
                    slot.negotiation.offer_retry_count = 0;
                }
            }
        }
        match offer {
            Ok(sdp) => self.send_signal(
                &peer,
                &SignalData::Description(SessionDescription {
                    kind: SdpKind::Offer,
                    sdp,
                }),
            ),
            Err(e) => {
                self.inner.events.emit(&RoomEvent::Error(e.into()));
            }
        }
    }

    /// Handles `welcome`: latches the own id, the ICE configuration and
    /// the first snapshot, and re-derives politeness of every known
    /// pair.
    fn on_welcome(
        &self,
        id: PeerId,
        snapshot: RoomSnapshot,
        ice_servers: Vec<IceServer>,
        ice_mode: IceMode,
    ) {
        {
            let mut state = self.inner.state.borrow_mut();
            state.ice_servers = ice_servers;
            state.ice_mode = ice_mode;
            state.snapshot = snapshot;
            state.self_id = Some(id.clone());
            for (peer, slot) in &mut state.peers {
                slot.negotiation.set_polite(is_polite(&id, peer));
            }
        }
        self.inner.events.emit(&RoomEvent::Connected);
        self.inner
            .events
            .emit(&RoomEvent::Status(format!("joined as {id}")));
    }

    /// Handles `broadcast-state`: releases the remote stream of a peer
    /// that stopped broadcasting, or detaches the local tracks when it
    /// is the own flag bouncing back disabled.
    fn on_broadcast_state(
        &self,
        id: &PeerId,
        enabled: bool,
        snapshot: RoomSnapshot,
    ) {
        self.apply_snapshot(snapshot);
        if enabled {
            return;
        }
        if self.is_self(id) {
            let connections: Vec<_> = {
                let state = self.inner.state.borrow();
                state
                    .peers
                    .values()
                    .map(|slot| Rc::clone(&slot.connection))
                    .collect()
            };
            for connection in connections {
                connection.detach_local_tracks();
            }
            return;
        }
        let had_stream = {
            let mut state = self.inner.state.borrow_mut();
            state
                .peers
                .get_mut(id)
                .map(|slot| std::mem::take(&mut slot.has_remote_stream))
        };
        if had_stream == Some(true) {
            self.inner
                .events
                .emit(&RoomEvent::StreamRemoved { peer: id.clone() });
        }
    }

    /// Handles a forwarded `signal` payload from `from`.
    async fn on_signal(&self, from: PeerId, data: Value) {
        let data = match serde_json::from_value::<SignalData>(data) {
            Ok(data) => data,
            Err(e) => {
                log::warn!("discarding signal from {from}: {e}");
                self.inner.events.emit(&RoomEvent::Error(
                    EngineError::BadPayload(e.to_string()),
                ));
                return;
            }
        };
        match data {
            SignalData::Description(description) => {
                self.on_description(from, description).await;
            }
            SignalData::Candidate { candidate } => {
                self.on_candidate(from, candidate).await;
            }
        }
    }

    /// Applies a remote session description, resolving glare per the
    /// perfect-negotiation pattern, and answers remote offers.
    async fn on_description(
        &self,
        from: PeerId,
        description: SessionDescription,
    ) {
        let connection = match self.ensure_peer(&from) {
            Ok(connection) => connection,
            Err(e) => {
                self.inner.events.emit(&RoomEvent::Error(e));
                return;
            }
        };
        let disposition = {
            let mut state = self.inner.state.borrow_mut();
            let Some(slot) = state.peers.get_mut(&from) else {
                return;
            };
            slot.negotiation.on_remote_description(
                description.kind,
                connection.signaling_state(),
            )
        };
        match disposition {
            SdpDisposition::Ignore => {
                log::debug!("ignoring colliding offer from {from}");
                return;
            }
            SdpDisposition::RollbackAndApply => {
                if let Err(e) = connection.rollback().await {
                    self.inner.events.emit(&RoomEvent::Error(e.into()));
                    return;
                }
            }
            SdpDisposition::Apply => {}
        }

        if description.kind == SdpKind::Answer {
            self.with_slot(&from, |slot| {
                slot.negotiation.is_setting_remote_answer_pending = true;
            });
        }
        let applied = connection.set_remote_description(&description).await;
        self.with_slot(&from, |slot| {
            slot.negotiation.is_setting_remote_answer_pending = false;
            if applied.is_ok() {
                slot.negotiation.remote_description_applied();
            }
        });
        if let Err(e) = applied {
            self.inner.events.emit(&RoomEvent::Error(e.into()));
            return;
        }

        // Candidates gathered before the remote description flush now,
        // in arrival order.
        let pending: Vec<IceCandidate> = {
            let mut state = self.inner.state.borrow_mut();
            state
                .peers
                .get_mut(&from)
                .map(|slot| {
                    slot.negotiation.pending_candidates.drain(..).collect()
                })
                .unwrap_or_default()
        };
        for candidate in pending {
            if let Err(e) = connection.add_ice_candidate(&candidate).await {
                log::warn!("queued candidate of {from} rejected: {e}");
            }
        }

        if description.kind == SdpKind::Offer {
            if self.inner.state.borrow().broadcasting {
                connection.attach_local_tracks();
            }
            let answer = async {
                let sdp = connection.create_answer().await?;
                connection.set_local_answer(&sdp).await?;
                Ok::<_, PlatformError>(sdp)
            }
            .await;
            match answer {
                Ok(sdp) => self.send_signal(
                    &from,
                    &SignalData::Description(SessionDescription {
                        kind: SdpKind::Answer,
                        sdp,
                    }),
                ),
                Err(e) => {
                    self.inner.events.emit(&RoomEvent::Error(e.into()));
                }
            }
        }
    }

    /// Adds (or queues) a remote trickled ICE candidate.
    async fn on_candidate(&self, from: PeerId, candidate: IceCandidate) {
        let connection = match self.ensure_peer(&from) {
            Ok(connection) => connection,
            Err(e) => {
                self.inner.events.emit(&RoomEvent::Error(e));
                return;
            }
        };
        {
            let mut state = self.inner.state.borrow_mut();
            let Some(slot) = state.peers.get_mut(&from) else {
                return;
            };
            if slot.negotiation.ignore_offer {
                log::debug!(
                    "dropping candidate of {from}: its offer is ignored",
                );
                return;
            }
            if !connection.has_remote_description() {
                slot.negotiation.pending_candidates.push_back(candidate);
                return;
            }
        }
        if let Err(e) = connection.add_ice_candidate(&candidate).await {
            log::warn!("candidate of {from} rejected: {e}");
        }
    }

    /// Returns the connection towards `id`, creating and wiring a fresh
    /// slot when none exists yet.
    fn ensure_peer(
        &self,
        id: &PeerId,
    ) -> Result<Rc<dyn PeerConnection>, EngineError> {
        if let Some(slot) = self.inner.state.borrow().peers.get(id) {
            return Ok(Rc::clone(&slot.connection));
        }
        let (ice_servers, relay_only, polite) = {
            let state = self.inner.state.borrow();
            (
                state.ice_servers.clone(),
                state.ice_mode.is_relay_only(),
                state
                    .self_id
                    .as_ref()
                    .map_or(true, |own| is_polite(own, id)),
            )
        };
        let connection = self.inner.factory.create(&ice_servers, relay_only)?;

        let weak = Rc::downgrade(&self.inner);
        let remote = id.clone();
        connection.on_ice_candidate(Box::new(move |candidate| {
            if let Some(room) = Room::upgrade(&weak) {
                room.send_signal(&remote, &SignalData::Candidate { candidate });
            }
        }));

        let weak = Rc::downgrade(&self.inner);
        let remote = id.clone();
        connection.on_connection_state_change(Box::new(move |conn_state| {
            let Some(room) = Room::upgrade(&weak) else {
                return;
            };
            match conn_state {
                ConnectionState::Failed | ConnectionState::Closed => {
                    log::info!("connection to {remote} is {conn_state:?}");
                    room.drop_peer(&remote);
                }
                // `disconnected` is recoverable; never tear down on it.
                ConnectionState::Disconnected => {
                    room.inner.events.emit(&RoomEvent::Status(format!(
                        "connection to {remote} degraded",
                    )));
                }
                _ => {}
            }
        }));

        let weak = Rc::downgrade(&self.inner);
        let remote = id.clone();
        connection.on_track(Box::new(move || {
            let Some(room) = Room::upgrade(&weak) else {
                return;
            };
            room.with_slot(&remote, |slot| slot.has_remote_stream = true);
            room.inner.events.emit(&RoomEvent::StreamAdded {
                peer: remote.clone(),
            });
        }));

        log::debug!("created peer connection towards {id}");
        drop(self.inner.state.borrow_mut().peers.insert(
            id.clone(),
            PeerSlot {
                connection: Rc::clone(&connection),
                negotiation: Negotiation::new(polite),
                retry: None,
                has_remote_stream: false,
            },
        ));
        Ok(connection)
    }

    /// Arms (or re-arms) the deferred-offer timer towards `peer`.
    fn schedule_offer_retry(&self, peer: PeerId) {
        {
            let mut state = self.inner.state.borrow_mut();
            let Some(slot) = state.peers.get_mut(&peer) else {
                return;
            };
            if slot.negotiation.offer_retry_count >= MAX_OFFER_RETRIES {
                log::warn!(
                    "giving up on offering to {peer}: signaling never \
                     stabilized",
                );
                return;
            }
            slot.negotiation.offer_retry_count += 1;
            if let Some(pending) = &slot.retry {
                // A retry is already parked on this delay; start its
                // countdown over.
                pending.reset();
                return;
            }
            let (delay, handle) = resettable_delay_for(OFFER_RETRY_DELAY);
            slot.retry = Some(handle);
            let weak = Rc::downgrade(&self.inner);
            let target = peer.clone();
            spawn(async move {
                delay.await;
                if let Some(room) = Room::upgrade(&weak) {
                    room.with_slot(&target, |slot| slot.retry = None);
                    room.offer_to(target).await;
                }
            });
        }
    }

    /// Tears the slot of `peer` down: cancels its retry timer, closes
    /// the connection and releases its remote stream.
    fn drop_peer(&self, peer: &PeerId) {
        let slot = self.inner.state.borrow_mut().peers.remove(peer);
        if let Some(slot) = slot {
            if let Some(retry) = slot.retry {
                retry.stop();
            }
            slot.connection.close();
            if slot.has_remote_stream {
                self.inner
                    .events
                    .emit(&RoomEvent::StreamRemoved { peer: peer.clone() });
            }
            log::debug!("dropped peer connection towards {peer}");
        }
    }

    /// Overwrites the local presence view with an authoritative
    /// snapshot.
    fn apply_snapshot(&self, snapshot: RoomSnapshot) {
        self.inner.state.borrow_mut().snapshot = snapshot;
    }

    /// Indicates whether `id` is the own peer id.
    fn is_self(&self, id: &PeerId) -> bool {
        self.inner.state.borrow().self_id.as_ref() == Some(id)
    }

    /// Runs `f` over the slot of `peer`, if it still exists.
    fn with_slot(&self, peer: &PeerId, f: impl FnOnce(&mut PeerSlot)) {
        if let Some(slot) = self.inner.state.borrow_mut().peers.get_mut(peer)
        {
            f(slot);
        }
    }

    /// Encodes and sends a `signal` payload to `to`.
    fn send_signal(&self, to: &PeerId, data: &SignalData) {
        match data.to_value() {
            Ok(value) => self.inner.sink.send(Envelope::Signal {
                to: to.clone(),
                data: value,
            }),
            Err(e) => log::error!("failed to encode signal payload: {e}"),
        }
    }

    /// Rebuilds a [`Room`] handle from a weak internals reference.
    fn upgrade(weak: &Weak<InnerRoom>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }
}
