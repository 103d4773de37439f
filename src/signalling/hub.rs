//! Per-room signaling hub.

use std::{collections::HashMap, sync::Arc};

use actix::{
    Actor, ActorContext as _, ActorFutureExt as _, AtomicResponse, Context,
    Handler, Message, Recipient, WrapFuture as _,
};
use derive_more::{Display, From};
use hermes_client_api_proto::{
    Envelope, IceMode, IceServer, PeerId, RoomCode, RoomSnapshot, ServerMsg,
};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::{
    prelude::*,
    signalling::hub_manager::HubEmptied,
    store::{PresenceError, PresenceRepository},
};

/// Capacity of a peer's outbound queue. Enqueueing onto a full queue
/// drops the frame for that peer only.
pub const SEND_QUEUE_CAPACITY: usize = 32;

/// Sending half of a peer's bounded outbound queue.
pub type FrameSender = mpsc::Sender<OutboundFrame>;

/// Single encoded text frame queued for delivery to one peer.
#[derive(Clone, Debug)]
pub struct OutboundFrame(pub Arc<str>);

/// Error of a hub operation.
#[derive(Debug, Display, From)]
pub enum HubError {
    /// Presence storage failed.
    #[display(fmt = "presence storage failed: {}", _0)]
    Presence(PresenceError),
}

impl std::error::Error for HubError {}

/// Handle to a registered peer.
struct Session {
    /// Outbound queue drained by the peer's WebSocket session.
    queue: FrameSender,
}

/// Per-room signaling coordinator.
///
/// Registers peers, snapshots presence, fans out state events, and
/// forwards targeted payloads. Registrations, evictions and presence
/// mutations run as atomic handlers, so no state snapshot can observe a
/// half-applied change; the presence repository stays the single source
/// of truth for the room's triple.
pub struct Hub {
    /// Code of the room this hub serves.
    room: RoomCode,

    /// Registered peers and their outbound queues.
    clients: HashMap<PeerId, Session>,

    /// Authoritative presence storage scoped to this room.
    presence: Arc<dyn PresenceRepository>,

    /// ICE servers handed to joining peers.
    ice_servers: Vec<IceServer>,

    /// ICE transport mode handed to joining peers.
    ice_mode: IceMode,

    /// Notified every time the peer count drops to zero.
    on_empty: Recipient<HubEmptied>,
}

impl Hub {
    /// Creates a new [`Hub`] for the given room.
    #[must_use]
    pub fn new(
        room: RoomCode,
        presence: Arc<dyn PresenceRepository>,
        ice_servers: Vec<IceServer>,
        ice_mode: IceMode,
        on_empty: Recipient<HubEmptied>,
    ) -> Self {
        Self {
            room,
            clients: HashMap::new(),
            presence,
            ice_servers,
            ice_mode,
            on_empty,
        }
    }

    /// Enqueues a frame to a single peer, dropping it when the queue is
    /// full or already closed. The connection itself survives drops.
    fn enqueue(
        room: &RoomCode,
        id: &PeerId,
        queue: &FrameSender,
        frame: OutboundFrame,
    ) {
        use mpsc::error::TrySendError;

        match queue.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(
                    "Dropping frame for peer {} in room {}: \
                     outbound queue is full",
                    id, room,
                );
            }
            Err(TrySendError::Closed(_)) => {
                debug!(
                    "Dropping frame for peer {} in room {}: \
                     outbound queue is closed",
                    id, room,
                );
            }
        }
    }

    /// Encodes `msg` once and enqueues it to every registered peer
    /// except `skip`.
    fn fan_out(&self, msg: &ServerMsg, skip: Option<&PeerId>) {
        let frame = encode(msg);
        for (id, session) in &self.clients {
            if Some(id) == skip {
                continue;
            }
            Self::enqueue(&self.room, id, &session.queue, frame.clone());
        }
    }

    /// Enqueues `msg` to a single registered peer.
    fn send_to(&self, id: &PeerId, msg: &ServerMsg) {
        if let Some(session) = self.clients.get(id) {
            Self::enqueue(&self.room, id, &session.queue, encode(msg));
        }
    }

    /// Forwards an opaque signaling payload to the addressed peer, if it
    /// is registered with this hub. Malformed or untargetable payloads
    /// are dropped without any error back to the sender.
    fn forward_signal(&self, from: PeerId, to: PeerId, data: Value) {
        if to.is_empty() || data.is_null() {
            warn!(
                "Discarding malformed signal from peer {} in room {}",
                from, self.room,
            );
            return;
        }
        if let Some(session) = self.clients.get(&to) {
            let msg = ServerMsg::Signal {
                from,
                to: to.clone(),
                data,
            };
            Self::enqueue(&self.room, &to, &session.queue, encode(&msg));
        } else {
            debug!(
                "Discarding signal from peer {} to unknown peer {} \
                 in room {}",
                from, to, self.room,
            );
        }
    }

    /// Notifies the manager if the local registry is empty.
    fn notify_if_empty(&self) {
        if self.clients.is_empty() {
            self.on_empty.do_send(HubEmptied {
                room: self.room.clone(),
            });
        }
    }

    /// Fallback snapshot built from the local registry, used only when
    /// the presence storage cannot be read during an eviction.
    fn local_snapshot(&self) -> RoomSnapshot {
        let mut peers: Vec<_> = self.clients.keys().cloned().collect();
        peers.sort_unstable();
        RoomSnapshot {
            peers,
            ..RoomSnapshot::default()
        }
    }
}

/// Encodes a [`ServerMsg`] into a frame shared between recipients.
fn encode(msg: &ServerMsg) -> OutboundFrame {
    OutboundFrame(serde_json::to_string(msg).unwrap().into())
}

impl Actor for Hub {
    type Context = Context<Self>;
}

/// Registers an already-upgraded connection with the hub.
#[derive(Message)]
#[rtype(result = "Result<(), HubError>")]
pub struct Join {
    /// Id of the joining peer.
    pub id: PeerId,

    /// Sending half of the peer's outbound queue.
    pub queue: FrameSender,
}

impl Handler<Join> for Hub {
    type Result = AtomicResponse<Self, Result<(), HubError>>;

    /// Runs the registration sequence: local insert, store insert,
    /// snapshot, `welcome` unicast, `peer-joined` fan-out.
    ///
    /// A presence storage failure aborts the registration: the peer is
    /// removed again and no `peer-joined` reaches the room.
    fn handle(&mut self, msg: Join, _: &mut Context<Self>) -> Self::Result {
        let Join { id, queue } = msg;
        drop(self.clients.insert(id.clone(), Session { queue }));

        let presence = Arc::clone(&self.presence);
        let peer = id.clone();
        AtomicResponse::new(Box::pin(
            async move {
                presence.add_peer(&peer).await?;
                Ok(presence.state().await?)
            }
            .into_actor(self)
            .map(move |res: Result<_, HubError>, act, _| match res {
                Ok(state) => {
                    info!("Peer {} joined room {}", id, act.room);
                    act.send_to(
                        &id,
                        &ServerMsg::Welcome {
                            id: id.clone(),
                            state: state.clone(),
                            ice_servers: act.ice_servers.clone(),
                            ice_mode: act.ice_mode,
                        },
                    );
                    act.fan_out(
                        &ServerMsg::PeerJoined {
                            id: id.clone(),
                            state,
                        },
                        Some(&id),
                    );
                    Ok(())
                }
                Err(e) => {
                    error!(
                        "Registration of peer {} in room {} failed: {}",
                        id, act.room, e,
                    );
                    drop(act.clients.remove(&id));
                    act.notify_if_empty();
                    Err(e)
                }
            }),
        ))
    }
}

/// Evicts a peer after its socket went away.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Leave {
    /// Id of the evicted peer.
    pub id: PeerId,

    /// Queue of the session being evicted. A stale [`Leave`] of a
    /// session that was already replaced by a reconnect must not evict
    /// its replacement.
    pub queue: FrameSender,
}

impl Handler<Leave> for Hub {
    type Result = AtomicResponse<Self, ()>;

    /// Runs the eviction sequence: local remove, atomic store remove,
    /// snapshot, `peer-left` fan-out, `OnEmpty` notification.
    ///
    /// Presence storage failures are logged and never block the
    /// eviction: the local registry entry is always gone when this
    /// handler completes.
    fn handle(&mut self, msg: Leave, _: &mut Context<Self>) -> Self::Result {
        let Leave { id, queue } = msg;
        let was_registered = match self.clients.get(&id) {
            Some(session) if session.queue.same_channel(&queue) => {
                drop(self.clients.remove(&id));
                true
            }
            _ => false,
        };
        if !was_registered {
            self.notify_if_empty();
            return AtomicResponse::new(Box::pin(actix::fut::ready(())));
        }

        let presence = Arc::clone(&self.presence);
        let peer = id.clone();
        AtomicResponse::new(Box::pin(
            async move {
                if let Err(e) = presence.remove_peer(&peer).await {
                    error!(
                        "Evicting peer {}: presence removal failed: {}",
                        peer, e,
                    );
                }
                presence.state().await
            }
            .into_actor(self)
            .map(move |res, act, _| {
                let state = res.unwrap_or_else(|e| {
                    error!(
                        "Evicting peer {}: presence snapshot failed: {}",
                        id, e,
                    );
                    act.local_snapshot()
                });
                info!("Peer {} left room {}", id, act.room);
                act.fan_out(
                    &ServerMsg::PeerLeft {
                        id: id.clone(),
                        state,
                    },
                    None,
                );
                act.notify_if_empty();
            }),
        ))
    }
}

/// Inbound frame received from a registered peer.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Inbound {
    /// Id of the sending peer.
    pub from: PeerId,

    /// The decoded frame.
    pub envelope: Envelope,
}

impl Handler<Inbound> for Hub {
    type Result = AtomicResponse<Self, ()>;

    fn handle(&mut self, msg: Inbound, _: &mut Context<Self>) -> Self::Result {
        let Inbound { from, envelope } = msg;
        match envelope {
            Envelope::Signal { to, data } => {
                self.forward_signal(from, to, data);
                AtomicResponse::new(Box::pin(actix::fut::ready(())))
            }
            Envelope::Broadcast { enabled } => {
                let presence = Arc::clone(&self.presence);
                let peer = from.clone();
                AtomicResponse::new(Box::pin(
                    async move {
                        presence.set_broadcast(&peer, enabled).await?;
                        presence.state().await
                    }
                    .into_actor(self)
                    .map(move |res, act, _| match res {
                        Ok(state) => act.fan_out(
                            &ServerMsg::BroadcastState {
                                id: from,
                                enabled,
                                state,
                            },
                            None,
                        ),
                        Err(e) => error!(
                            "Broadcast toggle of peer {} in room {} \
                             failed: {}",
                            from, act.room, e,
                        ),
                    }),
                ))
            }
            Envelope::SetUsername { username } => {
                let presence = Arc::clone(&self.presence);
                let peer = from.clone();
                AtomicResponse::new(Box::pin(
                    async move {
                        presence.set_username(&peer, &username).await?;
                        presence.state().await
                    }
                    .into_actor(self)
                    .map(move |res, act, _| match res {
                        Ok(state) => act.fan_out(
                            &ServerMsg::Usernames { id: from, state },
                            None,
                        ),
                        Err(e) => error!(
                            "Username update of peer {} in room {} \
                             failed: {}",
                            from, act.room, e,
                        ),
                    }),
                ))
            }
        }
    }
}

/// Stops the hub actor.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Close;

impl Handler<Close> for Hub {
    type Result = ();

    fn handle(&mut self, _: Close, ctx: &mut Context<Self>) {
        ctx.stop();
    }
}
