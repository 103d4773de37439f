//! WebSocket session of a single signaling peer.

use std::time::{Duration, Instant};

use actix::{
    Actor, ActorContext as _, ActorFutureExt as _, Addr, AsyncContext as _,
    StreamHandler, WrapFuture as _,
};
use actix_web_actors::ws;
use base64::Engine as _;
use hermes_client_api_proto::{Envelope, PeerId, RoomCode};
use rand::RngCore as _;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::{
    prelude::*,
    signalling::hub::{
        FrameSender, Hub, Inbound, Join, Leave, OutboundFrame,
        SEND_QUEUE_CAPACITY,
    },
};

/// Interval between pings sent to the peer.
const PING_INTERVAL: Duration = Duration::from_secs(40);

/// Idle deadline: the session is dropped when no frame (pongs included)
/// arrives for this long.
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// How often the idle deadline is checked.
const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Samples a fresh random peer id: 128 bits rendered URL-safe.
#[must_use]
pub fn generate_peer_id() -> PeerId {
    let mut raw = [0_u8; 16];
    rand::thread_rng().fill_bytes(&mut raw);
    base64::engine::general_purpose::URL_SAFE_NO_PAD
        .encode(raw)
        .into()
}

/// Connection of a single peer, bridging its WebSocket to the room hub.
///
/// The session feeds decoded inbound frames into the hub and drains the
/// hub's bounded outbound queue onto the socket, in FIFO order. Stopping
/// the session for any reason (read error, close frame, idle deadline,
/// hub-side queue close) drives the hub's eviction path exactly once.
pub struct WsSession {
    /// Id of this peer.
    id: PeerId,

    /// Room this peer joined; fixed for the session lifetime.
    room: RoomCode,

    /// Hub serving that room.
    hub: Addr<Hub>,

    /// Instant the last frame was received from the peer at.
    last_heartbeat: Instant,

    /// Sending half of the own outbound queue, identifying this session
    /// towards the hub on eviction.
    queue: Option<FrameSender>,
}

impl WsSession {
    /// Creates a new [`WsSession`] for the given peer.
    #[must_use]
    pub fn new(id: PeerId, room: RoomCode, hub: Addr<Hub>) -> Self {
        Self {
            id,
            room,
            hub,
            last_heartbeat: Instant::now(),
            queue: None,
        }
    }

    /// Schedules periodic pings and enforcement of the idle deadline.
    fn heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let _ = ctx.run_interval(PING_INTERVAL, |_, ctx| {
            ctx.ping(b"");
        });
        let _ = ctx.run_interval(IDLE_POLL_INTERVAL, |this, ctx| {
            if Instant::now().duration_since(this.last_heartbeat)
                > IDLE_TIMEOUT
            {
                info!(
                    "Peer {} in room {} exceeded the idle deadline",
                    this.id, this.room,
                );
                ctx.stop();
            }
        });
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    /// Creates the outbound queue and registers with the hub.
    ///
    /// The session waits for the registration to settle before reading
    /// any inbound frame, so nothing can outrun the `welcome`.
    fn started(&mut self, ctx: &mut Self::Context) {
        self.heartbeat(ctx);

        let (tx, rx) = mpsc::channel(SEND_QUEUE_CAPACITY);
        let _ = ctx.add_stream(ReceiverStream::new(rx));
        self.queue = Some(tx.clone());

        let join = self.hub.send(Join {
            id: self.id.clone(),
            queue: tx,
        });
        ctx.wait(join.into_actor(self).map(|res, this, ctx| match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("Peer {} registration failed: {}", this.id, e);
                ctx.close(Some(ws::CloseCode::Error.into()));
                ctx.stop();
            }
            Err(e) => {
                error!("Hub of room {} is unreachable: {}", this.room, e);
                ctx.close(Some(ws::CloseCode::Error.into()));
                ctx.stop();
            }
        }));
    }

    /// Drives the hub's eviction path.
    fn stopped(&mut self, _: &mut Self::Context) {
        if let Some(queue) = self.queue.take() {
            self.hub.do_send(Leave {
                id: self.id.clone(),
                queue,
            });
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(
        &mut self,
        msg: Result<ws::Message, ws::ProtocolError>,
        ctx: &mut Self::Context,
    ) {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                warn!(
                    "WebSocket protocol error from peer {}: {}",
                    self.id, e,
                );
                ctx.stop();
                return;
            }
        };
        match msg {
            ws::Message::Text(text) => {
                self.last_heartbeat = Instant::now();
                match serde_json::from_str::<Envelope>(&text) {
                    Ok(envelope) => self.hub.do_send(Inbound {
                        from: self.id.clone(),
                        envelope,
                    }),
                    // A malformed frame is dropped; the connection
                    // survives.
                    Err(e) => warn!(
                        "Discarding malformed frame from peer {}: {}",
                        self.id, e,
                    ),
                }
            }
            ws::Message::Ping(payload) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&payload);
            }
            ws::Message::Pong(_) => {
                self.last_heartbeat = Instant::now();
            }
            ws::Message::Close(reason) => {
                ctx.close(reason);
                ctx.stop();
            }
            _ => warn!(
                "Discarding unsupported frame from peer {}",
                self.id,
            ),
        }
    }
}

impl StreamHandler<OutboundFrame> for WsSession {
    /// Drains the hub's outbound queue onto the socket in FIFO order.
    fn handle(&mut self, frame: OutboundFrame, ctx: &mut Self::Context) {
        ctx.text(frame.0.as_ref().to_owned());
    }
}
