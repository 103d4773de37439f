//! Hub multiplexing and idle-room cleanup.

use std::{collections::HashMap, sync::Arc, time::Duration};

use actix::{
    Actor, ActorFutureExt as _, Addr, AsyncContext as _, AtomicResponse,
    Context, Handler, Message, SpawnHandle, WrapFuture as _,
};
use hermes_client_api_proto::{IceMode, IceServer, RoomCode};

use crate::{
    conf::Conf,
    prelude::*,
    registry::{RegistryError, RoomRegistry},
    signalling::hub::{Close, Hub},
    store::PresenceRepository,
};

/// Factory producing the presence repository scoped to a room.
pub type PresenceFactory =
    Arc<dyn Fn(&RoomCode) -> Arc<dyn PresenceRepository> + Send + Sync>;

/// Live hub of one room together with its cleanup bookkeeping.
struct HubEntry {
    /// Address of the running [`Hub`] actor.
    addr: Addr<Hub>,

    /// Presence repository the hub was built on.
    presence: Arc<dyn PresenceRepository>,

    /// Armed idle-cleanup timer, if any.
    cleanup: Option<SpawnHandle>,
}

/// Owner of all live hubs: one per active room, created lazily and torn
/// down (together with the room record) after staying empty for the
/// idle interval.
pub struct HubManager {
    /// Live hubs keyed by room code.
    hubs: HashMap<RoomCode, HubEntry>,

    /// Factory of per-room presence repositories.
    presence_factory: PresenceFactory,

    /// Registry the rooms of idle hubs are deleted from.
    registry: Arc<dyn RoomRegistry>,

    /// ICE servers handed to hubs.
    ice_servers: Vec<IceServer>,

    /// ICE transport mode handed to hubs.
    ice_mode: IceMode,

    /// How long an empty hub lingers before its room is torn down.
    idle_timeout: Duration,
}

impl HubManager {
    /// Creates a new [`HubManager`].
    #[must_use]
    pub fn new(
        conf: &Conf,
        registry: Arc<dyn RoomRegistry>,
        presence_factory: PresenceFactory,
    ) -> Self {
        Self {
            hubs: HashMap::new(),
            presence_factory,
            registry,
            ice_servers: conf.ice_servers(),
            ice_mode: conf.ice_mode,
            idle_timeout: conf.hub_idle_timeout,
        }
    }

    /// Fires when the idle timer of `room` elapses: re-checks emptiness
    /// through the presence storage, then resets it, drops the hub and
    /// deletes the room record.
    ///
    /// Runs as a waiting future, so a racing [`HubForRoom`] cannot
    /// observe a half-torn room: it is handled either before the
    /// teardown starts or after it finished.
    fn cleanup_room(&mut self, room: RoomCode, ctx: &mut Context<Self>) {
        let Some(entry) = self.hubs.get_mut(&room) else {
            return;
        };
        entry.cleanup = None;

        let presence = Arc::clone(&entry.presence);
        let registry = Arc::clone(&self.registry);
        let code = room.clone();
        ctx.wait(
            async move {
                match presence.peer_count().await {
                    Ok(0) => {}
                    Ok(n) => {
                        debug!(
                            "Aborting cleanup of room {}: {} peer(s) \
                             rejoined",
                            code, n,
                        );
                        return false;
                    }
                    Err(e) => {
                        error!(
                            "Aborting cleanup of room {}: presence \
                             recheck failed: {}",
                            code, e,
                        );
                        return false;
                    }
                }
                if let Err(e) = presence.reset().await {
                    error!(
                        "Resetting presence of room {} failed: {}",
                        code, e,
                    );
                }
                match registry.delete(&code).await {
                    Ok(()) | Err(RegistryError::NotFound) => {}
                    Err(e) => error!(
                        "Deleting room {} from the registry failed: {}",
                        code, e,
                    ),
                }
                true
            }
            .into_actor(self)
            .map(move |destroy, act, _| {
                if destroy {
                    if let Some(entry) = act.hubs.remove(&room) {
                        entry.addr.do_send(Close);
                        info!("Room {} destroyed after idle timeout", room);
                    }
                }
            }),
        );
    }
}

impl Actor for HubManager {
    type Context = Context<Self>;
}

/// Returns the hub serving a room, creating it when absent and
/// cancelling any pending idle cleanup of it.
#[derive(Message)]
#[rtype(result = "Addr<Hub>")]
pub struct HubForRoom(pub RoomCode);

impl Handler<HubForRoom> for HubManager {
    type Result = AtomicResponse<Self, Addr<Hub>>;

    fn handle(
        &mut self,
        msg: HubForRoom,
        ctx: &mut Context<Self>,
    ) -> Self::Result {
        let code = msg.0;
        if let Some(entry) = self.hubs.get_mut(&code) {
            if let Some(handle) = entry.cleanup.take() {
                let _ = ctx.cancel_future(handle);
                debug!("Cancelled idle cleanup of rejoined room {}", code);
            }
            return AtomicResponse::new(Box::pin(actix::fut::ready(
                entry.addr.clone(),
            )));
        }

        let presence = (self.presence_factory)(&code);
        AtomicResponse::new(Box::pin(
            async move {
                // Stale triple entries from a previous process run must
                // not leak into the fresh hub.
                if let Err(e) = presence.reset().await {
                    error!(
                        "Resetting presence of new room {} failed: {}",
                        code, e,
                    );
                }
                (code, presence)
            }
            .into_actor(self)
            .map(|(code, presence), act, ctx| {
                let hub = Hub::new(
                    code.clone(),
                    Arc::clone(&presence),
                    act.ice_servers.clone(),
                    act.ice_mode,
                    ctx.address().recipient(),
                )
                .start();
                info!("Created hub for room {}", code);
                drop(act.hubs.insert(
                    code,
                    HubEntry {
                        addr: hub.clone(),
                        presence,
                        cleanup: None,
                    },
                ));
                hub
            }),
        ))
    }
}

/// Notification from a hub that its peer count dropped to zero.
#[derive(Message)]
#[rtype(result = "()")]
pub struct HubEmptied {
    /// Code of the emptied room.
    pub room: RoomCode,
}

impl Handler<HubEmptied> for HubManager {
    type Result = ();

    /// Arms the one-shot idle timer of the room, unless one is armed
    /// already.
    fn handle(&mut self, msg: HubEmptied, ctx: &mut Context<Self>) {
        let code = msg.room;
        let timeout = self.idle_timeout;
        let Some(entry) = self.hubs.get_mut(&code) else {
            return;
        };
        if entry.cleanup.is_some() {
            return;
        }
        debug!(
            "Room {} is empty: cleanup in {:?} unless rejoined",
            code, timeout,
        );
        let room = code.clone();
        entry.cleanup = Some(ctx.run_later(timeout, move |act, ctx| {
            act.cleanup_room(room, ctx);
        }));
    }
}
