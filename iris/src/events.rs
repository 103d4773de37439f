//! Typed event dispatching of the room handle.

use std::{
    cell::RefCell,
    collections::HashMap,
    rc::{Rc, Weak},
};

use hermes_client_api_proto::PeerId;

use crate::room::EngineError;

/// Event surfaced by a [`Room`](crate::room::Room).
#[derive(Clone, Debug)]
pub enum RoomEvent {
    /// `welcome` was processed; the room is usable.
    Connected,

    /// The signaling transport went away.
    Disconnected,

    /// Human-readable progress line.
    Status(String),

    /// A platform or engine failure worth surfacing.
    Error(EngineError),

    /// A remote stream of a peer became available.
    StreamAdded {
        /// Id of the streaming peer.
        peer: PeerId,
    },

    /// The remote stream of a peer went away.
    StreamRemoved {
        /// Id of the peer that stopped streaming.
        peer: PeerId,
    },
}

impl RoomEvent {
    /// Name this event dispatches under.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Status(_) => "status",
            Self::Error(_) => "error",
            Self::StreamAdded { .. } => "stream-added",
            Self::StreamRemoved { .. } => "stream-removed",
        }
    }
}

type Subscriber = Rc<dyn Fn(&RoomEvent)>;

/// Subscribers keyed by event name.
#[derive(Default)]
struct Inner {
    subscribers: HashMap<&'static str, Vec<(usize, Subscriber)>>,
    next_id: usize,
}

/// Registry of event subscribers, invoked synchronously in registration
/// order.
#[derive(Clone, Default)]
pub struct EventRegistry(Rc<RefCell<Inner>>);

impl EventRegistry {
    /// Creates a new empty [`EventRegistry`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes `f` to events dispatching under `name`.
    ///
    /// The subscription lasts until the returned handle is dropped or
    /// [`Subscription::unsubscribe`]d.
    pub fn subscribe(
        &self,
        name: &'static str,
        f: impl Fn(&RoomEvent) + 'static,
    ) -> Subscription {
        let mut inner = self.0.borrow_mut();
        let id = inner.next_id;
        inner.next_id += 1;
        inner
            .subscribers
            .entry(name)
            .or_default()
            .push((id, Rc::new(f)));
        Subscription {
            registry: Rc::downgrade(&self.0),
            name,
            id,
        }
    }

    /// Dispatches `event` to its subscribers.
    pub fn emit(&self, event: &RoomEvent) {
        // Clone the list out so a subscriber may (un)subscribe
        // re-entrantly.
        let subscribers: Vec<Subscriber> = self
            .0
            .borrow()
            .subscribers
            .get(event.name())
            .map(|subs| subs.iter().map(|(_, s)| Rc::clone(s)).collect())
            .unwrap_or_default();
        for subscriber in subscribers {
            subscriber(event);
        }
    }
}

/// Handle of one subscription; unsubscribes on drop.
pub struct Subscription {
    registry: Weak<RefCell<Inner>>,
    name: &'static str,
    id: usize,
}

impl Subscription {
    /// Removes the subscription explicitly.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            if let Some(subs) =
                registry.borrow_mut().subscribers.get_mut(self.name)
            {
                subs.retain(|(id, _)| *id != self.id);
            }
        }
    }
}
