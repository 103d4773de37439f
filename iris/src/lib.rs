//! Client-side negotiation engine of the Hermes signaling service.
//!
//! Drives one `RTCPeerConnection` per remote peer through the perfect
//! negotiation pattern: deterministic polite/impolite roles, rollback on
//! glare, bounded offer retries and an ordered pending-ICE queue. The
//! browser objects themselves live behind the [`platform`] seam, so the
//! engine runs (and is tested) on any single-threaded executor.

#![allow(clippy::module_name_repetitions)]

pub mod events;
pub mod negotiation;
pub mod platform;
pub mod room;
pub mod settings;
mod utils;

#[doc(inline)]
pub use self::{
    events::{EventRegistry, RoomEvent, Subscription},
    room::{EngineError, Room},
};

pub use hermes_client_api_proto as proto;
