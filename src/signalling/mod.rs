//! Signalling subsystem: per-room hubs and their manager.

pub mod hub;
pub mod hub_manager;

#[doc(inline)]
pub use self::{hub::Hub, hub_manager::HubManager};
