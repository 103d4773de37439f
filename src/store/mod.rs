//! Per-room presence storage.
//!
//! The (peers, broadcasting, usernames) triple is the authoritative view
//! of a room. The hub never caches it: every snapshot it fans out is
//! read back from here, and a peer eviction removes the id from all
//! three sub-structures in one atomic step.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use derive_more::{Display, From};
use hermes_client_api_proto::{PeerId, RoomSnapshot};

#[doc(inline)]
pub use self::{memory::InMemPresenceRepository, redis::RedisPresenceRepository};

/// Error of a presence storage operation.
#[derive(Debug, Display, From)]
pub enum PresenceError {
    /// Backing Redis command failed.
    #[display(fmt = "Redis command failed: {}", _0)]
    Command(::redis::RedisError),

    /// Could not check out a connection from the Redis pool.
    #[display(fmt = "Redis pool failed: {}", _0)]
    Pool(deadpool_redis::PoolError),
}

impl std::error::Error for PresenceError {}

/// Storage of a single room's presence triple.
///
/// Implementations must guarantee that [`state`](PresenceRepository::state)
/// never observes a partial [`remove_peer`](PresenceRepository::remove_peer):
/// either the id is still in every sub-structure it occupied, or in none.
#[async_trait]
pub trait PresenceRepository: Send + Sync {
    /// Clears all three sub-structures.
    async fn reset(&self) -> Result<(), PresenceError>;

    /// Inserts a peer id into the peers set. Idempotent.
    async fn add_peer(&self, id: &PeerId) -> Result<(), PresenceError>;

    /// Removes a peer from peers, broadcasting and usernames in a single
    /// atomic step.
    async fn remove_peer(&self, id: &PeerId) -> Result<(), PresenceError>;

    /// Adds (`enabled`) or removes the peer id from the broadcasting
    /// set.
    async fn set_broadcast(
        &self,
        id: &PeerId,
        enabled: bool,
    ) -> Result<(), PresenceError>;

    /// Trims `name` and upserts it as the peer's display name; an empty
    /// result deletes the entry instead.
    async fn set_username(
        &self,
        id: &PeerId,
        name: &str,
    ) -> Result<(), PresenceError>;

    /// Returns a consistent point-in-time snapshot of the triple with
    /// its sets in sorted order.
    async fn state(&self) -> Result<RoomSnapshot, PresenceError>;

    /// Returns the current size of the peers set.
    async fn peer_count(&self) -> Result<usize, PresenceError>;
}
