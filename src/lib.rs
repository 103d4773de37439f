//! Hermes signaling server.
//!
//! A room-scoped message exchange for WebRTC peers: browsers join a
//! room over a WebSocket, discover each other, trade opaque SDP/ICE
//! payloads and observe a consistent presence view. Media never touches
//! this server.

#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod conf;
pub mod log;
pub mod prelude;
pub mod registry;
pub mod signalling;
pub mod store;

use std::sync::Arc;

use deadpool_redis::Runtime;
use derive_more::{Display, From};

use crate::{
    registry::{InMemRoomRegistry, RedisRoomRegistry, RoomRegistry},
    signalling::hub_manager::PresenceFactory,
    store::{InMemPresenceRepository, RedisPresenceRepository},
};

#[doc(inline)]
pub use crate::conf::Conf;

/// Error of assembling the process-wide storage backends.
#[derive(Debug, Display, From)]
pub enum StorageError {
    /// Redis pool could not be created from [`Conf::redis_addr`].
    #[display(fmt = "failed to create Redis pool: {}", _0)]
    CreatePool(deadpool_redis::CreatePoolError),
}

impl std::error::Error for StorageError {}

/// Builds the room registry and the per-room presence factory backing
/// this process: Redis-backed when [`Conf::redis_addr`] is set,
/// in-process otherwise.
///
/// # Errors
///
/// With [`StorageError::CreatePool`] if the Redis pool cannot be
/// assembled.
pub fn build_storage(
    conf: &Conf,
) -> Result<(Arc<dyn RoomRegistry>, PresenceFactory), StorageError> {
    if conf.redis_addr.is_empty() {
        let registry: Arc<dyn RoomRegistry> =
            Arc::new(InMemRoomRegistry::new());
        let factory: PresenceFactory =
            Arc::new(|_| Arc::new(InMemPresenceRepository::new()));
        return Ok((registry, factory));
    }

    let url = if conf.redis_addr.contains("://") {
        conf.redis_addr.clone()
    } else {
        format!("redis://{}", conf.redis_addr)
    };
    let pool = deadpool_redis::Config::from_url(url)
        .create_pool(Some(Runtime::Tokio1))?;
    let registry: Arc<dyn RoomRegistry> =
        Arc::new(RedisRoomRegistry::new(pool.clone()));
    let factory: PresenceFactory = Arc::new(move |room| {
        Arc::new(RedisPresenceRepository::new(pool.clone(), room))
    });
    Ok((registry, factory))
}
