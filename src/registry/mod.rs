//! Room registry: short-code allocation, lookup and deletion.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use derive_more::{Display, From};
use hermes_client_api_proto::RoomCode;
use rand::RngCore as _;

#[doc(inline)]
pub use self::{memory::InMemRoomRegistry, redis::RedisRoomRegistry};

/// Number of random bytes backing a room code. URL-safe base64 renders
/// them as 8 characters.
const CODE_ENTROPY_BYTES: usize = 6;

/// How many fresh codes are tried before creation gives up.
pub(crate) const MAX_CODE_ATTEMPTS: usize = 5;

/// A named, short-lived signaling namespace.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Room {
    /// Short URL-safe code of this room.
    pub code: RoomCode,

    /// Instant this room was created at.
    pub created_at: DateTime<Utc>,
}

/// Error of a room registry operation.
#[derive(Debug, Display, From)]
pub enum RegistryError {
    /// No room exists under the requested code.
    #[display(fmt = "room not found")]
    NotFound,

    /// No unique code was produced within [`MAX_CODE_ATTEMPTS`].
    #[display(fmt = "no unique room code produced after {} attempts", _0)]
    #[from(ignore)]
    CapacityExhausted(usize),

    /// Backing Redis command failed.
    #[display(fmt = "Redis command failed: {}", _0)]
    Command(::redis::RedisError),

    /// Could not check out a connection from the Redis pool.
    #[display(fmt = "Redis pool failed: {}", _0)]
    Pool(deadpool_redis::PoolError),
}

impl std::error::Error for RegistryError {}

/// Storage of room records.
#[async_trait]
pub trait RoomRegistry: Send + Sync {
    /// Allocates a fresh unique room code and persists its record.
    ///
    /// # Errors
    ///
    /// With [`RegistryError::CapacityExhausted`] if every tried code
    /// collided with an existing room.
    async fn create(&self) -> Result<Room, RegistryError>;

    /// Looks up the room stored under `code`, ignoring surrounding
    /// whitespace.
    ///
    /// # Errors
    ///
    /// With [`RegistryError::NotFound`] if the code is empty or no such
    /// record exists.
    async fn get(&self, code: &RoomCode) -> Result<Room, RegistryError>;

    /// Deletes the room stored under `code`.
    ///
    /// # Errors
    ///
    /// With [`RegistryError::NotFound`] if no such record existed.
    async fn delete(&self, code: &RoomCode) -> Result<(), RegistryError>;
}

/// Samples a fresh random room code.
pub(crate) fn generate_code() -> RoomCode {
    let mut raw = [0_u8; CODE_ENTROPY_BYTES];
    rand::thread_rng().fill_bytes(&mut raw);
    base64::engine::general_purpose::URL_SAFE_NO_PAD
        .encode(raw)
        .into()
}

/// Strips surrounding whitespace off a requested code, rejecting blank
/// input.
pub(crate) fn normalize(code: &RoomCode) -> Result<&str, RegistryError> {
    let trimmed = code.0.trim();
    if trimmed.is_empty() {
        Err(RegistryError::NotFound)
    } else {
        Ok(trimmed)
    }
}
