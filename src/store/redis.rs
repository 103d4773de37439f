//! Redis-backed presence storage.

use std::collections::HashMap;

use async_trait::async_trait;
use deadpool_redis::{Connection, Pool};
use hermes_client_api_proto::{PeerId, RoomCode, RoomSnapshot};
use redis::AsyncCommands as _;

use super::{PresenceError, PresenceRepository};

/// Presence triple of one room laid out as three Redis keys under the
/// `room:{code}` prefix: a set of peer ids, a set of broadcasting ids
/// and a hash of id → username.
///
/// Multi-key mutations go through `MULTI`/`EXEC` pipelines, so the
/// triple stays consistent even when several server processes share the
/// same Redis instance.
pub struct RedisPresenceRepository {
    /// Pool of connections to the backing Redis instance.
    pool: Pool,

    /// Key of the peers set.
    peers_key: String,

    /// Key of the broadcasting set.
    broadcasting_key: String,

    /// Key of the usernames hash.
    usernames_key: String,
}

impl RedisPresenceRepository {
    /// Creates a new [`RedisPresenceRepository`] scoped to the given
    /// `room`.
    #[must_use]
    pub fn new(pool: Pool, room: &RoomCode) -> Self {
        Self {
            pool,
            peers_key: format!("room:{room}:peers"),
            broadcasting_key: format!("room:{room}:broadcasting"),
            usernames_key: format!("room:{room}:usernames"),
        }
    }

    /// Checks out a connection from the pool.
    async fn conn(&self) -> Result<Connection, PresenceError> {
        Ok(self.pool.get().await?)
    }
}

#[async_trait]
impl PresenceRepository for RedisPresenceRepository {
    async fn reset(&self) -> Result<(), PresenceError> {
        let mut conn = self.conn().await?;
        redis::pipe()
            .atomic()
            .del(&self.peers_key)
            .ignore()
            .del(&self.broadcasting_key)
            .ignore()
            .del(&self.usernames_key)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn add_peer(&self, id: &PeerId) -> Result<(), PresenceError> {
        let mut conn = self.conn().await?;
        conn.sadd::<_, _, ()>(&self.peers_key, &id.0).await?;
        Ok(())
    }

    async fn remove_peer(&self, id: &PeerId) -> Result<(), PresenceError> {
        let mut conn = self.conn().await?;
        redis::pipe()
            .atomic()
            .srem(&self.peers_key, &id.0)
            .ignore()
            .srem(&self.broadcasting_key, &id.0)
            .ignore()
            .hdel(&self.usernames_key, &id.0)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn set_broadcast(
        &self,
        id: &PeerId,
        enabled: bool,
    ) -> Result<(), PresenceError> {
        let mut conn = self.conn().await?;
        if enabled {
            conn.sadd::<_, _, ()>(&self.broadcasting_key, &id.0).await?;
        } else {
            conn.srem::<_, _, ()>(&self.broadcasting_key, &id.0).await?;
        }
        Ok(())
    }

    async fn set_username(
        &self,
        id: &PeerId,
        name: &str,
    ) -> Result<(), PresenceError> {
        let mut conn = self.conn().await?;
        let name = name.trim();
        if name.is_empty() {
            conn.hdel::<_, _, ()>(&self.usernames_key, &id.0).await?;
        } else {
            conn.hset::<_, _, _, ()>(&self.usernames_key, &id.0, name)
                .await?;
        }
        Ok(())
    }

    async fn state(&self) -> Result<RoomSnapshot, PresenceError> {
        let mut conn = self.conn().await?;
        let (mut peers, mut broadcasting, usernames): (
            Vec<String>,
            Vec<String>,
            HashMap<String, String>,
        ) = redis::pipe()
            .atomic()
            .smembers(&self.peers_key)
            .smembers(&self.broadcasting_key)
            .hgetall(&self.usernames_key)
            .query_async(&mut conn)
            .await?;
        peers.sort_unstable();
        broadcasting.sort_unstable();
        Ok(RoomSnapshot {
            peers: peers.into_iter().map(PeerId).collect(),
            broadcasting: broadcasting.into_iter().map(PeerId).collect(),
            usernames: usernames
                .into_iter()
                .map(|(id, name)| (PeerId(id), name))
                .collect(),
        })
    }

    async fn peer_count(&self) -> Result<usize, PresenceError> {
        let mut conn = self.conn().await?;
        Ok(conn.scard(&self.peers_key).await?)
    }
}
