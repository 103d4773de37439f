//! Redis-backed room registry.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_redis::{Connection, Pool};
use hermes_client_api_proto::RoomCode;
use redis::AsyncCommands as _;

use crate::prelude::*;

use super::{
    generate_code, normalize, Room, RoomRegistry, RegistryError,
    MAX_CODE_ATTEMPTS,
};

/// Hash field holding the room code.
const FIELD_CODE: &str = "code";

/// Hash field holding the RFC 3339 creation timestamp.
const FIELD_CREATED_AT: &str = "created_at";

/// Room records stored as Redis hashes under `room:{code}` keys.
///
/// Creation claims a code with `HSETNX`, so two processes sampling the
/// same code cannot both own it.
pub struct RedisRoomRegistry {
    /// Pool of connections to the backing Redis instance.
    pool: Pool,
}

impl RedisRoomRegistry {
    /// Creates a new [`RedisRoomRegistry`] on top of the given pool.
    #[must_use]
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Checks out a connection from the pool.
    async fn conn(&self) -> Result<Connection, RegistryError> {
        Ok(self.pool.get().await?)
    }

    /// Key of the record stored for `code`.
    fn key(code: &str) -> String {
        format!("room:{code}")
    }
}

#[async_trait]
impl RoomRegistry for RedisRoomRegistry {
    async fn create(&self) -> Result<Room, RegistryError> {
        let mut conn = self.conn().await?;
        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = generate_code();
            let key = Self::key(&code.0);
            let claimed: bool =
                conn.hset_nx(&key, FIELD_CODE, &code.0).await?;
            if !claimed {
                continue;
            }
            let created_at = Utc::now();
            conn.hset::<_, _, _, ()>(
                &key,
                FIELD_CREATED_AT,
                created_at.to_rfc3339(),
            )
            .await?;
            return Ok(Room { code, created_at });
        }
        Err(RegistryError::CapacityExhausted(MAX_CODE_ATTEMPTS))
    }

    async fn get(&self, code: &RoomCode) -> Result<Room, RegistryError> {
        let code = normalize(code)?;
        let mut conn = self.conn().await?;
        let record: HashMap<String, String> =
            conn.hgetall(Self::key(code)).await?;
        if record.is_empty() {
            return Err(RegistryError::NotFound);
        }
        let created_at = record
            .get(FIELD_CREATED_AT)
            .and_then(|raw| {
                DateTime::parse_from_rfc3339(raw)
                    .map(|at| at.with_timezone(&Utc))
                    .map_err(|e| {
                        warn!(
                            "Malformed created_at of room {}: {}; \
                             degrading to now",
                            code, e,
                        );
                        e
                    })
                    .ok()
            })
            .unwrap_or_else(Utc::now);
        Ok(Room {
            code: code.into(),
            created_at,
        })
    }

    async fn delete(&self, code: &RoomCode) -> Result<(), RegistryError> {
        let code = normalize(code)?;
        let mut conn = self.conn().await?;
        let removed: usize = conn.del(Self::key(code)).await?;
        if removed == 0 {
            Err(RegistryError::NotFound)
        } else {
            Ok(())
        }
    }
}
