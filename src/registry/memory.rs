//! In-process room registry.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use hermes_client_api_proto::RoomCode;
use tokio::sync::Mutex;

use super::{
    generate_code, normalize, Room, RoomRegistry, RegistryError,
    MAX_CODE_ATTEMPTS,
};

/// Code generator of an [`InMemRoomRegistry`], swappable by tests to
/// provoke collisions.
type CodeGenerator = Box<dyn Fn() -> RoomCode + Send + Sync>;

/// Room records kept behind a process-local mutex.
///
/// Used when no Redis instance is configured, and by tests.
pub struct InMemRoomRegistry {
    rooms: Mutex<HashMap<String, Room>>,
    codegen: CodeGenerator,
}

impl InMemRoomRegistry {
    /// Creates a new empty [`InMemRoomRegistry`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_codegen(Box::new(generate_code))
    }

    /// Creates a new empty [`InMemRoomRegistry`] allocating codes with
    /// the provided generator.
    #[must_use]
    pub fn with_codegen(codegen: CodeGenerator) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            codegen,
        }
    }
}

impl Default for InMemRoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RoomRegistry for InMemRoomRegistry {
    async fn create(&self) -> Result<Room, RegistryError> {
        let mut rooms = self.rooms.lock().await;
        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = (self.codegen)();
            if rooms.contains_key(&code.0) {
                continue;
            }
            let room = Room {
                code: code.clone(),
                created_at: Utc::now(),
            };
            drop(rooms.insert(code.0, room.clone()));
            return Ok(room);
        }
        Err(RegistryError::CapacityExhausted(MAX_CODE_ATTEMPTS))
    }

    async fn get(&self, code: &RoomCode) -> Result<Room, RegistryError> {
        let code = normalize(code)?;
        self.rooms
            .lock()
            .await
            .get(code)
            .cloned()
            .ok_or(RegistryError::NotFound)
    }

    async fn delete(&self, code: &RoomCode) -> Result<(), RegistryError> {
        let code = normalize(code)?;
        self.rooms
            .lock()
            .await
            .remove(code)
            .map(drop)
            .ok_or(RegistryError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn create_get_delete_roundtrip() {
        let registry = InMemRoomRegistry::new();

        let room = registry.create().await.unwrap();
        assert_eq!(room, registry.get(&room.code).await.unwrap());

        registry.delete(&room.code).await.unwrap();
        assert!(matches!(
            registry.get(&room.code).await,
            Err(RegistryError::NotFound)
        ));
        assert!(matches!(
            registry.delete(&room.code).await,
            Err(RegistryError::NotFound)
        ));
    }

    #[tokio::test]
    async fn get_trims_whitespace() {
        let registry = InMemRoomRegistry::new();
        let room = registry.create().await.unwrap();

        let padded = RoomCode(format!("  {}\n", room.code));
        assert_eq!(room, registry.get(&padded).await.unwrap());
    }

    #[tokio::test]
    async fn blank_code_is_not_found() {
        let registry = InMemRoomRegistry::new();
        assert!(matches!(
            registry.get(&"".into()).await,
            Err(RegistryError::NotFound)
        ));
    }

    #[tokio::test]
    async fn collisions_are_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let registry = InMemRoomRegistry::with_codegen(Box::new(move || {
            // First allocation takes "dup"; the second collides once and
            // then lands on a fresh code.
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n <= 1 {
                "dup".into()
            } else {
                "fresh".into()
            }
        }));

        assert_eq!(registry.create().await.unwrap().code.0, "dup");
        assert_eq!(registry.create().await.unwrap().code.0, "fresh");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_creation() {
        let registry =
            InMemRoomRegistry::with_codegen(Box::new(|| "same".into()));

        registry.create().await.unwrap();
        assert!(matches!(
            registry.create().await,
            Err(RegistryError::CapacityExhausted(_))
        ));
    }
}
