//! In-process presence storage.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use hermes_client_api_proto::{PeerId, RoomSnapshot};
use tokio::sync::Mutex;

use super::{PresenceError, PresenceRepository};

/// Presence triple of one room kept behind a process-local mutex.
///
/// Used when no Redis instance is configured, and by tests. A single
/// lock over the whole triple provides the same multi-key atomicity the
/// Redis implementation gets from `MULTI` pipelines.
#[derive(Debug, Default)]
pub struct InMemPresenceRepository(Mutex<Triple>);

/// The three presence sub-structures of a room.
#[derive(Debug, Default)]
struct Triple {
    peers: HashSet<PeerId>,
    broadcasting: HashSet<PeerId>,
    usernames: HashMap<PeerId, String>,
}

impl InMemPresenceRepository {
    /// Creates a new empty [`InMemPresenceRepository`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PresenceRepository for InMemPresenceRepository {
    async fn reset(&self) -> Result<(), PresenceError> {
        let mut triple = self.0.lock().await;
        triple.peers.clear();
        triple.broadcasting.clear();
        triple.usernames.clear();
        Ok(())
    }

    async fn add_peer(&self, id: &PeerId) -> Result<(), PresenceError> {
        let _ = self.0.lock().await.peers.insert(id.clone());
        Ok(())
    }

    async fn remove_peer(&self, id: &PeerId) -> Result<(), PresenceError> {
        let mut triple = self.0.lock().await;
        let _ = triple.peers.remove(id);
        let _ = triple.broadcasting.remove(id);
        let _ = triple.usernames.remove(id);
        Ok(())
    }

    async fn set_broadcast(
        &self,
        id: &PeerId,
        enabled: bool,
    ) -> Result<(), PresenceError> {
        let mut triple = self.0.lock().await;
        if enabled {
            let _ = triple.broadcasting.insert(id.clone());
        } else {
            let _ = triple.broadcasting.remove(id);
        }
        Ok(())
    }

    async fn set_username(
        &self,
        id: &PeerId,
        name: &str,
    ) -> Result<(), PresenceError> {
        let mut triple = self.0.lock().await;
        let name = name.trim();
        if name.is_empty() {
            let _ = triple.usernames.remove(id);
        } else {
            let _ = triple.usernames.insert(id.clone(), name.to_owned());
        }
        Ok(())
    }

    async fn state(&self) -> Result<RoomSnapshot, PresenceError> {
        let triple = self.0.lock().await;
        let mut peers: Vec<_> = triple.peers.iter().cloned().collect();
        let mut broadcasting: Vec<_> =
            triple.broadcasting.iter().cloned().collect();
        peers.sort_unstable();
        broadcasting.sort_unstable();
        Ok(RoomSnapshot {
            peers,
            broadcasting,
            usernames: triple.usernames.clone(),
        })
    }

    async fn peer_count(&self) -> Result<usize, PresenceError> {
        Ok(self.0.lock().await.peers.len())
    }
}
