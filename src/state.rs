//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. It
//! holds the repository, the live map sessions, and one command lock per
//! map. A `MapSession` is the single owner of a map's canonical live state:
//! the registry, fog state, computed visibility, the pending recompute set,
//! the viewport, the connected GM and player channels, and what those
//! players were last sent. Subscribers only
//! ever receive cloned snapshots through those channels.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock, mpsc};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::frame::Frame;
use crate::model::{FogState, LightSource, MapRecord, Token};
use crate::registry::MapRegistry;
use crate::services::sync::{PlayerMessage, PlayerSync};
use crate::store::EntityStore;
use crate::visibility::{EmitterId, Visibility};

// =============================================================================
// VIEWPORT
// =============================================================================

/// Pan/zoom shared with the player display.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub x: f64,
    pub y: f64,
    pub zoom: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self { x: 0.0, y: 0.0, zoom: 1.0 }
    }
}

// =============================================================================
// MAP SESSION
// =============================================================================

/// Live state of one open map. Exists while any GM or player is attached.
pub struct MapSession {
    pub map: MapRecord,
    pub registry: MapRegistry,
    pub fog: FogState,
    /// Latest applied polygon per emitter.
    pub visibility: HashMap<EmitterId, Visibility>,
    /// Bumped on every change to an emitter; results computed against an
    /// older generation are dropped.
    pub generations: HashMap<EmitterId, u64>,
    /// Emitters awaiting recompute.
    pub pending: HashSet<EmitterId>,
    pub viewport: Viewport,
    /// GM connections: `client_id` -> frame sender.
    pub gm_clients: HashMap<Uuid, mpsc::Sender<Frame>>,
    /// Player surfaces: `client_id` -> message sender.
    pub players: HashMap<Uuid, mpsc::Sender<PlayerMessage>>,
    /// Player surfaces between snapshot and registration.
    pub attaching: usize,
    pub sync: PlayerSync,
}

impl MapSession {
    /// Build from repository rows. Every emitter starts pending.
    #[must_use]
    pub fn new(map: MapRecord, tokens: Vec<Token>, lights: Vec<LightSource>, fog: FogState) -> Self {
        let mut session = Self {
            map,
            registry: MapRegistry::hydrate(tokens, lights),
            fog,
            visibility: HashMap::new(),
            generations: HashMap::new(),
            pending: HashSet::new(),
            viewport: Viewport::default(),
            gm_clients: HashMap::new(),
            players: HashMap::new(),
            attaching: 0,
            sync: PlayerSync::default(),
        };
        session.mark_all_dirty();
        session
    }

    #[must_use]
    pub fn generation(&self, id: EmitterId) -> u64 {
        self.generations.get(&id).copied().unwrap_or(0)
    }

    /// Queue an emitter for recompute and invalidate in-flight results.
    pub fn mark_dirty(&mut self, id: EmitterId) {
        *self.generations.entry(id).or_insert(0) += 1;
        self.pending.insert(id);
    }

    pub fn mark_all_dirty(&mut self) {
        for id in self.registry.emitter_ids() {
            self.mark_dirty(id);
        }
    }

    /// Mark a token and every light it carries.
    pub fn mark_token_dirty(&mut self, token_id: Uuid) {
        self.mark_dirty(EmitterId::Token(token_id));
        for light_id in self.registry.carried_lights(token_id) {
            self.mark_dirty(EmitterId::Light(light_id));
        }
    }

    /// Drop an emitter that no longer exists.
    pub fn forget_emitter(&mut self, id: EmitterId) {
        *self.generations.entry(id).or_insert(0) += 1;
        self.pending.remove(&id);
        self.visibility.remove(&id);
    }

    #[must_use]
    pub fn has_clients(&self) -> bool {
        !self.gm_clients.is_empty() || !self.players.is_empty() || self.attaching > 0
    }
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state, injected into Axum handlers via State extractor.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn EntityStore>,
    pub sessions: Arc<RwLock<HashMap<Uuid, MapSession>>>,
    /// Serializes mutation commands per map.
    command_locks: Arc<StdMutex<HashMap<Uuid, Arc<Mutex<()>>>>>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    #[must_use]
    pub fn new(store: Arc<dyn EntityStore>, config: AppConfig) -> Self {
        Self {
            store,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            command_locks: Arc::new(StdMutex::new(HashMap::new())),
            config: Arc::new(config),
        }
    }

    /// Acquire the command lock for `map_id`. Held across the repository
    /// write and the registry update of one command.
    pub async fn lock_map(&self, map_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.command_locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(map_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Forget the command lock of a deleted map.
    pub fn release_map_lock(&self, map_id: Uuid) {
        self.command_locks.lock().unwrap_or_else(PoisonError::into_inner).remove(&map_id);
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
pub mod test_helpers {
    use super::*;
    use crate::model::NewMap;
    use crate::store::MemoryStore;

    /// `AppState` over a fresh in-memory store.
    #[must_use]
    pub fn test_app_state() -> AppState {
        test_app_state_with_store(Arc::new(MemoryStore::new()))
    }

    #[must_use]
    pub fn test_app_state_with_store(store: Arc<MemoryStore>) -> AppState {
        let config = AppConfig { vision_circle_segments: 32, ..AppConfig::default() };
        AppState::new(store, config)
    }

    /// Create a 1400x700 map (70px / 5ft squares) in the store.
    pub async fn seed_map(state: &AppState) -> MapRecord {
        state.store.create_map(&NewMap::new("Test Map", 1400, 700)).await.expect("seed map")
    }
}

#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
