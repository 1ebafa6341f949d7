//! Map service: records, occluders, live sessions and the shared viewport.
//!
//! DESIGN
//! ======
//! A live `MapSession` exists while at least one GM connection or player
//! surface is attached. The first attach hydrates it wholesale from the
//! repository (fetched outside the sessions lock, inserted only if nobody
//! beat us to it); the last detach evicts it. Nothing is flushed on
//! eviction because every command has already written through.

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use super::{map_record, sync};
use crate::frame::{Data, ErrorCode, Frame};
use crate::geometry::Segment;
use crate::model::map::UvttFile;
use crate::model::{AmbientLight, FogState, LightSourceView, MapRecord, NewMap, Token, ValidationError, require_finite};
use crate::state::{AppState, MapSession, Viewport};
use crate::store::StoreError;
use crate::visibility::Visibility;

#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("map {0} is not open")]
    NotOpen(Uuid),
}

impl ErrorCode for MapError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Invalid(e) => e.error_code(),
            Self::Store(e) => e.error_code(),
            Self::NotOpen(_) => "E_MAP_NOT_OPEN",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Store(e) if e.retryable())
    }
}

/// Everything a GM surface needs after `map:open`.
#[derive(Debug, Clone, Serialize)]
pub struct MapSnapshot {
    pub map: MapRecord,
    pub tokens: Vec<Token>,
    pub lights: Vec<LightSourceView>,
    pub fog: FogState,
    pub viewport: Viewport,
    pub visibility: Vec<Visibility>,
}

impl MapSnapshot {
    fn of(session: &MapSession) -> Self {
        Self {
            map: session.map.clone(),
            tokens: session.registry.tokens().cloned().collect(),
            lights: session.registry.light_views(),
            fog: session.fog.clone(),
            viewport: session.viewport,
            visibility: session.visibility.values().cloned().collect(),
        }
    }
}

// =============================================================================
// RECORDS
// =============================================================================

/// # Errors
///
/// Validation errors for the payload.
pub async fn create_map(state: &AppState, data: &Data) -> Result<MapRecord, MapError> {
    let new = NewMap::from_data(data)?;
    let map = state.store.create_map(&new).await?;
    info!(map_id = %map.id, width = map.width_px, height = map.height_px, "map created");
    Ok(map)
}

/// # Errors
///
/// `NotFound` if the map does not exist.
pub async fn get_map(state: &AppState, map_id: Uuid) -> Result<MapRecord, MapError> {
    Ok(map_record(state, map_id).await?)
}

/// Delete a map and everything on it. A live session is evicted: GM
/// connections get a `map:closed` notice and player surfaces see their
/// channel close.
///
/// # Errors
///
/// `NotFound` if the map does not exist.
pub async fn delete_map(state: &AppState, map_id: Uuid) -> Result<(), MapError> {
    {
        let _guard = state.lock_map(map_id).await;
        state.store.delete_map(map_id).await?;
        if let Some(session) = state.sessions.write().await.remove(&map_id) {
            let notice = Frame::request("map:closed", Data::new()).with_map_id(map_id);
            sync::broadcast_gm_session(&session, &notice, None);
        }
    }
    state.release_map_lock(map_id);
    info!(%map_id, "map deleted");
    Ok(())
}

// =============================================================================
// SESSIONS
// =============================================================================

async fn load_session(state: &AppState, map_id: Uuid) -> Result<MapSession, MapError> {
    let map = state.store.get_map(map_id).await?;
    let tokens = state.store.list_tokens(map_id).await?.into_iter().map(|s| s.token).collect();
    let lights = state.store.list_lights(map_id).await?;
    let fog = state.store.get_fog_state(map_id).await?;
    Ok(MapSession::new(map, tokens, lights, fog))
}

/// Hydrate outside the sessions lock; keep an existing session if one
/// appeared meanwhile.
async fn ensure_session(state: &AppState, map_id: Uuid) -> Result<(), MapError> {
    if state.sessions.read().await.contains_key(&map_id) {
        return Ok(());
    }
    let hydrated = load_session(state, map_id).await?;
    let mut sessions = state.sessions.write().await;
    if !sessions.contains_key(&map_id) {
        info!(
            %map_id,
            tokens = hydrated.registry.token_count(),
            areas = hydrated.fog.revealed_areas.len(),
            "hydrated map session"
        );
        sessions.insert(map_id, hydrated);
    }
    Ok(())
}

/// Attach a GM connection and return the full snapshot.
///
/// # Errors
///
/// `NotFound` if the map does not exist.
pub async fn open_map(
    state: &AppState,
    map_id: Uuid,
    client_id: Uuid,
    tx: mpsc::Sender<Frame>,
) -> Result<MapSnapshot, MapError> {
    ensure_session(state, map_id).await?;
    let mut sessions = state.sessions.write().await;
    let session = sessions.get_mut(&map_id).ok_or(MapError::NotOpen(map_id))?;
    session.gm_clients.insert(client_id, tx);
    info!(%map_id, %client_id, gm_clients = session.gm_clients.len(), "gm opened map");
    Ok(MapSnapshot::of(session))
}

/// Attach a player surface and push it a full resync.
///
/// # Errors
///
/// `NotFound` if the map does not exist.
pub async fn attach_player(
    state: &AppState,
    map_id: Uuid,
    client_id: Uuid,
    tx: mpsc::Sender<sync::PlayerMessage>,
) -> Result<(), MapError> {
    ensure_session(state, map_id).await?;

    // The mask is rendered off the lock; `attaching` holds the session open
    // meanwhile.
    let (snapshot, revision) = {
        let mut sessions = state.sessions.write().await;
        let session = sessions.get_mut(&map_id).ok_or(MapError::NotOpen(map_id))?;
        session.attaching += 1;
        if !session.sync.fog_rendering {
            session.sync.fog_dirty = false;
        }
        (sync::fog_snapshot(session, state.config.fog_mask_cell_px), session.sync.fog_revision)
    };
    let fog = sync::render_fog(snapshot).await;

    let mut sessions = state.sessions.write().await;
    let session = sessions.get_mut(&map_id).ok_or(MapError::NotOpen(map_id))?;
    session.attaching = session.attaching.saturating_sub(1);
    for message in sync::full_resync(session, fog.clone()) {
        if tx.try_send(message).is_err() {
            tracing::warn!(%map_id, %client_id, "player resync dropped");
            break;
        }
    }
    session.players.insert(client_id, tx);
    session.sync.tokens_sent = Some(sync::player_tokens(&session.registry));

    let stale = session.sync.fog_revision != revision || session.sync.fog_rendering || session.sync.fog_dirty;
    match fog {
        Some(fog) if !stale => session.sync.fog_sent = Some(fog),
        _ => {
            session.sync.fog_sent = None;
            sync::push_fog(state, session);
        }
    }
    info!(%map_id, %client_id, players = session.players.len(), "player surface attached");
    Ok(())
}

fn evict_if_idle(sessions: &mut std::collections::HashMap<Uuid, MapSession>, map_id: Uuid) {
    if sessions.get(&map_id).is_some_and(|s| !s.has_clients()) {
        sessions.remove(&map_id);
        info!(%map_id, "evicted idle map session");
    }
}

pub async fn part_gm(state: &AppState, map_id: Uuid, client_id: Uuid) {
    let mut sessions = state.sessions.write().await;
    let Some(session) = sessions.get_mut(&map_id) else {
        return;
    };
    session.gm_clients.remove(&client_id);
    info!(%map_id, %client_id, remaining = session.gm_clients.len(), "gm left map");
    evict_if_idle(&mut sessions, map_id);
}

pub async fn part_player(state: &AppState, map_id: Uuid, client_id: Uuid) {
    let mut sessions = state.sessions.write().await;
    let Some(session) = sessions.get_mut(&map_id) else {
        return;
    };
    session.players.remove(&client_id);
    info!(%map_id, %client_id, remaining = session.players.len(), "player surface detached");
    evict_if_idle(&mut sessions, map_id);
}

// =============================================================================
// GEOMETRY AND PRESENTATION
// =============================================================================

/// Replace the occluder set. Every emitter is recomputed.
///
/// # Errors
///
/// `OutOfRange` for a non-finite segment; `NotFound` if the map does not
/// exist.
pub async fn set_occluders(state: &AppState, map_id: Uuid, occluders: &[Segment]) -> Result<MapRecord, MapError> {
    if occluders.iter().any(|s| !s.is_finite()) {
        return Err(crate::model::out_of_range("occluders", "coordinates must be finite").into());
    }
    let _guard = state.lock_map(map_id).await;
    let map = state.store.set_occluders(map_id, occluders).await?;

    let mut sessions = state.sessions.write().await;
    if let Some(session) = sessions.get_mut(&map_id) {
        session.map = map.clone();
        session.mark_all_dirty();
    }
    info!(%map_id, segments = occluders.len(), "occluders replaced");
    Ok(map)
}

/// Replace the occluders with the walls of a Universal VTT export.
///
/// # Errors
///
/// `WrongType` for a malformed file; `NotFound` if the map does not exist.
pub async fn import_uvtt(state: &AppState, map_id: Uuid, uvtt: &serde_json::Value) -> Result<MapRecord, MapError> {
    let file = UvttFile::from_value(uvtt)?;
    set_occluders(state, map_id, &file.occluders()).await
}

/// # Errors
///
/// `NotFound` if the map does not exist.
pub async fn set_ambient_light(state: &AppState, map_id: Uuid, ambient: AmbientLight) -> Result<MapRecord, MapError> {
    let _guard = state.lock_map(map_id).await;
    let map = state.store.set_ambient_light(map_id, ambient).await?;

    let mut sessions = state.sessions.write().await;
    if let Some(session) = sessions.get_mut(&map_id) {
        session.map = map.clone();
        sync::push_map(session);
    }
    Ok(map)
}

/// Store the session viewport and mirror it to player surfaces.
///
/// # Errors
///
/// `OutOfRange` for non-finite values or a non-positive zoom; `NotOpen`
/// without a live session.
pub async fn set_viewport(state: &AppState, map_id: Uuid, viewport: Viewport) -> Result<Viewport, MapError> {
    require_finite("x", viewport.x)?;
    require_finite("y", viewport.y)?;
    require_finite("zoom", viewport.zoom)?;
    if viewport.zoom <= 0.0 {
        return Err(crate::model::out_of_range("zoom", "must be positive").into());
    }
    let mut sessions = state.sessions.write().await;
    let session = sessions.get_mut(&map_id).ok_or(MapError::NotOpen(map_id))?;
    session.viewport = viewport;
    sync::push_viewport(session);
    Ok(viewport)
}

#[cfg(test)]
#[path = "map_test.rs"]
mod tests;
