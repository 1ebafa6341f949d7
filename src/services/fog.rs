//! Fog-of-war service.
//!
//! DESIGN
//! ======
//! Per map the fog is a two-state machine, disabled and enabled. Enable,
//! disable and toggle only flip the flag; the revealed-area set is left
//! alone. Reveals accrete one row each and are never merged, clipped or
//! deduplicated; the player mask computes their union at render time.
//!
//! Revealing while fog is disabled is allowed. The area is recorded and
//! simply has no visible effect until fog is enabled again.

use tracing::info;
use uuid::Uuid;

use super::{live_map_of, map_record, sync};
use crate::frame::ErrorCode;
use crate::geometry::{Circle, Rect};
use crate::model::{FogState, NewRevealedArea, RevealedArea, ValidationError};
use crate::state::AppState;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum FogError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ErrorCode for FogError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Invalid(e) => e.error_code(),
            Self::Store(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Store(e) if e.retryable())
    }
}

/// # Errors
///
/// `NotFound` if the map does not exist.
pub async fn get_fog_state(state: &AppState, map_id: Uuid) -> Result<FogState, FogError> {
    Ok(state.store.get_fog_state(map_id).await?)
}

// =============================================================================
// ENABLED FLAG
// =============================================================================

async fn apply_enabled(state: &AppState, map_id: Uuid, enabled: bool) {
    let mut sessions = state.sessions.write().await;
    if let Some(session) = sessions.get_mut(&map_id) {
        session.fog.fog_enabled = enabled;
        session.map.fog_enabled = enabled;
        sync::push_fog(state, session);
    }
    info!(%map_id, enabled, "fog flag changed");
}

/// Flip the flag. Returns the new value.
///
/// # Errors
///
/// `NotFound` if the map does not exist.
pub async fn toggle_fog(state: &AppState, map_id: Uuid) -> Result<bool, FogError> {
    let _guard = state.lock_map(map_id).await;
    let enabled = state.store.toggle_fog_enabled(map_id).await?;
    apply_enabled(state, map_id, enabled).await;
    Ok(enabled)
}

/// # Errors
///
/// `NotFound` if the map does not exist.
pub async fn enable_fog(state: &AppState, map_id: Uuid) -> Result<bool, FogError> {
    set_enabled(state, map_id, true).await
}

/// # Errors
///
/// `NotFound` if the map does not exist.
pub async fn disable_fog(state: &AppState, map_id: Uuid) -> Result<bool, FogError> {
    set_enabled(state, map_id, false).await
}

async fn set_enabled(state: &AppState, map_id: Uuid, enabled: bool) -> Result<bool, FogError> {
    let _guard = state.lock_map(map_id).await;
    let enabled = state.store.set_fog_enabled(map_id, enabled).await?;
    apply_enabled(state, map_id, enabled).await;
    Ok(enabled)
}

// =============================================================================
// REVEALS
// =============================================================================

async fn insert(state: &AppState, area: NewRevealedArea) -> Result<RevealedArea, FogError> {
    area.validate()?;
    let map_id = area.map_id;
    let _guard = state.lock_map(map_id).await;
    let area = state.store.insert_revealed_area(&area).await?;

    let mut sessions = state.sessions.write().await;
    if let Some(session) = sessions.get_mut(&map_id) {
        session.fog.revealed_areas.push(area.clone());
        sync::push_fog(state, session);
    }
    Ok(area)
}

/// # Errors
///
/// `OutOfRange` for non-finite values or a negative extent; `ForeignKey`
/// if the map does not exist.
pub async fn reveal_rect(state: &AppState, map_id: Uuid, rect: Rect) -> Result<RevealedArea, FogError> {
    insert(state, NewRevealedArea::rect(map_id, rect)).await
}

/// Stored as its bounding box tagged `circle`; rendered as a true circle.
///
/// # Errors
///
/// `OutOfRange` for non-finite values or a negative radius; `ForeignKey`
/// if the map does not exist.
pub async fn reveal_circle(state: &AppState, map_id: Uuid, circle: Circle) -> Result<RevealedArea, FogError> {
    insert(state, NewRevealedArea::circle(map_id, circle)).await
}

/// Add one area covering the whole map.
///
/// # Errors
///
/// `NotFound` if the map does not exist.
pub async fn reveal_all(state: &AppState, map_id: Uuid) -> Result<RevealedArea, FogError> {
    let bounds = map_record(state, map_id).await?.bounds();
    insert(state, NewRevealedArea::rect(map_id, bounds)).await
}

/// # Errors
///
/// `NotFound` if the area does not exist.
pub async fn delete_revealed_area(state: &AppState, area_id: Uuid) -> Result<RevealedArea, FogError> {
    let map_id = match live_map_of(state, |s| s.fog.revealed_areas.iter().any(|a| a.id == area_id)).await {
        Some(map_id) => map_id,
        None => state.store.get_revealed_area(area_id).await?.map_id,
    };
    let _guard = state.lock_map(map_id).await;
    let area = state.store.delete_revealed_area(area_id).await?;

    let mut sessions = state.sessions.write().await;
    if let Some(session) = sessions.get_mut(&map_id) {
        session.fog.revealed_areas.retain(|a| a.id != area_id);
        sync::push_fog(state, session);
    }
    Ok(area)
}

/// Remove every revealed area; the enabled flag is untouched. Returns the
/// number of areas removed.
///
/// # Errors
///
/// Store errors only.
pub async fn reset_fog(state: &AppState, map_id: Uuid) -> Result<u64, FogError> {
    let _guard = state.lock_map(map_id).await;
    let count = state.store.delete_all_revealed_areas(map_id).await?;

    let mut sessions = state.sessions.write().await;
    if let Some(session) = sessions.get_mut(&map_id) {
        session.fog.revealed_areas.clear();
        sync::push_fog(state, session);
    }
    info!(%map_id, count, "fog reset");
    Ok(count)
}

#[cfg(test)]
#[path = "fog_test.rs"]
mod tests;
