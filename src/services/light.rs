//! Light service: placement, presets, edits and the session active overlay.
//!
//! DESIGN
//! ======
//! Persisted commands write the repository first. The overlay commands
//! (`set_light_active`, `clear_light_override`) never touch the repository;
//! they only exist inside a live session and fail with `E_MAP_NOT_OPEN`
//! when none is open. Every light change feeds the player fog mask, so
//! each mutation that reaches a session ends with a dirty mark and, for
//! removals, an immediate fog push.

use tracing::info;
use uuid::Uuid;

use super::{live_map_of, map_record, sync};
use crate::frame::{Data, ErrorCode};
use crate::model::{LightSource, LightSourceView, LightType, LightUpdate, NewLightSource, ValidationError, require_finite};
use crate::state::AppState;
use crate::store::StoreError;
use crate::visibility::EmitterId;

#[derive(Debug, thiserror::Error)]
pub enum LightError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("map {0} is not open")]
    NotOpen(Uuid),
}

impl ErrorCode for LightError {
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

async fn light_map_id(state: &AppState, light_id: Uuid) -> Result<Uuid, LightError> {
    if let Some(map_id) = live_map_of(state, |s| s.registry.light(light_id).is_some()).await {
        return Ok(map_id);
    }
    Ok(state.store.get_light(light_id).await?.map_id)
}

/// Apply a stored light to the live session and return its merged view.
async fn apply_to_session(state: &AppState, light: LightSource) -> LightSourceView {
    let mut sessions = state.sessions.write().await;
    let Some(session) = sessions.get_mut(&light.map_id) else {
        return LightSourceView::new(light, None);
    };
    let view = session.registry.light_view(&light);
    session.registry.upsert_light(light);
    session.mark_dirty(EmitterId::Light(view.light.id));
    view
}

// =============================================================================
// COMMANDS
// =============================================================================

/// # Errors
///
/// Validation errors for the payload or an off-map position; store errors
/// for a missing map or carrier token.
pub async fn create_light(state: &AppState, map_id: Uuid, data: &Data) -> Result<LightSourceView, LightError> {
    let new = NewLightSource::from_data(map_id, data)?;
    insert(state, new).await
}

/// `light:torch` / `light:lantern`: the preset fixes radii, color and name.
///
/// # Errors
///
/// As [`create_light`].
pub async fn create_preset(
    state: &AppState,
    map_id: Uuid,
    light_type: LightType,
    x: f64,
    y: f64,
) -> Result<LightSourceView, LightError> {
    let new = NewLightSource::from_preset(map_id, light_type, x, y);
    new.validate()?;
    insert(state, new).await
}

async fn insert(state: &AppState, new: NewLightSource) -> Result<LightSourceView, LightError> {
    let map_id = new.map_id;
    let _guard = state.lock_map(map_id).await;
    map_record(state, map_id).await?.check_in_bounds(new.x, new.y)?;

    let light = state.store.create_light(&new).await?;
    info!(%map_id, light_id = %light.id, light_type = light.light_type.as_str(), "light created");
    Ok(apply_to_session(state, light).await)
}

/// # Errors
///
/// Store errors only.
pub async fn list_lights(state: &AppState, map_id: Uuid) -> Result<Vec<LightSourceView>, LightError> {
    let lights = state.store.list_lights(map_id).await?;
    let sessions = state.sessions.read().await;
    let overlay = sessions.get(&map_id).map(|s| s.registry.overlay());
    Ok(lights
        .into_iter()
        .map(|l| {
            let session_override = overlay.and_then(|o| o.get(l.id));
            LightSourceView::new(l, session_override)
        })
        .collect())
}

/// # Errors
///
/// Validation errors for the merged light (bright above dim, off-map
/// position); `NotFound` if the light does not exist.
pub async fn update_light(state: &AppState, light_id: Uuid, data: &Data) -> Result<LightSourceView, LightError> {
    let update = LightUpdate::from_data(data)?;
    let map_id = light_map_id(state, light_id).await?;
    let _guard = state.lock_map(map_id).await;

    let current = state.store.get_light(light_id).await?;
    let next = update.apply(&current)?;
    if update.x.is_some() || update.y.is_some() {
        map_record(state, map_id).await?.check_in_bounds(next.x, next.y)?;
    }
    let light = state.store.update_light(&next).await?;
    let view = apply_to_session(state, light).await;

    let mut sessions = state.sessions.write().await;
    if let Some(session) = sessions.get_mut(&map_id) {
        sync::push_fog(state, session);
    }
    Ok(view)
}

/// # Errors
///
/// `OutOfRange` for non-finite or off-map coordinates; `NotFound` if the
/// light does not exist.
pub async fn move_light(state: &AppState, light_id: Uuid, x: f64, y: f64) -> Result<LightSourceView, LightError> {
    require_finite("x", x)?;
    require_finite("y", y)?;
    let map_id = light_map_id(state, light_id).await?;
    let _guard = state.lock_map(map_id).await;
    map_record(state, map_id).await?.check_in_bounds(x, y)?;

    let light = state.store.move_light(light_id, x, y).await?;
    let mut sessions = state.sessions.write().await;
    let Some(session) = sessions.get_mut(&map_id) else {
        return Ok(LightSourceView::new(light, None));
    };
    if !session.registry.move_light(light_id, x, y) {
        session.registry.upsert_light(light.clone());
    }
    session.mark_dirty(EmitterId::Light(light_id));
    Ok(session.registry.light_view(&light))
}

/// # Errors
///
/// `NotFound` if the light does not exist.
pub async fn delete_light(state: &AppState, light_id: Uuid) -> Result<LightSource, LightError> {
    let map_id = light_map_id(state, light_id).await?;
    let _guard = state.lock_map(map_id).await;
    let light = state.store.delete_light(light_id).await?;

    let mut sessions = state.sessions.write().await;
    if let Some(session) = sessions.get_mut(&map_id) {
        session.registry.remove_light(light_id);
        session.forget_emitter(EmitterId::Light(light_id));
        sync::push_fog(state, session);
    }
    info!(%map_id, %light_id, "light deleted");
    Ok(light)
}

/// Returns the number of lights removed.
///
/// # Errors
///
/// Store errors only.
pub async fn delete_all_lights(state: &AppState, map_id: Uuid) -> Result<u64, LightError> {
    let _guard = state.lock_map(map_id).await;
    let count = state.store.delete_all_lights(map_id).await?;

    let mut sessions = state.sessions.write().await;
    if let Some(session) = sessions.get_mut(&map_id) {
        for light_id in session.registry.clear_lights() {
            session.forget_emitter(EmitterId::Light(light_id));
        }
        sync::push_fog(state, session);
    }
    info!(%map_id, count, "all lights deleted");
    Ok(count)
}

// =============================================================================
// SESSION OVERLAY
// =============================================================================

/// Override the active flag for this session only.
///
/// # Errors
///
/// `NotOpen` without a live session; `NotFound` if the light is not on the
/// open map.
pub async fn set_light_active(
    state: &AppState,
    map_id: Uuid,
    light_id: Uuid,
    active: bool,
) -> Result<LightSourceView, LightError> {
    let _guard = state.lock_map(map_id).await;
    let mut sessions = state.sessions.write().await;
    let session = sessions.get_mut(&map_id).ok_or(LightError::NotOpen(map_id))?;
    if !session.registry.set_light_active(light_id, active) {
        return Err(StoreError::not_found("light", light_id).into());
    }
    session.mark_dirty(EmitterId::Light(light_id));
    if !active {
        session.visibility.remove(&EmitterId::Light(light_id));
    }
    sync::push_fog(state, session);

    let light = session.registry.light(light_id).ok_or(StoreError::not_found("light", light_id))?;
    Ok(session.registry.light_view(light))
}

/// Drop the session override so the persisted flag applies again.
///
/// # Errors
///
/// `NotOpen` without a live session; `NotFound` if the light is not on the
/// open map.
pub async fn clear_light_override(state: &AppState, map_id: Uuid, light_id: Uuid) -> Result<LightSourceView, LightError> {
    let _guard = state.lock_map(map_id).await;
    let mut sessions = state.sessions.write().await;
    let session = sessions.get_mut(&map_id).ok_or(LightError::NotOpen(map_id))?;
    let light = session.registry.light(light_id).cloned().ok_or(StoreError::not_found("light", light_id))?;

    if session.registry.clear_light_override(light_id).is_some() {
        session.mark_dirty(EmitterId::Light(light_id));
        if !light.active {
            session.visibility.remove(&EmitterId::Light(light_id));
        }
        sync::push_fog(state, session);
    }
    Ok(session.registry.light_view(&light))
}

#[cfg(test)]
#[path = "light_test.rs"]
mod tests;
