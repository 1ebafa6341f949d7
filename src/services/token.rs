//! Token service: placement, edits, drags, visibility toggles.
//!
//! DESIGN
//! ======
//! Full edits re-validate the merged record and check map bounds. Drags
//! take the narrow path: finite coordinates and a bounds check against the
//! in-memory map, a position-only repository write, a single-field registry
//! update, and a dirty mark. The vision worker picks the new position up on
//! its next tick, so many drags per frame cost one recompute.

use tracing::info;
use uuid::Uuid;

use super::{live_map_of, map_record, sync};
use crate::frame::{Data, ErrorCode};
use crate::model::{NewToken, Token, TokenSummary, TokenUpdate, ValidationError, require_finite};
use crate::state::AppState;
use crate::store::StoreError;
use crate::visibility::EmitterId;

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ErrorCode for TokenError {
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

/// Which map a token lives on: live registries first, then the repository.
async fn token_map_id(state: &AppState, token_id: Uuid) -> Result<Uuid, TokenError> {
    if let Some(map_id) = live_map_of(state, |s| s.registry.token(token_id).is_some()).await {
        return Ok(map_id);
    }
    Ok(state.store.get_token(token_id).await?.map_id)
}

/// Apply a stored token to the live session, if one is open.
async fn apply_to_session(state: &AppState, token: &Token) {
    let mut sessions = state.sessions.write().await;
    if let Some(session) = sessions.get_mut(&token.map_id) {
        let before = session.registry.token(token.id).map(|t| (t.token_type, t.visible_to_players));
        session.registry.upsert_token(token.clone());
        session.mark_token_dirty(token.id);
        sync::push_tokens(session);
        // Type and visibility decide whether this token and what it carries
        // feed the player mask.
        if before.is_some_and(|b| b != (token.token_type, token.visible_to_players)) {
            sync::push_fog(state, session);
        }
    }
}

// =============================================================================
// COMMANDS
// =============================================================================

/// # Errors
///
/// Validation errors for a malformed payload or an off-map position; store
/// errors for a missing map or catalog reference.
pub async fn create_token(state: &AppState, map_id: Uuid, data: &Data) -> Result<Token, TokenError> {
    let new = NewToken::from_data(map_id, data)?;
    let _guard = state.lock_map(map_id).await;
    map_record(state, map_id).await?.check_in_bounds(new.x, new.y)?;

    let token = state.store.create_token(&new).await?;
    apply_to_session(state, &token).await;
    info!(%map_id, token_id = %token.id, token_type = token.token_type.as_str(), "token created");
    Ok(token)
}

/// # Errors
///
/// `NotFound` if the token does not exist.
pub async fn get_token(state: &AppState, token_id: Uuid) -> Result<Token, TokenError> {
    Ok(state.store.get_token(token_id).await?)
}

/// # Errors
///
/// Store errors only; an unknown map lists as empty.
pub async fn list_tokens(state: &AppState, map_id: Uuid) -> Result<Vec<TokenSummary>, TokenError> {
    Ok(state.store.list_tokens(map_id).await?)
}

/// # Errors
///
/// Validation errors for the merged record; store errors for a missing row
/// or a dangling reference.
pub async fn update_token(state: &AppState, token_id: Uuid, data: &Data) -> Result<Token, TokenError> {
    let update = TokenUpdate::from_data(data)?;
    let map_id = token_map_id(state, token_id).await?;
    let _guard = state.lock_map(map_id).await;

    let current = state.store.get_token(token_id).await?;
    let next = update.apply(&current)?;
    if update.x.is_some() || update.y.is_some() {
        map_record(state, map_id).await?.check_in_bounds(next.x, next.y)?;
    }
    let token = state.store.update_token(&next).await?;
    apply_to_session(state, &token).await;
    Ok(token)
}

/// Drag fast path.
///
/// # Errors
///
/// `OutOfRange` for non-finite or off-map coordinates; `NotFound` if the
/// token does not exist.
pub async fn update_token_position(state: &AppState, token_id: Uuid, x: f64, y: f64) -> Result<Token, TokenError> {
    require_finite("x", x)?;
    require_finite("y", y)?;
    let map_id = token_map_id(state, token_id).await?;
    let _guard = state.lock_map(map_id).await;
    map_record(state, map_id).await?.check_in_bounds(x, y)?;

    let token = state.store.update_token_position(token_id, x, y).await?;
    let mut sessions = state.sessions.write().await;
    if let Some(session) = sessions.get_mut(&map_id) {
        if !session.registry.move_token(token_id, x, y) {
            session.registry.upsert_token(token.clone());
        }
        session.mark_token_dirty(token_id);
        if token.visible_to_players {
            sync::push_tokens(session);
        }
    }
    Ok(token)
}

/// # Errors
///
/// `NotFound` if the token does not exist.
pub async fn toggle_token_visibility(state: &AppState, token_id: Uuid) -> Result<Token, TokenError> {
    let map_id = token_map_id(state, token_id).await?;
    let _guard = state.lock_map(map_id).await;
    let token = state.store.toggle_token_visibility(token_id).await?;
    apply_to_session(state, &token).await;
    info!(%map_id, %token_id, visible = token.visible_to_players, "token visibility toggled");
    Ok(token)
}

/// # Errors
///
/// `NotFound` if the token does not exist.
pub async fn delete_token(state: &AppState, token_id: Uuid) -> Result<Token, TokenError> {
    let map_id = token_map_id(state, token_id).await?;
    let _guard = state.lock_map(map_id).await;
    let token = state.store.delete_token(token_id).await?;

    let mut sessions = state.sessions.write().await;
    if let Some(session) = sessions.get_mut(&map_id) {
        let carried = session.registry.carried_lights(token_id);
        session.registry.remove_token(token_id);
        session.forget_emitter(EmitterId::Token(token_id));
        for light_id in carried {
            session.mark_dirty(EmitterId::Light(light_id));
        }
        sync::push_tokens(session);
        sync::push_fog(state, session);
    }
    info!(%map_id, %token_id, "token deleted");
    Ok(token)
}

#[cfg(test)]
#[path = "token_test.rs"]
mod tests;
