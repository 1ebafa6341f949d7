//! Sync broadcaster: filtered pushes to player surfaces, frame fan-out to GMs.
//!
//! DESIGN
//! ======
//! Four message categories reach a player surface: map metadata, the token
//! set, the fog mask, and the viewport. Each is built from the session's
//! canonical state through a filter that strips everything a player must not
//! learn: hidden tokens vanish entirely, notes and vision numbers never leave,
//! and fog goes out as an opaque cell mask.
//!
//! A player only ever hears about a change it can observe. Token and fog
//! payloads identical to the last one sent are dropped, so edits to hidden
//! entities produce no traffic at all.
//!
//! The fog mask is rasterized off the sessions lock. `push_fog` marks the
//! mask dirty and, if no render is running for the map, starts one task that
//! snapshots the inputs, renders on the blocking pool, delivers, and loops
//! while more changes arrived in the meantime. One render per map at a time
//! keeps deliveries in order and coalesces bursts.
//!
//! ERROR HANDLING
//! ==============
//! Delivery is best effort. A full or closed player channel drops the
//! message with a warning; nothing is queued, retried, or reported back to
//! the GM. Each channel is a FIFO, so per-surface emission order holds.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::frame::Frame;
use crate::geometry::Polygon;
use crate::mask::{FogMask, PlayerFog};
use crate::model::{AmbientLight, MapRecord, RevealedArea, TokenSize, TokenType};
use crate::registry::MapRegistry;
use crate::state::{AppState, MapSession, Viewport};
use crate::visibility::EmitterId;

// =============================================================================
// MESSAGES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PlayerMessage {
    MapUpdate { map: PlayerMap },
    TokensUpdate { tokens: Vec<PlayerToken> },
    FogUpdate { fog: PlayerFog },
    ViewportUpdate { viewport: Viewport },
}

impl PlayerMessage {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MapUpdate { .. } => "map-update",
            Self::TokensUpdate { .. } => "tokens-update",
            Self::FogUpdate { .. } => "fog-update",
            Self::ViewportUpdate { .. } => "viewport-update",
        }
    }
}

/// Map metadata safe for players. No occluders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerMap {
    pub id: Uuid,
    pub name: String,
    pub width_px: i32,
    pub height_px: i32,
    pub grid_size_px: i32,
    pub ambient_light: AmbientLight,
}

/// A token as the player display draws it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerToken {
    pub id: Uuid,
    pub name: String,
    pub token_type: TokenType,
    pub size: TokenSize,
    pub x: f64,
    pub y: f64,
    pub color: Option<String>,
}

// =============================================================================
// FILTERS
// =============================================================================

#[must_use]
pub fn player_map(map: &MapRecord) -> PlayerMap {
    PlayerMap {
        id: map.id,
        name: map.name.clone(),
        width_px: map.width_px,
        height_px: map.height_px,
        grid_size_px: map.grid_size_px,
        ambient_light: map.ambient_light,
    }
}

/// Visible tokens only.
#[must_use]
pub fn player_tokens(registry: &MapRegistry) -> Vec<PlayerToken> {
    registry
        .tokens()
        .filter(|t| t.visible_to_players)
        .map(|t| PlayerToken {
            id: t.id,
            name: t.name.clone(),
            token_type: t.token_type,
            size: t.size,
            x: t.x,
            y: t.y,
            color: t.color.clone(),
        })
        .collect()
}

/// Whether an emitter's polygon contributes to the player mask: visible PCs,
/// and lit lights not carried by a hidden token.
#[must_use]
pub fn feeds_player_fog(session: &MapSession, id: EmitterId) -> bool {
    let registry = &session.registry;
    match id {
        EmitterId::Token(id) => {
            registry.token(id).is_some_and(|t| t.token_type == TokenType::Pc && t.visible_to_players)
        }
        EmitterId::Light(id) => registry.light(id).is_some_and(|l| {
            registry.overlay().effective_active(l)
                && l.token_id.is_none_or(|carrier| registry.token(carrier).is_none_or(|t| t.visible_to_players))
        }),
    }
}

/// Everything the player mask is built from, detached from the session.
#[derive(Debug, Clone)]
pub struct FogSnapshot {
    pub enabled: bool,
    pub width_px: u32,
    pub height_px: u32,
    pub cell_px: u32,
    pub revealed: Vec<RevealedArea>,
    pub polygons: Vec<Polygon>,
}

impl FogSnapshot {
    /// Rasterize what players may see. CPU bound; call off the reactor.
    #[must_use]
    pub fn render(&self) -> PlayerFog {
        if !self.enabled {
            return PlayerFog::Disabled;
        }
        let polygons: Vec<&Polygon> = self.polygons.iter().collect();
        PlayerFog::Masked(FogMask::render(self.width_px, self.height_px, self.cell_px, &self.revealed, &polygons))
    }
}

#[must_use]
pub fn fog_snapshot(session: &MapSession, cell_px: u32) -> FogSnapshot {
    let enabled = session.fog.fog_enabled;
    let polygons = if enabled {
        session
            .visibility
            .values()
            .filter(|v| feeds_player_fog(session, v.emitter))
            .map(|v| v.polygon.clone())
            .collect()
    } else {
        Vec::new()
    };
    FogSnapshot {
        enabled,
        width_px: u32::try_from(session.map.width_px).unwrap_or(0),
        height_px: u32::try_from(session.map.height_px).unwrap_or(0),
        cell_px,
        revealed: if enabled { session.fog.revealed_areas.clone() } else { Vec::new() },
        polygons,
    }
}

/// Render on the blocking pool. `None` if the render task panicked.
pub async fn render_fog(snapshot: FogSnapshot) -> Option<PlayerFog> {
    match tokio::task::spawn_blocking(move || snapshot.render()).await {
        Ok(fog) => Some(fog),
        Err(e) => {
            error!(error = %e, "fog mask render failed");
            None
        }
    }
}

/// Complete state for a freshly attached surface, in delivery order. The
/// fog mask is rendered by the caller; without one the fog message is left
/// to the next push.
#[must_use]
pub fn full_resync(session: &MapSession, fog: Option<PlayerFog>) -> Vec<PlayerMessage> {
    let mut messages = vec![
        PlayerMessage::MapUpdate { map: player_map(&session.map) },
        PlayerMessage::TokensUpdate { tokens: player_tokens(&session.registry) },
    ];
    if let Some(fog) = fog {
        messages.push(PlayerMessage::FogUpdate { fog });
    }
    messages.push(PlayerMessage::ViewportUpdate { viewport: session.viewport });
    messages
}

// =============================================================================
// SENT STATE
// =============================================================================

/// What the session's players were last sent, and the fog render state.
#[derive(Debug, Default)]
pub struct PlayerSync {
    pub tokens_sent: Option<Vec<PlayerToken>>,
    pub fog_sent: Option<PlayerFog>,
    /// Bumped by every `push_fog`.
    pub fog_revision: u64,
    /// A change arrived that no render has picked up yet.
    pub fog_dirty: bool,
    /// A render task is running for this map.
    pub fog_rendering: bool,
}

// =============================================================================
// PUSH
// =============================================================================

/// Fire-and-forget delivery to every player surface of the session.
pub fn push(session: &MapSession, message: &PlayerMessage) {
    for (client_id, tx) in &session.players {
        match tx.try_send(message.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(map_id = %session.map.id, %client_id, kind = message.kind(), "player channel full; message dropped");
            }
            Err(TrySendError::Closed(_)) => {
                warn!(map_id = %session.map.id, %client_id, kind = message.kind(), "player surface gone; message dropped");
            }
        }
    }
}

pub fn push_map(session: &MapSession) {
    if !session.players.is_empty() {
        push(session, &PlayerMessage::MapUpdate { map: player_map(&session.map) });
    }
}

/// Push the visible token set unless players already have exactly it.
pub fn push_tokens(session: &mut MapSession) {
    if session.players.is_empty() {
        return;
    }
    let tokens = player_tokens(&session.registry);
    if session.sync.tokens_sent.as_ref() == Some(&tokens) {
        debug!(map_id = %session.map.id, "player token set unchanged; not sent");
        return;
    }
    push(session, &PlayerMessage::TokensUpdate { tokens: tokens.clone() });
    session.sync.tokens_sent = Some(tokens);
}

/// Mark the player mask stale and make sure a render will pick it up.
pub fn push_fog(state: &AppState, session: &mut MapSession) {
    session.sync.fog_revision += 1;
    session.sync.fog_dirty = true;
    if session.sync.fog_rendering || session.players.is_empty() {
        return;
    }
    session.sync.fog_rendering = true;
    tokio::spawn(render_fog_loop(state.clone(), session.map.id));
}

async fn render_fog_loop(state: AppState, map_id: Uuid) {
    loop {
        let snapshot = {
            let mut sessions = state.sessions.write().await;
            let Some(session) = sessions.get_mut(&map_id) else {
                return;
            };
            if !session.sync.fog_dirty || session.players.is_empty() {
                session.sync.fog_rendering = false;
                return;
            }
            session.sync.fog_dirty = false;
            fog_snapshot(session, state.config.fog_mask_cell_px)
        };

        let fog = render_fog(snapshot).await;

        let mut sessions = state.sessions.write().await;
        let Some(session) = sessions.get_mut(&map_id) else {
            return;
        };
        match fog {
            Some(fog) => deliver_fog(session, fog),
            None => {
                session.sync.fog_rendering = false;
                return;
            }
        }
    }
}

/// Send a rendered mask to every player unless it matches the last one.
pub(crate) fn deliver_fog(session: &mut MapSession, fog: PlayerFog) {
    if session.sync.fog_sent.as_ref() == Some(&fog) {
        debug!(map_id = %session.map.id, "player fog mask unchanged; not sent");
        return;
    }
    push(session, &PlayerMessage::FogUpdate { fog: fog.clone() });
    session.sync.fog_sent = Some(fog);
}

pub fn push_viewport(session: &MapSession) {
    if !session.players.is_empty() {
        push(session, &PlayerMessage::ViewportUpdate { viewport: session.viewport });
    }
}

/// Send a frame to every GM connection on the map, optionally excluding one.
pub fn broadcast_gm_session(session: &MapSession, frame: &Frame, exclude: Option<Uuid>) {
    for (client_id, tx) in &session.gm_clients {
        if exclude == Some(*client_id) {
            continue;
        }
        // Best-effort: if a client's channel is full, skip it.
        let _ = tx.try_send(frame.clone());
    }
}

/// Broadcast to GM peers of `map_id` if the map is open.
pub async fn broadcast_gm(state: &AppState, map_id: Uuid, frame: &Frame, exclude: Option<Uuid>) {
    let sessions = state.sessions.read().await;
    if let Some(session) = sessions.get(&map_id) {
        broadcast_gm_session(session, frame, exclude);
    }
}

#[cfg(test)]
#[path = "sync_test.rs"]
mod tests;
