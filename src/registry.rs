//! Map entity registry: the live working set of one open map.
//!
//! DESIGN
//! ======
//! A derived cache, rebuilt wholesale from the repository when a session
//! opens. Services apply repository results into it after each successful
//! write; on disagreement the repository wins. Position-only moves touch a
//! single field through `move_token`/`move_light` with no validation and no
//! refetch.
//!
//! The session light overlay lives here too. It is keyed by light id,
//! merged over the persisted `active` flag at read time, and never written
//! back.

use std::collections::HashMap;

use uuid::Uuid;

use crate::geometry::Point;
use crate::model::{LightSource, LightSourceView, MapRecord, Token};
use crate::visibility::{EmitterId, EmitterSpec};

// =============================================================================
// LIGHT OVERLAY
// =============================================================================

/// Session-only `active` overrides for light sources.
#[derive(Debug, Clone, Default)]
pub struct LightOverlay {
    overrides: HashMap<Uuid, bool>,
}

impl LightOverlay {
    pub fn set(&mut self, light_id: Uuid, active: bool) {
        self.overrides.insert(light_id, active);
    }

    /// Drop the override; returns it if one existed.
    pub fn clear(&mut self, light_id: Uuid) -> Option<bool> {
        self.overrides.remove(&light_id)
    }

    #[must_use]
    pub fn get(&self, light_id: Uuid) -> Option<bool> {
        self.overrides.get(&light_id).copied()
    }

    /// Session wins when present; otherwise the persisted flag.
    #[must_use]
    pub fn effective_active(&self, light: &LightSource) -> bool {
        self.get(light.id).unwrap_or(light.active)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.overrides.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct MapRegistry {
    tokens: HashMap<Uuid, Token>,
    lights: HashMap<Uuid, LightSource>,
    /// Ids in hydration/creation order, for stable listings.
    token_order: Vec<Uuid>,
    light_order: Vec<Uuid>,
    overlay: LightOverlay,
}

impl MapRegistry {
    #[must_use]
    pub fn hydrate(tokens: Vec<Token>, lights: Vec<LightSource>) -> Self {
        let mut registry = Self::default();
        for token in tokens {
            registry.upsert_token(token);
        }
        for light in lights {
            registry.upsert_light(light);
        }
        registry
    }

    // --- tokens -------------------------------------------------------------

    #[must_use]
    pub fn token(&self, id: Uuid) -> Option<&Token> {
        self.tokens.get(&id)
    }

    pub fn tokens(&self) -> impl Iterator<Item = &Token> {
        self.token_order.iter().filter_map(|id| self.tokens.get(id))
    }

    #[must_use]
    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    /// Insert or replace a token with the repository's row.
    pub fn upsert_token(&mut self, token: Token) {
        if self.tokens.insert(token.id, token.clone()).is_none() {
            self.token_order.push(token.id);
        }
    }

    /// Drag fast path. Returns `false` if the token is not loaded.
    pub fn move_token(&mut self, id: Uuid, x: f64, y: f64) -> bool {
        match self.tokens.get_mut(&id) {
            Some(token) => {
                token.x = x;
                token.y = y;
                true
            }
            None => false,
        }
    }

    pub fn remove_token(&mut self, id: Uuid) -> Option<Token> {
        let removed = self.tokens.remove(&id)?;
        self.token_order.retain(|t| *t != id);
        for light in self.lights.values_mut().filter(|l| l.token_id == Some(id)) {
            light.token_id = None;
        }
        Some(removed)
    }

    // --- lights -------------------------------------------------------------

    #[must_use]
    pub fn light(&self, id: Uuid) -> Option<&LightSource> {
        self.lights.get(&id)
    }

    pub fn lights(&self) -> impl Iterator<Item = &LightSource> {
        self.light_order.iter().filter_map(|id| self.lights.get(id))
    }

    pub fn upsert_light(&mut self, light: LightSource) {
        if self.lights.insert(light.id, light.clone()).is_none() {
            self.light_order.push(light.id);
        }
    }

    pub fn move_light(&mut self, id: Uuid, x: f64, y: f64) -> bool {
        match self.lights.get_mut(&id) {
            Some(light) => {
                light.x = x;
                light.y = y;
                true
            }
            None => false,
        }
    }

    /// Remove a light and any session override it had.
    pub fn remove_light(&mut self, id: Uuid) -> Option<LightSource> {
        let removed = self.lights.remove(&id)?;
        self.light_order.retain(|l| *l != id);
        self.overlay.clear(id);
        Some(removed)
    }

    /// Remove every light; returns the removed ids.
    pub fn clear_lights(&mut self) -> Vec<Uuid> {
        let ids = std::mem::take(&mut self.light_order);
        self.lights.clear();
        self.overlay = LightOverlay::default();
        ids
    }

    /// Lights carried by `token_id`.
    #[must_use]
    pub fn carried_lights(&self, token_id: Uuid) -> Vec<Uuid> {
        self.lights().filter(|l| l.token_id == Some(token_id)).map(|l| l.id).collect()
    }

    // --- overlay ------------------------------------------------------------

    /// Set a session override. Returns `false` if the light is not loaded.
    pub fn set_light_active(&mut self, id: Uuid, active: bool) -> bool {
        if !self.lights.contains_key(&id) {
            return false;
        }
        self.overlay.set(id, active);
        true
    }

    pub fn clear_light_override(&mut self, id: Uuid) -> Option<bool> {
        self.overlay.clear(id)
    }

    #[must_use]
    pub fn overlay(&self) -> &LightOverlay {
        &self.overlay
    }

    #[must_use]
    pub fn light_view(&self, light: &LightSource) -> LightSourceView {
        LightSourceView::new(light.clone(), self.overlay.get(light.id))
    }

    #[must_use]
    pub fn light_views(&self) -> Vec<LightSourceView> {
        self.lights().map(|l| self.light_view(l)).collect()
    }

    // --- emitters -----------------------------------------------------------

    /// Every emitter id currently loaded, tokens first.
    #[must_use]
    pub fn emitter_ids(&self) -> Vec<EmitterId> {
        self.token_order
            .iter()
            .map(|id| EmitterId::Token(*id))
            .chain(self.light_order.iter().map(|id| EmitterId::Light(*id)))
            .collect()
    }

    /// Resolve one emitter to pixel space. `None` when the entity is gone
    /// or currently emits nothing: a token without vision, or a light that
    /// is effectively off.
    #[must_use]
    pub fn emitter(&self, map: &MapRecord, id: EmitterId) -> Option<EmitterSpec> {
        match id {
            EmitterId::Token(token_id) => {
                let token = self.tokens.get(&token_id).filter(|t| t.has_vision())?;
                let range_px = token.vision_range_ft.map_or_else(|| map.bounds().diagonal(), |ft| map.feet_to_px(ft));
                Some(EmitterSpec { id, origin: Point::new(token.x, token.y), range_px, bright_px: None })
            }
            EmitterId::Light(light_id) => {
                let light = self.lights.get(&light_id).filter(|l| self.overlay.effective_active(l))?;
                Some(EmitterSpec {
                    id,
                    origin: self.light_origin(light),
                    range_px: map.feet_to_px(light.dim_radius_ft),
                    bright_px: Some(map.feet_to_px(light.bright_radius_ft)),
                })
            }
        }
    }

    /// All current emitters.
    #[must_use]
    pub fn emitters(&self, map: &MapRecord) -> Vec<EmitterSpec> {
        self.emitter_ids().into_iter().filter_map(|id| self.emitter(map, id)).collect()
    }

    /// A carried light sits on its token.
    fn light_origin(&self, light: &LightSource) -> Point {
        light
            .token_id
            .and_then(|id| self.tokens.get(&id))
            .map_or(Point::new(light.x, light.y), |t| Point::new(t.x, t.y))
    }
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
