//! In-process entity repository.
//!
//! Enforces the same keys, cascades and checks as the Postgres schema so
//! tests and database-less runs see identical error kinds. Rows keep their
//! insertion order, matching the `created_at` ordering of the SQL store.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use uuid::Uuid;

use super::{EntityStore, StoreError, StoreResult};
use crate::geometry::Segment;
use crate::model::{
    AmbientLight, FogState, LightSource, MapRecord, NewLightSource, NewMap, NewRevealedArea, NewToken, RevealedArea,
    Token, TokenSummary,
};

#[derive(Default)]
struct Tables {
    maps: HashMap<Uuid, MapRecord>,
    monsters: HashMap<Uuid, String>,
    characters: HashMap<Uuid, String>,
    tokens: Vec<Token>,
    lights: Vec<LightSource>,
    areas: Vec<RevealedArea>,
}

impl Tables {
    fn require_map(&self, map_id: Uuid) -> StoreResult<()> {
        if self.maps.contains_key(&map_id) {
            Ok(())
        } else {
            Err(StoreError::ForeignKey(format!("map {map_id} does not exist")))
        }
    }

    fn check_token_refs(&self, map_id: Uuid, monster_id: Option<Uuid>, character_id: Option<Uuid>) -> StoreResult<()> {
        self.require_map(map_id)?;
        if let Some(id) = monster_id.filter(|id| !self.monsters.contains_key(id)) {
            return Err(StoreError::ForeignKey(format!("monster {id} does not exist")));
        }
        if let Some(id) = character_id.filter(|id| !self.characters.contains_key(id)) {
            return Err(StoreError::ForeignKey(format!("character {id} does not exist")));
        }
        Ok(())
    }

    fn check_light_refs(&self, map_id: Uuid, token_id: Option<Uuid>) -> StoreResult<()> {
        self.require_map(map_id)?;
        if let Some(id) = token_id.filter(|id| !self.tokens.iter().any(|t| t.id == *id)) {
            return Err(StoreError::ForeignKey(format!("token {id} does not exist")));
        }
        Ok(())
    }

    fn map_mut(&mut self, id: Uuid) -> StoreResult<&mut MapRecord> {
        self.maps.get_mut(&id).ok_or(StoreError::not_found("map", id))
    }

    fn token_mut(&mut self, id: Uuid) -> StoreResult<&mut Token> {
        self.tokens.iter_mut().find(|t| t.id == id).ok_or(StoreError::not_found("token", id))
    }

    fn light_mut(&mut self, id: Uuid) -> StoreResult<&mut LightSource> {
        self.lights.iter_mut().find(|l| l.id == id).ok_or(StoreError::not_found("light source", id))
    }

    fn summarize(&self, token: &Token) -> TokenSummary {
        TokenSummary {
            token: token.clone(),
            monster_name: token.monster_id.and_then(|id| self.monsters.get(&id).cloned()),
            character_name: token.character_id.and_then(|id| self.characters.get(&id).cloned()),
        }
    }
}

fn check_token_columns(vision_range_ft: Option<f64>) -> StoreResult<()> {
    if vision_range_ft.is_some_and(|r| r < 0.0) {
        return Err(StoreError::Constraint("vision_range_ft must be >= 0".into()));
    }
    Ok(())
}

fn check_light_columns(bright: f64, dim: f64) -> StoreResult<()> {
    if bright < 0.0 || dim < 0.0 || bright > dim {
        return Err(StoreError::Constraint(format!("light radii {bright}/{dim} violate bright <= dim")));
    }
    Ok(())
}

// =============================================================================
// STORE
// =============================================================================

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a monster catalog entry tokens may reference.
    pub fn register_monster(&self, name: impl Into<String>) -> Uuid {
        let id = Uuid::new_v4();
        self.tables().monsters.insert(id, name.into());
        id
    }

    /// Add a character entry tokens may reference.
    pub fn register_character(&self, name: impl Into<String>) -> Uuid {
        let id = Uuid::new_v4();
        self.tables().characters.insert(id, name.into());
        id
    }
}

#[async_trait::async_trait]
impl EntityStore for MemoryStore {
    // --- maps ---------------------------------------------------------------

    async fn create_map(&self, map: &NewMap) -> StoreResult<MapRecord> {
        if map.width_px <= 0 || map.height_px <= 0 || map.grid_size_px <= 0 || map.feet_per_square <= 0.0 {
            return Err(StoreError::Constraint("map dimensions must be positive".into()));
        }
        let record = MapRecord {
            id: Uuid::new_v4(),
            name: map.name.clone(),
            width_px: map.width_px,
            height_px: map.height_px,
            grid_size_px: map.grid_size_px,
            feet_per_square: map.feet_per_square,
            ambient_light: map.ambient_light,
            fog_enabled: map.fog_enabled,
            occluders: Vec::new(),
        };
        self.tables().maps.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_map(&self, id: Uuid) -> StoreResult<MapRecord> {
        self.tables().maps.get(&id).cloned().ok_or(StoreError::not_found("map", id))
    }

    async fn delete_map(&self, id: Uuid) -> StoreResult<()> {
        let mut tables = self.tables();
        tables.maps.remove(&id).ok_or(StoreError::not_found("map", id))?;
        tables.tokens.retain(|t| t.map_id != id);
        tables.lights.retain(|l| l.map_id != id);
        tables.areas.retain(|a| a.map_id != id);
        Ok(())
    }

    async fn set_occluders(&self, id: Uuid, occluders: &[Segment]) -> StoreResult<MapRecord> {
        let mut tables = self.tables();
        let map = tables.map_mut(id)?;
        map.occluders = occluders.to_vec();
        Ok(map.clone())
    }

    async fn set_ambient_light(&self, id: Uuid, ambient: AmbientLight) -> StoreResult<MapRecord> {
        let mut tables = self.tables();
        let map = tables.map_mut(id)?;
        map.ambient_light = ambient;
        Ok(map.clone())
    }

    // --- tokens -------------------------------------------------------------

    async fn create_token(&self, token: &NewToken) -> StoreResult<Token> {
        let mut tables = self.tables();
        tables.check_token_refs(token.map_id, token.monster_id, token.character_id)?;
        check_token_columns(token.vision_range_ft)?;
        let record = Token {
            id: Uuid::new_v4(),
            map_id: token.map_id,
            name: token.name.clone(),
            token_type: token.token_type,
            size: token.size,
            x: token.x,
            y: token.y,
            visible_to_players: token.visible_to_players,
            color: token.color.clone(),
            monster_id: token.monster_id,
            character_id: token.character_id,
            vision_type: token.vision_type,
            vision_range_ft: token.vision_range_ft,
            notes: token.notes.clone(),
        };
        tables.tokens.push(record.clone());
        Ok(record)
    }

    async fn get_token(&self, id: Uuid) -> StoreResult<Token> {
        self.tables()
            .tokens
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or(StoreError::not_found("token", id))
    }

    async fn list_tokens(&self, map_id: Uuid) -> StoreResult<Vec<TokenSummary>> {
        let tables = self.tables();
        Ok(tables.tokens.iter().filter(|t| t.map_id == map_id).map(|t| tables.summarize(t)).collect())
    }

    async fn update_token(&self, token: &Token) -> StoreResult<Token> {
        let mut tables = self.tables();
        let map_id = tables.token_mut(token.id)?.map_id;
        tables.check_token_refs(map_id, token.monster_id, token.character_id)?;
        check_token_columns(token.vision_range_ft)?;
        let row = tables.token_mut(token.id)?;
        *row = Token { id: row.id, map_id: row.map_id, ..token.clone() };
        Ok(row.clone())
    }

    async fn update_token_position(&self, id: Uuid, x: f64, y: f64) -> StoreResult<Token> {
        let mut tables = self.tables();
        let row = tables.token_mut(id)?;
        row.x = x;
        row.y = y;
        Ok(row.clone())
    }

    async fn toggle_token_visibility(&self, id: Uuid) -> StoreResult<Token> {
        let mut tables = self.tables();
        let row = tables.token_mut(id)?;
        row.visible_to_players = !row.visible_to_players;
        Ok(row.clone())
    }

    async fn delete_token(&self, id: Uuid) -> StoreResult<Token> {
        let mut tables = self.tables();
        let index = tables.tokens.iter().position(|t| t.id == id).ok_or(StoreError::not_found("token", id))?;
        let removed = tables.tokens.remove(index);
        for light in tables.lights.iter_mut().filter(|l| l.token_id == Some(id)) {
            light.token_id = None;
        }
        Ok(removed)
    }

    // --- light sources ------------------------------------------------------

    async fn create_light(&self, light: &NewLightSource) -> StoreResult<LightSource> {
        let mut tables = self.tables();
        tables.check_light_refs(light.map_id, light.token_id)?;
        check_light_columns(light.bright_radius_ft, light.dim_radius_ft)?;
        let record = LightSource {
            id: Uuid::new_v4(),
            map_id: light.map_id,
            token_id: light.token_id,
            name: light.name.clone(),
            light_type: light.light_type,
            x: light.x,
            y: light.y,
            bright_radius_ft: light.bright_radius_ft,
            dim_radius_ft: light.dim_radius_ft,
            color: light.color.clone(),
            active: light.active,
        };
        tables.lights.push(record.clone());
        Ok(record)
    }

    async fn get_light(&self, id: Uuid) -> StoreResult<LightSource> {
        self.tables()
            .lights
            .iter()
            .find(|l| l.id == id)
            .cloned()
            .ok_or(StoreError::not_found("light source", id))
    }

    async fn list_lights(&self, map_id: Uuid) -> StoreResult<Vec<LightSource>> {
        Ok(self.tables().lights.iter().filter(|l| l.map_id == map_id).cloned().collect())
    }

    async fn update_light(&self, light: &LightSource) -> StoreResult<LightSource> {
        let mut tables = self.tables();
        let map_id = tables.light_mut(light.id)?.map_id;
        tables.check_light_refs(map_id, light.token_id)?;
        check_light_columns(light.bright_radius_ft, light.dim_radius_ft)?;
        let row = tables.light_mut(light.id)?;
        *row = LightSource { id: row.id, map_id: row.map_id, ..light.clone() };
        Ok(row.clone())
    }

    async fn move_light(&self, id: Uuid, x: f64, y: f64) -> StoreResult<LightSource> {
        let mut tables = self.tables();
        let row = tables.light_mut(id)?;
        row.x = x;
        row.y = y;
        Ok(row.clone())
    }

    async fn delete_light(&self, id: Uuid) -> StoreResult<LightSource> {
        let mut tables = self.tables();
        let index =
            tables.lights.iter().position(|l| l.id == id).ok_or(StoreError::not_found("light source", id))?;
        Ok(tables.lights.remove(index))
    }

    async fn delete_all_lights(&self, map_id: Uuid) -> StoreResult<u64> {
        let mut tables = self.tables();
        let before = tables.lights.len();
        tables.lights.retain(|l| l.map_id != map_id);
        Ok((before - tables.lights.len()) as u64)
    }

    // --- fog ----------------------------------------------------------------

    async fn insert_revealed_area(&self, area: &NewRevealedArea) -> StoreResult<RevealedArea> {
        let mut tables = self.tables();
        tables.require_map(area.map_id)?;
        if area.width < 0.0 || area.height < 0.0 {
            return Err(StoreError::Constraint("revealed area extent must be >= 0".into()));
        }
        let record = RevealedArea {
            id: Uuid::new_v4(),
            map_id: area.map_id,
            shape: area.shape,
            x: area.x,
            y: area.y,
            width: area.width,
            height: area.height,
        };
        tables.areas.push(record.clone());
        Ok(record)
    }

    async fn get_revealed_area(&self, id: Uuid) -> StoreResult<RevealedArea> {
        self.tables()
            .areas
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .ok_or(StoreError::not_found("revealed area", id))
    }

    async fn list_revealed_areas(&self, map_id: Uuid) -> StoreResult<Vec<RevealedArea>> {
        Ok(self.tables().areas.iter().filter(|a| a.map_id == map_id).cloned().collect())
    }

    async fn delete_revealed_area(&self, id: Uuid) -> StoreResult<RevealedArea> {
        let mut tables = self.tables();
        let index =
            tables.areas.iter().position(|a| a.id == id).ok_or(StoreError::not_found("revealed area", id))?;
        Ok(tables.areas.remove(index))
    }

    async fn delete_all_revealed_areas(&self, map_id: Uuid) -> StoreResult<u64> {
        let mut tables = self.tables();
        let before = tables.areas.len();
        tables.areas.retain(|a| a.map_id != map_id);
        Ok((before - tables.areas.len()) as u64)
    }

    async fn count_revealed_areas(&self, map_id: Uuid) -> StoreResult<u64> {
        Ok(self.tables().areas.iter().filter(|a| a.map_id == map_id).count() as u64)
    }

    async fn get_fog_state(&self, map_id: Uuid) -> StoreResult<FogState> {
        let tables = self.tables();
        let map = tables.maps.get(&map_id).ok_or(StoreError::not_found("map", map_id))?;
        Ok(FogState {
            map_id,
            fog_enabled: map.fog_enabled,
            revealed_areas: tables.areas.iter().filter(|a| a.map_id == map_id).cloned().collect(),
        })
    }

    async fn set_fog_enabled(&self, map_id: Uuid, enabled: bool) -> StoreResult<bool> {
        let mut tables = self.tables();
        let map = tables.map_mut(map_id)?;
        map.fog_enabled = enabled;
        Ok(map.fog_enabled)
    }

    async fn toggle_fog_enabled(&self, map_id: Uuid) -> StoreResult<bool> {
        let mut tables = self.tables();
        let map = tables.map_mut(map_id)?;
        map.fog_enabled = !map.fog_enabled;
        Ok(map.fog_enabled)
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
