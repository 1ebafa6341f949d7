//! Token model: monsters, PCs, NPCs, traps and markers placed on a map.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{
    ValidationError, nullable_f64, nullable_str, nullable_uuid, opt_bool, opt_f64, opt_str, opt_uuid, req_f64,
    require_finite, require_non_negative,
};
use crate::frame::Data;

// =============================================================================
// ENUMS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Monster,
    Pc,
    Npc,
    Trap,
    Marker,
}

impl TokenType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Monster => "monster",
            Self::Pc => "pc",
            Self::Npc => "npc",
            Self::Trap => "trap",
            Self::Marker => "marker",
        }
    }
}

impl FromStr for TokenType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "monster" => Ok(Self::Monster),
            "pc" => Ok(Self::Pc),
            "npc" => Ok(Self::Npc),
            "trap" => Ok(Self::Trap),
            "marker" => Ok(Self::Marker),
            other => Err(ValidationError::UnknownVariant { field: "token_type", value: other.to_string() }),
        }
    }
}

/// Creature size class. Governs the token's footprint in grid squares.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenSize {
    Tiny,
    Small,
    #[default]
    Medium,
    Large,
    Huge,
    Gargantuan,
}

impl TokenSize {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tiny => "tiny",
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
            Self::Huge => "huge",
            Self::Gargantuan => "gargantuan",
        }
    }

    /// Footprint edge length in grid squares.
    #[must_use]
    pub fn grid_squares(self) -> f64 {
        match self {
            Self::Tiny => 0.5,
            Self::Small | Self::Medium => 1.0,
            Self::Large => 2.0,
            Self::Huge => 3.0,
            Self::Gargantuan => 4.0,
        }
    }
}

impl FromStr for TokenSize {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tiny" => Ok(Self::Tiny),
            "small" => Ok(Self::Small),
            "medium" => Ok(Self::Medium),
            "large" => Ok(Self::Large),
            "huge" => Ok(Self::Huge),
            "gargantuan" => Ok(Self::Gargantuan),
            other => Err(ValidationError::UnknownVariant { field: "size", value: other.to_string() }),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisionType {
    #[default]
    Normal,
    Darkvision,
    Blindsight,
    Tremorsense,
    Truesight,
}

impl VisionType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Darkvision => "darkvision",
            Self::Blindsight => "blindsight",
            Self::Tremorsense => "tremorsense",
            Self::Truesight => "truesight",
        }
    }
}

impl FromStr for VisionType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(Self::Normal),
            "darkvision" => Ok(Self::Darkvision),
            "blindsight" => Ok(Self::Blindsight),
            "tremorsense" => Ok(Self::Tremorsense),
            "truesight" => Ok(Self::Truesight),
            other => Err(ValidationError::UnknownVariant { field: "vision_type", value: other.to_string() }),
        }
    }
}

// =============================================================================
// TOKEN
// =============================================================================

/// Mirrors the `tokens` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub id: Uuid,
    pub map_id: Uuid,
    pub name: String,
    pub token_type: TokenType,
    pub size: TokenSize,
    pub x: f64,
    pub y: f64,
    pub visible_to_players: bool,
    pub color: Option<String>,
    pub monster_id: Option<Uuid>,
    pub character_id: Option<Uuid>,
    pub vision_type: VisionType,
    /// Vision range in feet. `None` means unlimited within the map.
    pub vision_range_ft: Option<f64>,
    pub notes: Option<String>,
}

impl Token {
    /// Whether this token contributes a visibility polygon. PCs always see;
    /// other tokens only when a range is configured.
    #[must_use]
    pub fn has_vision(&self) -> bool {
        self.vision_range_ft.is_some() || self.token_type == TokenType::Pc
    }
}

/// List row: the token plus display names resolved from the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenSummary {
    #[serde(flatten)]
    pub token: Token,
    pub monster_name: Option<String>,
    pub character_name: Option<String>,
}

// =============================================================================
// NEW TOKEN
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct NewToken {
    pub map_id: Uuid,
    pub name: String,
    pub token_type: TokenType,
    pub size: TokenSize,
    pub x: f64,
    pub y: f64,
    pub visible_to_players: bool,
    pub color: Option<String>,
    pub monster_id: Option<Uuid>,
    pub character_id: Option<Uuid>,
    pub vision_type: VisionType,
    pub vision_range_ft: Option<f64>,
    pub notes: Option<String>,
}

impl NewToken {
    #[must_use]
    pub fn new(map_id: Uuid, name: impl Into<String>, token_type: TokenType, x: f64, y: f64) -> Self {
        Self {
            map_id,
            name: name.into(),
            token_type,
            size: TokenSize::Medium,
            x,
            y,
            visible_to_players: true,
            color: None,
            monster_id: None,
            character_id: None,
            vision_type: VisionType::Normal,
            vision_range_ft: None,
            notes: None,
        }
    }

    #[must_use]
    pub fn with_vision(mut self, vision_type: VisionType, range_ft: Option<f64>) -> Self {
        self.vision_type = vision_type;
        self.vision_range_ft = range_ft;
        self
    }

    #[must_use]
    pub fn hidden(mut self) -> Self {
        self.visible_to_players = false;
        self
    }

    /// Parse a `token:create` payload.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` for missing, malformed or unknown values.
    pub fn from_data(map_id: Uuid, data: &Data) -> Result<Self, ValidationError> {
        let name = opt_str(data, "name")?.ok_or(ValidationError::Missing("name"))?;
        let token_type = opt_str(data, "token_type")?.unwrap_or("monster").parse()?;
        let mut token = Self::new(map_id, name, token_type, req_f64(data, "x")?, req_f64(data, "y")?);
        if let Some(size) = opt_str(data, "size")? {
            token.size = size.parse()?;
        }
        if let Some(visible) = opt_bool(data, "visible_to_players")? {
            token.visible_to_players = visible;
        }
        token.color = opt_str(data, "color")?.map(str::to_string);
        token.monster_id = opt_uuid(data, "monster_id")?;
        token.character_id = opt_uuid(data, "character_id")?;
        if let Some(vision) = opt_str(data, "vision_type")? {
            token.vision_type = vision.parse()?;
        }
        token.vision_range_ft = opt_f64(data, "vision_range_ft")?;
        token.notes = opt_str(data, "notes")?.map(str::to_string);
        token.validate()?;
        Ok(token)
    }

    /// # Errors
    ///
    /// Returns a `ValidationError` for an empty name, non-finite position
    /// or negative vision range. Map bounds are checked by the caller.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::Missing("name"));
        }
        require_finite("x", self.x)?;
        require_finite("y", self.y)?;
        if let Some(range) = self.vision_range_ft {
            require_non_negative("vision_range_ft", range)?;
        }
        Ok(())
    }
}

// =============================================================================
// TOKEN UPDATE
// =============================================================================

/// Partial update. Outer `None` = leave unchanged; for nullable columns
/// `Some(None)` clears the value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenUpdate {
    pub name: Option<String>,
    pub token_type: Option<TokenType>,
    pub size: Option<TokenSize>,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub visible_to_players: Option<bool>,
    pub color: Option<Option<String>>,
    pub monster_id: Option<Option<Uuid>>,
    pub character_id: Option<Option<Uuid>>,
    pub vision_type: Option<VisionType>,
    pub vision_range_ft: Option<Option<f64>>,
    pub notes: Option<Option<String>>,
}

impl TokenUpdate {
    /// Parse a `token:update` payload. Unknown keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` for malformed or unknown enum values.
    pub fn from_data(data: &Data) -> Result<Self, ValidationError> {
        Ok(Self {
            name: opt_str(data, "name")?.map(str::to_string),
            token_type: opt_str(data, "token_type")?.map(str::parse).transpose()?,
            size: opt_str(data, "size")?.map(str::parse).transpose()?,
            x: opt_f64(data, "x")?,
            y: opt_f64(data, "y")?,
            visible_to_players: opt_bool(data, "visible_to_players")?,
            color: nullable_str(data, "color")?,
            monster_id: nullable_uuid(data, "monster_id")?,
            character_id: nullable_uuid(data, "character_id")?,
            vision_type: opt_str(data, "vision_type")?.map(str::parse).transpose()?,
            vision_range_ft: nullable_f64(data, "vision_range_ft")?,
            notes: nullable_str(data, "notes")?,
        })
    }

    /// Apply onto a copy of `current` and validate the merged record.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` if the merged token is invalid.
    pub fn apply(&self, current: &Token) -> Result<Token, ValidationError> {
        let mut next = current.clone();
        if let Some(name) = &self.name {
            next.name.clone_from(name);
        }
        if let Some(t) = self.token_type {
            next.token_type = t;
        }
        if let Some(size) = self.size {
            next.size = size;
        }
        if let Some(x) = self.x {
            next.x = x;
        }
        if let Some(y) = self.y {
            next.y = y;
        }
        if let Some(visible) = self.visible_to_players {
            next.visible_to_players = visible;
        }
        if let Some(color) = &self.color {
            next.color.clone_from(color);
        }
        if let Some(monster_id) = self.monster_id {
            next.monster_id = monster_id;
        }
        if let Some(character_id) = self.character_id {
            next.character_id = character_id;
        }
        if let Some(vision) = self.vision_type {
            next.vision_type = vision;
        }
        if let Some(range) = self.vision_range_ft {
            next.vision_range_ft = range;
        }
        if let Some(notes) = &self.notes {
            next.notes.clone_from(notes);
        }

        if next.name.trim().is_empty() {
            return Err(ValidationError::Missing("name"));
        }
        if let Some(range) = next.vision_range_ft {
            require_non_negative("vision_range_ft", range)?;
        }
        Ok(next)
    }
}

#[cfg(test)]
#[path = "token_test.rs"]
mod tests;
