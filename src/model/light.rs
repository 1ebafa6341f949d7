//! Light source model and presets.
//!
//! The persisted `active` flag is the durable default. Sessions may
//! override it through the registry overlay; that override never reaches
//! this record.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{
    ValidationError, nullable_str, nullable_uuid, opt_bool, opt_f64, opt_str, opt_uuid, out_of_range, req_f64,
    require_finite, require_non_negative,
};
use crate::frame::Data;

// =============================================================================
// LIGHT TYPE / PRESETS
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LightType {
    Torch,
    Lantern,
    Candle,
    Light,
    Daylight,
    #[default]
    Custom,
}

/// Fixed radius/color pairing for a named light.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightPreset {
    pub name: &'static str,
    pub bright_radius_ft: f64,
    pub dim_radius_ft: f64,
    pub color: &'static str,
}

pub const TORCH: LightPreset = LightPreset { name: "Torch", bright_radius_ft: 20.0, dim_radius_ft: 40.0, color: "#FFAA00" };
pub const LANTERN: LightPreset =
    LightPreset { name: "Lantern", bright_radius_ft: 30.0, dim_radius_ft: 60.0, color: "#FFD700" };
pub const CANDLE: LightPreset = LightPreset { name: "Candle", bright_radius_ft: 5.0, dim_radius_ft: 10.0, color: "#FFCC66" };
pub const LIGHT_SPELL: LightPreset =
    LightPreset { name: "Light", bright_radius_ft: 20.0, dim_radius_ft: 40.0, color: "#FFFFFF" };
pub const DAYLIGHT: LightPreset =
    LightPreset { name: "Daylight", bright_radius_ft: 60.0, dim_radius_ft: 120.0, color: "#FFFFEE" };

impl LightType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Torch => "torch",
            Self::Lantern => "lantern",
            Self::Candle => "candle",
            Self::Light => "light",
            Self::Daylight => "daylight",
            Self::Custom => "custom",
        }
    }

    #[must_use]
    pub fn preset(self) -> Option<LightPreset> {
        match self {
            Self::Torch => Some(TORCH),
            Self::Lantern => Some(LANTERN),
            Self::Candle => Some(CANDLE),
            Self::Light => Some(LIGHT_SPELL),
            Self::Daylight => Some(DAYLIGHT),
            Self::Custom => None,
        }
    }
}

impl FromStr for LightType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "torch" => Ok(Self::Torch),
            "lantern" => Ok(Self::Lantern),
            "candle" => Ok(Self::Candle),
            "light" => Ok(Self::Light),
            "daylight" => Ok(Self::Daylight),
            "custom" => Ok(Self::Custom),
            other => Err(ValidationError::UnknownVariant { field: "light_type", value: other.to_string() }),
        }
    }
}

// =============================================================================
// LIGHT SOURCE
// =============================================================================

/// Mirrors the `light_sources` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightSource {
    pub id: Uuid,
    pub map_id: Uuid,
    /// Token carrying this light, if any.
    pub token_id: Option<Uuid>,
    pub name: String,
    pub light_type: LightType,
    pub x: f64,
    pub y: f64,
    pub bright_radius_ft: f64,
    pub dim_radius_ft: f64,
    pub color: Option<String>,
    pub active: bool,
}

fn check_radii(bright: f64, dim: f64) -> Result<(), ValidationError> {
    require_non_negative("bright_radius_ft", bright)?;
    require_non_negative("dim_radius_ft", dim)?;
    if bright > dim {
        return Err(out_of_range("bright_radius_ft", format!("bright {bright} exceeds dim {dim}")));
    }
    Ok(())
}

/// A light as reported to the GM: the persisted row plus the active flag
/// after the session overlay is applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightSourceView {
    #[serde(flatten)]
    pub light: LightSource,
    pub effective_active: bool,
}

impl LightSourceView {
    #[must_use]
    pub fn new(light: LightSource, session_override: Option<bool>) -> Self {
        let effective_active = session_override.unwrap_or(light.active);
        Self { light, effective_active }
    }
}

// =============================================================================
// NEW LIGHT SOURCE
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct NewLightSource {
    pub map_id: Uuid,
    pub token_id: Option<Uuid>,
    pub name: String,
    pub light_type: LightType,
    pub x: f64,
    pub y: f64,
    pub bright_radius_ft: f64,
    pub dim_radius_ft: f64,
    pub color: Option<String>,
    pub active: bool,
}

impl NewLightSource {
    #[must_use]
    pub fn new(map_id: Uuid, x: f64, y: f64, bright_radius_ft: f64, dim_radius_ft: f64) -> Self {
        Self {
            map_id,
            token_id: None,
            name: "Light".into(),
            light_type: LightType::Custom,
            x,
            y,
            bright_radius_ft,
            dim_radius_ft,
            color: None,
            active: true,
        }
    }

    /// Build from a preset. `Custom` has no preset and falls back to 0/0.
    #[must_use]
    pub fn from_preset(map_id: Uuid, light_type: LightType, x: f64, y: f64) -> Self {
        let Some(preset) = light_type.preset() else {
            return Self::new(map_id, x, y, 0.0, 0.0);
        };
        Self {
            name: preset.name.into(),
            light_type,
            color: Some(preset.color.into()),
            ..Self::new(map_id, x, y, preset.bright_radius_ft, preset.dim_radius_ft)
        }
    }

    #[must_use]
    pub fn torch(map_id: Uuid, x: f64, y: f64) -> Self {
        Self::from_preset(map_id, LightType::Torch, x, y)
    }

    #[must_use]
    pub fn lantern(map_id: Uuid, x: f64, y: f64) -> Self {
        Self::from_preset(map_id, LightType::Lantern, x, y)
    }

    /// Parse a `light:create` payload. A `preset` (or a non-custom
    /// `light_type`) supplies radii, color and name; explicit fields win.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` for malformed values or bright > dim.
    pub fn from_data(map_id: Uuid, data: &Data) -> Result<Self, ValidationError> {
        let x = req_f64(data, "x")?;
        let y = req_f64(data, "y")?;
        let preset = opt_str(data, "preset")?.or(opt_str(data, "light_type")?);
        let mut light = match preset {
            Some(name) => Self::from_preset(map_id, name.parse()?, x, y),
            None => Self::new(map_id, x, y, req_f64(data, "bright_radius_ft")?, req_f64(data, "dim_radius_ft")?),
        };
        if let Some(bright) = opt_f64(data, "bright_radius_ft")? {
            light.bright_radius_ft = bright;
        }
        if let Some(dim) = opt_f64(data, "dim_radius_ft")? {
            light.dim_radius_ft = dim;
        }
        if let Some(name) = opt_str(data, "name")? {
            light.name = name.to_string();
        }
        if let Some(color) = opt_str(data, "color")? {
            light.color = Some(color.to_string());
        }
        if let Some(active) = opt_bool(data, "active")? {
            light.active = active;
        }
        light.token_id = opt_uuid(data, "token_id")?;
        light.validate()?;
        Ok(light)
    }

    /// # Errors
    ///
    /// Returns a `ValidationError` for negative radii, bright > dim, or a
    /// non-finite position.
    pub fn validate(&self) -> Result<(), ValidationError> {
        require_finite("x", self.x)?;
        require_finite("y", self.y)?;
        check_radii(self.bright_radius_ft, self.dim_radius_ft)
    }
}

// =============================================================================
// LIGHT UPDATE
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LightUpdate {
    pub name: Option<String>,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub bright_radius_ft: Option<f64>,
    pub dim_radius_ft: Option<f64>,
    pub color: Option<Option<String>>,
    pub active: Option<bool>,
    pub token_id: Option<Option<Uuid>>,
}

impl LightUpdate {
    /// # Errors
    ///
    /// Returns a `ValidationError` for malformed values.
    pub fn from_data(data: &Data) -> Result<Self, ValidationError> {
        Ok(Self {
            name: opt_str(data, "name")?.map(str::to_string),
            x: opt_f64(data, "x")?,
            y: opt_f64(data, "y")?,
            bright_radius_ft: opt_f64(data, "bright_radius_ft")?,
            dim_radius_ft: opt_f64(data, "dim_radius_ft")?,
            color: nullable_str(data, "color")?,
            active: opt_bool(data, "active")?,
            token_id: nullable_uuid(data, "token_id")?,
        })
    }

    /// Apply onto a copy of `current`, re-checking bright ≤ dim on the result.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` if the merged light is invalid.
    pub fn apply(&self, current: &LightSource) -> Result<LightSource, ValidationError> {
        let mut next = current.clone();
        if let Some(name) = &self.name {
            next.name.clone_from(name);
        }
        if let Some(x) = self.x {
            next.x = x;
        }
        if let Some(y) = self.y {
            next.y = y;
        }
        if let Some(bright) = self.bright_radius_ft {
            next.bright_radius_ft = bright;
        }
        if let Some(dim) = self.dim_radius_ft {
            next.dim_radius_ft = dim;
        }
        if let Some(color) = &self.color {
            next.color.clone_from(color);
        }
        if let Some(active) = self.active {
            next.active = active;
        }
        if let Some(token_id) = self.token_id {
            next.token_id = token_id;
        }
        check_radii(next.bright_radius_ft, next.dim_radius_ft)?;
        Ok(next)
    }
}

#[cfg(test)]
#[path = "light_test.rs"]
mod tests;
