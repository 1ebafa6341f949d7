//! Map record: extent, grid scale, fog flag, and occluder geometry.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ValidationError, opt_bool, opt_f64, opt_str, out_of_range, require_finite};
use crate::frame::Data;
use crate::geometry::{Point, Rect, Segment};

pub const DEFAULT_GRID_SIZE_PX: i32 = 70;
pub const DEFAULT_FEET_PER_SQUARE: f64 = 5.0;

// =============================================================================
// AMBIENT LIGHT
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AmbientLight {
    #[default]
    Bright,
    Dim,
    Dark,
}

impl AmbientLight {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bright => "bright",
            Self::Dim => "dim",
            Self::Dark => "dark",
        }
    }
}

impl FromStr for AmbientLight {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bright" => Ok(Self::Bright),
            "dim" => Ok(Self::Dim),
            "dark" => Ok(Self::Dark),
            other => Err(ValidationError::UnknownVariant { field: "ambient_light", value: other.to_string() }),
        }
    }
}

impl fmt::Display for AmbientLight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// MAP RECORD
// =============================================================================

/// Mirrors the `maps` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapRecord {
    pub id: Uuid,
    pub name: String,
    pub width_px: i32,
    pub height_px: i32,
    pub grid_size_px: i32,
    pub feet_per_square: f64,
    pub ambient_light: AmbientLight,
    pub fog_enabled: bool,
    pub occluders: Vec<Segment>,
}

impl MapRecord {
    /// Full map extent in pixel space.
    #[must_use]
    pub fn bounds(&self) -> Rect {
        Rect::new(0.0, 0.0, f64::from(self.width_px), f64::from(self.height_px))
    }

    /// Convert a distance in feet to map pixels via the grid scale.
    #[must_use]
    pub fn feet_to_px(&self, feet: f64) -> f64 {
        feet / self.feet_per_square * f64::from(self.grid_size_px)
    }

    /// Reject a position outside the map extent.
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` if the point is not finite or lies off the map.
    pub fn check_in_bounds(&self, x: f64, y: f64) -> Result<(), ValidationError> {
        require_finite("x", x)?;
        require_finite("y", y)?;
        if self.bounds().contains(Point::new(x, y)) {
            Ok(())
        } else {
            Err(out_of_range(
                "position",
                format!("({x}, {y}) outside map {}x{}", self.width_px, self.height_px),
            ))
        }
    }
}

// =============================================================================
// NEW MAP
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct NewMap {
    pub name: String,
    pub width_px: i32,
    pub height_px: i32,
    pub grid_size_px: i32,
    pub feet_per_square: f64,
    pub ambient_light: AmbientLight,
    pub fog_enabled: bool,
}

impl NewMap {
    #[must_use]
    pub fn new(name: impl Into<String>, width_px: i32, height_px: i32) -> Self {
        Self {
            name: name.into(),
            width_px,
            height_px,
            grid_size_px: DEFAULT_GRID_SIZE_PX,
            feet_per_square: DEFAULT_FEET_PER_SQUARE,
            ambient_light: AmbientLight::Bright,
            fog_enabled: false,
        }
    }

    /// Parse a `map:create` payload.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` for missing or malformed fields.
    pub fn from_data(data: &Data) -> Result<Self, ValidationError> {
        let name = opt_str(data, "name")?.unwrap_or("Untitled Map");
        let width_px = req_i32(data, "width_px")?;
        let height_px = req_i32(data, "height_px")?;
        let mut map = Self::new(name, width_px, height_px);
        if let Some(grid) = opt_f64(data, "grid_size_px")? {
            map.grid_size_px = to_i32("grid_size_px", grid)?;
        }
        if let Some(fps) = opt_f64(data, "feet_per_square")? {
            map.feet_per_square = fps;
        }
        if let Some(ambient) = opt_str(data, "ambient_light")? {
            map.ambient_light = ambient.parse()?;
        }
        if let Some(fog) = opt_bool(data, "fog_enabled")? {
            map.fog_enabled = fog;
        }
        map.validate()?;
        Ok(map)
    }

    /// # Errors
    ///
    /// Returns `OutOfRange` for non-positive dimensions or scale.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::Missing("name"));
        }
        for (field, value) in [
            ("width_px", self.width_px),
            ("height_px", self.height_px),
            ("grid_size_px", self.grid_size_px),
        ] {
            if value <= 0 {
                return Err(out_of_range(field, format!("{value} <= 0")));
            }
        }
        require_finite("feet_per_square", self.feet_per_square)?;
        if self.feet_per_square <= 0.0 {
            return Err(out_of_range("feet_per_square", "must be positive"));
        }
        Ok(())
    }
}

fn to_i32(field: &'static str, value: f64) -> Result<i32, ValidationError> {
    if value.fract() != 0.0 || value < f64::from(i32::MIN) || value > f64::from(i32::MAX) {
        return Err(out_of_range(field, format!("{value} is not a 32-bit integer")));
    }
    #[allow(clippy::cast_possible_truncation)]
    Ok(value as i32)
}

fn req_i32(data: &Data, key: &'static str) -> Result<i32, ValidationError> {
    let value = opt_f64(data, key)?.ok_or(ValidationError::Missing(key))?;
    to_i32(key, value)
}

/// Parse and validate an occluder list from a payload value.
///
/// # Errors
///
/// Returns `WrongType` if the value is not a segment array, or `OutOfRange`
/// if any coordinate is not finite.
pub fn parse_occluders(value: &serde_json::Value) -> Result<Vec<Segment>, ValidationError> {
    let segments: Vec<Segment> =
        serde_json::from_value(value.clone()).map_err(|_| ValidationError::WrongType { field: "occluders" })?;
    if segments.iter().any(|s| !s.is_finite()) {
        return Err(out_of_range("occluders", "coordinates must be finite"));
    }
    Ok(segments)
}

// =============================================================================
// UNIVERSAL VTT IMPORT
// =============================================================================

/// The subset of a Universal VTT (`.dd2vtt`/`.uvtt`) file this core reads.
/// Coordinates in the file are in grid units.
#[derive(Debug, Clone, Deserialize)]
pub struct UvttFile {
    pub resolution: UvttResolution,
    #[serde(default)]
    pub line_of_sight: Vec<Vec<UvttPoint>>,
    #[serde(default)]
    pub portals: Vec<UvttPortal>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UvttResolution {
    #[serde(default)]
    pub map_origin: UvttPoint,
    pub map_size: UvttPoint,
    pub pixels_per_grid: u32,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct UvttPoint {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UvttPortal {
    pub bounds: [UvttPoint; 2],
    #[serde(default = "default_closed")]
    pub closed: bool,
}

fn default_closed() -> bool {
    true
}

impl UvttFile {
    /// # Errors
    ///
    /// Returns `WrongType` if the JSON does not match the UVTT layout.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, ValidationError> {
        let file: Self = serde_json::from_value(value.clone()).map_err(|_| ValidationError::WrongType { field: "uvtt" })?;
        if file.resolution.pixels_per_grid == 0 {
            return Err(out_of_range("pixels_per_grid", "must be positive"));
        }
        Ok(file)
    }

    fn to_px(&self, p: UvttPoint) -> Point {
        let ppg = f64::from(self.resolution.pixels_per_grid);
        let origin = self.resolution.map_origin;
        Point::new((p.x - origin.x) * ppg, (p.y - origin.y) * ppg)
    }

    /// Walls from every `line_of_sight` polyline plus every closed portal.
    #[must_use]
    pub fn occluders(&self) -> Vec<Segment> {
        let walls = self
            .line_of_sight
            .iter()
            .flat_map(|line| line.windows(2).map(|w| Segment::new(self.to_px(w[0]), self.to_px(w[1]))));
        let doors = self
            .portals
            .iter()
            .filter(|p| p.closed)
            .map(|p| Segment::new(self.to_px(p.bounds[0]), self.to_px(p.bounds[1])));
        walls.chain(doors).filter(Segment::is_finite).collect()
    }
}

#[cfg(test)]
#[path = "map_test.rs"]
mod tests;
