//! Fog of war: revealed-area records and the derived per-map fog state.
//!
//! A circular reveal is persisted as its bounding rectangle tagged
//! `circle`; the center is the rectangle's center and the radius half its
//! width, so the true shape survives storage.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ValidationError, out_of_range, require_finite, require_non_negative};
use crate::geometry::{Circle, Point, Rect};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevealShape {
    #[default]
    Rect,
    Circle,
}

impl RevealShape {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rect => "rect",
            Self::Circle => "circle",
        }
    }
}

impl FromStr for RevealShape {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rect" => Ok(Self::Rect),
            "circle" => Ok(Self::Circle),
            other => Err(ValidationError::UnknownVariant { field: "shape", value: other.to_string() }),
        }
    }
}

/// Mirrors the `fog_revealed_areas` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevealedArea {
    pub id: Uuid,
    pub map_id: Uuid,
    pub shape: RevealShape,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl RevealedArea {
    #[must_use]
    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }

    /// The recovered circle, for circle-tagged areas.
    #[must_use]
    pub fn circle(&self) -> Option<Circle> {
        (self.shape == RevealShape::Circle).then(|| {
            let r = self.width / 2.0;
            Circle::new(self.x + r, self.y + r, r)
        })
    }

    /// Whether `p` lies in the revealed region, honouring the true shape.
    #[must_use]
    pub fn contains(&self, p: Point) -> bool {
        match self.circle() {
            Some(c) => c.contains(p),
            None => self.rect().contains(p),
        }
    }
}

/// A reveal before it is assigned an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRevealedArea {
    pub map_id: Uuid,
    pub shape: RevealShape,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl NewRevealedArea {
    #[must_use]
    pub fn rect(map_id: Uuid, rect: Rect) -> Self {
        Self { map_id, shape: RevealShape::Rect, x: rect.x, y: rect.y, width: rect.width, height: rect.height }
    }

    #[must_use]
    pub fn circle(map_id: Uuid, circle: Circle) -> Self {
        let b = circle.bounding_rect();
        Self { map_id, shape: RevealShape::Circle, x: b.x, y: b.y, width: b.width, height: b.height }
    }

    /// # Errors
    ///
    /// Returns `OutOfRange` for non-finite coordinates, negative extents,
    /// or a circle whose box is not square.
    pub fn validate(&self) -> Result<(), ValidationError> {
        require_finite("x", self.x)?;
        require_finite("y", self.y)?;
        require_non_negative("width", self.width)?;
        require_non_negative("height", self.height)?;
        if self.shape == RevealShape::Circle && (self.width - self.height).abs() > f64::EPSILON * self.width.max(1.0) {
            return Err(out_of_range("height", "circle bounds must be square"));
        }
        Ok(())
    }
}

/// Derived: the map's `fog_enabled` column plus its revealed areas.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FogState {
    pub map_id: Uuid,
    pub fog_enabled: bool,
    pub revealed_areas: Vec<RevealedArea>,
}

impl FogState {
    #[must_use]
    pub fn is_revealed(&self, p: Point) -> bool {
        self.revealed_areas.iter().any(|a| a.contains(p))
    }
}

#[cfg(test)]
#[path = "fog_test.rs"]
mod tests;
