//! Opaque fog mask for the player surface.
//!
//! The map is divided into square cells; a cell is visible when its center
//! lies in any revealed area or any supplied visibility polygon. Rows are
//! concatenated and run-length encoded as alternating hidden/visible counts,
//! always starting with a (possibly zero) hidden run. Nothing but the cell
//! grid leaves this module: no areas, radii or wall coordinates.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::geometry::{Point, Polygon, Rect};
use crate::model::RevealedArea;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FogMask {
    pub cell_px: u32,
    pub cols: u32,
    pub rows: u32,
    pub runs: Vec<u32>,
}

/// What the player surface receives in a `fog-update`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum PlayerFog {
    /// Fog is off; the whole map is visible.
    Disabled,
    Masked(FogMask),
}

struct Shape<'a> {
    bbox: Rect,
    polygon: &'a Polygon,
}

fn polygon_bbox(polygon: &Polygon) -> Option<Rect> {
    let first = polygon.vertices.first()?;
    let (mut min, mut max) = (*first, *first);
    for v in &polygon.vertices {
        min = Point::new(min.x.min(v.x), min.y.min(v.y));
        max = Point::new(max.x.max(v.x), max.y.max(v.y));
    }
    Some(Rect::new(min.x, min.y, max.x - min.x, max.y - min.y))
}

impl FogMask {
    /// Rasterize the union of `revealed` and `polygons` over a
    /// `width_px` × `height_px` map.
    #[must_use]
    pub fn render(width_px: u32, height_px: u32, cell_px: u32, revealed: &[RevealedArea], polygons: &[&Polygon]) -> Self {
        let cell_px = cell_px.max(1);
        let cols = width_px.div_ceil(cell_px);
        let rows = height_px.div_ceil(cell_px);
        let shapes: Vec<Shape<'_>> = polygons
            .iter()
            .filter(|p| !p.is_degenerate())
            .filter_map(|p| polygon_bbox(p).map(|bbox| Shape { bbox, polygon: p }))
            .collect();

        let cell = f64::from(cell_px);
        let bits: Vec<bool> = (0..rows)
            .into_par_iter()
            .flat_map_iter(|row| {
                let shapes = &shapes;
                (0..cols).map(move |col| {
                    let center = Point::new((f64::from(col) + 0.5) * cell, (f64::from(row) + 0.5) * cell);
                    revealed.iter().any(|a| a.contains(center))
                        || shapes.iter().any(|s| s.bbox.contains(center) && s.polygon.contains(center))
                })
            })
            .collect();

        Self { cell_px, cols, rows, runs: encode_runs(&bits) }
    }

    /// Expand back into one flag per cell, row-major.
    #[must_use]
    pub fn decode(&self) -> Vec<bool> {
        let mut out = Vec::with_capacity((self.cols as usize) * (self.rows as usize));
        let mut visible = false;
        for &run in &self.runs {
            out.extend(std::iter::repeat_n(visible, run as usize));
            visible = !visible;
        }
        out
    }

    #[must_use]
    pub fn is_visible(&self, col: u32, row: u32) -> bool {
        if col >= self.cols || row >= self.rows {
            return false;
        }
        let index = u64::from(row) * u64::from(self.cols) + u64::from(col);
        let mut seen = 0u64;
        let mut visible = false;
        for &run in &self.runs {
            seen += u64::from(run);
            if index < seen {
                return visible;
            }
            visible = !visible;
        }
        false
    }
}

fn encode_runs(bits: &[bool]) -> Vec<u32> {
    let mut runs = Vec::new();
    let mut current = false;
    let mut count = 0u32;
    for &bit in bits {
        if bit == current {
            count += 1;
        } else {
            runs.push(count);
            current = bit;
            count = 1;
        }
    }
    runs.push(count);
    runs
}

#[cfg(test)]
#[path = "mask_test.rs"]
mod tests;
