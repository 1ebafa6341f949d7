//! Visibility polygon computation.
//!
//! DESIGN
//! ======
//! Pure functions only. Given an origin, a maximum distance and the map's
//! occluder segments, cast rays toward every relevant endpoint (plus a pair
//! of rays a hair to either side), toward the points where walls cross the
//! range circle, and at evenly spaced boundary angles. Each ray stops at the
//! nearest wall or at the range circle. Sorting the hits by angle yields the
//! polygon. Identical inputs always give identical output, so batches can be
//! fanned out across threads with no shared state.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geometry::{Point, Polygon, Rect, Segment, normalize_angle};

/// Angular offset of the two extra rays cast beside each endpoint.
pub const GRAZE_EPSILON: f64 = 1e-4;

/// Consecutive vertices closer than this collapse into one.
const DEDUP_EPSILON: f64 = 1e-9;

pub const DEFAULT_CIRCLE_SEGMENTS: usize = 64;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum EmitterId {
    Token(Uuid),
    Light(Uuid),
}

/// One emitter resolved to pixel space, ready to compute.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmitterSpec {
    pub id: EmitterId,
    pub origin: Point,
    /// Outer range: vision range for tokens, dim radius for lights.
    pub range_px: f64,
    /// Inner bright radius, lights only.
    pub bright_px: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Visibility {
    pub emitter: EmitterId,
    pub polygon: Polygon,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bright: Option<Polygon>,
}

// =============================================================================
// SINGLE EMITTER
// =============================================================================

/// Visibility polygon for one origin.
///
/// A non-positive (or non-finite) range degenerates to the origin itself.
#[must_use]
pub fn compute_visibility(origin: Point, max_distance: f64, occluders: &[Segment], circle_segments: usize) -> Polygon {
    if !origin.is_finite() || !max_distance.is_finite() || max_distance <= 0.0 {
        return Polygon::point(origin);
    }

    let relevant: Vec<&Segment> = occluders
        .iter()
        .filter(|s| s.is_finite() && s.start() != s.end() && s.distance_to(origin) <= max_distance)
        .collect();

    let mut angles = Vec::with_capacity(relevant.len() * 6 + circle_segments);
    let mut aim = |target: Point| {
        if target == origin {
            return;
        }
        let a = origin.angle_to(target);
        angles.extend([normalize_angle(a - GRAZE_EPSILON), a, normalize_angle(a + GRAZE_EPSILON)]);
    };
    for seg in &relevant {
        for end in [seg.start(), seg.end()] {
            if origin.distance(end) <= max_distance {
                aim(end);
            }
        }
        for crossing in seg.circle_crossings(origin, max_distance) {
            aim(crossing);
        }
    }
    let steps = circle_segments.max(3);
    #[allow(clippy::cast_precision_loss)]
    angles.extend((0..steps).map(|i| std::f64::consts::TAU * i as f64 / steps as f64));

    let mut hits: Vec<(f64, f64)> = angles
        .into_iter()
        .map(|angle| {
            let dist = relevant
                .iter()
                .filter_map(|s| s.ray_hit(origin, angle))
                .fold(max_distance, f64::min);
            (angle, dist)
        })
        .collect();
    hits.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));

    let mut vertices: Vec<Point> = Vec::with_capacity(hits.len());
    for (angle, dist) in hits {
        let p = origin.project(angle, dist);
        if vertices.last().is_some_and(|last| last.distance(p) < DEDUP_EPSILON) {
            continue;
        }
        vertices.push(p);
    }
    if vertices.len() > 1 && vertices[0].distance(vertices[vertices.len() - 1]) < DEDUP_EPSILON {
        vertices.pop();
    }
    Polygon::new(vertices)
}

/// Compute one emitter, clamping an off-map origin back onto the map.
#[must_use]
pub fn compute_emitter(spec: &EmitterSpec, bounds: Rect, occluders: &[Segment], circle_segments: usize) -> Visibility {
    let origin = if bounds.contains(spec.origin) { spec.origin } else { bounds.clamp(spec.origin) };
    Visibility {
        emitter: spec.id,
        polygon: compute_visibility(origin, spec.range_px, occluders, circle_segments),
        bright: spec.bright_px.map(|r| compute_visibility(origin, r, occluders, circle_segments)),
    }
}

/// Compute a batch in parallel. Output order follows input order.
#[must_use]
pub fn compute_batch(
    specs: &[EmitterSpec],
    bounds: Rect,
    occluders: &[Segment],
    circle_segments: usize,
) -> Vec<Visibility> {
    specs.par_iter().map(|spec| compute_emitter(spec, bounds, occluders, circle_segments)).collect()
}

#[cfg(test)]
#[path = "visibility_test.rs"]
mod tests;
