//! Plane geometry in map pixel space.
//!
//! DESIGN
//! ======
//! Small `Copy` value types with `f64` coordinates. The visibility engine,
//! the fog mask renderer, and the repository all share these shapes, so
//! serde derives mirror the wire/JSONB layout (`{x1,y1,x2,y2}` for segments).

use serde::{Deserialize, Serialize};

/// Below this magnitude a ray and a segment are treated as parallel.
const PARALLEL_EPSILON: f64 = 1e-12;
/// Hits closer than this are the origin touching the segment itself.
const ORIGIN_EPSILON: f64 = 1e-9;

// =============================================================================
// POINT
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    #[must_use]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    #[must_use]
    pub fn distance(self, other: Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    /// Angle of `other` as seen from `self`, normalized to `[0, 2π)`.
    #[must_use]
    pub fn angle_to(self, other: Point) -> f64 {
        normalize_angle((other.y - self.y).atan2(other.x - self.x))
    }

    /// Point reached by travelling `distance` along `angle`.
    #[must_use]
    pub fn project(self, angle: f64, distance: f64) -> Point {
        Point::new(self.x + angle.cos() * distance, self.y + angle.sin() * distance)
    }

    #[must_use]
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Normalize an angle in radians to `[0, 2π)`.
#[must_use]
pub fn normalize_angle(angle: f64) -> f64 {
    let tau = std::f64::consts::TAU;
    let a = angle.rem_euclid(tau);
    // rem_euclid can round up to exactly tau for tiny negative inputs.
    if a >= tau { 0.0 } else { a }
}

// =============================================================================
// SEGMENT
// =============================================================================

/// An occluder: a wall or closed door between two points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl Segment {
    #[must_use]
    pub fn new(a: Point, b: Point) -> Self {
        Self { x1: a.x, y1: a.y, x2: b.x, y2: b.y }
    }

    #[must_use]
    pub fn start(&self) -> Point {
        Point::new(self.x1, self.y1)
    }

    #[must_use]
    pub fn end(&self) -> Point {
        Point::new(self.x2, self.y2)
    }

    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.start().is_finite() && self.end().is_finite()
    }

    /// Shortest distance from `p` to any point on the segment.
    #[must_use]
    pub fn distance_to(&self, p: Point) -> f64 {
        let (ex, ey) = (self.x2 - self.x1, self.y2 - self.y1);
        let len_sq = ex * ex + ey * ey;
        if len_sq == 0.0 {
            return p.distance(self.start());
        }
        let t = (((p.x - self.x1) * ex + (p.y - self.y1) * ey) / len_sq).clamp(0.0, 1.0);
        p.distance(Point::new(self.x1 + ex * t, self.y1 + ey * t))
    }

    /// Distance along the ray `origin + t * (cos θ, sin θ)` to this segment,
    /// or `None` if the ray misses it. An origin lying on the segment does
    /// not block its own rays.
    #[must_use]
    pub fn ray_hit(&self, origin: Point, angle: f64) -> Option<f64> {
        let (dx, dy) = (angle.cos(), angle.sin());
        let (ex, ey) = (self.x2 - self.x1, self.y2 - self.y1);
        let denom = dx * ey - dy * ex;
        if denom.abs() < PARALLEL_EPSILON {
            return None;
        }
        let (wx, wy) = (self.x1 - origin.x, self.y1 - origin.y);
        let t = (wx * ey - wy * ex) / denom;
        let u = (wx * dy - wy * dx) / denom;
        (t > ORIGIN_EPSILON && (0.0..=1.0).contains(&u)).then_some(t)
    }

    /// Points where the segment crosses the circle boundary.
    #[must_use]
    pub fn circle_crossings(&self, center: Point, radius: f64) -> Vec<Point> {
        let (ex, ey) = (self.x2 - self.x1, self.y2 - self.y1);
        let (fx, fy) = (self.x1 - center.x, self.y1 - center.y);
        let a = ex * ex + ey * ey;
        if a == 0.0 {
            return Vec::new();
        }
        let b = 2.0 * (fx * ex + fy * ey);
        let c = fx * fx + fy * fy - radius * radius;
        let disc = b * b - 4.0 * a * c;
        if disc < 0.0 {
            return Vec::new();
        }
        let root = disc.sqrt();
        [(-b - root) / (2.0 * a), (-b + root) / (2.0 * a)]
            .into_iter()
            .filter(|t| (0.0..=1.0).contains(t))
            .map(|t| Point::new(self.x1 + ex * t, self.y1 + ey * t))
            .collect()
    }
}

// =============================================================================
// RECT / CIRCLE
// =============================================================================

/// Axis-aligned rectangle anchored at its top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    #[must_use]
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    #[must_use]
    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.x && p.x <= self.x + self.width && p.y >= self.y && p.y <= self.y + self.height
    }

    /// Nearest point inside the rectangle.
    #[must_use]
    pub fn clamp(&self, p: Point) -> Point {
        Point::new(
            p.x.clamp(self.x, self.x + self.width.max(0.0)),
            p.y.clamp(self.y, self.y + self.height.max(0.0)),
        )
    }

    #[must_use]
    pub fn diagonal(&self) -> f64 {
        self.width.hypot(self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Circle {
    pub cx: f64,
    pub cy: f64,
    pub radius: f64,
}

impl Circle {
    #[must_use]
    pub fn new(cx: f64, cy: f64, radius: f64) -> Self {
        Self { cx, cy, radius }
    }

    #[must_use]
    pub fn center(&self) -> Point {
        Point::new(self.cx, self.cy)
    }

    #[must_use]
    pub fn contains(&self, p: Point) -> bool {
        self.center().distance(p) <= self.radius
    }

    #[must_use]
    pub fn bounding_rect(&self) -> Rect {
        Rect::new(self.cx - self.radius, self.cy - self.radius, self.radius * 2.0, self.radius * 2.0)
    }
}

// =============================================================================
// POLYGON
// =============================================================================

/// Ordered vertex list. A single vertex is a valid degenerate polygon.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Polygon {
    pub vertices: Vec<Point>,
}

impl Polygon {
    #[must_use]
    pub fn new(vertices: Vec<Point>) -> Self {
        Self { vertices }
    }

    #[must_use]
    pub fn point(p: Point) -> Self {
        Self { vertices: vec![p] }
    }

    #[must_use]
    pub fn is_degenerate(&self) -> bool {
        self.vertices.len() < 3
    }

    /// Even-odd point-in-polygon test. Degenerate polygons contain nothing.
    #[must_use]
    pub fn contains(&self, p: Point) -> bool {
        if self.is_degenerate() {
            return false;
        }
        let mut inside = false;
        let mut j = self.vertices.len() - 1;
        for (i, vi) in self.vertices.iter().enumerate() {
            let vj = self.vertices[j];
            if (vi.y > p.y) != (vj.y > p.y) {
                let x_cross = (vj.x - vi.x) * (p.y - vi.y) / (vj.y - vi.y) + vi.x;
                if p.x < x_cross {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }
}

#[cfg(test)]
#[path = "geometry_test.rs"]
mod tests;
