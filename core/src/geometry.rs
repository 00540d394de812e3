//! Planar geometry used by the arena and the mower navigation.
//!
//! Points are plain [`DVec2`] values expressed in map units. Segments and
//! polylines are immutable value types; every query is a pure function of its
//! inputs so callers can reason about them without touching world state.

use glam::DVec2;
use serde::{Deserialize, Serialize};

/// Tolerance applied to the intersection parameters so that crossings exactly
/// at an endpoint survive floating point rounding.
const INTERSECTION_SLACK: f64 = 1e-9;

/// Directed straight segment between two points.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    start: DVec2,
    end: DVec2,
}

impl Segment {
    /// Creates a segment running from `start` to `end`.
    #[must_use]
    pub const fn new(start: DVec2, end: DVec2) -> Self {
        Self { start, end }
    }

    /// Creates a zero-length segment anchored at `point`.
    #[must_use]
    pub const fn stationary(point: DVec2) -> Self {
        Self {
            start: point,
            end: point,
        }
    }

    /// Point where the segment begins.
    #[must_use]
    pub const fn start(&self) -> DVec2 {
        self.start
    }

    /// Point where the segment ends.
    #[must_use]
    pub const fn end(&self) -> DVec2 {
        self.end
    }

    /// Euclidean length of the segment.
    #[must_use]
    pub fn length(&self) -> f64 {
        self.start.distance(self.end)
    }

    /// Vector from the start to the end of the segment.
    #[must_use]
    pub fn delta(&self) -> DVec2 {
        self.end - self.start
    }

    /// Unit direction of travel, or zero for degenerate segments.
    #[must_use]
    pub fn direction(&self) -> DVec2 {
        self.delta().normalize_or_zero()
    }

    /// Midpoint of the segment.
    #[must_use]
    pub fn midpoint(&self) -> DVec2 {
        (self.start + self.end) * 0.5
    }

    /// Parameter of the orthogonal projection of `point` onto the carrying
    /// line, where `0` maps to the start and `1` to the end.
    ///
    /// Returns `None` for degenerate segments.
    #[must_use]
    pub fn projection_parameter(&self, point: DVec2) -> Option<f64> {
        let delta = self.delta();
        let length_squared = delta.length_squared();
        if length_squared <= f64::EPSILON {
            return None;
        }
        Some((point - self.start).dot(delta) / length_squared)
    }

    /// Closest point on the segment to `point`.
    #[must_use]
    pub fn closest_point(&self, point: DVec2) -> DVec2 {
        match self.projection_parameter(point) {
            Some(t) => self.start + self.delta() * t.clamp(0.0, 1.0),
            None => self.start,
        }
    }

    /// Distance from `point` to the nearest point on the segment.
    #[must_use]
    pub fn distance_to(&self, point: DVec2) -> f64 {
        self.closest_point(point).distance(point)
    }

    /// Point located `length` units from the start along the segment
    /// direction. The result may lie beyond the end.
    #[must_use]
    pub fn point_at_length(&self, length: f64) -> DVec2 {
        self.start + self.direction() * length
    }

    /// Intersection point of two segments.
    ///
    /// The carrying lines are intersected and the candidate is accepted when
    /// it lies within `tolerance` of both segments. Parallel and degenerate
    /// segments never intersect.
    #[must_use]
    pub fn intersection(&self, other: &Segment, tolerance: f64) -> Option<DVec2> {
        let r = self.delta();
        let s = other.delta();
        let denominator = r.perp_dot(s);
        if denominator.abs() <= f64::EPSILON * r.length() * s.length() {
            return None;
        }

        let offset = other.start - self.start;
        let t = offset.perp_dot(s) / denominator;
        let candidate = self.start + r * t;

        let reach = tolerance.max(0.0) + INTERSECTION_SLACK;
        if self.distance_to(candidate) <= reach && other.distance_to(candidate) <= reach {
            Some(candidate)
        } else {
            None
        }
    }
}

/// Where a query segment first meets a polyline.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Crossing {
    /// Polyline edge that was crossed.
    pub edge: Segment,
    /// Index of the crossed edge within the polyline.
    pub edge_index: usize,
    /// Intersection point.
    pub point: DVec2,
    /// Distance from the start of the query segment to the intersection.
    pub distance: f64,
}

/// Ordered sequence of points, optionally closed into a polygon.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Polyline {
    points: Vec<DVec2>,
    closed: bool,
}

impl Polyline {
    /// Creates a polyline from the provided points.
    #[must_use]
    pub fn new(points: Vec<DVec2>, closed: bool) -> Self {
        Self { points, closed }
    }

    /// Creates a closed polygon from the provided points.
    #[must_use]
    pub fn polygon(points: Vec<DVec2>) -> Self {
        Self::new(points, true)
    }

    /// Creates a closed axis-aligned rectangle spanning `min` to `max`.
    #[must_use]
    pub fn rectangle(min: DVec2, max: DVec2) -> Self {
        Self::polygon(vec![
            min,
            DVec2::new(max.x, min.y),
            max,
            DVec2::new(min.x, max.y),
        ])
    }

    /// Vertices of the polyline in insertion order.
    #[must_use]
    pub fn points(&self) -> &[DVec2] {
        &self.points
    }

    /// Reports whether the last vertex connects back to the first.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of vertices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Reports whether the polyline has no vertices.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Vertex at `index`, wrapping around the vertex count.
    #[must_use]
    pub fn vertex(&self, index: usize) -> Option<DVec2> {
        if self.points.is_empty() {
            return None;
        }
        Some(self.points[index % self.points.len()])
    }

    /// Number of edges, counting the closing edge of closed polylines.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        match self.points.len() {
            0 | 1 => 0,
            n if self.closed => n,
            n => n - 1,
        }
    }

    /// Edge starting at vertex `index`.
    #[must_use]
    pub fn edge(&self, index: usize) -> Option<Segment> {
        if index >= self.edge_count() {
            return None;
        }
        let next = (index + 1) % self.points.len();
        Some(Segment::new(self.points[index], self.points[next]))
    }

    /// Iterates over every edge of the polyline.
    pub fn edges(&self) -> impl Iterator<Item = Segment> + '_ {
        (0..self.edge_count()).filter_map(move |index| self.edge(index))
    }

    /// Even-odd point-in-polygon test. Open polylines contain nothing.
    #[must_use]
    pub fn contains(&self, point: DVec2) -> bool {
        let count = self.points.len();
        if !self.closed || count < 3 {
            return false;
        }

        let mut inside = false;
        let mut previous = self.points[count - 1];
        for &current in &self.points {
            if (current.y > point.y) != (previous.y > point.y) {
                let crossing_x = (previous.x - current.x) * (point.y - current.y)
                    / (previous.y - current.y)
                    + current.x;
                if point.x < crossing_x {
                    inside = !inside;
                }
            }
            previous = current;
        }
        inside
    }

    /// Minimum distance from `point` to any edge.
    #[must_use]
    pub fn distance_to(&self, point: DVec2) -> f64 {
        if self.edge_count() == 0 {
            return self
                .points
                .first()
                .map_or(f64::INFINITY, |vertex| vertex.distance(point));
        }
        self.edges()
            .map(|edge| edge.distance_to(point))
            .fold(f64::INFINITY, f64::min)
    }

    /// Closest point on the polyline together with the index of its edge.
    #[must_use]
    pub fn nearest_point(&self, point: DVec2) -> Option<(DVec2, usize)> {
        let mut best: Option<(DVec2, usize, f64)> = None;
        for (index, edge) in self.edges().enumerate() {
            let candidate = edge.closest_point(point);
            let distance = candidate.distance(point);
            if best.map_or(true, |(_, _, current)| distance < current) {
                best = Some((candidate, index, distance));
            }
        }
        best.map(|(candidate, index, _)| (candidate, index))
    }

    /// Index of the vertex closest to `point`; ties keep the lowest index.
    #[must_use]
    pub fn nearest_vertex(&self, point: DVec2) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (index, vertex) in self.points.iter().enumerate() {
            let distance = vertex.distance(point);
            if best.map_or(true, |(_, current)| distance < current) {
                best = Some((index, distance));
            }
        }
        best.map(|(index, _)| index)
    }

    /// First crossing of `segment` with any edge, ordered by distance from the
    /// segment start.
    #[must_use]
    pub fn first_crossing(&self, segment: &Segment, tolerance: f64) -> Option<Crossing> {
        let mut best: Option<Crossing> = None;
        for (edge_index, edge) in self.edges().enumerate() {
            let Some(point) = segment.intersection(&edge, tolerance) else {
                continue;
            };
            let distance = segment.start().distance(point);
            if best.map_or(true, |current| distance < current.distance) {
                best = Some(Crossing {
                    edge,
                    edge_index,
                    point,
                    distance,
                });
            }
        }
        best
    }

    /// Unsigned polygon area computed with the shoelace formula, 0 when open.
    #[must_use]
    pub fn area(&self) -> f64 {
        if !self.closed || self.points.len() < 3 {
            return 0.0;
        }
        let mut twice_area = 0.0;
        let mut previous = self.points[self.points.len() - 1];
        for &current in &self.points {
            twice_area += previous.perp_dot(current);
            previous = current;
        }
        (twice_area * 0.5).abs()
    }

    /// Total length of all edges.
    #[must_use]
    pub fn length(&self) -> f64 {
        self.edges().map(|edge| edge.length()).sum()
    }

    /// Axis-aligned bounds as `(min, max)` corners.
    #[must_use]
    pub fn bounds(&self) -> Option<(DVec2, DVec2)> {
        let first = *self.points.first()?;
        Some(
            self.points
                .iter()
                .fold((first, first), |(min, max), &point| {
                    (min.min(point), max.max(point))
                }),
        )
    }
}

/// Rotates `vector` counter-clockwise by `radians`.
#[must_use]
pub fn rotate(vector: DVec2, radians: f64) -> DVec2 {
    let (sin, cos) = radians.sin_cos();
    DVec2::new(vector.x * cos - vector.y * sin, vector.x * sin + vector.y * cos)
}

/// Unit vector pointing along `radians`.
#[must_use]
pub fn heading(radians: f64) -> DVec2 {
    let (sin, cos) = radians.sin_cos();
    DVec2::new(cos, sin)
}
