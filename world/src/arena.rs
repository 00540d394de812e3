//! Arena geometry: border, obstacles, dock, calibration and zones.
//!
//! The border is walked in a fixed traversal order that starts at the border
//! vertex nearest the dock. Perimeter distances, zone ordering and every
//! border-following mode share that order, so the cached [`Perimeter`] is
//! rebuilt whenever the border or the dock changes.

use mower_sim_core::{ArenaError, DVec2, Polyline, Segment, ZoneIndex, ZonePoint};

/// First wall crossed by a query segment.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WallHit {
    /// Wall that was hit.
    pub wall: Segment,
    /// Intersection point.
    pub point: DVec2,
}

/// Border vertices laid out in traversal order with cumulative lengths.
#[derive(Clone, Debug, PartialEq)]
pub struct Perimeter {
    order: Vec<usize>,
    cumulative: Vec<f64>,
    total: f64,
}

impl Perimeter {
    fn build(border: &Polyline, dock: Option<DVec2>) -> Self {
        let points = border.points();
        let count = points.len();
        if count == 0 {
            return Self {
                order: Vec::new(),
                cumulative: vec![0.0],
                total: 0.0,
            };
        }

        let origin = dock
            .and_then(|dock| border.nearest_vertex(dock))
            .unwrap_or(0);
        let backwards = dock.map_or(false, |dock| {
            let vertex = points[origin];
            let next = points[(origin + 1) % count];
            (vertex - dock).perp_dot(next - vertex) > 0.0
        });

        let order: Vec<usize> = (0..count)
            .map(|step| {
                if backwards {
                    (origin + count - step) % count
                } else {
                    (origin + step) % count
                }
            })
            .collect();

        let mut cumulative = Vec::with_capacity(count + 1);
        let mut total = 0.0;
        cumulative.push(total);
        for step in 0..count {
            let from = points[order[step]];
            let to = points[order[(step + 1) % count]];
            total += from.distance(to);
            cumulative.push(total);
        }

        Self {
            order,
            cumulative,
            total,
        }
    }

    /// Number of vertices on the perimeter.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Reports whether the perimeter has no vertices.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Total perimeter length.
    #[must_use]
    pub const fn total(&self) -> f64 {
        self.total
    }

    /// Border vertex index visited at traversal `step`.
    #[must_use]
    pub fn vertex_index(&self, step: usize) -> usize {
        if self.order.is_empty() {
            return 0;
        }
        self.order[step % self.order.len()]
    }

    /// Traversal step that visits border vertex `index`.
    #[must_use]
    pub fn step_of(&self, index: usize) -> Option<usize> {
        self.order.iter().position(|&candidate| candidate == index)
    }

    /// Traversal step following `step`.
    #[must_use]
    pub fn next_step(&self, step: usize) -> usize {
        if self.order.is_empty() {
            return 0;
        }
        (step + 1) % self.order.len()
    }

    /// Traversal step preceding `step`.
    #[must_use]
    pub fn previous_step(&self, step: usize) -> usize {
        if self.order.is_empty() {
            return 0;
        }
        (step + self.order.len() - 1) % self.order.len()
    }
}

/// The arena the mower works in.
#[derive(Clone, Debug, PartialEq)]
pub struct Arena {
    border: Polyline,
    obstacles: Vec<Polyline>,
    dock: Option<DVec2>,
    calibration: f64,
    zones: Vec<ZonePoint>,
    zone_distances: Vec<f64>,
    perimeter: Perimeter,
}

impl Arena {
    /// Creates an arena from a closed border polygon.
    ///
    /// `calibration` is the number of length units (centimetres) represented
    /// by one map unit.
    pub fn new(border: Polyline, calibration: f64) -> Result<Self, ArenaError> {
        if border.len() < 3 {
            return Err(ArenaError::BorderTooSmall {
                found: border.len(),
            });
        }
        if !border.is_closed() {
            return Err(ArenaError::BorderOpen);
        }
        validate_calibration(calibration)?;

        let perimeter = Perimeter::build(&border, None);
        Ok(Self {
            border,
            obstacles: Vec::new(),
            dock: None,
            calibration,
            zones: Vec::new(),
            zone_distances: Vec::new(),
            perimeter,
        })
    }

    /// Border polygon.
    #[must_use]
    pub fn border(&self) -> &Polyline {
        &self.border
    }

    /// Obstacle polygons.
    #[must_use]
    pub fn obstacles(&self) -> &[Polyline] {
        &self.obstacles
    }

    /// Charging dock, if one is configured.
    #[must_use]
    pub const fn dock(&self) -> Option<DVec2> {
        self.dock
    }

    /// Length units represented by one map unit.
    #[must_use]
    pub const fn calibration(&self) -> f64 {
        self.calibration
    }

    /// Perimeter traversal shared by every border-following mode.
    #[must_use]
    pub fn perimeter(&self) -> &Perimeter {
        &self.perimeter
    }

    /// Adds an obstacle polygon.
    pub fn add_obstacle(&mut self, obstacle: Polyline) -> Result<(), ArenaError> {
        if obstacle.len() < 3 {
            return Err(ArenaError::ObstacleTooSmall {
                index: self.obstacles.len(),
                found: obstacle.len(),
            });
        }
        let closed = Polyline::polygon(obstacle.points().to_vec());
        self.obstacles.push(closed);
        Ok(())
    }

    /// Builder-style variant of [`Arena::add_obstacle`].
    pub fn with_obstacle(mut self, obstacle: Polyline) -> Result<Self, ArenaError> {
        self.add_obstacle(obstacle)?;
        Ok(self)
    }

    /// Removes the obstacle at `index`.
    pub fn remove_obstacle(&mut self, index: usize) -> Option<Polyline> {
        if index < self.obstacles.len() {
            Some(self.obstacles.remove(index))
        } else {
            None
        }
    }

    /// Stores the dock position verbatim and rebuilds the perimeter.
    pub fn set_dock(&mut self, dock: Option<DVec2>) {
        self.dock = dock;
        self.rebuild_perimeter();
    }

    /// Builder-style variant of [`Arena::set_dock`].
    #[must_use]
    pub fn with_dock(mut self, dock: DVec2) -> Self {
        self.set_dock(Some(dock));
        self
    }

    /// Moves the dock onto the border vertex closest to it.
    pub fn snap_dock_to_nearest_vertex(&mut self) {
        let snapped = self
            .dock
            .and_then(|dock| self.border.nearest_vertex(dock))
            .and_then(|index| self.border.vertex(index));
        if let Some(vertex) = snapped {
            self.set_dock(Some(vertex));
        }
    }

    /// Replaces the calibration factor.
    pub fn set_calibration(&mut self, calibration: f64) -> Result<(), ArenaError> {
        validate_calibration(calibration)?;
        self.calibration = calibration;
        Ok(())
    }

    /// Calibrates from a reference line of known real length.
    pub fn calibrate_from_reference(
        &mut self,
        reference: Segment,
        real_length: f64,
    ) -> Result<(), ArenaError> {
        let map_length = reference.length();
        if map_length <= f64::EPSILON {
            return Err(ArenaError::InvalidCalibration(f64::INFINITY));
        }
        self.set_calibration(real_length / map_length)
    }

    /// Border edges followed by obstacle edges.
    pub fn walls(&self) -> impl Iterator<Item = Segment> + '_ {
        self.border
            .edges()
            .chain(self.obstacles.iter().flat_map(|obstacle| obstacle.edges()))
    }

    /// Reports whether `point` is inside the border and outside every
    /// obstacle. Points within `epsilon` of a boundary count as inside.
    #[must_use]
    pub fn contains(&self, point: DVec2, epsilon: f64) -> bool {
        let within_border =
            self.border.contains(point) || self.border.distance_to(point) <= epsilon;
        if !within_border {
            return false;
        }
        self.obstacles.iter().all(|obstacle| {
            !obstacle.contains(point) || obstacle.distance_to(point) <= epsilon
        })
    }

    /// First wall crossed by `segment`, ordered by distance from its start.
    #[must_use]
    pub fn colliding_wall(&self, segment: &Segment, epsilon: f64) -> Option<WallHit> {
        let mut best: Option<(WallHit, f64)> = None;
        for polyline in self.obstacles.iter().chain(std::iter::once(&self.border)) {
            if let Some(crossing) = polyline.first_crossing(segment, epsilon) {
                if best.map_or(true, |(_, distance)| crossing.distance < distance) {
                    best = Some((
                        WallHit {
                            wall: crossing.edge,
                            point: crossing.point,
                        },
                        crossing.distance,
                    ));
                }
            }
        }
        best.map(|(hit, _)| hit)
    }

    /// Walls passing within `radius` of `point`.
    #[must_use]
    pub fn touching_walls(&self, point: DVec2, radius: f64) -> Vec<Segment> {
        self.walls()
            .filter(|wall| wall.distance_to(point) < radius)
            .collect()
    }

    /// Index of the border vertex closest to `point`.
    #[must_use]
    pub fn nearest_border_vertex(&self, point: DVec2) -> Option<usize> {
        self.border.nearest_vertex(point)
    }

    /// Border vertex at traversal `step`.
    #[must_use]
    pub fn perimeter_vertex(&self, step: usize) -> Option<DVec2> {
        self.border.vertex(self.perimeter.vertex_index(step))
    }

    /// Closest point on the border to `point`.
    #[must_use]
    pub fn nearest_border_point(&self, point: DVec2) -> Option<DVec2> {
        self.border.nearest_point(point).map(|(closest, _)| closest)
    }

    /// Projects `point` onto the border and reports the traversal step of the
    /// edge containing the projection together with the projected point.
    #[must_use]
    pub fn locate_on_perimeter(&self, point: DVec2) -> Option<(usize, DVec2)> {
        let mut best: Option<(usize, DVec2, f64)> = None;
        for step in 0..self.perimeter.len() {
            let edge = self.perimeter_edge(step)?;
            let projected = edge.closest_point(point);
            let distance = projected.distance(point);
            if best.map_or(true, |(_, _, current)| distance < current) {
                best = Some((step, projected, distance));
            }
        }
        best.map(|(step, projected, _)| (step, projected))
    }

    /// Total border length in map units.
    #[must_use]
    pub const fn perimeter_length(&self) -> f64 {
        self.perimeter.total()
    }

    /// Distance along the perimeter, in traversal order, from the traversal
    /// origin to the projection of `point` onto the border.
    #[must_use]
    pub fn distance_on_perimeter(&self, point: DVec2) -> f64 {
        let Some((step, projected)) = self.locate_on_perimeter(point) else {
            return 0.0;
        };
        let start = self
            .perimeter_vertex(step)
            .unwrap_or(projected);
        let distance = self.perimeter.cumulative[step] + start.distance(projected);
        if distance >= self.perimeter.total() {
            distance - self.perimeter.total()
        } else {
            distance
        }
    }

    /// Border point at `distance` along the perimeter. Distances wrap around
    /// the perimeter length.
    #[must_use]
    pub fn point_at_distance(&self, distance: f64) -> Option<DVec2> {
        let total = self.perimeter.total();
        if self.perimeter.is_empty() {
            return None;
        }
        if total <= f64::EPSILON {
            return self.perimeter_vertex(0);
        }

        let wrapped = distance.rem_euclid(total);
        for step in 0..self.perimeter.len() {
            let from = self.perimeter.cumulative[step];
            let to = self.perimeter.cumulative[step + 1];
            if wrapped < to || step + 1 == self.perimeter.len() {
                let edge = self.perimeter_edge(step)?;
                return Some(edge.point_at_length((wrapped - from).min(to - from)));
            }
        }
        self.perimeter_vertex(0)
    }

    /// Zone points in ascending perimeter order.
    #[must_use]
    pub fn zone_points(&self) -> &[ZonePoint] {
        &self.zones
    }

    /// Number of zones.
    #[must_use]
    pub fn zone_count(&self) -> usize {
        self.zones.len()
    }

    /// Perimeter distance of the point closing `zone`.
    #[must_use]
    pub fn zone_distance(&self, zone: ZoneIndex) -> Option<f64> {
        self.zone_distances.get(zone.get()).copied()
    }

    /// Target share of `zone` as a fraction of one.
    #[must_use]
    pub fn zone_share(&self, zone: ZoneIndex) -> Option<f64> {
        self.zones.get(zone.get()).map(ZonePoint::share)
    }

    /// Adds a zone point, projecting it onto the border and keeping the zone
    /// list sorted by perimeter distance.
    pub fn add_zone_point(&mut self, point: ZonePoint) -> ZoneIndex {
        let projected = self.project_zone_point(point);
        self.zones.push(projected);
        self.sort_zones();
        let position = self
            .zones
            .iter()
            .position(|candidate| *candidate == projected)
            .unwrap_or(self.zones.len() - 1);
        ZoneIndex::new(position)
    }

    /// Replaces every zone point.
    pub fn set_zone_points(&mut self, points: Vec<ZonePoint>) {
        self.zones = points
            .into_iter()
            .map(|point| self.project_zone_point(point))
            .collect();
        self.sort_zones();
    }

    /// Removes the zone point nearest to `point` if it lies within `radius`.
    pub fn remove_zone_point_near(&mut self, point: DVec2, radius: f64) -> Option<ZonePoint> {
        let (index, distance) = self
            .zones
            .iter()
            .enumerate()
            .map(|(index, zone)| (index, zone.position().distance(point)))
            .min_by(|a, b| a.1.total_cmp(&b.1))?;
        if distance > radius {
            return None;
        }
        let removed = self.zones.remove(index);
        self.sort_zones();
        Some(removed)
    }

    /// Zone owning `point`.
    ///
    /// Zone `i` owns the perimeter interval `(d[i-1], d[i]]`; zone 0 also owns
    /// everything past the last zone point. Returns `None` without zones.
    #[must_use]
    pub fn zone_at(&self, point: DVec2) -> Option<ZoneIndex> {
        self.zone_for_distance(self.distance_on_perimeter(point))
    }

    /// Zone owning the perimeter distance `distance`.
    #[must_use]
    pub fn zone_for_distance(&self, distance: f64) -> Option<ZoneIndex> {
        if self.zone_distances.is_empty() {
            return None;
        }
        let index = self
            .zone_distances
            .iter()
            .position(|&boundary| distance <= boundary)
            .unwrap_or(0);
        Some(ZoneIndex::new(index))
    }

    /// Border point halfway through `zone`'s perimeter interval.
    ///
    /// The interval of zone 0 wraps through the traversal origin.
    #[must_use]
    pub fn zone_midpoint(&self, zone: ZoneIndex) -> Option<DVec2> {
        let count = self.zone_distances.len();
        let upper = *self.zone_distances.get(zone.get())?;
        let total = self.perimeter.total();
        let lower = self.zone_distances[(zone.get() + count - 1) % count];

        let middle = if count == 1 {
            upper + total / 2.0
        } else if upper < lower {
            (lower + upper + total) / 2.0
        } else {
            (lower + upper) / 2.0
        };
        let wrapped = if middle >= total { middle - total } else { middle };
        self.point_at_distance(wrapped)
    }

    /// Area of the border minus the area of every obstacle, in map units.
    #[must_use]
    pub fn mowable_area(&self) -> f64 {
        let obstacles: f64 = self.obstacles.iter().map(Polyline::area).sum();
        (self.border.area() - obstacles).max(0.0)
    }

    fn perimeter_edge(&self, step: usize) -> Option<Segment> {
        let from = self.perimeter_vertex(step)?;
        let to = self.perimeter_vertex(self.perimeter.next_step(step))?;
        Some(Segment::new(from, to))
    }

    fn project_zone_point(&self, point: ZonePoint) -> ZonePoint {
        match self.nearest_border_point(point.position()) {
            Some(projected) => point.moved_to(projected),
            None => point,
        }
    }

    fn rebuild_perimeter(&mut self) {
        self.perimeter = Perimeter::build(&self.border, self.dock);
        self.sort_zones();
    }

    fn sort_zones(&mut self) {
        let mut keyed: Vec<(f64, ZonePoint)> = self
            .zones
            .iter()
            .map(|zone| (self.distance_on_perimeter(zone.position()), *zone))
            .collect();
        keyed.sort_by(|a, b| a.0.total_cmp(&b.0));
        self.zone_distances = keyed.iter().map(|(distance, _)| *distance).collect();
        self.zones = keyed.into_iter().map(|(_, zone)| zone).collect();
    }
}

fn validate_calibration(calibration: f64) -> Result<(), ArenaError> {
    if calibration.is_finite() && calibration > 0.0 {
        Ok(())
    } else {
        Err(ArenaError::InvalidCalibration(calibration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Arena {
        Arena::new(
            Polyline::rectangle(DVec2::ZERO, DVec2::new(100.0, 100.0)),
            1.0,
        )
        .expect("valid arena")
    }

    #[test]
    fn rejects_degenerate_borders() {
        let line = Polyline::polygon(vec![DVec2::ZERO, DVec2::X]);
        assert_eq!(
            Arena::new(line, 1.0),
            Err(ArenaError::BorderTooSmall { found: 2 })
        );
        let open = Polyline::new(vec![DVec2::ZERO, DVec2::X, DVec2::ONE], false);
        assert_eq!(Arena::new(open, 1.0), Err(ArenaError::BorderOpen));
        let square = Polyline::rectangle(DVec2::ZERO, DVec2::ONE);
        assert_eq!(
            Arena::new(square, 0.0),
            Err(ArenaError::InvalidCalibration(0.0))
        );
    }

    #[test]
    fn obstacles_are_excluded_from_containment() {
        let arena = square()
            .with_obstacle(Polyline::rectangle(
                DVec2::new(40.0, 40.0),
                DVec2::new(60.0, 60.0),
            ))
            .expect("obstacle");

        assert!(arena.contains(DVec2::new(10.0, 10.0), 0.05));
        assert!(!arena.contains(DVec2::new(50.0, 50.0), 0.05));
        assert!(arena.contains(DVec2::new(40.02, 50.0), 0.05));
        assert!(!arena.contains(DVec2::new(120.0, 50.0), 0.05));
        assert!(arena.contains(DVec2::new(100.03, 50.0), 0.05));
        assert!((arena.mowable_area() - 9_600.0).abs() < 1e-9);
    }

    #[test]
    fn colliding_wall_reports_closest_hit() {
        let arena = square()
            .with_obstacle(Polyline::rectangle(
                DVec2::new(40.0, 40.0),
                DVec2::new(60.0, 60.0),
            ))
            .expect("obstacle");
        let ray = Segment::new(DVec2::new(10.0, 50.0), DVec2::new(200.0, 50.0));

        let hit = arena.colliding_wall(&ray, 0.05).expect("hit");
        assert!(hit.point.distance(DVec2::new(40.0, 50.0)) < 1e-9);
    }

    #[test]
    fn perimeter_without_dock_starts_at_first_vertex() {
        let arena = square();
        assert!((arena.perimeter_length() - 400.0).abs() < 1e-9);
        assert!((arena.distance_on_perimeter(DVec2::new(50.0, 0.0)) - 50.0).abs() < 1e-9);
        assert!((arena.distance_on_perimeter(DVec2::new(0.0, 50.0)) - 350.0).abs() < 1e-9);
    }

    #[test]
    fn dock_at_origin_keeps_forward_traversal() {
        let arena = square().with_dock(DVec2::ZERO);
        assert!((arena.distance_on_perimeter(DVec2::new(50.0, 0.0)) - 50.0).abs() < 1e-9);
        assert!((arena.distance_on_perimeter(DVec2::new(0.0, 50.0)) - 350.0).abs() < 1e-9);
    }

    #[test]
    fn dock_outside_corner_reverses_traversal() {
        let arena = square().with_dock(DVec2::new(-10.0, 10.0));
        assert_eq!(arena.perimeter().vertex_index(0), 0);
        assert_eq!(arena.perimeter().vertex_index(1), 3);
        assert!((arena.distance_on_perimeter(DVec2::new(0.0, 50.0)) - 50.0).abs() < 1e-9);
    }

    #[test]
    fn perimeter_distance_round_trips() {
        let arena = square().with_dock(DVec2::new(100.0, 40.0));
        for step in 0..40 {
            let distance = f64::from(step) * 9.75;
            let point = arena.point_at_distance(distance).expect("point");
            let recovered = arena.distance_on_perimeter(point);
            let error = (recovered - distance).abs();
            assert!(error < 1e-6 || (error - 400.0).abs() < 1e-6, "{distance} -> {recovered}");
        }
    }

    #[test]
    fn zone_points_are_projected_and_sorted() {
        let mut arena = square().with_dock(DVec2::ZERO);
        let far = arena.add_zone_point(ZonePoint::new(DVec2::new(-5.0, 50.0), 50).expect("zone"));
        let near = arena.add_zone_point(ZonePoint::new(DVec2::new(50.0, 3.0), 50).expect("zone"));

        assert_eq!(far, ZoneIndex::new(0));
        assert_eq!(near, ZoneIndex::new(0));
        let points = arena.zone_points();
        assert_eq!(points[0].position(), DVec2::new(50.0, 0.0));
        assert_eq!(points[1].position(), DVec2::new(0.0, 50.0));
        assert!((arena.zone_distance(ZoneIndex::new(1)).expect("distance") - 350.0).abs() < 1e-9);
    }

    #[test]
    fn zones_own_half_open_intervals() {
        let mut arena = square();
        arena.set_zone_points(vec![
            ZonePoint::new(DVec2::new(50.0, 0.0), 50).expect("zone"),
            ZonePoint::new(DVec2::new(100.0, 100.0), 50).expect("zone"),
        ]);

        assert_eq!(arena.zone_at(DVec2::new(20.0, 0.0)), Some(ZoneIndex::new(0)));
        assert_eq!(arena.zone_at(DVec2::new(50.0, 0.0)), Some(ZoneIndex::new(0)));
        assert_eq!(arena.zone_at(DVec2::new(100.0, 25.0)), Some(ZoneIndex::new(1)));
        assert_eq!(arena.zone_at(DVec2::new(0.0, 60.0)), Some(ZoneIndex::new(0)));
        assert_eq!(square().zone_at(DVec2::new(20.0, 0.0)), None);
    }

    #[test]
    fn zone_midpoint_wraps_through_origin() {
        let mut arena = square();
        arena.set_zone_points(vec![
            ZonePoint::new(DVec2::new(50.0, 0.0), 50).expect("zone"),
            ZonePoint::new(DVec2::new(100.0, 100.0), 50).expect("zone"),
        ]);

        let second = arena.zone_midpoint(ZoneIndex::new(1)).expect("midpoint");
        assert!(second.distance(DVec2::new(100.0, 25.0)) < 1e-9);
        let first = arena.zone_midpoint(ZoneIndex::new(0)).expect("midpoint");
        assert!(first.distance(DVec2::new(0.0, 75.0)) < 1e-9);
    }

    #[test]
    fn remove_zone_point_respects_radius() {
        let mut arena = square();
        let _ = arena.add_zone_point(ZonePoint::new(DVec2::new(50.0, 0.0), 40).expect("zone"));
        assert!(arena.remove_zone_point_near(DVec2::new(70.0, 0.0), 10.0).is_none());
        let removed = arena
            .remove_zone_point_near(DVec2::new(52.0, 1.0), 10.0)
            .expect("removed");
        assert_eq!(removed.percentage(), 40);
        assert_eq!(arena.zone_count(), 0);
    }

    #[test]
    fn dock_snaps_to_nearest_vertex() {
        let mut arena = square().with_dock(DVec2::new(95.0, 92.0));
        arena.snap_dock_to_nearest_vertex();
        assert_eq!(arena.dock(), Some(DVec2::new(100.0, 100.0)));
    }

    #[test]
    fn calibration_from_reference_line() {
        let mut arena = square();
        arena
            .calibrate_from_reference(Segment::new(DVec2::ZERO, DVec2::new(0.0, 50.0)), 500.0)
            .expect("calibration");
        assert!((arena.calibration() - 10.0).abs() < 1e-12);
    }
}
