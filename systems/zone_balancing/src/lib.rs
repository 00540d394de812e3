#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Zone-balancing system that reroutes the mower towards under-served zones.
//!
//! The system observes collision and movement events, accumulates a per-zone
//! statistic and, when the configured policy decides a zone is starved,
//! answers with a [`Command::BeginZoneTransition`] aimed at the middle of
//! that zone's perimeter interval.

use mower_sim_core::{
    Command, DVec2, Event, MowerMode, PolicyKind, ZoneIndex, ZoneMetric, ZoneStatEntry,
    ZoneStatistics,
};
use mower_sim_world::Arena;

/// Thresholds used by the blended policies.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BlendedThresholds {
    /// Accumulated total required before any evaluation.
    pub minimum_samples: f64,
    /// Accumulation required since the previous transition.
    pub dwell: f64,
    /// Deficit above which the beneficiary is always visited.
    pub critical_deficit: f64,
    /// Surplus of the current zone required for an opportunistic transition.
    pub exit_surplus: f64,
    /// Fraction of the perimeter within which the beneficiary counts as close.
    pub opportunistic_fraction: f64,
    /// Observation credited to the beneficiary when a transition starts.
    pub transition_credit: f64,
}

impl BlendedThresholds {
    /// Thresholds for collision counting.
    pub const COLLISIONS: Self = Self {
        minimum_samples: 21.0,
        dwell: 15.0,
        critical_deficit: 0.08,
        exit_surplus: 0.05,
        opportunistic_fraction: 0.25,
        transition_credit: 1.0,
    };

    /// Thresholds for distance accounting, in length units.
    pub const DISTANCE: Self = Self {
        minimum_samples: 1_000.0,
        dwell: 5_000.0,
        critical_deficit: 0.08,
        exit_surplus: 0.05,
        opportunistic_fraction: 0.25,
        transition_credit: 0.0,
    };
}

/// Configuration parameters required to construct the zone-balancing system.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Config {
    kind: PolicyKind,
    reroute_interval: u64,
    thresholds: BlendedThresholds,
}

impl Config {
    /// Creates a configuration with the default thresholds of `kind`.
    #[must_use]
    pub const fn new(kind: PolicyKind) -> Self {
        let thresholds = match kind {
            PolicyKind::BlendedDistance => BlendedThresholds::DISTANCE,
            _ => BlendedThresholds::COLLISIONS,
        };
        Self {
            kind,
            reroute_interval: 20,
            thresholds,
        }
    }

    /// Replaces the blended thresholds.
    #[must_use]
    pub const fn with_thresholds(mut self, thresholds: BlendedThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Replaces the collision period of the counting policy.
    #[must_use]
    pub const fn with_reroute_interval(mut self, interval: u64) -> Self {
        self.reroute_interval = interval;
        self
    }

    /// Policy the configuration selects.
    #[must_use]
    pub const fn kind(&self) -> PolicyKind {
        self.kind
    }
}

/// Pure system that balances mowing effort across zones.
#[derive(Clone, Debug)]
pub struct ZoneBalancing {
    config: Config,
    accumulated: Vec<f64>,
    last_transition_total: f64,
}

impl ZoneBalancing {
    /// Creates a new zone-balancing system using the supplied configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            accumulated: Vec::new(),
            last_transition_total: 0.0,
        }
    }

    /// Policy in effect.
    #[must_use]
    pub const fn kind(&self) -> PolicyKind {
        self.config.kind
    }

    /// Clears every accumulated statistic.
    pub fn reset(&mut self) {
        self.accumulated.clear();
        self.last_transition_total = 0.0;
    }

    /// Consumes world events and emits zone transition commands.
    ///
    /// At most one transition is requested per batch.
    pub fn handle(&mut self, events: &[Event], arena: &Arena, out: &mut Vec<Command>) {
        let metric = self.config.kind.metric();
        let mut rerouted = false;

        for event in events {
            match event {
                Event::RunStarted { .. } => {
                    self.reset();
                    rerouted = false;
                }
                Event::Collision { point, mode } => {
                    let Some(zone) = arena.zone_at(*point) else {
                        continue;
                    };
                    if metric == ZoneMetric::Collisions {
                        self.credit(zone, 1.0);
                    }
                    if rerouted || *mode != MowerMode::Mowing {
                        continue;
                    }
                    if let Some(command) = self.evaluate(arena, zone, *point) {
                        out.push(command);
                        rerouted = true;
                    }
                }
                Event::ZoneTransitionStarted { zone, .. } => {
                    self.last_transition_total = self.total();
                    self.credit(*zone, self.config.thresholds.transition_credit);
                }
                Event::MowerMoved { from, to, distance } if metric == ZoneMetric::Distance => {
                    self.credit_move(arena, *from, *to, *distance);
                }
                _ => {}
            }
        }
    }

    /// Per-zone statistics for status displays.
    #[must_use]
    pub fn statistics(&self, arena: &Arena) -> ZoneStatistics {
        let total = self.total();
        let entries = arena
            .zone_points()
            .iter()
            .enumerate()
            .map(|(index, point)| {
                let value = self.accumulated.get(index).copied().unwrap_or(0.0);
                ZoneStatEntry {
                    zone: ZoneIndex::new(index),
                    value,
                    actual_share: if total > 0.0 { value / total } else { 0.0 },
                    target_share: point.share(),
                }
            })
            .collect();
        ZoneStatistics {
            metric: self.config.kind.metric(),
            entries,
        }
    }

    /// Requests a transition. Credit and dwell are settled once the world
    /// reports the transition as started.
    fn evaluate(&self, arena: &Arena, zone: ZoneIndex, point: DVec2) -> Option<Command> {
        let beneficiary = match self.config.kind {
            PolicyKind::Passive => None,
            PolicyKind::CollisionCount => self.periodic_beneficiary(arena, zone),
            PolicyKind::BlendedCollisions | PolicyKind::BlendedDistance => {
                self.blended_beneficiary(arena, zone, point)
            }
        }?;

        let target = arena.zone_midpoint(beneficiary)?;
        log::info!(
            "rerouting from zone {} to zone {}",
            zone.label(),
            beneficiary.label()
        );
        Some(Command::BeginZoneTransition {
            zone: beneficiary,
            target,
        })
    }

    /// Every `reroute_interval` collisions, the zone furthest behind its ideal
    /// count.
    fn periodic_beneficiary(&self, arena: &Arena, zone: ZoneIndex) -> Option<ZoneIndex> {
        let interval = self.config.reroute_interval;
        let total = self.total();
        if interval == 0 || (total.round() as u64) % interval != interval - 1 {
            return None;
        }
        let (best, _) = self.largest_deficit(arena, |ideal_share, actual| {
            total * ideal_share - actual
        })?;
        (best != zone).then_some(best)
    }

    fn blended_beneficiary(
        &self,
        arena: &Arena,
        zone: ZoneIndex,
        point: DVec2,
    ) -> Option<ZoneIndex> {
        let thresholds = self.config.thresholds;
        let total = self.total();
        if total < thresholds.minimum_samples || total <= 0.0 {
            return None;
        }

        let (best, deficit) =
            self.largest_deficit(arena, |ideal_share, actual| ideal_share - actual / total)?;
        if best == zone {
            return None;
        }
        if total - self.last_transition_total < thresholds.dwell {
            return None;
        }

        let surplus = self.value(zone) / total - arena.zone_share(zone).unwrap_or(0.0);
        if surplus <= 0.0 {
            return None;
        }
        if deficit > thresholds.critical_deficit {
            return Some(best);
        }

        let perimeter = arena.perimeter_length();
        let ahead = arena.zone_distance(best).unwrap_or(0.0) - arena.distance_on_perimeter(point);
        let opportunistic = ahead.rem_euclid(perimeter.max(f64::EPSILON))
            < perimeter * thresholds.opportunistic_fraction;
        (opportunistic && surplus > thresholds.exit_surplus).then_some(best)
    }

    /// Zone with the largest strictly positive deficit, lowest index first on
    /// ties.
    fn largest_deficit<F>(&self, arena: &Arena, deficit_of: F) -> Option<(ZoneIndex, f64)>
    where
        F: Fn(f64, f64) -> f64,
    {
        let mut best: Option<(ZoneIndex, f64)> = None;
        for (index, point) in arena.zone_points().iter().enumerate() {
            let zone = ZoneIndex::new(index);
            let deficit = deficit_of(point.share(), self.value(zone));
            if deficit > best.map_or(0.0, |(_, current)| current) {
                best = Some((zone, deficit));
            }
        }
        best
    }

    fn credit_move(&mut self, arena: &Arena, from: DVec2, to: DVec2, distance: f64) {
        if distance <= 0.0 {
            return;
        }
        let (Some(first), Some(second)) = (arena.zone_at(from), arena.zone_at(to)) else {
            return;
        };
        if first == second {
            self.credit(first, distance);
        } else {
            self.credit(first, distance / 2.0);
            self.credit(second, distance / 2.0);
        }
    }

    fn credit(&mut self, zone: ZoneIndex, amount: f64) {
        let index = zone.get();
        if self.accumulated.len() <= index {
            self.accumulated.resize(index + 1, 0.0);
        }
        self.accumulated[index] += amount;
    }

    fn value(&self, zone: ZoneIndex) -> f64 {
        self.accumulated.get(zone.get()).copied().unwrap_or(0.0)
    }

    fn total(&self) -> f64 {
        self.accumulated.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mower_sim_core::{Polyline, ZonePoint};

    fn two_zone_square() -> Arena {
        let mut arena = Arena::new(
            Polyline::rectangle(DVec2::ZERO, DVec2::splat(100.0)),
            1.0,
        )
        .expect("arena");
        arena.set_zone_points(vec![
            ZonePoint::new(DVec2::new(50.0, 0.0), 50).expect("zone"),
            ZonePoint::new(DVec2::new(100.0, 100.0), 50).expect("zone"),
        ]);
        arena
    }

    fn collision(x: f64, y: f64) -> Event {
        Event::Collision {
            point: DVec2::new(x, y),
            mode: MowerMode::Mowing,
        }
    }

    #[test]
    fn passive_policy_only_counts() {
        let arena = two_zone_square();
        let mut policy = ZoneBalancing::new(Config::new(PolicyKind::Passive));
        let events: Vec<Event> = (0..50).map(|_| collision(20.0, 0.0)).collect();
        let mut commands = Vec::new();

        policy.handle(&events, &arena, &mut commands);

        assert!(commands.is_empty());
        assert_eq!(policy.statistics(&arena).total(), 50.0);
    }

    #[test]
    fn counting_policy_reroutes_on_period_boundary() {
        let arena = two_zone_square();
        let mut policy = ZoneBalancing::new(Config::new(PolicyKind::CollisionCount));
        let mut commands = Vec::new();

        for _ in 0..18 {
            policy.handle(&[collision(20.0, 0.0)], &arena, &mut commands);
        }
        assert!(commands.is_empty());

        policy.handle(&[collision(20.0, 0.0)], &arena, &mut commands);
        assert_eq!(commands.len(), 1);
        let Command::BeginZoneTransition { zone, target } = commands[0] else {
            panic!("unexpected command {:?}", commands[0]);
        };
        assert_eq!(zone, ZoneIndex::new(1));
        assert!(target.distance(DVec2::new(100.0, 25.0)) < 1e-9);
        assert_eq!(policy.statistics(&arena).entries[1].value, 0.0);

        policy.handle(
            &[Event::ZoneTransitionStarted { zone, target }],
            &arena,
            &mut commands,
        );
        assert_eq!(policy.statistics(&arena).entries[1].value, 1.0);
    }

    #[test]
    fn run_start_resets_statistics() {
        let arena = two_zone_square();
        let mut policy = ZoneBalancing::new(Config::new(PolicyKind::BlendedCollisions));
        let mut commands = Vec::new();
        policy.handle(&[collision(20.0, 0.0)], &arena, &mut commands);

        policy.handle(
            &[Event::RunStarted {
                job: mower_sim_core::Job::Mowing,
                position: DVec2::ZERO,
            }],
            &arena,
            &mut commands,
        );
        assert_eq!(policy.statistics(&arena).total(), 0.0);
    }

    #[test]
    fn distance_policy_splits_moves_across_zones() {
        let arena = two_zone_square();
        let mut policy = ZoneBalancing::new(Config::new(PolicyKind::BlendedDistance));
        let mut commands = Vec::new();
        let events = [
            Event::MowerMoved {
                from: DVec2::new(10.0, 0.0),
                to: DVec2::new(20.0, 0.0),
                distance: 10.0,
            },
            Event::MowerMoved {
                from: DVec2::new(45.0, 0.0),
                to: DVec2::new(55.0, 0.0),
                distance: 10.0,
            },
        ];

        policy.handle(&events, &arena, &mut commands);

        let stats = policy.statistics(&arena);
        assert_eq!(stats.metric, ZoneMetric::Distance);
        assert!((stats.entries[0].value - 15.0).abs() < 1e-12);
        assert!((stats.entries[1].value - 5.0).abs() < 1e-12);
        assert!(commands.is_empty());
    }

    #[test]
    fn arenas_without_zones_are_ignored() {
        let arena = Arena::new(
            Polyline::rectangle(DVec2::ZERO, DVec2::splat(100.0)),
            1.0,
        )
        .expect("arena");
        let mut policy = ZoneBalancing::new(Config::new(PolicyKind::CollisionCount));
        let events: Vec<Event> = (0..40).map(|_| collision(20.0, 0.0)).collect();
        let mut commands = Vec::new();

        policy.handle(&events, &arena, &mut commands);

        assert!(commands.is_empty());
        assert!(policy.statistics(&arena).entries.is_empty());
    }
}
