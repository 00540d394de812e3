#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Authoritative state of the simulated mower.
//!
//! The [`World`] owns the arena, the mower state machine, the coverage grid
//! and the seeded random source used by navigation. Every mutation goes
//! through [`apply`], which reports what happened as events. Read access goes
//! through the [`query`] module.

pub mod arena;
pub mod coverage;
mod navigation;

use std::time::Duration;

pub use arena::{Arena, Perimeter, WallHit};
pub use coverage::CoverageGrid;
pub use navigation::bounce_direction;

use mower_sim_core::{
    Command, DVec2, Event, Job, MowerConfig, MowerMode, NavigationTuning, Segment,
    SimulationError, TeleportReason, ZoneIndex,
};
use navigation::MowingPlan;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Squared segment length below which dock and target projections are
/// skipped.
const MIN_PROJECTION_LENGTH_SQUARED: f64 = 0.001;

#[derive(Clone, Debug)]
struct Mower {
    position: DVec2,
    mode: MowerMode,
    segment: Option<Segment>,
    battery: f64,
    charge_elapsed: f64,
    elapsed: Duration,
    collisions: u64,
    navigation_errors: u64,
    transition_distance: f64,
    transition_target: Option<DVec2>,
    border_step: usize,
    edge_vertices_left: usize,
    trace: Vec<DVec2>,
    last_error: Option<SimulationError>,
}

impl Mower {
    fn parked(position: DVec2, battery: f64) -> Self {
        Self {
            position,
            mode: MowerMode::Stopped,
            segment: None,
            battery,
            charge_elapsed: 0.0,
            elapsed: Duration::ZERO,
            collisions: 0,
            navigation_errors: 0,
            transition_distance: 0.0,
            transition_target: None,
            border_step: 0,
            edge_vertices_left: 0,
            trace: Vec::new(),
            last_error: None,
        }
    }
}

/// Represents the authoritative mower simulation state.
#[derive(Clone, Debug)]
pub struct World {
    arena: Arena,
    config: MowerConfig,
    tuning: NavigationTuning,
    rng: ChaCha8Rng,
    mower: Mower,
    coverage: Option<CoverageGrid>,
}

impl World {
    /// Creates a world whose mower is parked at the dock, or at the first
    /// border vertex when there is no dock.
    #[must_use]
    pub fn new(arena: Arena, config: MowerConfig, seed: u64) -> Self {
        let parked_at = arena
            .dock()
            .or_else(|| arena.border().vertex(0))
            .unwrap_or(DVec2::ZERO);
        let mower = Mower::parked(parked_at, config.battery_capacity);
        Self {
            arena,
            config,
            tuning: NavigationTuning::default(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            mower,
            coverage: None,
        }
    }

    /// Replaces the navigation constants.
    #[must_use]
    pub fn with_tuning(mut self, tuning: NavigationTuning) -> Self {
        self.tuning = tuning;
        self
    }

    fn start(&mut self, job: Job, out_events: &mut Vec<Event>) {
        let dock = self.arena.dock();
        let current = self.mower.position;
        let spawn = match dock {
            Some(dock) => dock,
            None if self.arena.contains(current, self.tuning.epsilon) => current,
            None => self.arena.border().vertex(0).unwrap_or(current),
        };

        self.mower = Mower::parked(spawn, self.config.battery_capacity);
        self.coverage = Some(CoverageGrid::build(&self.arena));
        out_events.push(Event::RunStarted {
            job,
            position: spawn,
        });
        log::info!("starting {job:?} at {spawn}");

        let near_dock =
            dock.map_or(false, |dock| spawn.distance(dock) < self.tuning.spawn_dock_tolerance);
        if !self.arena.contains(spawn, self.tuning.epsilon) && !near_dock {
            self.fault(SimulationError::SpawnedOutside { position: spawn }, out_events);
            return;
        }

        if job == Job::EdgeCutting {
            if let Some(index) = self.arena.nearest_border_vertex(spawn) {
                if let Some(vertex) = self.arena.border().vertex(index) {
                    self.mower.position = vertex;
                }
                self.mower.border_step = self.arena.perimeter().step_of(index).unwrap_or(0);
                self.mower.edge_vertices_left = self.arena.perimeter().len();
            }
        }

        self.mower.trace.push(self.mower.position);
        self.set_mode(job.initial_mode(), out_events);
        self.plan(out_events);
    }

    fn tick(&mut self, dt: Duration, out_events: &mut Vec<Event>) {
        if self.mower.mode == MowerMode::Stopped {
            return;
        }

        self.mower.elapsed = self.mower.elapsed.saturating_add(dt);
        out_events.push(Event::TimeAdvanced { dt });
        let seconds = dt.as_secs_f64();

        if self.mower.mode == MowerMode::Charging {
            self.mower.charge_elapsed += seconds;
            if self.mower.charge_elapsed >= self.config.charge_seconds {
                self.mower.battery = self.config.battery_capacity;
                self.mower.charge_elapsed = 0.0;
                self.set_mode(MowerMode::Mowing, out_events);
                self.plan(out_events);
            }
            return;
        }

        let travel = self.config.speed * seconds;
        let step = travel / self.arena.calibration();
        self.mower.battery -= travel * self.config.energy_per_unit;

        if self.mower.mode == MowerMode::TransitioningToZone {
            self.mower.transition_distance += travel;
        }

        let low_battery = self.config.battery_capacity * self.tuning.low_battery_fraction;
        if self.mower.mode == MowerMode::Mowing && self.mower.battery < low_battery {
            log::info!("battery low, heading for the border");
            self.set_mode(MowerMode::SeekingBorder, out_events);
            self.plan(out_events);
        }

        if self.mower.battery <= 0.0 {
            self.mower.battery = 0.0;
            match self.arena.dock() {
                Some(dock) => {
                    self.teleport_to_dock(dock, TeleportReason::BatteryDepleted, out_events);
                }
                None => self.fault(
                    SimulationError::BatteryDepletedWithoutDock {
                        position: self.mower.position,
                    },
                    out_events,
                ),
            }
            return;
        }

        if matches!(self.mower.mode, MowerMode::Stopped | MowerMode::Charging) {
            return;
        }
        if self.mower.segment.is_none() {
            self.plan(out_events);
        }
        let Some(segment) = self.mower.segment else {
            return;
        };

        let from = self.mower.position;
        let to = if step >= from.distance(segment.end()) {
            self.arrive(segment.end(), out_events)
        } else if step > 0.0 {
            let next = from + (segment.end() - from).normalize_or_zero() * step;
            self.mower.position = next;
            self.mark_coverage(next);
            next
        } else {
            from
        };

        out_events.push(Event::MowerMoved {
            from,
            to,
            distance: from.distance(to) * self.arena.calibration(),
        });
    }

    /// Snaps onto a segment end, records it and plans the next segment.
    /// Returns the endpoint, which may differ from the final position when
    /// planning teleports the mower.
    fn arrive(&mut self, endpoint: DVec2, out_events: &mut Vec<Event>) -> DVec2 {
        self.mower.position = endpoint;
        self.mower.trace.push(endpoint);
        if self.mower.mode == MowerMode::EdgeCutting {
            self.mower.edge_vertices_left = self.mower.edge_vertices_left.saturating_sub(1);
        }
        self.mark_coverage(endpoint);
        out_events.push(Event::SegmentCompleted { endpoint });
        self.plan(out_events);
        endpoint
    }

    fn finish_segment(&mut self, out_events: &mut Vec<Event>) {
        if matches!(self.mower.mode, MowerMode::Stopped | MowerMode::Charging) {
            return;
        }
        let Some(segment) = self.mower.segment else {
            return;
        };
        let from = self.mower.position;
        let to = self.arrive(segment.end(), out_events);
        out_events.push(Event::MowerMoved {
            from,
            to,
            distance: from.distance(to) * self.arena.calibration(),
        });
    }

    fn plan(&mut self, out_events: &mut Vec<Event>) {
        match self.mower.mode {
            MowerMode::Stopped => {}
            MowerMode::Charging => {
                self.mower.segment = Some(Segment::stationary(self.mower.position));
            }
            MowerMode::SeekingBorder => self.plan_seek(out_events),
            MowerMode::FollowingBorder => self.plan_follow(out_events),
            MowerMode::EdgeCutting => self.plan_edge_cut(out_events),
            MowerMode::TransitioningToZone => self.plan_transition(out_events),
            MowerMode::Mowing => self.plan_mowing(false, out_events),
        }
    }

    fn plan_seek(&mut self, out_events: &mut Vec<Event>) {
        let position = self.mower.position;
        let Some(index) = self.arena.nearest_border_vertex(position) else {
            return;
        };
        let Some(target) = self.arena.border().vertex(index) else {
            return;
        };

        if position.distance(target) < self.tuning.seek_arrival {
            self.mower.border_step = self.arena.perimeter().step_of(index).unwrap_or(0);
            self.set_mode(MowerMode::FollowingBorder, out_events);
            self.plan(out_events);
            return;
        }

        let epsilon = self.tuning.epsilon;
        let path = Segment::new(position, target);
        let probe_start = path.point_at_length(self.tuning.ray_offset.min(path.length()));
        let hit = self
            .arena
            .colliding_wall(&Segment::new(probe_start, target), epsilon)
            .filter(|hit| hit.point.distance(target) > epsilon);
        let end = hit.map_or(target, |hit| hit.point);

        let blocked = position.distance(end) <= epsilon
            || !self.arena.contains((position + end) * 0.5, epsilon);
        if blocked {
            log::debug!("seek path from {position} is blocked, bouncing off");
            self.plan_mowing(true, out_events);
            return;
        }

        if let Some(hit) = hit {
            self.record_collision(hit.point, out_events);
        }
        self.assign_segment(Segment::new(position, end), out_events);
    }

    fn plan_follow(&mut self, out_events: &mut Vec<Event>) {
        let position = self.mower.position;
        let dock = self.arena.dock();
        if let Some(dock) = dock {
            if position.distance(dock) < self.tuning.dock_proximity {
                self.enter_charging(out_events);
                return;
            }
        }

        let mut end = self.advance_along_border(true);
        if let Some(dock) = dock {
            if let Some(projected) =
                projection_within(Segment::new(position, end), dock, self.tuning.dock_proximity)
            {
                end = projected;
                self.mower.border_step =
                    self.arena.perimeter().previous_step(self.mower.border_step);
            }
        }
        self.assign_segment(Segment::new(position, end), out_events);
    }

    fn plan_edge_cut(&mut self, out_events: &mut Vec<Event>) {
        let position = self.mower.position;
        if self.mower.edge_vertices_left == 0 {
            log::info!("edge cutting finished at {position}");
            let docked = self
                .arena
                .dock()
                .map_or(false, |dock| position.distance(dock) < self.tuning.dock_proximity);
            if docked {
                self.enter_charging(out_events);
            } else {
                self.mower.segment = Some(Segment::stationary(position));
                self.set_mode(MowerMode::Stopped, out_events);
            }
            return;
        }

        let end = self.advance_along_border(false);
        self.assign_segment(Segment::new(position, end), out_events);
    }

    fn plan_transition(&mut self, out_events: &mut Vec<Event>) {
        let position = self.mower.position;
        let arrival = self.tuning.transition_arrival;
        let target = match self.mower.transition_target {
            Some(target) if position.distance(target) >= arrival => target,
            _ => {
                self.mower.transition_target = None;
                self.set_mode(MowerMode::Mowing, out_events);
                self.plan(out_events);
                return;
            }
        };

        let mut end = self.advance_along_border(true);
        if let Some(projected) = projection_within(Segment::new(position, end), target, arrival) {
            end = projected;
            self.mower.border_step = self.arena.perimeter().previous_step(self.mower.border_step);
        }
        self.assign_segment(Segment::new(position, end), out_events);
    }

    /// Plans a random-bounce segment without changing the mode. A fresh
    /// heading ignores the previous segment entirely.
    fn plan_mowing(&mut self, fresh_heading: bool, out_events: &mut Vec<Event>) {
        let previous = if fresh_heading {
            None
        } else {
            self.mower.segment
        };
        let plan = navigation::plan_mowing(
            &self.arena,
            &self.tuning,
            &mut self.rng,
            self.mower.position,
            previous,
        );
        match plan {
            MowingPlan::Continue => {}
            MowingPlan::Drive { target } => {
                self.record_collision(target, out_events);
                self.assign_segment(Segment::new(self.mower.position, target), out_events);
            }
            MowingPlan::Stuck => self.recover_from_stuck(out_events),
        }
    }

    fn advance_along_border(&mut self, skip_current: bool) -> DVec2 {
        let position = self.mower.position;
        let perimeter = self.arena.perimeter();
        let mut step = perimeter.next_step(self.mower.border_step);
        let mut vertex = self.arena.perimeter_vertex(step).unwrap_or(position);
        if skip_current && vertex.distance(position) < 1e-9 {
            step = perimeter.next_step(step);
            vertex = self.arena.perimeter_vertex(step).unwrap_or(position);
        }
        self.mower.border_step = step;
        vertex
    }

    fn begin_zone_transition(
        &mut self,
        zone: ZoneIndex,
        target: DVec2,
        out_events: &mut Vec<Event>,
    ) {
        if self.mower.mode != MowerMode::Mowing {
            log::debug!(
                "ignoring transition to zone {} while {:?}",
                zone.label(),
                self.mower.mode
            );
            return;
        }
        let Some((step, snapped)) = self.arena.locate_on_perimeter(self.mower.position) else {
            return;
        };

        log::info!("transitioning to zone {} at {target}", zone.label());
        self.mower.position = snapped;
        self.mower.border_step = step;
        self.mower.transition_target = Some(target);
        self.set_mode(MowerMode::TransitioningToZone, out_events);
        out_events.push(Event::ZoneTransitionStarted { zone, target });
        self.plan(out_events);
    }

    fn recover_from_stuck(&mut self, out_events: &mut Vec<Event>) {
        let position = self.mower.position;
        self.mower.navigation_errors += 1;
        out_events.push(Event::NavigationError { position });
        match self.arena.dock() {
            Some(dock) => {
                log::warn!("navigation stuck at {position}, teleporting to dock");
                self.teleport_to_dock(dock, TeleportReason::Stuck, out_events);
            }
            None => self.fault(SimulationError::StuckWithoutDock { position }, out_events),
        }
    }

    fn teleport_to_dock(
        &mut self,
        dock: DVec2,
        reason: TeleportReason,
        out_events: &mut Vec<Event>,
    ) {
        self.mower.position = dock;
        self.mower.transition_target = None;
        out_events.push(Event::TeleportedToDock { dock, reason });
        self.enter_charging(out_events);
    }

    fn enter_charging(&mut self, out_events: &mut Vec<Event>) {
        self.mower.charge_elapsed = 0.0;
        self.mower.segment = Some(Segment::stationary(self.mower.position));
        self.set_mode(MowerMode::Charging, out_events);
    }

    fn fault(&mut self, error: SimulationError, out_events: &mut Vec<Event>) {
        log::error!("{error}");
        self.mower.last_error = Some(error.clone());
        self.mower.segment = Some(Segment::stationary(self.mower.position));
        self.set_mode(MowerMode::Stopped, out_events);
        out_events.push(Event::Faulted { error });
    }

    fn record_collision(&mut self, point: DVec2, out_events: &mut Vec<Event>) {
        self.mower.collisions += 1;
        out_events.push(Event::Collision {
            point,
            mode: self.mower.mode,
        });
    }

    fn assign_segment(&mut self, segment: Segment, out_events: &mut Vec<Event>) {
        log::trace!("{:?} segment {} -> {}", self.mower.mode, segment.start(), segment.end());
        self.mower.segment = Some(segment);
        out_events.push(Event::SegmentPlanned {
            segment,
            mode: self.mower.mode,
        });
    }

    fn set_mode(&mut self, mode: MowerMode, out_events: &mut Vec<Event>) {
        let from = self.mower.mode;
        if from == mode {
            return;
        }
        log::debug!("mode {} -> {}", from.label(), mode.label());
        self.mower.mode = mode;
        out_events.push(Event::ModeChanged { from, to: mode });
    }

    fn mark_coverage(&mut self, point: DVec2) {
        let radius = self.config.mowing_width / 2.0 / self.arena.calibration();
        if let Some(coverage) = self.coverage.as_mut() {
            coverage.mark(point, radius);
        }
    }
}

/// Projection of `point` onto `segment` when it falls strictly inside the
/// segment and within `radius` of `point`.
fn projection_within(segment: Segment, point: DVec2, radius: f64) -> Option<DVec2> {
    if segment.delta().length_squared() <= MIN_PROJECTION_LENGTH_SQUARED {
        return None;
    }
    let t = segment.projection_parameter(point)?;
    if t <= 0.0 || t >= 1.0 {
        return None;
    }
    let projected = segment.start() + segment.delta() * t;
    (projected.distance(point) < radius).then_some(projected)
}

/// Applies the provided command to the world, mutating state deterministically.
pub fn apply(world: &mut World, command: Command, out_events: &mut Vec<Event>) {
    match command {
        Command::Start { job } => world.start(job, out_events),
        Command::Tick { dt } => world.tick(dt, out_events),
        Command::PlanSegment => world.plan(out_events),
        Command::FinishSegment => world.finish_segment(out_events),
        Command::PlaceMower { position } => world.mower.position = position,
        Command::BeginZoneTransition { zone, target } => {
            world.begin_zone_transition(zone, target, out_events);
        }
        Command::SetBatteryLevel { level } => {
            world.mower.battery = level.clamp(0.0, world.config.battery_capacity);
        }
        Command::Stop => {
            world.set_mode(MowerMode::Stopped, out_events);
        }
        Command::Resume => {
            if world.mower.mode == MowerMode::Stopped && world.coverage.is_some() {
                world.mower.last_error = None;
                world.set_mode(MowerMode::Mowing, out_events);
                world.plan(out_events);
            }
        }
        Command::Abort { error } => world.fault(error, out_events),
    }
}

/// Query functions that provide read-only access to the world state.
pub mod query {
    use std::time::Duration;

    use mower_sim_core::{
        DVec2, MowerConfig, MowerMode, MowerSnapshot, NavigationTuning, Segment,
        SimulationError, ZoneIndex,
    };

    use super::{Arena, CoverageGrid, World};

    /// Arena the mower works in.
    #[must_use]
    pub fn arena(world: &World) -> &Arena {
        &world.arena
    }

    /// Physical mower parameters.
    #[must_use]
    pub fn config(world: &World) -> &MowerConfig {
        &world.config
    }

    /// Navigation constants in effect.
    #[must_use]
    pub fn tuning(world: &World) -> &NavigationTuning {
        &world.tuning
    }

    /// Current mode of the mower.
    #[must_use]
    pub fn mode(world: &World) -> MowerMode {
        world.mower.mode
    }

    /// Current mower position in map units.
    #[must_use]
    pub fn position(world: &World) -> DVec2 {
        world.mower.position
    }

    /// Segment being driven, if any.
    #[must_use]
    pub fn segment(world: &World) -> Option<Segment> {
        world.mower.segment
    }

    /// Remaining battery charge in watt hours.
    #[must_use]
    pub fn battery_level(world: &World) -> f64 {
        world.mower.battery
    }

    /// Simulated time since the run started.
    #[must_use]
    pub fn simulated_time(world: &World) -> Duration {
        world.mower.elapsed
    }

    /// Coverage grid of the current run.
    #[must_use]
    pub fn coverage(world: &World) -> Option<&CoverageGrid> {
        world.coverage.as_ref()
    }

    /// Collisions recorded during the run.
    #[must_use]
    pub fn collisions(world: &World) -> u64 {
        world.mower.collisions
    }

    /// Navigation errors recorded during the run.
    #[must_use]
    pub fn navigation_errors(world: &World) -> u64 {
        world.mower.navigation_errors
    }

    /// Border point of the active zone transition.
    #[must_use]
    pub fn transition_target(world: &World) -> Option<DVec2> {
        world.mower.transition_target
    }

    /// Completed segment endpoints, starting with the spawn point.
    #[must_use]
    pub fn trace(world: &World) -> &[DVec2] {
        &world.mower.trace
    }

    /// Error that stopped the run, if any.
    #[must_use]
    pub fn last_error(world: &World) -> Option<&SimulationError> {
        world.mower.last_error.as_ref()
    }

    /// Zone owning the mower's projection onto the border.
    #[must_use]
    pub fn current_zone(world: &World) -> Option<ZoneIndex> {
        world.arena.zone_at(world.mower.position)
    }

    /// Captures an immutable snapshot of the mower.
    #[must_use]
    pub fn snapshot(world: &World) -> MowerSnapshot {
        let mower = &world.mower;
        MowerSnapshot {
            mode: mower.mode,
            position: mower.position,
            segment: mower.segment,
            battery_level: mower.battery,
            battery_capacity: world.config.battery_capacity,
            simulated_time: mower.elapsed,
            coverage: world.coverage.as_ref().map_or(0.0, CoverageGrid::ratio),
            collisions: mower.collisions,
            navigation_errors: mower.navigation_errors,
            transition_distance: mower.transition_distance,
            transition_target: mower.transition_target,
            last_error: mower.last_error.clone(),
            trace: mower.trace.clone(),
        }
    }
}
