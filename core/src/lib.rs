#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Core contracts shared across the mower simulation.
//!
//! Adapters submit [`Command`] values describing desired mutations, the world
//! executes those commands through its `apply` entry point and reports what
//! happened as [`Event`] values. Systems such as the zone-balancing policy
//! consume event streams, read immutable arena queries and answer with new
//! command batches. Geometry primitives live in [`geometry`].

pub mod geometry;

use std::time::Duration;

pub use geometry::{Crossing, Polyline, Segment};
pub use glam::DVec2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Operating mode of the mower state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MowerMode {
    /// Random-bounce coverage of the interior.
    Mowing,
    /// Heading for the nearest border vertex after the battery ran low.
    SeekingBorder,
    /// Following the border towards the charging dock.
    FollowingBorder,
    /// Tracing the border exactly once.
    EdgeCutting,
    /// Parked at the dock while the battery refills.
    Charging,
    /// Following the border towards a zone the policy wants to visit.
    TransitioningToZone,
    /// Halted, either on request or after a fatal error.
    Stopped,
}

impl MowerMode {
    /// Short human readable description used by status reports.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Mowing => "MOWING",
            Self::SeekingBorder => "SEEKING",
            Self::FollowingBorder => "FOLLOWING",
            Self::EdgeCutting => "EDGE-CUT",
            Self::Charging => "CHARGING",
            Self::TransitioningToZone => "TRANSIT",
            Self::Stopped => "STOPPED",
        }
    }

    /// Reports whether the mower travels along the border in this mode.
    #[must_use]
    pub const fn follows_border(self) -> bool {
        matches!(
            self,
            Self::FollowingBorder | Self::EdgeCutting | Self::TransitioningToZone
        )
    }
}

/// Kind of run requested when the mower starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Job {
    /// Random-bounce mowing until stopped.
    Mowing,
    /// A single lap along the border.
    EdgeCutting,
}

impl Job {
    /// Mode the mower enters when the job starts.
    #[must_use]
    pub const fn initial_mode(self) -> MowerMode {
        match self {
            Self::Mowing => MowerMode::Mowing,
            Self::EdgeCutting => MowerMode::EdgeCutting,
        }
    }
}

/// Commands that express all permissible world mutations.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Spawns the mower, refills the battery, resets coverage and counters and
    /// plans the first segment.
    Start {
        /// Job to perform.
        job: Job,
    },
    /// Advances the simulation clock by the provided delta time.
    Tick {
        /// Simulated time that elapsed since the previous tick.
        dt: Duration,
    },
    /// Computes the next segment synchronously without advancing time.
    PlanSegment,
    /// Moves the mower to the end of its current segment as if it had driven
    /// there, then plans the next segment.
    FinishSegment,
    /// Places the mower at an explicit position without any bookkeeping.
    PlaceMower {
        /// New mower position in map units.
        position: DVec2,
    },
    /// Requests that the mower follow the border towards another zone.
    BeginZoneTransition {
        /// Zone the policy wants to visit.
        zone: ZoneIndex,
        /// Border point the mower should travel to.
        target: DVec2,
    },
    /// Overrides the remaining battery charge.
    SetBatteryLevel {
        /// Remaining charge in watt hours.
        level: f64,
    },
    /// Halts the mower.
    Stop,
    /// Puts a halted mower back into mowing mode.
    Resume,
    /// Halts the mower and records a fatal error raised outside the world.
    Abort {
        /// Error that ended the run.
        error: SimulationError,
    },
}

/// Events broadcast by the world after processing commands.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// A run started and every statistic was reset.
    RunStarted {
        /// Job the run performs.
        job: Job,
        /// Spawn position of the mower.
        position: DVec2,
    },
    /// Indicates that the simulation clock advanced.
    TimeAdvanced {
        /// Simulated time that elapsed in the tick.
        dt: Duration,
    },
    /// The mower entered a new mode.
    ModeChanged {
        /// Mode that was active before the change.
        from: MowerMode,
        /// Mode that is active now.
        to: MowerMode,
    },
    /// A new segment was planned.
    SegmentPlanned {
        /// Segment the mower will drive next.
        segment: Segment,
        /// Mode that produced the segment.
        mode: MowerMode,
    },
    /// The mower reached the end of its segment.
    SegmentCompleted {
        /// Point where the segment ended.
        endpoint: DVec2,
    },
    /// The mower moved during a tick.
    MowerMoved {
        /// Position before the move.
        from: DVec2,
        /// Position after the move.
        to: DVec2,
        /// Distance travelled in calibrated length units.
        distance: f64,
    },
    /// A planned segment ends on a wall.
    Collision {
        /// Point where the planned segment meets the wall.
        point: DVec2,
        /// Mode the mower was in when the collision was recorded.
        mode: MowerMode,
    },
    /// The navigation could not find any valid heading.
    NavigationError {
        /// Position where the mower got stuck.
        position: DVec2,
    },
    /// The mower was moved to the dock without driving there.
    TeleportedToDock {
        /// Dock position.
        dock: DVec2,
        /// Why the teleport happened.
        reason: TeleportReason,
    },
    /// A zone transition was accepted.
    ZoneTransitionStarted {
        /// Zone being visited.
        zone: ZoneIndex,
        /// Border point the mower travels to.
        target: DVec2,
    },
    /// The run ended because of a fatal error.
    Faulted {
        /// Error that stopped the mower.
        error: SimulationError,
    },
}

/// Reasons the mower may be moved to the dock instantly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TeleportReason {
    /// The battery ran empty before reaching the dock.
    BatteryDepleted,
    /// Navigation found no valid heading.
    Stuck,
}

/// Position of a zone within the perimeter-sorted zone list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ZoneIndex(usize);

impl ZoneIndex {
    /// Creates a new zone index wrapper.
    #[must_use]
    pub const fn new(value: usize) -> Self {
        Self(value)
    }

    /// Retrieves the underlying index.
    #[must_use]
    pub const fn get(&self) -> usize {
        self.0
    }

    /// Spreadsheet-style label of the zone.
    #[must_use]
    pub fn label(&self) -> String {
        zone_label(self.0)
    }
}

/// Converts a zero-based index into a spreadsheet-style label
/// (`A`..`Z`, `AA`, `AB`, ...).
#[must_use]
pub fn zone_label(index: usize) -> String {
    let mut letters = Vec::new();
    let mut remaining = index + 1;
    while remaining > 0 {
        remaining -= 1;
        letters.push(char::from(b'A' + (remaining % 26) as u8));
        remaining /= 26;
    }
    letters.iter().rev().collect()
}

/// Border location that closes a zone, with the share of work it should get.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ZonePoint {
    position: DVec2,
    percentage: u8,
}

impl ZonePoint {
    /// Creates a zone point, rejecting percentages above 100.
    pub fn new(position: DVec2, percentage: u8) -> Result<Self, ArenaError> {
        if percentage > 100 {
            return Err(ArenaError::InvalidZonePercentage(percentage));
        }
        Ok(Self {
            position,
            percentage,
        })
    }

    /// Border position of the zone point.
    #[must_use]
    pub const fn position(&self) -> DVec2 {
        self.position
    }

    /// Target share of work in percent.
    #[must_use]
    pub const fn percentage(&self) -> u8 {
        self.percentage
    }

    /// Target share of work as a fraction of one.
    #[must_use]
    pub fn share(&self) -> f64 {
        f64::from(self.percentage) / 100.0
    }

    /// Returns a copy moved to `position`.
    #[must_use]
    pub const fn moved_to(self, position: DVec2) -> Self {
        Self {
            position,
            percentage: self.percentage,
        }
    }
}

/// Physical parameters of the simulated mower.
///
/// Lengths are calibrated units (centimetres with the default calibration of
/// the editor) and energy is measured in watt hours.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MowerConfig {
    /// Travel speed in length units per simulated second.
    #[serde(default = "default_speed")]
    pub speed: f64,
    /// Width of the cutting deck in length units.
    #[serde(default = "default_mowing_width")]
    pub mowing_width: f64,
    /// Battery capacity in watt hours.
    #[serde(default = "default_battery_capacity")]
    pub battery_capacity: f64,
    /// Energy drawn per length unit travelled.
    #[serde(default = "default_energy_per_unit")]
    pub energy_per_unit: f64,
    /// Simulated seconds spent at the dock before the battery is full again.
    #[serde(default = "default_charge_seconds")]
    pub charge_seconds: f64,
}

fn default_speed() -> f64 {
    1000.0 / 36.0
}

fn default_mowing_width() -> f64 {
    14.0
}

fn default_battery_capacity() -> f64 {
    50.0
}

fn default_energy_per_unit() -> f64 {
    0.00045
}

fn default_charge_seconds() -> f64 {
    3.0
}

impl Default for MowerConfig {
    fn default() -> Self {
        Self {
            speed: default_speed(),
            mowing_width: default_mowing_width(),
            battery_capacity: default_battery_capacity(),
            energy_per_unit: default_energy_per_unit(),
            charge_seconds: default_charge_seconds(),
        }
    }
}

/// Tuned navigation constants.
///
/// The defaults were calibrated against hand drawn gardens and are kept
/// together so they can be adjusted as one unit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigationTuning {
    /// Distance within which a point near a wall still counts as inside and
    /// under which a segment counts as "not moved".
    pub epsilon: f64,
    /// Radius used to find the walls the mower currently touches.
    pub touch_distance: f64,
    /// Width of the bounce window around the wall normal, in degrees.
    pub bounce_window_degrees: f64,
    /// Maximum number of raycast attempts before a navigation error.
    pub max_raycast_attempts: u32,
    /// Length of the ray cast from the mower.
    pub ray_length: f64,
    /// Offset of the ray origin from the mower so the current wall is skipped.
    pub ray_offset: f64,
    /// Distance of the containment probe in front of the mower.
    pub probe_distance: f64,
    /// Range around the dock that counts as arrived.
    pub dock_proximity: f64,
    /// Range around a border vertex that counts as reached while seeking.
    pub seek_arrival: f64,
    /// Range around a zone target that counts as reached.
    pub transition_arrival: f64,
    /// Fraction of the battery capacity below which the mower heads home.
    pub low_battery_fraction: f64,
    /// Range around the dock in which spawning outside the arena is tolerated.
    pub spawn_dock_tolerance: f64,
}

impl Default for NavigationTuning {
    fn default() -> Self {
        Self {
            epsilon: 0.05,
            touch_distance: 1.0,
            bounce_window_degrees: 90.0,
            max_raycast_attempts: 200,
            ray_length: 10_000.0,
            ray_offset: 0.1,
            probe_distance: 1.0,
            dock_proximity: 12.0,
            seek_arrival: 1.0,
            transition_arrival: 5.0,
            low_battery_fraction: 0.1,
            spawn_dock_tolerance: 2.0,
        }
    }
}

/// Zone-balancing policy selected for a run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// Never reroutes the mower.
    #[default]
    Passive,
    /// Periodically reroutes towards the zone with the largest collision
    /// deficit.
    CollisionCount,
    /// Reroutes on large collision-share deficits or cheap opportunities.
    BlendedCollisions,
    /// Reroutes on large mowed-distance-share deficits or cheap opportunities.
    BlendedDistance,
}

impl PolicyKind {
    /// Maps a persisted model version (1 to 4) onto a policy.
    #[must_use]
    pub const fn from_version(version: u32) -> Option<Self> {
        match version {
            1 => Some(Self::Passive),
            2 => Some(Self::CollisionCount),
            3 => Some(Self::BlendedCollisions),
            4 => Some(Self::BlendedDistance),
            _ => None,
        }
    }

    /// Persisted model version of the policy.
    #[must_use]
    pub const fn version(self) -> u32 {
        match self {
            Self::Passive => 1,
            Self::CollisionCount => 2,
            Self::BlendedCollisions => 3,
            Self::BlendedDistance => 4,
        }
    }

    /// Quantity the policy balances across zones.
    #[must_use]
    pub const fn metric(self) -> ZoneMetric {
        match self {
            Self::BlendedDistance => ZoneMetric::Distance,
            _ => ZoneMetric::Collisions,
        }
    }
}

/// Quantity accumulated per zone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ZoneMetric {
    /// Number of collisions recorded in the zone.
    Collisions,
    /// Distance mowed in the zone, in length units.
    Distance,
}

/// Accumulated statistic of a single zone.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ZoneStatEntry {
    /// Zone the entry describes.
    pub zone: ZoneIndex,
    /// Accumulated collisions or distance.
    pub value: f64,
    /// Share of the total held by this zone.
    pub actual_share: f64,
    /// Share the zone should receive.
    pub target_share: f64,
}

/// Per-zone statistics published by the zone-balancing policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ZoneStatistics {
    /// Quantity the entries accumulate.
    pub metric: ZoneMetric,
    /// One entry per zone in perimeter order.
    pub entries: Vec<ZoneStatEntry>,
}

impl ZoneStatistics {
    /// Creates an empty statistics view for the provided metric.
    #[must_use]
    pub const fn empty(metric: ZoneMetric) -> Self {
        Self {
            metric,
            entries: Vec::new(),
        }
    }

    /// Sum of every zone's value.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.entries.iter().map(|entry| entry.value).sum()
    }
}

/// Immutable view of the mower published to observers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MowerSnapshot {
    /// Current mode.
    pub mode: MowerMode,
    /// Current position in map units.
    pub position: DVec2,
    /// Segment being driven, if any.
    pub segment: Option<Segment>,
    /// Remaining charge in watt hours.
    pub battery_level: f64,
    /// Battery capacity in watt hours.
    pub battery_capacity: f64,
    /// Simulated time since the run started.
    pub simulated_time: Duration,
    /// Fraction of mowable cells that were mowed.
    pub coverage: f64,
    /// Collisions recorded during the run.
    pub collisions: u64,
    /// Navigation errors recorded during the run.
    pub navigation_errors: u64,
    /// Distance travelled while transitioning between zones.
    pub transition_distance: f64,
    /// Border point of the active zone transition.
    pub transition_target: Option<DVec2>,
    /// Error that stopped the run, if any.
    pub last_error: Option<SimulationError>,
    /// Completed segment endpoints in driving order.
    pub trace: Vec<DVec2>,
}

impl MowerSnapshot {
    /// Remaining charge as a percentage of the capacity.
    #[must_use]
    pub fn battery_percentage(&self) -> f64 {
        if self.battery_capacity <= 0.0 {
            return 0.0;
        }
        self.battery_level / self.battery_capacity * 100.0
    }
}

/// Reasons an arena description is rejected.
#[derive(Clone, Debug, PartialEq, Error, Serialize, Deserialize)]
pub enum ArenaError {
    /// The border polygon has too few vertices.
    #[error("border polygon needs at least 3 points, found {found}")]
    BorderTooSmall {
        /// Number of vertices provided.
        found: usize,
    },
    /// The border polyline is not closed.
    #[error("border polygon must be closed")]
    BorderOpen,
    /// An obstacle polygon has too few vertices.
    #[error("obstacle {index} needs at least 3 points, found {found}")]
    ObstacleTooSmall {
        /// Position of the obstacle in the list.
        index: usize,
        /// Number of vertices provided.
        found: usize,
    },
    /// The calibration factor is not a positive finite number.
    #[error("calibration must be positive and finite, got {0}")]
    InvalidCalibration(f64),
    /// A zone percentage exceeds 100.
    #[error("zone percentage {0} exceeds 100")]
    InvalidZonePercentage(u8),
}

/// Fatal errors that stop a run.
#[derive(Clone, Debug, PartialEq, Error, Serialize, Deserialize)]
pub enum SimulationError {
    /// The battery ran empty and there is no dock to recover at.
    #[error("battery depleted at {position} and no charging dock is configured")]
    BatteryDepletedWithoutDock {
        /// Position where the battery ran out.
        position: DVec2,
    },
    /// Navigation got stuck and there is no dock to recover at.
    #[error("navigation stuck at {position} and no charging dock is configured")]
    StuckWithoutDock {
        /// Position where navigation failed.
        position: DVec2,
    },
    /// The mower was spawned outside the arena.
    #[error("mower spawned outside the arena at {position}")]
    SpawnedOutside {
        /// Rejected spawn position.
        position: DVec2,
    },
    /// The simulation loop failed unexpectedly.
    #[error("simulation loop fault: {message}")]
    LoopFault {
        /// Description of the failure.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{de::DeserializeOwned, Serialize};

    fn assert_round_trip<T>(value: &T)
    where
        T: Serialize + DeserializeOwned + PartialEq + std::fmt::Debug,
    {
        let bytes = bincode::serialize(value).expect("serialize");
        let restored: T = bincode::deserialize(&bytes).expect("deserialize");
        assert_eq!(&restored, value);
    }

    #[test]
    fn zone_labels_follow_spreadsheet_columns() {
        assert_eq!(zone_label(0), "A");
        assert_eq!(zone_label(25), "Z");
        assert_eq!(zone_label(26), "AA");
        assert_eq!(zone_label(27), "AB");
        assert_eq!(zone_label(701), "ZZ");
        assert_eq!(zone_label(702), "AAA");
        assert_eq!(ZoneIndex::new(1).label(), "B");
    }

    #[test]
    fn zone_point_rejects_percentages_above_hundred() {
        assert!(ZonePoint::new(DVec2::ZERO, 100).is_ok());
        assert_eq!(
            ZonePoint::new(DVec2::ZERO, 101),
            Err(ArenaError::InvalidZonePercentage(101))
        );
    }

    #[test]
    fn policy_versions_round_trip() {
        for version in 1..=4 {
            let kind = PolicyKind::from_version(version).expect("known version");
            assert_eq!(kind.version(), version);
        }
        assert_eq!(PolicyKind::from_version(0), None);
        assert_eq!(PolicyKind::from_version(5), None);
    }

    #[test]
    fn mode_labels_match_status_display() {
        assert_eq!(MowerMode::EdgeCutting.label(), "EDGE-CUT");
        assert_eq!(MowerMode::TransitioningToZone.label(), "TRANSIT");
        assert_eq!(MowerMode::SeekingBorder.label(), "SEEKING");
    }

    #[test]
    fn default_mower_config_matches_reference_mower() {
        let config = MowerConfig::default();
        assert!((config.speed - 27.777_777).abs() < 1e-5);
        assert!((config.mowing_width - 14.0).abs() < f64::EPSILON);
        assert!((config.battery_capacity - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn battery_percentage_handles_zero_capacity() {
        let snapshot = MowerSnapshot {
            mode: MowerMode::Stopped,
            position: DVec2::ZERO,
            segment: None,
            battery_level: 10.0,
            battery_capacity: 0.0,
            simulated_time: Duration::ZERO,
            coverage: 0.0,
            collisions: 0,
            navigation_errors: 0,
            transition_distance: 0.0,
            transition_target: None,
            last_error: None,
            trace: Vec::new(),
        };
        assert_eq!(snapshot.battery_percentage(), 0.0);
    }

    #[test]
    fn mower_mode_round_trips_through_bincode() {
        assert_round_trip(&MowerMode::TransitioningToZone);
    }

    #[test]
    fn simulation_error_round_trips_through_bincode() {
        assert_round_trip(&SimulationError::StuckWithoutDock {
            position: DVec2::new(3.5, -2.0),
        });
    }

    #[test]
    fn mower_config_round_trips_through_bincode() {
        assert_round_trip(&MowerConfig::default());
    }

    #[test]
    fn segment_round_trips_through_bincode() {
        assert_round_trip(&Segment::new(DVec2::new(1.0, 2.0), DVec2::new(3.0, 4.0)));
    }
}
