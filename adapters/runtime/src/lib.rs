#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Simulation driver that owns a world and its zone-balancing policy.
//!
//! A run can be driven synchronously through [`Simulation::step`] and
//! [`Simulation::execute`], or handed to a dedicated thread that ticks the
//! world in scaled real time. Other threads only ever observe immutable
//! [`SimulationSnapshot`] values.

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, PoisonError, RwLock,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use mower_sim_core::{
    Command, DVec2, Event, Job, MowerConfig, MowerMode, MowerSnapshot, NavigationTuning,
    PolicyKind, SimulationError, ZoneStatistics,
};
use mower_sim_system_zone_balancing::{Config as ZoneBalancingConfig, ZoneBalancing};
use mower_sim_world::{self as world, query, Arena, World};
use thiserror::Error;

const THREAD_NAME: &str = "mower-sim";

/// Largest accepted number of simulated seconds per real second.
pub const MAX_TIME_SCALE: f64 = 10_000.0;

/// Parameters of a simulation run.
#[derive(Clone, Debug, PartialEq)]
pub struct SimulationSettings {
    /// Simulated seconds per real second.
    pub time_scale: f64,
    /// Real time slept between ticks of the simulation thread.
    pub tick_interval: Duration,
    /// Minimum real time between published snapshots.
    pub publish_interval: Duration,
    /// Seed of the navigation random number generator.
    pub seed: u64,
    /// Zone-balancing policy.
    pub policy: PolicyKind,
    /// Physical mower parameters.
    pub mower: MowerConfig,
    /// Navigation constants.
    pub tuning: NavigationTuning,
    /// Position the mower is parked at before a run starts. Only used when
    /// the arena has no dock.
    pub initial_position: Option<DVec2>,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            time_scale: 1.0,
            tick_interval: Duration::from_millis(10),
            publish_interval: Duration::from_millis(50),
            seed: 0,
            policy: PolicyKind::default(),
            mower: MowerConfig::default(),
            tuning: NavigationTuning::default(),
            initial_position: None,
        }
    }
}

/// Read model published by the driver.
#[derive(Clone, Debug, PartialEq)]
pub struct SimulationSnapshot {
    /// Mower state.
    pub mower: MowerSnapshot,
    /// Per-zone statistics of the active policy.
    pub zones: ZoneStatistics,
}

/// Errors reported by the driver.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// A simulation thread is already running.
    #[error("the simulation is already running")]
    AlreadyRunning,
    /// No run was started.
    #[error("no simulation has been started")]
    NotStarted,
    /// Time scales must be positive and at most [`MAX_TIME_SCALE`].
    #[error("invalid time scale {0}")]
    InvalidTimeScale(f64),
    /// The simulation thread could not be spawned.
    #[error("failed to spawn the simulation thread")]
    Spawn(#[source] std::io::Error),
    /// The simulation thread panicked outside of a tick and lost its state.
    #[error("the simulation thread terminated abnormally")]
    WorkerLost,
}

type SharedSnapshot = Arc<RwLock<Option<Arc<SimulationSnapshot>>>>;

/// World paired with the policy observing it.
struct Session {
    world: World,
    policy: ZoneBalancing,
}

impl Session {
    fn new(arena: Arena, settings: &SimulationSettings) -> Self {
        let mut world = World::new(arena, settings.mower.clone(), settings.seed)
            .with_tuning(settings.tuning.clone());
        if let Some(position) = settings.initial_position {
            let mut events = Vec::new();
            world::apply(&mut world, Command::PlaceMower { position }, &mut events);
        }
        Self {
            world,
            policy: ZoneBalancing::new(ZoneBalancingConfig::new(settings.policy)),
        }
    }

    /// Applies `command` and feeds the resulting events through the policy
    /// until it has nothing more to say.
    fn execute(&mut self, command: Command) {
        let mut events = Vec::new();
        world::apply(&mut self.world, command, &mut events);

        let mut commands = Vec::new();
        loop {
            log_teleports(&events);
            self.policy
                .handle(&events, query::arena(&self.world), &mut commands);
            if commands.is_empty() {
                break;
            }
            events.clear();
            for command in commands.drain(..) {
                world::apply(&mut self.world, command, &mut events);
            }
        }
    }

    fn mode(&self) -> MowerMode {
        query::mode(&self.world)
    }

    fn snapshot(&self) -> SimulationSnapshot {
        SimulationSnapshot {
            mower: query::snapshot(&self.world),
            zones: self.policy.statistics(query::arena(&self.world)),
        }
    }
}

fn log_teleports(events: &[Event]) {
    for event in events {
        if let Event::TeleportedToDock { reason, .. } = event {
            log::debug!("mower returned to the dock: {reason:?}");
        }
    }
}

/// Drives a single simulation run.
pub struct Simulation {
    settings: SimulationSettings,
    snapshot: SharedSnapshot,
    running: Arc<AtomicBool>,
    time_scale: Arc<AtomicU64>,
    session: Option<Session>,
    worker: Option<JoinHandle<Session>>,
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("settings", &self.settings)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Simulation {
    /// Creates an idle driver.
    pub fn new(settings: SimulationSettings) -> Result<Self, RuntimeError> {
        validate_time_scale(settings.time_scale)?;
        let time_scale = Arc::new(AtomicU64::new(settings.time_scale.to_bits()));
        Ok(Self {
            settings,
            snapshot: Arc::new(RwLock::new(None)),
            running: Arc::new(AtomicBool::new(false)),
            time_scale,
            session: None,
            worker: None,
        })
    }

    /// Starts mowing `arena` on the simulation thread.
    pub fn start(&mut self, arena: Arena) -> Result<(), RuntimeError> {
        self.prepare(arena, Job::Mowing)?;
        self.spawn()
    }

    /// Starts a single edge-cutting lap of `arena` on the simulation thread.
    pub fn start_edge_cutting(&mut self, arena: Arena) -> Result<(), RuntimeError> {
        self.prepare(arena, Job::EdgeCutting)?;
        self.spawn()
    }

    /// Replaces any previous run with a fresh one on `arena` without spawning
    /// the simulation thread. The run is then advanced with [`Self::step`].
    pub fn prepare(&mut self, arena: Arena, job: Job) -> Result<(), RuntimeError> {
        if self.is_running() {
            return Err(RuntimeError::AlreadyRunning);
        }
        self.cancel();

        log::info!(
            "starting {job:?} run with {:?} policy, seed {}",
            self.settings.policy,
            self.settings.seed
        );
        let mut session = Session::new(arena, &self.settings);
        session.execute(Command::Start { job });
        publish(&self.snapshot, &session);
        self.session = Some(session);
        Ok(())
    }

    /// Stops the simulation thread and leaves the run paused.
    pub fn stop(&mut self) -> Result<(), RuntimeError> {
        self.join()?;
        let session = self.session.as_mut().ok_or(RuntimeError::NotStarted)?;
        session.execute(Command::Stop);
        publish(&self.snapshot, session);
        log::info!("simulation stopped");
        Ok(())
    }

    /// Continues a stopped run from its current state.
    pub fn resume(&mut self) -> Result<(), RuntimeError> {
        if self.is_running() {
            return Err(RuntimeError::AlreadyRunning);
        }
        self.join()?;
        let session = self.session.as_mut().ok_or(RuntimeError::NotStarted)?;
        session.execute(Command::Resume);
        log::info!("simulation resumed");
        self.spawn()
    }

    /// Stops the simulation thread and discards the run.
    pub fn cancel(&mut self) {
        if let Err(error) = self.join() {
            log::warn!("{error}");
        }
        self.session = None;
        let mut guard = self
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *guard = None;
    }

    /// Latest published snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Option<Arc<SimulationSnapshot>> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Reports whether the simulation thread is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .map_or(false, |worker| !worker.is_finished())
    }

    /// Changes the time scale, taking effect on the next tick.
    pub fn set_time_scale(&mut self, time_scale: f64) -> Result<(), RuntimeError> {
        validate_time_scale(time_scale)?;
        self.settings.time_scale = time_scale;
        self.time_scale.store(time_scale.to_bits(), Ordering::Relaxed);
        Ok(())
    }

    /// Advances a paused run by `dt` of simulated time.
    pub fn step(&mut self, dt: Duration) -> Result<(), RuntimeError> {
        self.execute(Command::Tick { dt })
    }

    /// Applies `command` to a paused run.
    pub fn execute(&mut self, command: Command) -> Result<(), RuntimeError> {
        if self.is_running() {
            return Err(RuntimeError::AlreadyRunning);
        }
        self.join()?;
        let session = self.session.as_mut().ok_or(RuntimeError::NotStarted)?;
        session.execute(command);
        publish(&self.snapshot, session);
        Ok(())
    }

    /// Settings the driver was created with, including the current time scale.
    #[must_use]
    pub const fn settings(&self) -> &SimulationSettings {
        &self.settings
    }

    fn spawn(&mut self) -> Result<(), RuntimeError> {
        let session = self.session.take().ok_or(RuntimeError::NotStarted)?;
        if session.mode() == MowerMode::Stopped {
            log::info!("run is stopped, not spawning the simulation thread");
            self.session = Some(session);
            return Ok(());
        }

        self.running.store(true, Ordering::Release);
        let worker = Worker {
            running: Arc::clone(&self.running),
            time_scale: Arc::clone(&self.time_scale),
            snapshot: Arc::clone(&self.snapshot),
            tick_interval: self.settings.tick_interval,
            publish_interval: self.settings.publish_interval,
        };
        let handle = thread::Builder::new()
            .name(THREAD_NAME.into())
            .spawn(move || worker.run(session))
            .map_err(|error| {
                self.running.store(false, Ordering::Release);
                RuntimeError::Spawn(error)
            })?;
        self.worker = Some(handle);
        Ok(())
    }

    /// Signals the simulation thread and takes its session back.
    fn join(&mut self) -> Result<(), RuntimeError> {
        self.running.store(false, Ordering::Release);
        let Some(handle) = self.worker.take() else {
            return Ok(());
        };
        match handle.join() {
            Ok(session) => {
                self.session = Some(session);
                Ok(())
            }
            Err(payload) => {
                log::error!("simulation thread lost: {}", panic_message(payload.as_ref()));
                Err(RuntimeError::WorkerLost)
            }
        }
    }
}

impl Drop for Simulation {
    fn drop(&mut self) {
        if let Err(error) = self.join() {
            log::warn!("{error}");
        }
    }
}

struct Worker {
    running: Arc<AtomicBool>,
    time_scale: Arc<AtomicU64>,
    snapshot: SharedSnapshot,
    tick_interval: Duration,
    publish_interval: Duration,
}

impl Worker {
    fn run(self, mut session: Session) -> Session {
        log::info!("simulation thread started");
        let mut last_tick = Instant::now();
        let mut last_publish = last_tick;

        while self.running.load(Ordering::Acquire) {
            thread::sleep(self.tick_interval);
            let now = Instant::now();
            let scale = f64::from_bits(self.time_scale.load(Ordering::Relaxed));
            let elapsed = now.duration_since(last_tick);
            last_tick = now;

            let outcome = scaled(elapsed, scale).and_then(|dt| {
                panic::catch_unwind(AssertUnwindSafe(|| {
                    session.execute(Command::Tick { dt });
                }))
                .map_err(|payload| panic_message(payload.as_ref()))
            });
            if let Err(message) = outcome {
                log::error!("simulation tick failed: {message}");
                session.execute(Command::Abort {
                    error: SimulationError::LoopFault { message },
                });
            }

            if session.mode() == MowerMode::Stopped {
                break;
            }
            if now.duration_since(last_publish) >= self.publish_interval {
                publish(&self.snapshot, &session);
                last_publish = now;
            }
        }

        publish(&self.snapshot, &session);
        self.running.store(false, Ordering::Release);
        log::info!("simulation thread finished in {}", session.mode().label());
        session
    }
}

fn publish(shared: &SharedSnapshot, session: &Session) {
    let snapshot = Arc::new(session.snapshot());
    let mut guard = shared.write().unwrap_or_else(PoisonError::into_inner);
    *guard = Some(snapshot);
}

fn validate_time_scale(time_scale: f64) -> Result<(), RuntimeError> {
    if time_scale > 0.0 && time_scale <= MAX_TIME_SCALE {
        Ok(())
    } else {
        Err(RuntimeError::InvalidTimeScale(time_scale))
    }
}

/// Simulated time covered by `elapsed` real time.
fn scaled(elapsed: Duration, scale: f64) -> Result<Duration, String> {
    Duration::try_from_secs_f64(elapsed.as_secs_f64() * scale)
        .map_err(|error| format!("cannot scale {elapsed:?} by {scale}: {error}"))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_scale_must_be_positive() {
        assert!(validate_time_scale(2.5).is_ok());
        assert!(matches!(
            validate_time_scale(0.0),
            Err(RuntimeError::InvalidTimeScale(_))
        ));
        assert!(validate_time_scale(f64::NAN).is_err());
        assert!(validate_time_scale(f64::INFINITY).is_err());
        assert!(validate_time_scale(MAX_TIME_SCALE).is_ok());
        assert!(validate_time_scale(1e30).is_err());
    }

    #[test]
    fn scaling_reports_overflow_instead_of_panicking() {
        assert_eq!(
            scaled(Duration::from_secs(2), 2.5),
            Ok(Duration::from_secs(5))
        );
        assert!(scaled(Duration::from_secs(1), 1e30).is_err());
        assert!(scaled(Duration::from_secs(1), f64::NAN).is_err());
    }

    #[test]
    fn panic_messages_are_extracted() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }

    #[test]
    fn idle_driver_has_no_snapshot() {
        let mut simulation = Simulation::new(SimulationSettings::default()).expect("settings");
        assert!(simulation.snapshot().is_none());
        assert!(!simulation.is_running());
        assert!(matches!(
            simulation.step(Duration::from_millis(10)),
            Err(RuntimeError::NotStarted)
        ));
    }
}
