#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Command-line adapter that runs the mower simulation on a garden project.

mod project;
mod report;
mod settings;

use std::{
    path::PathBuf,
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use clap::Parser;
use mower_sim_core::{Job, MowerMode, PolicyKind};
use mower_sim_runtime::{Simulation, SimulationSettings, SimulationSnapshot};

use crate::{project::Project, report::StatusReport, settings::Settings};

/// Simulated time advanced per synchronous step.
const SYNCHRONOUS_STEP: Duration = Duration::from_millis(100);
/// Real time between polls of a threaded run.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Simulates an autonomous lawn mower on a garden project.
#[derive(Debug, Parser)]
#[command(name = "mower-sim", version)]
struct CliArgs {
    /// Project file written by the garden editor.
    project: PathBuf,
    /// TOML file overriding mower, navigation and run parameters.
    #[arg(long)]
    settings: Option<PathBuf>,
    /// Simulated seconds to run for.
    #[arg(long, default_value_t = 3_600.0)]
    duration: f64,
    /// Simulated seconds per real second when running on the simulation thread.
    #[arg(long)]
    time_scale: Option<f64>,
    /// Seed of the navigation random number generator.
    #[arg(long)]
    seed: Option<u64>,
    /// Mower model version selecting the zone-balancing policy.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=4))]
    model_version: Option<u32>,
    /// Cut a single lap along the border instead of mowing.
    #[arg(long)]
    edge_cut: bool,
    /// Run on the simulation thread in scaled real time instead of stepping.
    #[arg(long)]
    realtime: bool,
    /// Simulated seconds between intermediate status reports, 0 disables them.
    #[arg(long, default_value_t = 0.0)]
    report_every: f64,
}

impl CliArgs {
    fn duration(&self) -> Result<Duration> {
        Duration::try_from_secs_f64(self.duration)
            .with_context(|| format!("invalid duration {}", self.duration))
    }

    fn report_interval(&self) -> Option<Duration> {
        Duration::try_from_secs_f64(self.report_every)
            .ok()
            .filter(|interval| !interval.is_zero())
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = CliArgs::parse();
    let project = project::load(&args.project)?;
    let overrides = match &args.settings {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    let settings = simulation_settings(&project, &overrides, &args);
    let job = if args.edge_cut {
        Job::EdgeCutting
    } else {
        Job::Mowing
    };

    let mut simulation = Simulation::new(settings).context("invalid simulation settings")?;
    let snapshot = if args.realtime {
        run_threaded(&mut simulation, project, job, &args)?
    } else {
        run_synchronous(&mut simulation, project, job, &args)?
    };
    print!("{}", StatusReport::new(&snapshot));
    Ok(())
}

/// Layers the settings file and then the command line over the project.
fn simulation_settings(
    project: &Project,
    overrides: &Settings,
    args: &CliArgs,
) -> SimulationSettings {
    let defaults = SimulationSettings::default();

    let mut mower = project.mower.clone();
    overrides.mower.apply(&mut mower);

    let policy = args
        .model_version
        .and_then(PolicyKind::from_version)
        .or(overrides.policy)
        .unwrap_or(project.policy);

    SimulationSettings {
        time_scale: args
            .time_scale
            .or(overrides.time_scale)
            .unwrap_or(defaults.time_scale),
        seed: args.seed.or(overrides.seed).unwrap_or(defaults.seed),
        policy,
        mower,
        tuning: overrides.navigation.clone().unwrap_or(defaults.tuning),
        initial_position: project.position,
        ..defaults
    }
}

fn run_synchronous(
    simulation: &mut Simulation,
    project: Project,
    job: Job,
    args: &CliArgs,
) -> Result<SimulationSnapshot> {
    let duration = args.duration()?;
    simulation.prepare(project.arena, job)?;

    let mut reporter = Reporter::new(args.report_interval());
    loop {
        let snapshot = latest(simulation)?;
        reporter.observe(&snapshot);
        let finished = snapshot.mower.mode == MowerMode::Stopped;
        if finished || snapshot.mower.simulated_time >= duration {
            return Ok(snapshot);
        }
        simulation.step(SYNCHRONOUS_STEP)?;
    }
}

fn run_threaded(
    simulation: &mut Simulation,
    project: Project,
    job: Job,
    args: &CliArgs,
) -> Result<SimulationSnapshot> {
    let duration = args.duration()?;
    match job {
        Job::Mowing => simulation.start(project.arena)?,
        Job::EdgeCutting => simulation.start_edge_cutting(project.arena)?,
    }

    let started = Instant::now();
    let mut reporter = Reporter::new(args.report_interval());
    while simulation.is_running() {
        let snapshot = latest(simulation)?;
        reporter.observe(&snapshot);
        if snapshot.mower.simulated_time >= duration {
            break;
        }
        thread::sleep(POLL_INTERVAL);
    }

    simulation.stop()?;
    log::info!("threaded run took {:.1?} of real time", started.elapsed());
    latest(simulation)
}

fn latest(simulation: &Simulation) -> Result<SimulationSnapshot> {
    simulation
        .snapshot()
        .map(|snapshot| snapshot.as_ref().clone())
        .context("the simulation has not published a snapshot")
}

/// Prints intermediate reports at fixed simulated-time intervals.
struct Reporter {
    interval: Option<Duration>,
    next: Duration,
}

impl Reporter {
    fn new(interval: Option<Duration>) -> Self {
        Self {
            interval,
            next: interval.unwrap_or_default(),
        }
    }

    fn observe(&mut self, snapshot: &SimulationSnapshot) {
        let Some(interval) = self.interval else {
            return;
        };
        if snapshot.mower.simulated_time < self.next {
            return;
        }
        println!("{}", StatusReport::new(snapshot));
        while self.next <= snapshot.mower.simulated_time {
            self.next += interval;
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::DVec2;
    use mower_sim_core::{MowerConfig, Polyline};
    use mower_sim_world::Arena;

    use super::*;

    fn project() -> Project {
        Project {
            arena: Arena::new(Polyline::rectangle(DVec2::ZERO, DVec2::splat(50.0)), 1.0)
                .expect("arena"),
            mower: MowerConfig::default(),
            policy: PolicyKind::CollisionCount,
            position: Some(DVec2::new(5.0, 5.0)),
        }
    }

    #[test]
    fn command_line_overrides_settings_file() {
        let args = CliArgs::parse_from([
            "mower-sim",
            "garden.json",
            "--seed",
            "7",
            "--model-version",
            "4",
        ]);
        let overrides = Settings {
            seed: Some(3),
            time_scale: Some(12.0),
            policy: Some(PolicyKind::BlendedCollisions),
            ..Settings::default()
        };

        let settings = simulation_settings(&project(), &overrides, &args);

        assert_eq!(settings.seed, 7);
        assert_eq!(settings.time_scale, 12.0);
        assert_eq!(settings.policy, PolicyKind::BlendedDistance);
        assert_eq!(settings.initial_position, Some(DVec2::new(5.0, 5.0)));
    }

    #[test]
    fn project_policy_applies_without_overrides() {
        let args = CliArgs::parse_from(["mower-sim", "garden.json"]);
        let settings = simulation_settings(&project(), &Settings::default(), &args);
        assert_eq!(settings.policy, PolicyKind::CollisionCount);
        assert_eq!(settings.time_scale, 1.0);
    }

    #[test]
    fn model_version_is_range_checked() {
        let parsed =
            CliArgs::try_parse_from(["mower-sim", "garden.json", "--model-version", "5"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn synchronous_run_stops_at_the_requested_duration() {
        let args = CliArgs::parse_from(["mower-sim", "garden.json", "--duration", "30"]);
        let project = project();
        let settings = simulation_settings(&project, &Settings::default(), &args);
        let mut simulation = Simulation::new(settings).expect("settings");

        let snapshot =
            run_synchronous(&mut simulation, project, Job::Mowing, &args).expect("run");

        assert_eq!(snapshot.mower.simulated_time, Duration::from_secs(30));
        assert!(snapshot.mower.coverage > 0.0);
    }
}
