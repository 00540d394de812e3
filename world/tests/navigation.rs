use std::time::Duration;

use mower_sim_core::{
    Command, DVec2, Event, Job, MowerConfig, MowerMode, Polyline, SimulationError,
    TeleportReason,
};
use mower_sim_world::{self as world, query, Arena, World};

fn apply(world: &mut World, command: Command) -> Vec<Event> {
    let mut events = Vec::new();
    world::apply(world, command, &mut events);
    events
}

fn tick(world: &mut World, millis: u64) -> Vec<Event> {
    apply(
        world,
        Command::Tick {
            dt: Duration::from_millis(millis),
        },
    )
}

fn square(size: f64) -> Arena {
    Arena::new(Polyline::rectangle(DVec2::ZERO, DVec2::splat(size)), 1.0).expect("arena")
}

fn concave_garden() -> Arena {
    Arena::new(
        Polyline::polygon(vec![
            DVec2::new(0.0, 0.0),
            DVec2::new(300.0, 0.0),
            DVec2::new(300.0, 220.0),
            DVec2::new(160.0, 90.0),
            DVec2::new(150.0, 240.0),
            DVec2::new(0.0, 240.0),
        ]),
        1.0,
    )
    .expect("arena")
    .with_obstacle(Polyline::rectangle(
        DVec2::new(40.0, 40.0),
        DVec2::new(90.0, 70.0),
    ))
    .expect("obstacle")
    .with_obstacle(Polyline::polygon(vec![
        DVec2::new(60.0, 150.0),
        DVec2::new(110.0, 170.0),
        DVec2::new(70.0, 200.0),
    ]))
    .expect("obstacle")
}

#[test]
fn mowing_segments_stay_inside_concave_arena() {
    for seed in 0..16 {
        let arena = concave_garden();
        let mut world = World::new(arena.clone(), MowerConfig::default(), seed);
        let _ = apply(
            &mut world,
            Command::PlaceMower {
                position: DVec2::new(20.0, 20.0),
            },
        );
        let mut events = apply(&mut world, Command::Start { job: Job::Mowing });

        for _ in 0..400 {
            for event in &events {
                if let Event::SegmentPlanned {
                    segment,
                    mode: MowerMode::Mowing,
                } = event
                {
                    assert!(
                        arena.contains(segment.end(), 0.05 + 1e-6),
                        "seed {seed}: target {} outside",
                        segment.end()
                    );
                    assert!(
                        arena.contains(segment.midpoint(), 0.05 + 1e-6),
                        "seed {seed}: midpoint {} outside",
                        segment.midpoint()
                    );
                }
            }
            events = tick(&mut world, 250);
        }

        assert_eq!(query::navigation_errors(&world), 0, "seed {seed}");
        assert!(query::collisions(&world) > 0, "seed {seed}");
    }
}

#[test]
fn coverage_grows_while_mowing() {
    let mut world = World::new(square(100.0), MowerConfig::default(), 17);
    let _ = apply(&mut world, Command::Start { job: Job::Mowing });
    for _ in 0..200 {
        let _ = tick(&mut world, 250);
    }
    let coverage = query::snapshot(&world).coverage;
    assert!(coverage > 0.05 && coverage <= 1.0, "coverage {coverage}");
}

#[test]
fn depleted_battery_teleports_to_dock() {
    let arena = square(500.0).with_dock(DVec2::new(0.0, 250.0));
    let mut world = World::new(arena, MowerConfig::default(), 2);
    let _ = apply(&mut world, Command::Start { job: Job::Mowing });
    for _ in 0..10 {
        let _ = tick(&mut world, 100);
    }

    let _ = apply(&mut world, Command::SetBatteryLevel { level: 0.0001 });
    let events = tick(&mut world, 100);

    assert!(events.contains(&Event::TeleportedToDock {
        dock: DVec2::new(0.0, 250.0),
        reason: TeleportReason::BatteryDepleted,
    }));
    assert_eq!(query::mode(&world), MowerMode::Charging);
    assert_eq!(query::position(&world), DVec2::new(0.0, 250.0));
    assert_eq!(query::battery_level(&world), 0.0);
}

#[test]
fn depleted_battery_without_dock_stops_with_error() {
    let mut world = World::new(square(500.0), MowerConfig::default(), 2);
    let _ = apply(&mut world, Command::Start { job: Job::Mowing });
    let _ = apply(&mut world, Command::SetBatteryLevel { level: 0.0001 });
    let events = tick(&mut world, 100);

    assert_eq!(query::mode(&world), MowerMode::Stopped);
    assert!(matches!(
        query::last_error(&world),
        Some(SimulationError::BatteryDepletedWithoutDock { .. })
    ));
    assert!(events
        .iter()
        .any(|event| matches!(event, Event::Faulted { .. })));
}

#[test]
fn low_battery_returns_to_dock_along_border() {
    let arena = square(200.0).with_dock(DVec2::ZERO);
    let mut world = World::new(arena, MowerConfig::default(), 8);
    let _ = apply(&mut world, Command::Start { job: Job::Mowing });
    for _ in 0..30 {
        let _ = tick(&mut world, 100);
    }
    let _ = apply(&mut world, Command::SetBatteryLevel { level: 4.0 });

    let mut modes = Vec::new();
    for _ in 0..5_000 {
        for event in tick(&mut world, 100) {
            match event {
                Event::ModeChanged { to, .. } => modes.push(to),
                Event::TeleportedToDock { .. } => panic!("mower should dock on its own"),
                _ => {}
            }
        }
        if query::mode(&world) == MowerMode::Charging {
            break;
        }
    }

    assert_eq!(query::mode(&world), MowerMode::Charging);
    assert!(modes.contains(&MowerMode::SeekingBorder));
    assert!(modes.contains(&MowerMode::FollowingBorder));
    assert!(query::position(&world).distance(DVec2::ZERO) < 12.0);
}

#[test]
fn navigation_error_recovers_at_dock() {
    let arena = square(100.0)
        .with_obstacle(Polyline::rectangle(
            DVec2::splat(-10.0),
            DVec2::splat(110.0),
        ))
        .expect("obstacle")
        .with_dock(DVec2::new(10.0, 10.0));
    let mut world = World::new(arena, MowerConfig::default(), 4);

    let events = apply(&mut world, Command::Start { job: Job::Mowing });

    assert_eq!(query::navigation_errors(&world), 1);
    assert_eq!(query::mode(&world), MowerMode::Charging);
    assert_eq!(query::position(&world), DVec2::new(10.0, 10.0));
    assert!(query::last_error(&world).is_none());
    assert!(events.contains(&Event::TeleportedToDock {
        dock: DVec2::new(10.0, 10.0),
        reason: TeleportReason::Stuck,
    }));
}

#[test]
fn navigation_error_without_dock_is_fatal() {
    let sliver = Arena::new(
        Polyline::polygon(vec![
            DVec2::new(0.0, 0.0),
            DVec2::new(0.5, 0.0),
            DVec2::new(0.0, 0.5),
        ]),
        1.0,
    )
    .expect("arena");
    let mut world = World::new(sliver, MowerConfig::default(), 4);
    let _ = apply(
        &mut world,
        Command::PlaceMower {
            position: DVec2::new(0.1, 0.1),
        },
    );
    let _ = apply(&mut world, Command::Start { job: Job::Mowing });

    assert_eq!(query::mode(&world), MowerMode::Stopped);
    assert_eq!(query::navigation_errors(&world), 1);
    assert!(matches!(
        query::last_error(&world),
        Some(SimulationError::StuckWithoutDock { .. })
    ));
}

#[test]
fn edge_cutting_laps_the_border_once_and_docks() {
    let arena = square(100.0).with_dock(DVec2::new(3.0, 2.0));
    let mut world = World::new(arena, MowerConfig::default(), 6);
    let _ = apply(&mut world, Command::Start { job: Job::EdgeCutting });
    assert_eq!(query::position(&world), DVec2::ZERO);

    for _ in 0..10 {
        if query::mode(&world) != MowerMode::EdgeCutting {
            break;
        }
        let _ = apply(&mut world, Command::FinishSegment);
    }

    assert_eq!(query::mode(&world), MowerMode::Charging);
    assert_eq!(
        query::trace(&world),
        &[
            DVec2::new(0.0, 0.0),
            DVec2::new(0.0, 100.0),
            DVec2::new(100.0, 100.0),
            DVec2::new(100.0, 0.0),
            DVec2::new(0.0, 0.0),
        ]
    );
}

#[test]
fn edge_cutting_without_dock_stops_cleanly() {
    let mut world = World::new(square(50.0), MowerConfig::default(), 6);
    let _ = apply(&mut world, Command::Start { job: Job::EdgeCutting });

    let mut completed = 0;
    for _ in 0..2_000 {
        completed += tick(&mut world, 100)
            .iter()
            .filter(|event| matches!(event, Event::SegmentCompleted { .. }))
            .count();
        if query::mode(&world) == MowerMode::Stopped {
            break;
        }
    }

    assert_eq!(query::mode(&world), MowerMode::Stopped);
    assert_eq!(completed, 4);
    assert!(query::last_error(&world).is_none());
    assert_eq!(query::position(&world), DVec2::ZERO);
}
