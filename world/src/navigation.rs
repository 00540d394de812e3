//! Random-bounce heading selection and raycasting used while mowing.

use std::f64::consts::{FRAC_PI_2, PI, TAU};

use mower_sim_core::{
    geometry::{heading, rotate},
    DVec2, NavigationTuning, Segment,
};
use rand::Rng;

use crate::arena::Arena;

/// Position farther than this from the segment end means the mower is still
/// driving the segment.
const SEGMENT_END_TOLERANCE: f64 = 0.001;

const SWEEP_DISTANCES: [f64; 4] = [0.2, 0.5, 0.05, 1.0];
const SWEEP_STEPS_DEGREES: [f64; 3] = [5.0, 2.0, 1.0];
const NUDGE_PROBE: f64 = 0.1;

/// Outcome of a mowing plan.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum MowingPlan {
    /// The current segment is still being driven.
    Continue,
    /// Drive straight to a wall hit.
    Drive { target: DVec2 },
    /// No valid heading was found.
    Stuck,
}

/// Plans the next mowing segment from `position`.
pub(crate) fn plan_mowing<R: Rng>(
    arena: &Arena,
    tuning: &NavigationTuning,
    rng: &mut R,
    position: DVec2,
    previous: Option<Segment>,
) -> MowingPlan {
    if let Some(segment) = previous {
        if position.distance(segment.end()) > SEGMENT_END_TOLERANCE {
            return MowingPlan::Continue;
        }
    }

    let direction = choose_heading(arena, tuning, rng, position, previous);
    match cast(arena, tuning, rng, position, direction) {
        Some(target) => MowingPlan::Drive { target },
        None => MowingPlan::Stuck,
    }
}

fn choose_heading<R: Rng>(
    arena: &Arena,
    tuning: &NavigationTuning,
    rng: &mut R,
    position: DVec2,
    previous: Option<Segment>,
) -> DVec2 {
    let Some(previous) = previous else {
        return random_heading(rng);
    };
    if position.distance(previous.start()) < tuning.epsilon {
        return random_heading(rng);
    }

    let touching = arena.touching_walls(position, tuning.touch_distance);
    match touching.as_slice() {
        [] => random_heading(rng),
        [wall] => {
            let side = incoming_side(arena, tuning, *wall, position, previous.start());
            bounce_direction(*wall, position, side, rng, tuning.bounce_window_degrees)
                .unwrap_or_else(|| random_heading(rng))
        }
        [first, ..] => corner_escape(arena, tuning, position)
            .unwrap_or_else(|| nudge_off(arena, tuning, *first, position)),
    }
}

/// Point on the side of `wall` the mower approached from.
///
/// Falls back to a containment probe when the mower arrived along the wall.
fn incoming_side(
    arena: &Arena,
    tuning: &NavigationTuning,
    wall: Segment,
    hit: DVec2,
    previous: DVec2,
) -> DVec2 {
    let normal = wall.direction().perp();
    if (previous - hit).dot(normal).abs() > f64::EPSILON {
        return previous;
    }
    let probe = hit + normal * tuning.probe_distance;
    if arena.contains(probe, tuning.epsilon) {
        probe
    } else {
        hit - normal * tuning.probe_distance
    }
}

/// Bounce heading off `wall` at `hit`.
///
/// The wall normal facing `toward` is rotated by a uniform angle of up to
/// `window_degrees`, clockwise or counter-clockwise with equal odds. Returns
/// `None` for degenerate walls.
pub fn bounce_direction<R: Rng>(
    wall: Segment,
    hit: DVec2,
    toward: DVec2,
    rng: &mut R,
    window_degrees: f64,
) -> Option<DVec2> {
    if wall.length() < 1e-4 {
        return None;
    }
    let mut normal = wall.direction().perp();
    if normal.dot(toward - hit) < 0.0 {
        normal = -normal;
    }

    let mut angle = rng.gen::<f64>() * window_degrees.to_radians();
    if rng.gen::<f64>() < 0.5 {
        angle = -angle;
    }
    Some(rotate(normal, angle))
}

fn corner_escape(arena: &Arena, tuning: &NavigationTuning, position: DVec2) -> Option<DVec2> {
    for distance in SWEEP_DISTANCES {
        for step in SWEEP_STEPS_DEGREES {
            let mut degrees = 0.0_f64;
            while degrees < 360.0 {
                let direction = heading(degrees.to_radians());
                if arena.contains(position + direction * distance, tuning.epsilon) {
                    return Some(direction);
                }
                degrees += step;
            }
        }
    }
    None
}

fn nudge_off(arena: &Arena, tuning: &NavigationTuning, wall: Segment, position: DVec2) -> DVec2 {
    let delta = wall.delta();
    let perpendicular = delta.y.atan2(delta.x) + FRAC_PI_2;
    let direction = heading(perpendicular);
    if arena.contains(position + direction * NUDGE_PROBE, tuning.epsilon) {
        direction
    } else {
        heading(perpendicular - PI)
    }
}

fn random_heading<R: Rng>(rng: &mut R) -> DVec2 {
    heading(rng.gen::<f64>() * TAU)
}

fn jitter<R: Rng>(rng: &mut R, direction: DVec2, attempt: u32) -> DVec2 {
    let angle = direction.y.atan2(direction.x)
        + (rng.gen::<f64>() - 0.5) * (0.5 + f64::from(attempt) * 0.05);
    heading(angle)
}

fn cast<R: Rng>(
    arena: &Arena,
    tuning: &NavigationTuning,
    rng: &mut R,
    position: DVec2,
    mut direction: DVec2,
) -> Option<DVec2> {
    for attempt in 0..tuning.max_raycast_attempts {
        let probe = position + direction * tuning.probe_distance;
        if arena.contains(probe, tuning.epsilon) {
            let start = position + direction * tuning.ray_offset;
            let ray = Segment::new(start, start + direction * tuning.ray_length);
            if let Some(hit) = arena.colliding_wall(&ray, tuning.epsilon) {
                let midpoint = (position + hit.point) * 0.5;
                if position.distance(hit.point) > tuning.epsilon
                    && arena.contains(midpoint, tuning.epsilon)
                {
                    return Some(hit.point);
                }
            }
        }
        direction = jitter(rng, direction, attempt);
    }
    None
}
