//! Plain-text status report of a simulation snapshot.

use std::fmt;

use mower_sim_core::{ZoneMetric, ZoneStatEntry};
use mower_sim_runtime::SimulationSnapshot;

/// Centimetres per metre.
const CENTIMETRES_PER_METRE: f64 = 100.0;

/// Formats a snapshot the way the status overlay of the editor shows it.
pub(crate) struct StatusReport<'a> {
    snapshot: &'a SimulationSnapshot,
}

impl<'a> StatusReport<'a> {
    pub(crate) const fn new(snapshot: &'a SimulationSnapshot) -> Self {
        Self { snapshot }
    }
}

impl fmt::Display for StatusReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mower = &self.snapshot.mower;
        writeln!(f, "{} ({:.0}%)", mower.mode.label(), mower.battery_percentage())?;

        let seconds = mower.simulated_time.as_secs();
        writeln!(
            f,
            "Runtime: {:02}:{:02}:{:02}",
            seconds / 3600,
            seconds / 60 % 60,
            seconds % 60
        )?;
        writeln!(f, "Coverage: {:.1}%", mower.coverage * 100.0)?;
        writeln!(f, "Collisions: {}", mower.collisions)?;
        writeln!(f, "Nav Errors: {}", mower.navigation_errors)?;

        let zones = &self.snapshot.zones;
        for entry in &zones.entries {
            write_zone(f, zones.metric, entry)?;
        }
        if !zones.entries.is_empty() {
            writeln!(
                f,
                "Transition distance: {:.1} m",
                mower.transition_distance / CENTIMETRES_PER_METRE
            )?;
        }

        if let Some(error) = &mower.last_error {
            writeln!(f, "Last error: {error}")?;
        }
        Ok(())
    }
}

fn write_zone(
    f: &mut fmt::Formatter<'_>,
    metric: ZoneMetric,
    entry: &ZoneStatEntry,
) -> fmt::Result {
    let label = entry.zone.label();
    let actual = entry.actual_share * 100.0;
    let target = (entry.target_share * 100.0).round();
    match metric {
        ZoneMetric::Collisions => writeln!(
            f,
            "Zone {label}: {:.0} ({actual:.1}% / Target: {target:.0}%)",
            entry.value
        ),
        ZoneMetric::Distance => writeln!(
            f,
            "Zone {label}: {:.1} m ({actual:.1}% / Target: {target:.0}%)",
            entry.value / CENTIMETRES_PER_METRE
        ),
    }
}
