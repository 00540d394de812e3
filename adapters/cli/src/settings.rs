//! Optional TOML file overriding the run parameters of a project.

use std::{fs, path::Path};

use anyhow::{Context, Result};
use mower_sim_core::{MowerConfig, NavigationTuning, PolicyKind};
use serde::Deserialize;

/// Overrides read from a settings file. Absent keys keep the project values.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct Settings {
    pub(crate) time_scale: Option<f64>,
    pub(crate) seed: Option<u64>,
    pub(crate) policy: Option<PolicyKind>,
    pub(crate) mower: MowerOverrides,
    pub(crate) navigation: Option<NavigationTuning>,
}

/// Per-field overrides of [`MowerConfig`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct MowerOverrides {
    speed: Option<f64>,
    mowing_width: Option<f64>,
    battery_capacity: Option<f64>,
    energy_per_unit: Option<f64>,
    charge_seconds: Option<f64>,
}

impl MowerOverrides {
    pub(crate) fn apply(&self, config: &mut MowerConfig) {
        let fields = [
            (self.speed, &mut config.speed),
            (self.mowing_width, &mut config.mowing_width),
            (self.battery_capacity, &mut config.battery_capacity),
            (self.energy_per_unit, &mut config.energy_per_unit),
            (self.charge_seconds, &mut config.charge_seconds),
        ];
        for (value, field) in fields {
            if let Some(value) = value {
                *field = value;
            }
        }
    }
}

impl Settings {
    pub(crate) fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid settings {}", path.display()))
    }

    fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}
