//! Loader for the JSON project files written by the garden editor.

use std::{fs, path::Path};

use anyhow::{anyhow, bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use glam::DVec2;
use mower_sim_core::{MowerConfig, PolicyKind, Polyline, ZonePoint};
use mower_sim_world::Arena;
use serde::Deserialize;

/// Centimetres per map unit assumed when a project does not record one.
const DEFAULT_CALIBRATION: f64 = 10.0;

/// Arena, mower and policy described by a project file.
#[derive(Clone, Debug)]
pub(crate) struct Project {
    /// Garden the mower works in.
    pub(crate) arena: Arena,
    /// Physical mower parameters.
    pub(crate) mower: MowerConfig,
    /// Policy selected by the stored model version.
    pub(crate) policy: PolicyKind,
    /// Last known mower position, used when the garden has no dock.
    pub(crate) position: Option<DVec2>,
}

/// Reads and converts the project stored at `path`.
pub(crate) fn load(path: &Path) -> Result<Project> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read project {}", path.display()))?;
    let data = ProjectData::from_json(&text)
        .with_context(|| format!("failed to parse project {}", path.display()))?;
    data.into_project()
        .with_context(|| format!("invalid project {}", path.display()))
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectData {
    #[serde(default)]
    border: Option<LineData>,
    #[serde(default)]
    obstacles: Option<Vec<LineData>>,
    #[serde(default)]
    calibration: Option<f64>,
    #[serde(default)]
    mower: Option<MowerData>,
    #[serde(default)]
    background_image_base64: Option<String>,
    #[serde(default)]
    charging_station: Option<PointData>,
    #[serde(default)]
    zone_points: Option<Vec<ZonePointData>>,
}

#[derive(Clone, Copy, Debug, Deserialize)]
struct PointData {
    x: f64,
    y: f64,
}

impl From<PointData> for DVec2 {
    fn from(point: PointData) -> Self {
        DVec2::new(point.x, point.y)
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
struct LineData {
    #[serde(default)]
    points: Option<Vec<PointData>>,
    #[serde(default)]
    closed: bool,
}

impl LineData {
    /// Polyline without the duplicated closing vertex some editors store.
    fn to_polyline(&self) -> Polyline {
        let mut points: Vec<DVec2> = self
            .points
            .iter()
            .flatten()
            .copied()
            .map(DVec2::from)
            .collect();
        if self.closed && points.len() > 1 && points.first() == points.last() {
            let _ = points.pop();
        }
        Polyline::new(points, self.closed)
    }
}

#[derive(Clone, Copy, Debug, Deserialize)]
struct ZonePointData {
    x: f64,
    y: f64,
    percentage: i64,
}

#[derive(Clone, Copy, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MowerData {
    #[serde(default)]
    speed_in_cm_per_sec: Option<f64>,
    #[serde(default)]
    mowing_width_in_cm: Option<f64>,
    #[serde(default)]
    battery_capacity_wh: Option<f64>,
    #[serde(default)]
    energy_consumption_wh_per_cm: Option<f64>,
    #[serde(default)]
    current_position: Option<PointData>,
    #[serde(default)]
    version: Option<u32>,
}

impl MowerData {
    fn to_config(self) -> MowerConfig {
        let defaults = MowerConfig::default();
        MowerConfig {
            speed: positive_or(self.speed_in_cm_per_sec, defaults.speed),
            mowing_width: positive_or(self.mowing_width_in_cm, defaults.mowing_width),
            battery_capacity: positive_or(self.battery_capacity_wh, defaults.battery_capacity),
            energy_per_unit: positive_or(
                self.energy_consumption_wh_per_cm,
                defaults.energy_per_unit,
            ),
            charge_seconds: defaults.charge_seconds,
        }
    }
}

/// Editors store zero for fields that were never filled in.
fn positive_or(value: Option<f64>, fallback: f64) -> f64 {
    value
        .filter(|value| value.is_finite() && *value > 0.0)
        .unwrap_or(fallback)
}

impl ProjectData {
    fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    fn into_project(self) -> Result<Project> {
        self.validate_background()?;

        let border = self
            .border
            .as_ref()
            .ok_or_else(|| anyhow!("the project has no border"))?
            .to_polyline();
        let calibration = match self.calibration {
            Some(value) if value > 0.0 => value,
            Some(value) => bail!("calibration must be positive, found {value}"),
            None => DEFAULT_CALIBRATION,
        };
        let mut arena = Arena::new(border, calibration).context("invalid border")?;

        for (index, obstacle) in self.obstacles.iter().flatten().enumerate() {
            arena
                .add_obstacle(obstacle.to_polyline())
                .with_context(|| format!("invalid obstacle {index}"))?;
        }
        arena.set_dock(self.charging_station.map(DVec2::from));

        let zones = self
            .zone_points
            .iter()
            .flatten()
            .map(|zone| -> Result<ZonePoint> {
                let percentage = u8::try_from(zone.percentage).map_err(|_| {
                    anyhow!("zone percentage {} is out of range", zone.percentage)
                })?;
                Ok(ZonePoint::new(DVec2::new(zone.x, zone.y), percentage)?)
            })
            .collect::<Result<Vec<_>>>()?;
        arena.set_zone_points(zones);

        let mower = self.mower.unwrap_or_default();
        let policy = match mower.version {
            None => PolicyKind::default(),
            Some(version) => PolicyKind::from_version(version)
                .ok_or_else(|| anyhow!("unknown mower model version {version}"))?,
        };

        log::info!(
            "loaded project with {} border points, {} obstacles and {} zones",
            arena.border().len(),
            arena.obstacles().len(),
            arena.zone_count()
        );
        Ok(Project {
            arena,
            mower: mower.to_config(),
            policy,
            position: mower.current_position.map(DVec2::from),
        })
    }

    fn validate_background(&self) -> Result<()> {
        let Some(encoded) = self.background_image_base64.as_deref() else {
            return Ok(());
        };
        let bytes = STANDARD
            .decode(encoded.trim())
            .context("background image is not valid base64")?;
        log::debug!("project carries a {} byte background image", bytes.len());
        Ok(())
    }
}
