use std::io::ErrorKind;
use std::path::Path;

use eyre::{Result, WrapErr};
use messages::ControlSample;
use serde::{Deserialize, Serialize};

use crate::input::Sticks;

/// Pilot preferences persisted between sessions.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Preferences {
    /// Initial yaw setting. The console can change it for the session.
    pub yaw_enabled: bool,
    /// Percentage of full throttle reached with the thrust stick at the top.
    pub max_thrust: f32,
    /// Roll/pitch angle at full stick deflection.
    pub pitch_rate: f32,
    /// Yaw rate at full stick deflection.
    pub yaw_rate: f32,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            yaw_enabled: true,
            max_thrust: 80.0,
            pitch_rate: 20.0,
            yaw_rate: 150.0,
        }
    }
}

impl Preferences {
    /// Reads preferences from a JSON file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::info!("No preferences at {}, using defaults", path.display());
                return Ok(Self::default())
            }
            Err(e) => {
                return Err(eyre::Report::new(e)
                    .wrap_err(format!("Failed to read preferences from {}", path.display())))
            }
        };

        serde_json::from_str(&text)
            .wrap_err_with(|| format!("Malformed preferences in {}", path.display()))
    }

    /// Maps normalized stick positions onto the values sent to the vehicle.
    pub fn scale(&self, sticks: Sticks) -> ControlSample {
        let max_thrust = self.max_thrust.clamp(0.0, 100.0) / 100.0;
        ControlSample {
            roll: sticks.roll.clamp(-1.0, 1.0) * self.pitch_rate,
            pitch: sticks.pitch.clamp(-1.0, 1.0) * self.pitch_rate,
            yaw: sticks.yaw.clamp(-1.0, 1.0) * self.yaw_rate,
            thrust: sticks.thrust.clamp(0.0, 1.0) * max_thrust * u16::MAX as f32,
        }
    }
}
