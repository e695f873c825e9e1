use std::num::ParseFloatError;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use link::InputSource;
use messages::ControlSample;
use thiserror::Error;

use crate::settings::Preferences;

/// Normalized stick positions: roll, pitch and yaw in [-1, 1], thrust in [0, 1].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Sticks {
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
    pub thrust: f32,
}

#[derive(Error, Debug, PartialEq)]
pub enum SticksError {
    #[error("expected `roll pitch yaw thrust`, got {0} values")]
    Arity(usize),
    #[error("invalid stick value {value:?}: {source}")]
    Number {
        value: String,
        #[source]
        source: ParseFloatError,
    },
}

impl FromStr for Sticks {
    type Err = SticksError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let values = s.split_whitespace()
            .map(|v| v.parse::<f32>().map_err(|source| SticksError::Number {
                value: v.to_string(),
                source,
            }))
            .collect::<Result<Vec<_>, _>>()?;

        match values[..] {
            [roll, pitch, yaw, thrust] => Ok(Self { roll, pitch, yaw, thrust }),
            _ => Err(SticksError::Arity(values.len())),
        }
    }
}

/// Latest stick positions typed by the pilot, scaled by their preferences
/// whenever the link asks for a sample.
pub struct StickInput {
    preferences: Arc<Preferences>,
    latest: Mutex<Option<Sticks>>,
}

impl StickInput {
    pub fn new(preferences: Arc<Preferences>) -> Self {
        Self {
            preferences,
            latest: Mutex::new(None),
        }
    }

    pub fn update(&self, sticks: Sticks) {
        match self.latest.lock() {
            Ok(mut latest) => *latest = Some(sticks),
            Err(e) => log::warn!("Failed to store stick input: {}", e),
        }
    }

    pub fn current(&self) -> Option<Sticks> {
        self.latest.lock().ok().and_then(|latest| *latest)
    }
}

impl InputSource for StickInput {
    fn sample(&self) -> Option<ControlSample> {
        self.current().map(|sticks| self.preferences.scale(sticks))
    }
}
