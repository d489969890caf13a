use std::error::Error;

use serde::{Serialize, Deserialize};

use crate::{pattern::DEFAULT_PROBABILITY, playback::DEFAULT_TEMPO};

const CONFIG_PATH: &str = "config.toml";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Snap generated notes to the active scale.
    pub scale_snap: bool,
    /// Probability given to channels of a new pattern.
    pub default_probability: f32,
    /// Fixed seed for probability mode. Random if unset.
    pub rng_seed: Option<u64>,
    /// Tempo used by the standalone host.
    pub tempo: f64,
    /// MIDI output port name, or the first port if unset.
    pub midi_output: Option<String>,
    /// Pattern file loaded when none is given on the command line.
    pub state_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scale_snap: true,
            default_probability: DEFAULT_PROBABILITY,
            rng_seed: None,
            tempo: DEFAULT_TEMPO,
            midi_output: None,
            state_path: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, Box<dyn Error>> {
        let s = std::fs::read_to_string(CONFIG_PATH)?;
        Self::from_toml(&s)
    }

    /// Parse settings. Missing keys take default values.
    pub fn from_toml(s: &str) -> Result<Self, Box<dyn Error>> {
        let c = toml::from_str(s)?;
        Ok(c)
    }
}
