//! Geometric step sequencer. Squares drawn on a grid become quantized,
//! scale-aware MIDI notes scheduled against a host transport.

pub mod config;
pub mod generator;
pub mod host;
pub mod midi;
pub mod pattern;
pub mod pitch;
pub mod playback;
pub mod scale;
pub mod state;
pub mod timing;

/// Application name, for MIDI port names, etc.
pub const APP_NAME: &str = "Tessera";
