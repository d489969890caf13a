//! Square geometry to MIDI mapping and start-time quantization.

use crate::{
    pattern::{ColorChannelConfig, Square},
    pitch::MIDI_NOTE_MAX,
    timing::{Quantize, TimeSignature},
};

/// Maps a square's vertical center onto the channel's note range. The top of
/// the grid is `high_note`, the bottom is `low_note`. `pitch_offset` is in
/// semitones and is added before rounding.
pub fn calculate_midi_note(square: &Square, config: &ColorChannelConfig, pitch_offset: f32
) -> u8 {
    let center_y = square.center_y() as f64;
    let high = config.high_note() as f64;
    let low = config.low_note() as f64;
    let note = (high + (low - high) * center_y + pitch_offset as f64).round();
    note.clamp(0.0, MIDI_NOTE_MAX as f64) as u8
}

/// Taller squares play louder.
pub fn calculate_velocity(square: &Square) -> u8 {
    (1.0 + square.height as f64 * 126.0).round().clamp(1.0, 127.0) as u8
}

/// Round a beat position to the nearest grid line. Halfway cases round away
/// from zero.
pub fn apply_quantization(beats: f64, quantize: Quantize, time_signature: TimeSignature
) -> f64 {
    let interval = quantize.interval_beats(time_signature);
    (beats / interval).round() * interval
}
