//! Pitch modulation waveforms and notation utilities.

const NOTE_NAMES: [&str; 12] = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];

/// Highest MIDI note number.
pub const MIDI_NOTE_MAX: u8 = 127;

/// Returns the name of a pitch class, e.g. 1 -> "C#".
pub fn pitch_class_name(pitch_class: u8) -> &'static str {
    NOTE_NAMES[(pitch_class % 12) as usize]
}

/// Returns the scientific name of a MIDI note, e.g. 60 -> "C4".
pub fn midi_note_name(note: u8) -> String {
    let octave = (note / 12) as i32 - 1;
    format!("{}{}", pitch_class_name(note), octave)
}

/// Wrap a position into [0, 1). Works for negative input.
pub fn wrap_unit(position: f64) -> f64 {
    let wrapped = position - position.floor();
    // floor can leave exactly 1.0 behind for tiny negative inputs
    if wrapped >= 1.0 { 0.0 } else { wrapped }
}

/// Sample a pitch waveform at a normalized position, interpolating linearly
/// between neighboring samples. The position wraps, so any loop-relative
/// position is valid. Returns 0 for an empty waveform.
pub fn waveform_offset(waveform: &[f32], position: f64) -> f32 {
    let n = waveform.len();
    if n == 0 {
        return 0.0
    }

    let index = wrap_unit(position) * (n - 1) as f64;
    let i = index.floor() as usize;
    let j = (i + 1).min(n - 1);
    let t = (index - i as f64) as f32;
    waveform[i] + (waveform[j] - waveform[i]) * t
}

/// Convert an absolute transport position to a position within a pitch loop
/// of `loop_beats` beats. The result is not wrapped.
pub fn pitch_loop_position(beat: f64, loop_beats: f64) -> f64 {
    if loop_beats <= 0.0 {
        0.0
    } else {
        beat / loop_beats
    }
}
