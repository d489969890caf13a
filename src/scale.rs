//! Scale tables, scale snapping, and the scale sequencer.

use crate::pitch::{self, MIDI_NOTE_MAX};

/// Named scales. Each maps to a fixed set of semitone intervals above the
/// root.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ScaleType {
    #[default]
    Major,
    NaturalMinor,
    HarmonicMinor,
    MelodicMinor,
    Dorian,
    Phrygian,
    Lydian,
    Mixolydian,
    Locrian,
    MajorPentatonic,
    MinorPentatonic,
    Blues,
    WholeTone,
    Diminished,
    HungarianMinor,
    Hirajoshi,
    Chromatic,
}

impl ScaleType {
    pub const ALL: [ScaleType; 17] = [
        ScaleType::Major,
        ScaleType::NaturalMinor,
        ScaleType::HarmonicMinor,
        ScaleType::MelodicMinor,
        ScaleType::Dorian,
        ScaleType::Phrygian,
        ScaleType::Lydian,
        ScaleType::Mixolydian,
        ScaleType::Locrian,
        ScaleType::MajorPentatonic,
        ScaleType::MinorPentatonic,
        ScaleType::Blues,
        ScaleType::WholeTone,
        ScaleType::Diminished,
        ScaleType::HungarianMinor,
        ScaleType::Hirajoshi,
        ScaleType::Chromatic,
    ];

    /// Semitone intervals from the root (root = 0), ascending.
    pub fn intervals(&self) -> &'static [u8] {
        match self {
            ScaleType::Major => &[0, 2, 4, 5, 7, 9, 11],
            ScaleType::NaturalMinor => &[0, 2, 3, 5, 7, 8, 10],
            ScaleType::HarmonicMinor => &[0, 2, 3, 5, 7, 8, 11],
            ScaleType::MelodicMinor => &[0, 2, 3, 5, 7, 9, 11],
            ScaleType::Dorian => &[0, 2, 3, 5, 7, 9, 10],
            ScaleType::Phrygian => &[0, 1, 3, 5, 7, 8, 10],
            ScaleType::Lydian => &[0, 2, 4, 6, 7, 9, 11],
            ScaleType::Mixolydian => &[0, 2, 4, 5, 7, 9, 10],
            ScaleType::Locrian => &[0, 1, 3, 5, 6, 8, 10],
            ScaleType::MajorPentatonic => &[0, 2, 4, 7, 9],
            ScaleType::MinorPentatonic => &[0, 3, 5, 7, 10],
            ScaleType::Blues => &[0, 3, 5, 6, 7, 10],
            ScaleType::WholeTone => &[0, 2, 4, 6, 8, 10],
            ScaleType::Diminished => &[0, 2, 3, 5, 6, 8, 9, 11],
            ScaleType::HungarianMinor => &[0, 2, 3, 6, 7, 8, 11],
            ScaleType::Hirajoshi => &[0, 2, 3, 7, 8],
            ScaleType::Chromatic => &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11],
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ScaleType::Major => "Major",
            ScaleType::NaturalMinor => "Natural Minor",
            ScaleType::HarmonicMinor => "Harmonic Minor",
            ScaleType::MelodicMinor => "Melodic Minor",
            ScaleType::Dorian => "Dorian",
            ScaleType::Phrygian => "Phrygian",
            ScaleType::Lydian => "Lydian",
            ScaleType::Mixolydian => "Mixolydian",
            ScaleType::Locrian => "Locrian",
            ScaleType::MajorPentatonic => "Major Pentatonic",
            ScaleType::MinorPentatonic => "Minor Pentatonic",
            ScaleType::Blues => "Blues",
            ScaleType::WholeTone => "Whole Tone",
            ScaleType::Diminished => "Diminished",
            ScaleType::HungarianMinor => "Hungarian Minor",
            ScaleType::Hirajoshi => "Hirajoshi",
            ScaleType::Chromatic => "Chromatic",
        }
    }

    /// Position in `ALL`, used for persistence.
    pub fn index(&self) -> u8 {
        Self::ALL.iter().position(|s| s == self).unwrap_or(0) as u8
    }

    /// Inverse of `index`. Out-of-range values fall back to major.
    pub fn from_index(i: u8) -> Self {
        Self::ALL.get(i as usize).copied().unwrap_or_default()
    }

    pub fn next(&self) -> Self {
        Self::ALL[(self.index() as usize + 1) % Self::ALL.len()]
    }

    pub fn prev(&self) -> Self {
        Self::ALL[(self.index() as usize + Self::ALL.len() - 1) % Self::ALL.len()]
    }
}

/// Returns true if `note` belongs to the scale with the given root and
/// intervals.
pub fn is_note_in_scale(note: i32, root: u8, intervals: &[u8]) -> bool {
    let degree = (note.rem_euclid(12) - root as i32 + 12).rem_euclid(12) as u8;
    intervals.contains(&degree)
}

/// Returns true if `note` has the same pitch class as `root`.
pub fn is_root_note(note: i32, root: u8) -> bool {
    note.rem_euclid(12) == root as i32
}

/// Move `note` to the closest in-scale pitch, searching outward one semitone
/// at a time. When two candidates are equally close, the lower one wins.
/// Never moves more than six semitones. The result is clamped to MIDI range.
pub fn snap_to_scale(note: i32, root: u8, intervals: &[u8]) -> u8 {
    if !intervals.is_empty() {
        for distance in 0..=6 {
            if is_note_in_scale(note - distance, root, intervals) {
                return clamp_note(note - distance)
            }
            if is_note_in_scale(note + distance, root, intervals) {
                return clamp_note(note + distance)
            }
        }
    }
    clamp_note(note)
}

fn clamp_note(note: i32) -> u8 {
    note.clamp(0, MIDI_NOTE_MAX as i32) as u8
}

/// A root note and a scale type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScaleConfig {
    root: u8,
    pub scale_type: ScaleType,
}

impl ScaleConfig {
    /// `root` is a pitch class; values outside 0..=11 are clamped.
    pub fn new(root: i32, scale_type: ScaleType) -> Self {
        Self {
            root: root.clamp(0, 11) as u8,
            scale_type,
        }
    }

    pub fn root(&self) -> u8 {
        self.root
    }

    pub fn set_root(&mut self, root: i32) {
        self.root = root.clamp(0, 11) as u8;
    }

    pub fn intervals(&self) -> &'static [u8] {
        self.scale_type.intervals()
    }

    pub fn is_chromatic(&self) -> bool {
        self.scale_type == ScaleType::Chromatic
    }

    pub fn contains(&self, note: i32) -> bool {
        is_note_in_scale(note, self.root, self.intervals())
    }

    pub fn is_root(&self, note: i32) -> bool {
        is_root_note(note, self.root)
    }

    pub fn snap(&self, note: i32) -> u8 {
        snap_to_scale(note, self.root, self.intervals())
    }

    /// Display name, e.g. "D Dorian".
    pub fn name(&self) -> String {
        format!("{} {}", pitch::pitch_class_name(self.root), self.scale_type.name())
    }
}

/// One step of the scale sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScaleSequenceSegment {
    pub scale: ScaleConfig,
    length_bars: u32,
}

impl ScaleSequenceSegment {
    /// Segments last at least one bar.
    pub fn new(scale: ScaleConfig, length_bars: u32) -> Self {
        Self {
            scale,
            length_bars: length_bars.max(1),
        }
    }

    pub fn length_bars(&self) -> u32 {
        self.length_bars
    }

    pub fn set_length_bars(&mut self, bars: u32) {
        self.length_bars = bars.max(1);
    }
}

/// A cyclic sequence of scales that overrides the global scale while
/// enabled.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScaleSequencerConfig {
    pub enabled: bool,
    pub segments: Vec<ScaleSequenceSegment>,
}

impl ScaleSequencerConfig {
    /// Total cycle length in bars.
    pub fn cycle_bars(&self) -> u64 {
        self.segments.iter().map(|s| s.length_bars as u64).sum()
    }

    /// Returns the scale in effect at `beat`. Falls back to `global` when
    /// the sequencer is disabled or empty.
    pub fn active_scale(&self, beat: f64, beats_per_bar: f64, global: ScaleConfig
    ) -> ScaleConfig {
        if !self.enabled || self.segments.is_empty() {
            return global
        }

        let cycle = self.cycle_bars() as f64 * beats_per_bar;
        let position = beat.rem_euclid(cycle);
        let mut segment_end = 0.0;

        for segment in &self.segments {
            segment_end += segment.length_bars as f64 * beats_per_bar;
            if position < segment_end {
                return segment.scale
            }
        }

        // only reachable through float error at the very end of the cycle
        self.segments.last().map(|s| s.scale).unwrap_or(global)
    }
}
