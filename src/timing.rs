//! Representation of musical time: meters, loop lengths and quantization
//! grids. All constructors snap arbitrary input to the nearest legal value.

use std::fmt;

/// Denominators a time signature may use.
const LEGAL_DENOMINATORS: [u8; 5] = [1, 2, 4, 8, 16];

const MAX_NUMERATOR: i32 = 16;

/// Returns the element of `candidates` nearest to `value`. Ties go to the
/// earlier (smaller) candidate.
fn snap_to_nearest<T: Copy + Into<f64>>(value: f64, candidates: &[T]) -> T {
    let mut best = candidates[0];
    for &c in &candidates[1..] {
        if (c.into() - value).abs() < (best.into() - value).abs() {
            best = c;
        }
    }
    best
}

/// A musical meter. The numerator counts beats of the denominator's note
/// value per bar.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeSignature {
    numerator: u8,
    denominator: u8,
}

impl TimeSignature {
    pub const COMMON: TimeSignature = TimeSignature { numerator: 4, denominator: 4 };

    /// Numerator is clamped to 1..=16, denominator snapped to the nearest
    /// power of two up to 16.
    pub fn new(numerator: i32, denominator: i32) -> Self {
        Self {
            numerator: numerator.clamp(1, MAX_NUMERATOR) as u8,
            denominator: snap_to_nearest(denominator as f64, &LEGAL_DENOMINATORS),
        }
    }

    pub fn numerator(&self) -> u8 {
        self.numerator
    }

    pub fn denominator(&self) -> u8 {
        self.denominator
    }

    /// Length of one bar in quarter-note beats.
    pub fn beats_per_bar(&self) -> f64 {
        self.numerator as f64 * (4.0 / self.denominator as f64)
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self::COMMON
    }
}

impl fmt::Display for TimeSignature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

/// Length of the main pattern loop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LoopLength {
    #[default]
    One,
    Two,
    Four,
}

impl LoopLength {
    pub const ALL: [LoopLength; 3] = [LoopLength::One, LoopLength::Two, LoopLength::Four];

    /// Snap a bar count to the nearest legal loop length.
    pub fn from_bars(bars: f64) -> Self {
        if bars.is_nan() {
            return Self::default()
        }
        snap_to_nearest(bars, &Self::ALL)
    }

    pub fn bars(&self) -> u32 {
        match self {
            LoopLength::One => 1,
            LoopLength::Two => 2,
            LoopLength::Four => 4,
        }
    }

    /// Loop length in quarter-note beats under a given meter.
    pub fn beats(&self, time_signature: TimeSignature) -> f64 {
        self.bars() as f64 * time_signature.beats_per_bar()
    }
}

impl From<LoopLength> for f64 {
    fn from(value: LoopLength) -> Self {
        value.bars() as f64
    }
}

/// Note-start quantization grid, as a fraction of a bar.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Quantize {
    ThirtySecond,
    #[default]
    Sixteenth,
    Eighth,
    Quarter,
    Half,
    Bar,
}

impl Quantize {
    pub const ALL: [Quantize; 6] = [
        Quantize::ThirtySecond,
        Quantize::Sixteenth,
        Quantize::Eighth,
        Quantize::Quarter,
        Quantize::Half,
        Quantize::Bar,
    ];

    /// Number of grid steps per bar.
    pub fn divisor(&self) -> u32 {
        match self {
            Quantize::ThirtySecond => 32,
            Quantize::Sixteenth => 16,
            Quantize::Eighth => 8,
            Quantize::Quarter => 4,
            Quantize::Half => 2,
            Quantize::Bar => 1,
        }
    }

    /// Grid spacing in quarter-note beats.
    pub fn interval_beats(&self, time_signature: TimeSignature) -> f64 {
        time_signature.beats_per_bar() / self.divisor() as f64
    }

    /// Position in `ALL`, used for persistence.
    pub fn index(&self) -> u8 {
        Self::ALL.iter().position(|q| q == self).unwrap_or(0) as u8
    }

    /// Inverse of `index`; out-of-range values fall back to sixteenths.
    pub fn from_index(i: u8) -> Self {
        Self::ALL.get(i as usize).copied().unwrap_or_default()
    }

    pub fn name(&self) -> &'static str {
        match self {
            Quantize::ThirtySecond => "1/32",
            Quantize::Sixteenth => "1/16",
            Quantize::Eighth => "1/8",
            Quantize::Quarter => "1/4",
            Quantize::Half => "1/2",
            Quantize::Bar => "1 bar",
        }
    }
}
