//! Canonical pattern data and the editing API used by the UI thread.
//!
//! Every mutation clamps its input instead of rejecting it, notifies
//! listeners, and publishes a fresh immutable snapshot for the audio thread.

use triple_buffer::{triple_buffer, Input, Output};

use crate::{
    config::Config,
    pitch,
    playback::PlayMode,
    scale::{ScaleConfig, ScaleSequenceSegment, ScaleSequencerConfig, ScaleType},
    timing::{LoopLength, Quantize, TimeSignature},
};

/// Number of color channels.
pub const NUM_CHANNELS: usize = 4;

/// Smallest width or height a square may have.
pub const MIN_SQUARE_SIZE: f32 = 0.01;

/// Chance that a square sounds on a given pass in probability mode.
pub const DEFAULT_PROBABILITY: f32 = 0.5;

pub const MAX_PITCH_LOOP_BARS: u32 = 64;

/// Pitch waveform samples are kept within this many semitones of zero.
const MAX_PITCH_OFFSET: f32 = 127.0;

const DEFAULT_COLORS: [u32; NUM_CHANNELS] = [0xe8_4a_5f_ff, 0x2a_9d_8f_ff, 0xe9_c4_6a_ff, 0x6a_4c_93_ff];

/// Unique square identifier. Never zero once assigned by a model.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SquareId(pub u64);

impl SquareId {
    /// Id of a square that doesn't belong to a model yet.
    pub const UNASSIGNED: SquareId = SquareId(0);
}

/// Clamp a (start, size) pair along one axis of the unit square.
fn clamp_span(start: f32, size: f32) -> (f32, f32) {
    let size = if size.is_nan() {
        MIN_SQUARE_SIZE
    } else {
        size.clamp(MIN_SQUARE_SIZE, 1.0)
    };
    let start = if start.is_nan() { 0.0 } else { start.clamp(0.0, 1.0 - size) };
    (start, size)
}

/// A note region. Horizontal axis is loop-relative time, vertical axis is
/// position within the channel's pitch range (top = highest pitch).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Square {
    pub left_edge: f32,
    pub top_edge: f32,
    pub width: f32,
    pub height: f32,
    pub channel: u8,
    pub id: SquareId,
}

impl Square {
    /// Construct a detached, clamped square.
    pub fn new(left_edge: f32, top_edge: f32, width: f32, height: f32, channel: usize) -> Self {
        Square {
            left_edge,
            top_edge,
            width,
            height,
            channel: 0,
            id: SquareId::UNASSIGNED,
        }.with_channel(channel).clamped()
    }

    /// Returns a copy with geometry clamped into the unit square.
    pub fn clamped(self) -> Self {
        let (left_edge, width) = clamp_span(self.left_edge, self.width);
        let (top_edge, height) = clamp_span(self.top_edge, self.height);
        Self { left_edge, top_edge, width, height, ..self }
    }

    fn with_channel(self, channel: usize) -> Self {
        Self { channel: channel.min(NUM_CHANNELS - 1) as u8, ..self }
    }

    pub fn center_y(&self) -> f32 {
        self.top_edge + self.height / 2.0
    }

    pub fn right_edge(&self) -> f32 {
        self.left_edge + self.width
    }

    /// Hit test in normalized grid coordinates.
    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.left_edge && x < self.right_edge()
            && y >= self.top_edge && y < self.top_edge + self.height
    }
}

/// Per-channel playback settings.
#[derive(Clone, Debug, PartialEq)]
pub struct ColorChannelConfig {
    midi_channel: u8,
    high_note: u8,
    low_note: u8,
    pub quantize: Quantize,
    /// Packed 0xRRGGBBAA.
    pub display_color: u32,
    pitch_waveform: Vec<f32>,
    pitch_loop_bars: u32,
    pub play_mode: PlayMode,
    probability: f32,
}

impl ColorChannelConfig {
    /// Default settings for channel `index`.
    pub fn new(index: usize) -> Self {
        let index = index.min(NUM_CHANNELS - 1);
        Self {
            midi_channel: index as u8 + 1,
            high_note: 84,
            low_note: 48,
            quantize: Quantize::Sixteenth,
            display_color: DEFAULT_COLORS[index],
            pitch_waveform: Vec::new(),
            pitch_loop_bars: 1,
            play_mode: PlayMode::Forward,
            probability: DEFAULT_PROBABILITY,
        }
    }

    /// MIDI channel number, 1-16.
    pub fn midi_channel(&self) -> u8 {
        self.midi_channel
    }

    pub fn set_midi_channel(&mut self, channel: i32) {
        self.midi_channel = channel.clamp(1, 16) as u8;
    }

    /// Note at the top of the grid.
    pub fn high_note(&self) -> u8 {
        self.high_note
    }

    /// Note at the bottom of the grid.
    pub fn low_note(&self) -> u8 {
        self.low_note
    }

    pub fn set_note_range(&mut self, high: i32, low: i32) {
        self.high_note = high.clamp(0, 127) as u8;
        self.low_note = low.clamp(0, 127) as u8;
    }

    pub fn pitch_waveform(&self) -> &[f32] {
        &self.pitch_waveform
    }

    /// Replace the waveform. Non-finite samples become zero.
    pub fn set_pitch_waveform(&mut self, samples: Vec<f32>) {
        self.pitch_waveform = samples;
        for v in self.pitch_waveform.iter_mut() {
            *v = sanitize_offset(*v);
        }
    }

    /// Change the resolution of the waveform. New samples are zero.
    pub fn resize_pitch_waveform(&mut self, len: usize) {
        self.pitch_waveform.resize(len, 0.0);
    }

    /// Set one sample. Out-of-range indices are ignored.
    pub fn set_pitch_sample(&mut self, index: usize, semitones: f32) {
        if let Some(v) = self.pitch_waveform.get_mut(index) {
            *v = sanitize_offset(semitones);
        }
    }

    pub fn pitch_loop_bars(&self) -> u32 {
        self.pitch_loop_bars
    }

    pub fn set_pitch_loop_bars(&mut self, bars: i64) {
        self.pitch_loop_bars = bars.clamp(1, MAX_PITCH_LOOP_BARS as i64) as u32;
    }

    /// Pitch offset in semitones at an absolute transport beat.
    pub fn pitch_offset_at(&self, beat: f64, beats_per_bar: f64) -> f32 {
        let loop_beats = self.pitch_loop_bars as f64 * beats_per_bar;
        pitch::waveform_offset(&self.pitch_waveform,
            pitch::pitch_loop_position(beat, loop_beats))
    }

    /// Chance (0-1) that a square sounds on a pass in probability mode.
    pub fn probability(&self) -> f32 {
        self.probability
    }

    pub fn set_probability(&mut self, p: f32) {
        self.probability = if p.is_nan() { DEFAULT_PROBABILITY } else { p.clamp(0.0, 1.0) };
    }
}

impl Default for ColorChannelConfig {
    fn default() -> Self {
        Self::new(0)
    }
}

fn sanitize_offset(v: f32) -> f32 {
    if v.is_finite() {
        v.clamp(-MAX_PITCH_OFFSET, MAX_PITCH_OFFSET)
    } else {
        0.0
    }
}

/// Pitch sequencer editing state. Only affects UI input routing; playback
/// always applies non-empty waveforms.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PitchSequencer {
    pub editing_pitch: bool,
}

/// Immutable copy of everything playback needs. Squares are ordered by
/// left edge, then id.
#[derive(Clone, Debug, PartialEq)]
pub struct PatternSnapshot {
    pub squares: Vec<Square>,
    pub channels: [ColorChannelConfig; NUM_CHANNELS],
    pub scale: ScaleConfig,
    pub scale_sequencer: ScaleSequencerConfig,
    pub loop_length: LoopLength,
    pub time_signature: TimeSignature,
}

impl PatternSnapshot {
    pub fn squares_in_channel(&self, channel: usize) -> impl Iterator<Item = &Square> + '_ {
        self.squares.iter().filter(move |s| s.channel as usize == channel)
    }

    pub fn loop_beats(&self) -> f64 {
        self.loop_length.beats(self.time_signature)
    }

    /// Scale in effect at a transport beat.
    pub fn active_scale(&self, beat: f64) -> ScaleConfig {
        self.scale_sequencer.active_scale(beat,
            self.time_signature.beats_per_bar(), self.scale)
    }

    fn sort_squares(&mut self) {
        self.squares.sort_by(|a, b| a.left_edge.total_cmp(&b.left_edge)
            .then(a.id.cmp(&b.id)));
    }
}

impl Default for PatternSnapshot {
    fn default() -> Self {
        Self {
            squares: Vec::new(),
            channels: std::array::from_fn(ColorChannelConfig::new),
            scale: ScaleConfig::new(0, ScaleType::Chromatic),
            scale_sequencer: Default::default(),
            loop_length: LoopLength::One,
            time_signature: TimeSignature::COMMON,
        }
    }
}

/// Audio-thread end of the snapshot handoff.
pub type SnapshotReader = Output<PatternSnapshot>;

/// What changed in a pattern.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatternChange {
    SquareAdded(SquareId),
    SquareChanged(SquareId),
    SquareRemoved(SquareId),
    ChannelCleared(usize),
    ChannelConfigChanged(usize),
    ScaleChanged,
    ScaleSequencerChanged,
    LoopLengthChanged,
    TimeSignatureChanged,
    PitchEditingChanged,
    /// The whole pattern was replaced (reset or load).
    Replaced,
}

/// Receives change notifications. Called on the UI thread after the change
/// has been applied.
pub trait PatternListener {
    fn pattern_changed(&mut self, model: &PatternModel, change: PatternChange);
}

impl<F: FnMut(&PatternModel, PatternChange)> PatternListener for F {
    fn pattern_changed(&mut self, model: &PatternModel, change: PatternChange) {
        self(model, change)
    }
}

/// Handle for removing a listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListenerId(u64);

/// Owns the canonical pattern.
pub struct PatternModel {
    data: PatternSnapshot,
    pitch_sequencer: PitchSequencer,
    next_id: u64,
    listeners: Vec<(ListenerId, Box<dyn PatternListener>)>,
    next_listener_id: u64,
    publisher: Option<Input<PatternSnapshot>>,
}

impl PatternModel {
    pub fn new() -> Self {
        Self {
            data: Default::default(),
            pitch_sequencer: Default::default(),
            next_id: 1,
            listeners: Vec::new(),
            next_listener_id: 1,
            publisher: None,
        }
    }

    /// New empty pattern using configured channel defaults.
    pub fn from_config(config: &Config) -> Self {
        let mut model = Self::new();
        for channel in model.data.channels.iter_mut() {
            channel.set_probability(config.default_probability);
        }
        model
    }

    /// Create the audio-thread reader. Any previously connected reader stops
    /// receiving updates.
    pub fn connect(&mut self) -> SnapshotReader {
        let (input, output) = triple_buffer(&self.data);
        self.publisher = Some(input);
        output
    }

    /// Copy of the current state, as published to readers.
    pub fn snapshot(&self) -> PatternSnapshot {
        self.data.clone()
    }

    pub fn add_listener(&mut self, listener: Box<dyn PatternListener>) -> ListenerId {
        let id = ListenerId(self.next_listener_id);
        self.next_listener_id += 1;
        self.listeners.push((id, listener));
        id
    }

    pub fn remove_listener(&mut self, id: ListenerId) {
        self.listeners.retain(|(x, _)| *x != id);
    }

    /// Publish and broadcast after a mutation.
    fn changed(&mut self, change: PatternChange) {
        if let Some(publisher) = &mut self.publisher {
            publisher.write(self.data.clone());
        }

        // listeners get a shared view of the model, so park them meanwhile
        let mut listeners = std::mem::take(&mut self.listeners);
        for (_, listener) in listeners.iter_mut() {
            listener.pattern_changed(self, change);
        }
        listeners.append(&mut self.listeners);
        self.listeners = listeners;
    }

    fn next_square_id(&mut self) -> SquareId {
        let id = SquareId(self.next_id);
        self.next_id += 1;
        id
    }

    fn square_mut(&mut self, id: SquareId) -> Option<&mut Square> {
        self.data.squares.iter_mut().find(|s| s.id == id)
    }

    // queries

    pub fn squares(&self) -> &[Square] {
        &self.data.squares
    }

    pub fn square(&self, id: SquareId) -> Option<&Square> {
        self.data.squares.iter().find(|s| s.id == id)
    }

    pub fn squares_in_channel(&self, channel: usize) -> impl Iterator<Item = &Square> + '_ {
        self.data.squares_in_channel(channel)
    }

    /// Topmost (most recently created) square under a grid point.
    pub fn square_at(&self, x: f32, y: f32) -> Option<&Square> {
        self.data.squares.iter()
            .filter(|s| s.contains(x, y))
            .max_by_key(|s| s.id)
    }

    pub fn channel(&self, channel: usize) -> &ColorChannelConfig {
        &self.data.channels[channel.min(NUM_CHANNELS - 1)]
    }

    pub fn channels(&self) -> &[ColorChannelConfig; NUM_CHANNELS] {
        &self.data.channels
    }

    pub fn scale(&self) -> ScaleConfig {
        self.data.scale
    }

    pub fn scale_sequencer(&self) -> &ScaleSequencerConfig {
        &self.data.scale_sequencer
    }

    pub fn loop_length(&self) -> LoopLength {
        self.data.loop_length
    }

    pub fn time_signature(&self) -> TimeSignature {
        self.data.time_signature
    }

    pub fn pitch_sequencer(&self) -> PitchSequencer {
        self.pitch_sequencer
    }

    // square editing

    /// Add a square, clamping its geometry and channel. Returns the new id.
    pub fn add_square(&mut self, left_edge: f32, top_edge: f32, width: f32, height: f32,
        channel: usize
    ) -> SquareId {
        let id = self.next_square_id();
        let square = Square {
            id,
            ..Square::new(left_edge, top_edge, width, height, channel)
        };
        self.data.squares.push(square);
        self.data.sort_squares();
        self.changed(PatternChange::SquareAdded(id));
        id
    }

    /// Replace a square's geometry. Returns false if the id is unknown.
    pub fn set_square_geometry(&mut self, id: SquareId, left_edge: f32, top_edge: f32,
        width: f32, height: f32
    ) -> bool {
        match self.square_mut(id) {
            Some(square) => {
                *square = Square { left_edge, top_edge, width, height, ..*square }.clamped();
                self.data.sort_squares();
                self.changed(PatternChange::SquareChanged(id));
                true
            }
            None => false,
        }
    }

    /// Move a square, keeping its size.
    pub fn move_square(&mut self, id: SquareId, left_edge: f32, top_edge: f32) -> bool {
        match self.square(id) {
            Some(s) => {
                let (width, height) = (s.width, s.height);
                self.set_square_geometry(id, left_edge, top_edge, width, height)
            }
            None => false,
        }
    }

    /// Resize a square, keeping its top-left corner where possible.
    pub fn resize_square(&mut self, id: SquareId, width: f32, height: f32) -> bool {
        match self.square(id) {
            Some(s) => {
                let (left, top) = (s.left_edge, s.top_edge);
                self.set_square_geometry(id, left, top, width, height)
            }
            None => false,
        }
    }

    pub fn set_square_channel(&mut self, id: SquareId, channel: usize) -> bool {
        match self.square_mut(id) {
            Some(square) => {
                *square = square.with_channel(channel);
                self.changed(PatternChange::SquareChanged(id));
                true
            }
            None => false,
        }
    }

    pub fn remove_square(&mut self, id: SquareId) -> Option<Square> {
        let index = self.data.squares.iter().position(|s| s.id == id)?;
        let square = self.data.squares.remove(index);
        self.changed(PatternChange::SquareRemoved(id));
        Some(square)
    }

    /// Delete every square in a channel.
    pub fn clear_channel(&mut self, channel: usize) {
        let channel = channel.min(NUM_CHANNELS - 1);
        self.data.squares.retain(|s| s.channel as usize != channel);
        self.changed(PatternChange::ChannelCleared(channel));
    }

    // global settings

    /// Snap to a legal loop length. Shrinking deletes squares that start at
    /// or after the new end; survivors are rescaled so they keep their
    /// position in bars.
    pub fn set_loop_length(&mut self, bars: f64) {
        let new = LoopLength::from_bars(bars);
        let old = self.data.loop_length;
        if new == old {
            return
        }

        let boundary = new.bars() as f32 / old.bars() as f32;
        let ratio = old.bars() as f32 / new.bars() as f32;
        let count = self.data.squares.len();

        self.data.squares.retain(|s| s.left_edge < boundary);
        for s in self.data.squares.iter_mut() {
            let left_edge = s.left_edge * ratio;
            let width = (s.width * ratio).min(1.0 - left_edge);
            *s = Square { left_edge, width, ..*s }.clamped();
        }

        let removed = count - self.data.squares.len();
        if removed > 0 {
            log::debug!("loop length {} -> {} bars removed {} squares",
                old.bars(), new.bars(), removed);
        }

        self.data.loop_length = new;
        self.data.sort_squares();
        self.changed(PatternChange::LoopLengthChanged);
    }

    pub fn set_time_signature(&mut self, numerator: i32, denominator: i32) {
        self.data.time_signature = TimeSignature::new(numerator, denominator);
        self.changed(PatternChange::TimeSignatureChanged);
    }

    /// Edit one channel's settings. The config's own setters do the
    /// clamping.
    pub fn edit_channel(&mut self, channel: usize, f: impl FnOnce(&mut ColorChannelConfig)) {
        let channel = channel.min(NUM_CHANNELS - 1);
        f(&mut self.data.channels[channel]);
        self.changed(PatternChange::ChannelConfigChanged(channel));
    }

    pub fn set_scale(&mut self, scale: ScaleConfig) {
        self.data.scale = scale;
        self.changed(PatternChange::ScaleChanged);
    }

    pub fn set_scale_sequencer_enabled(&mut self, enabled: bool) {
        self.data.scale_sequencer.enabled = enabled;
        self.changed(PatternChange::ScaleSequencerChanged);
    }

    pub fn add_scale_segment(&mut self, segment: ScaleSequenceSegment) {
        self.data.scale_sequencer.segments.push(segment);
        self.changed(PatternChange::ScaleSequencerChanged);
    }

    /// Remove a segment. Out-of-range indices are ignored.
    pub fn remove_scale_segment(&mut self, index: usize) {
        if index < self.data.scale_sequencer.segments.len() {
            self.data.scale_sequencer.segments.remove(index);
            self.changed(PatternChange::ScaleSequencerChanged);
        }
    }

    pub fn set_scale_segments(&mut self, segments: Vec<ScaleSequenceSegment>) {
        self.data.scale_sequencer.segments = segments;
        self.changed(PatternChange::ScaleSequencerChanged);
    }

    pub fn set_editing_pitch(&mut self, editing: bool) {
        self.pitch_sequencer.editing_pitch = editing;
        self.changed(PatternChange::PitchEditingChanged);
    }

    /// Return to an empty default pattern. Ids keep counting up.
    pub fn reset(&mut self) {
        let probabilities: Vec<_> = self.data.channels.iter()
            .map(|c| c.probability())
            .collect();
        self.data = PatternSnapshot::default();
        for (channel, p) in self.data.channels.iter_mut().zip(probabilities) {
            channel.set_probability(p);
        }
        self.pitch_sequencer = Default::default();
        self.changed(PatternChange::Replaced);
    }

    /// Install loaded data wholesale. Squares get fresh ids in the given
    /// order.
    pub(crate) fn replace(&mut self, mut data: PatternSnapshot, pitch_sequencer: PitchSequencer) {
        for square in data.squares.iter_mut() {
            *square = Square { id: self.next_square_id(), ..square.with_channel(square.channel as usize) }
                .clamped();
        }
        data.sort_squares();
        self.data = data;
        self.pitch_sequencer = pitch_sequencer;
        self.changed(PatternChange::Replaced);
    }
}

impl Default for PatternModel {
    fn default() -> Self {
        Self::new()
    }
}
