//! Block-based MIDI scheduling, run on the audio thread.

use rand::{rngs::SmallRng, Rng, SeedableRng};

use crate::{
    config::Config,
    generator::{apply_quantization, calculate_midi_note, calculate_velocity},
    midi::{MidiEvent, MidiMessage},
    pattern::{PatternSnapshot, SnapshotReader},
};

pub const DEFAULT_TEMPO: f64 = 120.0;

/// Upper bound on simultaneously sounding (channel, key) pairs.
const MAX_ACTIVE_NOTES: usize = 16 * 128;

/// Triggers one pass can hold before the scratch buffer has to grow.
const TRIGGER_CAPACITY: usize = 1024;

/// Slack in samples for beat to sample conversion. A grid beat that lands a
/// rounding error short of a sample boundary keeps its exact sample, and a
/// beat on a block boundary belongs to the later block.
const OFFSET_EPSILON: f64 = 1e-6;


/// How a channel walks through its squares on each pass of the loop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PlayMode {
    #[default]
    Forward,
    /// Every pass plays the loop mirrored in time.
    Backward,
    /// Alternates forward and backward passes, starting forward.
    Pendulum,
    /// Forward, but each square sounds on a pass with the channel's
    /// probability.
    Probability,
}

impl PlayMode {
    pub const ALL: [PlayMode; 4] = [
        PlayMode::Forward,
        PlayMode::Backward,
        PlayMode::Pendulum,
        PlayMode::Probability,
    ];

    pub fn index(&self) -> u8 {
        Self::ALL.iter().position(|m| m == self).unwrap_or(0) as u8
    }

    /// Out-of-range values fall back to forward.
    pub fn from_index(i: u8) -> Self {
        Self::ALL.get(i as usize).copied().unwrap_or_default()
    }

    pub fn name(&self) -> &'static str {
        match self {
            PlayMode::Forward => "Forward",
            PlayMode::Backward => "Backward",
            PlayMode::Pendulum => "Pendulum",
            PlayMode::Probability => "Probability",
        }
    }

    /// Direction of the given loop pass.
    fn direction(&self, pass: i64) -> Direction {
        match self {
            PlayMode::Forward | PlayMode::Probability => Direction::Forward,
            PlayMode::Backward => Direction::Backward,
            PlayMode::Pendulum => if pass.rem_euclid(2) == 0 {
                Direction::Forward
            } else {
                Direction::Backward
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

/// Host transport state at the start of a block.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transport {
    pub playing: bool,
    /// Position in quarter-note beats.
    pub position_beats: f64,
    /// Beats per minute.
    pub tempo: f64,
    pub sample_rate: f64,
}

impl Transport {
    pub fn samples_per_beat(&self) -> f64 {
        self.sample_rate * 60.0 / self.tempo
    }
}

#[derive(Clone, Copy, Debug)]
struct Trigger {
    beat: f64,
    off_beat: f64,
    /// Index into the snapshot's squares.
    square: usize,
}

#[derive(Clone, Copy, Debug)]
struct ActiveNote {
    /// MIDI channel number, 1-16.
    channel: u8,
    key: u8,
    off_beat: f64,
}

/// Beat span of one block and the mapping back to sample offsets.
struct Block {
    /// Beat at sample zero.
    origin: f64,
    start: f64,
    end: f64,
    samples_per_beat: f64,
    last_offset: u32,
}

impl Block {
    fn offset(&self, beat: f64) -> u32 {
        let samples = ((beat - self.origin) * self.samples_per_beat + OFFSET_EPSILON).floor();
        samples.clamp(0.0, self.last_offset as f64) as u32
    }
}

/// Turns pattern snapshots into timed MIDI events, one audio block at a time.
/// Owned by the audio thread.
pub struct PlaybackEngine {
    reader: SnapshotReader,
    scheduler: Scheduler,
}

impl PlaybackEngine {
    pub fn new(reader: SnapshotReader, config: &Config) -> Self {
        Self {
            reader,
            scheduler: Scheduler::new(config),
        }
    }

    /// Schedule one block of `num_samples` frames. Events are appended to
    /// `events` in sample order; a note-off always precedes a note-on that
    /// reuses its key.
    pub fn process_block(&mut self, transport: &Transport, num_samples: usize,
        events: &mut Vec<MidiEvent>
    ) {
        let snapshot = self.reader.read();
        self.scheduler.process(snapshot, transport, num_samples, events);
    }

    /// Release every sounding note at offset zero.
    pub fn all_notes_off(&mut self, events: &mut Vec<MidiEvent>) {
        self.scheduler.flush(events);
    }

    pub fn active_note_count(&self) -> usize {
        self.scheduler.active.len()
    }

    pub fn is_playing(&self) -> bool {
        self.scheduler.playing
    }
}

struct Scheduler {
    scale_snap: bool,
    /// Base seed for the per-pass probability rolls.
    seed: u64,
    playing: bool,
    last_end: Option<f64>,
    /// Triggers of the pass being scheduled.
    triggers: Vec<Trigger>,
    active: Vec<ActiveNote>,
}

impl Scheduler {
    fn new(config: &Config) -> Self {
        Self {
            scale_snap: config.scale_snap,
            seed: config.rng_seed.unwrap_or_else(rand::random),
            playing: false,
            last_end: None,
            triggers: Vec::with_capacity(TRIGGER_CAPACITY),
            active: Vec::with_capacity(MAX_ACTIVE_NOTES),
        }
    }

    fn process(&mut self, snapshot: &PatternSnapshot, transport: &Transport,
        num_samples: usize, events: &mut Vec<MidiEvent>
    ) {
        if !transport.playing {
            if self.playing {
                self.flush(events);
                self.playing = false;
                self.last_end = None;
            }
            return
        }

        let samples_per_beat = transport.samples_per_beat();
        if num_samples == 0 || !samples_per_beat.is_finite() || samples_per_beat <= 0.0
            || !transport.position_beats.is_finite() {
            return
        }

        let origin = transport.position_beats;
        let mut block = Block {
            origin,
            start: origin,
            end: origin + (num_samples as f64 - OFFSET_EPSILON) / samples_per_beat,
            samples_per_beat,
            last_offset: (num_samples - 1) as u32,
        };

        if let Some(last_end) = self.last_end {
            if block.start < last_end {
                if last_end - block.start > block.end - block.start {
                    // seek backward: start over from the new position
                    self.flush(events);
                } else {
                    block.start = last_end.min(block.end);
                }
            } else if (block.start - last_end) * samples_per_beat < 2.0 * OFFSET_EPSILON {
                // rounding gap in the host clock
                block.start = last_end;
            }
        }

        self.playing = true;
        self.last_end = Some(block.end);

        // only grows for patterns larger than any seen before
        self.triggers.reserve(snapshot.squares.len());

        let loop_beats = snapshot.loop_beats();
        let first_pass = (block.start / loop_beats).floor() as i64;
        let last_pass = ((block.end / loop_beats).ceil() as i64 - 1).max(first_pass);

        for pass in first_pass..=last_pass {
            self.collect_triggers(snapshot, &block, pass);
            self.emit_triggers(snapshot, &block, events);
        }
        self.release(&block, events, |off| off < block.end);
    }

    /// Gather the triggers of one loop pass that fall inside the block, in
    /// time order.
    fn collect_triggers(&mut self, snapshot: &PatternSnapshot, block: &Block, pass: i64) {
        self.triggers.clear();

        let loop_beats = snapshot.loop_beats();
        let pass_start = pass as f64 * loop_beats;

        for (channel, config) in snapshot.channels.iter().enumerate() {
            let direction = config.play_mode.direction(pass);
            let mut rolls = (config.play_mode == PlayMode::Probability)
                .then(|| SmallRng::seed_from_u64(pass_seed(self.seed, channel, pass)));

            for (i, square) in snapshot.squares.iter().enumerate() {
                if square.channel as usize != channel {
                    continue
                }
                if let Some(rng) = &mut rolls {
                    if rng.gen::<f32>() >= config.probability() {
                        continue
                    }
                }

                // square start in loop fractions, mirrored on backward passes
                let start = match direction {
                    Direction::Forward => square.left_edge,
                    Direction::Backward => 1.0 - square.left_edge - square.width,
                }.max(0.0) as f64;
                let width = square.width as f64 * loop_beats;

                let mut quantized = apply_quantization(start * loop_beats, config.quantize,
                    snapshot.time_signature);
                let mut off = pass_start + start * loop_beats + width;
                if quantized >= loop_beats {
                    // wrapped to the loop start, keeping its length
                    quantized -= loop_beats;
                    off = pass_start + quantized + width;
                }

                let beat = pass_start + quantized;
                if beat >= block.start && beat < block.end {
                    self.triggers.push(Trigger { beat, off_beat: off.max(beat), square: i });
                }
            }
        }

        self.triggers.sort_unstable_by(|a, b| a.beat.total_cmp(&b.beat)
            .then(a.square.cmp(&b.square)));
    }

    fn emit_triggers(&mut self, snapshot: &PatternSnapshot, block: &Block,
        events: &mut Vec<MidiEvent>
    ) {
        let beats_per_bar = snapshot.time_signature.beats_per_bar();

        for i in 0..self.triggers.len() {
            let Trigger { beat, off_beat, square } = self.triggers[i];
            let square = &snapshot.squares[square];
            let config = &snapshot.channels[square.channel as usize];

            self.release(block, events, |off| off <= beat);

            let offset = config.pitch_offset_at(beat, beats_per_bar);
            let mut key = calculate_midi_note(square, config, offset);
            if self.scale_snap {
                let scale = snapshot.active_scale(beat);
                if !scale.is_chromatic() {
                    key = scale.snap(key as i32);
                }
            }

            let channel = config.midi_channel();
            let sample_offset = block.offset(beat);

            if let Some(j) = self.active.iter().position(|n| n.channel == channel && n.key == key) {
                self.active.swap_remove(j);
                events.push(MidiEvent {
                    sample_offset,
                    message: MidiMessage::note_off(channel, key),
                });
            }

            events.push(MidiEvent {
                sample_offset,
                message: MidiMessage::note_on(channel, key, calculate_velocity(square)),
            });
            self.active.push(ActiveNote { channel, key, off_beat });
        }
    }

    /// Emit note-offs for due notes, earliest first.
    fn release(&mut self, block: &Block, events: &mut Vec<MidiEvent>,
        is_due: impl Fn(f64) -> bool
    ) {
        loop {
            let next = self.active.iter().enumerate()
                .filter(|(_, n)| is_due(n.off_beat))
                .min_by(|(_, a), (_, b)| a.off_beat.total_cmp(&b.off_beat))
                .map(|(i, _)| i);

            let Some(i) = next else { break };
            let note = self.active.swap_remove(i);
            events.push(MidiEvent {
                sample_offset: block.offset(note.off_beat),
                message: MidiMessage::note_off(note.channel, note.key),
            });
        }
    }

    /// Release everything at offset zero.
    fn flush(&mut self, events: &mut Vec<MidiEvent>) {
        for note in self.active.drain(..) {
            events.push(MidiEvent {
                sample_offset: 0,
                message: MidiMessage::note_off(note.channel, note.key),
            });
        }
    }
}

/// Seed for the probability rolls of one channel on one loop pass. Every
/// block that touches the pass rederives the same mask from it.
fn pass_seed(seed: u64, channel: usize, pass: i64) -> u64 {
    seed ^ (pass as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15)
        ^ (channel as u64 + 1).wrapping_mul(0xc2b2_ae3d_27d4_eb4f)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use crate::{
        pattern::PatternModel,
        scale::{ScaleConfig, ScaleSequenceSegment, ScaleType},
        timing::Quantize,
    };

    use super::*;

    // a power-of-two beat length keeps every grid position sample-exact
    const SAMPLE_RATE: f64 = 32768.0;
    const TEMPO: f64 = 60.0;
    const SAMPLES_PER_BEAT: u64 = 32768;
    const BLOCK: usize = 128;
    const BAR: u64 = SAMPLES_PER_BEAT * 4;

    fn test_config() -> Config {
        Config {
            rng_seed: Some(7),
            ..Default::default()
        }
    }

    fn transport(sample: u64, playing: bool) -> Transport {
        Transport {
            playing,
            position_beats: sample as f64 / SAMPLES_PER_BEAT as f64,
            tempo: TEMPO,
            sample_rate: SAMPLE_RATE,
        }
    }

    /// Run contiguous blocks covering `[from, to)` samples and return events
    /// with absolute sample times.
    fn run(engine: &mut PlaybackEngine, from: u64, to: u64) -> Vec<(u64, MidiMessage)> {
        let mut out = Vec::new();
        let mut events = Vec::new();
        let mut sample = from;
        while sample < to {
            events.clear();
            engine.process_block(&transport(sample, true), BLOCK, &mut events);
            out.extend(events.iter().map(|e| (sample + e.sample_offset as u64, e.message)));
            sample += BLOCK as u64;
        }
        out
    }

    fn note_ons(events: &[(u64, MidiMessage)]) -> Vec<(u64, u8)> {
        events.iter()
            .filter(|(_, m)| m.is_note_on())
            .map(|(t, m)| (*t, m.key()))
            .collect()
    }

    /// Square whose center maps to `key` under the default 84..48 range,
    /// for keys on the range's 1/36 grid.
    fn top_for_key(key: u8) -> f32 {
        (84 - key) as f32 / 36.0 - 0.05
    }

    #[test]
    fn test_forward_triggers() {
        let mut model = PatternModel::new();
        model.add_square(0.5, top_for_key(60), 0.25, 0.1, 0);
        model.add_square(0.0, top_for_key(72), 0.25, 0.1, 0);
        let mut engine = PlaybackEngine::new(model.connect(), &test_config());

        let events = run(&mut engine, 0, BAR);
        assert_eq!(note_ons(&events), vec![(0, 72), (BAR / 2, 60)]);
        assert!(events.contains(&(SAMPLES_PER_BEAT, MidiMessage::note_off(1, 72))));
        assert!(events.contains(&(SAMPLES_PER_BEAT * 3, MidiMessage::note_off(1, 60))));
        assert_eq!(engine.active_note_count(), 0);
    }

    #[test]
    fn test_sample_offset_within_block() {
        let mut model = PatternModel::new();
        model.add_square(0.5, 0.0, 0.25, 0.1, 0);
        let mut engine = PlaybackEngine::new(model.connect(), &test_config());

        let mut events = Vec::new();
        let transport = Transport { position_beats: 1.75, ..transport(0, true) };
        engine.process_block(&transport, 16384, &mut events);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].sample_offset, 8192);
        assert!(events[0].message.is_note_on());
    }

    #[test]
    fn test_midi_channel_and_velocity() {
        let mut model = PatternModel::new();
        model.add_square(0.0, 0.0, 0.25, 1.0, 2);
        model.edit_channel(2, |c| c.set_midi_channel(10));
        let mut engine = PlaybackEngine::new(model.connect(), &test_config());

        let events = run(&mut engine, 0, BLOCK as u64);
        assert_eq!(events, vec![(0, MidiMessage::note_on(10, 66, 127))]);
        assert_eq!(events[0].1.channel(), 9);
    }

    #[test]
    fn test_quantization() {
        let mut model = PatternModel::new();
        model.add_square(0.3, 0.0, 0.1, 0.1, 0);
        model.edit_channel(0, |c| c.quantize = Quantize::Quarter);
        let mut engine = PlaybackEngine::new(model.connect(), &test_config());

        let ons = note_ons(&run(&mut engine, 0, BAR));
        assert_eq!(ons.len(), 1);
        assert_eq!(ons[0].0, SAMPLES_PER_BEAT);
    }

    #[test]
    fn test_quantized_start_wraps_to_loop_start() {
        let mut model = PatternModel::new();
        model.add_square(0.99, 0.0, 0.01, 0.1, 0);
        model.edit_channel(0, |c| c.quantize = Quantize::Bar);
        let mut engine = PlaybackEngine::new(model.connect(), &test_config());

        let events = run(&mut engine, 0, BAR * 2);
        let ons = note_ons(&events);
        assert_eq!(ons.iter().map(|(t, _)| *t).collect::<Vec<_>>(), vec![0, BAR]);
        // the wrapped note keeps its own short length
        let (off, _) = events.iter().find(|(_, m)| !m.is_note_on()).unwrap();
        assert!(*off > 0 && *off < SAMPLES_PER_BEAT, "note-off at {off}");
    }

    #[test]
    fn test_note_off_at_square_end() {
        for (mode, on, off) in [
            (PlayMode::Forward, SAMPLES_PER_BEAT, SAMPLES_PER_BEAT * 7 / 4),
            (PlayMode::Backward, SAMPLES_PER_BEAT * 2, SAMPLES_PER_BEAT * 11 / 4),
        ] {
            let mut model = PatternModel::new();
            // 1.25 to 1.75 beats, so the start snaps to beat 1
            model.add_square(0.3125, 0.45, 0.125, 0.1, 0);
            model.edit_channel(0, |c| {
                c.quantize = Quantize::Quarter;
                c.play_mode = mode;
            });
            let mut engine = PlaybackEngine::new(model.connect(), &test_config());

            let events = run(&mut engine, 0, BAR);
            assert_eq!(events, vec![
                (on, MidiMessage::note_on(1, 66, 14)),
                (off, MidiMessage::note_off(1, 66)),
            ], "{mode:?}");
        }
    }

    #[test]
    fn test_note_off_never_precedes_note_on() {
        let mut model = PatternModel::new();
        // 1.5 to 1.75 beats, snapped forward to beat 2
        model.add_square(0.375, 0.45, 0.0625, 0.1, 0);
        model.edit_channel(0, |c| c.quantize = Quantize::Half);
        let mut engine = PlaybackEngine::new(model.connect(), &test_config());

        let events = run(&mut engine, 0, BAR);
        assert_eq!(events, vec![
            (SAMPLES_PER_BEAT * 2, MidiMessage::note_on(1, 66, 14)),
            (SAMPLES_PER_BEAT * 2, MidiMessage::note_off(1, 66)),
        ]);
        assert_eq!(engine.active_note_count(), 0);
    }

    #[test]
    fn test_backward() {
        let mut model = PatternModel::new();
        model.add_square(0.0, top_for_key(72), 0.25, 0.1, 0);
        model.add_square(0.5, top_for_key(60), 0.25, 0.1, 0);
        model.edit_channel(0, |c| c.play_mode = PlayMode::Backward);
        let mut engine = PlaybackEngine::new(model.connect(), &test_config());

        let ons = note_ons(&run(&mut engine, 0, BAR * 2));
        assert_eq!(ons, vec![
            (SAMPLES_PER_BEAT, 60),
            (SAMPLES_PER_BEAT * 3, 72),
            (BAR + SAMPLES_PER_BEAT, 60),
            (BAR + SAMPLES_PER_BEAT * 3, 72),
        ]);
    }

    #[test]
    fn test_pendulum() {
        let mut model = PatternModel::new();
        model.add_square(0.0, top_for_key(72), 0.25, 0.1, 0);
        model.add_square(0.5, top_for_key(60), 0.25, 0.1, 0);
        model.edit_channel(0, |c| c.play_mode = PlayMode::Pendulum);
        let mut engine = PlaybackEngine::new(model.connect(), &test_config());

        let ons = note_ons(&run(&mut engine, 0, BAR * 3));
        assert_eq!(ons, vec![
            (0, 72),
            (BAR / 2, 60),
            (BAR + SAMPLES_PER_BEAT, 60),
            (BAR + SAMPLES_PER_BEAT * 3, 72),
            (BAR * 2, 72),
            (BAR * 2 + BAR / 2, 60),
        ]);
    }

    #[test]
    fn test_probability_extremes() {
        for (p, expected) in [(0.0, 0), (1.0, 4)] {
            let mut model = PatternModel::new();
            model.add_square(0.0, 0.0, 0.25, 0.1, 0);
            model.add_square(0.5, 0.5, 0.25, 0.1, 0);
            model.edit_channel(0, |c| {
                c.play_mode = PlayMode::Probability;
                c.set_probability(p);
            });
            let mut engine = PlaybackEngine::new(model.connect(), &test_config());
            assert_eq!(note_ons(&run(&mut engine, 0, BAR * 2)).len(), expected);
        }
    }

    #[test]
    fn test_probability_varies_between_passes() {
        let mut model = PatternModel::new();
        model.add_square(0.0, 0.0, 0.25, 0.1, 0);
        model.edit_channel(0, |c| c.play_mode = PlayMode::Probability);
        model.set_time_signature(1, 16);
        let mut engine = PlaybackEngine::new(model.connect(), &test_config());

        // a 1/16 bar lasts a sixteenth note, so four bars hold 64 passes
        let played = note_ons(&run(&mut engine, 0, BAR * 4)).len();
        assert!(played > 0 && played < 64, "played {played} of 64");
    }

    #[test]
    fn test_probability_keeps_square_timing() {
        let keys = [60, 64, 68, 72];
        let mut model = PatternModel::new();
        for (i, key) in keys.iter().enumerate() {
            model.add_square(i as f32 * 0.25, top_for_key(*key), 0.25, 0.1, 0);
        }
        model.edit_channel(0, |c| {
            c.play_mode = PlayMode::Probability;
            c.set_probability(0.5);
        });
        let mut engine = PlaybackEngine::new(model.connect(), &test_config());

        let ons = note_ons(&run(&mut engine, 0, BAR * 16));
        assert!(!ons.is_empty() && ons.len() < 64, "played {} of 64", ons.len());
        for (t, key) in ons {
            let step = (t % BAR / SAMPLES_PER_BEAT) as usize;
            assert_eq!(t % SAMPLES_PER_BEAT, 0, "off-grid note-on at {t}");
            assert_eq!(key, keys[step], "wrong key at {t}");
        }
    }

    #[test]
    fn test_many_passes_in_one_block() {
        let mut model = PatternModel::new();
        for i in 0..8 {
            model.add_square(i as f32 / 8.0, top_for_key(60 + i as u8), 0.125, 0.1, 0);
        }
        // a 1/16 bar is a sixteenth note, so two 4/4 bars hold 32 passes
        model.set_time_signature(1, 16);
        let mut engine = PlaybackEngine::new(model.connect(), &test_config());
        let capacity = engine.scheduler.triggers.capacity();

        let mut events = Vec::new();
        engine.process_block(&transport(0, true), BAR as usize * 2, &mut events);

        assert_eq!(events.iter().filter(|e| e.message.is_note_on()).count(), 32 * 8);
        assert!(events.windows(2).all(|w| w[0].sample_offset <= w[1].sample_offset));
        assert_eq!(engine.scheduler.triggers.capacity(), capacity);
    }

    #[test]
    fn test_no_overlapping_keys() {
        let mut model = PatternModel::new();
        // two color channels on the same MIDI channel and key
        model.add_square(0.0, 0.45, 0.5, 0.1, 0);
        model.add_square(0.0, 0.45, 0.5, 0.1, 1);
        // full-length note that overlaps its own next trigger
        model.add_square(0.0, 0.0, 1.0, 0.1, 2);
        model.edit_channel(1, |c| c.set_midi_channel(1));
        model.edit_channel(2, |c| c.quantize = Quantize::Bar);
        let mut engine = PlaybackEngine::new(model.connect(), &test_config());

        let events = run(&mut engine, 0, BAR * 3);
        let mut sounding = HashSet::new();
        let mut last_time = 0;
        for (t, m) in events {
            assert!(t >= last_time);
            last_time = t;
            let key = (m.channel(), m.key());
            if m.is_note_on() {
                assert!(sounding.insert(key), "overlapping note-on {key:?} at {t}");
            } else {
                sounding.remove(&key);
            }
        }
    }

    #[test]
    fn test_stop_releases_notes() {
        let mut model = PatternModel::new();
        model.add_square(0.0, 0.45, 0.5, 0.1, 0);
        let mut engine = PlaybackEngine::new(model.connect(), &test_config());

        run(&mut engine, 0, BLOCK as u64);
        assert_eq!(engine.active_note_count(), 1);

        let mut events = Vec::new();
        engine.process_block(&transport(BLOCK as u64, false), BLOCK, &mut events);
        assert_eq!(events, vec![MidiEvent {
            sample_offset: 0,
            message: MidiMessage::note_off(1, 66),
        }]);
        assert!(!engine.is_playing());

        events.clear();
        engine.process_block(&transport(BLOCK as u64 * 2, false), BLOCK, &mut events);
        assert!(events.is_empty());
    }

    #[test]
    fn test_backward_seek_flushes_and_retriggers() {
        let mut model = PatternModel::new();
        model.add_square(0.0, 0.45, 0.75, 0.1, 0);
        let mut engine = PlaybackEngine::new(model.connect(), &test_config());

        run(&mut engine, 0, SAMPLES_PER_BEAT);
        assert_eq!(engine.active_note_count(), 1);

        let events = run(&mut engine, 0, BLOCK as u64);
        assert_eq!(events, vec![
            (0, MidiMessage::note_off(1, 66)),
            (0, MidiMessage::note_on(1, 66, 14)),
        ]);
    }

    #[test]
    fn test_small_backward_jitter_is_absorbed() {
        let mut model = PatternModel::new();
        model.add_square(0.0, 0.45, 0.75, 0.1, 0);
        let mut engine = PlaybackEngine::new(model.connect(), &test_config());

        assert_eq!(run(&mut engine, 0, BLOCK as u64).len(), 1);
        // host repeats part of the previous block
        assert!(run(&mut engine, BLOCK as u64 / 2, BLOCK as u64).is_empty());
        assert_eq!(engine.active_note_count(), 1);
    }

    #[test]
    fn test_snapshot_updates_reach_engine() {
        let mut model = PatternModel::new();
        let mut engine = PlaybackEngine::new(model.connect(), &test_config());
        assert!(run(&mut engine, 0, BAR).is_empty());

        model.add_square(0.0, 0.45, 0.25, 0.1, 0);
        assert_eq!(note_ons(&run(&mut engine, BAR, BAR * 2)), vec![(BAR, 66)]);
    }

    #[test]
    fn test_pitch_waveform_modulates() {
        let mut model = PatternModel::new();
        model.add_square(0.0, 0.45, 0.25, 0.1, 0);
        model.add_square(0.5, 0.45, 0.25, 0.1, 0);
        // ramp from 0 to 16 semitones over two bars
        model.edit_channel(0, |c| {
            c.set_pitch_waveform(vec![0.0, 4.0, 8.0, 12.0, 16.0]);
            c.set_pitch_loop_bars(2);
        });
        let mut engine = PlaybackEngine::new(model.connect(), &test_config());

        let ons = note_ons(&run(&mut engine, 0, BAR * 2));
        let keys: Vec<_> = ons.iter().map(|(_, k)| *k).collect();
        assert_eq!(keys, vec![66, 70, 74, 78]);
    }

    #[test]
    fn test_scale_snap() {
        for (snap, expected) in [(true, 65), (false, 66)] {
            let mut model = PatternModel::new();
            model.add_square(0.0, 0.45, 0.25, 0.1, 0);
            model.set_scale(ScaleConfig::new(0, ScaleType::Major));
            let config = Config { scale_snap: snap, ..test_config() };
            let mut engine = PlaybackEngine::new(model.connect(), &config);
            assert_eq!(note_ons(&run(&mut engine, 0, BLOCK as u64)), vec![(0, expected)]);
        }
    }

    #[test]
    fn test_scale_sequencer_changes_snap() {
        let mut model = PatternModel::new();
        // F# on every bar
        model.add_square(0.0, 0.45, 0.25, 0.1, 0);
        model.set_scale_segments(vec![
            ScaleSequenceSegment::new(ScaleConfig::new(0, ScaleType::Major), 1),
            ScaleSequenceSegment::new(ScaleConfig::new(2, ScaleType::Major), 1),
        ]);
        model.set_scale_sequencer_enabled(true);
        let mut engine = PlaybackEngine::new(model.connect(), &test_config());

        let keys: Vec<_> = note_ons(&run(&mut engine, 0, BAR * 3)).iter()
            .map(|(_, k)| *k)
            .collect();
        assert_eq!(keys, vec![65, 66, 65]);
    }

    #[test]
    fn test_all_notes_off() {
        let mut model = PatternModel::new();
        model.add_square(0.0, 0.0, 0.5, 0.1, 0);
        model.add_square(0.0, 0.5, 0.5, 0.1, 1);
        let mut engine = PlaybackEngine::new(model.connect(), &test_config());

        run(&mut engine, 0, BLOCK as u64);
        assert_eq!(engine.active_note_count(), 2);

        let mut events = Vec::new();
        engine.all_notes_off(&mut events);
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| !e.message.is_note_on() && e.sample_offset == 0));
        assert_eq!(engine.active_note_count(), 0);
    }

    #[test]
    fn test_offset_absorbs_rounding() {
        let block = Block {
            origin: 22000.0 / 22050.0,
            start: 22000.0 / 22050.0,
            end: 22100.0 / 22050.0,
            samples_per_beat: 22050.0,
            last_offset: 99,
        };
        assert_eq!(block.offset(1.0), 50);
    }

    #[test]
    fn test_grid_is_sample_exact_at_44100() {
        let mut model = PatternModel::new();
        model.add_square(0.25, 0.45, 0.25, 0.1, 0);
        let mut engine = PlaybackEngine::new(model.connect(), &test_config());

        let bar = 88200;
        let mut events = Vec::new();
        let mut out = Vec::new();
        let mut sample = 0u64;
        while sample < bar * 8 {
            let transport = Transport {
                playing: true,
                position_beats: sample as f64 / 22050.0,
                tempo: 120.0,
                sample_rate: 44100.0,
            };
            events.clear();
            engine.process_block(&transport, 100, &mut events);
            out.extend(events.iter().map(|e| (sample + e.sample_offset as u64, e.message)));
            sample += 100;
        }

        let expected: Vec<_> = (0..8)
            .flat_map(|i| [
                (i * bar + 22050, MidiMessage::note_on(1, 66, 14)),
                (i * bar + 44100, MidiMessage::note_off(1, 66)),
            ])
            .collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn test_play_mode_index() {
        for mode in PlayMode::ALL {
            assert_eq!(PlayMode::from_index(mode.index()), mode);
        }
        assert_eq!(PlayMode::from_index(99), PlayMode::Forward);
    }
}
