//! Versioned binary persistence for patterns.
//!
//! Layout, all little-endian: magic, version, then the payload. Squares are
//! stored without ids; loading assigns fresh ones.

use std::{io::{self, Cursor}, path::Path};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

use crate::{
    pattern::{
        ColorChannelConfig, PatternModel, PatternSnapshot, PitchSequencer, Square, NUM_CHANNELS,
    },
    playback::PlayMode,
    scale::{ScaleConfig, ScaleSequenceSegment, ScaleSequencerConfig, ScaleType},
    timing::{LoopLength, Quantize, TimeSignature},
};

/// "TESS" read as a big-endian word.
pub const MAGIC: u32 = 0x5445_5353;
pub const VERSION: u32 = 1;

const HEADER_LEN: usize = 8;
const SEGMENT_LEN: usize = 6;
const SQUARE_LEN: usize = 17;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("no state data")]
    Missing,
    #[error("state data too short ({0} bytes)")]
    TooShort(usize),
    #[error("not a pattern file (magic {0:#010x})")]
    BadMagic(u32),
    #[error("unsupported pattern version {0}")]
    UnsupportedVersion(u32),
    #[error("pattern data is truncated")]
    Truncated,
    #[error("{0} unexpected bytes after pattern data")]
    TrailingBytes(usize),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Serialize the model. Always succeeds and is deterministic.
pub fn save_state(model: &PatternModel) -> Vec<u8> {
    let mut w = Vec::new();
    write_pattern(&mut w, model)
        .unwrap_or_else(|_| unreachable!("writing to a Vec cannot fail"));
    w
}

fn write_pattern(w: &mut Vec<u8>, model: &PatternModel) -> io::Result<()> {
    w.write_u32::<LittleEndian>(MAGIC)?;
    w.write_u32::<LittleEndian>(VERSION)?;

    w.write_u32::<LittleEndian>(model.loop_length().bars())?;
    let ts = model.time_signature();
    w.write_u32::<LittleEndian>(ts.numerator() as u32)?;
    w.write_u32::<LittleEndian>(ts.denominator() as u32)?;

    for channel in model.channels() {
        w.write_u8(channel.midi_channel())?;
        w.write_u8(channel.high_note())?;
        w.write_u8(channel.low_note())?;
        w.write_u8(channel.quantize.index())?;
        w.write_u32::<LittleEndian>(channel.display_color)?;
        w.write_u32::<LittleEndian>(channel.pitch_waveform().len() as u32)?;
        for &v in channel.pitch_waveform() {
            w.write_f32::<LittleEndian>(v)?;
        }
        w.write_u32::<LittleEndian>(channel.pitch_loop_bars())?;
        w.write_u8(channel.play_mode.index())?;
        w.write_f32::<LittleEndian>(channel.probability())?;
    }

    write_scale(w, model.scale())?;

    let seq = model.scale_sequencer();
    w.write_u8(seq.enabled as u8)?;
    w.write_u32::<LittleEndian>(seq.segments.len() as u32)?;
    for segment in &seq.segments {
        write_scale(w, segment.scale)?;
        w.write_u32::<LittleEndian>(segment.length_bars())?;
    }

    w.write_u32::<LittleEndian>(model.squares().len() as u32)?;
    for square in model.squares() {
        w.write_f32::<LittleEndian>(square.left_edge)?;
        w.write_f32::<LittleEndian>(square.top_edge)?;
        w.write_f32::<LittleEndian>(square.width)?;
        w.write_f32::<LittleEndian>(square.height)?;
        w.write_u8(square.channel)?;
    }

    w.write_u8(model.pitch_sequencer().editing_pitch as u8)?;
    Ok(())
}

fn write_scale(w: &mut Vec<u8>, scale: ScaleConfig) -> io::Result<()> {
    w.write_u8(scale.root())?;
    w.write_u8(scale.scale_type.index())
}

/// Replace the model's contents with a saved pattern. The whole blob is
/// validated first; on error the model is left as it was.
pub fn load_state(data: Option<&[u8]>, model: &mut PatternModel) -> Result<(), StateError> {
    let data = data.ok_or(StateError::Missing)?;
    let (pattern, pitch_sequencer) = parse(data)?;
    model.replace(pattern, pitch_sequencer);
    Ok(())
}

/// Write a pattern file.
pub fn save_to_file(model: &PatternModel, path: impl AsRef<Path>) -> Result<(), StateError> {
    let path = path.as_ref();
    std::fs::write(path, save_state(model))?;
    log::info!("saved pattern to {}", path.display());
    Ok(())
}

/// Read a pattern file into the model.
pub fn load_from_file(model: &mut PatternModel, path: impl AsRef<Path>) -> Result<(), StateError> {
    let path = path.as_ref();
    let data = std::fs::read(path)?;
    load_state(Some(&data), model)?;
    log::info!("loaded pattern from {} ({} squares)", path.display(), model.squares().len());
    Ok(())
}

/// Reader that reports running out of data as truncation.
struct Reader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl Reader<'_> {
    fn remaining(&self) -> usize {
        self.cursor.get_ref().len() - self.cursor.position() as usize
    }

    fn u8(&mut self) -> Result<u8, StateError> {
        self.cursor.read_u8().map_err(truncated)
    }

    fn u32(&mut self) -> Result<u32, StateError> {
        self.cursor.read_u32::<LittleEndian>().map_err(truncated)
    }

    fn f32(&mut self) -> Result<f32, StateError> {
        self.cursor.read_f32::<LittleEndian>().map_err(truncated)
    }

    fn bool(&mut self) -> Result<bool, StateError> {
        Ok(self.u8()? != 0)
    }

    /// Read an element count, checking that the elements can fit in what's
    /// left before anything is allocated for them.
    fn count(&mut self, element_len: usize) -> Result<usize, StateError> {
        let count = self.u32()? as usize;
        if count.saturating_mul(element_len) > self.remaining() {
            return Err(StateError::Truncated)
        }
        Ok(count)
    }

    fn scale(&mut self) -> Result<ScaleConfig, StateError> {
        let root = self.u8()?;
        let scale_type = ScaleType::from_index(self.u8()?);
        Ok(ScaleConfig::new(root as i32, scale_type))
    }
}

fn truncated(e: io::Error) -> StateError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        StateError::Truncated
    } else {
        StateError::Io(e)
    }
}

fn to_i32(v: u32) -> i32 {
    v.min(i32::MAX as u32) as i32
}

fn parse(data: &[u8]) -> Result<(PatternSnapshot, PitchSequencer), StateError> {
    if data.len() < HEADER_LEN {
        return Err(StateError::TooShort(data.len()))
    }

    let mut r = Reader { cursor: Cursor::new(data) };

    let magic = r.u32()?;
    if magic != MAGIC {
        return Err(StateError::BadMagic(magic))
    }
    let version = r.u32()?;
    if version != VERSION {
        return Err(StateError::UnsupportedVersion(version))
    }

    let mut pattern = PatternSnapshot {
        loop_length: LoopLength::from_bars(r.u32()? as f64),
        ..Default::default()
    };
    let numerator = r.u32()?;
    let denominator = r.u32()?;
    pattern.time_signature = TimeSignature::new(to_i32(numerator), to_i32(denominator));

    for (i, channel) in pattern.channels.iter_mut().enumerate() {
        *channel = parse_channel(&mut r, i)?;
    }

    pattern.scale = r.scale()?;

    let enabled = r.bool()?;
    let count = r.count(SEGMENT_LEN)?;
    let mut segments = Vec::with_capacity(count);
    for _ in 0..count {
        let scale = r.scale()?;
        segments.push(ScaleSequenceSegment::new(scale, r.u32()?));
    }
    pattern.scale_sequencer = ScaleSequencerConfig { enabled, segments };

    let count = r.count(SQUARE_LEN)?;
    pattern.squares.reserve(count);
    for _ in 0..count {
        let left = r.f32()?;
        let top = r.f32()?;
        let width = r.f32()?;
        let height = r.f32()?;
        let channel = r.u8()?;
        pattern.squares.push(Square::new(left, top, width, height, channel as usize));
    }

    let pitch_sequencer = PitchSequencer { editing_pitch: r.bool()? };

    match r.remaining() {
        0 => Ok((pattern, pitch_sequencer)),
        n => Err(StateError::TrailingBytes(n)),
    }
}

fn parse_channel(r: &mut Reader, index: usize) -> Result<ColorChannelConfig, StateError> {
    debug_assert!(index < NUM_CHANNELS);
    let mut channel = ColorChannelConfig::new(index);

    channel.set_midi_channel(r.u8()? as i32);
    let high = r.u8()?;
    let low = r.u8()?;
    channel.set_note_range(high as i32, low as i32);
    channel.quantize = Quantize::from_index(r.u8()?);
    channel.display_color = r.u32()?;

    let len = r.count(4)?;
    let mut waveform = Vec::with_capacity(len);
    for _ in 0..len {
        waveform.push(r.f32()?);
    }
    channel.set_pitch_waveform(waveform);

    channel.set_pitch_loop_bars(r.u32()? as i64);
    channel.play_mode = PlayMode::from_index(r.u8()?);
    channel.set_probability(r.f32()?);
    Ok(channel)
}
