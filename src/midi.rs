//! MIDI messages produced by playback.

/// Lowest and highest user-facing MIDI channel numbers.
pub const MIDI_CHANNEL_MIN: u8 = 1;
pub const MIDI_CHANNEL_MAX: u8 = 16;

const STATUS_NOTE_OFF: u8 = 0x80;
const STATUS_NOTE_ON: u8 = 0x90;

/// Note messages. `channel` is the wire value (0-15), not the 1-16 number
/// shown to users.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MidiMessage {
    NoteOff {
        channel: u8,
        key: u8,
        velocity: u8,
    },
    NoteOn {
        channel: u8,
        key: u8,
        velocity: u8,
    },
}

impl MidiMessage {
    /// Note-on for a user-facing channel number (1-16).
    pub fn note_on(channel_number: u8, key: u8, velocity: u8) -> Self {
        Self::NoteOn {
            channel: wire_channel(channel_number),
            key: key.min(127),
            velocity: velocity.clamp(1, 127),
        }
    }

    /// Note-off for a user-facing channel number (1-16).
    pub fn note_off(channel_number: u8, key: u8) -> Self {
        Self::NoteOff {
            channel: wire_channel(channel_number),
            key: key.min(127),
            velocity: 0,
        }
    }

    pub fn channel(&self) -> u8 {
        match *self {
            Self::NoteOff { channel, .. } | Self::NoteOn { channel, .. } => channel,
        }
    }

    pub fn key(&self) -> u8 {
        match *self {
            Self::NoteOff { key, .. } | Self::NoteOn { key, .. } => key,
        }
    }

    pub fn is_note_on(&self) -> bool {
        matches!(self, Self::NoteOn { .. })
    }

    /// Raw three-byte encoding.
    pub fn to_bytes(&self) -> [u8; 3] {
        match *self {
            Self::NoteOff { channel, key, velocity } =>
                [STATUS_NOTE_OFF | channel, key, velocity],
            Self::NoteOn { channel, key, velocity } =>
                [STATUS_NOTE_ON | channel, key, velocity],
        }
    }

}

fn wire_channel(channel_number: u8) -> u8 {
    channel_number.clamp(MIDI_CHANNEL_MIN, MIDI_CHANNEL_MAX) - 1
}

/// A message positioned within an audio block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MidiEvent {
    /// Frames from the start of the block.
    pub sample_offset: u32,
    pub message: MidiMessage,
}
