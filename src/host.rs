//! Standalone player. The default audio device's callback is the clock; MIDI
//! goes out through a midir port. Events are sent as soon as they're drained
//! from the audio thread, so timing resolution is one audio block.

use std::{
    error::Error, io, thread, time::Duration,
    sync::{atomic::{AtomicBool, AtomicUsize, Ordering}, Arc},
};

use cpal::{traits::{DeviceTrait, HostTrait, StreamTrait}, StreamConfig};
use midir::{MidiOutput, MidiOutputConnection};
use rtrb::{Producer, RingBuffer};

use crate::{
    config::Config,
    midi::MidiEvent,
    pattern::PatternModel,
    pitch::midi_note_name,
    playback::{PlaybackEngine, Transport},
    state,
    APP_NAME,
};

/// Capacity of the audio-to-MIDI event queue.
const EVENT_QUEUE_LEN: usize = 4096;

/// Events one block may produce before the scratch buffer reallocates.
const EVENT_BUFFER_LEN: usize = 1024;

const POLL_INTERVAL: Duration = Duration::from_millis(1);

fn output_names(output: &MidiOutput) -> Vec<String> {
    output.ports().into_iter()
        .map(|p| output.port_name(&p).unwrap_or(String::from("(unknown)")))
        .collect()
}

/// Open the named output port, or the first one.
fn connect_midi(port_name: Option<&str>) -> Result<MidiOutputConnection, Box<dyn Error>> {
    let output = MidiOutput::new(&format!("{} output", APP_NAME))?;
    log::debug!("MIDI outputs: {:?}", output_names(&output));

    let ports = output.ports();
    let port = match port_name {
        Some(name) => ports.iter()
            .find(|p| output.port_name(p).is_ok_and(|n| n == name))
            .ok_or_else(|| format!("MIDI output \"{}\" not found", name))?,
        None => ports.first().ok_or("no MIDI output ports available")?,
    };

    log::info!("MIDI output: {}", output.port_name(port)?);
    let conn = output.connect(port, APP_NAME).map_err(|e| e.to_string())?;
    Ok(conn)
}

/// Move a block's events onto the queue, counting the ones that don't fit.
fn forward_events(events: &mut Vec<MidiEvent>, producer: &mut Producer<MidiEvent>,
    dropped: &AtomicUsize
) {
    for event in events.drain(..) {
        if producer.push(event).is_err() {
            dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn send(conn: &mut MidiOutputConnection, event: MidiEvent) {
    if let Err(e) = conn.send(&event.message.to_bytes()) {
        log::warn!("MIDI send failed: {}", e);
    }
}

/// Play a pattern until Enter is pressed. `arg` is a pattern file path;
/// without one, the configured state path is tried.
pub fn run(arg: Option<String>) -> Result<(), Box<dyn Error>> {
    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            log::warn!("using default config: {}", e);
            Config::default()
        }
    };

    let mut model = PatternModel::from_config(&config);
    if let Some(path) = arg.or_else(|| config.state_path.clone()) {
        if let Err(e) = state::load_from_file(&mut model, &path) {
            log::warn!("could not load {}: {}", path, e);
        }
    }

    for (i, channel) in model.channels().iter().enumerate() {
        log::debug!("channel {}: MIDI {}, {} to {}", i + 1, channel.midi_channel(),
            midi_note_name(channel.low_note()), midi_note_name(channel.high_note()));
    }

    let mut midi_out = connect_midi(config.midi_output.as_deref())?;

    let device = cpal::default_host()
        .default_output_device()
        .ok_or("could not open audio output device")?;

    let stream_config: StreamConfig = device.supported_output_configs()?
        .next()
        .ok_or("could not find audio output config")?
        .with_max_sample_rate()
        .into();

    let channels = stream_config.channels as usize;
    let sample_rate = stream_config.sample_rate.0 as f64;
    log::info!("audio device: {} at {} Hz",
        device.name().unwrap_or(String::from("(unknown)")), sample_rate);

    let (mut producer, mut consumer) = RingBuffer::<MidiEvent>::new(EVENT_QUEUE_LEN);
    let playing = Arc::new(AtomicBool::new(true));
    let stopped = Arc::new(AtomicBool::new(false));
    let dropped = Arc::new(AtomicUsize::new(0));

    let mut engine = PlaybackEngine::new(model.connect(), &config);
    let mut events = Vec::with_capacity(EVENT_BUFFER_LEN);
    let mut clock: u64 = 0;
    let tempo = config.tempo;
    let audio_playing = playing.clone();
    let audio_stopped = stopped.clone();
    let audio_dropped = dropped.clone();

    let stream = device.build_output_stream(
        &stream_config, move |data: &mut[f32], _: &cpal::OutputCallbackInfo| {
            data.fill(0.0);
            let frames = data.len() / channels.max(1);
            let mut transport = Transport {
                playing: audio_playing.load(Ordering::Relaxed),
                position_beats: 0.0,
                tempo,
                sample_rate,
            };
            transport.position_beats = clock as f64 / transport.samples_per_beat();

            events.clear();
            engine.process_block(&transport, frames, &mut events);
            forward_events(&mut events, &mut producer, &audio_dropped);

            if transport.playing {
                clock += frames as u64;
            } else {
                audio_stopped.store(true, Ordering::Release);
            }
        },
        move |err| {
            log::error!("stream error: {}", err);
        },
        None
    )?;
    stream.play()?;

    log::info!("playing {} squares at {} BPM, press Enter to stop",
        model.squares().len(), tempo);

    thread::spawn(move || {
        let mut line = String::new();
        let _ = io::stdin().read_line(&mut line);
        playing.store(false, Ordering::Relaxed);
    });

    loop {
        let done = stopped.load(Ordering::Acquire);
        while let Ok(event) = consumer.pop() {
            send(&mut midi_out, event);
        }
        let lost = dropped.swap(0, Ordering::Relaxed);
        if lost > 0 {
            log::warn!("event queue full, dropped {} MIDI events", lost);
        }
        if done {
            break
        }
        thread::sleep(POLL_INTERVAL);
    }

    log::info!("stopped");
    Ok(())
}
