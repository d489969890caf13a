use std::hint::black_box;
use criterion::{criterion_group, criterion_main, Criterion};
use tessera::{config::Config, pattern::PatternModel, playback::{PlaybackEngine, Transport}};

const BLOCK: usize = 512;

fn busy_pattern(c: &mut Criterion) {
    let mut model = PatternModel::new();
    for i in 0..64 {
        model.add_square(i as f32 / 64.0, (i % 9) as f32 / 10.0, 1.0 / 32.0, 0.1, i % 4);
    }
    model.edit_channel(3, |c| c.set_pitch_waveform(vec![0.0, 3.0, 7.0, 12.0]));

    let config = Config { rng_seed: Some(1), ..Default::default() };
    let mut engine = PlaybackEngine::new(model.connect(), &config);
    let mut events = Vec::with_capacity(1024);
    let mut clock = 0u64;

    c.bench_function("process_block", |b| b.iter(|| {
        let transport = Transport {
            playing: true,
            position_beats: clock as f64 / 22050.0,
            tempo: 120.0,
            sample_rate: 44100.0,
        };
        events.clear();
        engine.process_block(&transport, BLOCK, &mut events);
        clock += BLOCK as u64;
        black_box(events.len())
    }));
}

criterion_group!(benches, busy_pattern);
criterion_main!(benches);
