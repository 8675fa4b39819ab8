use adc_slurper::{
    circular::CircularBuffer,
    dsp::{fir_filter, remove_dc, SpectrumEstimator},
    wire::{encode_frame, parse_adc_samples, read_content, read_frame_header, FrameLimits},
    DSP_BUFFER_SIZE, FIR_NUM_TAPS,
};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::prelude::*;
use std::io::Cursor;

fn benchmark(c: &mut Criterion) {
    let mut rng = rand::thread_rng();

    // A typical recording, a few thousand ADC lines
    let mut content = String::new();
    for _ in 0..5000 {
        content.push_str(&format!("ADC:{}\n", rng.gen_range(30_000_000i64..50_000_000)));
    }
    let frame = encode_frame("load_hz50.txt", Some(content.as_bytes()));
    let limits = FrameLimits::default();

    let window: Vec<f64> = (0..DSP_BUFFER_SIZE).map(|_| rng.gen_range(-1000.0..1000.0)).collect();
    let mut ring = CircularBuffer::new(DSP_BUFFER_SIZE);
    let mut estimator = SpectrumEstimator::new();

    c.bench_function("frame decode", |b| {
        b.iter(|| {
            let mut cursor = Cursor::new(black_box(&frame));
            let header = read_frame_header(&mut cursor, &limits).unwrap();
            read_content(&mut cursor, &header).unwrap()
        })
    });

    c.bench_function("adc parse", |b| {
        b.iter(|| parse_adc_samples(black_box(content.as_bytes())))
    });

    c.bench_function("ring push", |b| b.iter(|| ring.push(black_box(1.0f64))));

    c.bench_function("ring snapshot", |b| b.iter(|| black_box(&ring).snapshot()));

    c.bench_function("dsp window", |b| {
        b.iter(|| {
            let centred = remove_dc(black_box(&window));
            let spectrum = estimator.estimate(&centred, 50.0);
            fir_filter(&centred, spectrum.dominant_hz, 50.0, FIR_NUM_TAPS)
        })
    });
}

criterion_group!(benches, benchmark);
criterion_main!(benches);
