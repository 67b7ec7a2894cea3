use chrono::Utc;
use criterion::{criterion_group, criterion_main, Criterion};
use neuro_core::types::{SamplePacket, SignalType};
use neuro_core::RingBuffer;

fn packet(channels: usize, samples: usize, rate: f64) -> SamplePacket {
    SamplePacket::new(
        (0..channels).map(|i| format!("ch_{}", i)).collect(),
        rate,
        vec![vec![0.5; samples]; channels],
        Utc::now(),
        "bench",
        "bench-session",
        SignalType::Eeg,
        "bench",
    )
    .unwrap()
}

fn bench_ring_buffer(c: &mut Criterion) {
    let buf = RingBuffer::new(8, 5000.0, 256.0).unwrap();
    let p = packet(8, 32, 256.0);

    c.bench_function("add_32_samples_8ch", |b| {
        b.iter(|| buf.add(&p).unwrap());
    });

    // Saturate before benchmarking extraction.
    for _ in 0..64 {
        buf.add(&p).unwrap();
    }
    c.bench_function("window_1s_8ch", |b| {
        b.iter(|| buf.window(1000.0).unwrap());
    });
}

criterion_group!(benches, bench_ring_buffer);
criterion_main!(benches);
