//! Benchmarks the admission-cap and backpressure invariants under load,
//! modeled on the teacher's `benchmark::BenchmarkSuite` percentile-latency
//! approach but scoped to a single property: peak concurrent engine calls
//! must never exceed the configured limit, regardless of how many
//! sessions hammer the gateway at once.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion};
use tokio::runtime::Runtime;

use stt_gateway::engine::test_support::FakeEngine;
use stt_gateway::{ConcurrencyLimiter, EngineAdapter};
use tokio_util::sync::CancellationToken;

fn wav_payload() -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for i in 0..1600i16 {
            writer.write_sample(i % 1000).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

fn admission_cap_benchmark(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    c.bench_function("admission_cap_16_payloads_limit_4", |b| {
        b.to_async(&rt).iter(|| async {
            let engine = Arc::new(FakeEngine::new(Duration::from_millis(5), vec!["x"; 16]));
            let adapter = Arc::new(EngineAdapter::new(engine.clone(), ConcurrencyLimiter::new(4)));
            let cancel = CancellationToken::new();

            let mut tasks = Vec::new();
            for _ in 0..16 {
                let adapter = adapter.clone();
                let cancel = cancel.clone();
                let payload = wav_payload();
                tasks.push(tokio::spawn(async move {
                    let _ = adapter.transcribe(&payload, "auto", &cancel).await;
                }));
            }
            for t in tasks {
                let _ = t.await;
            }

            assert!(engine.peak_in_flight.load(Ordering::SeqCst) <= 4);
        });
    });
}

criterion_group!(benches, admission_cap_benchmark);
criterion_main!(benches);
