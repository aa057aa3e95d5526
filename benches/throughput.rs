//! Throughput benchmarks

use bytes::BytesMut;
use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use loggerlink_core::core::codec::LineCodec;
use loggerlink_core::core::logger::MemorySink;
use loggerlink_core::core::protocol::classify;
use loggerlink_core::core::session::{CaptureEngine, CaptureTiming, StepOutcome};
use loggerlink_core::core::transport::ScriptedTransport;
use std::hint::black_box;
use std::time::Duration;
use tokio_util::codec::Decoder;

const ROW: &str = "1520,0.0123,-0.0456,0.9981,1.2500,-0.3750,0.0625,0.71,-2.62,normal";

fn stream(rows: usize) -> Vec<u8> {
    let mut data = Vec::new();
    for _ in 0..rows {
        data.extend_from_slice(ROW.as_bytes());
        data.extend_from_slice(b"\r\n");
    }
    data
}

fn classify_benchmark(c: &mut Criterion) {
    let lines = [
        ROW,
        "timestamp_ms,ax,ay,az,gx,gy,gz,pitch,roll,label",
        "DATA_LOGGER:STOP:Samples=1500",
        "garbage from a reset",
    ];

    let mut group = c.benchmark_group("classify");
    group.throughput(Throughput::Elements(lines.len() as u64));

    group.bench_function("mixed_lines", |b| {
        b.iter(|| {
            for line in &lines {
                black_box(classify(black_box(line)));
            }
        })
    });

    group.finish();
}

fn framing_benchmark(c: &mut Criterion) {
    let data = stream(256);

    let mut group = c.benchmark_group("framing");
    group.throughput(Throughput::Bytes(data.len() as u64));

    group.bench_function("line_codec", |b| {
        b.iter(|| {
            let mut codec = LineCodec::new();
            let mut buf = BytesMut::from(black_box(&data[..]));
            let mut count = 0;
            while let Ok(Some(line)) = codec.decode(&mut buf) {
                black_box(line);
                count += 1;
            }
            count
        })
    });

    group.finish();
}

fn engine_benchmark(c: &mut Criterion) {
    let Ok(rt) = tokio::runtime::Runtime::new() else {
        return;
    };
    let rows: u64 = 200;
    let timing = CaptureTiming {
        settle: Duration::ZERO,
        drain_wait: Duration::ZERO,
        handshake_attempts: 2,
        handshake_interval: Duration::ZERO,
        read_timeout: Duration::ZERO,
    };

    let mut group = c.benchmark_group("engine");
    group.throughput(Throughput::Elements(rows));

    group.bench_function("stream_step", |b| {
        b.to_async(&rt).iter(|| async {
            let transport = ScriptedTransport::new();
            let handle = transport.handle();
            handle.on_command("START:normal", ["DATA_LOGGER:START:normal", "timestamp_ms,ax"]);

            let mut engine =
                CaptureEngine::with_timing(transport, Box::new(MemorySink::new()), timing.clone());
            engine.connect().await.unwrap();
            engine.begin_capture("normal").await.unwrap();
            handle.push_lines((0..rows).map(|_| ROW));

            while let Ok(outcome) = engine.stream_step().await {
                if matches!(outcome, StepOutcome::Idle) {
                    break;
                }
            }
            engine.end_capture().await.unwrap();
        })
    });

    group.finish();
}

criterion_group!(benches, classify_benchmark, framing_benchmark, engine_benchmark);
criterion_main!(benches);
