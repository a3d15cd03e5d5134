//! AIO round-trip benchmarks
//!
//! Measures: how long does one message take from `send_aio` on a PUSH socket
//! to completion of a `recv_aio` on the connected PULL socket, and what does
//! the blocking wrapper add on top?
//!
//! Runs against the in-process loopback engine.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use carapace::prelude::*;
use std::time::Duration;

const MESSAGE_SIZES: &[usize] = &[64, 256, 4096];

fn connected_pair(name: &str) -> (Socket, Socket) {
    carapace::init().unwrap();
    let url = format!("inproc://bench-{name}");
    let pull = Socket::open(Protocol::Pull0).unwrap();
    pull.listen(&url).unwrap();
    let push = Socket::open(Protocol::Push0).unwrap();
    push.dial(&url).unwrap();
    (push, pull)
}

/// Explicit AIO send + recv pair, one message per iteration.
fn aio_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("aio/push_pull");
    group.measurement_time(Duration::from_secs(5));

    for &size in MESSAGE_SIZES {
        let (push, pull) = connected_pair(&format!("aio-{size}"));
        let send = Aio::without_callback().unwrap();
        let recv = Aio::without_callback().unwrap();
        let payload = vec![0u8; size];

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("round_trip", format!("{size}B")), &size, |b, _| {
            b.iter(|| {
                pull.recv_aio(&recv).unwrap();
                send.set_message(Message::from(black_box(payload.as_slice())));
                push.send_aio(&send).unwrap();
                send.wait();
                recv.wait();
                black_box(recv.take_message());
            });
        });

        push.close().unwrap();
        pull.close().unwrap();
    }
    group.finish();
}

/// Blocking `send`/`recv`, which allocate a private AIO per call.
fn blocking_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("blocking/push_pull");
    group.measurement_time(Duration::from_secs(5));

    for &size in MESSAGE_SIZES {
        let (push, pull) = connected_pair(&format!("blocking-{size}"));
        let payload = vec![0u8; size];

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("round_trip", format!("{size}B")), &size, |b, _| {
            b.iter(|| {
                push.send(Message::from(black_box(payload.as_slice()))).unwrap();
                black_box(pull.recv().unwrap());
            });
        });

        push.close().unwrap();
        pull.close().unwrap();
    }
    group.finish();
}

/// Completion latency of an immediately expiring sleep.
fn sleep_completion(c: &mut Criterion) {
    carapace::init().unwrap();
    let aio = Aio::without_callback().unwrap();
    c.bench_function("aio/sleep_zero", |b| {
        b.iter(|| {
            aio.sleep(Duration::ZERO).unwrap();
            aio.wait();
        });
    });
}

criterion_group!(benches, aio_round_trip, blocking_round_trip, sleep_completion);
criterion_main!(benches);
