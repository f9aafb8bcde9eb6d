//! ACK fast-path benchmark: the update loop must stay integer-only and
//! allocation-free.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use kernsim_core::ManualClock;
use kernsim_tcp::{BicState, CongestionControl, CongestionEvent, CubicConfig, CubicState};

fn bench_cubic_ack(c: &mut Criterion) {
    let clock = ManualClock::new();
    let mut cc = CubicState::new(CubicConfig::default(), clock.clone());
    // Push past slow start so the benchmark measures the curve path.
    for _ in 0..64 {
        cc.update(CongestionEvent::Ack {
            acked: 1,
            rtt_us: 10_000,
        });
    }
    cc.update(CongestionEvent::Loss);

    c.bench_function("cubic_ack", |b| {
        b.iter(|| {
            clock.advance_us(100);
            black_box(cc.update(CongestionEvent::Ack {
                acked: black_box(1),
                rtt_us: black_box(10_000),
            }))
        })
    });
}

fn bench_bic_ack(c: &mut Criterion) {
    let mut cc = BicState::new(100, 50);
    cc.update(CongestionEvent::Loss);

    c.bench_function("bic_ack", |b| {
        b.iter(|| {
            black_box(cc.update(CongestionEvent::Ack {
                acked: black_box(1),
                rtt_us: black_box(10_000),
            }))
        })
    });
}

criterion_group!(benches, bench_cubic_ack, bench_bic_ack);
criterion_main!(benches);
