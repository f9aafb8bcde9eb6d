//! Congestion-control demo: one CUBIC and one BIC connection under the same
//! event stream.

use super::DemoOpts;
use anyhow::Result;
use crossbeam::channel::{after, select, tick};
use kernsim_core::{report, MonotonicClock, SimRng};
use kernsim_tcp::{BicState, CongestionControl, CongestionEvent, CubicConfig, CubicState};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub fn run(opts: &DemoOpts) -> Result<()> {
    let mut rng = SimRng::with_seed(opts.seed);
    let clock = Arc::new(MonotonicClock::new());
    let mut cubic = CubicState::new(CubicConfig::default(), clock);
    let mut bic = BicState::default();
    info!(duration_ms = opts.duration_ms, "tcp demo running");

    let ticker = tick(Duration::from_millis(1));
    let done = after(Duration::from_millis(opts.duration_ms));
    loop {
        select! {
            recv(ticker) -> _ => {
                // Mostly ACKs with jittered RTTs, a little loss, rare RTOs.
                let event = match rng.range_u32(0, 1_000) {
                    0..=974 => CongestionEvent::Ack {
                        acked: rng.range_u32(1, 4),
                        rtt_us: u64::from(rng.range_u32(8_000, 15_000)),
                    },
                    975..=994 => CongestionEvent::Loss,
                    _ => CongestionEvent::Timeout,
                };
                cubic.update(event);
                bic.update(event);
            }
            recv(done) -> _ => break,
        }
    }

    report::emit("tcp-cubic", &cubic.stats(), opts.json);
    report::emit("tcp-bic", &bic.stats(), opts.json);
    Ok(())
}
