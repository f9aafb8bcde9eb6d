//! Shaper demo: three leaf classes pushing packets through HTB into ETF.

use super::DemoOpts;
use anyhow::Result;
use crossbeam::channel::{after, select, tick};
use kernsim_core::{report, Clock, MonotonicClock, SimRng};
use kernsim_shaper::{EtfConfig, HtbConfig, HtbShaper, TrafficClass, TrafficShaper};
use std::time::Duration;
use tracing::info;

pub fn run(opts: &DemoOpts) -> Result<()> {
    let mut rng = SimRng::with_seed(opts.seed);
    let clock = MonotonicClock::new();
    let mut shaper = TrafficShaper::new(
        HtbConfig {
            root_rate_bps: 1_000_000_000,
            root_ceil_bps: 2_000_000_000,
            max_classes: 16,
        },
        EtfConfig {
            bandwidth_bps: 1_000_000_000,
            max_queue_depth: 128,
        },
    )?;

    let classes = [
        shaper.htb().create_class(
            HtbShaper::ROOT,
            400_000_000,
            800_000_000,
            TrafficClass::Interactive,
        )?,
        shaper.htb().create_class(
            HtbShaper::ROOT,
            300_000_000,
            600_000_000,
            TrafficClass::Bulk,
        )?,
        shaper.htb().create_class(
            HtbShaper::ROOT,
            100_000_000,
            200_000_000,
            TrafficClass::BestEffort,
        )?,
    ];
    info!(duration_ms = opts.duration_ms, "shaper demo running");

    let ticker = tick(Duration::from_millis(1));
    let done = after(Duration::from_millis(opts.duration_ms));
    loop {
        select! {
            recv(ticker) -> _ => {
                let now_us = clock.now_us();
                let bursts = rng.range_u32(1, 6);
                for _ in 0..bursts {
                    let class = classes[rng.range_u32(0, 3) as usize];
                    let size = u64::from(rng.range_u32(64, 1_500));
                    let priority = rng.range_u32(0, 5) as u8;
                    let deadline_us = now_us + rng.range_u64(200, 5_000);
                    shaper.submit(class, size, priority, deadline_us, now_us)?;
                }
                shaper.advance(now_us, 8);
            }
            recv(done) -> _ => break,
        }
    }
    shaper.advance(clock.now_us(), usize::MAX);

    report::emit("traffic-shaper", &shaper.stats(), opts.json);
    Ok(())
}
