//! Tick demo: CPUs drifting in and out of idle under high-res NOHZ.

use super::DemoOpts;
use anyhow::Result;
use crossbeam::channel::{after, select, tick};
use kernsim_core::{report, SimRng};
use kernsim_tick::{TickConfig, TickManager};
use std::time::Duration;
use tracing::info;

const NUM_CPUS: usize = 12;

pub fn run(opts: &DemoOpts) -> Result<()> {
    let mut rng = SimRng::with_seed(opts.seed);
    let mut manager = TickManager::new(TickConfig {
        num_cpus: NUM_CPUS,
        ..Default::default()
    })?;
    for cpu in 0..NUM_CPUS {
        manager.switch_to_nohz(cpu)?;
    }
    manager.start()?;
    info!(duration_ms = opts.duration_ms, "tick demo running");

    let ticker = tick(Duration::from_millis(5));
    let done = after(Duration::from_millis(opts.duration_ms));
    loop {
        select! {
            recv(ticker) -> _ => {
                let cpu = rng.range_u32(0, NUM_CPUS as u32) as usize;
                if rng.chance(60) {
                    manager.cpu_enter_idle(cpu)?;
                } else {
                    manager.cpu_exit_idle(cpu)?;
                }
            }
            recv(done) -> _ => break,
        }
    }

    manager.stop();
    report::emit("tick-manager", &manager.stats(), opts.json);
    Ok(())
}
