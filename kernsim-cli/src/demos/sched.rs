//! Scheduler demo: a steady stream of mixed-priority tasks.

use super::DemoOpts;
use anyhow::Result;
use crossbeam::channel::{after, select, tick};
use kernsim_core::{report, SimRng};
use kernsim_sched::{CpuScheduler, SchedulerConfig, Task, TaskKind};
use std::time::Duration;
use tracing::{debug, info};

pub fn run(opts: &DemoOpts) -> Result<()> {
    let mut rng = SimRng::with_seed(opts.seed);
    let mut scheduler = CpuScheduler::new(SchedulerConfig {
        num_cpus: 4,
        max_tasks: 256,
        default_timeslice_ms: 10,
        balance_interval_ms: 250,
    })?;
    scheduler.start()?;
    info!(duration_ms = opts.duration_ms, "scheduler demo running");

    let ticker = tick(Duration::from_millis(20));
    let done = after(Duration::from_millis(opts.duration_ms));
    let mut next_id = 0u64;
    loop {
        select! {
            recv(ticker) -> _ => {
                let kind = match rng.range_u32(0, 10) {
                    0..=6 => TaskKind::Normal,
                    7..=8 => TaskKind::RealTime,
                    _ => TaskKind::Idle,
                };
                let priority = rng.range_u32(0, 100) as u8;
                let deadline_ms = rng.range_u64(20, 200);
                let task = Task::new(next_id, kind, priority, deadline_ms)?
                    .with_timeslice(10);
                match scheduler.schedule(task) {
                    Ok(()) => next_id += 1,
                    Err(err) if err.is_recoverable() => {
                        debug!(%err, "task rejected");
                    }
                    Err(err) => return Err(err.into()),
                }
            }
            recv(done) -> _ => break,
        }
    }

    scheduler.stop();
    report::emit("cpu-scheduler", &scheduler.stats(), opts.json);
    Ok(())
}
