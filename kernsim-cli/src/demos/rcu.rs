//! RCU demo: callback bursts across CPUs plus sleeping SRCU readers.

use super::DemoOpts;
use anyhow::Result;
use crossbeam::channel::{after, select, tick};
use kernsim_core::{report, SimRng};
use kernsim_rcu::{CallbackKind, RcuConfig, RcuEngine};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

const READER_THREADS: usize = 2;

pub fn run(opts: &DemoOpts) -> Result<()> {
    let mut rng = SimRng::with_seed(opts.seed);
    let mut engine = RcuEngine::new(RcuConfig {
        num_cpus: 4,
        nocb_workers: 2,
        grace_period_ms: 5,
        nocb_cpus: None,
    })?;
    engine.start()?;
    info!(duration_ms = opts.duration_ms, "rcu demo running");

    let engine = Arc::new(engine);
    let readers_running = Arc::new(AtomicBool::new(true));
    let readers: Vec<_> = (0..READER_THREADS)
        .map(|i| {
            let engine = Arc::clone(&engine);
            let running = Arc::clone(&readers_running);
            thread::Builder::new()
                .name(format!("srcu-reader-{i}"))
                .spawn(move || {
                    while running.load(Ordering::SeqCst) {
                        match engine.srcu().read_lock_any() {
                            Ok((slot, idx)) => {
                                // Sleeping inside the read section is the
                                // whole point of SRCU.
                                thread::sleep(Duration::from_micros(200));
                                let _ = engine.srcu().read_unlock(slot, idx);
                            }
                            Err(_) => thread::sleep(Duration::from_micros(50)),
                        }
                        thread::sleep(Duration::from_micros(100));
                    }
                })
        })
        .collect::<std::io::Result<_>>()?;

    let ticker = tick(Duration::from_millis(1));
    let done = after(Duration::from_millis(opts.duration_ms));
    let mut ticks = 0u64;
    loop {
        select! {
            recv(ticker) -> _ => {
                ticks += 1;
                for _ in 0..8 {
                    let cpu = rng.range_u32(0, 4) as usize;
                    let kind = match rng.range_u32(0, 3) {
                        0 => CallbackKind::ReclaimMemory,
                        1 => CallbackKind::ReleaseRef,
                        _ => CallbackKind::WakeWaiter,
                    };
                    let payload = u64::from(rng.range_u32(64, 4096));
                    if let Err(err) = engine.call_rcu(cpu, kind, payload) {
                        debug!(%err, "callback rejected");
                    }
                }
                // A writer waits for a grace period every so often.
                if ticks % 20 == 0 {
                    engine.synchronize();
                }
            }
            recv(done) -> _ => break,
        }
    }

    readers_running.store(false, Ordering::SeqCst);
    for reader in readers {
        let _ = reader.join();
    }

    let mut engine = Arc::into_inner(engine)
        .ok_or_else(|| anyhow::anyhow!("reader threads still hold the engine"))?;
    engine.stop();
    report::emit("rcu-engine", &engine.stats(), opts.json);
    Ok(())
}
