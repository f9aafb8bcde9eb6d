//! Engine façade: routing, worker threads, lifecycle.

use crate::callback::{CallbackKind, ExecEffects};
use crate::nocb::{nocb_worker_loop, NocbConfig, NocbShared, NocbWorkerArg};
use crate::segment::{SegmentedCallbackList, GRACE_PERIOD_MS};
use crate::srcu::SrcuDomain;
use crate::stats::{NocbWorkerSnapshot, RcuStats};
use kernsim_core::{Clock, MonotonicClock, SimError, SimResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RcuConfig {
    pub num_cpus: usize,
    /// NOCB pool size, 1..=4.
    pub nocb_workers: usize,
    /// Grace-period processor cadence in milliseconds.
    pub grace_period_ms: u64,
    /// Per-CPU offload flags; `None` selects the even-indexed CPUs.
    pub nocb_cpus: Option<Vec<bool>>,
}

impl Default for RcuConfig {
    fn default() -> Self {
        Self {
            num_cpus: 4,
            nocb_workers: 2,
            grace_period_ms: GRACE_PERIOD_MS,
            nocb_cpus: None,
        }
    }
}

/// The callback engine: a segmented list drained on grace periods, a NOCB
/// worker pool for offloaded CPUs, and an SRCU domain for sleeping readers.
pub struct RcuEngine {
    list: Arc<SegmentedCallbackList>,
    nocb: Arc<NocbShared>,
    srcu: Arc<SrcuDomain>,
    effects: Arc<ExecEffects>,
    running: Arc<AtomicBool>,
    processor: Option<thread::JoinHandle<()>>,
    workers: Vec<Option<thread::JoinHandle<()>>>,
    num_workers: usize,
    grace_period_ms: u64,
    started: bool,
}

impl RcuEngine {
    pub fn new(config: RcuConfig) -> SimResult<Self> {
        Self::with_clock(config, Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(config: RcuConfig, clock: Arc<dyn Clock>) -> SimResult<Self> {
        if config.num_cpus == 0 {
            return Err(SimError::invalid("num_cpus must be non-zero"));
        }
        if config.grace_period_ms == 0 {
            return Err(SimError::invalid("grace_period_ms must be non-zero"));
        }
        let nocb_config = match config.nocb_cpus {
            Some(mask) => NocbConfig {
                num_cpus: config.num_cpus,
                num_workers: config.nocb_workers,
                nocb_cpus: mask,
            },
            None => NocbConfig::even_cpus(config.num_cpus, config.nocb_workers),
        };
        let effects = Arc::new(ExecEffects::default());
        Ok(Self {
            list: Arc::new(SegmentedCallbackList::new(
                Arc::clone(&clock),
                Arc::clone(&effects),
            )),
            nocb: Arc::new(NocbShared::new(&nocb_config, clock, Arc::clone(&effects))?),
            srcu: Arc::new(SrcuDomain::new()),
            effects,
            running: Arc::new(AtomicBool::new(false)),
            processor: None,
            workers: Vec::new(),
            num_workers: nocb_config.num_workers,
            grace_period_ms: config.grace_period_ms,
            started: false,
        })
    }

    /// Queue a callback on behalf of `cpu`. Offloaded CPUs route to the NOCB
    /// pool; everyone else lands in the segmented list.
    pub fn call_rcu(&self, cpu: usize, kind: CallbackKind, payload: u64) -> SimResult<()> {
        if cpu >= self.nocb.num_cpus() {
            return Err(SimError::invalid(format!(
                "no such CPU {cpu} (have {})",
                self.nocb.num_cpus()
            )));
        }
        if self.nocb.is_nocb_cpu(cpu) {
            let cb = self.list.make_callback(kind, payload);
            self.nocb.offload(cpu, cb)
        } else {
            self.list.enqueue(kind, payload).map(|_| ())
        }
    }

    /// The sleepable-reader domain of this engine.
    pub fn srcu(&self) -> &SrcuDomain {
        &self.srcu
    }

    /// Wait for a full grace period.
    pub fn synchronize(&self) {
        self.srcu.synchronize();
    }

    /// Direct access to the segmented list (single-pass processing in tests
    /// and drains at shutdown).
    pub fn list(&self) -> &SegmentedCallbackList {
        &self.list
    }

    pub fn start(&mut self) -> SimResult<()> {
        if self.started {
            return Err(SimError::StateViolation {
                operation: "start",
                state: "already started".into(),
            });
        }
        self.running.store(true, Ordering::SeqCst);

        let list = Arc::clone(&self.list);
        let running = Arc::clone(&self.running);
        let period = self.grace_period_ms;
        self.processor = Some(
            thread::Builder::new()
                .name("rcu-gp".into())
                .spawn(move || {
                    while running.load(Ordering::SeqCst) {
                        thread::sleep(Duration::from_millis(period));
                        list.process_pass();
                    }
                })
                .map_err(|e| {
                    self.running.store(false, Ordering::SeqCst);
                    SimError::fatal(format!("failed to spawn grace-period processor: {e}"))
                })?,
        );

        for id in 0..self.num_workers {
            let arg = NocbWorkerArg {
                shared: Arc::clone(&self.nocb),
                running: Arc::clone(&self.running),
                id,
            };
            let handle = thread::Builder::new()
                .name(format!("nocb-{id}"))
                .spawn(move || nocb_worker_loop(arg))
                .map_err(|e| {
                    self.running.store(false, Ordering::SeqCst);
                    SimError::fatal(format!("failed to spawn nocb worker {id}: {e}"))
                })?;
            self.workers.push(Some(handle));
        }

        self.started = true;
        debug!(workers = self.num_workers, "rcu engine started");
        Ok(())
    }

    /// Stop the threads, then drain both paths so no queued callback is
    /// lost. Idempotent.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.processor.take() {
            let _ = handle.join();
        }
        for worker in &mut self.workers {
            if let Some(handle) = worker.take() {
                let _ = handle.join();
            }
        }
        self.workers.clear();
        if self.started {
            self.list.flush();
            self.nocb.drain();
            self.started = false;
        }
    }

    pub fn stats(&self) -> RcuStats {
        RcuStats {
            callbacks_queued: self.list.queued() + self.nocb.offloaded(),
            callbacks_processed: self.list.processed() + self.nocb.processed(),
            grace_periods: self.list.grace_periods(),
            segment_advances: self.list.advances(),
            enqueue_failures: self.list.enqueue_failures(),
            nocb_offloaded: self.nocb.offloaded(),
            nocb_batches: self.nocb.batches(),
            nocb_pending: self.nocb.pending() as u64,
            nocb_workers: self
                .nocb
                .workers
                .iter()
                .enumerate()
                .map(|(id, w)| NocbWorkerSnapshot {
                    id,
                    processed: w.processed.load(Ordering::Relaxed),
                    busy_ns: w.busy_ns.load(Ordering::Relaxed),
                })
                .collect(),
            srcu_completed: self.srcu.completed(),
            srcu_active_readers: self.srcu.active_readers() as u64,
            memory_reclaimed_bytes: self.effects.memory_reclaimed_bytes.load(Ordering::Relaxed),
            refs_released: self.effects.refs_released.load(Ordering::Relaxed),
            waiters_woken: self.effects.waiters_woken.load(Ordering::Relaxed),
        }
    }
}

impl Drop for RcuEngine {
    fn drop(&mut self) {
        self.stop();
    }
}
