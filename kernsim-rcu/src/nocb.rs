//! NOCB offload: dedicated workers drain flagged CPUs' callback queues.

use crate::callback::{Callback, CallbackState, ExecEffects};
use kernsim_core::{Clock, SimError, SimResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Pool size cap.
pub const MAX_NOCB_WORKERS: usize = 4;
/// Callbacks collected per worker pass.
pub const NOCB_BATCH: usize = 32;
/// Sleep when a pass finds no work.
pub const NOCB_IDLE_SLEEP_US: u64 = 100;

#[derive(Debug, Clone)]
pub struct NocbConfig {
    pub num_cpus: usize,
    pub num_workers: usize,
    /// Which CPUs offload their callbacks. Defaults to the even-indexed ones.
    pub nocb_cpus: Vec<bool>,
}

impl NocbConfig {
    pub fn even_cpus(num_cpus: usize, num_workers: usize) -> Self {
        Self {
            num_cpus,
            num_workers,
            nocb_cpus: (0..num_cpus).map(|cpu| cpu % 2 == 0).collect(),
        }
    }
}

struct CpuQueue {
    nocb_enabled: bool,
    queue: Mutex<VecDeque<Callback>>,
}

#[derive(Default)]
pub(crate) struct WorkerCounters {
    pub processed: AtomicU64,
    pub busy_ns: AtomicU64,
}

impl std::fmt::Debug for NocbShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NocbShared")
            .field("offloaded", &self.offloaded.load(Ordering::Relaxed))
            .field("batches", &self.batches.load(Ordering::Relaxed))
            .finish()
    }
}

/// Shared state of the NOCB pool: the per-CPU queues and the counters.
pub(crate) struct NocbShared {
    queues: Vec<CpuQueue>,
    pub workers: Vec<WorkerCounters>,
    offloaded: AtomicU64,
    batches: AtomicU64,
    effects: Arc<ExecEffects>,
    clock: Arc<dyn Clock>,
}

impl NocbShared {
    pub fn new(config: &NocbConfig, clock: Arc<dyn Clock>, effects: Arc<ExecEffects>) -> SimResult<Self> {
        if config.num_workers == 0 || config.num_workers > MAX_NOCB_WORKERS {
            return Err(SimError::invalid(format!(
                "nocb worker count {} out of range 1..={MAX_NOCB_WORKERS}",
                config.num_workers
            )));
        }
        if config.nocb_cpus.len() != config.num_cpus {
            return Err(SimError::invalid("nocb_cpus mask length must equal num_cpus"));
        }
        Ok(Self {
            queues: config
                .nocb_cpus
                .iter()
                .map(|&enabled| CpuQueue {
                    nocb_enabled: enabled,
                    queue: Mutex::new(VecDeque::new()),
                })
                .collect(),
            workers: (0..config.num_workers).map(|_| WorkerCounters::default()).collect(),
            offloaded: AtomicU64::new(0),
            batches: AtomicU64::new(0),
            effects,
            clock,
        })
    }

    pub fn is_nocb_cpu(&self, cpu: usize) -> bool {
        self.queues.get(cpu).map(|q| q.nocb_enabled).unwrap_or(false)
    }

    pub fn num_cpus(&self) -> usize {
        self.queues.len()
    }

    /// Hand a callback to an offloaded CPU's queue.
    pub fn offload(&self, cpu: usize, mut cb: Callback) -> SimResult<()> {
        let queue = self
            .queues
            .get(cpu)
            .ok_or_else(|| SimError::invalid(format!("no such CPU {cpu}")))?;
        if !queue.nocb_enabled {
            return Err(SimError::StateViolation {
                operation: "nocb offload",
                state: format!("cpu {cpu} is not nocb-enabled"),
            });
        }
        cb.state = CallbackState::Pending;
        queue.queue.lock().push_back(cb);
        self.offloaded.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Build one batch by popping one callback from each enabled CPU in
    /// sequence, cycling until the batch is full or every queue is dry.
    /// Returns the batch; execution belongs to the caller, outside all locks.
    fn collect_batch(&self) -> Vec<Callback> {
        let enabled: Vec<&CpuQueue> = self.queues.iter().filter(|q| q.nocb_enabled).collect();
        let mut batch = Vec::with_capacity(NOCB_BATCH);
        if enabled.is_empty() {
            return batch;
        }
        loop {
            let mut found = false;
            for queue in &enabled {
                if batch.len() == NOCB_BATCH {
                    return batch;
                }
                if let Some(cb) = queue.queue.lock().pop_front() {
                    batch.push(cb);
                    found = true;
                }
            }
            if !found {
                return batch;
            }
        }
    }

    /// One worker pass. Returns how many callbacks reached Done.
    pub fn worker_pass(&self, worker_id: usize) -> usize {
        let batch = self.collect_batch();
        if batch.is_empty() {
            return 0;
        }
        let started = self.clock.now_ns();
        let now = self.clock.now_ns();
        let mut done = 0;
        for mut cb in batch {
            self.effects.apply(&mut cb, now);
            if cb.state == CallbackState::Done {
                done += 1;
            }
        }
        let counters = &self.workers[worker_id];
        counters.processed.fetch_add(done as u64, Ordering::Relaxed);
        counters
            .busy_ns
            .fetch_add(self.clock.now_ns().saturating_sub(started), Ordering::Relaxed);
        self.batches.fetch_add(1, Ordering::Relaxed);
        trace!(worker = worker_id, done, "nocb batch executed");
        done
    }

    /// Drain every queue synchronously. Used at shutdown.
    pub fn drain(&self) -> usize {
        let mut total = 0;
        loop {
            let n = self.worker_pass(0);
            total += n;
            if n == 0 {
                return total;
            }
        }
    }

    pub fn offloaded(&self) -> u64 {
        self.offloaded.load(Ordering::Relaxed)
    }

    pub fn batches(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }

    pub fn processed(&self) -> u64 {
        self.workers
            .iter()
            .map(|w| w.processed.load(Ordering::Relaxed))
            .sum()
    }

    pub fn pending(&self) -> usize {
        self.queues.iter().map(|q| q.queue.lock().len()).sum()
    }
}

/// The one structured argument a NOCB worker thread receives.
pub(crate) struct NocbWorkerArg {
    pub shared: Arc<NocbShared>,
    pub running: Arc<AtomicBool>,
    pub id: usize,
}

/// NOCB worker thread body.
pub(crate) fn nocb_worker_loop(arg: NocbWorkerArg) {
    while arg.running.load(Ordering::SeqCst) {
        if arg.shared.worker_pass(arg.id) == 0 {
            std::thread::sleep(Duration::from_micros(NOCB_IDLE_SLEEP_US));
        }
    }
}
