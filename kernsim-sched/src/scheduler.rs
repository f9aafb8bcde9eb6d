//! Scheduler core: task placement, CPU workers, load balancer.

use crate::cpu::{Cpu, CpuState};
use crate::stats::{CpuSnapshot, SchedulerStats};
use crate::task::{Task, TaskState};
use kernsim_core::{SimError, SimResult};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, trace};

/// Hard cap on simulated CPUs.
pub const MAX_CPUS: usize = 16;

/// How often sleeping service threads re-check the running flag.
const STOP_POLL_MS: u64 = 20;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of CPU worker threads, 1..=16.
    pub num_cpus: usize,
    /// Ceiling on live (not yet Dead) tasks.
    pub max_tasks: usize,
    /// Timeslice used when a CPU idles, in milliseconds.
    pub default_timeslice_ms: u64,
    /// Load balancer period, in milliseconds.
    pub balance_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            num_cpus: num_cpus::get().min(MAX_CPUS),
            max_tasks: 1024,
            default_timeslice_ms: 100,
            balance_interval_ms: 1_000,
        }
    }
}

#[derive(Default)]
struct SchedCounters {
    tasks_scheduled: AtomicU64,
    tasks_completed: AtomicU64,
    context_switches: AtomicU64,
    migrations: AtomicU64,
    load_balances: AtomicU64,
}

struct Shared {
    cpus: Vec<Cpu>,
    running: AtomicBool,
    live_tasks: AtomicUsize,
    counters: SchedCounters,
    config: SchedulerConfig,
}

struct WorkerHandle {
    thread: Option<thread::JoinHandle<()>>,
    #[allow(dead_code)]
    id: usize,
}

/// Multi-CPU scheduler.
///
/// `new` allocates the CPU records without spawning anything; `start` brings
/// up one worker per CPU plus the balancer; `stop` clears the running flag
/// and joins every thread.
pub struct CpuScheduler {
    shared: Arc<Shared>,
    workers: Vec<WorkerHandle>,
    balancer: Option<thread::JoinHandle<()>>,
    started: bool,
}

impl CpuScheduler {
    pub fn new(config: SchedulerConfig) -> SimResult<Self> {
        if config.num_cpus == 0 || config.num_cpus > MAX_CPUS {
            return Err(SimError::invalid(format!(
                "num_cpus {} out of range 1..={MAX_CPUS}",
                config.num_cpus
            )));
        }
        if config.max_tasks == 0 {
            return Err(SimError::invalid("max_tasks must be non-zero"));
        }
        let cpus = (0..config.num_cpus).map(Cpu::new).collect();
        Ok(Self {
            shared: Arc::new(Shared {
                cpus,
                running: AtomicBool::new(false),
                live_tasks: AtomicUsize::new(0),
                counters: SchedCounters::default(),
                config,
            }),
            workers: Vec::new(),
            balancer: None,
            started: false,
        })
    }

    /// Insert a task into the least-loaded CPU's queue (ties go to the
    /// lowest CPU id).
    pub fn schedule(&self, task: Task) -> SimResult<()> {
        let target = self
            .shared
            .cpus
            .iter()
            .map(|cpu| cpu.queue.lock().len())
            .enumerate()
            .min_by_key(|&(id, len)| (len, id))
            .map(|(id, _)| id)
            .ok_or_else(|| SimError::invalid("scheduler has no CPUs"))?;
        self.place(target, task)
    }

    /// Insert a task into a specific CPU's queue.
    pub fn schedule_on(&self, cpu: usize, task: Task) -> SimResult<()> {
        if cpu >= self.shared.cpus.len() {
            return Err(SimError::invalid(format!(
                "no such CPU {cpu} (have {})",
                self.shared.cpus.len()
            )));
        }
        self.place(cpu, task)
    }

    fn place(&self, cpu: usize, task: Task) -> SimResult<()> {
        self.shared.reserve_task_slot()?;
        trace!(task = task.id, cpu, "task scheduled");
        self.shared.cpus[cpu].queue.lock().push_tail(task);
        self.shared
            .counters
            .tasks_scheduled
            .fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Spawn the CPU workers and the balancer thread.
    pub fn start(&mut self) -> SimResult<()> {
        if self.started {
            return Err(SimError::StateViolation {
                operation: "start",
                state: "already started".into(),
            });
        }
        self.shared.running.store(true, Ordering::SeqCst);

        for id in 0..self.shared.cpus.len() {
            let shared = Arc::clone(&self.shared);
            let handle = thread::Builder::new()
                .name(format!("cpu-{id}"))
                .spawn(move || worker_loop(shared, id))
                .map_err(|e| {
                    self.shared.running.store(false, Ordering::SeqCst);
                    SimError::fatal(format!("failed to spawn cpu worker {id}: {e}"))
                })?;
            self.workers.push(WorkerHandle {
                thread: Some(handle),
                id,
            });
        }

        let shared = Arc::clone(&self.shared);
        self.balancer = Some(
            thread::Builder::new()
                .name("balancer".into())
                .spawn(move || balancer_loop(shared))
                .map_err(|e| {
                    self.shared.running.store(false, Ordering::SeqCst);
                    SimError::fatal(format!("failed to spawn balancer: {e}"))
                })?,
        );

        self.started = true;
        debug!(cpus = self.shared.cpus.len(), "scheduler started");
        Ok(())
    }

    /// Clear the running flag and join every thread. Idempotent.
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        for worker in &mut self.workers {
            if let Some(handle) = worker.thread.take() {
                let _ = handle.join();
            }
        }
        self.workers.clear();
        if let Some(handle) = self.balancer.take() {
            let _ = handle.join();
        }
        self.started = false;
    }

    /// Run one balancer pass directly (the balancer thread calls the same
    /// path on its timer).
    pub fn balance_once(&self) {
        self.shared.balance_once();
    }

    pub fn stats(&self) -> SchedulerStats {
        let c = &self.shared.counters;
        SchedulerStats {
            tasks_scheduled: c.tasks_scheduled.load(Ordering::Relaxed),
            tasks_completed: c.tasks_completed.load(Ordering::Relaxed),
            tasks_live: self.shared.live_tasks.load(Ordering::Relaxed) as u64,
            context_switches: c.context_switches.load(Ordering::Relaxed),
            migrations: c.migrations.load(Ordering::Relaxed),
            load_balances: c.load_balances.load(Ordering::Relaxed),
            cpus: self
                .shared
                .cpus
                .iter()
                .map(|cpu| CpuSnapshot {
                    id: cpu.id,
                    state: *cpu.state.lock(),
                    queue_len: cpu.queue.lock().len(),
                    busy_time_ms: cpu.busy_time_ms.load(Ordering::Relaxed),
                    idle_time_ms: cpu.idle_time_ms.load(Ordering::Relaxed),
                })
                .collect(),
        }
    }
}

impl Drop for CpuScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    fn reserve_task_slot(&self) -> SimResult<()> {
        let mut live = self.live_tasks.load(Ordering::Relaxed);
        loop {
            if live >= self.config.max_tasks {
                return Err(SimError::CapacityExceeded {
                    resource: "scheduler tasks",
                    limit: self.config.max_tasks,
                });
            }
            match self.live_tasks.compare_exchange_weak(
                live,
                live + 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(()),
                Err(seen) => live = seen,
            }
        }
    }

    /// Move one task from the longest queue to the shortest when they differ
    /// by more than one. Both queues are locked in ascending CPU-id order.
    fn balance_once(&self) {
        let lens: Vec<usize> = self.cpus.iter().map(|cpu| cpu.queue.lock().len()).collect();
        let Some((max_id, &max_len)) = lens.iter().enumerate().max_by_key(|&(id, len)| (len, usize::MAX - id)) else {
            return;
        };
        let Some((min_id, &min_len)) = lens.iter().enumerate().min_by_key(|&(id, len)| (len, id)) else {
            return;
        };
        if max_id == min_id || max_len <= min_len + 1 {
            return;
        }

        let (lo, hi) = (max_id.min(min_id), max_id.max(min_id));
        let mut lo_guard = self.cpus[lo].queue.lock();
        let mut hi_guard = self.cpus[hi].queue.lock();
        let (src, dst) = if max_id == lo {
            (&mut lo_guard, &mut hi_guard)
        } else {
            (&mut hi_guard, &mut lo_guard)
        };

        // Lengths may have shifted between the snapshot and taking the locks.
        if src.len() <= dst.len() + 1 {
            return;
        }
        if let Some(task) = src.pop_head() {
            debug!(task = task.id, from = max_id, to = min_id, "migrating task");
            dst.push_head(task);
            self.counters.migrations.fetch_add(1, Ordering::Relaxed);
            self.counters.load_balances.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// CPU worker: pop a task, "run" it by sleeping its timeslice, account the
/// time, then retire or re-insert it at the queue head.
fn worker_loop(shared: Arc<Shared>, id: usize) {
    let cpu = &shared.cpus[id];
    *cpu.state.lock() = CpuState::Active;

    while shared.running.load(Ordering::SeqCst) {
        let next = cpu.queue.lock().pop_head();
        let Some(mut task) = next else {
            *cpu.state.lock() = CpuState::Idle;
            let idle_slice = shared.config.default_timeslice_ms;
            cpu.idle_time_ms.fetch_add(idle_slice, Ordering::Relaxed);
            thread::sleep(Duration::from_millis(idle_slice));
            continue;
        };

        *cpu.state.lock() = CpuState::Active;
        task.state = TaskState::Running;
        task.cpu = id;
        let slice = task.timeslice_ms;
        *cpu.current.lock() = Some(task);
        shared.counters.context_switches.fetch_add(1, Ordering::Relaxed);

        // Simulated execution happens outside all locks.
        thread::sleep(Duration::from_millis(slice));

        let Some(mut task) = cpu.current.lock().take() else {
            continue;
        };
        task.runtime_ms += slice;
        cpu.busy_time_ms.fetch_add(slice, Ordering::Relaxed);

        if task.runtime_ms >= task.deadline_ms {
            task.state = TaskState::Dead;
            shared.counters.tasks_completed.fetch_add(1, Ordering::Relaxed);
            shared.live_tasks.fetch_sub(1, Ordering::Relaxed);
            trace!(task = task.id, cpu = id, runtime = task.runtime_ms, "task retired");
        } else {
            cpu.queue.lock().push_head(task);
        }
    }

    *cpu.state.lock() = CpuState::Offline;
}

fn balancer_loop(shared: Arc<Shared>) {
    let interval = shared.config.balance_interval_ms.max(STOP_POLL_MS);
    while shared.running.load(Ordering::SeqCst) {
        let mut slept = 0;
        while slept < interval && shared.running.load(Ordering::SeqCst) {
            let chunk = STOP_POLL_MS.min(interval - slept);
            thread::sleep(Duration::from_millis(chunk));
            slept += chunk;
        }
        if !shared.running.load(Ordering::SeqCst) {
            break;
        }
        shared.balance_once();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskKind;

    fn sched(cpus: usize) -> CpuScheduler {
        CpuScheduler::new(SchedulerConfig {
            num_cpus: cpus,
            max_tasks: 64,
            default_timeslice_ms: 5,
            balance_interval_ms: 1_000,
        })
        .unwrap()
    }

    fn task(id: u64) -> Task {
        Task::new(id, TaskKind::Normal, 50, 500).unwrap()
    }

    #[test]
    fn rejects_zero_and_oversized_cpu_counts() {
        assert!(CpuScheduler::new(SchedulerConfig {
            num_cpus: 0,
            ..Default::default()
        })
        .is_err());
        assert!(CpuScheduler::new(SchedulerConfig {
            num_cpus: MAX_CPUS + 1,
            ..Default::default()
        })
        .is_err());
    }

    #[test]
    fn schedule_picks_least_loaded_with_lowest_id_tie_break() {
        let s = sched(3);
        // All empty: first task goes to CPU 0.
        s.schedule(task(1)).unwrap();
        assert_eq!(s.stats().cpus[0].queue_len, 1);
        // CPUs 1 and 2 tie at zero: lowest id wins.
        s.schedule(task(2)).unwrap();
        assert_eq!(s.stats().cpus[1].queue_len, 1);
        s.schedule(task(3)).unwrap();
        assert_eq!(s.stats().cpus[2].queue_len, 1);
    }

    #[test]
    fn schedule_on_rejects_missing_cpu() {
        let s = sched(2);
        let err = s.schedule_on(5, task(1)).unwrap_err();
        assert!(matches!(err, SimError::InvalidArgument { .. }));
    }

    #[test]
    fn capacity_ceiling_is_enforced() {
        let s = CpuScheduler::new(SchedulerConfig {
            num_cpus: 1,
            max_tasks: 2,
            default_timeslice_ms: 5,
            balance_interval_ms: 1_000,
        })
        .unwrap();
        s.schedule(task(1)).unwrap();
        s.schedule(task(2)).unwrap();
        let err = s.schedule(task(3)).unwrap_err();
        assert!(matches!(err, SimError::CapacityExceeded { .. }));
    }

    #[test]
    fn balance_skips_near_even_queues() {
        let s = sched(2);
        s.schedule_on(0, task(1)).unwrap();
        s.schedule_on(0, task(2)).unwrap();
        s.schedule_on(1, task(3)).unwrap();
        // Difference is exactly one: no move.
        s.balance_once();
        let stats = s.stats();
        assert_eq!(stats.migrations, 0);
        assert_eq!(stats.cpus[0].queue_len, 2);
        assert_eq!(stats.cpus[1].queue_len, 1);
    }

    #[test]
    fn double_start_is_a_state_violation() {
        let mut s = sched(1);
        s.start().unwrap();
        assert!(matches!(
            s.start(),
            Err(SimError::StateViolation { .. })
        ));
        s.stop();
    }
}
