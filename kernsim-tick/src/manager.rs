//! Tick manager: jiffy advancement, NOHZ transitions, idle balancing.

use crate::device::{CpuTick, DeviceState, IdleState, NohzMode, TickMode};
use crate::stats::TickStats;
use kernsim_core::{Clock, MonotonicClock, SimError, SimResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, trace};

/// One jiffy: 1 ms.
pub const JIFFY_NS: u64 = 1_000_000;
/// Idle CPUs tolerated before the load loop forces one back.
pub const MAX_IDLE_BALANCE: usize = 10;

/// Tick-thread polling cadence.
const TICK_POLL_US: u64 = 100;
/// Load-thread sampling cadence.
const LOAD_SAMPLE_MS: u64 = 1;

#[derive(Debug, Clone)]
pub struct TickConfig {
    pub num_cpus: usize,
    pub period_ns: u64,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            num_cpus: 4,
            period_ns: JIFFY_NS,
        }
    }
}

struct TickShared {
    cpus: Vec<Mutex<CpuTick>>,
    jiffies: AtomicU64,
    /// Time already converted into jiffies; advanced only forward.
    jiffy_anchor_ns: AtomicU64,
    period_ns: u64,
    running: AtomicBool,
    ticks_lost: AtomicU64,
    tick_stops: AtomicU64,
    tick_starts: AtomicU64,
    nohz_switches: AtomicU64,
    idle_balances: AtomicU64,
    clock: Arc<dyn Clock>,
}

/// Owns the tick thread and the load thread.
pub struct TickManager {
    shared: Arc<TickShared>,
    tick_thread: Option<thread::JoinHandle<()>>,
    load_thread: Option<thread::JoinHandle<()>>,
    started: bool,
}

impl TickManager {
    pub fn new(config: TickConfig) -> SimResult<Self> {
        Self::with_clock(config, Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(config: TickConfig, clock: Arc<dyn Clock>) -> SimResult<Self> {
        if config.num_cpus == 0 {
            return Err(SimError::invalid("num_cpus must be non-zero"));
        }
        if config.period_ns == 0 {
            return Err(SimError::invalid("tick period must be non-zero"));
        }
        let start_ns = clock.now_ns();
        Ok(Self {
            shared: Arc::new(TickShared {
                cpus: (0..config.num_cpus)
                    .map(|_| Mutex::new(CpuTick::new(config.period_ns)))
                    .collect(),
                jiffies: AtomicU64::new(0),
                jiffy_anchor_ns: AtomicU64::new(start_ns),
                period_ns: config.period_ns,
                running: AtomicBool::new(false),
                ticks_lost: AtomicU64::new(0),
                tick_stops: AtomicU64::new(0),
                tick_starts: AtomicU64::new(0),
                nohz_switches: AtomicU64::new(0),
                idle_balances: AtomicU64::new(0),
                clock,
            }),
            tick_thread: None,
            load_thread: None,
            started: false,
        })
    }

    pub fn start(&mut self) -> SimResult<()> {
        if self.started {
            return Err(SimError::StateViolation {
                operation: "start",
                state: "already started".into(),
            });
        }
        self.shared.running.store(true, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        self.tick_thread = Some(
            thread::Builder::new()
                .name("tick".into())
                .spawn(move || {
                    while shared.running.load(Ordering::SeqCst) {
                        thread::sleep(Duration::from_micros(TICK_POLL_US));
                        shared.tick_once();
                    }
                })
                .map_err(|e| {
                    self.shared.running.store(false, Ordering::SeqCst);
                    SimError::fatal(format!("failed to spawn tick thread: {e}"))
                })?,
        );

        let shared = Arc::clone(&self.shared);
        self.load_thread = Some(
            thread::Builder::new()
                .name("tick-load".into())
                .spawn(move || {
                    while shared.running.load(Ordering::SeqCst) {
                        thread::sleep(Duration::from_millis(LOAD_SAMPLE_MS));
                        shared.load_balance_once();
                    }
                })
                .map_err(|e| {
                    self.shared.running.store(false, Ordering::SeqCst);
                    SimError::fatal(format!("failed to spawn load thread: {e}"))
                })?,
        );

        self.started = true;
        debug!(cpus = self.shared.cpus.len(), "tick manager started");
        Ok(())
    }

    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.tick_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.load_thread.take() {
            let _ = handle.join();
        }
        self.started = false;
    }

    /// One tick-thread iteration (the thread calls the same path).
    pub fn tick_once(&self) {
        self.shared.tick_once();
    }

    /// One load-thread iteration.
    pub fn load_balance_once(&self) {
        self.shared.load_balance_once();
    }

    pub fn jiffies(&self) -> u64 {
        self.shared.jiffies.load(Ordering::SeqCst)
    }

    /// Arm one-shot NOHZ mode. No-op unless the CPU is still in the
    /// periodic world.
    pub fn switch_to_nohz(&self, cpu: usize) -> SimResult<()> {
        let mut tick = self.shared.cpu(cpu)?;
        if tick.nohz == NohzMode::Inactive {
            tick.device.mode = TickMode::OneShot;
            tick.nohz = NohzMode::HighRes;
            self.shared.nohz_switches.fetch_add(1, Ordering::Relaxed);
            trace!(cpu, "switched to high-res nohz");
        }
        Ok(())
    }

    /// Stop the CPU's tick. Idempotent.
    pub fn stop_tick(&self, cpu: usize) -> SimResult<()> {
        let mut tick = self.shared.cpu(cpu)?;
        self.shared.stop_tick_locked(&mut tick, cpu);
        Ok(())
    }

    /// Restart the CPU's tick; missed periods are counted, never replayed.
    pub fn start_tick(&self, cpu: usize) -> SimResult<()> {
        let mut tick = self.shared.cpu(cpu)?;
        self.shared.start_tick_locked(&mut tick, cpu);
        Ok(())
    }

    /// A CPU begins idling. Under high-res NOHZ this stops its tick.
    pub fn cpu_enter_idle(&self, cpu: usize) -> SimResult<()> {
        let mut tick = self.shared.cpu(cpu)?;
        tick.idle = IdleState::NewlyIdle;
        if tick.nohz == NohzMode::HighRes && !tick.tick_stopped {
            self.shared.stop_tick_locked(&mut tick, cpu);
        }
        tick.idle = IdleState::Idle;
        Ok(())
    }

    /// A CPU leaves idle; a stopped tick restarts.
    pub fn cpu_exit_idle(&self, cpu: usize) -> SimResult<()> {
        let mut tick = self.shared.cpu(cpu)?;
        tick.idle = IdleState::NotIdle;
        if tick.tick_stopped {
            self.shared.start_tick_locked(&mut tick, cpu);
        }
        Ok(())
    }

    pub fn nohz_mode(&self, cpu: usize) -> SimResult<NohzMode> {
        Ok(self.shared.cpu(cpu)?.nohz)
    }

    pub fn is_tick_stopped(&self, cpu: usize) -> SimResult<bool> {
        Ok(self.shared.cpu(cpu)?.tick_stopped)
    }

    pub fn idle_state(&self, cpu: usize) -> SimResult<IdleState> {
        Ok(self.shared.cpu(cpu)?.idle)
    }

    pub fn device_state(&self, cpu: usize) -> SimResult<DeviceState> {
        Ok(self.shared.cpu(cpu)?.device.state)
    }

    pub fn stats(&self) -> TickStats {
        let mut ticks_handled = 0;
        let mut idle_sleeps = 0;
        let mut cpus_idle = 0;
        let mut ticks_stopped = 0;
        for cpu in &self.shared.cpus {
            let tick = cpu.lock();
            ticks_handled += tick.ticks_handled;
            idle_sleeps += tick.idle_sleeps;
            if tick.idle == IdleState::Idle {
                cpus_idle += 1;
            }
            if tick.tick_stopped {
                ticks_stopped += 1;
            }
        }
        TickStats {
            jiffies: self.jiffies(),
            ticks_handled,
            ticks_lost: self.shared.ticks_lost.load(Ordering::Relaxed),
            tick_stops: self.shared.tick_stops.load(Ordering::Relaxed),
            tick_starts: self.shared.tick_starts.load(Ordering::Relaxed),
            nohz_switches: self.shared.nohz_switches.load(Ordering::Relaxed),
            idle_balances: self.shared.idle_balances.load(Ordering::Relaxed),
            idle_sleeps,
            cpus_idle,
            ticks_stopped,
        }
    }
}

impl Drop for TickManager {
    fn drop(&mut self) {
        self.stop();
    }
}

impl TickShared {
    fn cpu(&self, cpu: usize) -> SimResult<parking_lot::MutexGuard<'_, CpuTick>> {
        self.cpus
            .get(cpu)
            .map(|c| c.lock())
            .ok_or_else(|| SimError::invalid(format!("no such CPU {cpu}")))
    }

    /// Advance jiffies by however many whole periods elapsed, then run the
    /// tick handler of every CPU whose device is active.
    fn tick_once(&self) {
        let now_ns = self.clock.now_ns();
        let anchor = self.jiffy_anchor_ns.load(Ordering::Acquire);
        if now_ns <= anchor {
            return;
        }
        let periods = (now_ns - anchor) / self.period_ns;
        if periods == 0 {
            return;
        }
        self.jiffies.fetch_add(periods, Ordering::SeqCst);
        self.jiffy_anchor_ns
            .store(anchor + periods * self.period_ns, Ordering::Release);

        for cpu in &self.cpus {
            let mut tick = cpu.lock();
            if tick.device.state != DeviceState::Active {
                continue;
            }
            match tick.device.mode {
                TickMode::Periodic => {
                    // One handler run per wakeup; extra elapsed periods are
                    // lost ticks.
                    tick.device.last_tick_ns += tick.device.period_ns;
                    tick.device.next_tick_ns =
                        tick.device.last_tick_ns + tick.device.period_ns;
                    tick.ticks_handled += 1;
                    if periods > 1 {
                        self.ticks_lost.fetch_add(periods - 1, Ordering::Relaxed);
                    }
                }
                TickMode::OneShot => {
                    tick.idle_sleeps += 1;
                }
            }
        }
    }

    /// Push one CPU out of idle when more than [`MAX_IDLE_BALANCE`] idle.
    fn load_balance_once(&self) {
        let idle: Vec<usize> = self
            .cpus
            .iter()
            .enumerate()
            .filter(|(_, c)| c.lock().idle == IdleState::Idle)
            .map(|(i, _)| i)
            .collect();
        if idle.len() <= MAX_IDLE_BALANCE {
            return;
        }
        let target = idle[0];
        let mut tick = self.cpus[target].lock();
        tick.idle = IdleState::NotIdle;
        if tick.tick_stopped {
            self.start_tick_locked(&mut tick, target);
        }
        self.idle_balances.fetch_add(1, Ordering::Relaxed);
        debug!(cpu = target, idle = idle.len(), "forced cpu out of idle");
    }

    fn stop_tick_locked(&self, tick: &mut CpuTick, cpu: usize) {
        if tick.tick_stopped {
            return;
        }
        tick.device.state = DeviceState::Inactive;
        tick.idle_tick_ns = tick.device.last_tick_ns;
        tick.tick_stopped = true;
        self.tick_stops.fetch_add(1, Ordering::Relaxed);
        trace!(cpu, "tick stopped");
    }

    fn start_tick_locked(&self, tick: &mut CpuTick, cpu: usize) {
        if !tick.tick_stopped {
            return;
        }
        // Count the periods that went by while stopped; they are not
        // replayed.
        let now_ns = self.clock.now_ns();
        let missed = now_ns.saturating_sub(tick.idle_tick_ns) / tick.device.period_ns;
        self.ticks_lost.fetch_add(missed, Ordering::Relaxed);

        tick.device.state = DeviceState::Active;
        tick.device.last_tick_ns = now_ns;
        tick.device.next_tick_ns = now_ns + tick.device.period_ns;
        tick.tick_stopped = false;
        self.tick_starts.fetch_add(1, Ordering::Relaxed);
        trace!(cpu, missed, "tick restarted");
    }
}
