//! RCU engine stats snapshot.

use kernsim_core::report::line;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Serialize)]
pub struct NocbWorkerSnapshot {
    pub id: usize,
    pub processed: u64,
    pub busy_ns: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RcuStats {
    pub callbacks_queued: u64,
    pub callbacks_processed: u64,
    pub grace_periods: u64,
    pub segment_advances: u64,
    pub enqueue_failures: u64,
    pub nocb_offloaded: u64,
    pub nocb_batches: u64,
    pub nocb_pending: u64,
    pub nocb_workers: Vec<NocbWorkerSnapshot>,
    pub srcu_completed: u64,
    pub srcu_active_readers: u64,
    pub memory_reclaimed_bytes: u64,
    pub refs_released: u64,
    pub waiters_woken: u64,
}

impl fmt::Display for RcuStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", line("callbacks_queued", self.callbacks_queued))?;
        writeln!(f, "{}", line("callbacks_processed", self.callbacks_processed))?;
        writeln!(f, "{}", line("grace_periods", self.grace_periods))?;
        writeln!(f, "{}", line("segment_advances", self.segment_advances))?;
        writeln!(f, "{}", line("enqueue_failures", self.enqueue_failures))?;
        writeln!(f, "{}", line("nocb_offloaded", self.nocb_offloaded))?;
        writeln!(f, "{}", line("nocb_batches", self.nocb_batches))?;
        writeln!(f, "{}", line("nocb_pending", self.nocb_pending))?;
        for w in &self.nocb_workers {
            writeln!(
                f,
                "  nocb-{} processed={} busy={}us",
                w.id,
                w.processed,
                w.busy_ns / 1_000
            )?;
        }
        writeln!(f, "{}", line("srcu_completed", self.srcu_completed))?;
        writeln!(f, "{}", line("srcu_active_readers", self.srcu_active_readers))?;
        writeln!(f, "{}", line("memory_reclaimed_bytes", self.memory_reclaimed_bytes))?;
        writeln!(f, "{}", line("refs_released", self.refs_released))?;
        writeln!(f, "{}", line("waiters_woken", self.waiters_woken))
    }
}
