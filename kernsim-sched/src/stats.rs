//! Scheduler stats snapshot.

use crate::cpu::CpuState;
use kernsim_core::report::line;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Serialize)]
pub struct CpuSnapshot {
    pub id: usize,
    pub state: CpuState,
    pub queue_len: usize,
    pub busy_time_ms: u64,
    pub idle_time_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    pub tasks_scheduled: u64,
    pub tasks_completed: u64,
    pub tasks_live: u64,
    pub context_switches: u64,
    pub migrations: u64,
    pub load_balances: u64,
    pub cpus: Vec<CpuSnapshot>,
}

impl fmt::Display for SchedulerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", line("tasks_scheduled", self.tasks_scheduled))?;
        writeln!(f, "{}", line("tasks_completed", self.tasks_completed))?;
        writeln!(f, "{}", line("tasks_live", self.tasks_live))?;
        writeln!(f, "{}", line("context_switches", self.context_switches))?;
        writeln!(f, "{}", line("migrations", self.migrations))?;
        writeln!(f, "{}", line("load_balances", self.load_balances))?;
        for cpu in &self.cpus {
            writeln!(
                f,
                "  cpu{:<2} {:?}: queue={} busy={}ms idle={}ms",
                cpu.id, cpu.state, cpu.queue_len, cpu.busy_time_ms, cpu.idle_time_ms
            )?;
        }
        Ok(())
    }
}
