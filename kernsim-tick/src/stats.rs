//! Tick manager stats snapshot.

use kernsim_core::report::line;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Serialize)]
pub struct TickStats {
    pub jiffies: u64,
    pub ticks_handled: u64,
    pub ticks_lost: u64,
    pub tick_stops: u64,
    pub tick_starts: u64,
    pub nohz_switches: u64,
    pub idle_balances: u64,
    pub idle_sleeps: u64,
    pub cpus_idle: u64,
    pub ticks_stopped: u64,
}

impl fmt::Display for TickStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", line("jiffies", self.jiffies))?;
        writeln!(f, "{}", line("ticks_handled", self.ticks_handled))?;
        writeln!(f, "{}", line("ticks_lost", self.ticks_lost))?;
        writeln!(f, "{}", line("tick_stops", self.tick_stops))?;
        writeln!(f, "{}", line("tick_starts", self.tick_starts))?;
        writeln!(f, "{}", line("nohz_switches", self.nohz_switches))?;
        writeln!(f, "{}", line("idle_balances", self.idle_balances))?;
        writeln!(f, "{}", line("idle_sleeps", self.idle_sleeps))?;
        writeln!(f, "{}", line("cpus_idle", self.cpus_idle))?;
        writeln!(f, "{}", line("ticks_stopped", self.ticks_stopped))
    }
}
