//! Shaper stats snapshot.

use kernsim_core::report::line;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Serialize)]
pub struct ShaperStats {
    pub classes: u64,
    pub bytes_sent: u64,
    pub packets_sent: u64,
    pub overlimits: u64,
    pub htb_drops: u64,
    pub packets_queued: u64,
    pub packets_completed: u64,
    pub queue_overflows: u64,
    pub deadline_misses: u64,
    pub in_flight: u64,
}

impl fmt::Display for ShaperStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", line("classes", self.classes))?;
        writeln!(f, "{}", line("bytes_sent", self.bytes_sent))?;
        writeln!(f, "{}", line("packets_sent", self.packets_sent))?;
        writeln!(f, "{}", line("overlimits", self.overlimits))?;
        writeln!(f, "{}", line("htb_drops", self.htb_drops))?;
        writeln!(f, "{}", line("packets_queued", self.packets_queued))?;
        writeln!(f, "{}", line("packets_completed", self.packets_completed))?;
        writeln!(f, "{}", line("queue_overflows", self.queue_overflows))?;
        writeln!(f, "{}", line("deadline_misses", self.deadline_misses))?;
        writeln!(f, "{}", line("in_flight", self.in_flight))
    }
}
