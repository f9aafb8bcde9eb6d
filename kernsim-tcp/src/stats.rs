//! Connection stats snapshot.

use kernsim_core::report::line;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Serialize)]
pub struct TcpStats {
    pub algorithm: &'static str,
    pub cwnd: u32,
    pub ssthresh: u32,
    pub last_max_cwnd: u32,
    pub slow_start: bool,
    pub acks: u64,
    pub losses: u64,
    pub timeouts: u64,
    pub hystart_ack_train_exits: u64,
    pub hystart_delay_exits: u64,
}

impl fmt::Display for TcpStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  algorithm                    {}", self.algorithm)?;
        writeln!(f, "{}", line("cwnd", u64::from(self.cwnd)))?;
        writeln!(f, "{}", line("ssthresh", u64::from(self.ssthresh)))?;
        writeln!(f, "{}", line("last_max_cwnd", u64::from(self.last_max_cwnd)))?;
        writeln!(f, "  slow_start                   {}", self.slow_start)?;
        writeln!(f, "{}", line("acks", self.acks))?;
        writeln!(f, "{}", line("losses", self.losses))?;
        writeln!(f, "{}", line("timeouts", self.timeouts))?;
        writeln!(f, "{}", line("hystart_ack_train_exits", self.hystart_ack_train_exits))?;
        writeln!(f, "{}", line("hystart_delay_exits", self.hystart_delay_exits))
    }
}
