//! Façade combining HTB shaping with ETF dispatch.

use crate::etf::{Dequeued, EtfConfig, EtfPacket, EtfScheduler};
use crate::htb::{ChargeOutcome, HtbConfig, HtbShaper};
use crate::stats::ShaperStats;
use kernsim_core::SimResult;

/// What happened to a submitted packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Charged (possibly borrowing) and queued for transmission.
    Queued,
    /// The class had no tokens; the packet never reached the queue.
    Shaped,
    /// Charged, but the deadline queue was full.
    QueueFull,
}

/// A caller-driven shaper instance: HTB decides whether a packet may be
/// sent, ETF decides when.
pub struct TrafficShaper {
    htb: HtbShaper,
    etf: EtfScheduler,
    next_packet_id: u64,
}

impl TrafficShaper {
    pub fn new(htb_config: HtbConfig, etf_config: EtfConfig) -> SimResult<Self> {
        Ok(Self {
            htb: HtbShaper::new(htb_config)?,
            etf: EtfScheduler::new(etf_config)?,
            next_packet_id: 1,
        })
    }

    pub fn htb(&mut self) -> &mut HtbShaper {
        &mut self.htb
    }

    pub fn etf(&mut self) -> &mut EtfScheduler {
        &mut self.etf
    }

    /// Charge a packet to `class`, and on success queue it for transmission
    /// with the given deadline.
    pub fn submit(
        &mut self,
        class: usize,
        size_bytes: u64,
        priority: u8,
        deadline_us: u64,
        now_us: u64,
    ) -> SimResult<SubmitOutcome> {
        match self.htb.charge(class, size_bytes, now_us)? {
            ChargeOutcome::Dropped => Ok(SubmitOutcome::Shaped),
            ChargeOutcome::Sent | ChargeOutcome::Borrowed => {
                let id = self.next_packet_id;
                self.next_packet_id += 1;
                let packet = EtfPacket::new(id, size_bytes, priority, now_us, deadline_us)?;
                match self.etf.enqueue(packet) {
                    Ok(()) => Ok(SubmitOutcome::Queued),
                    Err(_) => Ok(SubmitOutcome::QueueFull),
                }
            }
        }
    }

    /// Advance time, retire finished transmissions, then start up to
    /// `max_dispatch` queued packets.
    pub fn advance(&mut self, now_us: u64, max_dispatch: usize) -> usize {
        self.etf.update_scheduler_time(now_us);
        let mut started = 0;
        for _ in 0..max_dispatch {
            match self.etf.dequeue() {
                Some(Dequeued::Transmitting { .. }) => started += 1,
                Some(Dequeued::DeadlineMiss { .. }) => {}
                None => break,
            }
        }
        started
    }

    pub fn stats(&self) -> ShaperStats {
        let (bytes_sent, packets_sent, overlimits, htb_drops) = self.htb.totals();
        ShaperStats {
            classes: self.htb.num_classes() as u64,
            bytes_sent,
            packets_sent,
            overlimits,
            htb_drops,
            packets_queued: self.etf.queued(),
            packets_completed: self.etf.completed(),
            queue_overflows: self.etf.queue_overflows(),
            deadline_misses: self.etf.deadline_misses(),
            in_flight: self.etf.in_flight() as u64,
        }
    }
}
