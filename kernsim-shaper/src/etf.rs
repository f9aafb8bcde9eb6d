//! Earliest-transmission-first packet scheduler.

use kernsim_core::{SimError, SimResult};
use serde::Serialize;
use std::collections::VecDeque;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PacketState {
    Queued,
    Ready,
    Transmitting,
    Completed,
    Dropped,
}

/// A packet waiting for (or in) transmission.
#[derive(Debug, Clone)]
pub struct EtfPacket {
    pub id: u64,
    pub size_bytes: u64,
    /// 0 (highest) ..= 4 (lowest).
    pub priority: u8,
    pub state: PacketState,
    pub arrival_us: u64,
    pub deadline_us: u64,
    pub completion_us: u64,
}

impl EtfPacket {
    pub fn new(id: u64, size_bytes: u64, priority: u8, arrival_us: u64, deadline_us: u64) -> SimResult<Self> {
        if priority > 4 {
            return Err(SimError::invalid(format!(
                "packet priority {priority} out of range 0..=4"
            )));
        }
        if size_bytes == 0 {
            return Err(SimError::invalid("packet size must be non-zero"));
        }
        Ok(Self {
            id,
            size_bytes,
            priority,
            state: PacketState::Queued,
            arrival_us,
            deadline_us,
            completion_us: 0,
        })
    }
}

/// What `dequeue` released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dequeued {
    /// Head packet went onto the wire.
    Transmitting { id: u64, deadline_us: u64 },
    /// Head packet's deadline already passed.
    DeadlineMiss { id: u64, deadline_us: u64 },
}

#[derive(Debug, Clone)]
pub struct EtfConfig {
    /// Simulated link bandwidth in bits per second.
    pub bandwidth_bps: u64,
    pub max_queue_depth: usize,
}

impl Default for EtfConfig {
    fn default() -> Self {
        Self {
            bandwidth_bps: 1_000_000_000,
            max_queue_depth: 256,
        }
    }
}

/// Deadline-ordered queue plus an in-flight transmission list.
///
/// The queue is kept ascending by deadline; equal deadlines keep their
/// insertion order.
pub struct EtfScheduler {
    queue: VecDeque<EtfPacket>,
    transmitting: Vec<EtfPacket>,
    config: EtfConfig,
    now_us: u64,
    queued: u64,
    completed: u64,
    queue_overflows: u64,
    deadline_misses: u64,
}

impl EtfScheduler {
    pub fn new(config: EtfConfig) -> SimResult<Self> {
        if config.bandwidth_bps == 0 {
            return Err(SimError::invalid("bandwidth must be non-zero"));
        }
        if config.max_queue_depth == 0 {
            return Err(SimError::invalid("max_queue_depth must be non-zero"));
        }
        Ok(Self {
            queue: VecDeque::new(),
            transmitting: Vec::new(),
            config,
            now_us: 0,
            queued: 0,
            completed: 0,
            queue_overflows: 0,
            deadline_misses: 0,
        })
    }

    /// Insert keeping the queue ascending by deadline. A full queue drops
    /// the packet and counts the overflow.
    pub fn enqueue(&mut self, mut packet: EtfPacket) -> SimResult<()> {
        if self.queue.len() >= self.config.max_queue_depth {
            self.queue_overflows += 1;
            trace!(packet = packet.id, "etf queue overflow");
            return Err(SimError::CapacityExceeded {
                resource: "etf queue",
                limit: self.config.max_queue_depth,
            });
        }
        packet.state = PacketState::Queued;
        let pos = self
            .queue
            .iter()
            .rposition(|p| p.deadline_us <= packet.deadline_us)
            .map(|p| p + 1)
            .unwrap_or(0);
        self.queue.insert(pos, packet);
        self.queued += 1;
        Ok(())
    }

    /// Release the head packet: onto the wire if its deadline still holds,
    /// otherwise counted as a deadline miss and discarded.
    pub fn dequeue(&mut self) -> Option<Dequeued> {
        let mut packet = self.queue.pop_front()?;
        if self.now_us > packet.deadline_us {
            packet.state = PacketState::Dropped;
            self.deadline_misses += 1;
            return Some(Dequeued::DeadlineMiss {
                id: packet.id,
                deadline_us: packet.deadline_us,
            });
        }
        packet.state = PacketState::Transmitting;
        packet.completion_us = self.now_us + self.transmission_time_us(packet.size_bytes);
        let released = Dequeued::Transmitting {
            id: packet.id,
            deadline_us: packet.deadline_us,
        };
        self.transmitting.push(packet);
        Some(released)
    }

    /// Advance simulated time and retire transmissions that finished.
    pub fn update_scheduler_time(&mut self, now_us: u64) {
        self.now_us = self.now_us.max(now_us);
        let now = self.now_us;
        let before = self.transmitting.len();
        self.transmitting.retain(|p| p.completion_us > now);
        self.completed += (before - self.transmitting.len()) as u64;
    }

    fn transmission_time_us(&self, size_bytes: u64) -> u64 {
        // bits / (bits per second) expressed in microseconds, minimum 1.
        ((size_bytes as u128 * 8 * 1_000_000 / self.config.bandwidth_bps as u128) as u64).max(1)
    }

    pub fn now_us(&self) -> u64 {
        self.now_us
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn in_flight(&self) -> usize {
        self.transmitting.len()
    }

    pub fn queued(&self) -> u64 {
        self.queued
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    pub fn queue_overflows(&self) -> u64 {
        self.queue_overflows
    }

    pub fn deadline_misses(&self) -> u64 {
        self.deadline_misses
    }

    /// Deadlines currently queued, head first. Test hook for the ordering
    /// invariant.
    pub fn queued_deadlines(&self) -> Vec<u64> {
        self.queue.iter().map(|p| p.deadline_us).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sched() -> EtfScheduler {
        EtfScheduler::new(EtfConfig::default()).unwrap()
    }

    fn packet(id: u64, deadline_us: u64) -> EtfPacket {
        EtfPacket::new(id, 1_500, 0, 0, deadline_us).unwrap()
    }

    #[test]
    fn dequeue_order_follows_deadlines_not_submission() {
        let mut s = sched();
        for (id, deadline) in [(1, 500), (2, 200), (3, 350), (4, 100)] {
            s.enqueue(packet(id, deadline)).unwrap();
        }

        let mut order = Vec::new();
        while let Some(Dequeued::Transmitting { deadline_us, .. }) = s.dequeue() {
            order.push(deadline_us);
        }
        assert_eq!(order, vec![100, 200, 350, 500]);
    }

    #[test]
    fn equal_deadlines_keep_insertion_order() {
        let mut s = sched();
        s.enqueue(packet(1, 100)).unwrap();
        s.enqueue(packet(2, 100)).unwrap();
        s.enqueue(packet(3, 100)).unwrap();

        let mut ids = Vec::new();
        while let Some(Dequeued::Transmitting { id, .. }) = s.dequeue() {
            ids.push(id);
        }
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn queue_stays_sorted_under_interleaved_inserts() {
        let mut s = sched();
        for deadline in [900, 100, 500, 300, 700, 200] {
            s.enqueue(packet(deadline, deadline)).unwrap();
        }
        let deadlines = s.queued_deadlines();
        for pair in deadlines.windows(2) {
            assert!(pair[0] <= pair[1], "queue out of order: {deadlines:?}");
        }
    }

    #[test]
    fn full_queue_drops_and_counts() {
        let mut s = EtfScheduler::new(EtfConfig {
            max_queue_depth: 2,
            ..Default::default()
        })
        .unwrap();
        s.enqueue(packet(1, 100)).unwrap();
        s.enqueue(packet(2, 200)).unwrap();

        let err = s.enqueue(packet(3, 300)).unwrap_err();
        assert!(matches!(err, SimError::CapacityExceeded { .. }));
        assert_eq!(s.queue_overflows(), 1);
        assert_eq!(s.queue_len(), 2);
    }

    #[test]
    fn late_head_is_a_deadline_miss() {
        let mut s = sched();
        s.enqueue(packet(1, 100)).unwrap();
        s.update_scheduler_time(200);

        assert_eq!(
            s.dequeue(),
            Some(Dequeued::DeadlineMiss {
                id: 1,
                deadline_us: 100
            })
        );
        assert_eq!(s.deadline_misses(), 1);
        assert_eq!(s.in_flight(), 0);
    }

    #[test]
    fn transmissions_complete_when_time_passes() {
        let mut s = EtfScheduler::new(EtfConfig {
            bandwidth_bps: 12_000_000, // 1500 bytes take 1000 us
            max_queue_depth: 8,
        })
        .unwrap();
        s.enqueue(packet(1, 5_000)).unwrap();
        assert!(matches!(s.dequeue(), Some(Dequeued::Transmitting { .. })));
        assert_eq!(s.in_flight(), 1);

        s.update_scheduler_time(999);
        assert_eq!(s.in_flight(), 1);
        assert_eq!(s.completed(), 0);

        s.update_scheduler_time(1_000);
        assert_eq!(s.in_flight(), 0);
        assert_eq!(s.completed(), 1);
    }

    #[test]
    fn time_never_moves_backwards() {
        let mut s = sched();
        s.update_scheduler_time(500);
        s.update_scheduler_time(200);
        assert_eq!(s.now_us(), 500);
    }
}
