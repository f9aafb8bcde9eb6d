//! Per-CPU record.

use crate::queue::RunQueue;
use crate::task::Task;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::AtomicU64;

/// Execution state of a simulated CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CpuState {
    Active,
    Idle,
    Offline,
}

/// One simulated CPU: its run queue, the task it is executing, and its time
/// accounting. Each field that can be touched from more than one thread has
/// its own lock; nothing here is locked across a simulated-work sleep.
pub(crate) struct Cpu {
    pub id: usize,
    pub state: Mutex<CpuState>,
    pub queue: Mutex<RunQueue>,
    pub current: Mutex<Option<Task>>,
    pub busy_time_ms: AtomicU64,
    pub idle_time_ms: AtomicU64,
}

impl Cpu {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            state: Mutex::new(CpuState::Offline),
            queue: Mutex::new(RunQueue::new(id)),
            current: Mutex::new(None),
            busy_time_ms: AtomicU64::new(0),
            idle_time_ms: AtomicU64::new(0),
        }
    }
}
