//! Task model.

use kernsim_core::{SimError, SimResult};
use serde::Serialize;

/// Default timeslice granted to a task, in milliseconds.
pub const DEFAULT_TIMESLICE_MS: u64 = 100;

/// Scheduling class of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TaskKind {
    Normal,
    RealTime,
    Idle,
}

/// Lifecycle state of a task.
///
/// A task is in exactly one of `Ready`/`Running` while alive and runnable;
/// `Dead` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TaskState {
    Ready,
    Running,
    Blocked,
    Sleeping,
    Dead,
}

/// A schedulable unit of simulated work.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: u64,
    pub kind: TaskKind,
    pub state: TaskState,
    /// 0 is the highest priority, 99 the lowest.
    pub priority: u8,
    /// Accumulated simulated runtime in milliseconds.
    pub runtime_ms: u64,
    pub timeslice_ms: u64,
    /// Runtime target at which the task retires as `Dead`.
    pub deadline_ms: u64,
    /// Index of the CPU whose queue holds (or whose worker runs) the task.
    pub cpu: usize,
}

impl Task {
    pub fn new(id: u64, kind: TaskKind, priority: u8, deadline_ms: u64) -> SimResult<Self> {
        if priority > 99 {
            return Err(SimError::invalid(format!(
                "task priority {priority} out of range 0..=99"
            )));
        }
        if deadline_ms == 0 {
            return Err(SimError::invalid("task deadline must be non-zero"));
        }
        Ok(Self {
            id,
            kind,
            state: TaskState::Ready,
            priority,
            runtime_ms: 0,
            timeslice_ms: DEFAULT_TIMESLICE_MS,
            deadline_ms,
            cpu: 0,
        })
    }

    pub fn with_timeslice(mut self, timeslice_ms: u64) -> Self {
        self.timeslice_ms = timeslice_ms.max(1);
        self
    }

    /// Load weight contributed to a run queue.
    ///
    /// Lower priority value means heavier weight; real-time tasks count
    /// double, idle tasks barely at all.
    pub fn weight(&self) -> u64 {
        let base = 100 - u64::from(self.priority);
        match self.kind {
            TaskKind::RealTime => base * 2,
            TaskKind::Normal => base,
            TaskKind::Idle => 1,
        }
    }
}
