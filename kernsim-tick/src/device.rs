//! Tick device and per-CPU tick state.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TickMode {
    Periodic,
    OneShot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeviceState {
    Active,
    Inactive,
}

/// The clock-event device of one CPU.
#[derive(Debug, Clone)]
pub struct TickDevice {
    pub mode: TickMode,
    pub state: DeviceState,
    pub period_ns: u64,
    pub next_tick_ns: u64,
    pub last_tick_ns: u64,
}

impl TickDevice {
    pub fn new(period_ns: u64) -> Self {
        Self {
            mode: TickMode::Periodic,
            state: DeviceState::Active,
            period_ns,
            next_tick_ns: period_ns,
            last_tick_ns: 0,
        }
    }
}

/// Idle state of a CPU as the tick layer sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IdleState {
    Idle,
    NotIdle,
    NewlyIdle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NohzMode {
    Inactive,
    LowRes,
    HighRes,
}

/// Per-CPU tick bookkeeping: the device plus NOHZ state and counters.
#[derive(Debug, Clone)]
pub struct CpuTick {
    pub device: TickDevice,
    pub idle: IdleState,
    pub nohz: NohzMode,
    pub tick_stopped: bool,
    /// `last_tick_ns` captured when the tick was stopped.
    pub idle_tick_ns: u64,
    pub idle_sleeps: u64,
    pub ticks_handled: u64,
}

impl CpuTick {
    pub fn new(period_ns: u64) -> Self {
        Self {
            device: TickDevice::new(period_ns),
            idle: IdleState::NotIdle,
            nohz: NohzMode::Inactive,
            tick_stopped: false,
            idle_tick_ns: 0,
            idle_sleeps: 0,
            ticks_handled: 0,
        }
    }
}
