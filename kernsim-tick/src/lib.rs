//! Tick management simulator.
//!
//! A global jiffy counter advanced at 1 ms resolution, a per-CPU tick device
//! that can run periodic or one-shot, and NOHZ transitions that stop a CPU's
//! tick while it idles and restart it on exit. A load thread pushes CPUs out
//! of idle when too many stop ticking at once.

mod device;
mod manager;
mod stats;

pub use device::{CpuTick, DeviceState, IdleState, NohzMode, TickDevice, TickMode};
pub use manager::{TickConfig, TickManager, JIFFY_NS, MAX_IDLE_BALANCE};
pub use stats::TickStats;
