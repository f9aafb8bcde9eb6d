//! Synthetic-workload demos, one per simulator.

pub mod rcu;
pub mod sched;
pub mod shaper;
pub mod tcp;
pub mod tick;

/// Options shared by every demo.
pub struct DemoOpts {
    pub duration_ms: u64,
    pub seed: u64,
    pub json: bool,
}
