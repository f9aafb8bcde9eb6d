//! RCU callback engine simulator.
//!
//! Three related primitives sharing one design vocabulary:
//! - a segmented per-CPU callback queue drained on grace-period boundaries
//!   ([`SegmentedCallbackList`])
//! - NOCB offload: flagged CPUs hand their callbacks to a dedicated worker
//!   pool instead of processing them in place ([`RcuEngine`])
//! - an SRCU domain whose read-side critical sections may sleep
//!   ([`SrcuDomain`])
//!
//! Callbacks are messages (a kind tag plus a payload word), not function
//! pointers; the processors dispatch on the tag.

mod callback;
mod engine;
mod nocb;
mod segment;
mod srcu;
mod stats;

pub use callback::{Callback, CallbackKind, CallbackState, ExecEffects};
pub use engine::{RcuConfig, RcuEngine};
pub use nocb::{NocbConfig, MAX_NOCB_WORKERS, NOCB_BATCH, NOCB_IDLE_SLEEP_US};
pub use segment::{
    SegmentState, SegmentedCallbackList, GRACE_PERIOD_MS, MAX_BATCH, NUM_SEGMENTS,
    SEGMENT_CAPACITY,
};
pub use srcu::{SrcuDomain, SRCU_MAX_READERS};
pub use stats::{NocbWorkerSnapshot, RcuStats};
