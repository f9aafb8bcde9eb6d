//! Shared collaborators for the kernsim simulators.
//!
//! Every simulator crate consumes the same small set of collaborators:
//! - [`Clock`]: a monotonic nanosecond time source ([`MonotonicClock`] for
//!   real runs, [`ManualClock`] for deterministic tests)
//! - [`SimRng`]: a seedable random number source
//! - [`SimError`]: the common error taxonomy
//! - [`logging`]: tracing subscriber setup
//! - [`report`]: final stats report emission

pub mod clock;
pub mod error;
pub mod logging;
pub mod report;
pub mod rng;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use error::{SimError, SimResult};
pub use rng::SimRng;
