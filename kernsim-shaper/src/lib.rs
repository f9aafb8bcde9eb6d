//! Traffic shaper simulator.
//!
//! Two sub-components behind one façade:
//! - [`HtbShaper`]: a hierarchy of token-bucket classes with guaranteed and
//!   ceiling rates; children borrow from their ceiling when their own
//!   tokens run out
//! - [`EtfScheduler`]: an earliest-transmission-first queue that releases
//!   packets in ascending deadline order and drops the ones whose deadline
//!   already passed
//!
//! A shaper instance is single-threaded: the owner drives every update.

mod etf;
mod htb;
mod shaper;
mod stats;

pub use etf::{Dequeued, EtfConfig, EtfPacket, EtfScheduler, PacketState};
pub use htb::{ChargeOutcome, HtbClassState, HtbConfig, HtbShaper, TrafficClass};
pub use shaper::{SubmitOutcome, TrafficShaper};
pub use stats::ShaperStats;
