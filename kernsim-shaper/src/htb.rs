//! Hierarchical token bucket.

use kernsim_core::{SimError, SimResult};
use serde::Serialize;
use tracing::trace;

/// Traffic category carried by a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrafficClass {
    BestEffort,
    Interactive,
    Bulk,
    RealTime,
    System,
}

/// Send capability derived from the bucket levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HtbClassState {
    CanSend,
    CantSend,
    MayBorrow,
}

/// Result of charging a packet against a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeOutcome {
    /// Paid from guaranteed-rate tokens.
    Sent,
    /// Paid from ceiling tokens; counted as an overlimit.
    Borrowed,
    /// Neither bucket could cover the packet.
    Dropped,
}

/// One node in the class tree. The shaper owns all nodes in an arena; a
/// class refers to its parent and children by id only.
#[derive(Debug)]
struct HtbClass {
    id: usize,
    parent: Option<usize>,
    children: Vec<usize>,
    /// Guaranteed rate in bits per second.
    rate_bps: u64,
    /// Ceiling rate in bits per second.
    ceil_bps: u64,
    /// Token cap in bytes: one second of the guaranteed rate.
    burst_bytes: u64,
    /// Ceiling-token cap in bytes: one second of the ceiling rate.
    cburst_bytes: u64,
    tokens: u64,
    ctokens: u64,
    last_update_us: u64,
    state: HtbClassState,
    class: TrafficClass,
    bytes_sent: u64,
    packets_sent: u64,
    overlimits: u64,
    drops: u64,
}

impl HtbClass {
    fn new(
        id: usize,
        parent: Option<usize>,
        rate_bps: u64,
        ceil_bps: u64,
        class: TrafficClass,
    ) -> Self {
        let burst_bytes = rate_bps / 8;
        let cburst_bytes = ceil_bps / 8;
        Self {
            id,
            parent,
            children: Vec::new(),
            rate_bps,
            ceil_bps,
            burst_bytes,
            cburst_bytes,
            tokens: burst_bytes,
            ctokens: cburst_bytes,
            last_update_us: 0,
            state: HtbClassState::CanSend,
            class,
            bytes_sent: 0,
            packets_sent: 0,
            overlimits: 0,
            drops: 0,
        }
    }

    /// Refill both buckets for the elapsed interval and re-derive the state.
    fn refill(&mut self, now_us: u64) {
        let delta_us = now_us.saturating_sub(self.last_update_us);
        if delta_us > 0 {
            self.tokens = self
                .tokens
                .saturating_add(bytes_for(delta_us, self.rate_bps))
                .min(self.burst_bytes);
            self.ctokens = self
                .ctokens
                .saturating_add(bytes_for(delta_us, self.ceil_bps))
                .min(self.cburst_bytes);
            self.last_update_us = now_us;
        }
        self.derive_state();
    }

    fn derive_state(&mut self) {
        self.state = if self.tokens > 0 {
            HtbClassState::CanSend
        } else if self.ctokens > 0 {
            HtbClassState::MayBorrow
        } else {
            HtbClassState::CantSend
        };
    }
}

/// Bytes accrued over `delta_us` at `rate_bps` bits per second.
fn bytes_for(delta_us: u64, rate_bps: u64) -> u64 {
    ((delta_us as u128 * rate_bps as u128) / 8_000_000) as u64
}

#[derive(Debug, Clone)]
pub struct HtbConfig {
    pub root_rate_bps: u64,
    pub root_ceil_bps: u64,
    pub max_classes: usize,
}

impl Default for HtbConfig {
    fn default() -> Self {
        Self {
            root_rate_bps: 1_000_000_000,
            root_ceil_bps: 2_000_000_000,
            max_classes: 64,
        }
    }
}

/// The class tree. Id 0 is always the root.
pub struct HtbShaper {
    classes: Vec<HtbClass>,
    max_classes: usize,
}

impl HtbShaper {
    pub const ROOT: usize = 0;

    pub fn new(config: HtbConfig) -> SimResult<Self> {
        if config.root_rate_bps == 0 || config.root_ceil_bps < config.root_rate_bps {
            return Err(SimError::invalid(
                "root rate must be non-zero and at most the root ceil",
            ));
        }
        if config.max_classes == 0 {
            return Err(SimError::invalid("max_classes must be non-zero"));
        }
        let root = HtbClass::new(
            Self::ROOT,
            None,
            config.root_rate_bps,
            config.root_ceil_bps,
            TrafficClass::System,
        );
        Ok(Self {
            classes: vec![root],
            max_classes: config.max_classes,
        })
    }

    /// Add a child class under `parent`. The child's guaranteed rate must
    /// not exceed the parent's ceiling.
    pub fn create_class(
        &mut self,
        parent: usize,
        rate_bps: u64,
        ceil_bps: u64,
        class: TrafficClass,
    ) -> SimResult<usize> {
        if self.classes.len() >= self.max_classes {
            return Err(SimError::CapacityExceeded {
                resource: "htb classes",
                limit: self.max_classes,
            });
        }
        let parent_ceil = self
            .classes
            .get(parent)
            .map(|p| p.ceil_bps)
            .ok_or_else(|| SimError::invalid(format!("no such parent class {parent}")))?;
        if rate_bps == 0 || ceil_bps < rate_bps {
            return Err(SimError::invalid(
                "class rate must be non-zero and at most its ceil",
            ));
        }
        if rate_bps > parent_ceil {
            return Err(SimError::invalid(format!(
                "class rate {rate_bps} exceeds parent ceil {parent_ceil}"
            )));
        }

        let id = self.classes.len();
        self.classes
            .push(HtbClass::new(id, Some(parent), rate_bps, ceil_bps, class));
        self.classes[parent].children.push(id);
        trace!(id, parent, rate_bps, ceil_bps, "htb class created");
        Ok(id)
    }

    /// Refill a class's buckets up to `now_us`.
    pub fn update_tokens(&mut self, id: usize, now_us: u64) -> SimResult<()> {
        self.class_mut(id)?.refill(now_us);
        Ok(())
    }

    /// Whether a packet of `size_bytes` could be charged right now.
    pub fn can_send(&self, id: usize, size_bytes: u64) -> SimResult<bool> {
        let class = self.class_ref(id)?;
        Ok(class.tokens >= size_bytes
            || (class.state == HtbClassState::MayBorrow && class.ctokens >= size_bytes))
    }

    /// Charge a packet against a class: guaranteed tokens first, ceiling
    /// tokens (counted as an overlimit) second, drop otherwise.
    pub fn charge(&mut self, id: usize, size_bytes: u64, now_us: u64) -> SimResult<ChargeOutcome> {
        let class = self.class_mut(id)?;
        class.refill(now_us);

        let outcome = if class.tokens >= size_bytes {
            class.tokens -= size_bytes;
            class.bytes_sent += size_bytes;
            class.packets_sent += 1;
            ChargeOutcome::Sent
        } else if class.ctokens >= size_bytes {
            class.ctokens -= size_bytes;
            class.overlimits += 1;
            class.bytes_sent += size_bytes;
            class.packets_sent += 1;
            ChargeOutcome::Borrowed
        } else {
            class.drops += 1;
            ChargeOutcome::Dropped
        };
        class.derive_state();
        Ok(outcome)
    }

    pub fn state(&self, id: usize) -> SimResult<HtbClassState> {
        Ok(self.class_ref(id)?.state)
    }

    pub fn tokens(&self, id: usize) -> SimResult<(u64, u64)> {
        let class = self.class_ref(id)?;
        Ok((class.tokens, class.ctokens))
    }

    pub fn burst(&self, id: usize) -> SimResult<(u64, u64)> {
        let class = self.class_ref(id)?;
        Ok((class.burst_bytes, class.cburst_bytes))
    }

    pub fn bytes_sent(&self, id: usize) -> SimResult<u64> {
        Ok(self.class_ref(id)?.bytes_sent)
    }

    pub fn children(&self, id: usize) -> SimResult<&[usize]> {
        Ok(&self.class_ref(id)?.children)
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    pub fn totals(&self) -> (u64, u64, u64, u64) {
        let mut bytes = 0;
        let mut packets = 0;
        let mut overlimits = 0;
        let mut drops = 0;
        for class in &self.classes {
            bytes += class.bytes_sent;
            packets += class.packets_sent;
            overlimits += class.overlimits;
            drops += class.drops;
        }
        (bytes, packets, overlimits, drops)
    }

    fn class_ref(&self, id: usize) -> SimResult<&HtbClass> {
        self.classes
            .get(id)
            .ok_or_else(|| SimError::invalid(format!("no such class {id}")))
    }

    fn class_mut(&mut self, id: usize) -> SimResult<&mut HtbClass> {
        self.classes
            .get_mut(id)
            .ok_or_else(|| SimError::invalid(format!("no such class {id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shaper() -> HtbShaper {
        HtbShaper::new(HtbConfig::default()).unwrap()
    }

    #[test]
    fn root_starts_with_full_buckets() {
        let s = shaper();
        let (tokens, ctokens) = s.tokens(HtbShaper::ROOT).unwrap();
        assert_eq!(tokens, 125_000_000);
        assert_eq!(ctokens, 250_000_000);
        assert_eq!(s.state(HtbShaper::ROOT).unwrap(), HtbClassState::CanSend);
    }

    #[test]
    fn charge_at_t0_deducts_from_guaranteed_tokens() {
        let mut s = shaper();
        s.create_class(HtbShaper::ROOT, 100_000_000, 200_000_000, TrafficClass::Bulk)
            .unwrap();

        let outcome = s.charge(HtbShaper::ROOT, 1_500, 0).unwrap();

        assert_eq!(outcome, ChargeOutcome::Sent);
        assert_eq!(s.tokens(HtbShaper::ROOT).unwrap().0, 124_998_500);
        assert_eq!(s.state(HtbShaper::ROOT).unwrap(), HtbClassState::CanSend);
        assert_eq!(s.bytes_sent(HtbShaper::ROOT).unwrap(), 1_500);
    }

    #[test]
    fn child_rate_above_parent_ceil_is_rejected() {
        let mut s = shaper();
        let err = s
            .create_class(
                HtbShaper::ROOT,
                3_000_000_000,
                3_000_000_000,
                TrafficClass::Bulk,
            )
            .unwrap_err();
        assert!(matches!(err, SimError::InvalidArgument { .. }));
    }

    #[test]
    fn missing_parent_is_rejected() {
        let mut s = shaper();
        assert!(s
            .create_class(42, 1_000_000, 2_000_000, TrafficClass::BestEffort)
            .is_err());
    }

    #[test]
    fn class_count_is_capped() {
        let mut s = HtbShaper::new(HtbConfig {
            max_classes: 2,
            ..Default::default()
        })
        .unwrap();
        s.create_class(HtbShaper::ROOT, 1_000_000, 2_000_000, TrafficClass::Bulk)
            .unwrap();
        let err = s
            .create_class(HtbShaper::ROOT, 1_000_000, 2_000_000, TrafficClass::Bulk)
            .unwrap_err();
        assert!(matches!(err, SimError::CapacityExceeded { .. }));
    }

    #[test]
    fn exhausted_class_borrows_then_drops() {
        let mut s = HtbShaper::new(HtbConfig {
            root_rate_bps: 8_000, // burst: 1000 bytes
            root_ceil_bps: 16_000, // cburst: 2000 bytes
            max_classes: 4,
        })
        .unwrap();

        // Drain the guaranteed bucket.
        assert_eq!(s.charge(0, 1_000, 0).unwrap(), ChargeOutcome::Sent);
        assert_eq!(s.state(0).unwrap(), HtbClassState::MayBorrow);

        // Next packet borrows from the ceiling bucket.
        assert_eq!(s.charge(0, 1_500, 0).unwrap(), ChargeOutcome::Borrowed);
        let (_, _, overlimits, _) = s.totals();
        assert_eq!(overlimits, 1);

        // 500 ceiling bytes left: a 1500-byte packet drops.
        assert_eq!(s.charge(0, 1_500, 0).unwrap(), ChargeOutcome::Dropped);
        assert_eq!(s.totals().3, 1);

        // Both buckets empty after one more borrow.
        assert_eq!(s.charge(0, 500, 0).unwrap(), ChargeOutcome::Borrowed);
        assert_eq!(s.state(0).unwrap(), HtbClassState::CantSend);
        assert!(!s.can_send(0, 1).unwrap());
    }

    #[test]
    fn refill_accrues_and_caps_at_burst() {
        let mut s = HtbShaper::new(HtbConfig {
            root_rate_bps: 8_000_000, // 1000 bytes per ms
            root_ceil_bps: 8_000_000,
            max_classes: 4,
        })
        .unwrap();
        s.charge(0, 1_000_000, 0).unwrap(); // burst (1e6 bytes) fully drained

        // 1 ms refills 1000 bytes.
        s.update_tokens(0, 1_000).unwrap();
        assert_eq!(s.tokens(0).unwrap().0, 1_000);

        // A long gap caps at burst, never beyond.
        s.update_tokens(0, 10_000_000).unwrap();
        assert_eq!(s.tokens(0).unwrap().0, 1_000_000);
    }
}
