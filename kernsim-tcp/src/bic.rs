//! BIC window growth: binary search toward the last loss point, then max
//! probing beyond it.

use crate::stats::TcpStats;
use crate::{clamp_window, CongestionControl, CongestionEvent, BETA_SCALE, MIN_WINDOW};
use tracing::trace;

/// β = 819/1024: gentler decrease than CUBIC.
const BIC_BETA: u32 = 819;
/// Largest window step per congestion-avoidance round.
const MAX_INCREMENT: u32 = 16;
/// Divisor for the probing step.
const LOW_WINDOW: u32 = 14;

/// Per-connection BIC state.
///
/// Window growth advances once per round (one window's worth of ACKs):
/// below `target` the window binary-searches toward it; at or above the
/// remembered maximum it probes upward in small steps.
pub struct BicState {
    cwnd: u32,
    ssthresh: u32,
    /// Midpoint the binary search is converging to.
    target: u32,
    last_max_cwnd: u32,
    /// ACKs accumulated toward the current round.
    round_acks: u32,

    acks: u64,
    losses: u64,
    timeouts: u64,
}

impl Default for BicState {
    fn default() -> Self {
        Self::new(MIN_WINDOW, crate::MAX_WINDOW)
    }
}

impl BicState {
    pub fn new(initial_cwnd: u32, initial_ssthresh: u32) -> Self {
        let cwnd = initial_cwnd.max(MIN_WINDOW);
        Self {
            cwnd,
            ssthresh: initial_ssthresh,
            target: cwnd,
            last_max_cwnd: 0,
            round_acks: 0,
            acks: 0,
            losses: 0,
            timeouts: 0,
        }
    }

    fn on_ack(&mut self, acked: u32) {
        let acked = acked.max(1);
        self.acks += 1;

        if self.cwnd < self.ssthresh {
            self.cwnd = clamp_window(u64::from(self.cwnd) + u64::from(acked));
            return;
        }

        self.round_acks += acked;
        if self.round_acks >= self.cwnd {
            let round = self.round_acks;
            self.round_acks = 0;
            self.round_step(round);
        }
    }

    /// One congestion-avoidance round.
    fn round_step(&mut self, round_acks: u32) {
        if self.cwnd < self.target {
            // Halve the remaining distance, capped.
            let inc = ((self.target - self.cwnd) / 2).clamp(1, MAX_INCREMENT);
            self.cwnd = clamp_window(u64::from(self.cwnd) + u64::from(inc));
        } else if self.cwnd < self.last_max_cwnd {
            // Midpoint reached: keep bisecting toward the old maximum.
            self.target = (self.cwnd + self.last_max_cwnd).div_ceil(2);
        } else {
            // Past the old maximum: probe upward and raise the target.
            let inc = (round_acks / LOW_WINDOW).clamp(1, MAX_INCREMENT);
            self.cwnd = clamp_window(u64::from(self.cwnd) + u64::from(inc));
            self.target = self.cwnd;
        }
    }

    fn on_loss(&mut self) {
        self.losses += 1;
        if self.cwnd < self.last_max_cwnd {
            self.last_max_cwnd = (self.cwnd * (BETA_SCALE + BIC_BETA)) / (2 * BETA_SCALE);
        } else {
            self.last_max_cwnd = self.cwnd;
        }

        self.cwnd = clamp_window(u64::from(self.cwnd) * u64::from(BIC_BETA) / u64::from(BETA_SCALE));
        self.ssthresh = self.cwnd;
        self.target = (self.cwnd + self.last_max_cwnd.max(self.cwnd)).div_ceil(2);
        self.round_acks = 0;
        trace!(cwnd = self.cwnd, target = self.target, "bic loss");
    }

    fn on_timeout(&mut self) {
        self.timeouts += 1;
        self.ssthresh = self.cwnd.max(MIN_WINDOW);
        self.cwnd = MIN_WINDOW;
        self.target = self.cwnd;
        self.last_max_cwnd = 0;
        self.round_acks = 0;
    }

    pub fn last_max_cwnd(&self) -> u32 {
        self.last_max_cwnd
    }

    pub fn target(&self) -> u32 {
        self.target
    }
}

impl CongestionControl for BicState {
    fn update(&mut self, event: CongestionEvent) -> u32 {
        match event {
            CongestionEvent::Ack { acked, .. } => self.on_ack(acked),
            CongestionEvent::Loss => self.on_loss(),
            CongestionEvent::Timeout => self.on_timeout(),
        }
        self.cwnd
    }

    fn cwnd(&self) -> u32 {
        self.cwnd
    }

    fn ssthresh(&self) -> u32 {
        self.ssthresh
    }

    fn stats(&self) -> TcpStats {
        TcpStats {
            algorithm: "bic",
            cwnd: self.cwnd,
            ssthresh: self.ssthresh,
            last_max_cwnd: self.last_max_cwnd,
            slow_start: self.cwnd < self.ssthresh,
            acks: self.acks,
            losses: self.losses,
            timeouts: self.timeouts,
            hystart_ack_train_exits: 0,
            hystart_delay_exits: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One full round of ACKs at the current window.
    fn round(cc: &mut BicState) -> u32 {
        cc.update(CongestionEvent::Ack {
            acked: cc.cwnd(),
            rtt_us: 10_000,
        })
    }

    #[test]
    fn loss_cuts_by_bic_beta() {
        let mut cc = BicState::new(100, 50);
        assert!(!cc.in_slow_start());

        cc.update(CongestionEvent::Loss);
        // 100 · 819/1024 = 79.
        assert_eq!(cc.cwnd(), 79);
        assert_eq!(cc.ssthresh(), 79);
        assert_eq!(cc.last_max_cwnd(), 100);
    }

    #[test]
    fn binary_search_halves_the_distance_each_round() {
        let mut cc = BicState::new(100, 50);
        cc.update(CongestionEvent::Loss);
        // cwnd 79, last_max 100, target (79+100+1)/2 = 90.
        assert_eq!(cc.target(), 90);

        // (90-79)/2 = 5, then (90-84)/2 = 3, closing in on the midpoint.
        assert_eq!(round(&mut cc), 84);
        assert_eq!(round(&mut cc), 87);
        assert_eq!(round(&mut cc), 88);
        assert_eq!(round(&mut cc), 89);
    }

    #[test]
    fn growth_step_is_capped() {
        let mut cc = BicState::new(2_000, 50);
        cc.update(CongestionEvent::Loss);
        let before = cc.cwnd();
        let after = round(&mut cc);
        assert!(after - before <= MAX_INCREMENT);
    }

    #[test]
    fn probing_raises_the_target_past_the_old_maximum() {
        let mut cc = BicState::new(20, 10);
        // No remembered maximum: every round is a probe.
        let mut prev = cc.cwnd();
        for _ in 0..10 {
            let now = round(&mut cc);
            assert!(now >= prev);
            assert!(now - prev <= MAX_INCREMENT);
            assert_eq!(cc.target(), now);
            prev = now;
        }
        assert!(cc.cwnd() > 20);
    }

    #[test]
    fn timeout_restarts_from_min_window() {
        let mut cc = BicState::new(500, 100);
        cc.update(CongestionEvent::Timeout);
        assert_eq!(cc.cwnd(), MIN_WINDOW);
        assert_eq!(cc.ssthresh(), 500);
        assert!(cc.in_slow_start());
    }

    #[test]
    fn window_stays_in_bounds_under_event_storm() {
        let mut cc = BicState::default();
        let mut rng = kernsim_core::SimRng::with_seed(7);
        for _ in 0..5_000 {
            let cwnd = match rng.range_u32(0, 10) {
                0..=7 => cc.update(CongestionEvent::Ack {
                    acked: rng.range_u32(1, 64),
                    rtt_us: 10_000,
                }),
                8 => cc.update(CongestionEvent::Loss),
                _ => cc.update(CongestionEvent::Timeout),
            };
            assert!((MIN_WINDOW..=crate::MAX_WINDOW).contains(&cwnd));
        }
    }
}
