//! CUBIC window growth with HyStart slow-start exit.
//!
//! The curve follows `W(t) = C·(t − K)³ + W_max` with C = 41/1024, computed
//! entirely in fixed point: curve time is in units of 2⁻¹⁰ s, the cubic term
//! is scaled back by a 2⁴⁰ shift, and K comes from a bitwise integer cube
//! root.

use crate::stats::TcpStats;
use crate::{clamp_window, CongestionControl, CongestionEvent, BETA_SCALE, MIN_WINDOW};
use kernsim_core::Clock;
use std::sync::Arc;
use tracing::trace;

/// β = 717/1024: multiplicative decrease on loss.
const CUBIC_BETA: u32 = 717;
/// C = 41/1024 in the cubic term.
const BIC_SCALE: u64 = 41;
/// Curve time unit: 2^-CUBIC_HZ seconds.
const CUBIC_HZ: u32 = 10;
/// `delta = (CUBE_RTT_SCALE · offs³) >> CUBE_SHIFT`.
const CUBE_RTT_SCALE: u64 = BIC_SCALE * 10;
const CUBE_SHIFT: u32 = 10 + 3 * CUBIC_HZ;
/// `K = ∛(CUBE_FACTOR · (W_max − cwnd))`, in curve time units.
const CUBE_FACTOR: u64 = (1u64 << CUBE_SHIFT) / CUBE_RTT_SCALE;

/// HyStart only arms at and above this window.
const HYSTART_LOW_WINDOW: u32 = 16;
/// ACK spacing that still counts as one train.
const HYSTART_ACK_DELTA_US: u64 = 2_000;
/// Delay-increase threshold and ACK-train floor.
const HYSTART_DELAY_THRESH_US: u64 = 4_000;
/// RTT samples required before the delay detector may fire.
const HYSTART_MIN_SAMPLES: u32 = 8;

#[derive(Debug, Clone)]
pub struct CubicConfig {
    pub fast_convergence: bool,
    pub hystart: bool,
    pub initial_cwnd: u32,
    pub initial_ssthresh: u32,
}

impl Default for CubicConfig {
    fn default() -> Self {
        Self {
            fast_convergence: true,
            hystart: true,
            initial_cwnd: MIN_WINDOW,
            initial_ssthresh: crate::MAX_WINDOW,
        }
    }
}

/// Per-connection CUBIC state.
pub struct CubicState {
    clock: Arc<dyn Clock>,
    config: CubicConfig,

    cwnd: u32,
    ssthresh: u32,
    /// ACKs counted toward the next +1.
    cwnd_cnt: u32,
    /// ACKs required for the next +1.
    cnt: u32,

    last_max_cwnd: u32,
    epoch_start_us: Option<u64>,
    origin_point: u32,
    /// K in curve time units.
    k: u64,
    /// ACKs this epoch, consumed by the TCP-friendliness shadow window.
    ack_cnt: u32,
    tcp_cwnd: u32,
    /// Smallest RTT seen; 0 until the first sample.
    delay_min_us: u64,

    hystart_found: bool,
    round_start_us: u64,
    last_ack_us: u64,
    /// Round-minimum RTT; 0 until the first sample of the round.
    curr_rtt_us: u64,
    sample_cnt: u32,

    acks: u64,
    losses: u64,
    timeouts: u64,
    hystart_ack_train_exits: u64,
    hystart_delay_exits: u64,
}

impl CubicState {
    pub fn new(config: CubicConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            cwnd: config.initial_cwnd.max(MIN_WINDOW),
            ssthresh: config.initial_ssthresh,
            cwnd_cnt: 0,
            cnt: 1,
            last_max_cwnd: 0,
            epoch_start_us: None,
            origin_point: 0,
            k: 0,
            ack_cnt: 0,
            tcp_cwnd: 0,
            delay_min_us: 0,
            hystart_found: false,
            round_start_us: 0,
            last_ack_us: 0,
            curr_rtt_us: 0,
            sample_cnt: 0,
            acks: 0,
            losses: 0,
            timeouts: 0,
            hystart_ack_train_exits: 0,
            hystart_delay_exits: 0,
            config,
        }
    }

    fn on_ack(&mut self, acked: u32, rtt_us: u64) {
        let acked = acked.max(1);
        self.acks += 1;
        if rtt_us > 0 && (self.delay_min_us == 0 || rtt_us < self.delay_min_us) {
            self.delay_min_us = rtt_us;
        }

        if self.cwnd < self.ssthresh {
            if self.config.hystart && !self.hystart_found && self.cwnd >= HYSTART_LOW_WINDOW {
                self.hystart_update(rtt_us);
            }
            if self.cwnd < self.ssthresh {
                self.cwnd = clamp_window(u64::from(self.cwnd) + u64::from(acked));
                return;
            }
        }

        self.cubic_update(acked);
        self.cwnd_cnt += acked;
        if self.cwnd_cnt >= self.cnt {
            self.cwnd = clamp_window(u64::from(self.cwnd) + 1);
            self.cwnd_cnt = 0;
        }
    }

    /// Recompute `cnt` (ACKs per +1) from the cubic curve, then fold in the
    /// TCP-friendliness shadow window.
    fn cubic_update(&mut self, acked: u32) {
        self.ack_cnt += acked;
        let now_us = self.clock.now_us();

        if self.epoch_start_us.is_none() {
            self.epoch_start_us = Some(now_us);
            self.ack_cnt = acked;
            self.tcp_cwnd = self.cwnd;
            if self.last_max_cwnd <= self.cwnd {
                self.k = 0;
                self.origin_point = self.cwnd;
            } else {
                self.k = cube_root(CUBE_FACTOR * u64::from(self.last_max_cwnd - self.cwnd));
                self.origin_point = self.last_max_cwnd;
            }
        }

        // Elapsed epoch time plus one min-RTT, in 2^-10 s curve units.
        let elapsed_us = now_us
            .saturating_sub(self.epoch_start_us.unwrap_or(now_us))
            .saturating_add(self.delay_min_us);
        let t = (u128::from(elapsed_us) << CUBIC_HZ) / 1_000_000;
        let t = t.min(u128::from(u64::MAX)) as u64;

        let offs = if t < self.k { self.k - t } else { t - self.k };
        let cube = u128::from(CUBE_RTT_SCALE) * u128::from(offs) * u128::from(offs) * u128::from(offs);
        let delta = (cube >> CUBE_SHIFT).min(u128::from(u32::MAX)) as u64;
        let origin = u64::from(self.origin_point);
        let target = if t < self.k {
            origin.saturating_sub(delta)
        } else {
            origin.saturating_add(delta)
        };

        let cwnd = u64::from(self.cwnd);
        self.cnt = if target > cwnd {
            (cwnd / (target - cwnd)).max(1) as u32
        } else {
            // At or past the curve: crawl.
            (100 * cwnd) as u32
        };

        // Shadow Reno window: +1 every β·cwnd ACKs, and cwnd never falls
        // behind it.
        let per = ((u64::from(CUBIC_BETA) * cwnd) / u64::from(BETA_SCALE)).max(1) as u32;
        while self.ack_cnt >= per {
            self.ack_cnt -= per;
            self.tcp_cwnd += 1;
        }
        if self.tcp_cwnd > self.cwnd {
            self.cwnd = clamp_window(u64::from(self.tcp_cwnd));
        }
    }

    fn on_loss(&mut self) {
        self.losses += 1;
        self.epoch_start_us = None;

        if self.config.fast_convergence && self.cwnd < self.last_max_cwnd {
            self.last_max_cwnd =
                (self.cwnd * (BETA_SCALE + CUBIC_BETA)) / (2 * BETA_SCALE);
        } else {
            self.last_max_cwnd = self.cwnd;
        }

        self.cwnd = clamp_window(u64::from(self.cwnd) * u64::from(CUBIC_BETA) / u64::from(BETA_SCALE));
        self.ssthresh = self.cwnd;
        self.cwnd_cnt = 0;
        trace!(cwnd = self.cwnd, last_max = self.last_max_cwnd, "cubic loss");
    }

    fn on_timeout(&mut self) {
        self.timeouts += 1;
        // ssthresh takes the pre-timeout window, so the MIN_WINDOW restart
        // re-enters slow start.
        self.ssthresh = self.cwnd.max(MIN_WINDOW);
        self.cwnd = MIN_WINDOW;
        self.last_max_cwnd = 0;
        self.epoch_start_us = None;
        self.origin_point = 0;
        self.k = 0;
        self.cwnd_cnt = 0;
        self.ack_cnt = 0;
        self.tcp_cwnd = 0;
        self.hystart_reset();
    }

    fn hystart_reset(&mut self) {
        self.hystart_found = false;
        self.round_start_us = 0;
        self.last_ack_us = 0;
        self.curr_rtt_us = 0;
        self.sample_cnt = 0;
    }

    /// Run the ACK-train and delay-increase detectors; either one ends slow
    /// start by pulling ssthresh down to the current window.
    fn hystart_update(&mut self, rtt_us: u64) {
        let now_us = self.clock.now_us();

        let round_len = if self.delay_min_us > 0 {
            self.delay_min_us
        } else {
            HYSTART_DELAY_THRESH_US
        };
        if self.round_start_us == 0 || now_us.saturating_sub(self.round_start_us) > round_len {
            self.round_start_us = now_us;
            self.last_ack_us = now_us;
            self.curr_rtt_us = 0;
            self.sample_cnt = 0;
        }

        // ACK train: closely spaced ACKs stretching past half the min RTT.
        if now_us.saturating_sub(self.last_ack_us) <= HYSTART_ACK_DELTA_US {
            self.last_ack_us = now_us;
            let thresh = (self.delay_min_us / 2).max(HYSTART_DELAY_THRESH_US);
            if now_us.saturating_sub(self.round_start_us) > thresh {
                self.hystart_found = true;
                self.hystart_ack_train_exits += 1;
                self.ssthresh = self.cwnd;
                trace!(cwnd = self.cwnd, "hystart ack-train exit");
                return;
            }
        }

        // Delay increase: the round minimum drifting above the floor.
        if rtt_us > 0 {
            if self.curr_rtt_us == 0 || rtt_us < self.curr_rtt_us {
                self.curr_rtt_us = rtt_us;
            }
            self.sample_cnt += 1;
            if self.sample_cnt >= HYSTART_MIN_SAMPLES
                && self.delay_min_us > 0
                && self.curr_rtt_us >= self.delay_min_us + HYSTART_DELAY_THRESH_US
            {
                self.hystart_found = true;
                self.hystart_delay_exits += 1;
                self.ssthresh = self.cwnd;
                trace!(cwnd = self.cwnd, "hystart delay exit");
            }
        }
    }

    pub fn last_max_cwnd(&self) -> u32 {
        self.last_max_cwnd
    }
}

impl CongestionControl for CubicState {
    fn update(&mut self, event: CongestionEvent) -> u32 {
        match event {
            CongestionEvent::Ack { acked, rtt_us } => self.on_ack(acked, rtt_us),
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
            algorithm: "cubic",
            cwnd: self.cwnd,
            ssthresh: self.ssthresh,
            last_max_cwnd: self.last_max_cwnd,
            slow_start: self.cwnd < self.ssthresh,
            acks: self.acks,
            losses: self.losses,
            timeouts: self.timeouts,
            hystart_ack_train_exits: self.hystart_ack_train_exits,
            hystart_delay_exits: self.hystart_delay_exits,
        }
    }
}

/// Bitwise integer cube root: the largest `y` with `y³ ≤ a`.
pub(crate) fn cube_root(a: u64) -> u64 {
    let mut x = u128::from(a);
    let mut y: u128 = 0;
    let mut s: i32 = 63;
    while s >= 0 {
        y <<= 1;
        let b = 3 * y * (y + 1) + 1;
        if (x >> s) >= b {
            x -= b << s;
            y += 1;
        }
        s -= 3;
    }
    y as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernsim_core::ManualClock;

    fn cubic(clock: Arc<ManualClock>) -> CubicState {
        CubicState::new(CubicConfig::default(), clock)
    }

    fn ack(rtt_us: u64) -> CongestionEvent {
        CongestionEvent::Ack { acked: 1, rtt_us }
    }

    #[test]
    fn cube_root_is_exact_on_cubes() {
        for y in [0u64, 1, 2, 3, 10, 100, 1_000, 65_536] {
            assert_eq!(cube_root(y * y * y), y);
        }
        // Floor behavior between cubes.
        assert_eq!(cube_root(26), 2);
        assert_eq!(cube_root(27), 3);
        assert_eq!(cube_root(28), 3);
    }

    #[test]
    fn slow_start_doubles_per_window_then_loss_cuts_by_beta() {
        let clock = ManualClock::new();
        let mut cc = cubic(clock);

        // 12 single-packet ACKs: 4 -> 16, still in slow start.
        for _ in 0..12 {
            cc.update(ack(10_000));
        }
        assert_eq!(cc.cwnd(), 16);
        assert!(cc.in_slow_start());

        // One loss: 16·717/1024 = 11.
        cc.update(CongestionEvent::Loss);
        assert_eq!(cc.cwnd(), 11);
        assert_eq!(cc.ssthresh(), 11);
        assert_eq!(cc.last_max_cwnd(), 16);
    }

    #[test]
    fn timeout_restarts_from_min_window_in_slow_start() {
        let clock = ManualClock::new();
        let mut cc = cubic(clock);
        for _ in 0..30 {
            cc.update(ack(10_000));
        }
        let before = cc.cwnd();
        assert!(before > MIN_WINDOW);

        cc.update(CongestionEvent::Timeout);
        assert_eq!(cc.cwnd(), MIN_WINDOW);
        assert_eq!(cc.ssthresh(), before);
        assert!(cc.in_slow_start());
    }

    #[test]
    fn window_recovers_along_the_curve_after_loss() {
        let clock = ManualClock::new();
        let mut cc = cubic(Arc::clone(&clock));

        for _ in 0..60 {
            cc.update(ack(10_000));
        }
        cc.update(CongestionEvent::Loss);
        let floor = cc.cwnd();
        let origin = cc.last_max_cwnd();

        // Walk simulated time forward past K; the window must climb back to
        // the origin point and beyond, never dipping below the post-loss
        // floor and never leaving the legal range.
        let mut prev = cc.cwnd();
        for step in 0..2_000 {
            clock.advance_ms(10);
            let cwnd = cc.update(ack(10_000));
            assert!(cwnd >= floor.min(prev), "window regressed at step {step}");
            assert!((MIN_WINDOW..=crate::MAX_WINDOW).contains(&cwnd));
            prev = cwnd;
        }
        assert!(
            cc.cwnd() > origin,
            "window {} never passed the origin point {origin}",
            cc.cwnd()
        );
    }

    #[test]
    fn fast_convergence_shrinks_the_target_on_back_to_back_losses() {
        let clock = ManualClock::new();
        let mut cc = cubic(clock);
        for _ in 0..60 {
            cc.update(ack(10_000));
        }
        cc.update(CongestionEvent::Loss);
        let first_max = cc.last_max_cwnd();

        // Second loss before regrowing: cwnd < last_max, so the remembered
        // maximum backs off below the current window.
        cc.update(CongestionEvent::Loss);
        assert!(cc.last_max_cwnd() < first_max);
    }

    #[test]
    fn hystart_delay_increase_ends_slow_start() {
        let clock = ManualClock::new();
        clock.advance_ms(5);
        let mut cc = cubic(Arc::clone(&clock));

        // Establish a 10 ms delay floor and grow past the HyStart window.
        for _ in 0..20 {
            cc.update(ack(10_000));
        }
        assert!(cc.in_slow_start());

        // Roll into a fresh sampling round, then hold a 20 ms round minimum:
        // 4 ms over the floor, so after eight samples the detector fires and
        // ssthresh drops to cwnd.
        clock.advance_ms(15);
        for _ in 0..HYSTART_MIN_SAMPLES {
            cc.update(ack(20_000));
        }
        assert!(!cc.in_slow_start());
        assert_eq!(cc.stats().hystart_delay_exits, 1);
    }

    #[test]
    fn window_never_leaves_bounds_under_event_storm() {
        let clock = ManualClock::new();
        let mut cc = cubic(Arc::clone(&clock));
        let mut rng = kernsim_core::SimRng::with_seed(99);

        for _ in 0..5_000 {
            clock.advance_us(u64::from(rng.range_u32(1, 2_000)));
            let cwnd = match rng.range_u32(0, 100) {
                0..=89 => cc.update(ack(u64::from(rng.range_u32(1_000, 50_000)))),
                90..=97 => cc.update(CongestionEvent::Loss),
                _ => cc.update(CongestionEvent::Timeout),
            };
            assert!((MIN_WINDOW..=crate::MAX_WINDOW).contains(&cwnd));
        }
    }
}
