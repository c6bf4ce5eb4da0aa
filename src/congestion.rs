//! Reno-style congestion control for a single upload (§4.3).
//!
//! Generalized from `sauoro-amethyst`'s
//! `reliability::send_window` Reno branch (`cwnd < ssthresh` slow-start vs.
//! congestion-avoidance split, ssthresh-halving on loss) from its
//! byte-counted / NACK-triggered variant to this protocol's packet-counted,
//! duplicate-ACK-triggered variant (§4.3 uses a dup-ack threshold of 3 rather
//! than selective NACK records).

pub const INITIAL_SSTHRESH: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    SlowStart,
    CongestionAvoidance,
}

/// What the sender should do in response to feeding an ACK event in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckAction {
    /// Nothing beyond the window update.
    None,
    /// Fast-retransmit the packet at `base`.
    FastRetransmit,
}

#[derive(Debug, Clone)]
pub struct CongestionController {
    cwnd: f64,
    ssthresh: u32,
    phase: Phase,
    dup_acks: u32,
    fast_retransmit_fired: bool,
}

impl CongestionController {
    pub fn new() -> Self {
        Self {
            cwnd: 1.0,
            ssthresh: INITIAL_SSTHRESH,
            phase: Phase::SlowStart,
            dup_acks: 0,
            fast_retransmit_fired: false,
        }
    }

    /// Effective window in whole packets: `floor(cwnd)`, at least 1.
    pub fn window(&self) -> u32 {
        (self.cwnd as u32).max(1)
    }

    pub fn cwnd(&self) -> f64 {
        self.cwnd
    }

    pub fn ssthresh(&self) -> u32 {
        self.ssthresh
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// A new cumulative ACK arrived (window base advanced by at least one packet).
    pub fn on_new_ack(&mut self) {
        match self.phase {
            Phase::SlowStart => {
                self.cwnd += 1.0;
                if self.cwnd >= self.ssthresh as f64 {
                    self.phase = Phase::CongestionAvoidance;
                }
            }
            Phase::CongestionAvoidance => {
                let floor = self.cwnd.floor().max(1.0);
                self.cwnd += 1.0 / floor;
            }
        }
        self.dup_acks = 0;
        self.fast_retransmit_fired = false;
    }

    /// A duplicate cumulative ACK arrived (ACK number unchanged from last good ACK).
    /// Returns `FastRetransmit` exactly once per distinct loss event, on the
    /// third duplicate, guarded by `fast_retransmit_fired` so later duplicates
    /// for the same ACK value don't re-trigger (§4.3).
    pub fn on_duplicate_ack(&mut self) -> AckAction {
        self.dup_acks += 1;
        if self.dup_acks == 3 && !self.fast_retransmit_fired {
            self.enter_loss_recovery();
            self.fast_retransmit_fired = true;
            return AckAction::FastRetransmit;
        }
        AckAction::None
    }

    /// A retransmission timer fired for the packet at `base`.
    pub fn on_timeout(&mut self) {
        self.enter_loss_recovery();
        self.dup_acks = 0;
        self.fast_retransmit_fired = false;
    }

    fn enter_loss_recovery(&mut self) {
        self.ssthresh = ((self.cwnd as u32) / 2).max(2);
        self.cwnd = 1.0;
        self.phase = Phase::SlowStart;
    }
}

impl Default for CongestionController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slow_start_doubles_each_round_trip() {
        let mut c = CongestionController::new();
        assert_eq!(c.window(), 1);
        c.on_new_ack();
        assert_eq!(c.window(), 2);
        c.on_new_ack();
        assert_eq!(c.window(), 3);
    }

    #[test]
    fn transitions_to_congestion_avoidance_at_ssthresh() {
        let mut c = CongestionController::new();
        for _ in 0..(INITIAL_SSTHRESH as usize) {
            c.on_new_ack();
        }
        assert_eq!(c.phase(), Phase::CongestionAvoidance);
        assert!(c.cwnd() >= INITIAL_SSTHRESH as f64);
    }

    #[test]
    fn congestion_avoidance_grows_linearly() {
        let mut c = CongestionController::new();
        for _ in 0..(INITIAL_SSTHRESH as usize) {
            c.on_new_ack();
        }
        let before = c.cwnd();
        let floor_before = before.floor();
        for _ in 0..(floor_before as usize) {
            c.on_new_ack();
        }
        // after floor(cwnd) acks of 1/floor(cwnd) each, cwnd should have grown
        // by roughly 1.0 packet (congestion avoidance, not slow-start doubling).
        assert!(c.cwnd() - before >= 0.9);
        assert!(c.cwnd() - before <= 1.2);
    }

    #[test]
    fn third_duplicate_ack_triggers_fast_retransmit_once() {
        let mut c = CongestionController::new();
        for _ in 0..10 {
            c.on_new_ack();
        }
        let cwnd_before_loss = c.cwnd();
        assert_eq!(c.on_duplicate_ack(), AckAction::None);
        assert_eq!(c.on_duplicate_ack(), AckAction::None);
        assert_eq!(c.on_duplicate_ack(), AckAction::FastRetransmit);
        assert_eq!(c.ssthresh(), ((cwnd_before_loss as u32) / 2).max(2));
        assert_eq!(c.cwnd(), 1.0);
        assert_eq!(c.phase(), Phase::SlowStart);

        // further duplicates for the same loss event must not re-trigger.
        assert_eq!(c.on_duplicate_ack(), AckAction::None);
        assert_eq!(c.on_duplicate_ack(), AckAction::None);
    }

    #[test]
    fn new_ack_clears_dup_ack_counter_and_flag() {
        let mut c = CongestionController::new();
        c.on_duplicate_ack();
        c.on_duplicate_ack();
        c.on_new_ack();
        // counter reset means two more duplicates (not three) should not fire yet.
        assert_eq!(c.on_duplicate_ack(), AckAction::None);
        assert_eq!(c.on_duplicate_ack(), AckAction::None);
        assert_eq!(c.on_duplicate_ack(), AckAction::FastRetransmit);
    }

    #[test]
    fn timeout_halves_ssthresh_and_resets_cwnd() {
        let mut c = CongestionController::new();
        for _ in 0..20 {
            c.on_new_ack();
        }
        let cwnd_before = c.cwnd();
        c.on_timeout();
        assert_eq!(c.ssthresh(), ((cwnd_before as u32) / 2).max(2));
        assert_eq!(c.cwnd(), 1.0);
        assert_eq!(c.phase(), Phase::SlowStart);
    }

    #[test]
    fn ssthresh_never_drops_below_floor_of_two() {
        let mut c = CongestionController::new();
        c.on_timeout();
        assert_eq!(c.ssthresh(), 2);
    }
}
