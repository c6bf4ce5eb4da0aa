//! RTT estimation and retransmission timeout computation (§4.2).
//!
//! EWMA over EstimatedRTT/DevRTT, same shape as
//! `nickspiker-photon`'s `RTTEstimator` (first-sample direct init, EWMA
//! thereafter, clamped RTO) and `sauoro-amethyst`'s
//! `reliability::send_window::update_rto` (Jacobson/Karels EWMA with the same
//! structure), but with this protocol's own constants: α=0.15, β=0.3,
//! Timeout = EstimatedRTT + 4*DevRTT, clamped to [50ms, 60s].

use std::time::Duration;

const ALPHA: f64 = 0.15;
const BETA: f64 = 0.3;
const MIN_TIMEOUT: Duration = Duration::from_millis(50);
const MAX_TIMEOUT: Duration = Duration::from_secs(60);
const INITIAL_TIMEOUT: Duration = Duration::from_secs(1);

/// Tracks EstimatedRTT/DevRTT for one peer connection and derives the
/// current retransmission timeout.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    estimated_rtt: Option<Duration>,
    dev_rtt: Duration,
    timeout: Duration,
}

impl RttEstimator {
    pub fn new() -> Self {
        Self {
            estimated_rtt: None,
            dev_rtt: Duration::ZERO,
            timeout: INITIAL_TIMEOUT,
        }
    }

    /// Folds in a fresh RTT sample. Callers must respect Karn's rule: never
    /// call this with a sample measured against a retransmitted packet (§4.2).
    pub fn sample(&mut self, measured: Duration) {
        match self.estimated_rtt {
            None => {
                self.estimated_rtt = Some(measured);
                self.dev_rtt = measured / 2;
            }
            Some(prev_estimate) => {
                let diff = if measured > prev_estimate {
                    measured - prev_estimate
                } else {
                    prev_estimate - measured
                };
                self.dev_rtt = Duration::from_secs_f64(
                    (1.0 - BETA) * self.dev_rtt.as_secs_f64() + BETA * diff.as_secs_f64(),
                );
                self.estimated_rtt = Some(Duration::from_secs_f64(
                    (1.0 - ALPHA) * prev_estimate.as_secs_f64() + ALPHA * measured.as_secs_f64(),
                ));
            }
        }

        let estimated = self.estimated_rtt.unwrap();
        self.timeout = (estimated + self.dev_rtt * 4).clamp(MIN_TIMEOUT, MAX_TIMEOUT);
    }

    /// Current retransmission timeout to arm a timer with.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn estimated_rtt(&self) -> Option<Duration> {
        self.estimated_rtt
    }
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_initializes_directly() {
        let mut rtt = RttEstimator::new();
        rtt.sample(Duration::from_millis(200));
        assert_eq!(rtt.estimated_rtt(), Some(Duration::from_millis(200)));
    }

    #[test]
    fn converges_toward_repeated_sample() {
        let mut rtt = RttEstimator::new();
        for _ in 0..50 {
            rtt.sample(Duration::from_millis(100));
        }
        let estimated = rtt.estimated_rtt().unwrap();
        let delta = if estimated > Duration::from_millis(100) {
            estimated - Duration::from_millis(100)
        } else {
            Duration::from_millis(100) - estimated
        };
        assert!(delta < Duration::from_millis(1));
    }

    #[test]
    fn timeout_is_clamped_to_floor() {
        let mut rtt = RttEstimator::new();
        for _ in 0..20 {
            rtt.sample(Duration::from_millis(1));
        }
        assert!(rtt.timeout() >= MIN_TIMEOUT);
    }
}
