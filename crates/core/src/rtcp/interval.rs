//! RTCP transmission interval (RFC 3550 §6.3.1, §A.7).

use std::time::Duration;

use rand::RngExt;

/// Minimum interval between reports once the first one is out.
pub const RTCP_MIN_INTERVAL: Duration = Duration::from_secs(5);

/// Fraction of the session bandwidth given to RTCP.
pub const RTCP_BANDWIDTH_FRACTION: f64 = 0.05;

const SENDER_BANDWIDTH_FRACTION: f64 = 0.25;
const RECEIVER_BANDWIDTH_FRACTION: f64 = 1.0 - SENDER_BANDWIDTH_FRACTION;

/// Compensates for the timer reconsideration converging below the mean.
const COMPENSATION: f64 = std::f64::consts::E - 1.5;

/// Inputs of the interval computation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntervalInput {
    pub members: u32,
    pub senders: u32,
    /// RTCP bandwidth in octets per second.
    pub rtcp_bandwidth: f64,
    pub we_sent: bool,
    /// Moving average of compound RTCP size, lower-layer headers included.
    pub avg_rtcp_size: f64,
    /// No report has been sent yet.
    pub initial: bool,
}

impl IntervalInput {
    /// Interval in seconds before randomization.
    pub fn deterministic(&self) -> f64 {
        let mut min_time = RTCP_MIN_INTERVAL.as_secs_f64();
        if self.initial {
            min_time /= 2.0;
        }

        let mut n = self.members.max(1) as f64;
        let mut bandwidth = self.rtcp_bandwidth;
        let senders = self.senders as f64;
        if senders <= n * SENDER_BANDWIDTH_FRACTION {
            if self.we_sent {
                bandwidth *= SENDER_BANDWIDTH_FRACTION;
                n = senders.max(1.0);
            } else {
                bandwidth *= RECEIVER_BANDWIDTH_FRACTION;
                n -= senders;
            }
        }

        if bandwidth <= 0.0 {
            return min_time;
        }
        (self.avg_rtcp_size * n / bandwidth).max(min_time)
    }

    /// Interval to wait until the next report.
    ///
    /// With `randomize`, the deterministic value is scaled by a uniform factor
    /// in `[0.5, 1.5)` and divided by `e - 3/2`.
    pub fn interval(&self, randomize: bool) -> Duration {
        let t = self.deterministic();
        if !randomize {
            return Duration::from_secs_f64(t);
        }
        let factor = rand::rng().random_range(0.5..1.5);
        Duration::from_secs_f64(t * factor / COMPENSATION)
    }
}
