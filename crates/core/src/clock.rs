//! Time sources for pacing and RTCP timestamps.
//!
//! Sessions never read a global clock. They hold an `Arc<dyn Clock>` and
//! sample it once per tick, so tests can drive time explicitly with
//! [`ManualClock`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Seconds between the NTP epoch (1900) and the UNIX epoch (1970).
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

/// Monotonic millisecond clock plus an NTP wall-clock reading.
pub trait Clock: Send + Sync {
    /// Milliseconds on a monotonic timeline. Only differences are meaningful.
    fn now_ms(&self) -> u64;

    /// Wall-clock time for the NTP field of RTCP sender reports.
    fn ntp_now(&self) -> NtpTimestamp {
        NtpTimestamp::from_system_time(SystemTime::now())
    }
}

/// Real clock backed by [`Instant`].
///
/// The timeline starts at 1 ms rather than 0 so that the first reading is
/// never confused with an elapsed time of zero in diagnostics.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64 + 1
    }
}

/// Manually advanced clock for deterministic tests and simulations.
///
/// Clones share the same timeline, so a test can keep one handle and give
/// another to the session.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
    ntp_base: NtpTimestamp,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_ms)),
            ntp_base: NtpTimestamp::from_system_time(UNIX_EPOCH + Duration::from_secs(1_700_000_000)),
        }
    }

    pub fn advance(&self, delta: Duration) {
        self.now
            .fetch_add(delta.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set(&self, now_ms: u64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn ntp_now(&self) -> NtpTimestamp {
        self.ntp_base
            .add_millis(self.now.load(Ordering::SeqCst))
    }
}

/// 64-bit NTP timestamp (RFC 3550 §4): seconds since 1900 and a 32-bit fraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NtpTimestamp {
    pub seconds: u32,
    pub fraction: u32,
}

impl NtpTimestamp {
    pub fn from_system_time(time: SystemTime) -> Self {
        let since_unix = time
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        let seconds = since_unix.as_secs() + NTP_UNIX_OFFSET;
        let fraction = ((since_unix.subsec_nanos() as u64) << 32) / 1_000_000_000;
        Self {
            seconds: seconds as u32,
            fraction: fraction as u32,
        }
    }

    pub fn to_u64(self) -> u64 {
        ((self.seconds as u64) << 32) | self.fraction as u64
    }

    /// Middle 32 bits, as echoed in the `LSR` field of report blocks.
    pub fn middle_bits(self) -> u32 {
        ((self.seconds & 0xFFFF) << 16) | (self.fraction >> 16)
    }

    fn add_millis(self, ms: u64) -> Self {
        let frac_ms = ((self.fraction as u64) * 1000) >> 32;
        let total_ms = frac_ms + ms;
        let seconds = self.seconds as u64 + total_ms / 1000;
        let fraction = ((total_ms % 1000) << 32) / 1000;
        Self {
            seconds: seconds as u32,
            fraction: fraction as u32,
        }
    }
}
