use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

/// Source of wall-clock time as floating point seconds since the Unix epoch.
///
/// Predictions and ticks are expressed in epoch seconds so downstream
/// consumers on other machines can line them up with their own clocks.
pub trait Clock: Send + Sync {
    fn now_epoch(&self) -> f64;
}

/// System wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch(&self) -> f64 {
        chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
    }
}

/// Manually advanced clock, shared between clones.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<f64>>,
}

impl ManualClock {
    pub fn new(start_epoch: f64) -> Self {
        Self {
            now: Arc::new(Mutex::new(start_epoch)),
        }
    }

    pub fn set(&self, epoch: f64) {
        *self.now.lock() = epoch;
    }

    pub fn advance(&self, seconds: f64) {
        *self.now.lock() += seconds;
    }
}

impl Clock for ManualClock {
    fn now_epoch(&self) -> f64 {
        *self.now.lock()
    }
}

/// Monotonic seconds elapsed since the first call in this process.
///
/// Used to stamp raw beat events; it never jumps when the wall clock is
/// adjusted.
pub fn monotonic_seconds() -> f64 {
    static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    START.get_or_init(Instant::now).elapsed().as_secs_f64()
}
