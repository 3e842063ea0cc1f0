//! # Runtime Health Monitor
//!
//! This module decides whether the injected resolution change actually took
//! effect. It observes the outcome of every frame submission over a bounded
//! warm-up window and latches a permanent failure verdict the first time the
//! fully-patched path reports an error.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use crate::calls::{FrameBufferDescriptor, RawStatus};
use crate::transform::Resolution;

/// Observable state of the monitor.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Health {
    /// No frame submission observed yet.
    Unstarted,
    /// Inside the warm-up window with no failure observed.
    Observing,
    /// The warm-up window elapsed without failure. The frame-submission hook
    /// may disengage itself; overlay drawing stops.
    Healthy,
    /// The patched path reported an error. Terminal for the session.
    Failed,
}

/// Process-wide health state for one attached session.
///
/// Created at startup, dropped at teardown. Any host thread may feed it:
/// the start timestamp is set exactly once with a compare-exchange, and the
/// failure flag only ever transitions `false -> true`.
#[derive(Debug)]
pub struct HealthMonitor {
    /// Dimensions the fully-patched path submits.
    patched: Resolution,
    /// Pitch the fully-patched path submits, in pixels.
    patched_pitch: u32,
    /// Warm-up window after the first observation.
    window: Duration,
    /// Process time of the first observation in microseconds; 0 means unset.
    start_us: AtomicU64,
    /// Permanent failure latch.
    failed: AtomicBool,
}

impl HealthMonitor {
    /// Creates a monitor for the given patched geometry and warm-up window.
    pub fn new(patched: Resolution, patched_pitch: u32, window: Duration) -> Self {
        Self {
            patched,
            patched_pitch,
            window,
            start_us: AtomicU64::new(0),
            failed: AtomicBool::new(false),
        }
    }

    /// Notes a frame observation at process time `now`, recording the start
    /// of the warm-up window on the first call.
    pub fn begin_frame(&self, now: Duration) {
        // 0 is the unset sentinel, so clamp a first observation at t=0 up.
        let us = (now.as_micros() as u64).max(1);
        let _ = self
            .start_us
            .compare_exchange(0, us, Ordering::Relaxed, Ordering::Relaxed);
    }

    /// Feeds the outcome of a frame submission.
    ///
    /// A negative status latches failure only while the submitted descriptor
    /// matches the patched dimensions exactly; errors on any other geometry
    /// are unrelated to the patch and ignored.
    pub fn record_submission(&self, fb: &FrameBufferDescriptor, status: RawStatus) {
        if status < 0 && self.matches_patched(fb) {
            self.failed.store(true, Ordering::Relaxed);
        }
    }

    /// Whether the session has permanently failed.
    pub fn failed(&self) -> bool {
        self.failed.load(Ordering::Relaxed)
    }

    /// The monitor's state at process time `now`.
    pub fn health(&self, now: Duration) -> Health {
        if self.failed() {
            return Health::Failed;
        }
        let start_us = self.start_us.load(Ordering::Relaxed);
        if start_us == 0 {
            return Health::Unstarted;
        }
        let elapsed = now.saturating_sub(Duration::from_micros(start_us));
        if elapsed > self.window {
            Health::Healthy
        } else {
            Health::Observing
        }
    }

    /// Whether `fb` carries exactly the fully-patched geometry.
    fn matches_patched(&self, fb: &FrameBufferDescriptor) -> bool {
        fb.base != 0
            && fb.pitch == self.patched_pitch
            && fb.width == self.patched.width
            && fb.height == self.patched.height
    }
}
