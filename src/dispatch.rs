//! # Hook Dispatch Layer
//!
//! One handler per intercepted contract. Every handler rewrites parameters
//! according to the transform engine, then calls its stored forwarding
//! capability — forwarding is mandatory, the target's control flow depends on
//! it — and returns the original's status verbatim. The frame-submission
//! handler additionally feeds the health monitor and draws the overlay.
//!
//! Handlers are invoked by the target's own threads. State shared across
//! invocations (the migration counter, the health monitor) is atomic; the
//! scale transform is immutable.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::backend::Clock;
use crate::calls::{
    AllocCall, DeviceInitCall, Forward, FrameSubmitCall, PairCall, QuadCall, RawStatus,
};
use crate::monitor::{Health, HealthMonitor};
use crate::overlay::{Overlay, OverlayStyle};
use crate::transform::{MemMigration, Resolution, ScaleTransform};

/// Handler for the working-buffer allocation import.
#[derive(Debug)]
pub struct AllocHook {
    /// Budgeted redirection rule, shared with nothing else.
    migration: Arc<MemMigration>,
    /// The original allocation entry point.
    forward: Forward<AllocCall>,
}

impl AllocHook {
    /// Binds the redirection rule to the captured forward.
    pub(crate) fn new(migration: Arc<MemMigration>, forward: Forward<AllocCall>) -> Self {
        Self { migration, forward }
    }

    /// Intercepts one allocation request.
    pub fn invoke(&self, mut call: AllocCall) -> RawStatus {
        if let Some(to) = self.migration.redirect(call.class, call.size) {
            log::debug!(
                "moved {} KB `{}` from {:?} to {:?}",
                call.size / 1024,
                call.name,
                call.class,
                to
            );
            call.class = to;
        }
        log::trace!("allocate {:?} {} KB `{}`", call.class, call.size / 1024, call.name);
        self.forward.call(call)
    }
}

/// Handler for the graphics-device initialization import.
#[derive(Debug)]
pub struct DeviceInitHook {
    /// Parameter-buffer size to force, in bytes.
    parameter_buffer_size: usize,
    /// The original initialization entry point.
    forward: Forward<DeviceInitCall>,
}

impl DeviceInitHook {
    /// Binds the forced buffer size to the captured forward.
    pub(crate) fn new(parameter_buffer_size: usize, forward: Forward<DeviceInitCall>) -> Self {
        Self {
            parameter_buffer_size,
            forward,
        }
    }

    /// Intercepts the device initialization.
    pub fn invoke(&self, mut call: DeviceInitCall) -> RawStatus {
        log::debug!(
            "parameter buffer {} KB -> {} KB",
            call.parameter_buffer_size / 1024,
            self.parameter_buffer_size / 1024
        );
        call.parameter_buffer_size = self.parameter_buffer_size;
        self.forward.call(call)
    }
}

/// Handler for a two-scalar layout call site.
#[derive(Debug)]
pub struct ScalePairHook {
    /// Shared read-only scaling rule.
    transform: Arc<ScaleTransform>,
    /// The original call site.
    forward: Forward<PairCall>,
}

impl ScalePairHook {
    /// Binds the shared transform to the captured forward.
    pub(crate) fn new(transform: Arc<ScaleTransform>, forward: Forward<PairCall>) -> Self {
        Self { transform, forward }
    }

    /// Intercepts one two-scalar layout call.
    pub fn invoke(&self, mut call: PairCall) -> RawStatus {
        let (a, b) = self.transform.scale_pair(call.a, call.b);
        call.a = a;
        call.b = b;
        self.forward.call(call)
    }
}

/// Handler for a position/size layout call site.
#[derive(Debug)]
pub struct ScaleQuadHook {
    /// Shared read-only scaling rule.
    transform: Arc<ScaleTransform>,
    /// The original call site.
    forward: Forward<QuadCall>,
}

impl ScaleQuadHook {
    /// Binds the shared transform to the captured forward.
    pub(crate) fn new(transform: Arc<ScaleTransform>, forward: Forward<QuadCall>) -> Self {
        Self { transform, forward }
    }

    /// Intercepts one position/size layout call.
    pub fn invoke(&self, mut call: QuadCall) -> RawStatus {
        call.quad = self.transform.scale_quad(call.quad);
        self.forward.call(call)
    }
}

/// One-shot, best-effort removal of the frame-submission hook once the
/// monitor goes healthy. The closure reports whether it got to run; on
/// contention it is retried on a later frame.
pub(crate) struct Disengage {
    /// Set once the release closure has run.
    done: AtomicBool,
    /// Releases the frame-submission slot; returns `false` to retry later.
    release: Box<dyn Fn() -> bool + Send + Sync>,
}

impl Disengage {
    /// Wraps the release closure, initially unfired.
    pub(crate) fn new<F>(release: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        Self {
            done: AtomicBool::new(false),
            release: Box::new(release),
        }
    }

    /// Runs the release closure at most once.
    pub(crate) fn trigger(&self) {
        if self.done.load(Ordering::Relaxed) {
            return;
        }
        if (self.release)() {
            self.done.store(true, Ordering::Relaxed);
        }
    }
}

impl fmt::Debug for Disengage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disengage")
            .field("done", &self.done)
            .finish()
    }
}

/// Handler for the composited frame submission.
///
/// Per frame: feed the monitor, draw the status banner while the monitor is
/// not in steady-state healthy silence, force the native dimensions once the
/// session has failed, forward, and record the outcome. After a failure-free
/// warm-up window it disengages its own hook to stop paying the interception
/// cost.
pub struct FrameSubmitHook {
    /// Session health state.
    monitor: Arc<HealthMonitor>,
    /// Process-time source.
    clock: Arc<dyn Clock + Send + Sync>,
    /// The external text rasterizer.
    overlay: Arc<Mutex<dyn Overlay + Send>>,
    /// Banner texts and line metrics.
    style: OverlayStyle,
    /// Dimensions to fall back to after a failure verdict.
    native: Resolution,
    /// The original frame-submission entry point.
    forward: Forward<FrameSubmitCall>,
    /// Self-removal capability, armed once healthy.
    disengage: Disengage,
}

impl FrameSubmitHook {
    /// Assembles the frame handler from its collaborators.
    pub(crate) fn new(
        monitor: Arc<HealthMonitor>,
        clock: Arc<dyn Clock + Send + Sync>,
        overlay: Arc<Mutex<dyn Overlay + Send>>,
        style: OverlayStyle,
        native: Resolution,
        forward: Forward<FrameSubmitCall>,
        disengage: Disengage,
    ) -> Self {
        Self {
            monitor,
            clock,
            overlay,
            style,
            native,
            forward,
            disengage,
        }
    }

    /// Intercepts one frame submission.
    pub fn invoke(&self, call: FrameSubmitCall) -> RawStatus {
        let now = self.clock.process_time();
        self.monitor.begin_frame(now);

        let mut call = call;
        if let Some(fb) = call.fb.as_mut() {
            if fb.base != 0 {
                match self.monitor.health(now) {
                    Health::Failed => {
                        let mut overlay = self.lock_overlay();
                        overlay.set_framebuffer(fb.base, fb.pitch, fb.width, fb.height);
                        fb.width = self.native.width;
                        fb.height = self.native.height;
                        for (i, line) in self.style.failure_text.iter().enumerate() {
                            overlay.draw_text(0, i as u32 * self.style.line_height, line);
                        }
                    }
                    Health::Healthy => {}
                    Health::Unstarted | Health::Observing => {
                        let mut overlay = self.lock_overlay();
                        overlay.set_framebuffer(fb.base, fb.pitch, fb.width, fb.height);
                        overlay.draw_text(0, 0, &self.style.success_text);
                    }
                }
            }
        }

        let status = self.forward.call(call);

        if let Some(fb) = call.fb.as_ref() {
            if fb.base != 0 {
                self.monitor.record_submission(fb, status);
            }
        }

        if self.monitor.health(self.clock.process_time()) == Health::Healthy {
            self.disengage.trigger();
        }

        status
    }

    /// Locks the overlay, tolerating poisoning from a panicked host thread.
    fn lock_overlay(&self) -> std::sync::MutexGuard<'_, dyn Overlay + Send + 'static> {
        self.overlay.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for FrameSubmitHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameSubmitHook")
            .field("monitor", &self.monitor)
            .field("native", &self.native)
            .finish()
    }
}

/// Every installed handler, handed to the host at startup. The host routes
/// each intercepted call to the matching handler; the `pairs` and `quads`
/// entries follow the order of the configured code offsets.
#[derive(Debug)]
pub struct HookSet {
    /// Working-buffer allocation handler.
    pub alloc: AllocHook,
    /// Device initialization handler.
    pub device_init: DeviceInitHook,
    /// Two-scalar layout handlers, one per configured offset.
    pub pairs: Vec<ScalePairHook>,
    /// Position/size layout handlers, one per configured offset.
    pub quads: Vec<ScaleQuadHook>,
    /// Frame-submission handler.
    pub frame_submit: FrameSubmitHook,
}
