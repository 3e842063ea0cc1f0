//! # Resolution/Layout Transform Engine
//!
//! This module contains the core domain logic: rewriting width/height/pitch
//! and coordinate values so a native low-resolution pipeline renders at a
//! higher output resolution, and redirecting a known working-buffer
//! allocation to a memory class that can keep up with the larger surfaces.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::calls::MemClass;

/// Epsilon used by [`CompareMode::default`]; matches the rounding slack the
/// target's own arithmetic introduces.
pub const DEFAULT_EPSILON: f32 = 5e-5;

/// A display resolution in pixels.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Resolution {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Resolution {
    /// Creates a resolution.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Output resolution the engine retargets the binary to. The original system
/// selected between its two variants at compile time; here the profile is an
/// ordinary configuration value and all engine logic parametrizes over it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TargetProfile {
    /// 1280x720 output.
    Hd720,
    /// 1920x1080 output.
    FullHd1080,
}

impl TargetProfile {
    /// The output resolution this profile maps the native pipeline onto.
    pub const fn target(self) -> Resolution {
        match self {
            Self::Hd720 => Resolution::new(1280, 720),
            Self::FullHd1080 => Resolution::new(1920, 1080),
        }
    }
}

/// How the engine compares incoming tuples against the pre-scaled sentinel.
///
/// Epsilon tolerance is the default. Exact comparison reproduces the behavior
/// of one historical patch variant bit-for-bit; it drops the rounding slack
/// and should only be selected when that reproducibility is required.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum CompareMode {
    /// Absolute-difference tolerance.
    Epsilon(f32),
    /// Exact bitwise float equality.
    Exact,
}

impl Default for CompareMode {
    fn default() -> Self {
        Self::Epsilon(DEFAULT_EPSILON)
    }
}

/// A position/size tuple carried by intercepted layout calls.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Quad {
    /// Horizontal position.
    pub x: f32,
    /// Vertical position.
    pub y: f32,
    /// Width.
    pub w: f32,
    /// Height.
    pub h: f32,
}

impl Quad {
    /// Creates a quad.
    pub const fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }
}

/// Immutable scaling rule mapping native-resolution values onto the target
/// resolution. Computed once at configuration time and shared read-only by
/// every hook handler; nothing mutates it afterwards.
#[derive(Debug)]
pub struct ScaleTransform {
    /// Horizontal scale factor, `target.width / native.width`.
    scale_x: f32,
    /// Vertical scale factor, `target.height / native.height`.
    scale_y: f32,
    /// The pre-scaled sentinel: a tuple already expressed in target units.
    sentinel: Quad,
    /// Sentinel comparison rule.
    compare: CompareMode,
}

impl ScaleTransform {
    /// Derives the transform from the native and target resolutions.
    pub fn new(native: Resolution, target: Resolution, compare: CompareMode) -> Self {
        let scale_x = target.width as f32 / native.width as f32;
        let scale_y = target.height as f32 / native.height as f32;
        Self {
            scale_x,
            scale_y,
            sentinel: Quad::new(0.0, 0.0, scale_x, scale_y),
            compare,
        }
    }

    /// Horizontal scale factor.
    pub fn scale_x(&self) -> f32 {
        self.scale_x
    }

    /// Vertical scale factor.
    pub fn scale_y(&self) -> f32 {
        self.scale_y
    }

    /// Scales a horizontal/vertical scalar pair.
    pub fn scale_pair(&self, a: f32, b: f32) -> (f32, f32) {
        (a * self.scale_x, b * self.scale_y)
    }

    /// Scales a position/size tuple.
    ///
    /// Tuples that already equal the pre-scaled sentinel pass through
    /// unchanged. The same logical call site can be reached through two
    /// different entry points; without this guard the second entry would
    /// scale an already-scaled tuple.
    pub fn scale_quad(&self, quad: Quad) -> Quad {
        if self.is_prescaled(&quad) {
            log::debug!("tuple already in target units, forwarding unscaled");
            return quad;
        }
        Quad::new(
            quad.x * self.scale_x,
            quad.y * self.scale_y,
            quad.w * self.scale_x,
            quad.h * self.scale_y,
        )
    }

    /// Whether `quad` equals the pre-scaled sentinel under the configured
    /// comparison rule.
    pub fn is_prescaled(&self, quad: &Quad) -> bool {
        self.feq(quad.x, self.sentinel.x)
            && self.feq(quad.y, self.sentinel.y)
            && self.feq(quad.w, self.sentinel.w)
            && self.feq(quad.h, self.sentinel.h)
    }

    /// Float equality under the configured comparison rule.
    fn feq(&self, a: f32, b: f32) -> bool {
        match self.compare {
            CompareMode::Epsilon(eps) => (a - b).abs() < eps,
            CompareMode::Exact => a == b,
        }
    }
}

/// Budgeted redirection of a specific working-buffer allocation to a
/// different memory class.
///
/// The substitution fires only when both the exact byte size and the exact
/// source class match, so unrelated allocations are never hijacked, and at
/// most `budget` times per session. The counter uses an atomic
/// increment-with-compare loop: concurrent qualifying requests consume the
/// budget exactly once each.
#[derive(Debug)]
pub struct MemMigration {
    /// Class a qualifying request must ask for.
    from: MemClass,
    /// Class a qualifying request is redirected to.
    to: MemClass,
    /// Size a qualifying request must ask for, in bytes.
    size: usize,
    /// Maximum substitutions per session.
    budget: u32,
    /// Substitutions performed so far.
    used: AtomicU32,
}

impl MemMigration {
    /// Creates a migration rule.
    pub fn new(from: MemClass, to: MemClass, size: usize, budget: u32) -> Self {
        Self {
            from,
            to,
            size,
            budget,
            used: AtomicU32::new(0),
        }
    }

    /// Returns the replacement class if the request qualifies and budget
    /// remains, consuming one unit of budget.
    pub fn redirect(&self, class: MemClass, size: usize) -> Option<MemClass> {
        if class != self.from || size != self.size {
            return None;
        }
        let mut used = self.used.load(Ordering::Relaxed);
        loop {
            if used >= self.budget {
                return None;
            }
            match self.used.compare_exchange_weak(
                used,
                used + 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Some(self.to),
                Err(current) => used = current,
            }
        }
    }

    /// Substitutions performed so far this session.
    pub fn used(&self) -> u32 {
        self.used.load(Ordering::Relaxed)
    }
}
