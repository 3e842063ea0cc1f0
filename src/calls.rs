//! # Intercepted call contracts
//!
//! This module defines the typed parameter sets of every function the engine
//! intercepts in the target process, plus the forwarding capability a handler
//! uses to invoke the original, pre-hook implementation.
//!
//! Each contract mirrors the original function exactly: parameters a handler
//! never touches travel in opaque `rest` words so the host trampoline can
//! reconstruct the full call when forwarding.

use std::fmt;

use crate::transform::Quad;

/// Raw status code of an intercepted call. Negative values are errors; the
/// engine forwards them verbatim and never manufactures its own.
pub type RawStatus = i32;

/// Memory class of a working-buffer allocation request.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MemClass {
    /// Dedicated video memory, the target's default class for render surfaces.
    VideoRam,
    /// Physically contiguous, uncached main memory.
    MainContiguousUncached,
    /// General-purpose main memory.
    Main,
    /// Any other class, carried through untouched.
    Other(u32),
}

/// A working-buffer allocation request (import hook).
#[derive(Clone, Debug, PartialEq)]
pub struct AllocCall {
    /// Debug name the target gave the block.
    pub name: String,
    /// Requested memory class; the only field the handler may rewrite.
    pub class: MemClass,
    /// Requested size in bytes.
    pub size: usize,
    /// Opaque options pointer, forwarded untouched.
    pub opt: usize,
}

/// Graphics-device initialization parameters (import hook).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DeviceInitCall {
    /// Size of the device's internal parameter buffer in bytes.
    pub parameter_buffer_size: usize,
    /// Remaining init fields, forwarded untouched.
    pub rest: [usize; 4],
}

/// A two-scalar layout call site (offset hook).
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PairCall {
    /// Horizontal value, scaled by the transform engine.
    pub a: f32,
    /// Vertical value, scaled by the transform engine.
    pub b: f32,
    /// Register arguments the handler never interprets.
    pub rest: [usize; 3],
}

/// A position/size tuple call site (offset hook).
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct QuadCall {
    /// The `(x, y, w, h)` tuple subject to scaling.
    pub quad: Quad,
    /// Register arguments the handler never interprets.
    pub rest: [usize; 3],
}

/// Snapshot of the framebuffer a frame submission carries. Consumed by the
/// health monitor and the overlay; never retained beyond the call.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FrameBufferDescriptor {
    /// Base address of the buffer in the target's address space.
    pub base: usize,
    /// Row pitch in pixels.
    pub pitch: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// A composited frame submission (import hook).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FrameSubmitCall {
    /// The submitted framebuffer; `None` when the target passes a null
    /// descriptor.
    pub fb: Option<FrameBufferDescriptor>,
    /// Submission sync mode, forwarded untouched.
    pub sync: u32,
}

/// Callable capability to invoke the original, pre-hook implementation of an
/// intercepted function. Captured once at hook-install time; a handler calls
/// it on every invocation and never looks the original up dynamically.
pub struct Forward<A> {
    /// The host-provided trampoline into the original code path.
    call: Box<dyn Fn(A) -> RawStatus + Send + Sync>,
}

impl<A> Forward<A> {
    /// Wraps a trampoline closure into a forwarding capability.
    pub fn new<F>(call: F) -> Self
    where
        F: Fn(A) -> RawStatus + Send + Sync + 'static,
    {
        Self {
            call: Box::new(call),
        }
    }

    /// Invokes the original implementation with `args`.
    pub fn call(&self, args: A) -> RawStatus {
        (self.call)(args)
    }
}

impl<A> fmt::Debug for Forward<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Forward(..)")
    }
}

/// The forwarding capability of a freshly installed hook, typed by contract.
///
/// The backend produces the variant matching the hook point it installed;
/// the lifecycle controller moves the typed capability into the matching
/// dispatch handler.
#[derive(Debug)]
pub enum ForwardFn {
    /// Forward into the original allocation entry point.
    Alloc(Forward<AllocCall>),
    /// Forward into the original device initialization.
    DeviceInit(Forward<DeviceInitCall>),
    /// Forward into an original two-scalar layout call.
    Pair(Forward<PairCall>),
    /// Forward into an original position/size layout call.
    Quad(Forward<QuadCall>),
    /// Forward into the original frame submission.
    FrameSubmit(Forward<FrameSubmitCall>),
}

impl ForwardFn {
    /// Extracts the allocation forward, if this is one.
    pub fn into_alloc(self) -> Option<Forward<AllocCall>> {
        match self {
            Self::Alloc(f) => Some(f),
            _ => None,
        }
    }

    /// Extracts the device-init forward, if this is one.
    pub fn into_device_init(self) -> Option<Forward<DeviceInitCall>> {
        match self {
            Self::DeviceInit(f) => Some(f),
            _ => None,
        }
    }

    /// Extracts the two-scalar forward, if this is one.
    pub fn into_pair(self) -> Option<Forward<PairCall>> {
        match self {
            Self::Pair(f) => Some(f),
            _ => None,
        }
    }

    /// Extracts the position/size forward, if this is one.
    pub fn into_quad(self) -> Option<Forward<QuadCall>> {
        match self {
            Self::Quad(f) => Some(f),
            _ => None,
        }
    }

    /// Extracts the frame-submission forward, if this is one.
    pub fn into_frame_submit(self) -> Option<Forward<FrameSubmitCall>> {
        match self {
            Self::FrameSubmit(f) => Some(f),
            _ => None,
        }
    }
}
