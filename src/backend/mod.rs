//! # Backend
//!
//! This module defines the OS/process-attachment primitives the engine
//! consumes: module lookup, byte injection, and hook installation. The engine
//! never touches a foreign process directly; everything goes through the
//! [`PatchBackend`] trait so the lifecycle and registry logic stays
//! platform-independent and testable.

use std::time::{Duration, Instant};

use thiserror::Error;

use crate::calls::{ForwardFn, RawStatus};

#[cfg(test)]
pub(crate) mod mock;

/// Opaque identifier of a module loaded in the target process.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ModuleId(pub u32);

/// Opaque handle to a live byte injection.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct InjectHandle(pub u32);

/// Opaque handle to a live hook.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HookHandle(pub u32);

/// Opaque forwarding reference paired with a hook handle; required to remove
/// the hook again.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ForwardRef(pub u32);

/// Identity descriptor of a resolved module.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModuleInfo {
    /// Backend identifier used by all subsequent injection/hook calls.
    pub id: ModuleId,
    /// ABI revision tag of the binary, checked against the configured
    /// expectation once at startup.
    pub version_tag: u32,
}

/// Location of an imported function, as library and function identifiers.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ImportSite {
    /// Identifier of the exporting library.
    pub library: u32,
    /// Identifier of the function within that library.
    pub function: u32,
}

/// Which engine handler a hook installation binds. The backend routes
/// intercepted calls to the matching [`crate::dispatch`] handler and returns
/// a forwarding capability of the matching contract.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HookPoint {
    /// Working-buffer allocation import.
    Alloc,
    /// Graphics-device initialization import.
    DeviceInit,
    /// Two-scalar layout call site.
    ScalePair,
    /// Position/size layout call site.
    ScaleQuad,
    /// Composited frame submission import.
    FrameSubmit,
}

/// Product of a successful hook installation.
#[derive(Debug)]
pub struct HookInstallation {
    /// Handle identifying the hook for removal.
    pub handle: HookHandle,
    /// Forwarding reference paired with the handle for removal.
    pub forward_ref: ForwardRef,
    /// Typed capability to call the original implementation, moved into the
    /// dispatch handler at startup.
    pub forward: ForwardFn,
}

/// Failures reported by the backend primitives.
#[derive(Debug, Error)]
pub enum BackendError {
    /// No loaded module matched the requested name.
    #[error("module `{0}` not found in target process")]
    ModuleNotFound(String),
    /// The injection primitive returned an error status.
    #[error("injection primitive failed with status {0}")]
    Inject(RawStatus),
    /// The hook-install primitive returned an error status.
    #[error("hook-install primitive failed with status {0}")]
    HookInstall(RawStatus),
    /// A release/unhook primitive returned an error status.
    #[error("release primitive failed with status {0}")]
    Release(RawStatus),
}

/// The process-attachment, injection, and hook primitives.
///
/// Every method mutates a foreign process's code or import table; the engine
/// calls them only during single-threaded startup/teardown, plus the
/// best-effort self-disengagement of the frame-submission hook.
pub trait PatchBackend {
    /// Resolves a loaded module by name to its identity descriptor.
    fn resolve_module(&mut self, name: &str) -> Result<ModuleInfo, BackendError>;

    /// Writes `bytes` at `offset` within `segment` of `module`.
    fn inject(
        &mut self,
        module: ModuleId,
        segment: usize,
        offset: u32,
        bytes: &[u8],
    ) -> Result<InjectHandle, BackendError>;

    /// Restores the original bytes of a live injection.
    fn release_inject(&mut self, handle: InjectHandle) -> Result<(), BackendError>;

    /// Intercepts an imported function, binding it to the handler named by
    /// `point`.
    fn hook_import(
        &mut self,
        module: ModuleId,
        site: ImportSite,
        point: HookPoint,
    ) -> Result<HookInstallation, BackendError>;

    /// Intercepts the function at a fixed code offset, binding it to the
    /// handler named by `point`.
    fn hook_offset(
        &mut self,
        module: ModuleId,
        offset: u32,
        point: HookPoint,
    ) -> Result<HookInstallation, BackendError>;

    /// Removes a live hook.
    fn unhook(&mut self, handle: HookHandle, forward_ref: ForwardRef) -> Result<(), BackendError>;
}

/// Monotonic process time, consumed by the health monitor.
pub trait Clock {
    /// Elapsed process time since an arbitrary fixed origin.
    fn process_time(&self) -> Duration;
}

/// [`Clock`] backed by [`Instant`], anchored at construction.
#[derive(Debug)]
pub struct SystemClock {
    /// Time origin.
    origin: Instant,
}

impl SystemClock {
    /// Creates a clock anchored at the current instant.
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
    fn process_time(&self) -> Duration {
        self.origin.elapsed()
    }
}
