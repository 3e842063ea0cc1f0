//! # Patch Registry
//!
//! This module tracks every reversible modification made to the target
//! process in a fixed-size slot table: byte injections and hooks, one slot
//! per logical modification. The registry exclusively owns the handles; apply
//! is rejected on a live slot and release is idempotent, so teardown can walk
//! the whole table unconditionally.

use thiserror::Error;

use crate::backend::{
    BackendError, ForwardRef, HookHandle, HookPoint, ImportSite, InjectHandle, ModuleId,
    PatchBackend,
};
use crate::calls::ForwardFn;

/// Handle pair of a live modification.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SlotHandle {
    /// A live byte injection.
    Injection(InjectHandle),
    /// A live hook with its paired forwarding reference.
    Hook {
        /// Handle identifying the hook.
        handle: HookHandle,
        /// Forwarding reference required for removal.
        forward_ref: ForwardRef,
    },
}

/// Tri-state of one slot. A handle is stored if and only if the modification
/// is currently live in the target process.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SlotState {
    /// Nothing applied through this slot yet.
    Unapplied,
    /// The modification is live in the target.
    Live(SlotHandle),
    /// The modification was applied and has been undone.
    Released,
}

/// Registry failures.
#[derive(Debug, Error)]
pub enum Error {
    /// The injection primitive failed; the slot stays unapplied.
    #[error("injection for slot {slot} failed")]
    InjectionFailed {
        /// Slot the injection was destined for.
        slot: usize,
        /// Underlying primitive failure.
        #[source]
        source: BackendError,
    },
    /// The hook-install primitive failed; the slot stays unapplied.
    #[error("hook installation for slot {slot} failed")]
    HookInstallFailed {
        /// Slot the hook was destined for.
        slot: usize,
        /// Underlying primitive failure.
        #[source]
        source: BackendError,
    },
    /// Undoing a live modification failed. Non-fatal: the slot's handle is
    /// dropped regardless so teardown keeps making forward progress.
    #[error("release of slot {slot} failed")]
    ReleaseFailed {
        /// Slot that failed to release.
        slot: usize,
        /// Underlying primitive failure.
        #[source]
        source: BackendError,
    },
    /// The slot already holds a live modification.
    #[error("slot {0} already holds a live modification")]
    SlotInUse(usize),
    /// The slot index is beyond the table.
    #[error("slot {0} is out of range")]
    SlotOutOfRange(usize),
}

/// Fixed-size table of patch slots.
#[derive(Debug)]
pub struct PatchRegistry {
    /// Slot states, indexed by stable small integer IDs.
    slots: Vec<SlotState>,
}

impl PatchRegistry {
    /// Creates a table of `len` unapplied slots.
    pub fn new(len: usize) -> Self {
        Self {
            slots: vec![SlotState::Unapplied; len],
        }
    }

    /// Number of slots in the table.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the table has no slots.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// State of `slot`, or `None` when out of range.
    pub fn slot_state(&self, slot: usize) -> Option<&SlotState> {
        self.slots.get(slot)
    }

    /// Whether `slot` holds a live modification.
    pub fn is_live(&self, slot: usize) -> bool {
        matches!(self.slots.get(slot), Some(SlotState::Live(_)))
    }

    /// Number of live modifications across the whole table.
    pub fn live_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s, SlotState::Live(_)))
            .count()
    }

    /// Rejects out-of-range and already-live slots.
    fn ensure_applicable(&self, slot: usize) -> Result<(), Error> {
        match self.slots.get(slot) {
            None => Err(Error::SlotOutOfRange(slot)),
            Some(SlotState::Live(_)) => Err(Error::SlotInUse(slot)),
            Some(_) => Ok(()),
        }
    }

    /// Writes `bytes` at `(segment, offset)` of `module` and parks the handle
    /// in `slot`. On failure the slot is left unapplied.
    pub fn apply_injection<B: PatchBackend>(
        &mut self,
        backend: &mut B,
        slot: usize,
        module: ModuleId,
        segment: usize,
        offset: u32,
        bytes: &[u8],
    ) -> Result<(), Error> {
        self.ensure_applicable(slot)?;
        let handle = backend
            .inject(module, segment, offset, bytes)
            .map_err(|source| Error::InjectionFailed { slot, source })?;
        log::debug!("slot {slot}: injected {} bytes, handle {handle:?}", bytes.len());
        self.slots[slot] = SlotState::Live(SlotHandle::Injection(handle));
        Ok(())
    }

    /// Intercepts the import at `site`, parks the handle pair in `slot`, and
    /// returns the forwarding capability for the dispatch layer.
    pub fn apply_import_hook<B: PatchBackend>(
        &mut self,
        backend: &mut B,
        slot: usize,
        module: ModuleId,
        site: ImportSite,
        point: HookPoint,
    ) -> Result<ForwardFn, Error> {
        self.ensure_applicable(slot)?;
        let install = backend
            .hook_import(module, site, point)
            .map_err(|source| Error::HookInstallFailed { slot, source })?;
        log::debug!("slot {slot}: hooked import {site:?} as {point:?}, handle {:?}", install.handle);
        self.slots[slot] = SlotState::Live(SlotHandle::Hook {
            handle: install.handle,
            forward_ref: install.forward_ref,
        });
        Ok(install.forward)
    }

    /// Intercepts the function at `offset`, parks the handle pair in `slot`,
    /// and returns the forwarding capability for the dispatch layer.
    pub fn apply_offset_hook<B: PatchBackend>(
        &mut self,
        backend: &mut B,
        slot: usize,
        module: ModuleId,
        offset: u32,
        point: HookPoint,
    ) -> Result<ForwardFn, Error> {
        self.ensure_applicable(slot)?;
        let install = backend
            .hook_offset(module, offset, point)
            .map_err(|source| Error::HookInstallFailed { slot, source })?;
        log::debug!("slot {slot}: hooked offset {offset:#x} as {point:?}, handle {:?}", install.handle);
        self.slots[slot] = SlotState::Live(SlotHandle::Hook {
            handle: install.handle,
            forward_ref: install.forward_ref,
        });
        Ok(install.forward)
    }

    /// Undoes the modification in `slot`. Idempotent: a slot that is not live
    /// is a no-op success, so double release never fails.
    ///
    /// The slot's handle is dropped even when the primitive reports an error;
    /// a modification the backend could not undo is not one we can undo
    /// later either, and teardown must keep moving.
    pub fn release<B: PatchBackend>(
        &mut self,
        backend: &mut B,
        slot: usize,
    ) -> Result<(), Error> {
        let state = self
            .slots
            .get_mut(slot)
            .ok_or(Error::SlotOutOfRange(slot))?;
        let handle = match *state {
            SlotState::Live(handle) => handle,
            SlotState::Unapplied | SlotState::Released => return Ok(()),
        };
        *state = SlotState::Released;
        let result = match handle {
            SlotHandle::Injection(h) => backend.release_inject(h),
            SlotHandle::Hook {
                handle,
                forward_ref,
            } => backend.unhook(handle, forward_ref),
        };
        match result {
            Ok(()) => {
                log::debug!("slot {slot}: released {handle:?}");
                Ok(())
            }
            Err(source) => Err(Error::ReleaseFailed { slot, source }),
        }
    }

    /// Releases every slot unconditionally, logging and swallowing individual
    /// failures so teardown always completes.
    pub fn release_all<B: PatchBackend>(&mut self, backend: &mut B) {
        for slot in 0..self.slots.len() {
            if let Err(e) = self.release(backend, slot) {
                log::warn!("teardown: {e}, continuing");
            }
        }
    }
}
