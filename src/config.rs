//! # Configuration
//!
//! This module carries the target-binary-specific data the engine
//! parametrizes over: the module identity, the injection byte tables, the
//! hook sites, the resolution profile, and the overlay styling. None of it is
//! engine logic; a port to another target build changes only these values.

use std::time::Duration;

use crate::calls::MemClass;
use crate::overlay::OverlayStyle;
use crate::transform::{CompareMode, Resolution, TargetProfile};
use crate::backend::ImportSite;

/// One byte injection at a fixed code location.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InjectionSpec {
    /// Module segment index.
    pub segment: usize,
    /// Offset within the segment.
    pub offset: u32,
    /// Raw instruction bytes to write.
    pub bytes: Vec<u8>,
}

/// The working-buffer redirection rule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MigrationSpec {
    /// Memory class a qualifying allocation asks for.
    pub from: MemClass,
    /// Memory class it is redirected to.
    pub to: MemClass,
    /// Exact size of a qualifying allocation, in bytes.
    pub size: usize,
    /// Maximum redirections per session.
    pub budget: u32,
}

/// Everything the engine needs to know about one target binary.
#[derive(Clone, Debug)]
pub struct TargetConfig {
    /// Name of the module to attach to.
    pub module_name: String,
    /// Expected ABI revision tag; a mismatch aborts startup.
    pub version_tag: u32,
    /// The binary's native resolution.
    pub native: Resolution,
    /// Output resolution profile.
    pub profile: TargetProfile,
    /// Sentinel comparison rule for the transform engine.
    pub compare: CompareMode,
    /// Byte injections, applied in order before any hook.
    pub injections: Vec<InjectionSpec>,
    /// Import site of the working-buffer allocation function.
    pub alloc_import: ImportSite,
    /// Import site of the graphics-device initialization function.
    pub device_init_import: ImportSite,
    /// Import site of the frame-submission function; always hooked last.
    pub frame_submit_import: ImportSite,
    /// Code offsets of the two-scalar layout call sites.
    pub pair_offsets: Vec<u32>,
    /// Code offsets of the position/size layout call sites.
    pub quad_offsets: Vec<u32>,
    /// Working-buffer redirection rule.
    pub migration: MigrationSpec,
    /// Device parameter-buffer size to force at initialization, in bytes.
    pub parameter_buffer_size: usize,
    /// Row pitch of the patched framebuffer, in pixels.
    pub framebuffer_pitch: u32,
    /// Health-monitor warm-up window.
    pub warmup: Duration,
    /// Overlay colours and banner texts.
    pub overlay: OverlayStyle,
}

// Slot layout: injections first, then the layout-affecting hooks, then the
// frame-submission hook in the last slot. The apply order in the lifecycle
// controller follows the slot order.
impl TargetConfig {
    /// Slot of the `i`-th injection.
    pub(crate) fn injection_slot(&self, i: usize) -> usize {
        i
    }

    /// Slot of the allocation hook.
    pub(crate) fn alloc_slot(&self) -> usize {
        self.injections.len()
    }

    /// Slot of the device-init hook.
    pub(crate) fn device_init_slot(&self) -> usize {
        self.alloc_slot() + 1
    }

    /// Slot of the `i`-th two-scalar hook.
    pub(crate) fn pair_slot(&self, i: usize) -> usize {
        self.device_init_slot() + 1 + i
    }

    /// Slot of the `i`-th position/size hook.
    pub(crate) fn quad_slot(&self, i: usize) -> usize {
        self.pair_slot(self.pair_offsets.len()) + i
    }

    /// Slot of the frame-submission hook, always the last.
    pub(crate) fn frame_submit_slot(&self) -> usize {
        self.quad_slot(self.quad_offsets.len())
    }

    /// Total slot count of the registry table.
    pub fn slot_count(&self) -> usize {
        self.frame_submit_slot() + 1
    }
}
