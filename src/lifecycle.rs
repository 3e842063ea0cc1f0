//! # Lifecycle Controller
//!
//! Startup and teardown of one attached session. `start` verifies the target
//! identity, applies every injection and hook in dependency order
//! (layout-affecting modifications before the frame-submission hook, which
//! observes their combined effect), and rolls everything back on the first
//! failure — partial success is never left live. `stop` releases everything
//! unconditionally and is infallible to the host.

use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::backend::{BackendError, Clock, HookPoint, ModuleId, PatchBackend};
use crate::calls::{AllocCall, DeviceInitCall, Forward, PairCall, QuadCall};
use crate::config::TargetConfig;
use crate::dispatch::{
    AllocHook, DeviceInitHook, Disengage, FrameSubmitHook, HookSet, ScalePairHook, ScaleQuadHook,
};
use crate::monitor::HealthMonitor;
use crate::overlay::Overlay;
use crate::registry::{self, PatchRegistry};
use crate::transform::{MemMigration, ScaleTransform};

/// Startup failures. Reported to the host as a single aggregate; whenever
/// `start` returns one of these, zero modifications remain live.
#[derive(Debug, Error)]
pub enum Error {
    /// The attached process is not the expected binary/ABI revision.
    #[error("target identity mismatch: expected {expected:#010x}, found {found:#010x}")]
    IdentityMismatch {
        /// Configured expectation.
        expected: u32,
        /// Tag the resolved module actually carries.
        found: u32,
    },
    /// The backend returned a forwarding capability of the wrong contract.
    #[error("forward capability for slot {0} has the wrong contract")]
    ForwardContract(usize),
    /// A registry apply failed.
    #[error(transparent)]
    Registry(#[from] registry::Error),
    /// Module resolution failed.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Everything applied before the frame-submission hook, with the typed
/// forwarding capabilities still waiting to be moved into their handlers.
struct Staged {
    /// Resolved target module.
    module: ModuleId,
    /// Forward of the allocation import.
    alloc: Forward<AllocCall>,
    /// Forward of the device-init import.
    device_init: Forward<DeviceInitCall>,
    /// Forwards of the two-scalar call sites, in config order.
    pairs: Vec<Forward<PairCall>>,
    /// Forwards of the position/size call sites, in config order.
    quads: Vec<Forward<QuadCall>>,
}

/// One attached session. Owns the backend and the registry for the duration;
/// dropping it without [`Session::stop`] leaves the modifications live.
#[derive(Debug)]
pub struct Session<B> {
    /// The OS primitives, shared with the frame hook's self-disengagement.
    backend: Arc<Mutex<B>>,
    /// The slot table, shared likewise.
    registry: Arc<Mutex<PatchRegistry>>,
}

impl<B: PatchBackend> Session<B> {
    /// Verifies the target and applies every configured modification.
    ///
    /// On success the returned [`HookSet`] is handed to the host, which
    /// routes intercepted calls into it. On any failure the whole startup is
    /// rolled back first.
    pub fn start<C, O>(
        backend: B,
        clock: C,
        overlay: O,
        config: &TargetConfig,
    ) -> Result<(Self, HookSet), Error>
    where
        B: Send + 'static,
        C: Clock + Send + Sync + 'static,
        O: Overlay + Send + 'static,
    {
        let mut backend = backend;
        let mut registry = PatchRegistry::new(config.slot_count());

        let staged = match Self::apply(&mut backend, &mut registry, config) {
            Ok(staged) => staged,
            Err(e) => {
                log::warn!("startup failed ({e}), rolling back");
                registry.release_all(&mut backend);
                return Err(e);
            }
        };

        let transform = Arc::new(ScaleTransform::new(
            config.native,
            config.profile.target(),
            config.compare,
        ));
        let migration = Arc::new(MemMigration::new(
            config.migration.from,
            config.migration.to,
            config.migration.size,
            config.migration.budget,
        ));
        let monitor = Arc::new(HealthMonitor::new(
            config.profile.target(),
            config.framebuffer_pitch,
            config.warmup,
        ));

        // Overlay colours are configured before the frame hook can fire.
        let mut overlay = overlay;
        overlay.set_foreground(config.overlay.foreground);
        overlay.set_background(config.overlay.background);
        let overlay: Arc<Mutex<dyn Overlay + Send>> = Arc::new(Mutex::new(overlay));

        // The frame-submission hook goes in last: it depends on the
        // transformed dimensions already being in effect.
        let frame_slot = config.frame_submit_slot();
        let forward = match registry.apply_import_hook(
            &mut backend,
            frame_slot,
            staged.module,
            config.frame_submit_import,
            HookPoint::FrameSubmit,
        ) {
            Ok(forward) => forward,
            Err(e) => {
                log::warn!("startup failed ({e}), rolling back");
                registry.release_all(&mut backend);
                return Err(e.into());
            }
        };
        let forward = match forward.into_frame_submit() {
            Some(forward) => forward,
            None => {
                let e = Error::ForwardContract(frame_slot);
                log::warn!("startup failed ({e}), rolling back");
                registry.release_all(&mut backend);
                return Err(e);
            }
        };

        let backend = Arc::new(Mutex::new(backend));
        let registry = Arc::new(Mutex::new(registry));

        let disengage = {
            let backend = Arc::clone(&backend);
            let registry = Arc::clone(&registry);
            Disengage::new(move || {
                // Best-effort: on lock contention, retry on a later frame.
                let Ok(mut backend) = backend.try_lock() else {
                    return false;
                };
                let Ok(mut registry) = registry.try_lock() else {
                    return false;
                };
                match registry.release(&mut *backend, frame_slot) {
                    Ok(()) => log::info!("warm-up window passed clean, frame hook disengaged"),
                    Err(e) => log::warn!("frame hook disengage: {e}, ignored"),
                }
                true
            })
        };

        let hooks = HookSet {
            alloc: AllocHook::new(migration, staged.alloc),
            device_init: DeviceInitHook::new(config.parameter_buffer_size, staged.device_init),
            pairs: staged
                .pairs
                .into_iter()
                .map(|f| ScalePairHook::new(Arc::clone(&transform), f))
                .collect(),
            quads: staged
                .quads
                .into_iter()
                .map(|f| ScaleQuadHook::new(Arc::clone(&transform), f))
                .collect(),
            frame_submit: FrameSubmitHook::new(
                monitor,
                Arc::new(clock),
                overlay,
                config.overlay.clone(),
                config.native,
                forward,
                disengage,
            ),
        };

        log::info!(
            "startup complete: {} injections, {} hooks live",
            config.injections.len(),
            config.slot_count() - config.injections.len()
        );
        Ok((Self { backend, registry }, hooks))
    }

    /// Identity check, injections, and every hook except frame submission.
    fn apply(
        backend: &mut B,
        registry: &mut PatchRegistry,
        config: &TargetConfig,
    ) -> Result<Staged, Error> {
        let info = backend.resolve_module(&config.module_name)?;
        if info.version_tag != config.version_tag {
            return Err(Error::IdentityMismatch {
                expected: config.version_tag,
                found: info.version_tag,
            });
        }
        log::info!(
            "attached to `{}`, tag {:#010x}",
            config.module_name,
            info.version_tag
        );

        for (i, injection) in config.injections.iter().enumerate() {
            registry.apply_injection(
                backend,
                config.injection_slot(i),
                info.id,
                injection.segment,
                injection.offset,
                &injection.bytes,
            )?;
        }

        let slot = config.alloc_slot();
        let alloc = registry
            .apply_import_hook(backend, slot, info.id, config.alloc_import, HookPoint::Alloc)?
            .into_alloc()
            .ok_or(Error::ForwardContract(slot))?;

        let slot = config.device_init_slot();
        let device_init = registry
            .apply_import_hook(
                backend,
                slot,
                info.id,
                config.device_init_import,
                HookPoint::DeviceInit,
            )?
            .into_device_init()
            .ok_or(Error::ForwardContract(slot))?;

        let mut pairs = Vec::with_capacity(config.pair_offsets.len());
        for (i, &offset) in config.pair_offsets.iter().enumerate() {
            let slot = config.pair_slot(i);
            let forward = registry
                .apply_offset_hook(backend, slot, info.id, offset, HookPoint::ScalePair)?
                .into_pair()
                .ok_or(Error::ForwardContract(slot))?;
            pairs.push(forward);
        }

        let mut quads = Vec::with_capacity(config.quad_offsets.len());
        for (i, &offset) in config.quad_offsets.iter().enumerate() {
            let slot = config.quad_slot(i);
            let forward = registry
                .apply_offset_hook(backend, slot, info.id, offset, HookPoint::ScaleQuad)?
                .into_quad()
                .ok_or(Error::ForwardContract(slot))?;
            quads.push(forward);
        }

        Ok(Staged {
            module: info.id,
            alloc,
            device_init,
            pairs,
            quads,
        })
    }

    /// Number of modifications currently live.
    pub fn live_count(&self) -> usize {
        self.registry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .live_count()
    }

    /// Releases every modification unconditionally. Individual release
    /// failures are logged and swallowed; teardown never fails the host.
    pub fn stop(self) {
        let mut backend = self.backend.lock().unwrap_or_else(|e| e.into_inner());
        let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        registry.release_all(&mut *backend);
        log::info!("teardown complete");
    }
}
