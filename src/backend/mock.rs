//! Scripted in-memory stand-ins for the backend, overlay, and clock.
//!
//! Tests drive the whole engine against these: the backend hands out fresh
//! handles, records every primitive call, fabricates forwarding capabilities
//! that log what was forwarded, and can be scripted to fail at specific
//! points.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::calls::{
    AllocCall, DeviceInitCall, Forward, ForwardFn, FrameSubmitCall, PairCall, QuadCall, RawStatus,
};
use crate::overlay::Overlay;

use super::{
    BackendError, Clock, ForwardRef, HookHandle, HookInstallation, HookPoint, ImportSite,
    InjectHandle, ModuleId, ModuleInfo, PatchBackend,
};

/// One recorded primitive call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Event {
    /// `inject` succeeded.
    Injected {
        /// Target segment.
        segment: usize,
        /// Target offset.
        offset: u32,
        /// Patch length.
        len: usize,
    },
    /// `hook_import` succeeded.
    HookedImport(HookPoint),
    /// `hook_offset` succeeded.
    HookedOffset {
        /// Bound handler.
        point: HookPoint,
        /// Target offset.
        offset: u32,
    },
    /// `release_inject` succeeded.
    ReleasedInject(u32),
    /// `unhook` succeeded.
    Unhooked(u32),
}

/// One call forwarded into the "original" implementation.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum ForwardedCall {
    /// Allocation forwarded.
    Alloc(AllocCall),
    /// Device init forwarded.
    DeviceInit(DeviceInitCall),
    /// Two-scalar layout call forwarded.
    Pair(PairCall),
    /// Position/size layout call forwarded.
    Quad(QuadCall),
    /// Frame submission forwarded.
    Frame(FrameSubmitCall),
}

/// Shared mutable state of the mock backend.
#[derive(Debug, Default)]
struct MockState {
    /// Modules resolvable by name.
    modules: Vec<(String, ModuleInfo)>,
    /// Next fresh handle value.
    next_id: u32,
    /// Handles of live injections.
    live_injects: Vec<u32>,
    /// Handles of live hooks.
    live_hooks: Vec<u32>,
    /// Every successful primitive call, in order.
    events: Vec<Event>,
    /// Every call forwarded to the "original" code path, in order.
    forwarded: Vec<ForwardedCall>,
    /// Total `inject` calls seen, for failure scripting.
    inject_calls: usize,
    /// Zero-based `inject` call that should fail.
    fail_inject_at: Option<usize>,
    /// Hook points whose installation should fail.
    fail_hook_points: Vec<HookPoint>,
    /// Whether `unhook` should fail.
    fail_unhook: bool,
    /// Whether `release_inject` should fail.
    fail_release_inject: bool,
    /// Statuses the forwarded frame submission returns, front first; empty
    /// means success (0).
    frame_statuses: VecDeque<RawStatus>,
    /// Status the forwarded allocation returns.
    alloc_status: RawStatus,
}

/// Scripted [`PatchBackend`]. Cloning shares the underlying state, so tests
/// can keep a handle for inspection after moving a clone into the engine.
#[derive(Clone, Debug)]
pub(crate) struct MockBackend {
    /// Shared recorded/scripted state.
    state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    /// Creates a backend with a single resolvable module.
    pub fn with_module(name: &str, id: u32, version_tag: u32) -> Self {
        let mut state = MockState {
            alloc_status: 1,
            ..MockState::default()
        };
        state.modules.push((
            name.to_owned(),
            ModuleInfo {
                id: ModuleId(id),
                version_tag,
            },
        ));
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Locks the shared state.
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Scripts the zero-based `n`-th `inject` call to fail.
    pub fn fail_inject_at(&self, n: usize) {
        self.lock().fail_inject_at = Some(n);
    }

    /// Scripts installation of `point` to fail.
    pub fn fail_hook(&self, point: HookPoint) {
        self.lock().fail_hook_points.push(point);
    }

    /// Scripts every `unhook` to fail.
    pub fn fail_unhook(&self) {
        self.lock().fail_unhook = true;
    }

    /// Scripts every `release_inject` to fail.
    pub fn fail_release_inject(&self) {
        self.lock().fail_release_inject = true;
    }

    /// Queues the status the next forwarded frame submission returns.
    pub fn push_frame_status(&self, status: RawStatus) {
        self.lock().frame_statuses.push_back(status);
    }

    /// Number of currently live modifications in the "target".
    pub fn live_count(&self) -> usize {
        let state = self.lock();
        state.live_injects.len() + state.live_hooks.len()
    }

    /// Recorded primitive calls.
    pub fn events(&self) -> Vec<Event> {
        self.lock().events.clone()
    }

    /// Recorded forwarded calls.
    pub fn forwarded(&self) -> Vec<ForwardedCall> {
        self.lock().forwarded.clone()
    }

    /// Hands out the next handle value.
    fn fresh_id(state: &mut MockState) -> u32 {
        state.next_id += 1;
        state.next_id
    }

    /// Builds a recording forward of the contract matching `point`.
    fn make_forward(&self, point: HookPoint) -> ForwardFn {
        let state = Arc::clone(&self.state);
        match point {
            HookPoint::Alloc => ForwardFn::Alloc(Forward::new(move |call: AllocCall| {
                let mut state = state.lock().unwrap();
                state.forwarded.push(ForwardedCall::Alloc(call));
                state.alloc_status
            })),
            HookPoint::DeviceInit => {
                ForwardFn::DeviceInit(Forward::new(move |call: DeviceInitCall| {
                    let mut state = state.lock().unwrap();
                    state.forwarded.push(ForwardedCall::DeviceInit(call));
                    0
                }))
            }
            HookPoint::ScalePair => ForwardFn::Pair(Forward::new(move |call: PairCall| {
                let mut state = state.lock().unwrap();
                state.forwarded.push(ForwardedCall::Pair(call));
                0
            })),
            HookPoint::ScaleQuad => ForwardFn::Quad(Forward::new(move |call: QuadCall| {
                let mut state = state.lock().unwrap();
                state.forwarded.push(ForwardedCall::Quad(call));
                0
            })),
            HookPoint::FrameSubmit => {
                ForwardFn::FrameSubmit(Forward::new(move |call: FrameSubmitCall| {
                    let mut state = state.lock().unwrap();
                    state.forwarded.push(ForwardedCall::Frame(call));
                    state.frame_statuses.pop_front().unwrap_or(0)
                }))
            }
        }
    }

    /// Shared install path for import and offset hooks.
    fn install(&self, point: HookPoint, event: Event) -> Result<HookInstallation, BackendError> {
        let forward = self.make_forward(point);
        let mut state = self.lock();
        if state.fail_hook_points.contains(&point) {
            return Err(BackendError::HookInstall(-1));
        }
        let id = Self::fresh_id(&mut state);
        state.live_hooks.push(id);
        state.events.push(event);
        Ok(HookInstallation {
            handle: HookHandle(id),
            forward_ref: ForwardRef(id),
            forward,
        })
    }
}

impl PatchBackend for MockBackend {
    fn resolve_module(&mut self, name: &str) -> Result<ModuleInfo, BackendError> {
        let state = self.lock();
        state
            .modules
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, info)| info.clone())
            .ok_or_else(|| BackendError::ModuleNotFound(name.to_owned()))
    }

    fn inject(
        &mut self,
        _module: ModuleId,
        segment: usize,
        offset: u32,
        bytes: &[u8],
    ) -> Result<InjectHandle, BackendError> {
        let mut state = self.lock();
        let call = state.inject_calls;
        state.inject_calls += 1;
        if state.fail_inject_at == Some(call) {
            return Err(BackendError::Inject(-1));
        }
        let id = Self::fresh_id(&mut state);
        state.live_injects.push(id);
        state.events.push(Event::Injected {
            segment,
            offset,
            len: bytes.len(),
        });
        Ok(InjectHandle(id))
    }

    fn release_inject(&mut self, handle: InjectHandle) -> Result<(), BackendError> {
        let mut state = self.lock();
        if state.fail_release_inject {
            return Err(BackendError::Release(-2));
        }
        let pos = state
            .live_injects
            .iter()
            .position(|&id| id == handle.0)
            .ok_or(BackendError::Release(-3))?;
        state.live_injects.remove(pos);
        state.events.push(Event::ReleasedInject(handle.0));
        Ok(())
    }

    fn hook_import(
        &mut self,
        _module: ModuleId,
        _site: ImportSite,
        point: HookPoint,
    ) -> Result<HookInstallation, BackendError> {
        self.install(point, Event::HookedImport(point))
    }

    fn hook_offset(
        &mut self,
        _module: ModuleId,
        offset: u32,
        point: HookPoint,
    ) -> Result<HookInstallation, BackendError> {
        self.install(point, Event::HookedOffset { point, offset })
    }

    fn unhook(&mut self, handle: HookHandle, _forward_ref: ForwardRef) -> Result<(), BackendError> {
        let mut state = self.lock();
        if state.fail_unhook {
            return Err(BackendError::Release(-4));
        }
        let pos = state
            .live_hooks
            .iter()
            .position(|&id| id == handle.0)
            .ok_or(BackendError::Release(-5))?;
        state.live_hooks.remove(pos);
        state.events.push(Event::Unhooked(handle.0));
        Ok(())
    }
}

/// Manually advanced [`Clock`]. Clones share the same time.
#[derive(Clone, Default)]
pub(crate) struct MockClock {
    /// Current process time.
    now: Arc<Mutex<Duration>>,
}

impl MockClock {
    /// Creates a clock at t=0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves time forward by `by`.
    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for MockClock {
    fn process_time(&self) -> Duration {
        *self.now.lock().unwrap()
    }
}

/// One recorded overlay call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum OverlayEvent {
    /// `set_framebuffer` call.
    Framebuffer {
        /// Buffer base address.
        base: usize,
        /// Row pitch.
        pitch: u32,
        /// Width in pixels.
        width: u32,
        /// Height in pixels.
        height: u32,
    },
    /// `set_foreground` call.
    Foreground(u32),
    /// `set_background` call.
    Background(u32),
    /// `draw_text` call.
    Text {
        /// Horizontal position.
        x: u32,
        /// Vertical position.
        y: u32,
        /// Rendered text.
        text: String,
    },
}

/// Recording [`Overlay`]. Clones share the recorded call list.
#[derive(Clone, Default)]
pub(crate) struct MockOverlay {
    /// Recorded calls, in order.
    events: Arc<Mutex<Vec<OverlayEvent>>>,
}

impl MockOverlay {
    /// Creates an empty overlay recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded calls so far.
    pub fn events(&self) -> Vec<OverlayEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Drops everything recorded so far.
    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    /// Texts drawn so far, in order.
    pub fn texts(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                OverlayEvent::Text { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }
}

impl Overlay for MockOverlay {
    fn set_framebuffer(&mut self, base: usize, pitch: u32, width: u32, height: u32) {
        self.events.lock().unwrap().push(OverlayEvent::Framebuffer {
            base,
            pitch,
            width,
            height,
        });
    }

    fn set_foreground(&mut self, rgba: u32) {
        self.events
            .lock()
            .unwrap()
            .push(OverlayEvent::Foreground(rgba));
    }

    fn set_background(&mut self, rgba: u32) {
        self.events
            .lock()
            .unwrap()
            .push(OverlayEvent::Background(rgba));
    }

    fn draw_text(&mut self, x: u32, y: u32, text: &str) {
        self.events.lock().unwrap().push(OverlayEvent::Text {
            x,
            y,
            text: text.to_owned(),
        });
    }
}
