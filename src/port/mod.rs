//! The port state machine (spec §3, §4.1-§4.6, §4.8-§4.9).
//!
//! A [`Port`] is always held behind an `Arc`: connections, core-forwarding
//! callbacks and recursive `enable`/`disable` cascades all need to hand a
//! peer port a durable reference to `self`, and a bare `&Port` can't do that.

mod connection;
mod events;

use std::fmt;
use std::sync::{Arc, Weak};

use log::{debug, trace, warn};
use parking_lot::Mutex;

use crate::buffer::{Buffer, BufferPool};
use crate::capability::Capability;
use crate::component::Component;
use crate::error::{bail, Result, Status};
use crate::format::{Format, FormatHandle, FourCc};
use crate::handlers::{Payload, PortHandlers};
use crate::naming;
use crate::parameter::Parameter;
use crate::stats::{Counters, Direction, StatsPair};
use crate::transit::TransitGate;

pub use connection::connect;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortType {
    Control,
    Input,
    Output,
}

/// The client-installed completion callback, or one of the two core
/// forwarding callbacks a tunnelled connection installs in its place
/// (spec §4.3, §4.7).
pub(crate) enum Callback {
    Client(Arc<dyn Fn(&Arc<Port>, Buffer) + Send + Sync>),
    ConnectedInput,
    ConnectedOutput,
}

pub(crate) struct PortState {
    pub format: FormatHandle,
    pub format_ptr_copy: FormatHandle,
    pub capabilities: Capability,
    pub buffer_num: u32,
    pub buffer_num_min: u32,
    pub buffer_num_recommended: u32,
    pub buffer_size: u32,
    pub buffer_size_min: u32,
    pub buffer_size_recommended: u32,
    pub name: String,
    pub connected_port: Option<Weak<Port>>,
    pub core_owns_connection: bool,
    pub allocate_pool: bool,
    pub pool_for_connection: Option<Arc<BufferPool>>,
}

pub(crate) struct SendState {
    pub is_enabled: bool,
    pub callback: Option<Callback>,
}

/// A port: one input, output, or control endpoint on a component.
///
/// The spec's single `lock` is split into two primitives here: `op_lock`
/// serialises whole operations (`format_commit`, `connect`, the output half
/// of `enable_connected`) *across which a module handler may run*, while
/// `state` is a plain data mutex taken only for brief, self-contained field
/// accesses. A module handler that calls back into `Port` methods while
/// `op_lock` is held will therefore never deadlock against `state` - only
/// concurrent whole-operations on the same port serialise against each
/// other, which is what the spec actually requires.
pub struct Port {
    pub port_type: PortType,
    pub index: u32,
    pub(crate) component: Weak<dyn Component>,
    pub(crate) handlers: Arc<dyn PortHandlers>,
    pub(crate) extra: Mutex<Option<Box<dyn std::any::Any + Send + Sync>>>,
    pub(crate) op_lock: Mutex<()>,
    pub(crate) state: Mutex<PortState>,
    pub(crate) send_lock: Mutex<SendState>,
    pub(crate) transit: TransitGate,
    pub(crate) stats: Mutex<StatsPair>,
    /// A weak handle back to this port's own allocation, so a handler given
    /// only `&Port` (the shape every [`PortHandlers`] method receives, to
    /// mirror a C callback's raw pointer) can still obtain the `Arc<Port>`
    /// it needs to call [`Port::complete_buffer`] later. Populated once, in
    /// [`Port::alloc`], immediately after construction.
    self_ref: Mutex<Weak<Port>>,
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Port").field("name", &self.name()).finish()
    }
}

impl Port {
    /// `alloc(component, type, index, handlers)`: allocates a port and
    /// composes its initial name.
    ///
    /// The original's tail allocation for module-private state is an owned
    /// `Box<dyn Any>` here, stored with [`Port::set_extra`] and read back
    /// with [`Port::with_extra`]/[`Port::with_extra_mut`] (spec design note:
    /// "equivalent designs may hold it as a separate owned object").
    pub fn alloc(
        component: &Arc<dyn Component>,
        port_type: PortType,
        index: u32,
        handlers: Arc<dyn PortHandlers>,
    ) -> Result<Arc<Port>> {
        let format = FormatHandle::new(Format::default());
        let format_ptr_copy = format.clone();
        let name = naming::format_name(component.name(), port_type, index, FourCc::UNKNOWN);

        debug!("port {} allocated", name);

        let port = Arc::new(Port {
            port_type,
            index,
            component: Arc::downgrade(component),
            handlers,
            extra: Mutex::new(None),
            op_lock: Mutex::new(()),
            state: Mutex::new(PortState {
                format,
                format_ptr_copy,
                capabilities: Capability::empty(),
                buffer_num: 0,
                buffer_num_min: 0,
                buffer_num_recommended: 0,
                buffer_size: 0,
                buffer_size_min: 0,
                buffer_size_recommended: 0,
                name,
                connected_port: None,
                core_owns_connection: false,
                allocate_pool: false,
                pool_for_connection: None,
            }),
            send_lock: Mutex::new(SendState {
                is_enabled: false,
                callback: None,
            }),
            transit: TransitGate::new(),
            stats: Mutex::new(StatsPair::default()),
            self_ref: Mutex::new(Weak::new()),
        });
        *port.self_ref.lock() = Arc::downgrade(&port);
        Ok(port)
    }

    /// `alloc_array(n)`: allocates `count` ports with sequential indices,
    /// rolling back (by simply dropping what was built so far) on the first
    /// failure.
    pub fn alloc_array(
        component: &Arc<dyn Component>,
        port_type: PortType,
        count: u32,
        mut handlers_for: impl FnMut(u32) -> Arc<dyn PortHandlers>,
    ) -> Result<Vec<Arc<Port>>> {
        let mut ports = Vec::with_capacity(count as usize);
        for i in 0..count {
            let port = Port::alloc(component, port_type, i, handlers_for(i))?;
            ports.push(port);
        }
        Ok(ports)
    }

    /// `free(port)`: asserts the format pointer hasn't been swapped out from
    /// under us, then lets the `Arc` drop tear everything down.
    pub fn free(self: Arc<Port>) {
        let state = self.state.lock();
        if !state.format.same_allocation(&state.format_ptr_copy) {
            warn!(
                "port {} freed with an overwritten format pointer",
                state.name
            );
        }
        drop(state);
        debug!("port {} freed", self.name());
    }

    pub fn name(&self) -> String {
        self.state.lock().name.clone()
    }

    pub fn capabilities(&self) -> Capability {
        self.state.lock().capabilities
    }

    pub fn set_capabilities(&self, capabilities: Capability) {
        self.state.lock().capabilities = capabilities;
    }

    pub fn format_handle(&self) -> FormatHandle {
        self.state.lock().format.clone()
    }

    pub fn buffer_num(&self) -> u32 {
        self.state.lock().buffer_num
    }

    pub fn buffer_num_min(&self) -> u32 {
        self.state.lock().buffer_num_min
    }

    pub fn buffer_size(&self) -> u32 {
        self.state.lock().buffer_size
    }

    pub fn buffer_size_min(&self) -> u32 {
        self.state.lock().buffer_size_min
    }

    pub fn set_buffer_num_min_recommended(&self, min: u32, recommended: u32) {
        let mut state = self.state.lock();
        state.buffer_num_min = min;
        state.buffer_num_recommended = recommended;
        if state.buffer_num < min {
            state.buffer_num = min;
        }
    }

    pub fn set_buffer_size_min_recommended(&self, min: u32, recommended: u32) {
        let mut state = self.state.lock();
        state.buffer_size_min = min;
        state.buffer_size_recommended = recommended;
        if state.buffer_size < min {
            state.buffer_size = min;
        }
    }

    pub fn set_buffer_num(&self, n: u32) {
        self.state.lock().buffer_num = n;
    }

    pub fn set_buffer_size(&self, n: u32) {
        self.state.lock().buffer_size = n;
    }

    /// Whether this port should act as the allocating side of a core-owned
    /// connection when both ends advertise [`Capability::ALLOCATION`]
    /// (spec §4.7's pool-ownership tie-break).
    pub fn allocate_pool(&self) -> bool {
        self.state.lock().allocate_pool
    }

    pub fn set_allocate_pool(&self, allocate: bool) {
        self.state.lock().allocate_pool = allocate;
    }

    pub fn is_enabled(&self) -> bool {
        self.send_lock.lock().is_enabled
    }

    pub fn connected_port(&self) -> Option<Arc<Port>> {
        self.state.lock().connected_port.as_ref().and_then(Weak::upgrade)
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected_port.is_some()
    }

    pub fn component(&self) -> Option<Arc<dyn Component>> {
        self.component.upgrade()
    }

    /// Recovers the `Arc<Port>` this port was allocated behind. A handler
    /// holding only `&Port` (as every [`PortHandlers`] method does) calls
    /// this to get a durable handle for completing a buffer from its own
    /// worker thread later.
    pub fn handle(&self) -> Arc<Port> {
        self.self_ref
            .lock()
            .upgrade()
            .expect("port handle is set in Port::alloc and outlives every &Port borrow")
    }

    pub fn set_extra<T: Send + Sync + 'static>(&self, value: T) {
        *self.extra.lock() = Some(Box::new(value));
    }

    pub fn with_extra<T: Send + Sync + 'static, R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
        let guard = self.extra.lock();
        f(guard.as_ref().and_then(|b| b.downcast_ref::<T>()))
    }

    pub fn with_extra_mut<T: Send + Sync + 'static, R>(&self, f: impl FnOnce(Option<&mut T>) -> R) -> R {
        let mut guard = self.extra.lock();
        f(guard.as_mut().and_then(|b| b.downcast_mut::<T>()))
    }

    /// `format_commit(port)` (spec §4.2).
    pub fn format_commit(self: &Arc<Port>) -> Result<()> {
        let _op = self.op_lock.lock();

        {
            let mut state = self.state.lock();
            if !state.format.same_allocation(&state.format_ptr_copy) {
                warn!(
                    "port {} format pointer was overwritten; repairing for diagnosis",
                    state.name
                );
                state.format = state.format_ptr_copy.clone();
                bail!(Status::Efault, "format pointer overwritten by client");
            }
        }

        self.handlers.set_format(self)?;

        let mut state = self.state.lock();
        let encoding = state.format.with(|f| f.encoding);
        state.name = naming::format_name(
            self.component()
                .as_deref()
                .map(Component::name)
                .unwrap_or("?"),
            self.port_type,
            self.index,
            encoding,
        );
        self.clamp_buffer_minima(&mut state);
        let committed_name = state.name.clone();
        drop(state);
        trace!("port {} format committed", committed_name);

        // Inputs drive outputs (spec §4.2): a format commit on an input
        // also clamps every output of the same component to its own
        // minima, since changing what an input will accept can change what
        // the component needs to produce downstream.
        if matches!(self.port_type, PortType::Input) {
            if let Some(component) = self.component() {
                for output in component.output_ports() {
                    let mut out_state = output.state.lock();
                    output.clamp_buffer_minima(&mut out_state);
                }
            }
        }

        Ok(())
    }

    fn clamp_buffer_minima(&self, state: &mut PortState) {
        if state.buffer_num < state.buffer_num_min {
            state.buffer_num = state.buffer_num_min;
        }
        if state.buffer_size < state.buffer_size_min {
            state.buffer_size = state.buffer_size_min;
        }
    }

    /// `flush(port)` (spec §4.6): serialised with send.
    pub fn flush(self: &Arc<Port>) -> Result<()> {
        let _send = self.send_lock.lock();
        self.handlers.flush(self)
    }

    /// `parameter_get`/`parameter_set` (spec §4.6). The only core-recognised
    /// parameter is `CORE_STATISTICS`; anything else is the module's.
    pub fn parameter_get(self: &Arc<Port>, param: &mut Parameter) -> Result<()> {
        let _state = self.state.lock();
        match self.handlers.parameter_get(self, param) {
            Err(e) if e.status() == Status::Enosys => self.core_parameter_get(param),
            other => other,
        }
    }

    pub fn parameter_set(self: &Arc<Port>, param: &Parameter) -> Result<()> {
        let _state = self.state.lock();
        self.handlers.parameter_set(self, param)
    }

    fn core_parameter_get(&self, param: &mut Parameter) -> Result<()> {
        match param {
            Parameter::CoreStatistics { dir, reset, stats } => {
                let mut pair = self.stats.lock();
                **stats = pair.get(*dir);
                if *reset {
                    pair.reset(*dir);
                }
                Ok(())
            }
            Parameter::Module { .. } => {
                bail!(Status::Enosys, "not a core parameter")
            }
        }
    }

    /// `payload_alloc`/`payload_free` (spec §4.9): falls back to the general
    /// heap when the module doesn't provide its own allocator, and acquires
    /// the owning component for the payload's lifetime so the component
    /// can't be torn down while memory is outstanding.
    pub fn payload_alloc(self: &Arc<Port>, size: usize) -> Result<Payload> {
        let payload = self
            .handlers
            .payload_alloc(self, size)
            .unwrap_or_else(|| Payload(vec![0u8; size]));
        if let Some(component) = self.component() {
            component.acquire();
        }
        Ok(payload)
    }

    pub fn payload_free(self: &Arc<Port>, payload: Payload) {
        self.handlers.payload_free(self, payload);
        if let Some(component) = self.component() {
            component.release();
        }
    }

    pub(crate) fn record_stat(&self, dir: Direction) {
        #[cfg(feature = "stats")]
        {
            self.stats.lock().record(dir, std::time::Instant::now());
        }
        #[cfg(not(feature = "stats"))]
        {
            let _ = dir;
        }
    }

    pub fn stats(&self, dir: Direction) -> Counters {
        self.stats.lock().get(dir)
    }
}
