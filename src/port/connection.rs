//! Connect, enable/disable, and the three core-owned forwarding callbacks
//! that make a tunnelled connection move buffers without client code in the
//! loop (spec §4.4, §4.5, §4.7).

use std::sync::Arc;

use log::{debug, trace, warn};

use crate::buffer::{Buffer, BufferPool, EVENT_FORMAT_CHANGED};
use crate::capability::Capability;
use crate::error::{bail, Result, Status};

use super::{Callback, Port, PortType};

/// Orders two ports by `Arc` address so any two call sites touching the
/// same pair of ports take their `op_lock`s in the same order.
fn ordered<'a>(a: &'a Arc<Port>, b: &'a Arc<Port>) -> (&'a Arc<Port>, &'a Arc<Port>) {
    if Arc::as_ptr(a) as usize <= Arc::as_ptr(b) as usize {
        (a, b)
    } else {
        (b, a)
    }
}

/// `connect(output, input)` (spec §4.7).
///
/// Calls the output's own `connect` handler first (a module that wants to
/// manage the connection itself, e.g. because it has a zero-copy path to
/// its peer's address space); only the output side is consulted, matching
/// spec §4.7's "calls the output's module connect" verbatim. If it reports
/// `ENOSYS` the core manages it: it allocates a pool sized from whichever
/// side advertises `ALLOCATION` and installs the forwarding callbacks wired
/// up in this module.
pub fn connect(output: &Arc<Port>, input: &Arc<Port>) -> Result<()> {
    if !matches!(output.port_type, PortType::Output) {
        bail!(Status::Einval, "connect's first argument must be an output port");
    }
    if !matches!(input.port_type, PortType::Input) {
        bail!(Status::Einval, "connect's second argument must be an input port");
    }

    let (first, second) = ordered(output, input);
    let _first_op = first.op_lock.lock();
    let _second_op = second.op_lock.lock();

    if output.is_connected() || input.is_connected() {
        bail!(Status::Eisconn, "port is already connected");
    }
    if output.is_enabled() || input.is_enabled() {
        bail!(Status::Einval, "cannot connect an enabled port");
    }

    let module_owns = match output.handlers.connect(output, Some(input.as_ref())) {
        Ok(()) => true,
        Err(e) if e.status() == Status::Enosys => false,
        Err(e) => return Err(e),
    };

    {
        let mut out_state = output.state.lock();
        out_state.connected_port = Some(Arc::downgrade(input));
        out_state.core_owns_connection = !module_owns;
    }
    {
        let mut in_state = input.state.lock();
        in_state.connected_port = Some(Arc::downgrade(output));
        in_state.core_owns_connection = !module_owns;
    }

    if !module_owns {
        // Buffer counts and sizes upgrade to whichever side asks for more
        // (spec §4.7); which side's numbers dominate doesn't matter, only
        // that both ends get at least what they asked for. The negotiated
        // values are written back onto both ports, not just used to size
        // the pool - a peer whose own buffer_num/size was smaller must see
        // the upgrade too (spec §4.3, testable scenario S3).
        let buffer_num_min = output.buffer_num_min().max(input.buffer_num_min());
        output.set_buffer_num_min_recommended(buffer_num_min, buffer_num_min);
        input.set_buffer_num_min_recommended(buffer_num_min, buffer_num_min);
        let count = output.buffer_num().max(input.buffer_num()).max(1);
        let size = output.buffer_size().max(input.buffer_size());
        output.set_buffer_num(count);
        input.set_buffer_num(count);
        output.set_buffer_size(size);
        input.set_buffer_size(size);

        // When only one side advertises `ALLOCATION` it owns the pool;
        // when both (or neither) do, the output side does, matching the
        // direction buffers naturally flow from.
        let output_allocates = output.capabilities().contains(Capability::ALLOCATION)
            || !input.capabilities().contains(Capability::ALLOCATION);
        output.set_allocate_pool(output_allocates);
        input.set_allocate_pool(!output_allocates);

        let pool = BufferPool::create(count, size as usize);

        // The callback closes over a `Weak` output port, not an `Arc`: the
        // pool lives in the port's own state, so capturing a strong
        // reference back to the port here would make the pair
        // uncollectable.
        let output_weak = Arc::downgrade(output);
        pool.callback_set(move |_pool, buffer| {
            if let Some(output) = output_weak.upgrade() {
                output.connected_pool_cb(buffer)
            } else {
                Some(buffer)
            }
        });

        // Spec §3 scopes this field "output side only" (Invariant 7): the
        // output is solely responsible for the pool's lifetime. `disable()`
        // looks it up via the peer link when called on the input side.
        output.state.lock().pool_for_connection = Some(pool);
    }

    debug!("connected {} -> {} (core_owns={})", output.name(), input.name(), !module_owns);
    Ok(())
}

impl Port {
    /// `disconnect(port)` (spec §4.7): tears down this port's connection,
    /// disabling either side first if needed, tearing down a core-owned
    /// pool, or asking a module-managed connection's handler to release it.
    pub fn disconnect(self: &Arc<Port>) -> Result<()> {
        let peer = self
            .connected_port()
            .ok_or_else(|| crate::error::PortError::new("port has no connection", Status::Enotconn))?;

        if self.is_enabled() {
            self.disable()?;
        }
        if peer.is_enabled() {
            peer.disable()?;
        }

        let (first, second) = ordered(self, &peer);
        let _first_op = first.op_lock.lock();
        let _second_op = second.op_lock.lock();

        let core_owns = self.state.lock().core_owns_connection;
        // Only the output side ever holds `pool_for_connection` (spec §3,
        // Invariant 7); take it from whichever of `self`/`peer` that is.
        let pool = self
            .state
            .lock()
            .pool_for_connection
            .take()
            .or_else(|| peer.state.lock().pool_for_connection.take());
        drop(pool);

        if !core_owns {
            self.handlers.connect(self, None)?;
        }

        self.state.lock().connected_port = None;
        peer.state.lock().connected_port = None;

        debug!("disconnected {} from {}", self.name(), peer.name());
        Ok(())
    }

    /// `enable(port, callback)` (spec §4.3-§4.4).
    ///
    /// A connected port ignores the client callback and installs the
    /// matching core-forwarding callback instead; see [`Port::enable_connected`].
    pub fn enable(
        self: &Arc<Port>,
        callback: Option<Arc<dyn Fn(&Arc<Port>, Buffer) + Send + Sync>>,
    ) -> Result<()> {
        let _op = self.op_lock.lock();

        if self.is_enabled() {
            bail!(Status::Einval, "port is already enabled");
        }

        let connected = self.is_connected();
        if connected == callback.is_some() {
            bail!(
                Status::Einval,
                "a connected port must not receive a client callback, and a disconnected one must"
            );
        }

        if connected {
            return self.enable_connected();
        }

        {
            let state = self.state.lock();
            if state.buffer_num < state.buffer_num_min || state.buffer_size < state.buffer_size_min {
                bail!(Status::Einval, "buffer_num/buffer_size below the port's minima");
            }
        }

        {
            let mut send = self.send_lock.lock();
            send.callback = callback.map(Callback::Client);
        }

        self.handlers.enable(self)?;
        self.send_lock.lock().is_enabled = true;
        trace!("port {} enabled", self.name());
        Ok(())
    }

    /// `enable_connected`: enables both ends of a tunnel together, installs
    /// the forwarding callbacks, and - for a core-owned connection - primes
    /// the downstream side's pool so the module sees buffers immediately.
    fn enable_connected(self: &Arc<Port>) -> Result<()> {
        let peer = self.connected_port().expect("enable_connected requires a peer");
        let (output, input) = match self.port_type {
            PortType::Output => (self.clone(), peer),
            _ => (peer, self.clone()),
        };

        {
            let mut send = output.send_lock.lock();
            if send.is_enabled {
                return Ok(());
            }
            send.callback = Some(Callback::ConnectedOutput);
        }
        {
            let mut send = input.send_lock.lock();
            send.callback = Some(Callback::ConnectedInput);
        }

        input.handlers.enable(&input)?;
        output.handlers.enable(&output)?;

        input.send_lock.lock().is_enabled = true;
        output.send_lock.lock().is_enabled = true;

        let core_owns = output.state.lock().core_owns_connection;
        if core_owns {
            if let Err(e) = output.populate_from_pool() {
                // Spec §4.3 step 6: undo both sides rather than leave a
                // half-primed connection marked enabled. This calls the
                // module `disable` hook directly instead of going through
                // the public `disable()` (which takes `op_lock` - already
                // held by whichever of `output`/`input` is `self` here).
                input.quiesce_after_failed_priming();
                output.quiesce_after_failed_priming();
                return Err(e);
            }
        }

        trace!("connection {} <-> {} enabled", output.name(), input.name());
        Ok(())
    }

    /// Best-effort rollback for a tunnel that got as far as the module
    /// `enable` call but failed before its pool could be primed: tells the
    /// module to quiesce and clears the flags `enable_connected` had just
    /// set, without the `op_lock`/transit-drain dance `disable()` does for
    /// an already-running port (nothing has been sent yet, so there is
    /// nothing in transit to drain).
    fn quiesce_after_failed_priming(self: &Arc<Port>) {
        let _ = self.handlers.disable(self);
        let mut send = self.send_lock.lock();
        send.is_enabled = false;
        send.callback = None;
    }

    /// `disable(port)` (spec §4.4): quiesces the module, waits for every
    /// buffer currently in transit to come back, then marks the port (and,
    /// for a tunnel, its peer) disabled.
    pub fn disable(self: &Arc<Port>) -> Result<()> {
        let _op = self.op_lock.lock();

        {
            let mut send = self.send_lock.lock();
            if !send.is_enabled {
                bail!(Status::Einval, "port is not enabled");
            }
            // Clear is_enabled up front (spec §4.4 step 2): this alone
            // guarantees no new send_buffer call proceeds past this point,
            // before the module has even been told to quiesce.
            send.is_enabled = false;
        }

        // Detach the core-owned pool's resubmission callback before the
        // module is told to quiesce, so a buffer that comes back mid-drain
        // goes straight to the pool's free list instead of being resent
        // into a port that now rejects every send (spec §4.4 step 3). Only
        // the output side ever holds `pool_for_connection` (spec §3,
        // Invariant 7); look it up via the peer when `self` is the input.
        let pool = self.state.lock().pool_for_connection.clone().or_else(|| {
            self.connected_port()
                .and_then(|peer| peer.state.lock().pool_for_connection.clone())
        });
        if let Some(pool) = pool {
            pool.callback_clear();
        }

        let disable_result = if let Some(component) = self.component() {
            component.action_lock();
            let _unlock = scopeguard::guard(component, |c| c.action_unlock());
            self.handlers.disable(self)
        } else {
            self.handlers.disable(self)
        };

        if let Err(e) = disable_result {
            // Spec §4.4 step 4: a failed module disable restores is_enabled.
            self.send_lock.lock().is_enabled = true;
            return Err(e);
        }

        self.transit.wait_drained();

        let mut send = self.send_lock.lock();
        send.callback = None;
        drop(send);

        // Only the output side cascades to its peer (spec §4.4 step 7):
        // disabling an input directly must not reach back upstream, both
        // because the spec only documents the downstream direction and
        // because doing it unconditionally would let two op_locks be
        // acquired in opposite orders by concurrent disables from either
        // end of the same connection.
        if matches!(self.port_type, PortType::Output) {
            if let Some(peer) = self.connected_port() {
                if peer.is_enabled() {
                    peer.disable()?;
                }
            }
        }

        trace!("port {} disabled", self.name());
        Ok(())
    }

    /// Fills the core-owned connection's pool and hands exactly
    /// `output.buffer_num` buffers to the input side (spec §4.8), so a
    /// freshly-enabled tunnel starts with a full pipe rather than waiting on
    /// the output module to produce data before the input module has
    /// anywhere to put its output.
    fn populate_from_pool(self: &Arc<Port>) -> Result<()> {
        let pool = self
            .state
            .lock()
            .pool_for_connection
            .clone()
            .ok_or_else(|| crate::buffer::enomem("core-owned connection has no pool"))?;

        let peer = self.connected_port().expect("populate_from_pool requires a peer");
        let count = self.buffer_num();

        let mut buffers = Vec::with_capacity(count as usize);
        for _ in 0..count {
            match pool.get() {
                Some(buffer) => buffers.push(buffer),
                None => {
                    for leftover in buffers {
                        leftover.release();
                    }
                    return Err(crate::buffer::enomem("pool has fewer buffers than output.buffer_num"));
                }
            }
        }

        let mut buffers = buffers.into_iter();
        for buffer in &mut buffers {
            if let Err(rejected) = peer.try_send_buffer(buffer) {
                // Whatever `try_send_buffer` handed back (if the module
                // never took ownership of it) plus every buffer still
                // waiting in the iterator must go back to the pool's
                // free-list, not be silently dropped with the early return.
                if let Some(buffer) = rejected.buffer {
                    buffer.release();
                }
                for leftover in buffers {
                    leftover.release();
                }
                return Err(rejected.error);
            }
        }

        trace!("primed {} with {} buffers", peer.name(), count);
        Ok(())
    }

    /// The core-installed completion callback for the input side of a
    /// tunnelled connection: the module is done with the buffer, so it just
    /// goes back to the pool (spec §4.7).
    pub(super) fn connected_input_cb(self: &Arc<Port>, buffer: Buffer) {
        buffer.release();
    }

    /// The core-installed completion callback for the output side: a normal
    /// buffer is forwarded straight to the connected input; a
    /// `FORMAT_CHANGED` event triggers a `format_commit` on the input side
    /// before forwarding (or, on failure, an error event) instead.
    pub(super) fn connected_output_cb(self: &Arc<Port>, buffer: Buffer) {
        let peer = match self.connected_port() {
            Some(p) => p,
            None => {
                buffer.release();
                return;
            }
        };

        if buffer.cmd == EVENT_FORMAT_CHANGED {
            peer.format_handle().full_copy_from(&self.format_handle());
            if let Err(e) = peer.format_commit() {
                warn!("format_commit failed while forwarding FORMAT_CHANGED: {}", e);
                if let Some(component) = peer.component() {
                    component.emit_error_event(e.status());
                }
                buffer.release();
                return;
            }
        }

        if let Err(e) = peer.send_buffer(buffer) {
            warn!("forwarding buffer to {} failed: {}", peer.name(), e);
        }
    }

    /// The callback installed on a core-owned connection's pool: resets a
    /// consumed buffer's header and resubmits it upstream so the output
    /// module always has something to fill (spec §4.7).
    ///
    /// Either way the buffer has left the pool's free-list by the time
    /// `send` is called, so this always returns `None`: on success it's now
    /// in transit to the output module, and on failure there's nothing
    /// left to hand back since `send` took it by value.
    pub(crate) fn connected_pool_cb(self: &Arc<Port>, mut buffer: Buffer) -> Option<Buffer> {
        buffer.reset_header();
        if let Err(e) = self.send_buffer(buffer) {
            warn!("resubmitting buffer to {} failed: {}", self.name(), e);
        }
        None
    }
}
