//! The data path: `send_buffer`, buffer-header completion, and event
//! buffers (spec §4.3, §4.9).

use std::sync::Arc;

use log::trace;

use crate::buffer::{Buffer, BufferFlags, EventCmd, EVENT_FORMAT_CHANGED};
use crate::capability::Capability;
use crate::error::{bail, Result, Status};
use crate::stats::Direction;

use super::{Callback, Port};

/// The outcome of [`Port::try_send_buffer`]: unlike the public
/// `send_buffer`, a rejection that happens before the buffer is handed to
/// the module hands the buffer straight back instead of dropping it, so an
/// internal caller priming several buffers at once (see
/// [`Port::populate_from_pool`]) can release whichever ones never made it
/// to the pool's free-list, rather than leaking them.
pub(crate) struct SendRejected {
    pub error: crate::error::PortError,
    pub buffer: Option<Buffer>,
}

impl Port {
    /// `send_buffer(port, buffer)` (spec §4.3).
    ///
    /// A `PASSTHROUGH` port is allowed to send headers with no backing
    /// payload; every other port must send a buffer that actually carries
    /// memory. The transit counter brackets the handler call so `disable`
    /// can observe exactly how many buffers are currently out with the
    /// module.
    pub fn send_buffer(self: &Arc<Port>, buffer: Buffer) -> Result<()> {
        self.try_send_buffer(buffer).map_err(|rejected| rejected.error)
    }

    /// Does the actual work of `send_buffer`, but returns the buffer itself
    /// alongside the error when rejection happens before the module ever
    /// saw it (not enabled, or no payload on a non-`PASSTHROUGH` port). Once
    /// the buffer has been handed to `self.handlers.send`, the module owns
    /// it and a failure from there can't hand it back.
    pub(crate) fn try_send_buffer(
        self: &Arc<Port>,
        mut buffer: Buffer,
    ) -> std::result::Result<(), SendRejected> {
        if !buffer.has_data() && !self.capabilities().contains(Capability::PASSTHROUGH) {
            return Err(SendRejected {
                error: crate::error::PortError::new(
                    "buffer has no payload and port is not PASSTHROUGH",
                    Status::Einval,
                ),
                buffer: Some(buffer),
            });
        }

        let send = self.send_lock.lock();
        if !send.is_enabled {
            drop(send);
            return Err(SendRejected {
                error: crate::error::PortError::new("port is not enabled", Status::Einval),
                buffer: Some(buffer),
            });
        }
        drop(send);

        // Outputs are handed empty buffers to fill, never leftover data from
        // a previous pass (spec §4.5).
        if matches!(self.port_type, super::PortType::Output) && buffer.length != 0 {
            buffer.length = 0;
        }

        self.transit.increment();
        let result = self.handlers.send(self, buffer);
        if let Err(error) = result {
            self.transit.decrement();
            return Err(SendRejected { error, buffer: None });
        }

        self.record_stat(Direction::Rx);

        Ok(())
    }

    /// `complete_buffer(port, buffer)`: invoked by a module (or, for a
    /// connected port, the core's own forwarding callback) when it's done
    /// with a buffer handed to it by `send_buffer`. Dispatches to whichever
    /// callback is currently installed and closes the transit window that
    /// `send_buffer` opened.
    ///
    /// Stats direction is tied to which operation ran, not the port's own
    /// type (spec §4.5: `send_buffer` always bumps RX, the completion path
    /// always bumps TX). A buffer handed to a module is "received" by it,
    /// and one handed back is "transmitted", whichever side of a connection
    /// the port sits on.
    pub fn complete_buffer(self: &Arc<Port>, buffer: Buffer) {
        self.transit.decrement();
        self.record_stat(Direction::Tx);

        if let Some(buffer) = self.dispatch_callback(buffer) {
            trace!("port {} completed a buffer with no callback installed", self.name());
            drop(buffer);
        }
    }

    /// Looks up the currently installed callback; if one is installed, runs
    /// it to completion and returns `None`. If none is installed, the
    /// buffer is handed back to the caller instead of being silently
    /// dropped, so [`Port::event_send`] can release it to its pool the way
    /// spec §4.5 requires while [`Port::complete_buffer`] just traces it.
    fn dispatch_callback(self: &Arc<Port>, buffer: Buffer) -> Option<Buffer> {
        enum Installed {
            Client(Arc<dyn Fn(&Arc<Port>, Buffer) + Send + Sync>),
            ConnectedInput,
            ConnectedOutput,
            None,
        }

        let installed = match &self.send_lock.lock().callback {
            Some(Callback::Client(cb)) => Installed::Client(cb.clone()),
            Some(Callback::ConnectedInput) => Installed::ConnectedInput,
            Some(Callback::ConnectedOutput) => Installed::ConnectedOutput,
            None => Installed::None,
        };

        match installed {
            Installed::Client(cb) => {
                cb(self, buffer);
                None
            }
            Installed::ConnectedInput => {
                self.connected_input_cb(buffer);
                None
            }
            Installed::ConnectedOutput => {
                self.connected_output_cb(buffer);
                None
            }
            Installed::None => Some(buffer),
        }
    }

    /// `event_get(port, length)` (spec §4.9): draws an event buffer from the
    /// owning component's event pool, stamps its command, and size-checks
    /// `FORMAT_CHANGED` events against the format descriptor they carry.
    pub fn event_get(self: &Arc<Port>, cmd: EventCmd, length: usize) -> Result<Buffer> {
        let component = self
            .component()
            .ok_or_else(|| crate::buffer::enomem("component gone"))?;

        if cmd == EVENT_FORMAT_CHANGED && length < std::mem::size_of::<crate::format::Format>() {
            bail!(Status::Enospc, "FORMAT_CHANGED event buffer too small");
        }

        let mut buffer = match component.event_pool().get() {
            Some(buffer) => buffer,
            None => bail!(Status::Enospc, "event pool exhausted"),
        };
        buffer.cmd = cmd;
        buffer.flags = BufferFlags::empty();
        Ok(buffer)
    }

    /// `event_send(port, buffer)` (spec §4.5): the same dispatch
    /// `complete_buffer` runs, but without a transit decrement (an event
    /// buffer never went through `send_buffer`) and tolerating a missing
    /// callback by releasing the buffer back to its pool instead of just
    /// tracing it away.
    pub fn event_send(self: &Arc<Port>, buffer: Buffer) -> Result<()> {
        if !buffer.is_event() {
            bail!(Status::Einval, "not an event buffer");
        }
        if let Some(buffer) = self.dispatch_callback(buffer) {
            buffer.release();
        }
        Ok(())
    }
}
