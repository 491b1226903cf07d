//! Minimal [`Component`] and [`PortHandlers`] implementations for testing
//! the port core end to end without a real media component behind it.
//!
//! Not part of the port core's own operation - nothing here is reachable
//! from [`crate::port`] - but every integration test in this crate, and any
//! downstream integrator exercising its own handlers against a fake peer,
//! builds on top of it.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::buffer::{Buffer, BufferPool};
use crate::component::Component;
use crate::error::{PortError, Result, Status};
use crate::handlers::Payload;
use crate::handlers::PortHandlers;
use crate::port::Port;

/// A component with no behaviour of its own beyond what [`Component`]
/// requires: action-lock bookkeeping, a payload refcount, and an event
/// pool. Stands in for whatever a real codec/camera/renderer component
/// would supply.
pub struct TestComponent {
    name: String,
    event_pool: Arc<BufferPool>,
    action_locked: AtomicBool,
    payloads_outstanding: AtomicU32,
    errors_seen: Mutex<Vec<Status>>,
    outputs: Mutex<Vec<Arc<Port>>>,
}

impl TestComponent {
    pub fn new(name: impl Into<String>) -> Arc<TestComponent> {
        Arc::new(TestComponent {
            name: name.into(),
            event_pool: BufferPool::create(4, 256),
            action_locked: AtomicBool::new(false),
            payloads_outstanding: AtomicU32::new(0),
            errors_seen: Mutex::new(Vec::new()),
            outputs: Mutex::new(Vec::new()),
        })
    }

    pub fn payloads_outstanding(&self) -> u32 {
        self.payloads_outstanding.load(Ordering::SeqCst)
    }

    pub fn errors_seen(&self) -> Vec<Status> {
        self.errors_seen.lock().clone()
    }

    /// Registers an output port so `format_commit` on one of this
    /// component's inputs will find it via [`Component::output_ports`]
    /// (spec §4.2's "repeats the clamp for every output of the same
    /// component"). `Port::alloc` has no hook back into its component to do
    /// this automatically, since the core has no opinion on whether a real
    /// integration tracks its ports in a `Vec`, a fixed-size array, or
    /// something else entirely.
    pub fn register_output(&self, port: Arc<Port>) {
        self.outputs.lock().push(port);
    }
}

impl Component for TestComponent {
    fn action_lock(&self) {
        self.action_locked.store(true, Ordering::SeqCst);
    }

    fn action_unlock(&self) {
        self.action_locked.store(false, Ordering::SeqCst);
    }

    fn acquire(&self) {
        self.payloads_outstanding.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self) {
        self.payloads_outstanding.fetch_sub(1, Ordering::SeqCst);
    }

    fn event_pool(&self) -> &BufferPool {
        &self.event_pool
    }

    fn emit_error_event(&self, status: Status) {
        self.errors_seen.lock().push(status);
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn output_ports(&self) -> Vec<Arc<Port>> {
        self.outputs.lock().clone()
    }
}

/// A handler table that immediately completes every buffer it's sent by
/// calling back into [`Port::complete_buffer`], as a real module's worker
/// thread would once it's done with a buffer. `set_format`, `enable`, and
/// `disable` all succeed unconditionally; `connect` always defers to the
/// core (default `ENOSYS`).
#[derive(Default)]
pub struct EchoHandlers {
    fail_set_format: AtomicBool,
}

impl EchoHandlers {
    pub fn new() -> EchoHandlers {
        EchoHandlers::default()
    }

    /// Makes the next (and every subsequent) `set_format` call fail, for
    /// exercising the format-change error path.
    pub fn fail_next_set_format(&self) {
        self.fail_set_format.store(true, Ordering::SeqCst);
    }
}

impl PortHandlers for EchoHandlers {
    fn set_format(&self, _port: &Port) -> Result<()> {
        if self.fail_set_format.load(Ordering::SeqCst) {
            return Err(PortError::new("rejected by test handler", Status::Einval));
        }
        Ok(())
    }

    fn enable(&self, _port: &Port) -> Result<()> {
        Ok(())
    }

    fn disable(&self, _port: &Port) -> Result<()> {
        Ok(())
    }

    fn send(&self, port: &Port, buffer: Buffer) -> Result<()> {
        port.handle().complete_buffer(buffer);
        Ok(())
    }

    fn flush(&self, _port: &Port) -> Result<()> {
        Ok(())
    }

    fn payload_alloc(&self, _port: &Port, size: usize) -> Option<Payload> {
        Some(Payload(vec![0u8; size]))
    }

    fn payload_free(&self, _port: &Port, _payload: Payload) {}
}

/// A handler table that records every buffer it's sent without completing
/// it, as a module busy processing (or a test observing) would look from
/// the core's side. Useful on the receiving end of a core-owned connection,
/// where an [`EchoHandlers`] peer would otherwise bounce a buffer back and
/// forth forever.
#[derive(Default)]
pub struct RecordingHandlers {
    received: Mutex<Vec<Buffer>>,
    fail_set_format: AtomicBool,
}

impl RecordingHandlers {
    pub fn new() -> RecordingHandlers {
        RecordingHandlers::default()
    }

    pub fn received_count(&self) -> usize {
        self.received.lock().len()
    }

    /// Pops the oldest recorded buffer, for tests that simulate the module
    /// finishing with it by feeding it back through `Port::complete_buffer`.
    pub fn take_one(&self) -> Option<Buffer> {
        let mut received = self.received.lock();
        if received.is_empty() {
            None
        } else {
            Some(received.remove(0))
        }
    }

    /// Makes the next (and every subsequent) `set_format` call fail, for
    /// exercising the format-change error path without the auto-completing
    /// [`EchoHandlers`] on the receiving end of a core-owned connection.
    pub fn fail_next_set_format(&self) {
        self.fail_set_format.store(true, Ordering::SeqCst);
    }
}

/// A handler table whose `connect` always succeeds, modelling a module that
/// manages its own connection (e.g. because both components live in the
/// same address space and can share memory without the core's pool) rather
/// than deferring to the core's tunnelling machinery.
#[derive(Default)]
pub struct ModuleManagedHandlers;

impl ModuleManagedHandlers {
    pub fn new() -> ModuleManagedHandlers {
        ModuleManagedHandlers
    }
}

impl PortHandlers for ModuleManagedHandlers {
    fn connect(&self, _port: &Port, _other: Option<&Port>) -> Result<()> {
        Ok(())
    }

    fn enable(&self, _port: &Port) -> Result<()> {
        Ok(())
    }

    fn disable(&self, _port: &Port) -> Result<()> {
        Ok(())
    }
}

impl PortHandlers for RecordingHandlers {
    fn set_format(&self, _port: &Port) -> Result<()> {
        if self.fail_set_format.load(Ordering::SeqCst) {
            return Err(PortError::new("rejected by test handler", Status::Einval));
        }
        Ok(())
    }

    fn enable(&self, _port: &Port) -> Result<()> {
        Ok(())
    }

    fn disable(&self, _port: &Port) -> Result<()> {
        Ok(())
    }

    fn send(&self, _port: &Port, buffer: Buffer) -> Result<()> {
        self.received.lock().push(buffer);
        Ok(())
    }

    fn flush(&self, _port: &Port) -> Result<()> {
        self.received.lock().clear();
        Ok(())
    }
}
