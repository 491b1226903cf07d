use crate::buffer::Buffer;
use crate::error::{PortError, Result, Status};
use crate::parameter::Parameter;
use crate::port::Port;

/// Payload allocated by a module's `payload_alloc`, returned via
/// `payload_free`. Opaque to the core beyond its length.
pub struct Payload(pub Vec<u8>);

/// The per-port handler table a component module supplies (spec §2, §6).
///
/// Every method is optional: the default implementation reports `ENOSYS`,
/// exactly as the C vtable does when a function pointer is null. `connect`
/// is the one case where `ENOSYS` is not a failure but a request for the
/// core to manage the connection itself (spec §4.7).
pub trait PortHandlers: Send + Sync {
    fn set_format(&self, _port: &Port) -> Result<()> {
        Err(PortError::new("set_format not implemented", Status::Enosys))
    }

    fn enable(&self, _port: &Port) -> Result<()> {
        Err(PortError::new("enable not implemented", Status::Enosys))
    }

    fn disable(&self, _port: &Port) -> Result<()> {
        Err(PortError::new("disable not implemented", Status::Enosys))
    }

    fn send(&self, _port: &Port, _buffer: Buffer) -> Result<()> {
        Err(PortError::new("send not implemented", Status::Enosys))
    }

    fn flush(&self, _port: &Port) -> Result<()> {
        Err(PortError::new("flush not implemented", Status::Enosys))
    }

    /// Returning `Ok(())` means the module manages the connection itself;
    /// the default `ENOSYS` tells the core to manage it (allocate a pool,
    /// install forwarding callbacks).
    fn connect(&self, _port: &Port, _other: Option<&Port>) -> Result<()> {
        Err(PortError::new("connect not implemented", Status::Enosys))
    }

    fn parameter_get(&self, _port: &Port, _param: &mut Parameter) -> Result<()> {
        Err(PortError::new("parameter_get not implemented", Status::Enosys))
    }

    fn parameter_set(&self, _port: &Port, _param: &Parameter) -> Result<()> {
        Err(PortError::new("parameter_set not implemented", Status::Enosys))
    }

    fn payload_alloc(&self, _port: &Port, _size: usize) -> Option<Payload> {
        None
    }

    fn payload_free(&self, _port: &Port, _payload: Payload) {}
}

/// The trivial handler table: every operation reports `ENOSYS`, and
/// `connect` therefore always defers to the core. Useful for ports whose
/// component has nothing of its own to do (e.g. a null sink's input).
#[derive(Default)]
pub struct NullHandlers;

impl PortHandlers for NullHandlers {}
