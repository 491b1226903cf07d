//! A reimplementation of the MMAL-style port core: the object that sits on
//! every input, output, and control endpoint of a media component and
//! mediates buffer-header flow between producers and consumers.
//!
//! A component owns its ports exclusively and drives them through the
//! [`Port`] methods; a [`Component`] implementation is the only thing this
//! crate expects the embedding application to supply (see [`testkit`] for a
//! minimal one). Two ports are joined with the free function [`port::connect`],
//! which tries each side's own connect handler before falling back to a
//! core-managed tunnel with a shared [`BufferPool`] and the forwarding
//! callbacks in [`port`].

mod capability;
mod component;
mod error;
mod format;
mod handlers;
mod naming;
mod parameter;
mod port;
mod stats;
mod transit;

pub mod buffer;

pub mod testkit;

pub use buffer::{Buffer, BufferFlags, BufferPool, EventCmd, EVENT_ERROR, EVENT_FORMAT_CHANGED, EVENT_PARAMETER_CHANGED};
pub use capability::Capability;
pub use component::Component;
pub use error::{PortError, Result, Status};
pub use format::{AudioFormat, Format, FormatHandle, FourCc, MediaType, Rational, Rect, Specific, SubpictureFormat, VideoFormat};
pub use handlers::{NullHandlers, Payload, PortHandlers};
pub use parameter::{Parameter, ParameterId};
pub use port::{connect, Port, PortType};
pub use stats::{Counters, Direction};
