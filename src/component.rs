use std::sync::Arc;

use crate::buffer::BufferPool;
use crate::error::Status;
use crate::port::Port;

/// External collaborator the port core consumes for component-level
/// lifecycle and action-locking (spec §6, "out of scope: component
/// lifecycle and action-locking, consumed as an interface").
///
/// A real integration implements this once per component and hands each of
/// its ports a `Weak` reference back to it; [`crate::testkit`] has a minimal
/// implementation used by this crate's own tests.
pub trait Component: Send + Sync {
    /// Quiesces the component's internal worker for the duration of the
    /// call; `disable` holds this around the module's `disable` handler
    /// (spec §4.4 step 3).
    fn action_lock(&self);
    fn action_unlock(&self);

    /// Reference-counts outstanding payload allocations so the component
    /// cannot be torn down while client code still holds port-allocated
    /// memory (spec §4.9).
    fn acquire(&self);
    fn release(&self);

    /// Pool `event_get` draws event buffers from.
    fn event_pool(&self) -> &BufferPool;

    /// `mmal_event_error_send`: raises a component-level error event,
    /// e.g. when a core-forwarded format change fails to commit (spec §4.7).
    fn emit_error_event(&self, status: Status);

    /// Used to compose port names (spec §4.9).
    fn name(&self) -> &str;

    /// Every output port belonging to this component, so that committing an
    /// input's format can clamp their buffer minima too (spec §4.2: "if the
    /// port is an input, repeats the clamp for every output of the same
    /// component - inputs drive outputs"). Defaults to empty for components
    /// with no outputs, or that don't need this propagation (e.g. the
    /// minimal fixtures in [`crate::testkit`] that don't exercise it).
    fn output_ports(&self) -> Vec<Arc<Port>> {
        Vec::new()
    }
}
