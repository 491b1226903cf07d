use std::sync::Arc;

use portcore::testkit::{EchoHandlers, ModuleManagedHandlers, RecordingHandlers, TestComponent};
use portcore::{
    connect, Buffer, Capability, Component, Direction, Format, FormatHandle, FourCc, MediaType,
    Parameter, ParameterId, Port, PortType, Status,
};

fn test_port(component: &Arc<dyn Component>, port_type: PortType, index: u32) -> Arc<Port> {
    Port::alloc(component, port_type, index, Arc::new(EchoHandlers::new())).unwrap()
}

/// A callback for enabling a disconnected port in tests that don't care
/// about completions themselves (spec §4.3's `(connected_port == null) XOR
/// (cb == null)` requires a disconnected port to be given one).
fn noop_cb() -> Option<Arc<dyn Fn(&Arc<Port>, Buffer) + Send + Sync>> {
    Some(Arc::new(|_port: &Arc<Port>, _buffer: Buffer| {}))
}

/// S1: a simple send completes and is visible in both the Rx and Tx
/// statistics - `send_buffer` bumps Rx, the completion path bumps Tx,
/// regardless of which side of the port this is (spec §4.5).
#[test]
fn send_completes_and_records_stats() {
    let component: Arc<dyn Component> = TestComponent::new("source");
    let port = test_port(&component, PortType::Output, 0);

    port.enable(noop_cb()).unwrap();
    for _ in 0..4 {
        port.send_buffer(Buffer::with_capacity(16)).unwrap();
    }

    assert_eq!(port.stats(Direction::Tx).buffer_count, 4);
    assert_eq!(port.stats(Direction::Rx).buffer_count, 4);
}

/// Sending into a disabled port is rejected outright.
#[test]
fn send_on_disabled_port_is_rejected() {
    let component: Arc<dyn Component> = TestComponent::new("source");
    let port = test_port(&component, PortType::Output, 0);

    let err = port.send_buffer(Buffer::with_capacity(16)).unwrap_err();
    assert_eq!(err.status(), Status::Einval);
}

/// disable() blocks until every buffer the module is holding comes back,
/// and returns immediately once it does.
#[test]
fn disable_drains_in_flight_buffers() {
    let component: Arc<dyn Component> = TestComponent::new("source");
    let port = test_port(&component, PortType::Output, 0);
    port.enable(noop_cb()).unwrap();

    port.send_buffer(Buffer::with_capacity(16)).unwrap();
    assert_eq!(port.stats(Direction::Tx).buffer_count, 1);

    // EchoHandlers completes synchronously, so by the time send_buffer
    // returns the transit count is already back to zero and disable is
    // immediate.
    port.disable().unwrap();
    assert!(!port.is_enabled());
}

/// A core-owned connection primes the input side with the connection's
/// pool as soon as it's enabled, without either module calling the other
/// directly.
///
/// The input side uses `RecordingHandlers` rather than `EchoHandlers`: a
/// module that completed buffers synchronously would have them bounce
/// straight back through the core-owned pool's resubmission callback
/// forever, which is a property of the test harness's synchronous
/// handlers, not of the port core itself.
#[test]
fn core_owned_connection_primes_the_input_side() {
    let component: Arc<dyn Component> = TestComponent::new("pipeline");
    let output = Port::alloc(&component, PortType::Output, 0, Arc::new(EchoHandlers::new())).unwrap();
    let input_handlers = Arc::new(RecordingHandlers::new());
    let input = Port::alloc(&component, PortType::Input, 0, input_handlers.clone()).unwrap();

    output.set_buffer_num_min_recommended(2, 2);
    output.set_buffer_size_min_recommended(16, 16);
    input.set_buffer_num_min_recommended(2, 2);

    connect(&output, &input).unwrap();
    assert!(output.is_connected());
    assert!(input.is_connected());

    output.enable(None).unwrap();

    assert_eq!(input_handlers.received_count(), 2);
    assert_eq!(input.stats(Direction::Rx).buffer_count, 2);
}

/// S3: connecting a larger output to a smaller input upgrades the input's
/// own `buffer_num`/`buffer_size` to match, not just the pool's sizing -
/// both ports must observe the negotiated values afterwards (spec §4.3).
#[test]
fn connect_upgrades_the_smaller_sides_buffer_num_and_size() {
    let component: Arc<dyn Component> = TestComponent::new("pipeline");
    let output = test_port(&component, PortType::Output, 0);
    let input = test_port(&component, PortType::Input, 0);

    output.set_buffer_num_min_recommended(4, 4);
    output.set_buffer_size_min_recommended(1024, 1024);
    input.set_buffer_num_min_recommended(2, 2);
    input.set_buffer_size_min_recommended(512, 512);

    connect(&output, &input).unwrap();

    assert_eq!(output.buffer_num(), 4);
    assert_eq!(output.buffer_size(), 1024);
    assert_eq!(input.buffer_num(), 4);
    assert_eq!(input.buffer_size(), 1024);
}

/// Connecting an already-connected port is rejected.
#[test]
fn double_connect_is_rejected() {
    let component: Arc<dyn Component> = TestComponent::new("pipeline");
    let output = test_port(&component, PortType::Output, 0);
    let input = test_port(&component, PortType::Input, 0);
    let other_input = test_port(&component, PortType::Input, 1);

    connect(&output, &input).unwrap();
    let err = connect(&output, &other_input).unwrap_err();
    assert_eq!(err.status(), Status::Eisconn);
}

/// Connecting an already-enabled port is rejected.
#[test]
fn connect_while_enabled_is_rejected() {
    let component: Arc<dyn Component> = TestComponent::new("pipeline");
    let output = test_port(&component, PortType::Output, 0);
    let input = test_port(&component, PortType::Input, 0);

    output.enable(noop_cb()).unwrap();
    let err = connect(&output, &input).unwrap_err();
    assert_eq!(err.status(), Status::Einval);
}

/// A format change on the output side of a core-owned connection
/// propagates to the input side via `format_commit`.
///
/// The input side uses `RecordingHandlers`, not `EchoHandlers`: an
/// auto-completing peer would otherwise bounce the priming buffers
/// `enable` hands it straight back through the pool's resubmission
/// callback forever, which is a property of a synchronous test handler,
/// not of the port core.
#[test]
fn format_change_propagates_across_a_connection() {
    let component: Arc<dyn Component> = TestComponent::new("pipeline");
    let output = test_port(&component, PortType::Output, 0);
    let input = Port::alloc(&component, PortType::Input, 0, Arc::new(RecordingHandlers::new())).unwrap();
    connect(&output, &input).unwrap();

    output.format_handle().with_mut(|f| {
        f.media_type = MediaType::Video;
        f.encoding = FourCc::new(*b"JPEG");
    });
    output.format_commit().unwrap();

    output.enable(None).unwrap();

    let mut event = output.event_get(portcore::EVENT_FORMAT_CHANGED, 4096).unwrap();
    event.length = event.capacity();
    output.complete_buffer(event);

    assert_eq!(
        input.format_handle().with(|f| f.encoding),
        FourCc::new(*b"JPEG")
    );
}

/// A failing `set_format` during a forwarded format change raises a
/// component-level error event rather than panicking or hanging.
#[test]
fn failed_format_commit_emits_an_error_event() {
    let component = TestComponent::new("pipeline");
    let component_dyn: Arc<dyn Component> = component.clone();
    let output = test_port(&component_dyn, PortType::Output, 0);

    let input_handlers = Arc::new(RecordingHandlers::new());
    input_handlers.fail_next_set_format();
    let input = Port::alloc(&component_dyn, PortType::Input, 0, input_handlers).unwrap();

    connect(&output, &input).unwrap();
    output.enable(None).unwrap();

    let mut event = output.event_get(portcore::EVENT_FORMAT_CHANGED, 4096).unwrap();
    event.length = event.capacity();
    output.complete_buffer(event);

    assert_eq!(component.errors_seen(), vec![Status::Einval]);
}

/// The core recognises `CORE_STATISTICS` directly, without involving the
/// module's own `parameter_get`.
#[test]
fn core_statistics_parameter_reads_through_the_core() {
    let component: Arc<dyn Component> = TestComponent::new("source");
    let port = test_port(&component, PortType::Output, 0);
    port.enable(noop_cb()).unwrap();
    port.send_buffer(Buffer::with_capacity(8)).unwrap();

    let mut counters = Default::default();
    let mut param = Parameter::CoreStatistics {
        dir: Direction::Tx,
        reset: false,
        stats: &mut counters,
    };
    assert_eq!(param.id(), ParameterId::CoreStatistics);
    port.parameter_get(&mut param).unwrap();
    assert_eq!(counters.buffer_count, 1);
}

#[test]
fn passthrough_port_accepts_buffers_with_no_payload() {
    let component: Arc<dyn Component> = TestComponent::new("source");
    let port = test_port(&component, PortType::Output, 0);
    port.set_capabilities(Capability::PASSTHROUGH);
    port.enable(noop_cb()).unwrap();

    port.send_buffer(Buffer::passthrough()).unwrap();
}

#[test]
fn format_handle_same_allocation_survives_a_clean_commit() {
    let component: Arc<dyn Component> = TestComponent::new("source");
    let port = test_port(&component, PortType::Output, 0);
    let before: FormatHandle = port.format_handle();

    port.format_commit().unwrap();

    assert!(before.same_allocation(&port.format_handle()));
    let _ = Format::default();
}

/// Committing an input's format also clamps every registered output of the
/// same component to its own buffer minima (spec §4.2, testable property 5:
/// "inputs drive outputs").
#[test]
fn format_commit_on_input_clamps_every_output_of_the_component() {
    let component = TestComponent::new("pipeline");
    let component_dyn: Arc<dyn Component> = component.clone();

    let output = test_port(&component_dyn, PortType::Output, 0);
    output.set_buffer_num_min_recommended(4, 4);
    output.set_buffer_size_min_recommended(2048, 2048);
    // Force the output below its own minima, as if it had never been
    // committed since those minima were raised.
    output.set_buffer_num(1);
    output.set_buffer_size(64);
    component.register_output(output.clone());

    let input = test_port(&component_dyn, PortType::Input, 0);
    input.format_commit().unwrap();

    assert_eq!(output.buffer_num(), 4);
    assert_eq!(output.buffer_size(), 2048);
}

/// disconnect() clears the connection on both sides and the pair can be
/// reconnected (or connected to new peers) afterwards.
#[test]
fn disconnect_clears_both_sides() {
    let component: Arc<dyn Component> = TestComponent::new("pipeline");
    let output = test_port(&component, PortType::Output, 0);
    let input = test_port(&component, PortType::Input, 0);

    connect(&output, &input).unwrap();
    assert!(output.is_connected());
    assert!(input.is_connected());

    output.disconnect().unwrap();
    assert!(!output.is_connected());
    assert!(!input.is_connected());

    let other_input = test_port(&component, PortType::Input, 1);
    connect(&output, &other_input).unwrap();
    assert!(output.is_connected());
}

/// A module whose `connect` handler succeeds manages the connection itself;
/// the core does not claim pool ownership on either side.
#[test]
fn module_managed_connect_bypasses_core_pool_ownership() {
    let component: Arc<dyn Component> = TestComponent::new("pipeline");
    let output = Port::alloc(&component, PortType::Output, 0, Arc::new(ModuleManagedHandlers::new())).unwrap();
    let input = Port::alloc(&component, PortType::Input, 0, Arc::new(ModuleManagedHandlers::new())).unwrap();

    connect(&output, &input).unwrap();

    assert!(output.is_connected());
    assert!(input.is_connected());
    assert!(!output.allocate_pool());
    assert!(!input.allocate_pool());
}

/// flush() delegates to the module and, for a recording handler, clears
/// whatever it had buffered.
#[test]
fn flush_clears_buffered_state() {
    let component: Arc<dyn Component> = TestComponent::new("source");
    let handlers = Arc::new(RecordingHandlers::new());
    let port = Port::alloc(&component, PortType::Output, 0, handlers.clone()).unwrap();

    port.enable(noop_cb()).unwrap();
    port.send_buffer(Buffer::with_capacity(16)).unwrap();
    assert_eq!(handlers.received_count(), 1);

    port.flush().unwrap();
    assert_eq!(handlers.received_count(), 0);
}

/// payload_alloc acquires the owning component for the payload's lifetime;
/// payload_free releases it.
#[test]
fn payload_alloc_and_free_track_the_component_refcount() {
    let component = TestComponent::new("source");
    let component_dyn: Arc<dyn Component> = component.clone();
    let port = test_port(&component_dyn, PortType::Output, 0);

    assert_eq!(component.payloads_outstanding(), 0);
    let payload = port.payload_alloc(64).unwrap();
    assert_eq!(component.payloads_outstanding(), 1);
    assert_eq!(payload.0.len(), 64);

    port.payload_free(payload);
    assert_eq!(component.payloads_outstanding(), 0);
}

/// event_get on an exhausted event pool reports ENOSPC, not the general
/// pool-exhaustion ENOMEM (spec §7's error table distinguishes them).
#[test]
fn event_get_on_an_exhausted_pool_is_enospc() {
    let component = TestComponent::new("source");
    let component_dyn: Arc<dyn Component> = component.clone();
    let port = test_port(&component_dyn, PortType::Output, 0);

    let drained: Vec<_> = std::iter::from_fn(|| component.event_pool().get()).collect();
    assert!(!drained.is_empty());

    let err = port.event_get(portcore::EVENT_PARAMETER_CHANGED, 64).unwrap_err();
    assert_eq!(err.status(), Status::Enospc);
}

/// event_send with no callback installed releases the event buffer back to
/// its pool instead of leaking it or requiring a connected peer.
#[test]
fn event_send_with_no_callback_releases_to_pool() {
    let component = TestComponent::new("source");
    let component_dyn: Arc<dyn Component> = component.clone();
    let port = test_port(&component_dyn, PortType::Output, 0);

    let before = component.event_pool().len();
    let event = port.event_get(portcore::EVENT_PARAMETER_CHANGED, 64).unwrap();
    assert_eq!(component.event_pool().len(), before - 1);

    port.event_send(event).unwrap();
    assert_eq!(component.event_pool().len(), before);
}

/// event_send with a client callback installed dispatches to it instead of
/// releasing the buffer, exactly like a completed data buffer would.
#[test]
fn event_send_dispatches_to_the_installed_callback() {
    use std::sync::atomic::{AtomicU32, Ordering};

    let component: Arc<dyn Component> = TestComponent::new("source");
    let port = test_port(&component, PortType::Output, 0);

    let seen_cmd = Arc::new(AtomicU32::new(0));
    let seen_cmd2 = seen_cmd.clone();
    port.enable(Some(Arc::new(move |_port: &Arc<Port>, buffer: Buffer| {
        seen_cmd2.store(buffer.cmd, Ordering::SeqCst);
    })))
    .unwrap();

    let event = port.event_get(portcore::EVENT_PARAMETER_CHANGED, 64).unwrap();
    port.event_send(event).unwrap();

    assert_eq!(seen_cmd.load(Ordering::SeqCst), portcore::EVENT_PARAMETER_CHANGED);
}

/// `disable` clears `is_enabled` before it starts waiting on the drain
/// gate, so a send racing against an in-progress disable sees the port
/// already disabled rather than slipping in while the drain is pending
/// (spec §4.4 step 2).
#[test]
fn disable_rejects_new_sends_before_the_drain_completes() {
    let component: Arc<dyn Component> = TestComponent::new("source");
    let handlers = Arc::new(RecordingHandlers::new());
    let port = Port::alloc(&component, PortType::Output, 0, handlers.clone()).unwrap();

    port.enable(noop_cb()).unwrap();
    port.send_buffer(Buffer::with_capacity(16)).unwrap();
    assert_eq!(handlers.received_count(), 1);

    let disabling_port = port.clone();
    let disabling = std::thread::spawn(move || disabling_port.disable());

    std::thread::sleep(std::time::Duration::from_millis(50));
    let err = port.send_buffer(Buffer::with_capacity(16)).unwrap_err();
    assert_eq!(err.status(), Status::Einval);

    let outstanding = handlers.take_one().unwrap();
    port.complete_buffer(outstanding);

    disabling.join().unwrap().unwrap();
    assert!(!port.is_enabled());
}

/// `populate_from_pool` aborts with `ENOMEM` instead of silently priming
/// fewer buffers than `output.buffer_num` calls for (spec §4.8).
#[test]
fn enable_connected_fails_when_the_pool_is_shorter_than_buffer_num() {
    let component: Arc<dyn Component> = TestComponent::new("pipeline");
    let output = test_port(&component, PortType::Output, 0);
    let input_handlers = Arc::new(RecordingHandlers::new());
    let input = Port::alloc(&component, PortType::Input, 0, input_handlers).unwrap();

    output.set_buffer_num_min_recommended(2, 2);
    input.set_buffer_num_min_recommended(2, 2);

    connect(&output, &input).unwrap();
    // Ask for more buffers than the pool (sized to 2 at connect time) holds.
    output.set_buffer_num(5);

    let err = output.enable(None).unwrap_err();
    assert_eq!(err.status(), Status::Enomem);
}

/// alloc_array builds ports with sequential indices sharing one handler
/// table factory.
#[test]
fn alloc_array_assigns_sequential_indices() {
    let component: Arc<dyn Component> = TestComponent::new("source");
    let ports = Port::alloc_array(&component, PortType::Output, 3, |_i| {
        Arc::new(EchoHandlers::new()) as Arc<dyn portcore::PortHandlers>
    })
    .unwrap();

    assert_eq!(ports.len(), 3);
    assert_eq!(ports[0].index, 0);
    assert_eq!(ports[1].index, 1);
    assert_eq!(ports[2].index, 2);
}
