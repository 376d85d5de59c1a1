use std::sync::Arc;

use nova_breakpoints::{
    mock::{MockBreakpoint, MockDebugTarget},
    BreakpointError, BreakpointMarker, BreakpointSupport, MarkerError, SupportConfig,
    SuspendPolicy, VmError, ERROR_ABSENT_INFORMATION,
};

use crate::harness::{class, load_with_line, spawn_support, FOO};

async fn create(
    mock: &MockDebugTarget,
    marker: &Arc<MockBreakpoint>,
) -> Result<(), BreakpointError> {
    let marker: Arc<dyn BreakpointMarker> = marker.clone();
    BreakpointSupport::create(marker, mock.target())
        .await
        .map(|_| ())
}

#[tokio::test]
async fn missing_type_name_fails_before_touching_the_debuggee() {
    let mock = MockDebugTarget::new();
    load_with_line(&mock, 100, FOO, 10);
    let marker = MockBreakpoint::new(1, FOO, 10);
    marker.clear_type_name();

    let err = create(&mock, &marker).await.unwrap_err();
    assert!(
        matches!(err, BreakpointError::Marker(MarkerError::MissingAttribute(_))),
        "{err}"
    );
    assert!(mock.debuggee.created_requests().is_empty());
    assert!(mock.types.add_calls().is_empty());
    assert!(marker.shadow_writes().is_empty());
}

#[tokio::test]
async fn loaded_type_lookup_failure_is_surfaced() {
    let mock = MockDebugTarget::new();
    mock.types.fail_loaded_types(VmError::NotConnected);
    let marker = MockBreakpoint::new(1, FOO, 10);

    let err = create(&mock, &marker).await.unwrap_err();
    assert!(matches!(err, BreakpointError::Vm(VmError::NotConnected)), "{err}");
    assert!(mock.types.add_calls().is_empty());
    assert!(marker.shadow_writes().is_empty());
}

#[tokio::test]
async fn disconnected_debuggee_fails_construction() {
    let mock = MockDebugTarget::new();
    load_with_line(&mock, 100, FOO, 10);
    mock.debuggee.disconnect();
    let marker = MockBreakpoint::new(1, FOO, 10);

    let err = create(&mock, &marker).await.unwrap_err();
    assert!(
        matches!(err, BreakpointError::Vm(VmError::ConnectionClosed)),
        "{err}"
    );
    assert!(mock.dispatcher.routed_requests().is_empty());
    assert!(!marker.vm_request_enabled());
}

#[tokio::test]
async fn types_without_line_information_are_skipped() {
    let mock = MockDebugTarget::new();
    load_with_line(&mock, 100, FOO, 10);
    mock.types.add_loaded(class(101, "com.example.Foo$Lambda"));
    mock.debuggee.mark_absent_information(101);
    let marker = MockBreakpoint::new(1, FOO, 10);

    let (_handle, _task) = spawn_support(&mock, &marker).await;

    let live: Vec<_> = mock
        .debuggee
        .live_requests()
        .values()
        .map(|r| r.location.class_id)
        .collect();
    assert_eq!(live, vec![100]);
}

#[tokio::test]
async fn absent_information_error_code_skips_only_that_type() {
    let mock = MockDebugTarget::new();
    load_with_line(&mock, 100, FOO, 10);
    mock.types.add_loaded(class(101, "com.example.Foo$Lambda"));
    mock.debuggee.fail_locations(
        101,
        VmError::CommandFailed {
            error_code: ERROR_ABSENT_INFORMATION,
        },
    );
    let marker = MockBreakpoint::new(1, FOO, 10);

    let (_handle, _task) = spawn_support(&mock, &marker).await;

    let live: Vec<_> = mock
        .debuggee
        .live_requests()
        .values()
        .map(|r| r.location.class_id)
        .collect();
    assert_eq!(live, vec![100]);
    assert!(marker.vm_request_enabled());
}

#[tokio::test]
async fn failure_after_subscribing_leaves_nothing_behind() {
    let mock = MockDebugTarget::new();
    load_with_line(&mock, 100, FOO, 10);
    load_with_line(&mock, 101, "com.example.Foo$Inner", 10);
    let marker = MockBreakpoint::new(1, FOO, 10);
    marker.mark_deleted();

    let err = create(&mock, &marker).await.unwrap_err();

    assert!(matches!(err, BreakpointError::Marker(MarkerError::Deleted)), "{err}");
    let created = mock.debuggee.created_requests();
    assert_eq!(created.len(), 2);
    assert!(mock.debuggee.live_requests().is_empty());
    assert!(mock.dispatcher.routed_requests().is_empty());
    assert_eq!(mock.types.listener_count(FOO), 0);
    assert_eq!(mock.types.remove_calls().len(), 1);
}

#[tokio::test]
async fn failure_before_subscribing_deletes_requests_already_created() {
    let mock = MockDebugTarget::new();
    load_with_line(&mock, 100, FOO, 10);
    load_with_line(&mock, 101, "com.example.Foo$Inner", 10);
    mock.debuggee.fail_locations(101, VmError::Other("line table unreadable".into()));
    let marker = MockBreakpoint::new(1, FOO, 10);

    let err = create(&mock, &marker).await.unwrap_err();

    assert!(matches!(err, BreakpointError::Vm(VmError::Other(_))), "{err}");
    assert_eq!(mock.debuggee.created_requests().len(), 1);
    assert!(mock.debuggee.live_requests().is_empty());
    assert!(mock.types.add_calls().is_empty());
    assert!(mock.types.remove_calls().is_empty());
}

#[tokio::test]
async fn configured_suspend_policy_is_used_for_every_request() {
    let mock = MockDebugTarget::new();
    load_with_line(&mock, 100, FOO, 10);
    let marker: Arc<dyn BreakpointMarker> = MockBreakpoint::new(1, FOO, 10);
    let target = mock.target().with_config(SupportConfig {
        mailbox_capacity: 1,
        suspend_policy: SuspendPolicy::All,
    });

    let (handle, _task) = BreakpointSupport::create(marker, target).await.unwrap();
    mock.debuggee.add_line(101, 10, 0);
    mock.types
        .prepare_class(class(101, "com.example.Foo$Inner"))
        .await;
    handle.probe().await.unwrap();

    let created = mock.debuggee.created_requests();
    assert_eq!(created.len(), 2);
    for id in created {
        assert_eq!(
            mock.debuggee.request_suspend_policy(id),
            Some(SuspendPolicy::All)
        );
    }
}
