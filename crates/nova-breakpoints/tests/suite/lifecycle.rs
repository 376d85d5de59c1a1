use nova_breakpoints::{
    mock::{MockBreakpoint, MockDebugTarget},
    BreakpointMarker, EventDisposition, MarkerDelta,
};

use crate::harness::{class, load_with_line, spawn_support, FOO};

#[tokio::test]
async fn already_loaded_class_gets_an_enabled_request_at_construction() {
    let mock = MockDebugTarget::new();
    load_with_line(&mock, 100, FOO, 10);
    let marker = MockBreakpoint::new(1, FOO, 10);

    let (handle, _task) = spawn_support(&mock, &marker).await;

    let created = mock.debuggee.created_requests();
    assert_eq!(created.len(), 1);
    assert!(mock.debuggee.is_request_enabled(created[0]));
    assert_eq!(mock.dispatcher.listener_for(created[0]), Some(handle.id()));
    assert_eq!(mock.types.listener_count(FOO), 1);
    assert_eq!(mock.types.add_calls(), vec![(handle.id(), FOO.to_string())]);
    assert_eq!(marker.shadow_writes(), vec![true]);
}

#[tokio::test]
async fn class_loaded_after_construction_gets_an_enabled_request() {
    let mock = MockDebugTarget::new();
    let marker = MockBreakpoint::new(1, FOO, 10);

    let (handle, _task) = spawn_support(&mock, &marker).await;
    assert!(mock.debuggee.created_requests().is_empty());
    assert_eq!(marker.shadow_writes(), vec![true]);

    mock.debuggee.add_line(100, 10, 0);
    let replies = mock.types.prepare_class(class(100, FOO)).await;
    assert_eq!(replies, vec![EventDisposition::Resume]);

    let created = mock.debuggee.created_requests();
    assert_eq!(created.len(), 1);
    assert!(mock.debuggee.is_request_enabled(created[0]));
    assert_eq!(mock.dispatcher.listener_for(created[0]), Some(handle.id()));
}

#[tokio::test]
async fn disabling_and_re_enabling_toggles_every_request() {
    let mock = MockDebugTarget::new();
    load_with_line(&mock, 100, FOO, 10);
    load_with_line(&mock, 101, "com.example.Foo$Inner", 10);
    let marker = MockBreakpoint::new(1, FOO, 10);
    let (handle, _task) = spawn_support(&mock, &marker).await;
    let created = mock.debuggee.created_requests();
    assert_eq!(created.len(), 2);

    marker.set_enabled(false);
    handle
        .changed(MarkerDelta::new().with_attribute("enabled"))
        .await
        .unwrap();
    handle.probe().await.unwrap();

    for id in &created {
        assert!(!mock.debuggee.is_request_enabled(*id));
    }
    assert!(!marker.vm_request_enabled());

    marker.set_enabled(true);
    handle
        .changed(MarkerDelta::new().with_attribute("enabled"))
        .await
        .unwrap();
    handle.probe().await.unwrap();

    for id in &created {
        assert!(mock.debuggee.is_request_enabled(*id));
    }
    assert_eq!(marker.shadow_writes(), vec![true, false, true]);
}

#[tokio::test]
async fn terminate_deletes_every_request_and_the_subscription() {
    let mock = MockDebugTarget::new();
    load_with_line(&mock, 100, FOO, 10);
    load_with_line(&mock, 101, "com.example.Foo$Inner", 10);
    let marker = MockBreakpoint::new(1, FOO, 10);
    let (handle, task) = spawn_support(&mock, &marker).await;

    mock.debuggee.add_line(102, 10, 0);
    mock.types.prepare_class(class(102, "com.example.Foo$1")).await;
    let created = mock.debuggee.created_requests();
    assert_eq!(created.len(), 3);

    handle.terminate().await.unwrap();
    task.await.unwrap();

    assert_eq!(mock.debuggee.delete_calls(), created);
    assert_eq!(mock.dispatcher.unset_calls(), created);
    assert_eq!(mock.types.remove_calls(), vec![(handle.id(), FOO.to_string())]);
    assert!(mock.debuggee.live_requests().is_empty());
    assert!(mock.dispatcher.routed_requests().is_empty());
    assert_eq!(mock.types.listener_count(FOO), 0);
    assert!(handle.is_terminated());
}
