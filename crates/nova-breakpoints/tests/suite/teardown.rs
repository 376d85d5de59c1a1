use nova_breakpoints::{
    mock::{MockBreakpoint, MockDebugTarget},
    BreakpointError, BreakpointMarker, BreakpointMessage, Debuggee, EventDispatcher, MarkerDelta,
    TypeCache,
};

use crate::harness::{class, load_with_line, location, spawn_support, FOO};

#[tokio::test]
async fn teardown_tolerates_a_disconnected_debuggee() {
    let mock = MockDebugTarget::new();
    load_with_line(&mock, 100, FOO, 10);
    load_with_line(&mock, 101, "com.example.Foo$Inner", 10);
    let marker = MockBreakpoint::new(1, FOO, 10);
    let (handle, task) = spawn_support(&mock, &marker).await;
    let created = mock.debuggee.created_requests();

    mock.debuggee.disconnect();
    handle.terminate().await.unwrap();
    task.await.unwrap();

    // Every delete was attempted once and every route was still removed.
    assert_eq!(mock.debuggee.delete_calls(), created);
    assert_eq!(mock.dispatcher.unset_calls(), created);
    assert!(mock.dispatcher.routed_requests().is_empty());
    assert_eq!(mock.types.remove_calls().len(), 1);
}

#[tokio::test]
async fn teardown_tolerates_requests_already_gone() {
    let mock = MockDebugTarget::new();
    load_with_line(&mock, 100, FOO, 10);
    let marker = MockBreakpoint::new(1, FOO, 10);
    let (handle, _task) = spawn_support(&mock, &marker).await;
    let created = mock.debuggee.created_requests();

    // Someone else cleared the request on the debuggee side.
    mock.debuggee.delete_event_request(created[0]).await.unwrap();

    handle.terminate().await.unwrap();
    assert_eq!(mock.debuggee.delete_calls(), vec![created[0], created[0]]);
    assert_eq!(mock.dispatcher.unset_calls(), created);
}

#[tokio::test]
async fn messages_after_terminate_are_rejected() {
    let mock = MockDebugTarget::new();
    load_with_line(&mock, 100, FOO, 10);
    let marker = MockBreakpoint::new(1, FOO, 10);
    let (handle, task) = spawn_support(&mock, &marker).await;

    handle.terminate().await.unwrap();
    task.await.unwrap();

    assert!(matches!(
        handle.breakpoint_hit(location(100), 1).await,
        Err(BreakpointError::Terminated)
    ));
    assert!(matches!(
        handle.class_prepared(class(101, FOO)).await,
        Err(BreakpointError::Terminated)
    ));
    assert!(matches!(
        handle.changed(MarkerDelta::new()).await,
        Err(BreakpointError::Terminated)
    ));
    assert!(matches!(handle.probe().await, Err(BreakpointError::Terminated)));
    assert!(matches!(
        handle.terminate().await,
        Err(BreakpointError::Terminated)
    ));

    assert!(mock.threads.suspended().is_empty());
    assert_eq!(mock.debuggee.created_requests().len(), 1);
    assert_eq!(mock.debuggee.delete_calls().len(), 1);
}

#[tokio::test]
async fn queued_messages_finish_before_teardown() {
    let mock = MockDebugTarget::new();
    load_with_line(&mock, 100, FOO, 10);
    let marker = MockBreakpoint::new(1, FOO, 10);
    let (handle, _task) = spawn_support(&mock, &marker).await;
    let created = mock.debuggee.created_requests();

    marker.set_enabled(false);
    handle
        .send(BreakpointMessage::Changed {
            delta: MarkerDelta::new(),
        })
        .await
        .unwrap();
    handle.terminate().await.unwrap();

    assert!(!marker.vm_request_enabled());
    assert_eq!(
        mock.debuggee.enable_calls(),
        vec![(created[0], true), (created[0], false)]
    );
    assert_eq!(mock.debuggee.delete_calls(), created);
}

#[tokio::test]
async fn messages_queued_behind_terminate_are_never_processed() {
    let mock = MockDebugTarget::new();
    load_with_line(&mock, 100, FOO, 10);
    let marker = MockBreakpoint::new(1, FOO, 10);
    let (handle, task) = spawn_support(&mock, &marker).await;

    let (done, done_rx) = tokio::sync::oneshot::channel();
    handle
        .send(BreakpointMessage::Terminate { done })
        .await
        .unwrap();
    let (reply, reply_rx) = tokio::sync::oneshot::channel();
    // The send may race with the mailbox closing; either way nothing is processed.
    let _ = handle
        .send(BreakpointMessage::BreakpointHit {
            location: location(100),
            thread: 9,
            reply,
        })
        .await;

    done_rx.await.unwrap();
    task.await.unwrap();
    assert!(reply_rx.await.is_err());
    assert!(mock.threads.suspended().is_empty());
}

#[tokio::test]
async fn dropping_every_handle_tears_the_actor_down() {
    let mock = MockDebugTarget::new();
    load_with_line(&mock, 100, FOO, 10);
    let marker = MockBreakpoint::new(1, FOO, 10);
    let (handle, task) = spawn_support(&mock, &marker).await;
    let created = mock.debuggee.created_requests();

    // The type cache and the dispatcher hold the only other senders.
    mock.types
        .remove_class_prepare_listener(handle.id(), FOO)
        .await
        .unwrap();
    mock.dispatcher.unset_listener_for(created[0]);
    drop(handle);

    tokio::time::timeout(std::time::Duration::from_secs(5), task)
        .await
        .expect("actor should stop once its mailbox closes")
        .unwrap();
    assert!(mock.debuggee.live_requests().is_empty());
    assert_eq!(mock.debuggee.delete_calls(), created);
    assert_eq!(mock.types.remove_calls().len(), 2);
}
