//! The per-breakpoint lifecycle actor.
//!
//! [`BreakpointSupport::create`] installs requests for every class already
//! loaded, subscribes to class-prepare events for the breakpoint's type, and
//! only then spawns the task that processes [`BreakpointMessage`]s one at a
//! time. The task owns its [`RequestSet`] exclusively; everything else reaches
//! it through a [`BreakpointSupportHandle`].

use std::sync::Arc;

use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::Instrument;

use crate::{
    request::{create_breakpoint_request, RequestSet},
    target::{BreakpointMarker, DebugTarget},
    BreakpointError, BreakpointId, EventDisposition, ListenerId, Location, MarkerDelta,
    ReferenceType, Result, StopReason, ThreadId, VmError,
};

const TARGET: &str = "nova.breakpoints";

/// Messages understood by a breakpoint actor.
#[derive(Debug)]
pub enum BreakpointMessage {
    /// A class matching the breakpoint's type name was prepared.
    ClassPrepared {
        ty: ReferenceType,
        reply: oneshot::Sender<EventDisposition>,
    },
    /// One of the actor's requests was hit.
    BreakpointHit {
        location: Location,
        thread: ThreadId,
        reply: oneshot::Sender<EventDisposition>,
    },
    /// The breakpoint marker changed.
    Changed { delta: MarkerDelta },
    /// Liveness probe; replies once every earlier message has been processed.
    Probe { reply: oneshot::Sender<()> },
    /// Delete all requests and stop.
    Terminate { done: oneshot::Sender<()> },
}

/// Cloneable address of a running breakpoint actor.
///
/// The handle doubles as the listener identity registered with the type cache
/// and the event dispatcher. Once the actor terminates every send fails with
/// [`BreakpointError::Terminated`].
#[derive(Clone, Debug)]
pub struct BreakpointSupportHandle {
    id: ListenerId,
    breakpoint: BreakpointId,
    tx: mpsc::Sender<BreakpointMessage>,
}

impl BreakpointSupportHandle {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn breakpoint_id(&self) -> BreakpointId {
        self.breakpoint
    }

    pub fn is_terminated(&self) -> bool {
        self.tx.is_closed()
    }

    pub async fn send(&self, message: BreakpointMessage) -> Result<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| BreakpointError::Terminated)
    }

    pub async fn class_prepared(&self, ty: ReferenceType) -> Result<EventDisposition> {
        let (reply, rx) = oneshot::channel();
        self.send(BreakpointMessage::ClassPrepared { ty, reply }).await?;
        rx.await.map_err(|_| BreakpointError::Terminated)
    }

    pub async fn breakpoint_hit(
        &self,
        location: Location,
        thread: ThreadId,
    ) -> Result<EventDisposition> {
        let (reply, rx) = oneshot::channel();
        self.send(BreakpointMessage::BreakpointHit {
            location,
            thread,
            reply,
        })
        .await?;
        rx.await.map_err(|_| BreakpointError::Terminated)
    }

    pub async fn changed(&self, delta: MarkerDelta) -> Result<()> {
        self.send(BreakpointMessage::Changed { delta }).await
    }

    pub async fn probe(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(BreakpointMessage::Probe { reply }).await?;
        rx.await.map_err(|_| BreakpointError::Terminated)
    }

    /// Asks the actor to tear down and waits until every request is deleted.
    ///
    /// Messages already queued ahead of the request are processed first.
    pub async fn terminate(&self) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.send(BreakpointMessage::Terminate { done }).await?;
        rx.await.map_err(|_| BreakpointError::Terminated)
    }
}

/// State owned by a breakpoint actor task.
pub struct BreakpointSupport {
    marker: Arc<dyn BreakpointMarker>,
    target: DebugTarget,
    listener: ListenerId,
    breakpoint: BreakpointId,
    type_name: String,
    line: u32,
    requests: RequestSet,
    subscribed: bool,
    // Weak so the mailbox closes once every external handle is gone.
    self_tx: mpsc::WeakSender<BreakpointMessage>,
    rx: mpsc::Receiver<BreakpointMessage>,
}

impl BreakpointSupport {
    /// Installs the breakpoint and spawns its actor task.
    ///
    /// Every step of the installation runs before the task starts. On the first
    /// failure the listener and every request installed so far are removed
    /// again, the error is returned, and nothing is spawned.
    pub async fn create(
        marker: Arc<dyn BreakpointMarker>,
        target: DebugTarget,
    ) -> Result<(BreakpointSupportHandle, JoinHandle<()>)> {
        let (support, handle) = Self::initialize(marker, target).await?;
        let task = tokio::spawn(support.run());
        Ok((handle, task))
    }

    async fn initialize(
        marker: Arc<dyn BreakpointMarker>,
        target: DebugTarget,
    ) -> Result<(Self, BreakpointSupportHandle)> {
        let breakpoint = marker.id();
        let type_name = marker.type_name()?;
        let line = marker.line_number()?;

        let (tx, rx) = mpsc::channel(target.config().effective_mailbox_capacity());
        let handle = BreakpointSupportHandle {
            id: ListenerId::next(),
            breakpoint,
            tx,
        };

        let mut support = Self {
            marker,
            target,
            listener: handle.id,
            breakpoint,
            type_name,
            line,
            requests: RequestSet::new(),
            subscribed: false,
            self_tx: handle.tx.downgrade(),
            rx,
        };
        if let Err(err) = support.install(&handle).await {
            tracing::debug!(
                target: TARGET,
                breakpoint = %breakpoint,
                requests = support.requests.len(),
                error = %err,
                "rolling back partial breakpoint installation"
            );
            support.dispose().await;
            return Err(err);
        }
        Ok((support, handle))
    }

    async fn install(&mut self, handle: &BreakpointSupportHandle) -> Result<()> {
        let suspend_policy = self.target.config().suspend_policy;
        for ty in self.target.types().loaded_types(&self.type_name).await? {
            if let Some(request) =
                create_breakpoint_request(self.target.debuggee(), &ty, self.line, suspend_policy)
                    .await?
            {
                self.requests.push(request);
            }
        }

        self.target
            .types()
            .add_class_prepare_listener(handle.clone(), &self.type_name)
            .await?;
        self.subscribed = true;

        let enabled = self.marker.is_enabled();
        for request in self.requests.iter_mut() {
            self.target
                .dispatcher()
                .set_listener_for(handle.clone(), request.id);
            self.target
                .debuggee()
                .set_request_enabled(request.id, enabled)
                .await?;
            request.set_enabled(enabled);
        }
        self.marker.set_vm_request_enabled(enabled)?;

        tracing::debug!(
            target: TARGET,
            breakpoint = %self.breakpoint,
            type_name = %self.type_name,
            line = self.line,
            requests = self.requests.len(),
            enabled,
            "breakpoint installed"
        );
        Ok(())
    }

    async fn run(mut self) {
        let span = tracing::debug_span!(
            target: TARGET,
            "breakpoint_support",
            breakpoint = %self.breakpoint,
            type_name = %self.type_name,
            line = self.line,
        );

        async move {
            while let Some(message) = self.rx.recv().await {
                match message {
                    BreakpointMessage::ClassPrepared { ty, reply } => {
                        self.on_class_prepared(ty).await;
                        let _ = reply.send(EventDisposition::Resume);
                    }
                    BreakpointMessage::BreakpointHit {
                        location,
                        thread,
                        reply,
                    } => {
                        let disposition = self.on_breakpoint_hit(location, thread);
                        let _ = reply.send(disposition);
                    }
                    BreakpointMessage::Changed { delta } => self.on_changed(&delta).await,
                    BreakpointMessage::Probe { reply } => {
                        let _ = reply.send(());
                    }
                    BreakpointMessage::Terminate { done } => {
                        self.dispose().await;
                        let _ = done.send(());
                        return;
                    }
                }
            }

            // Every handle was dropped without an explicit terminate.
            tracing::debug!(target: TARGET, "mailbox closed; tearing down");
            self.dispose().await;
        }
        .instrument(span)
        .await
    }

    fn handle(&self) -> Option<BreakpointSupportHandle> {
        self.self_tx.upgrade().map(|tx| BreakpointSupportHandle {
            id: self.listener,
            breakpoint: self.breakpoint,
            tx,
        })
    }

    async fn on_class_prepared(&mut self, ty: ReferenceType) {
        let suspend_policy = self.target.config().suspend_policy;
        let request = match create_breakpoint_request(
            self.target.debuggee(),
            &ty,
            self.line,
            suspend_policy,
        )
        .await
        {
            Ok(Some(request)) => request,
            Ok(None) => {
                tracing::trace!(target: TARGET, class = %ty.name(), "no code at breakpoint line");
                return;
            }
            Err(err) => {
                tracing::warn!(
                    target: TARGET,
                    class = %ty.name(),
                    error = %err,
                    "failed to create breakpoint request for prepared class"
                );
                return;
            }
        };

        let Some(handle) = self.handle() else {
            // The mailbox is closing; an enabled request could not be routed here.
            if let Err(err) = self
                .target
                .debuggee()
                .delete_event_request(request.id)
                .await
            {
                log_teardown_error("delete unroutable breakpoint request", &err);
            }
            return;
        };
        let enabled = self.marker.is_enabled();
        let request = self.requests.push(request);
        self.target.dispatcher().set_listener_for(handle, request.id);
        match self
            .target
            .debuggee()
            .set_request_enabled(request.id, enabled)
            .await
        {
            Ok(()) => request.set_enabled(enabled),
            Err(err) => tracing::warn!(
                target: TARGET,
                request = request.id,
                error = %err,
                "failed to apply enabled state to new breakpoint request"
            ),
        }

        tracing::debug!(
            target: TARGET,
            class = %ty.name(),
            request = request.id,
            enabled,
            "breakpoint request installed"
        );
    }

    fn on_breakpoint_hit(&self, location: Location, thread: ThreadId) -> EventDisposition {
        tracing::debug!(
            target: TARGET,
            thread,
            class_id = location.class_id,
            index = location.index,
            "breakpoint hit"
        );
        self.target
            .threads()
            .thread_suspended(thread, StopReason::Breakpoint);
        EventDisposition::Suspend
    }

    async fn on_changed(&mut self, delta: &MarkerDelta) {
        let enabled = self.marker.is_enabled();
        if enabled == self.marker.vm_request_enabled() {
            return;
        }

        let mut applied = true;
        for request in self.requests.iter_mut() {
            match self
                .target
                .debuggee()
                .set_request_enabled(request.id, enabled)
                .await
            {
                Ok(()) => request.set_enabled(enabled),
                Err(err) if err.is_stale() => tracing::debug!(
                    target: TARGET,
                    request = request.id,
                    error = %err,
                    "breakpoint request no longer exists"
                ),
                Err(err) => {
                    applied = false;
                    tracing::warn!(
                        target: TARGET,
                        request = request.id,
                        enabled,
                        error = %err,
                        "failed to toggle breakpoint request"
                    );
                }
            }
        }

        // Keep the old shadow value so the next change notification retries.
        if !applied {
            return;
        }

        if let Err(err) = self.marker.set_vm_request_enabled(enabled) {
            tracing::warn!(target: TARGET, error = %err, "failed to persist vm request state");
        }
        tracing::debug!(
            target: TARGET,
            enabled,
            requests = self.requests.len(),
            attributes = ?delta.changed_attributes,
            "breakpoint enabled state applied"
        );
    }

    async fn dispose(&mut self) {
        if std::mem::take(&mut self.subscribed) {
            if let Err(err) = self
                .target
                .types()
                .remove_class_prepare_listener(self.listener, &self.type_name)
                .await
            {
                log_teardown_error("remove class prepare listener", &err);
            }
        }

        // Delete on the debuggee before unrouting so no event can arrive for a
        // request nobody listens to.
        for request in self.requests.take_all() {
            if let Err(err) = self
                .target
                .debuggee()
                .delete_event_request(request.id)
                .await
            {
                log_teardown_error("delete breakpoint request", &err);
            }
            self.target.dispatcher().unset_listener_for(request.id);
        }

        tracing::debug!(target: TARGET, "breakpoint support terminated");
    }
}

fn log_teardown_error(action: &'static str, err: &VmError) {
    if err.is_stale() {
        tracing::debug!(
            target: TARGET,
            action,
            error = %err,
            "ignoring stale debuggee state during teardown"
        );
    } else {
        tracing::warn!(target: TARGET, action, error = %err, "teardown step failed");
    }
}
