use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::{
    support::{BreakpointSupport, BreakpointSupportHandle},
    target::{BreakpointMarker, DebugTarget},
    BreakpointError, BreakpointId, MarkerDelta, Result,
};

const TARGET: &str = "nova.breakpoints";

struct ManagedBreakpoint {
    handle: BreakpointSupportHandle,
    task: JoinHandle<()>,
}

/// Owns one [`BreakpointSupport`] actor per breakpoint of a debug session.
///
/// A breakpoint whose actor fails to install is logged and left unmanaged; it
/// has no effect on the debuggee and does not disturb any other breakpoint.
pub struct BreakpointManager {
    target: DebugTarget,
    actors: Mutex<HashMap<BreakpointId, ManagedBreakpoint>>,
}

impl BreakpointManager {
    pub fn new(target: DebugTarget) -> Self {
        Self {
            target,
            actors: Mutex::new(HashMap::new()),
        }
    }

    /// Installs every breakpoint that already exists when the session starts.
    ///
    /// Failures are isolated per breakpoint; returns how many were installed.
    pub async fn init(
        &self,
        markers: impl IntoIterator<Item = Arc<dyn BreakpointMarker>>,
    ) -> usize {
        let mut installed = 0;
        for marker in markers {
            if self.breakpoint_added(marker).await.is_ok() {
                installed += 1;
            }
        }
        installed
    }

    pub async fn breakpoint_added(&self, marker: Arc<dyn BreakpointMarker>) -> Result<()> {
        let id = marker.id();
        if self.contains(id) {
            return Err(BreakpointError::Duplicate(id));
        }

        let (handle, task) = match BreakpointSupport::create(marker, self.target.clone()).await {
            Ok(spawned) => spawned,
            Err(err) => {
                tracing::error!(
                    target: TARGET,
                    breakpoint = %id,
                    error = %err,
                    "failed to install breakpoint"
                );
                return Err(err);
            }
        };

        let raced = {
            let mut actors = self.actors.lock();
            if actors.contains_key(&id) {
                Some(ManagedBreakpoint { handle, task })
            } else {
                actors.insert(id, ManagedBreakpoint { handle, task });
                None
            }
        };
        if let Some(duplicate) = raced {
            // A concurrent add for the same marker won.
            let _ = stop(id, duplicate).await;
            return Err(BreakpointError::Duplicate(id));
        }
        Ok(())
    }

    /// Forwards a marker change. Changes to unmanaged breakpoints are ignored.
    pub async fn breakpoint_changed(&self, id: BreakpointId, delta: MarkerDelta) -> Result<()> {
        let Some(handle) = self.handle(id) else {
            tracing::trace!(target: TARGET, breakpoint = %id, "change for unmanaged breakpoint");
            return Ok(());
        };
        handle.changed(delta).await
    }

    /// Terminates the breakpoint's actor and waits for its teardown.
    pub async fn breakpoint_removed(&self, id: BreakpointId) -> Result<()> {
        let entry = self.actors.lock().remove(&id);
        let Some(entry) = entry else {
            return Err(BreakpointError::UnknownBreakpoint(id));
        };
        stop(id, entry).await
    }

    /// Returns once every message queued before this call has been processed by
    /// its actor.
    pub async fn wait_for_all_current_events(&self) {
        let handles: Vec<_> = self
            .actors
            .lock()
            .values()
            .map(|entry| entry.handle.clone())
            .collect();
        for handle in handles {
            let _ = handle.probe().await;
        }
    }

    /// Terminates every actor, e.g. when the debuggee disconnects.
    pub async fn shutdown(&self) {
        let entries: Vec<_> = self.actors.lock().drain().collect();
        for (id, entry) in entries {
            if let Err(err) = stop(id, entry).await {
                tracing::debug!(
                    target: TARGET,
                    breakpoint = %id,
                    error = %err,
                    "actor already stopped"
                );
            }
        }
    }

    pub fn handle(&self, id: BreakpointId) -> Option<BreakpointSupportHandle> {
        self.actors.lock().get(&id).map(|entry| entry.handle.clone())
    }

    pub fn contains(&self, id: BreakpointId) -> bool {
        self.actors.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.actors.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.lock().is_empty()
    }
}

async fn stop(id: BreakpointId, entry: ManagedBreakpoint) -> Result<()> {
    let result = entry.handle.terminate().await;
    if let Err(err) = entry.task.await {
        tracing::error!(
            target: TARGET,
            breakpoint = %id,
            error = %err,
            "breakpoint actor panicked"
        );
    }
    result
}
