//! Deterministic, in-memory doubles for the collaborators in [`crate::target`].
//!
//! Every call is recorded so tests can assert exactly what a breakpoint actor
//! did. Events are delivered through the same subscriptions a real session
//! would use: [`MockTypeCache::prepare_class`] notifies the listeners registered
//! for the class name, [`MockDispatcher::hit`] routes to the listener
//! registered for the request.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{
    target::{BreakpointMarker, DebugTarget, Debuggee, EventDispatcher, ThreadEvents, TypeCache},
    BreakpointId, BreakpointSupportHandle, EventDisposition, ListenerId, Location, MarkerError,
    ReferenceType, ReferenceTypeId, RequestId, Result, StopReason, SuspendPolicy, ThreadId,
    VmError,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MockRequest {
    pub location: Location,
    pub suspend_policy: SuspendPolicy,
    pub enabled: bool,
}

#[derive(Default)]
struct DebuggeeState {
    /// type id -> line -> code indices.
    lines: HashMap<ReferenceTypeId, BTreeMap<u32, Vec<u64>>>,
    absent_information: BTreeSet<ReferenceTypeId>,
    location_errors: HashMap<ReferenceTypeId, VmError>,
    enable_error: Option<VmError>,
    requests: BTreeMap<RequestId, MockRequest>,
    next_request: RequestId,
    created: Vec<RequestId>,
    enable_calls: Vec<(RequestId, bool)>,
    delete_calls: Vec<RequestId>,
}

/// In-memory debuggee with scripted line tables.
#[derive(Default)]
pub struct MockDebuggee {
    state: Mutex<DebuggeeState>,
    disconnected: AtomicBool,
}

impl MockDebuggee {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `line` of `type_id` to bytecode index `index` (method 1).
    pub fn add_line(&self, type_id: ReferenceTypeId, line: u32, index: u64) {
        self.state
            .lock()
            .lines
            .entry(type_id)
            .or_default()
            .entry(line)
            .or_default()
            .push(index);
    }

    /// `type_id` was compiled without line number information.
    pub fn mark_absent_information(&self, type_id: ReferenceTypeId) {
        self.state.lock().absent_information.insert(type_id);
    }

    /// Resolving lines of `type_id` fails with `err`.
    pub fn fail_locations(&self, type_id: ReferenceTypeId, err: VmError) {
        self.state.lock().location_errors.insert(type_id, err);
    }

    /// While set, every `set_request_enabled` call fails with `err`.
    pub fn set_enable_failure(&self, err: Option<VmError>) {
        self.state.lock().enable_error = err;
    }

    /// Simulates the debuggee going away: every later call fails with
    /// [`VmError::ConnectionClosed`].
    pub fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    /// Requests still registered on the debuggee.
    pub fn live_requests(&self) -> BTreeMap<RequestId, MockRequest> {
        self.state.lock().requests.clone()
    }

    pub fn is_request_enabled(&self, request: RequestId) -> bool {
        self.state
            .lock()
            .requests
            .get(&request)
            .is_some_and(|r| r.enabled)
    }

    pub fn request_suspend_policy(&self, request: RequestId) -> Option<SuspendPolicy> {
        self.state
            .lock()
            .requests
            .get(&request)
            .map(|r| r.suspend_policy)
    }

    /// Every request ever created, in creation order.
    pub fn created_requests(&self) -> Vec<RequestId> {
        self.state.lock().created.clone()
    }

    pub fn enable_calls(&self) -> Vec<(RequestId, bool)> {
        self.state.lock().enable_calls.clone()
    }

    pub fn delete_calls(&self) -> Vec<RequestId> {
        self.state.lock().delete_calls.clone()
    }

    fn check_connected(&self) -> Result<(), VmError> {
        if self.is_disconnected() {
            Err(VmError::ConnectionClosed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Debuggee for MockDebuggee {
    async fn locations_of_line(
        &self,
        ty: &ReferenceType,
        line: u32,
    ) -> Result<Vec<Location>, VmError> {
        self.check_connected()?;
        let state = self.state.lock();
        if let Some(err) = state.location_errors.get(&ty.type_id) {
            return Err(err.clone());
        }
        if state.absent_information.contains(&ty.type_id) {
            return Err(VmError::AbsentInformation);
        }
        let indices = state
            .lines
            .get(&ty.type_id)
            .and_then(|lines| lines.get(&line))
            .cloned()
            .unwrap_or_default();
        Ok(indices
            .into_iter()
            .map(|index| Location {
                type_tag: ty.ref_type_tag,
                class_id: ty.type_id,
                method_id: 1,
                index,
            })
            .collect())
    }

    async fn create_breakpoint_request(
        &self,
        location: Location,
        suspend_policy: SuspendPolicy,
    ) -> Result<RequestId, VmError> {
        self.check_connected()?;
        let mut state = self.state.lock();
        state.next_request += 1;
        let id = state.next_request;
        state.requests.insert(
            id,
            MockRequest {
                location,
                suspend_policy,
                enabled: false,
            },
        );
        state.created.push(id);
        Ok(id)
    }

    async fn set_request_enabled(&self, request: RequestId, enabled: bool) -> Result<(), VmError> {
        self.check_connected()?;
        let mut state = self.state.lock();
        state.enable_calls.push((request, enabled));
        if let Some(err) = &state.enable_error {
            return Err(err.clone());
        }
        match state.requests.get_mut(&request) {
            Some(entry) => {
                entry.enabled = enabled;
                Ok(())
            }
            None => Err(VmError::InvalidRequest(request)),
        }
    }

    async fn delete_event_request(&self, request: RequestId) -> Result<(), VmError> {
        let mut state = self.state.lock();
        state.delete_calls.push(request);
        if self.is_disconnected() {
            return Err(VmError::ConnectionClosed);
        }
        match state.requests.remove(&request) {
            Some(_) => Ok(()),
            None => Err(VmError::InvalidRequest(request)),
        }
    }
}

#[derive(Default)]
struct TypeCacheState {
    loaded: Vec<ReferenceType>,
    listeners: BTreeMap<String, Vec<BreakpointSupportHandle>>,
    loaded_types_error: Option<VmError>,
    add_calls: Vec<(ListenerId, String)>,
    remove_calls: Vec<(ListenerId, String)>,
}

/// In-memory loaded-type cache with class-prepare subscriptions.
#[derive(Default)]
pub struct MockTypeCache {
    state: Mutex<TypeCacheState>,
}

impl MockTypeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `ty` as loaded without notifying anybody.
    pub fn add_loaded(&self, ty: ReferenceType) {
        self.state.lock().loaded.push(ty);
    }

    pub fn fail_loaded_types(&self, err: VmError) {
        self.state.lock().loaded_types_error = Some(err);
    }

    /// Loads `ty` and notifies every listener subscribed for its name, one at a
    /// time, waiting for each acknowledgment.
    ///
    /// Returns the replies of the listeners that were still alive.
    pub async fn prepare_class(&self, ty: ReferenceType) -> Vec<EventDisposition> {
        let listeners = {
            let mut state = self.state.lock();
            state.loaded.push(ty.clone());
            let name = ty.name();
            state
                .listeners
                .iter()
                .filter(|(type_name, _)| type_matches(&name, type_name))
                .flat_map(|(_, handles)| handles.iter().cloned())
                .collect::<Vec<_>>()
        };

        let mut replies = Vec::with_capacity(listeners.len());
        for listener in listeners {
            if let Ok(reply) = listener.class_prepared(ty.clone()).await {
                replies.push(reply);
            }
        }
        replies
    }

    pub fn listener_count(&self, type_name: &str) -> usize {
        self.state
            .lock()
            .listeners
            .get(type_name)
            .map_or(0, Vec::len)
    }

    pub fn add_calls(&self) -> Vec<(ListenerId, String)> {
        self.state.lock().add_calls.clone()
    }

    pub fn remove_calls(&self) -> Vec<(ListenerId, String)> {
        self.state.lock().remove_calls.clone()
    }
}

/// `com.example.Foo` covers `com.example.Foo` and its nested types.
fn type_matches(class_name: &str, type_name: &str) -> bool {
    class_name == type_name
        || class_name
            .strip_prefix(type_name)
            .is_some_and(|rest| rest.starts_with('$'))
}

#[async_trait]
impl TypeCache for MockTypeCache {
    async fn loaded_types(&self, type_name: &str) -> Result<Vec<ReferenceType>, VmError> {
        let state = self.state.lock();
        if let Some(err) = &state.loaded_types_error {
            return Err(err.clone());
        }
        Ok(state
            .loaded
            .iter()
            .filter(|ty| type_matches(&ty.name(), type_name))
            .cloned()
            .collect())
    }

    async fn add_class_prepare_listener(
        &self,
        listener: BreakpointSupportHandle,
        type_name: &str,
    ) -> Result<(), VmError> {
        let mut state = self.state.lock();
        state.add_calls.push((listener.id(), type_name.to_string()));
        let handles = state.listeners.entry(type_name.to_string()).or_default();
        handles.retain(|h| h.id() != listener.id());
        handles.push(listener);
        Ok(())
    }

    async fn remove_class_prepare_listener(
        &self,
        listener: ListenerId,
        type_name: &str,
    ) -> Result<(), VmError> {
        let mut state = self.state.lock();
        state.remove_calls.push((listener, type_name.to_string()));
        if let Some(handles) = state.listeners.get_mut(type_name) {
            handles.retain(|h| h.id() != listener);
            if handles.is_empty() {
                state.listeners.remove(type_name);
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct DispatcherState {
    routes: BTreeMap<RequestId, BreakpointSupportHandle>,
    set_calls: Vec<(ListenerId, RequestId)>,
    unset_calls: Vec<RequestId>,
}

/// Routing table from request ids to breakpoint actors.
#[derive(Default)]
pub struct MockDispatcher {
    state: Mutex<DispatcherState>,
}

impl MockDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers a breakpoint event for `request`.
    ///
    /// `None` when no listener is routed for the request (a lost event).
    pub async fn hit(
        &self,
        request: RequestId,
        thread: ThreadId,
        location: Location,
    ) -> Option<Result<EventDisposition>> {
        let listener = self.state.lock().routes.get(&request).cloned()?;
        Some(listener.breakpoint_hit(location, thread).await)
    }

    pub fn routed_requests(&self) -> Vec<RequestId> {
        self.state.lock().routes.keys().copied().collect()
    }

    pub fn listener_for(&self, request: RequestId) -> Option<ListenerId> {
        self.state.lock().routes.get(&request).map(|h| h.id())
    }

    pub fn set_calls(&self) -> Vec<(ListenerId, RequestId)> {
        self.state.lock().set_calls.clone()
    }

    pub fn unset_calls(&self) -> Vec<RequestId> {
        self.state.lock().unset_calls.clone()
    }
}

impl EventDispatcher for MockDispatcher {
    fn set_listener_for(&self, listener: BreakpointSupportHandle, request: RequestId) {
        let mut state = self.state.lock();
        state.set_calls.push((listener.id(), request));
        state.routes.insert(request, listener);
    }

    fn unset_listener_for(&self, request: RequestId) {
        let mut state = self.state.lock();
        state.unset_calls.push(request);
        state.routes.remove(&request);
    }
}

#[derive(Default)]
pub struct MockThreadEvents {
    suspended: Mutex<Vec<(ThreadId, StopReason)>>,
}

impl MockThreadEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn suspended(&self) -> Vec<(ThreadId, StopReason)> {
        self.suspended.lock().clone()
    }
}

impl ThreadEvents for MockThreadEvents {
    fn thread_suspended(&self, thread: ThreadId, reason: StopReason) {
        self.suspended.lock().push((thread, reason));
    }
}

/// Breakpoint marker with settable attributes.
pub struct MockBreakpoint {
    id: BreakpointId,
    type_name: Mutex<Option<String>>,
    line: u32,
    enabled: AtomicBool,
    vm_request_enabled: AtomicBool,
    shadow_writes: Mutex<Vec<bool>>,
    deleted: AtomicBool,
}

impl MockBreakpoint {
    pub fn new(id: u64, type_name: &str, line: u32) -> Arc<Self> {
        Arc::new(Self {
            id: BreakpointId(id),
            type_name: Mutex::new(Some(type_name.to_string())),
            line,
            enabled: AtomicBool::new(true),
            vm_request_enabled: AtomicBool::new(false),
            shadow_writes: Mutex::new(Vec::new()),
            deleted: AtomicBool::new(false),
        })
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Drops the type name attribute so reading it fails.
    pub fn clear_type_name(&self) {
        *self.type_name.lock() = None;
    }

    /// Simulates the marker being deleted: persisting attributes fails.
    pub fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::SeqCst);
    }

    /// Values written to the persisted vm-request-enabled attribute, in order.
    pub fn shadow_writes(&self) -> Vec<bool> {
        self.shadow_writes.lock().clone()
    }
}

impl BreakpointMarker for MockBreakpoint {
    fn id(&self) -> BreakpointId {
        self.id
    }

    fn type_name(&self) -> Result<String, MarkerError> {
        self.type_name
            .lock()
            .clone()
            .ok_or(MarkerError::MissingAttribute("typeName"))
    }

    fn line_number(&self) -> Result<u32, MarkerError> {
        Ok(self.line)
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn vm_request_enabled(&self) -> bool {
        self.vm_request_enabled.load(Ordering::SeqCst)
    }

    fn set_vm_request_enabled(&self, enabled: bool) -> Result<(), MarkerError> {
        if self.deleted.load(Ordering::SeqCst) {
            return Err(MarkerError::Deleted);
        }
        self.vm_request_enabled.store(enabled, Ordering::SeqCst);
        self.shadow_writes.lock().push(enabled);
        Ok(())
    }
}

/// A full set of mock collaborators sharing one debug session.
#[derive(Clone, Default)]
pub struct MockDebugTarget {
    pub debuggee: Arc<MockDebuggee>,
    pub types: Arc<MockTypeCache>,
    pub dispatcher: Arc<MockDispatcher>,
    pub threads: Arc<MockThreadEvents>,
}

impl MockDebugTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn target(&self) -> DebugTarget {
        DebugTarget::new(
            self.debuggee.clone(),
            self.types.clone(),
            self.dispatcher.clone(),
            self.threads.clone(),
        )
    }
}
