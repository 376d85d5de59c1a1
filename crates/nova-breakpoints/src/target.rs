//! Collaborators a breakpoint actor talks to.
//!
//! None of these are implemented here: the JDWP client backs [`Debuggee`],
//! the debug session owns the [`TypeCache`] and [`EventDispatcher`], and the
//! IDE owns the breakpoint markers. Every call may be made concurrently by many
//! actors; implementations serialize internally.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    config::SupportConfig, BreakpointId, BreakpointSupportHandle, ListenerId, Location,
    MarkerError, ReferenceType, RequestId, StopReason, SuspendPolicy, ThreadId, VmError,
};

/// Event request management on the debuggee.
#[async_trait]
pub trait Debuggee: Send + Sync {
    /// Code locations `line` maps to inside `ty`.
    ///
    /// Returns an empty list when the type has no code at that line and
    /// [`VmError::AbsentInformation`] when it carries no line table at all.
    async fn locations_of_line(
        &self,
        ty: &ReferenceType,
        line: u32,
    ) -> Result<Vec<Location>, VmError>;

    /// Registers a breakpoint request. New requests start out disabled.
    async fn create_breakpoint_request(
        &self,
        location: Location,
        suspend_policy: SuspendPolicy,
    ) -> Result<RequestId, VmError>;

    async fn set_request_enabled(&self, request: RequestId, enabled: bool) -> Result<(), VmError>;

    async fn delete_event_request(&self, request: RequestId) -> Result<(), VmError>;
}

/// Loaded-type lookup plus class-prepare subscriptions keyed by type name.
///
/// A listener subscribed for `com.example.Foo` is notified for `Foo` and for its
/// nested types (`Foo$Inner`, `Foo$1`, ...), in the order the debuggee reports
/// them, and at most once per event even if subscribed twice.
#[async_trait]
pub trait TypeCache: Send + Sync {
    /// Already-loaded types matching `type_name`, nested types included.
    async fn loaded_types(&self, type_name: &str) -> Result<Vec<ReferenceType>, VmError>;

    async fn add_class_prepare_listener(
        &self,
        listener: BreakpointSupportHandle,
        type_name: &str,
    ) -> Result<(), VmError>;

    async fn remove_class_prepare_listener(
        &self,
        listener: ListenerId,
        type_name: &str,
    ) -> Result<(), VmError>;
}

/// Routes debuggee events for a request to the actor that owns it.
pub trait EventDispatcher: Send + Sync {
    fn set_listener_for(&self, listener: BreakpointSupportHandle, request: RequestId);
    fn unset_listener_for(&self, request: RequestId);
}

/// Thread suspension bookkeeping of the debug target.
pub trait ThreadEvents: Send + Sync {
    fn thread_suspended(&self, thread: ThreadId, reason: StopReason);
}

/// The platform's persisted breakpoint.
pub trait BreakpointMarker: Send + Sync {
    fn id(&self) -> BreakpointId;
    /// Declared type name in dotted form.
    fn type_name(&self) -> Result<String, MarkerError>;
    fn line_number(&self) -> Result<u32, MarkerError>;
    fn is_enabled(&self) -> bool;
    /// Whether the installed requests currently mirror [`Self::is_enabled`].
    fn vm_request_enabled(&self) -> bool;
    fn set_vm_request_enabled(&self, enabled: bool) -> Result<(), MarkerError>;
}

/// Everything a breakpoint actor needs from its debug session.
#[derive(Clone)]
pub struct DebugTarget {
    debuggee: Arc<dyn Debuggee>,
    types: Arc<dyn TypeCache>,
    dispatcher: Arc<dyn EventDispatcher>,
    threads: Arc<dyn ThreadEvents>,
    config: SupportConfig,
}

impl DebugTarget {
    pub fn new(
        debuggee: Arc<dyn Debuggee>,
        types: Arc<dyn TypeCache>,
        dispatcher: Arc<dyn EventDispatcher>,
        threads: Arc<dyn ThreadEvents>,
    ) -> Self {
        Self {
            debuggee,
            types,
            dispatcher,
            threads,
            config: SupportConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SupportConfig) -> Self {
        self.config = config;
        self
    }

    pub fn debuggee(&self) -> &dyn Debuggee {
        self.debuggee.as_ref()
    }

    pub fn types(&self) -> &dyn TypeCache {
        self.types.as_ref()
    }

    pub fn dispatcher(&self) -> &dyn EventDispatcher {
        self.dispatcher.as_ref()
    }

    pub fn threads(&self) -> &dyn ThreadEvents {
        self.threads.as_ref()
    }

    pub fn config(&self) -> &SupportConfig {
        &self.config
    }
}

impl std::fmt::Debug for DebugTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugTarget")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
