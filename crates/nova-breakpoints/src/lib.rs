//! Per-breakpoint lifecycle actors for Nova's Java debugger.
//!
//! Each user-level line breakpoint is owned by one [`BreakpointSupport`] actor.
//! The actor installs a breakpoint event request for every loaded class that
//! matches the breakpoint's type name, installs more as classes get prepared,
//! mirrors the breakpoint's enabled flag onto those requests, and deletes all of
//! them when the breakpoint is removed or the debuggee goes away.
//!
//! The debuggee itself is reached through the collaborator traits in
//! [`target`]; the wire-level JDWP client and the IDE's marker storage live
//! elsewhere. [`mock`] provides deterministic in-memory doubles for all of them.

pub mod config;
pub mod manager;
pub mod mock;
pub mod request;
pub mod support;
pub mod target;

use std::{
    collections::BTreeSet,
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use config::{init_tracing, BreakpointsConfig, ConfigError, LoggingConfig, SupportConfig};
pub use manager::BreakpointManager;
pub use request::{create_breakpoint_request, BreakpointRequest, RequestSet};
pub use support::{BreakpointMessage, BreakpointSupport, BreakpointSupportHandle};
pub use target::{BreakpointMarker, DebugTarget, Debuggee, EventDispatcher, ThreadEvents, TypeCache};

pub type ReferenceTypeId = u64;
pub type MethodId = u64;
pub type ThreadId = u64;
pub type RequestId = i32;

/// JDWP `TypeTag` values.
pub const TYPE_TAG_CLASS: u8 = 1;
pub const TYPE_TAG_INTERFACE: u8 = 2;

/// JDWP error codes that mean the request (or the whole VM) is already gone.
pub const ERROR_INVALID_OBJECT: u16 = 20;
pub const ERROR_ABSENT_INFORMATION: u16 = 101;
pub const ERROR_INVALID_EVENT_TYPE: u16 = 102;
pub const ERROR_VM_DEAD: u16 = 112;

/// Platform-assigned identity of a breakpoint marker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BreakpointId(pub u64);

impl fmt::Display for BreakpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity of a [`BreakpointSupportHandle`] as seen by the type cache.
///
/// Ids are process-unique; two actors created for the same breakpoint (e.g.
/// remove followed by re-add) never share one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Executable code location inside a loaded reference type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Location {
    pub type_tag: u8,
    pub class_id: ReferenceTypeId,
    pub method_id: MethodId,
    pub index: u64,
}

/// A class, interface or array type loaded in the debuggee.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReferenceType {
    pub ref_type_tag: u8,
    pub type_id: ReferenceTypeId,
    /// JVM signature, e.g. `Lcom/example/Foo;`.
    pub signature: String,
}

impl ReferenceType {
    /// Accepts either a dotted class name or a JVM signature.
    pub fn new(ref_type_tag: u8, type_id: ReferenceTypeId, name: &str) -> Self {
        Self {
            ref_type_tag,
            type_id,
            signature: class_name_to_signature(name),
        }
    }

    /// Dotted binary name (`com.example.Foo$Inner`).
    pub fn name(&self) -> String {
        signature_to_class_name(&self.signature)
    }
}

pub fn class_name_to_signature(class_name: &str) -> String {
    if class_name.starts_with('L') && class_name.ends_with(';') {
        return class_name.to_string();
    }
    let internal = class_name.replace('.', "/");
    format!("L{internal};")
}

pub fn signature_to_class_name(signature: &str) -> String {
    match signature
        .strip_prefix('L')
        .and_then(|rest| rest.strip_suffix(';'))
    {
        Some(internal) => internal.replace('/', "."),
        None => signature.to_string(),
    }
}

/// Which threads the debuggee suspends when a request fires.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspendPolicy {
    None,
    #[default]
    EventThread,
    All,
}

/// Why a thread was reported as suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Breakpoint,
}

/// Reply to an event delivered by the debuggee: whether the thread that
/// reported it stays suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDisposition {
    Resume,
    Suspend,
}

/// Description of what changed on a breakpoint marker.
///
/// The actor only uses it as a trigger to re-read the marker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkerDelta {
    pub changed_attributes: BTreeSet<String>,
}

impl MarkerDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attribute(mut self, name: impl Into<String>) -> Self {
        self.changed_attributes.insert(name.into());
        self
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VmError {
    #[error("debuggee is not connected")]
    NotConnected,
    #[error("debuggee connection closed")]
    ConnectionClosed,
    #[error("debuggee operation cancelled")]
    Cancelled,
    #[error("no line number information available")]
    AbsentInformation,
    #[error("invalid event request {0}")]
    InvalidRequest(RequestId),
    #[error("debuggee command failed with error code {error_code}")]
    CommandFailed { error_code: u16 },
    #[error("{0}")]
    Other(String),
}

impl VmError {
    /// The connection or the request no longer exists on the debuggee side.
    pub fn is_stale(&self) -> bool {
        match self {
            VmError::NotConnected
            | VmError::ConnectionClosed
            | VmError::Cancelled
            | VmError::InvalidRequest(_) => true,
            VmError::CommandFailed { error_code } => matches!(
                *error_code,
                ERROR_INVALID_OBJECT | ERROR_INVALID_EVENT_TYPE | ERROR_VM_DEAD
            ),
            VmError::AbsentInformation | VmError::Other(_) => false,
        }
    }

    /// The type has no line number table, either reported directly or as the
    /// raw JDWP error code.
    pub fn is_absent_information(&self) -> bool {
        matches!(
            self,
            VmError::AbsentInformation
                | VmError::CommandFailed {
                    error_code: ERROR_ABSENT_INFORMATION
                }
        )
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MarkerError {
    #[error("breakpoint marker no longer exists")]
    Deleted,
    #[error("breakpoint marker has no `{0}` attribute")]
    MissingAttribute(&'static str),
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum BreakpointError {
    #[error(transparent)]
    Vm(#[from] VmError),
    #[error(transparent)]
    Marker(#[from] MarkerError),
    #[error("breakpoint actor has terminated")]
    Terminated,
    #[error("breakpoint {0} is already managed")]
    Duplicate(BreakpointId),
    #[error("unknown breakpoint {0}")]
    UnknownBreakpoint(BreakpointId),
}

pub type Result<T, E = BreakpointError> = std::result::Result<T, E>;
