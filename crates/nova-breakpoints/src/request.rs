use crate::{
    target::Debuggee, Location, ReferenceType, ReferenceTypeId, RequestId, SuspendPolicy, VmError,
};

/// A breakpoint event request installed on the debuggee for one loaded type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointRequest {
    pub id: RequestId,
    pub type_id: ReferenceTypeId,
    pub location: Location,
    enabled: bool,
}

impl BreakpointRequest {
    pub fn new(id: RequestId, type_id: ReferenceTypeId, location: Location) -> Self {
        Self {
            id,
            type_id,
            location,
            enabled: false,
        }
    }

    /// Last enabled state successfully applied on the debuggee.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub(crate) fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }
}

/// Creates a disabled breakpoint request for `line` in `ty`.
///
/// `Ok(None)` means the type has no executable code at that line (abstract
/// methods, interfaces, comment lines, classes compiled without line tables).
/// When the line maps to several locations the first one reported wins.
pub async fn create_breakpoint_request(
    debuggee: &dyn Debuggee,
    ty: &ReferenceType,
    line: u32,
    suspend_policy: SuspendPolicy,
) -> Result<Option<BreakpointRequest>, VmError> {
    let locations = match debuggee.locations_of_line(ty, line).await {
        Ok(locations) => locations,
        Err(err) if err.is_absent_information() => return Ok(None),
        Err(err) => return Err(err),
    };
    let Some(location) = locations.into_iter().next() else {
        return Ok(None);
    };

    let id = debuggee
        .create_breakpoint_request(location, suspend_policy)
        .await?;
    Ok(Some(BreakpointRequest::new(id, ty.type_id, location)))
}

/// Requests owned by one breakpoint actor.
///
/// Append-only while the actor runs: a class cannot be unloaded within a session,
/// and a redefined class gets a request of its own next to the old one.
#[derive(Debug, Default)]
pub struct RequestSet {
    requests: Vec<BreakpointRequest>,
}

impl RequestSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, request: BreakpointRequest) -> &mut BreakpointRequest {
        self.requests.push(request);
        let last = self.requests.len() - 1;
        &mut self.requests[last]
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BreakpointRequest> {
        self.requests.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut BreakpointRequest> {
        self.requests.iter_mut()
    }

    pub fn ids(&self) -> Vec<RequestId> {
        self.requests.iter().map(|r| r.id).collect()
    }

    /// Number of requests installed for `type_id` (more than one after a redefinition).
    pub fn count_for_type(&self, type_id: ReferenceTypeId) -> usize {
        self.requests
            .iter()
            .filter(|r| r.type_id == type_id)
            .count()
    }

    /// Hands every request over for teardown, leaving the set empty.
    pub(crate) fn take_all(&mut self) -> Vec<BreakpointRequest> {
        std::mem::take(&mut self.requests)
    }
}
