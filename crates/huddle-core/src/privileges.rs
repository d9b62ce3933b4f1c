//! Roles, the role gate table, and privilege request/response flows.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::dispatcher::EventDispatcher;
use crate::errors::HuddleError;
use crate::events::HuddleEvent;
use crate::lock;
use crate::transport::{Transport, TransportCommand};
use huddle_media::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Role {
    Host,
    CoHost,
    Panelist,
    #[default]
    Attendee,
    Interpreter,
}

/// Operations that depend on the local role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoleAction {
    MuteOthers,
    ManageOthersVideo,
    MakeHost,
    AssignCohost,
    RemoveUser,
    RenameOthers,
    AdmitFromWaitingRoom,
    ManageBreakoutRooms,
    AnswerQuestions,
    ManagePanelists,
    LowerOthersHands,
    ManageTranscription,
    ChangeChatPrivilege,
    RespondPrivilege,
    EndMeetingForAll,
}

impl Role {
    pub fn is_privileged(self) -> bool {
        matches!(self, Role::Host | Role::CoHost)
    }

    pub fn permits(self, action: RoleAction) -> bool {
        use RoleAction::*;
        match self {
            Role::Host => true,
            Role::CoHost => !matches!(action, MakeHost | AssignCohost | EndMeetingForAll),
            Role::Panelist => matches!(action, AnswerQuestions),
            Role::Attendee | Role::Interpreter => false,
        }
    }

    pub fn require(self, action: RoleAction, operation: &'static str) -> Result<(), HuddleError> {
        if self.permits(action) {
            Ok(())
        } else {
            Err(HuddleError::PermissionDenied {
                operation,
                role: self,
            })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrivilegeKind {
    LocalRecording,
    RawLiveStream,
    RawData,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(String);

impl RequestId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrivilegeOutcome {
    Granted,
    Denied,
    TimedOut,
    /// The session ended first.
    Cancelled,
}

const PENDING: u8 = 0;
const GRANTED: u8 = 1;
const DENIED: u8 = 2;
const EXPIRED: u8 = 3;

/// Host-side handle for one incoming privilege request.
///
/// Clones share state: across all of them, exactly one `grant`/`deny`
/// succeeds, and none does after the request expired. Answering needs a
/// role that may respond at the time of the call. A response the transport
/// refused leaves the request open.
#[derive(Clone)]
pub struct PrivilegeHandler {
    request: RequestId,
    kind: PrivilegeKind,
    requester: UserId,
    requester_name: String,
    state: Arc<AtomicU8>,
    coordinator: Weak<Inner>,
}

impl std::fmt::Debug for PrivilegeHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivilegeHandler")
            .field("request", &self.request)
            .field("kind", &self.kind)
            .field("requester", &self.requester)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

impl PrivilegeHandler {
    pub fn request(&self) -> &RequestId {
        &self.request
    }

    pub fn kind(&self) -> PrivilegeKind {
        self.kind
    }

    pub fn requester(&self) -> UserId {
        self.requester
    }

    pub fn requester_name(&self) -> &str {
        &self.requester_name
    }

    pub fn is_resolved(&self) -> bool {
        self.state.load(Ordering::Acquire) != PENDING
    }

    pub fn grant(&self) -> Result<(), HuddleError> {
        self.respond(true)
    }

    pub fn deny(&self) -> Result<(), HuddleError> {
        self.respond(false)
    }

    fn respond(&self, grant: bool) -> Result<(), HuddleError> {
        let operation = if grant { "grant_privilege" } else { "deny_privilege" };
        let Some(inner) = self.coordinator.upgrade() else {
            return Err(HuddleError::AlreadyResolved(self.request.clone()));
        };
        lock(&inner.local_role).require(RoleAction::RespondPrivilege, operation)?;

        let target = if grant { GRANTED } else { DENIED };
        self.state
            .compare_exchange(PENDING, target, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| HuddleError::AlreadyResolved(self.request.clone()))?;
        let sent = inner.transport.send(TransportCommand::RespondPrivilege {
            request: self.request.clone(),
            grant,
        });
        if let Err(e) = sent {
            // No-op if the request expired meanwhile.
            let _ = self
                .state
                .compare_exchange(target, PENDING, Ordering::AcqRel, Ordering::Acquire);
            tracing::warn!(request = %self.request, "privilege response not sent: {e}");
            return Err(e.into());
        }
        tracing::info!(request = %self.request, kind = ?self.kind, grant, "privilege request answered");
        Ok(())
    }
}

struct Pending {
    kind: PrivilegeKind,
    timer: JoinHandle<()>,
}

struct Inner {
    outgoing: Mutex<HashMap<RequestId, Pending>>,
    incoming: Mutex<HashMap<RequestId, Arc<AtomicU8>>>,
    granted: Mutex<HashSet<PrivilegeKind>>,
    local_role: Mutex<Role>,
    timeout: Duration,
    dispatcher: EventDispatcher,
    transport: Arc<dyn Transport>,
    handle: Handle,
}

/// Tracks both directions of privilege requests plus the privileges the
/// server has granted to the local user.
#[derive(Clone)]
pub struct PrivilegeCoordinator {
    inner: Arc<Inner>,
}

impl PrivilegeCoordinator {
    pub fn new(
        timeout: Duration,
        dispatcher: EventDispatcher,
        transport: Arc<dyn Transport>,
        handle: Handle,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                outgoing: Mutex::new(HashMap::new()),
                incoming: Mutex::new(HashMap::new()),
                granted: Mutex::new(HashSet::new()),
                local_role: Mutex::new(Role::default()),
                timeout,
                dispatcher,
                transport,
                handle,
            }),
        }
    }

    /// Ask the host for `kind`. One request per kind may be pending.
    pub fn request(&self, kind: PrivilegeKind) -> Result<RequestId, HuddleError> {
        let mut outgoing = lock(&self.inner.outgoing);
        if outgoing.values().any(|p| p.kind == kind) {
            return Err(HuddleError::InvalidParams(format!(
                "a {kind:?} request is already pending"
            )));
        }
        let request = RequestId::generate();
        self.inner.transport.send(TransportCommand::RequestPrivilege {
            request: request.clone(),
            kind,
        })?;

        let weak = Arc::downgrade(&self.inner);
        let timer = self
            .inner
            .handle
            .spawn(expire_outgoing(weak, request.clone(), self.inner.timeout));
        outgoing.insert(request.clone(), Pending { kind, timer });
        tracing::info!(request = %request, ?kind, "privilege requested");
        Ok(request)
    }

    /// Settle an outgoing request. Returns its kind if this call resolved
    /// it, `None` if it was unknown or already resolved.
    pub fn resolve(&self, request: &RequestId, outcome: PrivilegeOutcome) -> Option<PrivilegeKind> {
        let pending = lock(&self.inner.outgoing).remove(request);
        let Some(pending) = pending else {
            tracing::debug!(request = %request, ?outcome, "ignoring outcome for settled request");
            return None;
        };
        if outcome != PrivilegeOutcome::TimedOut {
            pending.timer.abort();
        }
        tracing::info!(request = %request, kind = ?pending.kind, ?outcome, "privilege request resolved");
        self.inner.dispatcher.emit(HuddleEvent::PrivilegeRequestResolved {
            request: request.clone(),
            kind: pending.kind,
            outcome,
        });
        Some(pending.kind)
    }

    pub fn pending(&self) -> Vec<(RequestId, PrivilegeKind)> {
        lock(&self.inner.outgoing)
            .iter()
            .map(|(id, p)| (id.clone(), p.kind))
            .collect()
    }

    /// Register a request addressed to the local host and build its handler.
    pub fn incoming(
        &self,
        request: RequestId,
        kind: PrivilegeKind,
        requester: UserId,
        requester_name: String,
    ) -> PrivilegeHandler {
        let state = Arc::new(AtomicU8::new(PENDING));
        lock(&self.inner.incoming).insert(request.clone(), state.clone());

        let weak = Arc::downgrade(&self.inner);
        let id = request.clone();
        let timeout = self.inner.timeout;
        self.inner.handle.spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(inner) = weak.upgrade() else { return };
            if let Some(state) = lock(&inner.incoming).remove(&id) {
                if state
                    .compare_exchange(PENDING, EXPIRED, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    tracing::info!(request = %id, "incoming privilege request expired");
                }
            }
        });

        PrivilegeHandler {
            request,
            kind,
            requester,
            requester_name,
            state,
            coordinator: Arc::downgrade(&self.inner),
        }
    }

    /// Role the local user answers incoming requests with.
    pub fn set_local_role(&self, role: Role) {
        *lock(&self.inner.local_role) = role;
    }

    /// Returns `true` if the set changed.
    pub fn set_granted(&self, kind: PrivilegeKind, granted: bool) -> bool {
        let mut set = lock(&self.inner.granted);
        if granted {
            set.insert(kind)
        } else {
            set.remove(&kind)
        }
    }

    pub fn has_privilege(&self, kind: PrivilegeKind) -> bool {
        lock(&self.inner.granted).contains(&kind)
    }

    pub fn granted(&self) -> HashSet<PrivilegeKind> {
        lock(&self.inner.granted).clone()
    }

    /// Cancel outgoing requests, expire every handler and forget grants.
    pub fn end_session(&self) {
        let drained: Vec<RequestId> = lock(&self.inner.outgoing).keys().cloned().collect();
        for request in drained {
            self.resolve(&request, PrivilegeOutcome::Cancelled);
        }
        for (_, state) in lock(&self.inner.incoming).drain() {
            state.store(EXPIRED, Ordering::Release);
        }
        lock(&self.inner.granted).clear();
        *lock(&self.inner.local_role) = Role::default();
    }
}

async fn expire_outgoing(inner: Weak<Inner>, request: RequestId, timeout: Duration) {
    tokio::time::sleep(timeout).await;
    if let Some(inner) = inner.upgrade() {
        PrivilegeCoordinator { inner }.resolve(&request, PrivilegeOutcome::TimedOut);
    }
}
