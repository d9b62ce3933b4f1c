//! Effective feature availability.
//!
//! A capability is enabled when the server policy allows it, the local
//! toggle is on, and the per-capability rule holds (device permission,
//! local role, chat privilege, granted privileges). Every input change goes
//! through [`CapabilityRegistry::recompute`], which reports the capabilities
//! whose effective value flipped.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::privileges::{PrivilegeKind, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Capability {
    Audio,
    Video,
    Chat,
    PrivateChat,
    ScreenShare,
    BreakoutRooms,
    LiveTranscription,
    Interpretation,
    QAndA,
    WaitingRoom,
    HandRaise,
    LocalRecording,
    RawData,
}

impl Capability {
    pub const ALL: [Capability; 13] = [
        Capability::Audio,
        Capability::Video,
        Capability::Chat,
        Capability::PrivateChat,
        Capability::ScreenShare,
        Capability::BreakoutRooms,
        Capability::LiveTranscription,
        Capability::Interpretation,
        Capability::QAndA,
        Capability::WaitingRoom,
        Capability::HandRaise,
        Capability::LocalRecording,
        Capability::RawData,
    ];
}

/// Who may chat, as set by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChatPrivilege {
    #[default]
    Everyone,
    /// Non-hosts may only write to hosts and co-hosts.
    HostsOnly,
    NoOne,
    /// Public messages only.
    EveryonePublicly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    Camera,
    Microphone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Authorization {
    Authorized,
    Denied,
    NotDetermined,
}

/// Platform device-permission layer.
pub trait DevicePermissions: Send + Sync {
    fn authorization(&self, device: DeviceKind) -> Authorization;
}

/// Treats every device as authorized. Used when the host has no
/// permission layer of its own.
pub struct AllowAllDevices;

impl DevicePermissions for AllowAllDevices {
    fn authorization(&self, _device: DeviceKind) -> Authorization {
        Authorization::Authorized
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityChange {
    pub capability: Capability,
    pub enabled: bool,
}

#[derive(Debug, Clone, Default)]
struct Inputs {
    defaults: HashMap<Capability, bool>,
    policy: HashMap<Capability, bool>,
    toggles: HashMap<Capability, bool>,
    role: Role,
    chat_privilege: ChatPrivilege,
    granted: HashSet<PrivilegeKind>,
}

impl Inputs {
    fn allowed(&self, cap: Capability) -> bool {
        let policy = self
            .policy
            .get(&cap)
            .or_else(|| self.defaults.get(&cap))
            .copied()
            .unwrap_or(true);
        policy && self.toggles.get(&cap).copied().unwrap_or(true)
    }

    fn evaluate(&self, cap: Capability, devices: &dyn DevicePermissions) -> bool {
        if !self.allowed(cap) {
            return false;
        }
        let privileged = self.role.is_privileged();
        match cap {
            Capability::Audio => {
                devices.authorization(DeviceKind::Microphone) == Authorization::Authorized
            }
            Capability::Video => devices.authorization(DeviceKind::Camera) == Authorization::Authorized,
            Capability::Chat => privileged || self.chat_privilege != ChatPrivilege::NoOne,
            Capability::PrivateChat => {
                self.allowed(Capability::Chat)
                    && (privileged
                        || matches!(
                            self.chat_privilege,
                            ChatPrivilege::Everyone | ChatPrivilege::HostsOnly
                        ))
            }
            Capability::LocalRecording => {
                self.role == Role::Host || self.granted.contains(&PrivilegeKind::LocalRecording)
            }
            Capability::RawData => privileged || self.granted.contains(&PrivilegeKind::RawData),
            _ => true,
        }
    }
}

pub struct CapabilityRegistry {
    inputs: RwLock<Inputs>,
    effective: RwLock<BTreeMap<Capability, bool>>,
    devices: Arc<dyn DevicePermissions>,
}

impl CapabilityRegistry {
    pub fn new(defaults: HashMap<Capability, bool>, devices: Arc<dyn DevicePermissions>) -> Self {
        let inputs = Inputs {
            defaults,
            ..Inputs::default()
        };
        let effective = Capability::ALL
            .iter()
            .map(|c| (*c, inputs.evaluate(*c, devices.as_ref())))
            .collect();
        Self {
            inputs: RwLock::new(inputs),
            effective: RwLock::new(effective),
            devices,
        }
    }

    pub fn is_enabled(&self, cap: Capability) -> bool {
        self.effective
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&cap)
            .copied()
            .unwrap_or(false)
    }

    pub fn snapshot(&self) -> BTreeMap<Capability, bool> {
        self.effective
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn chat_privilege(&self) -> ChatPrivilege {
        self.read_inputs(|i| i.chat_privilege)
    }

    pub fn device_authorization(&self, device: DeviceKind) -> Authorization {
        self.devices.authorization(device)
    }

    /// Re-evaluate every capability and return the ones that changed.
    pub fn recompute(&self) -> Vec<CapabilityChange> {
        let inputs = self.inputs.read().unwrap_or_else(PoisonError::into_inner);
        let mut effective = self.effective.write().unwrap_or_else(PoisonError::into_inner);
        let mut changes = Vec::new();
        for cap in Capability::ALL {
            let enabled = inputs.evaluate(cap, self.devices.as_ref());
            if effective.insert(cap, enabled) != Some(enabled) {
                changes.push(CapabilityChange {
                    capability: cap,
                    enabled,
                });
            }
        }
        if !changes.is_empty() {
            tracing::debug!(?changes, "capabilities changed");
        }
        changes
    }

    pub fn apply_policy(&self, policy: HashMap<Capability, bool>) -> Vec<CapabilityChange> {
        self.update(|i| i.policy.extend(policy))
    }

    pub fn set_toggle(&self, cap: Capability, enabled: bool) -> Vec<CapabilityChange> {
        self.update(|i| {
            i.toggles.insert(cap, enabled);
        })
    }

    pub fn set_role(&self, role: Role) -> Vec<CapabilityChange> {
        self.update(|i| i.role = role)
    }

    pub fn set_chat_privilege(&self, privilege: ChatPrivilege) -> Vec<CapabilityChange> {
        self.update(|i| i.chat_privilege = privilege)
    }

    pub fn set_privilege(&self, kind: PrivilegeKind, granted: bool) -> Vec<CapabilityChange> {
        self.update(|i| {
            if granted {
                i.granted.insert(kind);
            } else {
                i.granted.remove(&kind);
            }
        })
    }

    /// Drop per-session inputs (policy, role, chat privilege, grants).
    /// Local toggles survive. Changes are not reported.
    pub fn reset_session(&self) {
        self.update(|i| {
            i.policy.clear();
            i.role = Role::default();
            i.chat_privilege = ChatPrivilege::default();
            i.granted.clear();
        });
    }

    fn update(&self, f: impl FnOnce(&mut Inputs)) -> Vec<CapabilityChange> {
        {
            let mut inputs = self.inputs.write().unwrap_or_else(PoisonError::into_inner);
            f(&mut *inputs);
        }
        self.recompute()
    }

    fn read_inputs<T>(&self, f: impl FnOnce(&Inputs) -> T) -> T {
        f(&*self.inputs.read().unwrap_or_else(PoisonError::into_inner))
    }
}
