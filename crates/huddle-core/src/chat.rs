use std::collections::VecDeque;
use std::sync::Arc;

use uuid::Uuid;

use crate::capabilities::{Capability, ChatPrivilege};
use crate::client::Shared;
use crate::errors::HuddleError;
use crate::events::{ChatDeleteBy, ChatMessage, ChatTarget, HuddleEvent};
use crate::lock;
use crate::privileges::{Role, RoleAction};
use crate::transport::TransportCommand;

/// Message history of the current session, oldest first. Bounded; the
/// oldest messages fall off.
#[derive(Debug)]
pub(crate) struct ChatLog {
    messages: VecDeque<ChatMessage>,
    limit: usize,
}

impl ChatLog {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            messages: VecDeque::new(),
            limit: limit.max(1),
        }
    }

    /// Returns `false` for a message already in the log (our own echo).
    pub(crate) fn push(&mut self, message: ChatMessage) -> bool {
        if self.messages.iter().any(|m| m.id == message.id) {
            return false;
        }
        if self.messages.len() == self.limit {
            self.messages.pop_front();
        }
        self.messages.push_back(message);
        true
    }

    pub(crate) fn remove(&mut self, id: &str) -> Option<ChatMessage> {
        let index = self.messages.iter().position(|m| m.id == id)?;
        self.messages.remove(index)
    }

    pub(crate) fn get(&self, id: &str) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub(crate) fn to_vec(&self) -> Vec<ChatMessage> {
        self.messages.iter().cloned().collect()
    }

    pub(crate) fn clear(&mut self) {
        self.messages.clear();
    }
}

pub(crate) fn on_message(shared: &Shared, mut message: ChatMessage) {
    message.is_mine = shared.local_id() == Some(message.sender);
    if lock(&shared.chat).push(message.clone()) {
        shared.emit(HuddleEvent::ChatMessageReceived(message));
    }
}

pub(crate) fn on_deleted(shared: &Shared, message_id: String, by: ChatDeleteBy) {
    if lock(&shared.chat).remove(&message_id).is_some() {
        shared.emit(HuddleEvent::ChatMessageDeleted { message_id, by });
    }
}

/// In-meeting chat.
pub struct ChatService {
    shared: Arc<Shared>,
}

impl ChatService {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Send `text` to `target`. The message shows up in [`Self::messages`]
    /// and as a `ChatMessageReceived` event right away.
    pub fn send_message(&self, target: ChatTarget, text: &str) -> Result<ChatMessage, HuddleError> {
        const OP: &str = "send_chat";
        let text = text.trim();
        if text.is_empty() {
            return Err(HuddleError::InvalidParams("message is empty".into()));
        }
        let role = self.shared.gate(OP, Some(Capability::Chat))?;
        self.check_target(&target, role)?;

        let myself = self
            .shared
            .core()
            .roster
            .myself()
            .cloned()
            .ok_or(HuddleError::InvalidState {
                operation: OP,
                state: "joining",
            })?;
        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            sender: myself.user_id,
            sender_name: myself.name,
            target: target.clone(),
            text: text.to_string(),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            is_mine: true,
        };
        self.shared.send(TransportCommand::SendChat {
            message_id: message.id.clone(),
            target,
            text: message.text.clone(),
        })?;
        on_message(&self.shared, message.clone());
        Ok(message)
    }

    fn check_target(&self, target: &ChatTarget, role: Role) -> Result<(), HuddleError> {
        const OP: &str = "send_chat";
        let hosts_only =
            !role.is_privileged() && self.shared.capabilities.chat_privilege() == ChatPrivilege::HostsOnly;
        let denied = HuddleError::PermissionDenied {
            operation: OP,
            role,
        };
        match target {
            ChatTarget::Everyone if hosts_only => Err(denied),
            ChatTarget::Everyone => Ok(()),
            ChatTarget::AllPanelists if role.is_privileged() || role == Role::Panelist => Ok(()),
            ChatTarget::AllPanelists => Err(denied),
            ChatTarget::WaitingRoom if role.is_privileged() => Ok(()),
            ChatTarget::WaitingRoom => Err(denied),
            ChatTarget::User(user) => {
                if !self.shared.capabilities.is_enabled(Capability::PrivateChat) {
                    return Err(HuddleError::CapabilityDisabled(Capability::PrivateChat));
                }
                let core = self.shared.core();
                let Some(recipient) = core.roster.participant(*user) else {
                    return Err(HuddleError::ParticipantNotFound(*user));
                };
                if recipient.is_myself {
                    return Err(HuddleError::InvalidParams("cannot message yourself".into()));
                }
                if hosts_only && !recipient.role.is_privileged() {
                    return Err(denied);
                }
                Ok(())
            }
        }
    }

    /// Delete a message. Anyone may delete their own; hosts and co-hosts may
    /// delete any.
    pub fn delete_message(&self, message_id: &str) -> Result<(), HuddleError> {
        const OP: &str = "delete_chat";
        let role = self.shared.gate(OP, Some(Capability::Chat))?;
        let mine = lock(&self.shared.chat)
            .get(message_id)
            .map(|m| m.is_mine)
            .ok_or_else(|| HuddleError::InvalidParams(format!("unknown message '{message_id}'")))?;
        if !mine && !role.is_privileged() {
            return Err(HuddleError::PermissionDenied {
                operation: OP,
                role,
            });
        }
        self.shared.send(TransportCommand::DeleteChat {
            message_id: message_id.to_string(),
        })?;
        let by = if mine {
            ChatDeleteBy::Sender
        } else {
            ChatDeleteBy::Host
        };
        on_deleted(&self.shared, message_id.to_string(), by);
        Ok(())
    }

    /// Takes effect when the server confirms with `ChatPrivilegeChanged`.
    pub fn set_chat_privilege(&self, privilege: ChatPrivilege) -> Result<(), HuddleError> {
        self.shared
            .gate_role("set_chat_privilege", None, RoleAction::ChangeChatPrivilege)?;
        self.shared.send(TransportCommand::SetChatPrivilege(privilege))
    }

    pub fn chat_privilege(&self) -> ChatPrivilege {
        self.shared.capabilities.chat_privilege()
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        lock(&self.shared.chat).to_vec()
    }
}
