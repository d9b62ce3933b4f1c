use std::sync::Arc;

use crate::capabilities::Capability;
use crate::client::Shared;
use crate::errors::HuddleError;
use crate::events::ParticipantInfo;
use crate::privileges::RoleAction;
use crate::transport::TransportCommand;
use huddle_media::UserId;

/// Waiting room, from both sides: the local user waiting to be admitted,
/// and hosts admitting others.
pub struct WaitingRoomService {
    shared: Arc<Shared>,
}

impl WaitingRoomService {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// The local user is held in the waiting room.
    pub fn is_in_waiting_room(&self) -> bool {
        self.shared.core().machine.in_waiting_room()
    }

    pub fn waiting_users(&self) -> Vec<ParticipantInfo> {
        self.shared.core().roster.waiting().cloned().collect()
    }

    pub fn admit(&self, user: UserId) -> Result<(), HuddleError> {
        self.gate("admit_user")?;
        self.require_waiting(user)?;
        self.shared.send(TransportCommand::AdmitUser(user))
    }

    pub fn admit_all(&self) -> Result<(), HuddleError> {
        self.gate("admit_all")?;
        self.shared.send(TransportCommand::AdmitAll)
    }

    pub fn put_in_waiting_room(&self, user: UserId) -> Result<(), HuddleError> {
        self.gate("put_in_waiting_room")?;
        let target = self.shared.participant(user)?;
        if target.is_myself {
            return Err(HuddleError::InvalidParams(
                "cannot move yourself to the waiting room".into(),
            ));
        }
        if target.in_waiting_room {
            return Ok(());
        }
        self.shared.send(TransportCommand::PutInWaitingRoom(user))
    }

    fn gate(&self, operation: &'static str) -> Result<(), HuddleError> {
        self.shared.gate_role(
            operation,
            Some(Capability::WaitingRoom),
            RoleAction::AdmitFromWaitingRoom,
        )
    }

    fn require_waiting(&self, user: UserId) -> Result<(), HuddleError> {
        if self.shared.participant(user)?.in_waiting_room {
            Ok(())
        } else {
            Err(HuddleError::InvalidParams(format!(
                "{user} is not in the waiting room"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::{client, joined, settle, BOB};
    use crate::events::{AreaSet, EventArea, HuddleEvent};
    use crate::params::JoinParams;
    use crate::privileges::Role;
    use crate::session::SessionState;
    use crate::transport::TransportEvent;

    #[tokio::test]
    async fn local_user_waits_until_confirmed() {
        let (client, transport) = client();
        let (_, mut rx) = client.subscribe_channel(AreaSet::from(EventArea::WaitingRoom));
        client.join(JoinParams::new("123456789", "Me")).unwrap();
        transport.push(TransportEvent::Connected);
        transport.push(TransportEvent::WaitingRoomStatus { waiting: true });
        settle(&client).await;

        assert_eq!(client.state(), SessionState::Joining);
        assert!(client.waiting_room().is_in_waiting_room());
        assert!(matches!(
            rx.recv().await,
            Some(HuddleEvent::WaitingRoomStatusChanged { waiting: true })
        ));
        assert!(matches!(
            client.chat().send_message(crate::events::ChatTarget::Everyone, "hi"),
            Err(HuddleError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn host_admits_waiting_user() {
        let (client, transport) = joined(Role::Host).await;
        let (_, mut rx) = client.subscribe_channel(AreaSet::of(&[EventArea::WaitingRoom, EventArea::User]));
        let mut carol = ParticipantInfo::new(UserId(3), "Carol", Role::Attendee);
        carol.in_waiting_room = true;
        transport.push(TransportEvent::UserJoined(carol));
        settle(&client).await;

        let waiting = client.waiting_room().waiting_users();
        assert_eq!(waiting.len(), 1);
        assert!(matches!(rx.recv().await, Some(HuddleEvent::UserWaiting(_))));

        assert!(client.waiting_room().admit(BOB).is_err());
        client.waiting_room().admit(UserId(3)).unwrap();
        assert_eq!(transport.last(), Some(TransportCommand::AdmitUser(UserId(3))));

        transport.push(TransportEvent::UserAdmitted(UserId(3)));
        settle(&client).await;
        assert!(client.waiting_room().waiting_users().is_empty());
        assert!(matches!(rx.recv().await, Some(HuddleEvent::UserAdmitted(UserId(3)))));
        assert!(matches!(rx.recv().await, Some(HuddleEvent::UserJoined(_))));
    }

    #[tokio::test]
    async fn attendee_cannot_admit() {
        let (client, _transport) = joined(Role::Attendee).await;
        assert!(matches!(
            client.waiting_room().admit_all(),
            Err(HuddleError::PermissionDenied { .. })
        ));
    }

    #[tokio::test]
    async fn disabled_waiting_room() {
        let (client, _transport) = joined(Role::Host).await;
        client.set_feature_enabled(Capability::WaitingRoom, false);
        assert_eq!(
            client.waiting_room().put_in_waiting_room(BOB),
            Err(HuddleError::CapabilityDisabled(Capability::WaitingRoom))
        );
    }
}
