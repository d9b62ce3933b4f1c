use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::capabilities::Capability;
use crate::client::Shared;
use crate::errors::HuddleError;
use crate::events::HuddleEvent;
use crate::lock;
use crate::privileges::RoleAction;
use crate::transport::TransportCommand;
use huddle_media::UserId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakoutRoom {
    pub id: String,
    pub name: String,
    /// Users assigned to the room.
    pub members: Vec<UserId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BreakoutStatus {
    #[default]
    NotStarted,
    Open,
    /// Rooms are counting down before everyone returns.
    Closing,
    Closed,
}

#[derive(Debug, Default)]
pub(crate) struct BreakoutState {
    rooms: Vec<BreakoutRoom>,
    status: BreakoutStatus,
    current: Option<String>,
}

impl BreakoutState {
    fn room(&self, id: &str) -> Option<&BreakoutRoom> {
        self.rooms.iter().find(|r| r.id == id)
    }
}

pub(crate) fn on_rooms(shared: &Shared, rooms: Vec<BreakoutRoom>) {
    lock(&shared.breakout).rooms = rooms.clone();
    shared.emit(HuddleEvent::BreakoutRoomsUpdated(rooms));
}

pub(crate) fn on_status(shared: &Shared, status: BreakoutStatus) {
    {
        let mut state = lock(&shared.breakout);
        if state.status == status {
            return;
        }
        state.status = status;
    }
    tracing::info!(?status, "breakout status changed");
    shared.emit(HuddleEvent::BreakoutStatusChanged(status));
    if status == BreakoutStatus::Closed {
        on_membership(shared, None);
    }
}

pub(crate) fn on_invitation(shared: &Shared, room_id: String) {
    let room_name = lock(&shared.breakout)
        .room(&room_id)
        .map(|r| r.name.clone())
        .unwrap_or_default();
    shared.emit(HuddleEvent::BreakoutInvitation { room_id, room_name });
}

pub(crate) fn on_membership(shared: &Shared, room_id: Option<String>) {
    {
        let mut state = lock(&shared.breakout);
        if state.current == room_id {
            return;
        }
        state.current = room_id.clone();
    }
    shared.emit(HuddleEvent::BreakoutMembershipChanged { room_id });
}

/// Breakout rooms as seen by a participant, plus the host broadcast.
pub struct BreakoutService {
    shared: Arc<Shared>,
}

impl BreakoutService {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub fn rooms(&self) -> Vec<BreakoutRoom> {
        lock(&self.shared.breakout).rooms.clone()
    }

    pub fn status(&self) -> BreakoutStatus {
        lock(&self.shared.breakout).status
    }

    pub fn current_room(&self) -> Option<String> {
        lock(&self.shared.breakout).current.clone()
    }

    /// Join a room while rooms are open. Participants may only join the
    /// room they were assigned to; hosts and co-hosts may join any.
    pub fn join(&self, room_id: &str) -> Result<(), HuddleError> {
        const OP: &str = "join_breakout_room";
        let role = self.shared.gate(OP, Some(Capability::BreakoutRooms))?;
        let me = self.shared.local_user(OP)?;
        {
            let state = lock(&self.shared.breakout);
            if state.status != BreakoutStatus::Open {
                return Err(HuddleError::InvalidParams(format!(
                    "breakout rooms are {:?}",
                    state.status
                )));
            }
            let room = state
                .room(room_id)
                .ok_or_else(|| HuddleError::InvalidParams(format!("unknown room '{room_id}'")))?;
            if !role.is_privileged() && !room.members.contains(&me) {
                return Err(HuddleError::PermissionDenied {
                    operation: OP,
                    role,
                });
            }
            if state.current.as_deref() == Some(room_id) {
                return Ok(());
            }
        }
        self.shared
            .send(TransportCommand::JoinBreakoutRoom(room_id.to_string()))
    }

    pub fn leave(&self) -> Result<(), HuddleError> {
        self.shared
            .gate("leave_breakout_room", Some(Capability::BreakoutRooms))?;
        if lock(&self.shared.breakout).current.is_none() {
            return Err(HuddleError::InvalidParams("not in a breakout room".into()));
        }
        self.shared.send(TransportCommand::LeaveBreakoutRoom)
    }

    /// Message every open room.
    pub fn broadcast(&self, text: &str) -> Result<(), HuddleError> {
        self.shared.gate_role(
            "broadcast_to_breakout_rooms",
            Some(Capability::BreakoutRooms),
            RoleAction::ManageBreakoutRooms,
        )?;
        let text = text.trim();
        if text.is_empty() {
            return Err(HuddleError::InvalidParams("message is empty".into()));
        }
        if self.status() != BreakoutStatus::Open {
            return Err(HuddleError::InvalidParams("breakout rooms are not open".into()));
        }
        self.shared
            .send(TransportCommand::BroadcastToBreakoutRooms(text.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::{joined, settle, BOB, ME};
    use crate::events::{AreaSet, EventArea};
    use crate::privileges::Role;
    use crate::transport::TransportEvent;

    fn rooms() -> Vec<BreakoutRoom> {
        vec![
            BreakoutRoom {
                id: "r1".into(),
                name: "Room 1".into(),
                members: vec![ME],
            },
            BreakoutRoom {
                id: "r2".into(),
                name: "Room 2".into(),
                members: vec![BOB],
            },
        ]
    }

    #[tokio::test]
    async fn attendee_joins_assigned_room_only() {
        let (client, transport) = joined(Role::Attendee).await;
        let breakout = client.breakout();
        assert!(breakout.join("r1").is_err());

        transport.push(TransportEvent::BreakoutRooms(rooms()));
        transport.push(TransportEvent::BreakoutStatus(BreakoutStatus::Open));
        settle(&client).await;
        assert_eq!(breakout.status(), BreakoutStatus::Open);

        assert!(matches!(
            breakout.join("r2"),
            Err(HuddleError::PermissionDenied { .. })
        ));
        assert!(matches!(breakout.join("nope"), Err(HuddleError::InvalidParams(_))));
        breakout.join("r1").unwrap();
        assert_eq!(
            transport.last(),
            Some(TransportCommand::JoinBreakoutRoom("r1".into()))
        );
    }

    #[tokio::test]
    async fn closing_rooms_clears_membership() {
        let (client, transport) = joined(Role::Attendee).await;
        let (_, mut rx) = client.subscribe_channel(AreaSet::from(EventArea::BreakoutRoom));
        transport.push(TransportEvent::BreakoutRooms(rooms()));
        transport.push(TransportEvent::BreakoutStatus(BreakoutStatus::Open));
        transport.push(TransportEvent::BreakoutInvitation {
            room_id: "r1".into(),
        });
        transport.push(TransportEvent::BreakoutMembership {
            room_id: Some("r1".into()),
        });
        settle(&client).await;
        assert_eq!(client.breakout().current_room().as_deref(), Some("r1"));

        transport.push(TransportEvent::BreakoutStatus(BreakoutStatus::Closed));
        settle(&client).await;
        assert_eq!(client.breakout().current_room(), None);

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(events.iter().any(|e| matches!(
            e,
            HuddleEvent::BreakoutInvitation { room_name, .. } if room_name == "Room 1"
        )));
        assert!(matches!(
            events.last(),
            Some(HuddleEvent::BreakoutMembershipChanged { room_id: None })
        ));
    }

    #[tokio::test]
    async fn broadcast_is_host_only() {
        let (client, transport) = joined(Role::CoHost).await;
        transport.push(TransportEvent::BreakoutStatus(BreakoutStatus::Open));
        settle(&client).await;
        client.breakout().broadcast("5 minutes left").unwrap();

        let (attendee, transport) = joined(Role::Attendee).await;
        transport.push(TransportEvent::BreakoutStatus(BreakoutStatus::Open));
        settle(&attendee).await;
        assert!(matches!(
            attendee.breakout().broadcast("hi"),
            Err(HuddleError::PermissionDenied { .. })
        ));
    }
}
