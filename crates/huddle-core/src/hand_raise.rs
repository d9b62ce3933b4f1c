use std::collections::BTreeSet;
use std::sync::{Arc, Weak};

use crate::capabilities::Capability;
use crate::client::Shared;
use crate::errors::HuddleError;
use crate::events::HuddleEvent;
use crate::lock;
use crate::privileges::RoleAction;
use crate::transport::TransportCommand;
use huddle_media::UserId;

/// Raised hands ordered by raise time, then user id.
#[derive(Debug, Default)]
pub(crate) struct HandQueue {
    raised: BTreeSet<(i64, UserId)>,
}

impl HandQueue {
    /// Returns the 1-based position, or `None` if the hand was already up.
    pub(crate) fn raise(&mut self, user: UserId, at_ms: i64) -> Option<usize> {
        if self.position(user).is_some() {
            return None;
        }
        self.raised.insert((at_ms, user));
        self.position(user)
    }

    /// Returns `true` if the hand was up.
    pub(crate) fn lower(&mut self, user: UserId) -> bool {
        let before = self.raised.len();
        self.raised.retain(|(_, u)| *u != user);
        self.raised.len() != before
    }

    pub(crate) fn position(&self, user: UserId) -> Option<usize> {
        self.raised
            .iter()
            .position(|(_, u)| *u == user)
            .map(|i| i + 1)
    }

    pub(crate) fn users(&self) -> Vec<UserId> {
        self.raised.iter().map(|(_, u)| *u).collect()
    }

    pub(crate) fn clear(&mut self) {
        self.raised.clear();
    }
}

fn mark(shared: &Shared, user: UserId, raised: bool) {
    if let Some(p) = shared.core().roster.participant_mut(user) {
        p.hand_raised = raised;
    }
}

pub(crate) fn on_raised(shared: &Shared, user: UserId, raised_at_ms: i64) {
    let position = lock(&shared.hands).raise(user, raised_at_ms);
    if let Some(position) = position {
        mark(shared, user, true);
        tracing::debug!(user = %user, position, "hand raised");
        shared.emit(HuddleEvent::HandRaiseChanged {
            user,
            raised: true,
            position: Some(position),
        });
    }
}

pub(crate) fn on_lowered(shared: &Shared, user: UserId) {
    if lock(&shared.hands).lower(user) {
        mark(shared, user, false);
        if shared.local_id() == Some(user) {
            cancel_auto_lower(shared);
        }
        shared.emit(HuddleEvent::HandRaiseChanged {
            user,
            raised: false,
            position: None,
        });
    }
}

fn cancel_auto_lower(shared: &Shared) {
    if let Some(timer) = lock(&shared.auto_lower).take() {
        timer.abort();
    }
}

/// Speaking with a raised hand for the configured time lowers it. Any change
/// in the speaker list restarts the countdown.
pub(crate) fn on_active_speakers(shared: &Arc<Shared>, speakers: &[UserId]) {
    cancel_auto_lower(shared);
    let Some(me) = shared.local_id() else { return };
    if !speakers.contains(&me) || lock(&shared.hands).position(me).is_none() {
        return;
    }

    let weak = Arc::downgrade(shared);
    let delay = shared.config.hand_raise_auto_lower();
    let timer = shared.handle.spawn(async move {
        tokio::time::sleep(delay).await;
        auto_lower(weak, me);
    });
    *lock(&shared.auto_lower) = Some(timer);
}

fn auto_lower(shared: Weak<Shared>, me: UserId) {
    let Some(shared) = shared.upgrade() else { return };
    lock(&shared.auto_lower).take();
    let speaking = shared.core().roster.active_speakers().contains(&me);
    if !speaking || lock(&shared.hands).position(me).is_none() {
        return;
    }
    tracing::info!("auto-lowering hand after speaking");
    if let Err(e) = shared.send(TransportCommand::LowerHand(me)) {
        tracing::warn!("auto-lower failed: {e}");
        return;
    }
    on_lowered(&shared, me);
}

/// Raise and lower hands, and inspect the queue.
pub struct HandRaiseManager {
    shared: Arc<Shared>,
}

impl HandRaiseManager {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Raise the local hand. The queue position is known right away; the
    /// server echo is deduplicated.
    pub fn raise_hand(&self) -> Result<usize, HuddleError> {
        self.shared.gate("raise_hand", Some(Capability::HandRaise))?;
        let me = self.shared.local_user("raise_hand")?;
        if let Some(position) = lock(&self.shared.hands).position(me) {
            return Ok(position);
        }
        self.shared.send(TransportCommand::RaiseHand)?;
        on_raised(&self.shared, me, chrono::Utc::now().timestamp_millis());
        Ok(lock(&self.shared.hands).position(me).unwrap_or(1))
    }

    pub fn lower_hand(&self) -> Result<(), HuddleError> {
        self.shared.gate("lower_hand", Some(Capability::HandRaise))?;
        let me = self.shared.local_user("lower_hand")?;
        if lock(&self.shared.hands).position(me).is_none() {
            return Ok(());
        }
        self.shared.send(TransportCommand::LowerHand(me))?;
        on_lowered(&self.shared, me);
        Ok(())
    }

    /// Host or co-host lowers someone else's hand.
    pub fn lower_user_hand(&self, user: UserId) -> Result<(), HuddleError> {
        if self.shared.local_id() == Some(user) {
            return self.lower_hand();
        }
        self.shared.gate_role(
            "lower_user_hand",
            Some(Capability::HandRaise),
            RoleAction::LowerOthersHands,
        )?;
        self.shared.participant(user)?;
        self.shared.send(TransportCommand::LowerHand(user))
    }

    pub fn lower_all_hands(&self) -> Result<(), HuddleError> {
        self.shared.gate_role(
            "lower_all_hands",
            Some(Capability::HandRaise),
            RoleAction::LowerOthersHands,
        )?;
        self.shared.send(TransportCommand::LowerAllHands)
    }

    pub fn is_hand_raised(&self) -> bool {
        self.shared
            .local_id()
            .is_some_and(|me| lock(&self.shared.hands).position(me).is_some())
    }

    /// 1-based queue position of `user`.
    pub fn position(&self, user: UserId) -> Option<usize> {
        lock(&self.shared.hands).position(user)
    }

    /// Users with a raised hand, earliest first.
    pub fn raised_hands(&self) -> Vec<UserId> {
        lock(&self.shared.hands).users()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::{joined, settle, BOB, ME};
    use crate::events::AreaSet;
    use crate::privileges::Role;
    use crate::transport::TransportEvent;
    use std::time::Duration;

    #[test]
    fn queue_orders_by_raise_time() {
        let mut q = HandQueue::default();
        assert_eq!(q.raise(UserId(3), 300), Some(1));
        assert_eq!(q.raise(UserId(1), 100), Some(1));
        assert_eq!(q.position(UserId(3)), Some(2));
        assert_eq!(q.raise(UserId(3), 50), None);
        assert_eq!(q.users(), vec![UserId(1), UserId(3)]);
        assert!(q.lower(UserId(1)));
        assert!(!q.lower(UserId(1)));
        assert_eq!(q.position(UserId(3)), Some(1));
    }

    #[tokio::test]
    async fn raise_then_remote_raise_queues_behind() {
        let (client, transport) = joined(Role::Attendee).await;
        let hands = client.hand_raise();
        assert_eq!(hands.raise_hand().unwrap(), 1);
        assert_eq!(transport.last(), Some(TransportCommand::RaiseHand));
        assert!(hands.is_hand_raised());

        transport.push(TransportEvent::HandRaised {
            user: BOB,
            raised_at_ms: i64::MAX,
        });
        settle(&client).await;
        assert_eq!(hands.raised_hands(), vec![ME, BOB]);
        assert_eq!(hands.position(BOB), Some(2));
        assert!(client.participant(BOB).unwrap().hand_raised);
    }

    #[tokio::test]
    async fn attendee_cannot_lower_others() {
        let (client, _transport) = joined(Role::Attendee).await;
        assert!(matches!(
            client.hand_raise().lower_user_hand(BOB),
            Err(HuddleError::PermissionDenied { .. })
        ));
        assert!(matches!(
            client.hand_raise().lower_all_hands(),
            Err(HuddleError::PermissionDenied { .. })
        ));
    }

    #[tokio::test]
    async fn host_lowers_remote_hand() {
        let (client, transport) = joined(Role::Host).await;
        client.hand_raise().lower_user_hand(BOB).unwrap();
        assert_eq!(transport.last(), Some(TransportCommand::LowerHand(BOB)));
    }

    #[tokio::test(start_paused = true)]
    async fn speaking_lowers_raised_hand() {
        let (client, transport) = joined(Role::Attendee).await;
        let (_, mut rx) = client.subscribe_channel(AreaSet::ALL);
        client.hand_raise().raise_hand().unwrap();

        transport.push(TransportEvent::ActiveSpeakers(vec![ME]));
        settle(&client).await;
        assert!(client.hand_raise().is_hand_raised());

        tokio::time::sleep(Duration::from_secs(4)).await;
        settle(&client).await;
        assert!(!client.hand_raise().is_hand_raised());
        assert_eq!(transport.last(), Some(TransportCommand::LowerHand(ME)));

        let mut lowered = false;
        while let Ok(event) = rx.try_recv() {
            if let HuddleEvent::HandRaiseChanged { user, raised: false, .. } = event {
                lowered |= user == ME;
            }
        }
        assert!(lowered);
    }

    #[tokio::test(start_paused = true)]
    async fn silence_cancels_auto_lower() {
        let (client, transport) = joined(Role::Attendee).await;
        client.hand_raise().raise_hand().unwrap();
        transport.push(TransportEvent::ActiveSpeakers(vec![ME]));
        settle(&client).await;
        transport.push(TransportEvent::ActiveSpeakers(vec![BOB]));
        settle(&client).await;

        tokio::time::sleep(Duration::from_secs(4)).await;
        settle(&client).await;
        assert!(client.hand_raise().is_hand_raised());
    }
}
