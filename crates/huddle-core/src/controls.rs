//! Local and remote audio/video control.
//!
//! Local mute state follows the server: `mute`/`unmute` send the command and
//! the roster changes when the matching `AudioStatus`/`VideoStatus` event
//! comes back.

use std::sync::Arc;

use crate::capabilities::{Authorization, Capability, DeviceKind};
use crate::client::Shared;
use crate::errors::HuddleError;
use crate::events::{AudioStatus, HuddleEvent, VideoStatus};
use crate::lock;
use crate::privileges::RoleAction;
use crate::transport::TransportCommand;
use huddle_media::UserId;

fn require_device(shared: &Shared, device: DeviceKind, capability: Capability) -> Result<(), HuddleError> {
    match shared.capabilities.device_authorization(device) {
        Authorization::Authorized => Ok(()),
        other => {
            tracing::warn!(?device, ?other, "device not authorized");
            Err(HuddleError::CapabilityDisabled(capability))
        }
    }
}

fn require_remote(shared: &Shared, user: UserId) -> Result<(), HuddleError> {
    shared.participant(user)?;
    if shared.local_id() == Some(user) {
        return Err(HuddleError::InvalidParams(
            "use the local controls for yourself".into(),
        ));
    }
    Ok(())
}

pub struct AudioControls {
    shared: Arc<Shared>,
}

impl AudioControls {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub fn mute(&self) -> Result<(), HuddleError> {
        self.shared.gate("mute_audio", None)?;
        self.shared.send(TransportCommand::MuteMyAudio(true))
    }

    pub fn unmute(&self) -> Result<(), HuddleError> {
        self.shared.gate("unmute_audio", Some(Capability::Audio))?;
        require_device(&self.shared, DeviceKind::Microphone, Capability::Audio)?;
        self.shared.send(TransportCommand::MuteMyAudio(false))
    }

    /// Local mute state as last confirmed by the server. Muted until joined.
    pub fn is_muted(&self) -> bool {
        self.shared
            .core()
            .roster
            .myself()
            .map_or(true, |p| p.audio.muted)
    }

    pub fn status(&self, user: UserId) -> Option<AudioStatus> {
        self.shared.core().roster.participant(user).map(|p| p.audio)
    }

    pub fn mute_user(&self, user: UserId) -> Result<(), HuddleError> {
        self.shared
            .gate_role("mute_user", None, RoleAction::MuteOthers)?;
        require_remote(&self.shared, user)?;
        self.shared
            .send(TransportCommand::MuteUserAudio { user, mute: true })
    }

    /// Hosts cannot unmute others, only ask them to.
    pub fn ask_to_unmute(&self, user: UserId) -> Result<(), HuddleError> {
        self.shared
            .gate_role("ask_to_unmute", None, RoleAction::MuteOthers)?;
        require_remote(&self.shared, user)?;
        self.shared
            .send(TransportCommand::MuteUserAudio { user, mute: false })
    }

    pub fn mute_all(&self, allow_self_unmute: bool) -> Result<(), HuddleError> {
        self.shared
            .gate_role("mute_all", None, RoleAction::MuteOthers)?;
        self.shared
            .send(TransportCommand::MuteAllAudio { allow_self_unmute })
    }

    pub fn ask_all_to_unmute(&self) -> Result<(), HuddleError> {
        self.shared
            .gate_role("ask_all_to_unmute", None, RoleAction::MuteOthers)?;
        self.shared.send(TransportCommand::AskAllToUnmute)
    }
}

pub struct VideoControls {
    shared: Arc<Shared>,
}

impl VideoControls {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub fn start(&self) -> Result<(), HuddleError> {
        self.shared.gate("start_video", Some(Capability::Video))?;
        require_device(&self.shared, DeviceKind::Camera, Capability::Video)?;
        self.shared.send(TransportCommand::SetMyVideo(true))
    }

    pub fn stop(&self) -> Result<(), HuddleError> {
        self.shared.gate("stop_video", None)?;
        self.shared.send(TransportCommand::SetMyVideo(false))
    }

    pub fn switch_camera(&self) -> Result<(), HuddleError> {
        self.shared.gate("switch_camera", Some(Capability::Video))?;
        require_device(&self.shared, DeviceKind::Camera, Capability::Video)?;
        self.shared.send(TransportCommand::SwitchCamera)
    }

    pub fn is_sending(&self) -> bool {
        self.shared
            .core()
            .roster
            .myself()
            .is_some_and(|p| p.video.sending)
    }

    pub fn status(&self, user: UserId) -> Option<VideoStatus> {
        self.shared.core().roster.participant(user).map(|p| p.video)
    }

    pub fn stop_user_video(&self, user: UserId) -> Result<(), HuddleError> {
        self.shared
            .gate_role("stop_user_video", None, RoleAction::ManageOthersVideo)?;
        require_remote(&self.shared, user)?;
        self.shared.send(TransportCommand::StopUserVideo(user))
    }

    pub fn ask_user_to_start_video(&self, user: UserId) -> Result<(), HuddleError> {
        self.shared
            .gate_role("ask_user_to_start_video", None, RoleAction::ManageOthersVideo)?;
        require_remote(&self.shared, user)?;
        self.shared.send(TransportCommand::AskUserStartVideo(user))
    }

    /// Pin a participant in the local layout. `None` unpins. Local only.
    pub fn pin_video(&self, user: Option<UserId>) -> Result<(), HuddleError> {
        // Core lock spans the roster check and the write, as in `on_user_left`.
        let core = self.shared.core();
        core.machine.require_in_session("pin_video")?;
        if let Some(user) = user {
            if core.roster.participant(user).is_none() {
                return Err(HuddleError::ParticipantNotFound(user));
            }
        }
        let mut pinned = lock(&self.shared.pinned);
        if *pinned != user {
            *pinned = user;
            self.shared.emit(HuddleEvent::PinChanged(user));
        }
        Ok(())
    }

    pub fn pinned(&self) -> Option<UserId> {
        *lock(&self.shared.pinned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::DevicePermissions;
    use crate::client::testing::{enter, joined, settle, BOB, ME};
    use crate::client::HuddleClient;
    use crate::events::AreaSet;
    use crate::privileges::Role;
    use crate::session::MeetingInfo;
    use crate::settings::ClientConfig;
    use crate::transport::testing::RecordingTransport;
    use crate::transport::TransportEvent;

    struct NoCamera;

    impl DevicePermissions for NoCamera {
        fn authorization(&self, device: DeviceKind) -> Authorization {
            match device {
                DeviceKind::Camera => Authorization::Denied,
                DeviceKind::Microphone => Authorization::Authorized,
            }
        }
    }

    #[tokio::test]
    async fn local_mute_follows_server() {
        let (client, transport) = joined(Role::Attendee).await;
        let audio = client.audio();
        assert!(!audio.is_muted());
        audio.mute().unwrap();
        assert_eq!(transport.last(), Some(TransportCommand::MuteMyAudio(true)));
        assert!(!audio.is_muted());

        transport.push(TransportEvent::AudioStatus {
            user: ME,
            status: AudioStatus {
                muted: true,
                ..AudioStatus::default()
            },
        });
        settle(&client).await;
        assert!(audio.is_muted());
    }

    #[tokio::test]
    async fn attendee_cannot_control_others() {
        let (client, _transport) = joined(Role::Attendee).await;
        assert!(matches!(
            client.audio().mute_user(BOB),
            Err(HuddleError::PermissionDenied { .. })
        ));
        assert!(matches!(
            client.video().stop_user_video(BOB),
            Err(HuddleError::PermissionDenied { .. })
        ));
    }

    #[tokio::test]
    async fn host_controls_remote_media() {
        let (client, transport) = joined(Role::Host).await;
        client.audio().mute_user(BOB).unwrap();
        assert_eq!(
            transport.last(),
            Some(TransportCommand::MuteUserAudio { user: BOB, mute: true })
        );
        client.audio().mute_all(false).unwrap();
        client.video().ask_user_to_start_video(BOB).unwrap();
        assert_eq!(transport.last(), Some(TransportCommand::AskUserStartVideo(BOB)));
        assert!(matches!(
            client.audio().mute_user(ME),
            Err(HuddleError::InvalidParams(_))
        ));
        assert_eq!(
            client.audio().mute_user(UserId(77)),
            Err(HuddleError::ParticipantNotFound(UserId(77)))
        );
    }

    #[tokio::test]
    async fn denied_camera_disables_video() {
        let transport = Arc::new(RecordingTransport::default());
        let client =
            HuddleClient::with_devices(ClientConfig::default(), transport.clone(), Arc::new(NoCamera))
                .unwrap();
        enter(&client, &transport, Role::Attendee, MeetingInfo::default()).await;
        assert_eq!(
            client.video().start(),
            Err(HuddleError::CapabilityDisabled(Capability::Video))
        );
        client.audio().unmute().unwrap();
    }

    #[tokio::test]
    async fn pin_is_local_and_cleared_on_leave() {
        let (client, transport) = joined(Role::Attendee).await;
        let (_, mut rx) = client.subscribe_channel(AreaSet::from(crate::events::EventArea::Video));
        let sent = transport.sent().len();
        client.video().pin_video(Some(BOB)).unwrap();
        assert_eq!(client.video().pinned(), Some(BOB));
        assert_eq!(transport.sent().len(), sent);

        transport.push(TransportEvent::UserLeft(BOB));
        settle(&client).await;
        assert_eq!(client.video().pinned(), None);
        assert!(matches!(rx.recv().await, Some(HuddleEvent::PinChanged(Some(_)))));
        assert!(matches!(rx.recv().await, Some(HuddleEvent::PinChanged(None))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn departed_user_never_stays_pinned() {
        let (client, transport) = joined(Role::Attendee).await;
        let video = client.video();
        let pinning = tokio::task::spawn_blocking(move || {
            for _ in 0..1_000 {
                if video.pin_video(Some(BOB)).is_err() {
                    break;
                }
            }
        });
        transport.push(TransportEvent::UserLeft(BOB));
        pinning.await.unwrap();
        settle(&client).await;

        assert!(client.participant(BOB).is_none());
        assert_eq!(client.video().pinned(), None);
        assert_eq!(
            client.video().pin_video(Some(BOB)),
            Err(HuddleError::ParticipantNotFound(BOB))
        );
    }

    #[tokio::test]
    async fn controls_need_a_session() {
        let (client, _transport) = crate::client::testing::client();
        assert!(matches!(
            client.audio().mute(),
            Err(HuddleError::InvalidState { .. })
        ));
        assert!(matches!(
            client.video().start(),
            Err(HuddleError::InvalidState { .. })
        ));
    }
}
