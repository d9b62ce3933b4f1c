//! Runs one meeting against the loopback server and logs what happens.
//!
//! Usage: `huddle-sim [config.json]`

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use huddle_core::{
    AreaSet, ChatTarget, ClientConfig, FrameSink, HuddleClient, HuddleError, HuddleEvent,
    JoinParams, LeaveReason, MeetingInfo, ParticipantInfo, PrivilegeKind, Role,
    SessionState, SettingsStore, StreamKind, UserId, VideoFrame,
};
use huddle_media::PlayoutBuffer;
use huddle_sim::{LoopbackTransport, SyntheticAudioSource, SyntheticVideoSource};

const PEER: UserId = UserId(2);

fn load_config() -> Result<ClientConfig, HuddleError> {
    match std::env::args().nth(1) {
        Some(path) => ClientConfig::from_json_file(path),
        None => Ok(ClientConfig::default()),
    }
}

#[derive(Default)]
struct FrameCounter(AtomicU64);

impl FrameSink for FrameCounter {
    fn on_video_frame(&self, _user: UserId, _kind: StreamKind, _frame: &VideoFrame) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}

fn log_event(event: HuddleEvent) {
    match &event {
        HuddleEvent::SessionStateChanged(state) => tracing::info!(state = state.name(), "session"),
        HuddleEvent::SessionEnded { reason } => tracing::info!(?reason, "session ended"),
        HuddleEvent::ChatMessageReceived(m) => {
            tracing::info!(from = %m.sender_name, text = %m.text, "chat")
        }
        other => tracing::debug!(area = ?other.area(), event = ?other, "event"),
    }
}

#[tokio::main]
async fn main() -> Result<(), HuddleError> {
    huddle_sim::init_logging();

    let config = load_config()?;
    let data_dir = dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("huddle");
    let store = SettingsStore::new(&data_dir);
    let settings = store.update(|s| {
        s.display_name.get_or_insert_with(|| "Ada".to_string());
    });
    tracing::debug!(path = %store.path().display(), ?settings, "settings loaded");

    let transport = Arc::new(
        LoopbackTransport::new(MeetingInfo {
            number: Some("123456789".into()),
            topic: "Loopback standup".into(),
            host_name: Some("Grace".into()),
            ..MeetingInfo::default()
        })
        .with_peer(ParticipantInfo::new(PEER, "Grace", Role::Host)),
    );
    let client = HuddleClient::new(config, transport.clone())?;
    client.subscribe(AreaSet::ALL, Arc::new(log_event));

    let params = JoinParams::new("123456789", "").with_settings(&settings);
    client.join(params)?;
    let mut state = client.state_watch();
    let reached = state
        .wait_for(|s| matches!(s, SessionState::InSession | SessionState::Ended(_)))
        .await
        .map_err(|e| HuddleError::Config(format!("client went away: {e}")))?
        .clone();
    if reached != SessionState::InSession {
        tracing::error!(state = reached.name(), "meeting did not start");
        return Ok(());
    }

    client.chat().send_message(ChatTarget::Everyone, "hello from the loopback")?;
    client.hand_raise().raise_hand()?;

    let request = client.request_privilege(PrivilegeKind::RawData)?;
    tracing::info!(%request, "asked for raw data");
    client.flush_events().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let playout = Arc::new(PlayoutBuffer::new(48_000));
    client.subscribe_audio(PEER, playout.clone())?;
    let frames = Arc::new(FrameCounter::default());
    let video = client.subscribe_video(PEER, settings.preferred_resolution, frames.clone())?;

    let ingress = client.frame_ingress();
    let mut camera =
        SyntheticVideoSource::new(client.buffer_pool(), settings.preferred_resolution, 30);
    let mut mic = SyntheticAudioSource::new(client.buffer_pool(), 48_000, 1, 440.0);
    for _ in 0..30 {
        match camera.next_frame() {
            Ok(frame) => {
                ingress.push_video(PEER, frame);
            }
            Err(e) => tracing::warn!("skipping video frame: {e}"),
        }
        match mic.next_frame(Duration::from_millis(20)) {
            Ok(frame) => {
                ingress.push_audio(PEER, frame);
            }
            Err(e) => tracing::warn!("skipping audio frame: {e}"),
        }
        tokio::time::sleep(camera.frame_interval()).await;
    }

    let stats = video.stats();
    tracing::info!(
        delivered = stats.delivered,
        dropped = stats.dropped,
        rendered = frames.0.load(Ordering::Relaxed),
        buffered_audio = ?playout.buffered_duration(),
        discarded_audio = playout.discarded(),
        "media summary"
    );
    client.unsubscribe_media(PEER, StreamKind::Video);

    client.leave(LeaveReason::Leave)?;
    client.flush_events().await;
    Ok(())
}
