#![allow(dead_code)]

use std::sync::Arc;

use huddle_core::{
    AreaSet, ClientConfig, HuddleClient, HuddleEvent, JoinParams, MeetingInfo, ParticipantInfo,
    Role, SessionState, UserId,
};
use huddle_sim::LoopbackTransport;
use tokio::sync::mpsc;

pub const ME: UserId = UserId(1);
pub const BOB: UserId = UserId(2);
pub const CAROL: UserId = UserId(3);

pub fn meeting() -> MeetingInfo {
    MeetingInfo {
        number: Some("123456789".into()),
        topic: "Weekly sync".into(),
        ..MeetingInfo::default()
    }
}

/// Loopback with Bob as host and Carol as attendee.
pub fn transport() -> LoopbackTransport {
    huddle_sim::init_logging();
    LoopbackTransport::new(meeting())
        .with_peer(ParticipantInfo::new(BOB, "Bob", Role::Host))
        .with_peer(ParticipantInfo::new(CAROL, "Carol", Role::Attendee))
}

pub fn client(transport: LoopbackTransport) -> (HuddleClient, Arc<LoopbackTransport>) {
    client_with(ClientConfig::default(), transport)
}

pub fn client_with(
    config: ClientConfig,
    transport: LoopbackTransport,
) -> (HuddleClient, Arc<LoopbackTransport>) {
    let transport = Arc::new(transport);
    let client = HuddleClient::new(config, transport.clone()).unwrap();
    (client, transport)
}

/// Let the session loop drain and observers catch up.
pub async fn settle(client: &HuddleClient) {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
    client.flush_events().await;
}

pub async fn join(client: &HuddleClient) {
    client.join(JoinParams::new("123456789", "Ada")).unwrap();
    settle(client).await;
}

pub async fn joined(transport: LoopbackTransport) -> (HuddleClient, Arc<LoopbackTransport>) {
    let (client, transport) = client(transport);
    join(&client).await;
    assert_eq!(client.state(), SessionState::InSession);
    (client, transport)
}

pub fn events(client: &HuddleClient) -> mpsc::UnboundedReceiver<HuddleEvent> {
    client.subscribe_channel(AreaSet::ALL).1
}

pub fn drain(rx: &mut mpsc::UnboundedReceiver<HuddleEvent>) -> Vec<HuddleEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}
