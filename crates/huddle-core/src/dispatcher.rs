//! Event fan-out.
//!
//! One tokio task per [`EventArea`], each draining an unbounded FIFO. Events
//! of one area reach every observer in emission order; areas do not wait on
//! each other. Listener lists are snapshotted per event, so observers may
//! register or unregister from inside a callback.
//!
//! The terminal event is queued on every area. Each observer gets it once,
//! from whichever of its areas reaches it last, so it always follows the
//! events its areas delivered before it.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use futures_util::future::join_all;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

use crate::events::{AreaSet, EventArea, HuddleEvent, HuddleEventListener};
use crate::lock;

/// Identifies one observer registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverToken(u64);

struct Registration {
    token: ObserverToken,
    areas: AreaSet,
    listener: Arc<dyn HuddleEventListener>,
}

impl Registration {
    /// An observer with no areas still hears the terminal event, via Session.
    fn hears(&self, area: EventArea) -> bool {
        self.areas.contains(area) || (self.areas.is_empty() && area == EventArea::Session)
    }

    fn area_count(&self) -> usize {
        EventArea::ALL
            .into_iter()
            .filter(|area| self.hears(*area))
            .count()
    }
}

/// Areas each observer still has to pass before the terminal event is due.
struct Terminal {
    event: HuddleEvent,
    pending: Mutex<Vec<(Arc<Registration>, usize)>>,
}

type Registry = Arc<RwLock<Vec<Arc<Registration>>>>;

enum Envelope {
    Event(HuddleEvent),
    Terminal(Arc<Terminal>),
    Flush(oneshot::Sender<()>),
}

struct ChannelListener(mpsc::UnboundedSender<HuddleEvent>);

impl HuddleEventListener for ChannelListener {
    fn on_event(&self, event: HuddleEvent) {
        // Receiver gone means the observer stopped listening.
        let _ = self.0.send(event);
    }
}

struct Inner {
    registry: Registry,
    queues: HashMap<EventArea, mpsc::UnboundedSender<Envelope>>,
    next_token: AtomicU64,
}

#[derive(Clone)]
pub struct EventDispatcher {
    inner: Arc<Inner>,
}

impl EventDispatcher {
    /// Spawns the per-area delivery tasks on `handle`. They exit once every
    /// clone of the dispatcher is dropped.
    pub fn new(handle: &Handle) -> Self {
        let registry: Registry = Arc::new(RwLock::new(Vec::new()));
        let mut queues = HashMap::new();
        for area in EventArea::ALL {
            let (tx, rx) = mpsc::unbounded_channel();
            handle.spawn(area_loop(area, rx, registry.clone()));
            queues.insert(area, tx);
        }
        Self {
            inner: Arc::new(Inner {
                registry,
                queues,
                next_token: AtomicU64::new(1),
            }),
        }
    }

    pub fn subscribe(&self, areas: AreaSet, listener: Arc<dyn HuddleEventListener>) -> ObserverToken {
        let token = ObserverToken(self.inner.next_token.fetch_add(1, Ordering::Relaxed));
        self.inner
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(Registration {
                token,
                areas,
                listener,
            }));
        tracing::debug!(?token, ?areas, "observer registered");
        token
    }

    /// Channel-backed registration for async consumers.
    pub fn subscribe_channel(
        &self,
        areas: AreaSet,
    ) -> (ObserverToken, mpsc::UnboundedReceiver<HuddleEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let token = self.subscribe(areas, Arc::new(ChannelListener(tx)));
        (token, rx)
    }

    /// Returns `false` if the token was unknown. An event already being
    /// delivered may still reach the observer once.
    pub fn unsubscribe(&self, token: ObserverToken) -> bool {
        let mut registry = self
            .inner
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = registry.len();
        registry.retain(|r| r.token != token);
        before != registry.len()
    }

    pub fn observer_count(&self) -> usize {
        self.inner
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Queue `event` on its area. Never blocks.
    pub fn emit(&self, event: HuddleEvent) {
        if event.is_terminal() {
            self.emit_terminal(event);
            return;
        }
        let area = event.area();
        if let Some(queue) = self.inner.queues.get(&area) {
            if queue.send(Envelope::Event(event)).is_err() {
                tracing::warn!(?area, "event area task is gone, event dropped");
            }
        }
    }

    fn emit_terminal(&self, event: HuddleEvent) {
        let pending = self
            .inner
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|r| (r.clone(), r.area_count()))
            .collect();
        let terminal = Arc::new(Terminal {
            event,
            pending: Mutex::new(pending),
        });
        for queue in self.inner.queues.values() {
            if queue.send(Envelope::Terminal(terminal.clone())).is_err() {
                tracing::warn!("event area task is gone, terminal event dropped");
            }
        }
    }

    /// Resolves once every event emitted before the call was delivered.
    pub async fn flush(&self) {
        let mut pending = Vec::with_capacity(self.inner.queues.len());
        for queue in self.inner.queues.values() {
            let (tx, rx) = oneshot::channel();
            if queue.send(Envelope::Flush(tx)).is_ok() {
                pending.push(rx);
            }
        }
        join_all(pending).await;
    }
}

async fn area_loop(
    area: EventArea,
    mut rx: mpsc::UnboundedReceiver<Envelope>,
    registry: Registry,
) {
    while let Some(envelope) = rx.recv().await {
        match envelope {
            Envelope::Event(event) => {
                let targets: Vec<Arc<Registration>> = registry
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .iter()
                    .filter(|r| r.areas.contains(area))
                    .cloned()
                    .collect();
                deliver(area, &targets, &event);
            }
            Envelope::Terminal(terminal) => {
                let due: Vec<Arc<Registration>> = lock(&terminal.pending)
                    .iter_mut()
                    .filter_map(|(r, left)| {
                        if !r.hears(area) {
                            return None;
                        }
                        *left = left.saturating_sub(1);
                        (*left == 0).then(|| r.clone())
                    })
                    .collect();
                let registered = registry.read().unwrap_or_else(PoisonError::into_inner);
                let due: Vec<Arc<Registration>> = due
                    .into_iter()
                    .filter(|r| registered.iter().any(|cur| cur.token == r.token))
                    .collect();
                drop(registered);
                deliver(area, &due, &terminal.event);
            }
            Envelope::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::debug!(?area, "event area loop exited");
}

fn deliver(area: EventArea, targets: &[Arc<Registration>], event: &HuddleEvent) {
    for registration in targets {
        let listener = registration.listener.clone();
        let event = event.clone();
        if catch_unwind(AssertUnwindSafe(|| listener.on_event(event))).is_err() {
            tracing::error!(?area, token = ?registration.token, "observer panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::EndReason;
    use huddle_media::UserId;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    struct EventCapture {
        events: Arc<Mutex<Vec<HuddleEvent>>>,
    }

    impl HuddleEventListener for EventCapture {
        fn on_event(&self, event: HuddleEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    struct Panicking;

    impl HuddleEventListener for Panicking {
        fn on_event(&self, _event: HuddleEvent) {
            panic!("observer bug");
        }
    }

    fn capture(dispatcher: &EventDispatcher, areas: AreaSet) -> Arc<Mutex<Vec<HuddleEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        dispatcher.subscribe(
            areas,
            Arc::new(EventCapture {
                events: events.clone(),
            }),
        );
        events
    }

    fn left_ids(events: &[HuddleEvent]) -> Vec<u64> {
        events
            .iter()
            .filter_map(|e| match e {
                HuddleEvent::UserLeft(id) => Some(id.0),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn delivers_only_subscribed_areas() {
        let dispatcher = EventDispatcher::new(&Handle::current());
        let users = capture(&dispatcher, EventArea::User.into());
        let chat = capture(&dispatcher, EventArea::Chat.into());

        dispatcher.emit(HuddleEvent::UserLeft(UserId(1)));
        dispatcher.flush().await;

        assert_eq!(users.lock().unwrap().len(), 1);
        assert!(chat.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn per_area_order_is_preserved_for_every_observer() {
        let dispatcher = EventDispatcher::new(&Handle::current());
        let first = capture(&dispatcher, AreaSet::ALL);
        let second = capture(&dispatcher, EventArea::User.into());

        for id in 0..100 {
            dispatcher.emit(HuddleEvent::UserLeft(UserId(id)));
        }
        dispatcher.flush().await;

        let expected: Vec<u64> = (0..100).collect();
        assert_eq!(left_ids(&first.lock().unwrap()), expected);
        assert_eq!(left_ids(&second.lock().unwrap()), expected);
    }

    #[tokio::test]
    async fn terminal_event_reaches_every_observer_once() {
        let dispatcher = EventDispatcher::new(&Handle::current());
        let chat_only = capture(&dispatcher, EventArea::Chat.into());
        let session = capture(&dispatcher, EventArea::Session.into());

        dispatcher.emit(HuddleEvent::SessionEnded {
            reason: EndReason::EndedByHost,
        });
        dispatcher.flush().await;

        for events in [chat_only, session] {
            let events = events.lock().unwrap();
            assert_eq!(events.len(), 1);
            assert!(events[0].is_terminal());
        }
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let dispatcher = EventDispatcher::new(&Handle::current());
        let count = Arc::new(AtomicUsize::new(0));
        let token = {
            let count = count.clone();
            dispatcher.subscribe(
                AreaSet::ALL,
                Arc::new(move |_event: HuddleEvent| {
                    count.fetch_add(1, Ordering::SeqCst);
                }),
            )
        };

        dispatcher.emit(HuddleEvent::UserLeft(UserId(1)));
        dispatcher.flush().await;
        assert!(dispatcher.unsubscribe(token));
        assert!(!dispatcher.unsubscribe(token));
        dispatcher.emit(HuddleEvent::UserLeft(UserId(2)));
        dispatcher.flush().await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.observer_count(), 0);
    }

    #[tokio::test]
    async fn observers_can_unsubscribe_themselves_from_a_callback() {
        let dispatcher = EventDispatcher::new(&Handle::current());
        let count = Arc::new(AtomicUsize::new(0));
        let token_slot: Arc<Mutex<Option<ObserverToken>>> = Arc::new(Mutex::new(None));
        let listener = {
            let dispatcher = dispatcher.clone();
            let count = count.clone();
            let slot = token_slot.clone();
            move |_event: HuddleEvent| {
                count.fetch_add(1, Ordering::SeqCst);
                if let Some(token) = *slot.lock().unwrap() {
                    dispatcher.unsubscribe(token);
                }
            }
        };
        let token = dispatcher.subscribe(EventArea::User.into(), Arc::new(listener));
        *token_slot.lock().unwrap() = Some(token);

        dispatcher.emit(HuddleEvent::UserLeft(UserId(1)));
        dispatcher.emit(HuddleEvent::UserLeft(UserId(2)));
        dispatcher.flush().await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panicking_observer_does_not_stop_the_area() {
        let dispatcher = EventDispatcher::new(&Handle::current());
        dispatcher.subscribe(EventArea::User.into(), Arc::new(Panicking));
        let events = capture(&dispatcher, EventArea::User.into());

        dispatcher.emit(HuddleEvent::UserLeft(UserId(1)));
        dispatcher.emit(HuddleEvent::UserLeft(UserId(2)));
        dispatcher.flush().await;

        assert_eq!(left_ids(&events.lock().unwrap()), vec![1, 2]);
    }

    #[tokio::test]
    async fn channel_subscription_receives_events() {
        let dispatcher = EventDispatcher::new(&Handle::current());
        let (_token, mut rx) = dispatcher.subscribe_channel(EventArea::User.into());

        dispatcher.emit(HuddleEvent::UserLeft(UserId(9)));
        match rx.recv().await {
            Some(HuddleEvent::UserLeft(id)) => assert_eq!(id, UserId(9)),
            other => panic!("expected UserLeft, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn terminal_event_follows_earlier_events_of_each_area() {
        let dispatcher = EventDispatcher::new(&Handle::current());
        let (_, mut rx) =
            dispatcher.subscribe_channel(AreaSet::of(&[EventArea::User, EventArea::Chat]));

        for id in 0..50 {
            dispatcher.emit(HuddleEvent::UserLeft(UserId(id)));
        }
        dispatcher.emit(HuddleEvent::SessionEnded {
            reason: EndReason::LeftByUser,
        });
        dispatcher.flush().await;

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events.len(), 51);
        assert!(events[50].is_terminal());
        assert_eq!(left_ids(&events[..50]), (0..50).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn observer_without_areas_still_hears_the_end() {
        let dispatcher = EventDispatcher::new(&Handle::current());
        let events = capture(&dispatcher, AreaSet::empty());

        dispatcher.emit(HuddleEvent::UserLeft(UserId(1)));
        dispatcher.emit(HuddleEvent::SessionEnded {
            reason: EndReason::EndedByHost,
        });
        dispatcher.flush().await;

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].is_terminal());
    }
}
