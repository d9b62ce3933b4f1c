use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use tokio::runtime::{Handle, Runtime};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::errors::MediaError;
use crate::frame::{AudioFrame, VideoFrame};
use crate::{MediaConfig, Resolution, StreamKind, UserId};

/// Application-side receiver of raw frames.
///
/// Callbacks run on the media delivery path, never on the session context,
/// and must not block. Frames are lent for the duration of the call; take a
/// reference with [`FrameBuffer::add_ref`](crate::FrameBuffer::add_ref)
/// (or clone the frame) to keep the data longer.
pub trait FrameSink: Send + Sync {
    fn on_video_frame(&self, _user: UserId, _kind: StreamKind, _frame: &VideoFrame) {}
    fn on_audio_frame(&self, _user: UserId, _frame: &AudioFrame) {}
    /// `dropped` audio frames were discarded since the last delivered frame.
    fn on_audio_overrun(&self, _user: UserId, _dropped: u64) {}
    fn on_subscription_ended(&self, _user: UserId, _kind: StreamKind) {}
}

/// Where frame delivery tasks run.
pub enum MediaRuntime {
    /// Spawn on an existing runtime (typically the application's).
    Shared(Handle),
    /// Build a multi-thread runtime owned by the pipeline.
    Dedicated,
}

/// What happened to a frame handed to [`FrameIngress`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Video queue full, frame discarded.
    Dropped,
    /// Audio queue full, frame discarded and overrun flagged.
    Overrun,
    NoSubscriber,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    pub delivered: u64,
    pub dropped: u64,
    pub overruns: u64,
}

type StreamKey = (UserId, StreamKind);

enum Delivery {
    Video(VideoFrame),
    Audio(AudioFrame),
}

const IDLE: u8 = 0;
const CALLING: u8 = 1;
const CANCELLED: u8 = 2;

struct Counters {
    /// `IDLE`, `CALLING` while a sink callback runs, or `CANCELLED`.
    state: AtomicU8,
    delivered: AtomicU64,
    dropped: AtomicU64,
    overruns: AtomicU64,
    pending_overrun: AtomicU64,
}

impl Counters {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(IDLE),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
            pending_overrun: AtomicU64::new(0),
        }
    }

    fn is_active(&self) -> bool {
        self.state.load(Ordering::Acquire) != CANCELLED
    }

    /// Claim the slot for one callback. Fails once cancelled, so a cancel
    /// that wins the race is never followed by a callback.
    fn begin_callback(&self) -> bool {
        self.state
            .compare_exchange(IDLE, CALLING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn end_callback(&self) {
        let _ = self
            .state
            .compare_exchange(CALLING, IDLE, Ordering::AcqRel, Ordering::Acquire);
    }

    fn cancel(&self) {
        self.state.store(CANCELLED, Ordering::Release);
    }

    fn stats(&self) -> SubscriptionStats {
        SubscriptionStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
        }
    }
}

/// One active subscription. Dropping the route does not stop the task;
/// `cancel` does.
struct Route {
    generation: u64,
    tx: mpsc::Sender<Delivery>,
    counters: Arc<Counters>,
    resolution: Resolution,
    cancel_tx: watch::Sender<bool>,
    _handle: JoinHandle<()>,
}

impl Route {
    fn cancel(self) {
        self.counters.cancel();
        let _ = self.cancel_tx.send(true);
    }
}

type RouteTable = RwLock<HashMap<StreamKey, Route>>;

fn read(table: &RouteTable) -> RwLockReadGuard<'_, HashMap<StreamKey, Route>> {
    table.read().unwrap_or_else(PoisonError::into_inner)
}

fn write(table: &RouteTable) -> RwLockWriteGuard<'_, HashMap<StreamKey, Route>> {
    table.write().unwrap_or_else(PoisonError::into_inner)
}

struct OwnedRuntime(Option<Runtime>);

impl Drop for OwnedRuntime {
    fn drop(&mut self) {
        // Dropping a runtime from async context panics; shut it down instead.
        if let Some(rt) = self.0.take() {
            rt.shutdown_background();
        }
    }
}

/// Subscribe/unsubscribe bookkeeping for raw frame delivery.
///
/// Holds at most one subscription per (participant, stream kind). Each
/// subscription owns a bounded queue and a delivery task; producers reach
/// them through [`FrameIngress`].
pub struct MediaPipeline {
    routes: Arc<RouteTable>,
    config: MediaConfig,
    handle: Handle,
    next_generation: AtomicU64,
    _runtime: OwnedRuntime,
}

impl MediaPipeline {
    pub fn new(config: MediaConfig, runtime: MediaRuntime) -> Result<Self, MediaError> {
        let (handle, owned) = match runtime {
            MediaRuntime::Shared(handle) => (handle, None),
            MediaRuntime::Dedicated => {
                let rt = tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(config.worker_threads.max(1))
                    .thread_name("huddle-media")
                    .enable_all()
                    .build()
                    .map_err(|e| MediaError::Runtime(e.to_string()))?;
                (rt.handle().clone(), Some(rt))
            }
        };
        Ok(Self {
            routes: Arc::new(RwLock::new(HashMap::new())),
            config,
            handle,
            next_generation: AtomicU64::new(1),
            _runtime: OwnedRuntime(owned),
        })
    }

    pub fn config(&self) -> &MediaConfig {
        &self.config
    }

    /// Start delivering `kind` frames of `user` to `sink`.
    ///
    /// An existing subscription for the same pair is cancelled first.
    pub fn subscribe(
        &self,
        user: UserId,
        kind: StreamKind,
        resolution: Resolution,
        sink: Arc<dyn FrameSink>,
    ) -> Result<Subscription, MediaError> {
        let key = (user, kind);
        let mut routes = write(&self.routes);

        if !routes.contains_key(&key) && routes.len() >= self.config.max_subscriptions {
            return Err(MediaError::SubscriptionLimit {
                limit: self.config.max_subscriptions,
            });
        }
        if let Some(previous) = routes.remove(&key) {
            tracing::debug!(user = %user, ?kind, "replacing media subscription");
            previous.cancel();
        }

        let depth = match kind {
            StreamKind::Audio => self.config.audio_queue_depth,
            StreamKind::Video | StreamKind::Share => self.config.video_queue_depth,
        }
        .max(1);
        let (tx, rx) = mpsc::channel(depth);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let counters = Arc::new(Counters::new());
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        let handle = self.handle.spawn(frame_loop(
            user,
            kind,
            rx,
            counters.clone(),
            sink,
            cancel_rx,
        ));

        routes.insert(
            key,
            Route {
                generation,
                tx,
                counters: counters.clone(),
                resolution,
                cancel_tx,
                _handle: handle,
            },
        );
        tracing::info!(user = %user, ?kind, ?resolution, "media subscription started");

        Ok(Subscription {
            user,
            kind,
            generation,
            counters,
            routes: Arc::downgrade(&self.routes),
        })
    }

    /// Stop delivery for one stream. Returns `false` if nothing was subscribed.
    pub fn unsubscribe(&self, user: UserId, kind: StreamKind) -> bool {
        match write(&self.routes).remove(&(user, kind)) {
            Some(route) => {
                route.cancel();
                tracing::info!(user = %user, ?kind, "media subscription stopped");
                true
            }
            None => false,
        }
    }

    /// Stop every stream of `user`. Returns how many were active.
    pub fn unsubscribe_participant(&self, user: UserId) -> usize {
        let mut routes = write(&self.routes);
        let keys: Vec<StreamKey> = routes.keys().filter(|(u, _)| *u == user).copied().collect();
        for key in &keys {
            if let Some(route) = routes.remove(key) {
                route.cancel();
            }
        }
        if !keys.is_empty() {
            tracing::info!(user = %user, count = keys.len(), "media subscriptions stopped for participant");
        }
        keys.len()
    }

    pub fn unsubscribe_all(&self) -> usize {
        let drained: Vec<Route> = write(&self.routes).drain().map(|(_, r)| r).collect();
        let count = drained.len();
        for route in drained {
            route.cancel();
        }
        count
    }

    pub fn set_resolution(
        &self,
        user: UserId,
        kind: StreamKind,
        resolution: Resolution,
    ) -> Result<(), MediaError> {
        let mut routes = write(&self.routes);
        let route = routes
            .get_mut(&(user, kind))
            .ok_or(MediaError::NotSubscribed { user, kind })?;
        route.resolution = resolution;
        Ok(())
    }

    pub fn resolution(&self, user: UserId, kind: StreamKind) -> Option<Resolution> {
        read(&self.routes).get(&(user, kind)).map(|r| r.resolution)
    }

    pub fn is_subscribed(&self, user: UserId, kind: StreamKind) -> bool {
        read(&self.routes).contains_key(&(user, kind))
    }

    pub fn active_subscriptions(&self) -> Vec<(UserId, StreamKind)> {
        read(&self.routes).keys().copied().collect()
    }

    pub fn stats(&self, user: UserId, kind: StreamKind) -> Option<SubscriptionStats> {
        read(&self.routes).get(&(user, kind)).map(|r| r.counters.stats())
    }

    /// Producer handle for the network side.
    pub fn ingress(&self) -> FrameIngress {
        FrameIngress {
            routes: self.routes.clone(),
        }
    }
}

impl Drop for MediaPipeline {
    fn drop(&mut self) {
        self.unsubscribe_all();
    }
}

/// Handle to one subscription, returned by [`MediaPipeline::subscribe`].
///
/// Dropping the handle keeps the subscription running.
#[derive(Clone)]
pub struct Subscription {
    user: UserId,
    kind: StreamKind,
    generation: u64,
    counters: Arc<Counters>,
    routes: Weak<RouteTable>,
}

impl Subscription {
    pub fn user(&self) -> UserId {
        self.user
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn is_active(&self) -> bool {
        self.counters.is_active()
    }

    pub fn stats(&self) -> SubscriptionStats {
        self.counters.stats()
    }

    /// Idempotent. Has no effect on a newer subscription that replaced this one.
    pub fn unsubscribe(&self) -> bool {
        let Some(routes) = self.routes.upgrade() else {
            return false;
        };
        let mut routes = write(&routes);
        let key = (self.user, self.kind);
        if routes.get(&key).is_some_and(|r| r.generation == self.generation) {
            if let Some(route) = routes.remove(&key) {
                route.cancel();
                return true;
            }
        }
        false
    }
}

/// Producer side of the pipeline. Cheap to clone, never blocks.
#[derive(Clone)]
pub struct FrameIngress {
    routes: Arc<RouteTable>,
}

impl FrameIngress {
    pub fn push_video(&self, user: UserId, frame: VideoFrame) -> PushOutcome {
        self.push((user, StreamKind::Video), Delivery::Video(frame))
    }

    pub fn push_share(&self, user: UserId, frame: VideoFrame) -> PushOutcome {
        self.push((user, StreamKind::Share), Delivery::Video(frame))
    }

    pub fn push_audio(&self, user: UserId, frame: AudioFrame) -> PushOutcome {
        self.push((user, StreamKind::Audio), Delivery::Audio(frame))
    }

    fn push(&self, key: StreamKey, delivery: Delivery) -> PushOutcome {
        let routes = read(&self.routes);
        let Some(route) = routes.get(&key) else {
            return PushOutcome::NoSubscriber;
        };
        match route.tx.try_send(delivery) {
            Ok(()) => PushOutcome::Queued,
            Err(TrySendError::Full(_)) if key.1 == StreamKind::Audio => {
                route.counters.overruns.fetch_add(1, Ordering::Relaxed);
                route.counters.pending_overrun.fetch_add(1, Ordering::AcqRel);
                PushOutcome::Overrun
            }
            Err(TrySendError::Full(_)) => {
                route.counters.dropped.fetch_add(1, Ordering::Relaxed);
                PushOutcome::Dropped
            }
            Err(TrySendError::Closed(_)) => PushOutcome::NoSubscriber,
        }
    }
}

async fn frame_loop(
    user: UserId,
    kind: StreamKind,
    mut rx: mpsc::Receiver<Delivery>,
    counters: Arc<Counters>,
    sink: Arc<dyn FrameSink>,
    mut cancel_rx: watch::Receiver<bool>,
) {
    tracing::debug!(user = %user, ?kind, "frame_loop started");

    loop {
        tokio::select! {
            biased;
            _ = cancel_rx.changed() => {
                tracing::debug!(user = %user, ?kind, "frame_loop cancelled");
                break;
            }
            delivery = rx.recv() => {
                let Some(delivery) = delivery else { break };
                if !counters.begin_callback() {
                    break;
                }
                let overrun = counters.pending_overrun.swap(0, Ordering::AcqRel);
                if overrun > 0 {
                    sink.on_audio_overrun(user, overrun);
                }
                match &delivery {
                    Delivery::Video(frame) => sink.on_video_frame(user, kind, frame),
                    Delivery::Audio(frame) => sink.on_audio_frame(user, frame),
                }
                counters.delivered.fetch_add(1, Ordering::Relaxed);
                counters.end_callback();
            }
        }
    }

    // Frames still queued are released with the receiver.
    drop(rx);
    sink.on_subscription_ended(user, kind);
    tracing::debug!(user = %user, ?kind, "frame_loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufferPool, FrameBuffer};
    use std::sync::Mutex;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    #[derive(Default)]
    struct Collector {
        video: Mutex<Vec<u64>>,
        audio: Mutex<Vec<u64>>,
        overruns: AtomicU64,
        ended: AtomicBool,
        retain: bool,
        retained: Mutex<Vec<FrameBuffer>>,
    }

    impl FrameSink for Collector {
        fn on_video_frame(&self, _user: UserId, _kind: StreamKind, frame: &VideoFrame) {
            self.video.lock().unwrap().push(frame.timestamp_us());
            if self.retain {
                self.retained.lock().unwrap().push(frame.buffer().add_ref());
            }
        }

        fn on_audio_frame(&self, _user: UserId, frame: &AudioFrame) {
            self.audio.lock().unwrap().push(frame.timestamp_us());
        }

        fn on_audio_overrun(&self, _user: UserId, dropped: u64) {
            self.overruns.fetch_add(dropped, Ordering::SeqCst);
        }

        fn on_subscription_ended(&self, _user: UserId, _kind: StreamKind) {
            self.ended.store(true, Ordering::SeqCst);
        }
    }

    fn pipeline(config: MediaConfig) -> MediaPipeline {
        MediaPipeline::new(config, MediaRuntime::Shared(Handle::current())).unwrap()
    }

    fn video(pool: &BufferPool, ts: u64) -> VideoFrame {
        let buf = pool.acquire(VideoFrame::i420_len(2, 2)).unwrap();
        VideoFrame::i420(buf, 2, 2, ts).unwrap()
    }

    fn audio(ts: u64) -> AudioFrame {
        AudioFrame::pcm16(FrameBuffer::detached(vec![0; 4]), 48_000, 1, ts).unwrap()
    }

    async fn wait_until(cond: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    const ALICE: UserId = UserId(1);
    const BOB: UserId = UserId(2);

    #[tokio::test]
    async fn frames_arrive_in_order() {
        let media = pipeline(MediaConfig::default());
        let pool = BufferPool::new(8);
        let sink = Arc::new(Collector::default());
        media
            .subscribe(ALICE, StreamKind::Video, Resolution::P360, sink.clone())
            .unwrap();

        let ingress = media.ingress();
        for ts in 0..3 {
            assert_eq!(ingress.push_video(ALICE, video(&pool, ts)), PushOutcome::Queued);
        }
        wait_until(|| sink.video.lock().unwrap().len() == 3).await;
        assert_eq!(*sink.video.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(media.stats(ALICE, StreamKind::Video).unwrap().delivered, 3);
    }

    #[tokio::test]
    async fn push_without_subscriber_is_reported() {
        let media = pipeline(MediaConfig::default());
        let pool = BufferPool::new(1);
        assert_eq!(
            media.ingress().push_video(BOB, video(&pool, 0)),
            PushOutcome::NoSubscriber
        );
        // Rejected frame was released right away.
        assert_eq!(pool.outstanding(), 0);
    }

    #[tokio::test]
    async fn full_video_queue_drops_frames() {
        let media = pipeline(MediaConfig {
            video_queue_depth: 2,
            ..MediaConfig::default()
        });
        let pool = BufferPool::new(8);
        let sink = Arc::new(Collector::default());
        media
            .subscribe(ALICE, StreamKind::Video, Resolution::P360, sink.clone())
            .unwrap();

        // The delivery task cannot run until we yield, so the queue fills.
        let ingress = media.ingress();
        let outcomes: Vec<_> = (0..4).map(|ts| ingress.push_video(ALICE, video(&pool, ts))).collect();
        assert_eq!(
            outcomes,
            vec![
                PushOutcome::Queued,
                PushOutcome::Queued,
                PushOutcome::Dropped,
                PushOutcome::Dropped
            ]
        );
        assert_eq!(pool.outstanding(), 2);

        wait_until(|| sink.video.lock().unwrap().len() == 2).await;
        assert_eq!(*sink.video.lock().unwrap(), vec![0, 1]);
        assert_eq!(media.stats(ALICE, StreamKind::Video).unwrap().dropped, 2);
        wait_until(|| pool.outstanding() == 0).await;
    }

    #[tokio::test]
    async fn full_audio_queue_flags_overrun() {
        let media = pipeline(MediaConfig {
            audio_queue_depth: 1,
            ..MediaConfig::default()
        });
        let sink = Arc::new(Collector::default());
        media
            .subscribe(ALICE, StreamKind::Audio, Resolution::P360, sink.clone())
            .unwrap();

        let ingress = media.ingress();
        assert_eq!(ingress.push_audio(ALICE, audio(0)), PushOutcome::Queued);
        assert_eq!(ingress.push_audio(ALICE, audio(1)), PushOutcome::Overrun);
        assert_eq!(ingress.push_audio(ALICE, audio(2)), PushOutcome::Overrun);

        wait_until(|| sink.audio.lock().unwrap().len() == 1).await;
        assert_eq!(sink.overruns.load(Ordering::SeqCst), 2);
        assert_eq!(media.stats(ALICE, StreamKind::Audio).unwrap().overruns, 2);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery_and_releases_queued_frames() {
        let media = pipeline(MediaConfig::default());
        let pool = BufferPool::new(8);
        let sink = Arc::new(Collector::default());
        let sub = media
            .subscribe(ALICE, StreamKind::Video, Resolution::P360, sink.clone())
            .unwrap();

        let ingress = media.ingress();
        ingress.push_video(ALICE, video(&pool, 0));
        ingress.push_video(ALICE, video(&pool, 1));
        assert!(sub.unsubscribe());
        assert!(!sub.unsubscribe());
        assert!(!sub.is_active());
        assert_eq!(ingress.push_video(ALICE, video(&pool, 2)), PushOutcome::NoSubscriber);

        wait_until(|| sink.ended.load(Ordering::SeqCst)).await;
        assert!(sink.video.lock().unwrap().is_empty());
        assert_eq!(pool.outstanding(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn no_callbacks_after_unsubscribe_under_concurrent_pushes() {
        let media = pipeline(MediaConfig::default());
        let sink = Arc::new(Collector::default());
        media
            .subscribe(ALICE, StreamKind::Video, Resolution::P360, sink.clone())
            .unwrap();

        let ingress = media.ingress();
        let stop = Arc::new(AtomicBool::new(false));
        let producer = {
            let stop = stop.clone();
            std::thread::spawn(move || {
                let pool = BufferPool::new(64);
                let mut ts = 0;
                while !stop.load(Ordering::SeqCst) {
                    if let Ok(buf) = pool.acquire(VideoFrame::i420_len(2, 2)) {
                        let frame = VideoFrame::i420(buf, 2, 2, ts).unwrap();
                        ingress.push_video(ALICE, frame);
                        ts += 1;
                    }
                    std::thread::yield_now();
                }
            })
        };

        wait_until(|| sink.video.lock().unwrap().len() > 10).await;
        media.unsubscribe(ALICE, StreamKind::Video);
        wait_until(|| sink.ended.load(Ordering::SeqCst)).await;
        let seen = sink.video.lock().unwrap().len();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sink.video.lock().unwrap().len(), seen);

        stop.store(true, Ordering::SeqCst);
        producer.join().unwrap();
    }

    #[test]
    fn cancel_during_a_callback_blocks_the_next_one() {
        let counters = Counters::new();
        assert!(counters.begin_callback());
        counters.cancel();
        counters.end_callback();
        assert!(!counters.is_active());
        assert!(!counters.begin_callback());
    }

    #[derive(Default)]
    struct StopAfterFirst {
        seen: AtomicU64,
        sub: Mutex<Option<Subscription>>,
    }

    impl FrameSink for StopAfterFirst {
        fn on_video_frame(&self, _user: UserId, _kind: StreamKind, _frame: &VideoFrame) {
            self.seen.fetch_add(1, Ordering::SeqCst);
            if let Some(sub) = self.sub.lock().unwrap().take() {
                assert!(sub.unsubscribe());
            }
        }
    }

    #[tokio::test]
    async fn unsubscribe_from_inside_a_callback_stops_queued_frames() {
        let media = pipeline(MediaConfig::default());
        let pool = BufferPool::new(8);
        let sink = Arc::new(StopAfterFirst::default());
        let sub = media
            .subscribe(ALICE, StreamKind::Video, Resolution::P360, sink.clone())
            .unwrap();
        *sink.sub.lock().unwrap() = Some(sub);

        let ingress = media.ingress();
        for ts in 0..3 {
            assert_eq!(ingress.push_video(ALICE, video(&pool, ts)), PushOutcome::Queued);
        }
        wait_until(|| !media.is_subscribed(ALICE, StreamKind::Video)).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sink.seen.load(Ordering::SeqCst), 1);
        assert_eq!(pool.outstanding(), 0);
    }

    #[tokio::test]
    async fn resubscribe_replaces_previous() {
        let media = pipeline(MediaConfig::default());
        let first = Arc::new(Collector::default());
        let second = Arc::new(Collector::default());
        let old = media
            .subscribe(ALICE, StreamKind::Video, Resolution::P180, first.clone())
            .unwrap();
        let new = media
            .subscribe(ALICE, StreamKind::Video, Resolution::P720, second.clone())
            .unwrap();

        assert!(!old.is_active());
        assert!(new.is_active());
        assert_eq!(media.active_subscriptions().len(), 1);
        assert_eq!(media.resolution(ALICE, StreamKind::Video), Some(Resolution::P720));

        // A stale handle must not tear down its replacement.
        assert!(!old.unsubscribe());
        assert!(media.is_subscribed(ALICE, StreamKind::Video));
        wait_until(|| first.ended.load(Ordering::SeqCst)).await;
        assert!(!second.ended.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn subscription_limit_is_enforced() {
        let media = pipeline(MediaConfig {
            max_subscriptions: 1,
            ..MediaConfig::default()
        });
        let sink = Arc::new(Collector::default());
        media
            .subscribe(ALICE, StreamKind::Video, Resolution::P360, sink.clone())
            .unwrap();
        let err = media
            .subscribe(BOB, StreamKind::Video, Resolution::P360, sink.clone())
            .err()
            .unwrap();
        assert_eq!(err, MediaError::SubscriptionLimit { limit: 1 });
        // Replacing an existing pair does not count against the limit.
        assert!(media
            .subscribe(ALICE, StreamKind::Video, Resolution::P90, sink)
            .is_ok());
    }

    #[tokio::test]
    async fn unsubscribe_participant_stops_all_streams() {
        let media = pipeline(MediaConfig::default());
        let sink = Arc::new(Collector::default());
        for kind in [StreamKind::Video, StreamKind::Share, StreamKind::Audio] {
            media.subscribe(ALICE, kind, Resolution::P360, sink.clone()).unwrap();
        }
        media
            .subscribe(BOB, StreamKind::Video, Resolution::P360, sink.clone())
            .unwrap();

        assert_eq!(media.unsubscribe_participant(ALICE), 3);
        assert_eq!(media.active_subscriptions(), vec![(BOB, StreamKind::Video)]);
        assert_eq!(media.unsubscribe_participant(ALICE), 0);
    }

    #[tokio::test]
    async fn retained_buffers_stay_alive_after_callback() {
        let media = pipeline(MediaConfig::default());
        let pool = BufferPool::new(4);
        let sink = Arc::new(Collector {
            retain: true,
            ..Collector::default()
        });
        media
            .subscribe(ALICE, StreamKind::Video, Resolution::P360, sink.clone())
            .unwrap();
        media.ingress().push_video(ALICE, video(&pool, 0));

        wait_until(|| sink.video.lock().unwrap().len() == 1).await;
        assert_eq!(pool.outstanding(), 1);
        let held = sink.retained.lock().unwrap().pop().unwrap();
        assert_eq!(held.release(), 0);
        assert_eq!(pool.outstanding(), 0);
    }

    #[tokio::test]
    async fn set_resolution_requires_subscription() {
        let media = pipeline(MediaConfig::default());
        assert!(matches!(
            media.set_resolution(ALICE, StreamKind::Video, Resolution::P720),
            Err(MediaError::NotSubscribed { .. })
        ));
        media
            .subscribe(ALICE, StreamKind::Video, Resolution::P360, Arc::new(Collector::default()))
            .unwrap();
        media
            .set_resolution(ALICE, StreamKind::Video, Resolution::P720)
            .unwrap();
        assert_eq!(media.resolution(ALICE, StreamKind::Video), Some(Resolution::P720));
    }
}
