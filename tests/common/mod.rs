//! Test infrastructure for breathing-bridge integration tests.
//!
//! Provides a recording voice transport, a scripted transcoder and a static
//! extractor so sessions can be driven end to end without Discord, yt-dlp or
//! ffmpeg.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex as StdMutex,
    },
    time::Duration,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

// Re-export key types from the main crate
pub use breathing_bridge::config::Config;
pub use breathing_bridge::connection::ConnectionState;
pub use breathing_bridge::constants::{FRAME_BYTES, FRAME_DURATION};
pub use breathing_bridge::error::{
    ResolutionError, SessionError, TrackError, TranscodeError, TransportError,
};
pub use breathing_bridge::event::{ConnectionEvent, Event, EventBus, PlaybackEvent, Subscriber};
pub use breathing_bridge::id::{ChannelId, GuildId};
pub use breathing_bridge::queue::RepeatMode;
pub use breathing_bridge::registry::SessionRegistry;
pub use breathing_bridge::resolver::{Extractor, SourceResolver};
pub use breathing_bridge::session::{SessionContext, SessionHandle, SessionStatus};
pub use breathing_bridge::track::{ResolvedSource, StreamHandle, Track};
pub use breathing_bridge::transcode::{Frame, FrameStream, TranscodeStage, Transcoder};
pub use breathing_bridge::transport::{
    TransportEvent, TransportEventSender, TransportFactory, VoiceTransport,
};

pub const GUILD: GuildId = GuildId(1001);
pub const CHANNEL: ChannelId = ChannelId(2002);

/// Creates a test configuration. Timing values are the production defaults.
pub fn test_config() -> Config {
    Config::default()
}

// ============================================================================
// Transport
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    /// A frame tagged by the scripted transcoder
    Audio { tag: u8, seq: u64 },
    Silence,
}

#[derive(Clone, Debug)]
pub struct Sent {
    pub at: Instant,
    pub payload: Payload,
}

#[derive(Default)]
pub struct TransportLog {
    pub connects: Vec<ChannelId>,
    pub disconnects: usize,
    pub sent: Vec<Sent>,
}

#[derive(Default)]
struct Behaviour {
    failing_connects: usize,
    hang_connects: bool,
    fail_sends: bool,
    fail_silence: bool,
}

/// Creates [MockTransport]s that all record into one shared log.
#[derive(Clone, Default)]
pub struct MockTransportFactory {
    log: Arc<StdMutex<TransportLog>>,
    behaviour: Arc<StdMutex<Behaviour>>,
    events: Arc<StdMutex<HashMap<GuildId, TransportEventSender>>>,
}

impl MockTransportFactory {
    /// Makes the next `n` connection attempts fail.
    pub fn fail_next_connects(&self, n: usize) {
        self.behaviour.lock().unwrap().failing_connects = n;
    }

    /// Makes connection attempts never complete.
    pub fn hang_connects(&self, hang: bool) {
        self.behaviour.lock().unwrap().hang_connects = hang;
    }

    /// Makes every frame sent from now on fail, silence included.
    pub fn fail_sends(&self, fail: bool) {
        self.behaviour.lock().unwrap().fail_sends = fail;
    }

    /// Makes only silence frames fail.
    pub fn fail_silence(&self, fail: bool) {
        self.behaviour.lock().unwrap().fail_silence = fail;
    }

    /// Reports a connection loss the way a driver would, outside of any call.
    pub fn lose_connection(&self, guild_id: GuildId, reason: &str) {
        let events = self.events.lock().unwrap();
        let tx = events.get(&guild_id).expect("no transport for guild");
        tx.send(TransportEvent::ConnectionLost {
            reason: reason.to_string(),
        })
        .expect("session is gone");
    }

    pub fn connects(&self) -> Vec<ChannelId> {
        self.log.lock().unwrap().connects.clone()
    }

    pub fn disconnects(&self) -> usize {
        self.log.lock().unwrap().disconnects
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.log.lock().unwrap().sent.clone()
    }

    pub fn sent_len(&self) -> usize {
        self.log.lock().unwrap().sent.len()
    }

    /// `(tag, seq)` of every audio frame, in delivery order.
    pub fn audio(&self) -> Vec<(u8, u64)> {
        self.log
            .lock()
            .unwrap()
            .sent
            .iter()
            .filter_map(|sent| match sent.payload {
                Payload::Audio { tag, seq } => Some((tag, seq)),
                Payload::Silence => None,
            })
            .collect()
    }

    pub fn audio_with_tag(&self, tag: u8) -> Vec<Sent> {
        self.log
            .lock()
            .unwrap()
            .sent
            .iter()
            .filter(|sent| matches!(sent.payload, Payload::Audio { tag: t, .. } if t == tag))
            .cloned()
            .collect()
    }

    pub fn silence_count(&self) -> usize {
        self.log
            .lock()
            .unwrap()
            .sent
            .iter()
            .filter(|sent| sent.payload == Payload::Silence)
            .count()
    }
}

impl TransportFactory for MockTransportFactory {
    fn create(&self, guild_id: GuildId, events: TransportEventSender) -> Box<dyn VoiceTransport> {
        self.events.lock().unwrap().insert(guild_id, events);
        Box::new(MockTransport {
            log: self.log.clone(),
            behaviour: self.behaviour.clone(),
        })
    }
}

pub struct MockTransport {
    log: Arc<StdMutex<TransportLog>>,
    behaviour: Arc<StdMutex<Behaviour>>,
}

#[async_trait]
impl VoiceTransport for MockTransport {
    async fn connect(&mut self, channel_id: ChannelId) -> Result<(), TransportError> {
        self.log.lock().unwrap().connects.push(channel_id);

        let hang = {
            let mut behaviour = self.behaviour.lock().unwrap();
            if behaviour.failing_connects > 0 {
                behaviour.failing_connects -= 1;
                return Err(TransportError::HandshakeFailure {
                    reason: "4006 session no longer valid".to_string(),
                });
            }
            behaviour.hang_connects
        };
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        if self.behaviour.lock().unwrap().fail_sends {
            return Err(TransportError::ConnectionLost {
                reason: "udp socket closed".to_string(),
            });
        }
        self.log.lock().unwrap().sent.push(Sent {
            at: Instant::now(),
            payload: Payload::Audio {
                tag: frame.payload[0],
                seq: frame.seq,
            },
        });
        Ok(())
    }

    async fn send_silence(&mut self) -> Result<(), TransportError> {
        {
            let behaviour = self.behaviour.lock().unwrap();
            if behaviour.fail_sends || behaviour.fail_silence {
                return Err(TransportError::ConnectionLost {
                    reason: "udp socket closed".to_string(),
                });
            }
        }
        self.log.lock().unwrap().sent.push(Sent {
            at: Instant::now(),
            payload: Payload::Silence,
        });
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.log.lock().unwrap().disconnects += 1;
    }
}

// ============================================================================
// Extractor
// ============================================================================

/// Resolves every reference to `mock://<reference>` unless told otherwise.
#[derive(Default)]
pub struct StaticExtractor {
    failures: StdMutex<HashMap<String, ResolutionError>>,
    durations: StdMutex<HashMap<String, Duration>>,
    delays: StdMutex<HashMap<String, Duration>>,
}

impl StaticExtractor {
    pub fn fail(&self, reference: &str, error: ResolutionError) {
        self.failures
            .lock()
            .unwrap()
            .insert(reference.to_string(), error);
    }

    /// Makes resolving `reference` take `delay`.
    pub fn slow(&self, reference: &str, delay: Duration) {
        self.delays
            .lock()
            .unwrap()
            .insert(reference.to_string(), delay);
    }

    pub fn set_duration(&self, reference: &str, duration: Duration) {
        self.durations
            .lock()
            .unwrap()
            .insert(reference.to_string(), duration);
    }
}

#[async_trait]
impl Extractor for StaticExtractor {
    async fn extract(&self, reference: &str) -> Result<ResolvedSource, ResolutionError> {
        let delay = self.delays.lock().unwrap().get(reference).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.failures.lock().unwrap().get(reference) {
            return Err(error.clone());
        }

        Ok(ResolvedSource {
            handle: StreamHandle::Url(format!("mock://{reference}")),
            title: format!("Title of {reference}"),
            duration: self.durations.lock().unwrap().get(reference).copied(),
        })
    }
}

// ============================================================================
// Transcoder
// ============================================================================

#[derive(Clone, Debug)]
pub enum Ending {
    /// Close the stream after the last frame
    Clean,

    /// Report an error after the last frame
    Fail(TranscodeError),

    /// Keep the stream open without producing anything
    Hang,
}

/// What the scripted transcoder produces for one reference.
#[derive(Clone, Debug)]
pub struct Script {
    /// First byte of every frame payload, identifies the track on the wire
    pub tag: u8,

    /// `None` produces frames forever
    pub frames: Option<u64>,

    /// Stop producing for a while before frame `n`
    pub stall: Option<(u64, Duration)>,

    pub ending: Ending,

    /// Refuse to start at all
    pub spawn_error: bool,
}

impl Script {
    pub fn frames(tag: u8, frames: u64) -> Self {
        Script {
            tag,
            frames: Some(frames),
            stall: None,
            ending: Ending::Clean,
            spawn_error: false,
        }
    }

    pub fn endless(tag: u8) -> Self {
        Script {
            frames: None,
            ..Script::frames(tag, 0)
        }
    }

    pub fn stall_at(mut self, frame: u64, duration: Duration) -> Self {
        self.stall = Some((frame, duration));
        self
    }

    pub fn ending(mut self, ending: Ending) -> Self {
        self.ending = ending;
        self
    }

    pub fn refuse_start(mut self) -> Self {
        self.spawn_error = true;
        self
    }
}

/// Counts running producers. Decrements when the producer task ends.
struct LiveGuard(Arc<AtomicUsize>);

impl LiveGuard {
    fn new(live: &Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        LiveGuard(live.clone())
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Produces tagged frames according to per-reference [Script]s.
pub struct ScriptedTranscoder {
    scripts: StdMutex<HashMap<String, Script>>,
    started: StdMutex<Vec<String>>,
    live: Arc<AtomicUsize>,
    buffer_frames: usize,
}

impl Default for ScriptedTranscoder {
    fn default() -> Self {
        ScriptedTranscoder {
            scripts: StdMutex::new(HashMap::new()),
            started: StdMutex::new(Vec::new()),
            live: Arc::new(AtomicUsize::new(0)),
            buffer_frames: 8,
        }
    }
}

impl ScriptedTranscoder {
    pub fn script(&self, reference: &str, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .insert(format!("mock://{reference}"), script);
    }

    /// Producers that have not shut down yet.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Inputs of every stage started so far.
    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }
}

impl Transcoder for ScriptedTranscoder {
    fn start(&self, source: &ResolvedSource) -> Result<TranscodeStage, TranscodeError> {
        let input = source.handle.as_input();
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&input)
            .cloned()
            .unwrap_or_else(|| Script::frames(0, 50));

        if script.spawn_error {
            return Err(TranscodeError::Spawn {
                reason: "No such file or directory".to_string(),
            });
        }
        self.started.lock().unwrap().push(input);

        let (tx, frames) = FrameStream::channel(self.buffer_frames);
        let cancel = CancellationToken::new();
        let guard = LiveGuard::new(&self.live);
        let worker = tokio::spawn(produce(script, tx, cancel.clone(), guard));

        Ok(TranscodeStage::new(frames, cancel, worker))
    }
}

async fn produce(
    script: Script,
    tx: breathing_bridge::transcode::FrameSender,
    cancel: CancellationToken,
    _guard: LiveGuard,
) {
    let mut payload = vec![0u8; FRAME_BYTES];
    payload[0] = script.tag;
    let payload = Bytes::from(payload);

    let mut seq = 0;
    loop {
        if script.frames.is_some_and(|limit| seq >= limit) {
            break;
        }
        if let Some((at, pause)) = script.stall {
            if seq == at {
                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    _ = cancel.cancelled() => return,
                }
            }
        }

        let frame = Frame {
            seq,
            payload: payload.clone(),
        };
        tokio::select! {
            sent = tx.send(Ok(frame)) => if sent.is_err() { return },
            _ = cancel.cancelled() => return,
        }
        seq += 1;
    }

    match script.ending {
        Ending::Clean => {}
        Ending::Fail(error) => {
            tokio::select! {
                _ = tx.send(Err(error)) => {}
                _ = cancel.cancelled() => {}
            }
        }
        Ending::Hang => cancel.cancelled().await,
    }
}

// ============================================================================
// Harness
// ============================================================================

/// One registry wired to mock collaborators.
pub struct TestHarness {
    pub bus: EventBus,
    pub config: Config,
    pub transport: MockTransportFactory,
    pub transcoder: Arc<ScriptedTranscoder>,
    pub extractor: Arc<StaticExtractor>,
    pub registry: SessionRegistry,
}

impl TestHarness {
    /// Creates a new test harness with default configuration.
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    /// Creates a new test harness with custom configuration.
    pub fn with_config(config: Config) -> Self {
        let transcoder = Arc::new(ScriptedTranscoder::default());
        Self::with_transcoder(config, transcoder.clone(), transcoder)
    }

    /// Uses `stages` instead of the scripted transcoder to start stages.
    pub fn with_transcoder(
        config: Config,
        scripted: Arc<ScriptedTranscoder>,
        stages: Arc<dyn Transcoder>,
    ) -> Self {
        let bus = EventBus::new();
        let transport = MockTransportFactory::default();
        let extractor = Arc::new(StaticExtractor::default());

        let registry = SessionRegistry::new(SessionContext {
            resolver: SourceResolver::new(extractor.clone(), &config.resolver),
            transcoder: stages,
            transports: Arc::new(transport.clone()),
            bus: bus.clone(),
            scheduler: config.scheduler.clone(),
            session: config.session.clone(),
        });

        TestHarness {
            bus,
            config,
            transport,
            transcoder: scripted,
            extractor,
            registry,
        }
    }

    /// The session of the default test guild.
    pub async fn session(&self) -> SessionHandle {
        self.registry.get_or_create(GUILD).await
    }

    /// Creates a new subscriber for receiving events.
    pub fn subscribe(&self) -> Subscriber {
        self.bus.subscribe()
    }

    /// Enqueues `reference` in the default guild, joining the test channel.
    pub async fn play(&self, reference: &str) -> Result<(Track, usize), SessionError> {
        self.session()
            .await
            .play(Track::new(reference, "tester"), Some(CHANNEL))
            .await
    }

    pub async fn state(&self) -> ConnectionState {
        self.session()
            .await
            .status()
            .await
            .expect("session is gone")
            .state
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Event helpers
// ============================================================================

/// Collects every event received within `timeout`.
pub async fn collect_events(subscriber: &mut Subscriber, timeout: Duration) -> Vec<Event> {
    let mut events = Vec::new();
    let _ = tokio::time::timeout(timeout, async {
        while let Some(event) = subscriber.recv().await {
            events.push(event);
        }
    })
    .await;
    events
}

/// Collects events until one satisfies `predicate` (included) or `timeout`
/// passes.
pub async fn collect_events_until<F>(
    subscriber: &mut Subscriber,
    timeout: Duration,
    predicate: F,
) -> Vec<Event>
where
    F: Fn(&Event) -> bool,
{
    let mut events = Vec::new();
    let _ = tokio::time::timeout(timeout, async {
        while let Some(event) = subscriber.recv().await {
            let done = predicate(&event);
            events.push(event);
            if done {
                break;
            }
        }
    })
    .await;
    events
}

/// Waits for a specific event within a timeout.
pub async fn wait_for_event<F>(
    subscriber: &mut Subscriber,
    timeout: Duration,
    matches: F,
) -> Option<Event>
where
    F: Fn(&Event) -> bool,
{
    tokio::time::timeout(timeout, async {
        while let Some(event) = subscriber.recv().await {
            if matches(&event) {
                return Some(event);
            }
        }
        None
    })
    .await
    .ok()
    .flatten()
}

/// Polls `condition` every 5 ms until it holds. Panics after `timeout`.
pub async fn wait_until<F>(timeout: Duration, what: &str, condition: F)
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + timeout;
    while !condition() {
        if Instant::now() >= deadline {
            panic!("Timed out waiting until {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Playback events only.
pub fn filter_playback_events(events: &[Event]) -> Vec<&PlaybackEvent> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Playback(_, event) => Some(event),
            _ => None,
        })
        .collect()
}

/// Titles of tracks in `TrackStarted` events, in order.
pub fn started_titles(events: &[Event]) -> Vec<String> {
    filter_playback_events(events)
        .into_iter()
        .filter_map(|event| match event {
            PlaybackEvent::TrackStarted { track } => Some(track.title.clone()),
            _ => None,
        })
        .collect()
}

pub fn is_queue_exhausted(event: &Event) -> bool {
    matches!(event, Event::Playback(_, PlaybackEvent::QueueExhausted))
}

pub fn is_transport_failed(event: &Event) -> bool {
    matches!(
        event,
        Event::Connection(_, ConnectionEvent::TransportFailed { .. })
    )
}

/// Asserts that a specific event type was received.
#[macro_export]
macro_rules! assert_event_received {
    ($events:expr, $pattern:pat $(if $guard:expr)?) => {
        assert!(
            $events.iter().any(|e| matches!(e, $pattern $(if $guard)?)),
            "Expected event matching {} not found in {:?}",
            stringify!($pattern),
            $events
        );
    };
}

/// Asserts that a specific event type was NOT received.
#[macro_export]
macro_rules! assert_event_not_received {
    ($events:expr, $pattern:pat $(if $guard:expr)?) => {
        assert!(
            !$events.iter().any(|e| matches!(e, $pattern $(if $guard)?)),
            "Unexpected event matching {} found in {:?}",
            stringify!($pattern),
            $events
        );
    };
}
