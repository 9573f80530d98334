//! Per-guild playback session.
//!
//! Each guild gets one [GuildSession] task. It exclusively owns the guild's
//! queue, voice transport and the stage of the track being played, and
//! processes commands one at a time, so commands issued against one guild
//! take effect in the order they were received. Everything else talks to it
//! through a cloneable [SessionHandle].
//!
//! The session task also drives frame delivery: the [FrameScheduler]'s next
//! deadline is one of the things it waits on, next to commands, transport
//! failures, the resolution of the upcoming track and the idle timer.

use crate::{
    config::{SchedulerConfig, SessionConfig},
    connection::{ConnectionState, ConnectionTrigger},
    error::{ResolutionError, SessionError, TrackError, TransportError},
    event::{ConnectionEvent, Event, EventBus, PlaybackEvent},
    id::{ChannelId, GuildId},
    queue::{PlaybackQueue, RepeatMode},
    resolver::SourceResolver,
    scheduler::{FrameScheduler, TickOutcome},
    track::{ResolvedTrack, Track},
    transcode::{TranscodeStage, Transcoder},
    transport::{TransportEvent, TransportFactory, VoiceTransport},
};
use std::{future::pending, sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::{sleep, sleep_until, timeout, Instant},
};

/// Shared collaborators of every session.
#[derive(Clone)]
pub struct SessionContext {
    pub resolver: SourceResolver,
    pub transcoder: Arc<dyn Transcoder>,
    pub transports: Arc<dyn TransportFactory>,
    pub bus: EventBus,
    pub scheduler: SchedulerConfig,
    pub session: SessionConfig,
}

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

#[derive(Debug)]
pub enum SessionCommand {
    Join {
        channel_id: ChannelId,
        reply: Reply<()>,
    },

    /// Enqueue a track, joining `channel_id` first if not connected yet
    Play {
        track: Track,
        channel_id: Option<ChannelId>,
        reply: Reply<(Track, usize)>,
    },

    Skip { reply: Reply<Track> },
    Pause { reply: Reply<()> },
    Resume { reply: Reply<()> },

    /// Stop the current track and clear the queue, but stay connected
    Stop { reply: Reply<()> },

    Clear { reply: Reply<usize> },

    /// Remove the pending track at a 0-based index
    Remove { index: usize, reply: Reply<Track> },

    Move {
        from: usize,
        to: usize,
        reply: Reply<()>,
    },

    SetRepeat {
        mode: RepeatMode,
        reply: Reply<()>,
    },

    Status { reply: Reply<SessionStatus> },
    Leave { reply: Reply<()> },
}

/// Snapshot of a session, as returned by [SessionHandle::status].
#[derive(Clone, Debug)]
pub struct SessionStatus {
    pub guild_id: GuildId,
    pub state: ConnectionState,
    pub channel_id: Option<ChannelId>,
    pub current: Option<Track>,

    /// How far into the current track delivery is, once it has started
    pub position: Option<Duration>,
    pub pending: Vec<Track>,

    /// Known duration of the pending tracks
    pub pending_duration: Duration,
    pub repeat: RepeatMode,
}

#[derive(Clone, Debug)]
pub struct SessionHandle {
    guild_id: GuildId,
    tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    /// Whether the session task has exited.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> SessionCommand,
    ) -> Result<T, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(command(reply))
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    pub async fn join(&self, channel_id: ChannelId) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::Join { channel_id, reply })
            .await
    }

    /// Appends `track` to the queue. Returns the queued track with its id and
    /// its 1-based position among the pending tracks.
    pub async fn play(
        &self,
        track: Track,
        channel_id: Option<ChannelId>,
    ) -> Result<(Track, usize), SessionError> {
        self.request(|reply| SessionCommand::Play {
            track,
            channel_id,
            reply,
        })
        .await
    }

    pub async fn skip(&self) -> Result<Track, SessionError> {
        self.request(|reply| SessionCommand::Skip { reply }).await
    }

    pub async fn pause(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::Pause { reply }).await
    }

    pub async fn resume(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::Resume { reply }).await
    }

    pub async fn stop(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::Stop { reply }).await
    }

    pub async fn clear(&self) -> Result<usize, SessionError> {
        self.request(|reply| SessionCommand::Clear { reply }).await
    }

    pub async fn remove_at(&self, index: usize) -> Result<Track, SessionError> {
        self.request(|reply| SessionCommand::Remove { index, reply })
            .await
    }

    pub async fn move_track(&self, from: usize, to: usize) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::Move { from, to, reply })
            .await
    }

    pub async fn set_repeat(&self, mode: RepeatMode) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::SetRepeat { mode, reply })
            .await
    }

    pub async fn status(&self) -> Result<SessionStatus, SessionError> {
        self.request(|reply| SessionCommand::Status { reply }).await
    }

    pub async fn leave(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::Leave { reply }).await
    }
}

/// The track whose frames are currently being delivered.
struct ActivePlayback {
    track: Track,
    stage: TranscodeStage,
    scheduler: FrameScheduler,
}

pub struct GuildSession {
    guild_id: GuildId,
    ctx: SessionContext,
    state: ConnectionState,
    channel_id: Option<ChannelId>,
    queue: PlaybackQueue,
    transport: Box<dyn VoiceTransport>,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    resolving: Option<JoinHandle<Result<ResolvedTrack, ResolutionError>>>,
    active: Option<ActivePlayback>,
    idle_since: Option<Instant>,
}

impl GuildSession {
    /// Starts the session task of `guild_id`.
    pub fn spawn(guild_id: GuildId, ctx: SessionContext) -> SessionHandle {
        let (tx, rx) = mpsc::channel(ctx.session.command_buffer);
        let (events_tx, transport_events) = mpsc::unbounded_channel();
        let transport = ctx.transports.create(guild_id, events_tx);

        let session = GuildSession {
            guild_id,
            queue: PlaybackQueue::new(ctx.session.max_queue_len),
            ctx,
            state: ConnectionState::Disconnected,
            channel_id: None,
            transport,
            transport_events,
            resolving: None,
            active: None,
            idle_since: None,
        };
        tokio::spawn(session.run(rx));

        SessionHandle { guild_id, tx }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) {
        debug!("Session for guild {} started", self.guild_id);

        loop {
            let tick_at = self
                .active
                .as_ref()
                .and_then(|active| active.scheduler.next_deadline());
            let idle_at = self.idle_deadline();

            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(event) = self.transport_events.recv() => {
                    self.handle_transport_event(event).await;
                }
                _ = sleep_until_some(tick_at) => self.tick().await,
                result = resolution(&mut self.resolving) => {
                    self.resolving = None;
                    self.on_resolved(result).await;
                }
                _ = sleep_until_some(idle_at) => self.idle_timeout().await,
            }
        }

        self.leave().await;
        debug!("Session for guild {} stopped", self.guild_id);
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        // A dropped reply receiver just means the caller stopped waiting
        match command {
            SessionCommand::Join { channel_id, reply } => {
                let result = self.join(channel_id).await;
                let _ = reply.send(result);
            }
            SessionCommand::Play {
                track,
                channel_id,
                reply,
            } => {
                let result = self.play(track, channel_id).await;
                let _ = reply.send(result);
            }
            SessionCommand::Skip { reply } => {
                let result = self.skip().await;
                let _ = reply.send(result);
            }
            SessionCommand::Pause { reply } => {
                let _ = reply.send(self.pause());
            }
            SessionCommand::Resume { reply } => {
                let _ = reply.send(self.resume());
            }
            SessionCommand::Stop { reply } => {
                let result = self.stop().await;
                let _ = reply.send(result);
            }
            SessionCommand::Clear { reply } => {
                let count = self.queue.clear();
                if count > 0 {
                    self.publish(PlaybackEvent::Cleared { count });
                }
                let _ = reply.send(Ok(count));
            }
            SessionCommand::Remove { index, reply } => {
                let result = self.queue.remove_at(index);
                if let Ok(track) = &result {
                    self.publish(PlaybackEvent::Removed {
                        track: track.clone(),
                    });
                }
                let _ = reply.send(result);
            }
            SessionCommand::Move { from, to, reply } => {
                let _ = reply.send(self.queue.move_track(from, to));
            }
            SessionCommand::SetRepeat { mode, reply } => {
                self.queue.set_repeat(mode);
                let _ = reply.send(Ok(()));
            }
            SessionCommand::Status { reply } => {
                let _ = reply.send(Ok(self.status()));
            }
            SessionCommand::Leave { reply } => {
                self.leave().await;
                let _ = reply.send(Ok(()));
            }
        }
    }

    fn status(&self) -> SessionStatus {
        SessionStatus {
            guild_id: self.guild_id,
            state: self.state,
            channel_id: self.channel_id,
            current: self.queue.current().cloned(),
            position: self
                .active
                .as_ref()
                .map(|active| active.scheduler.position()),
            pending: self.queue.pending().cloned().collect(),
            pending_duration: self.queue.pending_duration(),
            repeat: self.queue.repeat(),
        }
    }

    /// Joins `channel_id`, retrying the handshake with a growing backoff.
    async fn join(&mut self, channel_id: ChannelId) -> Result<(), SessionError> {
        if self.state.is_connected() {
            if self.channel_id == Some(channel_id) {
                return Ok(());
            }

            info!(
                "Guild {}: moving to voice channel {}",
                self.guild_id, channel_id
            );
            let connect_timeout = self.ctx.session.connect_timeout();
            let moved = match timeout(connect_timeout, self.transport.connect(channel_id)).await {
                Ok(moved) => moved,
                Err(_) => Err(TransportError::HandshakeFailure {
                    reason: format!("no response within {}s", connect_timeout.as_secs()),
                }),
            };
            if let Err(e) = moved {
                self.connection_lost(e.clone()).await;
                return Err(e.into());
            }
            self.channel_id = Some(channel_id);
            self.publish_connection(ConnectionEvent::Joined { channel_id });
            return Ok(());
        }

        self.try_transition(ConnectionTrigger::JoinRequested)?;

        let attempts = self.ctx.session.connect_attempts;
        let connect_timeout = self.ctx.session.connect_timeout();
        let mut last_error = None;

        for attempt in 1..=attempts {
            let error = match timeout(connect_timeout, self.transport.connect(channel_id)).await {
                Ok(Ok(())) => {
                    self.drain_transport_events();
                    self.channel_id = Some(channel_id);
                    self.transition(ConnectionTrigger::HandshakeComplete);
                    info!("Guild {}: joined voice channel {}", self.guild_id, channel_id);
                    self.publish_connection(ConnectionEvent::Joined { channel_id });
                    return Ok(());
                }
                Ok(Err(e)) => e,
                Err(_) => TransportError::HandshakeFailure {
                    reason: format!("no response within {}s", connect_timeout.as_secs()),
                },
            };

            warn!(
                "Guild {}: voice connect attempt {}/{} failed: {}",
                self.guild_id, attempt, attempts, error
            );
            last_error = Some(error);

            if attempt < attempts {
                sleep(self.ctx.session.connect_backoff(attempt)).await;
            }
        }

        let error = last_error.unwrap_or_else(|| TransportError::HandshakeFailure {
            reason: "no connection attempts made".to_string(),
        });

        self.transport.disconnect().await;
        self.drain_transport_events();
        self.transition(ConnectionTrigger::HandshakeFailed);
        self.publish_connection(ConnectionEvent::TransportFailed {
            error: error.clone(),
        });

        Err(error.into())
    }

    async fn play(
        &mut self,
        track: Track,
        channel_id: Option<ChannelId>,
    ) -> Result<(Track, usize), SessionError> {
        if !self.state.is_connected() {
            let channel_id = channel_id
                .or(self.channel_id)
                .ok_or(SessionError::NotConnected)?;
            self.join(channel_id).await?;
        }

        let (track, position) = self.queue.enqueue(track)?;
        info!(
            "Guild {}: queued {} at position {} (requested by {})",
            self.guild_id, track.reference, position, track.requested_by
        );
        self.publish(PlaybackEvent::Enqueued {
            track: track.clone(),
            position,
        });

        if self.state == ConnectionState::Connected {
            self.advance();
        } else if !track.looping && self.queue.current().is_some_and(|current| current.looping) {
            info!(
                "Guild {}: stopping the looping track for {}",
                self.guild_id, track.reference
            );
            self.skip().await?;
        }

        Ok((track, position))
    }

    async fn skip(&mut self) -> Result<Track, SessionError> {
        if !self.state.has_track() {
            return Err(SessionError::NothingPlaying);
        }

        if let Err(e) = self.end_active().await {
            self.connection_lost(e.clone()).await;
            return Err(e.into());
        }
        let skipped = self.queue.skip_current();
        if let Some(track) = &skipped {
            info!("Guild {}: skipped {}", self.guild_id, track.title);
            self.publish(PlaybackEvent::TrackSkipped {
                track: track.clone(),
            });
        }

        if self.state == ConnectionState::Paused {
            self.transition(ConnectionTrigger::PlaybackStopped);
        }
        self.advance();

        skipped.ok_or(SessionError::NothingPlaying)
    }

    fn pause(&mut self) -> Result<(), SessionError> {
        self.try_transition(ConnectionTrigger::PauseRequested)?;
        if let Some(active) = self.active.as_mut() {
            active.scheduler.pause();
        }
        Ok(())
    }

    fn resume(&mut self) -> Result<(), SessionError> {
        self.try_transition(ConnectionTrigger::ResumeRequested)?;
        if let Some(active) = self.active.as_mut() {
            active.scheduler.resume(Instant::now());
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), SessionError> {
        if !self.state.is_connected() {
            return Err(SessionError::NotConnected);
        }

        let count = self.queue.clear();
        if count > 0 {
            self.publish(PlaybackEvent::Cleared { count });
        }

        if self.state.has_track() {
            if let Err(e) = self.end_active().await {
                self.connection_lost(e.clone()).await;
                return Err(e.into());
            }
            if let Some(track) = self.queue.skip_current() {
                self.publish(PlaybackEvent::TrackSkipped { track });
            }
            self.transition(ConnectionTrigger::PlaybackStopped);
        }

        Ok(())
    }

    /// Stops playback, drops the queue and leaves the voice channel.
    async fn leave(&mut self) {
        if let Err(e) = self.end_active().await {
            debug!("Guild {}: could not send trailing silence: {}", self.guild_id, e);
        }

        let count = self.queue.discard_all();
        if count > 0 {
            self.publish(PlaybackEvent::QueueDiscarded { count });
        }
        self.queue.set_repeat(RepeatMode::Off);

        if self.state != ConnectionState::Disconnected {
            self.transport.disconnect().await;
            info!("Guild {}: left voice channel", self.guild_id);
        }
        self.channel_id = None;
        self.transition(ConnectionTrigger::LeaveRequested);
        self.drain_transport_events();
    }

    /// Tears the session down after a transport failure. The connection is
    /// not resumed and the queue is discarded.
    async fn connection_lost(&mut self, error: TransportError) {
        error!("Guild {}: {}", self.guild_id, error);

        self.stop_active().await;

        let count = self.queue.discard_all();
        if count > 0 {
            self.publish(PlaybackEvent::QueueDiscarded { count });
        }
        self.queue.set_repeat(RepeatMode::Off);

        self.transport.disconnect().await;
        self.channel_id = None;
        self.transition(ConnectionTrigger::ConnectionLost);
        self.publish_connection(ConnectionEvent::TransportFailed { error });
        self.drain_transport_events();
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::ConnectionLost { reason } => {
                if self.state.is_connected() {
                    self.connection_lost(TransportError::ConnectionLost { reason })
                        .await;
                } else {
                    debug!(
                        "Guild {}: ignoring connection loss while {}: {}",
                        self.guild_id, self.state, reason
                    );
                }
            }
        }
    }

    async fn idle_timeout(&mut self) {
        info!(
            "Guild {}: nothing played for {}s, leaving",
            self.guild_id, self.ctx.session.idle_timeout_secs
        );
        self.publish_connection(ConnectionEvent::IdleTimeout);
        self.leave().await;
    }

    fn idle_deadline(&self) -> Option<Instant> {
        if self.state != ConnectionState::Connected {
            return None;
        }
        let idle_timeout = self.ctx.session.idle_timeout()?;
        self.idle_since.map(|since| since + idle_timeout)
    }

    /// Moves the next pending track into place and starts resolving it, or
    /// goes idle when there is none.
    fn advance(&mut self) {
        match self.queue.advance() {
            Some(track) => {
                if self.state == ConnectionState::Connected {
                    self.transition(ConnectionTrigger::TrackAvailable);
                }

                debug!("Guild {}: resolving {}", self.guild_id, track.reference);
                let resolver = self.ctx.resolver.clone();
                self.resolving = Some(tokio::spawn(async move { resolver.resolve(track).await }));
            }
            None => {
                match self.state {
                    ConnectionState::Playing => self.transition(ConnectionTrigger::QueueExhausted),
                    ConnectionState::Paused => self.transition(ConnectionTrigger::PlaybackStopped),
                    _ => {}
                }
                self.publish(PlaybackEvent::QueueExhausted);
            }
        }
    }

    async fn on_resolved(&mut self, result: Result<ResolvedTrack, ResolutionError>) {
        let resolved = match result {
            Ok(resolved) => resolved,
            Err(e) => return self.fail_track(e.into()).await,
        };

        if self.queue.current().map(|track| track.id) != Some(resolved.track.id) {
            debug!(
                "Guild {}: dropping resolution of {}, no longer current",
                self.guild_id, resolved.track.id
            );
            return;
        }
        self.queue.update_current(&resolved.track);

        match self.ctx.transcoder.start(&resolved.source) {
            Ok(stage) => {
                let mut scheduler = FrameScheduler::new(self.ctx.scheduler.clone(), Instant::now());
                if self.state == ConnectionState::Paused {
                    scheduler.pause();
                }

                info!(
                    "Guild {}: now playing {} [{}]",
                    self.guild_id,
                    resolved.track.title,
                    resolved.track.duration_display()
                );
                self.publish(PlaybackEvent::TrackStarted {
                    track: resolved.track.clone(),
                });
                self.active = Some(ActivePlayback {
                    track: resolved.track,
                    stage,
                    scheduler,
                });
            }
            Err(e) => self.fail_track(e.into()).await,
        }
    }

    async fn tick(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };

        let outcome = active
            .scheduler
            .tick(&mut active.stage, &mut *self.transport, Instant::now())
            .await;

        match outcome {
            Ok(TickOutcome::Continue) => {}
            Ok(TickOutcome::Recovered { silence_frames }) => {
                let track = active.track.clone();
                debug!(
                    "Guild {}: {} recovered after {} frames of silence",
                    self.guild_id, track.title, silence_frames
                );
                self.publish(PlaybackEvent::Underrun {
                    track,
                    silence_frames,
                });
            }
            Ok(TickOutcome::Finished { frames }) => self.finish_track(frames).await,
            Ok(TickOutcome::Failed(e)) => self.fail_track(e.into()).await,
            Err(e) => self.connection_lost(e).await,
        }
    }

    async fn finish_track(&mut self, frames: u64) {
        let ended = self.end_active().await;
        if let Some(track) = self.queue.finish_current() {
            info!("Guild {}: finished {}", self.guild_id, track.title);
            self.publish(PlaybackEvent::TrackFinished { track, frames });
        }

        match ended {
            Ok(()) => self.advance(),
            Err(e) => self.connection_lost(e).await,
        }
    }

    /// Ends the current track after an error that only concerns the track
    /// and moves on to the next one.
    async fn fail_track(&mut self, error: TrackError) {
        let ended = self.end_active().await;
        if let Some(track) = self.queue.skip_current() {
            warn!(
                "Guild {}: could not play {}: {}",
                self.guild_id, track.reference, error
            );
            self.publish(PlaybackEvent::TrackFailed { track, error });
        }

        match ended {
            Ok(()) => self.advance(),
            Err(e) => self.connection_lost(e).await,
        }
    }

    /// Ends the active track with its trailing silence and stops it. The
    /// stage is shut down even when the silence could not be sent.
    async fn end_active(&mut self) -> Result<(), TransportError> {
        let scheduler = self.active.as_ref().map(|active| &active.scheduler);
        let sent = match scheduler {
            Some(scheduler) if self.state.is_connected() => {
                scheduler.send_trailing_silence(&mut *self.transport).await
            }
            _ => Ok(()),
        };
        self.stop_active().await;
        sent
    }

    /// Cancels any pending resolution and shuts down the active stage,
    /// waiting until its transcoder has exited.
    async fn stop_active(&mut self) {
        if let Some(task) = self.resolving.take() {
            task.abort();
        }

        if let Some(active) = self.active.take() {
            active.stage.shutdown().await;
        }
    }

    fn try_transition(&mut self, trigger: ConnectionTrigger) -> Result<(), SessionError> {
        let next = self.state.apply(trigger)?;
        let previous = self.state;
        self.state = next;

        self.idle_since = (next == ConnectionState::Connected).then(Instant::now);

        if previous != next {
            debug!("Guild {}: {} -> {}", self.guild_id, previous, next);
            self.publish_connection(ConnectionEvent::StateChanged {
                from: previous,
                to: next,
            });
        }

        Ok(())
    }

    /// Applies a transition the session itself decided on.
    fn transition(&mut self, trigger: ConnectionTrigger) {
        if let Err(e) = self.try_transition(trigger) {
            error!("Guild {}: {}", self.guild_id, e);
        }
    }

    /// Drops transport notifications left over from a previous connection.
    fn drain_transport_events(&mut self) {
        while self.transport_events.try_recv().is_ok() {}
    }

    fn publish(&self, event: PlaybackEvent) {
        self.ctx.bus.send(Event::Playback(self.guild_id, event));
    }

    fn publish_connection(&self, event: ConnectionEvent) {
        self.ctx.bus.send(Event::Connection(self.guild_id, event));
    }
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

async fn resolution(
    task: &mut Option<JoinHandle<Result<ResolvedTrack, ResolutionError>>>,
) -> Result<ResolvedTrack, ResolutionError> {
    match task {
        Some(task) => task.await.unwrap_or_else(|e| {
            Err(ResolutionError::Unsupported {
                reason: format!("resolver task failed: {e}"),
            })
        }),
        None => pending().await,
    }
}
