//! Discord front-end.
//!
//! - [SongbirdTransport]: the voice transport, backed by a songbird call
//! - Slash commands for queue control
//! - Presence: follows people into the configured voice channel and plays the
//!   ambient track there until the channel is empty again

use crate::{
    config::DiscordConfig,
    constants::{CHANNELS, FRAME_BYTES, SAMPLE_RATE},
    error::{SessionError, TransportError},
    event::{ConnectionEvent, Event, EventBus, PlaybackEvent},
    id,
    queue::RepeatMode,
    registry::SessionRegistry,
    session::SessionStatus,
    track::Track,
    transcode::Frame,
    transport::{TransportEvent, TransportEventSender, TransportFactory, VoiceTransport},
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use byteorder::{ByteOrder, LittleEndian};
use poise::serenity_prelude::{
    self as serenity, ChannelId, CreateEmbed, CreateMessage, GuildId, Http,
};
use songbird::{
    input::{Input, RawAdapter},
    tracks::Track as SongbirdTrack,
    CoreEvent, Event as VoiceEvent, EventContext, EventHandler as VoiceEventHandler, Songbird,
};
use std::{
    collections::VecDeque,
    io::{Read, Seek, SeekFrom},
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};
use symphonia::core::io::MediaSource;

/// Frames buffered between the scheduler and songbird's mixer before the
/// oldest ones are dropped. When this many pushes in a row overflow, the
/// mixer is taken to have stopped reading.
const MAX_BUFFERED_FRAMES: usize = 25;

const REQUESTED_BY_PRESENCE: &str = "Breathing Bridge";

// ============================================================================
// Voice transport
// ============================================================================

/// Result of handing PCM to a [VoiceBuffer].
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Pushed {
    Queued,

    /// The buffer was full and this many of the oldest frames were dropped
    Overflowed { dropped_frames: u64 },

    /// Every push for a whole buffer's worth of frames has overflowed
    Stalled,
}

/// PCM waiting for songbird's mixer, bounded to [MAX_BUFFERED_FRAMES].
#[derive(Debug, Default)]
pub(crate) struct VoiceBuffer {
    pcm: VecDeque<u8>,
    pub(crate) dropped_frames: u64,
    overflows_in_row: usize,
}

impl VoiceBuffer {
    pub(crate) fn push(&mut self, payload: &[u8]) -> Pushed {
        let max = MAX_BUFFERED_FRAMES * FRAME_BYTES;
        let excess = (self.pcm.len() + payload.len()).saturating_sub(max);
        if excess == 0 {
            self.overflows_in_row = 0;
            self.pcm.extend(payload);
            return Pushed::Queued;
        }

        let dropped_frames = excess.div_ceil(FRAME_BYTES) as u64;
        self.pcm.drain(..excess.min(self.pcm.len()));
        self.pcm.extend(payload);
        self.dropped_frames += dropped_frames;
        self.overflows_in_row += 1;

        if self.overflows_in_row >= MAX_BUFFERED_FRAMES {
            Pushed::Stalled
        } else {
            Pushed::Overflowed { dropped_frames }
        }
    }

    /// Takes up to `bytes` of PCM for the mixer.
    pub(crate) fn take(&mut self, bytes: usize) -> Vec<u8> {
        let available = bytes.min(self.pcm.len());
        self.pcm.drain(..available).collect()
    }

    pub(crate) fn clear(&mut self) {
        self.pcm.clear();
        self.overflows_in_row = 0;
    }
}

type PcmBuffer = Arc<StdMutex<VoiceBuffer>>;

/// Live songbird input reading the PCM frames handed to the transport.
/// Songbird's mixer pulls from it on its own 20 ms clock; whatever is missing
/// at that point is played as silence.
struct FrameAudioSource {
    pcm: PcmBuffer,
}

impl Read for FrameAudioSource {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        // s16le in, f32le out
        let samples_needed = buf.len() / 4;

        let pcm: Vec<u8> = {
            let mut pcm = match self.pcm.lock() {
                Ok(pcm) => pcm,
                Err(poisoned) => poisoned.into_inner(),
            };
            pcm.take(samples_needed * 2)
        };

        let mut written = 0;
        for (sample, out) in pcm.chunks_exact(2).zip(buf.chunks_exact_mut(4)) {
            let value = LittleEndian::read_i16(sample) as f32 / 32768.0;
            LittleEndian::write_f32(out, value);
            written += 4;
        }
        buf[written..].fill(0);

        Ok(buf.len())
    }
}

impl Seek for FrameAudioSource {
    fn seek(&mut self, _pos: SeekFrom) -> std::io::Result<u64> {
        Ok(0)
    }
}

impl MediaSource for FrameAudioSource {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

fn create_voice_input(pcm: PcmBuffer) -> Input {
    RawAdapter::new(FrameAudioSource { pcm }, SAMPLE_RATE, CHANNELS as u32).into()
}

/// Reports driver disconnects that nobody asked for.
struct DisconnectNotifier {
    events: TransportEventSender,
}

#[async_trait]
impl VoiceEventHandler for DisconnectNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<VoiceEvent> {
        if let EventContext::DriverDisconnect(data) = ctx {
            // No reason means we left on purpose
            if let Some(reason) = &data.reason {
                let _ = self.events.send(TransportEvent::ConnectionLost {
                    reason: format!("{reason:?} ({:?})", data.kind),
                });
            }
        }
        None
    }
}

pub struct SongbirdTransport {
    manager: Arc<Songbird>,
    guild_id: GuildId,
    events: TransportEventSender,
    pcm: PcmBuffer,
}

impl SongbirdTransport {
    fn push(&self, payload: &[u8]) -> Result<(), TransportError> {
        let mut pcm = match self.pcm.lock() {
            Ok(pcm) => pcm,
            Err(poisoned) => poisoned.into_inner(),
        };

        match pcm.push(payload) {
            Pushed::Queued => Ok(()),
            Pushed::Overflowed { dropped_frames } => {
                warn!(
                    "Voice buffer of guild {} full, dropped {} frames ({} in total)",
                    self.guild_id, dropped_frames, pcm.dropped_frames
                );
                Ok(())
            }
            Pushed::Stalled => Err(TransportError::ConnectionLost {
                reason: format!(
                    "voice driver stopped reading audio, {} frames dropped",
                    pcm.dropped_frames
                ),
            }),
        }
    }
}

#[async_trait]
impl VoiceTransport for SongbirdTransport {
    async fn connect(&mut self, channel_id: id::ChannelId) -> Result<(), TransportError> {
        let call = self
            .manager
            .join(self.guild_id, ChannelId::from(channel_id))
            .await
            .map_err(|e| TransportError::HandshakeFailure {
                reason: e.to_string(),
            })?;

        let mut call = call.lock().await;
        call.remove_all_global_events();
        call.add_global_event(
            VoiceEvent::Core(CoreEvent::DriverDisconnect),
            DisconnectNotifier {
                events: self.events.clone(),
            },
        );
        call.play_only(SongbirdTrack::new(create_voice_input(self.pcm.clone())));

        Ok(())
    }

    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        self.push(&frame.payload)
    }

    async fn send_silence(&mut self) -> Result<(), TransportError> {
        self.push(&[0u8; FRAME_BYTES])
    }

    async fn disconnect(&mut self) {
        if let Err(e) = self.manager.remove(self.guild_id).await {
            debug!("Error leaving voice channel in guild {}: {:?}", self.guild_id, e);
        }
        if let Ok(mut pcm) = self.pcm.lock() {
            pcm.clear();
        }
    }
}

pub struct SongbirdTransportFactory {
    manager: Arc<Songbird>,
}

impl SongbirdTransportFactory {
    pub fn new(manager: Arc<Songbird>) -> Self {
        SongbirdTransportFactory { manager }
    }
}

impl TransportFactory for SongbirdTransportFactory {
    fn create(&self, guild_id: id::GuildId, events: TransportEventSender) -> Box<dyn VoiceTransport> {
        Box::new(SongbirdTransport {
            manager: self.manager.clone(),
            guild_id: GuildId::from(guild_id),
            events,
            pcm: Arc::new(StdMutex::new(VoiceBuffer::default())),
        })
    }
}

// ============================================================================
// Bot
// ============================================================================

struct BotState {
    registry: SessionRegistry,
    config: DiscordConfig,
}

type Context<'a> = poise::Context<'a, Arc<BotState>, anyhow::Error>;

/// Creates the songbird instance shared by the client and the transports.
pub fn voice_manager() -> Arc<Songbird> {
    Songbird::serenity()
}

/// Initialize the Discord bot
pub async fn init(
    registry: SessionRegistry,
    discord_config: &DiscordConfig,
    manager: Arc<Songbird>,
) -> Result<()> {
    let guild_id = GuildId::new(discord_config.discord_guild_id);
    let text_channel_id = discord_config.discord_text_channel_id.map(ChannelId::new);
    let token = discord_config.discord_token.clone();

    if token.is_empty() {
        return Err(anyhow!("No Discord token configured, set DISCORD_TOKEN"));
    }

    let bus = registry.context().bus.clone();
    let state = Arc::new(BotState {
        registry,
        config: discord_config.clone(),
    });

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![
                play(),
                skip(),
                pause(),
                resume(),
                stop(),
                queue(),
                remove(),
                repeat(),
                join(),
                leave(),
                status(),
            ],
            event_handler: |ctx, event, _framework, data| Box::pin(event_handler(ctx, event, data)),
            ..Default::default()
        })
        .setup(move |ctx, _ready, framework| {
            let state = state.clone();
            let bus = bus.clone();
            Box::pin(async move {
                poise::builtins::register_in_guild(ctx, &framework.options().commands, guild_id)
                    .await?;

                if let Some(channel_id) = text_channel_id {
                    start_announcer(bus, ctx.http.clone(), channel_id);
                }

                info!("Discord bot ready and commands registered!");
                Ok(state)
            })
        })
        .build();

    let intents = serenity::GatewayIntents::GUILDS
        | serenity::GatewayIntents::GUILD_MESSAGES
        | serenity::GatewayIntents::GUILD_VOICE_STATES;

    let client = serenity::ClientBuilder::new(&token, intents)
        .framework(framework)
        .register_songbird_with(manager)
        .await?;

    tokio::spawn(async move {
        let mut client = client;
        if let Err(e) = client.start().await {
            error!("Discord client error: {:?}", e);
        }
    });

    Ok(())
}

async fn event_handler(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    data: &Arc<BotState>,
) -> Result<(), anyhow::Error> {
    if let serenity::FullEvent::VoiceStateUpdate { old, new } = event {
        on_voice_state_update(ctx, data, old.as_ref(), new).await;
    }
    Ok(())
}

fn is_bot(ctx: &serenity::Context, state: &serenity::VoiceState) -> bool {
    state
        .member
        .as_ref()
        .map(|member| member.user.bot)
        .or_else(|| ctx.cache.user(state.user_id).map(|user| user.bot))
        .unwrap_or(false)
}

/// Follows people into the configured voice channel and leaves once the last
/// one is gone.
async fn on_voice_state_update(
    ctx: &serenity::Context,
    data: &Arc<BotState>,
    old: Option<&serenity::VoiceState>,
    new: &serenity::VoiceState,
) {
    let Some(voice_channel) = data.config.discord_voice_channel_id.map(ChannelId::new) else {
        return;
    };
    let Some(guild_id) = new.guild_id else {
        return;
    };
    if is_bot(ctx, new) {
        return;
    }

    let was_in = old.and_then(|state| state.channel_id) == Some(voice_channel);
    let is_in = new.channel_id == Some(voice_channel);

    if is_in && !was_in {
        info!("{} joined the voice channel", new.user_id);
        announce_activation(ctx, &data.config).await;

        let session = data.registry.get_or_create(guild_id.into()).await;
        let Some(reference) = data.config.ambient_reference.clone() else {
            return;
        };

        tokio::spawn(async move {
            let idle = match session.status().await {
                Ok(status) => status.current.is_none() && status.pending.is_empty(),
                Err(_) => true,
            };
            if !idle {
                return;
            }

            match session
                .play(
                    Track::new(reference, REQUESTED_BY_PRESENCE).looping(),
                    Some(voice_channel.into()),
                )
                .await
            {
                Ok(_) => info!("Playing the ambient track in {}", voice_channel),
                Err(e) => error!("Could not start the ambient track: {e}"),
            }
        });
    } else if was_in && !is_in {
        info!("{} left the voice channel", new.user_id);

        let occupants: Vec<serenity::VoiceState> = match ctx.cache.guild(guild_id) {
            Some(guild) => guild
                .voice_states
                .values()
                .filter(|state| state.channel_id == Some(voice_channel))
                .cloned()
                .collect(),
            None => vec![],
        };
        let humans = occupants.iter().filter(|state| !is_bot(ctx, state)).count();

        if humans == 0 {
            if let Some(session) = data.registry.get(guild_id.into()).await {
                info!("Voice channel is empty, leaving");
                if let Err(e) = session.leave().await {
                    warn!("Could not leave voice channel: {e}");
                }
            }
        }
    }
}

async fn announce_activation(ctx: &serenity::Context, config: &DiscordConfig) {
    let Some(channel_id) = config.discord_text_channel_id.map(ChannelId::new) else {
        return;
    };

    let embed = create_activation_embed(config.activation_gif_url.as_deref());
    if let Err(e) = channel_id
        .send_message(&ctx.http, CreateMessage::new().embed(embed))
        .await
    {
        debug!("Failed to send activation message: {:?}", e);
    }
}

/// Posts failures from the event bus to the text channel.
fn start_announcer(bus: EventBus, http: Arc<Http>, channel_id: ChannelId) {
    tokio::spawn(async move {
        let mut bus = bus.subscribe();

        while let Some(event) = bus.recv().await {
            let embed = match event {
                Event::Playback(_, PlaybackEvent::TrackFailed { track, error }) => {
                    create_error_embed(&format!("Could not play **{}**: {}", track.title, error))
                }
                Event::Connection(_, ConnectionEvent::TransportFailed { error }) => {
                    create_error_embed(&format!("Voice connection failed: {error}"))
                }
                Event::Playback(_, PlaybackEvent::QueueDiscarded { count }) => CreateEmbed::new()
                    .title("🗑️ Queue cleared")
                    .description(format!("Dropped {count} tracks after leaving voice"))
                    .color(0xff6600),
                _ => continue,
            };

            if let Err(e) = channel_id
                .send_message(&http, CreateMessage::new().embed(embed))
                .await
            {
                error!("Failed to send Discord message: {:?}", e);
            }
        }
    });
}

// ============================================================================
// Slash Commands
// ============================================================================

fn command_guild(ctx: Context<'_>) -> Result<id::GuildId> {
    ctx.guild_id()
        .map(id::GuildId::from)
        .ok_or_else(|| anyhow!("Not in a guild"))
}

/// Voice channel the command's author is currently in.
fn author_voice_channel(ctx: Context<'_>) -> Option<id::ChannelId> {
    let guild = ctx.guild()?;
    guild
        .voice_states
        .get(&ctx.author().id)
        .and_then(|state| state.channel_id)
        .map(id::ChannelId::from)
}

async fn reply_error(ctx: Context<'_>, error: &SessionError) -> Result<()> {
    ctx.say(format!("❌ {error}")).await?;
    Ok(())
}

/// Play a URL, a local file or the first search result
#[poise::command(slash_command)]
async fn play(
    ctx: Context<'_>,
    #[description = "URL, file path or search terms"] reference: String,
) -> Result<(), anyhow::Error> {
    let guild_id = command_guild(ctx)?;
    let channel_id = author_voice_channel(ctx);
    let nick = ctx.author().name.clone();

    info!("Discord /play from {nick}: {reference}");
    ctx.defer().await?;

    let session = ctx.data().registry.get_or_create(guild_id).await;
    match session.play(Track::new(reference, nick), channel_id).await {
        Ok((track, position)) => {
            let wait = match session.status().await {
                Ok(status) => queue_wait(&status, position),
                Err(_) => Duration::ZERO,
            };
            ctx.send(poise::CreateReply::default().embed(create_enqueue_embed(
                &track, position, wait,
            )))
            .await?;
        }
        Err(SessionError::NotConnected) => {
            ctx.say("❌ Join a voice channel first").await?;
        }
        Err(e) => reply_error(ctx, &e).await?,
    }

    Ok(())
}

/// Skip the current track
#[poise::command(slash_command)]
async fn skip(ctx: Context<'_>) -> Result<(), anyhow::Error> {
    let session = ctx.data().registry.get_or_create(command_guild(ctx)?).await;
    match session.skip().await {
        Ok(track) => {
            ctx.say(format!("⏭️ Skipped **{}**", track.title)).await?;
        }
        Err(e) => reply_error(ctx, &e).await?,
    }
    Ok(())
}

/// Pause playback
#[poise::command(slash_command)]
async fn pause(ctx: Context<'_>) -> Result<(), anyhow::Error> {
    let session = ctx.data().registry.get_or_create(command_guild(ctx)?).await;
    match session.pause().await {
        Ok(()) => {
            ctx.say("⏸️ Paused").await?;
        }
        Err(SessionError::InvalidTransition(_)) => {
            ctx.say("Nothing is playing").await?;
        }
        Err(e) => reply_error(ctx, &e).await?,
    }
    Ok(())
}

/// Resume playback
#[poise::command(slash_command)]
async fn resume(ctx: Context<'_>) -> Result<(), anyhow::Error> {
    let session = ctx.data().registry.get_or_create(command_guild(ctx)?).await;
    match session.resume().await {
        Ok(()) => {
            ctx.say("▶️ Resumed").await?;
        }
        Err(SessionError::InvalidTransition(_)) => {
            ctx.say("Nothing is paused").await?;
        }
        Err(e) => reply_error(ctx, &e).await?,
    }
    Ok(())
}

/// Stop playback and clear the queue
#[poise::command(slash_command)]
async fn stop(ctx: Context<'_>) -> Result<(), anyhow::Error> {
    let session = ctx.data().registry.get_or_create(command_guild(ctx)?).await;
    match session.stop().await {
        Ok(()) => {
            ctx.say("🔇 Stopped").await?;
        }
        Err(e) => reply_error(ctx, &e).await?,
    }
    Ok(())
}

/// Show the queue
#[poise::command(slash_command)]
async fn queue(ctx: Context<'_>) -> Result<(), anyhow::Error> {
    let session = ctx.data().registry.get_or_create(command_guild(ctx)?).await;
    match session.status().await {
        Ok(status) => {
            ctx.send(poise::CreateReply::default().embed(create_queue_embed(&status)))
                .await?;
        }
        Err(e) => reply_error(ctx, &e).await?,
    }
    Ok(())
}

/// Remove a track from the queue
#[poise::command(slash_command)]
async fn remove(
    ctx: Context<'_>,
    #[description = "Position in the queue, 1 is next up"]
    #[min = 1]
    position: u32,
) -> Result<(), anyhow::Error> {
    let session = ctx.data().registry.get_or_create(command_guild(ctx)?).await;
    match session.remove_at(position.saturating_sub(1) as usize).await {
        Ok(track) => {
            ctx.say(format!("🗑️ Removed **{}** from the queue", track.title))
                .await?;
        }
        Err(SessionError::NoSuchPosition { .. }) => {
            ctx.say(format!("❌ There is no track at position {position}"))
                .await?;
        }
        Err(e) => reply_error(ctx, &e).await?,
    }
    Ok(())
}

#[derive(Debug, poise::ChoiceParameter)]
enum LoopChoice {
    #[name = "off"]
    Off,
    #[name = "track"]
    Track,
    #[name = "queue"]
    Queue,
}

impl From<LoopChoice> for RepeatMode {
    fn from(choice: LoopChoice) -> Self {
        match choice {
            LoopChoice::Off => RepeatMode::Off,
            LoopChoice::Track => RepeatMode::Track,
            LoopChoice::Queue => RepeatMode::Queue,
        }
    }
}

/// Repeat the current track or the whole queue
#[poise::command(slash_command, rename = "loop")]
async fn repeat(
    ctx: Context<'_>,
    #[description = "What to repeat"] mode: LoopChoice,
) -> Result<(), anyhow::Error> {
    let session = ctx.data().registry.get_or_create(command_guild(ctx)?).await;
    let mode = RepeatMode::from(mode);
    match session.set_repeat(mode).await {
        Ok(()) => {
            ctx.say(format!("🔁 Repeat: {mode:?}")).await?;
        }
        Err(e) => reply_error(ctx, &e).await?,
    }
    Ok(())
}

/// Join a voice channel
#[poise::command(slash_command)]
async fn join(
    ctx: Context<'_>,
    #[description = "Voice channel to join, defaults to yours"] channel: Option<
        serenity::GuildChannel,
    >,
) -> Result<(), anyhow::Error> {
    let guild_id = command_guild(ctx)?;
    let Some(channel_id) = channel
        .map(|channel| id::ChannelId::from(channel.id))
        .or_else(|| author_voice_channel(ctx))
    else {
        ctx.say("❌ You must be in a voice channel or name one").await?;
        return Ok(());
    };

    ctx.defer().await?;

    let session = ctx.data().registry.get_or_create(guild_id).await;
    match session.join(channel_id).await {
        Ok(()) => {
            ctx.say(format!("🔊 Joined voice channel <#{}>", channel_id))
                .await?;
        }
        Err(e) => reply_error(ctx, &e).await?,
    }
    Ok(())
}

/// Leave the voice channel and drop the queue
#[poise::command(slash_command)]
async fn leave(ctx: Context<'_>) -> Result<(), anyhow::Error> {
    let session = ctx.data().registry.get_or_create(command_guild(ctx)?).await;
    match session.leave().await {
        Ok(()) => {
            ctx.say("🔇 Left voice channel").await?;
        }
        Err(e) => reply_error(ctx, &e).await?,
    }
    Ok(())
}

/// Check bot status
#[poise::command(slash_command)]
async fn status(ctx: Context<'_>) -> Result<(), anyhow::Error> {
    let session = ctx.data().registry.get_or_create(command_guild(ctx)?).await;
    match session.status().await {
        Ok(status) => {
            let text = match (status.channel_id, &status.current) {
                (Some(channel_id), Some(track)) => format!(
                    "Connected to <#{}> | {} **{}**",
                    channel_id, status.state, track.title
                ),
                (Some(channel_id), None) => {
                    format!("Connected to <#{}> | Nothing playing", channel_id)
                }
                (None, _) => "Not connected to voice".to_string(),
            };
            ctx.say(text).await?;
        }
        Err(e) => reply_error(ctx, &e).await?,
    }
    Ok(())
}

// ============================================================================
// Rich Embed Builders
// ============================================================================

/// Time until the track at 1-based `position` starts, as far as known.
fn queue_wait(status: &SessionStatus, position: usize) -> Duration {
    let remaining = status
        .current
        .as_ref()
        .and_then(|track| track.duration)
        .map(|duration| duration.saturating_sub(status.position.unwrap_or_default()))
        .unwrap_or_default();

    status
        .pending
        .iter()
        .take(position.saturating_sub(1))
        .filter_map(|track| track.duration)
        .fold(remaining, |total, duration| total + duration)
}

pub fn create_activation_embed(gif_url: Option<&str>) -> CreateEmbed {
    let embed = CreateEmbed::new()
        .title("🌬️ BREATHING BRIDGE ACTIVATED")
        .description("INHALE 4s → HOLD 7s → EXHALE 8s")
        .color(0x00ff88);

    match gif_url {
        Some(url) => embed.image(url),
        None => embed,
    }
}

pub fn create_enqueue_embed(track: &Track, position: usize, wait: Duration) -> CreateEmbed {
    let mut embed = CreateEmbed::new()
        .title(format!("✅ {}", track.title))
        .color(0x00ff00)
        .field("👤 Queued by", &track.requested_by, true)
        .field("⏱️ Duration", track.duration_display(), true)
        .field("📋 Position", position.to_string(), true);

    if track.reference.contains("://") {
        embed = embed.url(&track.reference);
    }
    if !wait.is_zero() {
        embed = embed.footer(serenity::CreateEmbedFooter::new(format!(
            "Plays in about {} min",
            wait.as_secs().div_ceil(60)
        )));
    }

    embed
}

pub fn create_queue_embed(status: &SessionStatus) -> CreateEmbed {
    let mut embed = match &status.current {
        Some(track) => {
            let position = status.position.unwrap_or_default().as_secs();
            CreateEmbed::new()
                .title(format!("▶️ Now playing: {}", track.title))
                .color(0x00ff00)
                .field("👤 Queued by", &track.requested_by, true)
                .field(
                    "Progress",
                    format!(
                        "{}:{:02} / {}",
                        position / 60,
                        position % 60,
                        track.duration_display()
                    ),
                    true,
                )
        }
        None => CreateEmbed::new()
            .title("⏹️ Nothing playing")
            .description("Queue is empty!")
            .color(0x808080),
    };

    if !status.pending.is_empty() {
        let upcoming: Vec<String> = status
            .pending
            .iter()
            .take(10)
            .enumerate()
            .map(|(index, track)| {
                format!(
                    "{}. {} [{}] - {}",
                    index + 1,
                    track.title,
                    track.duration_display(),
                    track.requested_by
                )
            })
            .collect();
        embed = embed.field("📋 Up next", upcoming.join("\n"), false);
    }

    let total = status.pending_duration.as_secs();
    embed.footer(serenity::CreateEmbedFooter::new(format!(
        "Queue: {} tracks ({}:{:02}) • Repeat: {:?} • {}",
        status.pending.len(),
        total / 60,
        total % 60,
        status.repeat,
        status.state
    )))
}

pub fn create_error_embed(message: &str) -> CreateEmbed {
    CreateEmbed::new()
        .title("❌ Error")
        .description(message)
        .color(0xff0000)
}
