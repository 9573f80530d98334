use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::fs::read_to_string;

const DEFAULT_CONFIG_PATH: &str = "Config.toml";

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Path to the yt-dlp binary, downloaded there on startup if missing
    pub yt_dlp_path: String,

    /// Upper bound for a single resolution, including network I/O
    pub timeout_secs: u64,

    /// Reject tracks longer than this
    pub max_duration_secs: Option<u64>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        ResolverConfig {
            yt_dlp_path: "./yt-dlp".to_string(),
            timeout_secs: 30,
            max_duration_secs: None,
        }
    }
}

impl ResolverConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn max_duration(&self) -> Option<Duration> {
        self.max_duration_secs.map(Duration::from_secs)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct TranscoderConfig {
    pub program: String,

    /// Prepended to `args` when the source is a remote URL
    pub remote_input_args: Vec<String>,

    /// Full argument list. `{input}` is replaced by the stream handle.
    pub args: Vec<String>,

    /// Frames buffered ahead of the scheduler before the transcoder is
    /// blocked. 150 frames is three seconds.
    pub buffer_frames: usize,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        let args = [
            "-hide_banner",
            "-loglevel",
            "error",
            "-i",
            "{input}",
            "-vn",
            "-f",
            "s16le",
            "-ar",
            "48000",
            "-ac",
            "2",
            "pipe:1",
        ];
        let remote_input_args = [
            "-reconnect",
            "1",
            "-reconnect_streamed",
            "1",
            "-reconnect_delay_max",
            "5",
        ];

        TranscoderConfig {
            program: "ffmpeg".to_string(),
            remote_input_args: remote_input_args.iter().map(|s| s.to_string()).collect(),
            args: args.iter().map(|s| s.to_string()).collect(),
            buffer_frames: 150,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Longest contiguous stretch of silence sent while waiting for the
    /// transcoder before the track fails
    pub underrun_tolerance_ms: u64,

    /// Silence frames sent after a track stops so the receiving clients don't
    /// interpolate the last packet
    pub trailing_silence_frames: u32,

    /// How far behind its schedule the delivery loop may fall before it
    /// re-anchors instead of catching up
    pub max_lateness_frames: u32,

    /// How long a new track may take to produce its first frame
    pub startup_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            underrun_tolerance_ms: 5000,
            trailing_silence_frames: 5,
            max_lateness_frames: 5,
            startup_timeout_ms: 10_000,
        }
    }
}

impl SchedulerConfig {
    pub fn underrun_tolerance(&self) -> Duration {
        Duration::from_millis(self.underrun_tolerance_ms)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    pub max_queue_len: usize,

    /// Leave the voice channel after this long without anything playing.
    /// Zero disables the timer.
    pub idle_timeout_secs: u64,

    pub connect_attempts: u32,
    pub connect_timeout_secs: u64,

    /// Wait `connect_backoff_secs * attempt` between connection attempts
    pub connect_backoff_secs: u64,

    /// Capacity of each session's command channel
    pub command_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            max_queue_len: 1000,
            idle_timeout_secs: 600,
            connect_attempts: 5,
            connect_timeout_secs: 15,
            connect_backoff_secs: 5,
            command_buffer: 32,
        }
    }
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn connect_backoff(&self, attempt: u32) -> Duration {
        Duration::from_secs(self.connect_backoff_secs * attempt as u64)
    }
}

#[cfg(feature = "discord")]
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DiscordConfig {
    /// Discord bot token. The `DISCORD_TOKEN` environment variable takes
    /// precedence.
    #[serde(default)]
    pub discord_token: String,

    /// Guild (server) ID for registering slash commands
    pub discord_guild_id: u64,

    /// Text channel for activation announcements
    pub discord_text_channel_id: Option<u64>,

    /// Voice channel the bot follows people into
    pub discord_voice_channel_id: Option<u64>,

    /// Played on repeat when the bot joins the voice channel by itself
    pub ambient_reference: Option<String>,

    /// Image attached to the activation announcement
    pub activation_gif_url: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub resolver: ResolverConfig,
    pub transcoder: TranscoderConfig,
    pub scheduler: SchedulerConfig,
    pub session: SessionConfig,

    #[cfg(feature = "discord")]
    pub discord: Option<DiscordConfig>,
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Config> {
        let config: Config = toml::from_str(text).context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.transcoder.buffer_frames == 0 {
            bail!("transcoder.buffer_frames must be greater than 0");
        }
        if !self.transcoder.args.iter().any(|arg| arg.contains("{input}")) {
            bail!("transcoder.args must contain an {{input}} placeholder");
        }
        if self.scheduler.max_lateness_frames == 0 {
            bail!("scheduler.max_lateness_frames must be greater than 0");
        }
        if self.scheduler.underrun_tolerance_ms == 0 {
            bail!("scheduler.underrun_tolerance_ms must be greater than 0");
        }
        if self.session.max_queue_len == 0 {
            bail!("session.max_queue_len must be greater than 0");
        }
        if self.session.connect_attempts == 0 {
            bail!("session.connect_attempts must be greater than 0");
        }
        if self.session.command_buffer == 0 {
            bail!("session.command_buffer must be greater than 0");
        }
        if self.resolver.timeout_secs == 0 {
            bail!("resolver.timeout_secs must be greater than 0");
        }
        Ok(())
    }
}

/// Loads `Config.toml`, or the file named by `BRIDGE_CONFIG`.
pub async fn load() -> Result<Config> {
    let path = std::env::var("BRIDGE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let text = read_to_string(&path)
        .await
        .with_context(|| format!("Could not read {path}"))?;

    let mut config = Config::from_toml(&text)?;
    apply_env_overrides(&mut config);

    Ok(config)
}

#[cfg(feature = "discord")]
fn apply_env_overrides(config: &mut Config) {
    if let (Some(discord), Ok(token)) = (config.discord.as_mut(), std::env::var("DISCORD_TOKEN")) {
        discord.discord_token = token;
    }
}

#[cfg(not(feature = "discord"))]
fn apply_env_overrides(_config: &mut Config) {}
