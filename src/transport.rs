//! Boundary to the voice connection.
//!
//! The wire protocol, encryption and UDP transport live behind
//! [VoiceTransport]. A session owns exactly one transport at a time and is the
//! only writer to it.

use crate::{
    error::TransportError,
    id::{ChannelId, GuildId},
    transcode::Frame,
};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Failures the transport notices on its own, outside of a call into it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    ConnectionLost { reason: String },
}

pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

#[async_trait]
pub trait VoiceTransport: Send {
    /// Joins `channel_id` and completes the voice handshake.
    async fn connect(&mut self, channel_id: ChannelId) -> Result<(), TransportError>;

    /// Hands one frame to the connection.
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Sends one frame worth of silence.
    async fn send_silence(&mut self) -> Result<(), TransportError>;

    /// Leaves the channel. Never fails, errors are only logged.
    async fn disconnect(&mut self);
}

/// Creates the transport of a new session. `events` must receive every
/// failure the transport observes asynchronously.
pub trait TransportFactory: Send + Sync {
    fn create(&self, guild_id: GuildId, events: TransportEventSender) -> Box<dyn VoiceTransport>;
}
