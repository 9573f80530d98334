//! Error taxonomy of the relay pipeline.
//!
//! Every error here is `Clone` so it can be published on the [EventBus]
//! alongside the track it ended.
//!
//! [EventBus]: crate::event::EventBus

use crate::connection::InvalidTransition;
use thiserror::Error;

/// Reference could not be turned into a streamable source.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("nothing found for {reference}")]
    NotFound { reference: String },

    #[error("unsupported source: {reason}")]
    Unsupported { reason: String },

    #[error("source is restricted: {reason}")]
    Restricted { reason: String },

    #[error("network error while resolving: {reason}")]
    Network { reason: String },

    #[error("resolution timed out after {secs}s")]
    Timeout { secs: u64 },
}

impl ResolutionError {
    /// Whether retrying the same reference later might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ResolutionError::Network { .. } | ResolutionError::Timeout { .. }
        )
    }
}

/// Transcoder could not deliver the track's frames.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TranscodeError {
    #[error("failed to start transcoder: {reason}")]
    Spawn { reason: String },

    #[error("transcoder exited with {}: {stderr}", code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()))]
    ProcessFailure { code: Option<i32>, stderr: String },

    #[error("transcoder produced malformed output: {reason}")]
    MalformedOutput { reason: String },

    #[error("no audio for {millis}ms, giving up")]
    UnderrunExceeded { millis: u64 },
}

/// The voice connection failed. Always fatal for the session.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("voice handshake failed: {reason}")]
    HandshakeFailure { reason: String },

    #[error("voice connection lost: {reason}")]
    ConnectionLost { reason: String },
}

/// Anything that ends a single track early without taking the session down.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TrackError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Transcode(#[from] TranscodeError),
}

/// Replies to session commands.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("queue is full ({max} tracks)")]
    QueueFull { max: usize },

    #[error("no track at position {index}")]
    NoSuchPosition { index: usize },

    #[error("not connected to a voice channel")]
    NotConnected,

    #[error("nothing is playing")]
    NothingPlaying,

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("session task has shut down")]
    Closed,
}
