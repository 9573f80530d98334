//! Voice connection state machine of a guild session.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use thiserror::Error;

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum ConnectionState {
    /// No voice connection. Terminal state of a session lifetime, from which
    /// a new [ConnectionState::Connecting] cycle may begin.
    #[default]
    Disconnected,

    /// Voice handshake in progress.
    Connecting,

    /// Connected and idle, nothing is playing.
    Connected,

    /// A track is being resolved or its frames are being delivered.
    Playing,

    /// A track is loaded but frame delivery is suspended.
    Paused,
}

impl ConnectionState {
    /// Whether a live transport exists in this state.
    pub fn is_connected(self) -> bool {
        matches!(
            self,
            ConnectionState::Connected | ConnectionState::Playing | ConnectionState::Paused
        )
    }

    /// Whether a track is loaded (playing or paused).
    pub fn has_track(self) -> bool {
        matches!(self, ConnectionState::Playing | ConnectionState::Paused)
    }

    /// Returns the state reached by applying `trigger`, or an error when the
    /// trigger is not valid in this state.
    pub fn apply(self, trigger: ConnectionTrigger) -> Result<ConnectionState, InvalidTransition> {
        use ConnectionState::*;
        use ConnectionTrigger::*;

        let next = match (self, trigger) {
            (_, LeaveRequested) | (_, ConnectionLost) => Disconnected,
            (Disconnected, JoinRequested) => Connecting,
            (Connecting, HandshakeComplete) => Connected,
            (Connecting, HandshakeFailed) => Disconnected,
            (Connected, TrackAvailable) => Playing,
            (Playing, QueueExhausted) => Connected,
            (Playing, PauseRequested) => Paused,
            (Paused, ResumeRequested) => Playing,
            (Playing, PlaybackStopped) | (Paused, PlaybackStopped) => Connected,
            (state, trigger) => return Err(InvalidTransition { state, trigger }),
        };

        Ok(next)
    }
}

impl Display for ConnectionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected (idle)",
            ConnectionState::Playing => "playing",
            ConnectionState::Paused => "paused",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum ConnectionTrigger {
    JoinRequested,
    HandshakeComplete,
    HandshakeFailed,
    TrackAvailable,
    QueueExhausted,
    PauseRequested,
    ResumeRequested,
    /// Current track was stopped or skipped and nothing follows it yet
    PlaybackStopped,
    LeaveRequested,
    ConnectionLost,
}

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("cannot apply {trigger:?} while {state}")]
pub struct InvalidTransition {
    pub state: ConnectionState,
    pub trigger: ConnectionTrigger,
}
