//! Newtypes for the Discord snowflakes used by the core.
//!
//! The core does not depend on serenity, so these mirror its ids as plain
//! `u64` wrappers with conversions available behind the `discord` feature.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};

/// ID of a Discord guild (server).
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord, Deserialize, Serialize)]
pub struct GuildId(pub u64);

/// ID of a Discord voice channel.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord, Deserialize, Serialize)]
pub struct ChannelId(pub u64);

/// Per-session sequence number handed out to enqueued tracks.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord, Deserialize, Serialize)]
pub struct TrackId(pub u64);

impl Display for GuildId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        Display::fmt(&self.0, f)
    }
}

impl Display for ChannelId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        Display::fmt(&self.0, f)
    }
}

impl Display for TrackId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for GuildId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<u64> for ChannelId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

#[cfg(feature = "discord")]
mod serenity_conversions {
    use super::*;
    use poise::serenity_prelude as serenity;

    impl From<serenity::GuildId> for GuildId {
        fn from(id: serenity::GuildId) -> Self {
            Self(id.get())
        }
    }

    impl From<GuildId> for serenity::GuildId {
        fn from(id: GuildId) -> Self {
            serenity::GuildId::new(id.0)
        }
    }

    impl From<serenity::ChannelId> for ChannelId {
        fn from(id: serenity::ChannelId) -> Self {
            Self(id.get())
        }
    }

    impl From<ChannelId> for serenity::ChannelId {
        fn from(id: ChannelId) -> Self {
            serenity::ChannelId::new(id.0)
        }
    }
}
