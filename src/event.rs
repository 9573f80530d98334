use crate::{
    connection::ConnectionState,
    error::{TrackError, TransportError},
    id::{ChannelId, GuildId},
    track::Track,
};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::broadcast::{self, Receiver, Sender};

#[derive(Clone)]
pub struct EventBus {
    tx: Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel::<Event>(256);
        Self { tx }
    }

    pub fn send(&self, event: Event) {
        // Nobody listening is not an error, sessions run fine without observers
        if self.tx.send(event).is_err() {
            trace!("EventBus has no subscribers, event dropped");
        }
    }

    pub fn subscribe(&self) -> Subscriber {
        Subscriber::new(self.tx.subscribe())
    }
}

pub struct Subscriber {
    rx: Receiver<Event>,
}

impl Subscriber {
    pub fn new(rx: Receiver<Event>) -> Self {
        Self { rx }
    }

    pub fn try_recv(&mut self) -> Result<Event, TryRecvError> {
        self.rx.try_recv()
    }

    /// Waits for the next event. Returns `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.rx.recv().await {
                Ok(event) => break Some(event),
                Err(RecvError::Closed) => break None,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        "EventBus::Subscriber lagging behind senders, skipping {skipped} messages"
                    );
                }
            }
        }
    }
}

#[derive(Clone, Debug)]
pub enum ConnectionEvent {
    /// The session moved between connection states
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },

    /// Voice handshake succeeded
    Joined { channel_id: ChannelId },

    /// The transport failed. The session is now disconnected.
    TransportFailed { error: TransportError },

    /// Left after `session.idle_timeout_secs` without playback
    IdleTimeout,
}

#[derive(Clone, Debug)]
pub enum PlaybackEvent {
    /// Track appended at 1-based `position` among the pending tracks
    Enqueued { track: Track, position: usize },

    /// Pending track removed by request
    Removed { track: Track },

    /// Pending tracks cleared by request
    Cleared { count: usize },

    /// Resolution succeeded and the first frame is about to be delivered
    TrackStarted { track: Track },

    /// Track played to its end
    TrackFinished { track: Track, frames: u64 },

    /// Track was skipped or stopped before its end
    TrackSkipped { track: Track },

    /// Track ended early because of an error
    TrackFailed { track: Track, error: TrackError },

    /// The transcoder fell behind and silence was sent in its place
    Underrun { track: Track, silence_frames: u64 },

    /// Nothing left to play
    QueueExhausted,

    /// Tracks thrown away because the connection was lost or left
    QueueDiscarded { count: usize },
}

#[derive(Clone, Debug)]
pub enum Event {
    Connection(GuildId, ConnectionEvent),
    Playback(GuildId, PlaybackEvent),
}

impl Event {
    pub fn guild_id(&self) -> GuildId {
        match self {
            Event::Connection(guild_id, _) | Event::Playback(guild_id, _) => *guild_id,
        }
    }
}

/// Logs every event on the bus.
pub fn debug(bus: &EventBus) {
    let bus = bus.clone();
    tokio::spawn(async move {
        let mut bus = bus.subscribe();
        while let Some(event) = bus.recv().await {
            if matches!(event, Event::Playback(_, PlaybackEvent::Underrun { .. })) {
                trace!("Received event: {:?}", event);
            } else {
                debug!("Received event: {:?}", event);
            }
        }
    });
}
