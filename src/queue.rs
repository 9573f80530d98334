//! Ordered playback queue of a single guild session.
//!
//! The queue itself is a plain data structure. Serialization of all access is
//! provided by the owning session task, see [crate::session].

use crate::{error::SessionError, id::TrackId, track::Track};
use serde::{Deserialize, Serialize};
use std::{collections::VecDeque, time::Duration};

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum RepeatMode {
    /// Each track is played once
    #[default]
    Off,

    /// The current track is played again when it finishes
    Track,

    /// Finished tracks are appended back to the end of the queue
    Queue,
}

#[derive(Debug)]
pub struct PlaybackQueue {
    pending: VecDeque<Track>,
    current: Option<Track>,
    repeat: RepeatMode,
    max_len: usize,
    next_id: u64,
}

impl PlaybackQueue {
    pub fn new(max_len: usize) -> Self {
        PlaybackQueue {
            pending: VecDeque::new(),
            current: None,
            repeat: RepeatMode::Off,
            max_len,
            next_id: 1,
        }
    }

    /// Appends a track, assigning it a fresh id. Returns the stored track and
    /// its 1-based position among the pending tracks.
    pub fn enqueue(&mut self, track: Track) -> Result<(Track, usize), SessionError> {
        if self.pending.len() >= self.max_len {
            return Err(SessionError::QueueFull { max: self.max_len });
        }

        let track = track.with_id(TrackId(self.next_id));
        self.next_id += 1;
        self.pending.push_back(track.clone());

        Ok((track, self.pending.len()))
    }

    /// Moves the next pending track into the current slot.
    pub fn advance(&mut self) -> Option<Track> {
        let next = self.pending.pop_front();
        self.current = next.clone();
        next
    }

    /// Takes the current track out after it finished playing, honoring the
    /// repeat mode. Returns the finished track.
    pub fn finish_current(&mut self) -> Option<Track> {
        let finished = self.current.take()?;

        if finished.looping && self.pending.is_empty() {
            self.pending.push_front(finished.clone());
            return Some(finished);
        }

        match self.repeat {
            RepeatMode::Off => {}
            RepeatMode::Track => self.pending.push_front(finished.clone()),
            RepeatMode::Queue => self.pending.push_back(finished.clone()),
        }

        Some(finished)
    }

    /// Drops the current track without repeating it.
    pub fn skip_current(&mut self) -> Option<Track> {
        self.current.take()
    }

    /// Removes every pending track. The current track is left alone.
    pub fn clear(&mut self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        count
    }

    /// Removes the pending track at `index` (0 = next up).
    pub fn remove_at(&mut self, index: usize) -> Result<Track, SessionError> {
        self.pending
            .remove(index)
            .ok_or(SessionError::NoSuchPosition { index })
    }

    /// Moves a pending track from one position to another.
    pub fn move_track(&mut self, from: usize, to: usize) -> Result<(), SessionError> {
        if from >= self.pending.len() {
            return Err(SessionError::NoSuchPosition { index: from });
        }
        if to >= self.pending.len() {
            return Err(SessionError::NoSuchPosition { index: to });
        }

        if from != to {
            if let Some(track) = self.pending.remove(from) {
                self.pending.insert(to, track);
            }
        }

        Ok(())
    }

    /// Replaces the current track's metadata once it has been resolved.
    pub fn update_current(&mut self, track: &Track) {
        if let Some(current) = self.current.as_mut() {
            if current.id == track.id {
                *current = track.clone();
            }
        }
    }

    pub fn set_repeat(&mut self, mode: RepeatMode) {
        self.repeat = mode;
    }

    pub fn repeat(&self) -> RepeatMode {
        self.repeat
    }

    pub fn current(&self) -> Option<&Track> {
        self.current.as_ref()
    }

    pub fn pending(&self) -> impl Iterator<Item = &Track> {
        self.pending.iter()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Known duration of everything still pending. Tracks with unknown
    /// duration are not counted.
    pub fn pending_duration(&self) -> Duration {
        self.pending.iter().filter_map(|track| track.duration).sum()
    }

    /// Empties the queue entirely, current track included. Used when the
    /// session loses its connection.
    pub fn discard_all(&mut self) -> usize {
        let count = self.pending.len() + usize::from(self.current.is_some());
        self.pending.clear();
        self.current = None;
        count
    }
}
