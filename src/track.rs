use crate::id::TrackId;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// A track request as it sits in the queue.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Track {
    pub id: TrackId,

    /// Whatever the requester typed: a URL, a local path or search terms
    pub reference: String,

    /// Falls back to the reference until the track has been resolved
    pub title: String,

    /// Unknown until resolved
    pub duration: Option<Duration>,

    pub requested_by: String,

    /// Replayed while nothing else is queued, and stopped as soon as
    /// something is
    #[serde(default)]
    pub looping: bool,
}

impl PartialEq for Track {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Track {
    /// Creates an unresolved track. The session assigns the real id on enqueue.
    pub fn new(reference: impl Into<String>, requested_by: impl Into<String>) -> Self {
        let reference = reference.into();
        Track {
            id: TrackId(0),
            title: reference.clone(),
            reference,
            duration: None,
            requested_by: requested_by.into(),
            looping: false,
        }
    }

    pub fn looping(mut self) -> Self {
        self.looping = true;
        self
    }

    pub fn with_id(mut self, id: TrackId) -> Self {
        self.id = id;
        self
    }

    /// `m:ss`, or `?:??` while the duration is unknown.
    pub fn duration_display(&self) -> String {
        match self.duration {
            Some(duration) => {
                let secs = duration.as_secs();
                format!("{}:{:02}", secs / 60, secs % 60)
            }
            None => "?:??".to_string(),
        }
    }
}

/// Where the transcoder reads the media from.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum StreamHandle {
    /// Remote stream, read over the network by the transcoder
    Url(String),

    /// Local media file
    File(PathBuf),
}

impl StreamHandle {
    pub fn is_remote(&self) -> bool {
        matches!(self, StreamHandle::Url(_))
    }

    /// The handle as passed on the transcoder's command line.
    pub fn as_input(&self) -> String {
        match self {
            StreamHandle::Url(url) => url.clone(),
            StreamHandle::File(path) => path.to_string_lossy().into_owned(),
        }
    }
}

/// Output of a successful extraction.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ResolvedSource {
    pub handle: StreamHandle,
    pub title: String,
    pub duration: Option<Duration>,
}

/// A queued track together with the source it resolved to.
#[derive(Clone, Debug)]
pub struct ResolvedTrack {
    pub track: Track,
    pub source: ResolvedSource,
}

impl ResolvedTrack {
    /// Fills the track's metadata from the resolved source. The track is not
    /// modified afterwards.
    pub fn new(mut track: Track, source: ResolvedSource) -> Self {
        track.title = source.title.clone();
        track.duration = source.duration;
        ResolvedTrack { track, source }
    }
}
