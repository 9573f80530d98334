//! Real-time frame pacing.
//!
//! Frames are due at `anchor + n * 20ms`, measured on the monotonic clock.
//! Deadlines are always derived from the anchor rather than from the time the
//! previous frame went out, so per-tick jitter never accumulates into drift.
//! The anchor only moves when playback is resumed, when the first frame of a
//! track arrives, or when delivery has fallen too far behind to catch up.

use crate::{
    config::SchedulerConfig,
    constants::FRAME_DURATION,
    error::{TranscodeError, TransportError},
    transcode::{FramePoll, TranscodeStage},
    transport::VoiceTransport,
};
use std::time::Duration;
use tokio::time::Instant;

/// What happened during one tick.
#[derive(Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// A frame or a frame of silence went out, keep going
    Continue,

    /// Audio came back after `silence_frames` of silence
    Recovered { silence_frames: u64 },

    /// The track ended after `frames` frames of audio
    Finished { frames: u64 },

    /// The track cannot continue
    Failed(TranscodeError),
}

#[derive(Debug)]
pub struct FrameScheduler {
    config: SchedulerConfig,
    anchor: Instant,

    /// Ticks already consumed before the current anchor
    anchor_tick: u64,
    ticks: u64,

    frames_sent: u64,

    /// Contiguous silence frames sent while the stage had nothing buffered
    underrun: u64,
    started_at: Instant,
    paused: bool,
}

impl FrameScheduler {
    pub fn new(config: SchedulerConfig, now: Instant) -> Self {
        FrameScheduler {
            config,
            anchor: now,
            anchor_tick: 0,
            ticks: 0,
            frames_sent: 0,
            underrun: 0,
            started_at: now,
            paused: false,
        }
    }

    /// When the next tick is due, or `None` while paused.
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.paused {
            return None;
        }

        let elapsed = self.ticks - self.anchor_tick;
        Some(self.anchor + FRAME_DURATION * elapsed as u32)
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Continues delivery with the next frame due at `now`.
    pub fn resume(&mut self, now: Instant) {
        if self.paused {
            self.paused = false;
            self.reanchor(now);
        }
    }

    /// Frames of actual audio delivered so far.
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Playback position of the track.
    pub fn position(&self) -> Duration {
        FRAME_DURATION * self.frames_sent as u32
    }

    fn reanchor(&mut self, now: Instant) {
        self.anchor = now;
        self.anchor_tick = self.ticks;
    }

    /// Delivers whatever is due at `now`. Only transport failures are
    /// returned as errors, everything that ends the track is a
    /// [TickOutcome].
    pub async fn tick(
        &mut self,
        stage: &mut TranscodeStage,
        transport: &mut dyn VoiceTransport,
        now: Instant,
    ) -> Result<TickOutcome, TransportError> {
        if let Some(deadline) = self.next_deadline() {
            let lateness = now.saturating_duration_since(deadline);
            if lateness > FRAME_DURATION * self.config.max_lateness_frames {
                warn!(
                    "Frame delivery fell {}ms behind schedule, re-anchoring",
                    lateness.as_millis()
                );
                self.reanchor(now);
            }
        }

        match stage.poll_frame() {
            FramePoll::Frame(frame) => {
                if self.frames_sent == 0 && self.ticks == 0 {
                    // The track's timeline starts with its first frame
                    self.reanchor(now);
                }

                transport.send(frame).await?;
                self.frames_sent += 1;
                self.ticks += 1;

                let silence_frames = std::mem::take(&mut self.underrun);
                if silence_frames > 0 {
                    Ok(TickOutcome::Recovered { silence_frames })
                } else {
                    Ok(TickOutcome::Continue)
                }
            }
            FramePoll::Pending if self.frames_sent == 0 => {
                // Still waiting for the transcoder to start up
                let waited = now.saturating_duration_since(self.started_at);
                if waited > self.config.startup_timeout() {
                    return Ok(TickOutcome::Failed(TranscodeError::UnderrunExceeded {
                        millis: waited.as_millis() as u64,
                    }));
                }
                self.anchor = now + FRAME_DURATION;
                Ok(TickOutcome::Continue)
            }
            FramePoll::Pending => {
                transport.send_silence().await?;
                self.underrun += 1;
                self.ticks += 1;

                let silent_for = FRAME_DURATION * self.underrun as u32;
                if silent_for > self.config.underrun_tolerance() {
                    Ok(TickOutcome::Failed(TranscodeError::UnderrunExceeded {
                        millis: silent_for.as_millis() as u64,
                    }))
                } else {
                    Ok(TickOutcome::Continue)
                }
            }
            FramePoll::Ended => Ok(TickOutcome::Finished {
                frames: self.frames_sent,
            }),
            FramePoll::Failed(e) => Ok(TickOutcome::Failed(e)),
        }
    }

    /// Sends the silence frames that mark the end of a transmission.
    pub async fn send_trailing_silence(
        &self,
        transport: &mut dyn VoiceTransport,
    ) -> Result<(), TransportError> {
        for _ in 0..self.config.trailing_silence_frames {
            transport.send_silence().await?;
        }
        Ok(())
    }
}
