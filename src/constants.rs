use std::time::Duration;

/// Sample rate expected by the voice transport.
pub const SAMPLE_RATE: u32 = 48_000;

/// Stereo.
pub const CHANNELS: u16 = 2;

/// Signed 16-bit little-endian PCM.
pub const BYTES_PER_SAMPLE: usize = 2;

/// Length of one audio frame.
pub const FRAME_DURATION: Duration = Duration::from_millis(20);

/// Samples per channel in one 20 ms frame at 48 kHz.
pub const FRAME_SAMPLES: usize = (SAMPLE_RATE as usize / 1000) * 20;

/// Size in bytes of one frame as emitted by the transcoder.
pub const FRAME_BYTES: usize = FRAME_SAMPLES * CHANNELS as usize * BYTES_PER_SAMPLE;
