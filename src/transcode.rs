//! Transcoder process management.
//!
//! A [TranscodeStage] owns one transcoder process for one track. The process
//! reads the resolved stream and writes raw 48 kHz stereo s16le PCM to stdout,
//! which is cut into fixed-size [Frame]s and pushed into a bounded channel.
//! When the channel is full the reader stops reading, so the process blocks on
//! its stdout pipe instead of frames being buffered without bound or dropped.

use crate::{
    config::TranscoderConfig,
    constants::FRAME_BYTES,
    error::TranscodeError,
    track::ResolvedSource,
};
use bytes::Bytes;
use std::{collections::VecDeque, process::Stdio, time::Duration};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader},
    process::{Child, ChildStderr, ChildStdout, Command},
    sync::mpsc::{self, error::TryRecvError},
    task::JoinHandle,
    time::timeout,
};
use tokio_util::sync::CancellationToken;

/// How long shutdown waits for the worker to kill and reap the process.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Number of stderr lines kept for error reports.
const STDERR_TAIL_LINES: usize = 10;

/// 20 ms of encoded audio.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Position within the track, starting at 0
    pub seq: u64,
    pub payload: Bytes,
}

pub type FrameSender = mpsc::Sender<Result<Frame, TranscodeError>>;

/// Result of asking the stream for a frame without waiting.
#[derive(Debug, PartialEq, Eq)]
pub enum FramePoll {
    Frame(Frame),

    /// Nothing buffered right now, the producer is still running
    Pending,

    /// Producer finished cleanly and every frame has been taken
    Ended,

    Failed(TranscodeError),
}

/// Consumer side of a stage's bounded frame buffer.
pub struct FrameStream {
    rx: mpsc::Receiver<Result<Frame, TranscodeError>>,
    done: bool,
}

impl FrameStream {
    /// Creates a bounded frame buffer holding at most `capacity` frames.
    pub fn channel(capacity: usize) -> (FrameSender, FrameStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, FrameStream { rx, done: false })
    }

    pub fn poll_frame(&mut self) -> FramePoll {
        if self.done {
            return FramePoll::Ended;
        }

        match self.rx.try_recv() {
            Ok(Ok(frame)) => FramePoll::Frame(frame),
            Ok(Err(e)) => {
                self.done = true;
                FramePoll::Failed(e)
            }
            Err(TryRecvError::Empty) => FramePoll::Pending,
            Err(TryRecvError::Disconnected) => {
                self.done = true;
                FramePoll::Ended
            }
        }
    }
}

/// The frames of one track plus whatever produces them.
///
/// Dropping the stage cancels the producer. [TranscodeStage::shutdown] also
/// waits until the transcoder process has been killed and reaped, and is what
/// every exit path of a session goes through.
pub struct TranscodeStage {
    frames: FrameStream,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
    pid: Option<u32>,
}

impl TranscodeStage {
    /// Wraps an arbitrary frame producer. `worker` must stop producing and
    /// release its resources once `cancel` fires.
    pub fn new(frames: FrameStream, cancel: CancellationToken, worker: JoinHandle<()>) -> Self {
        TranscodeStage {
            frames,
            cancel,
            worker: Some(worker),
            pid: None,
        }
    }

    /// OS process id of the transcoder, if the stage runs one.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn poll_frame(&mut self) -> FramePoll {
        self.frames.poll_frame()
    }

    pub async fn shutdown(mut self) {
        self.cancel.cancel();

        if let Some(mut worker) = self.worker.take() {
            if timeout(SHUTDOWN_TIMEOUT, &mut worker).await.is_err() {
                warn!("Transcoder worker did not stop in time, aborting it");
                worker.abort();
            }
        }
    }
}

impl Drop for TranscodeStage {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Starts the frame producer for a resolved source.
pub trait Transcoder: Send + Sync {
    fn start(&self, source: &ResolvedSource) -> Result<TranscodeStage, TranscodeError>;
}

/// Runs the configured transcoder binary, `ffmpeg` by default.
pub struct ProcessTranscoder {
    config: TranscoderConfig,
}

impl ProcessTranscoder {
    pub fn new(config: TranscoderConfig) -> Self {
        ProcessTranscoder { config }
    }

    /// Command line for `source`, without the program name.
    pub fn args_for(&self, source: &ResolvedSource) -> Vec<String> {
        let input = source.handle.as_input();
        let remote_args = if source.handle.is_remote() {
            self.config.remote_input_args.as_slice()
        } else {
            &[]
        };

        remote_args
            .iter()
            .cloned()
            .chain(
                self.config
                    .args
                    .iter()
                    .map(|arg| arg.replace("{input}", &input)),
            )
            .collect()
    }
}

impl Transcoder for ProcessTranscoder {
    fn start(&self, source: &ResolvedSource) -> Result<TranscodeStage, TranscodeError> {
        let args = self.args_for(source);
        debug!("Spawning transcoder: {} {:?}", self.config.program, args);

        let mut child = Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TranscodeError::Spawn {
                reason: format!("{}: {e}", self.config.program),
            })?;

        let stdout = child.stdout.take().ok_or_else(|| TranscodeError::Spawn {
            reason: "transcoder stdout not captured".to_string(),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| TranscodeError::Spawn {
            reason: "transcoder stderr not captured".to_string(),
        })?;

        let pid = child.id();
        let (tx, frames) = FrameStream::channel(self.config.buffer_frames);
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(run_process(child, stdout, stderr, tx, cancel.clone()));

        let mut stage = TranscodeStage::new(frames, cancel, worker);
        stage.pid = pid;
        Ok(stage)
    }
}

enum ReadOutcome {
    /// Output closed on a frame boundary
    EndOfStream,

    /// Output closed with a partial frame pending
    Truncated { bytes: usize },

    /// Nobody takes frames anymore
    ConsumerGone,
}

async fn run_process(
    mut child: Child,
    stdout: ChildStdout,
    stderr: ChildStderr,
    tx: FrameSender,
    cancel: CancellationToken,
) {
    let stderr_tail = tokio::spawn(collect_stderr(stderr));

    let outcome = tokio::select! {
        outcome = read_frames(stdout, &tx) => outcome,
        _ = cancel.cancelled() => Ok(ReadOutcome::ConsumerGone),
    };

    let outcome = match outcome {
        Ok(ReadOutcome::ConsumerGone) => {
            kill_and_reap(&mut child).await;
            stderr_tail.abort();
            return;
        }
        other => other,
    };

    let status = tokio::select! {
        status = child.wait() => status,
        _ = cancel.cancelled() => {
            kill_and_reap(&mut child).await;
            stderr_tail.abort();
            return;
        }
    };
    let stderr = stderr_tail.await.unwrap_or_default();

    let error = match (status, outcome) {
        (Err(e), _) => Some(TranscodeError::ProcessFailure {
            code: None,
            stderr: format!("failed to wait for transcoder: {e}"),
        }),
        (Ok(status), _) if !status.success() => Some(TranscodeError::ProcessFailure {
            code: status.code(),
            stderr,
        }),
        (Ok(_), Err(e)) => Some(e),
        (Ok(_), Ok(ReadOutcome::Truncated { bytes })) => Some(TranscodeError::MalformedOutput {
            reason: format!("output ended mid-frame ({bytes} of {FRAME_BYTES} bytes)"),
        }),
        (Ok(_), Ok(_)) => None,
    };

    if let Some(error) = error {
        debug!("Transcoder failed: {error}");
        // Fails only if the consumer is gone, which is fine
        let _ = tx.send(Err(error)).await;
    }
}

async fn read_frames<R>(mut reader: R, tx: &FrameSender) -> Result<ReadOutcome, TranscodeError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; FRAME_BYTES];
    let mut seq = 0;

    loop {
        let mut filled = 0;
        while filled < FRAME_BYTES {
            let n = reader
                .read(&mut buf[filled..])
                .await
                .map_err(|e| TranscodeError::MalformedOutput {
                    reason: format!("error reading transcoder output: {e}"),
                })?;

            if n == 0 {
                return Ok(if filled == 0 {
                    ReadOutcome::EndOfStream
                } else {
                    ReadOutcome::Truncated { bytes: filled }
                });
            }
            filled += n;
        }

        let frame = Frame {
            seq,
            payload: Bytes::copy_from_slice(&buf),
        };
        if tx.send(Ok(frame)).await.is_err() {
            return Ok(ReadOutcome::ConsumerGone);
        }
        seq += 1;
    }
}

async fn collect_stderr(stderr: ChildStderr) -> String {
    let mut lines = BufReader::new(stderr).lines();
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);

    while let Ok(Some(line)) = lines.next_line().await {
        debug!("transcoder stderr: {}", line);
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    Vec::from(tail).join("\n")
}

async fn kill_and_reap(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        debug!("Error killing transcoder: {:?}", e);
    }
    if let Err(e) = child.wait().await {
        debug!("Error awaiting transcoder: {:?}", e);
    }
}
