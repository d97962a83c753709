//! Encoder pipeline: one worker thread per recording
//!
//! Samples reach the worker through one ordered channel. Queued video is
//! bounded and a frame offered to a full queue is dropped; audio is never
//! dropped for back-pressure, since its blocks are small and a missing one
//! would leave a hole in the track. The first video frame
//! the worker appends fixes the recording origin; every later timestamp is
//! rebased on it, and audio from before it never reaches the writer.
//! Finalize and cancel travel through the same channel, so they are ordered
//! after every sample already queued.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use serde::Serialize;

use super::writer::{MediaWriter, TrackLayout, WriterError, WriterFactory, WriterStats};
use crate::errors::CameraError;
use crate::types::{AudioSamples, VideoFrame};

/// Lifecycle of the writer behind a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WriterState {
    Idle,
    Writing,
    Finishing,
    Finalized,
    Failed,
}

/// Notifications from the worker to whoever owns the pipeline.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// A frame with non-zero recorded duration was appended.
    FirstFrameRecorded { recorded: Duration },
    Finalized(PipelineReport),
    Failed(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineCounters {
    pub video_written: u64,
    pub video_dropped: u64,
    pub audio_written: u64,
    pub audio_dropped: u64,
}

/// What a finalized recording contains.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineReport {
    pub output: PathBuf,
    pub writer: WriterStats,
    pub counters: PipelineCounters,
}

/// Timestamp bookkeeping for one recording.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OriginGate {
    origin: Option<Duration>,
    last_video: Option<Duration>,
}

impl OriginGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn origin(&self) -> Option<Duration> {
        self.origin
    }

    /// Recorded time for a video frame stamped `timestamp`, or `None` if it
    /// would not advance the track.
    pub fn video_pts(&self, timestamp: Duration) -> Option<Duration> {
        let Some(origin) = self.origin else {
            return Some(Duration::ZERO);
        };
        let pts = timestamp.checked_sub(origin)?;
        match self.last_video {
            Some(last) if pts <= last => None,
            _ => Some(pts),
        }
    }

    /// Note that the frame stamped `timestamp` was appended.
    pub fn commit_video(&mut self, timestamp: Duration) {
        let origin = *self.origin.get_or_insert(timestamp);
        self.last_video = Some(timestamp.saturating_sub(origin));
    }

    /// Audio with anything before the origin cut off, plus its recorded time.
    /// `None` before the origin is known or when nothing is left.
    pub fn admit_audio(&self, mut block: AudioSamples) -> Option<(AudioSamples, Duration)> {
        let origin = self.origin?;
        if block.timestamp >= origin {
            let pts = block.timestamp - origin;
            return Some((block, pts));
        }

        let channels = block.channels.max(1) as usize;
        let rate = block.sample_rate as u128;
        if rate == 0 {
            return None;
        }
        let lead_ns = (origin - block.timestamp).as_nanos();
        let skip_frames = (lead_ns * rate).div_ceil(1_000_000_000) as usize;
        let skip = skip_frames.saturating_mul(channels);
        if skip >= block.samples.len() {
            return None;
        }

        block.samples.drain(..skip);
        let skipped = Duration::from_nanos((skip_frames as u128 * 1_000_000_000 / rate) as u64);
        block.timestamp += skipped;
        let pts = block.timestamp.saturating_sub(origin);
        Some((block, pts))
    }
}

struct Shared {
    state: Mutex<WriterState>,
    origin: Mutex<Option<Duration>>,
    video_capacity: usize,
    queued_video: AtomicUsize,
    video_written: AtomicU64,
    video_dropped: AtomicU64,
    audio_written: AtomicU64,
    audio_dropped: AtomicU64,
}

impl Shared {
    fn new(video_capacity: usize) -> Self {
        Self {
            state: Mutex::new(WriterState::Idle),
            origin: Mutex::new(None),
            video_capacity: video_capacity.max(1),
            queued_video: AtomicUsize::new(0),
            video_written: AtomicU64::new(0),
            video_dropped: AtomicU64::new(0),
            audio_written: AtomicU64::new(0),
            audio_dropped: AtomicU64::new(0),
        }
    }

    fn state(&self) -> WriterState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: WriterState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    fn counters(&self) -> PipelineCounters {
        PipelineCounters {
            video_written: self.video_written.load(Ordering::Relaxed),
            video_dropped: self.video_dropped.load(Ordering::Relaxed),
            audio_written: self.audio_written.load(Ordering::Relaxed),
            audio_dropped: self.audio_dropped.load(Ordering::Relaxed),
        }
    }
}

enum Message {
    Video(VideoFrame),
    Audio(AudioSamples),
    Finalize,
    Cancel,
}

/// Producer-side handle. Offers never block; video offered to a full queue
/// is dropped.
#[derive(Clone)]
pub struct EncoderInput {
    tx: Sender<Message>,
    shared: Arc<Shared>,
}

impl EncoderInput {
    pub fn is_accepting(&self) -> bool {
        self.shared.state() == WriterState::Writing
    }

    pub fn offer_video(&self, frame: VideoFrame) -> bool {
        if !self.is_accepting() {
            return false;
        }
        let shared = &self.shared;
        if shared.queued_video.fetch_add(1, Ordering::AcqRel) >= shared.video_capacity {
            shared.queued_video.fetch_sub(1, Ordering::AcqRel);
            shared.video_dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        if self.tx.send(Message::Video(frame)).is_err() {
            shared.queued_video.fetch_sub(1, Ordering::AcqRel);
            shared.video_dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        true
    }

    pub fn offer_audio(&self, samples: AudioSamples) -> bool {
        if !self.is_accepting() {
            return false;
        }
        if self.tx.send(Message::Audio(samples)).is_err() {
            self.shared.audio_dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        true
    }

    /// Video frames waiting for the worker.
    pub fn queued_video(&self) -> usize {
        self.shared.queued_video.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for EncoderInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncoderInput")
            .field("state", &self.shared.state())
            .finish()
    }
}

/// A running encoder for one output file.
pub struct EncoderPipeline {
    input: EncoderInput,
    events: Receiver<PipelineEvent>,
    worker: Option<JoinHandle<()>>,
    output: PathBuf,
    layout: TrackLayout,
}

impl EncoderPipeline {
    /// Create the writer on a fresh worker thread and wait until it is ready.
    ///
    /// `capacity` bounds the number of queued video frames.
    pub fn start(
        factory: Arc<dyn WriterFactory>,
        output: &Path,
        layout: TrackLayout,
        capacity: usize,
    ) -> Result<Self, CameraError> {
        let (tx, rx) = unbounded();
        let (events_tx, events_rx) = unbounded();
        let (ready_tx, ready_rx) = bounded::<Result<(), WriterError>>(1);
        let shared = Arc::new(Shared::new(capacity));

        let worker_shared = Arc::clone(&shared);
        let target = output.to_path_buf();
        let worker = std::thread::Builder::new()
            .name("reelcam-encoder".to_string())
            .spawn(move || {
                let writer = match factory.create(&target, layout) {
                    Ok(writer) => writer,
                    Err(e) => {
                        worker_shared.set_state(WriterState::Failed);
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                worker_shared.set_state(WriterState::Writing);
                let _ = ready_tx.send(Ok(()));
                run(writer, target, rx, events_tx, worker_shared);
            })
            .map_err(|e| CameraError::WriterInitFailed(format!("spawn failed: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                log::info!(
                    "Encoder ready: {} at {}",
                    output.display(),
                    layout.video.size
                );
                Ok(Self {
                    input: EncoderInput { tx, shared },
                    events: events_rx,
                    worker: Some(worker),
                    output: output.to_path_buf(),
                    layout,
                })
            }
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(CameraError::WriterInitFailed(e.to_string()))
            }
            Err(_) => {
                let _ = worker.join();
                Err(CameraError::WriterInitFailed(
                    "encoder thread exited during setup".to_string(),
                ))
            }
        }
    }

    pub fn input(&self) -> EncoderInput {
        self.input.clone()
    }

    pub fn state(&self) -> WriterState {
        self.input.shared.state()
    }

    pub fn origin(&self) -> Option<Duration> {
        *self
            .input
            .shared
            .origin
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    pub fn counters(&self) -> PipelineCounters {
        self.input.shared.counters()
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn layout(&self) -> &TrackLayout {
        &self.layout
    }

    /// Block until a frame with non-zero recorded duration is appended.
    pub fn wait_first_frame(&self, timeout: Duration) -> Result<Duration, CameraError> {
        let deadline = Instant::now() + timeout;
        match self.events.recv_deadline(deadline) {
            Ok(PipelineEvent::FirstFrameRecorded { recorded }) => Ok(recorded),
            Ok(PipelineEvent::Failed(msg)) => Err(CameraError::WriterInitFailed(msg)),
            Ok(PipelineEvent::Finalized(_)) => Err(CameraError::WriterInitFailed(
                "writer closed before recording started".to_string(),
            )),
            Err(RecvTimeoutError::Timeout) => Err(CameraError::WriterInitFailed(format!(
                "no frames recorded within {} ms",
                timeout.as_millis()
            ))),
            Err(RecvTimeoutError::Disconnected) => Err(CameraError::WriterInitFailed(
                "encoder stopped unexpectedly".to_string(),
            )),
        }
    }

    /// Stop accepting samples, drain the queue and close the container.
    pub fn finalize(mut self) -> Result<PipelineReport, CameraError> {
        if self.state() == WriterState::Writing {
            self.input.shared.set_state(WriterState::Finishing);
        }
        if self.input.tx.send(Message::Finalize).is_err() {
            self.join_worker();
            return Err(CameraError::WriterFinalizeFailed(
                "encoder thread is gone".to_string(),
            ));
        }

        let outcome = loop {
            match self.events.recv() {
                Ok(PipelineEvent::FirstFrameRecorded { .. }) => continue,
                Ok(PipelineEvent::Finalized(report)) => break Ok(report),
                Ok(PipelineEvent::Failed(msg)) => break Err(CameraError::WriterFinalizeFailed(msg)),
                Err(_) => {
                    break Err(CameraError::WriterFinalizeFailed(
                        "encoder stopped without finalizing".to_string(),
                    ))
                }
            }
        };
        self.join_worker();
        outcome
    }

    /// Abort the recording and delete partial output.
    pub fn cancel(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.worker.is_none() {
            return;
        }
        self.input.shared.set_state(WriterState::Failed);
        let _ = self.input.tx.send(Message::Cancel);
        self.join_worker();
        log::info!("Recording to {} cancelled", self.output.display());
    }

    fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Encoder thread panicked");
                self.input.shared.set_state(WriterState::Failed);
            }
        }
    }
}

impl Drop for EncoderPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(
    writer: Box<dyn MediaWriter>,
    output: PathBuf,
    rx: Receiver<Message>,
    events: Sender<PipelineEvent>,
    shared: Arc<Shared>,
) {
    let mut writer = Some(writer);
    let mut gate = OriginGate::new();
    let mut announced = false;
    let mut failure: Option<String> = None;

    while let Ok(message) = rx.recv() {
        match message {
            Message::Video(frame) => {
                shared.queued_video.fetch_sub(1, Ordering::AcqRel);
                let Some(active) = writer.as_mut() else {
                    continue;
                };
                let Some(pts) = gate.video_pts(frame.timestamp) else {
                    shared.video_dropped.fetch_add(1, Ordering::Relaxed);
                    continue;
                };
                match active.write_video(&frame, pts) {
                    Ok(()) => {
                        if gate.origin().is_none() {
                            *shared.origin.lock().unwrap_or_else(|e| e.into_inner()) =
                                Some(frame.timestamp);
                            log::debug!("Recording origin at {:?}", frame.timestamp);
                        }
                        gate.commit_video(frame.timestamp);
                        shared.video_written.fetch_add(1, Ordering::Relaxed);
                        if !announced && pts > Duration::ZERO {
                            announced = true;
                            let _ = events.send(PipelineEvent::FirstFrameRecorded { recorded: pts });
                        }
                    }
                    Err(WriterError::Rejected(msg)) => {
                        log::warn!("Video frame {} rejected: {}", frame.sequence, msg);
                        shared.video_dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        fail(&mut writer, &mut failure, &shared, &events, e);
                    }
                }
            }
            Message::Audio(samples) => {
                let Some(active) = writer.as_mut() else {
                    continue;
                };
                let Some((block, pts)) = gate.admit_audio(samples) else {
                    shared.audio_dropped.fetch_add(1, Ordering::Relaxed);
                    continue;
                };
                match active.write_audio(&block, pts) {
                    Ok(()) => {
                        shared.audio_written.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(WriterError::Rejected(msg)) => {
                        log::debug!("Audio block rejected: {}", msg);
                        shared.audio_dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        fail(&mut writer, &mut failure, &shared, &events, e);
                    }
                }
            }
            Message::Finalize => {
                let event = match (writer.take(), failure.take()) {
                    (Some(active), None) => match active.finish() {
                        Ok(stats) => {
                            shared.set_state(WriterState::Finalized);
                            log::info!(
                                "Finalized {}: {} video frames, {} audio frames, {} bytes",
                                output.display(),
                                stats.video_frames,
                                stats.audio_frames,
                                stats.bytes_written
                            );
                            PipelineEvent::Finalized(PipelineReport {
                                output: output.clone(),
                                writer: stats,
                                counters: shared.counters(),
                            })
                        }
                        Err(e) => {
                            shared.set_state(WriterState::Failed);
                            log::error!("Failed to finalize {}: {}", output.display(), e);
                            PipelineEvent::Failed(e.to_string())
                        }
                    },
                    (_, Some(msg)) => PipelineEvent::Failed(msg),
                    (None, None) => PipelineEvent::Failed("writer already closed".to_string()),
                };
                let _ = events.send(event);
                return;
            }
            Message::Cancel => {
                if let Some(active) = writer.take() {
                    active.abort();
                }
                shared.set_state(WriterState::Failed);
                return;
            }
        }
    }

    if let Some(active) = writer.take() {
        active.abort();
    }
}

fn fail(
    writer: &mut Option<Box<dyn MediaWriter>>,
    failure: &mut Option<String>,
    shared: &Shared,
    events: &Sender<PipelineEvent>,
    error: WriterError,
) {
    log::error!("Writer failed: {}", error);
    shared.set_state(WriterState::Failed);
    if let Some(active) = writer.take() {
        active.abort();
    }
    let msg = error.to_string();
    *failure = Some(msg.clone());
    let _ = events.send(PipelineEvent::Failed(msg));
}
