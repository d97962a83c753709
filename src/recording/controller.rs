use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::timer::AutoStopTimer;
use crate::encoder::{EncoderPipeline, PipelineReport, TrackLayout, WriterFactory};
use crate::errors::CameraError;
use crate::router::FrameRouter;
use crate::types::Resolution;

/// Called with the session id when a recording's maximum duration elapses.
pub type AutoStopHook = Arc<dyn Fn(Uuid) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecorderPhase {
    Idle,
    Starting,
    Recording,
    Stopping,
}

/// Everything needed to begin one recording.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub id: Uuid,
    pub output: PathBuf,
    pub layout: TrackLayout,
    pub max_duration: Option<Duration>,
    pub queue_capacity: usize,
    pub start_timeout: Duration,
}

/// A recording in progress.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSession {
    pub id: Uuid,
    pub output: PathBuf,
    pub started_at: DateTime<Utc>,
    pub size: Resolution,
    pub max_duration_ms: Option<u64>,
}

/// What the host receives when a recording ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingResult {
    pub file_path: String,
    pub duration_ms: u64,
    pub width: u32,
    pub height: u32,
}

/// Container and pipeline totals for the last finished recording.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingStats {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub video_frames: u64,
    pub audio_frames: u64,
    pub video_dropped: u64,
    pub audio_dropped: u64,
    pub bytes_written: u64,
    pub container_duration_secs: f64,
}

struct ActiveRecording {
    session: RecordingSession,
    pipeline: EncoderPipeline,
    timer: Option<AutoStopTimer>,
    started: Instant,
}

/// Recording state machine: Idle -> Starting -> Recording -> Stopping -> Idle.
pub struct RecordingController {
    phase: Mutex<RecorderPhase>,
    active: Mutex<Option<ActiveRecording>>,
    last_stats: Mutex<Option<RecordingStats>>,
    auto_stop: Mutex<Option<AutoStopHook>>,
}

impl RecordingController {
    pub fn new() -> Self {
        Self {
            phase: Mutex::new(RecorderPhase::Idle),
            active: Mutex::new(None),
            last_stats: Mutex::new(None),
            auto_stop: Mutex::new(None),
        }
    }

    pub fn set_auto_stop_hook(&self, hook: AutoStopHook) {
        *lock(&self.auto_stop) = Some(hook);
    }

    pub fn phase(&self) -> RecorderPhase {
        *lock(&self.phase)
    }

    /// True once a recording has truly started, until its stop completes.
    pub fn is_recording(&self) -> bool {
        matches!(
            self.phase(),
            RecorderPhase::Recording | RecorderPhase::Stopping
        )
    }

    pub fn active_session(&self) -> Option<RecordingSession> {
        lock(&self.active).as_ref().map(|a| a.session.clone())
    }

    pub fn active_session_id(&self) -> Option<Uuid> {
        lock(&self.active).as_ref().map(|a| a.session.id)
    }

    pub fn last_stats(&self) -> Option<RecordingStats> {
        lock(&self.last_stats).clone()
    }

    /// Attach a new pipeline to `router` and wait for the first recorded
    /// frame. Any failure leaves the controller idle.
    pub fn start(
        &self,
        factory: Arc<dyn WriterFactory>,
        router: &FrameRouter,
        request: StartRequest,
    ) -> Result<RecordingSession, CameraError> {
        {
            let mut phase = lock(&self.phase);
            if *phase != RecorderPhase::Idle {
                return Err(CameraError::already_recording());
            }
            *phase = RecorderPhase::Starting;
        }

        match self.begin(factory, router, &request) {
            Ok(active) => {
                let session = active.session.clone();
                *lock(&self.active) = Some(active);
                *lock(&self.phase) = RecorderPhase::Recording;
                log::info!(
                    "Recording {} started: {} at {}",
                    session.id,
                    session.output.display(),
                    session.size
                );
                Ok(session)
            }
            Err(e) => {
                *lock(&self.phase) = RecorderPhase::Idle;
                log::warn!("Recording failed to start: {}", e);
                Err(e)
            }
        }
    }

    fn begin(
        &self,
        factory: Arc<dyn WriterFactory>,
        router: &FrameRouter,
        request: &StartRequest,
    ) -> Result<ActiveRecording, CameraError> {
        let pipeline = EncoderPipeline::start(
            factory,
            &request.output,
            request.layout,
            request.queue_capacity,
        )?;
        router.attach_encoder(pipeline.input());

        if let Err(e) = pipeline.wait_first_frame(request.start_timeout) {
            router.detach_encoder();
            pipeline.cancel();
            return Err(e);
        }
        let started = Instant::now();

        let timer = match request.max_duration {
            Some(limit) => match self.arm_timer(request.id, limit) {
                Ok(timer) => timer,
                Err(e) => {
                    router.detach_encoder();
                    pipeline.cancel();
                    return Err(e);
                }
            },
            None => None,
        };

        Ok(ActiveRecording {
            session: RecordingSession {
                id: request.id,
                output: request.output.clone(),
                started_at: Utc::now(),
                size: request.layout.video.size,
                max_duration_ms: request.max_duration.map(|d| d.as_millis() as u64),
            },
            pipeline,
            timer,
            started,
        })
    }

    fn arm_timer(&self, id: Uuid, limit: Duration) -> Result<Option<AutoStopTimer>, CameraError> {
        let Some(hook) = lock(&self.auto_stop).clone() else {
            log::warn!("No auto-stop handler installed; ignoring maximum duration");
            return Ok(None);
        };
        AutoStopTimer::arm(limit, move || hook(id)).map(Some)
    }

    /// Finalize the active recording.
    pub fn stop(&self, router: &FrameRouter) -> Result<RecordingResult, CameraError> {
        {
            let mut phase = lock(&self.phase);
            if *phase != RecorderPhase::Recording {
                return Err(CameraError::not_recording());
            }
            *phase = RecorderPhase::Stopping;
        }

        let Some(active) = lock(&self.active).take() else {
            *lock(&self.phase) = RecorderPhase::Idle;
            return Err(CameraError::not_recording());
        };

        if let Some(timer) = active.timer {
            timer.cancel();
        }
        router.detach_encoder();
        let elapsed = active.started.elapsed();
        let session = active.session;

        let outcome = active.pipeline.finalize();
        *lock(&self.phase) = RecorderPhase::Idle;

        let report = outcome.map_err(|e| {
            log::error!("Recording {} failed to finalize: {}", session.id, e);
            e
        })?;
        *lock(&self.last_stats) = Some(stats_for(&session, &report));

        log::info!(
            "Recording {} stopped after {} ms ({} video frames)",
            session.id,
            elapsed.as_millis(),
            report.writer.video_frames
        );
        Ok(RecordingResult {
            file_path: report.output.to_string_lossy().into_owned(),
            duration_ms: elapsed.as_millis() as u64,
            width: report.writer.width,
            height: report.writer.height,
        })
    }

    /// Abandon the active recording and delete its partial file.
    pub fn cancel(&self, router: &FrameRouter) {
        router.detach_encoder();
        let taken = lock(&self.active).take();
        if let Some(active) = taken {
            if let Some(timer) = active.timer {
                timer.cancel();
            }
            log::info!("Cancelling recording {}", active.session.id);
            active.pipeline.cancel();
        }
        *lock(&self.phase) = RecorderPhase::Idle;
    }
}

impl Default for RecordingController {
    fn default() -> Self {
        Self::new()
    }
}

fn stats_for(session: &RecordingSession, report: &PipelineReport) -> RecordingStats {
    RecordingStats {
        session_id: session.id,
        started_at: session.started_at,
        video_frames: report.writer.video_frames,
        audio_frames: report.writer.audio_frames,
        video_dropped: report.counters.video_dropped,
        audio_dropped: report.counters.audio_dropped,
        bytes_written: report.writer.bytes_written,
        container_duration_secs: report.writer.duration_secs,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
