//! Command surface of the capture engine
//!
//! [`CameraEngine`] owns the device session, the frame router and the
//! recording controller. Commands run one at a time behind a command lock;
//! [`CameraEngine::get_state`] skips that lock and only takes the short
//! state locks, so it can be called from any thread at any moment.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use uuid::Uuid;

use crate::config::EngineConfig;
use crate::device::{AudioFormat, CameraBackend, CaptureRequest, DeviceSession, FrameSink};
use crate::encoder::{AudioTrack, TrackLayout, VideoTrack, WriterFactory};
use crate::errors::CameraError;
use crate::recording::{
    prepare_output, RecorderPhase, RecordingController, RecordingResult, RecordingSession,
    RecordingStats, StartRequest,
};
use crate::router::{FrameRouter, PreviewSink, RouterStats};
use crate::snapshot::CameraSnapshot;
use crate::types::{FlashMode, LensFacing, QualityPreset};

/// Receives the result of a recording stopped by its maximum duration.
pub type AutoStopObserver = Arc<dyn Fn(&RecordingResult) + Send + Sync>;

/// Builder for [`CameraEngine`].
pub struct EngineBuilder {
    backend: Option<Arc<dyn CameraBackend>>,
    writers: Option<Arc<dyn WriterFactory>>,
    config: EngineConfig,
    observer: Option<AutoStopObserver>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            backend: None,
            writers: None,
            config: EngineConfig::default(),
            observer: None,
        }
    }

    pub fn backend(mut self, backend: Arc<dyn CameraBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Replace the default MP4 writer.
    pub fn writer_factory(mut self, factory: Arc<dyn WriterFactory>) -> Self {
        self.writers = Some(factory);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn on_recording_auto_stopped<F>(mut self, observer: F) -> Self
    where
        F: Fn(&RecordingResult) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    pub fn build(self) -> Result<CameraEngine, CameraError> {
        self.config.validate()?;
        let backend = self.backend.ok_or_else(|| {
            CameraError::InvalidArgument("no camera backend configured".to_string())
        })?;
        let writers = self.writers.or_else(default_writers);

        let inner = Arc::new(EngineInner {
            backend,
            writers,
            config: self.config,
            commands: Mutex::new(()),
            session: Mutex::new(None),
            router: Arc::new(FrameRouter::new()),
            recorder: RecordingController::new(),
            observer: self.observer,
        });

        let weak: Weak<EngineInner> = Arc::downgrade(&inner);
        inner.recorder.set_auto_stop_hook(Arc::new(move |id| {
            if let Some(engine) = weak.upgrade() {
                engine.auto_stop(id);
            }
        }));

        log::debug!(
            "Camera engine ready (lenses: {:?})",
            inner.backend.available_lenses()
        );
        Ok(CameraEngine { inner })
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "recording")]
fn default_writers() -> Option<Arc<dyn WriterFactory>> {
    Some(Arc::new(crate::encoder::Mp4WriterFactory::new()))
}

#[cfg(not(feature = "recording"))]
fn default_writers() -> Option<Arc<dyn WriterFactory>> {
    None
}

/// The capture engine.
///
/// Dropping the engine releases the camera and cancels any recording.
pub struct CameraEngine {
    inner: Arc<EngineInner>,
}

impl CameraEngine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Acquire `lens` at `quality` and start preview.
    ///
    /// Calling this again re-initializes: a new preview sink is created and
    /// the device is reconfigured or replaced. Rejected while recording.
    pub fn initialize(
        &self,
        lens: LensFacing,
        quality: QualityPreset,
    ) -> Result<CameraSnapshot, CameraError> {
        self.inner.initialize(lens, quality)
    }

    /// Move to another lens, keeping the preview sink. Rejected while recording.
    pub fn switch_lens(&self, lens: LensFacing) -> Result<CameraSnapshot, CameraError> {
        self.inner.switch_lens(lens)
    }

    pub fn set_flash_mode(&self, mode: FlashMode) -> bool {
        self.inner.with_session(|s| s.set_flash_mode(mode))
    }

    pub fn set_focus_point(&self, x: f64, y: f64) -> bool {
        self.inner.with_session(|s| s.set_focus_point(x, y))
    }

    pub fn set_exposure_point(&self, x: f64, y: f64) -> bool {
        self.inner.with_session(|s| s.set_exposure_point(x, y))
    }

    /// Clamp `level` into the device's zoom range and apply it.
    pub fn set_zoom_level(&self, level: f64) -> bool {
        self.inner.with_session(|s| s.set_zoom(level))
    }

    /// Start recording; returns once the first frame is actually recorded.
    pub fn start_recording(
        &self,
        max_duration_ms: Option<u64>,
    ) -> Result<RecordingSession, CameraError> {
        self.inner.start_recording(max_duration_ms)
    }

    pub fn stop_recording(&self) -> Result<RecordingResult, CameraError> {
        self.inner.stop_recording()
    }

    pub fn pause_preview(&self) -> Result<(), CameraError> {
        self.inner.pause_preview()
    }

    pub fn resume_preview(&self) -> Result<CameraSnapshot, CameraError> {
        self.inner.resume_preview()
    }

    pub fn get_state(&self) -> CameraSnapshot {
        self.inner.snapshot()
    }

    /// Cancel any recording and give the camera back. Idempotent.
    pub fn release(&self) {
        self.inner.release()
    }

    pub fn preview_sink(&self) -> Option<Arc<PreviewSink>> {
        self.inner.router.preview()
    }

    pub fn recording_session(&self) -> Option<RecordingSession> {
        self.inner.recorder.active_session()
    }

    pub fn recorder_phase(&self) -> RecorderPhase {
        self.inner.recorder.phase()
    }

    pub fn last_recording_stats(&self) -> Option<RecordingStats> {
        self.inner.recorder.last_stats()
    }

    pub fn router_stats(&self) -> RouterStats {
        self.inner.router.stats()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }
}

impl Drop for CameraEngine {
    fn drop(&mut self) {
        self.inner.release();
    }
}

struct EngineInner {
    backend: Arc<dyn CameraBackend>,
    writers: Option<Arc<dyn WriterFactory>>,
    config: EngineConfig,
    commands: Mutex<()>,
    session: Mutex<Option<DeviceSession>>,
    router: Arc<FrameRouter>,
    recorder: RecordingController,
    observer: Option<AutoStopObserver>,
}

impl EngineInner {
    fn capture_request(&self, quality: QualityPreset) -> CaptureRequest {
        CaptureRequest {
            quality,
            frame_rate: self.config.capture.frame_rate,
            audio: AudioFormat {
                sample_rate: self.config.audio.sample_rate,
                channels: self.config.audio.channels,
            },
        }
    }

    fn sink(&self) -> Arc<dyn FrameSink> {
        Arc::clone(&self.router) as Arc<dyn FrameSink>
    }

    /// Acquire and start streaming a fresh device session.
    fn open_streaming(
        &self,
        lens: LensFacing,
        quality: QualityPreset,
    ) -> Result<DeviceSession, CameraError> {
        let mut fresh = DeviceSession::open(
            self.backend.as_ref(),
            lens,
            self.capture_request(quality),
            self.config.capture.max_zoom_cap,
        )?;
        if let Err(e) = fresh.start_stream(self.sink()) {
            fresh.release();
            return Err(e);
        }
        Ok(fresh)
    }

    fn initialize(
        &self,
        lens: LensFacing,
        quality: QualityPreset,
    ) -> Result<CameraSnapshot, CameraError> {
        let _cmd = lock(&self.commands);
        if self.recorder.phase() != RecorderPhase::Idle {
            return Err(CameraError::already_recording());
        }

        let same_lens = lock(&self.session).as_ref().map(|s| s.lens()) == Some(lens);
        if same_lens {
            let mut guard = lock(&self.session);
            if let Some(current) = guard.as_mut() {
                current.reconfigure(quality)?;
                if !current.is_streaming() {
                    current.start_stream(self.sink())?;
                }
            }
        } else {
            let fresh = self.open_streaming(lens, quality)?;
            let previous = lock(&self.session).replace(fresh);
            if let Some(old) = previous {
                old.release();
            }
        }

        self.router
            .set_preview(Some(Arc::new(PreviewSink::new())));
        self.router.set_paused(false);
        log::info!("Camera initialized: {} at {}", lens, quality);
        Ok(self.snapshot())
    }

    fn switch_lens(&self, lens: LensFacing) -> Result<CameraSnapshot, CameraError> {
        let _cmd = lock(&self.commands);
        let (current, quality) = lock(&self.session)
            .as_ref()
            .map(|s| (s.lens(), s.quality()))
            .ok_or_else(CameraError::not_initialized)?;
        if self.recorder.phase() != RecorderPhase::Idle {
            return Err(CameraError::already_recording());
        }
        if current == lens {
            return Ok(self.snapshot());
        }

        let fresh = self.open_streaming(lens, quality)?;
        let previous = lock(&self.session).replace(fresh);
        if let Some(old) = previous {
            old.release();
        }
        log::info!("Switched camera from {} to {}", current, lens);
        Ok(self.snapshot())
    }

    fn with_session(&self, f: impl FnOnce(&mut DeviceSession) -> bool) -> bool {
        let _cmd = lock(&self.commands);
        let mut guard = lock(&self.session);
        guard.as_mut().map_or(false, f)
    }

    fn start_recording(&self, max_duration_ms: Option<u64>) -> Result<RecordingSession, CameraError> {
        let _cmd = lock(&self.commands);
        if self.recorder.phase() != RecorderPhase::Idle {
            return Err(CameraError::already_recording());
        }
        let (size, frame_rate) = lock(&self.session)
            .as_ref()
            .map(|s| (s.recording_size(), s.frame_rate()))
            .ok_or_else(CameraError::not_initialized)?;
        let microphone = self.backend.microphone_permission();
        if !microphone.is_granted() {
            return Err(CameraError::PermissionDenied(format!(
                "microphone access is {microphone}"
            )));
        }
        if self.router.is_paused() {
            return Err(CameraError::InvalidArgument(
                "cannot start recording while preview is paused".to_string(),
            ));
        }
        if max_duration_ms == Some(0) {
            return Err(CameraError::InvalidArgument(
                "maxDurationMs must be positive".to_string(),
            ));
        }
        let factory = self.writers.clone().ok_or_else(|| {
            CameraError::WriterInitFailed("no media writer available in this build".to_string())
        })?;

        let id = Uuid::new_v4();
        let output = prepare_output(
            &self.config.output_directory(),
            &self.config.output.file_prefix,
            &id,
        )?;
        let layout = TrackLayout {
            video: VideoTrack {
                size,
                frame_rate,
                bitrate: self.config.video.bitrate,
                keyframe_interval_secs: self.config.video.keyframe_interval_secs,
            },
            audio: Some(AudioTrack {
                sample_rate: self.config.audio.sample_rate,
                channels: self.config.audio.channels,
                bitrate: self.config.audio.bitrate,
            }),
        };

        self.recorder.start(
            factory,
            &self.router,
            StartRequest {
                id,
                output,
                layout,
                max_duration: max_duration_ms.map(Duration::from_millis),
                queue_capacity: self.config.pipeline.queue_capacity,
                start_timeout: Duration::from_millis(self.config.capture.start_timeout_ms),
            },
        )
    }

    fn stop_recording(&self) -> Result<RecordingResult, CameraError> {
        let _cmd = lock(&self.commands);
        self.recorder.stop(&self.router)
    }

    /// Timer path: stop session `id` if it is still the active one.
    fn auto_stop(&self, id: Uuid) {
        let outcome = {
            let _cmd = lock(&self.commands);
            if self.recorder.active_session_id() != Some(id) {
                log::debug!("Auto-stop for {} ignored; recording already ended", id);
                return;
            }
            self.recorder.stop(&self.router)
        };

        match outcome {
            Ok(result) => {
                log::info!("Recording auto-stopped: {}", result.file_path);
                if let Some(observer) = &self.observer {
                    observer(&result);
                }
            }
            Err(e) => log::error!("Auto-stop failed: {}", e),
        }
    }

    fn pause_preview(&self) -> Result<(), CameraError> {
        let _cmd = lock(&self.commands);
        if lock(&self.session).is_none() {
            return Err(CameraError::not_initialized());
        }
        self.router.set_paused(true);
        Ok(())
    }

    fn resume_preview(&self) -> Result<CameraSnapshot, CameraError> {
        let _cmd = lock(&self.commands);
        if lock(&self.session).is_none() {
            return Err(CameraError::not_initialized());
        }
        self.router.set_paused(false);
        Ok(self.snapshot())
    }

    fn snapshot(&self) -> CameraSnapshot {
        let session = lock(&self.session);
        match session.as_ref() {
            Some(s) => CameraSnapshot::project(
                s,
                self.recorder.is_recording(),
                self.router.preview().map(|p| p.id()),
                self.router.is_paused(),
            ),
            None => CameraSnapshot::uninitialized(&self.backend.available_lenses()),
        }
    }

    fn release(&self) {
        let _cmd = lock(&self.commands);
        self.recorder.cancel(&self.router);
        let previous = lock(&self.session).take();
        if let Some(session) = previous {
            session.release();
        }
        self.router.set_preview(None);
        self.router.set_paused(false);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SyntheticBackend;

    fn engine() -> CameraEngine {
        CameraEngine::builder()
            .backend(Arc::new(SyntheticBackend::small()))
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_requires_backend() {
        let err = EngineBuilder::new().build().err().unwrap();
        assert_eq!(err.code(), "INVALID_ARGUMENT");
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let mut config = EngineConfig::default();
        config.capture.frame_rate = 0;
        let result = CameraEngine::builder()
            .backend(Arc::new(SyntheticBackend::small()))
            .config(config)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_commands_before_initialize() {
        let engine = engine();
        let state = engine.get_state();
        assert!(!state.is_initialized);
        assert!(state.has_front_camera && state.has_back_camera);

        assert!(!engine.set_zoom_level(2.0));
        assert!(!engine.set_flash_mode(FlashMode::Torch));
        assert_eq!(
            engine.switch_lens(LensFacing::Front).unwrap_err().code(),
            "NOT_INITIALIZED"
        );
        assert_eq!(engine.pause_preview().unwrap_err().code(), "NOT_INITIALIZED");
        assert_eq!(engine.resume_preview().unwrap_err().code(), "NOT_INITIALIZED");
        assert_eq!(
            engine.start_recording(None).unwrap_err().code(),
            "NOT_INITIALIZED"
        );
        assert_eq!(engine.stop_recording().unwrap_err().code(), "NOT_RECORDING");
    }

    #[test]
    fn test_initialize_and_release_idempotent() {
        let engine = engine();
        let state = engine.initialize(LensFacing::Back, QualityPreset::Sd).unwrap();
        assert!(state.is_initialized);
        assert!(state.preview_sink_id.is_some());

        engine.release();
        engine.release();
        assert!(!engine.get_state().is_initialized);
        assert!(engine.preview_sink().is_none());
    }

    #[test]
    fn test_zero_max_duration_rejected() {
        let engine = engine();
        engine.initialize(LensFacing::Back, QualityPreset::Sd).unwrap();
        assert_eq!(
            engine.start_recording(Some(0)).unwrap_err().code(),
            "INVALID_ARGUMENT"
        );
        assert_eq!(engine.recorder_phase(), RecorderPhase::Idle);
    }
}
