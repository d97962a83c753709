//! End-to-end engine behaviour against the synthetic backend.
//!
//! Run with: cargo test --test engine_test --features recording

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::unbounded;
use reelcam::errors::ErrorKind;
use reelcam::permissions::PermissionStatus;
use reelcam::recording::RecorderPhase;
use reelcam::{
    CameraEngine, EngineConfig, FlashMode, LensFacing, QualityPreset, RecordingResult,
    SyntheticBackend,
};
use tempfile::TempDir;

fn test_config(dir: &Path) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.output.directory = dir.to_string_lossy().into_owned();
    config.capture.frame_rate = 30;
    config.capture.start_timeout_ms = 5_000;
    config
}

fn engine_with(backend: SyntheticBackend) -> (CameraEngine, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let engine = CameraEngine::builder()
        .backend(Arc::new(backend))
        .config(test_config(dir.path()))
        .build()
        .unwrap();
    (engine, dir)
}

fn engine() -> (CameraEngine, TempDir) {
    engine_with(SyntheticBackend::small())
}

// ═══════════════════════════════════════════════════════════════════════════
// DEVICE SESSION
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn initialize_reports_device_state() {
    let (engine, _dir) = engine();
    let state = engine
        .initialize(LensFacing::Back, QualityPreset::Sd)
        .unwrap();

    assert!(state.is_initialized);
    assert!(!state.is_recording);
    assert_eq!(state.lens, LensFacing::Back);
    assert_eq!(state.flash_mode, FlashMode::Off);
    assert_eq!(state.min_zoom_level, 1.0);
    assert_eq!(state.max_zoom_level, 10.0);
    assert_eq!(state.zoom_level, 1.0);
    assert!(state.has_flash && state.has_front_camera && state.has_back_camera);
    assert!((state.aspect_ratio - 4.0 / 3.0).abs() < 1e-9);
    assert!(!state.is_mirrored);
    assert!(state.preview_sink_id.is_some());
}

#[test]
fn every_lens_and_quality_initializes() {
    let (engine, _dir) = engine_with(SyntheticBackend::new());
    for lens in [LensFacing::Back, LensFacing::Front] {
        for quality in QualityPreset::ALL {
            engine.initialize(lens, quality).unwrap();
            let state = engine.get_state();
            assert!(state.is_initialized, "{lens:?} {quality:?}");
            assert_eq!(state.lens, lens);
            assert!(state.min_zoom_level >= 1.0);
            assert!(
                state.min_zoom_level <= state.zoom_level && state.zoom_level <= state.max_zoom_level,
                "{lens:?} {quality:?}: zoom {} outside [{}, {}]",
                state.zoom_level,
                state.min_zoom_level,
                state.max_zoom_level
            );
            assert!(state.aspect_ratio > 0.0);

            let sink = engine.preview_sink().unwrap();
            let (_, frame) = sink
                .wait_for_frame(0, Duration::from_secs(2))
                .expect("preview frame");
            assert!(frame.width > 0 && frame.height > 0);
        }
    }
}

#[test]
fn zoom_is_clamped_to_device_range() {
    let (engine, _dir) = engine();
    engine
        .initialize(LensFacing::Back, QualityPreset::Sd)
        .unwrap();

    assert!(engine.set_zoom_level(50.0));
    assert_eq!(engine.get_state().zoom_level, 10.0);
    assert!(engine.set_zoom_level(0.2));
    assert_eq!(engine.get_state().zoom_level, 1.0);
    assert!(engine.set_zoom_level(3.5));
    assert_eq!(engine.get_state().zoom_level, 3.5);
    assert!(!engine.set_zoom_level(f64::NAN));
    assert_eq!(engine.get_state().zoom_level, 3.5);
}

#[test]
fn lens_switch_resets_controls_and_keeps_preview() {
    let backend = SyntheticBackend::small();
    let (engine, _dir) = engine_with(backend.clone());
    let before = engine
        .initialize(LensFacing::Back, QualityPreset::Sd)
        .unwrap();
    engine.set_zoom_level(6.0);
    assert!(engine.set_flash_mode(FlashMode::Torch));

    let after = engine.switch_lens(LensFacing::Front).unwrap();
    assert_eq!(after.lens, LensFacing::Front);
    assert_eq!(after.zoom_level, 1.0);
    assert_eq!(after.max_zoom_level, 4.0);
    assert_eq!(after.flash_mode, FlashMode::Off);
    assert!(!after.has_flash);
    assert!(!after.is_focus_point_supported);
    assert!(after.is_mirrored);
    assert_eq!(after.preview_sink_id, before.preview_sink_id);

    assert!(!backend.is_claimed(LensFacing::Back));
    assert!(backend.is_claimed(LensFacing::Front));
    assert!(!backend.torch_on(LensFacing::Back));

    // Front lens has no flash or focus control; capture-time modes are still accepted
    assert!(!engine.set_flash_mode(FlashMode::Torch));
    assert!(engine.set_flash_mode(FlashMode::Auto));
    assert_eq!(engine.get_state().flash_mode, FlashMode::Auto);
    assert!(!engine.set_focus_point(0.5, 0.5));
    assert!(engine.set_exposure_point(0.2, 0.8));
}

#[test]
fn switching_to_current_lens_is_noop() {
    let (engine, _dir) = engine();
    engine
        .initialize(LensFacing::Back, QualityPreset::Sd)
        .unwrap();
    engine.set_zoom_level(2.0);
    let state = engine.switch_lens(LensFacing::Back).unwrap();
    assert_eq!(state.zoom_level, 2.0);
}

#[test]
fn flash_modes_drive_torch() {
    let backend = SyntheticBackend::small();
    let (engine, _dir) = engine_with(backend.clone());
    engine
        .initialize(LensFacing::Back, QualityPreset::Sd)
        .unwrap();

    assert!(engine.set_flash_mode(FlashMode::Torch));
    assert!(backend.torch_on(LensFacing::Back));
    assert_eq!(engine.get_state().flash_mode, FlashMode::Torch);

    assert!(engine.set_flash_mode(FlashMode::On));
    assert!(!backend.torch_on(LensFacing::Back));
    assert_eq!(engine.get_state().flash_mode, FlashMode::On);
}

#[test]
fn points_outside_unit_square_are_rejected() {
    let (engine, _dir) = engine();
    engine
        .initialize(LensFacing::Back, QualityPreset::Sd)
        .unwrap();
    assert!(engine.set_focus_point(0.0, 1.0));
    assert!(!engine.set_focus_point(1.2, 0.5));
    assert!(!engine.set_exposure_point(0.5, -0.1));
}

#[test]
fn reinitialize_replaces_preview_sink() {
    let (engine, _dir) = engine();
    let first = engine
        .initialize(LensFacing::Back, QualityPreset::Sd)
        .unwrap();
    let old_sink = engine.preview_sink().unwrap();
    engine.set_zoom_level(4.0);

    let second = engine
        .initialize(LensFacing::Back, QualityPreset::Lowest)
        .unwrap();
    assert_ne!(first.preview_sink_id, second.preview_sink_id);
    assert!(old_sink.is_closed());
    assert_eq!(second.zoom_level, 1.0);
}

#[test]
fn missing_and_busy_devices() {
    let (engine, _dir) = engine_with(SyntheticBackend::small().without_lens(LensFacing::Front));
    let err = engine
        .initialize(LensFacing::Front, QualityPreset::Sd)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoDeviceAvailable);
    assert!(!engine.get_state().is_initialized);
    assert!(!engine.get_state().has_front_camera);

    let (engine, _dir) = engine_with(SyntheticBackend::small().with_busy_lens(LensFacing::Back));
    let err = engine
        .initialize(LensFacing::Back, QualityPreset::Sd)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeviceBusy);
}

#[test]
fn failed_switch_keeps_previous_session() {
    let (engine, _dir) = engine_with(SyntheticBackend::small().with_busy_lens(LensFacing::Front));
    engine
        .initialize(LensFacing::Back, QualityPreset::Sd)
        .unwrap();
    engine.set_zoom_level(2.5);

    let err = engine.switch_lens(LensFacing::Front).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeviceBusy);
    let state = engine.get_state();
    assert_eq!(state.lens, LensFacing::Back);
    assert_eq!(state.zoom_level, 2.5);
}

// ═══════════════════════════════════════════════════════════════════════════
// PREVIEW
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn preview_receives_latest_frames() {
    let (engine, _dir) = engine();
    engine
        .initialize(LensFacing::Back, QualityPreset::Sd)
        .unwrap();
    let sink = engine.preview_sink().unwrap();

    let (seen, frame) = sink
        .wait_for_frame(0, Duration::from_secs(2))
        .expect("preview frame");
    assert!(seen > 0);
    assert_eq!((frame.width, frame.height), (240, 320));
    assert!(sink.wait_for_frame(seen, Duration::from_secs(2)).is_some());
}

#[test]
fn pause_and_resume_preview() {
    let (engine, _dir) = engine();
    engine
        .initialize(LensFacing::Back, QualityPreset::Sd)
        .unwrap();
    let sink = engine.preview_sink().unwrap();
    sink.wait_for_frame(0, Duration::from_secs(2)).unwrap();

    engine.pause_preview().unwrap();
    assert!(engine.get_state().is_preview_paused);
    // Let any in-flight delivery settle before sampling
    thread::sleep(Duration::from_millis(100));
    let frozen = sink.frames_published();
    thread::sleep(Duration::from_millis(200));
    assert_eq!(sink.frames_published(), frozen);
    assert!(sink.paused_drops() > 0);

    let state = engine.resume_preview().unwrap();
    assert!(!state.is_preview_paused);
    assert!(sink.wait_for_frame(frozen, Duration::from_secs(2)).is_some());
}

// ═══════════════════════════════════════════════════════════════════════════
// RECORDING
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn record_and_stop_produces_file() {
    let (engine, dir) = engine();
    engine
        .initialize(LensFacing::Back, QualityPreset::Sd)
        .unwrap();

    let session = engine.start_recording(None).unwrap();
    assert!(engine.get_state().is_recording);
    assert_eq!(engine.recorder_phase(), RecorderPhase::Recording);
    assert_eq!(session.output.parent(), Some(dir.path()));

    thread::sleep(Duration::from_millis(400));
    let result = engine.stop_recording().unwrap();

    assert!(!engine.get_state().is_recording);
    assert_eq!((result.width, result.height), (240, 320));
    assert!(result.duration_ms >= 300, "duration {}", result.duration_ms);
    let path = Path::new(&result.file_path);
    assert!(path.exists());
    assert!(std::fs::metadata(path).unwrap().len() > 0);

    let stats = engine.last_recording_stats().unwrap();
    assert_eq!(stats.session_id, session.id);
    assert!(stats.video_frames > 0);
}

/// Handler types (`vide`, `soun`, ...) of every track in an MP4 file.
#[cfg(feature = "audio")]
fn track_handlers(data: &[u8]) -> Vec<[u8; 4]> {
    fn children(data: &[u8]) -> Vec<([u8; 4], &[u8])> {
        let mut out = Vec::new();
        let mut pos = 0usize;
        while pos + 8 <= data.len() {
            let size = u32::from_be_bytes(data[pos..pos + 4].try_into().unwrap()) as usize;
            let kind: [u8; 4] = data[pos + 4..pos + 8].try_into().unwrap();
            let (header, size) = match size {
                0 => (8, data.len() - pos),
                1 => (
                    16,
                    u64::from_be_bytes(data[pos + 8..pos + 16].try_into().unwrap()) as usize,
                ),
                n => (8, n),
            };
            if size < header || pos + size > data.len() {
                break;
            }
            out.push((kind, &data[pos + header..pos + size]));
            pos += size;
        }
        out
    }
    fn find<'a>(data: &'a [u8], kind: &[u8; 4]) -> Option<&'a [u8]> {
        children(data)
            .into_iter()
            .find(|(k, _)| k == kind)
            .map(|(_, body)| body)
    }

    let Some(moov) = find(data, b"moov") else {
        return Vec::new();
    };
    children(moov)
        .into_iter()
        .filter(|(kind, _)| kind == b"trak")
        .filter_map(|(_, trak)| -> Option<[u8; 4]> {
            let hdlr = find(find(trak, b"mdia")?, b"hdlr")?;
            hdlr.get(8..12)?.try_into().ok()
        })
        .collect()
}

#[cfg(feature = "audio")]
#[test]
fn recording_has_video_and_audio_tracks() {
    let (engine, _dir) = engine();
    engine
        .initialize(LensFacing::Back, QualityPreset::Sd)
        .unwrap();

    engine.start_recording(None).unwrap();
    thread::sleep(Duration::from_millis(500));
    let result = engine.stop_recording().unwrap();

    let stats = engine.last_recording_stats().unwrap();
    assert!(stats.video_frames > 0);
    assert!(stats.audio_frames > 0, "no audio muxed: {stats:?}");

    let data = std::fs::read(&result.file_path).unwrap();
    let mut handlers = track_handlers(&data);
    handlers.sort();
    assert_eq!(handlers, vec![*b"soun", *b"vide"]);
}

#[cfg(feature = "audio")]
#[test]
fn recorded_audio_does_not_precede_first_frame() {
    let (engine, _dir) = engine();
    engine
        .initialize(LensFacing::Back, QualityPreset::Sd)
        .unwrap();
    thread::sleep(Duration::from_millis(300));

    let session = engine.start_recording(None).unwrap();
    thread::sleep(Duration::from_millis(400));
    let result = engine.stop_recording().unwrap();
    let stats = engine.last_recording_stats().unwrap();
    assert_eq!(stats.session_id, session.id);

    // The muxer refuses audio stamped before the first video sample, so a
    // finalized file with audio frames kept every packet at or after t=0.
    assert!(stats.audio_frames > 0);
    // 20 ms Opus packets cannot cover more than the recorded span plus the padded tail.
    let audio_span_ms = stats.audio_frames * 20;
    assert!(
        audio_span_ms <= result.duration_ms + 100,
        "{} ms of audio in a {} ms recording",
        audio_span_ms,
        result.duration_ms
    );
}

#[test]
fn double_start_and_stop_errors() {
    let (engine, _dir) = engine();
    engine
        .initialize(LensFacing::Back, QualityPreset::Sd)
        .unwrap();
    assert_eq!(
        engine.stop_recording().unwrap_err().kind(),
        ErrorKind::NotRecording
    );

    engine.start_recording(None).unwrap();
    assert_eq!(
        engine.start_recording(None).unwrap_err().kind(),
        ErrorKind::AlreadyRecording
    );
    engine.stop_recording().unwrap();
    assert_eq!(
        engine.stop_recording().unwrap_err().kind(),
        ErrorKind::NotRecording
    );
}

#[test]
fn reconfiguration_rejected_while_recording() {
    let (engine, _dir) = engine();
    engine
        .initialize(LensFacing::Back, QualityPreset::Sd)
        .unwrap();
    engine.start_recording(None).unwrap();

    assert_eq!(
        engine.switch_lens(LensFacing::Front).unwrap_err().kind(),
        ErrorKind::AlreadyRecording
    );
    assert_eq!(
        engine
            .initialize(LensFacing::Back, QualityPreset::Hd)
            .unwrap_err()
            .kind(),
        ErrorKind::AlreadyRecording
    );
    // Runtime controls stay available
    assert!(engine.set_zoom_level(2.0));
    engine.stop_recording().unwrap();
}

#[test]
fn pause_halts_encoding_until_resumed() {
    let (engine, _dir) = engine();
    engine
        .initialize(LensFacing::Back, QualityPreset::Sd)
        .unwrap();
    engine.start_recording(None).unwrap();
    thread::sleep(Duration::from_millis(150));

    engine.pause_preview().unwrap();
    thread::sleep(Duration::from_millis(100));
    let accepted = engine.router_stats().encoder_accepted;
    thread::sleep(Duration::from_millis(250));
    assert_eq!(engine.router_stats().encoder_accepted, accepted);
    assert!(engine.router_stats().paused_drops > 0);
    assert!(engine.get_state().is_recording);

    engine.resume_preview().unwrap();
    thread::sleep(Duration::from_millis(200));
    assert!(engine.router_stats().encoder_accepted > accepted);

    let result = engine.stop_recording().unwrap();
    assert!(Path::new(&result.file_path).exists());
}

#[test]
fn start_while_paused_is_rejected() {
    let (engine, _dir) = engine();
    engine
        .initialize(LensFacing::Back, QualityPreset::Sd)
        .unwrap();
    engine.pause_preview().unwrap();
    assert_eq!(
        engine.start_recording(None).unwrap_err().kind(),
        ErrorKind::InvalidArgument
    );
    assert_eq!(engine.recorder_phase(), RecorderPhase::Idle);
}

#[test]
fn auto_stop_fires_once_and_notifies() {
    let dir = tempfile::tempdir().unwrap();
    let (tx, rx) = unbounded::<RecordingResult>();
    let engine = CameraEngine::builder()
        .backend(Arc::new(SyntheticBackend::small()))
        .config(test_config(dir.path()))
        .on_recording_auto_stopped(move |result| {
            let _ = tx.send(result.clone());
        })
        .build()
        .unwrap();
    engine
        .initialize(LensFacing::Back, QualityPreset::Sd)
        .unwrap();

    engine.start_recording(Some(300)).unwrap();
    let result = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("auto-stop notification");

    assert!(Path::new(&result.file_path).exists());
    assert!(result.duration_ms >= 300);
    assert!(!engine.get_state().is_recording);
    assert_eq!(
        engine.stop_recording().unwrap_err().kind(),
        ErrorKind::NotRecording
    );
    assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
}

#[test]
fn explicit_stop_disarms_timer() {
    let dir = tempfile::tempdir().unwrap();
    let (tx, rx) = unbounded::<RecordingResult>();
    let engine = CameraEngine::builder()
        .backend(Arc::new(SyntheticBackend::small()))
        .config(test_config(dir.path()))
        .on_recording_auto_stopped(move |result| {
            let _ = tx.send(result.clone());
        })
        .build()
        .unwrap();
    engine
        .initialize(LensFacing::Back, QualityPreset::Sd)
        .unwrap();

    engine.start_recording(Some(500)).unwrap();
    engine.stop_recording().unwrap();
    assert!(rx.recv_timeout(Duration::from_millis(900)).is_err());
}

#[test]
fn start_requires_permission_and_device() {
    let (engine, _dir) = engine_with(
        SyntheticBackend::small().with_microphone_permission(PermissionStatus::Denied),
    );
    engine
        .initialize(LensFacing::Back, QualityPreset::Sd)
        .unwrap();
    assert_eq!(
        engine.start_recording(None).unwrap_err().kind(),
        ErrorKind::PermissionDenied
    );
    assert!(!engine.get_state().is_recording);

    // after release the missing session wins over the missing permission
    engine.release();
    assert_eq!(
        engine.start_recording(None).unwrap_err().kind(),
        ErrorKind::NotInitialized
    );

    let (engine, _dir) = self::engine();
    assert_eq!(
        engine.start_recording(None).unwrap_err().kind(),
        ErrorKind::NotInitialized
    );
}

#[test]
fn unwritable_output_fails_start_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"file").unwrap();

    let engine = CameraEngine::builder()
        .backend(Arc::new(SyntheticBackend::small()))
        .config(test_config(&blocker.join("clips")))
        .build()
        .unwrap();
    engine
        .initialize(LensFacing::Back, QualityPreset::Sd)
        .unwrap();

    let err = engine.start_recording(None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WriterInitFailed);
    assert!(!engine.get_state().is_recording);
    assert_eq!(engine.recorder_phase(), RecorderPhase::Idle);
}

// ═══════════════════════════════════════════════════════════════════════════
// RELEASE
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn release_is_idempotent_and_resets() {
    let backend = SyntheticBackend::small();
    let (engine, _dir) = engine_with(backend.clone());
    engine
        .initialize(LensFacing::Back, QualityPreset::Sd)
        .unwrap();
    engine.start_recording(None).unwrap();

    engine.release();
    engine.release();

    assert!(!backend.is_claimed(LensFacing::Back));
    let state = engine.get_state();
    assert!(!state.is_initialized);
    assert!(!state.is_recording);
    assert!(engine.preview_sink().is_none());

    assert_eq!(
        engine.switch_lens(LensFacing::Front).unwrap_err().kind(),
        ErrorKind::NotInitialized
    );
    assert_eq!(
        engine.pause_preview().unwrap_err().kind(),
        ErrorKind::NotInitialized
    );
    assert_eq!(
        engine.start_recording(None).unwrap_err().kind(),
        ErrorKind::NotInitialized
    );
    assert!(!engine.set_zoom_level(2.0));

    engine
        .initialize(LensFacing::Front, QualityPreset::Sd)
        .unwrap();
    assert!(engine.get_state().is_initialized);
}

#[test]
fn release_cancels_pending_auto_stop() {
    let dir = tempfile::tempdir().unwrap();
    let (tx, rx) = unbounded::<RecordingResult>();
    let engine = CameraEngine::builder()
        .backend(Arc::new(SyntheticBackend::small()))
        .config(test_config(dir.path()))
        .on_recording_auto_stopped(move |result| {
            let _ = tx.send(result.clone());
        })
        .build()
        .unwrap();
    engine
        .initialize(LensFacing::Back, QualityPreset::Sd)
        .unwrap();
    engine.start_recording(Some(300)).unwrap();
    engine.release();
    assert!(rx.recv_timeout(Duration::from_millis(700)).is_err());
}

#[test]
fn state_is_readable_from_other_threads() {
    let (engine, _dir) = engine();
    let engine = Arc::new(engine);
    engine
        .initialize(LensFacing::Back, QualityPreset::Sd)
        .unwrap();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for _ in 0..50 {
                    let state = engine.get_state();
                    assert!(state.zoom_level >= state.min_zoom_level);
                    assert!(state.zoom_level <= state.max_zoom_level);
                }
            })
        })
        .collect();

    for level in [1.0, 3.0, 9.0, 20.0, 0.5] {
        engine.set_zoom_level(level);
    }
    for reader in readers {
        reader.join().unwrap();
    }
}
