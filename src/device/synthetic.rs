//! In-process camera backend
//!
//! Generates moving gradient video and a 440 Hz tone on one producer thread
//! per device, stamped from a shared [`MediaClock`]. Profiles describe what
//! each simulated lens supports so hosts and tests can exercise every
//! capability branch without hardware.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;

use super::{
    AudioFormat, CameraBackend, CameraDevice, CaptureRequest, DeviceDescriptor, DeviceEvent,
    FrameSink,
};
use crate::errors::DeviceError;
use crate::permissions::PermissionStatus;
use crate::timing::MediaClock;
use crate::types::{
    AspectPolicy, AudioSamples, FlashMode, LensFacing, NormalizedPoint, Resolution, VideoFrame,
};

const TONE_HZ: f64 = 440.0;
const TONE_AMPLITUDE: f64 = 0.3;
/// Audio is delivered in 20 ms blocks.
const AUDIO_BLOCKS_PER_SEC: u32 = 50;
/// Longest the producer sleeps before re-checking its stop flag.
const MAX_NAP: Duration = Duration::from_millis(5);

/// Capabilities of one simulated lens.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticProfile {
    pub lens: LensFacing,
    pub name: String,
    pub sensor: Resolution,
    /// Landscape output formats the lens can stream.
    pub formats: Vec<Resolution>,
    pub min_zoom: f64,
    pub max_zoom: f64,
    pub has_flash: bool,
    pub supports_focus_point: bool,
    pub supports_exposure_point: bool,
    pub aspect_policy: AspectPolicy,
    /// Refuse every zoom request.
    pub rejects_zoom: bool,
    /// Deliver microphone audio alongside video.
    pub audio: bool,
}

impl SyntheticProfile {
    /// Rear camera with a 4:3 sensor, flash and formats up to 1080p.
    pub fn back() -> Self {
        Self {
            lens: LensFacing::Back,
            name: "Synthetic Back Camera".to_string(),
            sensor: Resolution::new(4032, 3024),
            formats: vec![
                Resolution::new(640, 480),
                Resolution::new(1280, 720),
                Resolution::new(1920, 1080),
            ],
            min_zoom: 1.0,
            max_zoom: 16.0,
            has_flash: true,
            supports_focus_point: true,
            supports_exposure_point: true,
            aspect_policy: AspectPolicy::Canonical,
            rejects_zoom: false,
            audio: true,
        }
    }

    /// Front camera: no flash, fixed focus, formats up to 720p.
    pub fn front() -> Self {
        Self {
            lens: LensFacing::Front,
            name: "Synthetic Front Camera".to_string(),
            sensor: Resolution::new(1920, 1080),
            formats: vec![Resolution::new(640, 480), Resolution::new(1280, 720)],
            min_zoom: 1.0,
            max_zoom: 4.0,
            has_flash: false,
            supports_focus_point: false,
            supports_exposure_point: true,
            aspect_policy: AspectPolicy::Canonical,
            rejects_zoom: false,
            audio: true,
        }
    }

    /// Tiny formats for fast tests, otherwise like [`back`](Self::back) or
    /// [`front`](Self::front).
    pub fn small(lens: LensFacing) -> Self {
        let base = match lens {
            LensFacing::Back => Self::back(),
            LensFacing::Front => Self::front(),
        };
        Self {
            formats: vec![Resolution::new(160, 120), Resolution::new(320, 240)],
            ..base
        }
    }
}

#[derive(Debug, Default)]
struct HardwareState {
    claimed: HashSet<LensFacing>,
    torch: HashSet<LensFacing>,
}

/// Backend serving [`SyntheticProfile`]s.
#[derive(Debug, Clone)]
pub struct SyntheticBackend {
    profiles: Vec<SyntheticProfile>,
    busy: HashSet<LensFacing>,
    microphone: PermissionStatus,
    hardware: Arc<Mutex<HardwareState>>,
}

impl SyntheticBackend {
    /// Front and back lenses at realistic sizes.
    pub fn new() -> Self {
        Self::with_profiles(vec![SyntheticProfile::back(), SyntheticProfile::front()])
    }

    /// Front and back lenses with tiny formats.
    pub fn small() -> Self {
        Self::with_profiles(vec![
            SyntheticProfile::small(LensFacing::Back),
            SyntheticProfile::small(LensFacing::Front),
        ])
    }

    pub fn with_profiles(profiles: Vec<SyntheticProfile>) -> Self {
        Self {
            profiles,
            busy: HashSet::new(),
            microphone: PermissionStatus::Granted,
            hardware: Arc::new(Mutex::new(HardwareState::default())),
        }
    }

    /// Add or replace the profile for `profile.lens`.
    pub fn with_profile(mut self, profile: SyntheticProfile) -> Self {
        self.profiles.retain(|p| p.lens != profile.lens);
        self.profiles.push(profile);
        self
    }

    pub fn without_lens(mut self, lens: LensFacing) -> Self {
        self.profiles.retain(|p| p.lens != lens);
        self
    }

    /// Pretend another client holds `lens`.
    pub fn with_busy_lens(mut self, lens: LensFacing) -> Self {
        self.busy.insert(lens);
        self
    }

    pub fn with_microphone_permission(mut self, status: PermissionStatus) -> Self {
        self.microphone = status;
        self
    }

    /// Whether a device for `lens` is currently acquired.
    pub fn is_claimed(&self, lens: LensFacing) -> bool {
        self.hardware
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .claimed
            .contains(&lens)
    }

    /// Whether the torch on `lens` is lit.
    pub fn torch_on(&self, lens: LensFacing) -> bool {
        self.hardware
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .torch
            .contains(&lens)
    }

    fn profile(&self, lens: LensFacing) -> Option<&SyntheticProfile> {
        self.profiles.iter().find(|p| p.lens == lens)
    }
}

impl Default for SyntheticBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraBackend for SyntheticBackend {
    fn available_lenses(&self) -> Vec<LensFacing> {
        let mut lenses: Vec<LensFacing> = self.profiles.iter().map(|p| p.lens).collect();
        lenses.sort_by_key(|l| l.as_str());
        lenses
    }

    fn microphone_permission(&self) -> PermissionStatus {
        self.microphone
    }

    fn acquire(
        &self,
        lens: LensFacing,
        request: CaptureRequest,
    ) -> Result<Box<dyn CameraDevice>, DeviceError> {
        let profile = self
            .profile(lens)
            .ok_or_else(|| DeviceError::not_found(format!("no synthetic {lens} camera")))?
            .clone();

        if self.busy.contains(&lens) {
            return Err(DeviceError::busy(format!(
                "{} is in use by another client",
                profile.name
            )));
        }

        let descriptor = describe(&profile, request)?;

        {
            let mut hardware = self.hardware.lock().unwrap_or_else(|e| e.into_inner());
            if !hardware.claimed.insert(lens) {
                return Err(DeviceError::busy(format!(
                    "{} is already acquired",
                    profile.name
                )));
            }
        }

        log::debug!("Synthetic {} camera acquired at {}", lens, descriptor.output);
        Ok(Box::new(SyntheticDevice {
            profile,
            descriptor,
            request,
            hardware: Arc::clone(&self.hardware),
            sink: None,
            producer: None,
            released: false,
        }))
    }
}

fn describe(
    profile: &SyntheticProfile,
    request: CaptureRequest,
) -> Result<DeviceDescriptor, DeviceError> {
    let output = request.quality.select(&profile.formats).ok_or_else(|| {
        DeviceError::not_found(format!("{} exposes no output formats", profile.name))
    })?;
    if request.frame_rate == 0 {
        return Err(DeviceError::rejected("frame rate must be positive"));
    }

    Ok(DeviceDescriptor {
        lens: profile.lens,
        name: profile.name.clone(),
        sensor: profile.sensor,
        output,
        frame_rate: request.frame_rate,
        min_zoom: profile.min_zoom,
        max_zoom: profile.max_zoom,
        zoom: profile.min_zoom,
        has_flash: profile.has_flash,
        supports_focus_point: profile.supports_focus_point,
        supports_exposure_point: profile.supports_exposure_point,
        aspect_policy: profile.aspect_policy,
        mirrored: profile.lens == LensFacing::Front,
    })
}

struct Producer {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// A simulated camera acquired from [`SyntheticBackend`].
pub struct SyntheticDevice {
    profile: SyntheticProfile,
    descriptor: DeviceDescriptor,
    request: CaptureRequest,
    hardware: Arc<Mutex<HardwareState>>,
    sink: Option<Arc<dyn FrameSink>>,
    producer: Option<Producer>,
    released: bool,
}

impl SyntheticDevice {
    fn spawn_producer(&mut self, sink: Arc<dyn FrameSink>) -> Result<(), DeviceError> {
        let stop = Arc::new(AtomicBool::new(false));
        let plan = ProducerPlan {
            size: self.descriptor.output.portrait(),
            frame_rate: self.descriptor.frame_rate,
            audio: self.profile.audio.then_some(self.request.audio),
            mirrored: self.descriptor.mirrored,
        };

        let stop_flag = Arc::clone(&stop);
        let handle = std::thread::Builder::new()
            .name(format!("reelcam-synthetic-{}", self.descriptor.lens))
            .spawn(move || produce(plan, sink, stop_flag))
            .map_err(|e| DeviceError::fault(format!("spawn failed: {e}")))?;

        self.producer = Some(Producer { stop, handle });
        Ok(())
    }

    fn stop_producer(&mut self) {
        if let Some(producer) = self.producer.take() {
            producer.stop.store(true, Ordering::Relaxed);
            if producer.handle.join().is_err() {
                log::error!("Synthetic producer for {} panicked", self.descriptor.lens);
            }
        }
    }

    fn set_torch(&self, on: bool) {
        let mut hardware = self.hardware.lock().unwrap_or_else(|e| e.into_inner());
        if on {
            hardware.torch.insert(self.descriptor.lens);
        } else {
            hardware.torch.remove(&self.descriptor.lens);
        }
    }
}

impl CameraDevice for SyntheticDevice {
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn reconfigure(&mut self, request: CaptureRequest) -> Result<DeviceDescriptor, DeviceError> {
        if self.released {
            return Err(DeviceError::fault("device already released"));
        }
        let descriptor = describe(&self.profile, request)?;

        let restart = self.producer.is_some();
        self.stop_producer();
        self.set_torch(false);
        self.descriptor = descriptor;
        self.request = request;

        if restart {
            if let Some(sink) = self.sink.clone() {
                self.spawn_producer(sink)?;
            }
        }
        Ok(self.descriptor.clone())
    }

    fn start(&mut self, sink: Arc<dyn FrameSink>) -> Result<(), DeviceError> {
        if self.released {
            return Err(DeviceError::fault("device already released"));
        }
        self.stop_producer();
        self.sink = Some(Arc::clone(&sink));
        self.spawn_producer(sink)
    }

    fn stop(&mut self) {
        self.stop_producer();
    }

    fn set_zoom(&mut self, factor: f64) -> Result<(), DeviceError> {
        if self.profile.rejects_zoom {
            return Err(DeviceError::rejected("zoom control locked"));
        }
        if factor < self.descriptor.min_zoom || factor > self.descriptor.max_zoom {
            return Err(DeviceError::rejected(format!(
                "zoom {factor} outside {}..={}",
                self.descriptor.min_zoom, self.descriptor.max_zoom
            )));
        }
        self.descriptor.zoom = factor;
        Ok(())
    }

    fn set_focus_point(&mut self, point: NormalizedPoint) -> Result<(), DeviceError> {
        if !self.profile.supports_focus_point {
            return Err(DeviceError::unsupported("focus point of interest"));
        }
        log::trace!("Synthetic focus at ({:.2}, {:.2})", point.x, point.y);
        Ok(())
    }

    fn set_exposure_point(&mut self, point: NormalizedPoint) -> Result<(), DeviceError> {
        if !self.profile.supports_exposure_point {
            return Err(DeviceError::unsupported("exposure point of interest"));
        }
        log::trace!("Synthetic exposure at ({:.2}, {:.2})", point.x, point.y);
        Ok(())
    }

    fn set_flash(&mut self, mode: FlashMode) -> Result<(), DeviceError> {
        if !self.profile.has_flash {
            return Err(DeviceError::unsupported("flash"));
        }
        self.set_torch(mode.is_torch());
        Ok(())
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.stop_producer();
        self.sink = None;
        let mut hardware = self.hardware.lock().unwrap_or_else(|e| e.into_inner());
        hardware.torch.remove(&self.descriptor.lens);
        hardware.claimed.remove(&self.descriptor.lens);
        self.released = true;
    }
}

impl Drop for SyntheticDevice {
    fn drop(&mut self) {
        self.release();
    }
}

struct ProducerPlan {
    size: Resolution,
    frame_rate: u32,
    audio: Option<AudioFormat>,
    mirrored: bool,
}

fn produce(plan: ProducerPlan, sink: Arc<dyn FrameSink>, stop: Arc<AtomicBool>) {
    let clock = MediaClock::new();
    let frame_interval = Duration::from_secs_f64(1.0 / plan.frame_rate.max(1) as f64);
    let base = gradient(plan.size, plan.mirrored);

    let block_frames = plan
        .audio
        .map(|a| (a.sample_rate / AUDIO_BLOCKS_PER_SEC).max(1) as u64)
        .unwrap_or(0);
    let audio_interval = plan
        .audio
        .map(|a| Duration::from_secs_f64(block_frames as f64 / a.sample_rate as f64));

    let mut sequence = 0u64;
    let mut audio_block = 0u64;
    let mut next_video = Duration::ZERO;

    while !stop.load(Ordering::Relaxed) {
        let now = clock.now();

        if now >= next_video {
            sink.deliver(DeviceEvent::Video(VideoFrame {
                sequence,
                timestamp: now,
                width: plan.size.width,
                height: plan.size.height,
                data: shifted(&base, sequence),
            }));
            sequence += 1;
            next_video += frame_interval;
            if next_video < now {
                // fell behind; skip ahead instead of bursting
                next_video = now + frame_interval;
            }
        }

        let mut next_audio = None;
        if let (Some(format), Some(interval)) = (plan.audio, audio_interval) {
            let due = interval * audio_block as u32;
            if now >= due {
                sink.deliver(DeviceEvent::Audio(sine_block(
                    due,
                    audio_block * block_frames,
                    block_frames as usize,
                    format,
                )));
                audio_block += 1;
                continue;
            }
            next_audio = Some(due);
        }

        let wake = next_audio.map_or(next_video, |a| a.min(next_video));
        let nap = wake.saturating_sub(clock.now()).min(MAX_NAP);
        if !nap.is_zero() {
            std::thread::sleep(nap);
        }
    }
}

/// RGB gradient varying by position: R by column, G by row, B by both.
fn gradient(size: Resolution, mirrored: bool) -> Vec<u8> {
    let (width, height) = (size.width, size.height);
    let mut data = vec![0u8; VideoFrame::expected_len(width, height)];
    for y in 0..height {
        for x in 0..width {
            let sx = if mirrored { width - 1 - x } else { x };
            let idx = ((y * width + x) * 3) as usize;
            data[idx] = (sx % 256) as u8;
            data[idx + 1] = (y % 256) as u8;
            data[idx + 2] = ((sx + y) % 256) as u8;
        }
    }
    data
}

fn shifted(base: &[u8], sequence: u64) -> Bytes {
    let offset = (sequence % 256) as u8;
    Bytes::from(
        base.iter()
            .map(|b| b.wrapping_add(offset))
            .collect::<Vec<u8>>(),
    )
}

/// One gradient frame of `size`, shifted by `sequence`.
pub fn gradient_frame(sequence: u64, size: Resolution, timestamp: Duration) -> VideoFrame {
    VideoFrame {
        sequence,
        timestamp,
        width: size.width,
        height: size.height,
        data: shifted(&gradient(size, false), sequence),
    }
}

/// `frames` frames of tone starting at absolute sample `first_frame`.
pub fn sine_block(
    timestamp: Duration,
    first_frame: u64,
    frames: usize,
    format: AudioFormat,
) -> AudioSamples {
    let channels = format.channels.max(1) as usize;
    let rate = format.sample_rate.max(1) as f64;
    let mut samples = vec![0.0f32; frames * channels];
    for i in 0..frames {
        let t = (first_frame + i as u64) as f64 / rate;
        let value = ((2.0 * std::f64::consts::PI * TONE_HZ * t).sin() * TONE_AMPLITUDE) as f32;
        for c in 0..channels {
            samples[i * channels + c] = value;
        }
    }
    AudioSamples {
        timestamp,
        sample_rate: format.sample_rate,
        channels: format.channels,
        samples,
    }
}
