//! Camera device capability interface
//!
//! A backend hands out [`CameraDevice`] handles for a lens position. Devices
//! push everything they produce into a [`FrameSink`] as [`DeviceEvent`]s, so
//! the rest of the engine sees one event shape whatever the platform.
//!
//! Submodules:
//! - `session`: the engine-owned [`DeviceSession`] wrapping one active device
//! - `synthetic`: an in-process backend producing generated video and audio

mod session;
mod synthetic;

use std::sync::Arc;

use serde::Serialize;

use crate::errors::DeviceError;
use crate::permissions::PermissionStatus;
use crate::types::{
    AspectPolicy, AudioSamples, FlashMode, LensFacing, NormalizedPoint, QualityPreset, Resolution,
    VideoFrame,
};

pub use session::{DeviceCapabilities, DeviceSession, ZoomState};
pub use synthetic::{gradient_frame, sine_block, SyntheticBackend, SyntheticDevice, SyntheticProfile};

/// Everything a running device can emit.
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    Video(VideoFrame),
    Audio(AudioSamples),
    /// The stream hit an error it could not recover from.
    Fault(DeviceError),
}

/// Destination for device output. Called on the device's producer thread.
pub trait FrameSink: Send + Sync {
    fn deliver(&self, event: DeviceEvent);
}

/// Audio format the device should capture in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Parameters for acquiring or reconfiguring a device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureRequest {
    pub quality: QualityPreset,
    pub frame_rate: u32,
    pub audio: AudioFormat,
}

/// What a device reports about itself once configured.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceDescriptor {
    pub lens: LensFacing,
    pub name: String,
    /// Native active array size, landscape.
    pub sensor: Resolution,
    /// Selected output format, landscape.
    pub output: Resolution,
    pub frame_rate: u32,
    pub min_zoom: f64,
    pub max_zoom: f64,
    pub zoom: f64,
    pub has_flash: bool,
    pub supports_focus_point: bool,
    pub supports_exposure_point: bool,
    pub aspect_policy: AspectPolicy,
    pub mirrored: bool,
}

/// Platform backend: discovers lenses and acquires devices.
pub trait CameraBackend: Send + Sync {
    fn available_lenses(&self) -> Vec<LensFacing>;

    fn microphone_permission(&self) -> PermissionStatus;

    fn acquire(
        &self,
        lens: LensFacing,
        request: CaptureRequest,
    ) -> Result<Box<dyn CameraDevice>, DeviceError>;
}

/// One acquired camera.
pub trait CameraDevice: Send {
    fn descriptor(&self) -> &DeviceDescriptor;

    /// Apply a new capture request in place. On error the previous format stays.
    fn reconfigure(&mut self, request: CaptureRequest) -> Result<DeviceDescriptor, DeviceError>;

    /// Begin delivering frames to `sink`. Starting twice replaces the sink.
    fn start(&mut self, sink: Arc<dyn FrameSink>) -> Result<(), DeviceError>;

    /// Stop delivering frames. No event is delivered after this returns.
    fn stop(&mut self);

    fn set_zoom(&mut self, factor: f64) -> Result<(), DeviceError>;

    fn set_focus_point(&mut self, point: NormalizedPoint) -> Result<(), DeviceError>;

    fn set_exposure_point(&mut self, point: NormalizedPoint) -> Result<(), DeviceError>;

    fn set_flash(&mut self, mode: FlashMode) -> Result<(), DeviceError>;

    /// Stop and give the hardware back. Must be safe to call more than once.
    fn release(&mut self);
}
