use std::sync::Arc;

use serde::Serialize;

use super::{CameraBackend, CameraDevice, CaptureRequest, DeviceDescriptor, FrameSink};
use crate::errors::{catch_device_fault, CameraError};
use crate::types::{
    AspectPolicy, CanonicalRatio, FlashMode, LensFacing, NormalizedPoint, QualityPreset,
    Resolution,
};

/// Zoom bounds and the current factor. Invariant: `min <= current <= max`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ZoomState {
    pub min: f64,
    pub max: f64,
    pub current: f64,
}

impl ZoomState {
    /// Bounds from a device range with the engine-wide cap applied.
    pub fn from_device(device_min: f64, device_max: f64, cap: f64) -> Self {
        let min = if device_min.is_finite() {
            device_min.max(1.0)
        } else {
            1.0
        };
        let max = if device_max.is_finite() {
            device_max.min(cap).max(min)
        } else {
            min
        };
        Self {
            min,
            max,
            current: min,
        }
    }

    pub fn clamp(&self, level: f64) -> f64 {
        level.clamp(self.min, self.max)
    }
}

/// What the active device and the backend can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceCapabilities {
    pub has_flash: bool,
    pub has_front_camera: bool,
    pub has_back_camera: bool,
    pub supports_focus_point: bool,
    pub supports_exposure_point: bool,
}

/// One acquired camera plus the control state the engine tracks for it.
///
/// A lens switch builds a fresh session; fields are never patched across
/// devices.
pub struct DeviceSession {
    device: Box<dyn CameraDevice>,
    descriptor: DeviceDescriptor,
    request: CaptureRequest,
    zoom: ZoomState,
    zoom_cap: f64,
    flash_mode: FlashMode,
    focus_point: Option<NormalizedPoint>,
    exposure_point: Option<NormalizedPoint>,
    capabilities: DeviceCapabilities,
    streaming: bool,
}

impl DeviceSession {
    /// Acquire `lens` from `backend` and configure it for `request`.
    pub fn open(
        backend: &dyn CameraBackend,
        lens: LensFacing,
        request: CaptureRequest,
        zoom_cap: f64,
    ) -> Result<Self, CameraError> {
        let lenses = backend.available_lenses();
        if !lenses.contains(&lens) {
            return Err(CameraError::NoDeviceAvailable(format!(
                "no {} camera on this device",
                lens
            )));
        }

        let device = catch_device_fault("acquire", || backend.acquire(lens, request))?;
        let descriptor = device.descriptor().clone();
        log::info!(
            "Acquired {} camera '{}' at {} ({} fps)",
            lens,
            descriptor.name,
            descriptor.output,
            descriptor.frame_rate
        );

        Ok(Self::from_parts(device, descriptor, request, zoom_cap, &lenses))
    }

    fn from_parts(
        device: Box<dyn CameraDevice>,
        descriptor: DeviceDescriptor,
        request: CaptureRequest,
        zoom_cap: f64,
        lenses: &[LensFacing],
    ) -> Self {
        let zoom = ZoomState::from_device(descriptor.min_zoom, descriptor.max_zoom, zoom_cap);
        let capabilities = DeviceCapabilities {
            has_flash: descriptor.has_flash,
            has_front_camera: lenses.contains(&LensFacing::Front),
            has_back_camera: lenses.contains(&LensFacing::Back),
            supports_focus_point: descriptor.supports_focus_point,
            supports_exposure_point: descriptor.supports_exposure_point,
        };
        Self {
            device,
            descriptor,
            request,
            zoom,
            zoom_cap,
            flash_mode: FlashMode::Off,
            focus_point: None,
            exposure_point: None,
            capabilities,
            streaming: false,
        }
    }

    /// Re-apply a quality tier on the same device. Control state resets as
    /// for a fresh session; on error nothing changes.
    pub fn reconfigure(&mut self, quality: QualityPreset) -> Result<(), CameraError> {
        let request = CaptureRequest {
            quality,
            ..self.request
        };
        let device = &mut self.device;
        let descriptor = catch_device_fault("reconfigure", || device.reconfigure(request))?;
        log::info!(
            "Reconfigured {} camera to {} ({})",
            descriptor.lens,
            descriptor.output,
            quality
        );

        self.zoom = ZoomState::from_device(descriptor.min_zoom, descriptor.max_zoom, self.zoom_cap);
        self.capabilities.has_flash = descriptor.has_flash;
        self.capabilities.supports_focus_point = descriptor.supports_focus_point;
        self.capabilities.supports_exposure_point = descriptor.supports_exposure_point;
        self.descriptor = descriptor;
        self.request = request;
        self.flash_mode = FlashMode::Off;
        self.focus_point = None;
        self.exposure_point = None;
        Ok(())
    }

    pub fn start_stream(&mut self, sink: Arc<dyn FrameSink>) -> Result<(), CameraError> {
        let device = &mut self.device;
        catch_device_fault("start", || device.start(sink))?;
        self.streaming = true;
        Ok(())
    }

    pub fn stop_stream(&mut self) {
        if self.streaming {
            self.device.stop();
            self.streaming = false;
        }
    }

    /// Stop streaming and hand the device back.
    pub fn release(mut self) {
        self.stop_stream();
        self.device.release();
        log::info!("Released {} camera", self.descriptor.lens);
    }

    /// Clamp `level` into range and apply it. Returns false if the device
    /// refused the value, leaving the tracked zoom unchanged.
    pub fn set_zoom(&mut self, level: f64) -> bool {
        if !level.is_finite() {
            return false;
        }
        let clamped = self.zoom.clamp(level);
        let device = &mut self.device;
        match catch_device_fault("set_zoom", || device.set_zoom(clamped)) {
            Ok(()) => {
                self.zoom.current = clamped;
                true
            }
            Err(e) => {
                log::warn!("Zoom to {:.2} rejected: {}", clamped, e);
                false
            }
        }
    }

    pub fn set_focus_point(&mut self, x: f64, y: f64) -> bool {
        if !self.capabilities.supports_focus_point {
            return false;
        }
        let Ok(point) = NormalizedPoint::new(x, y) else {
            return false;
        };
        let device = &mut self.device;
        match catch_device_fault("set_focus_point", || device.set_focus_point(point)) {
            Ok(()) => {
                self.focus_point = Some(point);
                true
            }
            Err(e) => {
                log::warn!("Focus point rejected: {}", e);
                false
            }
        }
    }

    pub fn set_exposure_point(&mut self, x: f64, y: f64) -> bool {
        if !self.capabilities.supports_exposure_point {
            return false;
        }
        let Ok(point) = NormalizedPoint::new(x, y) else {
            return false;
        };
        let device = &mut self.device;
        match catch_device_fault("set_exposure_point", || device.set_exposure_point(point)) {
            Ok(()) => {
                self.exposure_point = Some(point);
                true
            }
            Err(e) => {
                log::warn!("Exposure point rejected: {}", e);
                false
            }
        }
    }

    /// Record the flash mode. Only `Torch` lights the hardware continuously;
    /// the other modes turn the torch off. A lens without a flash accepts
    /// every mode except `Torch`, with nothing to drive.
    pub fn set_flash_mode(&mut self, mode: FlashMode) -> bool {
        if !self.capabilities.has_flash {
            if mode == FlashMode::Torch {
                return false;
            }
            self.flash_mode = mode;
            return true;
        }
        let device = &mut self.device;
        match catch_device_fault("set_flash", || device.set_flash(mode)) {
            Ok(()) => {
                self.flash_mode = mode;
                true
            }
            Err(e) => {
                log::warn!("Flash mode {} rejected: {}", mode, e);
                false
            }
        }
    }

    pub fn lens(&self) -> LensFacing {
        self.descriptor.lens
    }

    pub fn quality(&self) -> QualityPreset {
        self.request.quality
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    pub fn zoom(&self) -> ZoomState {
        self.zoom
    }

    pub fn flash_mode(&self) -> FlashMode {
        self.flash_mode
    }

    pub fn focus_point(&self) -> Option<NormalizedPoint> {
        self.focus_point
    }

    pub fn exposure_point(&self) -> Option<NormalizedPoint> {
        self.exposure_point
    }

    pub fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn is_mirrored(&self) -> bool {
        self.descriptor.mirrored
    }

    pub fn frame_rate(&self) -> u32 {
        self.descriptor.frame_rate
    }

    /// Display aspect ratio, width over height of the landscape format.
    pub fn aspect_ratio(&self) -> f64 {
        match self.descriptor.aspect_policy {
            AspectPolicy::Canonical => CanonicalRatio::best_fit(self.descriptor.sensor).value(),
            AspectPolicy::Exact => self.descriptor.output.ratio(),
        }
    }

    /// Size of recorded frames: the output format in portrait orientation.
    pub fn recording_size(&self) -> Resolution {
        self.descriptor.output.portrait()
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("descriptor", &self.descriptor)
            .field("zoom", &self.zoom)
            .field("flash_mode", &self.flash_mode)
            .field("streaming", &self.streaming)
            .finish()
    }
}
