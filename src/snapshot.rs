//! Read-only projection of engine state for the host

use serde::{Deserialize, Serialize};

use crate::device::DeviceSession;
use crate::router::PreviewSinkId;
use crate::types::{CanonicalRatio, FlashMode, LensFacing};

/// Host-facing camera state. Field names match the host protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraSnapshot {
    pub is_initialized: bool,
    pub is_recording: bool,
    pub flash_mode: FlashMode,
    pub lens: LensFacing,
    pub zoom_level: f64,
    pub min_zoom_level: f64,
    pub max_zoom_level: f64,
    pub aspect_ratio: f64,
    pub has_flash: bool,
    pub has_front_camera: bool,
    pub has_back_camera: bool,
    pub is_focus_point_supported: bool,
    pub is_exposure_point_supported: bool,
    pub preview_sink_id: Option<PreviewSinkId>,
    pub is_mirrored: bool,
    pub is_preview_paused: bool,
}

impl CameraSnapshot {
    /// State with no active device. Lens availability still comes from the backend.
    pub fn uninitialized(lenses: &[LensFacing]) -> Self {
        Self {
            is_initialized: false,
            is_recording: false,
            flash_mode: FlashMode::Off,
            lens: LensFacing::Back,
            zoom_level: 1.0,
            min_zoom_level: 1.0,
            max_zoom_level: 1.0,
            aspect_ratio: CanonicalRatio::SixteenNine.value(),
            has_flash: false,
            has_front_camera: lenses.contains(&LensFacing::Front),
            has_back_camera: lenses.contains(&LensFacing::Back),
            is_focus_point_supported: false,
            is_exposure_point_supported: false,
            preview_sink_id: None,
            is_mirrored: false,
            is_preview_paused: false,
        }
    }

    pub fn project(
        session: &DeviceSession,
        is_recording: bool,
        preview_sink_id: Option<PreviewSinkId>,
        is_preview_paused: bool,
    ) -> Self {
        let zoom = session.zoom();
        let caps = session.capabilities();
        Self {
            is_initialized: true,
            is_recording,
            flash_mode: session.flash_mode(),
            lens: session.lens(),
            zoom_level: zoom.current,
            min_zoom_level: zoom.min,
            max_zoom_level: zoom.max,
            aspect_ratio: session.aspect_ratio(),
            has_flash: caps.has_flash,
            has_front_camera: caps.has_front_camera,
            has_back_camera: caps.has_back_camera,
            is_focus_point_supported: caps.supports_focus_point,
            is_exposure_point_supported: caps.supports_exposure_point,
            preview_sink_id,
            is_mirrored: session.is_mirrored(),
            is_preview_paused,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uninitialized_defaults() {
        let snap = CameraSnapshot::uninitialized(&[LensFacing::Back]);
        assert!(!snap.is_initialized);
        assert!(snap.has_back_camera);
        assert!(!snap.has_front_camera);
        assert_eq!(snap.zoom_level, 1.0);
        assert!(snap.preview_sink_id.is_none());
    }

    #[test]
    fn test_serializes_host_field_names() {
        let json = serde_json::to_value(CameraSnapshot::uninitialized(&[])).unwrap();
        assert_eq!(json["isInitialized"], false);
        assert_eq!(json["flashMode"], "off");
        assert_eq!(json["lens"], "back");
        assert!(json.get("minZoomLevel").is_some());
        assert!(json.get("isFocusPointSupported").is_some());
        assert!(json["previewSinkId"].is_null());
    }
}
