//! Host marshalling for engine commands
//!
//! A host bridge hands over a method name and a JSON argument object and gets
//! back either a JSON value or a [`CommandError`] carrying the error code.
//! Argument parsing is lenient in the same places the host protocol is:
//! missing fields take their defaults and unknown lens or quality names fall
//! back to the back camera and FHD.

use serde::Serialize;
use serde_json::{json, Value};

use crate::engine::CameraEngine;
use crate::errors::CameraError;
use crate::types::{FlashMode, LensFacing, QualityPreset};

/// A parsed host command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Initialize {
        lens: LensFacing,
        quality: QualityPreset,
    },
    SwitchLens(LensFacing),
    /// `None` for a mode name the engine does not know.
    SetFlashMode(Option<FlashMode>),
    SetFocusPoint { x: f64, y: f64 },
    SetExposurePoint { x: f64, y: f64 },
    SetZoomLevel(f64),
    StartRecording { max_duration_ms: Option<u64> },
    StopRecording,
    PausePreview,
    ResumePreview,
    GetState,
    Release,
}

impl Command {
    pub fn parse(method: &str, args: &Value) -> Result<Self, CameraError> {
        let command = match method {
            "initializeCamera" => Command::Initialize {
                lens: LensFacing::from_host(str_arg(args, "lens").unwrap_or("back")),
                quality: QualityPreset::from_host(str_arg(args, "videoQuality").unwrap_or("fhd")),
            },
            "switchCamera" => {
                Command::SwitchLens(LensFacing::from_host(str_arg(args, "lens").unwrap_or("back")))
            }
            "setFlashMode" => {
                Command::SetFlashMode(str_arg(args, "mode").unwrap_or("off").parse().ok())
            }
            "setFocusPoint" => Command::SetFocusPoint {
                x: f64_arg(args, "x", 0.5)?,
                y: f64_arg(args, "y", 0.5)?,
            },
            "setExposurePoint" => Command::SetExposurePoint {
                x: f64_arg(args, "x", 0.5)?,
                y: f64_arg(args, "y", 0.5)?,
            },
            "setZoomLevel" => Command::SetZoomLevel(f64_arg(args, "level", 1.0)?),
            "startRecording" => Command::StartRecording {
                max_duration_ms: duration_arg(args)?,
            },
            "stopRecording" => Command::StopRecording,
            "pausePreview" => Command::PausePreview,
            "resumePreview" => Command::ResumePreview,
            "getCameraState" => Command::GetState,
            "disposeCamera" => Command::Release,
            other => {
                return Err(CameraError::InvalidArgument(format!(
                    "unknown method: {other}"
                )))
            }
        };
        Ok(command)
    }

    /// Run against `engine` and serialize the result for the host.
    pub fn execute(self, engine: &CameraEngine) -> Result<Value, CameraError> {
        log::debug!("Executing {:?}", self);
        match self {
            Command::Initialize { lens, quality } => to_value(engine.initialize(lens, quality)?),
            Command::SwitchLens(lens) => to_value(engine.switch_lens(lens)?),
            Command::SetFlashMode(mode) => Ok(Value::Bool(
                mode.map_or(false, |m| engine.set_flash_mode(m)),
            )),
            Command::SetFocusPoint { x, y } => Ok(Value::Bool(engine.set_focus_point(x, y))),
            Command::SetExposurePoint { x, y } => {
                Ok(Value::Bool(engine.set_exposure_point(x, y)))
            }
            Command::SetZoomLevel(level) => Ok(Value::Bool(engine.set_zoom_level(level))),
            Command::StartRecording { max_duration_ms } => {
                engine.start_recording(max_duration_ms)?;
                Ok(Value::Null)
            }
            Command::StopRecording => to_value(engine.stop_recording()?),
            Command::PausePreview => {
                engine.pause_preview()?;
                Ok(Value::Null)
            }
            Command::ResumePreview => to_value(engine.resume_preview()?),
            Command::GetState => to_value(engine.get_state()),
            Command::Release => {
                engine.release();
                Ok(Value::Null)
            }
        }
    }
}

/// Error payload returned to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandError {
    pub code: &'static str,
    pub message: String,
}

impl From<CameraError> for CommandError {
    fn from(error: CameraError) -> Self {
        Self {
            code: error.code(),
            message: error.detail().to_string(),
        }
    }
}

impl CommandError {
    pub fn to_json(&self) -> Value {
        json!({ "code": self.code, "message": self.message })
    }
}

/// Parse and execute one host call.
pub fn dispatch(engine: &CameraEngine, method: &str, args: &Value) -> Result<Value, CommandError> {
    let outcome = Command::parse(method, args).and_then(|command| command.execute(engine));
    outcome.map_err(|e| {
        log::warn!("{} failed: {}", method, e);
        CommandError::from(e)
    })
}

fn str_arg<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

fn f64_arg(args: &Value, key: &str, default: f64) -> Result<f64, CameraError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(value) => value
            .as_f64()
            .ok_or_else(|| CameraError::InvalidArgument(format!("{key} must be a number"))),
    }
}

fn duration_arg(args: &Value) -> Result<Option<u64>, CameraError> {
    match args.get("maxDurationMs") {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_u64().map(Some).ok_or_else(|| {
            CameraError::InvalidArgument("maxDurationMs must be a positive integer".to_string())
        }),
    }
}

fn to_value<T: Serialize>(value: T) -> Result<Value, CameraError> {
    serde_json::to_value(value)
        .map_err(|e| CameraError::InvalidArgument(format!("unserializable result: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SyntheticBackend;
    use std::sync::Arc;

    fn engine() -> CameraEngine {
        CameraEngine::builder()
            .backend(Arc::new(SyntheticBackend::small()))
            .build()
            .unwrap()
    }

    #[test]
    fn test_parse_defaults() {
        let cmd = Command::parse("initializeCamera", &json!({})).unwrap();
        assert_eq!(
            cmd,
            Command::Initialize {
                lens: LensFacing::Back,
                quality: QualityPreset::Fhd
            }
        );

        let cmd = Command::parse("setFocusPoint", &json!({ "x": 0.25 })).unwrap();
        assert_eq!(cmd, Command::SetFocusPoint { x: 0.25, y: 0.5 });

        let cmd = Command::parse("setZoomLevel", &Value::Null).unwrap();
        assert_eq!(cmd, Command::SetZoomLevel(1.0));
    }

    #[test]
    fn test_parse_lenient_names() {
        let cmd = Command::parse(
            "initializeCamera",
            &json!({ "lens": "sideways", "videoQuality": "8k" }),
        )
        .unwrap();
        assert_eq!(
            cmd,
            Command::Initialize {
                lens: LensFacing::Back,
                quality: QualityPreset::Fhd
            }
        );
        assert_eq!(
            Command::parse("setFlashMode", &json!({ "mode": "strobe" })).unwrap(),
            Command::SetFlashMode(None)
        );
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        let err = Command::parse("takePicture", &json!({})).unwrap_err();
        assert_eq!(err.code(), "INVALID_ARGUMENT");

        let err = Command::parse("setZoomLevel", &json!({ "level": "big" })).unwrap_err();
        assert_eq!(err.code(), "INVALID_ARGUMENT");

        let err = Command::parse("startRecording", &json!({ "maxDurationMs": -5 })).unwrap_err();
        assert_eq!(err.code(), "INVALID_ARGUMENT");
    }

    #[test]
    fn test_dispatch_round() {
        let engine = engine();
        let err = dispatch(&engine, "setZoomLevel", &json!({ "level": 2.0 }));
        assert_eq!(err, Ok(Value::Bool(false)));

        let state = dispatch(&engine, "initializeCamera", &json!({ "videoQuality": "sd" })).unwrap();
        assert_eq!(state["isInitialized"], true);
        assert_eq!(state["lens"], "back");

        assert_eq!(
            dispatch(&engine, "setFlashMode", &json!({ "mode": "strobe" })),
            Ok(Value::Bool(false))
        );
        assert_eq!(
            dispatch(&engine, "setZoomLevel", &json!({ "level": 2.0 })),
            Ok(Value::Bool(true))
        );
        assert_eq!(dispatch(&engine, "getCameraState", &json!({})).unwrap()["zoomLevel"], 2.0);

        let err = dispatch(&engine, "stopRecording", &json!({})).unwrap_err();
        assert_eq!(err.code, "NOT_RECORDING");
        assert_eq!(err.to_json()["code"], "NOT_RECORDING");

        assert_eq!(dispatch(&engine, "disposeCamera", &json!({})), Ok(Value::Null));
        let err = dispatch(&engine, "pausePreview", &json!({})).unwrap_err();
        assert_eq!(err.code, "NOT_INITIALIZED");
    }
}
