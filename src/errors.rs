//! Error taxonomy for the capture engine
//!
//! Every command returns one of these kinds. Hardware failures arrive as
//! [`DeviceError`] and are converted here, at the command boundary, with the
//! backend's own message kept as detail text.

use serde::Serialize;
use thiserror::Error;

/// Fieldless mirror of [`CameraError`], convenient for matching and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    NoDeviceAvailable,
    DeviceBusy,
    NotInitialized,
    AlreadyRecording,
    NotRecording,
    PermissionDenied,
    WriterInitFailed,
    WriterFinalizeFailed,
    InvalidArgument,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CameraError {
    #[error("No camera available: {0}")]
    NoDeviceAvailable(String),
    #[error("Camera busy: {0}")]
    DeviceBusy(String),
    #[error("Camera not initialized: {0}")]
    NotInitialized(String),
    #[error("Already recording: {0}")]
    AlreadyRecording(String),
    #[error("Not recording: {0}")]
    NotRecording(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Failed to start writer: {0}")]
    WriterInitFailed(String),
    #[error("Failed to finalize recording: {0}")]
    WriterFinalizeFailed(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl CameraError {
    pub fn not_initialized() -> Self {
        CameraError::NotInitialized("camera not initialized".to_string())
    }

    pub fn not_recording() -> Self {
        CameraError::NotRecording("no active recording".to_string())
    }

    pub fn already_recording() -> Self {
        CameraError::AlreadyRecording("a recording is already in progress".to_string())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CameraError::NoDeviceAvailable(_) => ErrorKind::NoDeviceAvailable,
            CameraError::DeviceBusy(_) => ErrorKind::DeviceBusy,
            CameraError::NotInitialized(_) => ErrorKind::NotInitialized,
            CameraError::AlreadyRecording(_) => ErrorKind::AlreadyRecording,
            CameraError::NotRecording(_) => ErrorKind::NotRecording,
            CameraError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            CameraError::WriterInitFailed(_) => ErrorKind::WriterInitFailed,
            CameraError::WriterFinalizeFailed(_) => ErrorKind::WriterFinalizeFailed,
            CameraError::InvalidArgument(_) => ErrorKind::InvalidArgument,
        }
    }

    /// Detail text without the kind prefix.
    pub fn detail(&self) -> &str {
        match self {
            CameraError::NoDeviceAvailable(msg)
            | CameraError::DeviceBusy(msg)
            | CameraError::NotInitialized(msg)
            | CameraError::AlreadyRecording(msg)
            | CameraError::NotRecording(msg)
            | CameraError::PermissionDenied(msg)
            | CameraError::WriterInitFailed(msg)
            | CameraError::WriterFinalizeFailed(msg)
            | CameraError::InvalidArgument(msg) => msg,
        }
    }

    /// Stable code string handed to the host application.
    pub fn code(&self) -> &'static str {
        match self.kind() {
            ErrorKind::NoDeviceAvailable => "NO_DEVICE",
            ErrorKind::DeviceBusy => "DEVICE_BUSY",
            ErrorKind::NotInitialized => "NOT_INITIALIZED",
            ErrorKind::AlreadyRecording => "ALREADY_RECORDING",
            ErrorKind::NotRecording => "NOT_RECORDING",
            ErrorKind::PermissionDenied => "PERMISSION_DENIED",
            ErrorKind::WriterInitFailed => "WRITER_INIT_ERROR",
            ErrorKind::WriterFinalizeFailed => "WRITER_FINALIZE_ERROR",
            ErrorKind::InvalidArgument => "INVALID_ARGUMENT",
        }
    }
}

/// Failure categories reported by a camera backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceErrorKind {
    /// No device exists for the requested position.
    NotFound,
    /// The device exists but exclusive access was refused.
    Busy,
    /// The device refused a configuration value.
    Rejected,
    /// The capability is not present on this device.
    Unsupported,
    /// The OS denied access.
    PermissionDenied,
    /// Unexpected backend fault, including a caught panic.
    Fault,
}

/// Error raised by the hardware layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct DeviceError {
    pub kind: DeviceErrorKind,
    pub message: String,
}

impl DeviceError {
    pub fn new(kind: DeviceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(DeviceErrorKind::NotFound, message)
    }

    pub fn busy(message: impl Into<String>) -> Self {
        Self::new(DeviceErrorKind::Busy, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(DeviceErrorKind::Rejected, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(DeviceErrorKind::Unsupported, message)
    }

    pub fn fault(message: impl Into<String>) -> Self {
        Self::new(DeviceErrorKind::Fault, message)
    }
}

impl From<DeviceError> for CameraError {
    fn from(err: DeviceError) -> Self {
        match err.kind {
            DeviceErrorKind::NotFound | DeviceErrorKind::Fault => {
                CameraError::NoDeviceAvailable(err.message)
            }
            DeviceErrorKind::Busy => CameraError::DeviceBusy(err.message),
            DeviceErrorKind::PermissionDenied => CameraError::PermissionDenied(err.message),
            DeviceErrorKind::Rejected | DeviceErrorKind::Unsupported => {
                CameraError::InvalidArgument(err.message)
            }
        }
    }
}

/// Run a backend call, turning a panic into a typed [`DeviceError`].
pub(crate) fn catch_device_fault<T>(
    operation: &str,
    f: impl FnOnce() -> Result<T, DeviceError>,
) -> Result<T, DeviceError> {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let detail = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            log::error!("Camera backend panicked during {}: {}", operation, detail);
            Err(DeviceError::fault(format!("{operation} failed: {detail}")))
        }
    }
}
