//! Reelcam: camera capture and recording engine
//!
//! Owns one camera device at a time, fans its frames out to a live preview
//! sink and, while recording, to an encoder that writes an MP4 file.
//! Runtime controls (lens switch, zoom, focus and exposure points, flash)
//! and an optional maximum recording duration are exposed through
//! [`CameraEngine`].
//!
//! # Features
//! - Device session lifecycle over a pluggable [`CameraBackend`]
//! - Latest-frame preview hand-off, independent of recording
//! - H.264 video (and Opus audio with the `audio` feature) muxed to MP4
//! - Auto-stop after a maximum duration with a completion callback
//! - A synthetic backend for offline testing
//!
//! # Usage
//! ```rust,no_run
//! use std::sync::Arc;
//! use reelcam::{CameraEngine, LensFacing, QualityPreset, SyntheticBackend};
//!
//! # fn main() -> Result<(), reelcam::CameraError> {
//! let engine = CameraEngine::builder()
//!     .backend(Arc::new(SyntheticBackend::new()))
//!     .on_recording_auto_stopped(|result| println!("saved {}", result.file_path))
//!     .build()?;
//!
//! engine.initialize(LensFacing::Back, QualityPreset::Hd)?;
//! engine.start_recording(Some(5_000))?;
//! # Ok(())
//! # }
//! ```
pub mod commands;
pub mod config;
pub mod device;
pub mod encoder;
pub mod engine;
pub mod errors;
pub mod permissions;
pub mod recording;
pub mod router;
pub mod snapshot;
pub mod timing;
pub mod types;

// Re-exports for convenience
pub use commands::{dispatch, Command, CommandError};
pub use config::EngineConfig;
pub use device::{CameraBackend, CameraDevice, SyntheticBackend, SyntheticProfile};
pub use engine::{CameraEngine, EngineBuilder};
pub use errors::{CameraError, ErrorKind};
pub use permissions::PermissionStatus;
pub use recording::{RecordingResult, RecordingSession, RecordingStats};
pub use router::{PreviewSink, PreviewSinkId};
pub use snapshot::CameraSnapshot;
pub use types::{FlashMode, LensFacing, QualityPreset, Resolution, VideoFrame};

/// Initialize logging for the engine
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "reelcam=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

#[cfg(test)]
mod lib_tests {
    use super::*;

    #[test]
    fn test_crate_info() {
        assert_eq!(NAME, "reelcam");
        assert!(!VERSION.is_empty());
        assert!(!DESCRIPTION.is_empty());
    }
}
