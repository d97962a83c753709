//! Container writer seam
//!
//! The pipeline only talks to [`MediaWriter`]; [`WriterFactory`] builds one
//! per recording on the encoder thread.

use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::types::{AudioSamples, Resolution, VideoFrame};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriterError {
    #[error("I/O error: {0}")]
    Io(String),
    #[error("Encoding error: {0}")]
    Encoding(String),
    #[error("Muxing error: {0}")]
    Muxing(String),
    #[error("Sample rejected: {0}")]
    Rejected(String),
}

/// Video track parameters. Frames must match `size` exactly.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VideoTrack {
    pub size: Resolution,
    pub frame_rate: u32,
    pub bitrate: u32,
    pub keyframe_interval_secs: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AudioTrack {
    pub sample_rate: u32,
    pub channels: u16,
    pub bitrate: u32,
}

/// Track layout for one output file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrackLayout {
    pub video: VideoTrack,
    /// `None` writes a video-only file.
    pub audio: Option<AudioTrack>,
}

/// Totals reported by a writer once its container is closed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriterStats {
    pub width: u32,
    pub height: u32,
    pub video_frames: u64,
    pub audio_frames: u64,
    pub duration_secs: f64,
    pub bytes_written: u64,
}

/// Sink for timestamped samples. `pts` is relative to the recording origin.
pub trait MediaWriter {
    fn write_video(&mut self, frame: &VideoFrame, pts: Duration) -> Result<(), WriterError>;

    fn write_audio(&mut self, samples: &AudioSamples, pts: Duration) -> Result<(), WriterError>;

    /// Flush and close the container.
    fn finish(self: Box<Self>) -> Result<WriterStats, WriterError>;

    /// Drop everything written so far, removing any partial output.
    fn abort(self: Box<Self>);
}

/// Builds a writer for one output file.
pub trait WriterFactory: Send + Sync {
    fn create(&self, target: &Path, layout: TrackLayout)
        -> Result<Box<dyn MediaWriter>, WriterError>;
}
