//! Encoding pipeline and container writers
//!
//! [`EncoderPipeline`] owns the worker thread and timestamp rules. Anything
//! implementing [`MediaWriter`] can sit behind it; the default is the MP4
//! writer built on openh264 and muxide.

mod pipeline;
mod writer;

#[cfg(feature = "recording")]
mod h264;
#[cfg(feature = "recording")]
mod mp4;
#[cfg(feature = "audio")]
mod opus;

pub use pipeline::{
    EncoderInput, EncoderPipeline, OriginGate, PipelineCounters, PipelineEvent, PipelineReport,
    WriterState,
};
pub use writer::{
    AudioTrack, MediaWriter, TrackLayout, VideoTrack, WriterError, WriterFactory, WriterStats,
};

#[cfg(feature = "recording")]
pub use h264::{EncodedFrame, H264Encoder};
#[cfg(feature = "recording")]
pub use mp4::{Mp4Writer, Mp4WriterFactory};
#[cfg(feature = "audio")]
pub use opus::{EncodedAudio, OpusEncoder};
