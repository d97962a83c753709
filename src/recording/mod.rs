//! Recording lifecycle
//!
//! [`RecordingController`] drives one [`EncoderPipeline`](crate::encoder::EncoderPipeline)
//! per recording: it attaches the pipeline to the router, waits until the
//! first frame is actually recorded, arms the optional auto-stop timer and
//! turns finalization into a [`RecordingResult`].

mod controller;
mod output;
mod timer;

pub use controller::{
    AutoStopHook, RecorderPhase, RecordingController, RecordingResult, RecordingSession,
    RecordingStats, StartRequest,
};
pub use output::{prepare_output, recording_file_name};
pub use timer::AutoStopTimer;
