//! MP4 writer: openh264 video muxed with muxide
//!
//! With the `audio` feature (on by default) the audio track is Opus; without
//! it the file is video-only and audio blocks are counted and discarded.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[cfg(feature = "audio")]
use muxide::api::AudioCodec;
use muxide::api::{Metadata, Muxer, MuxerBuilder, VideoCodec};

use super::h264::H264Encoder;
#[cfg(feature = "audio")]
use super::opus::{EncodedAudio, OpusEncoder};
use super::writer::{MediaWriter, TrackLayout, WriterError, WriterFactory, WriterStats};
use crate::types::{AudioSamples, VideoFrame};

/// Writes one `.mp4` file per recording.
pub struct Mp4Writer {
    path: PathBuf,
    layout: TrackLayout,
    encoder: H264Encoder,
    muxer: Muxer<BufWriter<File>>,
    #[cfg(feature = "audio")]
    audio: Option<OpusEncoder>,
    first_video: Option<Duration>,
    skipped_video: u64,
    discarded_audio: u64,
}

impl Mp4Writer {
    pub fn create(path: &Path, layout: TrackLayout, title: &str) -> Result<Self, WriterError> {
        let video = layout.video;
        let encoder = H264Encoder::new(video.size, video.frame_rate, video.keyframe_interval_secs)?;

        let file = File::create(path)
            .map_err(|e| WriterError::Io(format!("Failed to create {}: {}", path.display(), e)))?;

        #[allow(unused_mut)]
        let mut builder = MuxerBuilder::new(BufWriter::new(file))
            .video(
                VideoCodec::H264,
                video.size.width,
                video.size.height,
                video.frame_rate as f64,
            )
            .with_fast_start(true)
            .with_metadata(Metadata::new().with_title(title).with_current_time());

        #[cfg(feature = "audio")]
        let audio = match layout.audio {
            Some(track) => {
                builder = builder.audio(AudioCodec::Opus, track.sample_rate, track.channels);
                Some(OpusEncoder::new(track.sample_rate, track.channels, track.bitrate)?)
            }
            None => None,
        };
        #[cfg(not(feature = "audio"))]
        if layout.audio.is_some() {
            log::info!("Built without the audio feature; writing a video-only file");
        }

        let muxer = builder.build().map_err(|e| {
            let _ = std::fs::remove_file(path);
            WriterError::Muxing(format!("Failed to create muxer: {}", e))
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            layout,
            encoder,
            muxer,
            #[cfg(feature = "audio")]
            audio,
            first_video: None,
            skipped_video: 0,
            discarded_audio: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mux encoded audio, holding back anything before the first muxed
    /// video frame (the container refuses it).
    #[cfg(feature = "audio")]
    fn mux_audio(&mut self, packets: Vec<EncodedAudio>) -> Result<(), WriterError> {
        for packet in packets {
            match self.first_video {
                Some(first) if packet.pts >= first => {}
                _ => {
                    self.discarded_audio += 1;
                    continue;
                }
            }
            self.muxer
                .write_audio(packet.pts.as_secs_f64(), &packet.data)
                .map_err(|e| WriterError::Muxing(format!("Failed to write audio: {}", e)))?;
        }
        Ok(())
    }
}

impl MediaWriter for Mp4Writer {
    fn write_video(&mut self, frame: &VideoFrame, pts: Duration) -> Result<(), WriterError> {
        if frame.resolution() != self.layout.video.size {
            return Err(WriterError::Rejected(format!(
                "frame is {}, track is {}",
                frame.resolution(),
                self.layout.video.size
            )));
        }

        let encoded = self.encoder.encode_rgb(&frame.data)?;
        if encoded.data.is_empty() {
            // the encoder may skip a frame for rate control
            self.skipped_video += 1;
            return Ok(());
        }

        self.muxer
            .write_video(pts.as_secs_f64(), &encoded.data, encoded.is_keyframe)
            .map_err(|e| WriterError::Muxing(format!("Failed to write video: {}", e)))?;
        self.first_video.get_or_insert(pts);
        Ok(())
    }

    #[cfg(feature = "audio")]
    fn write_audio(&mut self, samples: &AudioSamples, pts: Duration) -> Result<(), WriterError> {
        let Some(encoder) = self.audio.as_mut() else {
            self.discarded_audio += 1;
            return Ok(());
        };
        let packets = encoder.encode(samples, pts)?;
        self.mux_audio(packets)
    }

    #[cfg(not(feature = "audio"))]
    fn write_audio(&mut self, _samples: &AudioSamples, _pts: Duration) -> Result<(), WriterError> {
        self.discarded_audio += 1;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<WriterStats, WriterError> {
        #[allow(unused_mut)]
        let mut this = *self;

        #[cfg(feature = "audio")]
        if let Some(encoder) = this.audio.as_mut() {
            let packets = encoder.flush()?;
            this.mux_audio(packets)?;
        }

        if this.skipped_video > 0 || this.discarded_audio > 0 {
            log::debug!(
                "{}: {} video frames skipped by the encoder, {} audio blocks discarded",
                this.path.display(),
                this.skipped_video,
                this.discarded_audio
            );
        }

        let stats = this
            .muxer
            .finish_with_stats()
            .map_err(|e| WriterError::Muxing(format!("Failed to finalize: {}", e)))?;

        Ok(WriterStats {
            width: this.layout.video.size.width,
            height: this.layout.video.size.height,
            video_frames: stats.video_frames,
            audio_frames: stats.audio_frames,
            duration_secs: stats.duration_secs,
            bytes_written: stats.bytes_written,
        })
    }

    fn abort(self: Box<Self>) {
        let path = self.path.clone();
        drop(self);
        if let Err(e) = std::fs::remove_file(&path) {
            log::warn!("Could not remove partial recording {}: {}", path.display(), e);
        }
    }
}

/// Default [`WriterFactory`]: H.264 in MP4.
#[derive(Debug, Clone)]
pub struct Mp4WriterFactory {
    title: String,
}

impl Mp4WriterFactory {
    pub fn new() -> Self {
        Self {
            title: format!("{} recording", crate::NAME),
        }
    }

    pub fn with_title(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
        }
    }
}

impl Default for Mp4WriterFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl WriterFactory for Mp4WriterFactory {
    fn create(
        &self,
        target: &Path,
        layout: TrackLayout,
    ) -> Result<Box<dyn MediaWriter>, WriterError> {
        Ok(Box::new(Mp4Writer::create(target, layout, &self.title)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::gradient_frame;
    use crate::encoder::writer::{AudioTrack, VideoTrack};
    use crate::types::Resolution;

    fn layout(size: Resolution) -> TrackLayout {
        TrackLayout {
            video: VideoTrack {
                size,
                frame_rate: 30,
                bitrate: 1_000_000,
                keyframe_interval_secs: 1,
            },
            audio: Some(AudioTrack {
                sample_rate: 48_000,
                channels: 1,
                bitrate: 64_000,
            }),
        }
    }

    #[test]
    fn test_write_and_finish() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        let size = Resolution::new(160, 120);
        let mut writer: Box<dyn MediaWriter> =
            Box::new(Mp4Writer::create(&path, layout(size), "test").unwrap());

        for i in 0..10u64 {
            let pts = Duration::from_millis(i * 33);
            writer
                .write_video(&gradient_frame(i, size, pts), pts)
                .unwrap();
        }
        let stats = writer.finish().unwrap();
        assert_eq!((stats.width, stats.height), (160, 120));
        assert!(stats.video_frames > 0);
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }

    #[cfg(feature = "audio")]
    fn tone(pts: Duration, frames: usize) -> AudioSamples {
        AudioSamples {
            timestamp: pts,
            sample_rate: 48_000,
            channels: 1,
            samples: (0..frames).map(|i| (i as f32 * 0.05).sin() * 0.3).collect(),
        }
    }

    #[cfg(feature = "audio")]
    #[test]
    fn test_audio_track_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        let size = Resolution::new(160, 120);
        let mut writer: Box<dyn MediaWriter> =
            Box::new(Mp4Writer::create(&path, layout(size), "test").unwrap());

        for i in 0..10u64 {
            let pts = Duration::from_millis(i * 33);
            writer
                .write_video(&gradient_frame(i, size, pts), pts)
                .unwrap();
        }
        for i in 0..15u64 {
            writer
                .write_audio(&tone(Duration::ZERO, 960), Duration::from_millis(i * 20))
                .unwrap();
        }
        let stats = writer.finish().unwrap();
        assert!(stats.audio_frames >= 15);

        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.windows(4).any(|w| w == b"soun"));
    }

    #[cfg(feature = "audio")]
    #[test]
    fn test_audio_before_any_video_is_held_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        let size = Resolution::new(160, 120);
        let mut writer = Mp4Writer::create(&path, layout(size), "test").unwrap();

        writer
            .write_audio(&tone(Duration::ZERO, 960), Duration::ZERO)
            .unwrap();
        assert_eq!(writer.discarded_audio, 1);

        writer
            .write_video(&gradient_frame(0, size, Duration::ZERO), Duration::ZERO)
            .unwrap();
        writer
            .write_audio(&tone(Duration::ZERO, 960), Duration::from_millis(20))
            .unwrap();
        assert_eq!(writer.discarded_audio, 1);
    }

    #[test]
    fn test_wrong_size_frame_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        let mut writer =
            Mp4Writer::create(&path, layout(Resolution::new(160, 120)), "test").unwrap();
        let frame = gradient_frame(0, Resolution::new(120, 160), Duration::ZERO);
        assert!(matches!(
            writer.write_video(&frame, Duration::ZERO),
            Err(WriterError::Rejected(_))
        ));
    }

    #[test]
    fn test_abort_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        let writer = Mp4Writer::create(&path, layout(Resolution::new(160, 120)), "test").unwrap();
        assert!(path.exists());
        Box::new(writer).abort();
        assert!(!path.exists());
    }

    #[test]
    fn test_unwritable_target_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("clip.mp4");
        let result = Mp4WriterFactory::new().create(&path, layout(Resolution::new(160, 120)));
        assert!(matches!(result, Err(WriterError::Io(_))));
    }
}
