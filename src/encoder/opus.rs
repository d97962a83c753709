//! Opus audio encoding over libopus
//!
//! # Spell: AudioTrackOpus
//! ^ Intent: turn rebased PCM blocks into Opus packets for the MP4 audio track
//!
//! @OpusEncoder
//!
//! - pcm_block -> opus_packets
//! - packets_are_20ms
//! - pts_follows_samples_encoded
//! - gap_restarts_packet_clock
//! - flush_pads_with_silence
//! - requires_48khz
//! - no resampling

use std::time::Duration;

use super::writer::WriterError;
use crate::types::AudioSamples;

/// 20 ms at 48 kHz, per channel.
const OPUS_FRAME_SAMPLES: usize = 960;

/// OPUS_APPLICATION_AUDIO from opus.h
const OPUS_APPLICATION_AUDIO: i32 = 2049;

/// Largest packet libopus is asked to produce.
const MAX_PACKET_BYTES: usize = 4000;

/// A block starting later than this past the running timeline restarts it.
const MAX_TIMELINE_GAP: Duration = Duration::from_millis(5);

#[derive(Debug, Clone)]
pub struct EncodedAudio {
    pub data: Vec<u8>,
    /// Recorded time of the packet's first sample.
    pub pts: Duration,
}

/// Opus encoder fed with interleaved f32 PCM
///
/// Owned by the encoder thread for its whole life; never shared.
pub struct OpusEncoder {
    encoder: *mut libopus_sys::OpusEncoder,
    channels: u16,
    sample_rate: u32,
    pending: Vec<f32>,
    first_pts: Option<Duration>,
    frames_encoded: u64,
}

// SAFETY: the libopus state is only touched through &mut self, and the type
// is not Sync, so it is used from one thread at a time.
unsafe impl Send for OpusEncoder {}

impl OpusEncoder {
    pub fn new(sample_rate: u32, channels: u16, bitrate: u32) -> Result<Self, WriterError> {
        if sample_rate != 48_000 {
            return Err(WriterError::Encoding(format!(
                "Opus requires 48000 Hz, got {sample_rate}"
            )));
        }
        if channels != 1 && channels != 2 {
            return Err(WriterError::Encoding(format!(
                "Opus supports mono or stereo, got {channels} channels"
            )));
        }

        let mut error: i32 = 0;
        let encoder = unsafe {
            libopus_sys::opus_encoder_create(
                sample_rate as i32,
                channels as i32,
                OPUS_APPLICATION_AUDIO,
                &mut error,
            )
        };
        if encoder.is_null() || error != 0 {
            return Err(WriterError::Encoding(format!(
                "Failed to create Opus encoder: error code {}",
                error
            )));
        }

        let result = unsafe {
            libopus_sys::opus_encoder_ctl(
                encoder,
                libopus_sys::OPUS_SET_BITRATE_REQUEST as i32,
                bitrate as i32,
            )
        };
        if result != 0 {
            unsafe { libopus_sys::opus_encoder_destroy(encoder) };
            return Err(WriterError::Encoding(format!(
                "Failed to set Opus bitrate: error code {}",
                result
            )));
        }

        Ok(Self {
            encoder,
            channels,
            sample_rate,
            pending: Vec::with_capacity(OPUS_FRAME_SAMPLES * channels as usize * 2),
            first_pts: None,
            frames_encoded: 0,
        })
    }

    /// Buffer `block` and encode every complete 20 ms frame.
    pub fn encode(
        &mut self,
        block: &AudioSamples,
        pts: Duration,
    ) -> Result<Vec<EncodedAudio>, WriterError> {
        if block.sample_rate != self.sample_rate || block.channels != self.channels {
            return Err(WriterError::Rejected(format!(
                "audio format {} Hz x{} does not match track {} Hz x{}",
                block.sample_rate, block.channels, self.sample_rate, self.channels
            )));
        }
        if block.samples.is_empty() {
            return Ok(Vec::new());
        }

        let mut packets = Vec::new();
        match self.timeline_end() {
            None => self.restart_at(pts),
            Some(end) if pts > end + MAX_TIMELINE_GAP => {
                log::debug!("Audio gap of {:?} at {:?}", pts - end, pts);
                packets = self.flush()?;
                self.restart_at(pts);
            }
            // Overlap keeps the running timeline so packet pts never go backwards
            Some(_) => {}
        }

        self.pending.extend_from_slice(&block.samples);
        packets.extend(self.drain_frames()?);
        Ok(packets)
    }

    /// Recorded time just past the last buffered sample.
    fn timeline_end(&self) -> Option<Duration> {
        let base = self.first_pts?;
        let frames = self.frames_encoded + (self.pending.len() / self.channels as usize) as u64;
        Some(base + Duration::from_nanos(frames * 1_000_000_000 / self.sample_rate as u64))
    }

    fn restart_at(&mut self, pts: Duration) {
        self.first_pts = Some(pts);
        self.frames_encoded = 0;
    }

    /// Pad the tail with silence and encode it.
    pub fn flush(&mut self) -> Result<Vec<EncodedAudio>, WriterError> {
        let frame_len = OPUS_FRAME_SAMPLES * self.channels as usize;
        let remainder = self.pending.len() % frame_len;
        if remainder != 0 {
            self.pending.resize(self.pending.len() + frame_len - remainder, 0.0);
        }
        self.drain_frames()
    }

    fn drain_frames(&mut self) -> Result<Vec<EncodedAudio>, WriterError> {
        let frame_len = OPUS_FRAME_SAMPLES * self.channels as usize;
        let base = self.first_pts.unwrap_or(Duration::ZERO);
        let mut packets = Vec::new();

        while self.pending.len() >= frame_len {
            let mut output = vec![0u8; MAX_PACKET_BYTES];
            let len = unsafe {
                libopus_sys::opus_encode_float(
                    self.encoder,
                    self.pending.as_ptr(),
                    OPUS_FRAME_SAMPLES as i32,
                    output.as_mut_ptr(),
                    output.len() as i32,
                )
            };
            if len < 0 {
                return Err(WriterError::Encoding(format!(
                    "Opus encoding failed: error code {}",
                    len
                )));
            }
            self.pending.drain(..frame_len);
            output.truncate(len as usize);

            let offset =
                Duration::from_nanos(self.frames_encoded * 1_000_000_000 / self.sample_rate as u64);
            packets.push(EncodedAudio {
                data: output,
                pts: base + offset,
            });
            self.frames_encoded += OPUS_FRAME_SAMPLES as u64;
        }

        Ok(packets)
    }
}

impl Drop for OpusEncoder {
    fn drop(&mut self) {
        if !self.encoder.is_null() {
            unsafe { libopus_sys::opus_encoder_destroy(self.encoder) };
        }
    }
}
