//! H.264 video encoding via openh264

use openh264::encoder::{Encoder, FrameType};
use openh264::formats::YUVBuffer;

use super::writer::WriterError;
use crate::types::Resolution;

/// H.264 encoder for fixed-size RGB24 frames
pub struct H264Encoder {
    encoder: Encoder,
    size: Resolution,
    keyframe_every: u64,
    frame_count: u64,
}

/// One encoded access unit in Annex B form
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub data: Vec<u8>,
    pub is_keyframe: bool,
}

impl H264Encoder {
    /// `frame_rate` and `keyframe_interval_secs` set how often an intra
    /// frame is forced; dimensions must be even.
    pub fn new(
        size: Resolution,
        frame_rate: u32,
        keyframe_interval_secs: u32,
    ) -> Result<Self, WriterError> {
        if size.width == 0 || size.height == 0 || size.width % 2 != 0 || size.height % 2 != 0 {
            return Err(WriterError::Encoding(format!(
                "H.264 needs non-zero even dimensions, got {size}"
            )));
        }

        let encoder = Encoder::new()
            .map_err(|e| WriterError::Encoding(format!("Failed to create encoder: {}", e)))?;

        Ok(Self {
            encoder,
            size,
            keyframe_every: (frame_rate as u64 * keyframe_interval_secs as u64).max(1),
            frame_count: 0,
        })
    }

    pub fn encode_rgb(&mut self, rgb: &[u8]) -> Result<EncodedFrame, WriterError> {
        let expected = self.size.pixel_count() as usize * 3;
        if rgb.len() != expected {
            return Err(WriterError::Rejected(format!(
                "expected {} bytes of RGB24, got {}",
                expected,
                rgb.len()
            )));
        }

        if self.frame_count > 0 && self.frame_count % self.keyframe_every == 0 {
            self.encoder.force_intra_frame();
        }

        let yuv = rgb_to_yuv420(rgb, self.size.width, self.size.height);
        let buffer = YUVBuffer::from_vec(yuv, self.size.width as usize, self.size.height as usize);
        let bitstream = self
            .encoder
            .encode(&buffer)
            .map_err(|e| WriterError::Encoding(format!("Encoding failed: {}", e)))?;

        self.frame_count += 1;
        let is_keyframe = matches!(bitstream.frame_type(), FrameType::IDR | FrameType::I);

        Ok(EncodedFrame {
            data: bitstream.to_vec(),
            is_keyframe,
        })
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }
}

/// RGB24 to planar YUV 4:2:0, BT.601 studio range. Chroma is the mean of
/// each 2x2 block, so fine colour detail does not alias.
pub(crate) fn rgb_to_yuv420(rgb: &[u8], width: u32, height: u32) -> Vec<u8> {
    let (w, h) = (width as usize, height as usize);
    let (cw, ch) = (w / 2, h / 2);
    let mut yuv = vec![0u8; w * h + 2 * cw * ch];
    let (luma, chroma) = yuv.split_at_mut(w * h);
    let (cb, cr) = chroma.split_at_mut(cw * ch);

    for (out, px) in luma.iter_mut().zip(rgb.chunks_exact(3)) {
        let (r, g, b) = (px[0] as i32, px[1] as i32, px[2] as i32);
        *out = to_u8(((66 * r + 129 * g + 25 * b + 128) >> 8) + 16);
    }

    let pixel = |x: usize, y: usize| {
        let i = (y * w + x) * 3;
        [rgb[i] as i32, rgb[i + 1] as i32, rgb[i + 2] as i32]
    };
    for by in 0..ch {
        for bx in 0..cw {
            let mut sum = [0i32; 3];
            for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                let px = pixel(bx * 2 + dx, by * 2 + dy);
                for c in 0..3 {
                    sum[c] += px[c];
                }
            }
            let [r, g, b] = sum.map(|v| (v + 2) / 4);
            cb[by * cw + bx] = to_u8(((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128);
            cr[by * cw + bx] = to_u8(((112 * r - 94 * g - 18 * b + 128) >> 8) + 128);
        }
    }

    yuv
}

fn to_u8(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}
