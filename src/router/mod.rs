//! Frame routing from the active device to its consumers
//!
//! Every video frame goes to the preview sink, and to the encoder while a
//! recording is attached. Audio only ever goes to the encoder. While paused
//! nothing is forwarded. Routing runs on the device's producer thread and
//! never blocks on a consumer.

mod preview;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde::Serialize;

use crate::device::{DeviceEvent, FrameSink};
use crate::encoder::EncoderInput;

pub use preview::{FrameSlot, PreviewSink, PreviewSinkId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterStats {
    pub video_frames: u64,
    pub audio_blocks: u64,
    pub preview_published: u64,
    pub encoder_accepted: u64,
    pub encoder_refused: u64,
    pub paused_drops: u64,
    pub device_faults: u64,
}

#[derive(Default)]
struct Counters {
    video_frames: AtomicU64,
    audio_blocks: AtomicU64,
    preview_published: AtomicU64,
    encoder_accepted: AtomicU64,
    encoder_refused: AtomicU64,
    paused_drops: AtomicU64,
    device_faults: AtomicU64,
}

/// Fan-out point installed as the device's [`FrameSink`].
#[derive(Default)]
pub struct FrameRouter {
    preview: RwLock<Option<Arc<PreviewSink>>>,
    encoder: Mutex<Option<EncoderInput>>,
    paused: AtomicBool,
    counters: Counters,
}

impl FrameRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap the preview sink. The old one is closed so its readers wake.
    pub fn set_preview(&self, sink: Option<Arc<PreviewSink>>) {
        let mut guard = self.preview.write().unwrap_or_else(|e| e.into_inner());
        if let Some(old) = guard.take() {
            old.close();
        }
        *guard = sink;
    }

    pub fn preview(&self) -> Option<Arc<PreviewSink>> {
        self.preview
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn attach_encoder(&self, input: EncoderInput) {
        *self.encoder.lock().unwrap_or_else(|e| e.into_inner()) = Some(input);
    }

    pub fn detach_encoder(&self) -> bool {
        self.encoder
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .is_some()
    }

    pub fn has_encoder(&self) -> bool {
        self.encoder
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Stop forwarding anything, to preview and encoder alike.
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> RouterStats {
        let c = &self.counters;
        RouterStats {
            video_frames: c.video_frames.load(Ordering::Relaxed),
            audio_blocks: c.audio_blocks.load(Ordering::Relaxed),
            preview_published: c.preview_published.load(Ordering::Relaxed),
            encoder_accepted: c.encoder_accepted.load(Ordering::Relaxed),
            encoder_refused: c.encoder_refused.load(Ordering::Relaxed),
            paused_drops: c.paused_drops.load(Ordering::Relaxed),
            device_faults: c.device_faults.load(Ordering::Relaxed),
        }
    }

    fn count_offer(&self, accepted: bool) {
        if accepted {
            self.counters.encoder_accepted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.encoder_refused.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl FrameSink for FrameRouter {
    fn deliver(&self, event: DeviceEvent) {
        match event {
            DeviceEvent::Video(frame) => {
                self.counters.video_frames.fetch_add(1, Ordering::Relaxed);
                if self.is_paused() {
                    self.counters.paused_drops.fetch_add(1, Ordering::Relaxed);
                    if let Some(sink) = self.preview().as_ref() {
                        sink.note_paused_drop();
                    }
                    return;
                }

                if let Some(input) = self
                    .encoder
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .as_ref()
                {
                    let accepted = input.offer_video(frame.clone());
                    self.count_offer(accepted);
                }

                let preview = self.preview.read().unwrap_or_else(|e| e.into_inner());
                if let Some(sink) = preview.as_ref() {
                    if sink.publish(frame) {
                        self.counters.preview_published.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            DeviceEvent::Audio(samples) => {
                self.counters.audio_blocks.fetch_add(1, Ordering::Relaxed);
                if self.is_paused() {
                    self.counters.paused_drops.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                if let Some(input) = self
                    .encoder
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .as_ref()
                {
                    let accepted = input.offer_audio(samples);
                    self.count_offer(accepted);
                }
            }
            DeviceEvent::Fault(err) => {
                self.counters.device_faults.fetch_add(1, Ordering::Relaxed);
                log::error!("Camera stream fault: {}", err);
            }
        }
    }
}
