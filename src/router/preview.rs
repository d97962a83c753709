use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::VideoFrame;

/// Opaque handle a host uses to find its preview surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PreviewSinkId(Uuid);

impl PreviewSinkId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for PreviewSinkId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PreviewSinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

struct SlotInner {
    frame: Option<VideoFrame>,
    generation: u64,
    closed: bool,
}

/// Single-frame mailbox: the writer replaces, readers copy.
///
/// Frame payloads are reference-counted, so a read never blocks the writer
/// for longer than a pointer copy.
pub struct FrameSlot {
    inner: Mutex<SlotInner>,
    ready: Condvar,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SlotInner {
                frame: None,
                generation: 0,
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Replace the held frame. Returns false once the slot is closed.
    pub fn publish(&self, frame: VideoFrame) -> bool {
        let mut g = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if g.closed {
            return false;
        }
        g.frame = Some(frame);
        g.generation += 1;
        self.ready.notify_all();
        true
    }

    pub fn latest(&self) -> Option<VideoFrame> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .frame
            .clone()
    }

    /// Number of frames published so far.
    pub fn generation(&self) -> u64 {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).generation
    }

    /// Wait for a frame newer than generation `seen`.
    ///
    /// Returns the new generation and frame, or `None` on timeout or close.
    pub fn wait_newer(&self, seen: u64, timeout: Duration) -> Option<(u64, VideoFrame)> {
        let deadline = Instant::now() + timeout;
        let mut g = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if g.generation > seen {
                if let Some(frame) = g.frame.clone() {
                    return Some((g.generation, frame));
                }
            }
            if g.closed {
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (ng, _) = self
                .ready
                .wait_timeout(g, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            g = ng;
        }
    }

    /// Drop the held frame and wake every waiter.
    pub fn close(&self) {
        let mut g = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        g.closed = true;
        g.frame = None;
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).closed
    }
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Preview surface: an identifier plus the latest routed frame.
pub struct PreviewSink {
    id: PreviewSinkId,
    slot: FrameSlot,
    dropped_while_paused: AtomicU64,
}

impl PreviewSink {
    pub fn new() -> Self {
        Self {
            id: PreviewSinkId::new(),
            slot: FrameSlot::new(),
            dropped_while_paused: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> PreviewSinkId {
        self.id
    }

    pub fn latest_frame(&self) -> Option<VideoFrame> {
        self.slot.latest()
    }

    pub fn frames_published(&self) -> u64 {
        self.slot.generation()
    }

    pub fn wait_for_frame(&self, after: u64, timeout: Duration) -> Option<(u64, VideoFrame)> {
        self.slot.wait_newer(after, timeout)
    }

    /// Frames withheld from this sink while preview was paused.
    pub fn paused_drops(&self) -> u64 {
        self.dropped_while_paused.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.slot.is_closed()
    }

    pub(crate) fn publish(&self, frame: VideoFrame) -> bool {
        self.slot.publish(frame)
    }

    pub(crate) fn note_paused_drop(&self) {
        self.dropped_while_paused.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn close(&self) {
        self.slot.close();
    }
}

impl Default for PreviewSink {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PreviewSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreviewSink")
            .field("id", &self.id)
            .field("frames_published", &self.frames_published())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::gradient_frame;
    use crate::types::Resolution;
    use std::sync::Arc;

    fn frame(seq: u64) -> VideoFrame {
        gradient_frame(seq, Resolution::new(4, 4), Duration::from_millis(seq * 33))
    }

    #[test]
    fn test_slot_keeps_only_latest() {
        let slot = FrameSlot::new();
        assert!(slot.latest().is_none());
        slot.publish(frame(1));
        slot.publish(frame(2));
        assert_eq!(slot.latest().unwrap().sequence, 2);
        assert_eq!(slot.generation(), 2);
    }

    #[test]
    fn test_reader_copy_survives_overwrite() {
        let slot = FrameSlot::new();
        slot.publish(frame(1));
        let held = slot.latest().unwrap();
        slot.publish(frame(2));
        assert_eq!(held.sequence, 1);
        assert_eq!(held.data.len(), 4 * 4 * 3);
    }

    #[test]
    fn test_wait_newer_wakes_on_publish() {
        let slot = Arc::new(FrameSlot::new());
        let writer = Arc::clone(&slot);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            writer.publish(frame(7));
        });
        let (generation, got) = slot.wait_newer(0, Duration::from_secs(2)).unwrap();
        assert_eq!(generation, 1);
        assert_eq!(got.sequence, 7);
        handle.join().unwrap();
    }

    #[test]
    fn test_close_rejects_and_wakes() {
        let slot = FrameSlot::new();
        slot.publish(frame(1));
        slot.close();
        assert!(slot.latest().is_none());
        assert!(!slot.publish(frame(2)));
        assert!(slot.wait_newer(0, Duration::from_secs(1)).is_none());
    }

    #[test]
    fn test_sink_ids_are_unique() {
        assert_ne!(PreviewSink::new().id(), PreviewSink::new().id());
    }
}
