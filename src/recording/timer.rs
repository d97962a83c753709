use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{after, bounded, select, Sender};

use crate::errors::CameraError;

/// One-shot timer that runs a callback unless cancelled first.
///
/// Cancelling never waits for the timer thread; a callback already running
/// is left to finish and must tolerate losing the race.
pub struct AutoStopTimer {
    cancel: Option<Sender<()>>,
    fired: Arc<AtomicBool>,
    duration: Duration,
}

impl AutoStopTimer {
    pub fn arm<F>(duration: Duration, on_fire: F) -> Result<Self, CameraError>
    where
        F: FnOnce() + Send + 'static,
    {
        let (cancel_tx, cancel_rx) = bounded::<()>(1);
        let fired = Arc::new(AtomicBool::new(false));
        let fired_flag = Arc::clone(&fired);

        std::thread::Builder::new()
            .name("reelcam-auto-stop".to_string())
            .spawn(move || {
                select! {
                    recv(cancel_rx) -> _ => {}
                    recv(after(duration)) -> _ => {
                        fired_flag.store(true, Ordering::SeqCst);
                        log::info!("Maximum duration of {} ms reached", duration.as_millis());
                        on_fire();
                    }
                }
            })
            .map_err(|e| CameraError::WriterInitFailed(format!("failed to arm timer: {e}")))?;

        Ok(Self {
            cancel: Some(cancel_tx),
            fired,
            duration,
        })
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    pub fn cancel(mut self) {
        self.disarm();
    }

    fn disarm(&mut self) {
        // dropping the sender disconnects the channel and wakes the thread
        self.cancel.take();
    }
}

impl Drop for AutoStopTimer {
    fn drop(&mut self) {
        self.disarm();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_fires_after_duration() {
        let (tx, rx) = unbounded();
        let timer = AutoStopTimer::arm(Duration::from_millis(20), move || {
            let _ = tx.send(());
        })
        .unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
        assert!(timer.has_fired());
    }

    #[test]
    fn test_cancel_prevents_callback() {
        let (tx, rx) = unbounded::<()>();
        let timer = AutoStopTimer::arm(Duration::from_millis(50), move || {
            let _ = tx.send(());
        })
        .unwrap();
        timer.cancel();
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn test_drop_cancels() {
        let (tx, rx) = unbounded::<()>();
        drop(
            AutoStopTimer::arm(Duration::from_millis(50), move || {
                let _ = tx.send(());
            })
            .unwrap(),
        );
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }
}
