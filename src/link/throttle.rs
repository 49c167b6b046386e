//! Leading-and-trailing command throttle
//!
//! The first submission in a quiet window fires immediately; submissions
//! inside the window coalesce into a single trailing fire carrying the
//! most recent value, scheduled for the window close. At most one fire
//! per interval, and the final requested value is never dropped — this
//! keeps continuous manual control smooth without saturating the link.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

type Action<T> = Arc<dyn Fn(T) + Send + Sync>;

struct Slot<T> {
    /// Start of the current quiet/busy window
    window_start: Option<Instant>,
    /// Latest coalesced value awaiting the trailing fire
    pending: Option<T>,
    /// A trailing flush task is already scheduled
    trailing_scheduled: bool,
}

/// Rate limiter with leading and trailing fire semantics
pub struct Throttle<T> {
    interval: Duration,
    action: Action<T>,
    slot: Arc<Mutex<Slot<T>>>,
}

impl<T: Send + 'static> Throttle<T> {
    /// Create a throttle invoking `action` for each admitted value
    pub fn new(interval: Duration, action: impl Fn(T) + Send + Sync + 'static) -> Self {
        Self {
            interval,
            action: Arc::new(action),
            slot: Arc::new(Mutex::new(Slot {
                window_start: None,
                pending: None,
                trailing_scheduled: false,
            })),
        }
    }

    /// Submit a value; fires now or coalesces into the trailing fire
    ///
    /// Must be called from within a tokio runtime (the trailing flush is
    /// a spawned timer task).
    pub fn submit(&self, value: T) {
        let now = Instant::now();
        let mut slot = self.slot.lock();

        let window_open = match slot.window_start {
            None => true,
            Some(start) => now.duration_since(start) >= self.interval,
        };

        if window_open && !slot.trailing_scheduled {
            slot.window_start = Some(now);
            drop(slot);
            (self.action)(value);
            return;
        }

        slot.pending = Some(value);
        if !slot.trailing_scheduled {
            slot.trailing_scheduled = true;
            // window_start is always Some here: the window is closed.
            let wake_at = slot.window_start.unwrap_or(now) + self.interval;
            drop(slot);
            self.schedule_flush(wake_at);
        }
    }

    /// Interval between fires
    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn schedule_flush(&self, wake_at: Instant) {
        let slot = Arc::clone(&self.slot);
        let action = Arc::clone(&self.action);
        tokio::spawn(async move {
            tokio::time::sleep_until(tokio::time::Instant::from_std(wake_at)).await;
            let value = {
                let mut slot = slot.lock();
                slot.trailing_scheduled = false;
                slot.window_start = Some(Instant::now());
                slot.pending.take()
            };
            if let Some(value) = value {
                action(value);
            }
        });
    }
}
