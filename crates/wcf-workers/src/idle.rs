//! Idle-quiescence tracking (spec.md §4.3 point 4, §5 `idleThresholdPolls`).

use tokio::sync::watch;

/// Counts consecutive empty polls and flips a [`watch`] channel to `true`
/// once `idle_threshold_polls` is reached in a row — used by tests and
/// scaling signals to detect a worker has drained its queue. Clears the
/// instant a non-empty batch is observed again.
pub struct IdleTracker {
    threshold: u32,
    consecutive_empty: u32,
    sender: watch::Sender<bool>,
}

impl IdleTracker {
    pub fn new(idle_threshold_polls: u32) -> (Self, watch::Receiver<bool>) {
        let (sender, receiver) = watch::channel(false);
        (
            Self {
                threshold: idle_threshold_polls.max(1),
                consecutive_empty: 0,
                sender,
            },
            receiver,
        )
    }

    pub fn record_poll(&mut self, batch_was_empty: bool) {
        self.consecutive_empty = if batch_was_empty {
            self.consecutive_empty.saturating_add(1)
        } else {
            0
        };
        let idle = self.consecutive_empty >= self.threshold;
        // Only errors if every receiver was dropped; not a reason to stop tracking.
        let _ = self.sender.send(idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flips_idle_after_threshold_consecutive_empty_polls() {
        let (mut tracker, rx) = IdleTracker::new(2);
        tracker.record_poll(true);
        assert!(!*rx.borrow());
        tracker.record_poll(true);
        assert!(*rx.borrow());
    }

    #[test]
    fn clears_the_moment_work_resumes() {
        let (mut tracker, rx) = IdleTracker::new(1);
        tracker.record_poll(true);
        assert!(*rx.borrow());
        tracker.record_poll(false);
        assert!(!*rx.borrow());
    }
}
