//! Keepalive scheduling.
//!
//! A single idle deadline, pushed back on every outbound frame. When it
//! passes, the driver sends the empty probe frame and arms a reply timer
//! under the empty key; a dead connection then shows up as a timeout.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug)]
pub(crate) struct Prober {
    interval: Duration,
    deadline: Option<Instant>,
}

impl Prober {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            deadline: None,
        }
    }

    /// Restart the idle countdown from `now`.
    pub fn reset(&mut self, now: Instant) {
        self.deadline = Some(now + self.interval);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Consume the deadline if it has passed.
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_pushes_deadline_back() {
        let mut prober = Prober::new(Duration::from_secs(60));
        let start = Instant::now();
        assert_eq!(prober.deadline(), None);

        prober.reset(start);
        prober.reset(start + Duration::from_secs(30));
        assert_eq!(prober.deadline(), Some(start + Duration::from_secs(90)));

        assert!(!prober.take_due(start + Duration::from_secs(60)));
        assert!(prober.take_due(start + Duration::from_secs(90)));
        assert_eq!(prober.deadline(), None);
    }

    #[test]
    fn test_cancel() {
        let mut prober = Prober::new(Duration::from_secs(60));
        let start = Instant::now();
        prober.reset(start);
        prober.cancel();
        assert!(!prober.take_due(start + Duration::from_secs(120)));
    }
}
