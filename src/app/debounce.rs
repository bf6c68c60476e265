use std::time::{Duration, Instant};

/// Fires once, `delay` after the most recent [`schedule`](Debouncer::schedule).
#[derive(Debug, Clone)]
pub struct Debouncer {
    delay: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    pub fn schedule(&mut self, now: Instant) {
        self.deadline = Some(now + self.delay);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// True exactly once per scheduled burst, when the deadline has passed.
    pub fn due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    pub fn time_until(&self, now: Instant) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_last_edit_counts() {
        let start = Instant::now();
        let mut debounce = Debouncer::new(Duration::from_millis(250));
        debounce.schedule(start);
        debounce.schedule(start + Duration::from_millis(200));
        assert!(!debounce.due(start + Duration::from_millis(300)));
        assert_eq!(
            debounce.time_until(start + Duration::from_millis(300)),
            Some(Duration::from_millis(150))
        );
        assert!(debounce.due(start + Duration::from_millis(450)));
        assert!(!debounce.due(start + Duration::from_millis(900)));
    }

    #[test]
    fn cancel_clears_deadline() {
        let start = Instant::now();
        let mut debounce = Debouncer::new(Duration::from_millis(10));
        debounce.schedule(start);
        debounce.cancel();
        assert!(!debounce.is_pending());
        assert!(!debounce.due(start + Duration::from_secs(1)));
    }
}
