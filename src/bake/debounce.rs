use std::time::{Duration, Instant};

/// Single-shot quiet-period timer. Re-arming replaces the deadline; it never stacks.
///
/// Time is passed in explicitly so callers (and tests) control the clock.
#[derive(Debug, Clone)]
pub struct Debouncer {
    interval: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            deadline: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn arm(&mut self, now: Instant) {
        self.deadline = Some(now + self.interval);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Fire at most once per arming: true when the deadline has passed, disarming it.
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    pub fn time_until(&self, now: Instant) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rearming_pushes_deadline() {
        let t0 = Instant::now();
        let mut d = Debouncer::new(Duration::from_millis(100));
        d.arm(t0);
        d.arm(t0 + Duration::from_millis(80));
        assert!(!d.take_due(t0 + Duration::from_millis(120)));
        assert!(d.take_due(t0 + Duration::from_millis(180)));
        assert!(!d.take_due(t0 + Duration::from_millis(500)));
        assert!(!d.is_armed());
    }
}
