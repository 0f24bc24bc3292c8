use std::time::Duration;

/// One-shot software timer driven by the scheduler tick
#[derive(Debug, Default, Clone)]
pub struct SoftTimer {
    deadline: Option<Duration>,
}

impl SoftTimer {
    pub fn new() -> SoftTimer {
        SoftTimer { deadline: None }
    }

    pub fn arm(&mut self, now: Duration, duration: Duration) {
        self.deadline = Some(now + duration);
    }

    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    /// True once if the deadline has passed. The timer is disarmed when it fires.
    pub fn fire(&mut self, now: Duration) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::SoftTimer;
    use std::time::Duration;

    #[test]
    fn fires_once_at_deadline() {
        let mut timer = SoftTimer::new();
        assert!(!timer.fire(Duration::from_millis(10)));
        timer.arm(Duration::from_millis(10), Duration::from_millis(4));
        assert!(!timer.fire(Duration::from_millis(13)));
        assert!(timer.fire(Duration::from_millis(14)));
        assert!(!timer.is_armed());
        assert!(!timer.fire(Duration::from_millis(20)));
    }
}
