use core::time::Duration;

use super::TelemetryInstant;

/// Rate limiter for repetitive log lines (e.g. "buffer full, waiting to send").
#[derive(Clone, Copy, Debug)]
pub struct LogThrottle<TInstant> {
    interval: Duration,
    last_emitted: Option<TInstant>,
}

impl<TInstant> LogThrottle<TInstant>
where
    TInstant: TelemetryInstant,
{
    /// Creates a throttle that allows one emission per `interval`.
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emitted: None,
        }
    }

    /// Returns `true` (and arms the throttle) when the caller may log at `now`.
    pub fn should_emit(&mut self, now: TInstant) -> bool {
        let due = match self.last_emitted {
            None => true,
            Some(previous) => now.saturating_duration_since(previous) >= self.interval,
        };

        if due {
            self.last_emitted = Some(now);
        }
        due
    }

    /// Forgets the last emission so the next call is allowed immediately.
    pub fn reset(&mut self) {
        self.last_emitted = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Copy, Clone, Debug)]
    struct Millis(u64);

    impl TelemetryInstant for Millis {
        fn saturating_duration_since(&self, earlier: Self) -> Duration {
            Duration::from_millis(self.0.saturating_sub(earlier.0))
        }
    }

    #[test]
    fn emits_at_most_once_per_interval() {
        let mut throttle = LogThrottle::new(Duration::from_secs(1));
        assert!(throttle.should_emit(Millis(0)));
        assert!(!throttle.should_emit(Millis(10)));
        assert!(!throttle.should_emit(Millis(999)));
        assert!(throttle.should_emit(Millis(1_000)));
        assert!(!throttle.should_emit(Millis(1_500)));

        throttle.reset();
        assert!(throttle.should_emit(Millis(1_501)));
    }
}
