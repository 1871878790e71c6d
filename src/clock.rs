use std::sync::Mutex;

use time::OffsetDateTime;

/// Source of the current time for scheduling and history dates
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Clock that only moves when told to
pub struct ManualClock {
    now: Mutex<OffsetDateTime>,
}

impl ManualClock {
    pub fn new(now: OffsetDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: OffsetDateTime) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: time::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod test {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn manual_clock_moves_on_request() {
        let clock = ManualClock::new(datetime!(2026-01-19 12:00 UTC));
        assert_eq!(clock.now(), datetime!(2026-01-19 12:00 UTC));

        clock.advance(time::Duration::hours(25));
        assert_eq!(clock.now(), datetime!(2026-01-20 13:00 UTC));

        clock.set(datetime!(2025-12-31 00:00 UTC));
        assert_eq!(clock.now(), datetime!(2025-12-31 00:00 UTC));
    }
}
