//! Fixed-rate tick pacing.
//!
//! Ticks are due on a fixed grid of deadlines. After a stall the loop runs up
//! to `max_catch_up` ticks back-to-back; any backlog beyond that is dropped
//! rather than trying to catch up with dozens of ticks.

use std::time::{Duration, Instant};

use tracing::warn;

/// Deadline tracker for a fixed tick rate.
pub struct TickLoop {
    interval: Duration,
    max_catch_up: u32,
    next_deadline: Instant,
    skipped: u64,
}

impl TickLoop {
    /// Creates a loop whose first tick is due at `start`.
    pub fn new(interval: Duration, max_catch_up: u32, start: Instant) -> Self {
        Self {
            interval,
            max_catch_up: max_catch_up.max(1),
            next_deadline: start,
            skipped: 0,
        }
    }

    /// Tick interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Instant the next tick is due.
    pub fn next_deadline(&self) -> Instant {
        self.next_deadline
    }

    /// Total ticks dropped from backlogs.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Returns how many ticks to run at `now` and advances the deadline past
    /// them.
    pub fn due_ticks(&mut self, now: Instant) -> u32 {
        if now < self.next_deadline {
            return 0;
        }
        let interval = self.interval.as_nanos().max(1);
        let behind = (now - self.next_deadline).as_nanos() / interval + 1;
        let due = behind.min(u128::from(self.max_catch_up)) as u32;

        if behind > u128::from(due) {
            let dropped = (behind - u128::from(due)) as u64;
            warn!(
                "Tick loop {} ticks behind, running {} and dropping {}",
                behind, due, dropped
            );
            self.skipped += dropped;
            self.next_deadline = now + self.interval;
        } else {
            self.next_deadline += self.interval * due;
        }
        due
    }

    /// Time left until the next tick is due.
    pub fn time_until_next(&self, now: Instant) -> Duration {
        self.next_deadline.saturating_duration_since(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_millis(50);

    #[test]
    fn test_on_time_ticks_one_at_a_time() {
        let start = Instant::now();
        let mut tick_loop = TickLoop::new(INTERVAL, 5, start);

        assert_eq!(tick_loop.due_ticks(start), 1);
        assert_eq!(tick_loop.due_ticks(start + Duration::from_millis(10)), 0);
        assert_eq!(tick_loop.time_until_next(start + Duration::from_millis(10)), Duration::from_millis(40));
        assert_eq!(tick_loop.due_ticks(start + INTERVAL), 1);
        assert_eq!(tick_loop.next_deadline(), start + INTERVAL * 2);
    }

    #[test]
    fn test_short_stall_catches_up() {
        let start = Instant::now();
        let mut tick_loop = TickLoop::new(INTERVAL, 5, start);
        assert_eq!(tick_loop.due_ticks(start), 1);

        // Three intervals late: run the missed ticks plus the current one.
        assert_eq!(tick_loop.due_ticks(start + INTERVAL * 3), 3);
        assert_eq!(tick_loop.next_deadline(), start + INTERVAL * 4);
        assert_eq!(tick_loop.skipped(), 0);
    }

    #[test]
    fn test_long_stall_drops_backlog() {
        let start = Instant::now();
        let mut tick_loop = TickLoop::new(INTERVAL, 2, start);
        assert_eq!(tick_loop.due_ticks(start), 1);

        let now = start + INTERVAL * 10;
        assert_eq!(tick_loop.due_ticks(now), 2);
        assert_eq!(tick_loop.skipped(), 8);
        assert_eq!(tick_loop.next_deadline(), now + INTERVAL);
    }
}
