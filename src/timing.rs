//! Monotonic capture clock for frame timestamps.

use std::sync::Arc;
use std::time::Instant;

/// Shared timebase for stamping frames as they enter the queue.
///
/// Cloning shares the same start instant, so every producer of a session
/// stamps against one origin.
#[derive(Debug, Clone)]
pub struct FrameClock {
    start: Arc<Instant>,
}

impl FrameClock {
    pub fn new() -> Self {
        Self {
            start: Arc::new(Instant::now()),
        }
    }

    pub fn from_instant(start: Instant) -> Self {
        Self {
            start: Arc::new(start),
        }
    }

    /// Microseconds since the clock started.
    #[inline]
    pub fn now_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }

    /// Microseconds between clock start and `instant` (zero if earlier).
    #[inline]
    pub fn us_at(&self, instant: Instant) -> u64 {
        instant.saturating_duration_since(*self.start).as_micros() as u64
    }

    pub fn start_instant(&self) -> Instant {
        *self.start
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_clock_is_monotonic() {
        let clock = FrameClock::new();
        let a = clock.now_us();
        std::thread::sleep(Duration::from_millis(2));
        assert!(clock.now_us() > a);
    }

    #[test]
    fn test_clones_share_origin() {
        let clock = FrameClock::new();
        let other = clock.clone();
        assert_eq!(clock.start_instant(), other.start_instant());
        assert_eq!(clock.us_at(clock.start_instant()), 0);
    }
}
