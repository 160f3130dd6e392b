//! Small timing helpers for periodic work driven from per-frame hooks.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Fires at most once per interval. Garbage collectors hang off present
/// hooks through this so a 240 Hz host does not scan pools 240 times a
/// second.
pub struct IntervalTimer {
    interval: Duration,
    last: Mutex<Instant>,
}

impl IntervalTimer {
    pub fn new(interval: Duration) -> Self {
        Self { interval, last: Mutex::new(Instant::now()) }
    }

    /// True when the interval elapsed since the last accepted tick.
    pub fn tick(&self) -> bool {
        let mut last = self.last.lock().unwrap();
        let now = Instant::now();
        if now.duration_since(*last) >= self.interval {
            *last = now;
            true
        } else {
            false
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.last.lock().unwrap().elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_once_per_interval() {
        let timer = IntervalTimer::new(Duration::from_millis(20));
        assert!(!timer.tick());
        std::thread::sleep(Duration::from_millis(25));
        assert!(timer.tick());
        assert!(!timer.tick());
    }

    #[test]
    fn zero_interval_always_fires() {
        let timer = IntervalTimer::new(Duration::ZERO);
        assert!(timer.tick());
        assert!(timer.tick());
    }
}
