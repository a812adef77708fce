use std::thread;
use std::time::{Duration, Instant};

/// Time source for exposure waits and status polling.
pub trait Clock {
    fn now(&self) -> Instant;

    fn sleep(&self, duration: Duration);
}

/// Wall clock backed by [`thread::sleep`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}
