use std::time::{Duration, Instant};

/// Fires at most once per `interval`, tracked against a monotonic clock.
///
/// Used by the dispatch loop's outbound reconnect/inactivity-sweep cadence
/// and by anything else that wants a cheap "did enough time pass" check
/// without spawning a timer.
#[derive(Clone, Copy, Debug)]
pub struct Repeater {
    interval: Duration,
    last_acted: Instant,
}

impl Repeater {
    #[inline]
    pub fn every(interval: Duration) -> Self {
        Self { interval, last_acted: Instant::now() - interval }
    }

    #[inline]
    pub fn maybe<F>(&mut self, mut f: F)
    where
        F: FnMut(Duration),
    {
        let el = self.last_acted.elapsed();
        if el >= self.interval {
            f(el);
            self.last_acted = Instant::now();
        }
    }

    #[inline]
    pub fn fired(&mut self) -> bool {
        let el = self.last_acted.elapsed();
        if el >= self.interval {
            self.last_acted = Instant::now();
            true
        } else {
            false
        }
    }

    #[inline]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    #[inline]
    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    pub fn reset(&mut self) {
        self.last_acted = Instant::now();
    }

    /// Forces the next `fired()`/`maybe()` call to trigger immediately.
    pub fn force_fire(&mut self) {
        self.last_acted = Instant::now() - self.interval;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_after_interval_elapses() {
        let mut r = Repeater::every(Duration::from_millis(10));
        assert!(!r.fired());
        std::thread::sleep(Duration::from_millis(15));
        assert!(r.fired());
        assert!(!r.fired());
    }

    #[test]
    fn force_fire_triggers_immediately() {
        let mut r = Repeater::every(Duration::from_secs(60));
        assert!(!r.fired());
        r.force_fire();
        assert!(r.fired());
    }
}
