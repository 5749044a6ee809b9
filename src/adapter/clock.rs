use std::sync::atomic::{AtomicU32, Ordering};

/// Millisecond counter advanced by a periodic tick (the USB start-of-frame
/// event on real hardware).
///
/// Only the interrupt side calls [`TimeBase::tick`]; the task side only reads.
/// The counter wraps, so elapsed times must be computed with [`elapsed`].
#[derive(Debug, Default)]
pub struct TimeBase {
    millis: AtomicU32,
}

impl TimeBase {
    pub const fn new() -> Self {
        Self {
            millis: AtomicU32::new(0),
        }
    }

    #[inline]
    pub fn tick(&self) {
        self.millis.fetch_add(1, Ordering::Release);
    }

    #[inline]
    pub fn now(&self) -> u32 {
        self.millis.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub(crate) fn set(&self, millis: u32) {
        self.millis.store(millis, Ordering::Release);
    }
}

/// Milliseconds from `since` to `now`, tolerant of counter wrap.
#[inline]
pub fn elapsed(now: u32, since: u32) -> u32 {
    now.wrapping_sub(since)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_advances() {
        let clock = TimeBase::new();
        assert_eq!(clock.now(), 0);
        for _ in 0..250 {
            clock.tick();
        }
        assert_eq!(clock.now(), 250);
    }

    #[test]
    fn test_elapsed_across_wrap() {
        let clock = TimeBase::new();
        clock.set(u32::MAX - 2);
        let start = clock.now();
        for _ in 0..5 {
            clock.tick();
        }
        assert_eq!(clock.now(), 2);
        assert_eq!(elapsed(clock.now(), start), 5);
    }
}
