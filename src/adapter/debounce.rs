use crate::adapter::clock::elapsed;
use crate::adapter::direct::KeyMask;

/// Stabilises a polled direct-key sample.
///
/// A new sample restarts the window; the candidate is accepted once it has
/// been seen unchanged for longer than `window_ms`. With a zero window every
/// sample is accepted as-is.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window_ms: u32,
    state: State,
    candidate: KeyMask,
    started: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    PassThrough,
    Debouncing,
    Stable,
}

impl Debouncer {
    pub fn new(window_ms: u32) -> Self {
        Self {
            window_ms,
            state: if window_ms == 0 {
                State::PassThrough
            } else {
                State::Debouncing
            },
            candidate: 0,
            started: 0,
        }
    }

    pub fn in_progress(&self) -> bool {
        self.state == State::Debouncing
    }

    /// Feed one raw sample taken at `now`. Returns the accepted mask when the
    /// sample is stable.
    pub fn poll(&mut self, sample: KeyMask, now: u32) -> Option<KeyMask> {
        match self.state {
            State::PassThrough => Some(sample),
            _ if sample != self.candidate => {
                self.candidate = sample;
                self.started = now;
                self.state = State::Debouncing;
                None
            }
            State::Debouncing => {
                if elapsed(now, self.started) > self.window_ms {
                    self.state = State::Stable;
                    Some(self.candidate)
                } else {
                    None
                }
            }
            State::Stable => Some(self.candidate),
        }
    }

    /// Back to the power-on state, with the window anchored at `now`.
    pub fn reset(&mut self, now: u32) {
        self.candidate = 0;
        self.started = now;
        if self.state != State::PassThrough {
            self.state = State::Debouncing;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_sequence() {
        let mut debounce = Debouncer::new(5);
        assert_eq!(debounce.poll(0x00, 0), None);
        assert_eq!(debounce.poll(0x01, 2), None);
        assert!(debounce.in_progress());
        // Exactly the window is not enough.
        assert_eq!(debounce.poll(0x01, 7), None);
        assert_eq!(debounce.poll(0x01, 8), Some(0x01));
        assert!(!debounce.in_progress());
        assert_eq!(debounce.poll(0x01, 9), Some(0x01));
    }

    #[test]
    fn test_zero_window_passes_through() {
        let mut debounce = Debouncer::new(0);
        assert_eq!(debounce.poll(0x00, 0), Some(0x00));
        assert_eq!(debounce.poll(0x01, 2), Some(0x01));
        assert_eq!(debounce.poll(0x03, 2), Some(0x03));
        assert!(!debounce.in_progress());
    }

    #[test]
    fn test_change_restarts_window() {
        let mut debounce = Debouncer::new(10);
        assert_eq!(debounce.poll(0b01, 0), None);
        assert_eq!(debounce.poll(0b11, 8), None);
        assert_eq!(debounce.poll(0b11, 15), None);
        assert_eq!(debounce.poll(0b11, 19), Some(0b11));

        // Bounce while stable goes back to debouncing.
        assert_eq!(debounce.poll(0b10, 20), None);
        assert_eq!(debounce.poll(0b11, 21), None);
        assert_eq!(debounce.poll(0b11, 31), None);
        assert_eq!(debounce.poll(0b11, 32), Some(0b11));
    }

    #[test]
    fn test_initial_zero_needs_full_window() {
        let mut debounce = Debouncer::new(5);
        assert_eq!(debounce.poll(0, 3), None);
        assert_eq!(debounce.poll(0, 6), Some(0));
    }

    #[test]
    fn test_window_across_clock_wrap() {
        let mut debounce = Debouncer::new(5);
        let start = u32::MAX - 1;
        assert_eq!(debounce.poll(0x04, start), None);
        assert_eq!(debounce.poll(0x04, 2), None);
        assert_eq!(debounce.poll(0x04, 4), Some(0x04));
    }

    #[test]
    fn test_reset() {
        let mut debounce = Debouncer::new(5);
        debounce.poll(0x02, 0);
        assert_eq!(debounce.poll(0x02, 10), Some(0x02));
        debounce.reset(100);
        assert!(debounce.in_progress());
        assert_eq!(debounce.poll(0x02, 101), None);
        assert_eq!(debounce.poll(0x02, 107), Some(0x02));
    }
}
