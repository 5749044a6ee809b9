//! Bounded single-producer/single-consumer queue between the strobe interrupt
//! and the drain task.
//!
//! Two indices and one wasted slot: the queue is empty when `head == tail`
//! and full when `(head + 1) % N == tail`, so it holds at most `N - 1`
//! entries. The producer owns `head`, the consumer owns `tail`; each index has
//! exactly one writer, so no lock is needed. A full queue drops the new entry,
//! it never overwrites and never blocks the producer.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use crate::adapter::direct::KeyMask;

/// Queue size of the reference firmware.
pub const QUEUE_SIZE: usize = 16;

/// One strobe's worth of captured bus state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CapturedEntry {
    pub char_code: u8,
    /// Normalised direct-key sample, present when direct keys are configured.
    pub direct_keys: Option<KeyMask>,
}

impl CapturedEntry {
    pub const EMPTY: Self = Self {
        char_code: 0,
        direct_keys: None,
    };

    pub const fn char(char_code: u8) -> Self {
        Self {
            char_code,
            direct_keys: None,
        }
    }

    pub const fn with_keys(char_code: u8, direct_keys: KeyMask) -> Self {
        Self {
            char_code,
            direct_keys: Some(direct_keys),
        }
    }
}

pub struct CaptureQueue<const N: usize = QUEUE_SIZE> {
    slots: [UnsafeCell<CapturedEntry>; N],
    /// Next slot to write (`in`). Written by the producer only.
    head: AtomicUsize,
    /// Next slot to read (`out`). Written by the consumer only.
    tail: AtomicUsize,
    /// Entries dropped because the queue was full. Written by the producer only.
    overflows: AtomicU32,
}

// SAFETY: a slot is written by the producer only while it lies outside the
// readable range `[tail, head)`, and read by the consumer only while inside it.
// The Release store of `head` publishes the slot before the consumer may see
// it; the Release store of `tail` hands the slot back before it is reused.
unsafe impl<const N: usize> Sync for CaptureQueue<N> {}

impl<const N: usize> CaptureQueue<N> {
    pub const fn new() -> Self {
        const { assert!(N >= 2, "Capture queue needs at least two slots") };

        Self {
            slots: [const { UnsafeCell::new(CapturedEntry::EMPTY) }; N],
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            overflows: AtomicU32::new(0),
        }
    }

    /// Split into the two halves. The `&mut` borrow guarantees there is only
    /// ever one producer and one consumer.
    pub fn split(&mut self) -> (Producer<'_, N>, Consumer<'_, N>) {
        let queue: &Self = self;
        (Producer { queue }, Consumer { queue })
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == self.tail.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        Self::next(self.head.load(Ordering::Acquire)) == self.tail.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        (head + N - tail) % N
    }

    pub fn overflows(&self) -> u32 {
        self.overflows.load(Ordering::Relaxed)
    }

    #[inline]
    const fn next(idx: usize) -> usize {
        (idx + 1) % N
    }
}

impl<const N: usize> Default for CaptureQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Producer half, used from interrupt context.
pub struct Producer<'a, const N: usize = QUEUE_SIZE> {
    queue: &'a CaptureQueue<N>,
}

impl<'a, const N: usize> Producer<'a, N> {
    #[inline]
    pub fn is_full(&self) -> bool {
        self.queue.is_full()
    }

    /// Enqueue `entry`. Returns false (and counts an overflow) if the queue
    /// was full; the entry is discarded.
    #[inline]
    pub fn add(&mut self, entry: CapturedEntry) -> bool {
        let head = self.queue.head.load(Ordering::Relaxed);
        let next = CaptureQueue::<N>::next(head);
        if next == self.queue.tail.load(Ordering::Acquire) {
            self.queue.overflows.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        // SAFETY: `head` is outside `[tail, head)`, so the consumer is not
        // reading this slot, and we are the only producer.
        unsafe {
            *self.queue.slots[head].get() = entry;
        }
        self.queue.head.store(next, Ordering::Release);
        true
    }

    pub fn overflows(&self) -> u32 {
        self.queue.overflows()
    }
}

/// Consumer half, used from the cooperative drain task.
pub struct Consumer<'a, const N: usize = QUEUE_SIZE> {
    queue: &'a CaptureQueue<N>,
}

impl<'a, const N: usize> Consumer<'a, N> {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Dequeue the oldest entry, or `None` if the queue is empty.
    #[inline]
    pub fn remove(&mut self) -> Option<CapturedEntry> {
        let tail = self.queue.tail.load(Ordering::Relaxed);
        if tail == self.queue.head.load(Ordering::Acquire) {
            return None;
        }

        // SAFETY: `tail` is inside `[tail, head)`; the producer will not
        // touch it until we publish the new tail below.
        let entry = unsafe { *self.queue.slots[tail].get() };
        self.queue
            .tail
            .store(CaptureQueue::<N>::next(tail), Ordering::Release);
        Some(entry)
    }

    /// Iterate until the queue is observed empty.
    pub fn drain(&mut self) -> Drain<'_, 'a, N> {
        Drain { consumer: self }
    }

    /// Discard everything currently queued. Only moves `tail`, so it is safe
    /// while the producer is live.
    pub fn clear(&mut self) {
        let head = self.queue.head.load(Ordering::Acquire);
        self.queue.tail.store(head, Ordering::Release);
    }

    pub fn overflows(&self) -> u32 {
        self.queue.overflows()
    }
}

pub struct Drain<'c, 'a, const N: usize> {
    consumer: &'c mut Consumer<'a, N>,
}

impl<'c, 'a, const N: usize> Iterator for Drain<'c, 'a, N> {
    type Item = CapturedEntry;

    fn next(&mut self) -> Option<Self::Item> {
        self.consumer.remove()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_queue() {
        let mut queue = CaptureQueue::<16>::new();
        assert!(queue.is_empty());
        assert!(!queue.is_full());
        let (_, mut consumer) = queue.split();
        assert_eq!(consumer.remove(), None);
    }

    #[test]
    fn test_holds_n_minus_one() {
        let mut queue = CaptureQueue::<16>::new();
        {
            let (mut producer, _) = queue.split();
            for i in 0..15u8 {
                assert!(producer.add(CapturedEntry::char(i)));
            }
            assert!(producer.is_full());
            assert!(!producer.add(CapturedEntry::char(0xAA)));
            assert!(!producer.add(CapturedEntry::char(0xBB)));
        }
        assert_eq!(queue.len(), 15);
        assert_eq!(queue.overflows(), 2);

        let (_, mut consumer) = queue.split();
        let drained: Vec<u8> = consumer.drain().map(|e| e.char_code).collect();
        assert_eq!(drained, (0..15).collect::<Vec<u8>>());
        assert!(consumer.is_empty());
    }

    #[test]
    fn test_fifo_across_wrap() {
        let mut queue = CaptureQueue::<4>::new();
        let (mut producer, mut consumer) = queue.split();

        assert!(producer.add(CapturedEntry::char(1)));
        assert!(producer.add(CapturedEntry::char(2)));
        assert_eq!(consumer.remove().map(|e| e.char_code), Some(1));
        assert!(producer.add(CapturedEntry::char(3)));
        assert!(producer.add(CapturedEntry::char(4)));
        assert!(!producer.add(CapturedEntry::char(5)));
        assert_eq!(consumer.remove().map(|e| e.char_code), Some(2));
        assert!(producer.add(CapturedEntry::with_keys(6, 0b101)));

        let rest: Vec<CapturedEntry> = consumer.drain().collect();
        assert_eq!(
            rest,
            vec![
                CapturedEntry::char(3),
                CapturedEntry::char(4),
                CapturedEntry::with_keys(6, 0b101),
            ]
        );
        assert_eq!(producer.overflows(), 1);
    }

    #[test]
    fn test_clear_from_consumer() {
        let mut queue = CaptureQueue::<8>::new();
        let (mut producer, mut consumer) = queue.split();
        for i in 0..5 {
            producer.add(CapturedEntry::char(i));
        }
        consumer.clear();
        assert!(consumer.is_empty());
        assert!(producer.add(CapturedEntry::char(9)));
        assert_eq!(consumer.remove(), Some(CapturedEntry::char(9)));
    }

    #[test]
    fn test_concurrent_fifo() {
        const COUNT: u32 = 20_000;
        let mut queue = CaptureQueue::<16>::new();
        let (mut producer, mut consumer) = queue.split();

        std::thread::scope(|s| {
            s.spawn(move || {
                let mut i = 0u32;
                while i < COUNT {
                    // Retry on full so every value eventually gets through.
                    if producer.add(CapturedEntry::with_keys(i as u8, (i >> 8) as u16)) {
                        i += 1;
                    } else {
                        std::thread::yield_now();
                    }
                }
            });

            let mut expected = 0u32;
            while expected < COUNT {
                match consumer.remove() {
                    Some(entry) => {
                        assert_eq!(entry.char_code, expected as u8);
                        assert_eq!(entry.direct_keys, Some((expected >> 8) as u16));
                        expected += 1;
                    }
                    None => std::thread::yield_now(),
                }
            }
        });

        assert!(queue.is_empty());
    }
}
