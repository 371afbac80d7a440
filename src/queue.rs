//! Single-producer single-consumer byte ring.

use core::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

/// Fixed ring of `N` byte slots shared by one producer and one consumer.
///
/// One slot is kept free to tell a full ring from an empty one, so at most
/// `N - 1` bytes are queued. A zero-sized queue is both empty and full.
///
/// Every method takes `&self`: the producer (often an interrupt handler) only
/// calls [`push`](Self::push) and the consumer only calls [`pop`](Self::pop)
/// and [`peek`](Self::peek). More than one producer or consumer corrupts the
/// queued data.
pub struct CircularQueue<const N: usize> {
    slots: [AtomicU8; N],
    push: AtomicUsize,
    pop: AtomicUsize,
}

impl<const N: usize> CircularQueue<N> {
    pub const fn new() -> Self {
        Self {
            slots: [const { AtomicU8::new(0) }; N],
            push: AtomicUsize::new(0),
            pop: AtomicUsize::new(0),
        }
    }

    /// Queue one byte. The caller checks [`is_full`](Self::is_full) first.
    pub fn push(&self, byte: u8) {
        debug_assert!(!self.is_full(), "push to a full queue");
        if N == 0 {
            return;
        }

        let push = self.push.load(Ordering::Relaxed);
        self.slots[push].store(byte, Ordering::Relaxed);
        self.push.store((push + 1) % N, Ordering::Release);
    }

    /// Take the oldest byte. The caller checks [`is_empty`](Self::is_empty) first.
    pub fn pop(&self) -> u8 {
        let byte = self.peek();
        if N != 0 {
            let pop = self.pop.load(Ordering::Relaxed);
            self.pop.store((pop + 1) % N, Ordering::Release);
        }
        byte
    }

    /// Oldest byte without removing it. Same precondition as [`pop`](Self::pop).
    pub fn peek(&self) -> u8 {
        debug_assert!(N != 0, "read from an empty queue");
        if N == 0 {
            return 0;
        }

        // The slot is written before the producer publishes the index.
        let push = self.push.load(Ordering::Acquire);
        let pop = self.pop.load(Ordering::Relaxed);
        debug_assert!(push != pop, "read from an empty queue");
        self.slots[pop].load(Ordering::Relaxed)
    }

    /// Number of queued bytes.
    pub fn available(&self) -> usize {
        if N == 0 {
            return 0;
        }
        let push = self.push.load(Ordering::Acquire);
        let pop = self.pop.load(Ordering::Acquire);
        (push + N - pop) % N
    }

    /// Usable slots, one less than `N`.
    pub const fn capacity(&self) -> usize {
        N.saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        N == 0 || self.push.load(Ordering::Acquire) == self.pop.load(Ordering::Acquire)
    }

    pub fn is_full(&self) -> bool {
        N == 0 || (self.push.load(Ordering::Acquire) + 1) % N == self.pop.load(Ordering::Acquire)
    }

    /// Free slots left for the producer.
    pub fn space(&self) -> usize {
        self.capacity() - self.available()
    }
}

impl<const N: usize> Default for CircularQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use std::vec::Vec;

    #[test]
    fn test_fifo_order() {
        let queue = CircularQueue::<8>::new();
        let mut expected = Vec::new();
        let mut popped = Vec::new();
        let mut pushes = 0;
        let mut pops = 0;

        for round in 0..20u8 {
            for i in 0..3 {
                if !queue.is_full() {
                    queue.push(round * 3 + i);
                    expected.push(round * 3 + i);
                    pushes += 1;
                }
            }
            for _ in 0..(round % 4) {
                if !queue.is_empty() {
                    popped.push(queue.pop());
                    pops += 1;
                }
            }
            assert_eq!(queue.available(), pushes - pops);
        }

        while !queue.is_empty() {
            popped.push(queue.pop());
        }
        assert_eq!(popped, expected);
    }

    #[test]
    fn test_full_and_empty() {
        let queue = CircularQueue::<4>::new();
        assert!(queue.is_empty());
        assert_eq!(queue.capacity(), 3);

        queue.push(1);
        queue.push(2);
        queue.push(3);
        assert!(queue.is_full());
        assert_eq!(queue.available(), 3);
        assert_eq!(queue.space(), 0);

        assert_eq!(queue.peek(), 1);
        assert_eq!(queue.pop(), 1);
        assert!(!queue.is_full());
        queue.push(4);
        assert_eq!([queue.pop(), queue.pop(), queue.pop()], [2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_zero_size() {
        let queue = CircularQueue::<0>::new();
        assert!(queue.is_empty());
        assert!(queue.is_full());
        assert_eq!(queue.available(), 0);
        assert_eq!(queue.capacity(), 0);
    }

    #[test]
    fn test_threaded_transfer() {
        let queue = CircularQueue::<16>::new();
        let data: Vec<u8> = (0..=255).cycle().take(2000).collect();

        let received = std::thread::scope(|s| {
            s.spawn(|| {
                for &byte in &data {
                    while queue.is_full() {
                        std::thread::yield_now();
                    }
                    queue.push(byte);
                }
            });

            let mut received = Vec::new();
            while received.len() < data.len() {
                if queue.is_empty() {
                    std::thread::yield_now();
                } else {
                    received.push(queue.pop());
                }
            }
            received
        });

        assert_eq!(received, data);
    }
}
