use crate::sync::{Arc, AtomicUsize, Ordering, UnsafeCell};
use crate::{QueueError, QueueResult};
use conveyor_core::{RingQueueConfig, MIN_RING_CAPACITY};
use core::cell::Cell;
use core::fmt;
use core::marker::PhantomData;
use core::mem::MaybeUninit;
use crossbeam_utils::CachePadded;
use tracing::debug;

/// Wait-free SPSC bounded ring buffer queue.
///
/// - One dedicated producer, one dedicated consumer, each holding its own handle
/// - Uses Acquire/Release ordering on the indices to publish slot contents
/// - `capacity` is the total slot count; one slot is always kept empty to tell
///   "full" from "empty", so `capacity - 1` elements fit
///
/// Slots in `[read_index, write_index)` (modulo capacity) hold live values, all
/// others are uninitialised.
pub struct RingQueue<T> {
    read_index: CachePadded<AtomicUsize>,
    write_index: CachePadded<AtomicUsize>,
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
}

// Safety: producer and consumer touch disjoint slots, handed over through the
// release/acquire pairs on the indices; T must be Send to cross threads.
unsafe impl<T: Send> Send for RingQueue<T> {}
unsafe impl<T: Send> Sync for RingQueue<T> {}

impl<T> RingQueue<T> {
    /// Create a queue with `capacity` total slots and split it into its two handles.
    ///
    /// Fails with [`QueueError::InvalidCapacity`] below two slots and with
    /// [`QueueError::Allocation`] when the slot storage cannot be reserved.
    pub fn with_capacity(capacity: usize) -> QueueResult<(Producer<T>, Consumer<T>)> {
        if capacity < MIN_RING_CAPACITY {
            return Err(QueueError::InvalidCapacity {
                requested: capacity,
                minimum: MIN_RING_CAPACITY,
            });
        }

        let mut slots: Vec<UnsafeCell<MaybeUninit<T>>> = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(|_| QueueError::Allocation { capacity })?;
        slots.extend((0..capacity).map(|_| UnsafeCell::new(MaybeUninit::uninit())));

        let ring = Arc::new(RingQueue {
            read_index: CachePadded::new(AtomicUsize::new(0)),
            write_index: CachePadded::new(AtomicUsize::new(0)),
            slots: slots.into_boxed_slice(),
        });
        debug!("Created ring queue with {} slots", capacity);

        Ok((
            Producer {
                ring: ring.clone(),
                _not_sync: PhantomData,
            },
            Consumer {
                ring,
                _not_sync: PhantomData,
            },
        ))
    }

    pub fn from_config(config: &RingQueueConfig) -> QueueResult<(Producer<T>, Consumer<T>)> {
        Self::with_capacity(config.capacity)
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    fn advance(&self, index: usize) -> usize {
        let next = index + 1;
        if next == self.capacity() {
            0
        } else {
            next
        }
    }

    #[inline]
    fn is_empty(&self) -> bool {
        self.read_index.load(Ordering::Acquire) == self.write_index.load(Ordering::Acquire)
    }

    #[inline]
    fn is_full(&self) -> bool {
        self.advance(self.write_index.load(Ordering::Acquire))
            == self.read_index.load(Ordering::Acquire)
    }

    #[inline]
    fn size_guess(&self) -> usize {
        let write = self.write_index.load(Ordering::Acquire);
        let read = self.read_index.load(Ordering::Acquire);
        if write >= read {
            write - read
        } else {
            write + self.capacity() - read
        }
    }
}

impl<T> Drop for RingQueue<T> {
    fn drop(&mut self) {
        // Both handles are gone, nothing else can touch the indices.
        let mut read = self.read_index.load(Ordering::Relaxed);
        let end = self.write_index.load(Ordering::Relaxed);
        while read != end {
            self.slots[read].with_mut(|slot| unsafe { (*slot).assume_init_drop() });
            read = self.advance(read);
        }
    }
}

/// Producer side of the ring queue.
///
/// `Send` but not `Sync`: exactly one thread produces at a time.
pub struct Producer<T> {
    ring: Arc<RingQueue<T>>,
    _not_sync: PhantomData<Cell<()>>,
}

/// Consumer side of the ring queue.
///
/// `Send` but not `Sync`: exactly one thread consumes at a time.
pub struct Consumer<T> {
    ring: Arc<RingQueue<T>>,
    _not_sync: PhantomData<Cell<()>>,
}

impl<T> Producer<T> {
    /// Append `value`, handing it back if the queue is full.
    #[inline]
    pub fn emplace(&mut self, value: T) -> Result<(), T> {
        let q = &*self.ring;
        let write = q.write_index.load(Ordering::Relaxed);
        let next = q.advance(write);
        if next == q.read_index.load(Ordering::Acquire) {
            return Err(value);
        }
        q.slots[write].with_mut(|slot| unsafe {
            (*slot).write(value);
        });
        q.write_index.store(next, Ordering::Release);
        Ok(())
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.ring.is_full()
    }

    /// Element count as seen from the producer. The consumer may be removing
    /// concurrently, so the true size can only be smaller.
    #[inline]
    pub fn size_guess(&self) -> usize {
        self.ring.size_guess()
    }

    /// Usable slots: `capacity() - 1`.
    #[inline]
    pub fn max_size(&self) -> usize {
        self.ring.capacity() - 1
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }
}

impl<T> Consumer<T> {
    /// Remove the head element, or `None` if the queue is empty.
    #[inline]
    pub fn poll(&mut self) -> Option<T> {
        let q = &*self.ring;
        let read = q.read_index.load(Ordering::Relaxed);
        if read == q.write_index.load(Ordering::Acquire) {
            return None;
        }
        let value = q.slots[read].with_mut(|slot| unsafe { (*slot).assume_init_read() });
        q.read_index.store(q.advance(read), Ordering::Release);
        Some(value)
    }

    /// Borrow the head element without removing it.
    #[inline]
    pub fn front(&self) -> Option<&T> {
        let q = &*self.ring;
        let read = q.read_index.load(Ordering::Relaxed);
        if read == q.write_index.load(Ordering::Acquire) {
            return None;
        }
        // The slot stays live until `poll`, which needs `&mut self`.
        Some(q.slots[read].with(|slot| unsafe { (*slot).assume_init_ref() }))
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.ring.is_full()
    }

    /// Element count as seen from the consumer. The producer may be adding
    /// concurrently, so the true size can only be larger.
    #[inline]
    pub fn size_guess(&self) -> usize {
        self.ring.size_guess()
    }

    #[inline]
    pub fn max_size(&self) -> usize {
        self.ring.capacity() - 1
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }
}

impl<T> fmt::Debug for Producer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("capacity", &self.capacity())
            .field("size_guess", &self.size_guess())
            .finish()
    }
}

impl<T> fmt::Debug for Consumer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("capacity", &self.capacity())
            .field("size_guess", &self.size_guess())
            .finish()
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    struct DropCounter(Arc<AtomicUsize>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn ring_basic() {
        let (mut p, mut c) = RingQueue::with_capacity(8).unwrap();
        p.emplace(1).unwrap();
        p.emplace(2).unwrap();
        assert_eq!(c.poll(), Some(1));
        assert_eq!(c.poll(), Some(2));
        assert_eq!(c.poll(), None);
    }

    #[test]
    fn ring_empty_full() {
        let (mut p, c) = RingQueue::with_capacity(3).unwrap();
        assert!(c.is_empty());
        assert!(!p.is_full());
        assert!(p.emplace(1).is_ok());
        assert!(!c.is_empty());
        assert!(!p.is_full());
        assert!(p.emplace(2).is_ok());
        assert!(!c.is_empty());
        assert_eq!(p.emplace(3), Err(3));
        assert!(p.is_full());
        assert!(c.is_full());
        assert_eq!(p.size_guess(), 2);
        assert_eq!(c.size_guess(), 2);
        assert_eq!(p.max_size(), 2);
        assert_eq!(c.capacity(), 3);
    }

    #[test]
    fn ring_rejects_tiny_capacity() {
        for cap in [0, 1] {
            let err = RingQueue::<u8>::with_capacity(cap).unwrap_err();
            assert_eq!(
                err,
                QueueError::InvalidCapacity {
                    requested: cap,
                    minimum: 2
                }
            );
        }
    }

    #[test]
    fn ring_reports_allocation_failure() {
        let err = RingQueue::<[u64; 1024]>::with_capacity(usize::MAX / 2).unwrap_err();
        assert!(matches!(err, QueueError::Allocation { .. }));
    }

    #[test]
    fn ring_from_config() {
        let (p, _c) = RingQueue::<u32>::from_config(&RingQueueConfig::with_capacity(5)).unwrap();
        assert_eq!(p.max_size(), 4);
        assert!(RingQueue::<u32>::from_config(&RingQueueConfig::with_capacity(1)).is_err());
    }

    #[test]
    fn ring_front_peeks_without_removing() {
        let (mut p, mut c) = RingQueue::with_capacity(4).unwrap();
        assert!(c.front().is_none());
        p.emplace(String::from("a")).unwrap();
        p.emplace(String::from("b")).unwrap();
        assert_eq!(c.front().map(String::as_str), Some("a"));
        assert_eq!(c.size_guess(), 2);
        assert_eq!(c.poll().as_deref(), Some("a"));
        assert_eq!(c.front().map(String::as_str), Some("b"));
    }

    #[test]
    fn ring_wraps_around_in_order() {
        let (mut p, mut c) = RingQueue::with_capacity(4).unwrap();
        for round in 0..10u32 {
            for i in 0..3 {
                p.emplace(round * 3 + i).unwrap();
            }
            assert!(p.is_full());
            for i in 0..3 {
                assert_eq!(c.poll(), Some(round * 3 + i));
            }
            assert!(c.is_empty());
        }
    }

    #[test]
    fn ring_drop_releases_unpolled_elements() {
        let drops = Arc::new(AtomicUsize::new(0));
        {
            let (mut p, mut c) = RingQueue::with_capacity(1024).unwrap();
            for _ in 0..10 {
                assert!(p.emplace(DropCounter(drops.clone())).is_ok());
            }
            drop(c.poll());
            drop(c.poll());
            assert_eq!(drops.load(Ordering::SeqCst), 2);
        }
        assert_eq!(drops.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn ring_drop_after_write_index_wrapped() {
        let drops = Arc::new(AtomicUsize::new(0));
        {
            let (mut p, mut c) = RingQueue::with_capacity(4).unwrap();
            for _ in 0..3 {
                assert!(p.emplace(DropCounter(drops.clone())).is_ok());
            }
            drop(c.poll());
            assert_eq!(drops.load(Ordering::SeqCst), 1);
            // write index wraps to 0 while read index sits at 1
            assert!(p.emplace(DropCounter(drops.clone())).is_ok());
            assert_eq!(c.size_guess(), 3);
            assert_eq!(drops.load(Ordering::SeqCst), 1);
        }
        assert_eq!(drops.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn ring_storage_outlives_first_dropped_handle() {
        let (mut p, mut c) = RingQueue::with_capacity(4).unwrap();
        p.emplace(7u64).unwrap();
        drop(p);
        assert_eq!(c.poll(), Some(7));
        assert_eq!(c.poll(), None);
    }

    #[test]
    fn ring_concurrent() {
        let (mut p, mut c) = RingQueue::with_capacity(1024).unwrap();
        let t = thread::spawn(move || {
            for i in 0..10_000u32 {
                let mut v = i;
                while let Err(back) = p.emplace(v) {
                    v = back;
                    thread::yield_now();
                }
            }
        });
        let mut count = 0u32;
        while count < 10_000 {
            if let Some(v) = c.poll() {
                assert_eq!(v, count);
                count += 1;
            } else {
                thread::yield_now();
            }
        }
        t.join().unwrap();
    }
}

#[cfg(all(test, feature = "loom"))]
mod loom_tests {
    use super::*;
    use loom::thread;

    #[test]
    fn loom_publishes_in_order() {
        loom::model(|| {
            let (mut p, mut c) = RingQueue::with_capacity(2).unwrap();
            let tp = thread::spawn(move || {
                for i in 0..2u32 {
                    let mut v = i;
                    while let Err(back) = p.emplace(v) {
                        v = back;
                        thread::yield_now();
                    }
                }
            });
            let mut seen = Vec::new();
            while seen.len() < 2 {
                match c.poll() {
                    Some(v) => seen.push(v),
                    None => thread::yield_now(),
                }
            }
            tp.join().unwrap();
            assert_eq!(seen, vec![0, 1]);
        });
    }

    #[test]
    fn loom_teardown_drops_leftovers() {
        loom::model(|| {
            let (mut p, c) = RingQueue::with_capacity(3).unwrap();
            let tp = thread::spawn(move || {
                let _ = p.emplace(String::from("left behind"));
            });
            let tc = thread::spawn(move || drop(c));
            tp.join().unwrap();
            tc.join().unwrap();
        });
    }
}
