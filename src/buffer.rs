use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};

use crate::error::{Error, Result};

struct Queue<T> {
    blocks: VecDeque<Vec<T>>,
    ended: bool,
}

/// Thread-safe FIFO of sample blocks between one producer and one consumer
///
/// The producer never blocks. The consumer blocks in [`pull`](Self::pull)
/// while the queue is empty, until more data arrives or the producer calls
/// [`end`](Self::end). Queued data is always drained before end-of-stream is
/// reported, after which every pull returns an empty block.
pub struct StreamBuffer<T> {
    queue: Mutex<Queue<T>>,
    cond: Condvar,
    // Mirrors of the locked counters, readable without taking the lock
    queued: AtomicUsize,
    consumed: AtomicUsize,
}

impl<T> Default for StreamBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> StreamBuffer<T> {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(Queue {
                blocks: VecDeque::new(),
                ended: false,
            }),
            cond: Condvar::new(),
            queued: AtomicUsize::new(0),
            consumed: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Queue<T>> {
        // A panicking peer must not wedge the other side of the buffer
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a block to the tail of the queue
    ///
    /// Empty blocks are ignored, since an empty pull means end-of-stream.
    pub fn push(&self, block: Vec<T>) -> Result<()> {
        let n = block.len();
        let mut queue = self.lock();
        if queue.ended {
            return Err(Error::InvalidState("push after end of stream"));
        }
        if n == 0 {
            return Ok(());
        }
        queue.blocks.push_back(block);
        self.queued.fetch_add(n, Ordering::Release);
        drop(queue);
        self.cond.notify_all();
        Ok(())
    }

    /// Mark that no further blocks will be pushed
    pub fn end(&self) {
        let mut queue = self.lock();
        queue.ended = true;
        drop(queue);
        self.cond.notify_all();
    }

    /// Remove and return the head block, waiting while the queue is empty
    ///
    /// Returns an empty block once the stream has ended and drained.
    pub fn pull(&self) -> Vec<T> {
        let mut queue = self.lock();
        while queue.blocks.is_empty() && !queue.ended {
            queue = self
                .cond
                .wait(queue)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        match queue.blocks.pop_front() {
            Some(block) => {
                self.queued.fetch_sub(block.len(), Ordering::Release);
                self.consumed.fetch_add(block.len(), Ordering::Relaxed);
                block
            }
            None => Vec::new(),
        }
    }

    /// Wait until at least `threshold` samples are queued or the stream ended
    pub fn wait_until_filled(&self, threshold: usize) {
        let mut queue = self.lock();
        while self.queued.load(Ordering::Acquire) < threshold && !queue.ended {
            queue = self
                .cond
                .wait(queue)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Number of samples currently queued (may be stale under concurrent use)
    pub fn queued_samples(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    /// Number of samples handed out by [`pull`](Self::pull) so far
    pub fn consumed_samples(&self) -> usize {
        self.consumed.load(Ordering::Relaxed)
    }

    /// True once the stream has ended and every queued block was pulled
    pub fn pull_end_reached(&self) -> bool {
        let queue = self.lock();
        queue.ended && queue.blocks.is_empty()
    }

    pub fn is_ended(&self) -> bool {
        self.lock().ended
    }
}
