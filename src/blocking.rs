use std::ops::Deref;
use std::time::{Duration, Instant};

use crate::codec::{BincodeCodec, Codec};
use crate::error::QueueError;
use crate::queue::PersistentQueue;

/// A [`PersistentQueue`] with blocking consumers.
///
/// The queue is unbounded, so producers never wait; consumers can block in
/// [`take`](Self::take) or [`poll_timeout`](Self::poll_timeout) until an
/// element arrives. Non-blocking operations are available through `Deref`.
pub struct BlockingQueue<T, C = BincodeCodec<T>> {
    inner: PersistentQueue<T, C>,
}

impl<T, C> BlockingQueue<T, C>
where
    C: Codec<T>,
{
    pub fn new(inner: PersistentQueue<T, C>) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> PersistentQueue<T, C> {
        self.inner
    }

    pub fn put(&self, item: T) -> Result<(), QueueError> {
        self.inner.add(item)
    }

    /// Never waits: there is no capacity limit to wait on.
    pub fn offer_timeout(&self, item: T, _timeout: Duration) -> Result<bool, QueueError> {
        self.inner.offer(item)
    }

    /// Removes the head, waiting for one to arrive if the queue is empty.
    pub fn take(&self) -> Result<T, QueueError> {
        loop {
            if let Some(item) = self.inner.poll()? {
                return Ok(item);
            }
            self.inner.wait_for_items(None);
        }
    }

    /// Removes the head, waiting at most `timeout`. `None` on timeout.
    pub fn poll_timeout(&self, timeout: Duration) -> Result<Option<T>, QueueError> {
        // 加法溢出的超时视为无限等待
        let deadline = Instant::now().checked_add(timeout);
        loop {
            if let Some(item) = self.inner.poll()? {
                return Ok(Some(item));
            }
            if !self.inner.wait_for_items(deadline) {
                // 超时前最后一次尝试，防止与生产者擦肩而过
                return self.inner.poll();
            }
        }
    }

    /// Moves every element into `sink`, head first, recording the batch
    /// with one durability action. Returns the number moved.
    pub fn drain_to(&self, sink: &mut Vec<T>) -> Result<usize, QueueError> {
        self.drain_to_max(sink, usize::MAX)
    }

    /// Moves at most `max` elements from the head into `sink`.
    pub fn drain_to_max(&self, sink: &mut Vec<T>, max: usize) -> Result<usize, QueueError> {
        let drained = self.inner.remove_prefix(max)?;
        let n = drained.len();
        sink.extend(drained);
        Ok(n)
    }

    pub fn remaining_capacity(&self) -> usize {
        usize::MAX
    }
}

impl<T, C> Deref for BlockingQueue<T, C> {
    type Target = PersistentQueue<T, C>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
