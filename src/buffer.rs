use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::types::{Sample, Window};

/// Where a pushed sample landed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushReceipt {
    /// 1-based arrival index of the sample within this buffer
    pub sequence: u64,
    /// Buffer length after the push
    pub len: usize,
}

struct BufferInner {
    samples: VecDeque<Arc<Sample>>,
    pushed: u64,
}

/// Fixed-capacity FIFO of the most recent samples
pub struct SlidingWindowBuffer {
    capacity: usize,
    inner: Mutex<BufferInner>,
}

impl SlidingWindowBuffer {
    /// Create a buffer holding at most `capacity` samples (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: Mutex::new(BufferInner {
                samples: VecDeque::new(),
                pushed: 0,
            }),
        }
    }

    /// Append a sample, evicting the oldest one when already at capacity
    pub fn push(&self, sample: Arc<Sample>) -> PushReceipt {
        self.push_and_snapshot(sample, |_| false).0
    }

    /// Append a sample and, if `want_window` accepts its sequence once the
    /// buffer is full, copy the window it completed in the same critical
    /// section. No other push can land between the two.
    pub fn push_and_snapshot(
        &self,
        sample: Arc<Sample>,
        want_window: impl FnOnce(u64) -> bool,
    ) -> (PushReceipt, Option<Window>) {
        let mut inner = self.inner.lock();
        if inner.samples.len() == self.capacity {
            inner.samples.pop_front();
        }
        inner.samples.push_back(sample);
        inner.pushed += 1;

        let receipt = PushReceipt {
            sequence: inner.pushed,
            len: inner.samples.len(),
        };
        let window = (receipt.len == self.capacity && want_window(receipt.sequence))
            .then(|| Window::new(inner.samples.iter().cloned().collect()));
        (receipt, window)
    }

    /// Copy of the current contents, only once the window is full
    pub fn snapshot(&self) -> Option<Window> {
        let inner = self.inner.lock();
        if inner.samples.len() < self.capacity {
            return None;
        }
        Some(Window::new(inner.samples.iter().cloned().collect()))
    }

    pub fn is_full(&self) -> bool {
        self.inner.lock().samples.len() == self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
