//! Fixed-capacity ring buffers for the plot windows and the DSP input window

use std::sync::{Arc, Mutex, MutexGuard};

use num_traits::Float;

/// Overwrite-oldest ring of `T`.
///
/// Storage is allocated once. `head` is the oldest element, `count` how many are live.
#[derive(Debug, Clone)]
pub struct CircularBuffer<T> {
    data: Vec<T>,
    capacity: usize,
    head: usize,
    count: usize,
}

impl<T: Copy> CircularBuffer<T> {
    /// A zero capacity is bumped to one
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
            head: 0,
            count: 0,
        }
    }

    pub fn push(&mut self, value: T) {
        let tail = (self.head + self.count) % self.capacity;
        if tail == self.data.len() {
            // Still growing into the preallocated storage
            self.data.push(value);
        } else {
            self.data[tail] = value;
        }
        if self.count < self.capacity {
            self.count += 1;
        } else {
            self.head = (self.head + 1) % self.capacity;
        }
    }

    /// Copy of the live elements, oldest first
    pub fn snapshot(&self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.count);
        let first = (self.capacity - self.head).min(self.count);
        out.extend_from_slice(&self.data[self.head..self.head + first]);
        out.extend_from_slice(&self.data[..self.count - first]);
        out
    }

    /// Most recently pushed element
    pub fn last(&self) -> Option<T> {
        if self.count == 0 {
            return None;
        }
        Some(self.data[(self.head + self.count - 1) % self.capacity])
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.head = 0;
        self.count = 0;
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Min and max over the non-NaN values, `None` if there are none
pub fn finite_range<T: Float>(values: &[T]) -> Option<(T, T)> {
    values
        .iter()
        .copied()
        .filter(|v| !v.is_nan())
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

/// The two plotted series. NaN marks a gap in the filtered series.
#[derive(Debug, Clone)]
pub struct PlotWindows {
    pub raw: CircularBuffer<f64>,
    pub filtered: CircularBuffer<f64>,
}

/// Ordered copies of both plot windows taken under one lock
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlotSnapshot {
    pub raw: Vec<f64>,
    pub filtered: Vec<f64>,
}

/// Shared handle to the plot windows.
///
/// The pipeline pushes, anyone else (a redraw hook) snapshots. Both go through the same mutex.
#[derive(Debug, Clone)]
pub struct PlotBuffers {
    inner: Arc<Mutex<PlotWindows>>,
}

impl PlotBuffers {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PlotWindows {
                raw: CircularBuffer::new(capacity),
                filtered: CircularBuffer::new(capacity),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PlotWindows> {
        // Plain data, a panicked writer can't leave it half-updated in a way that matters
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, raw: f64, filtered: f64) {
        let mut windows = self.lock();
        windows.raw.push(raw);
        windows.filtered.push(filtered);
    }

    pub fn snapshot(&self) -> PlotSnapshot {
        let windows = self.lock();
        PlotSnapshot {
            raw: windows.raw.snapshot(),
            filtered: windows.filtered.snapshot(),
        }
    }

    pub fn reset(&self) {
        let mut windows = self.lock();
        windows.raw.clear();
        windows.filtered.clear();
    }
}
