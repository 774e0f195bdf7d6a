//! Limited chunk buffer.

use std::cmp;

use rayon;

/// Chunk buffer builder.
pub struct LimitedBufferBuilder {
    buffer_limit: usize,
    preallocate: bool,
}

impl LimitedBufferBuilder {
    pub fn new(buffer_limit: usize, preallocate: bool) -> Self {
        LimitedBufferBuilder {
            buffer_limit: cmp::max(buffer_limit, 1),
            preallocate,
        }
    }

    /// Creates a builder of buffers holding `budget / record_size_estimate` records, at least one.
    ///
    /// The record size is an estimate, so the budget is an approximate bound of the buffer memory,
    /// not a precise one.
    pub fn from_budget(budget: u64, record_size_estimate: u64) -> Self {
        let limit = budget / cmp::max(record_size_estimate, 1);
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);

        LimitedBufferBuilder::new(limit, false)
    }

    /// Maximum number of records in a buffer.
    pub fn buffer_limit(&self) -> usize {
        self.buffer_limit
    }

    /// Creates a new buffer.
    pub fn build<T>(&self) -> LimitedBuffer<T> {
        if self.preallocate {
            LimitedBuffer::with_capacity(self.buffer_limit)
        } else {
            LimitedBuffer::new(self.buffer_limit)
        }
    }
}

/// Buffer limited by elements count.
pub struct LimitedBuffer<T> {
    limit: usize,
    inner: Vec<T>,
}

impl<T> LimitedBuffer<T> {
    pub fn new(limit: usize) -> Self {
        LimitedBuffer {
            limit,
            inner: Vec::new(),
        }
    }

    pub fn with_capacity(limit: usize) -> Self {
        LimitedBuffer {
            limit,
            inner: Vec::with_capacity(limit),
        }
    }

    /// Adds a new element to the buffer.
    pub fn push(&mut self, item: T) {
        self.inner.push(item);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Checks if the buffer reached the limit.
    pub fn is_full(&self) -> bool {
        self.inner.len() >= self.limit
    }
}

impl<T> IntoIterator for LimitedBuffer<T> {
    type Item = T;
    type IntoIter = <Vec<T> as IntoIterator>::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.into_iter()
    }
}

impl<T: Send> rayon::slice::ParallelSliceMut<T> for LimitedBuffer<T> {
    fn as_parallel_slice_mut(&mut self) -> &mut [T] {
        self.inner.as_mut_slice()
    }
}
