//! Reusable scratch buffers for packed batches.

use crate::{
    Result,
    pack::{WORDS_PER_RECORD, packed_len},
};
use core::ops::{Deref, DerefMut};
use log::debug;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Default number of records a freshly allocated buffer can hold.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Pool of word buffers shared between batch verification calls.
///
/// Buffers never shrink: a buffer allocated for a large batch stays large
/// and can serve any smaller batch afterwards.
#[derive(Debug)]
pub struct BufferPool {
    free: Mutex<Vec<Vec<u32>>>,
    capacity: usize,
}

impl BufferPool {
    /// Create an empty pool whose buffers hold [`DEFAULT_CAPACITY`] records.
    pub const fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create an empty pool whose fresh buffers hold at least `records`
    /// records.
    pub const fn with_capacity(records: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            capacity: records,
        }
    }

    /// Number of records a freshly allocated buffer can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of idle buffers currently held by the pool.
    pub fn idle(&self) -> usize {
        self.lock().len()
    }

    /// Borrow a buffer of exactly `32 * count` words.
    ///
    /// An idle buffer too small for the batch is grown rather than kept
    /// alongside a new one, so the pool never holds more buffers than were
    /// on loan at once. The contents are unspecified. The buffer goes back
    /// to the pool when the returned guard is dropped.
    pub fn acquire(&self, count: usize) -> Result<PooledWords<'_>> {
        let len = packed_len(count)?;
        let mut words = self.take(len).unwrap_or_default();
        if words.capacity() < len {
            let capacity = len.max(packed_len(self.capacity).unwrap_or(len));
            debug!("growing word buffer to {} records", capacity / WORDS_PER_RECORD);
            words.reserve_exact(capacity - words.len());
        }
        words.resize(len, 0);

        Ok(PooledWords {
            pool: self,
            words: Some(words),
        })
    }

    /// Return a buffer to the pool.
    pub fn release(&self, words: Vec<u32>) {
        self.lock().push(words);
    }

    /// Remove the first idle buffer holding `len` words, or else the
    /// largest idle buffer.
    fn take(&self, len: usize) -> Option<Vec<u32>> {
        let mut free = self.lock();
        let index = free
            .iter()
            .position(|words| words.capacity() >= len)
            .or_else(|| (0..free.len()).max_by_key(|&index| free[index].capacity()))?;
        Some(free.swap_remove(index))
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Vec<u32>>> {
        // a poisoned free list is still a valid free list
        self.free.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Word buffer on loan from a [`BufferPool`].
#[derive(Debug)]
pub struct PooledWords<'a> {
    pool: &'a BufferPool,
    words: Option<Vec<u32>>,
}

impl PooledWords<'_> {
    /// Detach the buffer from the pool.
    pub fn into_inner(mut self) -> Vec<u32> {
        self.words.take().unwrap_or_default()
    }
}

impl Deref for PooledWords<'_> {
    type Target = [u32];

    fn deref(&self) -> &[u32] {
        self.words.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for PooledWords<'_> {
    fn deref_mut(&mut self) -> &mut [u32] {
        self.words.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for PooledWords<'_> {
    fn drop(&mut self) {
        if let Some(words) = self.words.take() {
            self.pool.release(words);
        }
    }
}
