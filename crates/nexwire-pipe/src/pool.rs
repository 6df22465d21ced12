//! Scratch buffers for encoding channel items.
//!
//! Buffers are rented by value and go back to the pool when the rental is
//! dropped, so a buffer can never be touched by two holders at once.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use bytes::BytesMut;
use object_pool::{Pool, ReusableOwned};

const DEFAULT_BUFFER_SIZE: usize = 4 * 1024;
const DEFAULT_POOL_CAPACITY: usize = 32;

/// Pool of growable byte buffers.
#[derive(Clone)]
pub struct BufferPool {
    pool: Arc<Pool<BytesMut>>,
    buffer_size: usize,
}

impl BufferPool {
    /// 32 buffers of 4 KiB.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_POOL_CAPACITY, DEFAULT_BUFFER_SIZE)
    }

    pub fn with_capacity(capacity: usize, buffer_size: usize) -> Self {
        let pool = Pool::new(capacity, move || BytesMut::with_capacity(buffer_size));
        Self {
            pool: Arc::new(pool),
            buffer_size,
        }
    }

    /// Rent an empty buffer.
    ///
    /// Falls back to a fresh allocation when the pool is empty.
    pub fn rent(&self) -> PooledBuf {
        let buffer_size = self.buffer_size;
        let mut buf = self
            .pool
            .pull_owned(move || BytesMut::with_capacity(buffer_size));
        buf.clear();
        PooledBuf { inner: buf }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Buffers currently idle in the pool.
    pub fn available(&self) -> usize {
        self.pool.len()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("buffer_size", &self.buffer_size)
            .field("available", &self.available())
            .finish()
    }
}

/// A rented buffer; returns itself to the pool on drop.
pub struct PooledBuf {
    inner: ReusableOwned<BytesMut>,
}

impl Deref for PooledBuf {
    type Target = BytesMut;

    fn deref(&self) -> &BytesMut {
        &self.inner
    }
}

impl DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut BytesMut {
        &mut self.inner
    }
}
