//! Fixed-capacity memory destination.

use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Debug)]
struct Inner {
    data: Vec<u8>,
    capacity: usize,
}

/// Cloneable handle to a caller-owned, fixed-capacity byte buffer.
///
/// All clones share the same storage. A write that does not fit in the
/// remaining capacity is rejected whole.
#[derive(Debug, Clone)]
pub struct SharedBuffer {
    inner: Arc<Mutex<Inner>>,
}

impl SharedBuffer {
    /// Create an empty buffer holding at most `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                data: Vec::with_capacity(capacity),
                capacity,
            })),
        }
    }

    /// Append `bytes`, returning how many were written: all of them, or 0
    /// when they would overflow the capacity.
    pub fn write(&self, bytes: &[u8]) -> usize {
        let mut inner = self.inner.lock();
        if inner.data.len() + bytes.len() > inner.capacity {
            return 0;
        }
        inner.data.extend_from_slice(bytes);
        bytes.len()
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.inner.lock().data.len()
    }

    /// Whether nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of bytes the buffer holds.
    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    /// Copy of the written bytes.
    pub fn to_vec(&self) -> Vec<u8> {
        self.inner.lock().data.clone()
    }

    /// Discard the written bytes, keeping the capacity.
    pub fn clear(&self) {
        self.inner.lock().data.clear();
    }
}
