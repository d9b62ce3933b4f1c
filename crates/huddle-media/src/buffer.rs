use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use crate::errors::MediaError;

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// A reference-counted block of raw media bytes (a PCM chunk or an I420 image).
///
/// Every `FrameBuffer` value is one reference. Cloning (or [`add_ref`]) takes
/// another reference, dropping (or [`release`]) gives it back, so a reference
/// can only ever be released once. The backing storage goes back to its pool
/// when the last reference is released and not before.
///
/// [`add_ref`]: FrameBuffer::add_ref
/// [`release`]: FrameBuffer::release
#[derive(Clone)]
pub struct FrameBuffer {
    storage: Arc<Storage>,
}

struct Storage {
    id: u64,
    data: Vec<u8>,
    pool: Option<Weak<PoolInner>>,
}

impl Drop for Storage {
    fn drop(&mut self) {
        let Some(pool) = self.pool.as_ref().and_then(Weak::upgrade) else {
            return;
        };
        let data = std::mem::take(&mut self.data);
        pool.reclaim(data);
    }
}

impl FrameBuffer {
    /// Wrap bytes that do not belong to any pool.
    pub fn detached(data: Vec<u8>) -> Self {
        Self {
            storage: Arc::new(Storage {
                id: NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed),
                data,
                pool: None,
            }),
        }
    }

    /// Unique id of this allocation. A recycled backing store gets a new id.
    pub fn id(&self) -> u64 {
        self.storage.id
    }

    pub fn len(&self) -> usize {
        self.storage.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.storage.data
    }

    /// Number of live references, including this one.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.storage)
    }

    /// Take an additional reference for use beyond the current callback.
    pub fn add_ref(&self) -> FrameBuffer {
        self.clone()
    }

    /// Give this reference back. Returns the number of references left.
    pub fn release(self) -> usize {
        let remaining = Arc::strong_count(&self.storage) - 1;
        drop(self);
        remaining
    }

    /// Mutable access, only while this is the sole reference.
    pub fn make_mut(&mut self) -> Option<&mut [u8]> {
        Arc::get_mut(&mut self.storage).map(|s| s.data.as_mut_slice())
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("id", &self.storage.id)
            .field("len", &self.storage.data.len())
            .field("refs", &self.ref_count())
            .finish()
    }
}

struct PoolInner {
    free: Mutex<Vec<Vec<u8>>>,
    outstanding: AtomicUsize,
    capacity: usize,
}

impl PoolInner {
    fn reclaim(&self, mut data: Vec<u8>) {
        data.clear();
        self.free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(data);
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Bounded allocator for frame buffers.
///
/// Producers acquire buffers here; storage is recycled once every reference
/// to a buffer has been released. When `capacity` buffers are still
/// referenced, `acquire` fails instead of growing.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(Vec::new()),
                outstanding: AtomicUsize::new(0),
                capacity,
            }),
        }
    }

    /// Acquire a zero-filled buffer of `len` bytes.
    pub fn acquire(&self, len: usize) -> Result<FrameBuffer, MediaError> {
        self.reserve()?;
        let mut data = self
            .inner
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_default();
        data.resize(len, 0);
        Ok(FrameBuffer {
            storage: Arc::new(Storage {
                id: NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed),
                data,
                pool: Some(Arc::downgrade(&self.inner)),
            }),
        })
    }

    /// Acquire a buffer holding a copy of `bytes`.
    pub fn acquire_copy(&self, bytes: &[u8]) -> Result<FrameBuffer, MediaError> {
        let mut buffer = self.acquire(bytes.len())?;
        if let Some(dst) = buffer.make_mut() {
            dst.copy_from_slice(bytes);
        }
        Ok(buffer)
    }

    /// Buffers currently referenced somewhere.
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    fn reserve(&self) -> Result<(), MediaError> {
        let capacity = self.inner.capacity;
        self.inner
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < capacity).then_some(n + 1)
            })
            .map(|_| ())
            .map_err(|_| MediaError::PoolExhausted { capacity })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_and_release_track_ref_count() {
        let pool = BufferPool::new(2);
        let buf = pool.acquire(16).unwrap();
        assert_eq!(buf.ref_count(), 1);

        let extra = buf.add_ref();
        assert_eq!(buf.ref_count(), 2);
        assert_eq!(extra.release(), 1);
        assert_eq!(buf.ref_count(), 1);
        assert_eq!(pool.outstanding(), 1);

        assert_eq!(buf.release(), 0);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn exhausted_pool_refuses_until_release() {
        let pool = BufferPool::new(1);
        let first = pool.acquire(4).unwrap();
        assert_eq!(
            pool.acquire(4).unwrap_err(),
            MediaError::PoolExhausted { capacity: 1 }
        );

        // A retained reference keeps the slot busy.
        let retained = first.add_ref();
        drop(first);
        assert!(pool.acquire(4).is_err());

        drop(retained);
        assert!(pool.acquire(4).is_ok());
    }

    #[test]
    fn referenced_buffer_is_never_handed_out_again() {
        let pool = BufferPool::new(4);
        let held = pool.acquire_copy(&[1, 2, 3]).unwrap();
        let other = pool.acquire(3).unwrap();
        assert_ne!(held.id(), other.id());
        assert_eq!(held.as_slice(), &[1, 2, 3]);
        assert_eq!(other.as_slice(), &[0, 0, 0]);
    }

    #[test]
    fn make_mut_only_when_unique() {
        let pool = BufferPool::new(1);
        let mut buf = pool.acquire(2).unwrap();
        assert!(buf.make_mut().is_some());
        let shared = buf.clone();
        assert!(buf.make_mut().is_none());
        drop(shared);
        assert!(buf.make_mut().is_some());
    }

    #[test]
    fn detached_buffer_outlives_nothing() {
        let buf = FrameBuffer::detached(vec![9; 8]);
        assert_eq!(buf.len(), 8);
        assert_eq!(buf.release(), 0);
    }
}
