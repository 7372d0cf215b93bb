//! Budgeted buffer pool with best-fit reuse.

use crate::error::{Error, Result};
use crate::observability;
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One buffer owned by the pool.
struct PoolData {
    id: u64,
    reserved_size: usize,
    size: usize,
    refs: usize,
    storage: Box<[u8]>,
}

#[derive(Default)]
struct PoolState {
    next_id: u64,
    used: HashMap<u64, PoolData>,
    unused: Vec<PoolData>,
    allocations: u64,
    reuses: u64,
}

impl PoolState {
    fn used_size(&self) -> usize {
        self.used.values().map(|data| data.reserved_size).sum()
    }

    fn unused_size(&self) -> usize {
        self.unused.iter().map(|data| data.reserved_size).sum()
    }

    fn wasted_size(&self) -> usize {
        self.used.values().map(|data| data.reserved_size - data.size).sum()
    }

    fn stats(&self, max_size: usize) -> PoolStats {
        let used_bytes = self.used_size();
        PoolStats {
            max_bytes: max_size,
            used_bytes,
            allocated_bytes: used_bytes + self.unused_size(),
            available_bytes: max_size.saturating_sub(used_bytes),
            wasted_bytes: self.wasted_size(),
            used_buffers: self.used.len(),
            unused_buffers: self.unused.len(),
            allocations: self.allocations,
            reuses: self.reuses,
        }
    }

    /// Free the largest unused buffer. Returns its reserved size.
    fn evict_largest(&mut self) -> Option<usize> {
        let (index, _) = self
            .unused
            .iter()
            .enumerate()
            .max_by_key(|(_, data)| data.reserved_size)?;
        let data = self.unused.swap_remove(index);
        Some(data.reserved_size)
    }
}

struct PoolInner {
    max_size: usize,
    state: Mutex<PoolState>,
}

impl PoolInner {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Snapshot of pool accounting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Authorized budget.
    pub max_bytes: usize,
    /// Reserved bytes of checked-out buffers.
    pub used_bytes: usize,
    /// Reserved bytes of every live buffer, checked out or not.
    pub allocated_bytes: usize,
    /// Budget left for checkouts.
    pub available_bytes: usize,
    /// Reserved but unrequested bytes of checked-out buffers.
    pub wasted_bytes: usize,
    /// Checked-out buffers.
    pub used_buffers: usize,
    /// Buffers kept for reuse.
    pub unused_buffers: usize,
    /// Fresh allocations so far.
    pub allocations: u64,
    /// Allocations served by reusing a buffer.
    pub reuses: u64,
}

/// Pool of byte buffers bounded by a budget on checked-out bytes.
///
/// Released buffers are kept and handed out again to later requests that
/// fit, smallest fitting capacity first. Memory is only returned to the
/// system by the `clear*` calls or when the pool and all its buffers are
/// dropped. Every operation takes one internal lock, so the pool can be
/// shared across render threads; cloning shares the same pool.
///
/// # Example
///
/// ```rust
/// use fxhost::memory::MemoryPool;
///
/// let pool = MemoryPool::new(1 << 20);
/// let mut buffer = pool.allocate(4096).unwrap();
/// buffer.get_mut().unwrap()[..5].copy_from_slice(b"hello");
/// assert_eq!(pool.used_memory_size(), 4096);
///
/// drop(buffer);
/// assert_eq!(pool.used_memory_size(), 0);
/// assert_eq!(pool.allocated_memory_size(), 4096);
///
/// // reuses the released buffer
/// let smaller = pool.allocate(1000).unwrap();
/// assert_eq!(smaller.reserved_size(), 4096);
/// assert_eq!(pool.wasted_memory_size(), 3096);
/// ```
#[derive(Clone)]
pub struct MemoryPool {
    inner: Arc<PoolInner>,
}

impl MemoryPool {
    /// A pool allowing at most `max_size` checked-out bytes.
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                max_size,
                state: Mutex::new(PoolState::default()),
            }),
        }
    }

    /// Check out a buffer of `size` bytes.
    ///
    /// Reuses the released buffer with the smallest capacity that holds
    /// `size`, skipping any whose capacity the budget can't take right now.
    /// Otherwise allocates exactly `size` bytes, failing with
    /// [`Error::CapacityExceeded`] when that would exceed the budget.
    pub fn allocate(&self, size: usize) -> Result<PoolBuffer> {
        let mut state = self.inner.lock();
        let available = self.inner.max_size.saturating_sub(state.used_size());

        let best_fit = state
            .unused
            .iter()
            .enumerate()
            .filter(|(_, data)| data.reserved_size >= size && data.reserved_size <= available)
            .min_by_key(|(_, data)| data.reserved_size)
            .map(|(index, _)| index);

        let mut data = match best_fit {
            Some(index) => {
                state.reuses += 1;
                state.unused.swap_remove(index)
            }
            None => {
                if size > available {
                    return Err(Error::CapacityExceeded {
                        requested: size,
                        available,
                    });
                }
                let mut storage = Vec::new();
                storage
                    .try_reserve_exact(size)
                    .map_err(|e| Error::AllocationFailed(e.to_string()))?;
                storage.resize(size, 0);

                let id = state.next_id;
                state.next_id += 1;
                state.allocations += 1;
                PoolData {
                    id,
                    reserved_size: size,
                    size,
                    refs: 0,
                    storage: storage.into_boxed_slice(),
                }
            }
        };

        data.size = size;
        data.refs = 1;
        let buffer = PoolBuffer {
            pool: Arc::clone(&self.inner),
            id: data.id,
            ptr: NonNull::from(&mut *data.storage).cast::<u8>(),
            size,
            reserved_size: data.reserved_size,
        };
        tracing::trace!(id = data.id, size, reserved = data.reserved_size, "pool buffer checked out");
        state.used.insert(data.id, data);

        observability::record_pool_usage(&state.stats(self.inner.max_size));
        Ok(buffer)
    }

    /// Authorized budget.
    pub fn max_memory_size(&self) -> usize {
        self.inner.max_size
    }

    /// Reserved bytes of checked-out buffers.
    pub fn used_memory_size(&self) -> usize {
        self.inner.lock().used_size()
    }

    /// Reserved bytes of all live buffers.
    pub fn allocated_memory_size(&self) -> usize {
        let state = self.inner.lock();
        state.used_size() + state.unused_size()
    }

    /// Budget left for checkouts.
    pub fn available_memory_size(&self) -> usize {
        self.inner.max_size.saturating_sub(self.used_memory_size())
    }

    /// Reserved but unrequested bytes of checked-out buffers.
    pub fn wasted_memory_size(&self) -> usize {
        self.inner.lock().wasted_size()
    }

    /// Accounting snapshot.
    pub fn stats(&self) -> PoolStats {
        self.inner.lock().stats(self.inner.max_size)
    }

    /// Free every released buffer. Returns the bytes freed.
    pub fn clear_all(&self) -> usize {
        let mut state = self.inner.lock();
        let freed = state.unused_size();
        state.unused.clear();
        tracing::debug!(freed, "memory pool cleared");
        observability::record_pool_usage(&state.stats(self.inner.max_size));
        freed
    }

    /// Free released buffers, largest first, until at least `size` bytes are
    /// freed or none is left. Returns the bytes freed.
    pub fn clear(&self, size: usize) -> usize {
        let mut state = self.inner.lock();
        let mut freed = 0;
        while freed < size {
            match state.evict_largest() {
                Some(reserved) => freed += reserved,
                None => break,
            }
        }
        observability::record_pool_usage(&state.stats(self.inner.max_size));
        freed
    }

    /// Free the largest released buffer. Returns the bytes freed.
    pub fn clear_one(&self) -> usize {
        let mut state = self.inner.lock();
        let freed = state.evict_largest().unwrap_or(0);
        observability::record_pool_usage(&state.stats(self.inner.max_size));
        freed
    }
}

impl std::fmt::Debug for MemoryPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPool").field("stats", &self.stats()).finish()
    }
}

/// Reference-counted handle to a checked-out pool buffer.
///
/// Cloning takes another reference. When the last reference drops the
/// buffer goes back to the pool for reuse. The pool owns the storage; a
/// handle only grants access to it.
pub struct PoolBuffer {
    pool: Arc<PoolInner>,
    id: u64,
    ptr: NonNull<u8>,
    size: usize,
    reserved_size: usize,
}

// SAFETY: the storage is owned by the pool and stays put while the buffer is
// checked out. Shared references only read it; writing needs `&mut self`
// and a reference count of one.
unsafe impl Send for PoolBuffer {}
unsafe impl Sync for PoolBuffer {}

impl PoolBuffer {
    /// Allocation-order id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Requested size.
    pub fn len(&self) -> usize {
        self.size
    }

    /// Whether the requested size is zero.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Capacity of the underlying buffer.
    pub fn reserved_size(&self) -> usize {
        self.reserved_size
    }

    /// Live references to this buffer.
    pub fn ref_count(&self) -> usize {
        self.pool.lock().used.get(&self.id).map_or(0, |data| data.refs)
    }

    /// The requested bytes. A reused buffer keeps its previous contents.
    pub fn data(&self) -> &[u8] {
        // SAFETY: the pool keeps the storage alive and unmoved while checked out.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.size) }
    }

    /// Writable access, only while this is the sole reference.
    pub fn get_mut(&mut self) -> Option<&mut [u8]> {
        if self.ref_count() != 1 {
            return None;
        }
        // SAFETY: sole reference, borrowed mutably for the slice's lifetime.
        Some(unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.size) })
    }
}

impl Clone for PoolBuffer {
    fn clone(&self) -> Self {
        if let Some(data) = self.pool.lock().used.get_mut(&self.id) {
            data.refs += 1;
        }
        Self {
            pool: Arc::clone(&self.pool),
            id: self.id,
            ptr: self.ptr,
            size: self.size,
            reserved_size: self.reserved_size,
        }
    }
}

impl Drop for PoolBuffer {
    fn drop(&mut self) {
        let mut state = self.pool.lock();
        let released = match state.used.get_mut(&self.id) {
            Some(data) => {
                data.refs -= 1;
                data.refs == 0
            }
            None => false,
        };
        if released {
            if let Some(data) = state.used.remove(&self.id) {
                tracing::trace!(id = data.id, reserved = data.reserved_size, "pool buffer released");
                state.unused.push(data);
            }
            observability::record_pool_usage(&state.stats(self.pool.max_size));
        }
    }
}

impl std::fmt::Debug for PoolBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolBuffer")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("reserved_size", &self.reserved_size)
            .finish()
    }
}
