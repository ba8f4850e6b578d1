//! A bounded, thread-safe, read-through cache of decompressed blocks keyed by their on-disk
//! position.
//!
//! The cache never decompresses anything itself. Callers hand [`BlockCache::get`] a fetch
//! closure that reads and decompresses the block, and the cache makes sure that:
//!
//! - at most `capacity` slots are resident, evicting the least recently used one *before* a new
//!   fetch starts;
//! - concurrent requests for the same position run the fetch once and share its result;
//! - a slow fetch of one position never blocks requests for other positions;
//! - a failed fetch leaves nothing behind, so the position can be retried.
//!
//! Bookkeeping (membership and recency order) lives in an [`LruCache`] behind one short-held
//! lock. Each slot has its own lock which is held for the duration of its fetch.

use std::num::NonZeroUsize;
use std::sync::Arc;

use log::trace;
use lru::LruCache;
use parking_lot::Mutex;

/// Decompressed block contents and the number of bytes the block occupied on disk
pub type CachedBlock = (Arc<[u8]>, u32);

#[derive(Debug, Default)]
struct Slot {
    value: Mutex<Option<CachedBlock>>,
}

fn clamp(capacity: usize) -> NonZeroUsize {
    NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)
}

/// LRU cache of decompressed blocks with single-flight fetches
#[derive(Debug)]
pub struct BlockCache {
    slots: Mutex<LruCache<u64, Arc<Slot>>>,
}

impl BlockCache {
    /// Create a cache holding at most `capacity` blocks. A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(LruCache::new(clamp(capacity))),
        }
    }

    // Find or insert the slot for `position`, evicting before the new slot goes in
    fn slot(&self, position: u64) -> Arc<Slot> {
        let mut slots = self.slots.lock();
        // `get` rather than `peek` to promote it to most recently used
        if let Some(slot) = slots.get(&position) {
            return Arc::clone(slot);
        }
        while slots.len() >= slots.cap().get() {
            match slots.pop_lru() {
                Some((evicted, _)) => trace!("evicting block at {evicted}"),
                None => break,
            }
        }
        let slot = Arc::new(Slot::default());
        slots.put(position, Arc::clone(&slot));
        slot
    }

    /// Return the block at `position`, calling `fetch` to produce it if it is not resident.
    ///
    /// `fetch` returns the decompressed bytes and the size the block occupied on disk. If another
    /// caller is already fetching the same position, this call waits for that fetch and returns
    /// its result instead of calling `fetch`.
    pub fn get<F, E>(&self, position: u64, fetch: F) -> Result<CachedBlock, E>
    where F: FnOnce() -> Result<(Vec<u8>, u32), E>
    {
        let slot = self.slot(position);

        let mut value = slot.value.lock();
        if let Some((data, size)) = value.as_ref() {
            trace!("cache hit for block at {position}");
            return Ok((Arc::clone(data), *size));
        }

        trace!("cache miss for block at {position}");
        match fetch() {
            Ok((data, size)) => {
                let data: Arc<[u8]> = data.into();
                *value = Some((Arc::clone(&data), size));
                Ok((data, size))
            },
            Err(e) => {
                drop(value);
                let mut slots = self.slots.lock();
                // Only drop our own slot; it may already have been evicted and replaced
                if slots.peek(&position).is_some_and(|resident| Arc::ptr_eq(resident, &slot)) {
                    slots.pop(&position);
                }
                Err(e)
            },
        }
    }

    /// Change the maximum number of resident blocks, evicting from the least recently used end
    /// until the cache fits.
    pub fn resize(&self, capacity: usize) {
        self.slots.lock().resize(clamp(capacity));
    }

    pub fn capacity(&self) -> usize {
        self.slots.lock().cap().get()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a slot for `position` is resident (fetched or in flight). Does not affect recency.
    pub fn contains(&self, position: u64) -> bool {
        self.slots.lock().contains(&position)
    }

    /// Resident positions from least to most recently used
    pub fn positions(&self) -> Vec<u64> {
        self.slots.lock().iter().rev().map(|(position, _)| *position).collect()
    }

    pub fn clear(&self) {
        self.slots.lock().clear();
    }
}
