//! Fixed pool of frame slots backed by one contiguous allocation
//!
//! All memory is obtained in [`FramePool::create`]. After that, frames are
//! only recycled between the free-list and the ready-queue, so descriptor
//! addresses and payload spans stay valid for the life of the pool.

use crate::descriptor::{FrameDescriptor, Residency};
use crate::error::PoolError;
use crate::free_list::FreeList;
use crate::handles::{ConsumerHandle, ProducerHandle};
use crate::ready_queue::ReadyQueue;
use crate::sync::{AtomicU64, Ordering};
use crate::types::{PoolConfig, CACHE_LINE_SIZE};
use crossbeam::utils::CachePadded;
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;
use std::sync::Arc;

/// Shared state behind the producer and consumer handles
pub struct FramePool {
    descriptors: Box<[FrameDescriptor]>,
    storage: NonNull<u8>,
    layout: Layout,
    config: PoolConfig,
    frame_bytes: usize,
    pub(crate) free: FreeList,
    pub(crate) ready: ReadyQueue,
    pub(crate) counters: CachePadded<PoolCounters>,
}

// SAFETY: `storage` is only reached through descriptors, whose access is
// governed by the residency protocol (see `FrameDescriptor`).
unsafe impl Send for FramePool {}
unsafe impl Sync for FramePool {}

/// Monotonic event counters, readable from any thread
pub(crate) struct PoolCounters {
    pub(crate) published: AtomicU64,
    pub(crate) released: AtomicU64,
    pub(crate) dropped_exhausted: AtomicU64,
    pub(crate) dropped_overflow: AtomicU64,
}

impl PoolCounters {
    fn new() -> Self {
        Self {
            published: AtomicU64::new(0),
            released: AtomicU64::new(0),
            dropped_exhausted: AtomicU64::new(0),
            dropped_overflow: AtomicU64::new(0),
        }
    }
}

impl FramePool {
    /// Allocate `frame_count` slots of `width * height * components_per_pixel`
    /// bytes and issue the single producer and single consumer capability.
    ///
    /// All slots start on the free-list; the ready-queue starts empty. The
    /// pool is freed when both handles (and any [`PoolMonitor`]) are dropped.
    pub fn create(config: PoolConfig) -> Result<(ProducerHandle, ConsumerHandle), PoolError> {
        let pool = Arc::new(Self::allocate(config)?);

        log::info!(
            "Frame pool created: {} frames of {}x{}x{} ({} bytes each)",
            config.frame_count,
            config.width,
            config.height,
            config.components_per_pixel,
            pool.frame_bytes
        );

        Ok((ProducerHandle::new(pool.clone()), ConsumerHandle::new(pool)))
    }

    fn allocate(config: PoolConfig) -> Result<Self, PoolError> {
        if config.width == 0 || config.height == 0 || config.components_per_pixel == 0 {
            return Err(PoolError::InvalidConfig(format!(
                "frame geometry {}x{}x{} is empty",
                config.width, config.height, config.components_per_pixel
            )));
        }
        if config.frame_count == 0 {
            return Err(PoolError::InvalidConfig("frame_count must be > 0".into()));
        }
        if config.frame_count > u32::MAX as usize {
            return Err(PoolError::InvalidConfig(format!(
                "frame_count {} exceeds {}",
                config.frame_count,
                u32::MAX
            )));
        }

        let overflow = || PoolError::Allocation { bytes: usize::MAX };
        let frame_bytes = config.frame_bytes().ok_or_else(overflow)?;
        let stride = config.frame_stride().ok_or_else(overflow)?;
        let total = config.storage_bytes().ok_or_else(overflow)?;

        let layout = Layout::from_size_align(total, CACHE_LINE_SIZE)
            .map_err(|_| PoolError::Allocation { bytes: total })?;

        let mut descriptors = Vec::new();
        descriptors
            .try_reserve_exact(config.frame_count)
            .map_err(|_| PoolError::Allocation {
                bytes: config.frame_count * std::mem::size_of::<FrameDescriptor>(),
            })?;

        // SAFETY: layout has non-zero size (all dimensions checked above).
        let storage = NonNull::new(unsafe { alloc_zeroed(layout) })
            .ok_or(PoolError::Allocation { bytes: total })?;

        for index in 0..config.frame_count {
            // SAFETY: index * stride + frame_bytes <= total.
            let data = unsafe { storage.as_ptr().add(index * stride) };
            descriptors.push(FrameDescriptor::new(index as u32, data, frame_bytes));
        }

        let pool = Self {
            descriptors: descriptors.into_boxed_slice(),
            storage,
            layout,
            config,
            frame_bytes,
            free: FreeList::new(),
            ready: ReadyQueue::new(),
            counters: CachePadded::new(PoolCounters::new()),
        };

        // Slot 0 ends up at the bottom of the stack
        for desc in pool.descriptors.iter() {
            // SAFETY: the boxed slice never moves, and no descriptor is linked yet.
            unsafe { pool.free.push(NonNull::from(desc)) };
        }

        Ok(pool)
    }

    pub fn config(&self) -> PoolConfig {
        self.config
    }

    /// Fixed payload capacity of each slot
    pub fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }

    pub fn capacity(&self) -> usize {
        self.descriptors.len()
    }

    pub(crate) fn descriptor(&self, index: u32) -> Option<&FrameDescriptor> {
        self.descriptors.get(index as usize)
    }

    /// Snapshot of slot residency and event counters.
    ///
    /// Each slot is counted exactly once, so the four residency counts always
    /// add up to the capacity even while both threads are running.
    pub fn stats(&self) -> PoolStats {
        let mut stats = PoolStats {
            capacity: self.capacity(),
            free: 0,
            filling: 0,
            ready: 0,
            checked_out: 0,
            published: self.counters.published.load(Ordering::Relaxed),
            released: self.counters.released.load(Ordering::Relaxed),
            dropped_exhausted: self.counters.dropped_exhausted.load(Ordering::Relaxed),
            dropped_overflow: self.counters.dropped_overflow.load(Ordering::Relaxed),
        };

        for desc in self.descriptors.iter() {
            match desc.residency() {
                Residency::Free => stats.free += 1,
                Residency::Filling => stats.filling += 1,
                Residency::Ready => stats.ready += 1,
                Residency::CheckedOut => stats.checked_out += 1,
            }
        }

        stats
    }

    /// Census by structure membership: walks the free-list and the
    /// ready-queue and cross-checks every slot's residency.
    ///
    /// Only exact while neither handle is mid-operation. Concurrent use is
    /// memory safe but may report a transient mismatch.
    #[doc(hidden)]
    pub fn audit(&self) -> PoolAudit {
        let capacity = self.capacity();
        let mut seen = vec![false; capacity];
        let mut audit = PoolAudit {
            capacity,
            free_listed: 0,
            queued: 0,
            filling: 0,
            misplaced: 0,
            orphaned: 0,
        };

        let mut visit = |node: NonNull<FrameDescriptor>, expected: &[Residency]| {
            // SAFETY: both structures only ever link descriptors of this pool.
            let desc = unsafe { node.as_ref() };
            let slot = desc.index() as usize;
            if seen[slot] || !expected.contains(&desc.residency()) {
                audit.misplaced += 1;
            }
            seen[slot] = true;
        };

        // One past capacity so a cycle shows up as a repeat visit
        let mut free_listed = 0;
        self.free.walk(capacity + 1, |node| {
            free_listed += 1;
            visit(node, &[Residency::Free]);
        });

        let mut queued = 0;
        self.ready.walk(capacity + 1, |node| {
            // Only the head can be checked out
            let expected: &[Residency] = if queued == 0 {
                &[Residency::Ready, Residency::CheckedOut]
            } else {
                &[Residency::Ready]
            };
            queued += 1;
            visit(node, expected);
        });

        audit.free_listed = free_listed;
        audit.queued = queued;
        for (desc, _) in self.descriptors.iter().zip(&seen).filter(|(_, seen)| !**seen) {
            match desc.residency() {
                Residency::Filling => audit.filling += 1,
                _ => audit.orphaned += 1,
            }
        }

        audit
    }
}

impl Drop for FramePool {
    fn drop(&mut self) {
        // SAFETY: allocated in `allocate` with this exact layout. Both handles
        // are gone, so no descriptor is referenced any more.
        unsafe { dealloc(self.storage.as_ptr(), self.layout) };
    }
}

/// Read-only view of a pool for sampling statistics from any thread
#[derive(Clone)]
pub struct PoolMonitor {
    pool: Arc<FramePool>,
}

impl PoolMonitor {
    pub(crate) fn new(pool: Arc<FramePool>) -> Self {
        Self { pool }
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn config(&self) -> PoolConfig {
        self.pool.config()
    }

    #[doc(hidden)]
    pub fn audit(&self) -> PoolAudit {
        self.pool.audit()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    pub free: usize,
    pub filling: usize,
    pub ready: usize,
    pub checked_out: usize,
    pub published: u64,
    pub released: u64,
    pub dropped_exhausted: u64,
    pub dropped_overflow: u64,
}

impl PoolStats {
    /// Slots accounted for across all residencies
    pub fn resident(&self) -> usize {
        self.free + self.filling + self.ready + self.checked_out
    }

    pub fn dropped(&self) -> u64 {
        self.dropped_exhausted + self.dropped_overflow
    }
}

/// Result of [`FramePool::audit`]
#[doc(hidden)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolAudit {
    pub capacity: usize,
    /// Slots reachable from the free-list head
    pub free_listed: usize,
    /// Slots reachable from the ready-queue head, checked-out head included
    pub queued: usize,
    /// Claimed by the producer and not yet published
    pub filling: usize,
    /// Repeat visits, or links that disagree with the slot's residency
    pub misplaced: usize,
    /// Slots in neither structure that the producer is not filling
    pub orphaned: usize,
}

impl PoolAudit {
    /// Every slot sits in exactly one place
    pub fn is_sound(&self) -> bool {
        self.misplaced == 0
            && self.orphaned == 0
            && self.free_listed + self.queued + self.filling == self.capacity
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    #[test]
    fn test_pool_creation() {
        let (producer, _consumer) = FramePool::create(PoolConfig::new(64, 48, 4)).unwrap();
        let stats = producer.stats();

        assert_eq!(stats.capacity, 5);
        assert_eq!(stats.free, 5);
        assert_eq!(stats.ready, 0);
        assert_eq!(stats.resident(), 5);
        assert_eq!(producer.frame_bytes(), 64 * 48 * 4);
    }

    #[test]
    fn test_spans_are_disjoint_and_aligned() {
        let config = PoolConfig::new(5, 3, 3).with_frame_count(4);
        let pool = FramePool::allocate(config).unwrap();
        let stride = config.frame_stride().unwrap();

        for (i, desc) in pool.descriptors.iter().enumerate() {
            let span = unsafe { desc.payload(desc.capacity()) };
            assert_eq!(span.len(), 45);
            assert_eq!(span.as_ptr() as usize % CACHE_LINE_SIZE, 0, "span {} not aligned", i);
            assert_eq!(
                span.as_ptr() as usize - pool.storage.as_ptr() as usize,
                i * stride
            );
        }
    }

    #[test]
    fn test_storage_is_zeroed() {
        let pool = FramePool::allocate(PoolConfig::new(8, 8, 1).with_frame_count(2)).unwrap();
        for desc in pool.descriptors.iter() {
            assert!(unsafe { desc.payload(desc.capacity()) }.iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn test_free_list_holds_every_slot() {
        let pool = FramePool::allocate(PoolConfig::new(4, 4, 4).with_frame_count(3)).unwrap();

        let order: Vec<u32> = std::iter::from_fn(|| pool.free.try_pop())
            .map(|node| unsafe { node.as_ref() }.index())
            .collect();
        assert_eq!(order, vec![2, 1, 0]);
        assert!(pool.ready.peek().is_none());
    }

    #[test]
    fn test_audit_tracks_membership() {
        let (mut producer, mut consumer) =
            FramePool::create(PoolConfig::new(2, 2, 1).with_frame_count(4)).unwrap();
        let monitor = producer.monitor();

        producer.publish(&[1; 4], None).unwrap();
        producer.publish(&[2; 4], None).unwrap();
        let frame = consumer.acquire_next().unwrap();
        let audit = monitor.audit();
        drop(frame);

        assert!(audit.is_sound(), "{:?}", audit);
        assert_eq!((audit.free_listed, audit.queued), (2, 2));
    }

    #[test]
    fn test_audit_catches_orphaned_slot() {
        let pool = FramePool::allocate(PoolConfig::new(2, 2, 1).with_frame_count(5)).unwrap();

        // Claimed and never returned, residency left at Free
        let lost = pool.free.try_pop().unwrap();

        let stats = pool.stats();
        assert_eq!(stats.resident(), stats.capacity);
        assert_eq!(stats.free, 5);

        let audit = pool.audit();
        assert_eq!(audit.free_listed, 4);
        assert_eq!(audit.orphaned, 1);
        assert!(!audit.is_sound());

        unsafe { pool.free.push(lost) };
        assert!(pool.audit().is_sound());
    }

    #[test]
    fn test_audit_catches_residency_mismatch() {
        let pool = FramePool::allocate(PoolConfig::new(2, 2, 1).with_frame_count(3)).unwrap();
        pool.descriptors[1].set_residency(Residency::Ready);

        let audit = pool.audit();
        assert_eq!(audit.misplaced, 1);
        assert!(!audit.is_sound());
    }

    #[test]
    fn test_invalid_configs() {
        assert!(matches!(
            FramePool::create(PoolConfig::new(0, 10, 4)),
            Err(PoolError::InvalidConfig(_))
        ));
        assert!(matches!(
            FramePool::create(PoolConfig::new(10, 10, 4).with_frame_count(0)),
            Err(PoolError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_unrepresentable_storage_is_allocation_error() {
        let config = PoolConfig::new(u32::MAX, u32::MAX, 4).with_frame_count(usize::MAX >> 40);
        assert!(matches!(
            FramePool::create(config),
            Err(PoolError::Allocation { .. })
        ));
    }
}
