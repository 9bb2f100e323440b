//! Frame descriptors: one per slot, recycled for the lifetime of the pool

use crate::sync::{AccessTracker, AtomicPtr, AtomicU8, Ordering};
use std::cell::UnsafeCell;
use std::ptr;

/// Which structure currently owns a descriptor
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residency {
    /// On the free-list
    Free = 0,
    /// Claimed by the producer, payload being written
    Filling = 1,
    /// Linked into the ready-queue, not yet seen by the consumer
    Ready = 2,
    /// Handed to the consumer, awaiting release
    CheckedOut = 3,
}

impl Residency {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Residency::Free,
            1 => Residency::Filling,
            2 => Residency::Ready,
            _ => Residency::CheckedOut,
        }
    }
}

/// Per-publish metadata, written by the producer while it owns the slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameMeta {
    /// Valid payload bytes, at most the slot capacity
    pub len: usize,
    /// Producer sequence number, counting dropped frames too
    pub sequence: u64,
    /// Backend-supplied capture time, in the backend's own clock domain
    pub capture_time: Option<u64>,
}

pub(crate) struct FrameDescriptor {
    /// Link used while on the free-list
    pub(crate) free_next: AtomicPtr<FrameDescriptor>,
    /// Link used while in the ready-queue. Kept separate from `free_next` so a
    /// released frame still leads forward along the queue.
    pub(crate) ready_next: AtomicPtr<FrameDescriptor>,
    residency: AtomicU8,
    index: u32,
    data: *mut u8,
    capacity: usize,
    meta: UnsafeCell<FrameMeta>,
    access: AccessTracker,
}

// SAFETY: `data` and `meta` are only touched through the unsafe accessors
// below, whose callers own the descriptor per its residency. Ownership moves
// between threads only through the Release/Acquire CAS of the free-list and
// ready-queue.
unsafe impl Send for FrameDescriptor {}
unsafe impl Sync for FrameDescriptor {}

impl FrameDescriptor {
    pub(crate) fn new(index: u32, data: *mut u8, capacity: usize) -> Self {
        Self {
            free_next: AtomicPtr::new(ptr::null_mut()),
            ready_next: AtomicPtr::new(ptr::null_mut()),
            residency: AtomicU8::new(Residency::Free as u8),
            index,
            data,
            capacity,
            meta: UnsafeCell::new(FrameMeta::default()),
            access: AccessTracker::new(),
        }
    }

    #[inline]
    pub(crate) fn index(&self) -> u32 {
        self.index
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub(crate) fn residency(&self) -> Residency {
        Residency::from_raw(self.residency.load(Ordering::Relaxed))
    }

    #[inline]
    pub(crate) fn set_residency(&self, residency: Residency) {
        self.residency.store(residency as u8, Ordering::Relaxed);
    }

    /// Full-capacity writable view of the slot.
    ///
    /// # Safety
    /// Caller must own the descriptor exclusively (residency `Filling`).
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn payload_mut(&self) -> &mut [u8] {
        self.access.write();
        std::slice::from_raw_parts_mut(self.data, self.capacity)
    }

    /// # Safety
    /// Caller must own the descriptor and `len <= capacity`. The producer must
    /// not be able to claim the slot until the returned borrow ends.
    pub(crate) unsafe fn payload(&self, len: usize) -> &[u8] {
        debug_assert!(len <= self.capacity);
        self.access.read();
        std::slice::from_raw_parts(self.data, len)
    }

    /// # Safety
    /// Caller must own the descriptor exclusively.
    pub(crate) unsafe fn write_meta(&self, meta: FrameMeta) {
        *self.meta.get() = meta;
    }

    /// # Safety
    /// Caller must own the descriptor, or have acquired it from the ready-queue.
    pub(crate) unsafe fn meta(&self) -> FrameMeta {
        *self.meta.get()
    }
}
