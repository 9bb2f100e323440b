//! Lock-free LIFO stack of unused frame descriptors
//!
//! Only the producer pops and only the consumer pushes (plus the producer
//! returning a slot it failed to fill). A popped node therefore cannot be
//! popped and re-pushed between another thread's read of the head and its
//! CAS, which is what keeps the plain-pointer CAS free of ABA. Opening
//! `try_pop` to more than one thread would need a tagged head or an epoch
//! scheme.

use crate::descriptor::FrameDescriptor;
use crate::sync::{AtomicPtr, Ordering, RetryBackoff};
use crossbeam::utils::CachePadded;
use std::ptr::{self, NonNull};

pub(crate) struct FreeList {
    head: CachePadded<AtomicPtr<FrameDescriptor>>,
}

impl FreeList {
    pub(crate) fn new() -> Self {
        Self {
            head: CachePadded::new(AtomicPtr::new(ptr::null_mut())),
        }
    }

    /// Push a descriptor. LIFO order among concurrent pushes is unspecified.
    ///
    /// # Safety
    /// `node` must outlive the list and must not be in the free-list or the
    /// ready-queue.
    pub(crate) unsafe fn push(&self, node: NonNull<FrameDescriptor>) {
        let backoff = RetryBackoff::new();
        let mut head = self.head.load(Ordering::Relaxed);

        loop {
            node.as_ref().free_next.store(head, Ordering::Relaxed);

            // Release: the link above and every read of the old payload happen
            // before the producer can claim this slot again.
            match self
                .head
                .compare_exchange_weak(head, node.as_ptr(), Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(actual) => {
                    head = actual;
                    backoff.snooze();
                }
            }
        }
    }

    /// Claim the most recently freed descriptor, `None` if the pool is exhausted.
    /// The returned node's free link is cleared.
    pub(crate) fn try_pop(&self) -> Option<NonNull<FrameDescriptor>> {
        let backoff = RetryBackoff::new();
        let mut head = self.head.load(Ordering::Acquire);

        loop {
            let node = NonNull::new(head)?;

            // SAFETY: descriptors live as long as the pool, and with a single
            // popper `node` cannot leave the list before our CAS below.
            let next = unsafe { node.as_ref() }.free_next.load(Ordering::Relaxed);

            match self
                .head
                .compare_exchange_weak(head, next, Ordering::Acquire, Ordering::Acquire)
            {
                Ok(_) => {
                    unsafe { node.as_ref() }
                        .free_next
                        .store(ptr::null_mut(), Ordering::Relaxed);
                    return Some(node);
                }
                Err(actual) => {
                    head = actual;
                    backoff.snooze();
                }
            }
        }
    }

    /// Visit linked nodes from the top, stopping after `limit`. Only
    /// meaningful while no push or pop is in flight.
    pub(crate) fn walk(&self, limit: usize, mut visit: impl FnMut(NonNull<FrameDescriptor>)) {
        let mut cursor = self.head.load(Ordering::Acquire);
        for _ in 0..limit {
            let Some(node) = NonNull::new(cursor) else {
                return;
            };
            visit(node);
            cursor = unsafe { node.as_ref() }.free_next.load(Ordering::Acquire);
        }
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire).is_null()
    }
}
