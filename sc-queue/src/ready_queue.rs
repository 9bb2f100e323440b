//! Lock-free FIFO chain of captured frames awaiting the consumer
//!
//! There is no separate tail pointer: the producer walks from the head to the
//! last node and CAS-installs its node as that node's successor. The chain is
//! bounded by the pool size, so the walk stays short.
//!
//! The head belongs to the consumer. It only ever moves a non-null head
//! forward, with a plain store. The producer writes the head only when the
//! queue is empty: either the head is null, or the last node has already been
//! released and carries the detached marker. Both of those writes are CAS.

use crate::descriptor::FrameDescriptor;
use crate::sync::{fence, AtomicPtr, Ordering, RetryBackoff};
use crossbeam::utils::CachePadded;
use std::ptr::{self, NonNull};

/// Link value of a node the consumer released while it was the last one.
/// Never a real descriptor address.
#[inline]
fn detached() -> *mut FrameDescriptor {
    NonNull::dangling().as_ptr()
}

pub(crate) struct ReadyQueue {
    head: CachePadded<AtomicPtr<FrameDescriptor>>,
}

impl ReadyQueue {
    pub(crate) fn new() -> Self {
        Self {
            head: CachePadded::new(AtomicPtr::new(ptr::null_mut())),
        }
    }

    /// Append `node` at the tail. Producer only.
    ///
    /// # Safety
    /// Must only be called from the single producer. `node` must be owned by
    /// the caller (popped from the free-list) with its payload fully written.
    pub(crate) unsafe fn publish(&self, node: NonNull<FrameDescriptor>) {
        node.as_ref().ready_next.store(ptr::null_mut(), Ordering::Relaxed);

        // Payload and metadata must be visible before any store that makes the
        // node reachable from the head.
        fence(Ordering::Release);

        let backoff = RetryBackoff::new();
        loop {
            let head = self.head.load(Ordering::Acquire);
            let installed = match NonNull::new(head) {
                None => self
                    .head
                    .compare_exchange(
                        ptr::null_mut(),
                        node.as_ptr(),
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok(),
                Some(head) => self.append_after(head, node),
            };

            if installed {
                return;
            }
            backoff.snooze();
        }
    }

    /// Walk from `start` to the last node and link `node` behind it.
    /// Returns false when the walk has to restart from the head.
    unsafe fn append_after(
        &self,
        start: NonNull<FrameDescriptor>,
        node: NonNull<FrameDescriptor>,
    ) -> bool {
        let mut tail = start;

        loop {
            let link = &tail.as_ref().ready_next;
            let next = link.load(Ordering::Acquire);

            if next == detached() {
                // The queue drained while we walked. The head is either still
                // `tail` (consumer mid-release) or already null.
                return self
                    .head
                    .compare_exchange(
                        tail.as_ptr(),
                        node.as_ptr(),
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok();
            }

            match NonNull::new(next) {
                Some(next) => tail = next,
                None => {
                    if link
                        .compare_exchange(
                            ptr::null_mut(),
                            node.as_ptr(),
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        return true;
                    }
                    // Lost to the consumer's detach; re-read the link.
                }
            }
        }
    }

    /// Oldest unconsumed frame, without removing it. Consumer only.
    pub(crate) fn peek(&self) -> Option<NonNull<FrameDescriptor>> {
        NonNull::new(self.head.load(Ordering::Acquire))
    }

    /// Move the head past `node`. Consumer only.
    ///
    /// # Safety
    /// `node` must be the current head, obtained from [`peek`](Self::peek) on
    /// the consumer thread.
    pub(crate) unsafe fn advance(&self, node: NonNull<FrameDescriptor>) {
        let link = &node.as_ref().ready_next;
        let mut next = link.load(Ordering::Acquire);

        if next.is_null() {
            match link.compare_exchange(
                ptr::null_mut(),
                detached(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    // A producer that saw the marker may have replaced the
                    // head already; either way `node` is out of the queue.
                    let _ = self.head.compare_exchange(
                        node.as_ptr(),
                        ptr::null_mut(),
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    );
                    return;
                }
                Err(actual) => next = actual,
            }
        }

        self.head.store(next, Ordering::Release);
    }

    /// Visit queued nodes from the head, stopping after `limit`. Only
    /// meaningful while neither thread is inside `publish` or `advance`.
    pub(crate) fn walk(&self, limit: usize, mut visit: impl FnMut(NonNull<FrameDescriptor>)) {
        let mut cursor = self.head.load(Ordering::Acquire);
        for _ in 0..limit {
            if cursor == detached() {
                return;
            }
            let Some(node) = NonNull::new(cursor) else {
                return;
            };
            visit(node);
            cursor = unsafe { node.as_ref() }.ready_next.load(Ordering::Acquire);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        let mut count = 0;
        self.walk(usize::MAX, |_| count += 1);
        count
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn descriptors(count: u32) -> Vec<FrameDescriptor> {
        (0..count)
            .map(|i| FrameDescriptor::new(i, ptr::null_mut(), 0))
            .collect()
    }

    fn drain(queue: &ReadyQueue) -> Vec<u32> {
        let mut order = Vec::new();
        while let Some(node) = queue.peek() {
            order.push(unsafe { node.as_ref() }.index());
            unsafe { queue.advance(node) };
        }
        order
    }

    #[test]
    fn test_empty_queue() {
        let queue = ReadyQueue::new();
        assert!(queue.peek().is_none());
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_fifo_order() {
        let nodes = descriptors(4);
        let queue = ReadyQueue::new();

        for node in &nodes {
            unsafe { queue.publish(NonNull::from(node)) };
        }
        assert_eq!(queue.len(), 4);
        assert_eq!(drain(&queue), vec![0, 1, 2, 3]);
        assert!(queue.peek().is_none());
    }

    #[test]
    fn test_peek_is_not_destructive() {
        let nodes = descriptors(2);
        let queue = ReadyQueue::new();
        unsafe {
            queue.publish(NonNull::from(&nodes[0]));
            queue.publish(NonNull::from(&nodes[1]));
        }

        let first = queue.peek().unwrap();
        let again = queue.peek().unwrap();
        assert_eq!(first, again);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_publish_after_last_release() {
        let nodes = descriptors(2);
        let queue = ReadyQueue::new();

        unsafe {
            queue.publish(NonNull::from(&nodes[0]));
            let head = queue.peek().unwrap();
            queue.advance(head);
        }
        assert!(queue.peek().is_none());
        // Released last node keeps the detached marker
        assert_eq!(nodes[0].ready_next.load(Ordering::Relaxed), detached());

        unsafe { queue.publish(NonNull::from(&nodes[1])) };
        assert_eq!(drain(&queue), vec![1]);
    }

    #[test]
    fn test_republish_recycled_node() {
        let nodes = descriptors(1);
        let queue = ReadyQueue::new();

        for _ in 0..3 {
            unsafe { queue.publish(NonNull::from(&nodes[0])) };
            assert_eq!(drain(&queue), vec![0]);
        }
    }

    #[test]
    fn test_concurrent_publish_and_advance() {
        // The producer recycles whatever the consumer hands back, so the
        // queue sees every interleaving of append and last-node release.
        const NODES: u32 = 4;
        const FRAMES: usize = 50_000;

        let nodes: Arc<Vec<FrameDescriptor>> = Arc::new(descriptors(NODES));
        let queue = Arc::new(ReadyQueue::new());
        let (free_tx, free_rx) = crossbeam::channel::unbounded::<u32>();
        for i in 0..NODES {
            free_tx.send(i).unwrap();
        }

        let producer = {
            let nodes = nodes.clone();
            let queue = queue.clone();
            thread::spawn(move || {
                for _ in 0..FRAMES {
                    let index = free_rx.recv().unwrap();
                    unsafe { queue.publish(NonNull::from(&nodes[index as usize])) };
                }
            })
        };

        let mut received = 0;
        while received < FRAMES {
            if let Some(node) = queue.peek() {
                let index = unsafe { node.as_ref() }.index();
                unsafe { queue.advance(node) };
                // The producer hangs up after its last publish
                let _ = free_tx.send(index);
                received += 1;
            } else {
                thread::yield_now();
            }
        }

        producer.join().unwrap();
        assert!(queue.peek().is_none());
    }
}
