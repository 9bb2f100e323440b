//! Producer and consumer capabilities
//!
//! [`FramePool::create`](crate::FramePool::create) issues exactly one of each.
//! Neither is `Clone`, and every operation takes `&mut self`, so the
//! single-producer / single-consumer contract the lock-free structures rely on
//! is enforced by the type system instead of by convention.

use crate::descriptor::{FrameDescriptor, FrameMeta, Residency};
use crate::error::{PublishError, ReleaseError};
use crate::frame_pool::{FramePool, PoolMonitor, PoolStats};
use crate::sync::Ordering;
use crate::types::PoolConfig;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

// ============================================================================
// PRODUCER
// ============================================================================

/// Write side of the pool, owned by the capture callback thread
pub struct ProducerHandle {
    pool: Arc<FramePool>,
    next_sequence: u64,
    dropping: Option<PublishError>,
}

impl ProducerHandle {
    pub(crate) fn new(pool: Arc<FramePool>) -> Self {
        Self {
            pool,
            next_sequence: 0,
            dropping: None,
        }
    }

    /// Copy `bytes` into a free slot and append it to the ready-queue.
    ///
    /// Returns the frame's sequence number. On error the frame is dropped;
    /// the sequence number is still consumed so the consumer sees a gap.
    pub fn publish(&mut self, bytes: &[u8], capture_time: Option<u64>) -> Result<u64, PublishError> {
        self.publish_with(bytes.len(), capture_time, |slot| slot.copy_from_slice(bytes))
    }

    /// Claim a free slot, let `fill` write `len` bytes into it in place, then
    /// append it to the ready-queue.
    ///
    /// `fill` is not called when the frame is dropped. If `fill` panics the
    /// slot goes back to the free-list.
    pub fn publish_with<F>(
        &mut self,
        len: usize,
        capture_time: Option<u64>,
        fill: F,
    ) -> Result<u64, PublishError>
    where
        F: FnOnce(&mut [u8]),
    {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let capacity = self.pool.frame_bytes();
        if len > capacity {
            return Err(self.drop_frame(sequence, PublishError::PayloadOverflow { len, capacity }));
        }

        let Some(node) = self.pool.free.try_pop() else {
            return Err(self.drop_frame(sequence, PublishError::PoolExhausted));
        };

        // SAFETY: popping from the free-list made this thread the sole owner.
        let desc = unsafe { node.as_ref() };
        desc.set_residency(Residency::Filling);

        let guard = FillGuard {
            pool: &self.pool,
            node,
        };
        unsafe {
            fill(&mut desc.payload_mut()[..len]);
            desc.write_meta(FrameMeta {
                len,
                sequence,
                capture_time,
            });
        }
        std::mem::forget(guard);

        desc.set_residency(Residency::Ready);
        // SAFETY: single producer, slot owned and fully written.
        unsafe { self.pool.ready.publish(node) };
        self.pool.counters.published.fetch_add(1, Ordering::Relaxed);

        if let Some(reason) = self.dropping.take() {
            log::info!("Frame publishing recovered after drops ({})", reason);
        }

        Ok(sequence)
    }

    fn drop_frame(&mut self, sequence: u64, reason: PublishError) -> PublishError {
        let counter = match reason {
            PublishError::PoolExhausted => &self.pool.counters.dropped_exhausted,
            PublishError::PayloadOverflow { .. } => &self.pool.counters.dropped_overflow,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        if self.dropping != Some(reason) {
            log::warn!("Dropping frame {}: {}", sequence, reason);
            self.dropping = Some(reason);
        } else {
            log::trace!("Dropping frame {}: {}", sequence, reason);
        }

        reason
    }

    /// Sequence number the next offered frame will get
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    pub fn frame_bytes(&self) -> usize {
        self.pool.frame_bytes()
    }

    pub fn config(&self) -> PoolConfig {
        self.pool.config()
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn monitor(&self) -> PoolMonitor {
        PoolMonitor::new(self.pool.clone())
    }
}

impl fmt::Debug for ProducerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProducerHandle")
            .field("next_sequence", &self.next_sequence)
            .field("frame_bytes", &self.pool.frame_bytes())
            .finish()
    }
}

/// Hands a claimed slot back to the free-list if filling it unwinds
struct FillGuard<'a> {
    pool: &'a FramePool,
    node: NonNull<FrameDescriptor>,
}

impl Drop for FillGuard<'_> {
    fn drop(&mut self) {
        let desc = unsafe { self.node.as_ref() };
        desc.set_residency(Residency::Free);
        // SAFETY: the slot was never published, so it is in no structure.
        unsafe { self.pool.free.push(self.node) };
    }
}

// ============================================================================
// CONSUMER
// ============================================================================

/// Read side of the pool, owned by the application's render/processing loop
pub struct ConsumerHandle {
    pool: Arc<FramePool>,
}

impl ConsumerHandle {
    pub(crate) fn new(pool: Arc<FramePool>) -> Self {
        Self { pool }
    }

    /// Oldest captured frame not yet released.
    ///
    /// This is a peek: until the frame is released, every call returns the
    /// same frame. Dropping the returned frame without calling
    /// [`CapturedFrame::release`] leaves it at the head of the queue.
    pub fn acquire_next(&mut self) -> Option<CapturedFrame<'_>> {
        let (node, meta) = self.check_out()?;
        Some(CapturedFrame {
            consumer: self,
            node,
            meta,
        })
    }

    /// Ticket-based variant of [`acquire_next`](Self::acquire_next) for
    /// callers that cannot hold a borrow, such as a C caller.
    pub fn acquire_ticket(&mut self) -> Option<FrameTicket> {
        let (node, meta) = self.check_out()?;
        Some(FrameTicket {
            slot: unsafe { node.as_ref() }.index(),
            sequence: meta.sequence,
        })
    }

    /// Payload of a checked-out ticket
    pub fn ticket_payload(&self, ticket: &FrameTicket) -> Result<&[u8], ReleaseError> {
        let (node, meta) = self.validate(ticket)?;
        // SAFETY: checked out by this consumer; the slot cannot be recycled
        // until `release_ticket`, which needs `&mut self`.
        Ok(unsafe { node.as_ref().payload(meta.len) })
    }

    /// Metadata of a checked-out ticket
    pub fn ticket_meta(&self, ticket: &FrameTicket) -> Result<FrameMeta, ReleaseError> {
        self.validate(ticket).map(|(_, meta)| meta)
    }

    /// Release a ticket's frame back to the free-list.
    ///
    /// Rejects tickets that are not the currently checked-out frame: a second
    /// release of the same ticket, or a ticket whose slot has since been
    /// recycled, returns [`ReleaseError::NotCheckedOut`] and changes nothing.
    pub fn release_ticket(&mut self, ticket: FrameTicket) -> Result<(), ReleaseError> {
        let (node, _) = self.validate(&ticket)?;
        self.release_node(node);
        Ok(())
    }

    fn check_out(&mut self) -> Option<(NonNull<FrameDescriptor>, FrameMeta)> {
        let node = self.pool.ready.peek()?;
        // SAFETY: the head of the ready-queue belongs to the consumer, and the
        // Acquire load in `peek` made the producer's writes visible.
        let desc = unsafe { node.as_ref() };
        desc.set_residency(Residency::CheckedOut);
        Some((node, unsafe { desc.meta() }))
    }

    fn validate(
        &self,
        ticket: &FrameTicket,
    ) -> Result<(NonNull<FrameDescriptor>, FrameMeta), ReleaseError> {
        let desc = self
            .pool
            .descriptor(ticket.slot)
            .ok_or(ReleaseError::UnknownFrame { index: ticket.slot })?;

        let not_checked_out = ReleaseError::NotCheckedOut {
            index: ticket.slot,
            sequence: ticket.sequence,
        };

        let node = NonNull::from(desc);
        if desc.residency() != Residency::CheckedOut || self.pool.ready.peek() != Some(node) {
            return Err(not_checked_out);
        }

        // SAFETY: checked out by this consumer, see above.
        let meta = unsafe { desc.meta() };
        if meta.sequence != ticket.sequence {
            return Err(not_checked_out);
        }

        Ok((node, meta))
    }

    fn release_node(&mut self, node: NonNull<FrameDescriptor>) {
        unsafe {
            self.pool.ready.advance(node);
            // Free before the push: once pushed, the producer may claim it.
            node.as_ref().set_residency(Residency::Free);
            self.pool.free.push(node);
        }
        self.pool.counters.released.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_bytes(&self) -> usize {
        self.pool.frame_bytes()
    }

    pub fn config(&self) -> PoolConfig {
        self.pool.config()
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn monitor(&self) -> PoolMonitor {
        PoolMonitor::new(self.pool.clone())
    }
}

impl fmt::Debug for ConsumerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerHandle")
            .field("frame_bytes", &self.pool.frame_bytes())
            .finish()
    }
}

/// A frame checked out by the consumer.
///
/// Releasing consumes the frame, so it cannot be released twice:
///
/// ```compile_fail
/// use sc_queue::{FramePool, PoolConfig};
///
/// let (mut producer, mut consumer) = FramePool::create(PoolConfig::new(2, 2, 1)).unwrap();
/// producer.publish(&[1, 2, 3, 4], None).unwrap();
/// let frame = consumer.acquire_next().unwrap();
/// frame.release();
/// frame.release();
/// ```
pub struct CapturedFrame<'a> {
    consumer: &'a mut ConsumerHandle,
    node: NonNull<FrameDescriptor>,
    meta: FrameMeta,
}

impl CapturedFrame<'_> {
    /// Pixel bytes as written by the producer
    pub fn data(&self) -> &[u8] {
        // SAFETY: checked out; the borrow of the consumer keeps it that way.
        unsafe { self.node.as_ref().payload(self.meta.len) }
    }

    pub fn len(&self) -> usize {
        self.meta.len
    }

    pub fn is_empty(&self) -> bool {
        self.meta.len == 0
    }

    pub fn sequence(&self) -> u64 {
        self.meta.sequence
    }

    /// Backend-supplied capture time, if the backend provided one
    pub fn capture_time(&self) -> Option<u64> {
        self.meta.capture_time
    }

    pub fn meta(&self) -> FrameMeta {
        self.meta
    }

    /// Index of the pool slot holding this frame
    pub fn slot(&self) -> u32 {
        unsafe { self.node.as_ref() }.index()
    }

    /// Return the frame to the free-list. The payload may be overwritten by
    /// the producer as soon as this returns.
    pub fn release(self) {
        self.consumer.release_node(self.node);
    }
}

impl std::ops::Deref for CapturedFrame<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.data()
    }
}

impl fmt::Debug for CapturedFrame<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapturedFrame")
            .field("slot", &self.slot())
            .field("sequence", &self.meta.sequence)
            .field("len", &self.meta.len)
            .field("capture_time", &self.meta.capture_time)
            .finish()
    }
}

/// Copyable reference to a checked-out frame, validated on every use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTicket {
    pub slot: u32,
    pub sequence: u64,
}

impl FrameTicket {
    pub fn new(slot: u32, sequence: u64) -> Self {
        Self { slot, sequence }
    }
}
