//! Error types

use thiserror::Error;

/// Pool construction failures. No partial pool is ever returned.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),

    #[error("cannot allocate {bytes} bytes of frame storage")]
    Allocation { bytes: usize },
}

/// Reasons a frame offered by the producer did not reach the ready-queue.
///
/// Both are non-fatal: the frame is dropped and the pipeline keeps running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PublishError {
    #[error("no free frame slot, frame dropped")]
    PoolExhausted,

    #[error("payload of {len} bytes exceeds slot capacity of {capacity} bytes, frame dropped")]
    PayloadOverflow { len: usize, capacity: usize },
}

/// Misuse of the ticket-based consumer protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReleaseError {
    #[error("slot {index} does not belong to this pool")]
    UnknownFrame { index: u32 },

    #[error("frame {sequence} in slot {index} is not checked out")]
    NotCheckedOut { index: u32, sequence: u64 },
}
