//! Screen Capture Frame Queue
//!
//! Moves captured video frames from an OS-driven capture callback to an
//! application's render loop without per-frame allocation or locks.
//!
//! Key properties:
//! - One contiguous, cache-line padded allocation for all frame payloads
//! - Lock-free free-list (LIFO) and ready-queue (FIFO) of frame descriptors
//! - Single producer / single consumer enforced by capability handles
//! - Lossy under back-pressure: frames are dropped when no slot is free,
//!   counted in [`PoolStats`] and visible as sequence gaps

pub mod descriptor;
pub mod error;
pub mod frame_pool;
pub mod handles;
pub mod types;

mod free_list;
mod ready_queue;
mod sync;

pub use descriptor::{FrameMeta, Residency};
pub use error::*;
pub use frame_pool::*;
pub use handles::*;
pub use types::*;
