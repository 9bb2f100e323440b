//! Screen Capture Session Controller
//!
//! Binds a platform capture stream to the frame queue. The platform side is
//! abstracted as a [`CaptureBackend`]; this crate owns the start/stop state
//! machine and the `on_frame_available` path into the pool.
//!
//! Platform stream handles stay inside their backend and are never inspected
//! here. [`SyntheticBackend`] generates a test pattern on its own thread.

pub mod backend;
pub mod display;
pub mod error;
pub mod session;
pub mod synthetic;

pub use backend::*;
pub use display::*;
pub use error::*;
pub use session::*;
pub use synthetic::*;

pub use sc_queue;
