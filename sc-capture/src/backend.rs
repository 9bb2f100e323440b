//! Boundary between a platform capture stream and the frame queue
//!
//! A backend owns the platform stream and its opaque handle. While running it
//! owns the [`FrameSink`] too, and calls [`FrameSink::on_frame_available`]
//! from whatever thread the platform delivers frames on.

use crate::display::DisplayMode;
use crate::error::CaptureError;
use sc_queue::{PoolStats, ProducerHandle, PublishError};

/// Status a platform attaches to each stream callback
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// A new frame is available
    Complete = 0,
    /// Nothing changed on screen since the last frame
    Idle = 1,
    /// The display went blank
    Blank = 2,
    /// The stream has stopped
    Stopped = 3,
}

impl FrameStatus {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(FrameStatus::Complete),
            1 => Some(FrameStatus::Idle),
            2 => Some(FrameStatus::Blank),
            3 => Some(FrameStatus::Stopped),
            _ => None,
        }
    }
}

/// What happened to one stream callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkOutcome {
    /// Queued for the consumer under this sequence number
    Published(u64),
    /// Not a complete frame, or no pixel data attached
    Skipped,
    /// Dropped by the pool
    Dropped(PublishError),
}

/// Producer-side entry point handed to a running backend
#[derive(Debug)]
pub struct FrameSink {
    producer: ProducerHandle,
    skipped: u64,
}

impl FrameSink {
    pub fn new(producer: ProducerHandle) -> Self {
        Self {
            producer,
            skipped: 0,
        }
    }

    /// Stream callback: copy a complete frame into the pool and publish it.
    ///
    /// Drops are silent to the consumer: the outcome is returned for the
    /// caller's benefit and counted in the pool statistics.
    pub fn on_frame_available(
        &mut self,
        status: FrameStatus,
        pixels: Option<&[u8]>,
        timestamp: Option<u64>,
    ) -> SinkOutcome {
        let pixels = match (status, pixels) {
            (FrameStatus::Complete, Some(pixels)) => pixels,
            _ => {
                self.skipped += 1;
                return SinkOutcome::Skipped;
            }
        };

        match self.producer.publish(pixels, timestamp) {
            Ok(sequence) => SinkOutcome::Published(sequence),
            Err(err) => SinkOutcome::Dropped(err),
        }
    }

    /// In-place variant for backends that render or convert directly into
    /// the slot instead of copying a finished buffer.
    pub fn fill_frame<F>(&mut self, len: usize, timestamp: Option<u64>, fill: F) -> SinkOutcome
    where
        F: FnOnce(&mut [u8]),
    {
        match self.producer.publish_with(len, timestamp, fill) {
            Ok(sequence) => SinkOutcome::Published(sequence),
            Err(err) => SinkOutcome::Dropped(err),
        }
    }

    /// Callbacks that carried no complete frame
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn frame_bytes(&self) -> usize {
        self.producer.frame_bytes()
    }

    pub fn stats(&self) -> PoolStats {
        self.producer.stats()
    }

    pub fn into_producer(self) -> ProducerHandle {
        self.producer
    }
}

/// A backend that failed to start, giving the sink back when it still can
#[derive(Debug)]
pub struct StartRejected {
    pub sink: Option<FrameSink>,
    pub error: CaptureError,
}

/// A platform capture stream
pub trait CaptureBackend: Send {
    fn name(&self) -> &str;

    /// Geometry of the display this backend captures
    fn display_mode(&self) -> Result<DisplayMode, CaptureError>;

    /// Start delivering frames into `sink`.
    fn start(&mut self, sink: FrameSink) -> Result<(), StartRejected>;

    /// Stop the stream and give the sink back. Once this returns, the backend
    /// must not touch the sink again.
    fn stop(&mut self) -> Result<FrameSink, CaptureError>;
}
