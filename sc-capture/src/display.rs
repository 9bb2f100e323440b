//! Display geometry reported by a capture backend

use sc_queue::{PixelFormat, PoolConfig};

/// Pixel size and refresh rate of the display being captured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayMode {
    pub width: u32,
    pub height: u32,
    pub refresh_hz: u32,
}

impl DisplayMode {
    pub fn new(width: u32, height: u32, refresh_hz: u32) -> Self {
        Self {
            width,
            height,
            refresh_hz,
        }
    }

    /// Pool sized for full frames of this mode
    pub fn pool_config(&self, format: PixelFormat, frame_count: usize) -> PoolConfig {
        PoolConfig::for_format(self.width, self.height, format).with_frame_count(frame_count)
    }
}

/// How the session sizes its pool from the backend's display mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub format: PixelFormat,
    pub frame_count: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            format: PixelFormat::Bgra,
            frame_count: sc_queue::DEFAULT_FRAME_COUNT,
        }
    }
}
