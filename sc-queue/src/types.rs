//! Pool geometry and pixel layout

/// Default number of frame slots. Small enough to bound memory at display
/// resolution, large enough to absorb short producer/consumer rate mismatches.
pub const DEFAULT_FRAME_COUNT: usize = 5;

/// Every frame span in the backing storage starts on a cache line boundary.
pub const CACHE_LINE_SIZE: usize = 64;

/// Packed pixel layouts a capture stream can deliver
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelFormat {
    #[default]
    Bgra = 0, // Native display stream layout
    Rgba = 1,
    Rgb = 2,
    Gray = 3,
}

impl PixelFormat {
    /// Bytes per pixel
    pub fn components(self) -> u32 {
        match self {
            PixelFormat::Bgra | PixelFormat::Rgba => 4,
            PixelFormat::Rgb => 3,
            PixelFormat::Gray => 1,
        }
    }
}

/// Construction-time sizing of a [`FramePool`](crate::FramePool)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub width: u32,
    pub height: u32,
    pub components_per_pixel: u32,
    pub frame_count: usize,
}

impl PoolConfig {
    pub fn new(width: u32, height: u32, components_per_pixel: u32) -> Self {
        Self {
            width,
            height,
            components_per_pixel,
            frame_count: DEFAULT_FRAME_COUNT,
        }
    }

    pub fn for_format(width: u32, height: u32, format: PixelFormat) -> Self {
        Self::new(width, height, format.components())
    }

    pub fn with_frame_count(mut self, frame_count: usize) -> Self {
        self.frame_count = frame_count;
        self
    }

    /// Payload capacity of one frame, `None` if it does not fit in `usize`
    pub fn frame_bytes(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)?
            .checked_mul(self.components_per_pixel as usize)
    }

    /// Distance between two consecutive frame spans in the backing storage
    pub fn frame_stride(&self) -> Option<usize> {
        let bytes = self.frame_bytes()?;
        bytes
            .checked_add(CACHE_LINE_SIZE - 1)
            .map(|padded| padded & !(CACHE_LINE_SIZE - 1))
    }

    /// Size of the single backing allocation
    pub fn storage_bytes(&self) -> Option<usize> {
        self.frame_stride()?.checked_mul(self.frame_count)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::for_format(1920, 1080, PixelFormat::Bgra)
    }
}
