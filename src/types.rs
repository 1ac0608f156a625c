//! Core types and configuration for the capture relay

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use once_cell::sync::Lazy;

/// Number of buffers in both the swap chain and the frame pool
pub const BUFFER_COUNT: u32 = 2;

/// Default present sync interval: wait for the next vertical blank
pub const DEFAULT_SYNC_INTERVAL: u32 = 1;

/// Largest sync interval a DXGI-style present accepts
pub const MAX_SYNC_INTERVAL: u32 = 4;

/// Directory name under the user's pictures folder
pub const SAVE_DIRECTORY_NAME: &str = "CaptureRelay";

static DEFAULT_SAVE_DIRECTORY: Lazy<PathBuf> = Lazy::new(|| {
    dirs::picture_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(SAVE_DIRECTORY_NAME)
});

/// Dimensions of a capture item, frame or swap chain, in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Get the total pixel count
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Pixel format of captured surfaces and the swap chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Blue, Green, Red, Alpha (8 bits per channel, normalized)
    Bgra8,
    /// Red, Green, Blue, Alpha (8 bits per channel, normalized)
    Rgba8,
    /// Red, Green, Blue, Alpha (16-bit float per channel)
    Rgba16Float,
    /// Red, Green, Blue (10 bits each) with 2-bit alpha
    Rgb10A2,
}

impl PixelFormat {
    /// Get the number of bytes per pixel
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Bgra8 | PixelFormat::Rgba8 | PixelFormat::Rgb10A2 => 4,
            PixelFormat::Rgba16Float => 8,
        }
    }

    /// Non-zero code used by the lock-free format mailbox
    pub(crate) fn code(self) -> u8 {
        match self {
            PixelFormat::Bgra8 => 1,
            PixelFormat::Rgba8 => 2,
            PixelFormat::Rgba16Float => 3,
            PixelFormat::Rgb10A2 => 4,
        }
    }

    pub(crate) fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(PixelFormat::Bgra8),
            2 => Some(PixelFormat::Rgba8),
            3 => Some(PixelFormat::Rgba16Float),
            4 => Some(PixelFormat::Rgb10A2),
            _ => None,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelFormat::Bgra8 => write!(f, "Bgra8"),
            PixelFormat::Rgba8 => write!(f, "Rgba8"),
            PixelFormat::Rgba16Float => write!(f, "Rgba16Float"),
            PixelFormat::Rgb10A2 => write!(f, "Rgb10A2"),
        }
    }
}

/// One delivered frame. The surface is only borrowed for the length of the delivery.
#[derive(Debug, Clone)]
pub struct Frame<S> {
    /// Size of the captured content, which may differ from the pool size
    pub content_size: Size,
    /// GPU-resident pixel buffer
    pub surface: S,
}

impl<S> Frame<S> {
    pub fn new(content_size: Size, surface: S) -> Self {
        Self {
            content_size,
            surface,
        }
    }
}

/// CPU copy of a surface with hardware row padding removed
#[derive(Debug, Clone, Copy)]
pub struct StagedFrame<'a> {
    /// Tightly packed, row-major pixel bytes
    pub pixels: &'a [u8],
    pub size: Size,
    pub format: PixelFormat,
}

impl StagedFrame<'_> {
    /// Bytes per row, with no padding
    pub fn row_pitch(&self) -> usize {
        self.size.width as usize * self.format.bytes_per_pixel()
    }
}

/// Diagnostic recording configuration
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    /// Directory snapshots and streams are written to
    pub save_directory: PathBuf,
    /// Minimum time between two snapshots
    pub snapshot_interval: Duration,
    /// Wall-clock cap on a stream, measured from when streaming was enabled
    pub stream_time_limit: Duration,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            save_directory: DEFAULT_SAVE_DIRECTORY.clone(),
            snapshot_interval: Duration::from_secs(1),
            stream_time_limit: Duration::from_secs(120),
        }
    }
}

/// Capture session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub persistence: PersistenceConfig,
    /// Vertical blanks to wait for on present
    pub sync_interval: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            persistence: PersistenceConfig::default(),
            sync_interval: DEFAULT_SYNC_INTERVAL,
        }
    }
}

impl SessionConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.sync_interval > MAX_SYNC_INTERVAL {
            return Err(format!(
                "Sync interval must be 0-{}, got {}",
                MAX_SYNC_INTERVAL, self.sync_interval
            ));
        }
        if self.persistence.snapshot_interval.is_zero() {
            return Err("Snapshot interval must be non-zero".to_string());
        }
        if self.persistence.stream_time_limit.is_zero() {
            return Err("Stream time limit must be non-zero".to_string());
        }
        Ok(())
    }
}
