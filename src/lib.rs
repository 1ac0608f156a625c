//! Capture Relay
//!
//! A per-frame capture pipeline: frames delivered by a capture source are
//! copied into a double-buffered swap chain and presented, the swap chain and
//! frame pool follow changes in content size and requested pixel format, and
//! an optional sidecar records throttled snapshots or a time-capped raw stream.
//!
//! # Example
//!
//! ```ignore
//! use capture_relay::{CaptureSessionBuilder, PixelFormat};
//! use capture_relay::capture::windows::{D3D11Device, WgcCaptureItem};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let device = std::sync::Arc::new(D3D11Device::new()?);
//! let item = std::sync::Arc::new(WgcCaptureItem::from(picked_item));
//!
//! let session = CaptureSessionBuilder::new()
//!     .save_directory("captures")
//!     .build(device, item, PixelFormat::Bgra8)?;
//! let surface = session.create_surface(&compositor)?;
//! session.start_capture()?;
//!
//! // Later, from any thread
//! session.set_pixel_format(PixelFormat::Rgba16Float)?;
//! session.set_streaming(true)?;
//! session.close();
//! # Ok(())
//! # }
//! ```

#![allow(missing_docs)]

pub mod capture;
pub mod error;
pub mod persistence;
pub mod types;

// Re-export main types
pub use capture::{
    frame_channel, CaptureControl, CaptureItem, CaptureSession, CaptureSessionBuilder, DeliveryErrors,
    FrameDelivery, FrameHandler, FramePool, FramePresenter, FramePump, GraphicsDevice,
    MappedSurface, PendingFormat, SwapChain,
};
pub use error::{CaptureError, CaptureResult, PersistenceError, PersistenceResult};
pub use persistence::{
    Clock, FileSink, ManualClock, PersistenceMode, PersistenceSidecar, PersistenceSink,
    PersistenceStats, RecordOutcome, StreamWriter, SystemClock,
};
pub use types::{
    Frame, PersistenceConfig, PixelFormat, SessionConfig, Size, StagedFrame, BUFFER_COUNT,
};
