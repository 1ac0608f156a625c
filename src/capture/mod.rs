//! Capture session and the platform seams it runs on

pub mod mailbox;
pub mod presenter;
pub mod pump;
pub mod session;
pub mod traits;

#[cfg(target_os = "windows")]
pub mod windows;

pub use mailbox::PendingFormat;
pub use presenter::FramePresenter;
pub use pump::{frame_channel, DeliveryErrors, FramePump};
pub use session::{CaptureSession, CaptureSessionBuilder, FrameDelivery};
pub use traits::{
    CaptureControl, CaptureItem, FrameHandler, FramePool, GraphicsDevice, MappedSurface,
    SwapChain,
};
