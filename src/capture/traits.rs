//! Traits for the platform collaborators the capture session is built on

use crate::error::CaptureResult;
use crate::types::{Frame, PixelFormat, Size};

/// Callback a frame pool invokes once per delivered frame
pub type FrameHandler<S> = Box<dyn FnMut(Frame<S>) -> CaptureResult<()> + Send>;

/// A capturable surface (window or display)
pub trait CaptureItem: Send + Sync {
    /// Current size; may change between deliveries
    fn size(&self) -> CaptureResult<Size>;

    /// Human-readable name of the item
    fn display_name(&self) -> String {
        String::new()
    }
}

/// Control surface of a running capture
pub trait CaptureControl: Send + Sync {
    /// Begin frame delivery
    fn start_capture(&self) -> CaptureResult<()>;

    fn is_cursor_capture_enabled(&self) -> CaptureResult<bool>;

    fn set_cursor_capture_enabled(&self, enabled: bool) -> CaptureResult<()>;

    fn is_border_required(&self) -> CaptureResult<bool>;

    fn set_border_required(&self, required: bool) -> CaptureResult<()>;

    /// Stop delivery. Must tolerate being called more than once.
    fn close(&self);
}

/// Source of captured frames
pub trait FramePool: Send {
    type Surface;

    /// Register the delivery callback. Frames are delivered one at a time,
    /// on a thread owned by the pool.
    fn on_frame_arrived(&mut self, handler: FrameHandler<Self::Surface>) -> CaptureResult<()>;

    /// Swap the shape of subsequently emitted frames
    fn recreate(&mut self, format: PixelFormat, buffer_count: u32, size: Size) -> CaptureResult<()>;

    /// Stop producing frames
    fn close(&mut self);
}

/// Presentable double-buffered target
pub trait SwapChain: Send {
    type Surface;

    /// Release and reallocate all buffers
    fn resize_buffers(&mut self, buffer_count: u32, size: Size, format: PixelFormat)
        -> CaptureResult<()>;

    /// Buffer the next present will show
    fn back_buffer(&self) -> CaptureResult<Self::Surface>;

    /// Present with the given sync interval and no flags
    fn present(&mut self, sync_interval: u32) -> CaptureResult<()>;
}

/// CPU view of a mapped staging copy. Rows may be padded past `width * bpp`.
#[derive(Debug, Clone, Copy)]
pub struct MappedSurface<'a> {
    pub data: &'a [u8],
    pub row_pitch: usize,
    pub size: Size,
    pub format: PixelFormat,
}

/// Graphics device: factory for the other collaborators plus same-device copies
pub trait GraphicsDevice: Send + Sync + 'static {
    type Surface: Send + 'static;
    type Item: CaptureItem + 'static;
    type SwapChain: SwapChain<Surface = Self::Surface> + 'static;
    type FramePool: FramePool<Surface = Self::Surface> + 'static;
    type Session: CaptureControl + 'static;
    type Compositor;
    type CompositionSurface;

    fn create_swap_chain(
        &self,
        size: Size,
        format: PixelFormat,
        buffer_count: u32,
    ) -> CaptureResult<Self::SwapChain>;

    fn create_frame_pool(
        &self,
        format: PixelFormat,
        buffer_count: u32,
        size: Size,
    ) -> CaptureResult<Self::FramePool>;

    fn create_capture_session(
        &self,
        frame_pool: &Self::FramePool,
        item: &Self::Item,
    ) -> CaptureResult<Self::Session>;

    /// Wrap a swap chain so a compositor can display it
    fn create_composition_surface(
        &self,
        compositor: &Self::Compositor,
        swap_chain: &Self::SwapChain,
    ) -> CaptureResult<Self::CompositionSurface>;

    /// Same-device resource copy; formats and sizes are assumed to match
    fn copy_surface(&self, dst: &Self::Surface, src: &Self::Surface) -> CaptureResult<()>;

    /// Copy `src` to a CPU-readable staging resource, map it, hand the
    /// mapping to `visit`, then unmap
    fn read_surface(
        &self,
        src: &Self::Surface,
        visit: &mut dyn FnMut(MappedSurface<'_>),
    ) -> CaptureResult<()>;
}
