//! Swap chain ownership: resize, copy and present

use log::debug;

use crate::capture::traits::{GraphicsDevice, SwapChain};
use crate::error::CaptureResult;
use crate::types::{PixelFormat, Size, BUFFER_COUNT};

/// Owns the swap chain and keeps it sized to the last delivered frame
pub struct FramePresenter<C: SwapChain> {
    swap_chain: C,
    size: Size,
    format: PixelFormat,
    sync_interval: u32,
    presents: u64,
}

impl<C: SwapChain> FramePresenter<C> {
    /// Wrap a swap chain that was created at `size` x `format`
    pub fn new(swap_chain: C, size: Size, format: PixelFormat, sync_interval: u32) -> Self {
        Self {
            swap_chain,
            size,
            format,
            sync_interval,
            presents: 0,
        }
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn swap_chain(&self) -> &C {
        &self.swap_chain
    }

    /// Number of successful presents
    pub fn presents(&self) -> u64 {
        self.presents
    }

    /// Reallocate the buffers. No back buffer may be held across this call.
    pub fn resize(&mut self, size: Size, format: PixelFormat) -> CaptureResult<()> {
        debug!(
            "Resizing swap chain {} {} -> {} {}",
            self.size, self.format, size, format
        );
        self.swap_chain.resize_buffers(BUFFER_COUNT, size, format)?;
        self.size = size;
        self.format = format;
        Ok(())
    }

    /// Copy `source` into the current back buffer. The back buffer reference
    /// is dropped before returning.
    pub fn copy_frame<D>(&self, device: &D, source: &C::Surface) -> CaptureResult<()>
    where
        D: GraphicsDevice<Surface = C::Surface>,
    {
        let back_buffer = self.swap_chain.back_buffer()?;
        device.copy_surface(&back_buffer, source)
    }

    pub fn present(&mut self) -> CaptureResult<()> {
        self.swap_chain.present(self.sync_interval)?;
        self.presents += 1;
        Ok(())
    }
}
