//! Windows.Graphics.Capture frame pool, session and capture item

use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;
use windows::core::{IInspectable, Interface};
use windows::Foundation::{EventRegistrationToken, TypedEventHandler};
use windows::Graphics::Capture::{
    Direct3D11CaptureFramePool, GraphicsCaptureItem, GraphicsCaptureSession,
};
use windows::Graphics::DirectX::Direct3D11::IDirect3DDevice;
use windows::Win32::Graphics::Direct3D11::ID3D11Texture2D;
use windows::Win32::System::WinRT::Direct3D11::IDirect3DDxgiInterfaceAccess;

use super::device::D3DSurface;
use super::{device_error, from_size_int32, to_size_int32, to_winrt_format};
use crate::capture::pump::DeliveryErrors;
use crate::capture::traits::{CaptureControl, CaptureItem, FrameHandler, FramePool};
use crate::error::CaptureResult;
use crate::types::{Frame, PixelFormat, Size};

/// Window or monitor picked for capture
#[derive(Clone)]
pub struct WgcCaptureItem(pub GraphicsCaptureItem);

// SAFETY: GraphicsCaptureItem is an agile WinRT object
unsafe impl Send for WgcCaptureItem {}
unsafe impl Sync for WgcCaptureItem {}

impl From<GraphicsCaptureItem> for WgcCaptureItem {
    fn from(item: GraphicsCaptureItem) -> Self {
        Self(item)
    }
}

impl CaptureItem for WgcCaptureItem {
    fn size(&self) -> CaptureResult<Size> {
        self.0
            .Size()
            .map(from_size_int32)
            .map_err(device_error("GraphicsCaptureItem::Size"))
    }

    fn display_name(&self) -> String {
        self.0
            .DisplayName()
            .map(|name| name.to_string())
            .unwrap_or_default()
    }
}

/// Running capture session
pub struct WgcSession(GraphicsCaptureSession);

// SAFETY: GraphicsCaptureSession is an agile WinRT object
unsafe impl Send for WgcSession {}
unsafe impl Sync for WgcSession {}

impl CaptureControl for WgcSession {
    fn start_capture(&self) -> CaptureResult<()> {
        self.0
            .StartCapture()
            .map_err(device_error("GraphicsCaptureSession::StartCapture"))
    }

    fn is_cursor_capture_enabled(&self) -> CaptureResult<bool> {
        self.0
            .IsCursorCaptureEnabled()
            .map_err(device_error("GraphicsCaptureSession::IsCursorCaptureEnabled"))
    }

    fn set_cursor_capture_enabled(&self, enabled: bool) -> CaptureResult<()> {
        self.0
            .SetIsCursorCaptureEnabled(enabled)
            .map_err(device_error("GraphicsCaptureSession::SetIsCursorCaptureEnabled"))
    }

    fn is_border_required(&self) -> CaptureResult<bool> {
        self.0
            .IsBorderRequired()
            .map_err(device_error("GraphicsCaptureSession::IsBorderRequired"))
    }

    fn set_border_required(&self, required: bool) -> CaptureResult<()> {
        self.0
            .SetIsBorderRequired(required)
            .map_err(device_error("GraphicsCaptureSession::SetIsBorderRequired"))
    }

    fn close(&self) {
        if let Err(e) = self.0.Close() {
            warn!("Closing capture session failed: {}", e);
        }
    }
}

type SharedHandler = Arc<Mutex<Option<FrameHandler<D3DSurface>>>>;

/// Free-threaded frame pool. FrameArrived fires on a system worker thread,
/// one frame at a time.
///
/// The first device error from the handler is sent to [`DeliveryErrors`] and
/// the handler is dropped; later frames are returned to the pool unseen.
pub struct WgcFramePool {
    pool: Direct3D11CaptureFramePool,
    device: IDirect3DDevice,
    handler: SharedHandler,
    errors: DeliveryErrors,
    token: Option<EventRegistrationToken>,
}

// SAFETY: Direct3D11CaptureFramePool and IDirect3DDevice are agile
unsafe impl Send for WgcFramePool {}

impl WgcFramePool {
    pub(super) fn new(
        device: IDirect3DDevice,
        errors: DeliveryErrors,
        format: PixelFormat,
        buffer_count: u32,
        size: Size,
    ) -> CaptureResult<Self> {
        let pool = Direct3D11CaptureFramePool::CreateFreeThreaded(
            &device,
            to_winrt_format(format),
            buffer_count as i32,
            to_size_int32(size),
        )
        .map_err(device_error("Direct3D11CaptureFramePool::CreateFreeThreaded"))?;

        Ok(Self {
            pool,
            device,
            handler: Arc::new(Mutex::new(None)),
            errors,
            token: None,
        })
    }

    pub(super) fn create_capture_session(&self, item: &WgcCaptureItem) -> CaptureResult<WgcSession> {
        self.pool
            .CreateCaptureSession(&item.0)
            .map(WgcSession)
            .map_err(device_error("Direct3D11CaptureFramePool::CreateCaptureSession"))
    }

    /// Pull the next frame from `pool` and run the handler on it
    fn dispatch(pool: &Direct3D11CaptureFramePool, handler: &SharedHandler) -> CaptureResult<()> {
        let capture_frame = pool
            .TryGetNextFrame()
            .map_err(device_error("Direct3D11CaptureFramePool::TryGetNextFrame"))?;

        let delivered = (|| -> CaptureResult<()> {
            let content_size = capture_frame
                .ContentSize()
                .map(from_size_int32)
                .map_err(device_error("Direct3D11CaptureFrame::ContentSize"))?;
            let access: IDirect3DDxgiInterfaceAccess = capture_frame
                .Surface()
                .and_then(|surface| surface.cast())
                .map_err(device_error("Direct3D11CaptureFrame::Surface"))?;
            let texture: ID3D11Texture2D = unsafe { access.GetInterface() }
                .map_err(device_error("IDirect3DDxgiInterfaceAccess::GetInterface"))?;

            match handler.lock().as_mut() {
                Some(handler) => handler(Frame::new(content_size, D3DSurface(texture))),
                None => Ok(()),
            }
        })();

        // Return the buffer to the pool whatever happened
        if let Err(e) = capture_frame.Close() {
            warn!("Closing capture frame failed: {}", e);
        }
        delivered
    }
}

impl FramePool for WgcFramePool {
    type Surface = D3DSurface;

    fn on_frame_arrived(&mut self, handler: FrameHandler<D3DSurface>) -> CaptureResult<()> {
        *self.handler.lock() = Some(handler);
        if self.token.is_some() {
            return Ok(());
        }

        let shared = Arc::clone(&self.handler);
        let errors = self.errors.clone();
        let token = self
            .pool
            .FrameArrived(&TypedEventHandler::<Direct3D11CaptureFramePool, IInspectable>::new(
                move |sender, _| {
                    if let Some(pool) = sender {
                        let result = Self::dispatch(pool, &shared);
                        if !errors.observe(result) && shared.lock().take().is_some() {
                            debug!("Frame delivery stopped");
                        }
                    }
                    Ok(())
                },
            ))
            .map_err(device_error("Direct3D11CaptureFramePool::FrameArrived"))?;
        self.token = Some(token);
        Ok(())
    }

    fn recreate(&mut self, format: PixelFormat, buffer_count: u32, size: Size) -> CaptureResult<()> {
        self.pool
            .Recreate(
                &self.device,
                to_winrt_format(format),
                buffer_count as i32,
                to_size_int32(size),
            )
            .map_err(device_error("Direct3D11CaptureFramePool::Recreate"))
    }

    fn close(&mut self) {
        if let Some(token) = self.token.take() {
            if let Err(e) = self.pool.RemoveFrameArrived(token) {
                warn!("Removing FrameArrived handler failed: {}", e);
            }
        }
        if let Err(e) = self.pool.Close() {
            warn!("Closing frame pool failed: {}", e);
        }
    }
}
