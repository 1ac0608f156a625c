//! Direct3D 11 device and the [`GraphicsDevice`] implementation

use std::slice;

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use windows::core::Interface;
use windows::Graphics::DirectX::Direct3D11::IDirect3DDevice;
use windows::UI::Composition::{Compositor, ICompositionSurface};
use windows::Win32::Foundation::HMODULE;
use windows::Win32::Graphics::Direct3D::D3D_DRIVER_TYPE_HARDWARE;
use windows::Win32::Graphics::Direct3D11::{
    D3D11CreateDevice, ID3D11Device, ID3D11DeviceContext, ID3D11Texture2D,
    D3D11_CPU_ACCESS_READ, D3D11_CREATE_DEVICE_BGRA_SUPPORT, D3D11_MAPPED_SUBRESOURCE,
    D3D11_MAP_READ, D3D11_SDK_VERSION, D3D11_TEXTURE2D_DESC, D3D11_USAGE_STAGING,
};
use windows::Win32::Graphics::Dxgi::Common::DXGI_SAMPLE_DESC;
use windows::Win32::Graphics::Dxgi::IDXGIDevice;
use windows::Win32::System::WinRT::Composition::ICompositorInterop;
use windows::Win32::System::WinRT::Direct3D11::CreateDirect3D11DeviceFromDXGIDevice;

use super::frame_pool::{WgcCaptureItem, WgcFramePool, WgcSession};
use super::swap_chain::DxgiSwapChain;
use super::{device_error, from_dxgi_format};
use crate::capture::pump::DeliveryErrors;
use crate::capture::traits::{GraphicsDevice, MappedSurface};
use crate::error::{CaptureError, CaptureResult};
use crate::types::{PixelFormat, Size};

/// GPU texture handed between the frame pool, the swap chain and the device
#[derive(Clone, Debug)]
pub struct D3DSurface(pub ID3D11Texture2D);

// SAFETY: D3D11 resources are free-threaded; only the immediate context
// requires serialization, and every context call goes through its mutex.
unsafe impl Send for D3DSurface {}

/// Hardware D3D11 device with BGRA support plus its WinRT wrapper
pub struct D3D11Device {
    device: ID3D11Device,
    context: Mutex<ID3D11DeviceContext>,
    winrt_device: IDirect3DDevice,
    errors: DeliveryErrors,
    error_receiver: Receiver<CaptureError>,
}

// SAFETY: ID3D11Device is free-threaded and IDirect3DDevice is agile. The
// immediate context is only reached through the mutex.
unsafe impl Send for D3D11Device {}
unsafe impl Sync for D3D11Device {}

impl D3D11Device {
    /// Create a hardware device on the default adapter
    pub fn new() -> CaptureResult<Self> {
        let mut device: Option<ID3D11Device> = None;
        let mut context: Option<ID3D11DeviceContext> = None;
        unsafe {
            D3D11CreateDevice(
                None,
                D3D_DRIVER_TYPE_HARDWARE,
                HMODULE::default(),
                D3D11_CREATE_DEVICE_BGRA_SUPPORT,
                None,
                D3D11_SDK_VERSION,
                Some(&mut device),
                None,
                Some(&mut context),
            )
            .map_err(device_error("D3D11CreateDevice"))?;
        }
        let (device, context) = match (device, context) {
            (Some(device), Some(context)) => (device, context),
            _ => {
                return Err(CaptureError::device(
                    "D3D11CreateDevice",
                    anyhow::anyhow!("no device returned"),
                ))
            }
        };

        let dxgi_device: IDXGIDevice = device.cast().map_err(device_error("IDXGIDevice"))?;
        let winrt_device = unsafe { CreateDirect3D11DeviceFromDXGIDevice(&dxgi_device) }
            .and_then(|inspectable| inspectable.cast::<IDirect3DDevice>())
            .map_err(device_error("CreateDirect3D11DeviceFromDXGIDevice"))?;

        log::info!("Created D3D11 hardware device");
        let (errors, error_receiver) = DeliveryErrors::channel();
        Ok(Self {
            device,
            context: Mutex::new(context),
            winrt_device,
            errors,
            error_receiver,
        })
    }

    pub fn d3d_device(&self) -> &ID3D11Device {
        &self.device
    }

    /// WinRT device the frame pool is created on
    pub fn winrt_device(&self) -> &IDirect3DDevice {
        &self.winrt_device
    }

    /// Device errors raised while delivering frames from any frame pool
    /// created on this device. Delivery on that pool has stopped; the owner
    /// decides whether to close or rebuild the session.
    pub fn delivery_errors(&self) -> Receiver<CaptureError> {
        self.error_receiver.clone()
    }

    fn create_staging_texture(&self, desc: &D3D11_TEXTURE2D_DESC) -> CaptureResult<ID3D11Texture2D> {
        let staging_desc = D3D11_TEXTURE2D_DESC {
            Width: desc.Width,
            Height: desc.Height,
            MipLevels: 1,
            ArraySize: 1,
            Format: desc.Format,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Usage: D3D11_USAGE_STAGING,
            BindFlags: 0,
            CPUAccessFlags: D3D11_CPU_ACCESS_READ.0 as u32,
            MiscFlags: 0,
        };
        let mut texture: Option<ID3D11Texture2D> = None;
        unsafe {
            self.device
                .CreateTexture2D(&staging_desc, None, Some(&mut texture))
                .map_err(device_error("CreateTexture2D"))?;
        }
        texture.ok_or_else(|| {
            CaptureError::device("CreateTexture2D", anyhow::anyhow!("no texture returned"))
        })
    }
}

impl GraphicsDevice for D3D11Device {
    type Surface = D3DSurface;
    type Item = WgcCaptureItem;
    type SwapChain = DxgiSwapChain;
    type FramePool = WgcFramePool;
    type Session = WgcSession;
    type Compositor = Compositor;
    type CompositionSurface = ICompositionSurface;

    fn create_swap_chain(
        &self,
        size: Size,
        format: PixelFormat,
        buffer_count: u32,
    ) -> CaptureResult<DxgiSwapChain> {
        DxgiSwapChain::for_composition(&self.device, size, format, buffer_count)
    }

    fn create_frame_pool(
        &self,
        format: PixelFormat,
        buffer_count: u32,
        size: Size,
    ) -> CaptureResult<WgcFramePool> {
        WgcFramePool::new(
            self.winrt_device.clone(),
            self.errors.clone(),
            format,
            buffer_count,
            size,
        )
    }

    fn create_capture_session(
        &self,
        frame_pool: &WgcFramePool,
        item: &WgcCaptureItem,
    ) -> CaptureResult<WgcSession> {
        frame_pool.create_capture_session(item)
    }

    fn create_composition_surface(
        &self,
        compositor: &Compositor,
        swap_chain: &DxgiSwapChain,
    ) -> CaptureResult<ICompositionSurface> {
        let interop: ICompositorInterop = compositor
            .cast()
            .map_err(device_error("ICompositorInterop"))?;
        unsafe { interop.CreateCompositionSurfaceForSwapChain(swap_chain.raw()) }
            .map_err(device_error("CreateCompositionSurfaceForSwapChain"))
    }

    fn copy_surface(&self, dst: &D3DSurface, src: &D3DSurface) -> CaptureResult<()> {
        let context = self.context.lock();
        unsafe { context.CopyResource(&dst.0, &src.0) };
        Ok(())
    }

    fn read_surface(
        &self,
        src: &D3DSurface,
        visit: &mut dyn FnMut(MappedSurface<'_>),
    ) -> CaptureResult<()> {
        let mut desc = D3D11_TEXTURE2D_DESC::default();
        unsafe { src.0.GetDesc(&mut desc) };
        let format = from_dxgi_format(desc.Format).ok_or_else(|| {
            CaptureError::InvalidSurface(format!("unsupported DXGI format {}", desc.Format.0))
        })?;
        let staging = self.create_staging_texture(&desc)?;

        let context = self.context.lock();
        unsafe { context.CopyResource(&staging, &src.0) };

        let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
        unsafe {
            context
                .Map(&staging, 0, D3D11_MAP_READ, 0, Some(&mut mapped))
                .map_err(device_error("ID3D11DeviceContext::Map"))?;
        }

        let row_pitch = mapped.RowPitch as usize;
        let len = row_pitch * desc.Height as usize;
        // SAFETY: a mapped 2D subresource spans RowPitch bytes per row for
        // every row, and stays valid until Unmap below.
        let data = unsafe { slice::from_raw_parts(mapped.pData as *const u8, len) };
        visit(MappedSurface {
            data,
            row_pitch,
            size: Size::new(desc.Width, desc.Height),
            format,
        });

        unsafe { context.Unmap(&staging, 0) };
        Ok(())
    }
}
