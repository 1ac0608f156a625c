//! Direct3D 11 / Windows.Graphics.Capture backend

mod device;
mod frame_pool;
mod swap_chain;

pub use device::{D3D11Device, D3DSurface};
pub use frame_pool::{WgcCaptureItem, WgcFramePool, WgcSession};
pub use swap_chain::DxgiSwapChain;

use windows::Graphics::DirectX::DirectXPixelFormat;
use windows::Graphics::SizeInt32;
use windows::Win32::Graphics::Dxgi::Common::{
    DXGI_FORMAT, DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_FORMAT_R10G10B10A2_UNORM,
    DXGI_FORMAT_R16G16B16A16_FLOAT, DXGI_FORMAT_R8G8B8A8_UNORM,
};

use crate::error::CaptureError;
use crate::types::{PixelFormat, Size};

/// Wrap a failed platform call
fn device_error(operation: &'static str) -> impl FnOnce(windows::core::Error) -> CaptureError {
    move |e| CaptureError::device(operation, e)
}

fn to_dxgi_format(format: PixelFormat) -> DXGI_FORMAT {
    match format {
        PixelFormat::Bgra8 => DXGI_FORMAT_B8G8R8A8_UNORM,
        PixelFormat::Rgba8 => DXGI_FORMAT_R8G8B8A8_UNORM,
        PixelFormat::Rgba16Float => DXGI_FORMAT_R16G16B16A16_FLOAT,
        PixelFormat::Rgb10A2 => DXGI_FORMAT_R10G10B10A2_UNORM,
    }
}

fn from_dxgi_format(format: DXGI_FORMAT) -> Option<PixelFormat> {
    match format {
        DXGI_FORMAT_B8G8R8A8_UNORM => Some(PixelFormat::Bgra8),
        DXGI_FORMAT_R8G8B8A8_UNORM => Some(PixelFormat::Rgba8),
        DXGI_FORMAT_R16G16B16A16_FLOAT => Some(PixelFormat::Rgba16Float),
        DXGI_FORMAT_R10G10B10A2_UNORM => Some(PixelFormat::Rgb10A2),
        _ => None,
    }
}

fn to_winrt_format(format: PixelFormat) -> DirectXPixelFormat {
    match format {
        PixelFormat::Bgra8 => DirectXPixelFormat::B8G8R8A8UIntNormalized,
        PixelFormat::Rgba8 => DirectXPixelFormat::R8G8B8A8UIntNormalized,
        PixelFormat::Rgba16Float => DirectXPixelFormat::R16G16B16A16Float,
        PixelFormat::Rgb10A2 => DirectXPixelFormat::R10G10B10A2UIntNormalized,
    }
}

fn to_size_int32(size: Size) -> SizeInt32 {
    SizeInt32 {
        Width: size.width as i32,
        Height: size.height as i32,
    }
}

/// Negative sizes are reported by minimized windows; treat them as empty
fn from_size_int32(size: SizeInt32) -> Size {
    Size::new(size.Width.max(0) as u32, size.Height.max(0) as u32)
}
