//! Composition swap chain

use windows::core::Interface;
use windows::Win32::Graphics::Direct3D11::{ID3D11Device, ID3D11Texture2D};
use windows::Win32::Graphics::Dxgi::Common::{DXGI_ALPHA_MODE_PREMULTIPLIED, DXGI_SAMPLE_DESC};
use windows::Win32::Graphics::Dxgi::{
    IDXGIDevice, IDXGIFactory2, IDXGISwapChain1, DXGI_PRESENT, DXGI_PRESENT_PARAMETERS,
    DXGI_SCALING_STRETCH, DXGI_SWAP_CHAIN_DESC1, DXGI_SWAP_CHAIN_FLAG,
    DXGI_SWAP_EFFECT_FLIP_SEQUENTIAL, DXGI_USAGE_RENDER_TARGET_OUTPUT,
};

use super::device::D3DSurface;
use super::{device_error, to_dxgi_format};
use crate::capture::traits::SwapChain;
use crate::error::CaptureResult;
use crate::types::{PixelFormat, Size};

/// Flip-model swap chain for display through a compositor
pub struct DxgiSwapChain {
    swap_chain: IDXGISwapChain1,
}

// SAFETY: the swap chain is only used by the thread holding the session's
// delivery lock.
unsafe impl Send for DxgiSwapChain {}

impl DxgiSwapChain {
    pub(super) fn for_composition(
        device: &ID3D11Device,
        size: Size,
        format: PixelFormat,
        buffer_count: u32,
    ) -> CaptureResult<Self> {
        let dxgi_device: IDXGIDevice = device.cast().map_err(device_error("IDXGIDevice"))?;
        let factory: IDXGIFactory2 = unsafe {
            dxgi_device
                .GetAdapter()
                .and_then(|adapter| adapter.GetParent())
        }
        .map_err(device_error("IDXGIFactory2"))?;

        let desc = DXGI_SWAP_CHAIN_DESC1 {
            Width: size.width,
            Height: size.height,
            Format: to_dxgi_format(format),
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
            BufferCount: buffer_count,
            Scaling: DXGI_SCALING_STRETCH,
            SwapEffect: DXGI_SWAP_EFFECT_FLIP_SEQUENTIAL,
            AlphaMode: DXGI_ALPHA_MODE_PREMULTIPLIED,
            ..Default::default()
        };
        let swap_chain = unsafe { factory.CreateSwapChainForComposition(device, &desc, None) }
            .map_err(device_error("CreateSwapChainForComposition"))?;

        Ok(Self { swap_chain })
    }

    pub fn raw(&self) -> &IDXGISwapChain1 {
        &self.swap_chain
    }
}

impl SwapChain for DxgiSwapChain {
    type Surface = D3DSurface;

    fn resize_buffers(
        &mut self,
        buffer_count: u32,
        size: Size,
        format: PixelFormat,
    ) -> CaptureResult<()> {
        unsafe {
            self.swap_chain.ResizeBuffers(
                buffer_count,
                size.width,
                size.height,
                to_dxgi_format(format),
                DXGI_SWAP_CHAIN_FLAG(0),
            )
        }
        .map_err(device_error("IDXGISwapChain::ResizeBuffers"))
    }

    fn back_buffer(&self) -> CaptureResult<D3DSurface> {
        unsafe { self.swap_chain.GetBuffer::<ID3D11Texture2D>(0) }
            .map(D3DSurface)
            .map_err(device_error("IDXGISwapChain::GetBuffer"))
    }

    fn present(&mut self, sync_interval: u32) -> CaptureResult<()> {
        let params = DXGI_PRESENT_PARAMETERS::default();
        unsafe {
            self.swap_chain
                .Present1(sync_interval, DXGI_PRESENT(0), &params)
                .ok()
        }
        .map_err(device_error("IDXGISwapChain1::Present1"))
    }
}
