//! GPU to CPU readback: copy, map, compact rows, unmap

use bytes::BytesMut;

use crate::capture::traits::{GraphicsDevice, MappedSurface};
use crate::error::{CaptureError, CaptureResult};
use crate::types::{PixelFormat, Size, StagedFrame};

/// Shape of the pixels left in the staging buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagedLayout {
    pub size: Size,
    pub format: PixelFormat,
}

impl StagedLayout {
    pub fn frame<'a>(&self, pixels: &'a [u8]) -> StagedFrame<'a> {
        StagedFrame {
            pixels,
            size: self.size,
            format: self.format,
        }
    }
}

/// Copy each row of `mapped` into `out` without its padding.
/// `out` is cleared first and ends up `width * bpp * height` bytes long.
pub fn compact_rows(mapped: &MappedSurface<'_>, out: &mut BytesMut) -> CaptureResult<()> {
    let row_bytes = mapped.size.width as usize * mapped.format.bytes_per_pixel();
    let height = mapped.size.height as usize;

    out.clear();
    if height == 0 || row_bytes == 0 {
        return Ok(());
    }

    if mapped.row_pitch < row_bytes {
        return Err(CaptureError::InvalidSurface(format!(
            "row pitch {} is smaller than row size {}",
            mapped.row_pitch, row_bytes
        )));
    }
    let required = mapped.row_pitch * (height - 1) + row_bytes;
    if mapped.data.len() < required {
        return Err(CaptureError::InvalidSurface(format!(
            "mapped {} bytes, layout needs {}",
            mapped.data.len(),
            required
        )));
    }

    out.reserve(row_bytes * height);
    for row in mapped.data.chunks(mapped.row_pitch).take(height) {
        out.extend_from_slice(&row[..row_bytes]);
    }
    Ok(())
}

/// Read `surface` back through `device` into `out`
pub fn stage_surface<D: GraphicsDevice>(
    device: &D,
    surface: &D::Surface,
    out: &mut BytesMut,
) -> CaptureResult<StagedLayout> {
    let mut outcome = None;
    device.read_surface(surface, &mut |mapped| {
        outcome = Some(compact_rows(&mapped, out).map(|()| StagedLayout {
            size: mapped.size,
            format: mapped.format,
        }));
    })?;

    outcome.unwrap_or_else(|| {
        Err(CaptureError::InvalidSurface(
            "device did not map the surface".to_string(),
        ))
    })
}
