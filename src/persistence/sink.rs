//! Output sinks for snapshots and raw streams

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use image::codecs::webp::WebPEncoder;
use image::{ExtendedColorType, ImageEncoder};

use crate::error::{PersistenceError, PersistenceResult};
use crate::types::{PixelFormat, StagedFrame};

/// Append-only stream handle
pub type StreamWriter = Box<dyn Write + Send>;

/// Where the sidecar puts its output. Encoding details stay behind this trait.
pub trait PersistenceSink: Send + Sync {
    /// Make sure `dir` exists
    fn prepare_directory(&self, dir: &Path) -> PersistenceResult<()>;

    /// Extension of still-image files, without the dot
    fn snapshot_extension(&self) -> &str;

    /// Write one still image
    fn write_snapshot(&self, frame: &StagedFrame<'_>, path: &Path) -> PersistenceResult<()>;

    /// Create a new stream file. Fails if `path` already exists.
    fn create_stream(&self, path: &Path) -> PersistenceResult<StreamWriter>;
}

/// Filesystem sink writing lossless WebP snapshots and raw streams
#[derive(Debug, Default, Clone, Copy)]
pub struct FileSink;

impl FileSink {
    pub fn new() -> Self {
        Self
    }

    /// Encoder input for `frame`, as RGBA8
    fn rgba_pixels(frame: &StagedFrame<'_>) -> PersistenceResult<Vec<u8>> {
        match frame.format {
            PixelFormat::Rgba8 => Ok(frame.pixels.to_vec()),
            PixelFormat::Bgra8 => {
                let mut pixels = frame.pixels.to_vec();
                convert_bgra_to_rgba(&mut pixels);
                Ok(pixels)
            }
            other => Err(PersistenceError::UnsupportedFormat(other)),
        }
    }
}

impl PersistenceSink for FileSink {
    fn prepare_directory(&self, dir: &Path) -> PersistenceResult<()> {
        fs::create_dir_all(dir).map_err(|e| PersistenceError::io(dir, e))
    }

    fn snapshot_extension(&self) -> &str {
        "webp"
    }

    fn write_snapshot(&self, frame: &StagedFrame<'_>, path: &Path) -> PersistenceResult<()> {
        let expected = frame.row_pitch() * frame.size.height as usize;
        if frame.pixels.len() != expected {
            return Err(PersistenceError::Encoding(format!(
                "expected {} bytes for {} {}, got {}",
                expected,
                frame.size,
                frame.format,
                frame.pixels.len()
            )));
        }
        let rgba = Self::rgba_pixels(frame)?;

        let file = File::create(path).map_err(|e| PersistenceError::io(path, e))?;
        let mut writer = BufWriter::new(file);
        WebPEncoder::new_lossless(&mut writer)
            .write_image(
                &rgba,
                frame.size.width,
                frame.size.height,
                ExtendedColorType::Rgba8,
            )
            .map_err(|e| PersistenceError::Encoding(e.to_string()))?;
        writer.flush().map_err(|e| PersistenceError::io(path, e))
    }

    fn create_stream(&self, path: &Path) -> PersistenceResult<StreamWriter> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| PersistenceError::io(path, e))?;
        Ok(Box::new(file))
    }
}

/// Swap B and R in place
fn convert_bgra_to_rgba(data: &mut [u8]) {
    for chunk in data.chunks_exact_mut(4) {
        chunk.swap(0, 2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Size;

    #[test]
    fn test_bgra_to_rgba() {
        let mut data = vec![1, 2, 3, 4, 5, 6, 7, 8];
        convert_bgra_to_rgba(&mut data);
        assert_eq!(data, vec![3, 2, 1, 4, 7, 6, 5, 8]);
    }

    #[test]
    fn test_write_snapshot_round_trips_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.webp");
        let pixels = vec![0x80u8; 16 * 8 * 4];
        let frame = StagedFrame {
            pixels: &pixels,
            size: Size::new(16, 8),
            format: PixelFormat::Bgra8,
        };

        FileSink.write_snapshot(&frame, &path).unwrap();

        let decoded = image::open(&path).unwrap();
        assert_eq!(decoded.width(), 16);
        assert_eq!(decoded.height(), 8);
    }

    #[test]
    fn test_write_snapshot_rejects_float_formats() {
        let dir = tempfile::tempdir().unwrap();
        let pixels = vec![0u8; 4 * 4 * 8];
        let frame = StagedFrame {
            pixels: &pixels,
            size: Size::new(4, 4),
            format: PixelFormat::Rgba16Float,
        };

        let err = FileSink
            .write_snapshot(&frame, &dir.path().join("f16.webp"))
            .unwrap_err();
        assert!(matches!(err, PersistenceError::UnsupportedFormat(PixelFormat::Rgba16Float)));
    }

    #[test]
    fn test_create_stream_refuses_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.raw");

        let mut stream = FileSink.create_stream(&path).unwrap();
        stream.write_all(b"abcd").unwrap();
        drop(stream);

        let err = FileSink.create_stream(&path).err().unwrap();
        assert!(matches!(err, PersistenceError::Io { .. }));
        assert_eq!(fs::read(&path).unwrap(), b"abcd");
    }
}
