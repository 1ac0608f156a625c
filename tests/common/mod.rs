//! In-memory graphics backend and persistence sink shared by the integration tests

#![allow(dead_code)]

use std::collections::HashSet;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use capture_relay::*;
use crossbeam_channel::Sender;
use parking_lot::Mutex;

/// Bytes of padding the mock adds past every mapped row
pub const ROW_PADDING: usize = 16;
pub const PADDING_BYTE: u8 = 0xEE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateSwapChain { size: Size, format: PixelFormat, buffers: u32 },
    CreateFramePool { size: Size, format: PixelFormat, buffers: u32 },
    CreateSession,
    StartCapture,
    ResizeBuffers { size: Size, format: PixelFormat, buffers: u32 },
    Copy { dst: Size, src: Size },
    Read,
    Present { sync_interval: u32 },
    Recreate { size: Size, format: PixelFormat, buffers: u32 },
    SessionClosed,
    PoolClosed,
}

#[derive(Debug, Clone)]
pub struct MockSurface {
    pub size: Size,
    pub format: PixelFormat,
    pub fill: u8,
}

type Hook = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
pub struct PoolShared {
    handler: Mutex<Option<FrameHandler<MockSurface>>>,
    closed: AtomicBool,
    pump: Mutex<Option<FramePump>>,
}

#[derive(Default)]
pub struct MockShared {
    calls: Mutex<Vec<Call>>,
    pub fail_present: AtomicBool,
    pub fail_resize: AtomicBool,
    pub fail_recreate: AtomicBool,
    pub fail_copy: AtomicBool,
    pub fail_read: AtomicBool,
    present_hook: Mutex<Option<Hook>>,
    pool: Mutex<Option<Arc<PoolShared>>>,
    cursor: AtomicBool,
    border: AtomicBool,
}

impl MockShared {
    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

/// Graphics device that records every call
#[derive(Default)]
pub struct MockDevice {
    pub shared: Arc<MockShared>,
}

impl MockDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.shared.calls.lock().clone()
    }

    /// Return and forget every call recorded so far
    pub fn take_calls(&self) -> Vec<Call> {
        std::mem::take(&mut *self.shared.calls.lock())
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.shared.calls.lock().iter().filter(|c| matches(c)).count()
    }

    /// Toggle one of the failure flags on `shared`
    pub fn fail(&self, flag: impl Fn(&MockShared) -> &AtomicBool, enabled: bool) {
        flag(&self.shared).store(enabled, Ordering::SeqCst);
    }

    pub fn set_present_hook(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.shared.present_hook.lock() = Some(Arc::new(hook));
    }

    fn pool(&self) -> Option<Arc<PoolShared>> {
        self.shared.pool.lock().clone()
    }

    /// Deliver `frame` on the calling thread the way the frame pool would
    pub fn emit(&self, frame: Frame<MockSurface>) -> CaptureResult<()> {
        let pool = self.pool().ok_or(CaptureError::ObjectClosed)?;
        if pool.closed.load(Ordering::Acquire) {
            return Err(CaptureError::ObjectClosed);
        }
        let mut handler = pool.handler.lock();
        match handler.as_mut() {
            Some(handler) => handler(frame),
            None => Ok(()),
        }
    }

    /// Run deliveries on a dedicated pump thread fed by the returned sender
    pub fn start_pump(&self) -> Sender<Frame<MockSurface>> {
        let (tx, rx) = frame_channel();
        let Some(pool) = self.pool() else {
            return tx;
        };
        let shared = Arc::clone(&pool);
        let pump = FramePump::spawn(
            rx,
            Box::new(move |frame: Frame<MockSurface>| -> CaptureResult<()> {
                match shared.handler.lock().as_mut() {
                    Some(handler) => handler(frame),
                    None => Ok(()),
                }
            }),
        );
        *pool.pump.lock() = Some(pump);
        tx
    }

    pub fn take_pump(&self) -> Option<FramePump> {
        self.pool().and_then(|pool| pool.pump.lock().take())
    }
}

pub fn frame(size: Size) -> Frame<MockSurface> {
    frame_with(size, PixelFormat::Bgra8, 0x42)
}

pub fn frame_with(size: Size, format: PixelFormat, fill: u8) -> Frame<MockSurface> {
    Frame::new(size, MockSurface { size, format, fill })
}

fn device_failure(operation: &'static str) -> CaptureError {
    CaptureError::device(operation, anyhow::anyhow!("device removed"))
}

pub struct MockItem {
    size: Mutex<Size>,
}

impl MockItem {
    pub fn new(size: Size) -> Arc<Self> {
        Arc::new(Self {
            size: Mutex::new(size),
        })
    }
}

impl CaptureItem for MockItem {
    fn size(&self) -> CaptureResult<Size> {
        Ok(*self.size.lock())
    }

    fn display_name(&self) -> String {
        "mock window".to_string()
    }
}

pub struct MockSession {
    shared: Arc<MockShared>,
}

impl CaptureControl for MockSession {
    fn start_capture(&self) -> CaptureResult<()> {
        self.shared.record(Call::StartCapture);
        Ok(())
    }

    fn is_cursor_capture_enabled(&self) -> CaptureResult<bool> {
        Ok(self.shared.cursor.load(Ordering::SeqCst))
    }

    fn set_cursor_capture_enabled(&self, enabled: bool) -> CaptureResult<()> {
        self.shared.cursor.store(enabled, Ordering::SeqCst);
        Ok(())
    }

    fn is_border_required(&self) -> CaptureResult<bool> {
        Ok(self.shared.border.load(Ordering::SeqCst))
    }

    fn set_border_required(&self, required: bool) -> CaptureResult<()> {
        self.shared.border.store(required, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) {
        self.shared.record(Call::SessionClosed);
    }
}

pub struct MockSwapChain {
    shared: Arc<MockShared>,
    size: Size,
    format: PixelFormat,
}

impl SwapChain for MockSwapChain {
    type Surface = MockSurface;

    fn resize_buffers(&mut self, buffers: u32, size: Size, format: PixelFormat) -> CaptureResult<()> {
        if self.shared.fail_resize.load(Ordering::SeqCst) {
            return Err(device_failure("resize_buffers"));
        }
        self.shared.record(Call::ResizeBuffers {
            size,
            format,
            buffers,
        });
        self.size = size;
        self.format = format;
        Ok(())
    }

    fn back_buffer(&self) -> CaptureResult<MockSurface> {
        Ok(MockSurface {
            size: self.size,
            format: self.format,
            fill: 0,
        })
    }

    fn present(&mut self, sync_interval: u32) -> CaptureResult<()> {
        if self.shared.fail_present.load(Ordering::SeqCst) {
            return Err(device_failure("present"));
        }
        let hook = self.shared.present_hook.lock().clone();
        if let Some(hook) = hook {
            hook();
        }
        self.shared.record(Call::Present { sync_interval });
        Ok(())
    }
}

pub struct MockFramePool {
    shared: Arc<MockShared>,
    pool: Arc<PoolShared>,
}

impl FramePool for MockFramePool {
    type Surface = MockSurface;

    fn on_frame_arrived(&mut self, handler: FrameHandler<MockSurface>) -> CaptureResult<()> {
        *self.pool.handler.lock() = Some(handler);
        Ok(())
    }

    fn recreate(&mut self, format: PixelFormat, buffers: u32, size: Size) -> CaptureResult<()> {
        if self.shared.fail_recreate.load(Ordering::SeqCst) {
            return Err(device_failure("recreate"));
        }
        self.shared.record(Call::Recreate {
            size,
            format,
            buffers,
        });
        Ok(())
    }

    fn close(&mut self) {
        self.pool.closed.store(true, Ordering::Release);
        if let Some(pump) = self.pool.pump.lock().as_ref() {
            pump.stop();
        }
        self.shared.record(Call::PoolClosed);
    }
}

impl GraphicsDevice for MockDevice {
    type Surface = MockSurface;
    type Item = MockItem;
    type SwapChain = MockSwapChain;
    type FramePool = MockFramePool;
    type Session = MockSession;
    type Compositor = ();
    /// The mock "composition surface" is the size of the wrapped swap chain
    type CompositionSurface = Size;

    fn create_swap_chain(&self, size: Size, format: PixelFormat, buffers: u32) -> CaptureResult<MockSwapChain> {
        self.shared.record(Call::CreateSwapChain {
            size,
            format,
            buffers,
        });
        Ok(MockSwapChain {
            shared: Arc::clone(&self.shared),
            size,
            format,
        })
    }

    fn create_frame_pool(&self, format: PixelFormat, buffers: u32, size: Size) -> CaptureResult<MockFramePool> {
        self.shared.record(Call::CreateFramePool {
            size,
            format,
            buffers,
        });
        let pool = Arc::new(PoolShared::default());
        *self.shared.pool.lock() = Some(Arc::clone(&pool));
        Ok(MockFramePool {
            shared: Arc::clone(&self.shared),
            pool,
        })
    }

    fn create_capture_session(&self, _pool: &MockFramePool, _item: &MockItem) -> CaptureResult<MockSession> {
        self.shared.record(Call::CreateSession);
        Ok(MockSession {
            shared: Arc::clone(&self.shared),
        })
    }

    fn create_composition_surface(&self, _compositor: &(), swap_chain: &MockSwapChain) -> CaptureResult<Size> {
        Ok(swap_chain.size)
    }

    fn copy_surface(&self, dst: &MockSurface, src: &MockSurface) -> CaptureResult<()> {
        if self.shared.fail_copy.load(Ordering::SeqCst) {
            return Err(device_failure("copy"));
        }
        self.shared.record(Call::Copy {
            dst: dst.size,
            src: src.size,
        });
        Ok(())
    }

    fn read_surface(
        &self,
        src: &MockSurface,
        visit: &mut dyn FnMut(MappedSurface<'_>),
    ) -> CaptureResult<()> {
        if self.shared.fail_read.load(Ordering::SeqCst) {
            return Err(device_failure("map"));
        }
        self.shared.record(Call::Read);

        let row_bytes = src.size.width as usize * src.format.bytes_per_pixel();
        let row_pitch = row_bytes + ROW_PADDING;
        let mut data = Vec::with_capacity(row_pitch * src.size.height as usize);
        for _ in 0..src.size.height {
            data.extend(std::iter::repeat(src.fill).take(row_bytes));
            data.extend(std::iter::repeat(PADDING_BYTE).take(ROW_PADDING));
        }

        visit(MappedSurface {
            data: &data,
            row_pitch,
            size: src.size,
            format: src.format,
        });
        Ok(())
    }
}

/// Snapshot captured by [`MemorySink`]
#[derive(Debug, Clone)]
pub struct StoredSnapshot {
    pub path: PathBuf,
    pub size: Size,
    pub format: PixelFormat,
    pub pixels: Vec<u8>,
}

/// In-memory sink with failure injection
#[derive(Default)]
pub struct MemorySink {
    pub snapshots: Mutex<Vec<StoredSnapshot>>,
    pub streams: Mutex<Vec<(PathBuf, Arc<Mutex<Vec<u8>>>)>>,
    paths: Mutex<HashSet<PathBuf>>,
    pub fail_prepare: AtomicBool,
    /// Fail the n-th write (1-based) on every stream
    pub fail_write_at: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn stream_bytes(&self) -> Vec<Vec<u8>> {
        self.streams
            .lock()
            .iter()
            .map(|(_, bytes)| bytes.lock().clone())
            .collect()
    }
}

struct MemoryWriter {
    bytes: Arc<Mutex<Vec<u8>>>,
    writes: usize,
    fail_at: usize,
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writes += 1;
        if self.writes == self.fail_at {
            return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
        }
        self.bytes.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl PersistenceSink for MemorySink {
    fn prepare_directory(&self, dir: &Path) -> PersistenceResult<()> {
        if self.fail_prepare.load(Ordering::SeqCst) {
            return Err(PersistenceError::Io {
                path: dir.to_path_buf(),
                source: io::Error::new(io::ErrorKind::PermissionDenied, "read-only"),
            });
        }
        Ok(())
    }

    fn snapshot_extension(&self) -> &str {
        "bin"
    }

    fn write_snapshot(&self, frame: &StagedFrame<'_>, path: &Path) -> PersistenceResult<()> {
        self.snapshots.lock().push(StoredSnapshot {
            path: path.to_path_buf(),
            size: frame.size,
            format: frame.format,
            pixels: frame.pixels.to_vec(),
        });
        Ok(())
    }

    fn create_stream(&self, path: &Path) -> PersistenceResult<StreamWriter> {
        if !self.paths.lock().insert(path.to_path_buf()) {
            return Err(PersistenceError::Io {
                path: path.to_path_buf(),
                source: io::Error::new(io::ErrorKind::AlreadyExists, "exists"),
            });
        }
        let bytes = Arc::new(Mutex::new(Vec::new()));
        self.streams.lock().push((path.to_path_buf(), Arc::clone(&bytes)));
        Ok(Box::new(MemoryWriter {
            bytes,
            writes: 0,
            fail_at: self.fail_write_at.load(Ordering::SeqCst),
        }))
    }
}

/// Route crate logs to the test output
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
